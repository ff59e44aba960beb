// Generation pipeline: configuration, history-biased parameter sampling, and
// the coordinator that runs melody -> uniqueness -> arrangement -> render ->
// record for one request.
//
// - `config.rs`: `PipelineConfig`, loaded from JSON.
// - `sampler.rs`: `ParameterBias`, rating-weighted centroid sampling.
// - `coordinator.rs`: `Coordinator::generate` and its output types.
// - `error.rs`: `PipelineError` with input/resource/internal classification.
//
// The `reverie` binary (`main.rs`) is a thin CLI over these.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod sampler;

pub use config::{BiasConfig, PipelineConfig};
pub use coordinator::{
    Checkpoints, Coordinator, CoordinatorSettings, GenerateOptions, GenerationOutput,
    QualityWarning, RunSummary, UniquenessReport,
};
pub use error::{ErrorKind, PipelineError};
pub use sampler::{BiasedChoice, ParameterBias};
