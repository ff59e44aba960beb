// Parameter embedding store.
//
// Every fully rendered generation is recorded as a 16-dimensional
// normalized parameter vector (`vector.rs`) with its genre, JSON metadata,
// and an optional rating, in a SQLite database (`store.rs`). The store
// answers cosine-similarity queries and rating-ordered recommendations,
// which the pipeline uses to build uniqueness history and to bias future
// parameter sampling.

pub mod error;
pub mod record;
pub mod store;
pub mod vector;

pub use error::StoreError;
pub use record::{
    EmbeddingRecord, FeedbackEntry, RecordId, RecordMetadata, SimilarMatch, StoreStats,
};
pub use store::EmbeddingStore;
pub use vector::{GenerationParameters, ParameterVector, VECTOR_DIM};
