// reverie CLI entry point.
//
// Usage:
//   reverie [--config reverie.json] <COMMAND>
//     generate --genre <G> (--seconds <S> | --bars <N>) [--seed N] [--key "D minor"]
//              [--tempo BPM] [--contour arch|descending|ascending|wave]
//              [--threshold T] [--learn] [--tag T]... [--note TEXT]
//     rate <ID> <SCORE> [--comment TEXT]
//     similar <ID> [-k N] [--genre G]
//     recommend --genre <G> [-k N]
//     stats
//     genres [--dump]
//
// Results are printed to stdout as JSON; logs go to stderr (RUST_LOG to
// adjust, default info).

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use reverie_music::{Contour, DurationSpec, Genre, Key};
use reverie_pipeline::{Coordinator, GenerateOptions, PipelineConfig};
use reverie_store::{EmbeddingStore, RecordId};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "reverie")]
#[command(about = "Procedural composition, rendering, and parameter memory")]
#[command(version)]
struct Cli {
    /// Pipeline config (JSON); defaults apply when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compose, render, and record one piece
    Generate {
        #[arg(short, long)]
        genre: String,

        /// Length in seconds
        #[arg(long, conflicts_with = "bars", required_unless_present = "bars")]
        seconds: Option<f64>,

        /// Length in 4/4 bars
        #[arg(long)]
        bars: Option<u32>,

        #[arg(long)]
        seed: Option<u64>,

        /// e.g. "D minor", "Bb major", "F#"
        #[arg(long)]
        key: Option<String>,

        #[arg(long)]
        tempo: Option<f64>,

        #[arg(long)]
        contour: Option<String>,

        /// Uniqueness similarity threshold in (0, 1]
        #[arg(long)]
        threshold: Option<f64>,

        /// Bias tempo and effects toward highly rated past generations
        #[arg(long)]
        learn: bool,

        #[arg(long = "tag")]
        tags: Vec<String>,

        #[arg(long)]
        note: Option<String>,
    },

    /// Rate a recorded generation
    Rate {
        id: RecordId,
        score: f64,
        #[arg(long)]
        comment: Option<String>,
    },

    /// Records most similar to a recorded generation
    Similar {
        id: RecordId,
        #[arg(short, default_value_t = 5)]
        k: usize,
        #[arg(long)]
        genre: Option<String>,
    },

    /// Highest-rated records of a genre
    Recommend {
        #[arg(short, long)]
        genre: String,
        #[arg(short, default_value_t = 5)]
        k: usize,
    },

    /// Store statistics
    Stats,

    /// List genre profiles
    Genres {
        /// Print the full profiles as JSON
        #[arg(long)]
        dump: bool,
    },
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(PipelineConfig::default()),
    }
}

fn open_store(config: &PipelineConfig) -> Result<EmbeddingStore> {
    EmbeddingStore::open(&config.database)
        .with_context(|| format!("opening store {}", config.database.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[derive(Serialize)]
struct SimilarRow {
    id: RecordId,
    score: f64,
    genre: Genre,
    rating: Option<f64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Generate {
            genre,
            seconds,
            bars,
            seed,
            key,
            tempo,
            contour,
            threshold,
            learn,
            tags,
            note,
        } => {
            let genre: Genre = genre.parse()?;
            let duration = match (seconds, bars) {
                (Some(s), None) => DurationSpec::Seconds(s),
                (None, Some(b)) => DurationSpec::Bars(b),
                _ => bail!("give exactly one of --seconds or --bars"),
            };
            let options = GenerateOptions {
                seed,
                key: key.as_deref().map(str::parse::<Key>).transpose()?,
                tempo_bpm: tempo,
                contour: contour
                    .as_deref()
                    .map(str::parse::<Contour>)
                    .transpose()
                    .map_err(anyhow::Error::msg)?,
                similarity_threshold: threshold,
                learn_from_history: learn,
                tags,
                note,
            };
            let coordinator = Coordinator::from_config(&config)?;
            match coordinator.generate(genre, duration, &options).await {
                Ok(output) => {
                    for warning in &output.warnings {
                        tracing::warn!(%warning, "quality warning");
                    }
                    print_json(&output.summary())?;
                }
                Err(e) => {
                    tracing::error!(kind = ?e.kind(), error = %e, "generation failed");
                    return Err(e.into());
                }
            }
        }

        Commands::Rate { id, score, comment } => {
            let store = open_store(&config)?;
            store.rate_with_comment(id, score, comment.as_deref())?;
            print_json(&store.get(id)?)?;
        }

        Commands::Similar { id, k, genre } => {
            let store = open_store(&config)?;
            let genre = genre.as_deref().map(str::parse::<Genre>).transpose()?;
            let query = store.get(id)?;
            let mut rows = Vec::new();
            for hit in store.similar(&query.vector, k + 1, genre)? {
                if hit.id == id {
                    continue;
                }
                let record = store.get(hit.id)?;
                rows.push(SimilarRow {
                    id: hit.id,
                    score: hit.score,
                    genre: record.genre,
                    rating: record.rating,
                });
            }
            rows.truncate(k);
            print_json(&rows)?;
        }

        Commands::Recommend { genre, k } => {
            let store = open_store(&config)?;
            print_json(&store.recommend(genre.parse()?, k)?)?;
        }

        Commands::Stats => {
            let store = open_store(&config)?;
            print_json(&store.stats()?)?;
        }

        Commands::Genres { dump } => {
            let registry = config.registry()?;
            if dump {
                println!("{}", registry.to_json()?);
            } else {
                for genre in registry.genres() {
                    let profile = registry.get(genre)?;
                    println!("{genre:<12} {}", profile.description);
                }
            }
        }
    }
    Ok(())
}
