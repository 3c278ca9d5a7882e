//! Resumable summarization pipeline.
//!
//! This crate provides:
//! - Batch executor with per-stage checkpointing and memoization
//! - Scoped acquisition of stage processors
//! - Scoring and filtering engine
//! - Collaborator contracts and their sidecar/ffmpeg adapters
//! - Run summary and structured item logging
//! - Evaluation of summaries against human importance annotations

pub mod adapters;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod evaluation;
pub mod executor;
pub mod filter;
pub mod logging;
pub mod memo;
pub mod metrics;
pub mod provider;
pub mod stages;
pub mod summary;

pub use adapters::{FfmpegSplicer, MlStageProvider};
pub use collaborators::{cosine_similarity, Embedder, KeyframeExtractor, Splicer, Summarizer, Transcriber};
pub use config::{EvaluationConfig, FilterConfig, MlServiceConfig, PipelineConfig};
pub use error::{WorkerError, WorkerResult};
pub use evaluation::{EvaluationReport, Evaluator, ItemEvaluation, EVALUATION_SUMMARY_FILENAME};
pub use executor::BatchExecutor;
pub use filter::{apply_filter, FilterStats, FilterStatus};
pub use logging::ItemLogger;
pub use provider::StageProvider;
pub use summary::{ItemReport, RunSummary, RunTotals};
