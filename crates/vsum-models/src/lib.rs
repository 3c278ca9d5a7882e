//! Time-aligned document model for the vsum pipeline.
//!
//! This crate provides:
//! - Segments and sentences with validated time spans
//! - Pluggable annotation tracks and the track registry
//! - The document container with write-once metadata
//! - Sentence segmentation with gap filling
//! - The persisted checkpoint record
//! - Pipeline stage and per-item progress types

pub mod builder;
pub mod document;
pub mod error;
pub mod record;
pub mod registry;
pub mod segment;
pub mod sentence;
pub mod stage;
pub mod timestamp;
pub mod track;

// Re-export common types
pub use builder::build_document;
pub use document::{keys, Document, Metadata, ScoredSpan};
pub use error::{ModelError, ModelResult};
pub use record::{record_schema, DocumentRecord, SentenceRecord};
pub use registry::{TrackConstructor, TrackRegistry};
pub use segment::{Segment, TranscriptEntry, UNKNOWN_SPEAKER};
pub use sentence::Sentence;
pub use stage::{ItemProgress, ItemStage, Stage};
pub use timestamp::{format_seconds, merge_ranges, total_duration, TimeRange};
pub use track::{dispatch, JsonTrack, KeyframeTrack, TextTrack, Track, TrackOperation, KEYFRAME_TRACK, TEXT_TRACK};
