//! Production collaborators.
//!
//! Model-backed stages call the inference sidecar; splicing shells out to
//! ffmpeg.

mod ffmpeg;
mod ml;

pub use ffmpeg::FfmpegSplicer;
pub use ml::{chunk_lines, MlEmbedder, MlKeyframeExtractor, MlStageProvider, MlSummarizer, MlTranscriber};
