//! FFmpeg CLI wrapper for media splicing.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building
//! - Progress parsing from `-progress pipe:2`
//! - Media probing via ffprobe
//! - Splicing a source file down to a list of retained time ranges

pub mod command;
pub mod error;
pub mod probe;
pub mod progress;
pub mod splice;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use probe::{get_duration, probe_media, MediaInfo};
pub use progress::{FfmpegProgress, ProgressCallback};
pub use splice::{build_splice_filter, partial_output_path, splice_ranges, spliceable_ranges, SpliceOutcome, SpliceSettings};
