//! Splicer backed by the local ffmpeg binary.

use std::path::Path;

use async_trait::async_trait;
use tracing::info;

use vsum_media::{check_ffmpeg, check_ffprobe, splice_ranges, SpliceOutcome, SpliceSettings};
use vsum_models::TimeRange;

use crate::collaborators::Splicer;
use crate::error::WorkerResult;

/// Splicer backed by the ffmpeg binary.
#[derive(Debug, Clone)]
pub struct FfmpegSplicer {
    settings: SpliceSettings,
}

impl FfmpegSplicer {
    /// Locate ffmpeg and ffprobe; fails when either is missing.
    pub fn acquire(settings: SpliceSettings) -> WorkerResult<Self> {
        let ffmpeg = check_ffmpeg()?;
        let ffprobe = check_ffprobe()?;
        info!(ffmpeg = %ffmpeg.display(), ffprobe = %ffprobe.display(), "Splicer ready");
        Ok(Self { settings })
    }

    pub fn settings(&self) -> &SpliceSettings {
        &self.settings
    }
}

#[async_trait]
impl Splicer for FfmpegSplicer {
    async fn splice(&self, input: &Path, ranges: &[TimeRange], output: &Path) -> WorkerResult<SpliceOutcome> {
        Ok(splice_ranges(input, ranges, output, &self.settings).await?)
    }
}
