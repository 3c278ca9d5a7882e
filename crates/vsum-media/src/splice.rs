//! Cut a media file down to a list of retained time ranges.
//!
//! Each range becomes a `trim`/`atrim` branch of one filter graph; the
//! branches are joined with `concat` and re-encoded in a single pass.

use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info};

use vsum_models::{merge_ranges, total_duration, TimeRange};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::probe::probe_media;

/// Encoder settings for spliced output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpliceSettings {
    pub video_codec: String,
    pub audio_codec: String,
    pub crf: u8,
    pub preset: String,
    pub timeout_secs: u64,
}

impl Default for SpliceSettings {
    fn default() -> Self {
        Self {
            video_codec: "libx264".to_string(),
            audio_codec: "aac".to_string(),
            crf: 23,
            preset: "veryfast".to_string(),
            timeout_secs: 3600,
        }
    }
}

/// Result of a splice request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpliceOutcome {
    /// Output was produced by this call
    Created,
    /// Output already existed and was left untouched
    AlreadyExists,
}

/// Build the `-filter_complex` graph for `ranges`.
///
/// Labels: `[v{i}]`/`[a{i}]` per range, `[outv]`/`[outa]` for the result.
pub fn build_splice_filter(ranges: &[TimeRange], with_audio: bool) -> String {
    let mut graph = String::new();
    for (i, range) in ranges.iter().enumerate() {
        graph.push_str(&format!(
            "[0:v]trim=start={:.3}:end={:.3},setpts=PTS-STARTPTS[v{}];",
            range.start, range.end, i
        ));
        if with_audio {
            graph.push_str(&format!(
                "[0:a]atrim=start={:.3}:end={:.3},asetpts=PTS-STARTPTS[a{}];",
                range.start, range.end, i
            ));
        }
    }

    for i in 0..ranges.len() {
        graph.push_str(&format!("[v{}]", i));
        if with_audio {
            graph.push_str(&format!("[a{}]", i));
        }
    }

    if with_audio {
        graph.push_str(&format!("concat=n={}:v=1:a=1[outv][outa]", ranges.len()));
    } else {
        graph.push_str(&format!("concat=n={}:v=1:a=0[outv]", ranges.len()));
    }
    graph
}

/// Merge `ranges` and drop any that cover no time.
///
/// A zero-length range would become an empty `trim` branch in the graph.
pub fn spliceable_ranges(ranges: &[TimeRange]) -> Vec<TimeRange> {
    merge_ranges(ranges)
        .into_iter()
        .filter(|r| r.duration() > 0.0)
        .collect()
}

/// Path ffmpeg writes to before the result is renamed into place.
///
/// Keeps the extension so ffmpeg can still infer the container.
pub fn partial_output_path(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let name = match output.extension() {
        Some(ext) => format!("{}.partial.{}", stem, ext.to_string_lossy()),
        None => format!("{}.partial", stem),
    };
    output.with_file_name(name)
}

/// Splice `input` down to `ranges`, writing `output`.
///
/// An existing `output` is treated as already done. Ranges are merged and
/// zero-length ones dropped first; an empty list is rejected.
pub async fn splice_ranges(
    input: impl AsRef<Path>,
    ranges: &[TimeRange],
    output: impl AsRef<Path>,
    settings: &SpliceSettings,
) -> MediaResult<SpliceOutcome> {
    let input = input.as_ref();
    let output = output.as_ref();

    if fs::try_exists(output).await? {
        debug!(output = %output.display(), "Spliced output already exists, skipping");
        metrics::counter!("vsum_splice_total", "outcome" => "exists").increment(1);
        return Ok(SpliceOutcome::AlreadyExists);
    }

    if !fs::try_exists(input).await? {
        return Err(MediaError::FileNotFound(input.to_path_buf()));
    }

    let ranges = spliceable_ranges(ranges);
    if ranges.is_empty() {
        return Err(MediaError::invalid_request("no time ranges to splice"));
    }

    let info = probe_media(input).await?;
    if !info.has_video {
        return Err(MediaError::InvalidMedia(format!(
            "{} has no video stream",
            input.display()
        )));
    }

    let filter = build_splice_filter(&ranges, info.has_audio);
    let partial = partial_output_path(output);
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent).await?;
    }

    let mut cmd = FfmpegCommand::new(input, &partial)
        .filter_complex(filter)
        .map("[outv]")
        .video_codec(&settings.video_codec)
        .crf(settings.crf)
        .preset(&settings.preset);
    if info.has_audio {
        cmd = cmd.map("[outa]").audio_codec(&settings.audio_codec);
    }

    let expected_ms = (total_duration(&ranges) * 1000.0) as i64;
    let started = Instant::now();
    info!(
        input = %input.display(),
        output = %output.display(),
        ranges = ranges.len(),
        retained_secs = expected_ms as f64 / 1000.0,
        "Splicing media"
    );

    let result = FfmpegRunner::new()
        .with_timeout(settings.timeout_secs)
        .run_with_progress(&cmd, move |p| {
            debug!(percent = p.percentage(expected_ms), speed = p.speed, "Splice progress");
        })
        .await;

    if let Err(e) = result {
        let _ = fs::remove_file(&partial).await;
        metrics::counter!("vsum_splice_total", "outcome" => "failed").increment(1);
        return Err(e);
    }

    fs::rename(&partial, output).await?;
    metrics::counter!("vsum_splice_total", "outcome" => "created").increment(1);
    info!(
        output = %output.display(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Splice complete"
    );
    Ok(SpliceOutcome::Created)
}
