//! Pipeline configuration.
//!
//! Read from `VSUM_*` environment variables. Optional keys fall back to
//! defaults; required keys produce a configuration error.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use vsum_media::SpliceSettings;
use vsum_ml_client::MlClientConfig;

use crate::error::{WorkerError, WorkerResult};

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(key, value = %raw, "Invalid configuration value, using default");
                default
            }
        },
        None => default,
    }
}

fn flag_or(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> bool {
    match lookup(key).map(|s| s.trim().to_lowercase()) {
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => true,
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => false,
        _ => default,
    }
}

fn string_or(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> String {
    lookup(key)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn required(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> WorkerResult<String> {
    lookup(key)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| WorkerError::config_error(format!("{} not set", key)))
}

/// Scoring and thresholding knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterConfig {
    /// Weight of the text score in the combined score
    pub alpha: f64,
    /// Lower cutoff is `mean - std_factor * std_dev`
    pub std_factor: f64,
    /// Percentile protecting the top tier
    pub upper_percentile: f64,
    /// Fewer combined scores than this make thresholding a no-op
    pub min_samples: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            alpha: 0.5,
            std_factor: 1.0,
            upper_percentile: 85.0,
            min_samples: 3,
        }
    }
}

impl FilterConfig {
    fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            alpha: parse_or(lookup, "VSUM_FILTER_ALPHA", defaults.alpha),
            std_factor: parse_or(lookup, "VSUM_FILTER_STD_FACTOR", defaults.std_factor),
            upper_percentile: parse_or(lookup, "VSUM_FILTER_UPPER_PERCENTILE", defaults.upper_percentile),
            min_samples: parse_or(lookup, "VSUM_FILTER_MIN_SAMPLES", defaults.min_samples),
        }
    }

    pub fn validate(&self) -> WorkerResult<()> {
        if !(0.0..=1.0).contains(&self.alpha) {
            return Err(WorkerError::config_error(format!(
                "VSUM_FILTER_ALPHA must be within [0, 1], got {}",
                self.alpha
            )));
        }
        if !(0.0..=100.0).contains(&self.upper_percentile) {
            return Err(WorkerError::config_error(format!(
                "VSUM_FILTER_UPPER_PERCENTILE must be within [0, 100], got {}",
                self.upper_percentile
            )));
        }
        if !self.std_factor.is_finite() || self.std_factor < 0.0 {
            return Err(WorkerError::config_error(format!(
                "VSUM_FILTER_STD_FACTOR must be non-negative, got {}",
                self.std_factor
            )));
        }
        Ok(())
    }
}

/// Inference sidecar settings.
#[derive(Debug, Clone, PartialEq)]
pub struct MlServiceConfig {
    /// Required by the ML-backed stage provider
    pub url: Option<String>,
    pub timeout: Duration,
    /// Summarizer input budget per chunk, in whitespace tokens
    pub summary_token_limit: usize,
    pub max_retries: u32,
}

impl Default for MlServiceConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout: Duration::from_secs(600),
            summary_token_limit: 512,
            max_retries: 2,
        }
    }
}

impl MlServiceConfig {
    fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Self {
        Self {
            url: lookup("VSUM_ML_SERVICE_URL").filter(|s| !s.trim().is_empty()),
            timeout: Duration::from_secs(parse_or(lookup, "VSUM_ML_TIMEOUT_SECS", 600)),
            summary_token_limit: parse_or(lookup, "VSUM_SUMMARY_TOKEN_LIMIT", 512),
            max_retries: parse_or(lookup, "VSUM_ML_MAX_RETRIES", 2),
        }
    }

    /// Client settings; fails when the service URL is missing.
    pub fn client_config(&self) -> WorkerResult<MlClientConfig> {
        let url = self
            .url
            .clone()
            .ok_or_else(|| WorkerError::config_error("VSUM_ML_SERVICE_URL not set"))?;
        Ok(MlClientConfig {
            base_url: url,
            timeout: self.timeout,
            max_retries: self.max_retries,
        })
    }
}

/// Settings for scoring summaries against human importance annotations.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationConfig {
    /// TSV of `{item_id}\t{category}\t{comma separated scores}` rows
    pub annotations_path: PathBuf,
    /// Minimum temporal IoU for a sentence to match an annotated segment
    pub iou_threshold: f64,
    /// Annotated importance at or above this counts as important
    pub importance_threshold: f64,
    /// Length of each annotated segment in seconds
    pub segment_secs: f64,
    /// Annotation score range that predicted `[0, 1]` scores are mapped onto
    pub score_range: (f64, f64),
    /// Optional per-item reference text at `{video_dir}/{item_id}/{name}`
    pub reference_filename: String,
    /// Per-item report name under the output dir
    pub report_filename: String,
}

impl EvaluationConfig {
    pub fn new(annotations_path: impl Into<PathBuf>) -> Self {
        Self {
            annotations_path: annotations_path.into(),
            iou_threshold: 0.5,
            importance_threshold: 3.0,
            segment_secs: 2.0,
            score_range: (1.0, 5.0),
            reference_filename: "reference.txt".to_string(),
            report_filename: "evaluation.json".to_string(),
        }
    }

    pub fn from_env() -> WorkerResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> WorkerResult<Self> {
        let defaults = Self::new(required(&lookup, "VSUM_EVAL_ANNOTATIONS")?);
        Ok(Self {
            iou_threshold: parse_or(&lookup, "VSUM_EVAL_IOU_THRESHOLD", defaults.iou_threshold),
            importance_threshold: parse_or(&lookup, "VSUM_EVAL_IMPORTANCE_THRESHOLD", defaults.importance_threshold),
            segment_secs: parse_or(&lookup, "VSUM_EVAL_SEGMENT_SECS", defaults.segment_secs),
            score_range: (
                parse_or(&lookup, "VSUM_EVAL_SCORE_MIN", defaults.score_range.0),
                parse_or(&lookup, "VSUM_EVAL_SCORE_MAX", defaults.score_range.1),
            ),
            reference_filename: string_or(&lookup, "VSUM_EVAL_REFERENCE_FILENAME", &defaults.reference_filename),
            report_filename: string_or(&lookup, "VSUM_EVAL_REPORT_FILENAME", &defaults.report_filename),
            ..defaults
        })
    }

    pub fn validate(&self) -> WorkerResult<()> {
        if !(self.iou_threshold > 0.0 && self.iou_threshold <= 1.0) {
            return Err(WorkerError::config_error(format!(
                "VSUM_EVAL_IOU_THRESHOLD must be within (0, 1], got {}",
                self.iou_threshold
            )));
        }
        if !(self.segment_secs.is_finite() && self.segment_secs > 0.0) {
            return Err(WorkerError::config_error(format!(
                "VSUM_EVAL_SEGMENT_SECS must be positive, got {}",
                self.segment_secs
            )));
        }
        let (lo, hi) = self.score_range;
        if !(lo.is_finite() && hi.is_finite() && lo < hi) {
            return Err(WorkerError::config_error(format!(
                "VSUM_EVAL_SCORE_MIN must be below VSUM_EVAL_SCORE_MAX, got [{}, {}]",
                lo, hi
            )));
        }
        for (key, name) in [
            ("VSUM_EVAL_REFERENCE_FILENAME", &self.reference_filename),
            ("VSUM_EVAL_REPORT_FILENAME", &self.report_filename),
        ] {
            if name.contains('/') || name.contains('\\') {
                return Err(WorkerError::config_error(format!("{} must be a plain file name", key)));
            }
        }
        Ok(())
    }
}

/// Read splice encoder settings.
fn splice_from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> SpliceSettings {
    let defaults = SpliceSettings::default();
    SpliceSettings {
        video_codec: string_or(lookup, "VSUM_SPLICE_VIDEO_CODEC", &defaults.video_codec),
        audio_codec: string_or(lookup, "VSUM_SPLICE_AUDIO_CODEC", &defaults.audio_codec),
        crf: parse_or(lookup, "VSUM_SPLICE_CRF", defaults.crf),
        preset: string_or(lookup, "VSUM_SPLICE_PRESET", &defaults.preset),
        timeout_secs: parse_or(lookup, "VSUM_SPLICE_TIMEOUT_SECS", defaults.timeout_secs),
    }
}

/// Full pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Root of `{item_id}/{video_filename}` inputs
    pub video_dir: PathBuf,
    /// Root of `{item_id}/{output_filename}` checkpoints and spliced output
    pub output_dir: PathBuf,
    pub batch_size: usize,
    pub video_filename: String,
    pub output_filename: String,
    pub spliced_filename: String,
    /// Gzip checkpoint records
    pub compress_state: bool,
    /// Restart items whose record carries an error instead of skipping them
    pub retry_errored: bool,
    /// Probe original and spliced durations after each batch
    pub media_metrics: bool,
    /// Explicit item ids; `None` scans the video dir
    pub items: Option<Vec<String>>,
    pub filter: FilterConfig,
    pub ml: MlServiceConfig,
    pub splice: SpliceSettings,
}

impl PipelineConfig {
    /// Configuration with defaults for everything but the two directories.
    pub fn new(video_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            video_dir: video_dir.into(),
            output_dir: output_dir.into(),
            batch_size: 1,
            video_filename: "source_video.mp4".to_string(),
            output_filename: "output.json".to_string(),
            spliced_filename: "summary.mp4".to_string(),
            compress_state: false,
            retry_errored: false,
            media_metrics: true,
            items: None,
            filter: FilterConfig::default(),
            ml: MlServiceConfig::default(),
            splice: SpliceSettings::default(),
        }
    }

    /// Create config from environment variables.
    pub fn from_env() -> WorkerResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> WorkerResult<Self> {
        let video_dir = required(&lookup, "VSUM_VIDEO_DIR")?;
        let output_dir = required(&lookup, "VSUM_OUTPUT_DIR")?;
        let defaults = Self::new(&video_dir, &output_dir);

        let items = lookup("VSUM_ITEMS").map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect::<Vec<_>>()
        });

        Ok(Self {
            batch_size: parse_or(&lookup, "VSUM_BATCH_SIZE", defaults.batch_size),
            video_filename: string_or(&lookup, "VSUM_VIDEO_FILENAME", &defaults.video_filename),
            output_filename: string_or(&lookup, "VSUM_OUTPUT_FILENAME", &defaults.output_filename),
            spliced_filename: string_or(&lookup, "VSUM_SPLICED_FILENAME", &defaults.spliced_filename),
            compress_state: flag_or(&lookup, "VSUM_COMPRESS_STATE", false),
            retry_errored: flag_or(&lookup, "VSUM_RETRY_ERRORED", false),
            media_metrics: flag_or(&lookup, "VSUM_MEDIA_METRICS", true),
            items,
            filter: FilterConfig::from_lookup(&lookup),
            ml: MlServiceConfig::from_lookup(&lookup),
            splice: splice_from_lookup(&lookup),
            ..defaults
        })
    }

    /// Check settings shared by every provider.
    pub fn validate(&self) -> WorkerResult<()> {
        if self.batch_size == 0 {
            return Err(WorkerError::config_error("VSUM_BATCH_SIZE must be at least 1"));
        }
        for (key, name) in [
            ("VSUM_VIDEO_FILENAME", &self.video_filename),
            ("VSUM_OUTPUT_FILENAME", &self.output_filename),
            ("VSUM_SPLICED_FILENAME", &self.spliced_filename),
        ] {
            if name.contains('/') || name.contains('\\') {
                return Err(WorkerError::config_error(format!("{} must be a plain file name", key)));
            }
        }
        if self.output_filename == self.spliced_filename {
            return Err(WorkerError::config_error(
                "VSUM_OUTPUT_FILENAME and VSUM_SPLICED_FILENAME must differ",
            ));
        }
        if self.splice.crf > 51 {
            return Err(WorkerError::config_error(format!(
                "VSUM_SPLICE_CRF must be within [0, 51], got {}",
                self.splice.crf
            )));
        }
        if let Some(items) = &self.items {
            if items.is_empty() {
                return Err(WorkerError::config_error("VSUM_ITEMS is set but lists no items"));
            }
        }
        self.filter.validate()
    }

    /// `{video_dir}/{item_id}/{video_filename}`
    pub fn video_path(&self, item_id: &str) -> PathBuf {
        self.video_dir.join(item_id).join(&self.video_filename)
    }

    /// `{output_dir}/{item_id}/{spliced_filename}`
    pub fn spliced_path(&self, item_id: &str) -> PathBuf {
        self.output_dir.join(item_id).join(&self.spliced_filename)
    }
}
