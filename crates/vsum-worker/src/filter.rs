//! Scoring and filtering engine.
//!
//! Turns per-track scores into a keep/drop decision per sentence:
//!
//! 1. Keyframe scores are min-max normalized across the document.
//! 2. `combined = alpha * text + (1 - alpha) * keyframe`.
//! 3. A sentence is kept when `combined >= mean - std_factor * std_dev` or
//!    when `combined` reaches the configured upper percentile.
//!
//! With fewer than `min_samples` scores the statistics are not meaningful;
//! combined scores are still written but every sentence is kept.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use vsum_models::{keys, Document, Stage, TrackOperation, KEYFRAME_TRACK, TEXT_TRACK};

use crate::config::FilterConfig;
use crate::error::{WorkerError, WorkerResult};

/// Whether thresholding actually ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterStatus {
    Applied,
    NoOp,
}

/// Statistics stored under `filter_stats` in document metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterStats {
    pub mean: f64,
    pub std_dev: f64,
    /// Percentile rank used for the upper cutoff
    pub upper_percentile: f64,
    pub lower_cutoff: Option<f64>,
    pub upper_cutoff: Option<f64>,
    pub alpha: f64,
    pub retained: usize,
    pub total: usize,
    pub status: FilterStatus,
}

impl FilterStats {
    pub fn retained_ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.retained as f64 / self.total as f64
        }
    }
}

/// Min-max normalize to [0, 1].
///
/// When every value is equal the range is degenerate: a nonzero common value
/// maps to 1, zero maps to 0.
pub fn normalize_keyframe_scores(raw: &[f64]) -> Vec<f64> {
    let Some(min) = raw.iter().copied().reduce(f64::min) else {
        return Vec::new();
    };
    let max = raw.iter().copied().fold(min, f64::max);
    let range = max - min;

    if range == 0.0 {
        let fill = if min != 0.0 { 1.0 } else { 0.0 };
        return vec![fill; raw.len()];
    }
    raw.iter().map(|v| (v - min) / range).collect()
}

/// Weighted blend of text and normalized keyframe scores.
pub fn combine_scores(text: &[f64], keyframe: &[f64], alpha: f64) -> Vec<f64> {
    text.iter()
        .zip(keyframe)
        .map(|(t, k)| alpha * t + (1.0 - alpha) * k)
        .collect()
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Percentile with linear interpolation between closest ranks.
pub fn percentile(values: &[f64], pct: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let rank = (pct / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Keep/drop decision per score plus the statistics behind it.
pub fn select(combined: &[f64], config: &FilterConfig) -> (Vec<bool>, FilterStats) {
    let total = combined.len();
    let m = mean(combined);
    let sd = std_dev(combined);

    let mut stats = FilterStats {
        mean: m,
        std_dev: sd,
        upper_percentile: config.upper_percentile,
        lower_cutoff: None,
        upper_cutoff: None,
        alpha: config.alpha,
        retained: total,
        total,
        status: FilterStatus::NoOp,
    };

    if total == 0 || total < config.min_samples {
        return (vec![true; total], stats);
    }

    let lower = m - config.std_factor * sd;
    let upper = percentile(combined, config.upper_percentile).unwrap_or(f64::INFINITY);
    let keep: Vec<bool> = combined.iter().map(|c| *c >= lower || *c >= upper).collect();

    stats.lower_cutoff = Some(lower);
    stats.upper_cutoff = Some(upper);
    stats.retained = keep.iter().filter(|k| **k).count();
    stats.status = FilterStatus::Applied;
    (keep, stats)
}

/// Run the filtering engine over a scored document.
///
/// Writes normalized keyframe scores into the keyframe tracks, the combined
/// score into each sentence, the retained `[start, end]` list under
/// `filtered_sentences` and the statistics under `filter_stats`. Running it
/// twice on the same inputs produces the same output.
pub fn apply_filter(doc: &mut Document, config: &FilterConfig) -> WorkerResult<FilterStats> {
    let mut text_scores = Vec::with_capacity(doc.len());
    let mut keyframe_scores = Vec::with_capacity(doc.len());
    for (idx, sentence) in doc.sentences().iter().enumerate() {
        let text = sentence.track(TEXT_TRACK).and_then(|t| t.score()).ok_or_else(|| {
            WorkerError::validation(Stage::Filter, format!("sentence {} has no text score", idx))
        })?;
        let keyframe = sentence.track(KEYFRAME_TRACK).and_then(|t| t.score()).ok_or_else(|| {
            WorkerError::validation(Stage::Filter, format!("sentence {} has no keyframe score", idx))
        })?;
        text_scores.push(text);
        keyframe_scores.push(keyframe);
    }

    let normalized = normalize_keyframe_scores(&keyframe_scores);
    let combined = combine_scores(&text_scores, &normalized, config.alpha);

    if !doc.is_empty() {
        let mut keyframe_data = doc.call_track_method(TrackOperation::GetData, Some(KEYFRAME_TRACK), None)?;
        for (data, norm) in keyframe_data.iter_mut().zip(&normalized) {
            if let Value::Object(map) = data {
                map.insert("normalized_score".to_string(), json!(norm));
            }
        }
        doc.call_track_method(TrackOperation::SetData, Some(KEYFRAME_TRACK), Some(&keyframe_data))?;
    }
    doc.set_scores(&combined)?;

    let (keep, stats) = select(&combined, config);
    let retained: Vec<Value> = doc
        .sentences()
        .iter()
        .zip(&keep)
        .filter(|(_, k)| **k)
        .map(|(s, _)| json!([s.start(), s.end()]))
        .collect();

    debug!(
        retained = stats.retained,
        total = stats.total,
        status = ?stats.status,
        "Filter applied"
    );

    doc.upsert_metadata(keys::FILTERED_SENTENCES, Value::Array(retained));
    let stats_value = serde_json::to_value(&stats)
        .map_err(|e| WorkerError::validation(Stage::Filter, format!("filter stats not serializable: {}", e)))?;
    doc.upsert_metadata(keys::FILTER_STATS, stats_value);
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vsum_models::{build_document, KeyframeTrack, TrackRegistry, TranscriptEntry};

    fn approx(a: &[f64], b: &[f64]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-9)
    }

    fn scored_document(text: &[f64], keyframe: &[f64]) -> Document {
        let entries: Vec<TranscriptEntry> = (0..text.len())
            .map(|i| TranscriptEntry::new(format!("Sentence {}.", i), i as f64, i as f64 + 1.0, "A"))
            .collect();
        let mut doc =
            build_document(&entries, &TrackRegistry::with_defaults(), &[TEXT_TRACK, KEYFRAME_TRACK]).unwrap();
        let text: Vec<Value> = text.iter().map(|v| json!(v)).collect();
        let keyframe: Vec<Value> = keyframe.iter().map(|v| json!(v)).collect();
        doc.call_track_method(TrackOperation::SetScore, Some(TEXT_TRACK), Some(&text))
            .unwrap();
        doc.call_track_method(TrackOperation::SetScore, Some(KEYFRAME_TRACK), Some(&keyframe))
            .unwrap();
        doc
    }

    #[test]
    fn test_degenerate_keyframe_range() {
        assert_eq!(normalize_keyframe_scores(&[5.0, 5.0, 5.0]), vec![1.0, 1.0, 1.0]);
        assert_eq!(normalize_keyframe_scores(&[0.0, 0.0, 0.0]), vec![0.0, 0.0, 0.0]);
        assert!(normalize_keyframe_scores(&[]).is_empty());
        assert!(approx(&normalize_keyframe_scores(&[2.0, 4.0, 6.0]), &[0.0, 0.5, 1.0]));
    }

    #[test]
    fn test_statistics() {
        let values = [0.0, 0.0, 0.0, 0.0, 10.0];
        assert!((mean(&values) - 2.0).abs() < 1e-12);
        assert!((std_dev(&values) - 4.0).abs() < 1e-12);
        assert!((percentile(&values, 85.0).unwrap() - 4.0).abs() < 1e-12);
        assert_eq!(percentile(&[], 85.0), None);
        assert_eq!(percentile(&[3.0], 85.0), Some(3.0));
    }

    #[test]
    fn test_upper_band_protects_top_score() {
        let combined = [0.0, 0.0, 0.0, 0.0, 10.0];
        for std_factor in [0.0, 1.0, 10.0] {
            let config = FilterConfig {
                std_factor,
                ..Default::default()
            };
            let (keep, stats) = select(&combined, &config);
            assert!(keep[4], "top score dropped with std_factor {}", std_factor);
            assert_eq!(stats.status, FilterStatus::Applied);
        }

        let config = FilterConfig {
            std_factor: 0.0,
            ..Default::default()
        };
        let (keep, stats) = select(&combined, &config);
        assert_eq!(keep, vec![false, false, false, false, true]);
        assert_eq!(stats.retained, 1);
    }

    #[test]
    fn test_selection_is_deterministic() {
        let combined = [0.3, 0.1, 0.9, 0.4, 0.35, 0.05];
        let config = FilterConfig::default();
        assert_eq!(select(&combined, &config), select(&combined, &config));
    }

    #[test]
    fn test_small_sample_is_noop() {
        let mut doc = scored_document(&[0.1, 0.9], &[0.0, 0.0]);
        let stats = apply_filter(&mut doc, &FilterConfig::default()).unwrap();

        assert_eq!(stats.status, FilterStatus::NoOp);
        assert_eq!(stats.retained, 2);
        assert!(stats.lower_cutoff.is_none());
        let combined: Vec<f64> = doc.aggregate_scores().iter().map(|s| s.score.unwrap()).collect();
        assert!(approx(&combined, &[0.05, 0.45]));
        assert_eq!(
            doc.get_metadata(keys::FILTERED_SENTENCES),
            Some(&json!([[0.0, 1.0], [1.0, 2.0]]))
        );
        assert_eq!(doc.get_metadata(keys::FILTER_STATS).unwrap()["status"], json!("no_op"));
    }

    #[test]
    fn test_apply_filter_drops_low_tail_and_is_idempotent() {
        let mut doc = scored_document(&[0.8, 0.7, 0.0, 0.9, 0.75], &[4.0, 2.0, 0.0, 4.0, 3.0]);
        let first = apply_filter(&mut doc, &FilterConfig::default()).unwrap();
        let retained = doc.get_metadata(keys::FILTERED_SENTENCES).cloned();

        assert_eq!(first.status, FilterStatus::Applied);
        assert_eq!(first.retained, 4);
        assert_eq!(
            retained,
            Some(json!([[0.0, 1.0], [1.0, 2.0], [3.0, 4.0], [4.0, 5.0]]))
        );
        let kf = doc.sentences()[0].track_as::<KeyframeTrack>(KEYFRAME_TRACK).unwrap();
        assert_eq!(kf.normalized_score, Some(1.0));
        assert_eq!(kf.score, Some(4.0));

        let second = apply_filter(&mut doc, &FilterConfig::default()).unwrap();
        assert_eq!(first, second);
        assert_eq!(doc.get_metadata(keys::FILTERED_SENTENCES).cloned(), retained);
    }

    #[test]
    fn test_missing_scores_are_rejected() {
        let entries = vec![TranscriptEntry::new("Only one.", 0.0, 1.0, "A")];
        let mut doc =
            build_document(&entries, &TrackRegistry::with_defaults(), &[TEXT_TRACK, KEYFRAME_TRACK]).unwrap();
        let err = apply_filter(&mut doc, &FilterConfig::default()).unwrap_err();
        assert!(matches!(err, WorkerError::Validation { stage: Stage::Filter, .. }));
    }
}
