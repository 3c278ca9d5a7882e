//! Run summary written to `run_summary.json` after each run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use vsum_models::{ItemStage, Stage};

/// Outcome of one item in one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemReport {
    pub item_id: String,
    pub state: ItemStage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<Stage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Stages skipped because their output was already persisted
    #[serde(default)]
    pub memo_hits: Vec<Stage>,
    /// Previously errored and left alone
    #[serde(default)]
    pub skipped: bool,
    pub total_sentences: usize,
    pub retained: usize,
    pub retained_ratio: f64,
}

impl ItemReport {
    pub fn new(item_id: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            state: ItemStage::Unstarted,
            failed_stage: None,
            error: None,
            memo_hits: Vec::new(),
            skipped: false,
            total_sentences: 0,
            retained: 0,
            retained_ratio: 0.0,
        }
    }

    /// Every stage was a memo hit.
    pub fn fully_memoized(&self) -> bool {
        self.memo_hits.len() == Stage::ALL.len()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunTotals {
    pub items: usize,
    pub spliced: usize,
    pub errored: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub items: Vec<ItemReport>,
    pub totals: RunTotals,
    /// Total duration of probed source media
    pub original_duration_secs: Option<f64>,
    /// Total duration of probed spliced output
    pub spliced_duration_secs: Option<f64>,
}

impl RunSummary {
    pub fn start() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            items: Vec::new(),
            totals: RunTotals::default(),
            original_duration_secs: None,
            spliced_duration_secs: None,
        }
    }

    pub fn push(&mut self, report: ItemReport) {
        self.totals.items += 1;
        match report.state {
            ItemStage::Spliced => self.totals.spliced += 1,
            ItemStage::Errored => self.totals.errored += 1,
            _ => {}
        }
        if report.skipped {
            self.totals.skipped += 1;
        }
        self.items.push(report);
    }

    /// Add one probed original/spliced pair.
    pub fn add_durations(&mut self, original: f64, spliced: f64) {
        *self.original_duration_secs.get_or_insert(0.0) += original;
        *self.spliced_duration_secs.get_or_insert(0.0) += spliced;
    }

    /// Spliced over original duration, when both were probed.
    pub fn compression_ratio(&self) -> Option<f64> {
        match (self.original_duration_secs, self.spliced_duration_secs) {
            (Some(o), Some(s)) if o > 0.0 => Some(s / o),
            _ => None,
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn report(&self, item_id: &str) -> Option<&ItemReport> {
        self.items.iter().find(|r| r.item_id == item_id)
    }
}
