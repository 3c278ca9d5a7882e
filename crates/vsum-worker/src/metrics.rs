//! Pipeline metrics.
//!
//! Recorded through the `metrics` facade; nothing is exported unless the
//! embedding process installs a recorder.

use metrics::{counter, histogram};

use vsum_models::Stage;

/// Metric names as constants for consistency.
pub mod names {
    pub const STAGE_RUNS_TOTAL: &str = "vsum_stage_runs_total";
    pub const STAGE_DURATION_SECONDS: &str = "vsum_stage_duration_seconds";
    pub const MEMO_HITS_TOTAL: &str = "vsum_memo_hits_total";
    pub const ITEM_ERRORS_TOTAL: &str = "vsum_item_errors_total";
    pub const ITEMS_EVALUATED_TOTAL: &str = "vsum_items_evaluated_total";
}

/// Record one stage execution for one item.
pub fn record_stage_run(stage: Stage, duration_secs: f64) {
    let labels = [("stage", stage.as_str().to_string())];
    counter!(names::STAGE_RUNS_TOTAL, &labels).increment(1);
    histogram!(names::STAGE_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record a stage skipped because its output was already persisted.
pub fn record_memo_hit(stage: Stage) {
    counter!(names::MEMO_HITS_TOTAL, "stage" => stage.as_str()).increment(1);
}

/// Record an item failing at `stage`.
pub fn record_item_error(stage: Stage) {
    counter!(names::ITEM_ERRORS_TOTAL, "stage" => stage.as_str()).increment(1);
}

/// Record one item's evaluation outcome (`evaluated` or `skipped`).
pub fn record_evaluation(outcome: &'static str) {
    counter!(names::ITEMS_EVALUATED_TOTAL, "outcome" => outcome).increment(1);
}
