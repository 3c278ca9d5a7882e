//! Pipeline stages and per-item progress.

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};

/// Pipeline stage, in dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Transcribe,
    Summarize,
    Score,
    Keyframe,
    Filter,
    Splice,
}

impl Stage {
    /// All stages in the order they run.
    pub const ALL: [Stage; 6] = [
        Stage::Transcribe,
        Stage::Summarize,
        Stage::Score,
        Stage::Keyframe,
        Stage::Filter,
        Stage::Splice,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Transcribe => "transcribe",
            Stage::Summarize => "summarize",
            Stage::Score => "score",
            Stage::Keyframe => "keyframe",
            Stage::Filter => "filter",
            Stage::Splice => "splice",
        }
    }

    /// Item state reached once this stage has completed.
    pub fn completed_state(&self) -> ItemStage {
        match self {
            Stage::Transcribe => ItemStage::Transcribed,
            Stage::Summarize => ItemStage::Summarized,
            Stage::Score => ItemStage::Scored,
            Stage::Keyframe => ItemStage::Keyframed,
            Stage::Filter => ItemStage::Filtered,
            Stage::Splice => ItemStage::Spliced,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle state of one item within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ItemStage {
    #[default]
    Unstarted,
    Transcribed,
    Summarized,
    Scored,
    Keyframed,
    Filtered,
    /// Terminal success
    Spliced,
    /// Terminal failure
    Errored,
}

impl ItemStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStage::Unstarted => "unstarted",
            ItemStage::Transcribed => "transcribed",
            ItemStage::Summarized => "summarized",
            ItemStage::Scored => "scored",
            ItemStage::Keyframed => "keyframed",
            ItemStage::Filtered => "filtered",
            ItemStage::Spliced => "spliced",
            ItemStage::Errored => "errored",
        }
    }

    /// Check if this is a terminal state (no more transitions expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStage::Spliced | ItemStage::Errored)
    }
}

impl std::fmt::Display for ItemStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Monotonic progress tracker for one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ItemProgress {
    pub state: ItemStage,
    /// Stage that failed, if errored
    pub failed_stage: Option<Stage>,
    pub error_message: Option<String>,
}

impl ItemProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record completion of `stage`.
    ///
    /// The resulting state must be exactly the next state; skipping a stage or
    /// moving backwards is rejected.
    pub fn advance(&mut self, stage: Stage) -> ModelResult<()> {
        let next = stage.completed_state();
        let expected = match Stage::ALL.iter().position(|s| *s == stage) {
            Some(0) => ItemStage::Unstarted,
            Some(i) => Stage::ALL[i - 1].completed_state(),
            None => ItemStage::Unstarted,
        };
        if self.state != expected {
            return Err(ModelError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        Ok(())
    }

    /// Mark the item as failed at `stage`.
    pub fn fail(&mut self, stage: Stage, error: impl Into<String>) -> ModelResult<()> {
        if self.state.is_terminal() {
            return Err(ModelError::InvalidTransition {
                from: self.state.to_string(),
                to: ItemStage::Errored.to_string(),
            });
        }
        self.state = ItemStage::Errored;
        self.failed_stage = Some(stage);
        self.error_message = Some(error.into());
        Ok(())
    }

    pub fn is_errored(&self) -> bool {
        self.state == ItemStage::Errored
    }

    /// Whether `stage` may run for this item.
    pub fn can_run(&self, stage: Stage) -> bool {
        !self.is_errored() && self.state < stage.completed_state()
    }
}
