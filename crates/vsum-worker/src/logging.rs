//! Structured per-item logging.
//!
//! Every line carries the item id and the stage being run so a whole batch
//! can be grepped for one item.

use tracing::{error, info, warn, Span};

/// Logger bound to one item and one operation.
#[derive(Debug, Clone)]
pub struct ItemLogger {
    item_id: String,
    operation: String,
}

impl ItemLogger {
    /// Create a logger for `item_id` running `operation` (usually a stage name).
    pub fn new(item_id: &str, operation: &str) -> Self {
        Self {
            item_id: item_id.to_string(),
            operation: operation.to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            item_id = %self.item_id,
            stage = %self.operation,
            "Item started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            item_id = %self.item_id,
            stage = %self.operation,
            "Item progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            item_id = %self.item_id,
            stage = %self.operation,
            "Item warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            item_id = %self.item_id,
            stage = %self.operation,
            "Item error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            item_id = %self.item_id,
            stage = %self.operation,
            "Item completed: {}", message
        );
    }

    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Span wrapping one stage of one item.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "item",
            item_id = %self.item_id,
            stage = %self.operation
        )
    }
}
