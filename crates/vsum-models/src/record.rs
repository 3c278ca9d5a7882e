//! Persisted document record.
//!
//! One record per item is the only checkpoint artifact of a pipeline run:
//! `{metadata, sentences: [{start, end, tracks: {name: data}, score}]}`.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::segment::Segment;

/// Serializable form of a [`Document`](crate::Document).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DocumentRecord {
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    #[serde(default)]
    pub sentences: Vec<SentenceRecord>,
}

/// Serializable form of a [`Sentence`](crate::Sentence).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SentenceRecord {
    pub start: f64,
    pub end: f64,
    #[serde(default)]
    pub tracks: BTreeMap<String, Value>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub placeholder: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub segments: Vec<Segment>,
}

impl DocumentRecord {
    pub fn has_error(&self) -> bool {
        self.metadata.contains_key(crate::document::keys::ERROR)
    }
}

/// JSON schema of the persisted record, for external tooling.
pub fn record_schema() -> schemars::schema::RootSchema {
    schemars::schema_for!(DocumentRecord)
}
