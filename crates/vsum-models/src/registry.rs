//! Track type registry.
//!
//! Maps a track name to a constructor. The registry is an ordinary value
//! passed into document construction, so two pipelines (or two tests) never
//! see each other's registrations.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{ModelError, ModelResult};
use crate::track::{KeyframeTrack, TextTrack, Track, KEYFRAME_TRACK, TEXT_TRACK};

/// Constructor building a track from its persisted data.
pub type TrackConstructor = Arc<dyn Fn(Value) -> ModelResult<Box<dyn Track>> + Send + Sync>;

/// Name -> constructor mapping for track types.
#[derive(Clone, Default)]
pub struct TrackRegistry {
    constructors: BTreeMap<String, TrackConstructor>,
}

impl TrackRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `text` and `keyframe` tracks.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(TEXT_TRACK, |data| {
            Ok(Box::new(TextTrack::from_value(data)?) as Box<dyn Track>)
        });
        registry.register(KEYFRAME_TRACK, |data| {
            Ok(Box::new(KeyframeTrack::from_value(data)?) as Box<dyn Track>)
        });
        registry
    }

    /// Register (or replace) a constructor under `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F) -> &mut Self
    where
        F: Fn(Value) -> ModelResult<Box<dyn Track>> + Send + Sync + 'static,
    {
        self.constructors.insert(name.into(), Arc::new(constructor));
        self
    }

    /// Build a track of type `name` from `data`.
    pub fn create(&self, name: &str, data: Value) -> ModelResult<Box<dyn Track>> {
        let constructor = self
            .constructors
            .get(name)
            .ok_or_else(|| ModelError::UnknownTrackType(name.to_string()))?;
        constructor(data)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Fail with `UnknownTrackType` for the first name not registered.
    pub fn ensure_registered<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> ModelResult<()> {
        for name in names {
            if !self.contains(name) {
                return Err(ModelError::UnknownTrackType(name.to_string()));
            }
        }
        Ok(())
    }

    pub fn names(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }
}

impl fmt::Debug for TrackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackRegistry")
            .field("tracks", &self.names())
            .finish()
    }
}
