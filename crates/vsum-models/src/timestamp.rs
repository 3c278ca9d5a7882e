//! Time span utilities.
//!
//! Sentence boundaries, retained ranges and splice cuts are all expressed as
//! [`TimeRange`] values in seconds.

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};

/// Validated `[start, end]` span in seconds.
///
/// Serializes as a two-element array so persisted records stay compact.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(into = "(f64, f64)", try_from = "(f64, f64)")]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
}

impl TimeRange {
    /// Create a range, rejecting non-finite values and `start > end`.
    pub fn new(start: f64, end: f64) -> ModelResult<Self> {
        validate_span(start, end)?;
        Ok(Self { start, end })
    }

    /// Length of the range in seconds.
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// Inclusive containment check.
    pub fn contains(&self, ts: f64) -> bool {
        self.start <= ts && ts <= self.end
    }

    pub fn as_tuple(&self) -> (f64, f64) {
        (self.start, self.end)
    }
}

impl From<TimeRange> for (f64, f64) {
    fn from(range: TimeRange) -> Self {
        (range.start, range.end)
    }
}

impl TryFrom<(f64, f64)> for TimeRange {
    type Error = ModelError;

    fn try_from((start, end): (f64, f64)) -> Result<Self, Self::Error> {
        TimeRange::new(start, end)
    }
}

/// Check that a span is finite and ordered.
pub fn validate_span(start: f64, end: f64) -> ModelResult<()> {
    if !start.is_finite() || !end.is_finite() {
        return Err(ModelError::NonFiniteTimestamp { start, end });
    }
    if start > end {
        return Err(ModelError::InvalidSpan { start, end });
    }
    Ok(())
}

/// Merge ranges that touch or overlap into the minimal ordered set.
///
/// Input order does not matter; the output is sorted by start.
pub fn merge_ranges(ranges: &[TimeRange]) -> Vec<TimeRange> {
    let mut sorted: Vec<TimeRange> = ranges.to_vec();
    sorted.sort_by(|a, b| a.start.total_cmp(&b.start));

    let mut merged: Vec<TimeRange> = Vec::with_capacity(sorted.len());
    for range in sorted {
        match merged.last_mut() {
            Some(last) if range.start <= last.end => {
                last.end = last.end.max(range.end);
            }
            _ => merged.push(range),
        }
    }
    merged
}

/// Total seconds covered by a set of ranges (after merging).
pub fn total_duration(ranges: &[TimeRange]) -> f64 {
    merge_ranges(ranges).iter().map(TimeRange::duration).sum()
}

/// Format seconds into HH:MM:SS or HH:MM:SS.mmm string.
pub fn format_seconds(total_secs: f64) -> String {
    let hours = (total_secs / 3600.0).floor() as u32;
    let mins = ((total_secs % 3600.0) / 60.0).floor() as u32;
    let secs = total_secs % 60.0;

    if (secs - secs.floor()).abs() > 0.0001 {
        format!("{:02}:{:02}:{:06.3}", hours, mins, secs)
    } else {
        format!("{:02}:{:02}:{:02}", hours, mins, secs.floor() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_range_rejects_reversed_span() {
        assert!(matches!(
            TimeRange::new(5.0, 1.0),
            Err(ModelError::InvalidSpan { .. })
        ));
        assert!(matches!(
            TimeRange::new(f64::NAN, 1.0),
            Err(ModelError::NonFiniteTimestamp { .. })
        ));
        assert!(TimeRange::new(2.0, 2.0).is_ok());
    }

    #[test]
    fn test_time_range_serializes_as_pair() {
        let range = TimeRange::new(1.5, 3.0).unwrap();
        let json = serde_json::to_string(&range).unwrap();
        assert_eq!(json, "[1.5,3.0]");

        let back: TimeRange = serde_json::from_str("[0.0,2.0]").unwrap();
        assert_eq!(back, TimeRange::new(0.0, 2.0).unwrap());
        assert!(serde_json::from_str::<TimeRange>("[3.0,2.0]").is_err());
    }

    #[test]
    fn test_merge_ranges() {
        let ranges = vec![
            TimeRange::new(5.0, 6.0).unwrap(),
            TimeRange::new(0.0, 1.0).unwrap(),
            TimeRange::new(1.0, 2.0).unwrap(),
            TimeRange::new(1.5, 3.0).unwrap(),
        ];
        let merged = merge_ranges(&ranges);
        assert_eq!(
            merged,
            vec![
                TimeRange::new(0.0, 3.0).unwrap(),
                TimeRange::new(5.0, 6.0).unwrap()
            ]
        );
        assert!((total_duration(&ranges) - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_format_seconds() {
        assert_eq!(format_seconds(0.0), "00:00:00");
        assert_eq!(format_seconds(90.0), "00:01:30");
        assert_eq!(format_seconds(3661.0), "01:01:01");
        assert_eq!(format_seconds(12.5), "00:00:12.500");
    }
}
