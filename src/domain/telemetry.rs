// Sample stream domain models
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One `(timestamp, value)` pair as plotted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub time_ms: i64,
    pub value: f64,
}

impl TimeSeriesPoint {
    pub fn new(time_ms: i64, value: f64) -> Self {
        Self { time_ms, value }
    }
}

/// One timestamped reading with a sparse set of channel values.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp_ms: i64,
    #[serde(default)]
    pub values: BTreeMap<String, f64>,
}

impl Sample {
    pub fn new(timestamp_ms: i64) -> Self {
        Self {
            timestamp_ms,
            values: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: f64) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    /// Channel value, or `None` when absent or not a finite number.
    pub fn value(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied().filter(|v| v.is_finite())
    }
}

/// A single channel update inside a delta.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelUpdate {
    pub channel_key: String,
    pub value: f64,
}

/// Newly arrived values queued for append at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct IncrementalDelta {
    pub timestamp_ms: i64,
    pub updates: Vec<ChannelUpdate>,
}

impl IncrementalDelta {
    pub fn new(timestamp_ms: i64) -> Self {
        Self {
            timestamp_ms,
            updates: Vec::new(),
        }
    }

    pub fn with(mut self, channel_key: impl Into<String>, value: f64) -> Self {
        self.updates.push(ChannelUpdate {
            channel_key: channel_key.into(),
            value,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    /// Delta carrying the sample's values for the given channels only.
    pub fn from_sample<'a>(sample: &Sample, channels: impl IntoIterator<Item = &'a str>) -> Self {
        let updates = channels
            .into_iter()
            .filter_map(|key| {
                sample.value(key).map(|value| ChannelUpdate {
                    channel_key: key.to_string(),
                    value,
                })
            })
            .collect();
        Self {
            timestamp_ms: sample.timestamp_ms,
            updates,
        }
    }
}

impl From<IncrementalDelta> for Sample {
    /// Later updates for the same channel win.
    fn from(delta: IncrementalDelta) -> Self {
        delta
            .updates
            .into_iter()
            .fold(Sample::new(delta.timestamp_ms), |sample, update| {
                sample.with(update.channel_key, update.value)
            })
    }
}
