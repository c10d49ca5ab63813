// Chart configuration domain model - renderer-agnostic output of the option builder
use super::series::ColorSegment;
use super::telemetry::TimeSeriesPoint;
use chrono::DateTime;
use serde::Serialize;
use std::collections::BTreeMap;

pub const MINUTE_MS: i64 = 60 * 1000;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdMarker {
    pub value: f64,
    pub label: Option<String>,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalBand {
    pub lower: f64,
    pub upper: f64,
    pub color: String,
}

/// Large-data rendering hints forwarded to the renderer untouched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderHints {
    pub large: bool,
    pub large_threshold: usize,
    pub progressive: usize,
    pub progressive_threshold: usize,
    pub show_symbol: bool,
    pub last_value_label: bool,
}

impl RenderHints {
    pub fn for_density(high_density: bool) -> Self {
        Self {
            large: high_density,
            large_threshold: 2_000,
            progressive: 15_000,
            progressive_threshold: 3_000,
            show_symbol: false,
            last_value_label: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesEntry {
    pub key: String,
    pub name: String,
    pub color: String,
    pub visible: bool,
    /// Always empty when built; points only arrive through appends.
    pub data: Vec<TimeSeriesPoint>,
    pub threshold_markers: Vec<ThresholdMarker>,
    pub normal_band: Option<NormalBand>,
    pub hints: RenderHints,
}

/// Piecewise colouring of one series, addressed by its position in the
/// emitted series list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentAnnotation {
    pub series_index: usize,
    pub segments: Vec<ColorSegment>,
}

/// Inverted time axis: the near edge is "now", older samples recede.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimeAxis {
    pub near_edge_ms: i64,
    pub far_edge_ms: i64,
    pub window_minutes: u32,
    pub inverted: bool,
}

impl TimeAxis {
    /// Bounds `[now - window, now]`.
    pub fn anchored(now_ms: i64, window_minutes: u32) -> Self {
        Self {
            near_edge_ms: now_ms,
            far_edge_ms: now_ms - i64::from(window_minutes) * MINUTE_MS,
            window_minutes,
            inverted: true,
        }
    }

    pub fn span_ms(&self) -> i64 {
        self.near_edge_ms - self.far_edge_ms
    }

    pub fn contains(&self, time_ms: i64) -> bool {
        time_ms >= self.far_edge_ms && time_ms <= self.near_edge_ms
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ValueAxis {
    pub min: f64,
    pub max: f64,
}

impl Default for ValueAxis {
    fn default() -> Self {
        Self { min: 0.0, max: 250.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartConfiguration {
    pub series: Vec<SeriesEntry>,
    pub time_axis: TimeAxis,
    pub value_axis: ValueAxis,
    /// Legend selection by display name.
    pub legend_selected: BTreeMap<String, bool>,
    pub segment_annotations: Vec<SegmentAnnotation>,
    pub animation: bool,
    /// Oldest points beyond this many per series are discarded by the renderer.
    pub max_points_per_series: usize,
}

/// Visibility-only view of one series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesVisibility {
    pub series_index: usize,
    pub name: String,
    pub visible: bool,
    pub threshold_markers: Vec<ThresholdMarker>,
}

/// Partial reconfiguration applied on legend changes. Leaves data and the
/// zoom/pan state alone.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LegendPatch {
    pub series: Vec<SeriesVisibility>,
    pub selected: BTreeMap<String, bool>,
}

/// A hovered series value as reported by the renderer.
#[derive(Debug, Clone, PartialEq)]
pub struct HoveredValue {
    pub series_name: String,
    pub value: Option<f64>,
}

impl HoveredValue {
    pub fn new(series_name: impl Into<String>, value: Option<f64>) -> Self {
        Self {
            series_name: series_name.into(),
            value,
        }
    }
}

impl ChartConfiguration {
    pub fn series_names(&self) -> Vec<String> {
        self.series.iter().map(|s| s.name.clone()).collect()
    }

    pub fn series_index(&self, name: &str) -> Option<usize> {
        self.series.iter().position(|s| s.name == name)
    }

    pub fn legend_patch(&self) -> LegendPatch {
        let series = self
            .series
            .iter()
            .enumerate()
            .map(|(series_index, entry)| SeriesVisibility {
                series_index,
                name: entry.name.clone(),
                visible: entry.visible,
                threshold_markers: entry.threshold_markers.clone(),
            })
            .collect();
        LegendPatch {
            series,
            selected: self.legend_selected.clone(),
        }
    }

    fn segments_for(&self, series_name: &str) -> Option<&[ColorSegment]> {
        let index = self.series_index(series_name)?;
        self.segment_annotations
            .iter()
            .find(|a| a.series_index == index)
            .map(|a| a.segments.as_slice())
    }

    /// Tooltip text for a hovered instant: a time header, then one
    /// `name: value (segment)` line per series with a value.
    pub fn tooltip_text(&self, timestamp_ms: i64, hovered: &[HoveredValue]) -> String {
        let header = DateTime::from_timestamp_millis(timestamp_ms)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| timestamp_ms.to_string());

        let mut lines = vec![header];
        for item in hovered {
            let Some(value) = item.value.filter(|v| v.is_finite()) else {
                continue;
            };
            let rounded = value.round();
            let label = self
                .segments_for(&item.series_name)
                .and_then(|segments| segments.iter().find(|s| s.contains(rounded)))
                .and_then(|s| s.label.as_deref())
                .map(|l| format!(" ({l})"))
                .unwrap_or_default();
            lines.push(format!("{}: {}{}", item.series_name, rounded as i64, label));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_axis_anchored_to_now() {
        let axis = TimeAxis::anchored(10 * MINUTE_MS, 5);

        assert_eq!(axis.near_edge_ms, 10 * MINUTE_MS);
        assert_eq!(axis.far_edge_ms, 5 * MINUTE_MS);
        assert_eq!(axis.span_ms(), 5 * MINUTE_MS);
        assert!(axis.inverted);
        assert!(axis.contains(7 * MINUTE_MS));
        assert!(!axis.contains(4 * MINUTE_MS));
    }
}
