// Option builder - pure derivation of a chart configuration from descriptors and legend state
use crate::domain::chart::{
    ChartConfiguration, NormalBand, RenderHints, SegmentAnnotation, SeriesEntry, ThresholdMarker,
    TimeAxis, ValueAxis,
};
use crate::domain::error::ChartError;
use crate::domain::legend::LegendState;
use crate::domain::series::{validate_descriptors, SeriesDescriptor};
use std::collections::BTreeMap;

const DEFAULT_THRESHOLD_COLOR: &str = "#ff4d4f";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildOptions {
    pub window_minutes: u32,
    /// Anchor for the time axis; the axis is not frozen and callers re-derive it.
    pub now_ms: i64,
    pub incremental_update: bool,
    pub max_points_per_series: usize,
}

/// Builds a configuration with every series' data empty. Descriptors are
/// validated first so a broken set fails here rather than rendering oddly.
pub fn build_configuration(
    descriptors: &[SeriesDescriptor],
    legend: &LegendState,
    options: &BuildOptions,
) -> Result<ChartConfiguration, ChartError> {
    validate_descriptors(descriptors)?;
    if options.window_minutes == 0 {
        return Err(ChartError::ZeroWindow);
    }

    let mut series = Vec::new();
    let mut segment_annotations = Vec::new();
    let mut legend_selected = BTreeMap::new();

    for descriptor in descriptors.iter().filter(|d| d.is_charted()) {
        let visible = legend.is_channel_visible(&descriptor.display_name);
        legend_selected.insert(descriptor.display_name.clone(), visible);

        let threshold_markers = if visible {
            threshold_markers(descriptor)
        } else {
            Vec::new()
        };
        let normal_band = descriptor
            .normal_band_range()
            .zip(descriptor.normal_band_color.clone())
            .map(|((lower, upper), color)| NormalBand {
                lower,
                upper,
                color,
            });

        if !descriptor.color_segments.is_empty() {
            segment_annotations.push(SegmentAnnotation {
                series_index: series.len(),
                segments: descriptor.color_segments.clone(),
            });
        }

        series.push(SeriesEntry {
            key: descriptor.key.clone(),
            name: descriptor.display_name.clone(),
            color: descriptor.color.clone(),
            visible,
            data: Vec::new(),
            threshold_markers,
            normal_band,
            hints: RenderHints::for_density(descriptor.high_density),
        });
    }

    Ok(ChartConfiguration {
        series,
        time_axis: TimeAxis::anchored(options.now_ms, options.window_minutes),
        value_axis: ValueAxis::default(),
        legend_selected,
        segment_annotations,
        animation: !options.incremental_update,
        max_points_per_series: options.max_points_per_series,
    })
}

fn threshold_markers(descriptor: &SeriesDescriptor) -> Vec<ThresholdMarker> {
    descriptor
        .threshold_lines
        .iter()
        .map(|line| ThresholdMarker {
            value: line.value,
            label: line.label.clone(),
            color: line
                .color
                .clone()
                .unwrap_or_else(|| DEFAULT_THRESHOLD_COLOR.to_string()),
        })
        .collect()
}
