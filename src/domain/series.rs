// Series registry - declarative description of every monitored channel
use super::error::ChartError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DisplayMode {
    /// Plotted as a curve and shown in the live readout.
    #[default]
    SeriesAndRealtime,
    /// Live readout only, never plotted.
    RealtimeOnly,
    #[serde(rename = "none")]
    Hidden,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdLine {
    pub value: f64,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

impl ThresholdLine {
    pub fn new(value: f64, label: impl Into<String>) -> Self {
        Self {
            value,
            label: Some(label.into()),
            color: None,
        }
    }
}

/// Numeric range mapped to a colour and label.
///
/// `gte`/`lte` are inclusive bounds, `gt`/`lt` exclusive. When both flavours are
/// given for one side the inclusive one wins. A missing side is open-ended.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ColorSegment {
    #[serde(default)]
    pub gt: Option<f64>,
    #[serde(default)]
    pub gte: Option<f64>,
    #[serde(default)]
    pub lt: Option<f64>,
    #[serde(default)]
    pub lte: Option<f64>,
    pub color: String,
    #[serde(default)]
    pub label: Option<String>,
}

impl ColorSegment {
    pub fn labelled(color: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            color: color.into(),
            label: Some(label.into()),
            ..Self::default()
        }
    }

    pub fn gt(mut self, bound: f64) -> Self {
        self.gt = Some(bound);
        self
    }

    pub fn gte(mut self, bound: f64) -> Self {
        self.gte = Some(bound);
        self
    }

    pub fn lt(mut self, bound: f64) -> Self {
        self.lt = Some(bound);
        self
    }

    pub fn lte(mut self, bound: f64) -> Self {
        self.lte = Some(bound);
        self
    }

    /// Lower bound and whether it is inclusive.
    pub fn lower(&self) -> Option<(f64, bool)> {
        self.gte.map(|v| (v, true)).or(self.gt.map(|v| (v, false)))
    }

    /// Upper bound and whether it is inclusive.
    pub fn upper(&self) -> Option<(f64, bool)> {
        self.lte.map(|v| (v, true)).or(self.lt.map(|v| (v, false)))
    }

    pub fn contains(&self, value: f64) -> bool {
        let lower_ok = match self.lower() {
            Some((bound, true)) => value >= bound,
            Some((bound, false)) => value > bound,
            None => true,
        };
        let upper_ok = match self.upper() {
            Some((bound, true)) => value <= bound,
            Some((bound, false)) => value < bound,
            None => true,
        };
        lower_ok && upper_ok
    }

    fn is_empty_range(&self) -> bool {
        let bounds = [self.gt, self.gte, self.lt, self.lte];
        if bounds.iter().flatten().any(|b| !b.is_finite()) {
            return true;
        }
        match (self.lower(), self.upper()) {
            (Some((lo, lo_inc)), Some((hi, hi_inc))) => lo > hi || (lo == hi && !(lo_inc && hi_inc)),
            _ => false,
        }
    }
}

/// Whether `next` starts strictly after `prev` ends.
fn segments_ordered(prev: &ColorSegment, next: &ColorSegment) -> bool {
    match (prev.upper(), next.lower()) {
        (Some((end, end_inc)), Some((start, start_inc))) => {
            end < start || (end == start && !(end_inc && start_inc))
        }
        _ => false,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesDescriptor {
    pub key: String,
    pub display_name: String,
    pub group: String,
    pub color: String,
    #[serde(default)]
    pub display_mode: DisplayMode,
    #[serde(default)]
    pub high_density: bool,
    #[serde(default)]
    pub threshold_lines: Vec<ThresholdLine>,
    #[serde(default)]
    pub normal_band_color: Option<String>,
    #[serde(default)]
    pub color_segments: Vec<ColorSegment>,
}

impl SeriesDescriptor {
    pub fn new(
        key: impl Into<String>,
        display_name: impl Into<String>,
        group: impl Into<String>,
        color: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            display_name: display_name.into(),
            group: group.into(),
            color: color.into(),
            display_mode: DisplayMode::SeriesAndRealtime,
            high_density: false,
            threshold_lines: Vec::new(),
            normal_band_color: None,
            color_segments: Vec::new(),
        }
    }

    pub fn high_density(mut self) -> Self {
        self.high_density = true;
        self
    }

    pub fn display_mode(mut self, mode: DisplayMode) -> Self {
        self.display_mode = mode;
        self
    }

    pub fn threshold(mut self, line: ThresholdLine) -> Self {
        self.threshold_lines.push(line);
        self
    }

    pub fn normal_band(mut self, color: impl Into<String>) -> Self {
        self.normal_band_color = Some(color.into());
        self
    }

    pub fn segment(mut self, segment: ColorSegment) -> Self {
        self.color_segments.push(segment);
        self
    }

    /// Present in the chart's series list (everything except `Hidden`).
    pub fn is_charted(&self) -> bool {
        self.display_mode != DisplayMode::Hidden
    }

    /// Receives live points through the appender.
    pub fn is_plotted(&self) -> bool {
        self.display_mode == DisplayMode::SeriesAndRealtime
    }

    /// `[min, max]` of the threshold values when a normal band is declared.
    pub fn normal_band_range(&self) -> Option<(f64, f64)> {
        if self.normal_band_color.is_none() || self.threshold_lines.len() < 2 {
            return None;
        }
        let values = self.threshold_lines.iter().map(|t| t.value);
        let min = values.clone().fold(f64::INFINITY, f64::min);
        let max = values.fold(f64::NEG_INFINITY, f64::max);
        Some((min, max))
    }

    /// First colour segment containing `value`.
    pub fn segment_for(&self, value: f64) -> Option<&ColorSegment> {
        self.color_segments.iter().find(|s| s.contains(value))
    }

    pub fn validate(&self) -> Result<(), ChartError> {
        if self.key.trim().is_empty() {
            return Err(ChartError::EmptyKey);
        }
        if self.threshold_lines.iter().any(|t| !t.value.is_finite()) {
            return Err(ChartError::InvalidThreshold {
                key: self.key.clone(),
            });
        }
        if self.normal_band_color.is_some() && self.threshold_lines.len() < 2 {
            return Err(ChartError::NormalBandRequiresThresholds {
                key: self.key.clone(),
                count: self.threshold_lines.len(),
            });
        }
        for (index, segment) in self.color_segments.iter().enumerate() {
            if segment.is_empty_range() {
                return Err(ChartError::InvalidSegment {
                    key: self.key.clone(),
                    index,
                });
            }
        }
        for (index, pair) in self.color_segments.windows(2).enumerate() {
            if !segments_ordered(&pair[0], &pair[1]) {
                return Err(ChartError::OverlappingSegments {
                    key: self.key.clone(),
                    first: index,
                    second: index + 1,
                });
            }
        }
        Ok(())
    }
}

/// Named cluster of channels toggled together in the legend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegendGroup {
    pub key: String,
    pub name: String,
    /// Channel display names belonging to the group.
    #[serde(default)]
    pub items: Vec<String>,
    #[serde(default = "default_true")]
    pub default_visible: bool,
}

fn default_true() -> bool {
    true
}

/// Partial per-key override applied on top of a registry.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SeriesOverride {
    pub key: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub display_mode: Option<DisplayMode>,
    #[serde(default)]
    pub high_density: Option<bool>,
    #[serde(default)]
    pub threshold_lines: Option<Vec<ThresholdLine>>,
    #[serde(default)]
    pub normal_band_color: Option<String>,
    #[serde(default)]
    pub color_segments: Option<Vec<ColorSegment>>,
}

/// Validated, immutable set of series descriptors plus legend groups.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesRegistry {
    descriptors: Vec<SeriesDescriptor>,
    groups: Vec<LegendGroup>,
}

impl SeriesRegistry {
    pub fn new(
        descriptors: Vec<SeriesDescriptor>,
        groups: Vec<LegendGroup>,
    ) -> Result<Self, ChartError> {
        validate_descriptors(&descriptors)?;
        Ok(Self {
            descriptors,
            groups,
        })
    }

    pub fn descriptors(&self) -> &[SeriesDescriptor] {
        &self.descriptors
    }

    pub fn groups(&self) -> &[LegendGroup] {
        &self.groups
    }

    pub fn group(&self, key: &str) -> Option<&LegendGroup> {
        self.groups.iter().find(|g| g.key == key)
    }

    pub fn by_key(&self, key: &str) -> Option<&SeriesDescriptor> {
        self.descriptors.iter().find(|d| d.key == key)
    }

    pub fn by_display_name(&self, name: &str) -> Option<&SeriesDescriptor> {
        self.descriptors.iter().find(|d| d.display_name == name)
    }

    pub fn high_density(&self) -> Vec<&SeriesDescriptor> {
        self.descriptors.iter().filter(|d| d.high_density).collect()
    }

    pub fn low_density(&self) -> Vec<&SeriesDescriptor> {
        self.descriptors.iter().filter(|d| !d.high_density).collect()
    }

    /// key -> display name
    pub fn field_mapping(&self) -> BTreeMap<String, String> {
        self.descriptors
            .iter()
            .map(|d| (d.key.clone(), d.display_name.clone()))
            .collect()
    }

    /// display name -> key
    pub fn reverse_field_mapping(&self) -> BTreeMap<String, String> {
        self.descriptors
            .iter()
            .map(|d| (d.display_name.clone(), d.key.clone()))
            .collect()
    }

    /// Ordered channel keys. Two registries with different topologies need a
    /// chart reinitialisation.
    pub fn topology(&self) -> Vec<&str> {
        self.descriptors.iter().map(|d| d.key.as_str()).collect()
    }

    /// Registry restricted to the given keys, in registry order.
    pub fn subset(&self, keys: &[String]) -> Result<Self, ChartError> {
        let descriptors = self
            .descriptors
            .iter()
            .filter(|d| keys.contains(&d.key))
            .cloned()
            .collect();
        Self::new(descriptors, self.groups.clone())
    }

    pub fn with_overrides(&self, overrides: &[SeriesOverride]) -> Result<Self, ChartError> {
        let descriptors = self
            .descriptors
            .iter()
            .map(|descriptor| {
                let mut merged = descriptor.clone();
                if let Some(o) = overrides.iter().find(|o| o.key == descriptor.key) {
                    if let Some(color) = &o.color {
                        merged.color = color.clone();
                    }
                    if let Some(mode) = o.display_mode {
                        merged.display_mode = mode;
                    }
                    if let Some(high_density) = o.high_density {
                        merged.high_density = high_density;
                    }
                    if let Some(lines) = &o.threshold_lines {
                        merged.threshold_lines = lines.clone();
                    }
                    if let Some(band) = &o.normal_band_color {
                        merged.normal_band_color = Some(band.clone());
                    }
                    if let Some(segments) = &o.color_segments {
                        merged.color_segments = segments.clone();
                    }
                }
                merged
            })
            .collect();
        Self::new(descriptors, self.groups.clone())
    }

    /// Built-in vitals registry used when no configuration is supplied.
    pub fn default_vitals() -> Self {
        let descriptors = vec![
            SeriesDescriptor::new("heartRate", "Heart Rate", "basicVitals", "#ff4d4f")
                .high_density()
                .threshold(ThresholdLine::new(60.0, "Lower limit"))
                .threshold(ThresholdLine::new(100.0, "Upper limit"))
                .normal_band("rgba(82, 196, 26, 0.08)")
                .segment(ColorSegment::labelled("#faad14", "low").lt(60.0))
                .segment(ColorSegment::labelled("#52c41a", "normal").gte(60.0).lte(100.0))
                .segment(ColorSegment::labelled("#ff4d4f", "high").gt(100.0)),
            SeriesDescriptor::new("breathRate", "Breath Rate", "basicVitals", "#1890ff")
                .high_density()
                .threshold(ThresholdLine::new(6.0, "Lower limit"))
                .threshold(ThresholdLine::new(30.0, "Upper limit")),
            SeriesDescriptor::new("distance", "Distance", "basicVitals", "#722ed1").high_density(),
            SeriesDescriptor::new("sdnn", "SDNN", "vitalAnalysis", "#fa8c16"),
            SeriesDescriptor::new("rmssd", "RMSSD", "vitalAnalysis", "#13c2c2"),
            SeriesDescriptor::new("sleepQuality", "Sleep Quality", "sleepMonitoring", "#eb2f96"),
            SeriesDescriptor::new("braceletHeartRate", "Bracelet Heart Rate", "bracelet", "#a0d911"),
            SeriesDescriptor::new("bloodOxygen", "Bracelet SpO2", "bracelet", "#2f54eb")
                .display_mode(DisplayMode::RealtimeOnly),
            SeriesDescriptor::new("spo2", "SpO2", "oximeter", "#08979c")
                .high_density()
                .threshold(ThresholdLine::new(95.0, "Lower limit")),
            SeriesDescriptor::new("oximeterHeartRate", "Oximeter Heart Rate", "oximeter", "#d4380d")
                .high_density(),
        ];
        let groups = vec![
            group("basicVitals", "Basic vitals", &["Heart Rate", "Breath Rate", "Distance"], true),
            group("vitalAnalysis", "Vital analysis", &["SDNN", "RMSSD"], true),
            group("sleepMonitoring", "Sleep monitoring", &["Sleep Quality"], false),
            group("bracelet", "Bracelet", &["Bracelet Heart Rate", "Bracelet SpO2"], true),
            group("oximeter", "Oximeter", &["SpO2", "Oximeter Heart Rate"], true),
        ];
        Self {
            descriptors,
            groups,
        }
    }
}

fn group(key: &str, name: &str, items: &[&str], default_visible: bool) -> LegendGroup {
    LegendGroup {
        key: key.to_string(),
        name: name.to_string(),
        items: items.iter().map(|s| s.to_string()).collect(),
        default_visible,
    }
}

/// Checks every descriptor plus key/display-name uniqueness.
pub fn validate_descriptors(descriptors: &[SeriesDescriptor]) -> Result<(), ChartError> {
    let mut keys = HashSet::new();
    let mut names = HashSet::new();
    for descriptor in descriptors {
        descriptor.validate()?;
        if !keys.insert(descriptor.key.as_str()) {
            return Err(ChartError::DuplicateKey(descriptor.key.clone()));
        }
        if !names.insert(descriptor.display_name.as_str()) {
            return Err(ChartError::DuplicateDisplayName(
                descriptor.display_name.clone(),
            ));
        }
    }
    Ok(())
}
