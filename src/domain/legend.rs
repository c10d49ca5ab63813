// Legend visibility state - group and per-channel toggles
use super::error::ChartError;
use super::series::SeriesRegistry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Group visibility (group key -> visible) and channel visibility
/// (display name -> visible). Both maps are persisted and restorable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LegendState {
    #[serde(default)]
    groups: BTreeMap<String, bool>,
    #[serde(default)]
    channels: BTreeMap<String, bool>,
}

impl LegendState {
    /// Defaults for the registry, overlaid with whatever was saved.
    pub fn restore(registry: &SeriesRegistry, saved: Option<&LegendState>) -> Self {
        let mut state = Self::defaults(registry);
        if let Some(saved) = saved {
            for (group, visible) in &saved.groups {
                state.groups.insert(group.clone(), *visible);
            }
            for (channel, visible) in &saved.channels {
                state.channels.insert(channel.clone(), *visible);
            }
        }
        state
    }

    /// Groups at their declared default; channels follow the group that lists
    /// them, or are visible when no group does.
    pub fn defaults(registry: &SeriesRegistry) -> Self {
        let groups = registry
            .groups()
            .iter()
            .map(|g| (g.key.clone(), g.default_visible))
            .collect();
        let channels = registry
            .descriptors()
            .iter()
            .map(|d| {
                let visible = registry
                    .groups()
                    .iter()
                    .find(|g| g.items.contains(&d.display_name))
                    .is_none_or(|g| g.default_visible);
                (d.display_name.clone(), visible)
            })
            .collect();
        Self { groups, channels }
    }

    /// Every channel visible, no groups. Used by charts without a legend.
    pub fn all_visible(registry: &SeriesRegistry) -> Self {
        Self {
            groups: BTreeMap::new(),
            channels: registry
                .descriptors()
                .iter()
                .map(|d| (d.display_name.clone(), true))
                .collect(),
        }
    }

    pub fn groups(&self) -> &BTreeMap<String, bool> {
        &self.groups
    }

    pub fn channels(&self) -> &BTreeMap<String, bool> {
        &self.channels
    }

    pub fn is_group_visible(&self, group_key: &str) -> bool {
        self.groups.get(group_key).copied().unwrap_or(true)
    }

    /// Channels never mentioned are visible.
    pub fn is_channel_visible(&self, display_name: &str) -> bool {
        self.channels.get(display_name).copied().unwrap_or(true)
    }

    /// Records the group's visibility and overwrites every item of the group.
    pub fn set_group_visible(
        &mut self,
        registry: &SeriesRegistry,
        group_key: &str,
        visible: bool,
    ) -> Result<(), ChartError> {
        let group = registry
            .group(group_key)
            .ok_or_else(|| ChartError::UnknownGroup(group_key.to_string()))?;
        self.groups.insert(group.key.clone(), visible);
        for item in &group.items {
            self.channels.insert(item.clone(), visible);
        }
        Ok(())
    }

    /// Flips a group and returns its new visibility.
    pub fn toggle_group(
        &mut self,
        registry: &SeriesRegistry,
        group_key: &str,
    ) -> Result<bool, ChartError> {
        let visible = !self.is_group_visible(group_key);
        self.set_group_visible(registry, group_key, visible)?;
        Ok(visible)
    }

    /// Does not touch the recorded group visibility.
    pub fn set_channel_visible(&mut self, display_name: &str, visible: bool) {
        self.channels.insert(display_name.to_string(), visible);
    }

    pub fn update_channels(&mut self, updates: &BTreeMap<String, bool>) {
        for (name, visible) in updates {
            self.channels.insert(name.clone(), *visible);
        }
    }

    pub fn reset(&mut self, registry: &SeriesRegistry) {
        *self = Self::defaults(registry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_toggle_overwrites_items_only() {
        let registry = SeriesRegistry::default_vitals();
        let mut legend = LegendState::defaults(&registry);
        legend.set_channel_visible("Heart Rate", false);

        legend
            .set_group_visible(&registry, "basicVitals", false)
            .unwrap();

        for item in ["Heart Rate", "Breath Rate", "Distance"] {
            assert!(!legend.is_channel_visible(item), "{item} should be hidden");
        }
        assert!(legend.is_channel_visible("SDNN"));
        assert!(legend.is_channel_visible("SpO2"));
        assert!(!legend.is_group_visible("basicVitals"));

        legend.set_group_visible(&registry, "basicVitals", true).unwrap();
        assert!(legend.is_channel_visible("Heart Rate"));
    }

    #[test]
    fn test_channel_toggle_keeps_group_state() {
        let registry = SeriesRegistry::default_vitals();
        let mut legend = LegendState::defaults(&registry);

        legend.set_channel_visible("SDNN", false);

        assert!(legend.is_group_visible("vitalAnalysis"));
        assert!(!legend.is_channel_visible("SDNN"));
        assert!(legend.is_channel_visible("RMSSD"));
    }

    #[test]
    fn test_toggle_group_flips_and_reports() {
        let registry = SeriesRegistry::default_vitals();
        let mut legend = LegendState::defaults(&registry);

        assert!(!legend.is_group_visible("sleepMonitoring"));
        assert_eq!(legend.toggle_group(&registry, "sleepMonitoring"), Ok(true));
        assert!(legend.is_channel_visible("Sleep Quality"));
        assert_eq!(
            legend.toggle_group(&registry, "nope"),
            Err(ChartError::UnknownGroup("nope".into()))
        );
    }

    #[test]
    fn test_restore_overlays_saved_state() {
        let registry = SeriesRegistry::default_vitals();
        let mut saved = LegendState::default();
        saved.set_channel_visible("Distance", false);
        saved.groups.insert("sleepMonitoring".into(), true);

        let legend = LegendState::restore(&registry, Some(&saved));

        assert!(!legend.is_channel_visible("Distance"));
        assert!(legend.is_channel_visible("Heart Rate"));
        assert!(legend.is_group_visible("sleepMonitoring"));
        assert!(legend.is_group_visible("basicVitals"));
    }

    #[test]
    fn test_reset_restores_defaults() {
        let registry = SeriesRegistry::default_vitals();
        let mut legend = LegendState::defaults(&registry);
        legend.set_group_visible(&registry, "oximeter", false).unwrap();

        legend.reset(&registry);

        assert_eq!(legend, LegendState::defaults(&registry));
    }
}
