// UI events - JSON messages from the host UI decoded into session commands
use crate::application::session::UiCommand;
use crate::domain::error::ChartError;
use crate::domain::series::{LegendGroup, SeriesDescriptor, SeriesRegistry};
use crate::infrastructure::config::ChartSpec;
use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiEvent {
    ToggleGroup {
        group: String,
    },
    SetGroupVisibility {
        group: String,
        visible: bool,
    },
    SetChannelVisibility {
        channel: String,
        visible: bool,
    },
    ResetLegend,
    SelectWindow {
        chart_id: String,
        minutes: u32,
    },
    ReplaceDescriptors {
        series: Vec<SeriesDescriptor>,
        #[serde(default)]
        legend_groups: Vec<LegendGroup>,
    },
    /// Viewport enter/leave for lazy and virtualized charts.
    SetChartVisibility {
        chart_id: String,
        visible: bool,
    },
    OpenChart(ChartSpec),
    CloseChart {
        chart_id: String,
    },
}

impl UiEvent {
    /// Descriptor sets are validated here, before they reach any chart.
    pub fn into_command(self) -> Result<UiCommand, ChartError> {
        let command = match self {
            UiEvent::ToggleGroup { group } => UiCommand::ToggleGroup(group),
            UiEvent::SetGroupVisibility { group, visible } => {
                UiCommand::SetGroupVisible { group, visible }
            }
            UiEvent::SetChannelVisibility { channel, visible } => {
                UiCommand::SetChannelVisible { channel, visible }
            }
            UiEvent::ResetLegend => UiCommand::ResetLegend,
            UiEvent::SelectWindow { chart_id, minutes } => {
                UiCommand::SelectWindow { chart_id, minutes }
            }
            UiEvent::ReplaceDescriptors {
                series,
                legend_groups,
            } => UiCommand::ReplaceDescriptors(SeriesRegistry::new(series, legend_groups)?),
            UiEvent::SetChartVisibility { chart_id, visible } => {
                UiCommand::SetChartVisible { chart_id, visible }
            }
            UiEvent::OpenChart(spec) => UiCommand::OpenChart(spec),
            UiEvent::CloseChart { chart_id } => UiCommand::CloseChart(chart_id),
        };
        Ok(command)
    }
}

pub fn parse_ui_event(json: &str) -> anyhow::Result<UiCommand> {
    let event: UiEvent = serde_json::from_str(json).context("malformed UI event")?;
    Ok(event.into_command()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::chart_mode::ChartMode;

    #[test]
    fn test_legend_events() {
        assert_eq!(
            parse_ui_event(r#"{"type":"toggle_group","group":"oximeter"}"#).unwrap(),
            UiCommand::ToggleGroup("oximeter".into())
        );
        assert_eq!(
            parse_ui_event(r#"{"type":"set_channel_visibility","channel":"SDNN","visible":false}"#)
                .unwrap(),
            UiCommand::SetChannelVisible {
                channel: "SDNN".into(),
                visible: false
            }
        );
        assert_eq!(
            parse_ui_event(r#"{"type":"reset_legend"}"#).unwrap(),
            UiCommand::ResetLegend
        );
    }

    #[test]
    fn test_chart_events() {
        assert_eq!(
            parse_ui_event(r#"{"type":"select_window","chart_id":"main","minutes":30}"#).unwrap(),
            UiCommand::SelectWindow {
                chart_id: "main".into(),
                minutes: 30
            }
        );

        let command = parse_ui_event(
            r#"{"type":"open_chart","id":"bed-3","mode":"virtualized","channels":["spo2"]}"#,
        )
        .unwrap();
        let UiCommand::OpenChart(spec) = command else {
            panic!("expected open_chart");
        };
        assert_eq!(spec.mode, ChartMode::Virtualized);
        assert_eq!(spec.channels, vec!["spo2".to_string()]);
        assert_eq!(spec.window_minutes, None);
    }

    #[test]
    fn test_replace_descriptors_validated() {
        let command = parse_ui_event(
            r##"{"type":"replace_descriptors","series":[
                {"key":"spo2","display_name":"SpO2","group":"oximeter","color":"#08979c"}
            ]}"##,
        )
        .unwrap();
        let UiCommand::ReplaceDescriptors(registry) = command else {
            panic!("expected replace_descriptors");
        };
        assert_eq!(registry.topology(), vec!["spo2"]);

        let duplicate = parse_ui_event(
            r##"{"type":"replace_descriptors","series":[
                {"key":"spo2","display_name":"SpO2","group":"g","color":"#000"},
                {"key":"spo2","display_name":"SpO2 again","group":"g","color":"#111"}
            ]}"##,
        );
        let error = duplicate.unwrap_err();
        assert_eq!(
            error.downcast_ref::<ChartError>(),
            Some(&ChartError::DuplicateKey("spo2".into()))
        );
    }

    #[test]
    fn test_unknown_event_rejected() {
        assert!(parse_ui_event(r#"{"type":"zoom","start":1}"#).is_err());
        assert!(parse_ui_event("not json").is_err());
    }
}
