// Configuration loading - pipeline settings from file and environment
use crate::application::appender::AppenderSettings;
use crate::application::chart_mode::{ChartMode, PerformanceProfile};
use crate::application::decimator::{DecimationStrategy, Decimator};
use crate::application::lifecycle::{ControllerSettings, DEFAULT_WINDOWS};
use crate::application::scheduler::SchedulerSettings;
use crate::domain::error::ChartError;
use crate::domain::series::{LegendGroup, SeriesDescriptor, SeriesOverride, SeriesRegistry};
use serde::Deserialize;
use tokio::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PipelineConfig {
    /// Channel descriptors. Empty means the built-in vitals registry.
    #[serde(default)]
    pub series: Vec<SeriesDescriptor>,
    #[serde(default)]
    pub legend_groups: Vec<LegendGroup>,
    #[serde(default)]
    pub overrides: Vec<SeriesOverride>,
    #[serde(default)]
    pub performance: PerformanceConfig,
    #[serde(default)]
    pub charts: Vec<ChartSpec>,
    /// Where legend visibility is persisted. No persistence when unset.
    #[serde(default)]
    pub legend_path: Option<String>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct PerformanceConfig {
    pub enable_batching: bool,
    pub appender_batch_size: usize,
    pub slide_interval_ms: u64,
    pub history_capacity: usize,
    pub max_pending: usize,
    pub window_minutes: u32,
    pub allowed_windows: Vec<u32>,
    pub incremental_update: bool,
    // Unset values come from the chart mode's performance profile.
    pub throttle_ms: Option<u64>,
    pub scheduler_batch_size: Option<usize>,
    pub decimation_max_points: Option<usize>,
    pub decimation_strategy: Option<DecimationStrategy>,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            enable_batching: true,
            appender_batch_size: 100,
            slide_interval_ms: 1_000,
            history_capacity: 36_000,
            max_pending: 10_000,
            window_minutes: 10,
            allowed_windows: DEFAULT_WINDOWS.to_vec(),
            incremental_update: true,
            throttle_ms: None,
            scheduler_batch_size: None,
            decimation_max_points: None,
            decimation_strategy: None,
        }
    }
}

/// One chart instance to open at start-up.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ChartSpec {
    pub id: String,
    #[serde(default)]
    pub mode: ChartMode,
    /// Channel keys shown by this chart. Empty means every channel.
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub window_minutes: Option<u32>,
}

impl ChartSpec {
    pub fn new(id: impl Into<String>, mode: ChartMode) -> Self {
        Self {
            id: id.into(),
            mode,
            channels: Vec::new(),
            window_minutes: None,
        }
    }
}

impl PipelineConfig {
    /// Configured registry with overrides applied, or the built-in vitals set.
    pub fn registry(&self) -> Result<SeriesRegistry, ChartError> {
        let base = if self.series.is_empty() {
            SeriesRegistry::default_vitals()
        } else {
            SeriesRegistry::new(self.series.clone(), self.legend_groups.clone())?
        };
        if self.overrides.is_empty() {
            return Ok(base);
        }
        base.with_overrides(&self.overrides)
    }

    /// Rejects window settings a chart could never use and broken descriptors.
    pub fn validate(&self) -> Result<(), ChartError> {
        self.performance.validate()?;
        for window_minutes in self.charts.iter().filter_map(|c| c.window_minutes) {
            self.performance.check_window(window_minutes)?;
        }
        self.registry().map(|_| ())
    }

    /// Configured charts, or one interactive chart when none are listed.
    pub fn chart_specs(&self) -> Vec<ChartSpec> {
        if self.charts.is_empty() {
            vec![ChartSpec::new("main", ChartMode::Single)]
        } else {
            self.charts.clone()
        }
    }
}

impl PerformanceConfig {
    pub fn validate(&self) -> Result<(), ChartError> {
        if self.allowed_windows.is_empty() {
            return Err(ChartError::NoAllowedWindows);
        }
        if self.allowed_windows.contains(&0) {
            return Err(ChartError::ZeroWindow);
        }
        self.check_window(self.window_minutes)
    }

    pub fn check_window(&self, window_minutes: u32) -> Result<(), ChartError> {
        if window_minutes == 0 {
            return Err(ChartError::ZeroWindow);
        }
        if !self.allowed_windows.contains(&window_minutes) {
            return Err(ChartError::WindowNotAllowed {
                minutes: window_minutes,
                allowed: self.allowed_windows.clone(),
            });
        }
        Ok(())
    }

    pub fn controller_base(&self) -> ControllerSettings {
        ControllerSettings {
            appender: AppenderSettings {
                max_batch_size: self.appender_batch_size,
                high_frequency_mode: false,
            },
            slide_interval: Duration::from_millis(self.slide_interval_ms),
            window_minutes: self.window_minutes,
            allowed_windows: self.allowed_windows.clone(),
            incremental_update: self.incremental_update,
            max_pending: self.max_pending,
            ..ControllerSettings::default()
        }
    }

    pub fn scheduler_settings(&self, profile: &PerformanceProfile) -> SchedulerSettings {
        let mut settings = profile.scheduler_settings(self.enable_batching);
        if let Some(throttle_ms) = self.throttle_ms {
            settings.throttle = Duration::from_millis(throttle_ms);
        }
        if let Some(batch_size) = self.scheduler_batch_size {
            settings.max_batch_size = batch_size;
        }
        settings
    }

    /// Explicit decimation settings, if any were configured.
    pub fn decimator(&self, profile: &PerformanceProfile) -> Result<Option<Decimator>, ChartError> {
        if self.decimation_max_points.is_none() && self.decimation_strategy.is_none() {
            return Ok(None);
        }
        let decimator = Decimator::new(
            self.decimation_max_points
                .unwrap_or(profile.decimation_max_points),
            self.decimation_strategy
                .unwrap_or(profile.decimation_strategy),
        )?;
        Ok(Some(decimator))
    }
}

pub fn load_pipeline_config() -> anyhow::Result<PipelineConfig> {
    load_pipeline_config_from("config/pipeline")
}

/// Optional file at `path` (any format the `config` crate detects) layered
/// under `VITALS__`-prefixed environment variables.
pub fn load_pipeline_config_from(path: &str) -> anyhow::Result<PipelineConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name(path).required(false))
        .add_source(
            config::Environment::with_prefix("VITALS")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let config: PipelineConfig = settings.try_deserialize()?;
    config.validate()?;
    Ok(config)
}
