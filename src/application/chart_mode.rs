// Chart modes - one strategy per chart variant over the shared pipeline core
use crate::application::appender::AppenderSettings;
use crate::application::decimator::{DecimationStrategy, Decimator};
use crate::application::history::{HistoryMark, SampleHistory};
use crate::application::lifecycle::{ChartController, ChartPhase, ControllerSettings, ControllerStats};
use crate::application::renderer::ChartRenderer;
use crate::application::scheduler::SchedulerSettings;
use crate::domain::error::ChartError;
use serde::{Deserialize, Serialize};
use tokio::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartMode {
    /// One large interactive chart: legend and window selection enabled.
    #[default]
    Single,
    /// One of several small charts: fixed window, every channel visible.
    Multi,
    /// Mounted on first visibility, then kept.
    Lazy,
    /// Mounted only while visible.
    Virtualized,
}

impl ChartMode {
    pub fn is_interactive(self) -> bool {
        self == ChartMode::Single
    }

    pub fn mounts_eagerly(self) -> bool {
        matches!(self, ChartMode::Single | ChartMode::Multi)
    }
}

/// Tuning derived from the chart mode and how many charts share the screen.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceProfile {
    pub max_points: usize,
    pub throttle_ms: u64,
    pub batch_size: usize,
    pub decimation_max_points: usize,
    pub decimation_strategy: DecimationStrategy,
    pub window_minutes: u32,
    pub high_frequency_mode: bool,
}

impl PerformanceProfile {
    pub fn for_mode(mode: ChartMode, chart_count: usize) -> Self {
        if mode == ChartMode::Single {
            return Self {
                max_points: 36_000,
                throttle_ms: 20,
                batch_size: 100,
                decimation_max_points: 36_000,
                decimation_strategy: DecimationStrategy::Lttb,
                window_minutes: 60,
                high_frequency_mode: true,
            };
        }
        match chart_count {
            n if n > 8 => Self {
                max_points: 200,
                throttle_ms: 200,
                batch_size: 25,
                decimation_max_points: 100,
                decimation_strategy: DecimationStrategy::Lttb,
                window_minutes: 30,
                high_frequency_mode: false,
            },
            n if n > 4 => Self {
                max_points: 500,
                throttle_ms: 100,
                batch_size: 50,
                decimation_max_points: 200,
                decimation_strategy: DecimationStrategy::Bucket,
                window_minutes: 60,
                high_frequency_mode: false,
            },
            _ => Self {
                max_points: 1_000,
                throttle_ms: 100,
                batch_size: 50,
                decimation_max_points: 500,
                decimation_strategy: DecimationStrategy::Stride,
                window_minutes: 120,
                high_frequency_mode: false,
            },
        }
    }

    pub fn scheduler_settings(&self, enable_batching: bool) -> SchedulerSettings {
        SchedulerSettings {
            enable_batching,
            max_batch_size: self.batch_size,
            throttle: Duration::from_millis(self.throttle_ms),
        }
    }

    /// Controller settings with this profile's limits applied over `base`.
    /// Only interactive charts keep the caller's window.
    pub fn controller_settings(
        &self,
        mode: ChartMode,
        base: &ControllerSettings,
    ) -> Result<ControllerSettings, ChartError> {
        let mut allowed_windows = base.allowed_windows.clone();
        let window_minutes =
            if mode.is_interactive() && allowed_windows.contains(&base.window_minutes) {
                base.window_minutes
            } else {
                self.window_minutes
            };
        if !allowed_windows.contains(&window_minutes) {
            allowed_windows.push(window_minutes);
        }
        Ok(ControllerSettings {
            appender: AppenderSettings {
                max_batch_size: base.appender.max_batch_size,
                high_frequency_mode: self.high_frequency_mode,
            },
            window_minutes,
            allowed_windows,
            decimator: Decimator::new(self.decimation_max_points, self.decimation_strategy)?,
            max_points_per_series: self.max_points,
            ..base.clone()
        })
    }
}

pub type RendererFactory = Box<dyn FnMut(&str) -> Box<dyn ChartRenderer>>;

/// A chart controller plus the mounting policy of its mode.
pub struct ChartSlot {
    mode: ChartMode,
    controller: ChartController,
    visible: bool,
    factory: RendererFactory,
}

impl ChartSlot {
    pub fn new(mode: ChartMode, controller: ChartController, factory: RendererFactory) -> Self {
        Self {
            mode,
            controller,
            visible: mode.mounts_eagerly(),
            factory,
        }
    }

    pub fn id(&self) -> &str {
        self.controller.id()
    }

    pub fn mode(&self) -> ChartMode {
        self.mode
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn controller(&self) -> &ChartController {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut ChartController {
        &mut self.controller
    }

    /// Whether the controller currently accepts data.
    pub fn is_live(&self) -> bool {
        !matches!(
            self.controller.phase(),
            ChartPhase::Uninitialized | ChartPhase::Disposed
        )
    }

    /// Called once when the slot is opened.
    pub fn open(&mut self, history: &SampleHistory, now: Instant) {
        if self.mode.mounts_eagerly() {
            self.mount(history, now);
        }
    }

    fn mount(&mut self, history: &SampleHistory, now: Instant) {
        self.controller.mount(now);
        self.controller.seed_history(history);
    }

    pub fn set_visible(&mut self, visible: bool, history: &SampleHistory, now: Instant) {
        let was_visible = self.visible;
        self.visible = visible;
        match self.mode {
            ChartMode::Single | ChartMode::Multi => {}
            ChartMode::Lazy => {
                if visible && self.controller.phase() == ChartPhase::Uninitialized {
                    tracing::debug!("Lazy chart {} mounting on first view", self.id());
                    self.mount(history, now);
                }
            }
            ChartMode::Virtualized => match (was_visible, visible) {
                (false, true) => {
                    if self.controller.is_disposed() {
                        let renderer = (self.factory)(self.controller.id());
                        self.controller = self.controller.rebuild(renderer);
                    }
                    tracing::debug!("Virtualized chart {} entering viewport", self.id());
                    self.mount(history, now);
                }
                (true, false) => {
                    tracing::debug!("Virtualized chart {} leaving viewport", self.id());
                    self.controller.dispose();
                }
                _ => {}
            },
        }
    }

    pub fn on_feed(&mut self, mark: HistoryMark, history: &SampleHistory, now: Instant) {
        if self.is_live() {
            self.controller.on_feed(mark, history, now);
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.controller.next_deadline()
    }

    pub fn on_timer(&mut self, now: Instant) {
        self.controller.on_timer(now);
    }

    pub fn close(&mut self) {
        self.controller.dispose();
    }

    pub fn stats(&self) -> ControllerStats {
        self.controller.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::clock::ManualClock;
    use crate::domain::legend::LegendState;
    use crate::domain::series::SeriesRegistry;
    use crate::domain::telemetry::Sample;
    use crate::infrastructure::memory_renderer::InMemoryRenderer;
    use std::cell::RefCell;
    use std::rc::Rc;

    const NOW_MS: i64 = 10_000_000;

    fn slot(mode: ChartMode) -> (ChartSlot, Rc<RefCell<Vec<InMemoryRenderer>>>) {
        let renderers: Rc<RefCell<Vec<InMemoryRenderer>>> = Rc::default();
        let first = InMemoryRenderer::new("chart-0");
        renderers.borrow_mut().push(first.clone());
        let registry = SeriesRegistry::default_vitals();
        let controller = ChartController::new(
            "chart",
            Box::new(first),
            registry.clone(),
            LegendState::all_visible(&registry),
            ControllerSettings::default(),
            Rc::new(ManualClock::new(NOW_MS)),
        );
        let created = Rc::clone(&renderers);
        let factory: RendererFactory = Box::new(move |id: &str| -> Box<dyn ChartRenderer> {
            let renderer = InMemoryRenderer::new(id);
            created.borrow_mut().push(renderer.clone());
            Box::new(renderer)
        });
        (ChartSlot::new(mode, controller, factory), renderers)
    }

    fn history() -> SampleHistory {
        let mut history = SampleHistory::new(100);
        for i in 0..10 {
            history.push(Sample::new(NOW_MS - 1_000 + i).with("heartRate", 70.0));
        }
        history
    }

    #[test]
    fn test_profile_tiers() {
        let single = PerformanceProfile::for_mode(ChartMode::Single, 1);
        assert_eq!(
            (single.max_points, single.throttle_ms, single.batch_size),
            (36_000, 20, 100)
        );
        assert_eq!(single.decimation_strategy, DecimationStrategy::Lttb);

        let crowded = PerformanceProfile::for_mode(ChartMode::Multi, 9);
        assert_eq!((crowded.max_points, crowded.throttle_ms, crowded.batch_size), (200, 200, 25));
        assert_eq!(crowded.window_minutes, 30);

        let medium = PerformanceProfile::for_mode(ChartMode::Virtualized, 5);
        assert_eq!(medium.decimation_strategy, DecimationStrategy::Bucket);
        assert_eq!(medium.decimation_max_points, 200);

        let few = PerformanceProfile::for_mode(ChartMode::Lazy, 4);
        assert_eq!((few.max_points, few.window_minutes), (1_000, 120));
    }

    #[test]
    fn test_profile_overrides_controller_settings() {
        let profile = PerformanceProfile::for_mode(ChartMode::Multi, 2);
        let base = ControllerSettings {
            window_minutes: 45,
            ..ControllerSettings::default()
        };

        let settings = profile.controller_settings(ChartMode::Multi, &base).unwrap();

        assert_eq!(settings.window_minutes, 120);
        assert!(settings.allowed_windows.contains(&120));
        assert_eq!(settings.decimator.max_points(), 500);
        assert_eq!(settings.max_points_per_series, 1_000);
        assert!(!settings.appender.high_frequency_mode);

        let single = PerformanceProfile::for_mode(ChartMode::Single, 1)
            .controller_settings(ChartMode::Single, &ControllerSettings::default())
            .unwrap();
        assert_eq!(single.window_minutes, 10);
        assert!(single.appender.high_frequency_mode);
    }

    #[test]
    fn test_single_mounts_on_open() {
        let (mut slot, renderers) = slot(ChartMode::Single);

        slot.open(&history(), Instant::now());

        assert_eq!(slot.controller().phase(), ChartPhase::Ready);
        assert_eq!(renderers.borrow()[0].points("Heart Rate").len(), 10);
    }

    #[test]
    fn test_lazy_mounts_once_on_first_view() {
        let now = Instant::now();
        let (mut slot, renderers) = slot(ChartMode::Lazy);
        let history = history();

        slot.open(&history, now);
        assert_eq!(slot.controller().phase(), ChartPhase::Uninitialized);
        assert!(!slot.is_live());

        slot.set_visible(true, &history, now);
        slot.set_visible(false, &history, now);
        slot.set_visible(true, &history, now);

        assert_eq!(slot.controller().phase(), ChartPhase::Ready);
        assert_eq!(renderers.borrow()[0].surface().initializations, 1);
    }

    #[test]
    fn test_virtualized_recreated_and_reseeded() {
        let now = Instant::now();
        let (mut slot, renderers) = slot(ChartMode::Virtualized);
        let history = history();

        slot.set_visible(true, &history, now);
        slot.set_visible(false, &history, now);
        assert!(slot.controller().is_disposed());
        assert!(renderers.borrow()[0].surface().disposed);

        slot.set_visible(true, &history, now);

        let renderers = renderers.borrow();
        assert_eq!(renderers.len(), 2);
        assert_eq!(renderers[1].points("Heart Rate").len(), 10);
        assert_eq!(slot.controller().phase(), ChartPhase::Ready);
        assert_eq!(slot.controller().state().instance(), 2);
    }
}
