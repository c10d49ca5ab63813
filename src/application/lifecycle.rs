// Chart lifecycle controller - sole owner of one renderer handle
use crate::application::appender::{AppenderSettings, FlushOutcome, IncrementalAppender};
use crate::application::clock::Clock;
use crate::application::decimator::{DecimatedView, DecimationCache, Decimator};
use crate::application::history::{HistoryMark, SampleHistory};
use crate::application::option_builder::{build_configuration, BuildOptions};
use crate::application::renderer::ChartRenderer;
use crate::domain::chart::{ChartConfiguration, HoveredValue, TimeAxis};
use crate::domain::error::ChartError;
use crate::domain::legend::LegendState;
use crate::domain::series::SeriesRegistry;
use crate::domain::telemetry::{ChannelUpdate, IncrementalDelta};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;
use tokio::time::{Duration, Instant};

pub const DEFAULT_WINDOWS: [u32; 5] = [5, 10, 20, 30, 60];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartPhase {
    Uninitialized,
    Initializing,
    Ready,
    Reinitializing,
    Disposed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControllerSettings {
    pub appender: AppenderSettings,
    pub slide_interval: Duration,
    pub window_minutes: u32,
    pub allowed_windows: Vec<u32>,
    pub incremental_update: bool,
    pub decimator: Decimator,
    /// Bound on deltas held while the renderer is not ready.
    pub max_pending: usize,
    pub max_points_per_series: usize,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            appender: AppenderSettings::default(),
            slide_interval: Duration::from_secs(1),
            window_minutes: 10,
            allowed_windows: DEFAULT_WINDOWS.to_vec(),
            incremental_update: true,
            decimator: Decimator::default(),
            max_pending: 10_000,
            max_points_per_series: 36_000,
        }
    }
}

/// Per-instance bookkeeping. Replaced wholesale when the channel set changes.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartInstanceState {
    instance: u64,
    renderer_ready: bool,
    watermark: u64,
    generation: Option<u64>,
    pending: VecDeque<IncrementalDelta>,
}

impl ChartInstanceState {
    fn new(instance: u64) -> Self {
        Self {
            instance,
            renderer_ready: false,
            watermark: 0,
            generation: None,
            pending: VecDeque::new(),
        }
    }

    pub fn instance(&self) -> u64 {
        self.instance
    }

    pub fn renderer_ready(&self) -> bool {
        self.renderer_ready
    }

    /// Last history sequence handed to the appender.
    pub fn watermark(&self) -> u64 {
        self.watermark
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControllerStats {
    pub phase: ChartPhase,
    pub instance: u64,
    pub deltas_applied: u64,
    pub points_appended: u64,
    pub render_failures: u64,
    pub dropped_deltas: u64,
    pub decimation_cache_hits: u64,
    pub buffered: usize,
    pub pending: usize,
    pub watermark: u64,
    /// Appender pass in progress. Appending is synchronous, so a snapshot
    /// taken between calls always reads false.
    pub processing: bool,
}

pub struct ChartController {
    id: String,
    renderer: Box<dyn ChartRenderer>,
    registry: SeriesRegistry,
    legend: LegendState,
    settings: ControllerSettings,
    clock: Rc<dyn Clock>,
    phase: ChartPhase,
    state: ChartInstanceState,
    appender: IncrementalAppender,
    configuration: Option<ChartConfiguration>,
    decimation: DecimationCache,
    next_slide: Option<Instant>,
    instances: u64,
    render_failures: u64,
    dropped_pending: u64,
}

impl ChartController {
    pub fn new(
        id: impl Into<String>,
        renderer: Box<dyn ChartRenderer>,
        registry: SeriesRegistry,
        legend: LegendState,
        settings: ControllerSettings,
        clock: Rc<dyn Clock>,
    ) -> Self {
        let appender = IncrementalAppender::new(settings.appender, registry.descriptors());
        Self {
            id: id.into(),
            renderer,
            registry,
            legend,
            settings,
            clock,
            phase: ChartPhase::Uninitialized,
            state: ChartInstanceState::new(1),
            appender,
            configuration: None,
            decimation: DecimationCache::default(),
            next_slide: None,
            instances: 1,
            render_failures: 0,
            dropped_pending: 0,
        }
    }

    /// Fresh controller over a new renderer with this one's channels, legend
    /// and settings. Used when a virtualized chart comes back into view.
    pub fn rebuild(&self, renderer: Box<dyn ChartRenderer>) -> Self {
        let mut controller = Self::new(
            self.id.clone(),
            renderer,
            self.registry.clone(),
            self.legend.clone(),
            self.settings.clone(),
            Rc::clone(&self.clock),
        );
        controller.instances = self.instances + 1;
        controller.state = ChartInstanceState::new(controller.instances);
        controller
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn phase(&self) -> ChartPhase {
        self.phase
    }

    pub fn state(&self) -> &ChartInstanceState {
        &self.state
    }

    pub fn configuration(&self) -> Option<&ChartConfiguration> {
        self.configuration.as_ref()
    }

    pub fn registry(&self) -> &SeriesRegistry {
        &self.registry
    }

    pub fn legend(&self) -> &LegendState {
        &self.legend
    }

    pub fn window_minutes(&self) -> u32 {
        self.settings.window_minutes
    }

    pub fn is_disposed(&self) -> bool {
        self.phase == ChartPhase::Disposed
    }

    fn build_options(&self) -> BuildOptions {
        BuildOptions {
            window_minutes: self.settings.window_minutes,
            now_ms: self.clock.now_ms(),
            incremental_update: self.settings.incremental_update,
            max_points_per_series: self.settings.max_points_per_series,
        }
    }

    /// Hand the renderer an empty-data configuration. Failures are retried on
    /// the slide tick.
    pub fn mount(&mut self, now: Instant) {
        match self.phase {
            ChartPhase::Uninitialized => {
                self.phase = ChartPhase::Initializing;
                self.initialize(now);
            }
            ChartPhase::Disposed => {
                tracing::warn!("Ignoring mount of disposed chart {}", self.id);
            }
            phase => {
                tracing::debug!("Chart {} already mounted ({:?})", self.id, phase);
            }
        }
    }

    fn initialize(&mut self, now: Instant) {
        self.next_slide = Some(now + self.settings.slide_interval);

        let configuration = match build_configuration(
            self.registry.descriptors(),
            &self.legend,
            &self.build_options(),
        ) {
            Ok(configuration) => configuration,
            Err(e) => {
                tracing::error!("Chart {} configuration rejected: {}", self.id, e);
                return;
            }
        };

        match self.renderer.initialize(&configuration) {
            Ok(()) => {
                tracing::info!(
                    "Chart {} ready with {} series (instance {})",
                    self.id,
                    configuration.series.len(),
                    self.state.instance
                );
                self.configuration = Some(configuration);
                self.phase = ChartPhase::Ready;
                self.state.renderer_ready = true;
                self.release_pending();
            }
            Err(e) => {
                self.render_failures += 1;
                tracing::warn!("Chart {} initialisation failed, will retry: {}", self.id, e);
            }
        }
    }

    fn release_pending(&mut self) {
        if self.state.pending.is_empty() {
            return;
        }
        let pending: Vec<IncrementalDelta> = self.state.pending.drain(..).collect();
        tracing::debug!("Chart {} releasing {} pending deltas", self.id, pending.len());
        let outcome = self.appender.apply_now(pending, &mut *self.renderer);
        self.record(outcome);
    }

    fn record(&mut self, outcome: FlushOutcome) {
        match outcome {
            FlushOutcome::Requeued { remaining, error } => {
                self.render_failures += 1;
                tracing::warn!(
                    "Chart {} append failed, {} deltas kept for retry: {}",
                    self.id,
                    remaining,
                    error
                );
            }
            FlushOutcome::Interrupted { rest, error } => {
                self.render_failures += 1;
                tracing::warn!(
                    "Chart {} append failed, {} deltas held for retry: {}",
                    self.id,
                    rest.len(),
                    error
                );
                for delta in rest.into_iter().rev() {
                    self.state.pending.push_front(delta);
                }
                self.enforce_pending_bound();
            }
            FlushOutcome::Idle | FlushOutcome::Applied { .. } => {}
        }
    }

    fn enforce_pending_bound(&mut self) {
        let cap = self.settings.max_pending.max(1);
        if self.state.pending.len() > cap {
            let excess = self.state.pending.len() - cap;
            self.state.pending.drain(..excess);
            self.dropped_pending += excess as u64;
        }
    }

    /// Queue live deltas.
    pub fn submit(&mut self, deltas: Vec<IncrementalDelta>, now: Instant) {
        if self.is_disposed() {
            return;
        }
        self.appender.submit(deltas, now);
    }

    /// Pull everything in `history` between the watermark and `mark` into the
    /// appender. A generation change means the source was reset.
    pub fn on_feed(&mut self, mark: HistoryMark, history: &SampleHistory, now: Instant) {
        if self.is_disposed() {
            return;
        }
        let generation = history.generation();
        match self.state.generation {
            Some(known) if known != generation => {
                tracing::info!("Chart {} data source was reset", self.id);
                self.clear_data();
                self.state.generation = Some(generation);
            }
            Some(_) => {}
            None => self.state.generation = Some(generation),
        }

        let upto = if mark.generation == generation {
            mark.sequence
        } else {
            history.mark().sequence
        };
        if upto <= self.state.watermark {
            return;
        }

        let deltas: Vec<IncrementalDelta> = history
            .between(self.state.watermark, upto)
            .map(|sample| IncrementalDelta::from_sample(sample, self.appender.channel_keys()))
            .filter(|delta| !delta.is_empty())
            .collect();
        self.state.watermark = upto;
        self.appender.submit(deltas, now);
    }

    /// Earliest instant at which `on_timer` has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.is_disposed() {
            return None;
        }
        [self.appender.deadline(), self.next_slide]
            .into_iter()
            .flatten()
            .min()
    }

    pub fn on_timer(&mut self, now: Instant) {
        if self.is_disposed() {
            return;
        }
        if self.appender.is_due(now) {
            self.flush(now);
        }
        if self.next_slide.is_some_and(|t| t <= now) {
            self.next_slide = Some(now + self.settings.slide_interval);
            match self.phase {
                ChartPhase::Ready => {
                    self.release_pending();
                    self.slide_window();
                }
                ChartPhase::Initializing => self.initialize(now),
                _ => {}
            }
        }
    }

    /// Held deltas go out first, so live data queues behind them while any
    /// are waiting.
    fn flush(&mut self, now: Instant) {
        if self.phase == ChartPhase::Ready && self.state.pending.is_empty() {
            let outcome = self.appender.flush(&mut *self.renderer, now);
            self.record(outcome);
            return;
        }
        let batch = self.appender.take_batch();
        self.state.pending.extend(batch);
        self.enforce_pending_bound();
        if self.phase == ChartPhase::Ready {
            self.release_pending();
        }
    }

    /// Axis-only patch anchoring the window at `[now - window, now]`.
    fn slide_window(&mut self) {
        let axis = TimeAxis::anchored(self.clock.now_ms(), self.settings.window_minutes);
        match self.renderer.patch_time_axis(&axis) {
            Ok(()) => {
                if let Some(configuration) = self.configuration.as_mut() {
                    configuration.time_axis = axis;
                }
            }
            Err(e) => {
                self.render_failures += 1;
                tracing::warn!("Chart {} axis update failed: {}", self.id, e);
            }
        }
    }

    /// Moves the axis to the new window and reloads the chart's data from
    /// `history` for it. Series are cleared in place, so zoom survives.
    pub fn select_window(
        &mut self,
        window_minutes: u32,
        history: &SampleHistory,
    ) -> Result<(), ChartError> {
        if window_minutes == 0 {
            return Err(ChartError::ZeroWindow);
        }
        if !self.settings.allowed_windows.contains(&window_minutes) {
            return Err(ChartError::WindowNotAllowed {
                minutes: window_minutes,
                allowed: self.settings.allowed_windows.clone(),
            });
        }
        if window_minutes == self.settings.window_minutes {
            return Ok(());
        }
        self.settings.window_minutes = window_minutes;
        if self.phase == ChartPhase::Ready {
            self.slide_window();
        }
        if self.phase != ChartPhase::Uninitialized {
            self.seed_history(history);
        }
        Ok(())
    }

    /// Visibility changes go out as a legend patch; data and zoom stay.
    pub fn apply_legend(&mut self, legend: LegendState) {
        self.legend = legend;
        if self.phase != ChartPhase::Ready {
            return;
        }
        let mut configuration = match build_configuration(
            self.registry.descriptors(),
            &self.legend,
            &self.build_options(),
        ) {
            Ok(configuration) => configuration,
            Err(e) => {
                tracing::error!("Chart {} legend rebuild rejected: {}", self.id, e);
                return;
            }
        };
        match self.renderer.patch_legend(&configuration.legend_patch()) {
            Ok(()) => {
                if let Some(current) = &self.configuration {
                    configuration.time_axis = current.time_axis;
                }
                self.configuration = Some(configuration);
            }
            Err(e) => {
                self.render_failures += 1;
                tracing::warn!("Chart {} legend update failed: {}", self.id, e);
            }
        }
    }

    /// Reinitialise when the descriptor set differs. Returns whether it did.
    pub fn replace_descriptors(
        &mut self,
        registry: SeriesRegistry,
        history: &SampleHistory,
        now: Instant,
    ) -> bool {
        if self.is_disposed() || registry.descriptors() == self.registry.descriptors() {
            return false;
        }
        tracing::info!(
            "Chart {} channel set changed: {:?} -> {:?}",
            self.id,
            self.registry.topology(),
            registry.topology()
        );

        let mounted = self.phase != ChartPhase::Uninitialized;
        if mounted {
            self.phase = ChartPhase::Reinitializing;
        }
        self.legend = LegendState::restore(&registry, Some(&self.legend));
        self.registry = registry;
        self.appender.set_channels(self.registry.descriptors());
        self.instances += 1;
        self.state = ChartInstanceState::new(self.instances);
        self.configuration = None;

        if mounted {
            self.phase = ChartPhase::Initializing;
            self.initialize(now);
            self.seed_history(history);
        }
        true
    }

    /// Replace the chart content with a decimated view of `history` and move
    /// the watermark to its end.
    pub fn seed_history(&mut self, history: &SampleHistory) {
        if self.is_disposed() {
            return;
        }
        let samples = history.snapshot();
        let view = self.decimation.get_or_compute(
            &self.settings.decimator,
            &samples,
            self.registry.descriptors(),
            self.settings.window_minutes,
            self.clock.now_ms(),
        );
        let deltas = deltas_from_view(view);
        let total_points = view.total_points();
        tracing::info!(
            "Chart {} seeded with {} points from {} samples",
            self.id,
            total_points,
            samples.len()
        );

        self.state.watermark = history.mark().sequence;
        self.state.generation = Some(history.generation());
        self.clear_series();
        self.appender.reset();
        self.state.pending.clear();
        if self.phase == ChartPhase::Ready {
            let outcome = self.appender.apply_now(deltas, &mut *self.renderer);
            self.record(outcome);
        } else {
            self.state.pending = deltas.into();
        }
    }

    /// Empties every series in place. Configuration and interaction state stay.
    pub fn clear_data(&mut self) {
        if self.is_disposed() {
            return;
        }
        self.clear_series();
        self.state.watermark = 0;
        self.state.pending.clear();
        self.appender.reset();
    }

    fn clear_series(&mut self) {
        if self.phase != ChartPhase::Ready {
            return;
        }
        let count = self.configuration.as_ref().map_or(0, |c| c.series.len());
        for index in 0..count {
            if let Err(e) = self.renderer.clear_series_data(index) {
                self.render_failures += 1;
                tracing::warn!("Chart {} failed to clear series {}: {}", self.id, index, e);
            }
        }
    }

    /// Safe to call repeatedly.
    pub fn dispose(&mut self) {
        if self.is_disposed() {
            return;
        }
        self.renderer.dispose();
        self.appender.reset();
        self.state.pending.clear();
        self.state.renderer_ready = false;
        self.next_slide = None;
        self.phase = ChartPhase::Disposed;
        tracing::info!("Chart {} disposed", self.id);
    }

    pub fn tooltip(&self, timestamp_ms: i64, hovered: &[HoveredValue]) -> Option<String> {
        self.configuration
            .as_ref()
            .map(|c| c.tooltip_text(timestamp_ms, hovered))
    }

    pub fn stats(&self) -> ControllerStats {
        ControllerStats {
            phase: self.phase,
            instance: self.state.instance,
            deltas_applied: self.appender.deltas_applied(),
            points_appended: self.appender.points_appended(),
            render_failures: self.render_failures,
            dropped_deltas: self.appender.dropped() + self.dropped_pending,
            decimation_cache_hits: self.decimation.hits(),
            buffered: self.appender.buffered_len(),
            pending: self.state.pending.len(),
            watermark: self.state.watermark,
            processing: self.appender.is_processing(),
        }
    }
}

/// Per-channel decimated series merged back into timestamp-ordered deltas.
fn deltas_from_view(view: &DecimatedView) -> Vec<IncrementalDelta> {
    let mut by_time: BTreeMap<i64, IncrementalDelta> = BTreeMap::new();
    for (key, points) in &view.series {
        for point in points {
            by_time
                .entry(point.time_ms)
                .or_insert_with(|| IncrementalDelta::new(point.time_ms))
                .updates
                .push(ChannelUpdate {
                    channel_key: key.clone(),
                    value: point.value,
                });
        }
    }
    by_time.into_values().collect()
}
