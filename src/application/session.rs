// Chart session - event loop tying the sample history, scheduler and chart slots together
use crate::application::chart_mode::{ChartMode, ChartSlot, PerformanceProfile, RendererFactory};
use crate::application::clock::Clock;
use crate::application::history::{HistoryMark, SampleHistory};
use crate::application::legend_store::LegendStore;
use crate::application::lifecycle::{ChartController, ControllerStats};
use crate::application::renderer::ChartRenderer;
use crate::application::scheduler::{BatchUpdateScheduler, QueueStatus, UpdateCallback};
use crate::domain::chart::HoveredValue;
use crate::domain::error::ChartError;
use crate::domain::legend::LegendState;
use crate::domain::series::SeriesRegistry;
use crate::domain::telemetry::{IncrementalDelta, Sample};
use crate::infrastructure::config::{ChartSpec, PipelineConfig};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant, MissedTickBehavior};

/// Display refresh boundary at which the scheduler may drain.
const FRAME_INTERVAL: Duration = Duration::from_millis(16);
const IDLE_WAIT: Duration = Duration::from_secs(3_600);

#[derive(Debug, Clone, PartialEq)]
pub enum SessionInput {
    Sample(Sample),
    Samples(Vec<Sample>),
    Deltas(Vec<IncrementalDelta>),
    /// Replaces the history wholesale and reseeds every live chart.
    LoadHistory(Vec<Sample>),
    DataCleared,
    Ui(UiCommand),
    Shutdown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UiCommand {
    ToggleGroup(String),
    SetGroupVisible { group: String, visible: bool },
    SetChannelVisible { channel: String, visible: bool },
    ResetLegend,
    SelectWindow { chart_id: String, minutes: u32 },
    ReplaceDescriptors(SeriesRegistry),
    SetChartVisible { chart_id: String, visible: bool },
    OpenChart(ChartSpec),
    CloseChart(String),
}

pub struct ChartSession {
    config: PipelineConfig,
    registry: SeriesRegistry,
    legend: LegendState,
    legend_store: Option<Arc<dyn LegendStore>>,
    history: Rc<RefCell<SampleHistory>>,
    scheduler: BatchUpdateScheduler<HistoryMark>,
    slots: BTreeMap<String, Rc<RefCell<ChartSlot>>>,
    specs: BTreeMap<String, ChartSpec>,
    factory: Rc<RefCell<RendererFactory>>,
    clock: Rc<dyn Clock>,
    samples_received: u64,
}

impl ChartSession {
    pub fn new(
        config: PipelineConfig,
        factory: RendererFactory,
        clock: Rc<dyn Clock>,
    ) -> Result<Self, ChartError> {
        config.validate()?;
        let registry = config.registry()?;
        let legend = LegendState::defaults(&registry);
        let history = SampleHistory::new(config.performance.history_capacity);
        let profile = PerformanceProfile::for_mode(ChartMode::Single, 1);
        let scheduler =
            BatchUpdateScheduler::new(config.performance.scheduler_settings(&profile));

        Ok(Self {
            config,
            registry,
            legend,
            legend_store: None,
            history: Rc::new(RefCell::new(history)),
            scheduler,
            slots: BTreeMap::new(),
            specs: BTreeMap::new(),
            factory: Rc::new(RefCell::new(factory)),
            clock,
            samples_received: 0,
        })
    }

    pub fn with_legend_store(mut self, store: Arc<dyn LegendStore>) -> Self {
        self.legend_store = Some(store);
        self
    }

    /// Restores the saved legend and opens every configured chart.
    pub async fn start(&mut self, now: Instant) -> Result<(), ChartError> {
        self.restore_legend().await;
        let specs = self.config.chart_specs();
        let chart_count = specs.len();
        for spec in specs {
            self.open_chart(spec, chart_count, now)?;
        }
        self.retune_scheduler(now);
        Ok(())
    }

    /// Drives the session until `Shutdown` arrives or every sender is gone.
    pub async fn run(&mut self, mut inputs: mpsc::Receiver<SessionInput>) {
        let mut frames = tokio::time::interval(FRAME_INTERVAL);
        frames.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let deadline = self.next_deadline();
            let timer = tokio::time::sleep_until(
                deadline.unwrap_or_else(|| Instant::now() + IDLE_WAIT),
            );
            tokio::select! {
                input = inputs.recv() => {
                    let Some(input) = input else {
                        tracing::info!("Session input closed");
                        break;
                    };
                    if !self.handle(input, Instant::now()).await {
                        break;
                    }
                }
                _ = timer, if deadline.is_some() => self.on_timer(Instant::now()),
                _ = frames.tick() => {
                    self.on_frame(Instant::now());
                }
            }
        }
        self.shutdown();
    }

    /// Returns false once the session should stop.
    pub async fn handle(&mut self, input: SessionInput, now: Instant) -> bool {
        match input {
            SessionInput::Sample(sample) => self.ingest(sample, now),
            SessionInput::Samples(samples) => self.ingest_batch(samples, now),
            SessionInput::Deltas(deltas) => {
                self.ingest_batch(deltas.into_iter().map(Sample::from).collect(), now)
            }
            SessionInput::LoadHistory(samples) => self.load_history(samples),
            SessionInput::DataCleared => self.clear_data(now),
            SessionInput::Ui(command) => {
                if let Err(e) = self.apply_ui(command, now).await {
                    tracing::warn!("Rejected UI command: {}", e);
                }
            }
            SessionInput::Shutdown => return false,
        }
        true
    }

    pub fn ingest(&mut self, sample: Sample, now: Instant) {
        let mark = self.history.borrow_mut().push(sample);
        self.samples_received += 1;
        self.notify(mark, now);
    }

    pub fn ingest_batch(&mut self, samples: Vec<Sample>, now: Instant) {
        if samples.is_empty() {
            return;
        }
        self.samples_received += samples.len() as u64;
        let mark = self.history.borrow_mut().extend(samples);
        self.notify(mark, now);
    }

    fn notify(&mut self, mark: HistoryMark, now: Instant) {
        for id in self.slots.keys() {
            self.scheduler.schedule(id, mark, now);
        }
    }

    pub fn load_history(&mut self, samples: Vec<Sample>) {
        tracing::info!("Loading {} historical samples", samples.len());
        self.samples_received += samples.len() as u64;
        {
            let mut history = self.history.borrow_mut();
            history.clear();
            history.extend(samples);
        }
        // Seeding covers everything a queued mark would have delivered.
        self.scheduler.clear();

        let history = self.history.borrow();
        for slot in self.slots.values() {
            let mut slot = slot.borrow_mut();
            if slot.is_live() {
                slot.controller_mut().seed_history(&history);
            }
        }
    }

    /// Charts see the new generation on their next feed and clear in place.
    pub fn clear_data(&mut self, now: Instant) {
        let mark = self.history.borrow_mut().clear();
        tracing::info!("Data source cleared (generation {})", mark.generation);
        self.notify(mark, now);
    }

    pub async fn apply_ui(&mut self, command: UiCommand, now: Instant) -> Result<(), ChartError> {
        match command {
            UiCommand::ToggleGroup(group) => {
                let visible = self.legend.toggle_group(&self.registry, &group)?;
                tracing::info!("Legend group {} visible: {}", group, visible);
                self.legend_changed().await;
            }
            UiCommand::SetGroupVisible { group, visible } => {
                self.legend
                    .set_group_visible(&self.registry, &group, visible)?;
                self.legend_changed().await;
            }
            UiCommand::SetChannelVisible { channel, visible } => {
                self.legend.set_channel_visible(&channel, visible);
                self.legend_changed().await;
            }
            UiCommand::ResetLegend => {
                self.legend.reset(&self.registry);
                self.legend_changed().await;
            }
            UiCommand::SelectWindow { chart_id, minutes } => {
                let slot = self.slot(&chart_id)?;
                let mut slot = slot.borrow_mut();
                if !slot.mode().is_interactive() {
                    tracing::warn!("Chart {} has a fixed window", chart_id);
                    return Ok(());
                }
                let history = self.history.borrow();
                slot.controller_mut().select_window(minutes, &history)?;
                tracing::info!("Chart {} window set to {} minutes", chart_id, minutes);
            }
            UiCommand::ReplaceDescriptors(registry) => self.replace_registry(registry, now)?,
            UiCommand::SetChartVisible { chart_id, visible } => {
                let slot = self.slot(&chart_id)?;
                let history = self.history.borrow();
                slot.borrow_mut().set_visible(visible, &history, now);
            }
            UiCommand::OpenChart(spec) => {
                let chart_count = self.slots.len() + 1;
                self.open_chart(spec, chart_count, now)?;
                self.retune_scheduler(now);
            }
            UiCommand::CloseChart(chart_id) => {
                self.close_chart(&chart_id)?;
                self.retune_scheduler(now);
            }
        }
        Ok(())
    }

    async fn legend_changed(&mut self) {
        for slot in self.slots.values() {
            let mut slot = slot.borrow_mut();
            if slot.mode().is_interactive() {
                slot.controller_mut().apply_legend(self.legend.clone());
            }
        }
        self.persist_legend().await;
    }

    async fn restore_legend(&mut self) {
        let Some(store) = &self.legend_store else {
            return;
        };
        match store.load().await {
            Ok(saved) => self.legend = LegendState::restore(&self.registry, saved.as_ref()),
            Err(e) => tracing::warn!("Failed to load legend state, using defaults: {:#}", e),
        }
    }

    async fn persist_legend(&self) {
        if let Some(store) = &self.legend_store {
            if let Err(e) = store.save(&self.legend).await {
                tracing::warn!("Failed to save legend state: {:#}", e);
            }
        }
    }

    fn replace_registry(&mut self, registry: SeriesRegistry, now: Instant) -> Result<(), ChartError> {
        // Resolve every chart's channel set before touching any chart.
        let mut updates = Vec::with_capacity(self.slots.len());
        for (id, slot) in &self.slots {
            let spec = self
                .specs
                .get(id)
                .ok_or_else(|| ChartError::UnknownChart(id.clone()))?;
            updates.push((Rc::clone(slot), chart_registry(&registry, spec)?));
        }

        self.legend = LegendState::restore(&registry, Some(&self.legend));
        self.registry = registry;

        let history = self.history.borrow();
        let mut reinitialized = 0;
        for (slot, chart_registry) in updates {
            let mut slot = slot.borrow_mut();
            let legend = if slot.mode().is_interactive() {
                self.legend.clone()
            } else {
                LegendState::all_visible(&chart_registry)
            };
            if slot
                .controller_mut()
                .replace_descriptors(chart_registry, &history, now)
            {
                reinitialized += 1;
            }
            if slot.controller().legend() != &legend {
                slot.controller_mut().apply_legend(legend);
            }
        }
        tracing::info!(
            "Channel set replaced; {} of {} charts reinitialised",
            reinitialized,
            self.slots.len()
        );
        Ok(())
    }

    fn open_chart(&mut self, spec: ChartSpec, chart_count: usize, now: Instant) -> Result<(), ChartError> {
        if self.slots.contains_key(&spec.id) {
            return Err(ChartError::DuplicateChart(spec.id));
        }
        let registry = chart_registry(&self.registry, &spec)?;
        let profile = PerformanceProfile::for_mode(spec.mode, chart_count);
        let mut base = self.config.performance.controller_base();
        if let Some(window_minutes) = spec.window_minutes {
            base.window_minutes = window_minutes;
        }
        let mut settings = profile.controller_settings(spec.mode, &base)?;
        if let Some(decimator) = self.config.performance.decimator(&profile)? {
            settings.decimator = decimator;
        }
        let legend = if spec.mode.is_interactive() {
            self.legend.clone()
        } else {
            LegendState::all_visible(&registry)
        };

        let renderer = self.make_renderer(&spec.id);
        let controller = ChartController::new(
            spec.id.clone(),
            renderer,
            registry,
            legend,
            settings,
            Rc::clone(&self.clock),
        );
        let slot = Rc::new(RefCell::new(ChartSlot::new(
            spec.mode,
            controller,
            self.slot_factory(),
        )));
        slot.borrow_mut().open(&self.history.borrow(), now);
        self.scheduler.register(&spec.id, self.feed_callback(&slot));

        tracing::info!(
            "Opened {:?} chart {} ({} of {} charts)",
            spec.mode,
            spec.id,
            self.slots.len() + 1,
            chart_count
        );
        self.slots.insert(spec.id.clone(), slot);
        self.specs.insert(spec.id.clone(), spec);
        Ok(())
    }

    fn close_chart(&mut self, chart_id: &str) -> Result<(), ChartError> {
        let slot = self
            .slots
            .remove(chart_id)
            .ok_or_else(|| ChartError::UnknownChart(chart_id.to_string()))?;
        self.specs.remove(chart_id);
        self.scheduler.unregister(chart_id);
        slot.borrow_mut().close();
        tracing::info!("Closed chart {}", chart_id);
        Ok(())
    }

    /// Scheduler pacing follows the most demanding profile on screen.
    fn retune_scheduler(&mut self, now: Instant) {
        let chart_count = self.slots.len().max(1);
        let mode = match self.specs.values().next() {
            Some(spec) if chart_count == 1 => spec.mode,
            _ => ChartMode::Multi,
        };
        let profile = PerformanceProfile::for_mode(mode, chart_count);
        let settings = self.config.performance.scheduler_settings(&profile);
        if settings != self.scheduler.settings() {
            tracing::debug!(
                "Scheduler retuned for {} charts: {:?}",
                chart_count,
                settings
            );
            self.scheduler.update_settings(settings, now);
        }
    }

    fn make_renderer(&self, chart_id: &str) -> Box<dyn ChartRenderer> {
        let mut factory = self.factory.borrow_mut();
        (&mut **factory)(chart_id)
    }

    fn slot_factory(&self) -> RendererFactory {
        let shared = Rc::clone(&self.factory);
        Box::new(move |chart_id: &str| -> Box<dyn ChartRenderer> {
            let mut factory = shared.borrow_mut();
            (&mut **factory)(chart_id)
        })
    }

    fn feed_callback(&self, slot: &Rc<RefCell<ChartSlot>>) -> UpdateCallback<HistoryMark> {
        let slot = Rc::clone(slot);
        let history = Rc::clone(&self.history);
        Rc::new(RefCell::new(move |mark: HistoryMark| {
            let history = history.borrow();
            slot.borrow_mut().on_feed(mark, &history, Instant::now());
        }))
    }

    fn slot(&self, chart_id: &str) -> Result<Rc<RefCell<ChartSlot>>, ChartError> {
        self.slots
            .get(chart_id)
            .cloned()
            .ok_or_else(|| ChartError::UnknownChart(chart_id.to_string()))
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.slots
            .values()
            .filter_map(|slot| slot.borrow().next_deadline())
            .min()
    }

    pub fn on_timer(&mut self, now: Instant) {
        for slot in self.slots.values() {
            slot.borrow_mut().on_timer(now);
        }
    }

    /// Returns how many chart callbacks ran.
    pub fn on_frame(&mut self, now: Instant) -> usize {
        self.scheduler.on_frame(now)
    }

    /// Disposes every chart. Stats stay readable afterwards.
    pub fn shutdown(&mut self) {
        self.scheduler.clear();
        for (id, slot) in &self.slots {
            self.scheduler.unregister(id);
            slot.borrow_mut().close();
        }
        tracing::info!(
            "Session shut down after {} samples",
            self.samples_received
        );
    }

    pub fn samples_received(&self) -> u64 {
        self.samples_received
    }

    pub fn history_len(&self) -> usize {
        self.history.borrow().len()
    }

    pub fn history_dropped(&self) -> u64 {
        self.history.borrow().dropped()
    }

    pub fn registry(&self) -> &SeriesRegistry {
        &self.registry
    }

    pub fn legend(&self) -> &LegendState {
        &self.legend
    }

    pub fn chart_ids(&self) -> Vec<String> {
        self.slots.keys().cloned().collect()
    }

    pub fn chart_mode(&self, chart_id: &str) -> Option<ChartMode> {
        self.slots.get(chart_id).map(|slot| slot.borrow().mode())
    }

    pub fn chart_stats(&self) -> BTreeMap<String, ControllerStats> {
        self.slots
            .iter()
            .map(|(id, slot)| (id.clone(), slot.borrow().stats()))
            .collect()
    }

    pub fn queue_status(&self) -> QueueStatus {
        self.scheduler.status()
    }

    pub fn scheduler(&self) -> &BatchUpdateScheduler<HistoryMark> {
        &self.scheduler
    }

    pub fn tooltip(&self, chart_id: &str, timestamp_ms: i64, hovered: &[HoveredValue]) -> Option<String> {
        self.slots
            .get(chart_id)
            .and_then(|slot| slot.borrow().controller().tooltip(timestamp_ms, hovered))
    }
}

/// The registry restricted to the chart's channels, in registry order.
fn chart_registry(registry: &SeriesRegistry, spec: &ChartSpec) -> Result<SeriesRegistry, ChartError> {
    if spec.channels.is_empty() {
        return Ok(registry.clone());
    }
    let subset = registry.subset(&spec.channels)?;
    if subset.descriptors().len() < spec.channels.len() {
        tracing::warn!(
            "Chart {} lists channels missing from the registry: {:?}",
            spec.id,
            spec.channels
        );
    }
    Ok(subset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::clock::ManualClock;
    use crate::application::lifecycle::{ChartPhase, DEFAULT_WINDOWS};
    use crate::domain::chart::MINUTE_MS;
    use crate::domain::series::SeriesDescriptor;
    use crate::infrastructure::legend_store::JsonFileLegendStore;
    use crate::infrastructure::memory_renderer::InMemoryRenderer;

    const NOW_MS: i64 = 500 * MINUTE_MS;

    type Renderers = Rc<RefCell<Vec<InMemoryRenderer>>>;

    fn factory(renderers: &Renderers) -> RendererFactory {
        let created = Rc::clone(renderers);
        Box::new(move |id: &str| -> Box<dyn ChartRenderer> {
            let renderer = InMemoryRenderer::new(id);
            created.borrow_mut().push(renderer.clone());
            Box::new(renderer)
        })
    }

    fn session(charts: Vec<ChartSpec>) -> (ChartSession, Renderers) {
        let renderers: Renderers = Rc::default();
        let config = PipelineConfig {
            charts,
            ..PipelineConfig::default()
        };
        let session = ChartSession::new(
            config,
            factory(&renderers),
            Rc::new(ManualClock::new(NOW_MS)),
        )
        .unwrap();
        (session, renderers)
    }

    fn vitals(offset_ms: i64, heart_rate: f64) -> Sample {
        Sample::new(NOW_MS - 60_000 + offset_ms)
            .with("heartRate", heart_rate)
            .with("spo2", 97.0)
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_delivers_samples_to_chart() {
        let (mut session, renderers) = session(Vec::new());
        session.start(Instant::now()).await.unwrap();
        let (tx, rx) = mpsc::channel(16);

        let feed = async move {
            for i in 0..5 {
                tx.send(SessionInput::Sample(vitals(i * 1_000, 70.0 + i as f64)))
                    .await
                    .unwrap();
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
            tx.send(SessionInput::Shutdown).await.unwrap();
        };
        tokio::join!(session.run(rx), feed);

        let stats = session.chart_stats();
        let main = &stats["main"];
        assert_eq!(session.samples_received(), 5);
        assert_eq!(main.deltas_applied, 5);
        assert_eq!(main.points_appended, 10);
        assert_eq!(main.phase, ChartPhase::Disposed);
        assert!(renderers.borrow()[0].surface().disposed);
        assert_eq!(session.queue_status().registered_instances, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_frame_coalesces_marks_without_losing_samples() {
        let (mut session, renderers) = session(Vec::new());
        let start = Instant::now();
        session.start(start).await.unwrap();

        for i in 0..4 {
            session.ingest(vitals(i * 1_000, 80.0), start);
        }
        let invoked = session.on_frame(start + Duration::from_millis(20));
        tokio::time::advance(Duration::from_millis(100)).await;
        session.on_timer(Instant::now());

        assert_eq!(invoked, 1);
        assert_eq!(session.scheduler().superseded(), 3);
        assert_eq!(renderers.borrow()[0].points("Heart Rate").len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_history_seeds_and_clear_empties() {
        let (mut session, renderers) = session(Vec::new());
        let start = Instant::now();
        session.start(start).await.unwrap();

        session.load_history((0..30).map(|i| vitals(i * 1_000, 72.0)).collect());
        assert_eq!(renderers.borrow()[0].points("SpO2").len(), 30);
        assert_eq!(session.history_len(), 30);

        session.clear_data(start);
        session.on_frame(start + Duration::from_secs(1));

        assert_eq!(renderers.borrow()[0].total_points(), 0);
        assert_eq!(renderers.borrow()[0].surface().initializations, 1);
        assert_eq!(session.history_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_legend_toggle_reaches_interactive_charts_only() {
        let (mut session, renderers) = session(vec![
            ChartSpec::new("main", ChartMode::Single),
            ChartSpec::new("bed-2", ChartMode::Multi),
        ]);
        let start = Instant::now();
        session.start(start).await.unwrap();

        session
            .apply_ui(UiCommand::ToggleGroup("basicVitals".into()), start)
            .await
            .unwrap();

        let renderers = renderers.borrow();
        assert_eq!(renderers.len(), 2);
        let main = renderers.iter().find(|r| r.surface().legend_patches == 1).unwrap();
        assert_eq!(main.surface().legend_selected.get("Heart Rate"), Some(&false));
        assert!(!session.legend().is_group_visible("basicVitals"));
        let multi_patches: u32 = renderers.iter().map(|r| r.surface().legend_patches).sum();
        assert_eq!(multi_patches, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_selection_rules() {
        let (mut session, renderers) = session(vec![
            ChartSpec::new("main", ChartMode::Single),
            ChartSpec::new("bed-2", ChartMode::Multi),
        ]);
        let start = Instant::now();
        session.start(start).await.unwrap();
        // One reading per minute over the last 25 minutes.
        session.load_history(
            (0..25)
                .rev()
                .map(|i| Sample::new(NOW_MS - i * MINUTE_MS - 30_000).with("heartRate", 70.0))
                .collect(),
        );
        let main = renderers.borrow()[0].clone();
        assert_eq!(main.points("Heart Rate").len(), 10);

        let select = |chart_id: &str, minutes| UiCommand::SelectWindow {
            chart_id: chart_id.into(),
            minutes,
        };
        assert_eq!(
            session.apply_ui(select("main", 7), start).await,
            Err(ChartError::WindowNotAllowed {
                minutes: 7,
                allowed: DEFAULT_WINDOWS.to_vec()
            })
        );
        assert_eq!(session.apply_ui(select("main", 30), start).await, Ok(()));
        assert_eq!(main.points("Heart Rate").len(), 25);
        assert_eq!(main.surface().initializations, 1);
        assert_eq!(session.apply_ui(select("bed-2", 5), start).await, Ok(()));
        assert_eq!(
            session.apply_ui(select("ghost", 5), start).await,
            Err(ChartError::UnknownChart("ghost".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_and_close_charts() {
        let (mut session, renderers) = session(Vec::new());
        let start = Instant::now();
        session.start(start).await.unwrap();
        session.ingest(vitals(0, 75.0), start);

        let mut lazy = ChartSpec::new("lazy", ChartMode::Lazy);
        lazy.channels = vec!["heartRate".into()];
        session
            .apply_ui(UiCommand::OpenChart(lazy.clone()), start)
            .await
            .unwrap();
        assert_eq!(
            session.apply_ui(UiCommand::OpenChart(lazy), start).await,
            Err(ChartError::DuplicateChart("lazy".into()))
        );
        assert_eq!(session.chart_stats()["lazy"].phase, ChartPhase::Uninitialized);
        assert_eq!(session.scheduler().settings().max_batch_size, 50);

        session
            .apply_ui(
                UiCommand::SetChartVisible {
                    chart_id: "lazy".into(),
                    visible: true,
                },
                start,
            )
            .await
            .unwrap();
        assert_eq!(renderers.borrow()[1].points("Heart Rate").len(), 1);
        assert_eq!(
            renderers.borrow()[1].surface().series.len(),
            1,
            "lazy chart only shows its own channels"
        );

        session
            .apply_ui(UiCommand::CloseChart("lazy".into()), start)
            .await
            .unwrap();
        assert_eq!(session.chart_ids(), vec!["main".to_string()]);
        assert!(renderers.borrow()[1].surface().disposed);
        assert_eq!(session.scheduler().settings().max_batch_size, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replace_descriptors_reinitialises_changed_charts() {
        let (mut session, renderers) = session(Vec::new());
        let start = Instant::now();
        session.start(start).await.unwrap();
        session.ingest(vitals(0, 75.0), start);

        session
            .apply_ui(
                UiCommand::ReplaceDescriptors(SeriesRegistry::default_vitals()),
                start,
            )
            .await
            .unwrap();
        assert_eq!(renderers.borrow()[0].surface().initializations, 1);

        let narrow = SeriesRegistry::new(
            vec![SeriesDescriptor::new("spo2", "SpO2", "oximeter", "#08979c")],
            Vec::new(),
        )
        .unwrap();
        session
            .apply_ui(UiCommand::ReplaceDescriptors(narrow), start)
            .await
            .unwrap();

        let renderers = renderers.borrow();
        let renderer = &renderers[0];
        assert_eq!(renderer.surface().initializations, 2);
        assert_eq!(renderer.points("SpO2").len(), 1);
        assert_eq!(session.registry().topology(), vec!["spo2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_legend_persisted_and_restored() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn LegendStore> =
            Arc::new(JsonFileLegendStore::new(dir.path().join("legend.json")));
        let start = Instant::now();

        let (first, _) = session(Vec::new());
        let mut first = first.with_legend_store(Arc::clone(&store));
        first.start(start).await.unwrap();
        first
            .apply_ui(
                UiCommand::SetChannelVisible {
                    channel: "SDNN".into(),
                    visible: false,
                },
                start,
            )
            .await
            .unwrap();

        let (second, renderers) = session(Vec::new());
        let mut second = second.with_legend_store(store);
        second.start(start).await.unwrap();

        assert!(!second.legend().is_channel_visible("SDNN"));
        assert_eq!(
            renderers.borrow()[0].surface().legend_selected.get("SDNN"),
            Some(&false)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_deltas_input_becomes_history() {
        let (mut session, _) = session(Vec::new());
        let start = Instant::now();
        session.start(start).await.unwrap();

        let keep_going = session
            .handle(
                SessionInput::Deltas(vec![
                    IncrementalDelta::new(NOW_MS - 2_000).with("heartRate", 70.0),
                    IncrementalDelta::new(NOW_MS - 1_000).with("heartRate", 71.0),
                ]),
                start,
            )
            .await;

        assert!(keep_going);
        assert_eq!(session.history_len(), 2);
        assert_eq!(session.queue_status().queue_length, 1);
        assert!(!session.handle(SessionInput::Shutdown, start).await);
    }
}
