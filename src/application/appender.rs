// Incremental appender - debounced, bounded buffer of deltas applied as single-point appends
use crate::application::renderer::SeriesSink;
use crate::domain::error::RenderError;
use crate::domain::series::SeriesDescriptor;
use crate::domain::telemetry::{IncrementalDelta, TimeSeriesPoint};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use tokio::time::{Duration, Instant};

const HIGH_FREQUENCY_DEBOUNCE: Duration = Duration::from_millis(20);
const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(50);
/// A continuous stream re-arms the debounce forever; this caps the wait.
const MAX_WAIT_FACTOR: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppenderSettings {
    pub max_batch_size: usize,
    pub high_frequency_mode: bool,
}

impl Default for AppenderSettings {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            high_frequency_mode: false,
        }
    }
}

impl AppenderSettings {
    pub fn debounce(&self) -> Duration {
        if self.high_frequency_mode {
            HIGH_FREQUENCY_DEBOUNCE
        } else {
            DEFAULT_DEBOUNCE
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FlushOutcome {
    /// Nothing buffered.
    Idle,
    Applied { deltas: usize, points: usize },
    /// The renderer failed; `remaining` deltas went back to the front of the
    /// buffer and the timer was re-armed.
    Requeued { remaining: usize, error: RenderError },
    /// An `apply_now` batch stopped at a renderer failure. The unapplied tail
    /// is handed back untouched; the live buffer bound never applies to it.
    Interrupted {
        rest: Vec<IncrementalDelta>,
        error: RenderError,
    },
}

/// Tail of a batch left over when the renderer failed.
struct Unapplied {
    rest: Vec<IncrementalDelta>,
    error: RenderError,
}

#[derive(Debug)]
pub struct IncrementalAppender {
    settings: AppenderSettings,
    /// channel key -> display name, plotted channels only
    plotted: BTreeMap<String, String>,
    /// Known channels that are never plotted (live readout only or hidden).
    unplotted: HashSet<String>,
    buffer: VecDeque<IncrementalDelta>,
    deadline: Option<Instant>,
    armed_at: Option<Instant>,
    last_applied: HashMap<String, i64>,
    reported_unknown: HashSet<String>,
    processing: bool,
    deltas_applied: u64,
    points_appended: u64,
    dropped: u64,
    failures: u64,
}

impl IncrementalAppender {
    pub fn new(settings: AppenderSettings, descriptors: &[SeriesDescriptor]) -> Self {
        let mut appender = Self {
            settings,
            plotted: BTreeMap::new(),
            unplotted: HashSet::new(),
            buffer: VecDeque::new(),
            deadline: None,
            armed_at: None,
            last_applied: HashMap::new(),
            reported_unknown: HashSet::new(),
            processing: false,
            deltas_applied: 0,
            points_appended: 0,
            dropped: 0,
            failures: 0,
        };
        appender.set_channels(descriptors);
        appender
    }

    /// Swap the channel set. Buffered data and per-channel ordering state are
    /// discarded; counters survive.
    pub fn set_channels(&mut self, descriptors: &[SeriesDescriptor]) {
        self.plotted = descriptors
            .iter()
            .filter(|d| d.is_plotted())
            .map(|d| (d.key.clone(), d.display_name.clone()))
            .collect();
        self.unplotted = descriptors
            .iter()
            .filter(|d| !d.is_plotted())
            .map(|d| d.key.clone())
            .collect();
        self.reported_unknown.clear();
        self.reset();
    }

    pub fn settings(&self) -> AppenderSettings {
        self.settings
    }

    pub fn update_settings(&mut self, settings: AppenderSettings) {
        self.settings = settings;
        self.enforce_capacity();
    }

    /// Plotted channel keys, in key order.
    pub fn channel_keys(&self) -> impl Iterator<Item = &str> {
        self.plotted.keys().map(String::as_str)
    }

    /// Buffer deltas and re-arm the debounce timer. Empty deltas are ignored.
    pub fn submit(&mut self, deltas: impl IntoIterator<Item = IncrementalDelta>, now: Instant) {
        let before = self.buffer.len();
        self.buffer.extend(deltas.into_iter().filter(|d| !d.is_empty()));
        if self.buffer.len() == before {
            return;
        }
        self.enforce_capacity();
        self.arm(now);
    }

    fn enforce_capacity(&mut self) {
        let cap = self.settings.max_batch_size.max(1);
        if self.buffer.len() > cap {
            let excess = self.buffer.len() - cap;
            self.buffer.drain(..excess);
            self.dropped += excess as u64;
            tracing::debug!("Appender buffer full, dropped {} oldest deltas", excess);
        }
    }

    fn arm(&mut self, now: Instant) {
        let armed_at = *self.armed_at.get_or_insert(now);
        let debounce = self.settings.debounce();
        let latest = armed_at + debounce * MAX_WAIT_FACTOR;
        self.deadline = Some((now + debounce).min(latest));
    }

    fn disarm(&mut self) {
        self.deadline = None;
        self.armed_at = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| d <= now)
    }

    /// Hand the whole buffer to the caller and disarm. Used when the renderer
    /// is not ready to receive it.
    pub fn take_batch(&mut self) -> Vec<IncrementalDelta> {
        self.disarm();
        self.buffer.drain(..).collect()
    }

    /// Drain the buffer into `sink`. A failure puts the unapplied tail back at
    /// the front of the buffer.
    pub fn flush<S: SeriesSink + ?Sized>(&mut self, sink: &mut S, now: Instant) -> FlushOutcome {
        self.disarm();
        if self.buffer.is_empty() {
            return FlushOutcome::Idle;
        }
        let batch: Vec<IncrementalDelta> = self.buffer.drain(..).collect();
        match self.apply(batch, sink) {
            Ok((deltas, points)) => FlushOutcome::Applied { deltas, points },
            Err(Unapplied { rest, error }) => {
                let remaining = rest.len();
                self.requeue(rest, now);
                FlushOutcome::Requeued { remaining, error }
            }
        }
    }

    /// Apply a batch straight away, bypassing the buffer. Used for seeding a
    /// chart from history and for releasing held deltas.
    pub fn apply_now<S: SeriesSink + ?Sized>(
        &mut self,
        batch: Vec<IncrementalDelta>,
        sink: &mut S,
    ) -> FlushOutcome {
        if batch.is_empty() {
            return FlushOutcome::Idle;
        }
        match self.apply(batch, sink) {
            Ok((deltas, points)) => FlushOutcome::Applied { deltas, points },
            Err(Unapplied { rest, error }) => FlushOutcome::Interrupted { rest, error },
        }
    }

    fn apply<S: SeriesSink + ?Sized>(
        &mut self,
        batch: Vec<IncrementalDelta>,
        sink: &mut S,
    ) -> Result<(usize, usize), Unapplied> {
        self.processing = true;
        let result = self.append_all(batch, sink);
        self.processing = false;
        match &result {
            Ok((deltas, points)) => {
                self.deltas_applied += *deltas as u64;
                self.points_appended += *points as u64;
            }
            Err(_) => self.failures += 1,
        }
        result
    }

    fn append_all<S: SeriesSink + ?Sized>(
        &mut self,
        batch: Vec<IncrementalDelta>,
        sink: &mut S,
    ) -> Result<(usize, usize), Unapplied> {
        // Series order changes across reinitialisations, so resolve every time.
        let positions: HashMap<String, usize> = match sink.series_names() {
            Ok(names) => names
                .into_iter()
                .enumerate()
                .map(|(index, name)| (name, index))
                .collect(),
            Err(error) => return Err(Unapplied { rest: batch, error }),
        };

        let mut deltas = 0;
        let mut points = 0;
        let mut batch = batch.into_iter();
        while let Some(delta) = batch.next() {
            for (index, update) in delta.updates.iter().enumerate() {
                let Some(position) = self.resolve(&update.channel_key, &positions) else {
                    continue;
                };
                if !update.value.is_finite() {
                    continue;
                }
                if self
                    .last_applied
                    .get(&update.channel_key)
                    .is_some_and(|last| delta.timestamp_ms <= *last)
                {
                    tracing::debug!(
                        "Skipping out-of-order point for {} at {}",
                        update.channel_key,
                        delta.timestamp_ms
                    );
                    continue;
                }

                let point = TimeSeriesPoint::new(delta.timestamp_ms, update.value);
                if let Err(error) = sink.append_point(position, point) {
                    // Points already appended count even though the batch stopped.
                    self.deltas_applied += deltas as u64;
                    self.points_appended += points as u64;
                    let mut rest = vec![IncrementalDelta {
                        timestamp_ms: delta.timestamp_ms,
                        updates: delta.updates[index..].to_vec(),
                    }];
                    rest.extend(batch);
                    return Err(Unapplied { rest, error });
                }
                self.last_applied
                    .insert(update.channel_key.clone(), delta.timestamp_ms);
                points += 1;
            }
            deltas += 1;
        }
        Ok((deltas, points))
    }

    /// Series position for a channel key. Unknown keys are logged once;
    /// unplotted keys and missing series are skipped quietly.
    fn resolve(&mut self, key: &str, positions: &HashMap<String, usize>) -> Option<usize> {
        match self.plotted.get(key) {
            Some(name) => positions.get(name).copied(),
            None => {
                if !self.unplotted.contains(key) && self.reported_unknown.insert(key.to_string()) {
                    tracing::warn!("Dropping updates for unknown channel {}", key);
                }
                None
            }
        }
    }

    fn requeue(&mut self, batch: Vec<IncrementalDelta>, now: Instant) {
        for delta in batch.into_iter().rev() {
            self.buffer.push_front(delta);
        }
        self.enforce_capacity();
        self.arm(now);
    }

    /// Forget buffered deltas and the per-channel ordering state. Called when
    /// the chart's data is cleared or the chart goes away.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.last_applied.clear();
        self.disarm();
        self.processing = false;
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// True only while an append pass runs. Appending is synchronous, so any
    /// read between calls sees false.
    pub fn is_processing(&self) -> bool {
        self.processing
    }

    pub fn deltas_applied(&self) -> u64 {
        self.deltas_applied
    }

    pub fn points_appended(&self) -> u64 {
        self.points_appended
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }
}
