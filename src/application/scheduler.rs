// Batch update scheduler - per-frame, last-write-wins coalescing across chart instances
use serde::Serialize;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use tokio::time::{Duration, Instant};

/// Upper bound on back-to-back follow-up drains within one frame.
const MAX_FOLLOW_UP_DRAINS: usize = 8;

pub type UpdateCallback<P> = Rc<RefCell<dyn FnMut(P)>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub enable_batching: bool,
    pub max_batch_size: usize,
    pub throttle: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            enable_batching: true,
            max_batch_size: 50,
            throttle: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct QueueStatus {
    pub queue_length: usize,
    pub is_processing: bool,
    pub registered_instances: usize,
}

struct Inbox<P> {
    scheduled: Vec<(String, P)>,
    unregistered: Vec<String>,
}

/// Cloneable handle for scheduling from inside a callback while a drain runs.
pub struct ScheduleHandle<P> {
    inbox: Rc<RefCell<Inbox<P>>>,
}

impl<P> Clone for ScheduleHandle<P> {
    fn clone(&self) -> Self {
        Self {
            inbox: Rc::clone(&self.inbox),
        }
    }
}

impl<P> ScheduleHandle<P> {
    pub fn schedule(&self, instance_id: &str, payload: P) {
        self.inbox
            .borrow_mut()
            .scheduled
            .push((instance_id.to_string(), payload));
    }

    /// Takes effect before the next callback invocation, even mid-drain.
    pub fn unregister(&self, instance_id: &str) {
        self.inbox
            .borrow_mut()
            .unregistered
            .push(instance_id.to_string());
    }
}

pub struct BatchUpdateScheduler<P> {
    settings: SchedulerSettings,
    callbacks: HashMap<String, UpdateCallback<P>>,
    queue: Vec<(String, P)>,
    first_enqueued: Option<Instant>,
    drain_requested: bool,
    processing: bool,
    inbox: Rc<RefCell<Inbox<P>>>,
    drains: u64,
    invocations: u64,
    superseded: u64,
}

impl<P> BatchUpdateScheduler<P> {
    pub fn new(settings: SchedulerSettings) -> Self {
        Self {
            settings,
            callbacks: HashMap::new(),
            queue: Vec::new(),
            first_enqueued: None,
            drain_requested: false,
            processing: false,
            inbox: Rc::new(RefCell::new(Inbox {
                scheduled: Vec::new(),
                unregistered: Vec::new(),
            })),
            drains: 0,
            invocations: 0,
            superseded: 0,
        }
    }

    pub fn handle(&self) -> ScheduleHandle<P> {
        ScheduleHandle {
            inbox: Rc::clone(&self.inbox),
        }
    }

    pub fn register(&mut self, instance_id: &str, callback: UpdateCallback<P>) {
        if self
            .callbacks
            .insert(instance_id.to_string(), callback)
            .is_some()
        {
            tracing::debug!("Replaced update callback for {}", instance_id);
        }
    }

    /// Idempotent. Queued updates for the instance are discarded.
    pub fn unregister(&mut self, instance_id: &str) -> bool {
        self.queue.retain(|(id, _)| id != instance_id);
        if self.queue.is_empty() {
            self.first_enqueued = None;
        }
        self.callbacks.remove(instance_id).is_some()
    }

    pub fn is_registered(&self, instance_id: &str) -> bool {
        self.callbacks.contains_key(instance_id)
    }

    /// Enqueue an update. Returns immediately; with batching disabled the
    /// callback runs before this returns.
    pub fn schedule(&mut self, instance_id: &str, payload: P, now: Instant) {
        if !self.settings.enable_batching {
            self.invoke(instance_id, payload);
            return;
        }
        self.queue.push((instance_id.to_string(), payload));
        self.first_enqueued.get_or_insert(now);
        if self.queue.len() >= self.settings.max_batch_size {
            self.drain_requested = true;
        }
    }

    /// When the throttle expires for the oldest unflushed entry.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.first_enqueued.map(|t| t + self.settings.throttle)
    }

    pub fn drain_requested(&self) -> bool {
        self.drain_requested
    }

    /// Frame boundary. Drains if the size cap or throttle asked for it and
    /// returns the number of callbacks invoked.
    pub fn on_frame(&mut self, now: Instant) -> usize {
        self.collect_inbox(now);
        if self.next_deadline().is_some_and(|d| d <= now) {
            self.drain_requested = true;
        }
        if !self.drain_requested {
            return 0;
        }
        self.drain(now)
    }

    /// Drain everything now, regardless of cap and throttle.
    pub fn flush(&mut self, now: Instant) -> usize {
        self.collect_inbox(now);
        self.drain(now)
    }

    /// Drop queued updates without invoking anything.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.inbox.borrow_mut().scheduled.clear();
        self.first_enqueued = None;
        self.drain_requested = false;
    }

    pub fn settings(&self) -> SchedulerSettings {
        self.settings
    }

    /// Switching batching off flushes whatever is queued.
    pub fn update_settings(&mut self, settings: SchedulerSettings, now: Instant) {
        self.settings = settings;
        if !settings.enable_batching {
            self.flush(now);
        } else if self.queue.len() >= settings.max_batch_size {
            self.drain_requested = true;
        }
    }

    pub fn status(&self) -> QueueStatus {
        QueueStatus {
            queue_length: self.queue.len(),
            is_processing: self.processing,
            registered_instances: self.callbacks.len(),
        }
    }

    pub fn drains(&self) -> u64 {
        self.drains
    }

    pub fn invocations(&self) -> u64 {
        self.invocations
    }

    pub fn superseded(&self) -> u64 {
        self.superseded
    }

    fn drain(&mut self, now: Instant) -> usize {
        self.processing = true;
        let mut invoked = 0;
        for _ in 0..MAX_FOLLOW_UP_DRAINS {
            let entries = std::mem::take(&mut self.queue);
            self.first_enqueued = None;
            self.drain_requested = false;
            if entries.is_empty() {
                break;
            }
            self.drains += 1;

            let total = entries.len();
            let coalesced = coalesce(entries);
            self.superseded += (total - coalesced.len()) as u64;
            for (instance_id, payload) in coalesced {
                invoked += usize::from(self.invoke(&instance_id, payload));
            }

            // Updates scheduled during this pass go out in a follow-up pass.
            self.collect_inbox(now);
        }
        if !self.queue.is_empty() {
            tracing::warn!(
                "Scheduler still has {} queued updates after {} drains",
                self.queue.len(),
                MAX_FOLLOW_UP_DRAINS
            );
            self.drain_requested = true;
        }
        self.processing = false;
        invoked
    }

    fn invoke(&mut self, instance_id: &str, payload: P) -> bool {
        self.apply_unregistrations();
        let Some(callback) = self.callbacks.get(instance_id).cloned() else {
            tracing::debug!("No update callback registered for {}", instance_id);
            return false;
        };
        let mut callback = callback.borrow_mut();
        (&mut *callback)(payload);
        self.invocations += 1;
        true
    }

    fn apply_unregistrations(&mut self) {
        let removed = std::mem::take(&mut self.inbox.borrow_mut().unregistered);
        for instance_id in removed {
            self.unregister(&instance_id);
        }
    }

    fn collect_inbox(&mut self, now: Instant) {
        self.apply_unregistrations();
        let scheduled = std::mem::take(&mut self.inbox.borrow_mut().scheduled);
        for (instance_id, payload) in scheduled {
            self.schedule(&instance_id, payload, now);
        }
    }
}

/// Latest payload per instance, ordered by each instance's first appearance.
fn coalesce<P>(entries: Vec<(String, P)>) -> Vec<(String, P)> {
    let mut slots: BTreeMap<String, usize> = BTreeMap::new();
    let mut latest: Vec<(String, P)> = Vec::new();
    for (instance_id, payload) in entries {
        match slots.get(&instance_id) {
            Some(&slot) => latest[slot].1 = payload,
            None => {
                slots.insert(instance_id.clone(), latest.len());
                latest.push((instance_id, payload));
            }
        }
    }
    latest
}
