//! Throttled batching of high-frequency edits
//!
//! A fader sweep or a region drag produces an update per input event. The
//! batcher folds updates for the same key together and releases the queue at
//! most once per interval, so the relay sees a bounded rate while the last
//! value always survives.
//!
//! ```text
//! push(k, v, t0) ── arms deadline t0+T
//! push(k, v', t1) ── coalesces into the queued v
//! poll(t >= t0+T) ── drains [(k, v ⊕ v')], disarms
//! ```

use indexmap::IndexMap;
use rf_core::{
    EffectChain, MarkerUpdate, NoteUpdate, RecordingPreview, RegionDrag, RegionId, RegionUpdate,
    SynthState, TrackUpdate,
};
use std::hash::Hash;
use std::time::{Duration, Instant};

// ═══════════════════════════════════════════════════════════════════════════════
// COALESCING
// ═══════════════════════════════════════════════════════════════════════════════

/// How a queued value absorbs a newer one for the same key
pub trait Coalesce: Sized {
    fn coalesce(&mut self, newer: Self);

    /// Normalization applied before a value is queued
    fn clamp(self) -> Self {
        self
    }
}

impl Coalesce for TrackUpdate {
    fn coalesce(&mut self, newer: Self) {
        self.merge(newer);
    }
}

impl Coalesce for RegionUpdate {
    fn coalesce(&mut self, newer: Self) {
        self.merge(newer);
    }

    fn clamp(self) -> Self {
        self.clamped()
    }
}

impl Coalesce for RegionDrag {
    fn coalesce(&mut self, newer: Self) {
        *self = newer;
    }

    fn clamp(self) -> Self {
        self.clamped()
    }
}

impl Coalesce for SynthState {
    fn coalesce(&mut self, newer: Self) {
        self.merge(newer);
    }
}

impl Coalesce for EffectChain {
    fn coalesce(&mut self, newer: Self) {
        *self = newer;
    }
}

impl Coalesce for MarkerUpdate {
    fn coalesce(&mut self, newer: Self) {
        self.merge(newer);
    }

    fn clamp(self) -> Self {
        self.clamped()
    }
}

impl Coalesce for RecordingPreview {
    fn coalesce(&mut self, newer: Self) {
        *self = newer;
    }
}

/// Queued note edit; keyed by note id, remembers its region
#[derive(Debug, Clone, PartialEq)]
pub struct NoteEdit {
    pub region_id: RegionId,
    pub updates: NoteUpdate,
}

impl Coalesce for NoteEdit {
    fn coalesce(&mut self, newer: Self) {
        self.region_id = newer.region_id;
        self.updates.merge(newer.updates);
    }

    fn clamp(mut self) -> Self {
        self.updates = self.updates.clamped();
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BATCHER
// ═══════════════════════════════════════════════════════════════════════════════

/// Coalescing queue with a single deadline
#[derive(Debug)]
pub struct ThrottledBatcher<K, V> {
    interval: Duration,
    pending: IndexMap<K, V>,
    deadline: Option<Instant>,
}

impl<K, V> ThrottledBatcher<K, V>
where
    K: Eq + Hash,
    V: Coalesce,
{
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            pending: IndexMap::new(),
            deadline: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Queue `value` under `key`, coalescing with anything already queued
    pub fn push(&mut self, key: K, value: V, now: Instant) {
        let value = value.clamp();
        match self.pending.get_mut(&key) {
            Some(queued) => queued.coalesce(value),
            None => {
                self.pending.insert(key, value);
            }
        }
        if self.deadline.is_none() {
            self.deadline = Some(now + self.interval);
        }
    }

    /// Drain if the deadline has passed
    pub fn poll(&mut self, now: Instant) -> Option<Vec<(K, V)>> {
        let deadline = self.deadline?;
        if now < deadline {
            return None;
        }
        let drained = self.flush();
        (!drained.is_empty()).then_some(drained)
    }

    /// Drain everything now, whatever the deadline
    pub fn flush(&mut self) -> Vec<(K, V)> {
        self.deadline = None;
        self.pending.drain(..).collect()
    }

    /// Disarm and drop everything queued; returns how many entries were dropped
    pub fn cancel(&mut self) -> usize {
        self.deadline = None;
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    /// Drop one queued entry
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let removed = self.pending.shift_remove(key);
        if self.pending.is_empty() {
            self.deadline = None;
        }
        removed
    }

    /// Drop queued entries not matching the predicate
    pub fn retain(&mut self, mut keep: impl FnMut(&K, &V) -> bool) {
        self.pending.retain(|k, v| keep(k, v));
        if self.pending.is_empty() {
            self.deadline = None;
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.pending.get(key)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
