//! Cache state table and request dispatcher.
//!
//! Frame states, the pending request, failure counts, the generation
//! counter and the stop flag all live under one lock (the find lock).
//! Moving a frame from `NotCached` to `BeingCached` only happens under that
//! lock, so at most one worker decodes a given frame at a time.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use rawclip_core::{RawClipError, Result};

/// Decode attempts after which the pool stops claiming a frame.
pub const MAX_DECODE_ATTEMPTS: u32 = 3;

/// Per-frame state within the cache window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheState {
    #[default]
    NotCached,
    BeingCached,
    Cached,
}

/// A frame handed to one worker, tagged with the table generation it was
/// claimed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Claim {
    pub frame: usize,
    pub generation: u64,
}

/// What a waiting reader observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settled {
    Cached,
    /// The frame failed to decode at least once and is not being retried
    Failed,
    Waiting,
}

/// Counts by state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StateCounts {
    pub cached: usize,
    pub in_flight: usize,
    pub failed: usize,
}

#[derive(Debug, Default)]
struct StateInner {
    states: Vec<CacheState>,
    failures: Vec<u32>,
    pending: Option<usize>,
    generation: u64,
    stop: bool,
}

impl StateInner {
    fn claimable(&self, frame: usize) -> bool {
        self.states[frame] == CacheState::NotCached && self.failures[frame] < MAX_DECODE_ATTEMPTS
    }

    fn next_claimable(&self) -> Option<usize> {
        if self.stop {
            return None;
        }
        if let Some(frame) = self.pending {
            if frame < self.states.len() && self.claimable(frame) {
                return Some(frame);
            }
        }
        (0..self.states.len()).find(|&i| self.claimable(i))
    }

    fn settled(&self, frame: usize) -> Option<Settled> {
        match self.states.get(frame) {
            Some(CacheState::Cached) => Some(Settled::Cached),
            Some(CacheState::NotCached) if self.failures[frame] > 0 => Some(Settled::Failed),
            // outside the window, e.g. after a shrink
            None => Some(Settled::Failed),
            _ => None,
        }
    }
}

/// The find lock and the condvar readers wait on for publishes.
#[derive(Debug)]
pub struct StateTable {
    inner: Mutex<StateInner>,
    published: Condvar,
}

fn zeroed<T: Clone + Default>(len: usize) -> Result<Vec<T>> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)
        .map_err(|_| RawClipError::AllocationError {
            bytes: (len * std::mem::size_of::<T>()) as u64,
        })?;
    v.resize(len, T::default());
    Ok(v)
}

impl StateTable {
    pub fn new(frame_limit: usize) -> Result<Self> {
        let table = Self {
            inner: Mutex::new(StateInner::default()),
            published: Condvar::new(),
        };
        table.resize(frame_limit)?;
        Ok(table)
    }

    /// Size of the cache window.
    pub fn len(&self) -> usize {
        self.inner.lock().states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace the table with `frame_limit` fresh entries. Claims from
    /// before the resize become stale.
    pub fn resize(&self, frame_limit: usize) -> Result<()> {
        let states = zeroed(frame_limit)?;
        let failures = zeroed(frame_limit)?;
        let mut inner = self.inner.lock();
        inner.states = states;
        inner.failures = failures;
        inner.pending = None;
        inner.generation += 1;
        self.published.notify_all();
        Ok(())
    }

    /// Drop every entry, leaving an empty window.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.states = Vec::new();
        inner.failures = Vec::new();
        inner.pending = None;
        inner.generation += 1;
        self.published.notify_all();
    }

    /// Take the next frame to decode.
    ///
    /// A pending request wins when its frame is claimable; otherwise the
    /// lowest claimable frame is taken. The pending request is consumed
    /// either way. Returns `None` when the stop flag is set or nothing in
    /// the window is claimable.
    pub fn claim(&self) -> Option<Claim> {
        let mut inner = self.inner.lock();
        let frame = inner.next_claimable();
        inner.pending = None;
        let frame = frame?;
        inner.states[frame] = CacheState::BeingCached;
        Some(Claim {
            frame,
            generation: inner.generation,
        })
    }

    /// Whether a claim would succeed right now.
    pub fn has_claimable(&self) -> bool {
        self.inner.lock().next_claimable().is_some()
    }

    /// Whether `claim` still belongs to the current generation.
    pub fn is_current(&self, claim: Claim) -> bool {
        let inner = self.inner.lock();
        inner.generation == claim.generation
            && inner.states.get(claim.frame) == Some(&CacheState::BeingCached)
    }

    /// Mark a claimed frame cached. Stale claims leave the table alone.
    /// Returns whether the frame was published.
    pub fn publish(&self, claim: Claim) -> bool {
        let mut inner = self.inner.lock();
        let current = inner.generation == claim.generation
            && inner.states.get(claim.frame) == Some(&CacheState::BeingCached);
        if current {
            inner.states[claim.frame] = CacheState::Cached;
        }
        self.published.notify_all();
        current
    }

    /// Return a claimed frame to `NotCached` after a failed decode.
    pub fn abandon(&self, claim: Claim) {
        let mut inner = self.inner.lock();
        if inner.generation == claim.generation
            && inner.states.get(claim.frame) == Some(&CacheState::BeingCached)
        {
            inner.states[claim.frame] = CacheState::NotCached;
            inner.failures[claim.frame] += 1;
        }
        self.published.notify_all();
    }

    /// Mark every frame `NotCached` and forget failures. The allocation is
    /// kept; in-flight claims become stale.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.states.fill(CacheState::NotCached);
        inner.failures.fill(0);
        inner.generation += 1;
        self.published.notify_all();
    }

    /// Ask for `frame` to be decoded next. Last write wins.
    pub fn request(&self, frame: usize) {
        self.inner.lock().pending = Some(frame);
    }

    pub fn pending(&self) -> Option<usize> {
        self.inner.lock().pending
    }

    pub fn state(&self, frame: usize) -> Option<CacheState> {
        self.inner.lock().states.get(frame).copied()
    }

    pub fn failures(&self, frame: usize) -> u32 {
        self.inner.lock().failures.get(frame).copied().unwrap_or(0)
    }

    pub fn set_stop(&self, stop: bool) {
        self.inner.lock().stop = stop;
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.lock().stop
    }

    pub fn counts(&self) -> StateCounts {
        let inner = self.inner.lock();
        let mut counts = StateCounts::default();
        for (state, &failures) in inner.states.iter().zip(&inner.failures) {
            match state {
                CacheState::Cached => counts.cached += 1,
                CacheState::BeingCached => counts.in_flight += 1,
                CacheState::NotCached if failures > 0 => counts.failed += 1,
                CacheState::NotCached => {}
            }
        }
        counts
    }

    /// Wait up to `timeout` for `frame` to be cached or to fail.
    pub fn wait_settled(&self, frame: usize, timeout: Duration) -> Settled {
        let mut inner = self.inner.lock();
        if let Some(settled) = inner.settled(frame) {
            return settled;
        }
        self.published.wait_for(&mut inner, timeout);
        inner.settled(frame).unwrap_or(Settled::Waiting)
    }
}
