//! Contiguous frame arena.
//!
//! One allocation of `frame_limit * frame_samples` samples; slot `i` starts
//! at `i * frame_samples`. Every slot has its own reader/writer guard so
//! copies in and out of a slot never tear, while different slots are
//! written concurrently.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use rawclip_core::memory_budget::BYTES_PER_SAMPLE;
use rawclip_core::{RawClipError, Result};

pub struct CacheArena {
    storage: Box<[UnsafeCell<u16>]>,
    slot_locks: Box<[RwLock<()>]>,
    frame_samples: usize,
    writes: AtomicU64,
}

// SAFETY: the samples of slot `i` are only touched while holding
// `slot_locks[i]`, exclusively for writes and shared for reads, and slots
// never overlap.
unsafe impl Sync for CacheArena {}

impl std::fmt::Debug for CacheArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheArena")
            .field("frame_limit", &self.frame_limit())
            .field("frame_samples", &self.frame_samples)
            .field("writes", &self.write_count())
            .finish()
    }
}

impl CacheArena {
    /// An arena with no slots.
    pub fn empty() -> Self {
        Self {
            storage: Box::new([]),
            slot_locks: Box::new([]),
            frame_samples: 0,
            writes: AtomicU64::new(0),
        }
    }

    /// Allocate `frame_limit` slots of `frame_samples` samples each.
    pub fn allocate(frame_limit: usize, frame_samples: usize) -> Result<Self> {
        let total = frame_limit.checked_mul(frame_samples).ok_or(RawClipError::AllocationError {
            bytes: u64::MAX,
        })?;
        let bytes = (total as u64).saturating_mul(BYTES_PER_SAMPLE as u64);

        let mut storage: Vec<UnsafeCell<u16>> = Vec::new();
        storage
            .try_reserve_exact(total)
            .map_err(|_| RawClipError::AllocationError { bytes })?;
        storage.resize_with(total, || UnsafeCell::new(0));

        let slot_locks = (0..frame_limit).map(|_| RwLock::new(())).collect();

        Ok(Self {
            storage: storage.into_boxed_slice(),
            slot_locks,
            frame_samples,
            writes: AtomicU64::new(0),
        })
    }

    /// Number of slots.
    pub fn frame_limit(&self) -> usize {
        self.slot_locks.len()
    }

    pub fn frame_samples(&self) -> usize {
        self.frame_samples
    }

    /// Arena size in bytes.
    pub fn capacity_bytes(&self) -> u64 {
        (self.storage.len() * BYTES_PER_SAMPLE) as u64
    }

    /// Slot writes since allocation.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Acquire)
    }

    fn slot_ptr(&self, slot: usize) -> *mut u16 {
        let cells = &self.storage[slot * self.frame_samples..(slot + 1) * self.frame_samples];
        UnsafeCell::raw_get(cells.as_ptr())
    }

    /// Copy `src` into `slot` if `still_wanted` holds once the slot is
    /// locked. Returns whether the copy happened.
    pub fn write_slot(&self, slot: usize, src: &[u16], still_wanted: impl FnOnce() -> bool) -> bool {
        let Some(lock) = self.slot_locks.get(slot) else {
            return false;
        };
        if src.len() != self.frame_samples {
            return false;
        }
        let _guard = lock.write();
        if !still_wanted() {
            return false;
        }
        // SAFETY: the slot range lies inside `storage` and the write guard
        // excludes every other reader and writer of this slot.
        let dst = unsafe { std::slice::from_raw_parts_mut(self.slot_ptr(slot), self.frame_samples) };
        dst.copy_from_slice(src);
        self.writes.fetch_add(1, Ordering::Release);
        true
    }

    /// Copy `slot` into `dst` if `valid` holds once the slot is locked.
    /// Returns whether the copy happened.
    pub fn read_slot(&self, slot: usize, dst: &mut [u16], valid: impl FnOnce() -> bool) -> bool {
        let Some(lock) = self.slot_locks.get(slot) else {
            return false;
        };
        if dst.len() != self.frame_samples {
            return false;
        }
        let _guard = lock.read();
        if !valid() {
            return false;
        }
        // SAFETY: the slot range lies inside `storage` and the read guard
        // excludes writers of this slot.
        let src = unsafe { std::slice::from_raw_parts(self.slot_ptr(slot), self.frame_samples) };
        dst.copy_from_slice(src);
        true
    }
}
