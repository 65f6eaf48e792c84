//! Bounded frame ring shared by the vendor callback and the consumer

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crossbeam::utils::CachePadded;
use ringbuf::traits::{Consumer, Observer, Producer, RingBuffer};
use ringbuf::HeapRb;
use serde::{Deserialize, Serialize};

use crate::capture::Frame;

/// What happens to a push when every slot is occupied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest unread frame to admit the new one
    #[default]
    DropOldest,
    /// Keep what is queued and discard the incoming frame
    DropNewest,
}

/// Fixed-capacity FIFO of the most recent frames.
///
/// Single producer (the capture callback), single consumer (`get_image`).
/// Both ends take a short lock scoped to one ring operation and never wait
/// on anything else.
pub struct FrameSlots<T = Frame> {
    ring: Mutex<HeapRb<T>>,

    policy: OverflowPolicy,

    /// Statistics
    stats: CachePadded<Stats>,
}

#[derive(Default)]
struct Stats {
    frames_written: AtomicU64,
    frames_read: AtomicU64,
    frames_dropped: AtomicU64,
}

/// Snapshot of the ring counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SlotStats {
    pub written: u64,
    pub read: u64,
    pub dropped: u64,
}

impl<T> FrameSlots<T> {
    /// `capacity` is clamped to at least one slot.
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            ring: Mutex::new(HeapRb::new(capacity.max(1))),
            policy,
            stats: CachePadded::new(Stats::default()),
        }
    }

    fn ring(&self) -> MutexGuard<'_, HeapRb<T>> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Producer: insert a frame, never blocking and never failing.
    pub fn push(&self, frame: T) {
        self.push_guarded(frame, || true);
    }

    /// Producer: insert a frame only if `admit` holds at the moment of
    /// insertion. `admit` runs under the ring lock, so it is ordered against
    /// `clear` and `try_pop`.
    pub fn push_guarded(&self, frame: T, admit: impl FnOnce() -> bool) -> bool {
        let mut ring = self.ring();
        if !admit() {
            return false;
        }

        let dropped = match self.policy {
            OverflowPolicy::DropOldest => ring.push_overwrite(frame).is_some(),
            OverflowPolicy::DropNewest => ring.try_push(frame).is_err(),
        };
        drop(ring);

        if dropped {
            self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("hikcam_frames_overwritten_total").increment(1);
        }
        if !dropped || self.policy == OverflowPolicy::DropOldest {
            self.stats.frames_written.fetch_add(1, Ordering::Relaxed);
        }
        true
    }

    /// Consumer: take the oldest frame, or `None` when empty.
    pub fn try_pop(&self) -> Option<T> {
        let frame = self.ring().try_pop()?;
        self.stats.frames_read.fetch_add(1, Ordering::Relaxed);
        Some(frame)
    }

    /// Discard every queued frame, returning how many were removed.
    pub fn clear(&self) -> usize {
        let mut ring = self.ring();
        let mut removed = 0;
        while ring.try_pop().is_some() {
            removed += 1;
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.ring().occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.ring().capacity().get()
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    pub fn stats(&self) -> SlotStats {
        SlotStats {
            written: self.stats.frames_written.load(Ordering::Relaxed),
            read: self.stats.frames_read.load(Ordering::Relaxed),
            dropped: self.stats.frames_dropped.load(Ordering::Relaxed),
        }
    }
}
