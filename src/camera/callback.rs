//! Adapter between the vendor grab thread and the frame ring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::utils::CachePadded;
use tracing::{debug, trace};

use crate::capture::decoder;
use crate::capture::Frame;
use crate::pipeline::FrameSlots;
use crate::sdk::{FrameCallback, RawFrame};

/// Stream generation counter. A callback only delivers while the generation
/// it was built for is current.
#[derive(Default)]
pub(crate) struct CallbackGate {
    generation: AtomicU64,
}

impl CallbackGate {
    /// Open a new generation and return it.
    pub(crate) fn arm(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Retire the current generation.
    pub(crate) fn disarm(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) == generation
    }
}

#[derive(Default)]
pub(crate) struct CaptureStats {
    pub(crate) received: AtomicU64,
    pub(crate) rejected: AtomicU64,
    pub(crate) late: AtomicU64,
    /// Last assigned frame sequence
    pub(crate) sequence: AtomicU64,
}

/// Everything the vendor thread needs, captured by value.
pub(crate) struct CaptureAdapter {
    pub(crate) generation: u64,
    pub(crate) gate: Arc<CallbackGate>,
    pub(crate) slots: Arc<FrameSlots<Frame>>,
    pub(crate) stats: Arc<CachePadded<CaptureStats>>,
}

impl CaptureAdapter {
    pub(crate) fn on_frame(&self, raw: RawFrame<'_>) {
        if !self.gate.is_current(self.generation) {
            self.stats.late.fetch_add(1, Ordering::Relaxed);
            trace!(frame_num = raw.info.frame_num, "frame after stream stop ignored");
            return;
        }
        self.stats.received.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("hikcam_frames_received_total").increment(1);

        let sequence = self.stats.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let frame = match decoder::decode_frame(&raw, sequence) {
            Ok(frame) => frame,
            Err(e) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("hikcam_frames_rejected_total").increment(1);
                debug!(error = %e, "dropping frame");
                return;
            }
        };

        // Re-checked under the ring lock so a concurrent stop or restart
        // cannot interleave between the check and the insert.
        let gate = &self.gate;
        let generation = self.generation;
        if !self
            .slots
            .push_guarded(frame, || gate.is_current(generation))
        {
            self.stats.late.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn into_callback(self) -> FrameCallback {
        Arc::new(move |raw: RawFrame<'_>| self.on_frame(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::PixelFormat;
    use crate::pipeline::OverflowPolicy;
    use crate::sdk::FrameInfo;

    fn adapter(gate: &Arc<CallbackGate>) -> CaptureAdapter {
        CaptureAdapter {
            generation: gate.arm(),
            gate: Arc::clone(gate),
            slots: Arc::new(FrameSlots::new(4, OverflowPolicy::DropOldest)),
            stats: Arc::new(CachePadded::new(CaptureStats::default())),
        }
    }

    fn raw(data: &[u8], frame_num: u32) -> RawFrame<'_> {
        RawFrame {
            data,
            info: FrameInfo {
                width: 2,
                height: 2,
                pixel_format: PixelFormat::Mono8.pfnc(),
                frame_num,
                dev_timestamp: 0,
            },
        }
    }

    #[test]
    fn gate_generations_are_distinct() {
        let gate = CallbackGate::default();
        let first = gate.arm();
        assert!(gate.is_current(first));
        gate.disarm();
        assert!(!gate.is_current(first));
        let second = gate.arm();
        assert!(second > first);
    }

    #[test]
    fn delivers_with_increasing_sequence() {
        let gate = Arc::new(CallbackGate::default());
        let adapter = adapter(&gate);
        adapter.on_frame(raw(&[1; 4], 10));
        adapter.on_frame(raw(&[2; 4], 11));

        let first = adapter.slots.try_pop().unwrap();
        let second = adapter.slots.try_pop().unwrap();
        assert_eq!((first.sequence(), first.meta.frame_num), (1, 10));
        assert_eq!((second.sequence(), second.meta.frame_num), (2, 11));
        assert_eq!(adapter.stats.received.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn bad_frame_is_counted_not_fatal() {
        let gate = Arc::new(CallbackGate::default());
        let adapter = adapter(&gate);
        adapter.on_frame(raw(&[1; 3], 1));
        adapter.on_frame(raw(&[1; 4], 2));
        assert_eq!(adapter.stats.rejected.load(Ordering::Relaxed), 1);
        assert_eq!(adapter.slots.len(), 1);
    }

    #[test]
    fn stale_generation_never_reaches_the_ring() {
        let gate = Arc::new(CallbackGate::default());
        let adapter = adapter(&gate);
        gate.disarm();
        adapter.on_frame(raw(&[1; 4], 1));
        assert!(adapter.slots.is_empty());
        assert_eq!(adapter.stats.late.load(Ordering::Relaxed), 1);
        assert_eq!(adapter.stats.received.load(Ordering::Relaxed), 0);
    }
}
