pub mod ringbuf;

pub use self::ringbuf::{FrameSlots, OverflowPolicy, SlotStats};
