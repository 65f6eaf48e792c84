use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::Serialize;

use crate::error::CameraError;

/// Where a camera is in its open/start/stop/close cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum LifecycleState {
    Closed = 0,
    Opened = 1,
    Streaming = 2,
    Stopped = 3,
}

/// Public operations that move the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    Open,
    Start,
    Stop,
    Close,
    /// Feature import/export, which needs a handle but does not move state
    Configure,
}

impl LifecycleState {
    pub fn has_handle(self) -> bool {
        self != LifecycleState::Closed
    }

    /// Check `op` against the current state and return the state it leads to.
    pub(crate) fn guard(self, op: Transition) -> Result<LifecycleState, CameraError> {
        use LifecycleState::*;

        match (self, op) {
            (Closed, Transition::Open) => Ok(Opened),
            (Opened | Stopped, Transition::Start) => Ok(Streaming),
            (Streaming, Transition::Start) => Err(CameraError::AlreadyStreaming),
            (Streaming, Transition::Stop) => Ok(Stopped),
            (Opened | Stopped, Transition::Stop) => Err(CameraError::NotStreaming),
            (Opened | Streaming | Stopped, Transition::Close) => Ok(Closed),
            (Opened | Streaming | Stopped, Transition::Configure) => Ok(self),
            (Closed, _) => Err(CameraError::NotOpen),
            (_, Transition::Open) => Err(CameraError::AlreadyOpen {
                serial: String::new(),
            }),
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => LifecycleState::Opened,
            2 => LifecycleState::Streaming,
            3 => LifecycleState::Stopped,
            _ => LifecycleState::Closed,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Closed => "closed",
            LifecycleState::Opened => "opened",
            LifecycleState::Streaming => "streaming",
            LifecycleState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Lock-free mirror of the session state for readers on the hot path.
/// Only written while the session lock is held.
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new(state: LifecycleState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn load(&self) -> LifecycleState {
        LifecycleState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, state: LifecycleState) {
        self.0.store(state as u8, Ordering::Release);
    }
}
