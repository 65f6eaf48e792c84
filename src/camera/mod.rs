//! Pull-based camera front end.
//!
//! [`Camera`] owns one device session. The vendor SDK pushes frames on its
//! own thread into a small ring; the consumer pulls them with
//! [`Camera::get_image`] without blocking. A watchdog thread runs for the
//! duration of each stream and tries to reopen the device after a link loss.
//!
//! Lifecycle operations are serialized by one session lock. The ring has its
//! own lock, so frame delivery never waits behind open/start/stop/close.

mod callback;
mod handle;
mod state;
mod watchdog;

pub use state::LifecycleState;

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use arc_swap::ArcSwap;
use crossbeam::utils::CachePadded;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use self::callback::{CallbackGate, CaptureAdapter, CaptureStats};
use self::handle::DeviceHandle;
use self::state::{StateCell, Transition};
use self::watchdog::{LinkStats, Watchdog};
use crate::capture::Frame;
use crate::error::{CameraError, SdkError};
use crate::pipeline::FrameSlots;
use crate::sdk::CameraSdk;
use crate::{Config, WatchdogConfig};

pub(crate) struct Session<S: CameraSdk> {
    state: LifecycleState,
    handle: Option<DeviceHandle<S>>,
    serial: String,
    /// Feature file re-applied when the watchdog reopens the device
    feature_file: Option<PathBuf>,
    watchdog: Option<Watchdog>,
}

pub(crate) struct Shared<S: CameraSdk> {
    sdk: Arc<S>,
    session: Mutex<Session<S>>,
    state: StateCell,
    slots: Arc<FrameSlots<Frame>>,
    gate: Arc<CallbackGate>,
    capture: Arc<CachePadded<CaptureStats>>,
    link: LinkStats,
    watchdog_config: ArcSwap<WatchdogConfig>,
    require_feature_import: bool,
}

impl<S: CameraSdk> Shared<S> {
    fn session(&self) -> MutexGuard<'_, Session<S>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, session: &mut Session<S>, state: LifecycleState) {
        session.state = state;
        self.state.store(state);
    }

    fn adapter(&self, generation: u64) -> CaptureAdapter {
        CaptureAdapter {
            generation,
            gate: Arc::clone(&self.gate),
            slots: Arc::clone(&self.slots),
            stats: Arc::clone(&self.capture),
        }
    }

    /// Open `serial` again and re-apply its feature file, best effort.
    fn reopen(
        &self,
        serial: &str,
        feature_file: Option<&Path>,
    ) -> Result<DeviceHandle<S>, SdkError> {
        let fresh = DeviceHandle::open(Arc::clone(&self.sdk), serial)?;
        if let Some(path) = feature_file {
            if let Err(e) = fresh.load_config(path) {
                warn!(path = %path.display(), error = %e, "feature import after reopen failed");
            }
        }
        Ok(fresh)
    }

    /// Release a handle whose link went away. Failures are expected here.
    fn retire(stale: DeviceHandle<S>) {
        if let Err(e) = stale.deregister_callback() {
            debug!(serial = stale.serial(), error = %e, "deregister on stale handle");
        }
        if let Err(e) = stale.release() {
            debug!(error = %e, "release of stale handle");
        }
    }

    /// Stop delivery on `handle` without failing: used by close and by the
    /// dead-link path of stop.
    fn halt(&self, handle: &DeviceHandle<S>) {
        self.gate.disarm();
        if let Err(e) = handle.stop_grab() {
            debug!(error = %e, "stop_grab during halt");
        }
        if let Err(e) = handle.deregister_callback() {
            warn!(error = %e, "failed to deregister frame callback");
        }
    }
}

/// Counters describing one camera since construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CameraStats {
    pub state: LifecycleState,
    /// Frames handed to the callback while streaming
    pub frames_received: u64,
    /// Frames that failed conversion
    pub frames_rejected: u64,
    /// Callbacks that arrived after their stream was stopped
    pub frames_late: u64,
    /// Frames evicted or refused by a full ring
    pub frames_overwritten: u64,
    /// Frames returned by `get_image`
    pub frames_delivered: u64,
    pub queued: usize,
    pub disconnects: u64,
    pub reconnects: u64,
}

/// A single machine-vision camera exposed as a non-blocking image source.
pub struct Camera<S: CameraSdk> {
    shared: Arc<Shared<S>>,
}

impl<S: CameraSdk> Camera<S> {
    pub fn new(sdk: Arc<S>, config: &Config) -> Self {
        Self {
            shared: Arc::new(Shared {
                sdk,
                session: Mutex::new(Session {
                    state: LifecycleState::Closed,
                    handle: None,
                    serial: String::new(),
                    feature_file: None,
                    watchdog: None,
                }),
                state: StateCell::new(LifecycleState::Closed),
                slots: Arc::new(FrameSlots::new(
                    config.buffer.capacity,
                    config.buffer.overflow,
                )),
                gate: Arc::new(CallbackGate::default()),
                capture: Arc::new(CachePadded::new(CaptureStats::default())),
                link: LinkStats::default(),
                watchdog_config: ArcSwap::from_pointee(config.watchdog.clone()),
                require_feature_import: config.camera.require_feature_import,
            }),
        }
    }

    /// Open the device with serial `serial` and optionally import a
    /// feature file into it.
    #[instrument(skip(self, feature_file))]
    pub fn open(&self, serial: &str, feature_file: Option<&Path>) -> Result<(), CameraError> {
        let shared = &self.shared;
        let mut session = shared.session();
        let next = match session.state.guard(Transition::Open) {
            Ok(next) => next,
            Err(CameraError::AlreadyOpen { .. }) => {
                debug!(open = %session.serial, "open rejected");
                return Err(CameraError::AlreadyOpen {
                    serial: session.serial.clone(),
                });
            }
            Err(e) => return Err(e),
        };

        let handle = DeviceHandle::open(Arc::clone(&shared.sdk), serial).map_err(|e| {
            warn!(error = %e, "failed to open camera");
            e
        })?;

        if let Some(path) = feature_file {
            match handle.load_config(path) {
                Ok(()) => info!(path = %path.display(), "imported feature file"),
                Err(e) if shared.require_feature_import => {
                    warn!(path = %path.display(), error = %e, "feature import failed, closing");
                    if let Err(close_err) = handle.release() {
                        warn!(error = %close_err, "failed to release camera");
                    }
                    return Err(e.into());
                }
                Err(e) => warn!(
                    path = %path.display(),
                    error = %e,
                    "feature import failed, keeping device defaults"
                ),
            }
        }

        session.handle = Some(handle);
        session.serial = serial.to_string();
        session.feature_file = feature_file.map(Path::to_path_buf);
        shared.set_state(&mut session, next);
        info!("camera opened");
        Ok(())
    }

    /// Register the frame callback, start grabbing and spawn the watchdog.
    #[instrument(skip_all)]
    pub fn start(&self) -> Result<(), CameraError> {
        let shared = &self.shared;
        let mut session = shared.session();
        let next = session.state.guard(Transition::Start).map_err(|e| {
            debug!(state = %session.state, "start rejected");
            e
        })?;
        if session.handle.as_ref().is_some_and(|h| !h.is_connected()) {
            let fresh = shared
                .reopen(&session.serial, session.feature_file.as_deref())
                .map_err(|e| {
                    warn!(error = %e, "device link is down and reopen failed");
                    e
                })?;
            if let Some(stale) = session.handle.replace(fresh) {
                Shared::retire(stale);
            }
            info!(serial = %session.serial, "reopened camera before start");
        }
        let Some(handle) = session.handle.as_ref() else {
            return Err(CameraError::NotOpen);
        };

        shared.slots.clear();
        let generation = shared.gate.arm();

        if let Err(e) = handle.register_callback(shared.adapter(generation).into_callback()) {
            shared.gate.disarm();
            warn!(error = %e, "failed to register frame callback");
            return Err(e.into());
        }
        if let Err(e) = handle.start_grab() {
            shared.gate.disarm();
            warn!(error = %e, "failed to start grabbing");
            if let Err(e) = handle.deregister_callback() {
                warn!(error = %e, "failed to deregister frame callback");
            }
            return Err(e.into());
        }

        let watchdog = match Watchdog::spawn(Arc::clone(shared), generation) {
            Ok(watchdog) => watchdog,
            Err(e) => {
                shared.halt(handle);
                return Err(CameraError::Watchdog(e));
            }
        };

        session.watchdog = Some(watchdog);
        shared.set_state(&mut session, next);
        info!(
            serial = %session.serial,
            generation,
            capacity = shared.slots.capacity(),
            policy = ?shared.slots.policy(),
            "stream started"
        );
        Ok(())
    }

    /// Pull the oldest buffered frame. Never blocks; `None` covers an empty
    /// ring, a closed camera and a device outage alike.
    pub fn get_image(&self) -> Option<Frame> {
        if self.shared.state.load() == LifecycleState::Closed {
            return None;
        }
        self.shared.slots.try_pop()
    }

    /// Stop grabbing and join the watchdog. Frames still queued stay
    /// available to `get_image`.
    #[instrument(skip_all)]
    pub fn stop(&self) -> Result<(), CameraError> {
        let shared = &self.shared;
        let watchdog = {
            let mut session = shared.session();
            let next = session.state.guard(Transition::Stop).map_err(|e| {
                debug!(state = %session.state, "stop rejected");
                e
            })?;
            let Some(handle) = session.handle.as_ref() else {
                return Err(CameraError::NotOpen);
            };

            match handle.stop_grab() {
                Ok(()) => {
                    shared.gate.disarm();
                    if let Err(e) = handle.deregister_callback() {
                        warn!(error = %e, "failed to deregister frame callback");
                    }
                }
                // A dead link has nothing left to stop.
                Err(e) if !handle.is_connected() => {
                    debug!(error = %e, "stop_grab on a disconnected device");
                    shared.halt(handle);
                }
                Err(e) => {
                    warn!(error = %e, "failed to stop grabbing");
                    return Err(e.into());
                }
            }

            shared.set_state(&mut session, next);
            session.watchdog.take()
        };

        if let Some(watchdog) = watchdog {
            watchdog.shutdown();
        }
        info!(queued = shared.slots.len(), "stream stopped");
        Ok(())
    }

    /// Release the device. The camera ends up closed even when the SDK
    /// reports a failing release; that failure is still returned.
    #[instrument(skip_all)]
    pub fn close(&self) -> Result<(), CameraError> {
        let shared = &self.shared;
        let (watchdog, released) = {
            let mut session = shared.session();
            session.state.guard(Transition::Close).map_err(|e| {
                debug!(state = %session.state, "close rejected");
                e
            })?;

            if session.state == LifecycleState::Streaming {
                if let Some(handle) = session.handle.as_ref() {
                    shared.halt(handle);
                }
            }
            let watchdog = session.watchdog.take();
            let released = match session.handle.take() {
                Some(handle) => handle.release(),
                None => Ok(()),
            };
            shared.slots.clear();
            shared.set_state(&mut session, LifecycleState::Closed);
            (watchdog, released)
        };

        if let Some(watchdog) = watchdog {
            watchdog.shutdown();
        }
        match released {
            Ok(()) => {
                info!("camera closed");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "camera closed, release reported a failure");
                Err(e.into())
            }
        }
    }

    /// Ask the device whether its link is up. False when no handle is held.
    pub fn is_connected(&self) -> bool {
        if !self.state().has_handle() {
            return false;
        }
        self.shared
            .session()
            .handle
            .as_ref()
            .is_some_and(|handle| handle.is_connected())
    }

    /// Save the device's current features to `path`.
    pub fn export_config(&self, path: impl AsRef<Path>) -> Result<(), CameraError> {
        let path = path.as_ref();
        let session = self.shared.session();
        session.state.guard(Transition::Configure)?;
        let Some(handle) = session.handle.as_ref() else {
            return Err(CameraError::NotOpen);
        };
        match handle.save_config(path) {
            Ok(()) => {
                info!(serial = %session.serial, path = %path.display(), "saved configuration");
                Ok(())
            }
            Err(e) => {
                warn!(serial = %session.serial, path = %path.display(), error = %e, "failed to save configuration");
                Err(e.into())
            }
        }
    }

    /// Load features from `path` into the device. On success the file also
    /// becomes the one re-applied after a reconnect.
    pub fn import_config(&self, path: impl AsRef<Path>) -> Result<(), CameraError> {
        let path = path.as_ref();
        let mut session = self.shared.session();
        session.state.guard(Transition::Configure)?;
        let Some(handle) = session.handle.as_ref() else {
            return Err(CameraError::NotOpen);
        };
        if let Err(e) = handle.load_config(path) {
            warn!(serial = %session.serial, path = %path.display(), error = %e, "failed to import configuration");
            return Err(e.into());
        }
        info!(serial = %session.serial, path = %path.display(), "imported configuration");
        session.feature_file = Some(path.to_path_buf());
        Ok(())
    }

    /// Serial of the most recently opened device, empty before the first open.
    pub fn serial_number(&self) -> String {
        self.shared.session().serial.clone()
    }

    pub fn state(&self) -> LifecycleState {
        self.shared.state.load()
    }

    /// Replace the watchdog settings; a running watchdog applies them on its
    /// next cycle.
    pub fn set_watchdog_config(&self, config: WatchdogConfig) {
        self.shared.watchdog_config.store(Arc::new(config));
    }

    pub fn stats(&self) -> CameraStats {
        let shared = &self.shared;
        let slots = shared.slots.stats();
        CameraStats {
            state: shared.state.load(),
            frames_received: shared.capture.received.load(Ordering::Relaxed),
            frames_rejected: shared.capture.rejected.load(Ordering::Relaxed),
            frames_late: shared.capture.late.load(Ordering::Relaxed),
            frames_overwritten: slots.dropped,
            frames_delivered: slots.read,
            queued: shared.slots.len(),
            disconnects: shared.link.disconnects.load(Ordering::Relaxed),
            reconnects: shared.link.reconnects.load(Ordering::Relaxed),
        }
    }
}

impl<S: CameraSdk> Drop for Camera<S> {
    fn drop(&mut self) {
        if self.state() == LifecycleState::Closed {
            return;
        }
        if let Err(e) = self.close() {
            debug!(error = %e, "close on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdk::sim::{FrameGeometry, SimOp, SimulatedSdk};

    fn camera() -> (Arc<SimulatedSdk>, Camera<SimulatedSdk>) {
        let sdk = Arc::new(SimulatedSdk::new());
        sdk.add_device("C1", FrameGeometry::default());
        let camera = Camera::new(Arc::clone(&sdk), &Config::default());
        (sdk, camera)
    }

    #[test]
    fn open_twice_names_the_open_device() {
        let (_sdk, camera) = camera();
        camera.open("C1", None).unwrap();
        let err = camera.open("C1", None).unwrap_err();
        assert!(matches!(err, CameraError::AlreadyOpen { ref serial } if serial == "C1"));
        assert_eq!(camera.state(), LifecycleState::Opened);
    }

    #[test]
    fn failed_start_grab_leaves_state_and_registration_clean() {
        let (sdk, camera) = camera();
        camera.open("C1", None).unwrap();
        sdk.fail(SimOp::StartGrab, crate::StatusCode::RESOURCE);

        let err = camera.start().unwrap_err();
        assert_eq!(err.status(), Some(crate::StatusCode::RESOURCE));
        assert_eq!(camera.state(), LifecycleState::Opened);
        assert_eq!(sdk.registered_callbacks("C1"), 0);

        sdk.clear_failure(SimOp::StartGrab);
        camera.start().unwrap();
        assert_eq!(camera.state(), LifecycleState::Streaming);
    }

    #[test]
    fn failed_stop_on_live_link_keeps_streaming() {
        let (sdk, camera) = camera();
        camera.open("C1", None).unwrap();
        camera.start().unwrap();
        sdk.fail(SimOp::StopGrab, crate::StatusCode::UNKNOWN);

        assert!(camera.stop().is_err());
        assert_eq!(camera.state(), LifecycleState::Streaming);
        assert!(sdk.emit_frame("C1"));

        sdk.clear_failure(SimOp::StopGrab);
        camera.stop().unwrap();
        assert_eq!(camera.state(), LifecycleState::Stopped);
    }

    #[test]
    fn drop_closes_a_streaming_camera() {
        let (sdk, camera) = camera();
        camera.open("C1", None).unwrap();
        camera.start().unwrap();
        drop(camera);
        assert_eq!(sdk.open_handles("C1"), 0);
        assert_eq!(sdk.invalid_handle_uses(), 0);
    }

    #[test]
    fn stats_track_the_frame_path() {
        let (sdk, camera) = camera();
        camera.open("C1", None).unwrap();
        camera.start().unwrap();
        for _ in 0..6 {
            sdk.emit_frame("C1");
        }
        assert!(camera.get_image().is_some());

        let stats = camera.stats();
        assert_eq!(stats.state, LifecycleState::Streaming);
        assert_eq!(stats.frames_received, 6);
        assert_eq!(stats.frames_overwritten, 2);
        assert_eq!(stats.frames_delivered, 1);
        assert_eq!(stats.queued, 3);
    }
}
