//! In-process stand-in for the vendor SDK.
//!
//! Devices are keyed by serial. Frames are delivered by calling the
//! registered callback on whichever thread calls [`SimulatedSdk::inject_frame`]
//! or [`SimulatedSdk::emit_frame`], or on a [`Generator`] thread that plays
//! the role of the vendor grab thread. Links can be dropped and restored,
//! individual operations can be made to fail, and every call on a handle that
//! was already released is counted.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, trace};

use super::{CameraSdk, DeviceInfo, FrameCallback, FrameInfo, RawFrame, RawHandle, Transport};
use crate::capture::PixelFormat;
use crate::error::StatusCode;

/// Operations that can be counted and made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimOp {
    Enumerate,
    Open,
    RegisterCallback,
    DeregisterCallback,
    StartGrab,
    StopGrab,
    SaveConfig,
    LoadConfig,
    Close,
}

/// Shape of the synthetic frames a device produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGeometry {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl FrameGeometry {
    pub fn payload_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }
}

impl Default for FrameGeometry {
    fn default() -> Self {
        Self {
            width: 64,
            height: 48,
            format: PixelFormat::Mono8,
        }
    }
}

struct SimDevice {
    info: DeviceInfo,
    geometry: FrameGeometry,
    connected: bool,
    /// Bumped on every link drop; handles from an older epoch are stale
    link_epoch: u64,
    frame_num: u32,
    features: BTreeMap<String, String>,
}

struct SimHandle {
    serial: String,
    link_epoch: u64,
    callback: Option<FrameCallback>,
    grabbing: bool,
}

#[derive(Default)]
struct SimState {
    devices: HashMap<String, SimDevice>,
    handles: HashMap<RawHandle, SimHandle>,
    next_handle: u64,
    failures: HashMap<SimOp, StatusCode>,
    calls: HashMap<SimOp, usize>,
    invalid_handle_uses: usize,
}

impl SimState {
    fn record(&mut self, op: SimOp) -> Option<StatusCode> {
        *self.calls.entry(op).or_default() += 1;
        self.failures.get(&op).copied()
    }

    fn handle_mut(&mut self, handle: RawHandle) -> Result<&mut SimHandle, StatusCode> {
        match self.handles.get_mut(&handle) {
            Some(entry) => Ok(entry),
            None => {
                self.invalid_handle_uses += 1;
                Err(StatusCode::INVALID_HANDLE)
            }
        }
    }

    fn link_up(&self, handle: &SimHandle) -> bool {
        self.devices
            .get(&handle.serial)
            .is_some_and(|d| d.connected && d.link_epoch == handle.link_epoch)
    }

    /// The live (non-stale) handle currently open on `serial`.
    fn live_handle(&self, serial: &str) -> Option<&SimHandle> {
        self.handles
            .values()
            .find(|h| h.serial == serial && self.link_up(h))
    }
}

#[derive(Default)]
pub struct SimulatedSdk {
    state: Mutex<SimState>,
}

impl SimulatedSdk {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_device(&self, serial: &str, geometry: FrameGeometry) {
        self.state().devices.insert(
            serial.to_string(),
            SimDevice {
                info: DeviceInfo {
                    serial: serial.to_string(),
                    model: "SIM-CA050".to_string(),
                    transport: Transport::Usb3,
                },
                geometry,
                connected: true,
                link_epoch: 0,
                frame_num: 0,
                features: BTreeMap::new(),
            },
        );
    }

    /// Drop or restore the physical link. Handles opened before a drop stay
    /// stale after the link comes back and must be reopened.
    pub fn set_link(&self, serial: &str, up: bool) {
        let mut state = self.state();
        let Some(device) = state.devices.get_mut(serial) else {
            return;
        };
        if device.connected == up {
            return;
        }
        device.connected = up;
        if !up {
            device.link_epoch += 1;
        }
        debug!(serial, up, "simulated link changed");
    }

    /// Make every future call of `op` return `code`.
    pub fn fail(&self, op: SimOp, code: StatusCode) {
        self.state().failures.insert(op, code);
    }

    pub fn clear_failure(&self, op: SimOp) {
        self.state().failures.remove(&op);
    }

    pub fn calls(&self, op: SimOp) -> usize {
        self.state().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.state().calls.values().sum()
    }

    /// Calls made with a handle that had already been closed.
    pub fn invalid_handle_uses(&self) -> usize {
        self.state().invalid_handle_uses
    }

    pub fn open_handles(&self, serial: &str) -> usize {
        self.state()
            .handles
            .values()
            .filter(|h| h.serial == serial)
            .count()
    }

    pub fn registered_callbacks(&self, serial: &str) -> usize {
        self.state()
            .handles
            .values()
            .filter(|h| h.serial == serial && h.callback.is_some())
            .count()
    }

    /// Callback registered on the live handle of `serial`, as the vendor
    /// thread would hold it.
    pub fn callback(&self, serial: &str) -> Option<FrameCallback> {
        self.state()
            .live_handle(serial)
            .and_then(|h| h.callback.clone())
    }

    pub fn features(&self, serial: &str) -> BTreeMap<String, String> {
        self.state()
            .devices
            .get(serial)
            .map(|d| d.features.clone())
            .unwrap_or_default()
    }

    pub fn set_feature(&self, serial: &str, key: &str, value: &str) {
        if let Some(device) = self.state().devices.get_mut(serial) {
            device.features.insert(key.to_string(), value.to_string());
        }
    }

    /// Deliver `data` to the live handle of `serial` on the calling thread.
    /// Returns false when nothing is grabbing.
    pub fn inject_frame(&self, serial: &str, data: &[u8], info: FrameInfo) -> bool {
        let callback = {
            let state = self.state();
            match state.live_handle(serial) {
                Some(h) if h.grabbing => h.callback.clone(),
                _ => None,
            }
        };
        let Some(callback) = callback else {
            return false;
        };
        callback(RawFrame { data, info });
        true
    }

    /// Synthesize the next frame for `serial`, filled with its frame number.
    pub fn emit_frame(&self, serial: &str) -> bool {
        let (payload, info) = {
            let mut state = self.state();
            let Some(device) = state.devices.get_mut(serial) else {
                return false;
            };
            device.frame_num = device.frame_num.wrapping_add(1);
            let geometry = device.geometry;
            let info = FrameInfo {
                width: geometry.width,
                height: geometry.height,
                pixel_format: geometry.format.pfnc(),
                frame_num: device.frame_num,
                dev_timestamp: u64::from(device.frame_num) * 1_000,
            };
            (vec![device.frame_num as u8; geometry.payload_len()], info)
        };
        self.inject_frame(serial, &payload, info)
    }

    /// Run a vendor-style grab thread emitting frames at `fps`.
    pub fn spawn_generator(self: &Arc<Self>, serial: &str, fps: u32) -> std::io::Result<Generator> {
        let (stop_tx, stop_rx) = flume::bounded::<()>(0);
        let period = Duration::from_secs(1) / fps.max(1);
        let sdk = Arc::clone(self);
        let serial = serial.to_string();
        let thread = thread::Builder::new()
            .name("sim-grab".into())
            .spawn(move || {
                while let Err(flume::RecvTimeoutError::Timeout) = stop_rx.recv_timeout(period) {
                    if !sdk.emit_frame(&serial) {
                        trace!(serial = %serial, "no grabbing handle, frame skipped");
                    }
                }
            })?;
        Ok(Generator {
            stop: Some(stop_tx),
            thread: Some(thread),
        })
    }
}

/// Running grab thread. Stops and joins on drop.
pub struct Generator {
    stop: Option<flume::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Drop for Generator {
    fn drop(&mut self) {
        // Dropping the sender disconnects the channel and wakes the thread.
        self.stop.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("sim grab thread panicked");
            }
        }
    }
}

fn parse_features(text: &str) -> BTreeMap<String, String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

impl CameraSdk for SimulatedSdk {
    fn enumerate(&self) -> Result<Vec<DeviceInfo>, StatusCode> {
        let mut state = self.state();
        if let Some(code) = state.record(SimOp::Enumerate) {
            return Err(code);
        }
        let mut devices: Vec<_> = state
            .devices
            .values()
            .filter(|d| d.connected)
            .map(|d| d.info.clone())
            .collect();
        devices.sort_by(|a, b| a.serial.cmp(&b.serial));
        Ok(devices)
    }

    fn open(&self, serial: &str) -> Result<RawHandle, StatusCode> {
        let mut state = self.state();
        if let Some(code) = state.record(SimOp::Open) {
            return Err(code);
        }
        let link_epoch = match state.devices.get(serial) {
            Some(d) if d.connected => d.link_epoch,
            _ => return Err(StatusCode::INVALID_PARAMETER),
        };
        if state.live_handle(serial).is_some() {
            return Err(StatusCode::ACCESS_DENIED);
        }

        state.next_handle += 1;
        let handle = RawHandle(state.next_handle);
        state.handles.insert(
            handle,
            SimHandle {
                serial: serial.to_string(),
                link_epoch,
                callback: None,
                grabbing: false,
            },
        );
        Ok(handle)
    }

    fn register_callback(&self, handle: RawHandle, callback: FrameCallback) -> StatusCode {
        let mut state = self.state();
        let failure = state.record(SimOp::RegisterCallback);
        let entry = match state.handle_mut(handle) {
            Ok(entry) => entry,
            Err(code) => return code,
        };
        if let Some(code) = failure {
            return code;
        }
        if entry.grabbing {
            return StatusCode::CALL_ORDER;
        }
        entry.callback = Some(callback);
        StatusCode::OK
    }

    fn deregister_callback(&self, handle: RawHandle) -> StatusCode {
        let mut state = self.state();
        let failure = state.record(SimOp::DeregisterCallback);
        let entry = match state.handle_mut(handle) {
            Ok(entry) => entry,
            Err(code) => return code,
        };
        if let Some(code) = failure {
            return code;
        }
        entry.callback = None;
        StatusCode::OK
    }

    fn start_grab(&self, handle: RawHandle) -> StatusCode {
        let mut state = self.state();
        let failure = state.record(SimOp::StartGrab);
        if let Err(code) = state.handle_mut(handle) {
            return code;
        }
        if let Some(code) = failure {
            return code;
        }
        let link_up = state.handles.get(&handle).is_some_and(|h| state.link_up(h));
        if !link_up {
            return StatusCode::RESOURCE;
        }
        match state.handles.get_mut(&handle) {
            Some(entry) if entry.grabbing => StatusCode::CALL_ORDER,
            Some(entry) => {
                entry.grabbing = true;
                StatusCode::OK
            }
            None => StatusCode::INVALID_HANDLE,
        }
    }

    fn stop_grab(&self, handle: RawHandle) -> StatusCode {
        let mut state = self.state();
        let failure = state.record(SimOp::StopGrab);
        let entry = match state.handle_mut(handle) {
            Ok(entry) => entry,
            Err(code) => return code,
        };
        if let Some(code) = failure {
            return code;
        }
        if !entry.grabbing {
            return StatusCode::CALL_ORDER;
        }
        entry.grabbing = false;
        StatusCode::OK
    }

    fn is_connected(&self, handle: RawHandle) -> bool {
        let mut state = self.state();
        if state.handle_mut(handle).is_err() {
            return false;
        }
        state.handles.get(&handle).is_some_and(|h| state.link_up(h))
    }

    fn save_config(&self, handle: RawHandle, path: &Path) -> StatusCode {
        let mut state = self.state();
        let failure = state.record(SimOp::SaveConfig);
        let serial = match state.handle_mut(handle) {
            Ok(entry) => entry.serial.clone(),
            Err(code) => return code,
        };
        if let Some(code) = failure {
            return code;
        }
        let Some(device) = state.devices.get(&serial) else {
            return StatusCode::INVALID_HANDLE;
        };
        let mut text = format!("# {} {}\n", device.info.model, device.info.serial);
        for (key, value) in &device.features {
            text.push_str(&format!("{key} = {value}\n"));
        }
        match std::fs::write(path, text) {
            Ok(()) => StatusCode::OK,
            Err(_) => StatusCode::RESOURCE,
        }
    }

    fn load_config(&self, handle: RawHandle, path: &Path) -> StatusCode {
        let mut state = self.state();
        let failure = state.record(SimOp::LoadConfig);
        let serial = match state.handle_mut(handle) {
            Ok(entry) => entry.serial.clone(),
            Err(code) => return code,
        };
        if let Some(code) = failure {
            return code;
        }
        let Ok(text) = std::fs::read_to_string(path) else {
            return StatusCode::INVALID_PARAMETER;
        };
        match state.devices.get_mut(&serial) {
            Some(device) => {
                device.features.extend(parse_features(&text));
                StatusCode::OK
            }
            None => StatusCode::INVALID_HANDLE,
        }
    }

    fn close(&self, handle: RawHandle) -> StatusCode {
        let mut state = self.state();
        let failure = state.record(SimOp::Close);
        if let Err(code) = state.handle_mut(handle) {
            return code;
        }
        state.handles.remove(&handle);
        failure.unwrap_or(StatusCode::OK)
    }
}
