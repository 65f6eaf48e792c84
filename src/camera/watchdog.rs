//! Connectivity watchdog, one thread per running stream.
//!
//! The thread wakes every poll interval, asks the device whether its link is
//! up and, after a loss, tries a bounded number of quick reopens before
//! falling back to a slow retry interval. Every touch of the device goes
//! through the session lock and first re-checks that the stream it was
//! spawned for is still the current one, so a concurrent stop or close
//! always wins.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::{LifecycleState, Shared};
use crate::error::SdkError;
use crate::sdk::CameraSdk;

#[derive(Default)]
pub(crate) struct LinkStats {
    pub(crate) disconnects: AtomicU64,
    pub(crate) reconnects: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Probe {
    Connected,
    Disconnected,
    /// The stream this watchdog belongs to has ended
    Retired,
}

impl<S: CameraSdk> Shared<S> {
    fn is_current(&self, state: LifecycleState, generation: u64) -> bool {
        state == LifecycleState::Streaming && self.gate.is_current(generation)
    }

    pub(crate) fn probe(&self, generation: u64) -> Probe {
        let session = self.session();
        if !self.is_current(session.state, generation) {
            return Probe::Retired;
        }
        match session.handle.as_ref() {
            Some(handle) if handle.is_connected() => Probe::Connected,
            Some(_) => Probe::Disconnected,
            None => Probe::Retired,
        }
    }

    /// Reopen the device and resume grabbing on a fresh handle. Returns
    /// `Ok(false)` when the stream ended in the meantime.
    ///
    /// The stale handle is only released once the fresh one is grabbing, so
    /// a failed attempt leaves the session exactly as it was.
    pub(crate) fn recover(&self, generation: u64) -> Result<bool, SdkError> {
        let mut session = self.session();
        if !self.is_current(session.state, generation) {
            return Ok(false);
        }

        let fresh = self.reopen(&session.serial, session.feature_file.as_deref())?;
        fresh.register_callback(self.adapter(generation).into_callback())?;
        fresh.start_grab()?;

        if let Some(stale) = session.handle.replace(fresh) {
            Shared::retire(stale);
        }
        Ok(true)
    }
}

/// Handle to a running watchdog thread. Dropping it signals the thread and
/// waits for it to exit.
pub(crate) struct Watchdog {
    stop: Option<flume::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Watchdog {
    pub(crate) fn spawn<S: CameraSdk>(shared: Arc<Shared<S>>, generation: u64) -> io::Result<Self> {
        let (stop_tx, stop_rx) = flume::bounded::<()>(0);
        let thread = thread::Builder::new()
            .name("hikcam-watchdog".into())
            .spawn(move || run(&shared, generation, &stop_rx))?;
        Ok(Self {
            stop: Some(stop_tx),
            thread: Some(thread),
        })
    }

    /// Signal the thread and join it.
    pub(crate) fn shutdown(self) {
        drop(self);
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop.take();
        let Some(thread) = self.thread.take() else {
            return;
        };
        if thread.thread().id() == thread::current().id() {
            return;
        }
        if thread.join().is_err() {
            error!("watchdog thread panicked");
        }
    }
}

/// Reconnect bookkeeping for one link loss.
#[derive(Debug, Default)]
struct Outage {
    attempts: u32,
    /// Fast attempts used up, now retrying every slow interval
    exhausted: bool,
}

/// Wait up to `wait` for the stop signal. A disconnected channel counts as
/// a stop.
fn cancelled(stop: &flume::Receiver<()>, wait: Duration) -> bool {
    !matches!(
        stop.recv_timeout(wait),
        Err(flume::RecvTimeoutError::Timeout)
    )
}

fn run<S: CameraSdk>(shared: &Shared<S>, generation: u64, stop: &flume::Receiver<()>) {
    debug!(generation, "watchdog started");
    metrics::gauge!("hikcam_connected").set(1.0);

    let mut outage: Option<Outage> = None;

    loop {
        let config = shared.watchdog_config.load_full();
        if cancelled(stop, config.poll_interval()) {
            break;
        }

        match shared.probe(generation) {
            Probe::Retired => break,
            Probe::Connected => {
                if outage.take().is_some() {
                    info!("camera link restored");
                    metrics::gauge!("hikcam_connected").set(1.0);
                }
            }
            Probe::Disconnected => {
                let current = outage.get_or_insert_with(|| {
                    shared.link.disconnects.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("hikcam_disconnects_total").increment(1);
                    metrics::gauge!("hikcam_connected").set(0.0);
                    warn!("camera disconnected");
                    Outage::default()
                });

                let wait = if current.attempts < config.max_reconnect_attempts {
                    current.attempts += 1;
                    if current.attempts > 1 {
                        config.reconnect_backoff()
                    } else {
                        Duration::ZERO
                    }
                } else {
                    if !current.exhausted {
                        current.exhausted = true;
                        error!(
                            attempts = current.attempts,
                            slow_retry_ms = config.slow_retry_ms,
                            "reconnect attempts exhausted"
                        );
                    }
                    match config.slow_retry() {
                        Some(wait) => wait,
                        None => continue,
                    }
                };
                if !wait.is_zero() && cancelled(stop, wait) {
                    break;
                }

                match shared.recover(generation) {
                    Ok(true) => {
                        shared.link.reconnects.fetch_add(1, Ordering::Relaxed);
                        metrics::counter!("hikcam_reconnects_total").increment(1);
                        metrics::gauge!("hikcam_connected").set(1.0);
                        info!(attempts = current.attempts, "camera reconnected");
                        outage = None;
                    }
                    Ok(false) => break,
                    Err(e) if current.exhausted => {
                        debug!(error = %e, "slow reconnect attempt failed")
                    }
                    Err(e) => {
                        warn!(attempt = current.attempts, error = %e, "reconnect attempt failed")
                    }
                }
            }
        }
    }

    debug!(generation, "watchdog exited");
}
