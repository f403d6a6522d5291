//! Per-frame worker thread management.
//!
//! The core gets one capability, a [`StartRequestPort`], through which it may ask for its
//! exported worker procedure to be started. The bridge enforces "one active worker" at the port
//! and the host calls [`ThreadSyncBridge::join`] at the end of every frame, so no worker ever
//! crosses a frame boundary.

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use cradle_sandbox::{EntryPoint, StartRefused, ThreadStartHook, WorkerEntry};
use tracing::{debug, error, info};

use crate::error::ProtocolViolation;

struct ActiveWorker {
    entry: EntryPoint,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct BridgeState {
    armed: Option<WorkerEntry>,
    active: Option<ActiveWorker>,
    /// First violation seen since the last join.
    violation: Option<ProtocolViolation>,
    started: u64,
}

#[derive(Default)]
struct BridgeShared {
    state: Mutex<BridgeState>,
}

impl BridgeShared {
    fn lock(&self) -> MutexGuard<'_, BridgeState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn record(state: &mut BridgeState, violation: ProtocolViolation) {
    error!(%violation, "worker protocol violation");
    state.violation.get_or_insert(violation);
}

/// Capability handed to the core. Starting the worker is the only thing it can do.
pub struct StartRequestPort {
    shared: Arc<BridgeShared>,
}

impl ThreadStartHook for StartRequestPort {
    fn request_start(&self) -> Result<(), StartRefused> {
        let mut state = self.shared.lock();

        if let Some(active) = &state.active {
            let entry = active.entry;
            record(&mut state, ProtocolViolation::WorkerAlreadyActive { entry });
            return Err(StartRefused::AlreadyActive);
        }

        let Some(worker) = state.armed.clone() else {
            record(&mut state, ProtocolViolation::WorkerNotExported);
            return Err(StartRefused::NotArmed);
        };

        let entry = worker.address;
        let proc = Arc::clone(&worker.proc);
        let spawned = thread::Builder::new()
            .name("cradle-frame-worker".to_owned())
            .spawn(move || proc());
        match spawned {
            Ok(handle) => {
                state.started += 1;
                state.active = Some(ActiveWorker { entry, handle });
                Ok(())
            }
            Err(err) => {
                let reason = err.to_string();
                record(
                    &mut state,
                    ProtocolViolation::WorkerSpawnFailed {
                        entry,
                        reason: reason.clone(),
                    },
                );
                Err(StartRefused::SpawnFailed(reason))
            }
        }
    }
}

/// Owns the worker registration and the end-of-frame join barrier.
pub struct ThreadSyncBridge {
    shared: Arc<BridgeShared>,
    port: Arc<StartRequestPort>,
}

impl Default for ThreadSyncBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ThreadSyncBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("ThreadSyncBridge")
            .field("armed", &state.armed.as_ref().map(|w| w.address))
            .field("active", &state.active.as_ref().map(|w| w.entry))
            .field("started", &state.started)
            .finish()
    }
}

impl ThreadSyncBridge {
    pub fn new() -> Self {
        let shared = Arc::new(BridgeShared::default());
        let port = Arc::new(StartRequestPort {
            shared: Arc::clone(&shared),
        });
        Self { shared, port }
    }

    /// Records the worker the core exports. Returns the port to register with the core, or
    /// `None` if the core has no worker.
    pub fn arm(&self, worker: Option<WorkerEntry>) -> Option<Arc<dyn ThreadStartHook>> {
        let mut state = self.shared.lock();
        match worker {
            Some(worker) => {
                info!(entry = %worker.address, "frame worker armed");
                state.armed = Some(worker);
                Some(Arc::clone(&self.port) as Arc<dyn ThreadStartHook>)
            }
            None => {
                state.armed = None;
                None
            }
        }
    }

    pub fn armed_entry(&self) -> Option<EntryPoint> {
        self.shared.lock().armed.as_ref().map(|w| w.address)
    }

    pub fn is_active(&self) -> bool {
        self.shared.lock().active.is_some()
    }

    /// Total number of workers started over the bridge's lifetime.
    pub fn started(&self) -> u64 {
        self.shared.lock().started
    }

    /// Blocks until the current worker (if any) has finished, then reports any violation seen
    /// since the last join.
    pub fn join(&self) -> Result<(), ProtocolViolation> {
        // The lock must not be held across the join.
        let active = self.shared.lock().active.take();
        let mut panicked = None;
        if let Some(ActiveWorker { entry, handle }) = active {
            if handle.join().is_err() {
                panicked = Some(entry);
            }
            debug!(%entry, "frame worker joined");
        }

        let mut state = self.shared.lock();
        if let Some(entry) = panicked {
            record(&mut state, ProtocolViolation::WorkerPanicked { entry });
        }
        match state.violation.take() {
            Some(violation) => Err(violation),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::time::Duration;

    fn worker(address: u64, f: impl Fn() + Send + Sync + 'static) -> WorkerEntry {
        WorkerEntry::new(EntryPoint(address), f)
    }

    #[test]
    fn unarmed_bridge_hands_out_no_port() {
        let bridge = ThreadSyncBridge::new();
        assert!(bridge.arm(None).is_none());
        assert_eq!(bridge.armed_entry(), None);
        assert!(bridge.join().is_ok());
    }

    #[test]
    fn join_waits_for_the_worker() {
        let done = Arc::new(AtomicBool::new(false));
        let d = Arc::clone(&done);
        let bridge = ThreadSyncBridge::new();
        let port = bridge
            .arm(Some(worker(0x1000, move || {
                thread::sleep(Duration::from_millis(20));
                d.store(true, Ordering::SeqCst);
            })))
            .unwrap();

        port.request_start().unwrap();
        assert!(bridge.is_active());
        bridge.join().unwrap();
        assert!(done.load(Ordering::SeqCst));
        assert!(!bridge.is_active());
        assert_eq!(bridge.started(), 1);
    }

    #[test]
    fn second_start_is_refused_and_reported() {
        let runs = Arc::new(AtomicU32::new(0));
        let r = Arc::clone(&runs);
        let bridge = ThreadSyncBridge::new();
        let port = bridge
            .arm(Some(worker(0x2000, move || {
                thread::sleep(Duration::from_millis(10));
                r.fetch_add(1, Ordering::SeqCst);
            })))
            .unwrap();

        port.request_start().unwrap();
        assert_eq!(port.request_start(), Err(StartRefused::AlreadyActive));
        assert_eq!(
            bridge.join(),
            Err(ProtocolViolation::WorkerAlreadyActive {
                entry: EntryPoint(0x2000)
            })
        );
        // The refused request never ran a second copy.
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn a_new_frame_may_start_again_after_join() {
        let bridge = ThreadSyncBridge::new();
        let port = bridge.arm(Some(worker(0x3000, || {}))).unwrap();
        for _ in 0..3 {
            port.request_start().unwrap();
            bridge.join().unwrap();
        }
        assert_eq!(bridge.started(), 3);
    }

    #[test]
    fn panicking_worker_is_a_violation() {
        let bridge = ThreadSyncBridge::new();
        let port = bridge
            .arm(Some(worker(0x4000, || panic!("worker exploded"))))
            .unwrap();
        port.request_start().unwrap();
        assert_eq!(
            bridge.join(),
            Err(ProtocolViolation::WorkerPanicked {
                entry: EntryPoint(0x4000)
            })
        );
    }

    #[test]
    fn disarmed_port_refuses() {
        let bridge = ThreadSyncBridge::new();
        let port = bridge.arm(Some(worker(0x5000, || {}))).unwrap();
        bridge.arm(None);
        assert_eq!(port.request_start(), Err(StartRefused::NotArmed));
        assert_eq!(bridge.join(), Err(ProtocolViolation::WorkerNotExported));
    }
}
