use std::fmt;
use std::sync::Arc;

use crate::error::StartRefused;

/// Address of an exported worker procedure inside the sandbox image.
///
/// Two builds of a core export different addresses; a state produced by one build must not be
/// resumed by another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryPoint(pub u64);

impl fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// The worker procedure a core exports for per-frame parallel work.
#[derive(Clone)]
pub struct WorkerEntry {
    pub address: EntryPoint,
    pub proc: Arc<dyn Fn() + Send + Sync>,
}

impl WorkerEntry {
    pub fn new(address: EntryPoint, proc: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            address,
            proc: Arc::new(proc),
        }
    }
}

impl fmt::Debug for WorkerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerEntry")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// The only way a core can get its worker started.
///
/// A refused request (`Err`) means the frame must be abandoned: the host treats a second start
/// while one worker is active as a protocol violation and will tear the session down.
pub trait ThreadStartHook: Send + Sync {
    fn request_start(&self) -> Result<(), StartRefused>;
}
