//! The boundary between the host integration layer and a sandboxed emulation core.
//!
//! Everything that crosses the trust boundary is defined here: the packed load flags, the
//! borrowed load-time buffer descriptors, the per-frame request, and the capability objects
//! (`ThreadStartHook`, `TraceSink`, [`cradle_mem::MemoryHooks`]) the host hands to the core.
//!
//! The core itself is opaque. The host only reaches it through [`Sandbox`].

#![forbid(unsafe_code)]

mod error;
mod trace;
mod wire;
mod worker;

use std::sync::Arc;

use cradle_mem::{MemoryDomain, MemoryHooks};

pub use crate::error::{SandboxStateError, StartRefused};
pub use crate::trace::{CpuId, TraceMask, TraceRecord, TraceSink};
pub use crate::wire::{
    BufferDescriptor, Buttons, FirmwareSettingsWire, FrameOutput, FrameRequest, LoadData,
    LoadFlagsWire, NamedFile,
};
pub use crate::worker::{EntryPoint, ThreadStartHook, WorkerEntry};

/// Name of the primary processor's system bus domain. Every sandbox must export it.
pub const PRIMARY_BUS_NAME: &str = "Primary System Bus";
/// Name of the secondary processor's system bus domain. Every sandbox must export it.
pub const SECONDARY_BUS_NAME: &str = "Secondary System Bus";

/// An isolated emulation core.
///
/// Contract:
/// - [`Sandbox::init`] receives borrowed views only. The lifetimes make it impossible to keep any
///   of them past the call; a core that needs the bytes later copies them.
/// - When a frame needs its worker, the core calls [`ThreadStartHook::request_start`] on the hook
///   registered with [`Sandbox::set_thread_start_hook`]. If the request is refused the core must
///   stop the current frame immediately and return.
/// - [`Sandbox::save_state`] / [`Sandbox::load_state`] cover all guest memory and registers,
///   including whatever determines [`Sandbox::frame_thread_proc`]. Host registrations (hooks,
///   sinks) are never part of the state.
pub trait Sandbox {
    /// Commits a load configuration. Returns `false` if the core rejects it.
    fn init(
        &mut self,
        flags: LoadFlagsWire,
        data: &LoadData<'_>,
        firmware: &FirmwareSettingsWire<'_>,
    ) -> bool;

    fn frame_advance(&mut self, request: &FrameRequest) -> FrameOutput;

    fn set_trace_sink(&mut self, sink: Option<Arc<dyn TraceSink>>, mask: TraceMask);

    fn set_memory_hooks(&mut self, hooks: Option<Arc<dyn MemoryHooks>>);

    fn set_thread_start_hook(&mut self, hook: Option<Arc<dyn ThreadStartHook>>);

    /// The exported per-frame worker entry point, if the core wants one.
    fn frame_thread_proc(&self) -> Option<WorkerEntry>;

    /// Drops any host-invisible caches (e.g. recompiled code) after guest memory was replaced.
    fn reset_caches(&mut self);

    fn save_state(&self) -> Vec<u8>;

    fn load_state(&mut self, state: &[u8]) -> Result<(), SandboxStateError>;

    fn memory_domains(&self) -> Vec<Arc<dyn MemoryDomain>>;

    /// Current persistent-storage image, if the loaded configuration has one.
    fn persistent_storage(&self) -> Option<Vec<u8>>;
}
