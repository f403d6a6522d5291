//! Host side of the sandbox integration protocol.
//!
//! [`SandboxedCoreHost`] drives a [`Sandbox`] through its whole lifecycle: a single load-time
//! commit of borrowed transfer buffers, frame-by-frame advancement with the worker join barrier,
//! and checkpointing through the `cradle-snapshot` container.
//!
//! Every fatal error poisons the session; later calls fail with [`HostError::SessionAborted`].

#![forbid(unsafe_code)]

mod error;
mod rtc;
mod trace;
mod transfer;
mod worker;

use std::io::{Cursor, Read, Seek, Write};
use std::sync::Arc;

use cradle_config::{LoadConfiguration, LoadParts, Mode, TitleId};
use cradle_mem::{
    AccessKind, BusSelector, CallbackId, CompositeDomain, MemoryCallbackSystem, MemoryDomainList,
    MemoryHooks,
};
use cradle_sandbox::{
    Buttons, FrameOutput, FrameRequest, LoadData, Sandbox, TraceMask, TraceSink,
    PRIMARY_BUS_NAME, SECONDARY_BUS_NAME,
};
use cradle_snapshot::{HostState, SaveOptions, StateBlob};
use tracing::{debug, error, info};

pub use crate::error::{HostError, ProtocolViolation, Result};
pub use crate::rtc::{RtcClock, FRAME_RATE_DENOMINATOR, FRAME_RATE_NUMERATOR};
pub use crate::trace::{TraceBuffer, TRACE_HEADER};
pub use crate::transfer::{TransferSet, TransferSlot, TransferStaging};
pub use crate::worker::{StartRequestPort, ThreadSyncBridge};

/// Controller state for one frame. The host adds the clock value and lag policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameInput {
    pub keys: Buttons,
    pub touch_x: u8,
    pub touch_y: u8,
    pub mic_volume: u8,
    pub light_sensor: u8,
}

/// A live session over one sandbox.
pub type Session<S> = SandboxedCoreHost<S>;

pub struct SandboxedCoreHost<S> {
    sandbox: S,
    bridge: ThreadSyncBridge,
    callbacks: Arc<MemoryCallbackSystem>,
    domains: MemoryDomainList,
    tracer: Arc<TraceBuffer>,
    rtc: RtcClock,

    mode: Mode,
    title_id: TitleId,
    primary_rom: Vec<u8>,
    trace_mask: TraceMask,
    consider_alt_lag: bool,
    deterministic: bool,

    frame: u64,
    lag_count: u64,
    is_lag: bool,
    aborted: bool,
}

impl<S> std::fmt::Debug for SandboxedCoreHost<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxedCoreHost")
            .field("mode", &self.mode)
            .field("title_id", &self.title_id)
            .field("frame", &self.frame)
            .field("lag_count", &self.lag_count)
            .field("bridge", &self.bridge)
            .field("aborted", &self.aborted)
            .finish_non_exhaustive()
    }
}

impl<S: Sandbox> SandboxedCoreHost<S> {
    /// Commits `config` to `sandbox` and returns the live session.
    ///
    /// Nothing reaches the sandbox unless the cartridge count fits the mode. If the sandbox
    /// rejects the configuration it is dropped along with every staged buffer.
    pub fn initialize(mut sandbox: S, config: LoadConfiguration) -> Result<Self> {
        let LoadParts {
            mode,
            title_id,
            flags,
            primary_rom,
            secondary_rom,
            secondary_ram,
            persistent_storage,
            title_metadata,
            files,
            firmware,
            audio_bitrate,
            deterministic,
            initial_time,
            trace_mask,
            consider_alt_lag,
            ..
        } = config.into_parts();

        let cartridges =
            check_cartridges(mode, secondary_rom.is_some(), secondary_ram.is_some())?;

        let mut staging = TransferStaging::new();
        staging.stage(TransferSlot::PrimaryRom, primary_rom)?;
        if let Some(rom) = secondary_rom {
            staging.stage(TransferSlot::SecondaryRom, rom)?;
        }
        if let Some(ram) = secondary_ram {
            staging.stage(TransferSlot::SecondaryRam, ram)?;
        }
        if let Some(image) = persistent_storage {
            staging.stage(TransferSlot::PersistentStorage, image.bytes)?;
        }
        if let Some(tmd) = title_metadata {
            staging.stage(TransferSlot::TitleMetadata, tmd)?;
        }
        for file in files {
            staging.stage_file(file.key.file_name(), file.bytes)?;
        }

        let wire_flags = flags.pack();
        let firmware_wire = firmware.as_wire();
        let committed = staging.commit(|set| {
            let data = LoadData {
                primary_rom: set.view(TransferSlot::PrimaryRom),
                secondary_rom: set.view(TransferSlot::SecondaryRom),
                secondary_ram: set.view(TransferSlot::SecondaryRam),
                persistent_storage: set.view(TransferSlot::PersistentStorage),
                title_metadata: set.view(TransferSlot::TitleMetadata),
                audio_bitrate: audio_bitrate.as_wire(),
                files: set.files(),
            };
            debug!(slots = ?set.staged_slots().collect::<Vec<_>>(), "committing load data");
            sandbox.init(wire_flags, &data, &firmware_wire)
        });
        let primary_rom = staging.retract().unwrap_or_default();
        if !committed? {
            return Err(HostError::InitFailure(format!(
                "core refused title {title_id} with flags {wire_flags:?}"
            )));
        }

        let domains = build_domains(&sandbox, BusSelector::Primary)?;

        let mut host = Self {
            sandbox,
            bridge: ThreadSyncBridge::new(),
            callbacks: Arc::new(MemoryCallbackSystem::new()),
            domains,
            tracer: Arc::new(TraceBuffer::new()),
            rtc: RtcClock::new(deterministic, initial_time),
            mode,
            title_id,
            primary_rom,
            trace_mask,
            consider_alt_lag,
            deterministic,
            frame: 0,
            lag_count: 0,
            is_lag: false,
            aborted: false,
        };
        host.register_memory_hooks();
        host.register_worker();

        info!(
            ?mode,
            title = %title_id,
            cartridges,
            worker = ?host.bridge.armed_entry().map(|e| e.to_string()),
            deterministic,
            "session initialized"
        );
        Ok(host)
    }

    /// Runs one frame. Returns only after any worker the core started during this frame has
    /// been joined.
    pub fn advance_frame(&mut self, input: FrameInput) -> Result<FrameOutput> {
        self.check_alive()?;

        if self.tracer.is_enabled() {
            let sink = Arc::clone(&self.tracer) as Arc<dyn TraceSink>;
            self.sandbox.set_trace_sink(Some(sink), self.trace_mask);
        } else {
            self.sandbox.set_trace_sink(None, TraceMask::empty());
        }

        let request = FrameRequest {
            time: self.rtc.now(),
            keys: input.keys,
            touch_x: input.touch_x,
            touch_y: input.touch_y,
            mic_volume: input.mic_volume,
            light_sensor: input.light_sensor,
            consider_alt_lag: self.consider_alt_lag,
        };
        let output = self.sandbox.frame_advance(&request);

        if let Err(violation) = self.bridge.join() {
            return Err(self.abort(violation.into()));
        }

        self.frame += 1;
        self.rtc.advance();
        self.is_lag = output.lagged;
        if output.lagged {
            self.lag_count += 1;
        }
        Ok(output)
    }

    /// Writes a state blob: the core's opaque image followed by host frame bookkeeping.
    pub fn save_state<W: Write + Seek>(&mut self, sink: &mut W) -> Result<()> {
        self.check_alive()?;
        let blob = StateBlob {
            core: self.sandbox.save_state(),
            host: HostState {
                frame: self.frame,
                lag_count: self.lag_count,
                is_lag: self.is_lag,
                rtc_frames: self.rtc.frames(),
            },
        };
        cradle_snapshot::save_state(sink, &blob, SaveOptions::default())?;
        debug!(frame = self.frame, core_len = blob.core.len(), "state saved");
        Ok(())
    }

    pub fn save_state_to_vec(&mut self) -> Result<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::new());
        self.save_state(&mut cursor)?;
        Ok(cursor.into_inner())
    }

    /// Restores a state blob and re-establishes every host registration.
    ///
    /// A blob that fails to decode is rejected before the core is touched and leaves the
    /// session usable. Anything that goes wrong after that aborts the session.
    pub fn load_state<R: Read>(&mut self, source: &mut R) -> Result<()> {
        self.check_alive()?;
        let blob = cradle_snapshot::read_state(source)?;

        let before = self.bridge.armed_entry();
        if let Err(err) = self.sandbox.load_state(&blob.core) {
            return Err(self.abort(err.into()));
        }
        self.sandbox.reset_caches();
        self.register_memory_hooks();
        self.register_worker();

        let after = self.bridge.armed_entry();
        if before != after {
            return Err(self.abort(ProtocolViolation::EntryPointMismatch { before, after }.into()));
        }

        let selector = self
            .domains
            .system_bus()
            .map_or(BusSelector::Primary, CompositeDomain::selector);
        self.domains = match build_domains(&self.sandbox, selector) {
            Ok(domains) => domains,
            Err(err) => return Err(self.abort(err)),
        };

        self.frame = blob.host.frame;
        self.lag_count = blob.host.lag_count;
        self.is_lag = blob.host.is_lag;
        self.rtc.restore(blob.host.rtc_frames);
        debug!(frame = self.frame, "state loaded");
        Ok(())
    }

    pub fn memory_domains(&self) -> &MemoryDomainList {
        &self.domains
    }

    /// Chooses which bus answers reads through the composite system bus.
    pub fn select_system_bus(&mut self, selector: BusSelector) {
        self.domains.select_system_bus(selector);
    }

    pub fn add_memory_callback(
        &mut self,
        kind: AccessKind,
        scope: Option<&str>,
        addr: Option<u32>,
        callback: impl Fn(u32, u32) + Send + Sync + 'static,
    ) -> CallbackId {
        let id = self.callbacks.add(kind, scope, addr, callback);
        self.register_memory_hooks();
        id
    }

    pub fn remove_memory_callback(&mut self, id: CallbackId) -> bool {
        let removed = self.callbacks.remove(id);
        if removed {
            self.register_memory_hooks();
        }
        removed
    }

    pub fn memory_callbacks(&self) -> &MemoryCallbackSystem {
        &self.callbacks
    }

    pub fn tracer(&self) -> &TraceBuffer {
        &self.tracer
    }

    /// Enables or disables trace capture from the next frame on.
    pub fn set_tracing(&mut self, enabled: bool) {
        self.tracer.set_enabled(enabled);
    }

    pub fn persistent_storage(&self) -> Option<Vec<u8>> {
        self.sandbox.persistent_storage()
    }

    pub fn deterministic(&self) -> bool {
        self.deterministic
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn title_id(&self) -> TitleId {
        self.title_id
    }

    pub fn primary_rom(&self) -> &[u8] {
        &self.primary_rom
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn lag_count(&self) -> u64 {
        self.lag_count
    }

    pub fn is_lag(&self) -> bool {
        self.is_lag
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Number of frame workers started so far.
    pub fn workers_started(&self) -> u64 {
        self.bridge.started()
    }

    pub fn sandbox(&self) -> &S {
        &self.sandbox
    }

    fn register_memory_hooks(&mut self) {
        let hooks = if self.callbacks.armed().is_empty() {
            None
        } else {
            Some(Arc::clone(&self.callbacks) as Arc<dyn MemoryHooks>)
        };
        self.sandbox.set_memory_hooks(hooks);
    }

    fn register_worker(&mut self) {
        let port = self.bridge.arm(self.sandbox.frame_thread_proc());
        self.sandbox.set_thread_start_hook(port);
    }

    fn check_alive(&self) -> Result<()> {
        if self.aborted {
            Err(HostError::SessionAborted)
        } else {
            Ok(())
        }
    }

    fn abort(&mut self, err: HostError) -> HostError {
        error!(error = %err, frame = self.frame, "session aborted");
        self.aborted = true;
        err
    }
}

fn build_domains<S: Sandbox>(sandbox: &S, selector: BusSelector) -> Result<MemoryDomainList> {
    let mut domains = MemoryDomainList::new(sandbox.memory_domains());
    let bus = |name: &str| {
        domains
            .find(name)
            .cloned()
            .ok_or_else(|| HostError::InitFailure(format!("core does not export {name:?}")))
    };
    let primary = bus(PRIMARY_BUS_NAME)?;
    let secondary = bus(SECONDARY_BUS_NAME)?;
    let mut composite = CompositeDomain::new(primary, secondary);
    composite.set_selector(selector);
    domains.set_system_bus(composite);
    Ok(domains)
}

/// Counts the cartridge images actually staged and checks the count against `mode`.
fn check_cartridges(mode: Mode, secondary_rom: bool, secondary_ram: bool) -> Result<usize> {
    if secondary_ram && !secondary_rom {
        return Err(HostError::Configuration(
            "secondary cartridge RAM supplied without a secondary ROM".to_owned(),
        ));
    }
    let count = 1 + usize::from(secondary_rom) + usize::from(secondary_ram);
    let accepted = mode.cartridge_counts();
    if !accepted.contains(&count) {
        return Err(HostError::Configuration(format!(
            "{mode:?} mode accepts {}..={} cartridge images, got {count}",
            accepted.start(),
            accepted.end()
        )));
    }
    Ok(count)
}
