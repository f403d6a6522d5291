//! A small deterministic machine that implements the [`Sandbox`] contract.
//!
//! Two toy processors scribble over their work RAM every frame; a render pass turns a latched
//! copy of main RAM into VRAM, either inline or on the per-frame worker when threaded rendering
//! is requested. The machine is only meant to exercise the host protocol: its state is opaque,
//! it exports both system buses, and it asks for its worker through the start hook.

#![forbid(unsafe_code)]

mod cpu;
mod memory;
mod render;
mod state;

use std::collections::HashMap;
use std::sync::Arc;

use cradle_mem::{AccessKind, AccessKinds, MemoryDomain, MemoryHooks};
use cradle_sandbox::{
    CpuId, EntryPoint, FirmwareSettingsWire, FrameOutput, FrameRequest, LoadData, LoadFlagsWire,
    Sandbox, SandboxStateError, ThreadStartHook, TraceMask, TraceSink, WorkerEntry,
    PRIMARY_BUS_NAME, SECONDARY_BUS_NAME,
};
use tracing::{debug, error, warn};

use crate::cpu::{read_word, Cpu, StepResult};
use crate::memory::{
    MachineMemory, FIRMWARE_BLOCK_FROM_END, INPUT_BLOCK_FROM_END, MAIN_RAM_BASE,
    SECONDARY_WRAM_BASE,
};
use crate::render::Renderer;
use crate::state::CoreState;

pub use crate::memory::{
    MAIN_RAM_BASE as TOY_MAIN_RAM_BASE, SLOT2_RAM_BASE as TOY_SLOT2_RAM_BASE,
    VRAM_BASE as TOY_VRAM_BASE,
};

/// Entry point the default build exports for its render worker.
pub const DEFAULT_RENDER_ENTRY: EntryPoint = EntryPoint(0x0000_0000_0040_1a30);

const PRIMARY_STEPS_PER_FRAME: u32 = 1024;
const SECONDARY_STEPS_PER_FRAME: u32 = 512;

/// Build-time knobs. Two `ToyCore`s with different options behave like two different builds.
#[derive(Debug, Clone)]
pub struct ToyCoreOptions {
    pub render_entry: EntryPoint,
    pub main_ram_size: usize,
    /// Asks for the worker twice per frame. Only useful for exercising host error paths.
    pub request_worker_twice: bool,
}

impl Default for ToyCoreOptions {
    fn default() -> Self {
        Self {
            render_entry: DEFAULT_RENDER_ENTRY,
            main_ram_size: 0x4_0000,
            request_worker_twice: false,
        }
    }
}

struct Loaded {
    flags: LoadFlagsWire,
    memory: MachineMemory,
    renderer: Arc<Renderer>,
    cpus: [Cpu; 2],
    frame: u64,
    /// Entry point this machine's worker runs at. Restored from state.
    worker_entry: Option<EntryPoint>,
}

pub struct ToyCore {
    options: ToyCoreOptions,
    loaded: Option<Loaded>,
    /// Opcode cache keyed by (cpu, aligned RAM offset). Kept coherent with guest writes.
    icache: HashMap<(u8, usize), u32>,
    hooks: Option<Arc<dyn MemoryHooks>>,
    armed: AccessKinds,
    trace: Option<(Arc<dyn TraceSink>, TraceMask)>,
    start_hook: Option<Arc<dyn ThreadStartHook>>,
}

impl Default for ToyCore {
    fn default() -> Self {
        Self::new(ToyCoreOptions::default())
    }
}

impl std::fmt::Debug for ToyCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToyCore")
            .field("options", &self.options)
            .field("loaded", &self.loaded.is_some())
            .field("frame", &self.loaded.as_ref().map(|l| l.frame))
            .finish_non_exhaustive()
    }
}

impl ToyCore {
    pub fn new(options: ToyCoreOptions) -> Self {
        Self {
            options,
            loaded: None,
            icache: HashMap::new(),
            hooks: None,
            armed: AccessKinds::empty(),
            trace: None,
            start_hook: None,
        }
    }

    pub fn flags(&self) -> Option<LoadFlagsWire> {
        self.loaded.as_ref().map(|l| l.flags)
    }

    /// Emulated frames since load.
    pub fn frame(&self) -> u64 {
        self.loaded.as_ref().map_or(0, |l| l.frame)
    }

    fn check_load(flags: LoadFlagsWire, data: &LoadData<'_>) -> Result<(), &'static str> {
        if data.primary_rom.is_empty() {
            return Err("primary ROM is empty");
        }
        if flags.contains(LoadFlagsWire::USE_REAL_BIOS)
            && (data.file("bios9.rom").is_none() || data.file("bios7.rom").is_none())
        {
            return Err("real boot ROMs requested but not supplied");
        }
        if flags.contains(LoadFlagsWire::DUAL_CHIP_MODE) {
            if data.file("bios9i.rom").is_none() || data.file("bios7i.rom").is_none() {
                return Err("enhanced boot ROMs missing");
            }
            if data.file("firmwarei.bin").is_none() {
                return Err("enhanced firmware missing");
            }
            if !data.persistent_storage.is_present() {
                return Err("persistent storage missing");
            }
        }
        if flags.contains(LoadFlagsWire::LOAD_SECONDARY_APP) {
            if !data.title_metadata.is_present() {
                return Err("title metadata missing");
            }
            if data.file("dsiware.rom").is_none() {
                return Err("downloadable title image missing");
            }
        }
        if flags.contains(LoadFlagsWire::SECONDARY_CART_PRESENT) != data.secondary_rom.is_present()
        {
            return Err("secondary cartridge flag disagrees with supplied ROM");
        }
        Ok(())
    }

    fn arm_hooks(&mut self) {
        self.armed = self
            .hooks
            .as_ref()
            .map_or(AccessKinds::empty(), |h| h.armed());
    }

    fn write_input(memory: &MachineMemory, request: &FrameRequest) {
        memory.main.with_mut(|ram| {
            let at = ram.len() - INPUT_BLOCK_FROM_END;
            ram[at..at + 8].copy_from_slice(&request.time.to_le_bytes());
            ram[at + 8..at + 10].copy_from_slice(&request.keys.bits().to_le_bytes());
            ram[at + 10] = request.touch_x;
            ram[at + 11] = request.touch_y;
            ram[at + 12] = request.mic_volume;
            ram[at + 13] = request.light_sensor;
        });
    }

    fn write_firmware(memory: &MachineMemory, data: &LoadData<'_>, fw: &FirmwareSettingsWire<'_>) {
        memory.main.with_mut(|ram| {
            let at = ram.len() - FIRMWARE_BLOCK_FROM_END;
            let block = &mut ram[at..at + 0x60];
            block[0] = fw.language;
            block[1] = fw.birthday_month;
            block[2] = fw.birthday_day;
            block[3] = fw.favourite_colour;
            block[4] = data.audio_bitrate;
            let name = fw.username.view().unwrap_or_default();
            let n = name.len().min(0x20);
            block[0x08..0x08 + n].copy_from_slice(&name[..n]);
            let msg = fw.message.view().unwrap_or_default();
            let m = msg.len().min(0x38);
            block[0x28..0x28 + m].copy_from_slice(&msg[..m]);
        });
    }

    /// Runs `steps` instructions of one processor and reports accesses and trace records.
    fn run_cpu(&mut self, which: CpuId, steps: u32, seed: u32) {
        let Some(loaded) = self.loaded.as_mut() else {
            return;
        };
        let (index, base, ram, scope) = match which {
            CpuId::Primary => (0u8, MAIN_RAM_BASE, &loaded.memory.main, PRIMARY_BUS_NAME),
            CpuId::Secondary => (
                1u8,
                SECONDARY_WRAM_BASE,
                &loaded.memory.secondary_wram,
                SECONDARY_BUS_NAME,
            ),
        };
        let tracer = self
            .trace
            .as_ref()
            .filter(|(_, mask)| mask.includes(which))
            .map(|(sink, _)| Arc::clone(sink));
        let cpu = &mut loaded.cpus[index as usize];
        let icache = &mut self.icache;

        for i in 0..steps {
            let pc = cpu.pc;
            let result: StepResult = ram.with_mut(|bytes| {
                cpu.step(base, bytes, seed.wrapping_add(i), |bytes, offset| {
                    *icache
                        .entry((index, offset))
                        .or_insert_with(|| read_word(bytes, offset))
                })
            });
            // Drop cached opcodes overlapping the written byte.
            let aligned = result.written & !3;
            icache.remove(&(index, aligned));
            if aligned >= 4 {
                icache.remove(&(index, aligned - 4));
            }

            if !self.armed.is_empty() {
                if let Some(hooks) = &self.hooks {
                    for access in result.accesses {
                        let kind_armed = match access.kind {
                            AccessKind::Read => self.armed.contains(AccessKinds::READ),
                            AccessKind::Write => self.armed.contains(AccessKinds::WRITE),
                            AccessKind::Execute => self.armed.contains(AccessKinds::EXECUTE),
                        };
                        if kind_armed {
                            hooks.on_access(access.kind, scope, access.addr, access.value);
                        }
                    }
                }
            }
            if let Some(sink) = &tracer {
                sink.trace(&cpu.trace_record(which, pc, result.opcode));
            }
        }
    }
}

impl Sandbox for ToyCore {
    fn init(
        &mut self,
        flags: LoadFlagsWire,
        data: &LoadData<'_>,
        firmware: &FirmwareSettingsWire<'_>,
    ) -> bool {
        if let Err(reason) = Self::check_load(flags, data) {
            warn!(reason, "toy core rejected load");
            return false;
        }

        let persistent = data.persistent_storage.view().map(|bytes| {
            if flags.contains(LoadFlagsWire::CLEAR_PERSISTENT) {
                vec![0u8; bytes.len()]
            } else {
                bytes.to_vec()
            }
        });
        let memory = match MachineMemory::new(
            self.options.main_ram_size.max(0x1000),
            data.secondary_rom.view().map(<[u8]>::to_vec),
            data.secondary_ram.view().map(<[u8]>::to_vec),
            persistent,
        ) {
            Ok(memory) => memory,
            Err(err) => {
                error!(%err, "toy core memory map is invalid");
                return false;
            }
        };

        let rom = data.primary_rom.view().unwrap_or_default();
        memory.main.with_mut(|ram| {
            let n = rom.len().min(ram.len() - FIRMWARE_BLOCK_FROM_END);
            ram[..n].copy_from_slice(&rom[..n]);
        });
        Self::write_firmware(&memory, data, firmware);

        let entry_offset = read_word(rom, 0) & 0xFFFF;
        let cpus = [
            Cpu::reset(MAIN_RAM_BASE, entry_offset),
            Cpu::reset(SECONDARY_WRAM_BASE, entry_offset >> 4),
        ];
        let worker_entry = flags
            .contains(LoadFlagsWire::THREADED_RENDERING)
            .then_some(self.options.render_entry);

        debug!(
            rom_len = rom.len(),
            ?flags,
            worker = ?worker_entry,
            "toy core loaded"
        );
        self.icache.clear();
        self.loaded = Some(Loaded {
            flags,
            renderer: Arc::new(Renderer::new(memory.vram.clone())),
            memory,
            cpus,
            frame: 0,
            worker_entry,
        });
        true
    }

    fn frame_advance(&mut self, request: &FrameRequest) -> FrameOutput {
        let Some(loaded) = self.loaded.as_mut() else {
            return FrameOutput {
                lagged: true,
                cycles: 0,
            };
        };

        Self::write_input(&loaded.memory, request);
        loaded.renderer.latch(loaded.frame, &loaded.memory.main);
        let frame = loaded.frame;
        let threaded = loaded.worker_entry.is_some();
        let renderer = Arc::clone(&loaded.renderer);
        let start_cycles = loaded.cpus[0].cycles;

        if threaded {
            let requests = if self.options.request_worker_twice { 2 } else { 1 };
            for _ in 0..requests {
                let granted = self
                    .start_hook
                    .as_ref()
                    .map_or(false, |hook| hook.request_start().is_ok());
                if !granted {
                    // Abandon the frame without touching guest state further.
                    return FrameOutput {
                        lagged: true,
                        cycles: 0,
                    };
                }
            }
        }

        let seed = (frame as u32) ^ u32::from(request.keys.bits());
        self.run_cpu(CpuId::Primary, PRIMARY_STEPS_PER_FRAME, seed);
        self.run_cpu(CpuId::Secondary, SECONDARY_STEPS_PER_FRAME, seed.rotate_left(16));

        if !threaded {
            renderer.render();
        }

        let Some(loaded) = self.loaded.as_mut() else {
            return FrameOutput::default();
        };
        loaded.frame += 1;
        let polled = loaded.cpus[0].acc & 7 != 0;
        let alt_polled = loaded.cpus[1].acc & 7 != 0;
        let lagged = if request.consider_alt_lag {
            !polled && !alt_polled
        } else {
            !polled
        };
        FrameOutput {
            lagged,
            cycles: loaded.cpus[0].cycles - start_cycles,
        }
    }

    fn set_trace_sink(&mut self, sink: Option<Arc<dyn TraceSink>>, mask: TraceMask) {
        self.trace = sink.map(|s| (s, mask));
    }

    fn set_memory_hooks(&mut self, hooks: Option<Arc<dyn MemoryHooks>>) {
        self.hooks = hooks;
        self.arm_hooks();
    }

    fn set_thread_start_hook(&mut self, hook: Option<Arc<dyn ThreadStartHook>>) {
        self.start_hook = hook;
    }

    fn frame_thread_proc(&self) -> Option<WorkerEntry> {
        let loaded = self.loaded.as_ref()?;
        let entry = loaded.worker_entry?;
        let renderer = Arc::clone(&loaded.renderer);
        Some(WorkerEntry::new(entry, move || renderer.render()))
    }

    fn reset_caches(&mut self) {
        self.icache.clear();
    }

    fn save_state(&self) -> Vec<u8> {
        let Some(loaded) = &self.loaded else {
            return Vec::new();
        };
        let state = CoreState {
            worker_entry: loaded.worker_entry,
            flags: loaded.flags.bits(),
            frame: loaded.frame,
            cpus: loaded.cpus,
            regions: loaded
                .memory
                .state_regions()
                .into_iter()
                .map(|r| r.to_vec())
                .collect(),
        };
        let mut out = Vec::new();
        if let Err(err) = state.encode(&mut out) {
            error!(%err, "failed to encode toy core state");
            out.clear();
        }
        out
    }

    fn load_state(&mut self, bytes: &[u8]) -> Result<(), SandboxStateError> {
        let state = CoreState::decode(bytes)?;
        let loaded = self
            .loaded
            .as_mut()
            .ok_or(SandboxStateError::Malformed("no machine loaded"))?;

        let regions = loaded.memory.state_regions();
        if regions.len() != state.regions.len()
            || regions
                .iter()
                .zip(&state.regions)
                .any(|(have, want)| have.len() != want.len())
        {
            return Err(SandboxStateError::Malformed(
                "state memory layout does not match loaded machine",
            ));
        }
        for (ram, bytes) in regions.into_iter().zip(&state.regions) {
            ram.restore_from(bytes)
                .map_err(|_| SandboxStateError::Malformed("region length mismatch"))?;
        }

        loaded.flags = LoadFlagsWire::from_bits_retain(state.flags);
        loaded.frame = state.frame;
        loaded.cpus = state.cpus;
        loaded.worker_entry = state.worker_entry;
        Ok(())
    }

    fn memory_domains(&self) -> Vec<Arc<dyn MemoryDomain>> {
        self.loaded
            .as_ref()
            .map(|l| l.memory.domains())
            .unwrap_or_default()
    }

    fn persistent_storage(&self) -> Option<Vec<u8>> {
        self.loaded
            .as_ref()?
            .memory
            .persistent
            .as_ref()
            .map(|ram| ram.to_vec())
    }
}
