use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use cradle_config::{
    resolve, BootRomKind, ConfigError, LoadConfiguration, LoadRequest, Region, ResourceKey,
    StaticResources, SyncSettings, TitleId,
};
use cradle_host::{FrameInput, HostError, ProtocolViolation, SandboxedCoreHost};
use cradle_mem::{
    AccessKind, AccessKinds, BusSelector, MemoryDomain, MemoryHooks, RamDomain, SharedRam,
    SYSTEM_BUS_NAME,
};
use cradle_sandbox::{
    EntryPoint, FirmwareSettingsWire, FrameOutput, FrameRequest, LoadData, LoadFlagsWire,
    Sandbox, SandboxStateError, ThreadStartHook, TraceMask, TraceSink, WorkerEntry,
    PRIMARY_BUS_NAME, SECONDARY_BUS_NAME,
};

#[derive(Debug, Default)]
struct Log {
    inits: u32,
    init_lens: Vec<u32>,
    init_files: Vec<String>,
    app_image: Option<Vec<u8>>,
    message_len: u32,
    flags: LoadFlagsWire,
    frames: u32,
    times: Vec<i64>,
    refused: u32,
    ran_after_refusal: bool,
    hooks_armed: Vec<AccessKinds>,
    start_hook_set: Vec<bool>,
    trace_set: Vec<Option<TraceMask>>,
    reset_caches: u32,
}

struct MockCore {
    log: Arc<Mutex<Log>>,
    accept: bool,
    entry: Option<EntryPoint>,
    starts_per_frame: u32,
    worker_delay: Duration,
    worker_done: Arc<AtomicBool>,
    running: Arc<AtomicU32>,
    max_running: Arc<AtomicU32>,
    start_hook: Option<Arc<dyn ThreadStartHook>>,
    frame: u64,
    primary: SharedRam,
    secondary: SharedRam,
}

impl MockCore {
    fn new() -> Self {
        Self {
            log: Arc::default(),
            accept: true,
            entry: None,
            starts_per_frame: 1,
            worker_delay: Duration::ZERO,
            worker_done: Arc::default(),
            running: Arc::default(),
            max_running: Arc::default(),
            start_hook: None,
            frame: 0,
            primary: SharedRam::from_vec((0..64u8).collect()),
            secondary: SharedRam::from_vec((0..64u8).map(|b| b ^ 0xA5).collect()),
        }
    }

    fn with_worker(entry: u64) -> Self {
        Self {
            entry: Some(EntryPoint(entry)),
            ..Self::new()
        }
    }

    fn log(&self) -> Arc<Mutex<Log>> {
        Arc::clone(&self.log)
    }
}

impl Sandbox for MockCore {
    fn init(
        &mut self,
        flags: LoadFlagsWire,
        data: &LoadData<'_>,
        firmware: &FirmwareSettingsWire<'_>,
    ) -> bool {
        let mut log = self.log.lock().unwrap();
        log.inits += 1;
        log.flags = flags;
        log.init_lens = vec![
            data.primary_rom.len(),
            data.secondary_rom.len(),
            data.secondary_ram.len(),
            data.persistent_storage.len(),
            data.title_metadata.len(),
        ];
        log.init_files = data.files.iter().map(|f| f.name.to_owned()).collect();
        log.app_image = data.file("dsiware.rom").map(<[u8]>::to_vec);
        log.message_len = firmware.message.len();
        self.accept
    }

    fn frame_advance(&mut self, request: &FrameRequest) -> FrameOutput {
        self.log.lock().unwrap().times.push(request.time);
        if self.entry.is_some() {
            for _ in 0..self.starts_per_frame {
                let granted = self
                    .start_hook
                    .as_ref()
                    .map_or(false, |h| h.request_start().is_ok());
                if !granted {
                    self.log.lock().unwrap().refused += 1;
                    return FrameOutput {
                        lagged: true,
                        cycles: 0,
                    };
                }
            }
        }
        let mut log = self.log.lock().unwrap();
        if log.refused > 0 {
            log.ran_after_refusal = true;
        }
        log.frames += 1;
        self.frame += 1;
        FrameOutput {
            lagged: self.frame % 2 == 0,
            cycles: 100,
        }
    }

    fn set_trace_sink(&mut self, sink: Option<Arc<dyn TraceSink>>, mask: TraceMask) {
        self.log.lock().unwrap().trace_set.push(sink.map(|_| mask));
    }

    fn set_memory_hooks(&mut self, hooks: Option<Arc<dyn MemoryHooks>>) {
        let armed = hooks.map_or(AccessKinds::empty(), |h| h.armed());
        self.log.lock().unwrap().hooks_armed.push(armed);
    }

    fn set_thread_start_hook(&mut self, hook: Option<Arc<dyn ThreadStartHook>>) {
        self.log.lock().unwrap().start_hook_set.push(hook.is_some());
        self.start_hook = hook;
    }

    fn frame_thread_proc(&self) -> Option<WorkerEntry> {
        let entry = self.entry?;
        let delay = self.worker_delay;
        let done = Arc::clone(&self.worker_done);
        let running = Arc::clone(&self.running);
        let max_running = Arc::clone(&self.max_running);
        Some(WorkerEntry::new(entry, move || {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            max_running.fetch_max(now, Ordering::SeqCst);
            thread::sleep(delay);
            done.store(true, Ordering::SeqCst);
            running.fetch_sub(1, Ordering::SeqCst);
        }))
    }

    fn reset_caches(&mut self) {
        self.log.lock().unwrap().reset_caches += 1;
    }

    fn save_state(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.entry.map_or(0, |e| e.0).to_le_bytes());
        out.extend_from_slice(&self.frame.to_le_bytes());
        out.extend_from_slice(&self.primary.to_vec());
        out
    }

    fn load_state(&mut self, state: &[u8]) -> Result<(), SandboxStateError> {
        if state.len() != 16 + self.primary.len() {
            return Err(SandboxStateError::Truncated {
                expected: 16 + self.primary.len(),
                found: state.len(),
            });
        }
        let entry = u64::from_le_bytes(state[..8].try_into().unwrap());
        self.entry = (entry != 0).then_some(EntryPoint(entry));
        self.frame = u64::from_le_bytes(state[8..16].try_into().unwrap());
        self.primary.restore_from(&state[16..]).unwrap();
        Ok(())
    }

    fn memory_domains(&self) -> Vec<Arc<dyn MemoryDomain>> {
        vec![
            Arc::new(RamDomain::new(PRIMARY_BUS_NAME, self.primary.clone(), true)),
            Arc::new(RamDomain::new(
                SECONDARY_BUS_NAME,
                self.secondary.clone(),
                true,
            )),
        ]
    }

    fn persistent_storage(&self) -> Option<Vec<u8>> {
        None
    }
}

fn rom() -> Vec<u8> {
    vec![0x42; 0x400]
}

fn plain(roms: usize) -> LoadConfiguration {
    let mut images = vec![rom()];
    images.extend((1..roms).map(|i| vec![i as u8; 32]));
    resolve(
        LoadRequest {
            roms: images,
            ..LoadRequest::default()
        },
        &StaticResources::new(),
    )
    .unwrap()
}

fn enhanced_resources() -> StaticResources {
    StaticResources::new()
        .with(ResourceKey::BootRom(BootRomKind::Primary), vec![1; 8])
        .with(ResourceKey::BootRom(BootRomKind::Secondary), vec![2; 8])
        .with(ResourceKey::BootRom(BootRomKind::EnhancedPrimary), vec![3; 8])
        .with(ResourceKey::BootRom(BootRomKind::EnhancedSecondary), vec![4; 8])
        .with(ResourceKey::FirmwareEnhanced, vec![5; 8])
        .with(ResourceKey::PersistentStorage(Region::Usa), vec![6; 8])
}

fn enhanced(roms: usize) -> LoadConfiguration {
    let mut images = vec![rom()];
    images.extend((1..roms).map(|i| vec![i as u8; 32]));
    resolve(
        LoadRequest {
            roms: images,
            sync_settings: SyncSettings {
                use_enhanced_mode: true,
                ..SyncSettings::default()
            },
            ..LoadRequest::default()
        },
        &enhanced_resources(),
    )
    .unwrap()
}

const DOWNLOADABLE: u64 = 0x0003_0004_4142_4344;

fn downloadable() -> LoadConfiguration {
    let mut image = rom();
    image[0x230..0x238].copy_from_slice(&DOWNLOADABLE.to_le_bytes());
    resolve(
        LoadRequest {
            roms: vec![image],
            ..LoadRequest::default()
        },
        &enhanced_resources().with(ResourceKey::TitleMetadata(TitleId(DOWNLOADABLE)), vec![7; 16]),
    )
    .unwrap()
}

#[test]
fn cartridge_count_must_fit_the_mode() {
    for count in 1..=3 {
        assert!(SandboxedCoreHost::initialize(MockCore::new(), plain(count)).is_ok());
    }

    // A fourth image has no slot to go into.
    let err = resolve(
        LoadRequest {
            roms: vec![rom(); 4],
            ..LoadRequest::default()
        },
        &StaticResources::new(),
    )
    .unwrap_err();
    assert!(matches!(err, ConfigError::Configuration(_)));

    assert!(SandboxedCoreHost::initialize(MockCore::new(), enhanced(1)).is_ok());
    let core = MockCore::new();
    let log = core.log();
    let err = SandboxedCoreHost::initialize(core, enhanced(2)).unwrap_err();
    assert!(matches!(err, HostError::Configuration(_)));
    assert_eq!(log.lock().unwrap().inits, 0);
}

#[test]
fn cartridge_count_follows_the_staged_buffers() {
    // The enhanced configuration carries a secondary ROM it cannot stage; nothing is committed.
    let config = enhanced(2);
    assert!(config.secondary_rom().is_some());
    let core = MockCore::new();
    let log = core.log();
    let err = SandboxedCoreHost::initialize(core, config).unwrap_err();
    assert!(matches!(err, HostError::Configuration(_)));
    let log = log.lock().unwrap();
    assert_eq!(log.inits, 0);
    assert!(log.init_lens.is_empty());
    drop(log);

    // Three images: the RAM image is only ever staged next to its ROM.
    let config = plain(3);
    assert!(config.secondary_rom().is_some() && config.secondary_ram().is_some());
    let core = MockCore::new();
    let log = core.log();
    SandboxedCoreHost::initialize(core, config).unwrap();
    let log = log.lock().unwrap();
    assert_eq!(log.init_lens, [0x400, 32, 32, 0, 0]);
    assert!(log.flags.contains(LoadFlagsWire::SECONDARY_CART_PRESENT));
}

#[test]
fn init_sees_every_staged_buffer() {
    let core = MockCore::new();
    let log = core.log();
    let host = SandboxedCoreHost::initialize(core, enhanced(1)).unwrap();

    let log = log.lock().unwrap();
    assert_eq!(log.inits, 1);
    assert_eq!(log.init_lens, [0x400, 0, 0, 8, 0]);
    assert_eq!(
        log.init_files,
        ["bios9.rom", "bios7.rom", "bios9i.rom", "bios7i.rom", "firmwarei.bin"]
    );
    assert!(log.app_image.is_none());
    assert_eq!(log.message_len, 1);
    assert!(log
        .flags
        .contains(LoadFlagsWire::USE_REAL_BIOS | LoadFlagsWire::DUAL_CHIP_MODE));
    assert_eq!(host.primary_rom().len(), 0x400);
    drop(log);

    // A downloadable title is also readable as a named file, for the init call only.
    let config = downloadable();
    let title = config.primary_rom().to_vec();
    let core = MockCore::new();
    let log = core.log();
    let host = SandboxedCoreHost::initialize(core, config).unwrap();
    let log = log.lock().unwrap();
    assert_eq!(log.init_lens, [0x400, 0, 0, 8, 16]);
    assert_eq!(log.init_files.last().map(String::as_str), Some("dsiware.rom"));
    assert_eq!(log.app_image.as_deref(), Some(title.as_slice()));
    assert!(log.flags.contains(LoadFlagsWire::LOAD_SECONDARY_APP));
    // Only the primary ROM outlives the commit.
    assert_eq!(host.primary_rom(), title.as_slice());
}

#[test]
fn rejected_configuration_is_an_init_failure() {
    let core = MockCore {
        accept: false,
        ..MockCore::new()
    };
    let log = core.log();
    let err = SandboxedCoreHost::initialize(core, plain(1)).unwrap_err();
    assert!(matches!(err, HostError::InitFailure(_)));
    let log = log.lock().unwrap();
    assert_eq!(log.inits, 1);
    // Nothing was registered with the rejected core.
    assert!(log.hooks_armed.is_empty());
    assert!(log.start_hook_set.is_empty());
}

#[test]
fn advance_returns_after_the_worker_joined() {
    let core = MockCore {
        worker_delay: Duration::from_millis(25),
        ..MockCore::with_worker(0x7000)
    };
    let done = Arc::clone(&core.worker_done);
    let max_running = Arc::clone(&core.max_running);
    let mut host = SandboxedCoreHost::initialize(core, plain(1)).unwrap();

    for frame in 1..=4 {
        done.store(false, Ordering::SeqCst);
        host.advance_frame(FrameInput::default()).unwrap();
        assert!(done.load(Ordering::SeqCst), "frame {frame} returned early");
        assert_eq!(host.frame(), frame);
    }
    assert_eq!(host.workers_started(), 4);
    assert_eq!(max_running.load(Ordering::SeqCst), 1);
}

#[test]
fn second_worker_start_is_a_protocol_violation() {
    let core = MockCore {
        starts_per_frame: 2,
        worker_delay: Duration::from_millis(10),
        ..MockCore::with_worker(0x7000)
    };
    let log = core.log();
    let mut host = SandboxedCoreHost::initialize(core, plain(1)).unwrap();

    let err = host.advance_frame(FrameInput::default()).unwrap_err();
    assert!(matches!(
        err,
        HostError::ProtocolViolation(ProtocolViolation::WorkerAlreadyActive {
            entry: EntryPoint(0x7000)
        })
    ));
    {
        let log = log.lock().unwrap();
        assert_eq!(log.refused, 1);
        assert!(!log.ran_after_refusal);
    }
    assert!(host.is_aborted());
    assert!(matches!(
        host.advance_frame(FrameInput::default()),
        Err(HostError::SessionAborted)
    ));
    assert!(matches!(
        host.save_state_to_vec(),
        Err(HostError::SessionAborted)
    ));
}

#[test]
fn save_then_load_restores_registrations() {
    let core = MockCore::with_worker(0x7000);
    let log = core.log();
    let mut host = SandboxedCoreHost::initialize(core, plain(1)).unwrap();
    host.add_memory_callback(AccessKind::Write, None, Some(0x10), |_, _| {});
    for _ in 0..3 {
        host.advance_frame(FrameInput::default()).unwrap();
    }

    let before = {
        let log = log.lock().unwrap();
        (
            *log.hooks_armed.last().unwrap(),
            *log.start_hook_set.last().unwrap(),
        )
    };
    let state = host.save_state_to_vec().unwrap();
    host.advance_frame(FrameInput::default()).unwrap();
    host.load_state(&mut Cursor::new(&state)).unwrap();

    let log_now = log.lock().unwrap();
    assert_eq!(
        (
            *log_now.hooks_armed.last().unwrap(),
            *log_now.start_hook_set.last().unwrap()
        ),
        before
    );
    assert_eq!(before, (AccessKinds::WRITE, true));
    assert_eq!(log_now.reset_caches, 1);
    drop(log_now);

    assert_eq!(host.frame(), 3);
    assert_eq!(host.lag_count(), 1);
    host.advance_frame(FrameInput::default()).unwrap();
    assert_eq!(host.frame(), 4);
}

#[test]
fn state_from_another_build_is_rejected() {
    let mut producer =
        SandboxedCoreHost::initialize(MockCore::with_worker(0x7000), plain(1)).unwrap();
    producer.advance_frame(FrameInput::default()).unwrap();
    let state = producer.save_state_to_vec().unwrap();

    let mut consumer =
        SandboxedCoreHost::initialize(MockCore::with_worker(0x9000), plain(1)).unwrap();
    let err = consumer.load_state(&mut Cursor::new(&state)).unwrap_err();
    assert!(matches!(
        err,
        HostError::ProtocolViolation(ProtocolViolation::EntryPointMismatch {
            before: Some(EntryPoint(0x9000)),
            after: Some(EntryPoint(0x7000)),
        })
    ));
    assert!(consumer.is_aborted());
}

#[test]
fn undecodable_state_leaves_the_session_usable() {
    let mut host = SandboxedCoreHost::initialize(MockCore::new(), plain(1)).unwrap();
    let err = host
        .load_state(&mut Cursor::new(b"not a state blob".to_vec()))
        .unwrap_err();
    assert!(matches!(err, HostError::Serialization(_)));
    assert!(!host.is_aborted());
    host.advance_frame(FrameInput::default()).unwrap();
}

#[test]
fn tracing_is_armed_per_frame() {
    let core = MockCore::new();
    let log = core.log();
    let mut host = SandboxedCoreHost::initialize(core, plain(1)).unwrap();

    host.advance_frame(FrameInput::default()).unwrap();
    host.set_tracing(true);
    host.advance_frame(FrameInput::default()).unwrap();
    host.set_tracing(false);
    host.advance_frame(FrameInput::default()).unwrap();

    let log = log.lock().unwrap();
    assert_eq!(
        log.trace_set,
        [None, Some(TraceMask::empty()), None],
        "default settings trace no processor"
    );
}

#[test]
fn composite_system_bus_follows_the_selector() {
    let mut host = SandboxedCoreHost::initialize(MockCore::new(), plain(1)).unwrap();
    let read = |host: &SandboxedCoreHost<MockCore>, name: &str, addr: u64| {
        host.memory_domains().get(name).unwrap().read_u8(addr).unwrap()
    };

    assert_eq!(read(&host, SYSTEM_BUS_NAME, 5), read(&host, PRIMARY_BUS_NAME, 5));
    host.select_system_bus(BusSelector::Secondary);
    assert_eq!(read(&host, SYSTEM_BUS_NAME, 5), read(&host, SECONDARY_BUS_NAME, 5));
    assert_ne!(read(&host, PRIMARY_BUS_NAME, 5), read(&host, SECONDARY_BUS_NAME, 5));

    let bus = host.memory_domains().get(SYSTEM_BUS_NAME).unwrap();
    assert!(!bus.writable());
    assert!(bus.write_u8(5, 0).is_err());
}

#[test]
fn deterministic_clock_starts_at_initial_time() {
    let core = MockCore::new();
    let log = core.log();
    let config = resolve(
        LoadRequest {
            roms: vec![rom()],
            sync_settings: SyncSettings {
                use_real_time: false,
                initial_time: 1_234_567,
                ..SyncSettings::default()
            },
            ..LoadRequest::default()
        },
        &StaticResources::new(),
    )
    .unwrap();
    let mut host = SandboxedCoreHost::initialize(core, config).unwrap();
    assert!(host.deterministic());
    for _ in 0..61 {
        host.advance_frame(FrameInput::default()).unwrap();
    }
    let log = log.lock().unwrap();
    assert_eq!(log.times[0], 1_234_567);
    assert_eq!(log.times[60], 1_234_568);
}
