#![forbid(unsafe_code)]

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use cradle_config::{resolve, DirectoryProvider, LoadRequest, Settings, SyncSettings};
use cradle_host::{FrameInput, SandboxedCoreHost};
use cradle_mem::SYSTEM_BUS_NAME;
use cradle_sandbox::{PRIMARY_BUS_NAME, SECONDARY_BUS_NAME};
use cradle_toycore::ToyCore;

#[derive(Debug, Parser)]
#[command(about = "Runs the reference toy core through the sandbox host for a number of frames")]
pub struct Args {
    /// Cartridge image: primary ROM first, then optional secondary ROM and its RAM.
    #[arg(long = "rom", required = true, num_args = 1, action = clap::ArgAction::Append)]
    pub roms: Vec<PathBuf>,

    /// Directory holding boot ROMs, firmware and persistent-storage images.
    #[arg(long)]
    pub resources: Option<PathBuf>,

    /// JSON file with emulation-affecting settings.
    #[arg(long)]
    pub sync_settings: Option<PathBuf>,

    /// JSON file with presentation settings.
    #[arg(long)]
    pub settings: Option<PathBuf>,

    /// Request deterministic emulation (fixed clock, generated firmware settings).
    #[arg(long)]
    pub deterministic: bool,

    /// Number of frames to run.
    #[arg(long, default_value_t = 60)]
    pub frames: u64,

    /// Load a state blob before running.
    #[arg(long)]
    pub state_load: Option<PathBuf>,

    /// Save a state blob after running.
    #[arg(long)]
    pub state_save: Option<PathBuf>,

    /// Write a trace log to this file.
    #[arg(long)]
    pub trace: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub frame: u64,
    pub lag_count: u64,
    /// blake3 over every RAM domain, in export order.
    pub memory_digest: blake3::Hash,
}

fn read_json<T: serde::de::DeserializeOwned + Default>(path: Option<&Path>) -> Result<T> {
    let Some(path) = path else {
        return Ok(T::default());
    };
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("failed to parse {}", path.display()))
}

pub fn run(args: &Args) -> Result<RunSummary> {
    anyhow::ensure!(
        (1..=3).contains(&args.roms.len()),
        "expected 1 to 3 --rom images, got {}",
        args.roms.len()
    );
    let roms = args
        .roms
        .iter()
        .map(|p| fs::read(p).with_context(|| format!("failed to read ROM {}", p.display())))
        .collect::<Result<Vec<_>>>()?;
    let sync_settings: SyncSettings = read_json(args.sync_settings.as_deref())?;
    let settings: Settings = read_json(args.settings.as_deref())?;

    let provider = DirectoryProvider::new(
        args.resources
            .clone()
            .unwrap_or_else(|| PathBuf::from(".")),
    );
    let config = resolve(
        LoadRequest {
            roms,
            sync_settings,
            settings,
            deterministic_emulation_requested: args.deterministic,
        },
        &provider,
    )
    .context("failed to resolve load configuration")?;

    let mut host = SandboxedCoreHost::initialize(ToyCore::default(), config)
        .context("failed to initialize session")?;

    if let Some(path) = &args.state_load {
        let file = File::open(path)
            .with_context(|| format!("failed to open state for load: {}", path.display()))?;
        host.load_state(&mut BufReader::new(file))
            .with_context(|| format!("failed to load state {}", path.display()))?;
    }

    host.set_tracing(args.trace.is_some());
    for _ in 0..args.frames {
        host.advance_frame(FrameInput::default())
            .with_context(|| format!("frame {} failed", host.frame()))?;
    }

    if let Some(path) = &args.trace {
        let mut out = BufWriter::new(
            File::create(path)
                .with_context(|| format!("failed to create trace file {}", path.display()))?,
        );
        writeln!(out, "{}", host.tracer().header())?;
        for line in host.tracer().take_lines() {
            writeln!(out, "{line}")?;
        }
        out.flush()?;
    }

    if let Some(path) = &args.state_save {
        let bytes = host.save_state_to_vec().context("failed to save state")?;
        fs::write(path, bytes)
            .with_context(|| format!("failed to write state {}", path.display()))?;
    }

    Ok(RunSummary {
        frame: host.frame(),
        lag_count: host.lag_count(),
        memory_digest: memory_digest(&host)?,
    })
}

fn memory_digest(host: &SandboxedCoreHost<ToyCore>) -> Result<blake3::Hash> {
    let domains = host.memory_domains();
    let mut hasher = blake3::Hasher::new();
    for name in domains.names() {
        if [SYSTEM_BUS_NAME, PRIMARY_BUS_NAME, SECONDARY_BUS_NAME].contains(&name) {
            continue;
        }
        let domain = domains
            .get(name)
            .with_context(|| format!("domain {name} disappeared"))?;
        let len = usize::try_from(domain.size()).context("domain too large")?;
        let mut buf = vec![0u8; len];
        domain
            .read_into(0, &mut buf)
            .with_context(|| format!("failed to read domain {name}"))?;
        hasher.update(name.as_bytes());
        hasher.update(&buf);
    }
    Ok(hasher.finalize())
}
