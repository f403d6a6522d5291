//! Turns user-facing settings and ROM images into a load configuration.
//!
//! [`resolve`] is the only place that knows the flag precedence rules and the persistent-storage
//! region search. Its output, [`LoadConfiguration`], is an owned, immutable record that the host
//! stages for exactly one `init` call.

#![forbid(unsafe_code)]

mod error;
mod firmware;
mod flags;
mod region;
mod resources;
mod settings;
mod title;

use std::ops::RangeInclusive;

use tracing::{debug, info, warn};

use cradle_sandbox::TraceMask;

pub use crate::error::{ConfigError, Result};
pub use crate::firmware::FirmwarePersonalization;
pub use crate::flags::LoadFlags;
pub use crate::region::{candidates, Region, RegionMask};
pub use crate::resources::{
    BootRomKind, DirectoryProvider, ResourceKey, ResourceProvider, StaticResources,
};
pub use crate::settings::{AudioBitrate, Settings, StartUp, SyncSettings};
pub use crate::title::TitleId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Plain,
    Enhanced,
}

impl Mode {
    /// Cartridge images accepted in this mode: primary, then optional secondary ROM and RAM.
    pub fn cartridge_counts(self) -> RangeInclusive<usize> {
        match self {
            Mode::Plain => 1..=3,
            Mode::Enhanced => 1..=1,
        }
    }
}

/// What the embedding layer asks to load.
#[derive(Debug, Clone, Default)]
pub struct LoadRequest {
    /// Primary ROM, then the optional secondary-slot ROM and its RAM image.
    pub roms: Vec<Vec<u8>>,
    pub sync_settings: SyncSettings,
    pub settings: Settings,
    pub deterministic_emulation_requested: bool,
}

/// A boot ROM or firmware image the core reads by name during `init`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceFile {
    pub key: ResourceKey,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistentStorageImage {
    pub region: Region,
    pub bytes: Vec<u8>,
}

/// A fully resolved load. Built only by [`resolve`]; read through its accessors and consumed by
/// the host with [`LoadConfiguration::into_parts`].
#[derive(Debug, Clone)]
pub struct LoadConfiguration {
    mode: Mode,
    title_id: TitleId,
    flags: LoadFlags,
    primary_rom: Vec<u8>,
    secondary_rom: Option<Vec<u8>>,
    secondary_ram: Option<Vec<u8>>,
    persistent_storage: Option<PersistentStorageImage>,
    title_metadata: Option<Vec<u8>>,
    files: Vec<ResourceFile>,
    firmware: FirmwarePersonalization,
    audio_bitrate: AudioBitrate,
    deterministic: bool,
    initial_time: i64,
    trace_mask: TraceMask,
    consider_alt_lag: bool,
}

/// Owned pieces of a [`LoadConfiguration`], handed to whoever stages them.
#[derive(Debug)]
#[non_exhaustive]
pub struct LoadParts {
    pub mode: Mode,
    pub title_id: TitleId,
    pub flags: LoadFlags,
    pub primary_rom: Vec<u8>,
    pub secondary_rom: Option<Vec<u8>>,
    pub secondary_ram: Option<Vec<u8>>,
    pub persistent_storage: Option<PersistentStorageImage>,
    pub title_metadata: Option<Vec<u8>>,
    pub files: Vec<ResourceFile>,
    pub firmware: FirmwarePersonalization,
    pub audio_bitrate: AudioBitrate,
    pub deterministic: bool,
    pub initial_time: i64,
    pub trace_mask: TraceMask,
    pub consider_alt_lag: bool,
}

impl LoadConfiguration {
    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn title_id(&self) -> TitleId {
        self.title_id
    }

    pub fn flags(&self) -> &LoadFlags {
        &self.flags
    }

    pub fn primary_rom(&self) -> &[u8] {
        &self.primary_rom
    }

    pub fn secondary_rom(&self) -> Option<&[u8]> {
        self.secondary_rom.as_deref()
    }

    pub fn secondary_ram(&self) -> Option<&[u8]> {
        self.secondary_ram.as_deref()
    }

    pub fn persistent_storage(&self) -> Option<&PersistentStorageImage> {
        self.persistent_storage.as_ref()
    }

    pub fn title_metadata(&self) -> Option<&[u8]> {
        self.title_metadata.as_deref()
    }

    /// Read-only files exposed to the core for the `init` call, in staging order.
    pub fn files(&self) -> &[ResourceFile] {
        &self.files
    }

    pub fn file(&self, key: &ResourceKey) -> Option<&[u8]> {
        self.files
            .iter()
            .find(|f| f.key == *key)
            .map(|f| f.bytes.as_slice())
    }

    pub fn firmware(&self) -> &FirmwarePersonalization {
        &self.firmware
    }

    pub fn audio_bitrate(&self) -> AudioBitrate {
        self.audio_bitrate
    }

    pub fn deterministic(&self) -> bool {
        self.deterministic
    }

    pub fn initial_time(&self) -> i64 {
        self.initial_time
    }

    pub fn trace_mask(&self) -> TraceMask {
        self.trace_mask
    }

    pub fn consider_alt_lag(&self) -> bool {
        self.consider_alt_lag
    }

    pub fn into_parts(self) -> LoadParts {
        LoadParts {
            mode: self.mode,
            title_id: self.title_id,
            flags: self.flags,
            primary_rom: self.primary_rom,
            secondary_rom: self.secondary_rom,
            secondary_ram: self.secondary_ram,
            persistent_storage: self.persistent_storage,
            title_metadata: self.title_metadata,
            files: self.files,
            firmware: self.firmware,
            audio_bitrate: self.audio_bitrate,
            deterministic: self.deterministic,
            initial_time: self.initial_time,
            trace_mask: self.trace_mask,
            consider_alt_lag: self.consider_alt_lag,
        }
    }
}

/// Resolves a load request against `provider`.
///
/// Fails with [`ConfigError::MissingResource`] when a resource the resolved configuration needs
/// is unavailable. Optional resources that are absent just disable their feature.
pub fn resolve<P: ResourceProvider + ?Sized>(
    request: LoadRequest,
    provider: &P,
) -> Result<LoadConfiguration> {
    let LoadRequest {
        roms,
        sync_settings: sync,
        settings,
        deterministic_emulation_requested,
    } = request;

    let cartridge_count = roms.len();
    let slots = *Mode::Plain.cartridge_counts().end();
    if cartridge_count > slots {
        return Err(ConfigError::Configuration(format!(
            "{cartridge_count} cartridge images supplied, at most {slots} fit"
        )));
    }
    let mut roms = roms.into_iter();
    let primary_rom = roms
        .next()
        .ok_or_else(|| ConfigError::Configuration("no primary ROM supplied".to_owned()))?;
    let secondary_rom = roms.next();
    let secondary_ram = roms.next();

    let title_id = TitleId::from_header(&primary_rom);
    let downloadable = title_id.is_downloadable();
    let mode = if sync.use_enhanced_mode || downloadable {
        Mode::Enhanced
    } else {
        Mode::Plain
    };
    let enhanced = mode == Mode::Enhanced;
    let deterministic = deterministic_emulation_requested || !sync.use_real_time;

    let mut files = Vec::new();
    let use_real_bios = sync.use_real_bios || enhanced;
    if use_real_bios {
        for kind in [BootRomKind::Primary, BootRomKind::Secondary] {
            files.push(required(provider, ResourceKey::BootRom(kind))?);
        }
    }
    if enhanced {
        for kind in [BootRomKind::EnhancedPrimary, BootRomKind::EnhancedSecondary] {
            files.push(required(provider, ResourceKey::BootRom(kind))?);
        }
        files.push(required(provider, ResourceKey::FirmwareEnhanced)?);
    } else {
        match provider.get(&ResourceKey::Firmware) {
            Some(bytes) => files.push(ResourceFile {
                key: ResourceKey::Firmware,
                bytes,
            }),
            None => warn!("no firmware image available, using generated firmware"),
        }
    }
    if downloadable {
        files.push(ResourceFile {
            key: ResourceKey::DownloadableTitle,
            bytes: primary_rom.clone(),
        });
    }
    let firmware_available = files
        .iter()
        .any(|f| matches!(f.key, ResourceKey::Firmware | ResourceKey::FirmwareEnhanced));

    let flags = flags::derive(flags::FlagInputs {
        sync: &sync,
        enhanced,
        downloadable,
        deterministic,
        firmware_available,
        cartridge_count,
    });

    if flags.firmware_override && !enhanced {
        if let Some(file) = files.iter_mut().find(|f| f.key == ResourceKey::Firmware) {
            firmware::scrub_user_data(&mut file.bytes);
        }
    }

    let persistent_storage = if enhanced {
        let filter = title_id
            .is_enhanced_title()
            .then(|| RegionMask::from_header(&primary_rom));
        let image = select_persistent_storage(provider, filter).ok_or_else(|| {
            let tried: Vec<_> = candidates(filter).map(Region::as_str).collect();
            ConfigError::missing(format!("persistent storage (regions: [{}])", tried.join(", ")))
        })?;
        debug!(region = %image.region, len = image.bytes.len(), "selected persistent storage");
        Some(image)
    } else {
        None
    };

    let title_metadata = if downloadable {
        Some(required(provider, ResourceKey::TitleMetadata(title_id))?.bytes)
    } else {
        None
    };

    let firmware = FirmwarePersonalization::from_settings(&sync, enhanced)?;

    info!(
        ?mode,
        title = %title_id,
        flags = ?flags.pack(),
        cartridges = cartridge_count,
        deterministic,
        "resolved load configuration"
    );

    Ok(LoadConfiguration {
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
        audio_bitrate: settings.audio_bitrate,
        deterministic,
        initial_time: sync.initial_time,
        trace_mask: settings.trace_mask(),
        consider_alt_lag: settings.consider_alt_lag,
    })
}

/// Queries persistent-storage candidates in preference order, restricted to `filter` if given.
/// The first image the provider has wins; later candidates are never queried.
pub fn select_persistent_storage<P: ResourceProvider + ?Sized>(
    provider: &P,
    filter: Option<RegionMask>,
) -> Option<PersistentStorageImage> {
    candidates(filter).find_map(|region| {
        provider
            .get(&ResourceKey::PersistentStorage(region))
            .map(|bytes| PersistentStorageImage { region, bytes })
    })
}

fn required<P: ResourceProvider + ?Sized>(provider: &P, key: ResourceKey) -> Result<ResourceFile> {
    match provider.get(&key) {
        Some(bytes) => Ok(ResourceFile { key, bytes }),
        None => Err(ConfigError::missing(key)),
    }
}
