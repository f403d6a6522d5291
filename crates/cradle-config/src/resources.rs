use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::region::Region;
use crate::title::TitleId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BootRomKind {
    Primary,
    Secondary,
    EnhancedPrimary,
    EnhancedSecondary,
}

/// Everything the resolver may ask the embedding layer for, plus the files it exposes to the
/// core during `init`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKey {
    BootRom(BootRomKind),
    Firmware,
    FirmwareEnhanced,
    PersistentStorage(Region),
    TitleMetadata(TitleId),
    /// The primary ROM of a downloadable title, re-exposed as a named file. Never fetched.
    DownloadableTitle,
}

impl ResourceKey {
    /// File name the core sees for this resource, also used by [`DirectoryProvider`].
    pub fn file_name(&self) -> String {
        match self {
            ResourceKey::BootRom(BootRomKind::Primary) => "bios9.rom".to_owned(),
            ResourceKey::BootRom(BootRomKind::Secondary) => "bios7.rom".to_owned(),
            ResourceKey::BootRom(BootRomKind::EnhancedPrimary) => "bios9i.rom".to_owned(),
            ResourceKey::BootRom(BootRomKind::EnhancedSecondary) => "bios7i.rom".to_owned(),
            ResourceKey::Firmware => "firmware.bin".to_owned(),
            ResourceKey::FirmwareEnhanced => "firmwarei.bin".to_owned(),
            ResourceKey::PersistentStorage(region) => format!("nand-{region}.bin"),
            ResourceKey::TitleMetadata(title) => format!("{title}.tmd"),
            ResourceKey::DownloadableTitle => "dsiware.rom".to_owned(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

/// External source of boot ROMs, firmware, persistent storage and title metadata.
///
/// `None` means "not available"; the resolver decides whether that is fatal.
pub trait ResourceProvider {
    fn get(&self, key: &ResourceKey) -> Option<Vec<u8>>;
}

impl<P: ResourceProvider + ?Sized> ResourceProvider for &P {
    fn get(&self, key: &ResourceKey) -> Option<Vec<u8>> {
        (**self).get(key)
    }
}

/// Resolves keys to files in one directory, named by [`ResourceKey::file_name`].
#[derive(Debug, Clone)]
pub struct DirectoryProvider {
    root: PathBuf,
}

impl DirectoryProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ResourceProvider for DirectoryProvider {
    fn get(&self, key: &ResourceKey) -> Option<Vec<u8>> {
        let path = self.root.join(key.file_name());
        match std::fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(err) if err.kind() == io::ErrorKind::NotFound => None,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to read resource");
                None
            }
        }
    }
}

/// In-memory provider.
#[derive(Debug, Clone, Default)]
pub struct StaticResources {
    entries: HashMap<ResourceKey, Vec<u8>>,
}

impl StaticResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: ResourceKey, bytes: impl Into<Vec<u8>>) -> &mut Self {
        self.entries.insert(key, bytes.into());
        self
    }

    pub fn with(mut self, key: ResourceKey, bytes: impl Into<Vec<u8>>) -> Self {
        self.insert(key, bytes);
        self
    }
}

impl ResourceProvider for StaticResources {
    fn get(&self, key: &ResourceKey) -> Option<Vec<u8>> {
        self.entries.get(key).cloned()
    }
}
