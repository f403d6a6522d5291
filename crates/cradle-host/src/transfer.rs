//! Borrowed transfer buffers for the load-time boundary crossing.
//!
//! The host stages owned buffers, lends them out as borrowed views for exactly one commit call,
//! then retracts them. The views cannot outlive the commit closure, so the core has no way to
//! keep a reference to host memory afterwards.

use cradle_sandbox::{BufferDescriptor, NamedFile};
use tracing::debug;

use crate::error::{HostError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferSlot {
    PrimaryRom,
    SecondaryRom,
    SecondaryRam,
    PersistentStorage,
    TitleMetadata,
}

impl TransferSlot {
    const ALL: [TransferSlot; 5] = [
        TransferSlot::PrimaryRom,
        TransferSlot::SecondaryRom,
        TransferSlot::SecondaryRam,
        TransferSlot::PersistentStorage,
        TransferSlot::TitleMetadata,
    ];

    fn index(self) -> usize {
        match self {
            TransferSlot::PrimaryRom => 0,
            TransferSlot::SecondaryRom => 1,
            TransferSlot::SecondaryRam => 2,
            TransferSlot::PersistentStorage => 3,
            TransferSlot::TitleMetadata => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Staging,
    Committed,
    Retracted,
}

#[derive(Debug)]
pub struct TransferStaging {
    slots: [Option<Vec<u8>>; 5],
    files: Vec<(String, Vec<u8>)>,
    phase: Phase,
}

impl Default for TransferStaging {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferStaging {
    pub fn new() -> Self {
        Self {
            slots: Default::default(),
            files: Vec::new(),
            phase: Phase::Staging,
        }
    }

    /// Stages `bytes` into `slot`. Fails if the buffer is too large to describe on the wire or
    /// staging is already closed.
    pub fn stage(&mut self, slot: TransferSlot, bytes: Vec<u8>) -> Result<()> {
        self.check_open()?;
        check_wire_len(&bytes, || format!("{slot:?}"))?;
        debug!(?slot, len = bytes.len(), "staged transfer buffer");
        self.slots[slot.index()] = Some(bytes);
        Ok(())
    }

    /// Stages a named file (boot ROM, firmware) the core reads during the commit.
    pub fn stage_file(&mut self, name: impl Into<String>, bytes: Vec<u8>) -> Result<()> {
        self.check_open()?;
        let name = name.into();
        check_wire_len(&bytes, || name.clone())?;
        debug!(%name, len = bytes.len(), "staged transfer file");
        self.files.push((name, bytes));
        Ok(())
    }

    pub fn is_staged(&self, slot: TransferSlot) -> bool {
        self.slots[slot.index()].is_some()
    }

    /// Lends every staged buffer to `f`. Allowed once.
    pub fn commit<R>(&mut self, f: impl FnOnce(&TransferSet<'_>) -> R) -> Result<R> {
        self.check_open()?;
        self.phase = Phase::Committed;
        let set = TransferSet { staging: self };
        Ok(f(&set))
    }

    /// Drops every staged buffer except the primary ROM, which is handed back to the caller.
    pub fn retract(&mut self) -> Option<Vec<u8>> {
        let primary = self.slots[TransferSlot::PrimaryRom.index()].take();
        let mut dropped = 0usize;
        for slot in &mut self.slots {
            if slot.take().is_some() {
                dropped += 1;
            }
        }
        dropped += self.files.len();
        self.files.clear();
        self.phase = Phase::Retracted;
        debug!(dropped, "retracted transfer buffers");
        primary
    }

    fn check_open(&self) -> Result<()> {
        match self.phase {
            Phase::Staging => Ok(()),
            Phase::Committed | Phase::Retracted => Err(HostError::Configuration(
                "transfer buffers were already committed".to_owned(),
            )),
        }
    }
}

fn check_wire_len(bytes: &[u8], what: impl FnOnce() -> String) -> Result<()> {
    if u32::try_from(bytes.len()).is_err() {
        return Err(HostError::Configuration(format!(
            "{} is too large to transfer ({} bytes)",
            what(),
            bytes.len()
        )));
    }
    Ok(())
}

/// Borrowed views of a [`TransferStaging`], valid only inside [`TransferStaging::commit`].
pub struct TransferSet<'a> {
    staging: &'a TransferStaging,
}

impl<'a> TransferSet<'a> {
    /// Descriptor for `slot`; an unstaged slot is zero-length with no view.
    pub fn view(&self, slot: TransferSlot) -> BufferDescriptor<'a> {
        self.staging.slots[slot.index()]
            .as_deref()
            .and_then(BufferDescriptor::try_from_slice)
            .unwrap_or(BufferDescriptor::EMPTY)
    }

    pub fn files(&self) -> Vec<NamedFile<'a>> {
        self.staging
            .files
            .iter()
            .map(|(name, bytes)| NamedFile {
                name: name.as_str(),
                bytes: bytes.as_slice(),
            })
            .collect()
    }

    pub fn staged_slots(&self) -> impl Iterator<Item = TransferSlot> + 'a {
        let staging = self.staging;
        TransferSlot::ALL
            .into_iter()
            .filter(move |s| staging.is_staged(*s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn views_match_staged_buffers() {
        let mut staging = TransferStaging::new();
        staging.stage(TransferSlot::PrimaryRom, vec![1, 2, 3]).unwrap();
        staging.stage(TransferSlot::TitleMetadata, vec![9]).unwrap();
        staging.stage_file("firmware.bin", vec![7; 4]).unwrap();

        let (lens, names) = staging
            .commit(|set| {
                let lens = [
                    set.view(TransferSlot::PrimaryRom).len(),
                    set.view(TransferSlot::SecondaryRom).len(),
                    set.view(TransferSlot::TitleMetadata).len(),
                ];
                assert!(!set.view(TransferSlot::SecondaryRam).is_present());
                let names: Vec<String> = set.files().iter().map(|f| f.name.to_owned()).collect();
                (lens, names)
            })
            .unwrap();
        assert_eq!(lens, [3, 0, 1]);
        assert_eq!(names, ["firmware.bin"]);
    }

    #[test]
    fn commit_happens_once() {
        let mut staging = TransferStaging::new();
        staging.stage(TransferSlot::PrimaryRom, vec![1]).unwrap();
        staging.commit(|_| ()).unwrap();
        assert!(staging.commit(|_| ()).is_err());
        assert!(staging.stage(TransferSlot::SecondaryRom, vec![2]).is_err());
    }

    #[test]
    fn retract_keeps_only_the_primary_rom() {
        let mut staging = TransferStaging::new();
        staging.stage(TransferSlot::PrimaryRom, vec![1]).unwrap();
        staging.stage(TransferSlot::PersistentStorage, vec![2]).unwrap();
        staging.stage_file("bios7.rom", vec![3]).unwrap();
        staging.stage_file("dsiware.rom", vec![1]).unwrap();
        staging.commit(|set| assert_eq!(set.files().len(), 2)).unwrap();

        assert_eq!(staging.retract(), Some(vec![1]));
        for slot in TransferSlot::ALL {
            assert!(!staging.is_staged(slot));
        }
        assert!(staging.files.is_empty());
    }
}
