use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::domain::{check_range, DomainError, DomainResult, MemoryDomain};

/// Byte storage shared between a sandbox, its worker thread and host-side domain views.
///
/// Cloning a `SharedRam` clones the handle, not the bytes.
#[derive(Debug, Clone, Default)]
pub struct SharedRam {
    bytes: Arc<RwLock<Vec<u8>>>,
}

impl SharedRam {
    pub fn new(len: usize) -> Self {
        Self::from_vec(vec![0u8; len])
    }

    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Arc::new(RwLock::new(bytes)),
        }
    }

    fn read_guard(&self) -> RwLockReadGuard<'_, Vec<u8>> {
        match self.bytes.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_guard(&self) -> RwLockWriteGuard<'_, Vec<u8>> {
        match self.bytes.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn len(&self) -> usize {
        self.read_guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn read(&self, offset: u64, dst: &mut [u8]) -> DomainResult<()> {
        let guard = self.read_guard();
        let end = check_range(guard.len() as u64, offset, dst.len())?;
        dst.copy_from_slice(&guard[offset as usize..end as usize]);
        Ok(())
    }

    pub fn write(&self, offset: u64, src: &[u8]) -> DomainResult<()> {
        let mut guard = self.write_guard();
        let end = check_range(guard.len() as u64, offset, src.len())?;
        guard[offset as usize..end as usize].copy_from_slice(src);
        Ok(())
    }

    /// Runs `f` with shared access to the whole backing store.
    pub fn with<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(&self.read_guard())
    }

    /// Runs `f` with exclusive access to the whole backing store.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        f(&mut self.write_guard())
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.read_guard().clone()
    }

    /// Replaces the contents. `src` must have exactly the current length.
    pub fn restore_from(&self, src: &[u8]) -> DomainResult<()> {
        let mut guard = self.write_guard();
        if src.len() != guard.len() {
            return Err(DomainError::OutOfRange {
                addr: 0,
                len: src.len(),
                size: guard.len() as u64,
            });
        }
        guard.copy_from_slice(src);
        Ok(())
    }
}

/// A flat domain over a single [`SharedRam`], addressed from zero.
#[derive(Debug, Clone)]
pub struct RamDomain {
    name: String,
    ram: SharedRam,
    writable: bool,
}

impl RamDomain {
    pub fn new(name: impl Into<String>, ram: SharedRam, writable: bool) -> Self {
        Self {
            name: name.into(),
            ram,
            writable,
        }
    }
}

impl MemoryDomain for RamDomain {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.ram.len() as u64
    }

    fn writable(&self) -> bool {
        self.writable
    }

    fn read_into(&self, addr: u64, dst: &mut [u8]) -> DomainResult<()> {
        self.ram.read(addr, dst)
    }

    fn write_from(&self, addr: u64, src: &[u8]) -> DomainResult<()> {
        if !self.writable {
            return Err(DomainError::ReadOnly {
                domain: self.name.clone(),
            });
        }
        self.ram.write(addr, src)
    }
}
