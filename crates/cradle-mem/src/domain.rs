use thiserror::Error;

/// Errors returned by [`MemoryDomain`] accesses.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("memory domain access out of range: addr=0x{addr:x} len={len} size=0x{size:x}")]
    OutOfRange { addr: u64, len: usize, size: u64 },

    #[error("memory domain {domain:?} is read-only")]
    ReadOnly { domain: String },
}

pub type DomainResult<T> = Result<T, DomainError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endian {
    #[default]
    Little,
    Big,
}

/// A named, linearly addressed view of sandbox memory.
///
/// Domains are shared between the host and the sandbox (and potentially a sandbox worker thread),
/// so all accesses take `&self` and implementations use interior mutability.
pub trait MemoryDomain: Send + Sync {
    fn name(&self) -> &str;

    /// Size of the address space in bytes. Valid addresses are `[0, size)`.
    fn size(&self) -> u64;

    fn word_size(&self) -> u8 {
        4
    }

    fn endian(&self) -> Endian {
        Endian::Little
    }

    fn writable(&self) -> bool;

    fn read_into(&self, addr: u64, dst: &mut [u8]) -> DomainResult<()>;

    fn write_from(&self, addr: u64, src: &[u8]) -> DomainResult<()>;

    fn read_u8(&self, addr: u64) -> DomainResult<u8> {
        let mut buf = [0u8; 1];
        self.read_into(addr, &mut buf)?;
        Ok(buf[0])
    }

    fn read_u16_le(&self, addr: u64) -> DomainResult<u16> {
        let mut buf = [0u8; 2];
        self.read_into(addr, &mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    fn read_u32_le(&self, addr: u64) -> DomainResult<u32> {
        let mut buf = [0u8; 4];
        self.read_into(addr, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn write_u8(&self, addr: u64, value: u8) -> DomainResult<()> {
        self.write_from(addr, &[value])
    }

    fn write_u32_le(&self, addr: u64, value: u32) -> DomainResult<()> {
        self.write_from(addr, &value.to_le_bytes())
    }
}

impl std::fmt::Debug for dyn MemoryDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryDomain")
            .field("name", &self.name())
            .field("size", &self.size())
            .finish()
    }
}

/// Returns the exclusive end of `[addr, addr + len)` if it fits inside `[0, size)`.
pub(crate) fn check_range(size: u64, addr: u64, len: usize) -> DomainResult<u64> {
    let end = addr
        .checked_add(len as u64)
        .ok_or(DomainError::OutOfRange { addr, len, size })?;
    if end > size {
        return Err(DomainError::OutOfRange { addr, len, size });
    }
    Ok(end)
}
