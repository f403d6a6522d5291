use thiserror::Error;

use crate::domain::{check_range, DomainResult, MemoryDomain};
use crate::ram::SharedRam;

/// A bus address → backing RAM mapping.
///
/// The bus range `[start, end)` is mapped to `[ram_offset, ram_offset + (end - start))` of `ram`.
#[derive(Debug, Clone)]
pub struct BusMapping {
    pub start: u64,
    pub end: u64,
    pub ram: SharedRam,
    pub ram_offset: u64,
}

impl BusMapping {
    pub fn new(start: u64, ram: SharedRam) -> Self {
        let end = start + ram.len() as u64;
        Self {
            start,
            end,
            ram,
            ram_offset: 0,
        }
    }

    #[inline]
    fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }
}

/// Errors constructing a [`MappedBus`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappedBusError {
    #[error("bus mapping {index} is empty: start=0x{start:x} end=0x{end:x}")]
    EmptyRegion { index: usize, start: u64, end: u64 },

    #[error("bus mapping {index} out of bus range: start=0x{start:x} end=0x{end:x} size=0x{size:x}")]
    RegionOutOfRange {
        index: usize,
        start: u64,
        end: u64,
        size: u64,
    },

    #[error("bus mappings overlap: prev_index={prev_index} prev_end=0x{prev_end:x} index={index} start=0x{start:x}")]
    Overlap {
        prev_index: usize,
        prev_end: u64,
        index: usize,
        start: u64,
    },

    #[error("bus mapping {index} out of backing range: ram_offset=0x{ram_offset:x} len=0x{len:x} ram_len=0x{ram_len:x}")]
    BackingOutOfRange {
        index: usize,
        ram_offset: u64,
        len: u64,
        ram_len: u64,
    },
}

/// A processor bus: a sparse address space made of [`SharedRam`] windows.
///
/// Accesses into unmapped gaps succeed, returning `0xFF` on reads (open bus) and ignoring writes.
#[derive(Debug, Clone)]
pub struct MappedBus {
    name: String,
    size: u64,
    regions: Vec<BusMapping>,
}

impl MappedBus {
    /// `regions` are sorted by `start` and validated to be disjoint and backed.
    pub fn new(
        name: impl Into<String>,
        size: u64,
        mut regions: Vec<BusMapping>,
    ) -> Result<Self, MappedBusError> {
        regions.sort_by_key(|r| r.start);

        let mut prev_end = 0u64;
        for (idx, r) in regions.iter().enumerate() {
            if r.end <= r.start {
                return Err(MappedBusError::EmptyRegion {
                    index: idx,
                    start: r.start,
                    end: r.end,
                });
            }
            if r.end > size {
                return Err(MappedBusError::RegionOutOfRange {
                    index: idx,
                    start: r.start,
                    end: r.end,
                    size,
                });
            }
            if idx > 0 && r.start < prev_end {
                return Err(MappedBusError::Overlap {
                    prev_index: idx - 1,
                    prev_end,
                    index: idx,
                    start: r.start,
                });
            }
            let ram_len = r.ram.len() as u64;
            if r.ram_offset.saturating_add(r.len()) > ram_len {
                return Err(MappedBusError::BackingOutOfRange {
                    index: idx,
                    ram_offset: r.ram_offset,
                    len: r.len(),
                    ram_len,
                });
            }
            prev_end = r.end;
        }

        Ok(Self {
            name: name.into(),
            size,
            regions,
        })
    }

    pub fn regions(&self) -> &[BusMapping] {
        &self.regions
    }

    #[inline]
    fn first_region_index_for_addr(&self, addr: u64) -> usize {
        self.regions.partition_point(|r| r.end <= addr)
    }

    /// Visits each mapped piece of `[addr, end)` as `(bus_offset_in_access, region, ram_addr, len)`.
    fn for_each_piece(
        &self,
        addr: u64,
        end: u64,
        mut f: impl FnMut(usize, &BusMapping, u64, usize) -> DomainResult<()>,
    ) -> DomainResult<()> {
        let mut idx = self.first_region_index_for_addr(addr);
        while let Some(region) = self.regions.get(idx) {
            if region.start >= end {
                break;
            }
            let inter_start = addr.max(region.start);
            let inter_end = end.min(region.end);
            if inter_start < inter_end {
                let off = (inter_start - addr) as usize;
                let len = (inter_end - inter_start) as usize;
                let ram_addr = region.ram_offset + (inter_start - region.start);
                f(off, region, ram_addr, len)?;
            }
            idx += 1;
        }
        Ok(())
    }
}

impl MemoryDomain for MappedBus {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn writable(&self) -> bool {
        true
    }

    fn read_into(&self, addr: u64, dst: &mut [u8]) -> DomainResult<()> {
        let end = check_range(self.size, addr, dst.len())?;
        if dst.is_empty() {
            return Ok(());
        }
        dst.fill(0xFF);
        self.for_each_piece(addr, end, |off, region, ram_addr, len| {
            region.ram.read(ram_addr, &mut dst[off..off + len])
        })
    }

    fn write_from(&self, addr: u64, src: &[u8]) -> DomainResult<()> {
        let end = check_range(self.size, addr, src.len())?;
        self.for_each_piece(addr, end, |off, region, ram_addr, len| {
            region.ram.write(ram_addr, &src[off..off + len])
        })
    }
}
