use std::fmt;

use bitflags::bitflags;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CpuId {
    Primary,
    Secondary,
}

impl fmt::Display for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CpuId::Primary => f.write_str("primary"),
            CpuId::Secondary => f.write_str("secondary"),
        }
    }
}

bitflags! {
    /// Which processors the core reports to the trace sink.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TraceMask: u32 {
        const PRIMARY = 1 << 0;
        const SECONDARY = 1 << 1;
    }
}

impl TraceMask {
    pub fn includes(self, cpu: CpuId) -> bool {
        match cpu {
            CpuId::Primary => self.contains(TraceMask::PRIMARY),
            CpuId::Secondary => self.contains(TraceMask::SECONDARY),
        }
    }
}

/// One executed instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceRecord {
    pub cpu: CpuId,
    pub pc: u32,
    pub opcode: u32,
    /// r0..r12, SP, LR, PC.
    pub regs: [u32; 16],
    pub cycles: u64,
}

pub trait TraceSink: Send + Sync {
    fn trace(&self, record: &TraceRecord);
}
