use cradle_mem::AccessKind;
use cradle_sandbox::{CpuId, TraceRecord};

/// One toy processor. Its "program" is whatever bytes sit in its work RAM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cpu {
    pub pc: u32,
    pub acc: u32,
    pub cycles: u64,
}

/// A memory access made by one step, reported after the RAM lock is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Access {
    pub kind: AccessKind,
    pub addr: u32,
    pub value: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct StepResult {
    pub accesses: [Access; 3],
    pub opcode: u32,
    /// Offset into work RAM that was written.
    pub written: usize,
}

impl Cpu {
    pub fn reset(base: u32, entry_offset: u32) -> Self {
        Self {
            pc: base.wrapping_add(entry_offset & !3),
            acc: entry_offset,
            cycles: 0,
        }
    }

    /// Executes one instruction against `ram`, which is mapped at `base`.
    ///
    /// `fetch` returns the opcode at an aligned RAM offset, possibly from a cache the caller keeps
    /// coherent with writes.
    pub fn step(
        &mut self,
        base: u32,
        ram: &mut [u8],
        seed: u32,
        fetch: impl FnOnce(&[u8], usize) -> u32,
    ) -> StepResult {
        let len = ram.len();
        let pc_offset = (self.pc.wrapping_sub(base) as usize % len) & !3;
        let opcode = fetch(ram, pc_offset);

        let offset = (self
            .pc
            .wrapping_mul(13)
            .wrapping_add(self.acc)
            .wrapping_add(opcode) as usize)
            % len;
        let old = ram[offset];
        let new = old.wrapping_add((self.acc as u8) ^ (self.pc as u8) ^ (seed as u8));
        ram[offset] = new;

        self.acc = self.acc.wrapping_add(u32::from(new) + 1) ^ (opcode >> 7);
        self.pc = base.wrapping_add(((pc_offset + 4) % len) as u32);
        self.cycles += 1;

        let addr = base.wrapping_add(offset as u32);
        StepResult {
            accesses: [
                Access {
                    kind: AccessKind::Execute,
                    addr: base.wrapping_add(pc_offset as u32),
                    value: opcode,
                },
                Access {
                    kind: AccessKind::Read,
                    addr,
                    value: u32::from(old),
                },
                Access {
                    kind: AccessKind::Write,
                    addr,
                    value: u32::from(new),
                },
            ],
            opcode,
            written: offset,
        }
    }

    pub fn trace_record(&self, cpu: CpuId, pc: u32, opcode: u32) -> TraceRecord {
        let mut regs = [0u32; 16];
        regs[0] = self.acc;
        regs[1] = self.cycles as u32;
        regs[15] = self.pc;
        TraceRecord {
            cpu,
            pc,
            opcode,
            regs,
            cycles: self.cycles,
        }
    }
}

/// Reads the little-endian word at `offset`, wrapping at the end of `ram`.
pub fn read_word(ram: &[u8], offset: usize) -> u32 {
    let len = ram.len();
    let mut bytes = [0u8; 4];
    for (i, b) in bytes.iter_mut().enumerate() {
        *b = ram[(offset + i) % len];
    }
    u32::from_le_bytes(bytes)
}
