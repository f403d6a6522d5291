use std::io::{Cursor, Read, Write};

use cradle_sandbox::{EntryPoint, SandboxStateError};
use cradle_snapshot::{ReadLeExt, WriteLeExt};

use crate::cpu::Cpu;

const STATE_MAGIC: &[u8; 4] = b"TOYC";
const STATE_VERSION: u16 = 1;

// magic, version, entry, flags, frame, two processors, region count
const FIXED_LEN: usize = 4 + 2 + 8 + 4 + 8 + 2 * 16 + 1;

/// Core state payload v1:
///   [u8; 4]  magic "TOYC"
///   u16      version
///   u64      exported worker entry point (0 = none)
///   u32      load flags
///   u64      frame
///   2x       { u32 pc, u32 acc, u64 cycles }
///   u8       region count, then each region as u32 length + bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreState {
    pub worker_entry: Option<EntryPoint>,
    pub flags: u32,
    pub frame: u64,
    pub cpus: [Cpu; 2],
    pub regions: Vec<Vec<u8>>,
}

impl CoreState {
    pub fn encode<W: Write>(&self, w: &mut W) -> cradle_snapshot::Result<()> {
        w.write_bytes(STATE_MAGIC)?;
        w.write_u16_le(STATE_VERSION)?;
        w.write_u64_le(self.worker_entry.map_or(0, |e| e.0))?;
        w.write_u32_le(self.flags)?;
        w.write_u64_le(self.frame)?;
        for cpu in &self.cpus {
            w.write_u32_le(cpu.pc)?;
            w.write_u32_le(cpu.acc)?;
            w.write_u64_le(cpu.cycles)?;
        }
        let count = u8::try_from(self.regions.len())
            .map_err(|_| cradle_snapshot::SnapshotError::Corrupt("too many regions"))?;
        w.write_u8(count)?;
        for region in &self.regions {
            w.write_len_prefixed_bytes_u32(region)?;
        }
        Ok(())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, SandboxStateError> {
        if bytes.len() < FIXED_LEN {
            return Err(SandboxStateError::Truncated {
                expected: FIXED_LEN,
                found: bytes.len(),
            });
        }
        let r = &mut Cursor::new(bytes);

        let mut magic = [0u8; 4];
        r.read_exact(&mut magic).map_err(|_| corrupt())?;
        if &magic != STATE_MAGIC {
            return Err(SandboxStateError::Malformed("bad core state magic"));
        }
        if r.read_u16_le().map_err(|_| corrupt())? != STATE_VERSION {
            return Err(SandboxStateError::Malformed(
                "unsupported core state version",
            ));
        }
        let entry = r.read_u64_le().map_err(|_| corrupt())?;
        let flags = r.read_u32_le().map_err(|_| corrupt())?;
        let frame = r.read_u64_le().map_err(|_| corrupt())?;
        let mut cpus = [Cpu::default(); 2];
        for cpu in &mut cpus {
            cpu.pc = r.read_u32_le().map_err(|_| corrupt())?;
            cpu.acc = r.read_u32_le().map_err(|_| corrupt())?;
            cpu.cycles = r.read_u64_le().map_err(|_| corrupt())?;
        }
        let count = r.read_u8().map_err(|_| corrupt())?;
        let mut regions = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let region = r
                .read_len_prefixed_bytes_u32(bytes.len())
                .map_err(|_| corrupt())?;
            regions.push(region);
        }
        if r.position() != bytes.len() as u64 {
            return Err(SandboxStateError::Malformed(
                "trailing bytes after core state",
            ));
        }

        Ok(Self {
            worker_entry: (entry != 0).then_some(EntryPoint(entry)),
            flags,
            frame,
            cpus,
            regions,
        })
    }
}

fn corrupt() -> SandboxStateError {
    SandboxStateError::Malformed("truncated or corrupt core state")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CoreState {
        CoreState {
            worker_entry: Some(EntryPoint(0x40_1a30)),
            flags: 0x80,
            frame: 77,
            cpus: [
                Cpu {
                    pc: 0x0200_0010,
                    acc: 5,
                    cycles: 900,
                },
                Cpu {
                    pc: 0x0380_0000,
                    acc: 9,
                    cycles: 450,
                },
            ],
            regions: vec![vec![1, 2, 3], vec![], vec![4; 10]],
        }
    }

    fn encoded(state: &CoreState) -> Vec<u8> {
        let mut out = Vec::new();
        state.encode(&mut out).unwrap();
        out
    }

    #[test]
    fn decode_reads_what_encode_wrote() {
        let state = sample();
        assert_eq!(CoreState::decode(&encoded(&state)).unwrap(), state);

        let no_worker = CoreState {
            worker_entry: None,
            ..sample()
        };
        assert_eq!(CoreState::decode(&encoded(&no_worker)).unwrap(), no_worker);
    }

    #[test]
    fn short_input_is_truncated() {
        let bytes = encoded(&sample());
        assert_eq!(
            CoreState::decode(&bytes[..10]),
            Err(SandboxStateError::Truncated {
                expected: FIXED_LEN,
                found: 10
            })
        );
        assert!(matches!(
            CoreState::decode(&bytes[..bytes.len() - 1]),
            Err(SandboxStateError::Malformed(_))
        ));
    }

    #[test]
    fn trailing_and_foreign_bytes_are_rejected() {
        let mut bytes = encoded(&sample());
        bytes.push(0);
        assert!(CoreState::decode(&bytes).is_err());

        let mut bytes = encoded(&sample());
        bytes[0] = b'X';
        assert_eq!(
            CoreState::decode(&bytes),
            Err(SandboxStateError::Malformed("bad core state magic"))
        );
    }
}
