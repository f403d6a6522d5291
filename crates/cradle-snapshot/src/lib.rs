mod chunk;
mod error;
mod format;
mod io;

pub use crate::chunk::{ChunkOptions, Compression};
pub use crate::error::{Result, SnapshotError};
pub use crate::format::{SectionId, STATE_ENDIANNESS_LITTLE, STATE_MAGIC, STATE_VERSION_V1};
pub use crate::io::{ReadLeExt, WriteLeExt};

use std::io::{Read, Seek, SeekFrom, Write};

/// Host-side frame bookkeeping stored next to the sandbox image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HostState {
    pub frame: u64,
    pub lag_count: u64,
    pub is_lag: bool,
    /// Frames elapsed on the deterministic real-time clock.
    pub rtc_frames: u64,
}

impl HostState {
    fn encode<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_u64_le(self.frame)?;
        w.write_u64_le(self.lag_count)?;
        w.write_u8(u8::from(self.is_lag))?;
        w.write_u64_le(self.rtc_frames)?;
        Ok(())
    }

    fn decode<R: Read>(r: &mut R) -> Result<Self> {
        let frame = r.read_u64_le()?;
        let lag_count = r.read_u64_le()?;
        let is_lag = match r.read_u8()? {
            0 => false,
            1 => true,
            _ => return Err(SnapshotError::Corrupt("invalid is_lag value")),
        };
        let rtc_frames = r.read_u64_le()?;
        Ok(Self {
            frame,
            lag_count,
            is_lag,
            rtc_frames,
        })
    }
}

/// A decoded state blob: the sandbox's opaque image plus host bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StateBlob {
    pub core: Vec<u8>,
    pub host: HostState,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SaveOptions {
    pub core: ChunkOptions,
}

pub fn save_state<W: Write + Seek>(w: &mut W, blob: &StateBlob, options: SaveOptions) -> Result<()> {
    write_file_header(w)?;
    write_section(w, SectionId::CORE, 1, 0, |w| {
        chunk::encode_chunked(w, &blob.core, options.core)
    })?;
    write_section(w, SectionId::HOST, 1, 0, |w| blob.host.encode(w))?;
    Ok(())
}

/// Decodes a whole state blob without applying anything, so a malformed blob is rejected before
/// any live state is touched.
pub fn read_state<R: Read>(r: &mut R) -> Result<StateBlob> {
    read_file_header(r)?;

    let mut core = None;
    let mut host = None;

    while let Some(header) = read_section_header(r)? {
        let mut section_reader = r.take(header.len);
        match header.id {
            id if id == SectionId::CORE => {
                if header.version == 1 {
                    if core.is_some() {
                        return Err(SnapshotError::Corrupt("duplicate CORE section"));
                    }
                    core = Some(chunk::decode_chunked(&mut section_reader)?);
                }
            }
            id if id == SectionId::HOST => {
                if header.version == 1 {
                    if host.is_some() {
                        return Err(SnapshotError::Corrupt("duplicate HOST section"));
                    }
                    host = Some(HostState::decode(&mut section_reader)?);
                }
            }
            _ => {
                // Unknown section; skip.
            }
        }

        // Consume any trailing bytes (forward-compatible additions inside known sections).
        std::io::copy(&mut section_reader, &mut std::io::sink())?;
        if section_reader.limit() != 0 {
            return Err(SnapshotError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "truncated section payload",
            )));
        }
    }

    let core = core.ok_or(SnapshotError::Corrupt("missing CORE section"))?;
    let host = host.ok_or(SnapshotError::Corrupt("missing HOST section"))?;
    Ok(StateBlob { core, host })
}

#[derive(Debug, Clone, Copy)]
struct SectionHeader {
    id: SectionId,
    version: u16,
    len: u64,
}

fn write_file_header<W: Write>(w: &mut W) -> Result<()> {
    w.write_bytes(STATE_MAGIC)?;
    w.write_u16_le(STATE_VERSION_V1)?;
    w.write_u8(STATE_ENDIANNESS_LITTLE)?;
    w.write_u8(0)?; // reserved
    w.write_u32_le(0)?; // flags/reserved
    Ok(())
}

fn read_file_header<R: Read>(r: &mut R) -> Result<()> {
    let mut magic = [0u8; 8];
    r.read_exact(&mut magic)?;
    if &magic != STATE_MAGIC {
        return Err(SnapshotError::InvalidMagic);
    }
    let version = r.read_u16_le()?;
    if version != STATE_VERSION_V1 {
        return Err(SnapshotError::UnsupportedVersion(version));
    }
    let endianness = r.read_u8()?;
    if endianness != STATE_ENDIANNESS_LITTLE {
        return Err(SnapshotError::InvalidEndianness(endianness));
    }
    let _reserved = r.read_u8()?;
    let _flags = r.read_u32_le()?;
    Ok(())
}

fn write_section<W: Write + Seek>(
    w: &mut W,
    id: SectionId,
    version: u16,
    flags: u16,
    f: impl FnOnce(&mut W) -> Result<()>,
) -> Result<()> {
    let header_pos = w.stream_position()?;
    w.write_u32_le(id.0)?;
    w.write_u16_le(version)?;
    w.write_u16_le(flags)?;
    w.write_u64_le(0)?; // placeholder len

    let payload_start = w.stream_position()?;
    f(w)?;
    let payload_end = w.stream_position()?;

    let len = payload_end
        .checked_sub(payload_start)
        .ok_or(SnapshotError::Corrupt("stream position underflow"))?;

    w.seek(SeekFrom::Start(header_pos + 8))?;
    w.write_u64_le(len)?;
    w.seek(SeekFrom::Start(payload_end))?;
    Ok(())
}

fn read_section_header<R: Read>(r: &mut R) -> Result<Option<SectionHeader>> {
    let mut first = [0u8; 1];
    if r.read(&mut first)? == 0 {
        return Ok(None);
    }
    let mut tag_bytes = [0u8; 4];
    tag_bytes[0] = first[0];
    r.read_exact(&mut tag_bytes[1..])?;
    let id = SectionId(u32::from_le_bytes(tag_bytes));
    let version = r.read_u16_le()?;
    let _flags = r.read_u16_le()?;
    let len = r.read_u64_le()?;
    Ok(Some(SectionHeader { id, version, len }))
}
