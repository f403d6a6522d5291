use std::io::{Read, Write};

use crate::error::{Result, SnapshotError};
use crate::io::{ReadLeExt, WriteLeExt};

const MAX_CHUNK_SIZE: u32 = 64 * 1024 * 1024;
/// Upper bound on a decoded core image; anything larger is treated as corruption.
pub(crate) const MAX_CORE_LEN: u64 = 4 * 1024 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Compression {
    None = 0,
    Lz4 = 1,
}

impl Compression {
    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Lz4),
            _ => Err(SnapshotError::Corrupt("invalid compression kind")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkOptions {
    pub compression: Compression,
    pub chunk_size: u32,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            compression: Compression::Lz4,
            chunk_size: 1024 * 1024,
        }
    }
}

pub fn encode_chunked<W: Write>(w: &mut W, bytes: &[u8], opts: ChunkOptions) -> Result<()> {
    if opts.chunk_size == 0 || opts.chunk_size > MAX_CHUNK_SIZE {
        return Err(SnapshotError::Corrupt("invalid chunk size"));
    }

    w.write_u64_le(bytes.len() as u64)?;
    w.write_u32_le(opts.chunk_size)?;
    w.write_u8(opts.compression as u8)?;
    w.write_bytes(&[0u8; 3])?; // reserved

    for chunk in bytes.chunks(opts.chunk_size as usize) {
        let compressed = compress(opts.compression, chunk);
        w.write_u32_le(chunk.len() as u32)?;
        w.write_u32_le(
            compressed
                .len()
                .try_into()
                .map_err(|_| SnapshotError::Corrupt("compressed chunk too large"))?,
        )?;
        w.write_bytes(&compressed)?;
    }
    Ok(())
}

pub fn decode_chunked<R: Read>(r: &mut R) -> Result<Vec<u8>> {
    let total_len = r.read_u64_le()?;
    if total_len > MAX_CORE_LEN {
        return Err(SnapshotError::Corrupt("core image too large"));
    }
    let chunk_size = r.read_u32_le()?;
    if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
        return Err(SnapshotError::Corrupt("invalid chunk size"));
    }
    let compression = Compression::from_u8(r.read_u8()?)?;
    let mut reserved = [0u8; 3];
    r.read_exact(&mut reserved)?;

    let total: usize = total_len
        .try_into()
        .map_err(|_| SnapshotError::Corrupt("core image too large"))?;
    let mut out = Vec::new();
    // Grow as chunks arrive so a lying header can't force a huge allocation up front.
    out.try_reserve(total.min(chunk_size as usize))
        .map_err(|_| SnapshotError::OutOfMemory { len: total })?;

    let chunk_size = chunk_size as u64;
    let mut offset = 0u64;
    while offset < total_len {
        let expected_uncompressed = (total_len - offset).min(chunk_size) as u32;
        let uncompressed_len = r.read_u32_le()?;
        if uncompressed_len != expected_uncompressed {
            return Err(SnapshotError::Corrupt("chunk uncompressed length mismatch"));
        }
        let compressed_len = r.read_u32_le()?;
        validate_compressed_len(compression, uncompressed_len, compressed_len)?;
        let compressed = r.read_exact_vec(compressed_len as usize)?;
        let decompressed = decompress(compression, &compressed, uncompressed_len as usize)?;
        if decompressed.len() != uncompressed_len as usize {
            return Err(SnapshotError::Corrupt("chunk decompressed to wrong length"));
        }
        out.try_reserve(decompressed.len())
            .map_err(|_| SnapshotError::OutOfMemory { len: total })?;
        out.extend_from_slice(&decompressed);
        offset += uncompressed_len as u64;
    }
    Ok(out)
}

fn max_lz4_compressed_len(uncompressed_len: u32) -> u32 {
    // LZ4 worst-case size: uncompressed + (uncompressed / 255) + 16
    uncompressed_len
        .saturating_add(uncompressed_len / 255)
        .saturating_add(16)
}

fn compress(kind: Compression, input: &[u8]) -> Vec<u8> {
    match kind {
        Compression::None => input.to_vec(),
        Compression::Lz4 => lz4_flex::block::compress(input),
    }
}

fn decompress(kind: Compression, compressed: &[u8], expected_len: usize) -> Result<Vec<u8>> {
    match kind {
        Compression::None => {
            if compressed.len() != expected_len {
                return Err(SnapshotError::Corrupt("stored chunk length mismatch"));
            }
            Ok(compressed.to_vec())
        }
        Compression::Lz4 => Ok(lz4_flex::block::decompress(compressed, expected_len)?),
    }
}

fn validate_compressed_len(
    compression: Compression,
    uncompressed_len: u32,
    compressed_len: u32,
) -> Result<()> {
    match compression {
        Compression::None => {
            if compressed_len != uncompressed_len {
                return Err(SnapshotError::Corrupt(
                    "compressed_len must equal uncompressed_len for stored chunks",
                ));
            }
        }
        Compression::Lz4 => {
            if compressed_len > max_lz4_compressed_len(uncompressed_len) {
                return Err(SnapshotError::Corrupt("lz4 chunk too large"));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    #[test]
    fn small_chunks_split_and_reassemble() {
        let bytes = sample(10_000);
        for compression in [Compression::None, Compression::Lz4] {
            let mut buf = Vec::new();
            encode_chunked(
                &mut buf,
                &bytes,
                ChunkOptions {
                    compression,
                    chunk_size: 4096,
                },
            )
            .unwrap();
            assert_eq!(decode_chunked(&mut Cursor::new(&buf)).unwrap(), bytes);
        }
    }

    #[test]
    fn empty_image_has_no_chunks() {
        let mut buf = Vec::new();
        encode_chunked(&mut buf, &[], ChunkOptions::default()).unwrap();
        assert_eq!(buf.len(), 16);
        assert!(decode_chunked(&mut Cursor::new(&buf)).unwrap().is_empty());
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let opts = ChunkOptions {
            compression: Compression::None,
            chunk_size: 0,
        };
        assert!(matches!(
            encode_chunked(&mut Vec::new(), &[1], opts),
            Err(SnapshotError::Corrupt(_))
        ));
    }

    #[test]
    fn stored_chunk_with_wrong_compressed_len_is_corrupt() {
        let mut buf = Vec::new();
        encode_chunked(
            &mut buf,
            &[1, 2, 3, 4],
            ChunkOptions {
                compression: Compression::None,
                chunk_size: 16,
            },
        )
        .unwrap();
        // Header is 16 bytes, then uncompressed_len, then compressed_len.
        buf[20..24].copy_from_slice(&3u32.to_le_bytes());
        assert!(matches!(
            decode_chunked(&mut Cursor::new(&buf)),
            Err(SnapshotError::Corrupt(_))
        ));
    }
}
