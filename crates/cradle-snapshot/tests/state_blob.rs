use std::io::Cursor;

use cradle_snapshot::{
    read_state, save_state, ChunkOptions, Compression, HostState, SaveOptions, SectionId,
    SnapshotError, StateBlob, WriteLeExt, STATE_MAGIC,
};

fn sample_blob() -> StateBlob {
    StateBlob {
        core: (0..50_000u32).map(|i| (i % 97) as u8).collect(),
        host: HostState {
            frame: 1234,
            lag_count: 17,
            is_lag: true,
            rtc_frames: 1234,
        },
    }
}

fn encode(blob: &StateBlob, options: SaveOptions) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    save_state(&mut cursor, blob, options).unwrap();
    cursor.into_inner()
}

#[test]
fn save_then_read_returns_identical_blob() {
    let blob = sample_blob();
    for compression in [Compression::None, Compression::Lz4] {
        let bytes = encode(
            &blob,
            SaveOptions {
                core: ChunkOptions {
                    compression,
                    chunk_size: 8192,
                },
            },
        );
        assert_eq!(&bytes[..8], STATE_MAGIC);
        assert_eq!(read_state(&mut Cursor::new(&bytes)).unwrap(), blob);
    }
}

#[test]
fn encoding_is_deterministic() {
    let blob = sample_blob();
    assert_eq!(
        encode(&blob, SaveOptions::default()),
        encode(&blob, SaveOptions::default())
    );
}

#[test]
fn truncated_blob_is_rejected() {
    let bytes = encode(&sample_blob(), SaveOptions::default());
    for cut in [0, 7, 16, 30, bytes.len() - 1] {
        let err = read_state(&mut Cursor::new(&bytes[..cut])).unwrap_err();
        assert!(
            matches!(err, SnapshotError::Io(_) | SnapshotError::Corrupt(_)),
            "cut={cut}: {err:?}"
        );
    }
}

#[test]
fn wrong_magic_is_rejected() {
    let mut bytes = encode(&sample_blob(), SaveOptions::default());
    bytes[0] ^= 0xFF;
    assert!(matches!(
        read_state(&mut Cursor::new(&bytes)),
        Err(SnapshotError::InvalidMagic)
    ));
}

#[test]
fn future_version_is_rejected() {
    let mut bytes = encode(&sample_blob(), SaveOptions::default());
    bytes[8..10].copy_from_slice(&2u16.to_le_bytes());
    assert!(matches!(
        read_state(&mut Cursor::new(&bytes)),
        Err(SnapshotError::UnsupportedVersion(2))
    ));
}

#[test]
fn unknown_sections_are_skipped() {
    let blob = sample_blob();
    let mut bytes = encode(&blob, SaveOptions::default());
    bytes.write_u32_le(0xDEAD).unwrap();
    bytes.write_u16_le(1).unwrap();
    bytes.write_u16_le(0).unwrap();
    bytes.write_u64_le(3).unwrap();
    bytes.extend_from_slice(&[1, 2, 3]);
    assert_eq!(read_state(&mut Cursor::new(&bytes)).unwrap(), blob);
}

#[test]
fn missing_host_section_is_corrupt() {
    let bytes = encode(&sample_blob(), SaveOptions::default());
    // Locate the HOST section header by scanning for its id after the CORE section.
    let core_len = u64::from_le_bytes(bytes[24..32].try_into().unwrap()) as usize;
    let host_start = 16 + 16 + core_len;
    assert_eq!(
        u32::from_le_bytes(bytes[host_start..host_start + 4].try_into().unwrap()),
        SectionId::HOST.0
    );
    let err = read_state(&mut Cursor::new(&bytes[..host_start])).unwrap_err();
    assert!(matches!(err, SnapshotError::Corrupt("missing HOST section")));
}
