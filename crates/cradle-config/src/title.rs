use std::fmt;

/// Offset of the big-endian title id in the primary ROM header.
const TITLE_ID_OFFSET: usize = 0x230;
/// Offset of the region-compatibility byte in the primary ROM header.
pub(crate) const REGION_BYTE_OFFSET: usize = 0x1B0;

const DOWNLOADABLE_UPPER: u32 = 0x0003_0004;
const ENHANCED_UPPER: u32 = 0x0003_0000;

/// A 64-bit title identifier from the primary ROM header. Zero if the header is too short.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TitleId(pub u64);

impl TitleId {
    pub fn from_header(rom: &[u8]) -> Self {
        match rom.get(TITLE_ID_OFFSET..TITLE_ID_OFFSET + 8) {
            // Stored with its most significant byte last.
            Some(bytes) => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(bytes);
                raw.reverse();
                TitleId(u64::from_be_bytes(raw))
            }
            None => TitleId(0),
        }
    }

    pub fn upper(self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub fn lower(self) -> u32 {
        self.0 as u32
    }

    /// A downloadable application; loads as a secondary app in enhanced mode.
    pub fn is_downloadable(self) -> bool {
        self.upper() == DOWNLOADABLE_UPPER
    }

    /// Any title built for the enhanced variant, including downloadable ones.
    pub fn is_enhanced_title(self) -> bool {
        self.upper() & !0xFF == ENHANCED_UPPER
    }
}

impl fmt::Display for TitleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_with_title(id: u64) -> Vec<u8> {
        let mut rom = vec![0u8; 0x240];
        rom[TITLE_ID_OFFSET..TITLE_ID_OFFSET + 8].copy_from_slice(&id.to_le_bytes());
        rom
    }

    #[test]
    fn title_id_reads_from_last_byte_down() {
        let mut rom = vec![0u8; 0x238];
        rom[0x237] = 0x00;
        rom[0x236] = 0x03;
        rom[0x235] = 0x00;
        rom[0x234] = 0x04;
        rom[0x233] = 0x4B;
        rom[0x232] = 0x41;
        rom[0x231] = 0x42;
        rom[0x230] = 0x43;
        let id = TitleId::from_header(&rom);
        assert_eq!(id, TitleId(0x0003_0004_4B41_4243));
        assert_eq!(id.to_string(), "000300044b414243");
    }

    #[test]
    fn classification() {
        let dl = TitleId::from_header(&header_with_title(0x0003_0004_1234_5678));
        assert!(dl.is_downloadable());
        assert!(dl.is_enhanced_title());

        let enhanced_cart = TitleId::from_header(&header_with_title(0x0003_0000_1234_5678));
        assert!(!enhanced_cart.is_downloadable());
        assert!(enhanced_cart.is_enhanced_title());

        let system = TitleId::from_header(&header_with_title(0x0003_0015_0000_0000));
        assert!(system.is_enhanced_title());

        let plain = TitleId::from_header(&header_with_title(0));
        assert!(!plain.is_downloadable());
        assert!(!plain.is_enhanced_title());
    }

    #[test]
    fn short_header_has_no_title() {
        assert_eq!(TitleId::from_header(&[0xFF; 0x237]), TitleId(0));
        assert_eq!(TitleId::from_header(&[]), TitleId(0));
    }
}
