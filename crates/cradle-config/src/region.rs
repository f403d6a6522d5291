use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::title::REGION_BYTE_OFFSET;

/// Persistent-storage region, in preference order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Region {
    Jpn,
    Usa,
    Eur,
    Aus,
    Chn,
    Kor,
}

impl Region {
    pub const PREFERENCE: [Region; 6] = [
        Region::Jpn,
        Region::Usa,
        Region::Eur,
        Region::Aus,
        Region::Chn,
        Region::Kor,
    ];

    pub fn mask(self) -> RegionMask {
        match self {
            Region::Jpn => RegionMask::JPN,
            Region::Usa => RegionMask::USA,
            Region::Eur => RegionMask::EUR,
            Region::Aus => RegionMask::AUS,
            Region::Chn => RegionMask::CHN,
            Region::Kor => RegionMask::KOR,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Region::Jpn => "jpn",
            Region::Usa => "usa",
            Region::Eur => "eur",
            Region::Aus => "aus",
            Region::Chn => "chn",
            Region::Kor => "kor",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

bitflags! {
    /// Region-compatibility bitfield from the primary ROM header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RegionMask: u8 {
        const JPN = 1 << 0;
        const USA = 1 << 1;
        const EUR = 1 << 2;
        const AUS = 1 << 3;
        const CHN = 1 << 4;
        const KOR = 1 << 5;
    }
}

impl RegionMask {
    /// Reads the compatibility byte; a header too short to carry one is compatible with nothing.
    pub fn from_header(rom: &[u8]) -> Self {
        rom.get(REGION_BYTE_OFFSET)
            .map(|&b| RegionMask::from_bits_truncate(b))
            .unwrap_or_else(RegionMask::empty)
    }
}

/// Candidate regions in preference order, optionally restricted to `filter`.
pub fn candidates(filter: Option<RegionMask>) -> impl Iterator<Item = Region> {
    Region::PREFERENCE
        .into_iter()
        .filter(move |r| filter.map_or(true, |mask| mask.contains(r.mask())))
}
