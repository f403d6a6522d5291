pub const STATE_MAGIC: &[u8; 8] = b"CRADLSNP";
pub const STATE_VERSION_V1: u16 = 1;
pub const STATE_ENDIANNESS_LITTLE: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SectionId(pub u32);

impl SectionId {
    /// The sandbox's opaque memory/register image.
    pub const CORE: SectionId = SectionId(1);
    /// Host-side frame bookkeeping.
    pub const HOST: SectionId = SectionId(2);

    pub fn name(self) -> Option<&'static str> {
        match self {
            SectionId::CORE => Some("CORE"),
            SectionId::HOST => Some("HOST"),
            _ => None,
        }
    }
}

impl core::fmt::Display for SectionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if let Some(name) = self.name() {
            write!(f, "{name}({})", self.0)
        } else {
            write!(f, "SectionId({})", self.0)
        }
    }
}
