use bitflags::bitflags;

bitflags! {
    /// Packed load flags as the core sees them.
    ///
    /// Host code builds these from a typed configuration record in exactly one place; nothing on
    /// the host side should test individual bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct LoadFlagsWire: u32 {
        const USE_REAL_BIOS = 1 << 0;
        const SKIP_FIRMWARE = 1 << 1;
        const SECONDARY_CART_PRESENT = 1 << 2;
        const CLEAR_PERSISTENT = 1 << 3;
        const FIRMWARE_OVERRIDE = 1 << 4;
        const DUAL_CHIP_MODE = 1 << 5;
        const LOAD_SECONDARY_APP = 1 << 6;
        const THREADED_RENDERING = 1 << 7;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Buttons: u16 {
        const A = 1 << 0;
        const B = 1 << 1;
        const SELECT = 1 << 2;
        const START = 1 << 3;
        const RIGHT = 1 << 4;
        const LEFT = 1 << 5;
        const UP = 1 << 6;
        const DOWN = 1 << 7;
        const R = 1 << 8;
        const L = 1 << 9;
        const X = 1 << 10;
        const Y = 1 << 11;
        const TOUCH = 1 << 12;
        const LID_OPEN = 1 << 13;
        const LID_CLOSE = 1 << 14;
        const POWER = 1 << 15;
    }
}

/// A `(length, borrowed view)` pair. An absent buffer has length 0 and no view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferDescriptor<'a> {
    len: u32,
    view: Option<&'a [u8]>,
}

impl<'a> BufferDescriptor<'a> {
    pub const EMPTY: BufferDescriptor<'static> = BufferDescriptor { len: 0, view: None };

    /// Returns `None` if `bytes` is too long to describe on the wire.
    pub fn try_from_slice(bytes: &'a [u8]) -> Option<Self> {
        let len = u32::try_from(bytes.len()).ok()?;
        Some(Self {
            len,
            view: Some(bytes),
        })
    }

    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_present(&self) -> bool {
        self.view.is_some()
    }

    pub fn view(&self) -> Option<&'a [u8]> {
        self.view
    }
}

/// A read-only file exposed to the core for the duration of `init` (boot ROMs, firmware).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamedFile<'a> {
    pub name: &'a str,
    pub bytes: &'a [u8],
}

/// Load-time structure, in wire field order.
#[derive(Debug, Clone, Default)]
pub struct LoadData<'a> {
    pub primary_rom: BufferDescriptor<'a>,
    pub secondary_rom: BufferDescriptor<'a>,
    pub secondary_ram: BufferDescriptor<'a>,
    pub persistent_storage: BufferDescriptor<'a>,
    pub title_metadata: BufferDescriptor<'a>,
    pub audio_bitrate: u8,
    pub files: Vec<NamedFile<'a>>,
}

impl<'a> LoadData<'a> {
    pub fn file(&self, name: &str) -> Option<&'a [u8]> {
        self.files.iter().find(|f| f.name == name).map(|f| f.bytes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FirmwareSettingsWire<'a> {
    pub username: BufferDescriptor<'a>,
    pub language: u8,
    pub birthday_month: u8,
    pub birthday_day: u8,
    pub favourite_colour: u8,
    /// Never zero-length; the core requires a non-empty buffer.
    pub message: BufferDescriptor<'a>,
}

/// Per-frame input. Built and consumed within a single frame advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameRequest {
    /// Real-time clock value, in seconds since the unix epoch.
    pub time: i64,
    pub keys: Buttons,
    pub touch_x: u8,
    pub touch_y: u8,
    pub mic_volume: u8,
    pub light_sensor: u8,
    pub consider_alt_lag: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameOutput {
    pub lagged: bool,
    /// Emulated cycles executed by the primary processor this frame.
    pub cycles: u64,
}
