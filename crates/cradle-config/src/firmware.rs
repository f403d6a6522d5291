use cradle_sandbox::{BufferDescriptor, FirmwareSettingsWire};

use tracing::{debug, warn};

use crate::error::{ConfigError, Result};
use crate::settings::{StartUp, SyncSettings};

/// Language-code bit the core reads as "boot straight into the cartridge".
const AUTO_BOOT_MARKER: u8 = 0x40;
/// Top bit of the language code; never set by the host.
const RESERVED_LANGUAGE_BIT: u8 = 0x80;

/// Header field holding the user-settings offset, in 8-byte units.
const USER_SETTINGS_POINTER: usize = 0x20;
/// Two consecutive copies of the user-settings block.
const USER_SETTINGS_LEN: usize = 2 * 0x100;

const MAX_USERNAME_CHARS: usize = 10;
const MAX_MESSAGE_CHARS: usize = 26;

/// Firmware personalization, owned by the load configuration until it is staged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwarePersonalization {
    pub username: Vec<u8>,
    pub language: u8,
    pub birthday_month: u8,
    pub birthday_day: u8,
    pub favourite_colour: u8,
    /// At least one byte long.
    pub message: Vec<u8>,
}

impl FirmwarePersonalization {
    pub(crate) fn from_settings(sync: &SyncSettings, enhanced: bool) -> Result<Self> {
        if sync.firmware_username.encode_utf16().count() > MAX_USERNAME_CHARS {
            return Err(ConfigError::Configuration(format!(
                "firmware username is longer than {MAX_USERNAME_CHARS} characters"
            )));
        }
        if sync.firmware_message.encode_utf16().count() > MAX_MESSAGE_CHARS {
            return Err(ConfigError::Configuration(format!(
                "firmware message is longer than {MAX_MESSAGE_CHARS} characters"
            )));
        }
        if sync.firmware_language & (RESERVED_LANGUAGE_BIT | AUTO_BOOT_MARKER) != 0 {
            return Err(ConfigError::Configuration(format!(
                "firmware language {:#04x} uses reserved bits",
                sync.firmware_language
            )));
        }
        if !(1..=12).contains(&sync.firmware_birthday_month)
            || !(1..=31).contains(&sync.firmware_birthday_day)
        {
            return Err(ConfigError::Configuration(format!(
                "invalid firmware birthday {}/{}",
                sync.firmware_birthday_month, sync.firmware_birthday_day
            )));
        }
        if sync.firmware_favourite_colour > 15 {
            return Err(ConfigError::Configuration(format!(
                "invalid firmware favourite colour {}",
                sync.firmware_favourite_colour
            )));
        }

        let mut language = sync.firmware_language;
        if !enhanced && sync.firmware_start_up == StartUp::AutoBoot {
            language |= AUTO_BOOT_MARKER;
        }

        let mut message = sync.firmware_message.as_bytes().to_vec();
        if message.is_empty() {
            message.push(0);
        }

        Ok(Self {
            username: sync.firmware_username.as_bytes().to_vec(),
            language,
            birthday_month: sync.firmware_birthday_month,
            birthday_day: sync.firmware_birthday_day,
            favourite_colour: sync.firmware_favourite_colour,
            message,
        })
    }

    pub fn as_wire(&self) -> FirmwareSettingsWire<'_> {
        FirmwareSettingsWire {
            username: descriptor(&self.username),
            language: self.language,
            birthday_month: self.birthday_month,
            birthday_day: self.birthday_day,
            favourite_colour: self.favourite_colour,
            message: descriptor(&self.message),
        }
    }
}

/// Zeroes both user-settings copies of a plain firmware image so nothing from the dump's owner
/// reaches the core. Falls back to the last two blocks when the header pointer is out of range.
pub(crate) fn scrub_user_data(image: &mut [u8]) {
    let Some(fallback) = image.len().checked_sub(USER_SETTINGS_LEN) else {
        warn!(len = image.len(), "firmware image too short to scrub");
        return;
    };
    let start = image
        .get(USER_SETTINGS_POINTER..USER_SETTINGS_POINTER + 2)
        .map(|b| usize::from(u16::from_le_bytes([b[0], b[1]])) * 8)
        .filter(|&start| start >= USER_SETTINGS_POINTER + 2 && start <= fallback)
        .unwrap_or(fallback);
    image[start..start + USER_SETTINGS_LEN].fill(0);
    debug!(offset = start, "scrubbed firmware user settings");
}

// Lengths were bounded when the record was built.
fn descriptor(bytes: &[u8]) -> BufferDescriptor<'_> {
    BufferDescriptor::try_from_slice(bytes).unwrap_or(BufferDescriptor::EMPTY)
}
