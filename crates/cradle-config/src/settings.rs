use serde::{Deserialize, Serialize};

use cradle_sandbox::TraceMask;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StartUp {
    Manual,
    #[default]
    AutoBoot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AudioBitrate {
    #[default]
    Auto,
    TenBit,
    SixteenBit,
}

impl AudioBitrate {
    pub fn as_wire(self) -> u8 {
        match self {
            AudioBitrate::Auto => 0,
            AudioBitrate::TenBit => 1,
            AudioBitrate::SixteenBit => 2,
        }
    }
}

/// Settings that change emulated behavior. These are part of a deterministic replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub use_enhanced_mode: bool,
    pub use_real_bios: bool,
    pub skip_firmware: bool,
    pub firmware_override: bool,
    pub clear_persistent_storage: bool,
    pub threaded_rendering: bool,
    pub use_real_time: bool,
    /// Seconds since the unix epoch at frame 0 when the clock is not wall-clock driven.
    pub initial_time: i64,
    pub firmware_username: String,
    pub firmware_language: u8,
    pub firmware_start_up: StartUp,
    pub firmware_birthday_month: u8,
    pub firmware_birthday_day: u8,
    pub firmware_favourite_colour: u8,
    pub firmware_message: String,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            use_enhanced_mode: false,
            use_real_bios: false,
            skip_firmware: false,
            firmware_override: false,
            clear_persistent_storage: false,
            threaded_rendering: true,
            use_real_time: true,
            // 2000-01-01T00:00:00Z
            initial_time: 946_684_800,
            firmware_username: "Cradle".to_owned(),
            firmware_language: 1,
            firmware_start_up: StartUp::AutoBoot,
            firmware_birthday_month: 1,
            firmware_birthday_day: 1,
            firmware_favourite_colour: 0,
            firmware_message: String::new(),
        }
    }
}

/// Presentation-only settings. Changing them never affects emulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub audio_bitrate: AudioBitrate,
    pub consider_alt_lag: bool,
    pub trace_primary: bool,
    pub trace_secondary: bool,
}

impl Settings {
    pub fn trace_mask(&self) -> TraceMask {
        let mut mask = TraceMask::empty();
        mask.set(TraceMask::PRIMARY, self.trace_primary);
        mask.set(TraceMask::SECONDARY, self.trace_secondary);
        mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_json_fields_take_defaults() {
        let sync: SyncSettings =
            serde_json::from_str(r#"{ "use_enhanced_mode": true, "firmware_message": "hi" }"#)
                .unwrap();
        assert!(sync.use_enhanced_mode);
        assert_eq!(sync.firmware_message, "hi");
        assert_eq!(sync.firmware_username, "Cradle");
        assert!(sync.threaded_rendering);

        let settings: Settings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn trace_mask_follows_cpu_toggles() {
        let settings = Settings {
            trace_secondary: true,
            ..Settings::default()
        };
        assert_eq!(settings.trace_mask(), TraceMask::SECONDARY);
    }
}
