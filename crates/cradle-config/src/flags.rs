use cradle_sandbox::LoadFlagsWire;

use crate::settings::SyncSettings;

/// Typed load flags. Only [`LoadFlags::pack`] knows the wire layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadFlags {
    pub use_real_bios: bool,
    pub skip_firmware: bool,
    pub secondary_cart_present: bool,
    pub clear_persistent: bool,
    pub firmware_override: bool,
    pub dual_chip_mode: bool,
    pub load_secondary_app: bool,
    pub threaded_rendering: bool,
}

impl LoadFlags {
    pub fn pack(&self) -> LoadFlagsWire {
        let mut wire = LoadFlagsWire::empty();
        wire.set(LoadFlagsWire::USE_REAL_BIOS, self.use_real_bios);
        wire.set(LoadFlagsWire::SKIP_FIRMWARE, self.skip_firmware);
        wire.set(
            LoadFlagsWire::SECONDARY_CART_PRESENT,
            self.secondary_cart_present,
        );
        wire.set(LoadFlagsWire::CLEAR_PERSISTENT, self.clear_persistent);
        wire.set(LoadFlagsWire::FIRMWARE_OVERRIDE, self.firmware_override);
        wire.set(LoadFlagsWire::DUAL_CHIP_MODE, self.dual_chip_mode);
        wire.set(LoadFlagsWire::LOAD_SECONDARY_APP, self.load_secondary_app);
        wire.set(LoadFlagsWire::THREADED_RENDERING, self.threaded_rendering);
        wire
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct FlagInputs<'a> {
    pub sync: &'a SyncSettings,
    pub enhanced: bool,
    pub downloadable: bool,
    pub deterministic: bool,
    pub firmware_available: bool,
    pub cartridge_count: usize,
}

/// Applies the precedence rules in their fixed order. Each rule sees the results of the ones
/// before it.
pub(crate) fn derive(inputs: FlagInputs<'_>) -> LoadFlags {
    let sync = inputs.sync;
    let mut flags = LoadFlags {
        use_real_bios: sync.use_real_bios,
        skip_firmware: sync.skip_firmware,
        firmware_override: sync.firmware_override,
        clear_persistent: false,
        secondary_cart_present: inputs.cartridge_count > 1,
        dual_chip_mode: inputs.enhanced,
        load_secondary_app: inputs.downloadable,
        threaded_rendering: sync.threaded_rendering,
    };

    // 1. Enhanced mode needs real boot ROMs.
    if inputs.enhanced {
        flags.use_real_bios = true;
    }

    // 2. Nothing to skip without firmware; real-boot and enhanced mode always run it.
    if !inputs.firmware_available || flags.use_real_bios || inputs.enhanced {
        flags.skip_firmware = false;
    }

    // 3. Missing firmware or deterministic replay: personalization comes from settings.
    if !inputs.firmware_available || inputs.deterministic {
        flags.firmware_override = true;
    }

    // 4. Clearing persistent storage only means something in enhanced mode.
    flags.clear_persistent =
        inputs.enhanced && (inputs.deterministic || sync.clear_persistent_storage);

    flags
}
