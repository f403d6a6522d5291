use std::sync::Arc;

use cradle_mem::{BusMapping, MappedBus, MappedBusError, MemoryDomain, RamDomain, SharedRam};
use cradle_sandbox::{PRIMARY_BUS_NAME, SECONDARY_BUS_NAME};

pub const BUS_SIZE: u64 = 1 << 32;

pub const MAIN_RAM_BASE: u32 = 0x0200_0000;
pub const SHARED_WRAM_BASE: u32 = 0x0300_0000;
pub const SECONDARY_WRAM_BASE: u32 = 0x0380_0000;
pub const VRAM_BASE: u32 = 0x0600_0000;
pub const SLOT2_ROM_BASE: u32 = 0x0800_0000;
pub const SLOT2_RAM_BASE: u32 = 0x0A00_0000;

pub const SHARED_WRAM_SIZE: usize = 0x8000;
pub const SECONDARY_WRAM_SIZE: usize = 0x1_0000;
pub const VRAM_SIZE: usize = 0x1_0000;

/// Where the input registers live, as an offset into main RAM from its end.
pub const INPUT_BLOCK_FROM_END: usize = 0x20;
/// Where firmware personalization is copied, as an offset into main RAM from its end.
pub const FIRMWARE_BLOCK_FROM_END: usize = 0x100;

/// All guest memory of one toy machine.
#[derive(Debug, Clone)]
pub struct MachineMemory {
    pub main: SharedRam,
    pub shared_wram: SharedRam,
    pub secondary_wram: SharedRam,
    pub vram: SharedRam,
    pub slot2_rom: Option<SharedRam>,
    pub slot2_ram: Option<SharedRam>,
    pub persistent: Option<SharedRam>,
    primary_bus: Arc<MappedBus>,
    secondary_bus: Arc<MappedBus>,
}

impl MachineMemory {
    pub fn new(
        main_ram_size: usize,
        slot2_rom: Option<Vec<u8>>,
        slot2_ram: Option<Vec<u8>>,
        persistent: Option<Vec<u8>>,
    ) -> Result<Self, MappedBusError> {
        let main = SharedRam::new(main_ram_size);
        let shared_wram = SharedRam::new(SHARED_WRAM_SIZE);
        let secondary_wram = SharedRam::new(SECONDARY_WRAM_SIZE);
        let vram = SharedRam::new(VRAM_SIZE);
        let slot2_rom = slot2_rom.filter(|b| !b.is_empty()).map(SharedRam::from_vec);
        let slot2_ram = slot2_ram.filter(|b| !b.is_empty()).map(SharedRam::from_vec);
        let persistent = persistent.filter(|b| !b.is_empty()).map(SharedRam::from_vec);

        let mut primary = vec![
            BusMapping::new(MAIN_RAM_BASE.into(), main.clone()),
            BusMapping::new(SHARED_WRAM_BASE.into(), shared_wram.clone()),
            BusMapping::new(VRAM_BASE.into(), vram.clone()),
        ];
        if let Some(rom) = &slot2_rom {
            primary.push(BusMapping::new(SLOT2_ROM_BASE.into(), rom.clone()));
        }
        if let Some(ram) = &slot2_ram {
            primary.push(BusMapping::new(SLOT2_RAM_BASE.into(), ram.clone()));
        }
        let secondary = vec![
            BusMapping::new(MAIN_RAM_BASE.into(), main.clone()),
            BusMapping::new(SHARED_WRAM_BASE.into(), shared_wram.clone()),
            BusMapping::new(SECONDARY_WRAM_BASE.into(), secondary_wram.clone()),
        ];

        Ok(Self {
            primary_bus: Arc::new(MappedBus::new(PRIMARY_BUS_NAME, BUS_SIZE, primary)?),
            secondary_bus: Arc::new(MappedBus::new(SECONDARY_BUS_NAME, BUS_SIZE, secondary)?),
            main,
            shared_wram,
            secondary_wram,
            vram,
            slot2_rom,
            slot2_ram,
            persistent,
        })
    }

    /// Regions covered by a save state, in state order. Cartridge ROM is not state.
    pub fn state_regions(&self) -> Vec<&SharedRam> {
        let mut regions = vec![
            &self.main,
            &self.shared_wram,
            &self.secondary_wram,
            &self.vram,
        ];
        regions.extend(self.slot2_ram.as_ref());
        regions.extend(self.persistent.as_ref());
        regions
    }

    pub fn domains(&self) -> Vec<Arc<dyn MemoryDomain>> {
        let mut domains: Vec<Arc<dyn MemoryDomain>> = vec![
            self.primary_bus.clone(),
            self.secondary_bus.clone(),
            Arc::new(RamDomain::new("Main RAM", self.main.clone(), true)),
            Arc::new(RamDomain::new("Shared WRAM", self.shared_wram.clone(), true)),
            Arc::new(RamDomain::new(
                "Secondary WRAM",
                self.secondary_wram.clone(),
                true,
            )),
            Arc::new(RamDomain::new("VRAM", self.vram.clone(), true)),
        ];
        if let Some(rom) = &self.slot2_rom {
            domains.push(Arc::new(RamDomain::new("Slot-2 ROM", rom.clone(), false)));
        }
        if let Some(ram) = &self.slot2_ram {
            domains.push(Arc::new(RamDomain::new("Slot-2 RAM", ram.clone(), true)));
        }
        if let Some(storage) = &self.persistent {
            domains.push(Arc::new(RamDomain::new(
                "Persistent Storage",
                storage.clone(),
                true,
            )));
        }
        domains
    }
}
