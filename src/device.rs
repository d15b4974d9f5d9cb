//! Hardware-variant descriptors and the one-shot device configurator.
//!
//! A [`DeviceDescriptor`] names one calculator variant and its fixed quirks.
//! [`configure`] turns it plus the host-supplied ROM (and optional flash)
//! image into a fully wired [`SystemBus`], allocating the RAM, SFR and
//! emulator-segment buffers and registering every region the variant maps.
//! Configuration runs once; the descriptor is read-only afterwards.

use crate::bus::{Buffers, SystemBus};
use crate::flash::FlashController;
use crate::region::{BufferId, HandlerKind, MemoryRegion, RegionKind, RegionTable};
use crate::sfr::{ReadRule, SfrBlock, WriteRule};
use crate::{CoreError, Result};
use serde::{Deserialize, Serialize};

/// SOLAR II family.
pub const HWID_SOLAR_II: u8 = 0;
/// ES / FC family; also hosts the flash-equipped fx-5800P.
pub const HWID_ES: u8 = 2;
/// ES PLUS family.
pub const HWID_ES_PLUS: u8 = 3;
/// First-generation ClassWiz (EX/X).
pub const HWID_CLASSWIZ_EX: u8 = 4;
/// Second-generation ClassWiz (CW).
pub const HWID_CLASSWIZ_CW: u8 = 5;
/// TI MathPrint (ML620418A, external watchdog).
pub const HWID_TI_MATHPRINT: u8 = 6;

/// Identifies a hardware variant and its fixed quirks. Constructed by the
/// host once, immutable for the remainder of execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Variant selector; unknown values fall back to ES PLUS behavior.
    pub hwid: u8,
    /// Physically accurate ROM (true) versus emulator-kit ROM (false).
    pub real_hw: bool,
    /// Early ES PLUS keyboard-scan addressing; drops the high ROM mirror.
    #[serde(default)]
    pub ko_mode: bool,
    /// fx-5800P: wires the flash device and its windows. ES family only.
    #[serde(default)]
    pub is_5800p: bool,
    /// Alternate calibration addressing used by sample ClassWiz ROMs.
    #[serde(default)]
    pub sample: bool,
    /// Port-D latch preset, stored into SFR 0x50 at configuration.
    #[serde(default)]
    pub pd_value: Option<u8>,
}

impl DeviceDescriptor {
    pub fn label(&self) -> &'static str {
        match self.hwid {
            HWID_SOLAR_II => "SOLAR II",
            HWID_ES => {
                if self.is_5800p {
                    "fx-5800P"
                } else {
                    "ES"
                }
            }
            HWID_CLASSWIZ_EX => "ClassWiz EX",
            HWID_CLASSWIZ_CW => "ClassWiz CW",
            HWID_TI_MATHPRINT => "TI MathPrint",
            _ => "ES PLUS",
        }
    }

    pub fn has_flash(&self) -> bool {
        self.hwid == HWID_ES && self.is_5800p
    }

    /// Default `(ram_start, ram_size)` window for the variant, matching the
    /// data segments the stock firmware images expect.
    pub fn default_ram_window(&self) -> (u32, u32) {
        match self.hwid {
            HWID_SOLAR_II => (0xE000, 0x1000),
            HWID_CLASSWIZ_EX => (0xD000, 0x2000),
            HWID_CLASSWIZ_CW => (0x9000, 0x6000),
            HWID_TI_MATHPRINT => (0xB000, 0x4000),
            _ => (0x8000, if self.real_hw { 0xE00 } else { 0x7000 }),
        }
    }
}

/// Addressing-mode switches the configurator derives for the CPU core.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoreOptions {
    /// 16-bit word addressing (real-hardware ClassWiz; MathPrint re-asserts
    /// it every step).
    pub word_addressing: bool,
    /// Reduced memory map (SOLAR II).
    pub reduced_map: bool,
}

/// Builds the region tables and backing buffers for one device instance.
///
/// `ram_start`/`ram_size` place the writable RAM window; the data-space ROM
/// mirror covers everything below it. The flash image is required for the
/// fx-5800P and rejected otherwise.
pub fn configure(
    descriptor: &DeviceDescriptor,
    rom: Vec<u8>,
    flash: Option<Vec<u8>>,
    ram_start: u32,
    ram_size: u32,
) -> Result<(SystemBus, CoreOptions)> {
    if descriptor.has_flash() && flash.is_none() {
        return Err(CoreError::Config(
            "fx-5800P configuration requires a flash image".into(),
        ));
    }
    if !descriptor.has_flash() && flash.is_some() {
        return Err(CoreError::Config(
            "flash image supplied for a variant without a flash device".into(),
        ));
    }
    if ram_size == 0 {
        return Err(CoreError::Config("RAM window must not be empty".into()));
    }

    let mut options = CoreOptions::default();
    let mut code = RegionTable::new();
    let mut data = RegionTable::new();
    let mut emu_seg = None;

    if descriptor.has_flash() {
        code.add_region(MemoryRegion::array(
            RegionKind::Code,
            false,
            0x00000,
            0x7FFFF,
            BufferId::Rom,
            0,
        ));
        code.add_region(MemoryRegion::array(
            RegionKind::Code,
            false,
            0x80000,
            0xFFFFF,
            BufferId::Flash,
            0,
        ));
    } else {
        let top = rom.len().saturating_sub(1) as u32;
        code.add_region(MemoryRegion::array(
            RegionKind::Code,
            false,
            0x00000,
            top,
            BufferId::Rom,
            0,
        ));
    }

    // Base data map: ROM window below RAM, then RAM, then the SFR block.
    data.add_region(MemoryRegion::array(
        RegionKind::Data,
        false,
        0x00000,
        ram_start.saturating_sub(1),
        BufferId::Rom,
        0,
    ));
    data.add_region(MemoryRegion::array(
        RegionKind::Data,
        true,
        ram_start,
        ram_start + ram_size - 1,
        BufferId::Ram,
        0,
    ));
    data.add_region(MemoryRegion::handler(
        RegionKind::Data,
        true,
        0x0F000,
        0x0FFFF,
        HandlerKind::Sfr,
    ));

    match descriptor.hwid {
        HWID_CLASSWIZ_EX | HWID_CLASSWIZ_CW => {
            let mirror_high = if descriptor.hwid == HWID_CLASSWIZ_EX {
                0x3FFFF
            } else {
                0x7FFFF
            };
            data.add_region(MemoryRegion::array(
                RegionKind::Data,
                false,
                0x10000,
                mirror_high,
                BufferId::Rom,
                0x10000,
            ));
            if descriptor.real_hw {
                data.add_region(MemoryRegion::array(
                    RegionKind::Data,
                    false,
                    0x50000,
                    0x5FFFF,
                    BufferId::Rom,
                    0,
                ));
                options.word_addressing = true;
            } else {
                let seg_start = if descriptor.hwid == HWID_CLASSWIZ_EX {
                    0x40000
                } else {
                    0x80000
                };
                emu_seg = Some(vec![0u8; 0x10000]);
                data.add_region(MemoryRegion::array(
                    RegionKind::Data,
                    true,
                    seg_start,
                    seg_start + 0xFFFF,
                    BufferId::EmuSeg,
                    0,
                ));
            }
        }
        HWID_TI_MATHPRINT => {
            data.add_region(MemoryRegion::array(
                RegionKind::Data,
                false,
                0x10000,
                0x3FFFF,
                BufferId::Rom,
                0x10000,
            ));
            data.add_region(MemoryRegion::array(
                RegionKind::Data,
                true,
                0x80000,
                0xAFFFF,
                BufferId::Rom,
                0,
            ));
        }
        HWID_SOLAR_II => {
            options.reduced_map = true;
        }
        _ => {
            data.add_region(MemoryRegion::array(
                RegionKind::Data,
                false,
                0x10000,
                0x1FFFF,
                BufferId::Rom,
                0x10000,
            ));
            if descriptor.has_flash() {
                // Battery level stub; always reads 0xFF.
                data.add_region(MemoryRegion::handler(
                    RegionKind::Data,
                    false,
                    0x100000,
                    0x100000,
                    HandlerKind::OpenBus,
                ));
                data.add_region(MemoryRegion::array(
                    RegionKind::Data,
                    true,
                    0x40000,
                    0x47FFF,
                    BufferId::Flash,
                    0x20000,
                ));
                data.add_region(MemoryRegion::handler(
                    RegionKind::Data,
                    true,
                    0x80000,
                    0xFFFFF,
                    HandlerKind::Flash,
                ));
            } else if !descriptor.ko_mode {
                data.add_region(MemoryRegion::array(
                    RegionKind::Data,
                    false,
                    0x80000,
                    0x8FFFF,
                    BufferId::Rom,
                    0,
                ));
            }
        }
    }

    let mut sfr = SfrBlock::new();
    if let Some(pd) = descriptor.pd_value {
        sfr.poke(0x050, pd);
    }
    if descriptor.hwid == HWID_TI_MATHPRINT {
        sfr.set_write_rule(0x900, WriteRule::Constant(0x34));
        sfr.set_write_rule(0x901, WriteRule::SetOnMatch(0));
    }
    if descriptor.has_flash() {
        // Flash status register: reads as "ready", writes are discarded.
        sfr.set_write_rule(0x046, WriteRule::Discard);
        sfr.set_read_rule(0x046, ReadRule::Constant(4));
    }

    let buffers = Buffers {
        rom,
        ram: vec![0u8; ram_size as usize],
        flash,
        emu_seg,
    };
    let bus = SystemBus::new(code, data, buffers, sfr, FlashController::new());
    Ok((bus, options))
}
