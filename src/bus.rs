//! System bus: the buffer arena, the code/data region tables and the byte
//! dispatcher tying them to the handler devices.
//!
//! Every memory access the CPU core issues comes through here, one byte at a
//! time, least-significant byte first. Accesses outside every mapped region
//! read as the open-bus byte and swallow writes; the region tables never
//! fabricate a value themselves.

use crate::flash::FlashController;
use crate::region::{Backing, BufferId, HandlerKind, MemoryRegion, RegionKind, RegionTable};
use crate::sfr::{SfrBlock, SFR_BASE};

/// Value returned for reads that no region answers.
pub const OPEN_BUS: u8 = 0xFF;

/// Backing buffers for the array-mapped regions. Owned by the bus; regions
/// address them through [`BufferId`] handles.
#[derive(Debug, Clone)]
pub struct Buffers {
    pub rom: Vec<u8>,
    pub ram: Vec<u8>,
    pub flash: Option<Vec<u8>>,
    pub emu_seg: Option<Vec<u8>>,
}

impl Buffers {
    fn slice(&self, id: BufferId) -> &[u8] {
        match id {
            BufferId::Rom => &self.rom,
            BufferId::Ram => &self.ram,
            BufferId::Flash => self.flash.as_deref().unwrap_or(&[]),
            BufferId::EmuSeg => self.emu_seg.as_deref().unwrap_or(&[]),
        }
    }

    fn slice_mut(&mut self, id: BufferId) -> &mut [u8] {
        match id {
            BufferId::Rom => &mut self.rom,
            BufferId::Ram => &mut self.ram,
            BufferId::Flash => self.flash.as_deref_mut().unwrap_or(&mut []),
            BufferId::EmuSeg => self.emu_seg.as_deref_mut().unwrap_or(&mut []),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SystemBus {
    code: RegionTable,
    data: RegionTable,
    buffers: Buffers,
    sfr: SfrBlock,
    flash: FlashController,
}

impl SystemBus {
    pub(crate) fn new(
        code: RegionTable,
        data: RegionTable,
        buffers: Buffers,
        sfr: SfrBlock,
        flash: FlashController,
    ) -> Self {
        Self {
            code,
            data,
            buffers,
            sfr,
            flash,
        }
    }

    pub fn code_table(&self) -> &RegionTable {
        &self.code
    }

    pub fn data_table(&self) -> &RegionTable {
        &self.data
    }

    pub fn sfr(&self) -> &SfrBlock {
        &self.sfr
    }

    pub fn sfr_mut(&mut self) -> &mut SfrBlock {
        &mut self.sfr
    }

    pub fn flash_controller(&self) -> &FlashController {
        &self.flash
    }

    pub fn flash_controller_mut(&mut self) -> &mut FlashController {
        &mut self.flash
    }

    pub fn rom(&self) -> &[u8] {
        &self.buffers.rom
    }

    pub fn ram(&self) -> &[u8] {
        &self.buffers.ram
    }

    pub fn ram_mut(&mut self) -> &mut [u8] {
        &mut self.buffers.ram
    }

    /// Flash image, verbatim. Hosts use this to persist the flash ROM.
    pub fn flash(&self) -> Option<&[u8]> {
        self.buffers.flash.as_deref()
    }

    pub fn flash_mut(&mut self) -> Option<&mut [u8]> {
        self.buffers.flash.as_deref_mut()
    }

    pub fn emu_seg(&self) -> Option<&[u8]> {
        self.buffers.emu_seg.as_deref()
    }

    pub fn emu_seg_mut(&mut self) -> Option<&mut [u8]> {
        self.buffers.emu_seg.as_deref_mut()
    }

    /// Data-space read of `width` bytes at `(segment << 16) | offset`,
    /// composed least-significant byte first. The offset wraps within the
    /// segment, matching the segmented address arithmetic of the core.
    pub fn read_mem_data(&mut self, segment: u8, offset: u16, width: u8) -> u64 {
        self.read_in(RegionKind::Data, segment, offset, width)
    }

    pub fn write_mem_data(&mut self, segment: u8, offset: u16, width: u8, value: u64) {
        self.write_in(RegionKind::Data, segment, offset, width, value);
    }

    /// Code-space read, used for instruction fetch and table reads.
    pub fn read_mem_code(&mut self, segment: u8, offset: u16, width: u8) -> u64 {
        self.read_in(RegionKind::Code, segment, offset, width)
    }

    pub fn write_mem_code(&mut self, segment: u8, offset: u16, width: u8, value: u64) {
        self.write_in(RegionKind::Code, segment, offset, width, value);
    }

    fn read_in(&mut self, kind: RegionKind, segment: u8, offset: u16, width: u8) -> u64 {
        let mut value = 0u64;
        for i in 0..width {
            let byte = self.read_byte_in(kind, segment, offset.wrapping_add(i as u16));
            value |= (byte as u64) << (8 * i as u32);
        }
        value
    }

    fn write_in(&mut self, kind: RegionKind, segment: u8, offset: u16, width: u8, value: u64) {
        for i in 0..width {
            let byte = ((value >> (8 * i as u32)) & 0xFF) as u8;
            self.write_byte_in(kind, segment, offset.wrapping_add(i as u16), byte);
        }
    }

    fn table(&self, kind: RegionKind) -> &RegionTable {
        match kind {
            RegionKind::Code => &self.code,
            RegionKind::Data => &self.data,
        }
    }

    fn read_byte_in(&mut self, kind: RegionKind, segment: u8, offset: u16) -> u8 {
        let address = ((segment as u32) << 16) | offset as u32;
        let Some(&region) = self.table(kind).resolve(address) else {
            return OPEN_BUS;
        };
        match region.backing {
            Backing::Array { buffer, offset: base } => {
                let index = (address - region.addr_low + base) as usize;
                // Regions may advertise more space than the image provides;
                // unpopulated bytes read as open bus, like blank silicon.
                self.buffers.slice(buffer).get(index).copied().unwrap_or(OPEN_BUS)
            }
            Backing::Handler(HandlerKind::Sfr) => self.sfr.read((address - SFR_BASE) as u16),
            Backing::Handler(HandlerKind::Flash) => {
                let flash = self.buffers.flash.as_deref().unwrap_or(&[]);
                self.flash.read(segment, offset, flash)
            }
            Backing::Handler(HandlerKind::OpenBus) => OPEN_BUS,
        }
    }

    fn write_byte_in(&mut self, kind: RegionKind, segment: u8, offset: u16, value: u8) {
        let address = ((segment as u32) << 16) | offset as u32;
        let Some(&region) = self.table(kind).resolve(address) else {
            return;
        };
        if !region.writable {
            return;
        }
        match region.backing {
            Backing::Array { buffer, offset: base } => {
                let index = (address - region.addr_low + base) as usize;
                if let Some(slot) = self.buffers.slice_mut(buffer).get_mut(index) {
                    *slot = value;
                }
            }
            Backing::Handler(HandlerKind::Sfr) => {
                self.sfr.write((address - SFR_BASE) as u16, value);
            }
            Backing::Handler(HandlerKind::Flash) => {
                let Some(flash) = self.buffers.flash.as_deref_mut() else {
                    return;
                };
                self.flash.write(segment, offset, value, flash);
            }
            Backing::Handler(HandlerKind::OpenBus) => {}
        }
    }

    /// Resolves a data-space address without performing an access.
    pub fn resolve_data(&self, address: u32) -> Option<&MemoryRegion> {
        self.data.resolve(address)
    }

    /// Resolves a code-space address without performing an access.
    pub fn resolve_code(&self, address: u32) -> Option<&MemoryRegion> {
        self.code.resolve(address)
    }
}
