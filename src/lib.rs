//! Bus and peripheral layer for an nX-U8/100 calculator emulator core.
//!
//! This crate sits between an instruction-stepping CPU core and the concrete
//! memory devices of a given hardware variant. It routes every memory access
//! through an ordered region table, models the JEDEC command protocol of the
//! fx-5800P flash device, dispatches special-function-register traffic, and
//! applies the per-instruction peripheral side effects (DSR mirroring, the
//! stop-accept handshake latch, the watchdog unlock sequence and the
//! revision-specific register masking quirks).
//!
//! The CPU core itself is an external collaborator reached through the
//! [`CpuCore`] trait; the host supplies the ROM (and optionally flash) images
//! and a [`DeviceDescriptor`] naming the hardware variant.

use std::path::Path;
use thiserror::Error;

pub mod bus;
pub mod device;
pub mod flash;
pub mod region;
pub mod sfr;
pub mod snapshot;
pub mod step;

pub use bus::{SystemBus, OPEN_BUS};
pub use device::{
    configure, CoreOptions, DeviceDescriptor, HWID_CLASSWIZ_CW, HWID_CLASSWIZ_EX, HWID_ES,
    HWID_ES_PLUS, HWID_SOLAR_II, HWID_TI_MATHPRINT,
};
pub use flash::{FlashController, FlashMode, FlashOp, FLASH_ADDR_MASK};
pub use region::{Backing, BufferId, HandlerKind, MemoryRegion, RegionKind, RegionTable};
pub use sfr::{ReadRule, SfrBlock, WriteRule, SFR_BASE, SFR_SIZE};
pub use snapshot::{
    load_snapshot, save_snapshot, SnapshotMetadata, SNAPSHOT_MAGIC, SNAPSHOT_VERSION,
};
pub use step::{core_step, CpuCore, PeripheralState};

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("serialize error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("snapshot error: {0}")]
    InvalidSnapshot(String),
    #[error("device configuration error: {0}")]
    Config(String),
}

/// One emulated machine instance: the bus with its mapped devices plus the
/// peripheral latches carried across instruction steps.
///
/// All mutable state lives here, so several instances can run side by side.
pub struct Emulator {
    pub bus: SystemBus,
    pub periph: PeripheralState,
    descriptor: DeviceDescriptor,
    options: CoreOptions,
}

impl Emulator {
    /// Builds an instance with the variant's default RAM window.
    pub fn new(
        descriptor: DeviceDescriptor,
        rom: Vec<u8>,
        flash: Option<Vec<u8>>,
    ) -> Result<Self> {
        let (ram_start, ram_size) = descriptor.default_ram_window();
        Self::with_ram_window(descriptor, rom, flash, ram_start, ram_size)
    }

    /// Builds an instance with an explicit RAM window, for hosts that load
    /// ROM images with a nonstandard data segment.
    pub fn with_ram_window(
        descriptor: DeviceDescriptor,
        rom: Vec<u8>,
        flash: Option<Vec<u8>>,
        ram_start: u32,
        ram_size: u32,
    ) -> Result<Self> {
        let (bus, options) = device::configure(&descriptor, rom, flash, ram_start, ram_size)?;
        Ok(Self {
            bus,
            periph: PeripheralState::default(),
            descriptor,
            options,
        })
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    /// Addressing-mode switches the host must forward to the CPU core once
    /// after configuration.
    pub fn options(&self) -> CoreOptions {
        self.options
    }

    /// Advances the machine by one instruction: pre-step register fixups, one
    /// call into the CPU core, then the post-step peripheral latches.
    pub fn step<C: CpuCore>(&mut self, cpu: &mut C) {
        step::core_step(cpu, &mut self.bus, &mut self.periph, &self.descriptor);
    }

    pub fn save_snapshot(&self, path: &Path) -> Result<()> {
        snapshot::save_snapshot(path, &self.bus, &self.descriptor)
    }

    pub fn load_snapshot(&mut self, path: &Path) -> Result<SnapshotMetadata> {
        snapshot::load_snapshot(path, &mut self.bus, &self.descriptor)
    }
}
