//! Raw-buffer save state.
//!
//! Persisted state is exactly the contents of the mutable device buffers:
//! RAM, the SFR block and, where present, flash and the emulator segment.
//! The container is a zip archive with a small JSON metadata entry; every
//! payload entry is a verbatim byte copy with no header or transformation.

use crate::bus::SystemBus;
use crate::device::DeviceDescriptor;
use crate::sfr::SFR_SIZE;
use crate::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use zip::read::ZipArchive;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const SNAPSHOT_MAGIC: &str = "nxu8-bus.snapshot";
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub magic: String,
    pub version: u32,
    pub hwid: u8,
    pub real_hw: bool,
    pub ram_size: usize,
    pub sfr_size: usize,
    #[serde(default)]
    pub flash_size: usize,
    #[serde(default)]
    pub emu_seg_size: usize,
}

pub fn save_snapshot(path: &Path, bus: &SystemBus, descriptor: &DeviceDescriptor) -> Result<()> {
    let file = File::create(path)?;
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let metadata = SnapshotMetadata {
        magic: SNAPSHOT_MAGIC.to_string(),
        version: SNAPSHOT_VERSION,
        hwid: descriptor.hwid,
        real_hw: descriptor.real_hw,
        ram_size: bus.ram().len(),
        sfr_size: SFR_SIZE,
        flash_size: bus.flash().map(<[u8]>::len).unwrap_or(0),
        emu_seg_size: bus.emu_seg().map(<[u8]>::len).unwrap_or(0),
    };

    zip.start_file("metadata.json", options)?;
    zip.write_all(&serde_json::to_vec_pretty(&metadata)?)?;

    zip.start_file("ram.bin", options)?;
    zip.write_all(bus.ram())?;

    zip.start_file("sfr.bin", options)?;
    zip.write_all(bus.sfr().as_slice())?;

    if let Some(flash) = bus.flash() {
        zip.start_file("flash.bin", options)?;
        zip.write_all(flash)?;
    }

    if let Some(emu_seg) = bus.emu_seg() {
        zip.start_file("emuseg.bin", options)?;
        zip.write_all(emu_seg)?;
    }

    zip.finish()?;
    Ok(())
}

pub fn load_snapshot(
    path: &Path,
    bus: &mut SystemBus,
    descriptor: &DeviceDescriptor,
) -> Result<SnapshotMetadata> {
    let file = File::open(path)?;
    let mut archive = ZipArchive::new(file)?;

    let metadata: SnapshotMetadata = {
        let mut buf = Vec::new();
        let mut entry = archive
            .by_name("metadata.json")
            .map_err(|e| CoreError::InvalidSnapshot(format!("metadata.json missing: {e}")))?;
        entry.read_to_end(&mut buf)?;
        serde_json::from_slice(&buf)?
    };
    if metadata.magic != SNAPSHOT_MAGIC || metadata.version != SNAPSHOT_VERSION {
        return Err(CoreError::InvalidSnapshot(
            "snapshot magic/version mismatch".to_string(),
        ));
    }
    if metadata.hwid != descriptor.hwid {
        return Err(CoreError::InvalidSnapshot(format!(
            "snapshot was taken on hwid {}, device is hwid {}",
            metadata.hwid, descriptor.hwid
        )));
    }

    let ram = read_entry(&mut archive, "ram.bin")?;
    if ram.len() != bus.ram().len() {
        return Err(CoreError::InvalidSnapshot(format!(
            "ram.bin size mismatch (expected {}, got {})",
            bus.ram().len(),
            ram.len()
        )));
    }
    bus.ram_mut().copy_from_slice(&ram);

    let sfr = read_entry(&mut archive, "sfr.bin")?;
    if sfr.len() != SFR_SIZE {
        return Err(CoreError::InvalidSnapshot(format!(
            "sfr.bin size mismatch (expected {SFR_SIZE}, got {})",
            sfr.len()
        )));
    }
    bus.sfr_mut().copy_from_slice(&sfr);

    if let Some(expected) = bus.flash().map(<[u8]>::len) {
        let flash = read_entry(&mut archive, "flash.bin")?;
        if flash.len() != expected {
            return Err(CoreError::InvalidSnapshot(format!(
                "flash.bin size mismatch (expected {expected}, got {})",
                flash.len()
            )));
        }
        if let Some(target) = bus.flash_mut() {
            target.copy_from_slice(&flash);
        }
    }

    if let Some(expected) = bus.emu_seg().map(<[u8]>::len) {
        let emu_seg = read_entry(&mut archive, "emuseg.bin")?;
        if emu_seg.len() != expected {
            return Err(CoreError::InvalidSnapshot(format!(
                "emuseg.bin size mismatch (expected {expected}, got {})",
                emu_seg.len()
            )));
        }
        if let Some(target) = bus.emu_seg_mut() {
            target.copy_from_slice(&emu_seg);
        }
    }

    // The command automaton is not persisted; a restored machine starts
    // with the flash idle.
    bus.flash_controller_mut().reset();

    Ok(metadata)
}

fn read_entry(archive: &mut ZipArchive<File>, name: &str) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut entry = archive
        .by_name(name)
        .map_err(|e| CoreError::InvalidSnapshot(format!("{name} missing: {e}")))?;
    entry.read_to_end(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{configure, HWID_ES, HWID_ES_PLUS};
    use crate::flash::FlashMode;
    use std::path::PathBuf;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("nxu8-bus-{}-{name}", std::process::id()))
    }

    fn es_plus() -> DeviceDescriptor {
        DeviceDescriptor {
            hwid: HWID_ES_PLUS,
            real_hw: false,
            ko_mode: false,
            is_5800p: false,
            sample: false,
            pd_value: None,
        }
    }

    #[test]
    fn round_trip_restores_buffers_verbatim() {
        let desc = es_plus();
        let (mut bus, _) = configure(&desc, vec![0x90; 0x20000], None, 0x8000, 0x7000).unwrap();
        bus.write_mem_data(0, 0x8000, 2, 0xBEEF);
        bus.write_mem_data(0, 0xF123, 1, 0x42);

        let path = scratch_path("roundtrip.zip");
        save_snapshot(&path, &bus, &desc).unwrap();

        let (mut fresh, _) = configure(&desc, vec![0x90; 0x20000], None, 0x8000, 0x7000).unwrap();
        let metadata = load_snapshot(&path, &mut fresh, &desc).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(metadata.hwid, HWID_ES_PLUS);
        assert_eq!(fresh.read_mem_data(0, 0x8000, 2), 0xBEEF);
        assert_eq!(fresh.sfr().peek(0x123), 0x42);
        assert_eq!(fresh.ram(), bus.ram());
    }

    #[test]
    fn load_resets_a_mid_sequence_flash_automaton() {
        let desc = DeviceDescriptor {
            hwid: HWID_ES,
            is_5800p: true,
            ..es_plus()
        };
        let (mut bus, _) = configure(
            &desc,
            vec![0x90; 0x80000],
            Some(vec![0; 0x80000]),
            0x8000,
            0x7000,
        )
        .unwrap();
        let path = scratch_path("flashmode.zip");
        save_snapshot(&path, &bus, &desc).unwrap();

        bus.write_mem_data(8, 0x0AAA, 1, 0xAA);
        bus.write_mem_data(8, 0x0555, 1, 0x55);
        assert_eq!(bus.flash_controller().mode(), FlashMode::Unlock2);

        load_snapshot(&path, &mut bus, &desc).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(bus.flash_controller().mode(), FlashMode::Idle);
    }

    #[test]
    fn mismatched_device_is_rejected() {
        let desc = es_plus();
        let (bus, _) = configure(&desc, vec![0x90; 0x20000], None, 0x8000, 0x7000).unwrap();
        let path = scratch_path("mismatch.zip");
        save_snapshot(&path, &bus, &desc).unwrap();

        let other = DeviceDescriptor {
            hwid: crate::device::HWID_CLASSWIZ_EX,
            ..es_plus()
        };
        let (mut target, _) =
            configure(&other, vec![0x90; 0x20000], None, 0xD000, 0x2000).unwrap();
        let err = load_snapshot(&path, &mut target, &other).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(matches!(err, CoreError::InvalidSnapshot(_)));
    }

    #[test]
    fn mismatched_ram_size_is_rejected() {
        let desc = es_plus();
        let (bus, _) = configure(&desc, vec![0x90; 0x20000], None, 0x8000, 0x7000).unwrap();
        let path = scratch_path("ramsize.zip");
        save_snapshot(&path, &bus, &desc).unwrap();

        let (mut target, _) =
            configure(&desc, vec![0x90; 0x20000], None, 0x8000, 0x1000).unwrap();
        let err = load_snapshot(&path, &mut target, &desc).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(matches!(err, CoreError::InvalidSnapshot(_)));
    }
}
