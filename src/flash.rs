//! JEDEC-style command automaton for the fx-5800P flash device.
//!
//! Guest firmware gates erase and program operations behind the classic
//! 0xAAA/0x555 unlock sequence. The automaton advances only on exact
//! (offset, value) matches; anything else resets it to idle. A value of
//! 0xF0 is the reset command and is honored from every state. Firmware
//! depends on the one-shot 0x80 status read while an erase is pending, so
//! that behavior is reproduced exactly.

use tracing::{debug, warn};

/// Commands address the device modulo its 512 KiB size.
pub const FLASH_ADDR_MASK: u32 = 0x7_FFFF;

const CMD_ADDR_A: u32 = 0xAAA;
const CMD_ADDR_B: u32 = 0x555;
const CMD_RESET: u8 = 0xF0;

/// Current mode of the command automaton. The discriminants match the
/// integer states of the original silicon protocol; `Busy` is kept for
/// numbering compatibility but is never entered (the status read is
/// one-shot).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlashMode {
    #[default]
    Idle,
    Unlock1,
    Unlock2,
    Program,
    Erase1,
    Erase2,
    EraseConfirm,
    Busy,
}

/// Side effect produced by a completed command sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashOp {
    Program { offset: u32, value: u8 },
    EraseSector { offset: u32, len: u32 },
}

/// Pure transition function: `(mode, offset, value)` to the next mode plus
/// an optional side effect. Offsets must already be masked with
/// [`FLASH_ADDR_MASK`].
pub fn transition(mode: FlashMode, offset: u32, value: u8) -> (FlashMode, Option<FlashOp>) {
    if value == CMD_RESET && mode != FlashMode::Program {
        return (FlashMode::Idle, None);
    }
    match (mode, offset, value) {
        (FlashMode::Idle, CMD_ADDR_A, 0xAA) => (FlashMode::Unlock1, None),
        (FlashMode::Unlock1, CMD_ADDR_B, 0x55) => (FlashMode::Unlock2, None),
        (FlashMode::Unlock2, CMD_ADDR_A, 0xA0) => (FlashMode::Program, None),
        (FlashMode::Unlock2, CMD_ADDR_A, 0x80) => (FlashMode::Erase1, None),
        (FlashMode::Program, _, _) => (
            FlashMode::Idle,
            Some(FlashOp::Program { offset, value }),
        ),
        (FlashMode::Erase1, CMD_ADDR_A, 0xAA) => (FlashMode::Erase2, None),
        (FlashMode::Erase2, CMD_ADDR_B, 0x55) => (FlashMode::EraseConfirm, None),
        (FlashMode::EraseConfirm, 0, _) => (
            FlashMode::Idle,
            Some(FlashOp::EraseSector { offset: 0, len: 0x7FFF }),
        ),
        (FlashMode::EraseConfirm, 0x20000 | 0x30000, _) => (
            FlashMode::Idle,
            Some(FlashOp::EraseSector { offset, len: 0xFFFF }),
        ),
        _ => (FlashMode::Idle, None),
    }
}

/// Automaton state bound to one flash buffer through the bus handler
/// mechanism. Mutated only by bus traffic into the flash address range.
#[derive(Debug, Clone, Default)]
pub struct FlashController {
    mode: FlashMode,
}

impl FlashController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> FlashMode {
        self.mode
    }

    pub fn reset(&mut self) {
        self.mode = FlashMode::Idle;
    }

    /// Handles a bus write into the flash range.
    pub fn write(&mut self, segment: u8, offset: u16, value: u8, flash: &mut [u8]) {
        let device_offset = (((segment as u32) << 16) + offset as u32) & FLASH_ADDR_MASK;
        let before = self.mode;
        let (next, op) = transition(self.mode, device_offset, value);
        self.mode = next;
        match op {
            Some(FlashOp::Program { offset, value }) => {
                debug!(offset, value, "flash program");
                if let Some(slot) = flash.get_mut(offset as usize) {
                    *slot = value;
                }
            }
            Some(FlashOp::EraseSector { offset, len }) => {
                debug!(offset, len, "flash sector erase");
                let start = offset as usize;
                let end = (start + len as usize).min(flash.len());
                if start < end {
                    flash[start..end].fill(0xFF);
                }
            }
            None => {
                if next == FlashMode::Idle && value != CMD_RESET {
                    warn!(
                        offset = device_offset,
                        value,
                        mode = ?before,
                        "unrecognized flash command"
                    );
                }
            }
        }
    }

    /// Handles a bus read from the flash range. While an erase confirmation
    /// is pending a single status read returns 0x80 and drops back to idle;
    /// every other read passes through to the buffer.
    pub fn read(&mut self, segment: u8, offset: u16, flash: &[u8]) -> u8 {
        if self.mode == FlashMode::EraseConfirm {
            self.mode = FlashMode::Idle;
            return 0x80;
        }
        let device_offset = (((segment as u32) << 16) + offset as u32) & FLASH_ADDR_MASK;
        flash.get(device_offset as usize).copied().unwrap_or(0xFF)
    }
}
