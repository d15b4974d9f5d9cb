//! Special-function-register block and its per-address dispatch rules.
//!
//! The block behaves as plain 4 KiB storage unless a rule is registered for
//! an offset. Write rules transform the written byte into the byte actually
//! stored; read rules override the byte returned. Plain reads have no side
//! effects. Rules are installed once by the device configurator.

use std::collections::BTreeMap;
use tracing::warn;

/// Base address of the SFR block in the data space.
pub const SFR_BASE: u32 = 0x0F000;
/// Size of the SFR block in bytes.
pub const SFR_SIZE: usize = 0x1000;

/// How a write to a single register offset is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteRule {
    /// Keep the current byte, discarding the write.
    Discard,
    /// Store a fixed byte regardless of the written value.
    Constant(u8),
    /// Store 1 when the written byte equals the expected value, else 0.
    SetOnMatch(u8),
}

impl WriteRule {
    fn apply(self, current: u8, value: u8) -> u8 {
        match self {
            WriteRule::Discard => current,
            WriteRule::Constant(byte) => byte,
            WriteRule::SetOnMatch(expected) => u8::from(value == expected),
        }
    }
}

/// How a read from a single register offset is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadRule {
    /// Return a fixed byte instead of the stored one.
    Constant(u8),
}

#[derive(Debug, Clone)]
pub struct SfrBlock {
    data: Vec<u8>,
    write_rules: BTreeMap<u16, WriteRule>,
    read_rules: BTreeMap<u16, ReadRule>,
}

impl Default for SfrBlock {
    fn default() -> Self {
        Self::new()
    }
}

impl SfrBlock {
    pub fn new() -> Self {
        Self {
            data: vec![0; SFR_SIZE],
            write_rules: BTreeMap::new(),
            read_rules: BTreeMap::new(),
        }
    }

    pub fn set_write_rule(&mut self, offset: u16, rule: WriteRule) {
        self.write_rules.insert(offset, rule);
    }

    pub fn set_read_rule(&mut self, offset: u16, rule: ReadRule) {
        self.read_rules.insert(offset, rule);
    }

    /// Bus read at `offset` relative to [`SFR_BASE`].
    pub fn read(&self, offset: u16) -> u8 {
        let Some(&raw) = self.data.get(offset as usize) else {
            warn!(offset, "SFR read outside block");
            return 0xFF;
        };
        match self.read_rules.get(&offset) {
            Some(ReadRule::Constant(byte)) => *byte,
            None => raw,
        }
    }

    /// Bus write at `offset` relative to [`SFR_BASE`].
    pub fn write(&mut self, offset: u16, value: u8) {
        let index = offset as usize;
        if index >= self.data.len() {
            warn!(offset, value, "SFR write outside block");
            return;
        }
        let stored = match self.write_rules.get(&offset) {
            Some(rule) => rule.apply(self.data[index], value),
            None => value,
        };
        self.data[index] = stored;
    }

    /// Raw byte access, bypassing rules. Used by the stepper and snapshots.
    pub fn peek(&self, offset: u16) -> u8 {
        self.data.get(offset as usize).copied().unwrap_or(0xFF)
    }

    /// Raw byte store, bypassing rules.
    pub fn poke(&mut self, offset: u16, value: u8) {
        if let Some(slot) = self.data.get_mut(offset as usize) {
            *slot = value;
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn copy_from_slice(&mut self, payload: &[u8]) {
        let limit = self.data.len().min(payload.len());
        self.data[..limit].copy_from_slice(&payload[..limit]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unruled_offsets_behave_as_plain_storage() {
        let mut sfr = SfrBlock::new();
        sfr.write(0x123, 0xAB);
        assert_eq!(sfr.read(0x123), 0xAB);
        assert_eq!(sfr.read(0x124), 0);
    }

    #[test]
    fn reads_have_no_side_effects() {
        let mut sfr = SfrBlock::new();
        sfr.write(0x008, 0x50);
        for _ in 0..3 {
            assert_eq!(sfr.read(0x008), 0x50);
        }
    }

    #[test]
    fn discard_rule_keeps_current_byte() {
        let mut sfr = SfrBlock::new();
        sfr.poke(0x046, 0x12);
        sfr.set_write_rule(0x046, WriteRule::Discard);
        sfr.write(0x046, 0xFF);
        assert_eq!(sfr.peek(0x046), 0x12);
    }

    #[test]
    fn constant_rule_ignores_written_value() {
        let mut sfr = SfrBlock::new();
        sfr.set_write_rule(0x900, WriteRule::Constant(0x34));
        sfr.write(0x900, 0x00);
        assert_eq!(sfr.read(0x900), 0x34);
        sfr.write(0x900, 0xFF);
        assert_eq!(sfr.read(0x900), 0x34);
    }

    #[test]
    fn set_on_match_stores_comparison_result() {
        let mut sfr = SfrBlock::new();
        sfr.set_write_rule(0x901, WriteRule::SetOnMatch(0));
        sfr.write(0x901, 0);
        assert_eq!(sfr.read(0x901), 1);
        sfr.write(0x901, 7);
        assert_eq!(sfr.read(0x901), 0);
    }

    #[test]
    fn read_rule_overrides_stored_byte() {
        let mut sfr = SfrBlock::new();
        sfr.poke(0x046, 0x99);
        sfr.set_read_rule(0x046, ReadRule::Constant(4));
        assert_eq!(sfr.read(0x046), 4);
        assert_eq!(sfr.peek(0x046), 0x99);
    }
}
