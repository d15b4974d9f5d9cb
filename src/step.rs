//! Per-instruction peripheral tick.
//!
//! Real hardware performs these side effects every cycle; the emulator
//! applies them once around each retired instruction: the DSR mirror at
//! 0xF000, the CSR/PC/SP masking quirks, the two-stage stop-accept latch on
//! STPACP and, on the MathPrint variant, the watchdog unlock sequence. All
//! of it goes through the ordinary bus dispatcher; the stepper has no
//! privileged access path.

use crate::bus::SystemBus;
use crate::device::{DeviceDescriptor, HWID_ES_PLUS, HWID_TI_MATHPRINT};

const DSR_MIRROR: u16 = 0xF000;
const STPACP: u16 = 0xF008;
const SBYCON: u16 = 0xF009;
const WDTCON: u16 = 0xF00E;
const TM0_COUNTER_LO: u16 = 0xF022;
const TM0_COUNTER_HI: u16 = 0xF023;

/// Boundary contract with the excluded instruction engine. `step` advances
/// the instruction stream by exactly one instruction, issuing its memory
/// traffic through the supplied bus.
pub trait CpuCore {
    fn step(&mut self, bus: &mut SystemBus);

    fn dsr(&self) -> u8;
    fn set_dsr(&mut self, value: u8);
    fn csr(&self) -> u8;
    fn set_csr(&mut self, value: u8);
    fn pc(&self) -> u16;
    fn set_pc(&mut self, value: u16);
    fn sp(&self) -> u16;
    fn set_sp(&mut self, value: u16);

    /// 16-bit word addressing; re-asserted every step on MathPrint.
    fn set_word_addressing(&mut self, enabled: bool);
}

/// Latches carried across instruction steps. Owned by the emulator
/// instance and mutated exclusively by [`core_step`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeripheralState {
    /// Two-stage stop-accept handshake flags.
    pub stop_accept: [bool; 2],
    /// Watchdog unlock armed (MathPrint only).
    pub wdt_unlock_armed: bool,
    /// Entered low-power stop mode via a completed handshake.
    pub stop_mode: bool,
}

impl PeripheralState {
    /// Lets the host (timer expiry, key wakeup) leave stop mode.
    pub fn wake(&mut self) {
        self.stop_mode = false;
    }
}

/// Runs one instruction plus its peripheral side effects, in hardware
/// order: DSR mirror, protection-phase capture and register masking before
/// the instruction; the DSR write-back and the stop-accept or watchdog
/// latch after it.
pub fn core_step<C: CpuCore>(
    cpu: &mut C,
    bus: &mut SystemBus,
    state: &mut PeripheralState,
    descriptor: &DeviceDescriptor,
) {
    let dsr = cpu.dsr();
    bus.write_mem_data(0, DSR_MIRROR, 1, dsr as u64);

    // Captured before the instruction, consumed by the watchdog latch after.
    let phase = (bus.read_mem_data(0, WDTCON, 1) as u8) & 1;

    // A captured revision of the silicon masks CSR with a bit-AND; the
    // modulo reduction is the later, authoritative behavior.
    let modulus = if descriptor.real_hw && descriptor.hwid == HWID_ES_PLUS {
        2
    } else {
        16
    };
    cpu.set_csr(cpu.csr() % modulus);
    if descriptor.hwid == HWID_TI_MATHPRINT {
        cpu.set_pc(cpu.pc() & !1);
        cpu.set_sp(cpu.sp() & !1);
        cpu.set_word_addressing(true);
    }

    cpu.step(bus);

    // The mirror is bidirectional: a guest store to 0xF000 sets the core's
    // DSR register, not just the SFR byte.
    let mirrored = bus.read_mem_data(0, DSR_MIRROR, 1) as u8;
    if mirrored != dsr {
        cpu.set_dsr(mirrored);
    }

    if descriptor.hwid == HWID_TI_MATHPRINT {
        watchdog_unlock(bus, state, phase);
    } else {
        stop_accept(bus, state);
        standby_request(bus, state);
    }
}

/// Two-flag detector for the deliberate two-step "enter stop mode"
/// handshake on STPACP. A single-step bit pattern must not trigger it.
fn stop_accept(bus: &mut SystemBus, state: &mut PeripheralState) {
    let stpacp = bus.read_mem_data(0, STPACP, 1) as u8;
    if state.stop_accept[0] {
        if !state.stop_accept[1] {
            if stpacp & 0xA0 == 0xA0 {
                state.stop_accept[1] = true;
            } else if stpacp & 0x50 != 0x50 {
                state.stop_accept[0] = false;
            }
        }
    } else if stpacp & 0x50 == 0x50 {
        state.stop_accept[0] = true;
    }
}

/// SBYCON bit 1 requests stop mode; honored only after a completed
/// handshake. Entering stop consumes the request, clears both accept flags
/// and resets the timer counter.
fn standby_request(bus: &mut SystemBus, state: &mut PeripheralState) {
    let sbycon = bus.read_mem_data(0, SBYCON, 1) as u8;
    if sbycon & 0x02 != 0 && state.stop_accept == [true, true] {
        state.stop_mode = true;
        state.stop_accept = [false, false];
        bus.write_mem_data(0, SBYCON, 1, 0);
        bus.write_mem_data(0, TM0_COUNTER_LO, 1, 0);
        bus.write_mem_data(0, TM0_COUNTER_HI, 1, 0);
    }
}

/// MathPrint watchdog clear: WDTCON reads 0x5B with phase 0 to arm, then
/// 0xA4 with phase 1 on a later step clears the register. Any other value
/// while armed (except a repeated 0x5B) disarms without clearing.
fn watchdog_unlock(bus: &mut SystemBus, state: &mut PeripheralState, phase: u8) {
    let wdtcon = bus.read_mem_data(0, WDTCON, 1) as u8;
    if state.wdt_unlock_armed {
        if wdtcon == 0xA4 && phase == 1 {
            bus.write_mem_data(0, WDTCON, 1, 0);
            state.wdt_unlock_armed = false;
        } else if wdtcon != 0x5B {
            state.wdt_unlock_armed = false;
        }
    } else if wdtcon == 0x5B && phase == 0 {
        state.wdt_unlock_armed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{configure, HWID_CLASSWIZ_EX, HWID_ES};

    /// Scripted stand-in for the instruction engine: each step performs one
    /// queued SFR write, mimicking guest firmware.
    struct ScriptedCpu {
        dsr: u8,
        csr: u8,
        pc: u16,
        sp: u16,
        word_addressing: bool,
        writes: Vec<(u16, u8)>,
        cursor: usize,
    }

    impl ScriptedCpu {
        fn new(writes: Vec<(u16, u8)>) -> Self {
            Self {
                dsr: 0,
                csr: 0,
                pc: 0,
                sp: 0,
                word_addressing: false,
                writes,
                cursor: 0,
            }
        }
    }

    impl CpuCore for ScriptedCpu {
        fn step(&mut self, bus: &mut SystemBus) {
            if let Some(&(offset, value)) = self.writes.get(self.cursor) {
                bus.write_mem_data(0, offset, 1, value as u64);
            }
            self.cursor += 1;
            self.pc = self.pc.wrapping_add(2);
        }

        fn dsr(&self) -> u8 {
            self.dsr
        }
        fn set_dsr(&mut self, value: u8) {
            self.dsr = value;
        }
        fn csr(&self) -> u8 {
            self.csr
        }
        fn set_csr(&mut self, value: u8) {
            self.csr = value;
        }
        fn pc(&self) -> u16 {
            self.pc
        }
        fn set_pc(&mut self, value: u16) {
            self.pc = value;
        }
        fn sp(&self) -> u16 {
            self.sp
        }
        fn set_sp(&mut self, value: u16) {
            self.sp = value;
        }
        fn set_word_addressing(&mut self, enabled: bool) {
            self.word_addressing = enabled;
        }
    }

    fn make_bus(hwid: u8, real_hw: bool) -> SystemBus {
        let desc = DeviceDescriptor {
            hwid,
            real_hw,
            ko_mode: false,
            is_5800p: false,
            sample: false,
            pd_value: None,
        };
        let (ram_start, ram_size) = desc.default_ram_window();
        let (bus, _) = configure(&desc, vec![0x90; 0x20000], None, ram_start, ram_size).unwrap();
        bus
    }

    fn desc(hwid: u8, real_hw: bool) -> DeviceDescriptor {
        DeviceDescriptor {
            hwid,
            real_hw,
            ko_mode: false,
            is_5800p: false,
            sample: false,
            pd_value: None,
        }
    }

    #[test]
    fn dsr_is_mirrored_every_step() {
        let mut bus = make_bus(HWID_ES_PLUS, false);
        let mut state = PeripheralState::default();
        let mut cpu = ScriptedCpu::new(vec![]);
        cpu.dsr = 0x05;
        core_step(&mut cpu, &mut bus, &mut state, &desc(HWID_ES_PLUS, false));
        assert_eq!(bus.sfr().peek(0x000), 0x05);
        cpu.dsr = 0x0A;
        core_step(&mut cpu, &mut bus, &mut state, &desc(HWID_ES_PLUS, false));
        assert_eq!(bus.sfr().peek(0x000), 0x0A);
    }

    #[test]
    fn storing_to_the_dsr_mirror_writes_through_to_the_core() {
        let d = desc(HWID_ES_PLUS, false);
        let mut bus = make_bus(HWID_ES_PLUS, false);
        let mut state = PeripheralState::default();
        let mut cpu = ScriptedCpu::new(vec![(0xF000, 0x07)]);
        cpu.dsr = 0x02;
        core_step(&mut cpu, &mut bus, &mut state, &d);
        assert_eq!(cpu.dsr, 0x07);
        assert_eq!(bus.sfr().peek(0x000), 0x07);
        // The next step mirrors the updated register back unchanged.
        core_step(&mut cpu, &mut bus, &mut state, &d);
        assert_eq!(cpu.dsr, 0x07);
        assert_eq!(bus.sfr().peek(0x000), 0x07);
    }

    #[test]
    fn csr_is_reduced_modulo_the_bank_count() {
        let d = desc(HWID_ES_PLUS, false);
        let mut bus = make_bus(HWID_ES_PLUS, false);
        let mut state = PeripheralState::default();
        let mut cpu = ScriptedCpu::new(vec![]);
        cpu.csr = 0x37;
        core_step(&mut cpu, &mut bus, &mut state, &d);
        assert_eq!(cpu.csr, 0x07);
    }

    #[test]
    fn real_hw_es_plus_restricts_csr_to_two_banks() {
        let d = desc(HWID_ES_PLUS, true);
        let mut bus = make_bus(HWID_ES_PLUS, true);
        let mut state = PeripheralState::default();
        let mut cpu = ScriptedCpu::new(vec![]);
        cpu.csr = 0x07;
        core_step(&mut cpu, &mut bus, &mut state, &d);
        assert_eq!(cpu.csr, 1);
    }

    #[test]
    fn mathprint_forces_even_pc_and_sp_and_word_addressing() {
        let d = desc(HWID_TI_MATHPRINT, true);
        let mut bus = make_bus(HWID_TI_MATHPRINT, true);
        let mut state = PeripheralState::default();
        let mut cpu = ScriptedCpu::new(vec![]);
        cpu.pc = 0x1235;
        cpu.sp = 0x8FFF;
        core_step(&mut cpu, &mut bus, &mut state, &d);
        // The scripted step advances PC by 2 after the fixup.
        assert_eq!(cpu.pc, 0x1236);
        assert_eq!(cpu.sp, 0x8FFE);
        assert!(cpu.word_addressing);
    }

    #[test]
    fn stop_accept_arms_in_two_stages() {
        let d = desc(HWID_ES_PLUS, false);
        let mut bus = make_bus(HWID_ES_PLUS, false);
        let mut state = PeripheralState::default();
        let mut cpu = ScriptedCpu::new(vec![(0xF008, 0x50), (0xF008, 0xA0)]);
        core_step(&mut cpu, &mut bus, &mut state, &d);
        assert_eq!(state.stop_accept, [true, false]);
        core_step(&mut cpu, &mut bus, &mut state, &d);
        assert_eq!(state.stop_accept, [true, true]);
    }

    #[test]
    fn clearing_the_first_pattern_disarms_the_latch() {
        let d = desc(HWID_ES_PLUS, false);
        let mut bus = make_bus(HWID_ES_PLUS, false);
        let mut state = PeripheralState::default();
        let mut cpu = ScriptedCpu::new(vec![(0xF008, 0x50), (0xF008, 0x00)]);
        core_step(&mut cpu, &mut bus, &mut state, &d);
        assert_eq!(state.stop_accept, [true, false]);
        core_step(&mut cpu, &mut bus, &mut state, &d);
        assert_eq!(state.stop_accept, [false, false]);
    }

    #[test]
    fn second_stage_alone_arms_nothing() {
        let d = desc(HWID_ES_PLUS, false);
        let mut bus = make_bus(HWID_ES_PLUS, false);
        let mut state = PeripheralState::default();
        let mut cpu = ScriptedCpu::new(vec![(0xF008, 0xA0)]);
        core_step(&mut cpu, &mut bus, &mut state, &d);
        assert_eq!(state.stop_accept, [false, false]);
    }

    #[test]
    fn single_step_pattern_must_not_complete_the_handshake() {
        let d = desc(HWID_ES_PLUS, false);
        let mut bus = make_bus(HWID_ES_PLUS, false);
        let mut state = PeripheralState::default();
        let mut cpu = ScriptedCpu::new(vec![(0xF008, 0xF0)]);
        core_step(&mut cpu, &mut bus, &mut state, &d);
        // 0xF0 has both bit patterns set, but only the first stage may arm.
        assert_eq!(state.stop_accept, [true, false]);
    }

    #[test]
    fn standby_request_enters_stop_mode_after_handshake() {
        let d = desc(HWID_ES_PLUS, false);
        let mut bus = make_bus(HWID_ES_PLUS, false);
        let mut state = PeripheralState::default();
        bus.sfr_mut().poke(0x022, 0x34);
        bus.sfr_mut().poke(0x023, 0x12);
        let mut cpu = ScriptedCpu::new(vec![(0xF008, 0x50), (0xF008, 0xA0), (0xF009, 0x02)]);
        for _ in 0..3 {
            core_step(&mut cpu, &mut bus, &mut state, &d);
        }
        assert!(state.stop_mode);
        assert_eq!(state.stop_accept, [false, false]);
        assert_eq!(bus.sfr().peek(0x009), 0);
        assert_eq!(bus.sfr().peek(0x022), 0);
        assert_eq!(bus.sfr().peek(0x023), 0);
    }

    #[test]
    fn standby_request_without_handshake_is_ignored() {
        let d = desc(HWID_ES_PLUS, false);
        let mut bus = make_bus(HWID_ES_PLUS, false);
        let mut state = PeripheralState::default();
        let mut cpu = ScriptedCpu::new(vec![(0xF009, 0x02)]);
        core_step(&mut cpu, &mut bus, &mut state, &d);
        assert!(!state.stop_mode);
    }

    #[test]
    fn mathprint_skips_the_stop_accept_latch() {
        let d = desc(HWID_TI_MATHPRINT, true);
        let mut bus = make_bus(HWID_TI_MATHPRINT, true);
        let mut state = PeripheralState::default();
        let mut cpu = ScriptedCpu::new(vec![(0xF008, 0x50), (0xF008, 0xA0)]);
        core_step(&mut cpu, &mut bus, &mut state, &d);
        core_step(&mut cpu, &mut bus, &mut state, &d);
        assert_eq!(state.stop_accept, [false, false]);
    }

    #[test]
    fn watchdog_unlock_clears_the_register() {
        let d = desc(HWID_TI_MATHPRINT, true);
        let mut bus = make_bus(HWID_TI_MATHPRINT, true);
        let mut state = PeripheralState::default();
        // Phase bit is captured from WDTCON before the instruction runs:
        // step 1 writes 0x5B with phase 0, step 2 writes 0xA4 with phase 1.
        let mut cpu = ScriptedCpu::new(vec![(0xF00E, 0x5B), (0xF00E, 0xA4)]);
        core_step(&mut cpu, &mut bus, &mut state, &d);
        assert!(state.wdt_unlock_armed);
        core_step(&mut cpu, &mut bus, &mut state, &d);
        assert!(!state.wdt_unlock_armed);
        assert_eq!(bus.sfr().peek(0x00E), 0);
    }

    #[test]
    fn unrelated_value_disarms_the_watchdog_sequence() {
        let d = desc(HWID_TI_MATHPRINT, true);
        let mut bus = make_bus(HWID_TI_MATHPRINT, true);
        let mut state = PeripheralState::default();
        let mut cpu = ScriptedCpu::new(vec![(0xF00E, 0x5B), (0xF00E, 0x12), (0xF00E, 0xA4)]);
        core_step(&mut cpu, &mut bus, &mut state, &d);
        assert!(state.wdt_unlock_armed);
        core_step(&mut cpu, &mut bus, &mut state, &d);
        assert!(!state.wdt_unlock_armed);
        // 0xA4 without a fresh 0x5B must not clear the register.
        core_step(&mut cpu, &mut bus, &mut state, &d);
        assert_eq!(bus.sfr().peek(0x00E), 0xA4);
    }

    #[test]
    fn classwiz_keeps_word_addressing_off_in_emulator_mode() {
        let d = desc(HWID_CLASSWIZ_EX, false);
        let mut bus = make_bus(HWID_CLASSWIZ_EX, false);
        let mut state = PeripheralState::default();
        let mut cpu = ScriptedCpu::new(vec![]);
        core_step(&mut cpu, &mut bus, &mut state, &d);
        assert!(!cpu.word_addressing);
    }

    #[test]
    fn replaying_the_same_script_reproduces_the_same_state() {
        let d = desc(HWID_ES, false);
        let script = vec![(0xF008u16, 0x50u8), (0xF008, 0xA0), (0xF009, 0x02)];
        let run = || {
            let mut bus = make_bus(HWID_ES, false);
            let mut state = PeripheralState::default();
            let mut cpu = ScriptedCpu::new(script.clone());
            for _ in 0..script.len() {
                core_step(&mut cpu, &mut bus, &mut state, &d);
            }
            (state, bus.sfr().as_slice().to_vec())
        };
        assert_eq!(run(), run());
    }
}
