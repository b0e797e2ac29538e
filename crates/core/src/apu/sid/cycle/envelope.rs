//! Cycle-stepped ADSR envelope generator.
//!
//! An 8-bit level is stepped whenever a 15-bit rate counter reaches the
//! period selected by the current nibble. Decay and release additionally
//! divide by a piecewise exponential counter.

use serde::{Deserialize, Serialize};

use crate::apu::sid::{control, AdsrState};

/// Rate counter periods in cycles per step, indexed by A/D/R nibble
pub const RATE_PERIODS: [u16; 16] = [
    9, 32, 63, 95, 149, 220, 267, 313, 392, 977, 1954, 3126, 3907, 11720, 19532, 31251,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum Phase {
    Attack,
    DecaySustain,
    Release,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeGenerator {
    rate_counter: u16,
    rate_period: u16,
    exponential_counter: u8,
    exponential_period: u8,
    /// 8-bit envelope level
    pub counter: u8,
    hold_zero: bool,

    attack: u8,
    decay: u8,
    sustain: u8,
    release: u8,
    gate: bool,
    phase: Phase,
}

impl Default for EnvelopeGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvelopeGenerator {
    pub fn new() -> Self {
        Self {
            rate_counter: 0,
            rate_period: RATE_PERIODS[0],
            exponential_counter: 0,
            exponential_period: 1,
            counter: 0,
            hold_zero: true,
            attack: 0,
            decay: 0,
            sustain: 0,
            release: 0,
            gate: false,
            phase: Phase::Release,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn write_control(&mut self, val: u8) {
        let gate_next = val & control::GATE != 0;
        if !self.gate && gate_next {
            self.phase = Phase::Attack;
            self.rate_period = RATE_PERIODS[self.attack as usize];
            self.hold_zero = false;
        } else if self.gate && !gate_next {
            self.phase = Phase::Release;
            self.rate_period = RATE_PERIODS[self.release as usize];
        }
        self.gate = gate_next;
    }

    pub fn write_attack_decay(&mut self, val: u8) {
        self.attack = val >> 4;
        self.decay = val & 0x0f;
        match self.phase {
            Phase::Attack => self.rate_period = RATE_PERIODS[self.attack as usize],
            Phase::DecaySustain => self.rate_period = RATE_PERIODS[self.decay as usize],
            Phase::Release => {}
        }
    }

    pub fn write_sustain_release(&mut self, val: u8) {
        self.sustain = val >> 4;
        self.release = val & 0x0f;
        if self.phase == Phase::Release {
            self.rate_period = RATE_PERIODS[self.release as usize];
        }
    }

    fn sustain_level(&self) -> u8 {
        self.sustain * 0x11
    }

    /// Advance one CPU cycle.
    pub fn clock(&mut self) {
        // A period lowered below the running count makes the counter run
        // through 0x8000 before the next step
        self.rate_counter += 1;
        if self.rate_counter & 0x8000 != 0 {
            self.rate_counter = (self.rate_counter + 1) & 0x7fff;
        }
        if self.rate_counter != self.rate_period {
            return;
        }
        self.rate_counter = 0;

        if self.phase != Phase::Attack {
            self.exponential_counter = self.exponential_counter.wrapping_add(1);
            if self.exponential_counter != self.exponential_period {
                return;
            }
        }
        self.exponential_counter = 0;
        if self.hold_zero {
            return;
        }

        match self.phase {
            Phase::Attack => {
                self.counter = self.counter.wrapping_add(1);
                if self.counter == 0xff {
                    self.phase = Phase::DecaySustain;
                    self.rate_period = RATE_PERIODS[self.decay as usize];
                }
            }
            Phase::DecaySustain => {
                if self.counter != self.sustain_level() {
                    self.counter = self.counter.wrapping_sub(1);
                }
            }
            Phase::Release => self.counter = self.counter.wrapping_sub(1),
        }

        match self.counter {
            0xff => self.exponential_period = 1,
            0x5d => self.exponential_period = 2,
            0x36 => self.exponential_period = 4,
            0x1a => self.exponential_period = 8,
            0x0e => self.exponential_period = 16,
            0x06 => self.exponential_period = 30,
            0x00 => {
                self.exponential_period = 1;
                self.hold_zero = true;
            }
            _ => {}
        }
    }

    pub fn state(&self) -> AdsrState {
        match self.phase {
            Phase::Attack => AdsrState::Attack,
            Phase::DecaySustain if self.counter == self.sustain_level() => AdsrState::Sustain,
            Phase::DecaySustain => AdsrState::Decay,
            Phase::Release if self.hold_zero && self.counter == 0 => AdsrState::Idle,
            Phase::Release => AdsrState::Release,
        }
    }

    /// Value of the ENV3 register
    pub fn read_env(&self) -> u8 {
        self.counter
    }
}
