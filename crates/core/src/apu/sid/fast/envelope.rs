//! Per-sample ADSR envelope of the table-driven engine.
//!
//! The level is a 31-bit counter advanced by a signed step every output
//! sample. Each state carries a target threshold; when the counter crosses
//! it, [`FastEnvelope::trigger`] moves to the next state. Decay and release
//! approximate the chip's exponential curve by shifting the step right as
//! the level falls below each entry of [`EXP_TABLE`].

use serde::{Deserialize, Serialize};

use super::tables::{ADR_TABLE, EXP_TABLE, SUSTAIN_STEP};
use crate::apu::sid::AdsrState;

/// Maximum envelope level
pub const ENVELOPE_MAX: u32 = 0x7fff_ffff;

/// Sample-rate dependent step sizes.
#[derive(Debug, Clone, PartialEq)]
pub struct RateTables {
    /// Attack step per nibble; decay/release use its negation
    pub steps: [i32; 16],
    /// Sustain levels per nibble
    pub sustain: [u32; 16],
}

impl RateTables {
    /// `speed1` is `(clock << 8) / sample_rate`.
    pub fn new(speed1: u32) -> Self {
        let mut steps = [0i32; 16];
        let mut sustain = [0u32; 16];
        for i in 0..16 {
            let step = 500u64 * 8 * speed1 as u64 / ADR_TABLE[i] as u64;
            steps[i] = step.min(i32::MAX as u64) as i32;
            sustain[i] = SUSTAIN_STEP * i as u32;
        }
        Self { steps, sustain }
    }
}

impl Default for RateTables {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Register nibbles feeding the envelope
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdsrParams {
    pub attack: u8,
    pub decay: u8,
    pub sustain: u8,
    pub release: u8,
}

impl AdsrParams {
    /// Decode from the attack/decay and sustain/release registers
    pub fn from_registers(ad: u8, sr: u8) -> Self {
        Self {
            attack: ad >> 4,
            decay: ad & 0x0f,
            sustain: sr >> 4,
            release: sr & 0x0f,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FastEnvelope {
    /// 31-bit level
    pub counter: u32,
    step: i32,
    threshold: u32,
    state: AdsrState,
}

impl Default for FastEnvelope {
    fn default() -> Self {
        Self::new()
    }
}

impl FastEnvelope {
    pub fn new() -> Self {
        Self {
            counter: 0,
            step: 0,
            threshold: 0,
            state: AdsrState::Idle,
        }
    }

    pub fn state(&self) -> AdsrState {
        self.state
    }

    pub fn step(&self) -> i32 {
        self.step
    }

    /// Upper 15 bits of the level, the multiplier applied to the waveform
    #[inline]
    pub fn level(&self) -> u32 {
        self.counter >> 16
    }

    /// Enter `state`, recomputing step and threshold.
    pub fn set_state(&mut self, state: AdsrState, params: AdsrParams, rates: &RateTables) {
        match state {
            AdsrState::Attack => {
                self.step = rates.steps[params.attack as usize];
                self.threshold = 0;
            }
            AdsrState::Decay => {
                let sustain = rates.sustain[params.sustain as usize];
                if self.counter <= sustain {
                    return self.set_state(AdsrState::Sustain, params, rates);
                }
                let i = self.exp_index();
                self.step = -rates.steps[params.decay as usize] >> i;
                self.threshold = sustain.max(EXP_TABLE[i]);
            }
            AdsrState::Sustain => {
                if self.counter > rates.sustain[params.sustain as usize] {
                    return self.set_state(AdsrState::Decay, params, rates);
                }
                self.step = 0;
                self.threshold = 0;
            }
            AdsrState::Release => {
                if self.counter == 0 {
                    return self.set_state(AdsrState::Idle, params, rates);
                }
                let i = self.exp_index();
                self.step = -rates.steps[params.release as usize] >> i;
                self.threshold = EXP_TABLE[i];
            }
            AdsrState::Idle => {
                self.step = 0;
                self.threshold = 0;
            }
        }
        self.state = state;
    }

    /// Index of the first exponential threshold not above the level.
    fn exp_index(&self) -> usize {
        EXP_TABLE
            .iter()
            .position(|&t| self.counter >= t)
            .unwrap_or(EXP_TABLE.len() - 1)
    }

    /// Re-evaluate the state after a gate or nibble change.
    ///
    /// `gate_flipped` means the gate bit toggled since the last evaluation,
    /// so a set gate in Attack/Decay/Sustain restarts the attack.
    pub fn on_control(&mut self, gate: bool, gate_flipped: bool, params: AdsrParams, rates: &RateTables) {
        let next = match self.state {
            AdsrState::Attack | AdsrState::Decay | AdsrState::Sustain => {
                if !gate {
                    AdsrState::Release
                } else if gate_flipped {
                    AdsrState::Attack
                } else {
                    self.state
                }
            }
            AdsrState::Release | AdsrState::Idle => {
                if gate {
                    AdsrState::Attack
                } else {
                    self.state
                }
            }
        };
        self.set_state(next, params, rates);
    }

    /// Advance one sample. Returns true when the threshold was crossed and
    /// the state changed or was re-evaluated.
    #[inline]
    pub fn advance(&mut self, params: AdsrParams, rates: &RateTables) -> bool {
        self.counter = self.counter.wrapping_add_signed(self.step);
        // Signed comparison of two unsigned values via offset binary
        if self.counter.wrapping_add(0x8000_0000) < self.threshold.wrapping_add(0x8000_0000) {
            self.trigger(params, rates);
            return true;
        }
        false
    }

    fn trigger(&mut self, params: AdsrParams, rates: &RateTables) {
        match self.state {
            AdsrState::Attack => {
                self.counter = ENVELOPE_MAX;
                self.set_state(AdsrState::Decay, params, rates);
            }
            AdsrState::Decay | AdsrState::Release => {
                if self.counter >= 0x8000_0000 {
                    self.counter = 0;
                }
                self.set_state(self.state, params, rates);
            }
            AdsrState::Sustain | AdsrState::Idle => {}
        }
    }
}
