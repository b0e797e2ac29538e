//! One oscillator of the table-driven engine.
//!
//! The accumulator is a full 32-bit phase advanced once per output sample by
//! `speed1 * frequency`. Its top 12 bits index the waveform tables; pulse
//! width is applied by offsetting the read position into a half-zero table.

use serde::{Deserialize, Serialize};

use super::envelope::{AdsrParams, FastEnvelope, RateTables};
use super::filter::VoiceFilter;
use super::tables::{noise_shift, noise_value, Table, Wavetables, NOISE_SEED};
use crate::apu::sid::{control, FastWaveforms};

/// Closed-form waveform selection for [`FastWaveforms::Computed`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Shape {
    Test,
    Pulse,
    Sawtooth,
    Triangle,
    Noise,
    #[default]
    None,
    Ring,
    PulseTriangle,
    PulseSawtooth,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Voice {
    /// Phase accumulator
    pub accumulator: u32,
    /// Phase increment per output sample
    pub step: u32,
    /// Noise shift register
    pub noise_reg: u32,
    pub noise: bool,
    /// Hard-synced to the previous voice
    pub sync: bool,
    /// Routed through the filter
    pub filtered: bool,
    /// Register-derived fields need recomputing
    pub dirty: bool,
    /// Gate bit toggled since the last recompute
    pub gate_flip: bool,
    pub envelope: FastEnvelope,
    pub adsr: AdsrParams,

    table: Table,
    /// First table entry read at phase zero
    table_base: usize,
    /// Right shift from accumulator to table index
    table_shift: u32,
    /// Phase added before indexing (pulse combinations)
    phase_offset: u32,
    /// XOR mask applied while the ring source's MSB is set
    ring_mask: u16,

    shape: Shape,
    /// Pulse width scaled to the 32-bit phase
    pulse_width: u32,

    pub filter: VoiceFilter,
}

impl Default for Voice {
    fn default() -> Self {
        Self::new()
    }
}

impl Voice {
    pub fn new() -> Self {
        Self {
            accumulator: 0,
            step: 0,
            noise_reg: NOISE_SEED,
            noise: false,
            sync: false,
            filtered: false,
            dirty: true,
            gate_flip: false,
            envelope: FastEnvelope::new(),
            adsr: AdsrParams::default(),
            table: Table::Silent,
            table_base: 0,
            table_shift: 31,
            phase_offset: 0,
            ring_mask: 0,
            shape: Shape::None,
            pulse_width: 0,
            filter: VoiceFilter::default(),
        }
    }

    /// Recompute derived fields from this voice's seven registers.
    pub fn setup(&mut self, regs: &[u8], speed1: u32, rates: &RateTables, new_chip: bool, mode: FastWaveforms) {
        if !self.dirty {
            return;
        }

        let ctrl = regs[4];
        let width = regs[2] as u32 + (regs[3] & 0x0f) as u32 * 0x100;
        self.adsr = AdsrParams::from_registers(regs[5], regs[6]);
        self.sync = ctrl & control::SYNC != 0;
        self.step = speed1.wrapping_mul(regs[0] as u32 + regs[1] as u32 * 0x100);

        match mode {
            FastWaveforms::Table => self.select_table(ctrl, width, new_chip),
            FastWaveforms::Computed => self.select_shape(ctrl, width),
        }

        let gate = ctrl & control::GATE != 0;
        self.envelope.on_control(gate, self.gate_flip, self.adsr, rates);
        self.dirty = false;
        self.gate_flip = false;
    }

    fn select_table(&mut self, ctrl: u8, width: u32, new_chip: bool) {
        let test = ctrl & control::TEST != 0;
        let ring = ctrl & control::RING_MOD != 0;
        if test {
            self.accumulator = 0;
            self.step = 0;
            self.noise_reg = NOISE_SEED;
        }
        self.noise = false;
        self.table_base = 0;
        self.table_shift = 20;
        self.phase_offset = 0;
        self.ring_mask = 0;
        let ring_mask = if ring { 0x7fff } else { 0 };

        match ctrl >> 4 {
            0x0 => {
                self.table = Table::Silent;
                self.table_shift = 31;
            }
            0x1 => {
                self.table = Table::Triangle;
                self.ring_mask = ring_mask;
            }
            0x2 => self.table = Table::Sawtooth,
            0x3 => {
                self.table = Table::TriSaw;
                self.ring_mask = ring_mask;
            }
            0x4 => {
                self.table = Table::Pulse;
                self.table_base = if test { 4096 } else { (4096 - width) as usize };
            }
            0x5 => {
                self.table = Table::PulseTri;
                self.set_pulse_phase(width);
                self.ring_mask = ring_mask;
            }
            0x6 => {
                self.table = Table::PulseSaw;
                self.set_pulse_phase(width);
            }
            0x7 => {
                self.table = Table::PulseTriSaw;
                self.set_pulse_phase(width);
                if new_chip {
                    self.ring_mask = ring_mask;
                }
            }
            0x8 => {
                self.noise = true;
                self.table_shift = 0;
            }
            _ => {
                // Noise combined with anything locks the shift register at zero
                self.noise_reg = 0;
                self.table = Table::Silent;
                self.table_shift = 31;
            }
        }
    }

    fn set_pulse_phase(&mut self, width: u32) {
        let base = 4096 - width;
        self.table_base = base as usize;
        self.phase_offset = base << 20;
    }

    fn select_shape(&mut self, ctrl: u8, width: u32) {
        self.pulse_width = width.wrapping_mul(0x0010_0100);
        self.noise = false;
        if ctrl & control::TEST != 0 {
            self.shape = Shape::Test;
            self.pulse_width = 0;
            self.accumulator = 0;
            self.step = 0;
            self.noise_reg = NOISE_SEED;
            return;
        }
        self.shape = match ctrl >> 4 {
            0x4 => Shape::Pulse,
            0x2 => Shape::Sawtooth,
            0x1 if ctrl & control::RING_MOD != 0 => Shape::Ring,
            0x1 => Shape::Triangle,
            0x8 => Shape::Noise,
            0x5 => Shape::PulseTriangle,
            0x6 => Shape::PulseSawtooth,
            _ => Shape::None,
        };
        self.noise = self.shape == Shape::Noise;
    }

    /// Advance the accumulator. Returns true on wraparound, after clocking
    /// the noise register.
    #[inline]
    pub fn advance(&mut self) -> bool {
        self.accumulator = self.accumulator.wrapping_add(self.step);
        if self.accumulator < self.step {
            self.noise_reg = noise_shift(self.noise_reg, 16);
            return true;
        }
        false
    }

    /// Reset the phase because the sync source wrapped, clocking the noise
    /// register by the phase fraction that is lost.
    #[inline]
    pub fn hard_sync(&mut self) {
        self.noise_reg = noise_shift(self.noise_reg, self.accumulator >> 28);
        self.accumulator = 0;
    }

    /// 15-bit waveform output. `ring_source` is the previous voice's accumulator.
    #[inline]
    pub fn output(&self, ring_source: u32, tables: &Wavetables, mode: FastWaveforms) -> u32 {
        if self.noise {
            return (noise_value(noise_shift(self.noise_reg, self.accumulator >> 28)) as u32) << 7;
        }
        match mode {
            FastWaveforms::Table => {
                let index = self.table_base
                    + (self.accumulator.wrapping_add(self.phase_offset) >> self.table_shift) as usize;
                let ring = if ring_source >> 31 != 0 { self.ring_mask } else { 0 };
                (tables.lookup(self.table, index) ^ ring) as u32
            }
            FastWaveforms::Computed => self.computed_output(ring_source),
        }
    }

    fn computed_output(&self, ring_source: u32) -> u32 {
        let f = self.accumulator;
        let triangle = |f: u32| {
            if f < 0x8000_0000 {
                f >> 16
            } else {
                0xffff - (f >> 16)
            }
        };
        match self.shape {
            Shape::PulseSawtooth if f <= self.pulse_width => 0,
            Shape::PulseSawtooth | Shape::Sawtooth => f >> 17,
            Shape::Ring => triangle(f ^ (ring_source & 0x8000_0000)),
            Shape::Triangle => triangle(f),
            Shape::PulseTriangle if f <= self.pulse_width => 0,
            Shape::PulseTriangle => triangle(f),
            Shape::Pulse if f >= self.pulse_width => 0x7fff,
            _ => 0,
        }
    }
}
