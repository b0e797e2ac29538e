//! Lookup tables for the table-driven SID engine.
//!
//! The ADSR rate and exponential threshold tables are measured calibration
//! data and must not be retuned. The noise tables pick the eight LFSR taps
//! that reach the waveform DAC.
//!
//! The combined waveform tables are not measured data. They are generated by
//! a bitwise model of the shorted output lines and only approximate what
//! sampled chips produce.

use serde::{Deserialize, Serialize};

use crate::apu::sid::ChipModel;

/// Envelope period divisors, indexed by the 4-bit A/D/R nibble
pub const ADR_TABLE: [u32; 16] = [
    1, 4, 8, 12, 19, 28, 34, 40, 50, 125, 250, 400, 500, 1500, 2500, 4000,
];

/// Thresholds of the pseudo-exponential decay. While the envelope counter is
/// below entry `i`, decay and release steps are shifted right by `i + 1`.
pub const EXP_TABLE: [u32; 6] = [
    0x3000_0000,
    0x1c00_0000,
    0x0e00_0000,
    0x0800_0000,
    0x0400_0000,
    0x0000_0000,
];

/// Sustain level increment per nibble step, compared against the 31-bit counter
pub const SUSTAIN_STEP: u32 = 0x0888_8888;

/// Noise LFSR value after the test bit is released
pub const NOISE_SEED: u32 = 0x7f_fff8;

/// CPU cycles per bit of decay on the data bus shadow of write-only registers
pub const READ_DECAY_CYCLES: i64 = 13;

/// Bits 2, 4 and 7 of the LFSR's low byte, to waveform bits 0-2.
pub static NOISE_LSB: [u8; 256] = build_noise_lsb();
/// Bits 9 and 11, to waveform bits 3-4.
pub static NOISE_MID: [u8; 256] = build_noise_mid();
/// Bits 16, 20 and 22, to waveform bits 5-7.
pub static NOISE_MSB: [u8; 256] = build_noise_msb();

const fn build_noise_lsb() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = (((i >> 5) & 0x04) | ((i >> 3) & 0x02) | ((i >> 2) & 0x01)) as u8;
        i += 1;
    }
    table
}

const fn build_noise_mid() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = (((i >> 1) & 0x10) | (i & 0x08)) as u8;
        i += 1;
    }
    table
}

const fn build_noise_msb() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = (((i << 1) & 0x80) | ((i << 2) & 0x40) | ((i << 5) & 0x20)) as u8;
        i += 1;
    }
    table
}

/// Shift the noise register `n` times. Feedback taps are bits 22 and 17.
#[inline]
pub fn noise_shift(v: u32, n: u32) -> u32 {
    if n == 0 {
        return v;
    }
    (v << n) | (((v >> (23 - n)) ^ (v >> (18 - n))) & ((1 << n) - 1))
}

/// 8-bit DAC value of the noise register
#[inline]
pub fn noise_value(v: u32) -> u8 {
    NOISE_LSB[(v & 0xff) as usize]
        | NOISE_MID[((v >> 8) & 0xff) as usize]
        | NOISE_MSB[((v >> 16) & 0xff) as usize]
}

/// Identifies which wavetable a voice reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Table {
    /// Two zero entries, indexed by the accumulator MSB
    #[default]
    Silent,
    Triangle,
    Sawtooth,
    TriSaw,
    Pulse,
    PulseTri,
    PulseSaw,
    PulseTriSaw,
}

/// 15-bit waveform tables indexed by the top 12 accumulator bits.
///
/// The pulse tables are 8192 entries long: the first half is zero and the
/// voice starts reading at `4096 - pulse_width`, so the high phase begins
/// once the accumulator passes the pulse width.
#[derive(Debug, Clone)]
pub struct Wavetables {
    silent: [u16; 2],
    triangle: Vec<u16>,
    sawtooth: Vec<u16>,
    tri_saw: Vec<u16>,
    pulse: Vec<u16>,
    pulse_tri: Vec<u16>,
    pulse_saw: Vec<u16>,
    pulse_tri_saw: Vec<u16>,
}

impl Wavetables {
    pub fn new(model: ChipModel) -> Self {
        let mut tables = Self {
            silent: [0; 2],
            triangle: vec![0; 4096],
            sawtooth: vec![0; 4096],
            tri_saw: vec![0; 4096],
            pulse: vec![0; 8192],
            pulse_tri: vec![0; 8192],
            pulse_saw: vec![0; 8192],
            pulse_tri_saw: vec![0; 8192],
        };

        for i in 0..4096u32 {
            tables.triangle[i as usize] = if i < 2048 {
                (i << 4) as u16
            } else {
                (0xffff - (i << 4)) as u16
            };
            tables.sawtooth[i as usize] = (i << 3) as u16;
            tables.tri_saw[i as usize] = combined(model, i, true, true) << 7;
            tables.pulse[4096 + i as usize] = 0x7fff;
            match model {
                ChipModel::Mos8580 => {
                    tables.pulse_tri[4096 + i as usize] = combined(model, i, true, false) << 7;
                    tables.pulse_saw[4096 + i as usize] = combined(model, i, false, true) << 7;
                    tables.pulse_tri_saw[4096 + i as usize] = combined(model, i, true, true) << 7;
                }
                ChipModel::Mos6581 => {
                    // Only pulse+triangle is audible on the old chip
                    tables.pulse_tri[4096 + i as usize] = combined(model, i, true, false) << 7;
                }
            }
        }
        tables
    }

    #[inline]
    pub fn lookup(&self, table: Table, index: usize) -> u16 {
        let data: &[u16] = match table {
            Table::Silent => &self.silent,
            Table::Triangle => &self.triangle,
            Table::Sawtooth => &self.sawtooth,
            Table::TriSaw => &self.tri_saw,
            Table::Pulse => &self.pulse,
            Table::PulseTri => &self.pulse_tri,
            Table::PulseSaw => &self.pulse_saw,
            Table::PulseTriSaw => &self.pulse_tri_saw,
        };
        data.get(index).copied().unwrap_or(0)
    }
}

/// 8-bit output of a combined waveform at 12-bit phase `i`.
///
/// Selected waveforms short their output bits together. On the 6581 a zero
/// bit also pulls its neighbours down, so only runs of set bits survive.
fn combined(model: ChipModel, i: u32, triangle: bool, sawtooth: bool) -> u16 {
    let mut bits = 0xfff;
    if triangle {
        let t = if i & 0x800 != 0 { !i & 0x7ff } else { i & 0x7ff };
        bits &= t << 1;
    }
    if sawtooth {
        bits &= i;
    }
    if model == ChipModel::Mos6581 {
        bits &= ((bits >> 1) | 0x800) & ((bits << 1) | 1);
    }
    ((bits & 0xfff) >> 4) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noise_tap_tables() {
        // Bit 7 of the low byte lands on output bit 2
        assert_eq!(NOISE_LSB[0x80], 0x04);
        assert_eq!(NOISE_LSB[0x10], 0x02);
        assert_eq!(NOISE_LSB[0x04], 0x01);
        assert_eq!(NOISE_MID[0x20], 0x10);
        assert_eq!(NOISE_MID[0x08], 0x08);
        assert_eq!(NOISE_MSB[0x40], 0x80);
        assert_eq!(NOISE_MSB[0x10], 0x40);
        assert_eq!(NOISE_MSB[0x01], 0x20);
        assert_eq!(noise_value(0xffffff), 0xff);
    }

    #[test]
    fn test_noise_shift_zero_is_identity() {
        assert_eq!(noise_shift(NOISE_SEED, 0), NOISE_SEED);
    }

    #[test]
    fn test_noise_shift_feedback() {
        // 16 shifts in one go equal 16 single shifts on the low 24 bits
        let mut v = NOISE_SEED;
        for _ in 0..16 {
            v = noise_shift(v, 1);
        }
        assert_eq!(v & 0xff_ffff, noise_shift(NOISE_SEED, 16) & 0xff_ffff);
    }

    #[test]
    fn test_triangle_table_is_symmetric() {
        let t = Wavetables::new(ChipModel::Mos6581);
        assert_eq!(t.lookup(Table::Triangle, 0), 0);
        assert_eq!(t.lookup(Table::Triangle, 2047), 0x7ff0);
        assert_eq!(t.lookup(Table::Triangle, 2048), 0x7fff);
        assert_eq!(t.lookup(Table::Triangle, 4095), 0x000f);
    }

    #[test]
    fn test_pulse_table_halves() {
        let t = Wavetables::new(ChipModel::Mos8580);
        assert_eq!(t.lookup(Table::Pulse, 4095), 0);
        assert_eq!(t.lookup(Table::Pulse, 4096), 0x7fff);
        assert_eq!(t.lookup(Table::Pulse, 8191), 0x7fff);
    }

    #[test]
    fn test_old_chip_mutes_pulse_saw() {
        let t = Wavetables::new(ChipModel::Mos6581);
        assert!((4096..8192).all(|i| t.lookup(Table::PulseSaw, i) == 0));
        assert!((4096..8192).all(|i| t.lookup(Table::PulseTriSaw, i) == 0));
    }

    #[test]
    fn test_combined_never_exceeds_components() {
        let t = Wavetables::new(ChipModel::Mos8580);
        for i in 0..4096 {
            let saw = t.lookup(Table::Sawtooth, i) as u32;
            let mix = t.lookup(Table::TriSaw, i) as u32;
            assert!(mix <= saw, "index {}", i);
        }
    }
}
