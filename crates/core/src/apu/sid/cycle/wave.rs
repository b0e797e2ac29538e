//! Cycle-stepped oscillator and waveform selector.
//!
//! Combined waveforms come from a bitwise model rather than sampled chip
//! output, so their levels are approximate.

use serde::{Deserialize, Serialize};

use crate::apu::sid::{control, ChipModel};

const ACCUMULATOR_MASK: u32 = 0xff_ffff;
const ACCUMULATOR_MSB: u32 = 0x80_0000;
/// Bit whose rising edge clocks the noise register
const NOISE_CLOCK_BIT: u32 = 0x08_0000;
const SHIFT_REGISTER_MASK: u32 = 0x7f_ffff;
/// Cycles the test bit must be held before the noise register refills with ones
const SHIFT_RESET_6581: u32 = 0x8000;
const SHIFT_RESET_8580: u32 = 0x95_0000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaveformGenerator {
    /// 24-bit phase accumulator
    pub accumulator: u32,
    /// 23-bit noise LFSR
    pub shift_register: u32,
    shift_pipeline: u8,
    shift_register_reset: u32,
    /// Set during the cycle the accumulator MSB went from 0 to 1
    pub msb_rising: bool,

    freq: u16,
    pulse_width: u16,
    /// Waveform select nibble (control bits 4-7)
    waveform: u8,
    test: bool,
    pub ring_mod: bool,
    pub sync: bool,

    model: ChipModel,
}

impl WaveformGenerator {
    pub fn new(model: ChipModel) -> Self {
        Self {
            accumulator: 0,
            shift_register: SHIFT_REGISTER_MASK,
            shift_pipeline: 0,
            shift_register_reset: 0,
            msb_rising: false,
            freq: 0,
            pulse_width: 0,
            waveform: 0,
            test: false,
            ring_mod: false,
            sync: false,
            model,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.model);
    }

    pub fn write_freq_lo(&mut self, val: u8) {
        self.freq = (self.freq & 0xff00) | val as u16;
    }

    pub fn write_freq_hi(&mut self, val: u8) {
        self.freq = (self.freq & 0x00ff) | (val as u16) << 8;
    }

    pub fn write_pw_lo(&mut self, val: u8) {
        self.pulse_width = (self.pulse_width & 0x0f00) | val as u16;
    }

    pub fn write_pw_hi(&mut self, val: u8) {
        self.pulse_width = (self.pulse_width & 0x00ff) | ((val as u16) & 0x0f) << 8;
    }

    pub fn write_control(&mut self, val: u8) {
        let test_next = val & control::TEST != 0;
        self.waveform = (val >> 4) & 0x0f;
        self.ring_mod = val & control::RING_MOD != 0;
        self.sync = val & control::SYNC != 0;

        if test_next && !self.test {
            // Accumulator clears and the register starts draining to all ones
            self.accumulator = 0;
            self.shift_pipeline = 0;
            self.shift_register_reset = match self.model {
                ChipModel::Mos6581 => SHIFT_RESET_6581,
                ChipModel::Mos8580 => SHIFT_RESET_8580,
            };
        } else if !test_next && self.test {
            // Releasing test shifts once with inverted feedback from bit 17
            let bit0 = (!self.shift_register >> 17) & 1;
            self.shift_register = ((self.shift_register << 1) | bit0) & SHIFT_REGISTER_MASK;
        }
        self.test = test_next;
    }

    /// Advance one CPU cycle.
    pub fn clock(&mut self) {
        if self.test {
            if self.shift_register_reset != 0 {
                self.shift_register_reset -= 1;
                if self.shift_register_reset == 0 {
                    self.shift_register = SHIFT_REGISTER_MASK;
                }
            }
            self.msb_rising = false;
            return;
        }

        let next = (self.accumulator + self.freq as u32) & ACCUMULATOR_MASK;
        let bits_set = !self.accumulator & next;
        self.accumulator = next;
        self.msb_rising = bits_set & ACCUMULATOR_MSB != 0;

        // The noise register shifts two cycles after bit 19 rises
        if bits_set & NOISE_CLOCK_BIT != 0 {
            self.shift_pipeline = 2;
        } else if self.shift_pipeline != 0 {
            self.shift_pipeline -= 1;
            if self.shift_pipeline == 0 {
                self.clock_shift_register();
            }
        }
    }

    fn clock_shift_register(&mut self) {
        let bit0 = ((self.shift_register >> 22) ^ (self.shift_register >> 17)) & 1;
        self.shift_register = ((self.shift_register << 1) | bit0) & SHIFT_REGISTER_MASK;
    }

    pub fn test(&self) -> bool {
        self.test
    }

    /// 12-bit waveform DAC input. `ring_source` is the accumulator of the
    /// preceding voice.
    pub fn output(&self, ring_source: u32) -> u16 {
        let acc = self.accumulator;
        let triangle = || {
            let msb = (if self.ring_mod { acc ^ ring_source } else { acc }) & ACCUMULATOR_MSB;
            (((if msb != 0 { !acc } else { acc }) >> 11) & 0xffe) as u16
        };
        let sawtooth = || (acc >> 12) as u16;
        let pulse = || {
            if self.test || (acc >> 12) as u16 >= self.pulse_width {
                0xfff
            } else {
                0x000
            }
        };

        match self.waveform {
            0x0 => 0,
            0x1 => triangle(),
            0x2 => sawtooth(),
            0x4 => pulse(),
            0x8 => self.noise_output(),
            combo => {
                let mut bits = 0xfffu16;
                if combo & 0x1 != 0 {
                    bits &= triangle();
                }
                if combo & 0x2 != 0 {
                    bits &= sawtooth();
                }
                if combo & 0x4 != 0 {
                    bits &= pulse();
                }
                if combo & 0x8 != 0 {
                    bits &= self.noise_output();
                }
                self.combine(combo, bits)
            }
        }
    }

    /// Combined waveforms short their output lines together. The old chip
    /// additionally lets a zero bit drag its neighbours down.
    fn combine(&self, combo: u8, bits: u16) -> u16 {
        match self.model {
            ChipModel::Mos8580 => bits,
            ChipModel::Mos6581 => {
                if combo & 0x6 == 0x6 && combo & 0x1 == 0 {
                    // Pulse+sawtooth is close to silent on the 6581
                    return bits & ((bits >> 1) | 0x800) & ((bits << 1) | 1) & 0xf80;
                }
                bits & ((bits >> 1) | 0x800) & ((bits << 1) | 1) & 0xfff
            }
        }
    }

    /// Eight LFSR taps routed to the top eight DAC bits
    fn noise_output(&self) -> u16 {
        let r = self.shift_register;
        (((r & 0x10_0000) >> 9)
            | ((r & 0x04_0000) >> 8)
            | ((r & 0x00_4000) >> 5)
            | ((r & 0x00_0800) >> 3)
            | ((r & 0x00_0200) >> 2)
            | ((r & 0x00_0020) << 1)
            | ((r & 0x00_0004) << 3)
            | ((r & 0x00_0001) << 4)) as u16
    }

    /// Value of the OSC3 register
    pub fn read_osc(&self, ring_source: u32) -> u8 {
        (self.output(ring_source) >> 4) as u8
    }
}

/// Apply hard sync for one cycle: a voice whose sync source's MSB rose is
/// reset, unless that source is itself being reset in the same cycle.
pub fn synchronize(waves: &mut [WaveformGenerator; 3]) {
    let rising = [waves[0].msb_rising, waves[1].msb_rising, waves[2].msb_rising];
    let sync = [waves[0].sync, waves[1].sync, waves[2].sync];
    for source in 0..3 {
        let dest = (source + 1) % 3;
        let source_of_source = (source + 2) % 3;
        if rising[source] && sync[dest] && !(sync[source] && rising[source_of_source]) {
            waves[dest].accumulator = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wave(ctrl: u8, freq: u16) -> WaveformGenerator {
        let mut w = WaveformGenerator::new(ChipModel::Mos8580);
        w.write_freq_lo(freq as u8);
        w.write_freq_hi((freq >> 8) as u8);
        w.write_control(ctrl);
        w
    }

    #[test]
    fn test_accumulator_wraps_at_24_bits() {
        let mut w = wave(0x20, 0xffff);
        for _ in 0..256 {
            w.clock();
        }
        assert_eq!(w.accumulator, (0xffff * 256) & ACCUMULATOR_MASK);
        assert!(w.accumulator <= ACCUMULATOR_MASK);
    }

    #[test]
    fn test_msb_rising_flag() {
        let mut w = wave(0x20, 0);
        w.accumulator = 0x7f_ffff;
        w.write_freq_lo(1);
        w.clock();
        assert!(w.msb_rising);
        w.clock();
        assert!(!w.msb_rising);
    }

    #[test]
    fn test_sawtooth_and_triangle_shapes() {
        let mut w = wave(0x20, 0);
        w.accumulator = 0xab_c000;
        assert_eq!(w.output(0), 0xabc);

        w.write_control(0x10);
        w.accumulator = 0x40_0000;
        assert_eq!(w.output(0), 0x800);
        w.accumulator = 0xc0_0000;
        assert_eq!(w.output(0), 0x7fe);
    }

    #[test]
    fn test_ring_mod_flips_triangle() {
        let mut w = wave(0x14, 0);
        w.accumulator = 0x40_0000;
        let plain = w.output(0);
        let ringed = w.output(0x80_0000);
        assert_eq!(plain, 0x800);
        assert_eq!(ringed, 0x7fe);
    }

    #[test]
    fn test_pulse_compares_width() {
        let mut w = wave(0x40, 0);
        w.write_pw_lo(0x00);
        w.write_pw_hi(0x08);
        w.accumulator = 0x7f_f000;
        assert_eq!(w.output(0), 0x000);
        w.accumulator = 0x80_0000;
        assert_eq!(w.output(0), 0xfff);
    }

    #[test]
    fn test_test_bit_holds_and_refills_noise() {
        let mut w = wave(0x80, 0x1000);
        for _ in 0..100 {
            w.clock();
        }
        w.shift_register = 0;
        w.write_control(0x88);
        assert_eq!(w.accumulator, 0);
        for _ in 0..SHIFT_RESET_8580 {
            w.clock();
        }
        assert_eq!(w.accumulator, 0);
        assert_eq!(w.shift_register, SHIFT_REGISTER_MASK);
    }

    #[test]
    fn test_noise_shifts_two_cycles_after_bit19() {
        let mut w = wave(0x80, 0);
        w.accumulator = 0x07_ffff;
        w.write_freq_lo(1);
        let before = w.shift_register;
        w.clock();
        assert_eq!(w.shift_register, before);
        w.clock();
        assert_eq!(w.shift_register, before);
        w.clock();
        assert_ne!(w.shift_register, before);
    }

    #[test]
    fn test_noise_output_of_full_register() {
        let w = wave(0x80, 0);
        assert_eq!(w.output(0), 0xff0);
        assert_eq!(w.read_osc(0), 0xff);
    }

    #[test]
    fn test_hard_sync_resets_destination() {
        let mut waves = [wave(0x20, 0), wave(0x22, 0x100), wave(0x20, 0)];
        waves[1].accumulator = 0x12_3456;
        waves[0].msb_rising = true;
        synchronize(&mut waves);
        assert_eq!(waves[1].accumulator, 0);
    }

    #[test]
    fn test_sync_suppressed_when_source_is_synced() {
        let mut waves = [wave(0x22, 0), wave(0x22, 0), wave(0x20, 0)];
        waves[1].accumulator = 0x12_3456;
        waves[0].msb_rising = true;
        waves[2].msb_rising = true;
        synchronize(&mut waves);
        assert_eq!(waves[1].accumulator, 0x12_3456);
        assert_eq!(waves[0].accumulator, 0);
    }
}
