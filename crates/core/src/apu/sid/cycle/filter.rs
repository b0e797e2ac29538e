//! Two-integrator state variable filter and the board-level RC filter.
//!
//! Integrator coefficients are scaled by 1.048576 so that dividing by one
//! million (a 1 MHz clock period) becomes a right shift by 20.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::apu::sid::ChipModel;

/// Cutoff frequency in Hz at selected 11-bit FC values, 6581
const F0_POINTS_6581: [(u16, f64); 27] = [
    (0, 220.0),
    (128, 230.0),
    (256, 250.0),
    (384, 300.0),
    (512, 420.0),
    (640, 780.0),
    (768, 1600.0),
    (832, 2300.0),
    (896, 3200.0),
    (960, 4300.0),
    (992, 5000.0),
    (1008, 5400.0),
    (1016, 5700.0),
    (1023, 6000.0),
    (1024, 4600.0),
    (1032, 4800.0),
    (1056, 5300.0),
    (1088, 6000.0),
    (1120, 6600.0),
    (1152, 7200.0),
    (1280, 9500.0),
    (1408, 12000.0),
    (1536, 14500.0),
    (1664, 16000.0),
    (1792, 17100.0),
    (1920, 17700.0),
    (2047, 18100.0),
];

/// Cutoff frequency in Hz at selected 11-bit FC values, 8580
const F0_POINTS_8580: [(u16, f64); 17] = [
    (0, 0.0),
    (128, 800.0),
    (256, 1600.0),
    (384, 2500.0),
    (512, 3300.0),
    (640, 4100.0),
    (768, 4800.0),
    (896, 5600.0),
    (1024, 6300.0),
    (1152, 7000.0),
    (1280, 7700.0),
    (1408, 8500.0),
    (1536, 9200.0),
    (1664, 9800.0),
    (1792, 10500.0),
    (1920, 11100.0),
    (2047, 11700.0),
];

/// Highest cutoff that stays stable with single-cycle integration
const MAX_STABLE_CUTOFF_HZ: f64 = 16_000.0;
const TIME_SCALE: f64 = 1.048_576;

/// Cutoff frequency in Hz for an 11-bit FC value, interpolated linearly
/// between measured points.
pub fn cutoff_hz(model: ChipModel, fc: u16) -> f64 {
    let points: &[(u16, f64)] = match model {
        ChipModel::Mos6581 => &F0_POINTS_6581,
        ChipModel::Mos8580 => &F0_POINTS_8580,
    };
    let fc = fc.min(0x7ff);
    for pair in points.windows(2) {
        let (x0, y0) = pair[0];
        let (x1, y1) = pair[1];
        if fc <= x1 {
            if x1 == x0 {
                return y1;
            }
            return y0 + (y1 - y0) * (fc - x0) as f64 / (x1 - x0) as f64;
        }
    }
    points[points.len() - 1].1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Filter {
    enabled: bool,
    model: ChipModel,

    /// 11-bit cutoff register
    fc: u16,
    res: u8,
    /// Voice routing bits (1-3, external input)
    filt: u8,
    voice3off: bool,
    /// Mode bits: 1 low pass, 2 band pass, 4 high pass
    hp_bp_lp: u8,
    vol: u8,

    mixer_dc: i32,

    vhp: i32,
    vbp: i32,
    vlp: i32,
    vnf: i32,

    w0_ceil_1: i32,
    div_q_1024: i32,
}

impl Filter {
    pub fn new(model: ChipModel, enabled: bool) -> Self {
        let mut filter = Self {
            enabled,
            model,
            fc: 0,
            res: 0,
            filt: 0,
            voice3off: false,
            hp_bp_lp: 0,
            vol: 0,
            mixer_dc: match model {
                // Mixer DC offset of the old chip
                ChipModel::Mos6581 => (-0xfff * 0xff / 18) >> 7,
                ChipModel::Mos8580 => 0,
            },
            vhp: 0,
            vbp: 0,
            vlp: 0,
            vnf: 0,
            w0_ceil_1: 0,
            div_q_1024: 0,
        };
        filter.set_w0();
        filter.set_q();
        filter
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.model, self.enabled);
    }

    fn set_w0(&mut self) {
        let w0 = 2.0 * PI * cutoff_hz(self.model, self.fc) * TIME_SCALE;
        let w0_max = 2.0 * PI * MAX_STABLE_CUTOFF_HZ * TIME_SCALE;
        self.w0_ceil_1 = w0.min(w0_max) as i32;
    }

    fn set_q(&mut self) {
        // Q ranges from 0.707 to 1.707
        self.div_q_1024 = (1024.0 / (0.707 + self.res as f64 / 15.0)) as i32;
    }

    pub fn write_fc_lo(&mut self, val: u8) {
        self.fc = (self.fc & 0x7f8) | (val as u16 & 0x007);
        self.set_w0();
    }

    pub fn write_fc_hi(&mut self, val: u8) {
        self.fc = ((val as u16) << 3 & 0x7f8) | (self.fc & 0x007);
        self.set_w0();
    }

    pub fn write_res_filt(&mut self, val: u8) {
        self.res = (val >> 4) & 0x0f;
        self.set_q();
        self.filt = val & 0x0f;
    }

    pub fn write_mode_vol(&mut self, val: u8) {
        self.voice3off = val & 0x80 != 0;
        self.hp_bp_lp = (val >> 4) & 0x07;
        self.vol = val & 0x0f;
    }

    pub fn volume(&self) -> u8 {
        self.vol
    }

    /// Advance one cycle with the raw voice outputs.
    pub fn clock(&mut self, voice1: i32, voice2: i32, voice3: i32, ext_in: i32) {
        let v1 = voice1 >> 7;
        let v2 = voice2 >> 7;
        // Voice 3 off only silences voice 3 when it bypasses the filter
        let v3 = if self.voice3off && self.filt & 0x04 == 0 { 0 } else { voice3 >> 7 };
        let ext = ext_in >> 7;

        if !self.enabled {
            self.vnf = v1 + v2 + v3 + ext;
            self.vhp = 0;
            self.vbp = 0;
            self.vlp = 0;
            return;
        }

        let mut vi = 0;
        let mut vnf = 0;
        for (bit, v) in [(0x01, v1), (0x02, v2), (0x04, v3), (0x08, ext)] {
            if self.filt & bit != 0 {
                vi += v;
            } else {
                vnf += v;
            }
        }
        self.vnf = vnf;

        let w0 = self.w0_ceil_1 as i64;
        let dvbp = (w0 * self.vhp as i64) >> 20;
        let dvlp = (w0 * self.vbp as i64) >> 20;
        self.vbp -= dvbp as i32;
        self.vlp -= dvlp as i32;
        self.vhp = ((self.vbp as i64 * self.div_q_1024 as i64) >> 10) as i32 - self.vlp - vi;
    }

    /// Mixer output scaled by the master volume
    pub fn output(&self) -> i32 {
        if !self.enabled {
            return (self.vnf + self.mixer_dc) * self.vol as i32;
        }
        let mut vf = 0;
        if self.hp_bp_lp & 0x1 != 0 {
            vf += self.vlp;
        }
        if self.hp_bp_lp & 0x2 != 0 {
            vf += self.vbp;
        }
        if self.hp_bp_lp & 0x4 != 0 {
            vf += self.vhp;
        }
        (self.vnf + vf + self.mixer_dc) * self.vol as i32
    }
}

/// First-order low pass (about 16 kHz) followed by a first-order high pass
/// (about 16 Hz) on the audio output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalFilter {
    enabled: bool,
    /// DC level removed when the filter is bypassed
    mixer_dc: i32,
    vlp: i32,
    vhp: i32,
    vo: i32,
}

impl ExternalFilter {
    /// 1/RC for R = 10 kOhm, C = 1000 pF, scaled
    const W0_LP: i64 = 104_858;
    /// 1/RC for R = 1 kOhm, C = 10 uF, scaled
    const W0_HP: i64 = 105;

    pub fn new(model: ChipModel, enabled: bool) -> Self {
        Self {
            enabled,
            mixer_dc: match model {
                ChipModel::Mos6581 => {
                    ((((0x800 - 0x380) + 0x800) * 0xff * 3 - 0xfff * 0xff / 18) >> 7) * 0x0f
                }
                ChipModel::Mos8580 => 0,
            },
            vlp: 0,
            vhp: 0,
            vo: 0,
        }
    }

    pub fn reset(&mut self) {
        self.vlp = 0;
        self.vhp = 0;
        self.vo = 0;
    }

    pub fn clock(&mut self, vi: i32) {
        if !self.enabled {
            self.vlp = 0;
            self.vhp = 0;
            self.vo = vi - self.mixer_dc;
            return;
        }
        let dvlp = ((Self::W0_LP >> 8) * (vi - self.vlp) as i64) >> 12;
        let dvhp = (Self::W0_HP * (self.vlp - self.vhp) as i64) >> 20;
        self.vo = self.vlp - self.vhp;
        self.vlp += dvlp as i32;
        self.vhp += dvhp as i32;
    }

    pub fn output(&self) -> i32 {
        self.vo
    }
}
