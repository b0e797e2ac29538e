//! Filter stage of the table-driven engine.
//!
//! Each routed voice runs its own pair of leaky integrators (`low`, `band`)
//! on an 8-bit signed sample. The coefficients are shared by the whole chip
//! and looked up from tables built for the output sample rate.

use serde::{Deserialize, Serialize};

/// Sample rate the coefficient curves were measured at
const REFERENCE_RATE: f32 = 44_100.0;

/// Mode bits of register $18 (`0x10` low, `0x20` band, `0x40` high pass)
pub const MODE_MASK: u8 = 0x70;
const LOW_PASS: u8 = 0x10;
const BAND_PASS: u8 = 0x20;
const LOW_BAND: u8 = 0x30;
const HIGH_PASS: u8 = 0x40;
const NOTCH: u8 = 0x50;
const BAND_HIGH: u8 = 0x60;
const ALL_PASS: u8 = 0x70;

/// Coefficient tables, rebuilt whenever the sample rate changes.
#[derive(Debug, Clone)]
pub struct FilterTables {
    low_pass: Vec<f32>,
    band_pass: Vec<f32>,
    resonance: [f32; 16],
    /// Maps the top 8 bits of a voice's output to a signed filter input
    pub amp_mod: [i8; 256],
}

impl FilterTables {
    pub fn new(sample_rate: u32, filters_enabled: bool) -> Self {
        let freq = sample_rate as f32;

        let filter_fs: f32 = 400.0;
        let filter_fm: f32 = 60.0;
        let filter_ft: f32 = 0.05;

        let low_pass = (0..0x800)
            .map(|rk| {
                let curve = ((rk as f64 / 2048.0) * (filter_fs as f64).ln()).exp() as f32;
                (((curve / filter_fm) + filter_ft) * REFERENCE_RATE / freq).clamp(0.01, 1.0)
            })
            .collect();

        let y_min: f32 = 0.002;
        let y_add = (0.22 - y_min) / 2048.0;
        let mut y = y_min;
        let band_pass = (0..0x800)
            .map(|_| {
                let v = y * REFERENCE_RATE / freq;
                y += y_add;
                v
            })
            .collect();

        // Resonance runs from 2.0 (none) down to 1.0 (max)
        let mut resonance = [0.0f32; 16];
        let mut res = 2.0f32;
        for slot in resonance.iter_mut() {
            *slot = res;
            res -= (2.0 - 1.0) / 15.0;
        }
        resonance[0] = 2.0;
        resonance[15] = 1.0;

        let amplitude: f32 = if filters_enabled { 0.7 } else { 1.0 };
        let mut amp_mod = [0i8; 256];
        for (i, slot) in amp_mod.iter_mut().enumerate() {
            *slot = ((i as f32 - 128.0) * amplitude) as i32 as i8;
        }

        Self {
            low_pass,
            band_pass,
            resonance,
            amp_mod,
        }
    }
}

impl Default for FilterTables {
    fn default() -> Self {
        Self::new(44_100, true)
    }
}

/// Chip-wide filter settings derived from registers $15-$18.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterParams {
    /// Mode bits (`0x00`-`0x70`)
    pub mode: u8,
    /// Mode seen at the previous update, to detect changes
    current_mode: u8,
    /// 11-bit cutoff
    pub cutoff: u16,
    pub dy: f32,
    pub res_dy: f32,
}

impl FilterParams {
    /// Recompute from the register file. Returns true if the filter mode
    /// changed, in which case every voice's integrators must be cleared.
    pub fn update(&mut self, regs: &[u8; 32], tables: &FilterTables) -> bool {
        self.mode = regs[0x18] & MODE_MASK;
        let mode_changed = self.mode != self.current_mode;
        self.current_mode = self.mode;

        self.cutoff = 0x7ff & ((regs[0x15] & 7) as u16 | (regs[0x16] as u16) << 3);
        self.dy = if self.mode == BAND_PASS {
            tables.band_pass[self.cutoff as usize]
        } else {
            tables.low_pass[self.cutoff as usize]
        };
        self.res_dy = (tables.resonance[(regs[0x17] >> 4) as usize] - self.dy).max(1.0);
        mode_changed
    }
}

/// Integrator state of one voice
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VoiceFilter {
    /// Input sample in, filtered sample out
    pub io: i8,
    pub low: f32,
    pub band: f32,
}

impl VoiceFilter {
    pub fn clear(&mut self) {
        self.low = 0.0;
        self.band = 0.0;
    }

    /// Run one sample through the filter in place.
    pub fn apply(&mut self, params: &FilterParams) {
        let dy = params.dy;
        let res_dy = params.res_dy;

        match params.mode {
            0x00 => self.io = 0,
            BAND_PASS => {
                self.low += self.band * dy;
                self.band += (self.io as f32 - self.low - self.band * res_dy) * dy;
                self.io = (self.band - self.low / 4.0) as i32 as i8;
            }
            HIGH_PASS => {
                self.low += self.band * dy * 0.1;
                self.band += (self.io as f32 - self.low - self.band * res_dy) * dy;
                let sample = (self.band - (self.io / 8) as f32).clamp(-128.0, 127.0);
                self.io = sample as i32 as i8;
            }
            mode => {
                self.low += self.band * dy;
                let sample = self.io as f32;
                let mut high = sample - self.low;
                let high_int = high as i32;
                high -= self.band * res_dy;
                self.band += high * dy;

                self.io = match mode {
                    LOW_PASS | LOW_BAND => self.low as i32 as i8,
                    NOTCH | ALL_PASS => (sample as i32 - (high_int >> 1)) as i8,
                    BAND_HIGH => high_int as i8,
                    _ => 0,
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regs_with(mode: u8, cutoff_hi: u8, resonance: u8) -> [u8; 32] {
        let mut regs = [0u8; 32];
        regs[0x16] = cutoff_hi;
        regs[0x17] = resonance << 4;
        regs[0x18] = mode;
        regs
    }

    #[test]
    fn test_table_ranges() {
        let t = FilterTables::new(44_100, true);
        assert!(t.low_pass.iter().all(|&v| (0.01..=1.0).contains(&v)));
        assert!((t.band_pass[0] - 0.002).abs() < 1e-6);
        assert_eq!(t.resonance[0], 2.0);
        assert_eq!(t.resonance[15], 1.0);
        assert_eq!(t.amp_mod[0x80], 0);
        assert_eq!(t.amp_mod[0x00], -89);
    }

    #[test]
    fn test_unfiltered_amplitude_is_identity() {
        let t = FilterTables::new(44_100, false);
        assert_eq!(t.amp_mod[0x00], -128);
        assert_eq!(t.amp_mod[0xff], 127);
    }

    #[test]
    fn test_higher_rate_lowers_coefficients() {
        let a = FilterTables::new(22_050, true);
        let b = FilterTables::new(48_000, true);
        assert!(a.band_pass[1000] > b.band_pass[1000]);
    }

    #[test]
    fn test_mode_change_reported_once() {
        let tables = FilterTables::default();
        let mut p = FilterParams::default();
        assert!(p.update(&regs_with(0x10, 0x40, 0), &tables));
        assert!(!p.update(&regs_with(0x10, 0x80, 0), &tables));
        assert!(p.update(&regs_with(0x20, 0x80, 0), &tables));
    }

    #[test]
    fn test_resonance_floor() {
        let tables = FilterTables::default();
        let mut p = FilterParams::default();
        p.update(&regs_with(0x10, 0xff, 15), &tables);
        assert_eq!(p.res_dy, 1.0);
    }

    #[test]
    fn test_low_pass_passes_dc() {
        let tables = FilterTables::default();
        let mut p = FilterParams::default();
        p.update(&regs_with(0x10, 0xff, 0), &tables);

        let mut f = VoiceFilter::default();
        for _ in 0..2000 {
            f.io = 100;
            f.apply(&p);
        }
        assert!((f.io as i32 - 100).abs() <= 2, "settled at {}", f.io);
    }

    #[test]
    fn test_mode_zero_mutes() {
        let p = FilterParams::default();
        let mut f = VoiceFilter {
            io: 77,
            ..Default::default()
        };
        f.apply(&p);
        assert_eq!(f.io, 0);
    }
}
