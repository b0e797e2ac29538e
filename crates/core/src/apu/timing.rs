//! Machine timing: CPU clocks, frame lengths and per-frame sample pacing.

use serde::{Deserialize, Serialize};

/// Video standard of the emulated machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimingMode {
    /// NTSC (North America, Japan)
    Ntsc,
    /// PAL (Europe, Australia)
    #[default]
    Pal,
}

/// Clock and frame geometry of one machine in one video standard.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MachineTiming {
    /// CPU cycles per second
    pub clock_hz: f64,
    /// CPU cycles per video frame
    pub cycles_per_frame: u32,
}

impl MachineTiming {
    /// Commodore 64: 65 cycles x 263 lines (NTSC), 63 cycles x 312 lines (PAL).
    pub fn c64(mode: TimingMode) -> Self {
        match mode {
            TimingMode::Ntsc => Self {
                clock_hz: 1_022_727.0,
                cycles_per_frame: 17_095,
            },
            TimingMode::Pal => Self {
                clock_hz: 985_248.0,
                cycles_per_frame: 19_656,
            },
        }
    }

    /// Atari 2600: 76 cycles per line, 262 (NTSC) or 312 (PAL) lines.
    pub fn atari2600(mode: TimingMode) -> Self {
        match mode {
            TimingMode::Ntsc => Self {
                clock_hz: 1_193_191.666_666_67,
                cycles_per_frame: 19_912,
            },
            TimingMode::Pal => Self {
                clock_hz: 1_182_298.0,
                cycles_per_frame: 23_712,
            },
        }
    }

    /// Frames per second implied by the clock and frame length
    pub fn frame_rate_hz(&self) -> f64 {
        self.clock_hz / self.cycles_per_frame as f64
    }

    /// Output samples per frame at `sample_rate`, with fraction
    pub fn samples_per_frame(&self, sample_rate: u32) -> f64 {
        sample_rate as f64 * self.cycles_per_frame as f64 / self.clock_hz
    }
}

/// Hands out whole sample counts per frame while carrying the fraction, so
/// the total over many frames never drifts from the exact rate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FramePacer {
    samples_per_frame: f64,
    carry: f64,
}

impl FramePacer {
    pub fn new(timing: MachineTiming, sample_rate: u32) -> Self {
        Self {
            samples_per_frame: timing.samples_per_frame(sample_rate),
            carry: 0.0,
        }
    }

    /// Sample count for the next frame.
    pub fn next_frame(&mut self) -> usize {
        let total = self.samples_per_frame + self.carry;
        let whole = total.floor();
        self.carry = total - whole;
        whole as usize
    }

    pub fn samples_per_frame(&self) -> f64 {
        self.samples_per_frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_c64_pal_frame_rate() {
        let timing = MachineTiming::c64(TimingMode::Pal);
        assert!((timing.frame_rate_hz() - 50.12).abs() < 0.01);
    }

    #[test]
    fn test_atari_ntsc_frame_rate() {
        let timing = MachineTiming::atari2600(TimingMode::Ntsc);
        assert!((timing.frame_rate_hz() - 59.92).abs() < 0.01);
    }

    #[test]
    fn test_pacer_does_not_drift() {
        let timing = MachineTiming::c64(TimingMode::Pal);
        let mut pacer = FramePacer::new(timing, 44100);
        let frames = 1000;
        let total: usize = (0..frames).map(|_| pacer.next_frame()).sum();
        let exact = pacer.samples_per_frame() * frames as f64;
        assert!((total as f64 - exact).abs() < 1.0);
    }

    #[test]
    fn test_pacer_whole_rate() {
        // 44100 Hz over exactly 50 frames per second gives 882 per frame
        let timing = MachineTiming {
            clock_hz: 1_000_000.0,
            cycles_per_frame: 20_000,
        };
        let mut pacer = FramePacer::new(timing, 44100);
        for _ in 0..10 {
            assert_eq!(pacer.next_frame(), 882);
        }
    }
}
