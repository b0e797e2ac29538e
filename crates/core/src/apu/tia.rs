//! Atari 2600 TIA sound generator.
//!
//! Two channels, each driven by a 5-bit frequency divider off the 31.4 kHz
//! audio clock. The control nibble selects how the divided clock is further
//! gated by 4-, 5- and 9-bit polynomial counters and whether the output is a
//! pure square wave or a polynomial bit stream.
//!
//! # Registers
//! - `$15`/`$16` AUDC0/1: 4-bit control
//! - `$17`/`$18` AUDF0/1: 5-bit frequency divider
//! - `$19`/`$1A` AUDV0/1: 4-bit volume

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::apu::AudioChip;
use crate::logging::{log, LogCategory, LogLevel};
use crate::{Result, SoundError};

pub const AUDC0: u16 = 0x15;
pub const AUDC1: u16 = 0x16;
pub const AUDF0: u16 = 0x17;
pub const AUDF1: u16 = 0x18;
pub const AUDV0: u16 = 0x19;
pub const AUDV1: u16 = 0x1a;

/// Audio clock in Hz (colour clock / 114)
pub const AUDIO_CLOCK_HZ: u32 = 31_400;

/// Volume nibble scaling into the 16-bit output
const AUDV_SHIFT: u32 = 10;

// Control values with special handling
const SET_TO_1: u8 = 0x00;
const POLY9: u8 = 0x08;
const POLY5_POLY5: u8 = 0x0b;
const POLY5_DIV3: u8 = 0x0f;
const DIV3_MASK: u8 = 0x0c;

const POLY4_SIZE: usize = 15;
const POLY5_SIZE: usize = 31;
const POLY9_SIZE: usize = 511;

const BIT4: [u8; POLY4_SIZE] = [1, 1, 0, 1, 1, 1, 0, 0, 0, 0, 1, 0, 1, 0, 0];

const BIT5: [u8; POLY5_SIZE] = [
    0, 0, 1, 0, 1, 1, 0, 0, 1, 1, 1, 1, 1, 0, 0, 0, 1, 1, 0, 1, 1, 1, 0, 1, 0, 1, 0, 0, 0, 0, 1,
];

/// Divide-by-31 pattern: two pulses per 31 ticks
const DIV31: [u8; POLY5_SIZE] = [
    0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
];

static BIT9: [u8; POLY9_SIZE] = build_poly9();

/// Output sequence of the 9-bit LFSR with taps at bits 0 and 4
const fn build_poly9() -> [u8; POLY9_SIZE] {
    let mut table = [0u8; POLY9_SIZE];
    let mut reg: u16 = 0x1ff;
    let mut i = 0;
    while i < POLY9_SIZE {
        table[i] = (reg & 1) as u8;
        let feedback = (reg ^ (reg >> 4)) & 1;
        reg = (reg >> 1) | (feedback << 8);
        i += 1;
    }
    table
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Channel {
    audc: u8,
    audf: u8,
    /// Volume already shifted and scaled
    audv: i16,
    outvol: i16,
    div_n_cnt: u16,
    div_n_max: u16,
    p4: usize,
    p5: usize,
    p9: usize,
    div3_cnt: u8,
}

impl Channel {
    /// Reject restored state that would index past the polynomial tables
    fn validate(&self) -> Result<()> {
        let max_volume = 0x0f << AUDV_SHIFT;
        let in_range = self.p4 < POLY4_SIZE
            && self.p5 < POLY5_SIZE
            && self.p9 < POLY9_SIZE
            && self.div3_cnt < 3
            && (0..=max_volume).contains(&self.audv)
            && (0..=max_volume).contains(&self.outvol);
        if in_range {
            Ok(())
        } else {
            Err(SoundError::InvalidConfig(format!("TIA channel state out of range: {:?}", self)))
        }
    }

    fn update_divider(&mut self) {
        let new_max = if self.audc == SET_TO_1 || self.audc == POLY5_POLY5 {
            // Constant output at the current volume
            self.outvol = self.audv;
            0
        } else {
            let n = self.audf as u16 + 1;
            if self.audc & DIV3_MASK == DIV3_MASK && self.audc != POLY5_DIV3 {
                n * 3
            } else {
                n
            }
        };

        if new_max != self.div_n_max {
            self.div_n_max = new_max;
            if self.div_n_cnt == 0 || new_max == 0 {
                self.div_n_cnt = new_max;
            }
        }
    }

    fn toggle(&mut self) {
        self.outvol = if self.outvol != 0 { 0 } else { self.audv };
    }

    fn level(&mut self, bit: u8) {
        self.outvol = if bit != 0 { self.audv } else { 0 };
    }

    /// Advance one tick of the audio clock.
    fn clock(&mut self) {
        if self.div_n_cnt > 1 {
            self.div_n_cnt -= 1;
            return;
        }
        if self.div_n_cnt != 1 {
            return;
        }

        let prev_bit5 = BIT5[self.p5];
        self.div_n_cnt = self.div_n_max;
        self.p5 = (self.p5 + 1) % POLY5_SIZE;
        let bit5 = BIT5[self.p5];
        let audc = self.audc;

        let tick = audc & 0x02 == 0
            || (audc & 0x01 == 0 && DIV31[self.p5] != 0)
            || (audc & 0x01 == 1 && bit5 != 0)
            || (audc == POLY5_DIV3 && bit5 != prev_bit5);
        if !tick {
            return;
        }

        if audc & 0x04 != 0 {
            // Pure square wave
            if audc == POLY5_DIV3 {
                if bit5 != prev_bit5 {
                    self.div3_cnt += 1;
                    if self.div3_cnt == 3 {
                        self.div3_cnt = 0;
                        self.toggle();
                    }
                }
            } else {
                self.toggle();
            }
        } else if audc & 0x08 != 0 {
            if audc == POLY9 {
                self.p9 = (self.p9 + 1) % POLY9_SIZE;
                self.level(BIT9[self.p9]);
            } else if audc & 0x02 != 0 {
                if self.outvol != 0 || audc & 0x01 != 0 {
                    self.outvol = 0;
                } else {
                    self.outvol = self.audv;
                }
            } else {
                self.level(bit5);
            }
        } else {
            self.p4 = (self.p4 + 1) % POLY4_SIZE;
            self.level(BIT4[self.p4]);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TiaSound {
    channels: [Channel; 2],
    /// 1 mixes both channels, 2 interleaves them left/right
    output_channels: usize,
    volume_percent: u8,
    sample_rate: u32,
    /// Decimation accumulator: gains `sample_rate` per audio clock tick
    output_counter: u32,
}

impl Default for TiaSound {
    fn default() -> Self {
        Self::new(1, 100)
    }
}

impl TiaSound {
    pub fn new(output_channels: usize, volume_percent: u8) -> Self {
        Self {
            channels: Default::default(),
            output_channels,
            volume_percent: volume_percent.min(100),
            sample_rate: 0,
            output_counter: 0,
        }
    }

    pub fn volume_percent(&self) -> u8 {
        self.volume_percent
    }

    /// Applies to volume registers written from now on
    pub fn set_volume(&mut self, percent: u8) {
        self.volume_percent = percent.min(100);
    }

    /// Current output level of channel 0 or 1
    pub fn channel_output(&self, channel: usize) -> i16 {
        self.channels[channel].outvol
    }

    fn clock_channels(&mut self) {
        for ch in self.channels.iter_mut() {
            ch.clock();
        }
    }
}

impl AudioChip for TiaSound {
    fn name(&self) -> &'static str {
        "tia"
    }

    fn init(&mut self, sample_rate: u32, clock_hz: f64) -> Result<()> {
        if sample_rate == 0 {
            return Err(SoundError::InvalidSampleRate(sample_rate));
        }
        if !(clock_hz.is_finite() && clock_hz >= 1.0) {
            return Err(SoundError::InvalidClockRate(clock_hz));
        }
        if !(1..=2).contains(&self.output_channels) {
            return Err(SoundError::UnsupportedChannels(self.output_channels));
        }
        self.sample_rate = sample_rate;
        self.output_counter = 0;
        log(LogCategory::Tia, LogLevel::Info, || {
            format!(
                "TIA: {} Hz, {} output channel(s), volume {}%",
                sample_rate, self.output_channels, self.volume_percent
            )
        });
        Ok(())
    }

    fn reset(&mut self) {
        self.channels = Default::default();
        self.output_counter = 0;
    }

    fn write_register(&mut self, addr: u16, val: u8) {
        let chan = match addr {
            AUDC0 | AUDF0 | AUDV0 => 0,
            AUDC1 | AUDF1 | AUDV1 => 1,
            _ => {
                log(LogCategory::Tia, LogLevel::Trace, || {
                    format!("TIA: ignored write to register ${:02X}", addr)
                });
                return;
            }
        };
        let volume_percent = self.volume_percent as i32;
        let ch = &mut self.channels[chan];
        match addr {
            AUDC0 | AUDC1 => ch.audc = val & 0x0f,
            AUDF0 | AUDF1 => ch.audf = val & 0x1f,
            _ => ch.audv = ((((val & 0x0f) as i32) << AUDV_SHIFT) * volume_percent / 100) as i16,
        }
        ch.update_divider();
    }

    fn render(&mut self, out: &mut [i16]) {
        if self.sample_rate == 0 {
            out.fill(0);
            return;
        }
        let stereo = self.output_channels == 2;
        let mut frames = out.chunks_exact_mut(self.output_channels).peekable();
        while frames.peek().is_some() {
            self.clock_channels();
            self.output_counter += self.sample_rate;
            while self.output_counter >= AUDIO_CLOCK_HZ {
                let Some(frame) = frames.next() else {
                    break;
                };
                let (left, right) = (self.channels[0].outvol, self.channels[1].outvol);
                if stereo {
                    frame[0] = left;
                    frame[1] = right;
                } else {
                    frame[0] = left + right;
                }
                self.output_counter -= AUDIO_CLOCK_HZ;
            }
        }
    }

    fn channels(&self) -> usize {
        self.output_channels
    }

    fn save_state(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    fn load_state(&mut self, v: &Value) -> Result<()> {
        let restored: TiaSound = serde_json::from_value(v.clone())?;
        if !(1..=2).contains(&restored.output_channels) {
            return Err(SoundError::UnsupportedChannels(restored.output_channels));
        }
        // A render may stop with up to one tick of output still owed
        let counter_limit = AUDIO_CLOCK_HZ.saturating_add(restored.sample_rate);
        if restored.sample_rate > u32::MAX / 4
            || restored.output_counter >= counter_limit
            || restored.volume_percent > 100
        {
            return Err(SoundError::InvalidConfig("TIA output state out of range".into()));
        }
        for ch in &restored.channels {
            ch.validate()?;
        }
        *self = restored;
        Ok(())
    }
}
