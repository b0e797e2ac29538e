//! Cycle-stepped SID engine.
//!
//! Every CPU cycle clocks the three envelopes and oscillators, applies hard
//! sync, runs the voice outputs through the state variable filter and the
//! external RC filter. Output samples are taken at the host rate by linear
//! interpolation between the two cycles that bracket each sample instant.

pub mod envelope;
pub mod filter;
pub mod wave;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use self::envelope::EnvelopeGenerator;
use self::filter::{ExternalFilter, Filter};
use self::wave::{synchronize, WaveformGenerator};
use super::{AdsrState, ChipModel, SID_REGISTERS};
use crate::apu::AudioChip;
use crate::logging::{log, LogCategory, LogLevel};
use crate::{Result, SoundError};

const FIXP_SHIFT: u32 = 16;
const FIXP_MASK: u32 = (1 << FIXP_SHIFT) - 1;

/// Cycles a written value stays readable from write-only registers
pub const BUS_VALUE_TTL: i64 = 34_000;

/// Maps the external filter's range onto 16 bits
const OUTPUT_DIVISOR: i32 = ((4095 * 255) >> 7) * 3 * 15 * 2 / 65536;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleSid {
    model: ChipModel,
    filters_enabled: bool,

    waves: [WaveformGenerator; 3],
    envelopes: [EnvelopeGenerator; 3],
    filter: Filter,
    ext_filter: ExternalFilter,
    regs: [u8; SID_REGISTERS],

    bus_value: u8,
    bus_value_cycle: i64,

    /// DAC level of a zero waveform sample
    wave_zero: i32,
    /// DC added by the envelope multiplier
    voice_dc: i32,

    sample_rate: u32,
    clock_hz: f64,
    /// Cycles per output sample, 16.16 fixed point
    cycles_per_sample: u32,
    sample_offset: u32,
    sample_prev: i16,
    sample_now: i16,
    /// Total cycles clocked since init
    cycles: u64,
}

impl CycleSid {
    pub fn new(model: ChipModel, filters_enabled: bool) -> Self {
        let (wave_zero, voice_dc) = match model {
            ChipModel::Mos6581 => (0x380, 0x800 * 0xff),
            ChipModel::Mos8580 => (0x800, 0),
        };
        Self {
            model,
            filters_enabled,
            waves: [
                WaveformGenerator::new(model),
                WaveformGenerator::new(model),
                WaveformGenerator::new(model),
            ],
            envelopes: Default::default(),
            filter: Filter::new(model, filters_enabled),
            ext_filter: ExternalFilter::new(model, filters_enabled),
            regs: [0; SID_REGISTERS],
            bus_value: 0,
            bus_value_cycle: 0,
            wave_zero,
            voice_dc,
            sample_rate: 0,
            clock_hz: 0.0,
            cycles_per_sample: 0,
            sample_offset: 0,
            sample_prev: 0,
            sample_now: 0,
            cycles: 0,
        }
    }

    pub fn model(&self) -> ChipModel {
        self.model
    }

    pub fn registers(&self) -> &[u8; SID_REGISTERS] {
        &self.regs
    }

    /// Envelope state and 8-bit level of `voice` (0-2)
    pub fn envelope(&self, voice: usize) -> (AdsrState, u8) {
        let env = &self.envelopes[voice];
        (env.state(), env.counter)
    }

    /// Phase accumulator of `voice` (0-2)
    pub fn accumulator(&self, voice: usize) -> u32 {
        self.waves[voice].accumulator
    }

    /// CPU cycles clocked since [`AudioChip::init`]
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    fn voice_output(&self, i: usize) -> i32 {
        let ring_source = self.waves[(i + 2) % 3].accumulator;
        let wave = self.waves[i].output(ring_source) as i32;
        (wave - self.wave_zero) * self.envelopes[i].counter as i32 + self.voice_dc
    }

    fn clock(&mut self) {
        for env in self.envelopes.iter_mut() {
            env.clock();
        }
        for wave in self.waves.iter_mut() {
            wave.clock();
        }
        synchronize(&mut self.waves);

        let (v1, v2, v3) = (self.voice_output(0), self.voice_output(1), self.voice_output(2));
        self.filter.clock(v1, v2, v3, 0);
        self.ext_filter.clock(self.filter.output());
        self.cycles += 1;
    }

    fn output(&self) -> i16 {
        (self.ext_filter.output() / OUTPUT_DIVISOR).clamp(i16::MIN as i32, i16::MAX as i32) as i16
    }
}

impl AudioChip for CycleSid {
    fn name(&self) -> &'static str {
        "resid"
    }

    fn init(&mut self, sample_rate: u32, clock_hz: f64) -> Result<()> {
        if sample_rate == 0 {
            return Err(SoundError::InvalidSampleRate(sample_rate));
        }
        if !(clock_hz.is_finite() && clock_hz >= sample_rate as f64) {
            return Err(SoundError::InvalidClockRate(clock_hz));
        }
        self.sample_rate = sample_rate;
        self.clock_hz = clock_hz;
        self.cycles_per_sample = (clock_hz / sample_rate as f64 * (1 << FIXP_SHIFT) as f64 + 0.5) as u32;
        self.sample_offset = 0;
        self.sample_prev = 0;
        self.sample_now = 0;
        self.cycles = 0;

        log(LogCategory::Sid, LogLevel::Info, || {
            format!(
                "SID: cycle engine ({:?}, filters {}) at {} Hz, clock {:.0} Hz, {:.3} cycles/sample",
                self.model,
                if self.filters_enabled { "on" } else { "off" },
                sample_rate,
                clock_hz,
                self.cycles_per_sample as f64 / (1 << FIXP_SHIFT) as f64
            )
        });
        Ok(())
    }

    fn reset(&mut self) {
        for wave in self.waves.iter_mut() {
            wave.reset();
        }
        for env in self.envelopes.iter_mut() {
            env.reset();
        }
        self.filter.reset();
        self.ext_filter.reset();
        self.regs = [0; SID_REGISTERS];
        self.bus_value = 0;
        self.bus_value_cycle = 0;
    }

    fn write_register(&mut self, addr: u16, val: u8) {
        let addr = addr as usize;
        if addr >= SID_REGISTERS {
            log(LogCategory::Sid, LogLevel::Trace, || {
                format!("SID: ignored write to register ${:02X}", addr)
            });
            return;
        }
        self.regs[addr] = val;

        match addr {
            0x00..=0x14 => {
                let v = addr / 7;
                match addr % 7 {
                    0 => self.waves[v].write_freq_lo(val),
                    1 => self.waves[v].write_freq_hi(val),
                    2 => self.waves[v].write_pw_lo(val),
                    3 => self.waves[v].write_pw_hi(val),
                    4 => {
                        self.waves[v].write_control(val);
                        self.envelopes[v].write_control(val);
                    }
                    5 => self.envelopes[v].write_attack_decay(val),
                    _ => self.envelopes[v].write_sustain_release(val),
                }
            }
            0x15 => self.filter.write_fc_lo(val),
            0x16 => self.filter.write_fc_hi(val),
            0x17 => self.filter.write_res_filt(val),
            0x18 => self.filter.write_mode_vol(val),
            _ => {}
        }
    }

    fn bus_write(&mut self, _addr: u16, val: u8, cycle: i64) {
        self.bus_value = val;
        self.bus_value_cycle = cycle;
    }

    fn read_register(&mut self, addr: u16, cycle: i64, _sample_fraction: f64) -> u8 {
        match addr {
            // No paddles attached
            0x19 | 0x1a => 0xff,
            0x1b => self.waves[2].read_osc(self.waves[1].accumulator),
            0x1c => self.envelopes[2].read_env(),
            _ => {
                if cycle - self.bus_value_cycle < BUS_VALUE_TTL {
                    self.bus_value
                } else {
                    0
                }
            }
        }
    }

    fn render(&mut self, out: &mut [i16]) {
        if self.cycles_per_sample == 0 {
            out.fill(0);
            return;
        }
        for slot in out.iter_mut() {
            let next = self.sample_offset + self.cycles_per_sample;
            let cycles = next >> FIXP_SHIFT;
            for i in (1..=cycles).rev() {
                self.clock();
                // Keep the outputs of the last two cycles for interpolation
                if i <= 2 {
                    self.sample_prev = self.sample_now;
                    self.sample_now = self.output();
                }
            }
            self.sample_offset = next & FIXP_MASK;

            let prev = self.sample_prev as i64;
            let now = self.sample_now as i64;
            let v = prev + ((self.sample_offset as i64 * (now - prev)) >> FIXP_SHIFT);
            *slot = v.clamp(i16::MIN as i64, i16::MAX as i64) as i16;
        }
    }

    fn adjust_cycle_counter(&mut self, amount: i64) {
        self.bus_value_cycle += amount;
    }

    fn save_state(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    fn load_state(&mut self, v: &Value) -> Result<()> {
        *self = serde_json::from_value(v.clone())?;
        Ok(())
    }
}
