//! Table-driven SID engine.
//!
//! Evaluates the chip once per output sample instead of once per CPU cycle.
//! Oscillators run on 32-bit phase accumulators scaled to the output rate,
//! envelopes on a 31-bit counter with a pseudo-exponential decay, and the
//! filter on per-voice integrators. Register writes only mark state dirty;
//! derived fields are recomputed lazily at the next sample.

pub mod envelope;
pub mod filter;
pub mod tables;
pub mod voice;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use self::envelope::RateTables;
use self::filter::{FilterParams, FilterTables};
use self::tables::{Wavetables, READ_DECAY_CYCLES};
use self::voice::Voice;
use super::{AdsrState, ChipModel, FastWaveforms, SID_REGISTERS};
use crate::apu::AudioChip;
use crate::logging::{log, LogCategory, LogLevel};
use crate::{Result, SoundError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FastSid {
    model: ChipModel,
    waveforms: FastWaveforms,
    filters_enabled: bool,

    regs: [u8; SID_REGISTERS],
    voices: [Voice; 3],
    /// Voice 3 is audible
    voice3_on: bool,
    volume: u8,
    /// Chip-global fields need recomputing
    dirty: bool,
    filter: FilterParams,

    /// Data bus shadow for reads of write-only registers
    last_store: u8,
    last_store_bits: u8,
    last_store_cycle: i64,

    sample_rate: u32,
    clock_hz: f64,
    /// `(clock << 8) / sample_rate`, phase units per output sample
    speed1: u32,

    #[serde(skip)]
    rates: RateTables,
    #[serde(skip)]
    filter_tables: Option<Box<FilterTables>>,
    #[serde(skip)]
    wavetables: Option<Box<Wavetables>>,
}

impl FastSid {
    pub fn new(model: ChipModel, filters_enabled: bool) -> Self {
        Self {
            model,
            waveforms: FastWaveforms::default(),
            filters_enabled,
            regs: [0; SID_REGISTERS],
            voices: [Voice::new(), Voice::new(), Voice::new()],
            voice3_on: true,
            volume: 0,
            dirty: true,
            filter: FilterParams::default(),
            last_store: 0,
            last_store_bits: 0,
            last_store_cycle: 0,
            sample_rate: 0,
            clock_hz: 0.0,
            speed1: 0,
            rates: RateTables::default(),
            filter_tables: None,
            wavetables: None,
        }
    }

    /// Select wavetable or closed-form waveform generation
    pub fn with_waveforms(mut self, waveforms: FastWaveforms) -> Self {
        self.waveforms = waveforms;
        self
    }

    pub fn model(&self) -> ChipModel {
        self.model
    }

    pub fn registers(&self) -> &[u8; SID_REGISTERS] {
        &self.regs
    }

    /// Envelope state and 31-bit level of `voice` (0-2)
    pub fn envelope(&self, voice: usize) -> (AdsrState, u32) {
        let env = &self.voices[voice].envelope;
        (env.state(), env.counter)
    }

    /// Phase accumulator of `voice` (0-2)
    pub fn accumulator(&self, voice: usize) -> u32 {
        self.voices[voice].accumulator
    }

    fn rebuild_tables(&mut self) {
        self.rates = RateTables::new(self.speed1);
        self.filter_tables = Some(Box::new(FilterTables::new(self.sample_rate, self.filters_enabled)));
        self.wavetables = Some(Box::new(Wavetables::new(self.model)));
    }

    fn setup_chip(&mut self, tables: &FilterTables) {
        if !self.dirty {
            return;
        }
        let regs = &self.regs;
        self.volume = regs[0x18] & 0x0f;
        // Voice 3 off only mutes it when it bypasses the filter
        self.voice3_on = !(regs[0x18] & 0x80 != 0 && regs[0x17] & 0x04 == 0);

        if self.filters_enabled {
            for (i, voice) in self.voices.iter_mut().enumerate() {
                voice.filtered = regs[0x17] & (1 << i) != 0;
            }
            if self.filter.update(regs, tables) {
                for voice in self.voices.iter_mut() {
                    voice.filter.clear();
                }
            }
        } else {
            for voice in self.voices.iter_mut() {
                voice.filtered = false;
            }
        }
        self.dirty = false;
    }

    fn sample(&mut self, waves: &Wavetables, filter_tables: &FilterTables) -> i16 {
        self.setup_chip(filter_tables);
        for (i, voice) in self.voices.iter_mut().enumerate() {
            let base = i * 7;
            voice.setup(
                &self.regs[base..base + 7],
                self.speed1,
                &self.rates,
                self.model == ChipModel::Mos8580,
                self.waveforms,
            );
        }

        // Raw accumulator advance; sync is resolved afterwards
        let [v0, v1, v2] = &mut self.voices;
        let sync1 = v0.advance() && v1.sync;
        let sync2 = v1.advance() && v2.sync;
        if v2.advance() && v0.sync {
            v0.hard_sync();
        }
        if sync2 {
            v2.hard_sync();
        }
        if sync1 {
            v1.hard_sync();
        }

        for voice in self.voices.iter_mut() {
            let adsr = voice.adsr;
            voice.envelope.advance(adsr, &self.rates);
        }

        let mut out = [0u32; 3];
        for i in 0..3 {
            let ring_source = self.voices[(i + 2) % 3].accumulator;
            let voice = &self.voices[i];
            let level = voice.envelope.level();
            if level != 0 && (i != 2 || self.voice3_on) {
                out[i] = level * voice.output(ring_source, waves, self.waveforms);
            }
        }

        if self.filters_enabled {
            for (voice, o) in self.voices.iter_mut().zip(out.iter_mut()) {
                voice.filter.io = filter_tables.amp_mod[(*o >> 22) as usize];
                if voice.filtered {
                    voice.filter.apply(&self.filter);
                }
                *o = ((voice.filter.io as i32 + 0x80) as u32) << 22;
            }
        }

        let sum = out[0].wrapping_add(out[1]).wrapping_add(out[2]);
        (((sum >> 20) as i32 - 0x600) * self.volume as i32) as i16
    }

    /// Cycle stamped bus decay: one bit of the last stored byte clears every
    /// [`READ_DECAY_CYCLES`] cycles.
    fn decayed_bus_value(&mut self, cycle: i64) -> u8 {
        while self.last_store_bits > 0 && self.last_store_cycle + READ_DECAY_CYCLES < cycle {
            self.last_store_cycle += READ_DECAY_CYCLES;
            self.last_store &= (0xfeffu32 >> self.last_store_bits) as u8;
            self.last_store_bits -= 1;
        }
        self.last_store
    }

    fn read_osc3(&mut self, sample_fraction: f64) -> u8 {
        let Some(waves) = self.wavetables.as_deref() else {
            return 0;
        };
        let ring_source = self.voices[1].accumulator;
        let v = &mut self.voices[2];
        // The offset is truncated to 16 bits
        let ffix = (sample_fraction * v.step as f64) as u32 as u16 as u32;
        let saved_noise = v.noise_reg;
        let saved_acc = v.accumulator;
        if v.noise && v.accumulator.wrapping_add(ffix) < v.accumulator {
            v.noise_reg = tables::noise_shift(v.noise_reg, 16);
        }
        v.accumulator = v.accumulator.wrapping_add(ffix);
        let value = (v.output(ring_source, waves, self.waveforms) >> 7) as u8;
        v.accumulator = saved_acc;
        v.noise_reg = saved_noise;
        value
    }
}

impl AudioChip for FastSid {
    fn name(&self) -> &'static str {
        "fastsid"
    }

    fn init(&mut self, sample_rate: u32, clock_hz: f64) -> Result<()> {
        if sample_rate == 0 {
            return Err(SoundError::InvalidSampleRate(sample_rate));
        }
        if !(clock_hz.is_finite() && clock_hz >= 1.0) {
            return Err(SoundError::InvalidClockRate(clock_hz));
        }
        self.sample_rate = sample_rate;
        self.clock_hz = clock_hz;
        self.speed1 = (((clock_hz as u64) << 8) / sample_rate as u64).min(u32::MAX as u64) as u32;
        self.rebuild_tables();

        self.dirty = true;
        for voice in self.voices.iter_mut() {
            voice.noise_reg = tables::NOISE_SEED;
            voice.filter = Default::default();
            voice.dirty = true;
        }

        log(LogCategory::Sid, LogLevel::Info, || {
            format!(
                "SID: fast engine ({:?}, filters {}) at {} Hz, clock {:.0} Hz, speed1 {}",
                self.model,
                if self.filters_enabled { "on" } else { "off" },
                sample_rate,
                clock_hz,
                self.speed1
            )
        });
        Ok(())
    }

    fn reset(&mut self) {
        for addr in 0..SID_REGISTERS as u16 {
            self.write_register(addr, 0);
        }
        self.last_store_cycle = 0;
    }

    fn write_register(&mut self, addr: u16, val: u8) {
        let addr = addr as usize;
        if addr >= SID_REGISTERS {
            log(LogCategory::Sid, LogLevel::Trace, || {
                format!("SID: ignored write to register ${:02X}", addr)
            });
            return;
        }

        match addr {
            0..=20 => {
                let voice = &mut self.voices[addr / 7];
                if addr % 7 == 4 && (self.regs[addr] ^ val) & super::control::GATE != 0 {
                    voice.gate_flip = true;
                }
                voice.dirty = true;
            }
            _ => self.dirty = true,
        }
        self.regs[addr] = val;
    }

    fn bus_write(&mut self, _addr: u16, val: u8, cycle: i64) {
        self.last_store = val;
        self.last_store_bits = 8;
        self.last_store_cycle = cycle;
    }

    fn read_register(&mut self, addr: u16, cycle: i64, sample_fraction: f64) -> u8 {
        match addr {
            0x19 | 0x1a => 0xff,
            0x1b => self.read_osc3(sample_fraction),
            0x1c => (self.voices[2].envelope.counter >> 23) as u8,
            _ => self.decayed_bus_value(cycle),
        }
    }

    fn render(&mut self, out: &mut [i16]) {
        let (Some(waves), Some(filter_tables)) = (self.wavetables.take(), self.filter_tables.take()) else {
            out.fill(0);
            return;
        };
        for sample in out.iter_mut() {
            *sample = self.sample(&waves, &filter_tables);
        }
        self.wavetables = Some(waves);
        self.filter_tables = Some(filter_tables);
    }

    fn adjust_cycle_counter(&mut self, amount: i64) {
        self.last_store_cycle += amount;
    }

    fn save_state(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    fn load_state(&mut self, v: &Value) -> Result<()> {
        let mut restored: FastSid = serde_json::from_value(v.clone())?;
        if restored.sample_rate > 0 {
            restored.rebuild_tables();
        }
        *self = restored;
        Ok(())
    }
}
