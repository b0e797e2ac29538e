//! Passthrough engine for a real SID attached to the host.
//!
//! Register writes are forwarded to a [`HardwareSink`] stamped with an
//! estimated chip cycle. The host's audio stream carries silence; the
//! device produces the sound itself.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::SID_REGISTERS;
use crate::apu::AudioChip;
use crate::logging::{log, LogCategory, LogLevel};
use crate::{Result, SoundError};

/// A device that accepts SID register writes.
pub trait HardwareSink: Send {
    fn name(&self) -> &str;

    /// Return the device to its power-on state
    fn reset(&mut self);

    /// Write `val` to register `addr` at chip cycle `cycle`
    fn write(&mut self, cycle: u64, addr: u8, val: u8);

    /// Read a register back, if the device supports it
    fn read(&mut self, _addr: u8) -> Option<u8> {
        None
    }
}

impl HardwareSink for Box<dyn HardwareSink> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn reset(&mut self) {
        (**self).reset()
    }

    fn write(&mut self, cycle: u64, addr: u8, val: u8) {
        (**self).write(cycle, addr, val)
    }

    fn read(&mut self, addr: u8) -> Option<u8> {
        (**self).read(addr)
    }
}

/// Sink used when no device is attached. Writes are discarded.
#[derive(Debug, Default)]
pub struct NullSink {
    warned: bool,
}

impl HardwareSink for NullSink {
    fn name(&self) -> &str {
        "none"
    }

    fn reset(&mut self) {}

    fn write(&mut self, _cycle: u64, _addr: u8, _val: u8) {
        if !self.warned {
            self.warned = true;
            log(LogCategory::Stubs, LogLevel::Info, || {
                "SID passthrough: no hardware device attached, writes are discarded".to_string()
            });
        }
    }
}

/// One write seen by a [`CaptureSink`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedWrite {
    pub cycle: u64,
    pub addr: u8,
    pub value: u8,
}

/// Records writes in memory, for tests and register dumps.
#[derive(Debug, Default, Clone)]
pub struct CaptureSink {
    writes: Vec<CapturedWrite>,
    resets: usize,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> &[CapturedWrite] {
        &self.writes
    }

    pub fn resets(&self) -> usize {
        self.resets
    }

    pub fn take(&mut self) -> Vec<CapturedWrite> {
        std::mem::take(&mut self.writes)
    }
}

impl HardwareSink for CaptureSink {
    fn name(&self) -> &str {
        "capture"
    }

    fn reset(&mut self) {
        self.resets += 1;
    }

    fn write(&mut self, cycle: u64, addr: u8, value: u8) {
        self.writes.push(CapturedWrite { cycle, addr, value });
    }
}

#[derive(Serialize, Deserialize)]
struct PassthroughState {
    regs: Vec<u8>,
    cycle: f64,
}

pub struct PassthroughSid<S: HardwareSink> {
    sink: S,
    /// Last value written to each register, replayed on state load
    regs: [u8; SID_REGISTERS],
    /// Estimated chip cycle, advanced by each rendered sample
    cycle: f64,
    cycles_per_sample: f64,
}

impl<S: HardwareSink> fmt::Debug for PassthroughSid<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PassthroughSid")
            .field("sink", &self.sink.name())
            .field("cycle", &self.cycle)
            .finish()
    }
}

impl<S: HardwareSink> PassthroughSid<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            regs: [0; SID_REGISTERS],
            cycle: 0.0,
            cycles_per_sample: 0.0,
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Estimated chip cycle of the next write
    pub fn cycle(&self) -> u64 {
        self.cycle as u64
    }
}

impl<S: HardwareSink> AudioChip for PassthroughSid<S> {
    fn name(&self) -> &'static str {
        "hardsid"
    }

    fn init(&mut self, sample_rate: u32, clock_hz: f64) -> Result<()> {
        if sample_rate == 0 {
            return Err(SoundError::InvalidSampleRate(sample_rate));
        }
        if !(clock_hz.is_finite() && clock_hz >= 1.0) {
            return Err(SoundError::InvalidClockRate(clock_hz));
        }
        self.cycles_per_sample = clock_hz / sample_rate as f64;
        self.cycle = 0.0;
        self.sink.reset();
        log(LogCategory::Sid, LogLevel::Info, || {
            format!("SID: passthrough to '{}' at {:.0} Hz clock", self.sink.name(), clock_hz)
        });
        Ok(())
    }

    fn reset(&mut self) {
        self.regs = [0; SID_REGISTERS];
        self.sink.reset();
    }

    fn write_register(&mut self, addr: u16, val: u8) {
        let Some(slot) = self.regs.get_mut(addr as usize) else {
            return;
        };
        *slot = val;
        self.sink.write(self.cycle as u64, addr as u8, val);
    }

    fn read_register(&mut self, addr: u16, _cycle: i64, _sample_fraction: f64) -> u8 {
        if addr as usize >= SID_REGISTERS {
            return 0;
        }
        self.sink.read(addr as u8).unwrap_or(self.regs[addr as usize])
    }

    fn render(&mut self, out: &mut [i16]) {
        out.fill(0);
        self.cycle += out.len() as f64 * self.cycles_per_sample;
    }

    fn save_state(&self) -> Value {
        let state = PassthroughState {
            regs: self.regs.to_vec(),
            cycle: self.cycle,
        };
        serde_json::to_value(state).unwrap_or(Value::Null)
    }

    fn load_state(&mut self, v: &Value) -> Result<()> {
        let state: PassthroughState = serde_json::from_value(v.clone())?;
        if state.regs.len() != SID_REGISTERS {
            return Err(SoundError::InvalidConfig(format!(
                "passthrough state holds {} registers, expected {}",
                state.regs.len(),
                SID_REGISTERS
            )));
        }
        self.cycle = state.cycle;
        self.sink.reset();
        // The device only knows what it is told
        for (addr, &val) in state.regs.iter().enumerate() {
            self.write_register(addr as u16, val);
        }
        Ok(())
    }
}
