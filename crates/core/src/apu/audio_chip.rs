//! Audio chip trait for pluggable sound engines.
//!
//! A [`ChipSynthesizer`](super::ChipSynthesizer) drives any engine through
//! this interface. Engines never see CPU timing of queued writes: the
//! synthesizer renders up to a write's position in the sample stream and then
//! calls [`AudioChip::write_register`]. Bus-side effects that depend on the
//! real CPU cycle (read-back of write-only registers) go through
//! [`AudioChip::bus_write`] and [`AudioChip::read_register`] instead.
//!
//! Implementations:
//! - `FastSid`: table-driven SID, one evaluation per output sample
//! - `CycleSid`: SID clocked every CPU cycle and resampled
//! - `PassthroughSid`: forwards writes to a hardware sink, renders silence
//! - `TiaSound`: Atari 2600 TIA audio

use serde_json::Value;

use crate::Result;

pub trait AudioChip {
    /// Short identifier used in logs and save states.
    fn name(&self) -> &'static str;

    /// Configure output rate and CPU clock, rebuilding every rate-dependent
    /// table. Register contents survive reconfiguration.
    fn init(&mut self, sample_rate: u32, clock_hz: f64) -> Result<()>;

    /// Reset the chip to power-on state
    fn reset(&mut self);

    /// Apply a register write to the sound state
    fn write_register(&mut self, addr: u16, val: u8);

    /// Observe a write at the moment the CPU performs it.
    ///
    /// Used for the data bus shadow of write-only registers, which must
    /// follow CPU time rather than the deferred sample stream.
    fn bus_write(&mut self, addr: u16, val: u8, cycle: i64) {
        let _ = (addr, val, cycle);
    }

    /// Read a register. `sample_fraction` is how far, in output samples,
    /// the read lies past the last rendered sample.
    fn read_register(&mut self, addr: u16, cycle: i64, sample_fraction: f64) -> u8 {
        let _ = (addr, cycle, sample_fraction);
        0
    }

    /// Fill `out` with interleaved sample frames (`out.len() / channels()`).
    fn render(&mut self, out: &mut [i16]);

    /// Interleaved output channels per sample frame
    fn channels(&self) -> usize {
        1
    }

    /// Shift every stored CPU cycle stamp by `amount` (negative when the
    /// machine rebases its cycle counter at the end of a frame).
    fn adjust_cycle_counter(&mut self, amount: i64) {
        let _ = amount;
    }

    /// Serialize the full chip state
    fn save_state(&self) -> Value;

    /// Restore state written by [`AudioChip::save_state`]. Derived tables
    /// are rebuilt from the restored configuration.
    fn load_state(&mut self, v: &Value) -> Result<()>;
}
