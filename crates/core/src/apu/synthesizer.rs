//! Register-write replay in front of an [`AudioChip`].
//!
//! The CPU side calls [`ChipSynthesizer::set_register`] with its cycle
//! counter. Each write is queued with the time elapsed since the previous
//! write, converted to seconds. Once per video frame the audio side calls
//! [`ChipSynthesizer::render_samples`], which generates samples up to each
//! write's offset in the buffer, applies it, and continues until the buffer
//! is full. Writes that fall beyond the buffer stay queued with their delta
//! reduced by the buffer's duration.
//!
//! The machine must call [`ChipSynthesizer::adjust_cycle_counter`] with the
//! negated frame length at the end of every frame, before rendering, so the
//! cycle baseline follows its own per-frame counter.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::write_queue::{RegisterWrite, RegisterWriteQueue};
use super::AudioChip;
use crate::logging::{log, LogCategory, LogLevel};
use crate::{Result, SoundError};

#[derive(Serialize, Deserialize)]
struct SynthState {
    sample_rate: u32,
    clock_hz: f64,
    last_write_cycle: i64,
    queue: RegisterWriteQueue,
    chip: Value,
}

pub struct ChipSynthesizer<C: AudioChip> {
    chip: C,
    queue: RegisterWriteQueue,
    /// Zero while unconfigured; the synthesizer then renders silence
    sample_rate: u32,
    clock_hz: f64,
    /// CPU cycle of the previous write, the baseline for the next delta
    last_write_cycle: i64,
}

impl<C: AudioChip> ChipSynthesizer<C> {
    pub fn new(chip: C, queue: RegisterWriteQueue) -> Self {
        Self {
            chip,
            queue,
            sample_rate: 0,
            clock_hz: 0.0,
            last_write_cycle: 0,
        }
    }

    /// Set output rate and CPU clock and initialize the chip.
    ///
    /// On error the synthesizer stays inert until configured again.
    pub fn configure(&mut self, sample_rate: u32, clock_hz: f64) -> Result<()> {
        self.sample_rate = 0;
        if sample_rate == 0 {
            return Err(SoundError::InvalidSampleRate(sample_rate));
        }
        if !(clock_hz.is_finite() && clock_hz > 0.0) {
            return Err(SoundError::InvalidClockRate(clock_hz));
        }
        self.chip.init(sample_rate, clock_hz)?;
        self.sample_rate = sample_rate;
        self.clock_hz = clock_hz;
        log(LogCategory::Synth, LogLevel::Info, || {
            format!(
                "Synth: {} at {} Hz, clock {:.2} Hz, {} channel(s)",
                self.chip.name(),
                sample_rate,
                clock_hz,
                self.chip.channels()
            )
        });
        Ok(())
    }

    pub fn is_configured(&self) -> bool {
        self.sample_rate > 0
    }

    /// Change the output rate. Call between frames only.
    pub fn set_output_rate(&mut self, sample_rate: u32) -> Result<()> {
        self.configure(sample_rate, self.clock_hz)
    }

    /// Change the CPU clock. Call between frames only.
    pub fn set_clock_rate(&mut self, clock_hz: f64) -> Result<()> {
        let sample_rate = self.sample_rate;
        self.configure(sample_rate, clock_hz)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn clock_hz(&self) -> f64 {
        self.clock_hz
    }

    pub fn last_write_cycle(&self) -> i64 {
        self.last_write_cycle
    }

    pub fn chip(&self) -> &C {
        &self.chip
    }

    pub fn chip_mut(&mut self) -> &mut C {
        &mut self.chip
    }

    pub fn queue(&self) -> &RegisterWriteQueue {
        &self.queue
    }

    /// Output channels per sample frame
    pub fn channels(&self) -> usize {
        self.chip.channels().max(1)
    }

    /// Queue a register write made by the CPU at `cycle`.
    pub fn set_register(&mut self, addr: u16, val: u8, cycle: i64) {
        if !self.is_configured() {
            // No time base yet; keep the register file current
            self.chip.write_register(addr, val);
            return;
        }
        let delta = ((cycle - self.last_write_cycle) as f64 / self.clock_hz).max(0.0);
        self.chip.bus_write(addr, val, cycle);
        self.queue.enqueue(RegisterWrite::new(addr, val, delta));
        self.last_write_cycle = cycle;

        log(LogCategory::Synth, LogLevel::Trace, || {
            format!("Synth: ${:02X} = ${:02X} at cycle {} (+{:.6}s)", addr, val, cycle, delta)
        });
    }

    /// Read a register as the CPU sees it at `cycle`.
    pub fn read_register(&mut self, addr: u16, cycle: i64) -> u8 {
        let sample_fraction = if self.is_configured() {
            let elapsed = (cycle - self.last_write_cycle) as f64 / self.clock_hz;
            ((self.queue.total_pending_duration() + elapsed) * self.sample_rate as f64).fract()
        } else {
            0.0
        };
        self.chip.read_register(addr, cycle, sample_fraction)
    }

    /// Fill `buffer` with sample frames, replaying queued writes at their
    /// offsets. Always writes the whole buffer.
    pub fn render_samples(&mut self, buffer: &mut [i16]) {
        if !self.is_configured() {
            buffer.fill(0);
            return;
        }
        let channels = self.channels();
        let frames = buffer.len() / channels;
        debug_assert_eq!(buffer.len() % channels, 0, "partial sample frame");
        buffer[frames * channels..].fill(0);

        let rate = self.sample_rate as f64;

        // Apply writes that are too old to be placed in this buffer. A write
        // whose time reaches past the excess straddles the buffer and stays.
        let mut excess = self.queue.total_pending_duration() - frames as f64 / rate;
        let mut skipped = 0;
        while excess > 0.0 {
            match self.queue.front() {
                Some(write) if write.delta <= excess => {}
                _ => break,
            }
            let Some(write) = self.queue.dequeue_front() else {
                break;
            };
            self.chip.write_register(write.address, write.value);
            excess -= write.delta;
            skipped += 1;
        }
        if skipped > 0 {
            log(LogCategory::Synth, LogLevel::Debug, || {
                format!("Synth: backlog, applied {} write(s) without rendering", skipped)
            });
        }

        let mut position = 0.0f64;
        let mut remaining = frames as f64;
        let mut rendered = 0usize;
        loop {
            if self.queue.is_empty() {
                self.render_frames(buffer, rendered, frames - rendered);
                // The true elapsed time keeps accruing; the next delta is
                // measured from zero regardless
                self.last_write_cycle = 0;
                break;
            }
            let Some(&write) = self.queue.front() else {
                break;
            };

            let samples = write.delta * rate;
            if samples <= remaining {
                let count = ((position + samples).floor() - position.floor()) as usize;
                let count = count.min(frames - rendered);
                self.render_frames(buffer, rendered, count);
                rendered += count;

                self.chip.write_register(write.address, write.value);
                self.queue.dequeue_front();
                position += samples;
                remaining -= samples;
            } else {
                self.render_frames(buffer, rendered, frames - rendered);
                if let Some(front) = self.queue.front_mut() {
                    front.delta -= remaining / rate;
                }
                break;
            }
        }
    }

    fn render_frames(&mut self, buffer: &mut [i16], start: usize, count: usize) {
        if count == 0 {
            return;
        }
        let channels = self.channels();
        self.chip.render(&mut buffer[start * channels..(start + count) * channels]);
    }

    /// Shift the cycle baseline, typically by minus the frame length at the
    /// end of each frame.
    pub fn adjust_cycle_counter(&mut self, amount: i64) {
        self.last_write_cycle += amount;
        self.chip.adjust_cycle_counter(amount);
    }

    /// Machine reset: chip to power-on state, pending writes discarded.
    pub fn reset(&mut self) {
        self.chip.reset();
        self.queue.clear();
        self.last_write_cycle = 0;
    }

    pub fn save_state(&self) -> Value {
        let state = SynthState {
            sample_rate: self.sample_rate,
            clock_hz: self.clock_hz,
            last_write_cycle: self.last_write_cycle,
            queue: self.queue.clone(),
            chip: self.chip.save_state(),
        };
        serde_json::to_value(state).unwrap_or(Value::Null)
    }

    pub fn load_state(&mut self, v: &Value) -> Result<()> {
        let state: SynthState = serde_json::from_value(v.clone())?;
        if state.sample_rate > 0 && !(state.clock_hz.is_finite() && state.clock_hz > 0.0) {
            return Err(SoundError::InvalidClockRate(state.clock_hz));
        }
        self.chip.load_state(&state.chip)?;
        self.sample_rate = state.sample_rate;
        self.clock_hz = state.clock_hz;
        self.last_write_cycle = state.last_write_cycle;
        self.queue = state.queue;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apu::sid::fast::envelope::ENVELOPE_MAX;
    use crate::apu::sid::fast::FastSid;
    use crate::apu::sid::{AdsrState, ChipModel};
    use crate::apu::tia::{TiaSound, AUDC0, AUDV0, AUDV1};
    use serde_json::json;

    const PAL_CLOCK: f64 = 985_248.0;

    /// Records where in the sample stream each write lands
    #[derive(Default)]
    struct Probe {
        channels: usize,
        rendered: usize,
        writes: Vec<(u16, u8, usize)>,
        bus: Vec<(u16, u8, i64)>,
        last_fraction: f64,
        adjusted: i64,
    }

    impl AudioChip for Probe {
        fn name(&self) -> &'static str {
            "probe"
        }

        fn init(&mut self, _sample_rate: u32, _clock_hz: f64) -> Result<()> {
            Ok(())
        }

        fn reset(&mut self) {
            self.writes.clear();
        }

        fn write_register(&mut self, addr: u16, val: u8) {
            self.writes.push((addr, val, self.rendered));
        }

        fn bus_write(&mut self, addr: u16, val: u8, cycle: i64) {
            self.bus.push((addr, val, cycle));
        }

        fn read_register(&mut self, _addr: u16, _cycle: i64, sample_fraction: f64) -> u8 {
            self.last_fraction = sample_fraction;
            0xab
        }

        fn render(&mut self, out: &mut [i16]) {
            for frame in out.chunks_mut(self.channels()) {
                frame.fill(self.rendered as i16);
                self.rendered += 1;
            }
        }

        fn channels(&self) -> usize {
            self.channels.max(1)
        }

        fn adjust_cycle_counter(&mut self, amount: i64) {
            self.adjusted += amount;
        }

        fn save_state(&self) -> Value {
            json!({ "rendered": self.rendered })
        }

        fn load_state(&mut self, v: &Value) -> Result<()> {
            self.rendered = v["rendered"].as_u64().unwrap_or(0) as usize;
            Ok(())
        }
    }

    const PROBE_RATE: u32 = 1024;
    const PROBE_CLOCK: f64 = 1_048_576.0;
    /// CPU cycles per output sample; keeps every delta exact in binary
    const SAMPLE: i64 = 1024;

    fn probe_synth() -> ChipSynthesizer<Probe> {
        let mut synth = ChipSynthesizer::new(Probe::default(), RegisterWriteQueue::new(64));
        synth.configure(PROBE_RATE, PROBE_CLOCK).unwrap();
        synth
    }

    #[test]
    fn test_unconfigured_renders_silence() {
        let mut synth = ChipSynthesizer::new(Probe::default(), RegisterWriteQueue::new(8));
        let mut buf = [9i16; 16];
        synth.render_samples(&mut buf);
        assert!(buf.iter().all(|&s| s == 0));
        assert_eq!(synth.chip().rendered, 0);

        // Writes still reach the chip, untimed
        synth.set_register(1, 2, 500);
        assert_eq!(synth.chip().writes, vec![(1, 2, 0)]);
        assert!(synth.queue().is_empty());
    }

    #[test]
    fn test_configure_errors_leave_synth_inert() {
        let mut synth = probe_synth();
        assert!(matches!(synth.configure(0, 1.0e6), Err(SoundError::InvalidSampleRate(0))));
        assert!(!synth.is_configured());
        assert!(synth.configure(44_100, 0.0).is_err());
        assert!(synth.configure(44_100, f64::NAN).is_err());
        assert!(!synth.is_configured());
        synth.configure(44_100, 1.0e6).unwrap();
        assert!(synth.is_configured());
    }

    #[test]
    fn test_exact_sample_count() {
        for writes in [0usize, 1, 5, 40] {
            let mut synth = probe_synth();
            for i in 0..writes {
                synth.set_register(0, i as u8, (i * 1700) as i64);
            }
            let mut buf = vec![-1i16; 100];
            synth.render_samples(&mut buf);
            assert_eq!(synth.chip().rendered, 100, "{} writes", writes);
            assert_eq!(buf[99], 99);
        }
    }

    #[test]
    fn test_writes_land_at_sample_offsets() {
        let mut synth = probe_synth();
        synth.set_register(0x10, 1, 5 * SAMPLE / 2);
        synth.set_register(0x11, 2, 7 * SAMPLE);
        synth.set_register(0x12, 3, 7 * SAMPLE);
        let mut buf = vec![0i16; 20];
        synth.render_samples(&mut buf);

        // 2.5 samples, then 7.0 (floor(7.0) - floor(2.5) = 5 more), then 0
        assert_eq!(synth.chip().writes, vec![(0x10, 1, 2), (0x11, 2, 7), (0x12, 3, 7)]);
        assert_eq!(synth.chip().rendered, 20);
    }

    #[test]
    fn test_write_beyond_buffer_carries_over() {
        let mut synth = probe_synth();
        // 1.5 buffers of 10 samples away
        synth.set_register(0x04, 0x11, 15 * SAMPLE);
        let mut buf = vec![0i16; 10];

        synth.render_samples(&mut buf);
        assert!(synth.chip().writes.is_empty());
        let carried = synth.queue().front().map(|w| w.delta).unwrap_or(0.0);
        assert_eq!(carried, 5.0 / PROBE_RATE as f64);

        synth.render_samples(&mut buf);
        assert_eq!(synth.chip().writes, vec![(0x04, 0x11, 15)]);
        assert!(synth.queue().is_empty());
    }

    #[test]
    fn test_backlog_applies_old_writes_immediately() {
        let mut synth = probe_synth();
        // Three buffers worth of writes, one per 10 samples
        for i in 1..=3 {
            synth.set_register(0x20, i, i as i64 * 10 * SAMPLE);
        }
        let mut buf = vec![0i16; 10];
        synth.render_samples(&mut buf);

        // Two writes skipped ahead before rendering, the last one placed
        let writes = &synth.chip().writes;
        assert_eq!(writes[0], (0x20, 1, 0));
        assert_eq!(writes[1], (0x20, 2, 0));
        assert_eq!(writes[2], (0x20, 3, 10));
        assert_eq!(synth.chip().rendered, 10);
    }

    #[test]
    fn test_backlog_keeps_write_straddling_buffer_end() {
        let mut synth = probe_synth();
        synth.set_register(0x30, 1, 15 * SAMPLE);
        synth.set_register(0x30, 2, 30 * SAMPLE);
        let mut buf = vec![0i16; 10];

        // 30 samples pending: the first write is stale, the second is not
        synth.render_samples(&mut buf);
        assert_eq!(synth.chip().writes, vec![(0x30, 1, 0)]);
        assert_eq!(synth.queue().len(), 1);
        let carried = synth.queue().front().map(|w| w.delta).unwrap_or(0.0);
        assert_eq!(carried, 5.0 / PROBE_RATE as f64);

        synth.render_samples(&mut buf);
        assert_eq!(synth.chip().writes[1], (0x30, 2, 15));
    }

    #[test]
    fn test_single_far_write_survives_first_buffer() {
        let mut synth = ChipSynthesizer::new(FastSid::new(ChipModel::Mos6581, true), RegisterWriteQueue::default());
        synth.configure(44_100, PAL_CLOCK).unwrap();
        // About 1.5 buffers of 441 samples away
        synth.set_register(0x18, 0x0f, 14_779);
        let delta = 14_779.0 / PAL_CLOCK;

        let mut buf = vec![0i16; 441];
        synth.render_samples(&mut buf);
        assert_eq!(synth.queue().len(), 1);
        let carried = synth.queue().front().map(|w| w.delta).unwrap_or(0.0);
        assert!((carried - (delta - 441.0 / 44_100.0)).abs() < 1e-12);

        synth.render_samples(&mut buf);
        assert!(synth.queue().is_empty());
    }

    #[test]
    fn test_empty_queue_resets_cycle_baseline() {
        let mut synth = probe_synth();
        synth.set_register(0, 0, 5_000);
        assert_eq!(synth.last_write_cycle(), 5_000);
        let mut buf = vec![0i16; 10];
        synth.render_samples(&mut buf);
        assert_eq!(synth.last_write_cycle(), 0);

        // Next delta is measured from zero
        synth.set_register(0, 1, 3 * SAMPLE);
        let delta = synth.queue().front().map(|w| w.delta).unwrap_or(0.0);
        assert_eq!(delta, 3.0 / PROBE_RATE as f64);
    }

    #[test]
    fn test_negative_elapsed_clamps_to_zero() {
        let mut synth = probe_synth();
        synth.set_register(0, 0, 5_000);
        synth.set_register(0, 1, 4_000);
        let deltas: Vec<f64> = synth.queue().iter().map(|w| w.delta).collect();
        assert_eq!(deltas, vec![5_000.0 / PROBE_CLOCK, 0.0]);
    }

    #[test]
    fn test_adjust_cycle_counter_rebases() {
        let mut synth = probe_synth();
        synth.set_register(0, 0, 19_000);
        synth.adjust_cycle_counter(-19_656);
        assert_eq!(synth.last_write_cycle(), -656);
        assert_eq!(synth.chip().adjusted, -19_656);

        synth.set_register(0, 1, 368);
        let last = synth.queue().iter().last().map(|w| w.delta).unwrap_or(0.0);
        assert_eq!(last, SAMPLE as f64 / PROBE_CLOCK);
    }

    #[test]
    fn test_bus_write_sees_cpu_cycle() {
        let mut synth = probe_synth();
        synth.set_register(0x05, 0x9a, 1234);
        assert_eq!(synth.chip().bus, vec![(0x05, 0x9a, 1234)]);
        assert!(synth.chip().writes.is_empty());
    }

    #[test]
    fn test_read_passes_sample_fraction() {
        let mut synth = probe_synth();
        synth.set_register(0, 0, 2 * SAMPLE);
        // 2 samples pending plus a quarter sample elapsed since the write
        assert_eq!(synth.read_register(0x1b, 2 * SAMPLE + SAMPLE / 4), 0xab);
        assert_eq!(synth.chip().last_fraction, 0.25);
    }

    #[test]
    fn test_stereo_frames_interleave() {
        let mut synth = ChipSynthesizer::new(
            Probe {
                channels: 2,
                ..Default::default()
            },
            RegisterWriteQueue::new(8),
        );
        synth.configure(PROBE_RATE, PROBE_CLOCK).unwrap();
        synth.set_register(0, 0, 3 * SAMPLE);
        let mut buf = vec![-1i16; 20];
        synth.render_samples(&mut buf);
        assert_eq!(synth.chip().rendered, 10);
        assert_eq!(synth.chip().writes, vec![(0, 0, 3)]);
        assert_eq!(&buf[6..8], &[3, 3]);
    }

    #[test]
    fn test_reset_discards_pending_writes() {
        let mut synth = probe_synth();
        synth.set_register(0, 0, 50_000);
        synth.reset();
        assert!(synth.queue().is_empty());
        assert_eq!(synth.last_write_cycle(), 0);
    }

    #[test]
    fn test_gate_scenario_attack_rises_until_saturation() {
        let mut synth = ChipSynthesizer::new(FastSid::new(ChipModel::Mos6581, true), RegisterWriteQueue::default());
        synth.configure(44_100, PAL_CLOCK).unwrap();
        synth.set_register(0x00, 0x50, 0);
        synth.set_register(0x04, 0x11, 0);

        let step = 22_876_000u32;
        let mut sample = [0i16; 1];
        for n in 1..=4410u32 {
            synth.render_samples(&mut sample);
            // Master volume is zero
            assert_eq!(sample[0], 0);
            let (state, level) = synth.chip().envelope(0);
            if n < 94 {
                assert_eq!(state, AdsrState::Attack);
                assert_eq!(level, step * n);
            } else if n == 94 {
                assert_eq!(level, ENVELOPE_MAX);
                assert_eq!(state, AdsrState::Decay);
            }
        }
    }

    #[test]
    fn test_tia_writes_follow_frame_offsets() {
        let mut synth = ChipSynthesizer::new(TiaSound::new(2, 100), RegisterWriteQueue::default());
        synth.configure(31_400, 1_193_191.666_666_67).unwrap();
        synth.set_register(AUDC0, 0x00, 0);
        synth.set_register(AUDV1, 0x0f, 0);
        // Half a second in, channel 0 comes up
        synth.set_register(AUDV0, 0x08, 596_596);
        let mut buf = vec![0i16; 2 * 31_400];
        synth.render_samples(&mut buf);

        assert_eq!(&buf[0..2], &[0, 15 << 10]);
        assert_eq!(&buf[2 * 15_600..2 * 15_600 + 2], &[0, 15 << 10]);
        assert_eq!(&buf[2 * 15_800..2 * 15_800 + 2], &[8 << 10, 15 << 10]);
    }

    #[test]
    fn test_corrupt_state_is_rejected() {
        let mut synth = probe_synth();
        synth.set_register(0x01, 0x02, 3 * SAMPLE);
        let good = synth.save_state();

        let mut empty_slots = good.clone();
        empty_slots["queue"]["slots"] = json!([]);
        empty_slots["queue"]["len"] = 1.into();
        assert!(matches!(synth.load_state(&empty_slots), Err(SoundError::Serde(_))));

        let mut bad_head = good.clone();
        bad_head["queue"]["head"] = 1_000.into();
        assert!(synth.load_state(&bad_head).is_err());

        let mut bad_clock = good;
        bad_clock["clock_hz"] = 0.0.into();
        assert!(matches!(synth.load_state(&bad_clock), Err(SoundError::InvalidClockRate(_))));

        // Still usable with the pending write intact
        let mut buf = vec![0i16; 10];
        synth.render_samples(&mut buf);
        assert_eq!(synth.chip().writes, vec![(0x01, 0x02, 3)]);
    }

    #[test]
    fn test_state_roundtrip_with_pending_writes() {
        let mut a = ChipSynthesizer::new(FastSid::new(ChipModel::Mos8580, true), RegisterWriteQueue::default());
        a.configure(44_100, PAL_CLOCK).unwrap();
        a.set_register(0x18, 0x0f, 0);
        a.set_register(0x01, 0x20, 10);
        a.set_register(0x06, 0xf0, 20);
        a.set_register(0x04, 0x21, 30_000);
        let mut buf = vec![0i16; 441];
        a.render_samples(&mut buf);
        assert_eq!(a.queue().len(), 1);

        let state = a.save_state();
        let mut b = ChipSynthesizer::new(FastSid::new(ChipModel::Mos6581, false), RegisterWriteQueue::default());
        b.load_state(&state).unwrap();
        assert_eq!(b.queue().len(), 1);

        let mut out_a = vec![0i16; 882];
        let mut out_b = vec![0i16; 882];
        a.render_samples(&mut out_a);
        b.render_samples(&mut out_b);
        assert_eq!(out_a, out_b);
    }
}
