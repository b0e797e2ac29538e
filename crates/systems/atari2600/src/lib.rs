//! Atari 2600 sound subsystem

mod bus;

pub use bus::Atari2600SoundBus;

use serde_json::Value;
use sound_core::apu::{ChipSynthesizer, FramePacer, MachineTiming, TimingMode};
use sound_core::config::SoundConfig;
use sound_core::logging::{log, LogCategory, LogLevel};
use sound_core::types::AudioFrame;
use sound_core::{check_state_header, AudioMachine, SoundError, STATE_VERSION};
use thiserror::Error;

const SYSTEM_NAME: &str = "atari2600";

#[derive(Debug, Error)]
pub enum Atari2600SoundError {
    #[error("Sound error: {0}")]
    Sound(#[from] SoundError),
    #[error("Save state has {found} output channel(s), machine has {expected}")]
    ChannelMismatch { expected: usize, found: usize },
}

/// Atari 2600 TIA sound
pub struct Atari2600Sound {
    bus: Atari2600SoundBus,
    mode: TimingMode,
    timing: MachineTiming,
    pacer: FramePacer,
    sample_rate: u32,
    channels: usize,
}

impl Atari2600Sound {
    pub fn new(config: &SoundConfig) -> Result<Self, Atari2600SoundError> {
        config.validate()?;
        let timing = MachineTiming::atari2600(config.timing);
        let mut synth = ChipSynthesizer::new(config.tia.open_chip(), config.queue());
        synth.configure(config.sample_rate, timing.clock_hz)?;

        log(LogCategory::Config, LogLevel::Info, || {
            format!(
                "Atari 2600: {:?}, {} Hz, {} channel(s)",
                config.timing, config.sample_rate, config.tia.channels
            )
        });

        Ok(Self {
            bus: Atari2600SoundBus::new(synth),
            mode: config.timing,
            timing,
            pacer: FramePacer::new(timing, config.sample_rate),
            sample_rate: config.sample_rate,
            channels: config.tia.channels,
        })
    }

    pub fn timing_mode(&self) -> TimingMode {
        self.mode
    }

    pub fn bus(&self) -> &Atari2600SoundBus {
        &self.bus
    }

    /// Change the TIA volume; applies to volume registers written afterwards
    pub fn set_volume(&mut self, percent: u8) {
        self.bus.synth.chip_mut().set_volume(percent);
    }
}

impl AudioMachine for Atari2600Sound {
    type Error = Atari2600SoundError;

    fn reset(&mut self) {
        self.bus.synth.reset();
        self.pacer = FramePacer::new(self.timing, self.sample_rate);
    }

    fn system_name(&self) -> &'static str {
        SYSTEM_NAME
    }

    fn cycles_per_frame(&self) -> u32 {
        self.timing.cycles_per_frame
    }

    fn bus_write(&mut self, addr: u16, val: u8, cycle: i64) -> bool {
        self.bus.write(addr, val, cycle)
    }

    fn bus_read(&mut self, addr: u16, cycle: i64) -> Option<u8> {
        self.bus.read(addr, cycle)
    }

    fn step_frame(&mut self) -> Result<AudioFrame, Self::Error> {
        self.bus
            .synth
            .adjust_cycle_counter(-(self.timing.cycles_per_frame as i64));
        let mut frame = AudioFrame::new(self.sample_rate, self.channels, self.pacer.next_frame());
        self.bus.synth.render_samples(&mut frame.samples);
        Ok(frame)
    }

    fn save_state(&self) -> Value {
        serde_json::json!({
            "version": STATE_VERSION,
            "system": SYSTEM_NAME,
            "timing": self.mode,
            "channels": self.channels,
            "pacer": self.pacer,
            "synth": self.bus.synth.save_state(),
        })
    }

    fn load_state(&mut self, v: &Value) -> Result<(), Self::Error> {
        check_state_header(v, SYSTEM_NAME)?;

        let found = v["channels"].as_u64().unwrap_or(0) as usize;
        if found != self.channels {
            return Err(Atari2600SoundError::ChannelMismatch {
                expected: self.channels,
                found,
            });
        }
        let mode: TimingMode = serde_json::from_value(v["timing"].clone()).map_err(SoundError::from)?;
        if mode != self.mode {
            return Err(SoundError::StateMismatch {
                expected: format!("{:?}", self.mode),
                found: format!("{:?}", mode),
            }
            .into());
        }

        let pacer: FramePacer = serde_json::from_value(v["pacer"].clone()).map_err(SoundError::from)?;
        self.bus.synth.load_state(&v["synth"])?;
        self.pacer = pacer;
        Ok(())
    }

    fn supports_save_states(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ntsc(channels: usize) -> Atari2600Sound {
        let mut config = SoundConfig::default();
        config.timing = TimingMode::Ntsc;
        config.sample_rate = 31_400;
        config.tia.channels = channels;
        Atari2600Sound::new(&config).unwrap()
    }

    #[test]
    fn test_system_creation() {
        let sys = ntsc(1);
        assert_eq!(sys.system_name(), "atari2600");
        assert_eq!(sys.cycles_per_frame(), 19_912);
        assert_eq!(sys.timing_mode(), TimingMode::Ntsc);
    }

    #[test]
    fn test_invalid_channel_count_rejected() {
        let mut config = SoundConfig::default();
        config.tia.channels = 4;
        assert!(matches!(
            Atari2600Sound::new(&config),
            Err(Atari2600SoundError::Sound(SoundError::InvalidConfig(_)))
        ));
    }

    #[test]
    fn test_frame_sample_count() {
        let mut sys = ntsc(1);
        // 31400 Hz over 59.92 fps
        let total: usize = (0..60).map(|_| sys.step_frame().unwrap().frames()).sum();
        let exact = 60.0 * 31_400.0 * 19_912.0 / 1_193_191.666_666_67;
        assert!((total as f64 - exact).abs() < 1.0);
    }

    #[test]
    fn test_constant_volume_through_bus() {
        let mut sys = ntsc(1);
        // AUDC0 = 0 (set to 1), AUDV0 = 15, via a page 1 mirror
        assert!(sys.bus_write(0x0015, 0x00, 0));
        assert!(sys.bus_write(0x0119, 0x0f, 0));
        assert!(!sys.bus_write(0x0080, 0x0f, 0));
        let frame = sys.step_frame().unwrap();
        assert!(frame.samples.iter().all(|&s| s == 15 << 10));
    }

    #[test]
    fn test_stereo_frames() {
        let mut sys = ntsc(2);
        sys.bus_write(0x001A, 0x08, 0);
        let frame = sys.step_frame().unwrap();
        assert_eq!(frame.channels, 2);
        assert!(frame.samples.chunks_exact(2).all(|f| f == [0, 8 << 10]));
    }

    #[test]
    fn test_volume_setting_scales() {
        let mut sys = ntsc(1);
        sys.set_volume(50);
        sys.bus_write(0x0019, 0x08, 0);
        let frame = sys.step_frame().unwrap();
        assert_eq!(frame.samples[0], 4 << 10);
    }

    #[test]
    fn test_save_load_state() {
        let mut sys = ntsc(1);
        assert!(sys.supports_save_states());
        sys.bus_write(0x0019, 0x0f, 5_000);
        let state = sys.save_state();
        assert_eq!(state["version"], 1);
        assert_eq!(state["system"], "atari2600");

        let mut sys2 = ntsc(1);
        sys2.load_state(&state).unwrap();
        assert_eq!(sys.step_frame().unwrap().samples, sys2.step_frame().unwrap().samples);
    }

    #[test]
    fn test_load_state_rejects_mismatch() {
        let state = ntsc(2).save_state();
        assert!(matches!(
            ntsc(1).load_state(&state),
            Err(Atari2600SoundError::ChannelMismatch { expected: 1, found: 2 })
        ));
        let mut bad = ntsc(1).save_state();
        bad["version"] = 7.into();
        assert!(matches!(
            ntsc(1).load_state(&bad),
            Err(Atari2600SoundError::Sound(SoundError::StateVersion { found: 7, .. }))
        ));
    }

    #[test]
    fn test_corrupt_state_leaves_machine_running() {
        let mut sys = ntsc(1);
        sys.bus_write(0x0019, 0x0f, 100);
        let good = sys.save_state();

        let mut bad = good.clone();
        bad["synth"]["chip"]["channels"][0]["p9"] = 4_096.into();
        assert!(sys.load_state(&bad).is_err());

        let mut bad = good;
        bad["synth"]["queue"]["slots"] = serde_json::json!([]);
        assert!(sys.load_state(&bad).is_err());

        let frame = sys.step_frame().unwrap();
        assert_eq!(frame.samples.last(), Some(&(15 << 10)));
    }
}
