//! Commodore 64 sound subsystem

mod bus;

pub use bus::{C64SoundBus, SidSelect, SID_BASE, SID_END};

use serde_json::Value;
use sound_core::apu::{ChipSynthesizer, FramePacer, MachineTiming, SidEngine, TimingMode};
use sound_core::config::SoundConfig;
use sound_core::logging::{log, LogCategory, LogLevel};
use sound_core::types::AudioFrame;
use sound_core::{check_state_header, AudioMachine, SoundError, STATE_VERSION};
use thiserror::Error;

const SYSTEM_NAME: &str = "c64";

#[derive(Debug, Error)]
pub enum C64SoundError {
    #[error("Sound error: {0}")]
    Sound(#[from] SoundError),
    #[error("Invalid second SID address: ${0:04X}")]
    InvalidStereoBase(u16),
    #[error("Save state has {found} SID(s), machine has {expected}")]
    SidCountMismatch { expected: usize, found: usize },
}

/// C64 sound: one SID, optionally a second on the right channel
pub struct C64Sound {
    bus: C64SoundBus,
    mode: TimingMode,
    timing: MachineTiming,
    pacer: FramePacer,
    sample_rate: u32,
}

fn check_stereo_base(base: u16) -> Result<(), C64SoundError> {
    let aligned = base % 0x20 == 0;
    if !aligned || !(SID_BASE + 0x20..=0xDFE0).contains(&base) {
        return Err(C64SoundError::InvalidStereoBase(base));
    }
    Ok(())
}

impl C64Sound {
    /// Build from configuration with the configured SID engine(s)
    pub fn new(config: &SoundConfig) -> Result<Self, C64SoundError> {
        let left = config.sid.open_engine();
        let right = config.sid.stereo_base.map(|_| config.sid.open_engine());
        Self::with_engines(config, left, right)
    }

    /// Build with explicit engines, e.g. a passthrough engine with a device
    pub fn with_engines(
        config: &SoundConfig,
        left: SidEngine,
        right: Option<SidEngine>,
    ) -> Result<Self, C64SoundError> {
        config.validate()?;
        let stereo_base = match (&right, config.sid.stereo_base) {
            (Some(_), Some(base)) => {
                check_stereo_base(base)?;
                Some(base)
            }
            (Some(_), None) => return Err(C64SoundError::InvalidStereoBase(0)),
            (None, _) => None,
        };

        let timing = MachineTiming::c64(config.timing);
        let mut left = ChipSynthesizer::new(left, config.queue());
        left.configure(config.sample_rate, timing.clock_hz)?;
        let right = match right {
            Some(engine) => {
                let mut synth = ChipSynthesizer::new(engine, config.queue());
                synth.configure(config.sample_rate, timing.clock_hz)?;
                Some(synth)
            }
            None => None,
        };

        log(LogCategory::Config, LogLevel::Info, || {
            format!(
                "C64: {:?}, {} Hz, {} SID(s){}",
                config.timing,
                config.sample_rate,
                if right.is_some() { 2 } else { 1 },
                stereo_base
                    .map(|b| format!(", second at ${:04X}", b))
                    .unwrap_or_default()
            )
        });

        Ok(Self {
            bus: C64SoundBus::new(left, right, stereo_base),
            mode: config.timing,
            timing,
            pacer: FramePacer::new(timing, config.sample_rate),
            sample_rate: config.sample_rate,
        })
    }

    pub fn timing_mode(&self) -> TimingMode {
        self.mode
    }

    pub fn bus(&self) -> &C64SoundBus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut C64SoundBus {
        &mut self.bus
    }
}

impl AudioMachine for C64Sound {
    type Error = C64SoundError;

    fn reset(&mut self) {
        self.bus.reset();
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
            .adjust_cycle_counter(-(self.timing.cycles_per_frame as i64));
        let frames = self.pacer.next_frame();
        let mut frame = AudioFrame::new(self.sample_rate, self.bus.channels(), 0);
        self.bus.render(frames, &mut frame.samples);
        Ok(frame)
    }

    fn save_state(&self) -> Value {
        serde_json::json!({
            "version": STATE_VERSION,
            "system": SYSTEM_NAME,
            "timing": self.mode,
            "pacer": self.pacer,
            "left": self.bus.left.save_state(),
            "right": self.bus.right.as_ref().map(|r| r.save_state()),
        })
    }

    fn load_state(&mut self, v: &Value) -> Result<(), Self::Error> {
        check_state_header(v, SYSTEM_NAME)?;

        let has_right = v.get("right").map(|r| !r.is_null()).unwrap_or(false);
        let expected = self.bus.channels();
        let found = if has_right { 2 } else { 1 };
        if found != expected {
            return Err(C64SoundError::SidCountMismatch { expected, found });
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
        self.bus.left.load_state(&v["left"])?;
        if let Some(right) = self.bus.right.as_mut() {
            right.load_state(&v["right"])?;
        }
        self.pacer = pacer;
        Ok(())
    }

    fn supports_save_states(&self) -> bool {
        true
    }
}
