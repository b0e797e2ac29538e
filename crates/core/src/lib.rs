//! Core sound primitives and traits.

pub mod apu;
pub mod config;
pub mod logging;

pub mod types {
    use serde::{Deserialize, Serialize};

    pub type AudioSample = i16;

    /// One video frame worth of interleaved PCM.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct AudioFrame {
        pub sample_rate: u32,
        pub channels: usize,
        pub samples: Vec<AudioSample>,
    }

    impl AudioFrame {
        pub fn new(sample_rate: u32, channels: usize, frames: usize) -> Self {
            Self {
                sample_rate,
                channels,
                samples: vec![0; frames * channels],
            }
        }

        /// Number of sample frames (one sample per channel each)
        pub fn frames(&self) -> usize {
            if self.channels == 0 {
                0
            } else {
                self.samples.len() / self.channels
            }
        }
    }
}

use serde_json::Value;
use thiserror::Error;

/// Errors raised by sound configuration and save states.
#[derive(Debug, Error)]
pub enum SoundError {
    #[error("invalid sample rate: {0} Hz")]
    InvalidSampleRate(u32),

    #[error("invalid clock rate: {0} Hz")]
    InvalidClockRate(f64),

    #[error("unsupported output channel count: {0}")]
    UnsupportedChannels(usize),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unsupported save state version {found} (expected {expected})")]
    StateVersion { found: u64, expected: u64 },

    #[error("save state is for '{found}', not '{expected}'")]
    StateMismatch { expected: String, found: String },

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SoundError>;

/// Version tag written into every machine save state
pub const STATE_VERSION: u64 = 1;

/// Check the `version` and `system` tags of a machine save state.
pub fn check_state_header(v: &Value, system: &str) -> Result<()> {
    let found = v.get("version").and_then(Value::as_u64).unwrap_or(0);
    if found != STATE_VERSION {
        return Err(SoundError::StateVersion {
            found,
            expected: STATE_VERSION,
        });
    }
    let name = v.get("system").and_then(Value::as_str).unwrap_or("");
    if name != system {
        return Err(SoundError::StateMismatch {
            expected: system.to_string(),
            found: name.to_string(),
        });
    }
    Ok(())
}

/// A machine's sound subsystem, driven by its CPU.
///
/// The CPU reports bus accesses with its per-frame cycle counter; the
/// frontend calls [`AudioMachine::step_frame`] once per video frame.
pub trait AudioMachine {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Reset to initial power-on state
    fn reset(&mut self);

    /// Short machine identifier, also stored in save states
    fn system_name(&self) -> &'static str;

    /// CPU cycles per video frame
    fn cycles_per_frame(&self) -> u32;

    /// CPU write to a sound register address on the machine's bus.
    /// Returns false if the address does not belong to a sound chip.
    fn bus_write(&mut self, addr: u16, val: u8, cycle: i64) -> bool;

    /// CPU read from the machine's bus, `None` outside the sound chips.
    fn bus_read(&mut self, addr: u16, cycle: i64) -> Option<u8>;

    /// Close the current frame: rebase the cycle counter and render the
    /// frame's samples.
    fn step_frame(&mut self) -> std::result::Result<types::AudioFrame, Self::Error>;

    /// Return a JSON-serializable save state.
    fn save_state(&self) -> Value;

    /// Load a JSON save state produced by [`AudioMachine::save_state`].
    fn load_state(&mut self, v: &Value) -> std::result::Result<(), Self::Error>;

    /// Check if this machine supports save/load state functionality
    fn supports_save_states(&self) -> bool {
        false
    }
}
