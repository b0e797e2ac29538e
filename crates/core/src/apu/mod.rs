//! Core sound components.
//!
//! This module turns timestamped register writes from an emulated CPU into
//! PCM samples. The pieces are reusable across machines:
//!
//! ## Pipeline
//!
//! - **RegisterWriteQueue**: bounded FIFO of writes with inter-write deltas
//! - **ChipSynthesizer**: replays queued writes at their sample offsets
//!   while rendering one frame of audio
//! - **AudioChip trait**: common interface for pluggable sound engines
//!
//! ## Audio Chips
//!
//! - **SID** (MOS 6581/8580): fast table-driven, cycle-exact and passthrough
//!   engines behind [`sid::SidEngine`]
//! - **TIA**: Atari 2600 two-channel polynomial sound
//!
//! ## Timing Support
//!
//! Machine clocks and frame lengths for NTSC and PAL variants, plus a frame
//! pacer that hands out whole sample counts without drifting.

pub mod audio_chip;
pub mod sid;
pub mod synthesizer;
pub mod tia;
pub mod timing;
pub mod write_queue;

pub use audio_chip::AudioChip;
pub use sid::{ChipModel, SidEngine, SidEngineKind};
pub use synthesizer::ChipSynthesizer;
pub use tia::TiaSound;
pub use timing::{FramePacer, MachineTiming, TimingMode};
pub use write_queue::{OverflowPolicy, RegisterWrite, RegisterWriteQueue};
