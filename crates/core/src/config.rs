//! Sound configuration, stored as JSON.
//!
//! Every field has a default, so a partial file (or `{}`) is valid.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::apu::sid::fast::FastSid;
use crate::apu::sid::{ChipModel, FastWaveforms, SidEngine, SidEngineKind};
use crate::apu::tia::TiaSound;
use crate::apu::write_queue::{OverflowPolicy, RegisterWriteQueue, DEFAULT_CAPACITY};
use crate::apu::TimingMode;
use crate::logging::{log, LogCategory, LogLevel};
use crate::{Result, SoundError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SidConfig {
    pub engine: SidEngineKind,
    pub model: ChipModel,
    pub filters: bool,
    /// Fast engine only
    pub waveforms: FastWaveforms,
    /// Base address of a second SID (e.g. $D420 or $DE00), played on the
    /// right channel
    pub stereo_base: Option<u16>,
}

impl Default for SidConfig {
    fn default() -> Self {
        Self {
            engine: SidEngineKind::Fast,
            model: ChipModel::Mos6581,
            filters: true,
            waveforms: FastWaveforms::Table,
            stereo_base: None,
        }
    }
}

impl SidConfig {
    /// Build the configured engine.
    pub fn open_engine(&self) -> SidEngine {
        match self.engine {
            SidEngineKind::Fast => SidEngine::Fast(Box::new(
                FastSid::new(self.model, self.filters).with_waveforms(self.waveforms),
            )),
            kind => SidEngine::open(kind, self.model, self.filters),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TiaConfig {
    /// 1 for a mono mix, 2 for one channel per side
    pub channels: usize,
    pub volume_percent: u8,
}

impl Default for TiaConfig {
    fn default() -> Self {
        Self {
            channels: 1,
            volume_percent: 100,
        }
    }
}

impl TiaConfig {
    pub fn open_chip(&self) -> TiaSound {
        TiaSound::new(self.channels, self.volume_percent)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoundConfig {
    pub sample_rate: u32,
    pub timing: TimingMode,
    pub queue_capacity: usize,
    pub overflow: OverflowPolicy,
    pub sid: SidConfig,
    pub tia: TiaConfig,
}

impl Default for SoundConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            timing: TimingMode::Pal,
            queue_capacity: DEFAULT_CAPACITY,
            overflow: OverflowPolicy::Drop,
            sid: SidConfig::default(),
            tia: TiaConfig::default(),
        }
    }
}

impl SoundConfig {
    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config = Self::from_json_str(&contents)?;
        log(LogCategory::Config, LogLevel::Info, || {
            format!("Config: loaded {}", path.display())
        });
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(SoundError::InvalidConfig("sample_rate must be positive".to_string()));
        }
        if self.queue_capacity == 0 {
            return Err(SoundError::InvalidConfig("queue_capacity must be positive".to_string()));
        }
        if let OverflowPolicy::Grow { max_capacity } = self.overflow {
            if max_capacity < self.queue_capacity {
                return Err(SoundError::InvalidConfig(format!(
                    "overflow max_capacity {} is below queue_capacity {}",
                    max_capacity, self.queue_capacity
                )));
            }
        }
        if !(1..=2).contains(&self.tia.channels) {
            return Err(SoundError::InvalidConfig(format!(
                "tia channels must be 1 or 2, got {}",
                self.tia.channels
            )));
        }
        if self.tia.volume_percent > 100 {
            return Err(SoundError::InvalidConfig(format!(
                "tia volume_percent must be 0..=100, got {}",
                self.tia.volume_percent
            )));
        }
        Ok(())
    }

    /// An empty write queue sized and policed as configured
    pub fn queue(&self) -> RegisterWriteQueue {
        RegisterWriteQueue::with_policy(self.queue_capacity, self.overflow)
    }
}
