//! Atari 2600 sound bus decoding
//!
//! The 6507 has a 13-bit address bus (8KB addressable space). The TIA is
//! selected whenever A12 and A7 are both low, and decodes only A0-A5:
//! $0000-$003F: TIA (mirrored throughout the selected range)
//! $0015-$001A: AUDC0, AUDC1, AUDF0, AUDF1, AUDV0, AUDV1
//!
//! Only the audio registers are handled here; everything else on the TIA
//! belongs to video and input.

use sound_core::apu::tia::{AUDC0, AUDV1};
use sound_core::apu::{ChipSynthesizer, TiaSound};
use sound_core::logging::{log, LogCategory, LogLevel};

const ADDR_MASK: u16 = 0x1FFF;
const TIA_SELECT_MASK: u16 = 0x1080;
const TIA_REG_MASK: u16 = 0x3F;

/// Routes CPU writes to the TIA audio registers
pub struct Atari2600SoundBus {
    pub synth: ChipSynthesizer<TiaSound>,
}

impl Atari2600SoundBus {
    pub fn new(synth: ChipSynthesizer<TiaSound>) -> Self {
        Self { synth }
    }

    /// TIA audio register selected by `addr`, if any
    pub fn decode(addr: u16) -> Option<u16> {
        // 6507 only has 13-bit address bus
        let addr = addr & ADDR_MASK;
        if addr & TIA_SELECT_MASK != 0 {
            return None;
        }
        let reg = addr & TIA_REG_MASK;
        (AUDC0..=AUDV1).contains(&reg).then_some(reg)
    }

    pub fn write(&mut self, addr: u16, val: u8, cycle: i64) -> bool {
        let Some(reg) = Self::decode(addr) else {
            return false;
        };
        log(LogCategory::Bus, LogLevel::Trace, || {
            format!("Bus: TIA ${:02X} = ${:02X} at cycle {}", reg, val, cycle)
        });
        self.synth.set_register(reg, val, cycle);
        true
    }

    /// Audio registers are write-only; reads see whatever the chip returns
    pub fn read(&mut self, addr: u16, cycle: i64) -> Option<u8> {
        let reg = Self::decode(addr)?;
        Some(self.synth.read_register(reg, cycle))
    }
}
