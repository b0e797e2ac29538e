//! C64 sound bus decoding
//!
//! The SID occupies $D400-$D7FF with its 32 registers mirrored every $20.
//! A second SID, when fitted, answers at its own base address for 32 bytes
//! and takes precedence over the mirrors of the first:
//! $D400-$D41F: SID 1 registers
//! $D420-$D7FF: SID 1 mirrors (or SID 2 at a mirror address)
//! $DE00/$DF00: common I/O area locations for SID 2

use sound_core::apu::{ChipSynthesizer, SidEngine};
use sound_core::logging::{log, LogCategory, LogLevel};

pub const SID_BASE: u16 = 0xD400;
pub const SID_END: u16 = 0xD7FF;
const SID_MIRROR_MASK: u16 = 0x1F;
const SID_SPAN: u16 = 0x20;

/// Which chip an address selects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SidSelect {
    Left(u16),
    Right(u16),
}

/// Routes CPU accesses to one or two SID synthesizers
pub struct C64SoundBus {
    pub left: ChipSynthesizer<SidEngine>,
    pub right: Option<ChipSynthesizer<SidEngine>>,
    stereo_base: Option<u16>,
}

impl C64SoundBus {
    pub fn new(
        left: ChipSynthesizer<SidEngine>,
        right: Option<ChipSynthesizer<SidEngine>>,
        stereo_base: Option<u16>,
    ) -> Self {
        // A base without a chip behind it decodes nothing
        let stereo_base = if right.is_some() { stereo_base } else { None };
        Self {
            left,
            right,
            stereo_base,
        }
    }

    pub fn stereo_base(&self) -> Option<u16> {
        self.stereo_base
    }

    /// Map a CPU address to a chip and register
    pub fn decode(&self, addr: u16) -> Option<SidSelect> {
        if let Some(base) = self.stereo_base {
            if (base..base + SID_SPAN).contains(&addr) {
                return Some(SidSelect::Right(addr - base));
            }
        }
        if (SID_BASE..=SID_END).contains(&addr) {
            return Some(SidSelect::Left(addr & SID_MIRROR_MASK));
        }
        None
    }

    pub fn write(&mut self, addr: u16, val: u8, cycle: i64) -> bool {
        match self.decode(addr) {
            Some(SidSelect::Left(reg)) => self.left.set_register(reg, val, cycle),
            Some(SidSelect::Right(reg)) => match self.right.as_mut() {
                Some(right) => right.set_register(reg, val, cycle),
                None => return false,
            },
            None => return false,
        }
        log(LogCategory::Bus, LogLevel::Trace, || {
            format!("Bus: write ${:04X} = ${:02X} at cycle {}", addr, val, cycle)
        });
        true
    }

    pub fn read(&mut self, addr: u16, cycle: i64) -> Option<u8> {
        match self.decode(addr)? {
            SidSelect::Left(reg) => Some(self.left.read_register(reg, cycle)),
            SidSelect::Right(reg) => self.right.as_mut().map(|r| r.read_register(reg, cycle)),
        }
    }

    /// Rebase every chip's cycle counter
    pub fn adjust_cycle_counter(&mut self, amount: i64) {
        self.left.adjust_cycle_counter(amount);
        if let Some(right) = self.right.as_mut() {
            right.adjust_cycle_counter(amount);
        }
    }

    pub fn reset(&mut self) {
        self.left.reset();
        if let Some(right) = self.right.as_mut() {
            right.reset();
        }
    }

    pub fn channels(&self) -> usize {
        if self.right.is_some() {
            2
        } else {
            1
        }
    }

    /// Render `frames` sample frames, interleaving left and right when a
    /// second SID is fitted.
    pub fn render(&mut self, frames: usize, out: &mut Vec<i16>) {
        match self.right.as_mut() {
            None => {
                out.resize(frames, 0);
                self.left.render_samples(out);
            }
            Some(right) => {
                let mut l = vec![0i16; frames];
                let mut r = vec![0i16; frames];
                self.left.render_samples(&mut l);
                right.render_samples(&mut r);
                out.clear();
                out.reserve(frames * 2);
                for (a, b) in l.into_iter().zip(r) {
                    out.push(a);
                    out.push(b);
                }
            }
        }
    }
}
