//! Register-write scripts.
//!
//! A script is a JSON array of writes stamped with absolute CPU cycles:
//!
//! ```json
//! [
//!   {"cycle": 0,     "addr": "$D418", "value": 15},
//!   {"cycle": 19656, "addr": 54276,   "value": "0x21"}
//! ]
//! ```
//!
//! Addresses and values may be numbers or strings in `$hex`, `0xhex` or
//! decimal form. Cycles must not decrease.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::de::{self, Deserializer};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ScriptWrite {
    pub cycle: u64,
    #[serde(deserialize_with = "number_or_hex")]
    pub addr: u16,
    #[serde(deserialize_with = "number_or_hex")]
    pub value: u8,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrText {
    Number(u64),
    Text(String),
}

fn parse_number(text: &str) -> Option<u64> {
    let text = text.trim();
    if let Some(hex) = text.strip_prefix('$') {
        u64::from_str_radix(hex, 16).ok()
    } else if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        text.parse().ok()
    }
}

fn number_or_hex<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<u64>,
{
    let raw = match NumberOrText::deserialize(deserializer)? {
        NumberOrText::Number(n) => n,
        NumberOrText::Text(s) => {
            parse_number(&s).ok_or_else(|| de::Error::custom(format!("not a number: {:?}", s)))?
        }
    };
    T::try_from(raw).map_err(|_| de::Error::custom(format!("{} is out of range", raw)))
}

#[derive(Debug, Default)]
pub struct Script {
    writes: Vec<ScriptWrite>,
}

impl Script {
    pub fn from_json_str(s: &str) -> Result<Self> {
        let writes: Vec<ScriptWrite> = serde_json::from_str(s)?;
        if let Some(pair) = writes.windows(2).find(|w| w[1].cycle < w[0].cycle) {
            bail!(
                "script cycles must not decrease: {} follows {}",
                pair[1].cycle,
                pair[0].cycle
            );
        }
        Ok(Self { writes })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_json_str(&contents).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Frames needed to reach the last write
    pub fn frames(&self, cycles_per_frame: u32) -> usize {
        self.writes
            .last()
            .map(|w| (w.cycle / cycles_per_frame as u64) as usize + 1)
            .unwrap_or(0)
    }

    /// Writes falling in `frame`, with cycles relative to the frame start
    pub fn frame_writes(
        &self,
        frame: usize,
        cycles_per_frame: u32,
    ) -> impl Iterator<Item = (i64, u16, u8)> + '_ {
        let start = frame as u64 * cycles_per_frame as u64;
        let end = start + cycles_per_frame as u64;
        let first = self.writes.partition_point(|w| w.cycle < start);
        self.writes[first..]
            .iter()
            .take_while(move |w| w.cycle < end)
            .map(move |w| ((w.cycle - start) as i64, w.addr, w.value))
    }
}
