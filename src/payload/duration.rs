//! Firmware duration notation: `<days>T<HH>:<MM>:<SS>`, e.g. `0T00:17:11`.

use serde::de::{self, Deserializer};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TasmotaDuration(Duration);

impl TasmotaDuration {
    pub fn as_duration(&self) -> Duration {
        self.0
    }

    pub fn as_secs(&self) -> u64 {
        self.0.as_secs()
    }
}

impl FromStr for TasmotaDuration {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || format!("'{}' is not a <days>T<HH>:<MM>:<SS> duration", s);

        let (days, clock) = s.split_once('T').ok_or_else(invalid)?;
        let days: u64 = days.parse().map_err(|_| invalid())?;

        let mut parts = clock.split(':');
        let mut next_field = |max: u64| -> Result<u64, String> {
            let value: u64 = parts
                .next()
                .ok_or_else(invalid)?
                .parse()
                .map_err(|_| invalid())?;
            if value > max {
                return Err(invalid());
            }
            Ok(value)
        };
        let hours = next_field(23)?;
        let minutes = next_field(59)?;
        let seconds = next_field(59)?;
        if parts.next().is_some() {
            return Err(invalid());
        }

        // Day counts come off the wire unbounded
        let total = days
            .checked_mul(86_400)
            .and_then(|secs| secs.checked_add(hours * 3_600 + minutes * 60 + seconds))
            .ok_or_else(invalid)?;
        Ok(Self(Duration::from_secs(total)))
    }
}

impl fmt::Display for TasmotaDuration {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let total = self.0.as_secs();
        write!(
            f,
            "{}T{:02}:{:02}:{:02}",
            total / 86_400,
            (total % 86_400) / 3_600,
            (total % 3_600) / 60,
            total % 60
        )
    }
}

impl<'de> Deserialize<'de> for TasmotaDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}
