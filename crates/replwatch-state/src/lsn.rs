//! PostgreSQL write-ahead log positions.
//!
//! An LSN is printed by the server as two hex halves, `16/B374D848`, and
//! is a plain 64-bit byte offset underneath.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::StateError;

/// A WAL location (log sequence number).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Lsn(pub u64);

impl Lsn {
    /// Bytes by which `self` is ahead of `behind`. Never negative.
    pub fn bytes_ahead_of(self, behind: Lsn) -> u64 {
        self.0.saturating_sub(behind.0)
    }
}

impl FromStr for Lsn {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hi, lo) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| StateError::Invalid(format!("malformed LSN '{s}'")))?;
        let hi = u32::from_str_radix(hi, 16)
            .map_err(|e| StateError::Invalid(format!("malformed LSN '{s}': {e}")))?;
        let lo = u32::from_str_radix(lo, 16)
            .map_err(|e| StateError::Invalid(format!("malformed LSN '{s}': {e}")))?;
        Ok(Lsn((u64::from(hi) << 32) | u64::from(lo)))
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}/{:X}", self.0 >> 32, self.0 & 0xFFFF_FFFF)
    }
}

impl Serialize for Lsn {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Lsn {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
