//! Per-device vector clocks.
//!
//! A clock maps a device identifier to the last entity version that device
//! wrote. Devices missing from a clock count as 0, so `{d1: 0}` and `{}`
//! compare equal.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Causal relationship between two clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockOrdering {
    /// Both clocks carry the same entries.
    Equal,
    /// `self` happened before `other` (`other` dominates).
    Before,
    /// `self` happened after `other` (`self` dominates).
    After,
    /// Neither dominates: two devices edited without seeing each other.
    Concurrent,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock(BTreeMap<String, u64>);

impl VectorClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last version written by `device_id`, 0 if the device never wrote.
    pub fn get(&self, device_id: &str) -> u64 {
        self.0.get(device_id).copied().unwrap_or(0)
    }

    /// Record that `device_id` wrote `version`.
    pub fn record(&mut self, device_id: impl Into<String>, version: u64) {
        self.0.insert(device_id.into(), version);
    }

    /// Pointwise maximum of both clocks.
    pub fn merge(&self, other: &VectorClock) -> VectorClock {
        let mut merged = self.clone();
        for (device, version) in &other.0 {
            let entry = merged.0.entry(device.clone()).or_insert(0);
            *entry = (*entry).max(*version);
        }
        merged
    }

    pub fn compare(&self, other: &VectorClock) -> ClockOrdering {
        let devices: BTreeSet<&String> = self.0.keys().chain(other.0.keys()).collect();

        let mut self_ahead = false;
        let mut other_ahead = false;
        for device in devices {
            let mine = self.get(device);
            let theirs = other.get(device);
            if mine > theirs {
                self_ahead = true;
            } else if theirs > mine {
                other_ahead = true;
            }
        }

        match (self_ahead, other_ahead) {
            (false, false) => ClockOrdering::Equal,
            (true, false) => ClockOrdering::After,
            (false, true) => ClockOrdering::Before,
            (true, true) => ClockOrdering::Concurrent,
        }
    }

    /// True if every entry is >= the other's and the clocks differ.
    pub fn dominates(&self, other: &VectorClock) -> bool {
        self.compare(other) == ClockOrdering::After
    }
}

impl<S: Into<String>, const N: usize> From<[(S, u64); N]> for VectorClock {
    fn from(entries: [(S, u64); N]) -> Self {
        entries.into_iter().collect()
    }
}

impl<S: Into<String>> FromIterator<(S, u64)> for VectorClock {
    fn from_iter<I: IntoIterator<Item = (S, u64)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(d, v)| (d.into(), v)).collect())
    }
}

impl fmt::Display for VectorClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (device, version)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}:{}", device, version)?;
        }
        write!(f, "}}")
    }
}
