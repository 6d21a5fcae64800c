//! Recent location history and stationary-device suppression.
//!
//! Fixed or slow-moving mounts would otherwise report the same static defect
//! on every cycle. The history keeps the last few fixes (two by default) and
//! answers whether a candidate position is a near-duplicate of them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

pub const DEFAULT_HISTORY_CAPACITY: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

impl Position {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Both axes within `tolerance` degrees.
    pub fn is_within(&self, other: &Position, tolerance: f64) -> bool {
        (self.latitude - other.latitude).abs() <= tolerance
            && (self.longitude - other.longitude).abs() <= tolerance
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LocationRecord {
    pub latitude: f64,
    pub longitude: f64,
    pub observed_at: DateTime<Utc>,
}

impl LocationRecord {
    pub fn position(&self) -> Position {
        Position::new(self.latitude, self.longitude)
    }
}

/// Which held records a candidate is compared against.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateMatch {
    /// Only the most recent record.
    #[default]
    Latest,
    /// Any record currently held.
    Any,
}

impl std::str::FromStr for DuplicateMatch {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "latest" => Ok(Self::Latest),
            "any" => Ok(Self::Any),
            other => Err(anyhow::anyhow!(
                "unknown duplicate match '{}'; expected latest or any",
                other
            )),
        }
    }
}

/// Bounded, most-recent-first sequence of location fixes.
#[derive(Clone, Debug)]
pub struct LocationHistory {
    records: VecDeque<LocationRecord>,
    capacity: usize,
    matching: DuplicateMatch,
}

impl LocationHistory {
    /// A zero capacity is raised to one; config validation rejects it earlier.
    pub fn new(capacity: usize, matching: DuplicateMatch) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
            matching,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_duplicate(&self, candidate: Position, tolerance: f64) -> bool {
        match self.matching {
            DuplicateMatch::Latest => self
                .records
                .front()
                .is_some_and(|record| record.position().is_within(&candidate, tolerance)),
            DuplicateMatch::Any => self
                .records
                .iter()
                .any(|record| record.position().is_within(&candidate, tolerance)),
        }
    }

    pub fn record(&mut self, position: Position) {
        self.record_at(position, Utc::now());
    }

    /// Insert keeping observation order; the oldest record falls off when full.
    pub fn record_at(&mut self, position: Position, observed_at: DateTime<Utc>) {
        let record = LocationRecord {
            latitude: position.latitude,
            longitude: position.longitude,
            observed_at,
        };
        let index = self
            .records
            .iter()
            .position(|existing| existing.observed_at <= observed_at)
            .unwrap_or(self.records.len());
        self.records.insert(index, record);
        self.records.truncate(self.capacity);
    }

    /// Snapshot, most recent first.
    pub fn list(&self) -> Vec<LocationRecord> {
        self.records.iter().copied().collect()
    }
}

impl Default for LocationHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY, DuplicateMatch::default())
    }
}
