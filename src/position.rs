//! Device position sources.
//!
//! Deployed units are fixed mounts without a GNSS receiver, so the position
//! comes from configuration. Mobile units plug a receiver in behind
//! `PositionSource`.

use anyhow::Result;

use crate::location::Position;

pub trait PositionSource: Send {
    fn current(&mut self) -> Result<Position>;
}

/// Fixed, configured position.
#[derive(Clone, Copy, Debug)]
pub struct StaticPosition {
    position: Position,
}

impl StaticPosition {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            position: Position::new(latitude, longitude),
        }
    }
}

impl PositionSource for StaticPosition {
    fn current(&mut self) -> Result<Position> {
        Ok(self.position)
    }
}
