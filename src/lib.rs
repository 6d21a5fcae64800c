//! Capture Spool
//!
//! This crate implements the delivery side of an edge capture-and-report
//! device: a camera produces frames, a detector flags frames of interest, and
//! flagged captures are delivered to a remote collection endpoint over an
//! unreliable network.
//!
//! # Architecture
//!
//! The spool enforces four rules:
//!
//! 1. **Exactly-once delivery**: a capture leaves local storage only after the
//!    endpoint confirms it, or when it ages past the retention deadline.
//! 2. **Bounded disk**: eviction runs every cycle, regardless of delivery outcome.
//! 3. **No self-races**: a capture is never stored while a delivery attempt for
//!    it is still in flight, and is attempted at most once per cycle.
//! 4. **Stationary suppression**: a detection at a position the device has
//!    just reported from is dropped.
//!
//! # Module Structure
//!
//! - `capture`: Capture identity, payload and metadata
//! - `location`: Bounded location history and duplicate suppression
//! - `store`: Durable capture store (filesystem and in-memory)
//! - `delivery`: Remote submission with normalized outcomes
//! - `spool`: Cycle orchestration (retry, evaluate, evict)
//! - `ingest`, `detect`, `position`: Collaborators feeding the spool
//! - `pipeline`: The capture loop driving one spool cycle per frame
//! - `config`: Daemon configuration

use anyhow::{anyhow, Result};
use std::sync::OnceLock;

pub mod capture;
pub mod config;
pub mod delivery;
pub mod detect;
pub mod ingest;
pub mod location;
pub mod pipeline;
pub mod position;
pub mod spool;
pub mod store;

pub use capture::{Capture, CaptureId, CaptureMetadata};
pub use config::SpoolConfig;
pub use delivery::{Deliver, DeliveryOutcome, FailureReason, HttpDeliveryClient, Report};
pub use detect::{Detection, DetectorBackend, StubBackend};
pub use ingest::{Frame, FrameSource};
pub use location::{DuplicateMatch, LocationHistory, LocationRecord, Position};
pub use pipeline::Pipeline;
pub use position::{PositionSource, StaticPosition};
pub use spool::{
    CycleReport, DispatchMode, NewCapture, NewCaptureDisposition, SpoolManager, SpoolSettings,
};
pub use store::{
    CaptureStore, FilesystemCaptureStore, InMemoryCaptureStore, StoreRef, StoredCapture,
};

/// Validate an account or device identifier (UUID, any case).
pub fn validate_identifier(kind: &str, value: &str) -> Result<()> {
    static UUID_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = UUID_RE.get_or_init(|| {
        regex::Regex::new(
            r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$",
        )
        .unwrap()
    });
    if !re.is_match(value) {
        return Err(anyhow!("{} must be a UUID (got '{}')", kind, value));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_validation_accepts_uuid() {
        assert!(validate_identifier("user_id", "db0372cf-f8e8-47c5-a547-08e86fb48437").is_ok());
        assert!(validate_identifier("iot_id", "378168A4-5867-48E6-AE54-A625755E978B").is_ok());
    }

    #[test]
    fn identifier_validation_rejects_garbage() {
        assert!(validate_identifier("user_id", "").is_err());
        assert!(validate_identifier("user_id", "device-1").is_err());
        assert!(validate_identifier("iot_id", "378168a4-5867-48e6-ae54-a625755e978").is_err());
    }
}
