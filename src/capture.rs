//! Captures: one flagged observation awaiting delivery.
//!
//! A `Capture` is created when a detection fires. Its payload is opaque JPEG
//! content and is immutable once created; there is no mutable accessor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

const CAPTURE_ID_FORMAT: &str = "capture_%Y%m%d_%H%M%S";

/// Stable capture identifier derived from the capture timestamp.
///
/// Resolution is one second, which is finer than the minimum inter-capture
/// interval of the polling loop. The store disambiguates the rare same-second
/// collision when naming files.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CaptureId(String);

impl CaptureId {
    pub fn from_timestamp(created_at: DateTime<Utc>) -> Self {
        Self(created_at.format(CAPTURE_ID_FORMAT).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CaptureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Metadata persisted alongside the payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CaptureMetadata {
    pub user_id: String,
    pub device_id: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Narrates when the capture was observed.
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl CaptureMetadata {
    pub fn new(
        user_id: impl Into<String>,
        device_id: impl Into<String>,
        latitude: f64,
        longitude: f64,
        created_at: DateTime<Utc>,
    ) -> Self {
        let device_id = device_id.into();
        let description = format!(
            "Captured by IoT device {} at {}. Location: {}, {}",
            device_id,
            created_at.format("%Y-%m-%d %H:%M:%S"),
            latitude,
            longitude
        );
        Self {
            user_id: user_id.into(),
            device_id,
            latitude,
            longitude,
            description,
            created_at,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Capture {
    id: CaptureId,
    payload: Vec<u8>,
    metadata: CaptureMetadata,
}

impl Capture {
    pub fn new(payload: Vec<u8>, metadata: CaptureMetadata) -> Self {
        Self {
            id: CaptureId::from_timestamp(metadata.created_at),
            payload,
            metadata,
        }
    }

    /// Rebuild a capture read back from storage, keeping its original id.
    pub(crate) fn restore(id: CaptureId, payload: Vec<u8>, metadata: CaptureMetadata) -> Self {
        Self {
            id,
            payload,
            metadata,
        }
    }

    pub fn id(&self) -> &CaptureId {
        &self.id
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn metadata(&self) -> &CaptureMetadata {
        &self.metadata
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.metadata.created_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn id_is_derived_from_timestamp_with_second_resolution() {
        let ts = Utc.with_ymd_and_hms(2024, 9, 14, 8, 5, 3).unwrap();
        let id = CaptureId::from_timestamp(ts);
        assert_eq!(id.as_str(), "capture_20240914_080503");

        let later = ts + chrono::Duration::seconds(1);
        assert_ne!(CaptureId::from_timestamp(later), id);
    }

    #[test]
    fn ids_sort_chronologically() {
        let a = CaptureId::from_timestamp(Utc.with_ymd_and_hms(2024, 1, 2, 23, 59, 59).unwrap());
        let b = CaptureId::from_timestamp(Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap());
        assert!(a < b);
    }

    #[test]
    fn metadata_description_uses_observation_time() {
        let ts = Utc.with_ymd_and_hms(2024, 9, 14, 8, 5, 3).unwrap();
        let meta = CaptureMetadata::new("user", "device-7", 37.7749, -122.4194, ts);
        assert_eq!(
            meta.description,
            "Captured by IoT device device-7 at 2024-09-14 08:05:03. Location: 37.7749, -122.4194"
        );
        let capture = Capture::new(vec![1, 2, 3], meta);
        assert_eq!(capture.created_at(), ts);
        assert_eq!(capture.payload(), &[1, 2, 3]);
    }
}
