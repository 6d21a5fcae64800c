use anyhow::Result;
use sha2::{Digest, Sha256};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, Detection};
use crate::ingest::Frame;

const STUB_CONFIDENCE: f32 = 0.85;

/// Stub backend. Flags a frame whose content digest differs from the previous frame.
#[derive(Default)]
pub struct StubBackend {
    last_hash: Option<[u8; 32]>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let current_hash: [u8; 32] = Sha256::digest(frame.data()).into();
        let changed = self.last_hash.is_some_and(|prev| prev != current_hash);
        self.last_hash = Some(current_hash);

        if changed {
            Ok(vec![Detection {
                bbox: BoundingBox::FULL_FRAME,
                label: "change".to_string(),
                confidence: STUB_CONFIDENCE,
            }])
        } else {
            Ok(Vec::new())
        }
    }
}
