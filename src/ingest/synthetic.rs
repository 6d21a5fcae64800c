//! Synthetic frame source (`stub://`) for tests and bench runs.
//!
//! Frames within one scene are byte-identical; the scene advances every
//! `scene_frames` frames, which is what a change detector will flag.

use anyhow::{anyhow, Result};

use super::{Frame, FrameSource};

const DEFAULT_SCENE_FRAMES: u64 = 5;
const SYNTHETIC_BODY_BYTES: usize = 4096;

pub struct SyntheticSource {
    name: String,
    frame_count: u64,
    limit: Option<u64>,
    scene_frames: u64,
}

impl SyntheticSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            frame_count: 0,
            limit: None,
            scene_frames: DEFAULT_SCENE_FRAMES,
        }
    }

    /// Parse `stub://<name>[?frames=N][&scene=M]`.
    pub fn from_url(url: &str) -> Result<Self> {
        let rest = url
            .strip_prefix("stub://")
            .ok_or_else(|| anyhow!("synthetic source url must start with stub://"))?;
        let (name, query) = rest.split_once('?').unwrap_or((rest, ""));
        let mut source = Self::new(name);
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("malformed stub query parameter '{}'", pair))?;
            let value: u64 = value
                .parse()
                .map_err(|_| anyhow!("stub parameter {} must be an integer", key))?;
            match key {
                "frames" => source.limit = Some(value),
                "scene" => source.scene_frames = value.max(1),
                other => return Err(anyhow!("unknown stub parameter '{}'", other)),
            }
        }
        Ok(source)
    }

    pub fn with_limit(mut self, frames: u64) -> Self {
        self.limit = Some(frames);
        self
    }

    pub fn with_scene_frames(mut self, frames: u64) -> Self {
        self.scene_frames = frames.max(1);
        self
    }

    fn synthetic_jpeg(&self, scene: u64) -> Vec<u8> {
        let mut data = Vec::with_capacity(SYNTHETIC_BODY_BYTES + 4);
        data.extend_from_slice(&[0xFF, 0xD8]);
        data.extend((0..SYNTHETIC_BODY_BYTES).map(|i| ((i as u64 + scene * 31) % 251) as u8));
        data.extend_from_slice(&[0xFF, 0xD9]);
        data
    }
}

impl FrameSource for SyntheticSource {
    fn describe(&self) -> String {
        format!("stub://{}", self.name)
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.limit.is_some_and(|limit| self.frame_count >= limit) {
            return Ok(None);
        }
        let scene = self.frame_count / self.scene_frames;
        self.frame_count += 1;
        Ok(Some(Frame::new(self.frame_count, self.synthetic_jpeg(scene))))
    }
}
