//! Frame ingestion sources.
//!
//! This module provides different sources for encoded camera frames:
//! - Camera snapshot endpoints over HTTP (ESP32-CAM style `/capture`)
//! - Local image directories (recorded footage exported as JPEG stills)
//! - Synthetic source (testing)
//!
//! Every source yields JPEG-encoded frames. `Ok(None)` is end-of-stream; an
//! error is a read failure. Either one ends the daemon loop.

use anyhow::Result;
use chrono::{DateTime, Utc};

pub mod dir;
pub mod http;
pub mod synthetic;

pub use dir::ImageDirSource;
pub use http::HttpSnapshotSource;
pub use synthetic::SyntheticSource;

/// One encoded frame.
#[derive(Clone, Debug)]
pub struct Frame {
    sequence: u64,
    data: Vec<u8>,
    captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(sequence: u64, data: Vec<u8>) -> Self {
        Self {
            sequence,
            data,
            captured_at: Utc::now(),
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

pub trait FrameSource: Send {
    /// Human-readable source description for logs.
    fn describe(&self) -> String;

    /// Next frame, or `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}

/// Open a source from a URL: `stub://`, `http(s)://`, or a local directory path.
pub fn open_source(url: &str) -> Result<Box<dyn FrameSource>> {
    if url.starts_with("stub://") {
        Ok(Box::new(SyntheticSource::from_url(url)?))
    } else if url.starts_with("http://") || url.starts_with("https://") {
        Ok(Box::new(HttpSnapshotSource::new(url)?))
    } else if url.contains("://") {
        Err(anyhow::anyhow!(
            "unsupported frame source '{}'; expected stub://, http(s):// or a local directory",
            url
        ))
    } else {
        Ok(Box::new(ImageDirSource::open(url)?))
    }
}

/// Pass through only every `stride`-th frame of the inner source.
pub struct Decimate<S> {
    inner: S,
    stride: u64,
    seen: u64,
}

impl<S: FrameSource> Decimate<S> {
    pub fn new(inner: S, stride: u64) -> Self {
        Self {
            inner,
            stride: stride.max(1),
            seen: 0,
        }
    }
}

impl<S: FrameSource> FrameSource for Decimate<S> {
    fn describe(&self) -> String {
        format!("{} (every {} frames)", self.inner.describe(), self.stride)
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            let Some(frame) = self.inner.next_frame()? else {
                return Ok(None);
            };
            self.seen += 1;
            if self.seen % self.stride == 0 {
                return Ok(Some(frame));
            }
        }
    }
}

impl FrameSource for Box<dyn FrameSource> {
    fn describe(&self) -> String {
        self.as_ref().describe()
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        self.as_mut().next_frame()
    }
}
