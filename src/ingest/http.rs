//! Camera snapshot source over HTTP.
//!
//! Fetches one JPEG per call from a snapshot URL (for example an ESP32-CAM
//! `/capture` handler). Any fetch failure is a read failure.

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::Client;
use std::time::Duration;

use super::{Frame, FrameSource};

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;
const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct HttpSnapshotSource {
    url: String,
    client: Client,
    frame_count: u64,
}

impl HttpSnapshotSource {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(SNAPSHOT_TIMEOUT)
            .build()
            .context("build snapshot http client")?;
        Ok(Self {
            url: url.into(),
            client,
            frame_count: 0,
        })
    }
}

fn looks_like_jpeg(data: &[u8]) -> bool {
    data.starts_with(&[0xFF, 0xD8])
}

impl FrameSource for HttpSnapshotSource {
    fn describe(&self) -> String {
        self.url.clone()
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .with_context(|| format!("fetch snapshot from {}", self.url))?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "snapshot request to {} returned {}",
                self.url,
                response.status()
            ));
        }
        if response
            .content_length()
            .is_some_and(|len| len > MAX_JPEG_BYTES as u64)
        {
            return Err(anyhow!("snapshot exceeds {} bytes", MAX_JPEG_BYTES));
        }
        let data = response.bytes().context("read snapshot body")?.to_vec();
        if data.len() > MAX_JPEG_BYTES {
            return Err(anyhow!("snapshot exceeds {} bytes", MAX_JPEG_BYTES));
        }
        if !looks_like_jpeg(&data) {
            return Err(anyhow!("snapshot from {} is not a JPEG", self.url));
        }
        self.frame_count += 1;
        Ok(Some(Frame::new(self.frame_count, data)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jpeg_magic_is_checked() {
        assert!(looks_like_jpeg(&[0xFF, 0xD8, 0xFF, 0xE0]));
        assert!(!looks_like_jpeg(b"<html>"));
        assert!(!looks_like_jpeg(&[]));
    }
}
