//! Local image directory source.
//!
//! Replays JPEG stills from a directory in file-name order. The end of the
//! directory is end-of-stream. Files are read only; nothing is written back.

use anyhow::{anyhow, Context, Result};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use super::{Frame, FrameSource};

const MAX_JPEG_BYTES: u64 = 5 * 1024 * 1024;

pub struct ImageDirSource {
    root: PathBuf,
    queue: VecDeque<PathBuf>,
    frame_count: u64,
}

impl ImageDirSource {
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(anyhow!("image source {} is not a directory", root.display()));
        }
        let mut files = fs::read_dir(&root)
            .with_context(|| format!("read image directory {}", root.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_jpeg_name(path))
            .collect::<Vec<_>>();
        files.sort();
        log::info!(
            "ImageDirSource: {} frames queued from {}",
            files.len(),
            root.display()
        );
        Ok(Self {
            root,
            queue: files.into(),
            frame_count: 0,
        })
    }
}

fn is_jpeg_name(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"))
}

impl FrameSource for ImageDirSource {
    fn describe(&self) -> String {
        self.root.display().to_string()
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(path) = self.queue.pop_front() else {
            return Ok(None);
        };
        let len = fs::metadata(&path)
            .with_context(|| format!("stat frame {}", path.display()))?
            .len();
        if len > MAX_JPEG_BYTES {
            return Err(anyhow!(
                "frame {} exceeds {} bytes",
                path.display(),
                MAX_JPEG_BYTES
            ));
        }
        let data = fs::read(&path).with_context(|| format!("read frame {}", path.display()))?;
        self.frame_count += 1;
        Ok(Some(Frame::new(self.frame_count, data)))
    }
}
