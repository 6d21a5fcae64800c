//! Capture loop: frame source -> detector -> spool cycle -> idle.

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::detect::{filter_confident, DetectorBackend};
use crate::ingest::FrameSource;
use crate::position::PositionSource;
use crate::spool::{CycleReport, NewCapture, SpoolManager};

const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

pub struct Pipeline {
    source: Box<dyn FrameSource>,
    detector: Box<dyn DetectorBackend>,
    position: Box<dyn PositionSource>,
    spool: SpoolManager,
    min_confidence: f32,
}

impl Pipeline {
    pub fn new(
        source: Box<dyn FrameSource>,
        detector: Box<dyn DetectorBackend>,
        position: Box<dyn PositionSource>,
        spool: SpoolManager,
        min_confidence: f32,
    ) -> Self {
        Self {
            source,
            detector,
            position,
            spool,
            min_confidence,
        }
    }

    pub fn spool(&self) -> &SpoolManager {
        &self.spool
    }

    /// Acquire one frame and run one spool cycle.
    ///
    /// Returns `Ok(None)` at end of stream. A source read failure is an error;
    /// detector and position failures only skip this cycle's new capture.
    pub fn step(&mut self) -> Result<Option<CycleReport>> {
        let Some(frame) = self.source.next_frame()? else {
            return Ok(None);
        };

        let detections = match self.detector.detect(&frame) {
            Ok(detections) => filter_confident(detections, self.min_confidence),
            Err(e) => {
                log::warn!(
                    "detector {} failed on frame {}: {:#}",
                    self.detector.name(),
                    frame.sequence(),
                    e
                );
                Vec::new()
            }
        };

        let new_capture = if detections.is_empty() {
            None
        } else {
            log::debug!(
                "frame {}: {} detection(s), top label={}",
                frame.sequence(),
                detections.len(),
                detections[0].label
            );
            match self.position.current() {
                Ok(position) => Some(NewCapture {
                    observed_at: frame.captured_at(),
                    payload: frame.into_data(),
                    position,
                }),
                Err(e) => {
                    log::error!("no position fix, dropping detection: {:#}", e);
                    None
                }
            }
        };

        Ok(Some(self.spool.run_cycle(new_capture)))
    }

    /// Run until end of stream, a source failure, or `shutdown` is set.
    pub fn run(&mut self, poll_interval: Duration, shutdown: &AtomicBool) -> Result<()> {
        log::info!("capture loop reading from {}", self.source.describe());
        let outcome = loop {
            if shutdown.load(Ordering::SeqCst) {
                log::info!("shutdown requested");
                break Ok(());
            }
            match self.step() {
                Ok(Some(report)) => report.log(),
                Ok(None) => {
                    log::info!("frame source ended");
                    break Ok(());
                }
                Err(e) => break Err(e),
            }
            idle(poll_interval, shutdown);
        };
        self.spool.shutdown();
        outcome
    }
}

fn idle(interval: Duration, shutdown: &AtomicBool) {
    let deadline = Instant::now() + interval;
    while !shutdown.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep((deadline - now).min(SHUTDOWN_POLL));
    }
}
