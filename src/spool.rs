//! Spool cycle orchestration.
//!
//! Each cycle runs `RetryPending -> EvaluateNew -> Evict`; the caller idles
//! between cycles and never runs two at once.
//!
//! - RetryPending re-submits every stored capture, oldest first. A failure
//!   leaves the capture stored and moves on to the next one.
//! - EvaluateNew drops a new capture taken at a position the device has just
//!   reported from; otherwise it records the position and delivers, storing
//!   the capture only once a failure outcome is known.
//! - Evict enforces the retention deadline whatever the delivery results were.
//!
//! Leftovers from a previous run are picked up by the first RetryPending.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::capture::{Capture, CaptureId, CaptureMetadata};
use crate::delivery::{Deliver, DeliveryOutcome};
use crate::location::{DuplicateMatch, LocationHistory, Position, DEFAULT_HISTORY_CAPACITY};
use crate::store::CaptureStore;

pub const DEFAULT_RETENTION: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_DUPLICATE_TOLERANCE: f64 = 0.0001;

/// How a new capture's first delivery attempt is run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// Submit within the cycle and wait for the outcome.
    #[default]
    Inline,
    /// Hand off to the delivery worker; the outcome is collected next cycle.
    Detached,
}

impl std::str::FromStr for DispatchMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inline" => Ok(Self::Inline),
            "detached" => Ok(Self::Detached),
            other => Err(anyhow!(
                "unknown dispatch mode '{}'; expected inline or detached",
                other
            )),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SpoolSettings {
    pub user_id: String,
    pub device_id: String,
    pub retention: Duration,
    pub duplicate_tolerance: f64,
    pub history_capacity: usize,
    pub duplicate_match: DuplicateMatch,
    pub dispatch: DispatchMode,
}

impl SpoolSettings {
    pub fn new(user_id: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            device_id: device_id.into(),
            retention: DEFAULT_RETENTION,
            duplicate_tolerance: DEFAULT_DUPLICATE_TOLERANCE,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            duplicate_match: DuplicateMatch::default(),
            dispatch: DispatchMode::default(),
        }
    }
}

/// A detection that fired this cycle.
#[derive(Clone, Debug)]
pub struct NewCapture {
    pub payload: Vec<u8>,
    pub position: Position,
    pub observed_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NewCaptureDisposition {
    /// Confirmed on the first attempt.
    Delivered(CaptureId),
    /// First attempt failed; stored for retry.
    Spooled(CaptureId),
    /// Handed to the delivery worker.
    Dispatched(CaptureId),
    /// Near-duplicate of recent history; silently dropped.
    DroppedDuplicate(CaptureId),
    /// First attempt failed and the store rejected it.
    Lost(CaptureId),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Detached attempts whose outcome arrived this cycle.
    pub detached_confirmed: usize,
    pub detached_spooled: usize,
    pub retried: usize,
    pub confirmed: usize,
    pub still_pending: usize,
    pub unreadable: usize,
    pub new_capture: Option<NewCaptureDisposition>,
    pub evicted: usize,
    pub lost: usize,
    pub queue_depth: usize,
}

impl CycleReport {
    /// One-line audit summary of every counter.
    pub fn summary(&self) -> String {
        format!(
            "detached_confirmed={} detached_spooled={} retried={} confirmed={} pending={} unreadable={} evicted={} lost={} queue_depth={} new={:?}",
            self.detached_confirmed,
            self.detached_spooled,
            self.retried,
            self.confirmed,
            self.still_pending,
            self.unreadable,
            self.evicted,
            self.lost,
            self.queue_depth,
            self.new_capture
        )
    }

    pub fn log(&self) {
        let busy = self.retried > 0
            || self.queue_depth > 0
            || self.new_capture.is_some()
            || self.detached_confirmed + self.detached_spooled > 0;
        let level = if busy { log::Level::Info } else { log::Level::Debug };
        log::log!(level, "spool cycle: {}", self.summary());
    }
}

// ----------------------------------------------------------------------------
// Detached delivery worker
// ----------------------------------------------------------------------------

struct DeliveryWorker {
    tasks: Option<Sender<Capture>>,
    results: Receiver<(Capture, DeliveryOutcome)>,
    join: Option<JoinHandle<()>>,
}

impl DeliveryWorker {
    fn spawn(delivery: Arc<dyn Deliver>) -> Result<Self> {
        let (task_tx, task_rx) = mpsc::channel::<Capture>();
        let (result_tx, result_rx) = mpsc::channel();
        let join = std::thread::Builder::new()
            .name("spool-delivery".to_string())
            .spawn(move || {
                for capture in task_rx {
                    let outcome = delivery.submit(&capture);
                    if result_tx.send((capture, outcome)).is_err() {
                        break;
                    }
                }
            })
            .map_err(|e| anyhow!("spawn delivery worker: {}", e))?;
        Ok(Self {
            tasks: Some(task_tx),
            results: result_rx,
            join: Some(join),
        })
    }

    /// Queue a capture; gives it back if the worker is gone.
    fn dispatch(&self, capture: Capture) -> std::result::Result<(), Capture> {
        match &self.tasks {
            Some(tasks) => tasks.send(capture).map_err(|e| e.0),
            None => Err(capture),
        }
    }

    fn try_collect(&self) -> Vec<(Capture, DeliveryOutcome)> {
        let mut out = Vec::new();
        loop {
            match self.results.try_recv() {
                Ok(result) => out.push(result),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        out
    }

    /// Stop accepting work, wait for in-flight attempts, return their outcomes.
    fn finish(mut self) -> Vec<(Capture, DeliveryOutcome)> {
        self.tasks.take();
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                log::error!("delivery worker panicked");
            }
        }
        self.results.try_iter().collect()
    }
}

// ----------------------------------------------------------------------------
// Spool manager
// ----------------------------------------------------------------------------

pub struct SpoolManager {
    settings: SpoolSettings,
    store: Arc<dyn CaptureStore>,
    delivery: Arc<dyn Deliver>,
    history: LocationHistory,
    worker: Option<DeliveryWorker>,
}

impl SpoolManager {
    pub fn new(
        settings: SpoolSettings,
        store: Arc<dyn CaptureStore>,
        delivery: Arc<dyn Deliver>,
    ) -> Result<Self> {
        let history = LocationHistory::new(settings.history_capacity, settings.duplicate_match);
        let worker = match settings.dispatch {
            DispatchMode::Inline => None,
            DispatchMode::Detached => Some(DeliveryWorker::spawn(delivery.clone())?),
        };
        Ok(Self {
            settings,
            store,
            delivery,
            history,
            worker,
        })
    }

    pub fn settings(&self) -> &SpoolSettings {
        &self.settings
    }

    pub fn history(&self) -> &LocationHistory {
        &self.history
    }

    pub fn store(&self) -> &Arc<dyn CaptureStore> {
        &self.store
    }

    /// Run one full cycle.
    pub fn run_cycle(&mut self, detection: Option<NewCapture>) -> CycleReport {
        let mut report = CycleReport::default();
        self.collect_detached(&mut report);
        self.retry_pending(&mut report);
        if let Some(new) = detection {
            report.new_capture = Some(self.evaluate_new(new, &mut report));
        }
        self.evict(&mut report);
        report.queue_depth = self.store.len().unwrap_or_else(|e| {
            log::warn!("cannot read spool queue depth: {:#}", e);
            0
        });
        report
    }

    /// Wait for detached deliveries and persist the ones that failed.
    pub fn shutdown(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        let results = worker.finish();
        let mut report = CycleReport::default();
        for (capture, outcome) in results {
            self.settle_detached(capture, outcome, &mut report);
        }
        if report.detached_confirmed + report.detached_spooled + report.lost > 0 {
            log::info!(
                "delivery worker drained: confirmed={} spooled={} lost={}",
                report.detached_confirmed,
                report.detached_spooled,
                report.lost
            );
        }
    }

    fn collect_detached(&mut self, report: &mut CycleReport) {
        let results = match &self.worker {
            Some(worker) => worker.try_collect(),
            None => return,
        };
        for (capture, outcome) in results {
            self.settle_detached(capture, outcome, report);
        }
    }

    fn settle_detached(&self, capture: Capture, outcome: DeliveryOutcome, report: &mut CycleReport) {
        match outcome {
            DeliveryOutcome::Confirmed => {
                log::info!(
                    "delivered capture {} created_at={}",
                    capture.id(),
                    capture.created_at().to_rfc3339()
                );
                report.detached_confirmed += 1;
            }
            DeliveryOutcome::Failed(reason) => {
                log::warn!(
                    "delivery of capture {} failed ({}), created_at={}; will retry",
                    capture.id(),
                    reason,
                    capture.created_at().to_rfc3339()
                );
                if self.persist(&capture, report) {
                    report.detached_spooled += 1;
                }
            }
        }
    }

    fn retry_pending(&self, report: &mut CycleReport) {
        let pending = match self.store.list_pending() {
            Ok(pending) => pending,
            Err(e) => {
                log::error!("cannot enumerate pending captures: {:#}", e);
                return;
            }
        };
        for entry in pending {
            let stored = match entry {
                Ok(stored) => stored,
                Err(e) => {
                    log::warn!("skipping unreadable pending capture: {:#}", e);
                    report.unreadable += 1;
                    continue;
                }
            };
            report.retried += 1;
            let capture = &stored.capture;
            match self.delivery.submit(capture) {
                DeliveryOutcome::Confirmed => {
                    if let Err(e) = self.store.remove(&stored.store_ref) {
                        log::error!(
                            "capture {} delivered but could not be removed from store: {:#}",
                            stored.store_ref,
                            e
                        );
                    }
                    report.confirmed += 1;
                    log::info!(
                        "re-delivered capture {} created_at={}",
                        stored.store_ref,
                        capture.created_at().to_rfc3339()
                    );
                }
                DeliveryOutcome::Failed(reason) => {
                    report.still_pending += 1;
                    log::warn!(
                        "retry of capture {} failed ({}), created_at={}; still pending",
                        stored.store_ref,
                        reason,
                        capture.created_at().to_rfc3339()
                    );
                }
            }
        }
    }

    fn evaluate_new(&mut self, new: NewCapture, report: &mut CycleReport) -> NewCaptureDisposition {
        let metadata = CaptureMetadata::new(
            self.settings.user_id.clone(),
            self.settings.device_id.clone(),
            new.position.latitude,
            new.position.longitude,
            new.observed_at,
        );
        let capture = Capture::new(new.payload, metadata);
        let id = capture.id().clone();

        if self
            .history
            .is_duplicate(new.position, self.settings.duplicate_tolerance)
        {
            log::info!(
                "dropped capture {} as duplicate of recent position ({}, {}), created_at={}",
                id,
                new.position.latitude,
                new.position.longitude,
                capture.created_at().to_rfc3339()
            );
            return NewCaptureDisposition::DroppedDuplicate(id);
        }
        self.history.record_at(new.position, new.observed_at);

        let capture = match &self.worker {
            Some(worker) => match worker.dispatch(capture) {
                Ok(()) => {
                    log::debug!("capture {} handed to delivery worker", id);
                    return NewCaptureDisposition::Dispatched(id);
                }
                Err(capture) => {
                    log::warn!("delivery worker unavailable; delivering capture {} inline", id);
                    capture
                }
            },
            None => capture,
        };

        match self.delivery.submit(&capture) {
            DeliveryOutcome::Confirmed => {
                log::info!(
                    "delivered capture {} created_at={}",
                    id,
                    capture.created_at().to_rfc3339()
                );
                NewCaptureDisposition::Delivered(id)
            }
            DeliveryOutcome::Failed(reason) => {
                log::warn!(
                    "delivery of capture {} failed ({}), created_at={}; will retry",
                    id,
                    reason,
                    capture.created_at().to_rfc3339()
                );
                if self.persist(&capture, report) {
                    NewCaptureDisposition::Spooled(id)
                } else {
                    NewCaptureDisposition::Lost(id)
                }
            }
        }
    }

    /// Store a capture for retry. A storage failure loses the capture.
    fn persist(&self, capture: &Capture, report: &mut CycleReport) -> bool {
        match self.store.put(capture) {
            Ok(store_ref) => {
                log::info!("spooled capture {} as {} for retry", capture.id(), store_ref);
                true
            }
            Err(e) => {
                log::error!(
                    "storage failure, capture {} created_at={} lost: {:#}",
                    capture.id(),
                    capture.created_at().to_rfc3339(),
                    e
                );
                report.lost += 1;
                false
            }
        }
    }

    fn evict(&self, report: &mut CycleReport) {
        match self.store.evict_older_than(self.settings.retention) {
            Ok(count) => report.evicted = count,
            Err(e) => log::error!("retention eviction failed: {:#}", e),
        }
    }
}

impl Drop for SpoolManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
