//! Remote submission of captures.
//!
//! The delivery client wraps the collection endpoint and normalizes every
//! result into a `DeliveryOutcome`. It never returns an error to the caller:
//! transport faults, rejections and timeouts all become `Failed`, and the
//! spool treats every failure as retryable.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use reqwest::blocking::{multipart, Client};
use serde::Deserialize;
use std::time::Duration;

use crate::capture::Capture;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const REMOTE_SUCCESS_STATUS: u64 = 200;
const IMAGE_FILE_NAME: &str = "image.jpg";
const IMAGE_MIME: &str = "image/jpeg";

/// Why a submission did not complete.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FailureReason {
    /// Network, DNS or connection-level fault.
    TransportFailure(String),
    /// The endpoint answered but did not report `status == 200`.
    RemoteRejection(String),
    /// No answer within the configured interval.
    Timeout,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::TransportFailure(detail) => write!(f, "transport failure: {}", detail),
            FailureReason::RemoteRejection(detail) => write!(f, "remote rejection: {}", detail),
            FailureReason::Timeout => write!(f, "timeout"),
        }
    }
}

impl std::error::Error for FailureReason {}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Confirmed,
    Failed(FailureReason),
}

impl DeliveryOutcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, DeliveryOutcome::Confirmed)
    }
}

/// Remote submission capability.
pub trait Deliver: Send + Sync {
    fn submit(&self, capture: &Capture) -> DeliveryOutcome;
}

/// Outbound report fields.
#[derive(Clone, Debug, PartialEq)]
pub struct Report {
    pub userid: String,
    pub latitude: String,
    pub longitude: String,
    pub description: String,
    pub iot_id: String,
    pub file: Option<Vec<u8>>,
}

impl Report {
    /// Build the report for a capture.
    ///
    /// The description narrates when the report was sent (`sent_at`); the
    /// capture's stored metadata keeps when it was observed.
    pub fn for_capture(capture: &Capture, sent_at: DateTime<Utc>) -> Self {
        let meta = capture.metadata();
        let description = format!(
            "Automated report from IoT device {} at {}. Location: {}, {}",
            meta.device_id,
            sent_at.format("%Y-%m-%d %H:%M:%S"),
            meta.latitude,
            meta.longitude
        );
        let payload = capture.payload();
        Self {
            userid: meta.user_id.clone(),
            latitude: meta.latitude.to_string(),
            longitude: meta.longitude.to_string(),
            description,
            iot_id: meta.device_id.clone(),
            file: (!payload.is_empty()).then(|| payload.to_vec()),
        }
    }

    /// Text fields in submission order.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("userid", self.userid.clone()),
            ("latitude", self.latitude.clone()),
            ("longitude", self.longitude.clone()),
            ("description", self.description.clone()),
            ("is_iot", "true".to_string()),
            ("iot_id", self.iot_id.clone()),
        ]
    }

    fn into_form(self) -> Result<multipart::Form> {
        let mut form = multipart::Form::new();
        for (name, value) in self.fields() {
            form = form.text(name, value);
        }
        if let Some(bytes) = self.file {
            let part = multipart::Part::bytes(bytes)
                .file_name(IMAGE_FILE_NAME)
                .mime_str(IMAGE_MIME)
                .map_err(|e| anyhow!("build image part: {}", e))?;
            form = form.part("file", part);
        }
        Ok(form)
    }
}

#[derive(Debug, Deserialize)]
struct RemoteResponse {
    status: Option<serde_json::Value>,
    #[serde(default)]
    message: Option<String>,
}

/// Decide the outcome from the HTTP status and the JSON body.
pub fn interpret_response(http_status: u16, body: &str) -> DeliveryOutcome {
    if !(200..300).contains(&http_status) {
        return DeliveryOutcome::Failed(FailureReason::RemoteRejection(format!(
            "http status {}",
            http_status
        )));
    }
    let parsed: RemoteResponse = match serde_json::from_str(body) {
        Ok(parsed) => parsed,
        Err(e) => {
            return DeliveryOutcome::Failed(FailureReason::RemoteRejection(format!(
                "unparseable response body: {}",
                e
            )))
        }
    };
    let status = match &parsed.status {
        Some(serde_json::Value::Number(n)) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| *f >= 0.0 && f.fract() == 0.0)
                .map(|f| f as u64)
        }),
        Some(serde_json::Value::String(s)) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    match status {
        Some(REMOTE_SUCCESS_STATUS) => DeliveryOutcome::Confirmed,
        Some(other) => DeliveryOutcome::Failed(FailureReason::RemoteRejection(format!(
            "status {}{}",
            other,
            parsed
                .message
                .map(|m| format!(" ({})", m))
                .unwrap_or_default()
        ))),
        None => DeliveryOutcome::Failed(FailureReason::RemoteRejection(
            "response has no status field".to_string(),
        )),
    }
}

fn classify_transport_error(e: reqwest::Error) -> FailureReason {
    if e.is_timeout() {
        FailureReason::Timeout
    } else {
        FailureReason::TransportFailure(e.to_string())
    }
}

/// Multipart HTTP client for the collection endpoint.
pub struct HttpDeliveryClient {
    client: Client,
    url: String,
}

impl HttpDeliveryClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow!("build http client: {}", e))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn post(&self, report: Report) -> Result<DeliveryOutcome, FailureReason> {
        let form = report
            .into_form()
            .map_err(|e| FailureReason::TransportFailure(e.to_string()))?;
        let response = self
            .client
            .post(&self.url)
            .multipart(form)
            .send()
            .map_err(classify_transport_error)?;
        let http_status = response.status().as_u16();
        let body = response.text().map_err(classify_transport_error)?;
        log::debug!("endpoint replied http={} body={}", http_status, body);
        Ok(interpret_response(http_status, &body))
    }
}

impl Deliver for HttpDeliveryClient {
    fn submit(&self, capture: &Capture) -> DeliveryOutcome {
        let report = Report::for_capture(capture, Utc::now());
        self.post(report).unwrap_or_else(DeliveryOutcome::Failed)
    }
}
