use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::delivery::DEFAULT_TIMEOUT;
use crate::location::{DuplicateMatch, DEFAULT_HISTORY_CAPACITY};
use crate::spool::{DispatchMode, SpoolSettings, DEFAULT_DUPLICATE_TOLERANCE, DEFAULT_RETENTION};
use crate::store::DEFAULT_STORE_DIR;

const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
const DEFAULT_SOURCE_URL: &str = "stub://camera";
const DEFAULT_MIN_CONFIDENCE: f32 = 0.5;
const DEFAULT_LATITUDE: f64 = 37.7749;
const DEFAULT_LONGITUDE: f64 = -122.4194;

#[derive(Debug, Deserialize, Default)]
struct SpoolConfigFile {
    store_dir: Option<PathBuf>,
    poll_interval_ms: Option<u64>,
    dispatch: Option<DispatchMode>,
    retention: Option<RetentionConfigFile>,
    location: Option<LocationConfigFile>,
    endpoint: Option<EndpointConfigFile>,
    source: Option<SourceConfigFile>,
    detector: Option<DetectorConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct RetentionConfigFile {
    seconds: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct LocationConfigFile {
    history_capacity: Option<usize>,
    duplicate_tolerance: Option<f64>,
    #[serde(rename = "match")]
    duplicate_match: Option<DuplicateMatch>,
    latitude: Option<f64>,
    longitude: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct EndpointConfigFile {
    url: Option<String>,
    user_id: Option<String>,
    iot_id: Option<String>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    frame_stride: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    min_confidence: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct SpoolConfig {
    pub store_dir: PathBuf,
    pub retention: Duration,
    pub poll_interval: Duration,
    pub dispatch: DispatchMode,
    pub location: LocationSettings,
    pub endpoint: EndpointSettings,
    pub source: SourceSettings,
    pub detector: DetectorSettings,
}

#[derive(Debug, Clone)]
pub struct LocationSettings {
    pub history_capacity: usize,
    pub duplicate_tolerance: f64,
    pub duplicate_match: DuplicateMatch,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone)]
pub struct EndpointSettings {
    pub url: String,
    pub user_id: String,
    pub iot_id: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub url: String,
    pub frame_stride: u64,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub min_confidence: f32,
}

impl SpoolConfig {
    /// Load from the file named by `SPOOL_CONFIG` (if any), then env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SPOOL_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SpoolConfigFile) -> Self {
        let location = file.location.unwrap_or_default();
        let endpoint = file.endpoint.unwrap_or_default();
        let source = file.source.unwrap_or_default();
        Self {
            store_dir: file
                .store_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_DIR)),
            retention: file
                .retention
                .and_then(|retention| retention.seconds)
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_RETENTION),
            poll_interval: Duration::from_millis(
                file.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            ),
            dispatch: file.dispatch.unwrap_or_default(),
            location: LocationSettings {
                history_capacity: location
                    .history_capacity
                    .unwrap_or(DEFAULT_HISTORY_CAPACITY),
                duplicate_tolerance: location
                    .duplicate_tolerance
                    .unwrap_or(DEFAULT_DUPLICATE_TOLERANCE),
                duplicate_match: location.duplicate_match.unwrap_or_default(),
                latitude: location.latitude.unwrap_or(DEFAULT_LATITUDE),
                longitude: location.longitude.unwrap_or(DEFAULT_LONGITUDE),
            },
            endpoint: EndpointSettings {
                url: endpoint.url.unwrap_or_default(),
                user_id: endpoint.user_id.unwrap_or_default(),
                iot_id: endpoint.iot_id.unwrap_or_default(),
                timeout: endpoint
                    .timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_TIMEOUT),
            },
            source: SourceSettings {
                url: source
                    .url
                    .unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
                frame_stride: source.frame_stride.unwrap_or(1),
            },
            detector: DetectorSettings {
                min_confidence: file
                    .detector
                    .and_then(|detector| detector.min_confidence)
                    .unwrap_or(DEFAULT_MIN_CONFIDENCE),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(dir) = env_nonempty("SPOOL_STORE_DIR") {
            self.store_dir = PathBuf::from(dir);
        }
        if let Some(url) = env_nonempty("SPOOL_ENDPOINT_URL") {
            self.endpoint.url = url;
        }
        if let Some(user_id) = env_nonempty("SPOOL_USER_ID") {
            self.endpoint.user_id = user_id;
        }
        if let Some(iot_id) = env_nonempty("SPOOL_IOT_ID") {
            self.endpoint.iot_id = iot_id;
        }
        if let Some(url) = env_nonempty("SPOOL_SOURCE_URL") {
            self.source.url = url;
        }
        if let Some(retention) = env_nonempty("SPOOL_RETENTION_SECS") {
            let seconds: u64 = retention.parse().map_err(|_| {
                anyhow!("SPOOL_RETENTION_SECS must be an integer number of seconds")
            })?;
            self.retention = Duration::from_secs(seconds);
        }
        if let Some(interval) = env_nonempty("SPOOL_POLL_INTERVAL_MS") {
            let millis: u64 = interval.parse().map_err(|_| {
                anyhow!("SPOOL_POLL_INTERVAL_MS must be an integer number of milliseconds")
            })?;
            self.poll_interval = Duration::from_millis(millis);
        }
        if let Some(latitude) = env_nonempty("SPOOL_LATITUDE") {
            self.location.latitude = latitude
                .parse()
                .map_err(|_| anyhow!("SPOOL_LATITUDE must be a decimal number"))?;
        }
        if let Some(longitude) = env_nonempty("SPOOL_LONGITUDE") {
            self.location.longitude = longitude
                .parse()
                .map_err(|_| anyhow!("SPOOL_LONGITUDE must be a decimal number"))?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.retention.as_secs() == 0 {
            return Err(anyhow!("retention must be greater than zero"));
        }
        if self.poll_interval.is_zero() {
            return Err(anyhow!("poll interval must be greater than zero"));
        }
        if self.endpoint.timeout.is_zero() {
            return Err(anyhow!("endpoint timeout must be greater than zero"));
        }
        if self.location.history_capacity == 0 {
            return Err(anyhow!("location history capacity must be at least 1"));
        }
        let tolerance = self.location.duplicate_tolerance;
        if !tolerance.is_finite() || tolerance < 0.0 {
            return Err(anyhow!("duplicate tolerance must be a finite, non-negative number"));
        }
        if !(-90.0..=90.0).contains(&self.location.latitude) {
            return Err(anyhow!("latitude must be within [-90, 90]"));
        }
        if !(-180.0..=180.0).contains(&self.location.longitude) {
            return Err(anyhow!("longitude must be within [-180, 180]"));
        }
        if self.source.frame_stride == 0 {
            return Err(anyhow!("frame stride must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.detector.min_confidence) {
            return Err(anyhow!("detector min_confidence must be within [0, 1]"));
        }

        let url = self.endpoint.url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(anyhow!(
                "endpoint url must be set to an http(s) URL (got '{}')",
                url
            ));
        }
        self.endpoint.url = url.to_string();
        crate::validate_identifier("endpoint user_id", &self.endpoint.user_id)?;
        crate::validate_identifier("endpoint iot_id", &self.endpoint.iot_id)?;
        self.endpoint.user_id = self.endpoint.user_id.to_lowercase();
        self.endpoint.iot_id = self.endpoint.iot_id.to_lowercase();
        Ok(())
    }

    /// Settings for the spool manager derived from this config.
    pub fn spool_settings(&self) -> SpoolSettings {
        SpoolSettings {
            user_id: self.endpoint.user_id.clone(),
            device_id: self.endpoint.iot_id.clone(),
            retention: self.retention,
            duplicate_tolerance: self.location.duplicate_tolerance,
            history_capacity: self.location.history_capacity,
            duplicate_match: self.location.duplicate_match,
            dispatch: self.dispatch,
        }
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<SpoolConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
