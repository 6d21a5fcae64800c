use std::sync::Mutex;
use std::time::Duration;

use tempfile::Builder;

use capture_spool::config::SpoolConfig;
use capture_spool::{DispatchMode, DuplicateMatch};

static ENV_LOCK: Mutex<()> = Mutex::new(());

const USER_ID: &str = "db0372cf-f8e8-47c5-a547-08e86fb48437";
const IOT_ID: &str = "378168a4-5867-48e6-ae54-a625755e978b";

fn clear_env() {
    for key in [
        "SPOOL_CONFIG",
        "SPOOL_STORE_DIR",
        "SPOOL_ENDPOINT_URL",
        "SPOOL_USER_ID",
        "SPOOL_IOT_ID",
        "SPOOL_RETENTION_SECS",
        "SPOOL_POLL_INTERVAL_MS",
        "SPOOL_SOURCE_URL",
        "SPOOL_LATITUDE",
        "SPOOL_LONGITUDE",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".json").tempfile().expect("temp config");
    let json = format!(
        r#"{{
            "store_dir": "/var/lib/spool",
            "poll_interval_ms": 2000,
            "dispatch": "detached",
            "retention": {{ "seconds": 7200 }},
            "location": {{
                "history_capacity": 4,
                "duplicate_tolerance": 0.0005,
                "match": "any",
                "latitude": 51.5,
                "longitude": -0.12
            }},
            "endpoint": {{
                "url": "https://collector.example/functions/v1/uploadData",
                "user_id": "{}",
                "iot_id": "{}",
                "timeout_ms": 15000
            }},
            "source": {{ "url": "http://camera.local/capture", "frame_stride": 3 }},
            "detector": {{ "min_confidence": 0.7 }}
        }}"#,
        USER_ID.to_uppercase(),
        IOT_ID
    );
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("SPOOL_CONFIG", file.path());
    std::env::set_var("SPOOL_RETENTION_SECS", "1800");
    std::env::set_var("SPOOL_SOURCE_URL", "stub://yard");

    let cfg = SpoolConfig::load().expect("load config");

    assert_eq!(cfg.store_dir.to_str(), Some("/var/lib/spool"));
    assert_eq!(cfg.poll_interval, Duration::from_millis(2000));
    assert_eq!(cfg.dispatch, DispatchMode::Detached);
    assert_eq!(cfg.retention.as_secs(), 1800);
    assert_eq!(cfg.location.history_capacity, 4);
    assert_eq!(cfg.location.duplicate_tolerance, 0.0005);
    assert_eq!(cfg.location.duplicate_match, DuplicateMatch::Any);
    assert_eq!(cfg.location.latitude, 51.5);
    assert_eq!(
        cfg.endpoint.url,
        "https://collector.example/functions/v1/uploadData"
    );
    assert_eq!(cfg.endpoint.user_id, USER_ID);
    assert_eq!(cfg.endpoint.iot_id, IOT_ID);
    assert_eq!(cfg.endpoint.timeout, Duration::from_secs(15));
    assert_eq!(cfg.source.url, "stub://yard");
    assert_eq!(cfg.source.frame_stride, 3);
    assert_eq!(cfg.detector.min_confidence, 0.7);

    let settings = cfg.spool_settings();
    assert_eq!(settings.device_id, IOT_ID);
    assert_eq!(settings.retention, Duration::from_secs(1800));
    assert_eq!(settings.dispatch, DispatchMode::Detached);

    clear_env();
}

#[test]
fn loads_toml_config_with_defaults() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".toml").tempfile().expect("temp config");
    let toml = format!(
        r#"
[endpoint]
url = "http://10.0.0.5:8080/upload"
user_id = "{}"
iot_id = "{}"
"#,
        USER_ID, IOT_ID
    );
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");

    let cfg = SpoolConfig::load_from(Some(file.path())).expect("load config");

    assert_eq!(cfg.store_dir.to_str(), Some("capture_temp"));
    assert_eq!(cfg.retention, Duration::from_secs(3600));
    assert_eq!(cfg.dispatch, DispatchMode::Inline);
    assert_eq!(cfg.location.history_capacity, 2);
    assert_eq!(cfg.location.duplicate_tolerance, 0.0001);
    assert_eq!(cfg.location.duplicate_match, DuplicateMatch::Latest);
    assert_eq!(cfg.endpoint.timeout, Duration::from_secs(30));
    assert_eq!(cfg.source.url, "stub://camera");
    assert_eq!(cfg.source.frame_stride, 1);

    clear_env();
}

#[test]
fn endpoint_settings_can_come_from_env_only() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SPOOL_ENDPOINT_URL", "http://127.0.0.1:9000/upload");
    std::env::set_var("SPOOL_USER_ID", USER_ID);
    std::env::set_var("SPOOL_IOT_ID", IOT_ID);
    std::env::set_var("SPOOL_LATITUDE", "-33.86");
    std::env::set_var("SPOOL_LONGITUDE", "151.21");

    let cfg = SpoolConfig::load().expect("load config");
    assert_eq!(cfg.endpoint.url, "http://127.0.0.1:9000/upload");
    assert_eq!(cfg.location.latitude, -33.86);
    assert_eq!(cfg.location.longitude, 151.21);

    clear_env();
}

#[test]
fn rejects_missing_endpoint_identity() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SPOOL_ENDPOINT_URL", "http://127.0.0.1:9000/upload");
    std::env::set_var("SPOOL_USER_ID", USER_ID);

    let err = SpoolConfig::load().expect_err("iot id is required");
    assert!(err.to_string().contains("iot_id"));

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SPOOL_ENDPOINT_URL", "http://127.0.0.1:9000/upload");
    std::env::set_var("SPOOL_USER_ID", USER_ID);
    std::env::set_var("SPOOL_IOT_ID", IOT_ID);

    std::env::set_var("SPOOL_RETENTION_SECS", "an hour");
    assert!(SpoolConfig::load().is_err());

    std::env::set_var("SPOOL_RETENTION_SECS", "0");
    assert!(SpoolConfig::load().is_err());
    std::env::remove_var("SPOOL_RETENTION_SECS");

    std::env::set_var("SPOOL_LATITUDE", "91");
    assert!(SpoolConfig::load().is_err());
    std::env::remove_var("SPOOL_LATITUDE");

    std::env::set_var("SPOOL_ENDPOINT_URL", "ftp://collector.example/upload");
    assert!(SpoolConfig::load().is_err());

    clear_env();
}

#[test]
fn rejects_negative_duplicate_tolerance() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".json").tempfile().expect("temp config");
    let json = format!(
        r#"{{
            "location": {{ "duplicate_tolerance": -1.0 }},
            "endpoint": {{ "url": "http://localhost/upload", "user_id": "{}", "iot_id": "{}" }}
        }}"#,
        USER_ID, IOT_ID
    );
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    let err = SpoolConfig::load_from(Some(file.path())).expect_err("negative tolerance");
    assert!(err.to_string().contains("tolerance"));

    clear_env();
}
