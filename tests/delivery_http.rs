mod common;

use anyhow::Result;
use chrono::{TimeZone, Utc};
use std::time::Duration;

use capture_spool::{
    Capture, CaptureMetadata, Deliver, DeliveryOutcome, FailureReason, HttpDeliveryClient,
};
use common::{closed_addr, Reply, StubEndpoint};

const USER_ID: &str = "db0372cf-f8e8-47c5-a547-08e86fb48437";
const IOT_ID: &str = "378168a4-5867-48e6-ae54-a625755e978b";

fn sample_capture() -> Capture {
    let created_at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let metadata = CaptureMetadata::new(USER_ID, IOT_ID, 37.7749, -122.4194, created_at);
    Capture::new(vec![0xFF, 0xD8, 0x01, 0x02, 0xFF, 0xD9], metadata)
}

#[test]
fn confirmed_when_endpoint_reports_status_200() -> Result<()> {
    let endpoint = StubEndpoint::start(vec![Reply::status(200)])?;
    let client = HttpDeliveryClient::new(endpoint.url(), Duration::from_secs(5))?;
    assert_eq!(client.url(), endpoint.url());

    assert_eq!(client.submit(&sample_capture()), DeliveryOutcome::Confirmed);

    let requests = endpoint.finish()?;
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert!(request.starts_with("POST /functions/v1/uploadData"));
    assert!(request.to_lowercase().contains("content-type: multipart/form-data"));
    for field in ["userid", "latitude", "longitude", "description", "is_iot", "iot_id"] {
        assert!(
            request.contains(&format!("name=\"{}\"", field)),
            "missing form field {}",
            field
        );
    }
    assert!(request.contains(USER_ID));
    assert!(request.contains(IOT_ID));
    assert!(request.contains("Automated report from IoT device"));
    assert!(request.contains("filename=\"image.jpg\""));
    assert!(request.to_lowercase().contains("content-type: image/jpeg"));
    Ok(())
}

#[test]
fn rejected_when_body_status_is_not_200() -> Result<()> {
    let endpoint = StubEndpoint::start(vec![Reply::status(500)])?;
    let client = HttpDeliveryClient::new(endpoint.url(), Duration::from_secs(5))?;

    match client.submit(&sample_capture()) {
        DeliveryOutcome::Failed(FailureReason::RemoteRejection(_)) => {}
        other => panic!("expected remote rejection, got {:?}", other),
    }
    endpoint.finish()?;
    Ok(())
}

#[test]
fn rejected_on_http_error_status() -> Result<()> {
    let endpoint = StubEndpoint::start(vec![Reply::http(503)])?;
    let client = HttpDeliveryClient::new(endpoint.url(), Duration::from_secs(5))?;

    match client.submit(&sample_capture()) {
        DeliveryOutcome::Failed(FailureReason::RemoteRejection(_)) => {}
        other => panic!("expected remote rejection, got {:?}", other),
    }
    endpoint.finish()?;
    Ok(())
}

#[test]
fn rejected_when_body_is_not_json() -> Result<()> {
    let endpoint = StubEndpoint::start(vec![Reply::Json {
        http_status: 200,
        body: "<html>gateway</html>".to_string(),
    }])?;
    let client = HttpDeliveryClient::new(endpoint.url(), Duration::from_secs(5))?;

    assert!(!client.submit(&sample_capture()).is_confirmed());
    endpoint.finish()?;
    Ok(())
}

#[test]
fn transport_failure_when_nothing_listens() -> Result<()> {
    let url = format!("http://{}/upload", closed_addr()?);
    let client = HttpDeliveryClient::new(url, Duration::from_secs(2))?;

    match client.submit(&sample_capture()) {
        DeliveryOutcome::Failed(FailureReason::TransportFailure(_)) => {}
        other => panic!("expected transport failure, got {:?}", other),
    }
    Ok(())
}

#[test]
fn timeout_when_endpoint_stalls() -> Result<()> {
    let endpoint = StubEndpoint::start(vec![Reply::Stall(Duration::from_millis(1500))])?;
    let client = HttpDeliveryClient::new(endpoint.url(), Duration::from_millis(300))?;

    assert_eq!(
        client.submit(&sample_capture()),
        DeliveryOutcome::Failed(FailureReason::Timeout)
    );
    endpoint.finish()?;
    Ok(())
}
