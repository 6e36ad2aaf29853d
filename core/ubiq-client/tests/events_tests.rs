//! Event aggregation, merge identity, and flush triggers.

mod support;

use std::sync::Arc;
use std::time::Duration;
use support::*;
use ubiq_client::config::EventReportingConfig;
use ubiq_client::datasets::DatasetKind;
use ubiq_client::events::{Event, EventAction, EventAggregator};
use ubiq_client::http::SignedClient;
use ubiq_client::ClientError;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn aggregator(server: &MockServer, cfg: EventReportingConfig) -> EventAggregator {
    let creds = credentials(server);
    let http = Arc::new(SignedClient::new(&creds));
    EventAggregator::new(http, creds.host().to_string(), cfg)
}

/// Config that never flushes on its own.
fn manual_cfg() -> EventReportingConfig {
    EventReportingConfig {
        minimum_count: 1000,
        flush_interval: 3600,
        ..EventReportingConfig::default()
    }
}

fn event(dataset: &str, action: EventAction, key_number: u32) -> Event {
    Event::new(
        PAPI,
        dataset,
        "group-1",
        action,
        DatasetKind::Structured,
        key_number,
    )
}

async fn reported_usage(server: &MockServer) -> Vec<serde_json::Value> {
    let requests = server.received_requests().await.unwrap();
    requests
        .iter()
        .filter(|r| r.url.path() == "/api/v3/tracking/events")
        .flat_map(|r| {
            let body: serde_json::Value = serde_json::from_slice(&r.body).unwrap();
            body["usage"].as_array().unwrap().clone()
        })
        .collect()
}

#[tokio::test]
async fn identical_events_merge_into_one_record() {
    let server = MockServer::start().await;
    mount_tracking(&server).await;
    let agg = aggregator(&server, manual_cfg());

    agg.add_or_increment(event("ssn", EventAction::Encrypt, 0))
        .await
        .unwrap();
    agg.add_or_increment(event("ssn", EventAction::Encrypt, 0))
        .await
        .unwrap();
    agg.process(false).await.unwrap();

    let usage = reported_usage(&server).await;
    assert_eq!(usage.len(), 1);
    assert_eq!(usage[0]["count"], 2);

    let first = usage[0]["first_call_timestamp"].as_str().unwrap();
    let last = usage[0]["last_call_timestamp"].as_str().unwrap();
    assert!(last >= first);
}

#[tokio::test]
async fn differing_events_stay_separate() {
    let server = MockServer::start().await;
    mount_tracking(&server).await;
    let agg = aggregator(&server, manual_cfg());

    agg.add_or_increment(event("ssn", EventAction::Encrypt, 0))
        .await
        .unwrap();
    agg.add_or_increment(event("ssn", EventAction::Decrypt, 0))
        .await
        .unwrap();
    agg.add_or_increment(event("ssn", EventAction::Encrypt, 1))
        .await
        .unwrap();
    agg.process(false).await.unwrap();

    let usage = reported_usage(&server).await;
    assert_eq!(usage.len(), 3);
}

#[tokio::test]
async fn count_threshold_triggers_flush() {
    let server = MockServer::start().await;
    mount_tracking(&server).await;
    let cfg = EventReportingConfig {
        minimum_count: 5,
        flush_interval: 3600,
        ..EventReportingConfig::default()
    };
    let agg = aggregator(&server, cfg);

    // strict greater-than: five additions do not flush
    for i in 0..5 {
        agg.add_or_increment(event("d", EventAction::Encrypt, i))
            .await
            .unwrap();
    }
    assert!(reported_usage(&server).await.is_empty());
    assert_eq!(agg.queued_count(), 5);

    // the sixth pushes the queue over the threshold
    agg.add_or_increment(event("d", EventAction::Encrypt, 5))
        .await
        .unwrap();
    assert_eq!(reported_usage(&server).await.len(), 6);
    assert_eq!(agg.queued_count(), 0);
}

#[tokio::test]
async fn interval_elapse_triggers_flush_on_next_add() {
    let server = MockServer::start().await;
    mount_tracking(&server).await;
    let cfg = EventReportingConfig {
        minimum_count: 5,
        flush_interval: 2,
        ..EventReportingConfig::default()
    };
    let agg = aggregator(&server, cfg);

    agg.add_or_increment(event("d", EventAction::Encrypt, 0))
        .await
        .unwrap();
    assert!(reported_usage(&server).await.is_empty());

    tokio::time::sleep(Duration::from_secs(3)).await;

    agg.add_or_increment(event("d", EventAction::Decrypt, 0))
        .await
        .unwrap();
    assert_eq!(reported_usage(&server).await.len(), 2);
    assert_eq!(agg.queued_count(), 0);
}

#[tokio::test]
async fn record_shape_matches_reporting_api() {
    let server = MockServer::start().await;
    mount_tracking(&server).await;
    let agg = aggregator(&server, manual_cfg());

    agg.add_or_increment(event("ssn", EventAction::Encrypt, 2))
        .await
        .unwrap();
    agg.process(false).await.unwrap();

    let usage = reported_usage(&server).await;
    let record = &usage[0];
    assert_eq!(record["api_key"], PAPI);
    assert_eq!(record["datasets"], "ssn");
    assert_eq!(record["dataset_groups"], "group-1");
    assert_eq!(record["action"], "encrypt");
    assert_eq!(record["dataset_type"], "structured");
    assert_eq!(record["key_number"], 2);
    assert_eq!(record["count"], 1);
    assert_eq!(record["api_version"], "V3");
    assert_eq!(record["product"], "ubiq-rust");
    assert!(record["user-agent"].as_str().unwrap().starts_with("ubiq-rust/"));
    // default granularity is whole seconds, UTC
    let ts = record["first_call_timestamp"].as_str().unwrap();
    assert!(ts.ends_with('Z') && !ts.contains('.'));
    assert!(record.get("user_defined").is_none());
}

#[tokio::test]
async fn user_metadata_attaches_to_records() {
    let server = MockServer::start().await;
    mount_tracking(&server).await;
    let agg = aggregator(&server, manual_cfg());

    agg.add_user_metadata(r#"{"team": "fraud", "env": "prod"}"#)
        .unwrap();
    agg.add_or_increment(event("ssn", EventAction::Encrypt, 0))
        .await
        .unwrap();
    agg.process(false).await.unwrap();

    let usage = reported_usage(&server).await;
    assert_eq!(usage[0]["user_defined"]["team"], "fraud");
}

#[tokio::test]
async fn user_metadata_validation() {
    let server = MockServer::start().await;
    let agg = aggregator(&server, manual_cfg());

    let too_long = format!("{{\"k\": \"{}\"}}", "x".repeat(1100));
    assert!(matches!(
        agg.add_user_metadata(&too_long).unwrap_err(),
        ClientError::InputInvalid(_)
    ));
    assert!(agg.add_user_metadata("not json").is_err());
    assert!(agg.add_user_metadata("[1, 2]").is_err());
    assert!(agg.add_user_metadata("{}").is_err());
    assert!(agg.add_user_metadata("null").is_err());

    agg.add_user_metadata(r#"{"ok": true}"#).unwrap();
}

#[tokio::test]
async fn reporter_failure_propagates_unless_trapped() {
    let server = MockServer::start().await;
    // no tracking mock: the POST 404s

    let agg = aggregator(&server, manual_cfg());
    agg.add_or_increment(event("d", EventAction::Encrypt, 0))
        .await
        .unwrap();
    let err = agg.process(false).await.unwrap_err();
    assert!(matches!(err, ClientError::Kms { status: 404, .. }));

    let trapped_cfg = EventReportingConfig {
        trap_exceptions: true,
        ..manual_cfg()
    };
    let agg = aggregator(&server, trapped_cfg);
    agg.add_or_increment(event("d", EventAction::Encrypt, 0))
        .await
        .unwrap();
    agg.process(false).await.unwrap();
}

#[tokio::test]
async fn empty_queue_flush_posts_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v3/tracking/events"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let agg = aggregator(&server, manual_cfg());
    agg.process(false).await.unwrap();
}

#[tokio::test]
async fn async_flush_eventually_reports() {
    let server = MockServer::start().await;
    mount_tracking(&server).await;
    let agg = aggregator(&server, manual_cfg());

    agg.add_or_increment(event("d", EventAction::Encrypt, 0))
        .await
        .unwrap();
    agg.process(true).await.unwrap();

    for _ in 0..50 {
        if !reported_usage(&server).await.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(reported_usage(&server).await.len(), 1);
}
