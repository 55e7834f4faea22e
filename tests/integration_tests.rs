//! Integration tests for chat_dashboard library
//!
//! These tests verify the public API and module interactions.

use std::sync::Arc;

use chrono::{Duration, Utc};
use httpmock::prelude::*;
use serde_json::json;
use tempfile::TempDir;

use chat_dashboard::{
    poller::{most_recent_half_hour_mark, Trigger},
    summarize, DashboardCache, Error, FileStore, KeyValueStore, Poller, PollerConfig,
    RecordSource, WebhookClient, WebhookConfig, Window,
};

fn today_stamp(hour: u32) -> String {
    Utc::now()
        .with_timezone(&chrono::Local)
        .format(&format!("%Y-%m-%dT{:02}:00", hour))
        .to_string()
}

fn poller_for(url: String, store_path: &std::path::Path) -> Arc<Poller> {
    let mut webhook = WebhookConfig::new(url);
    webhook.timeout_secs = 2;
    let source: Arc<dyn RecordSource> = Arc::new(WebhookClient::new(webhook).unwrap());
    let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::open(store_path).unwrap());
    Arc::new(Poller::new(source, store, PollerConfig::default()))
}

// ============================================================================
// Fetch → aggregate → persist
// ============================================================================

#[tokio::test]
async fn fetch_cycle_persists_and_aggregates() {
    let server = MockServer::start_async().await;
    let mock = server.mock(|when, then| {
        when.method(GET)
            .path("/webhook/dashboard")
            .query_param("batch", "true")
            .query_param("limit", "1000")
            .query_param_exists("startTime")
            .query_param_exists("endTime");
        then.status(200).json_body(json!([
            {"Session ID": "A", "Timestamp": today_stamp(9), "Appointment Booked": true},
            {"Session ID": "A", "Timestamp": today_stamp(10), "Appointment Booked": false},
            {"Session ID": "B", "Timestamp": today_stamp(11), "Appointment Booked": "true"},
            {"Session ID": "C"},
        ]));
    });

    let dir = TempDir::new().unwrap();
    let store_path = dir.path().join("dashboard.json");
    let poller = poller_for(server.url("/webhook/dashboard"), &store_path);

    let before = Utc::now();
    let snapshot = poller
        .fetch_cycle(Window::SevenDays, Trigger::Manual)
        .await
        .unwrap();
    mock.assert_calls(1);

    assert!(!snapshot.from_cache);
    assert_eq!(snapshot.metrics.total_messages, 3);
    assert_eq!(snapshot.metrics.appointments_booked, 1);
    assert_eq!(snapshot.metrics.messages_per_booking, 3);
    assert_eq!(snapshot.series.len(), 8);
    assert_eq!(*snapshot.series.cumulative_messages.last().unwrap(), 3);
    assert_eq!(*snapshot.series.daily_bookings.last().unwrap(), 1);

    // A fresh store on the same file sees the persisted snapshot.
    let cache = DashboardCache::new(FileStore::open(&store_path).unwrap());
    let records = cache.load_records().unwrap().unwrap();
    assert_eq!(summarize(&records), snapshot.metrics);
    let mark = cache.last_updated().unwrap().unwrap();
    assert!(mark >= most_recent_half_hour_mark(&before));
    assert!(mark <= Utc::now());
}

#[tokio::test]
async fn cached_snapshot_reuses_persisted_records() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(GET).path("/hook");
        then.status(200).json_body(json!({
            "Session ID": "solo", "Timestamp": today_stamp(8), "Appointment Booked": true
        }));
    });

    let dir = TempDir::new().unwrap();
    let store_path = dir.path().join("dashboard.json");
    poller_for(server.url("/hook"), &store_path)
        .fetch_cycle(Window::SevenDays, Trigger::Manual)
        .await
        .unwrap();

    let restarted = poller_for(server.url("/hook"), &store_path);
    let cached = restarted
        .cached_snapshot(Window::NinetyDays)
        .unwrap()
        .unwrap();
    assert!(cached.from_cache);
    assert_eq!(cached.window, Window::NinetyDays);
    assert_eq!(cached.series.len(), 91);
    assert_eq!(cached.metrics.appointments_booked, 1);
}

#[tokio::test]
async fn server_error_keeps_previous_cache() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(GET).path("/down");
        then.status(503);
    });

    let dir = TempDir::new().unwrap();
    let store_path = dir.path().join("dashboard.json");
    let stale_mark = most_recent_half_hour_mark(&(Utc::now() - Duration::hours(2)));
    DashboardCache::new(FileStore::open(&store_path).unwrap())
        .store_snapshot(&[], stale_mark)
        .unwrap();

    let mut webhook = WebhookConfig::new(server.url("/down"));
    webhook.timeout_secs = 2;
    let source: Arc<dyn RecordSource> = Arc::new(WebhookClient::new(webhook).unwrap());
    let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::open(&store_path).unwrap());
    let config = PollerConfig {
        retry: chat_dashboard::poller::RetryPolicy {
            max_retries: 1,
            base_delay: std::time::Duration::from_millis(10),
        },
        ..PollerConfig::default()
    };
    let poller = Poller::new(source, store, config);

    let err = poller
        .fetch_cycle(Window::SevenDays, Trigger::Manual)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::HttpError(_)));
    assert_eq!(poller.cache().last_updated().unwrap(), Some(stale_mark));
}

#[tokio::test]
async fn placeholder_endpoint_aborts_without_request() {
    let dir = TempDir::new().unwrap();
    let poller = poller_for(
        "https://YOUR_WEBHOOK_HOST/webhook".to_string(),
        &dir.path().join("dashboard.json"),
    );
    let err = poller
        .fetch_cycle(Window::ThirtyDays, Trigger::Manual)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::EndpointNotConfigured(_)));
    assert!(poller.cache().last_updated().unwrap().is_none());
}

// ============================================================================
// Window & Error Tests
// ============================================================================

#[test]
fn test_window_selection_defaults() {
    assert_eq!(Window::parse_or_default(Some("90d")), Window::NinetyDays);
    assert_eq!(Window::parse_or_default(Some("1y")), Window::SevenDays);
    assert_eq!(Window::parse_or_default(None), Window::SevenDays);
}

#[test]
fn test_error_variants_display() {
    let errors = vec![
        Error::EndpointNotConfigured("".into()),
        Error::HttpError("503".into()),
        Error::Timeout("30s".into()),
        Error::SerializationError("eof".into()),
        Error::StoreError("locked".into()),
        Error::InvalidArgument("bad".into()),
        Error::FetchInProgress,
        Error::Cancelled,
    ];
    for err in errors {
        assert!(!err.to_string().is_empty());
    }
}
