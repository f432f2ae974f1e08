#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]
//! End-to-end scenarios against a scripted transport: record mutations,
//! cache read-through and invalidation, version snapshots and restore,
//! offline mode, and profile isolation.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;

use common::{failed, ok, MockTransport};
use desec_desk_client::{ApiError, HttpMethod, Transport};
use desec_desk_core::config::Settings;
use desec_desk_core::facade::TransportFactory;
use desec_desk_core::{CoreError, CoreEvent, DeskCore, DeskCoreBuilder, ItemStatus, QueueItem};

type EventRx = mpsc::UnboundedReceiver<CoreEvent>;

fn test_settings() -> Settings {
    Settings {
        // No periodic probes: tests drive every request explicitly.
        keepalive_interval_secs: 0,
        ..Settings::default()
    }
}

fn build_core(transport: &Arc<MockTransport>) -> (DeskCore, EventRx, tempfile::TempDir) {
    let tmp = tempfile::tempdir().unwrap();
    let config_dir = tmp.path().join("profiles").join("default");
    std::fs::create_dir_all(&config_dir).unwrap();
    test_settings().save(&config_dir.join("config.json")).unwrap();

    let shared = Arc::clone(transport);
    let factory: TransportFactory = Box::new(move |_, _| -> Arc<dyn Transport> { shared.clone() });
    let core = DeskCoreBuilder::new()
        .root(tmp.path().to_path_buf())
        .transport_factory(factory)
        .build()
        .unwrap();
    let rx = core.events().unwrap();
    (core, rx, tmp)
}

async fn wait_finished<F>(rx: &mut EventRx, pred: F) -> QueueItem
where
    F: Fn(&QueueItem) -> bool,
{
    tokio::time::timeout(Duration::from_secs(600), async {
        loop {
            if let CoreEvent::ItemFinished(item) = rx.recv().await.expect("event channel closed") {
                if pred(&item) {
                    return item;
                }
            }
        }
    })
    .await
    .expect("timed out waiting for a queue item")
}

async fn wait_notify(rx: &mut EventRx, title: &str) -> String {
    tokio::time::timeout(Duration::from_secs(600), async {
        loop {
            if let CoreEvent::Notify {
                title: got,
                message,
                ..
            } = rx.recv().await.expect("event channel closed")
            {
                if got == title {
                    return message;
                }
            }
        }
    })
    .await
    .expect("timed out waiting for a notification")
}

fn a_record() -> serde_json::Value {
    json!({"subname": "www", "type": "A", "ttl": 3600, "records": ["1.2.3.4"]})
}

const RRSETS: &str = "GET /domains/example.com/rrsets/";

#[tokio::test(start_paused = true)]
async fn create_record_populates_cache_and_snapshot() {
    let transport = Arc::new(MockTransport::new());
    let (core, mut rx, _tmp) = build_core(&transport);

    transport.script("POST /domains/example.com/rrsets/", ok(a_record()));
    transport.script(RRSETS, ok(json!([a_record()])));

    core.create_rrset("example.com", "www", "A", 3600, &["1.2.3.4".to_string()])
        .await
        .unwrap();

    let created = wait_finished(&mut rx, |i| i.action.starts_with("Create A record")).await;
    assert_eq!(created.status, ItemStatus::Ok);

    // The mutation triggers an automatic re-sync of the zone's records.
    let sync = wait_finished(&mut rx, |i| i.action.starts_with("Sync after:")).await;
    assert_eq!(sync.status, ItemStatus::Ok);

    // The next read is served from L1, with no further HTTP traffic.
    let records = core.records("example.com").await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].records, vec!["1.2.3.4"]);
    assert_eq!(transport.call_count(RRSETS), 1);

    // A snapshot capturing the new RRset was appended.
    let snapshots = core.snapshots("example.com").await.unwrap();
    assert_eq!(snapshots.len(), 1);
    let entry = core
        .read_snapshot("example.com", &snapshots[0].hash)
        .await
        .unwrap();
    assert_eq!(entry.state.len(), 1);
    assert_eq!(entry.state[0].records, vec!["1.2.3.4"]);
}

#[tokio::test(start_paused = true)]
async fn duplicate_rrset_fails_verbatim_without_snapshot() {
    let transport = Arc::new(MockTransport::new());
    let (core, mut rx, _tmp) = build_core(&transport);

    // First create succeeds and snapshots.
    transport.script("POST /domains/example.com/rrsets/", ok(a_record()));
    transport.script(RRSETS, ok(json!([a_record()])));
    core.create_rrset("example.com", "www", "A", 3600, &["1.2.3.4".to_string()])
        .await
        .unwrap();
    wait_finished(&mut rx, |i| i.action.starts_with("Sync after:")).await;
    assert_eq!(core.snapshots("example.com").await.unwrap().len(), 1);

    // Second create hits the duplicate-RRset conflict.
    let message = "Another RRset with the same subdomain and type exists for this domain.";
    transport.script(
        "POST /domains/example.com/rrsets/",
        failed(ApiError::ClientError {
            status: 400,
            message: message.to_string(),
            raw: None,
        }),
    );
    core.create_rrset("example.com", "www", "A", 3600, &["1.2.3.4".to_string()])
        .await
        .unwrap();

    let dup = wait_finished(&mut rx, |i| i.status == ItemStatus::Failed).await;
    assert_eq!(dup.error.as_deref(), Some(message));

    // No re-sync, no new snapshot after a failed mutation.
    assert_eq!(transport.call_count(RRSETS), 1);
    assert_eq!(core.snapshots("example.com").await.unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn low_ttl_is_rejected_locally() {
    let transport = Arc::new(MockTransport::new());
    let (core, _rx, _tmp) = build_core(&transport);

    let err = core
        .create_rrset("example.com", "www", "A", 60, &["1.2.3.4".to_string()])
        .await
        .unwrap_err();
    match err {
        CoreError::Validation(v) => {
            assert_eq!(v.index, 0);
            assert_eq!(v.reason, "ttl<3600");
        }
        other => panic!("expected validation error, got {other}"),
    }
    // Nothing reached the network.
    assert!(transport.calls.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn unsupported_type_is_rejected_locally() {
    let transport = Arc::new(MockTransport::new());
    let (core, _rx, _tmp) = build_core(&transport);

    let err = core
        .create_rrset("example.com", "", "RRSIG", 3600, &["x".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));
    assert!(transport.calls.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn cold_read_warms_cache_through_refresh() {
    let transport = Arc::new(MockTransport::new());
    let (core, mut rx, _tmp) = build_core(&transport);
    transport.script(RRSETS, ok(json!([a_record()])));

    // Cold start: a miss that enqueues the fetch.
    assert!(core.records("example.com").await.is_none());
    wait_finished(&mut rx, |i| i.action.starts_with("Load records")).await;

    // Warm: served from memory, still exactly one HTTP call.
    assert!(core.records("example.com").await.is_some());
    assert!(core.records("example.com").await.is_some());
    assert_eq!(transport.call_count(RRSETS), 1);
}

#[tokio::test(start_paused = true)]
async fn zones_read_through() {
    let transport = Arc::new(MockTransport::new());
    let (core, mut rx, _tmp) = build_core(&transport);
    transport.script("GET /domains/", ok(json!([{"name": "example.com"}])));

    assert!(core.zones().await.is_none());
    wait_finished(&mut rx, |i| i.action == "Load zone list").await;

    let zones = core.zones().await.unwrap();
    assert_eq!(zones.len(), 1);
    assert_eq!(zones[0].name, "example.com");
    assert_eq!(transport.call_count("GET /domains/"), 1);
}

#[tokio::test(start_paused = true)]
async fn offline_mode_holds_work_until_resume() {
    let transport = Arc::new(MockTransport::new());
    let (core, mut rx, _tmp) = build_core(&transport);

    core.set_offline(true).await.unwrap();
    assert!(core.paused().await);
    assert!(!core.online().await);

    core.create_rrset("example.com", "www", "A", 3600, &["1.2.3.4".to_string()])
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(core.queue_snapshot().await.pending.len(), 1);
    assert!(transport.calls.lock().unwrap().is_empty());

    // Going online resumes the queue and probes connectivity first.
    transport.script("POST /domains/example.com/rrsets/", ok(a_record()));
    core.set_offline(false).await.unwrap();
    assert!(!core.paused().await);

    let probe = wait_finished(&mut rx, |i| i.action == "Connectivity check").await;
    assert_eq!(probe.status, ItemStatus::Ok);
    let created = wait_finished(&mut rx, |i| i.action.starts_with("Create A record")).await;
    assert_eq!(created.status, ItemStatus::Ok);
}

#[tokio::test(start_paused = true)]
async fn rejected_token_raises_reauthentication_notice() {
    let transport = Arc::new(MockTransport::new());
    let (core, mut rx, _tmp) = build_core(&transport);
    transport.script("GET /domains/", failed(ApiError::Unauthenticated));

    assert!(core.zones().await.is_none());
    let message = wait_notify(&mut rx, "Authentication failed").await;
    assert!(message.contains("re-authenticate"));
}

#[tokio::test(start_paused = true)]
async fn restore_emits_single_bulk_put_with_tombstones() {
    let transport = Arc::new(MockTransport::new());
    let (core, mut rx, _tmp) = build_core(&transport);

    // State A on the server.
    transport.script(RRSETS, ok(json!([a_record()])));
    let _ = core.records("example.com").await;
    wait_finished(&mut rx, |i| i.action.starts_with("Load records")).await;
    let h1 = core.snapshots("example.com").await.unwrap()[0].hash.clone();

    // Mutate to state B: changed A record plus an extra TXT RRset.
    let state_b = json!([
        {"subname": "www", "type": "A", "ttl": 3600, "records": ["9.9.9.9"]},
        {"subname": "extra", "type": "TXT", "ttl": 3600, "records": ["\"later\""]},
    ]);
    transport.script("POST /domains/example.com/rrsets/", ok(json!({})));
    transport.script(RRSETS, ok(state_b));
    core.create_rrset("example.com", "extra", "TXT", 3600, &["\"later\"".to_string()])
        .await
        .unwrap();
    wait_finished(&mut rx, |i| i.action.starts_with("Sync after:")).await;
    assert_eq!(core.snapshots("example.com").await.unwrap().len(), 2);

    // Restore to the first snapshot.
    transport.script("PUT /domains/example.com/rrsets/", ok(json!([])));
    transport.script(RRSETS, ok(json!([a_record()])));
    core.restore("example.com", &h1).await.unwrap();

    let put = wait_finished(&mut rx, |i| i.request.method == HttpMethod::Put).await;
    assert_eq!(put.status, ItemStatus::Ok);

    // One bulk PUT: the captured RRset restored, the extra one tombstoned.
    let calls = transport.calls.lock().unwrap();
    let body = calls
        .iter()
        .find(|r| r.method == HttpMethod::Put)
        .and_then(|r| r.body.clone())
        .unwrap();
    drop(calls);
    let entries = body.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    let www = entries.iter().find(|e| e["subname"] == "www").unwrap();
    assert_eq!(www["records"][0], "1.2.3.4");
    let extra = entries.iter().find(|e| e["subname"] == "extra").unwrap();
    assert_eq!(extra["records"].as_array().unwrap().len(), 0);

    // The follow-up sync converges the cache back to the captured state.
    wait_finished(&mut rx, |i| i.action.starts_with("Sync after: Restore")).await;
    let records = core.records("example.com").await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].records, vec!["1.2.3.4"]);
}

#[tokio::test(start_paused = true)]
async fn bulk_delete_continues_past_failures_and_summarises() {
    let transport = Arc::new(MockTransport::new());
    let (core, mut rx, _tmp) = build_core(&transport);

    transport.script(
        "DELETE /domains/example.com/rrsets/bad/A/",
        failed(ApiError::ClientError {
            status: 404,
            message: "Not found.".to_string(),
            raw: None,
        }),
    );
    // The other two deletes succeed with the default outcome.

    let group = core
        .bulk_delete_rrsets(
            "example.com",
            &[
                ("one".to_string(), "A".to_string()),
                ("bad".to_string(), "A".to_string()),
                ("two".to_string(), "TXT".to_string()),
            ],
        )
        .await
        .unwrap();

    let summary = tokio::time::timeout(Duration::from_secs(600), async {
        loop {
            if let CoreEvent::BulkCompleted(summary) =
                rx.recv().await.expect("event channel closed")
            {
                return summary;
            }
        }
    })
    .await
    .expect("timed out waiting for the bulk summary");

    assert_eq!(summary.group, group);
    assert_eq!(summary.success_count, 2);
    assert_eq!(summary.failed_count, 1);
    assert!(summary.failures[0].action.contains("bad"));
    assert_eq!(summary.failures[0].reason, "Not found.");
}

#[tokio::test(start_paused = true)]
async fn profiles_are_isolated() {
    let transport = Arc::new(MockTransport::new());
    let (core, mut rx, tmp) = build_core(&transport);

    // Populate the default profile's cache.
    transport.script(RRSETS, ok(json!([a_record()])));
    let _ = core.records("example.com").await;
    wait_finished(&mut rx, |i| i.action.starts_with("Load records")).await;
    let default_cache = tmp
        .path()
        .join("profiles")
        .join("default")
        .join("cache")
        .join("records_example_com.bin");
    assert!(default_cache.exists());

    // Switch to a fresh profile: nothing carries over.
    core.create_profile("work", "Work").unwrap();
    core.switch_profile("work").await.unwrap();
    assert_eq!(core.active_profile().await, "work");
    assert!(core.records("example.com").await.is_none());
    assert!(core.snapshots("example.com").await.unwrap().is_empty());

    // Settings diverge without touching the default profile's file.
    core.set_rate(5.0).await.unwrap();
    let work = Settings::load(
        &tmp.path()
            .join("profiles")
            .join("work")
            .join("config.json"),
    );
    let default = Settings::load(
        &tmp.path()
            .join("profiles")
            .join("default")
            .join("config.json"),
    );
    assert_eq!(work.api_rate_limit, 5.0);
    assert_eq!(default.api_rate_limit, 2.0);

    // The default profile's cache file is untouched.
    assert!(default_cache.exists());
}

#[tokio::test(start_paused = true)]
async fn sealed_token_round_trips_through_config() {
    let transport = Arc::new(MockTransport::new());
    let (core, _rx, tmp) = build_core(&transport);

    core.set_auth_token("my-secret-token").await.unwrap();

    let config_path = tmp
        .path()
        .join("profiles")
        .join("default")
        .join("config.json");
    let text = std::fs::read_to_string(&config_path).unwrap();
    // The plaintext never lands on disk.
    assert!(!text.contains("my-secret-token"));

    let settings = Settings::load(&config_path);
    let sealed = settings.sealed_token.expect("token must be sealed");
    let salt = std::fs::read(
        tmp.path()
            .join("profiles")
            .join("default")
            .join("salt"),
    )
    .unwrap();
    let token = desec_desk_core::credentials::unseal(
        &sealed,
        &desec_desk_core::credentials::machine_passphrase(),
        &salt,
    )
    .unwrap();
    assert_eq!(token, "my-secret-token");
}
