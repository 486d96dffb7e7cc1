//! Contract tests for the store traits, run against the in-memory
//! implementations. The Redis backend must honour the same guarantees; these
//! tests document them.

use chrono::{Duration as ChronoDuration, Utc};
use dragnet_core::{Asset, MainTask, MainTaskStatus, Vulnerability};
use dragnet_state::{ControlStore, MemoryControlStore, MemoryScanStore, ScanStore};

fn vuln(host: &str, poc: &str, url: &str) -> Vulnerability {
    Vulnerability {
        workspace_id: "w1".to_string(),
        host: host.to_string(),
        port: 80,
        authority: format!("{host}:80"),
        url: url.to_string(),
        poc_file: poc.to_string(),
        source: "nuclei".to_string(),
        severity: "high".to_string(),
        cvss_score: 8.5,
        cve_id: String::new(),
        cwe_id: String::new(),
        matcher_name: "status-match".to_string(),
        extracted_results: vec![],
        curl_command: String::new(),
        request: "GET /foo".to_string(),
        response: "HTTP/1.1 200".to_string(),
        remediation: String::new(),
        references: vec![],
        task_id: "m1".to_string(),
        scan_count: 1,
        first_seen: Utc::now(),
        last_seen: Utc::now(),
    }
}

#[tokio::test]
async fn queue_pops_lowest_score_first_then_insertion_order() {
    let store = MemoryControlStore::new();
    store.queue_push("late", 300.0).await.unwrap();
    store.queue_push("early", 100.0).await.unwrap();
    store.queue_push("tie-a", 200.0).await.unwrap();
    store.queue_push("tie-b", 200.0).await.unwrap();

    assert_eq!(store.queue_pop_min().await.unwrap().as_deref(), Some("early"));
    assert_eq!(store.queue_pop_min().await.unwrap().as_deref(), Some("tie-a"));
    assert_eq!(store.queue_pop_min().await.unwrap().as_deref(), Some("tie-b"));
    assert_eq!(store.queue_pop_min().await.unwrap().as_deref(), Some("late"));
    assert_eq!(store.queue_pop_min().await.unwrap(), None);
}

#[tokio::test]
async fn pop_removes_the_member_exactly_once() {
    let store = MemoryControlStore::new();
    store.queue_push("only", 1.0).await.unwrap();
    assert!(store.queue_pop_min().await.unwrap().is_some());
    assert!(store.queue_pop_min().await.unwrap().is_none());
    assert_eq!(store.queue_len().await.unwrap(), 0);
}

#[tokio::test]
async fn take_string_is_consume_once() {
    let store = MemoryControlStore::new();
    store.put_string("task:ctrl:t1", "STOP", None).await.unwrap();

    assert_eq!(
        store.take_string("task:ctrl:t1").await.unwrap().as_deref(),
        Some("STOP")
    );
    assert_eq!(store.take_string("task:ctrl:t1").await.unwrap(), None);
}

#[tokio::test]
async fn expired_keys_behave_as_absent() {
    let store = MemoryControlStore::new();
    store
        .put_string("worker:w-a", "alive", Some(std::time::Duration::from_secs(30)))
        .await
        .unwrap();
    assert!(store.exists("worker:w-a").await.unwrap());

    store.force_expire("worker:w-a");
    assert!(!store.exists("worker:w-a").await.unwrap());
    assert_eq!(store.get_string("worker:w-a").await.unwrap(), None);
}

#[tokio::test]
async fn processing_set_dedups_and_removes() {
    let store = MemoryControlStore::new();
    store.processing_add("t1").await.unwrap();
    store.processing_add("t1").await.unwrap();
    store.processing_add("t2").await.unwrap();
    assert_eq!(store.processing_members().await.unwrap(), vec!["t1", "t2"]);

    store.processing_remove("t1").await.unwrap();
    assert_eq!(store.processing_members().await.unwrap(), vec!["t2"]);
}

#[tokio::test]
async fn vuln_upsert_inserts_then_bumps_scan_count_only() {
    let store = MemoryScanStore::new();

    let first = store.upsert_vuln(&vuln("10.0.0.1", "cve-2023-x", "/foo")).await.unwrap();
    assert!(first.inserted);
    assert_eq!(first.scan_count, 1);

    let stored = store
        .find_vuln("w1", "10.0.0.1", 80, "cve-2023-x", "/foo")
        .await
        .unwrap()
        .unwrap();
    let first_seen = stored.first_seen;

    let mut replay = vuln("10.0.0.1", "cve-2023-x", "/foo");
    replay.response = "HTTP/1.1 500".to_string();
    let second = store.upsert_vuln(&replay).await.unwrap();
    assert!(!second.inserted);
    assert_eq!(second.scan_count, 2);

    let stored = store
        .find_vuln("w1", "10.0.0.1", 80, "cve-2023-x", "/foo")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.scan_count, 2);
    assert_eq!(stored.first_seen, first_seen);
    assert!(stored.last_seen >= first_seen);
    // Latest evidence wins.
    assert_eq!(stored.response, "HTTP/1.1 500");

    // A different URL is a different row.
    store.upsert_vuln(&vuln("10.0.0.1", "cve-2023-x", "/bar")).await.unwrap();
    assert_eq!(store.count_vulns("w1").await.unwrap(), 2);
}

#[tokio::test]
async fn sub_task_done_accumulates_and_clamps() {
    let store = MemoryScanStore::new();
    let mut task = MainTask::new("m1", "w1", "scan", "10.0.0.1", "{}");
    task.status = MainTaskStatus::Started;
    task.sub_task_count = 4;
    store.insert_main_task(&task).await.unwrap();

    let t = store.record_sub_task_done("w1", "m1", 2, false).await.unwrap();
    assert_eq!(t.sub_task_done, 2);

    let t = store.record_sub_task_done("w1", "m1", 2, true).await.unwrap();
    assert_eq!(t.sub_task_done, 4);
    assert_eq!(t.sub_task_failed, 1);

    // Never exceeds the count, even on replayed terminal updates.
    let t = store.record_sub_task_done("w1", "m1", 2, false).await.unwrap();
    assert_eq!(t.sub_task_done, 4);
}

#[tokio::test]
async fn stale_started_listing_filters_by_status_and_age() {
    let store = MemoryScanStore::new();

    let mut stale = MainTask::new("m-old", "w1", "scan", "a.com", "{}");
    stale.status = MainTaskStatus::Started;
    stale.update_time = Utc::now() - ChronoDuration::minutes(15);
    store.insert_main_task(&stale).await.unwrap();

    let mut fresh = MainTask::new("m-new", "w2", "scan", "b.com", "{}");
    fresh.status = MainTaskStatus::Started;
    store.insert_main_task(&fresh).await.unwrap();

    let mut done = MainTask::new("m-done", "w1", "scan", "c.com", "{}");
    done.status = MainTaskStatus::Success;
    done.update_time = Utc::now() - ChronoDuration::minutes(30);
    store.insert_main_task(&done).await.unwrap();

    let cutoff = Utc::now() - ChronoDuration::minutes(5);
    let listed = store.list_stale_started(cutoff).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, "m-old");
}

#[tokio::test]
async fn asset_lookup_and_update() {
    let store = MemoryScanStore::new();
    let asset = Asset::new("w1", "10.0.0.1", 80);
    store.insert_asset(&asset).await.unwrap();

    let mut found = store.find_asset("w1", "10.0.0.1", 80).await.unwrap().unwrap();
    assert_eq!(found.authority, "10.0.0.1:80");

    found.raise_risk(8.5);
    store.update_asset(&found).await.unwrap();

    let reread = store.find_asset("w1", "10.0.0.1", 80).await.unwrap().unwrap();
    assert_eq!(reread.risk_score, 8.5);

    assert!(store.find_asset("w1", "10.0.0.9", 80).await.unwrap().is_none());
}
