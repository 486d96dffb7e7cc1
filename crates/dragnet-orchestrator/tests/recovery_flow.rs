//! Worker-restart recovery: stale-claim sweep and stale main-task requeue.

use std::sync::Arc;

use chrono::{Duration, Utc};
use dragnet_core::{MainTask, MainTaskStatus, SubTaskSpec, TaskStatusRecord};
use dragnet_orchestrator::{recovery_score, queue_score, RecoveryService, Scheduler};
use dragnet_state::{keys, ControlStore, MemoryControlStore, MemoryScanStore, ScanStore};

struct Fixture {
    control: Arc<MemoryControlStore>,
    scan: Arc<MemoryScanStore>,
    scheduler: Arc<Scheduler>,
    recovery: RecoveryService,
}

fn fixture() -> Fixture {
    let control = Arc::new(MemoryControlStore::new());
    let scan = Arc::new(MemoryScanStore::new());
    let scheduler = Arc::new(Scheduler::new(control.clone() as Arc<dyn ControlStore>));
    let recovery = RecoveryService::new(scheduler.clone(), scan.clone() as Arc<dyn ScanStore>);
    Fixture {
        control,
        scan,
        scheduler,
        recovery,
    }
}

async fn stale_started_task(scan: &MemoryScanStore, id: &str, targets: &str) -> MainTask {
    let mut task = MainTask::new(id, "w1", "scan", targets, r#"{"batchSize":1}"#);
    task.status = MainTaskStatus::Started;
    task.sub_task_count = targets.lines().count() as u32;
    task.update_time = Utc::now() - Duration::minutes(15);
    scan.insert_main_task(&task).await.unwrap();
    // insert_main_task stores the record as-is, including the old timestamp
    task
}

#[tokio::test]
async fn stale_main_task_is_reset_and_requeued_with_boost() {
    let f = fixture();
    stale_started_task(&f.scan, "m1", "a.com\nb.com\nc.com\nd.com\ne.com").await;

    let recovered = f.recovery.recover("w-a").await.unwrap();
    assert_eq!(recovered.len(), 5);
    assert_eq!(recovered[0], "m1-0");
    assert_eq!(recovered[4], "m1-4");

    let main = f.scan.get_main_task("w1", "m1").await.unwrap().unwrap();
    assert_eq!(main.status, MainTaskStatus::Pending);
    assert_eq!(main.sub_task_done, 0);
    assert_eq!(main.sub_task_count, 5);

    // Every member carries the recovery boost: well below any fresh score.
    let now = Utc::now();
    let fresh = queue_score(1, now);
    let members = f.control.queue_members().await.unwrap();
    assert_eq!(members.len(), 5);
    for (_, score) in &members {
        assert!(*score < fresh);
        assert!(*score <= recovery_score(now));
    }
}

#[tokio::test]
async fn recovered_work_dequeues_before_fresh_work() {
    let f = fixture();
    stale_started_task(&f.scan, "m1", "a.com").await;

    // Fresh work enqueued before recovery runs.
    let fresh = SubTaskSpec {
        task_id: "fresh-0".to_string(),
        main_task_id: "fresh".to_string(),
        workspace_id: "w1".to_string(),
        task_name: "fresh".to_string(),
        config: "{}".to_string(),
        priority: 4,
        workers: vec![],
    };
    f.scheduler.push_sub_task(&fresh).await.unwrap();

    f.recovery.recover("w-a").await.unwrap();

    let popped = f.control.queue_pop_min().await.unwrap().unwrap();
    let spec: SubTaskSpec = serde_json::from_str(&popped).unwrap();
    assert_eq!(spec.main_task_id, "m1");
}

#[tokio::test]
async fn stale_claims_of_the_reporting_worker_are_cleared() {
    let f = fixture();

    // Two in-flight claims: one held by the restarting worker, one by a
    // healthy peer.
    f.control.processing_add("t-mine").await.unwrap();
    f.control.processing_add("t-theirs").await.unwrap();
    f.scheduler
        .write_status("t-mine", &TaskStatusRecord::claimed("w-a"))
        .await
        .unwrap();
    f.scheduler
        .write_status("t-theirs", &TaskStatusRecord::claimed("w-b"))
        .await
        .unwrap();

    f.recovery.recover("w-a").await.unwrap();

    let processing = f.control.processing_members().await.unwrap();
    assert_eq!(processing, vec!["t-theirs"]);
    assert!(f
        .control
        .get_string(&keys::task_status("t-mine"))
        .await
        .unwrap()
        .is_none());
    assert!(f
        .control
        .get_string(&keys::task_status("t-theirs"))
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn stale_claim_sweep_ignores_state() {
    let f = fixture();

    // Even a terminal status blob naming the reporting worker is cleared;
    // the restart proves the claim bookkeeping is stale.
    f.control.processing_add("t-done").await.unwrap();
    let mut record = TaskStatusRecord::claimed("w-a");
    record.state = dragnet_core::TaskState::Success;
    f.scheduler.write_status("t-done", &record).await.unwrap();

    f.recovery.recover("w-a").await.unwrap();
    assert!(f.control.processing_members().await.unwrap().is_empty());
}

#[tokio::test]
async fn fresh_started_tasks_are_left_alone() {
    let f = fixture();
    let mut task = MainTask::new("m-live", "w1", "scan", "a.com", "{}");
    task.status = MainTaskStatus::Started;
    task.sub_task_count = 1;
    f.scan.insert_main_task(&task).await.unwrap();

    let recovered = f.recovery.recover("w-a").await.unwrap();
    assert!(recovered.is_empty());

    let main = f.scan.get_main_task("w1", "m-live").await.unwrap().unwrap();
    assert_eq!(main.status, MainTaskStatus::Started);
    assert_eq!(f.control.queue_len().await.unwrap(), 0);
}

#[tokio::test]
async fn recovery_registers_the_worker_heartbeat() {
    let f = fixture();
    f.recovery.recover("w-a").await.unwrap();

    assert_eq!(f.control.workers().await.unwrap(), vec!["w-a"]);
    assert!(f
        .control
        .exists(&keys::worker_heartbeat("w-a"))
        .await
        .unwrap());
}
