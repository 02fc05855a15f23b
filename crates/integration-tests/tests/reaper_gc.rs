//! Node reconciliation: terminal jobs lose their machines (minus the
//! failed-job retention set) and unreferenced holds are released.

mod common;

use common::{test_config, Harness, CHANGE_REF, COMMIT, PROJECT};
use gatewatch_core::domain::{JobPatch, JobState};

async fn finished_job(h: &Harness, change_ref: &str, node_id: i64, result: &str) -> i64 {
    let id = h.queue.add_job(change_ref, PROJECT, COMMIT).await.unwrap();
    let mut job = h.job(id).await;
    job.apply(
        JobPatch {
            state: Some(JobState::Finished),
            node_id: Some(node_id),
            node_ip: Some(format!("10.0.0.{}", node_id)),
            result: Some(result.to_string()),
            ..Default::default()
        },
        h.time_now(),
    );
    h.update(&job).await;
    h.pool.hold(node_id);
    id
}

#[tokio::test]
async fn finished_jobs_lose_their_nodes() {
    let h = Harness::new().await;
    let id = finished_job(&h, CHANGE_REF, 21, "Passed").await;

    h.reaper().run_once().await.unwrap();

    let job = h.job(id).await;
    assert_eq!(job.node_id, 0);
    assert_eq!(h.pool.released_ids(), vec![21]);
}

#[tokio::test]
async fn running_jobs_keep_their_nodes() {
    let h = Harness::new().await;
    let id = h.queue.add_job(CHANGE_REF, PROJECT, COMMIT).await.unwrap();
    h.queue.trigger_jobs().await.unwrap();

    h.reaper().run_once().await.unwrap();

    assert_eq!(h.job(id).await.node_id, 7);
    assert!(h.pool.released_ids().is_empty());
}

#[tokio::test]
async fn recent_failed_jobs_are_retained_up_to_the_budget() {
    let mut config = test_config();
    config.keep_failed = 1;
    let h = Harness::with_config(config).await;

    let older = finished_job(&h, "refs/changes/61/65261/1", 21, "Failed").await;
    h.time.advance_secs(60);
    let newer = finished_job(&h, "refs/changes/62/65262/1", 22, "Failed").await;

    h.reaper().run_once().await.unwrap();

    // Only the newest failed job keeps its machine.
    assert_eq!(h.job(older).await.node_id, 0);
    assert_eq!(h.job(newer).await.node_id, 22);
    assert_eq!(h.pool.released_ids(), vec![21]);
}

#[tokio::test]
async fn retention_expires_with_the_age_window() {
    let mut config = test_config();
    config.keep_failed = 5;
    config.keep_failed_max_age_secs = 3600;
    let h = Harness::with_config(config).await;

    let id = finished_job(&h, CHANGE_REF, 21, "Failed").await;

    h.reaper().run_once().await.unwrap();
    assert_eq!(h.job(id).await.node_id, 21);

    h.time.advance_secs(3601);
    h.reaper().run_once().await.unwrap();
    assert_eq!(h.job(id).await.node_id, 0);
    assert_eq!(h.pool.released_ids(), vec![21]);
}

#[tokio::test]
async fn passed_jobs_are_never_retained() {
    let mut config = test_config();
    config.keep_failed = 5;
    let h = Harness::with_config(config).await;

    let id = finished_job(&h, CHANGE_REF, 21, "Passed").await;
    h.reaper().run_once().await.unwrap();
    assert_eq!(h.job(id).await.node_id, 0);
}

#[tokio::test]
async fn unreferenced_holds_are_released() {
    let h = Harness::new().await;
    // A hold with no job row behind it (a crash between allocate and the
    // row commit).
    h.pool.hold(99);

    assert_eq!(h.reaper().run_once().await.unwrap(), 1);
    assert_eq!(h.pool.released_ids(), vec![99]);
}

#[tokio::test]
async fn obsolete_jobs_hand_their_nodes_back() {
    let h = Harness::new().await;
    let first = h.queue.add_job(CHANGE_REF, PROJECT, COMMIT).await.unwrap();
    h.queue.trigger_jobs().await.unwrap();
    h.queue
        .add_job("refs/changes/61/65261/8", PROJECT, "decade")
        .await
        .unwrap();
    assert_eq!(h.job(first).await.state, JobState::Obsolete);

    h.reaper().run_once().await.unwrap();

    assert_eq!(h.job(first).await.node_id, 0);
    assert_eq!(h.pool.released_ids(), vec![7]);
}
