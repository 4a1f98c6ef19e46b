//! End-to-end tests for submission, admission, harvesting and queries.


use std::time::Duration;

use mockge::query::{Accounting, UserFilter};
use mockge::scheduler::JobState;
use test_harness::TestEngine;

const TIMEOUT: Duration = Duration::from_secs(20);

#[tokio::test]
async fn test_five_jobs_with_two_slots() {
    let mut t = TestEngine::new(2).await;
    let gates = ["g1", "g2", "g3", "g4", "g5"];

    let mut ids = Vec::new();
    for gate in gates {
        ids.push(t.submit(t.gated(gate)).await);
        assert!(t.count(JobState::Running).await <= 2);
    }

    assert_eq!(t.count(JobState::Running).await, 2);
    assert_eq!(t.count(JobState::Queued).await, 3);
    assert_eq!(t.job_state(ids[0]).await, JobState::Running);
    assert_eq!(t.job_state(ids[1]).await, JobState::Running);

    t.release("g1");
    t.release("g2");
    let admitted = t.wait_for_completion(&ids[..2], TIMEOUT).await;
    assert_eq!(admitted, vec![ids[2], ids[3]]);

    assert_eq!(t.job_state(ids[2]).await, JobState::Running);
    assert_eq!(t.job_state(ids[3]).await, JobState::Running);
    assert_eq!(t.job_state(ids[4]).await, JobState::Queued);
    assert_eq!(t.count(JobState::Running).await, 2);

    t.drain(&gates).await;
}

#[tokio::test]
async fn test_running_count_never_exceeds_ceiling() {
    let mut t = TestEngine::new(3).await;
    let mut ids = Vec::new();
    for i in 0..8 {
        ids.push(t.submit(t.job([format!("sleep 0.{}", i % 3 + 1)])).await);
        assert!(t.count(JobState::Running).await <= 3);
    }

    let start = tokio::time::Instant::now();
    while t.count(JobState::Completed).await < ids.len() {
        t.engine.reconcile().await.unwrap();
        assert!(t.count(JobState::Running).await <= 3);
        assert!(start.elapsed() < TIMEOUT, "jobs did not finish");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_admission_is_fifo() {
    let mut t = TestEngine::new(1).await;
    let a = t.submit(t.gated("a")).await;
    let b = t.submit(t.job(["true"])).await;
    let c = t.submit(t.job(["true"])).await;

    assert_eq!(t.job_state(a).await, JobState::Running);
    assert_eq!(t.job_state(b).await, JobState::Queued);
    assert_eq!(t.job_state(c).await, JobState::Queued);

    t.release("a");
    let admitted = t.wait_for_completion(&[a, b, c], TIMEOUT).await;
    assert_eq!(admitted, vec![b, c]);
}

#[tokio::test]
async fn test_exit_codes_are_recorded() {
    let mut t = TestEngine::new(4).await;
    let ok = t.submit(t.job(["true"])).await;
    let three = t.submit(t.job(["bash", "-c", "exit 3"])).await;
    let failed = t.submit(t.job(["false"])).await;

    t.wait_for_completion(&[ok, three, failed], TIMEOUT).await;

    assert_eq!(t.get(ok).await.exit_code, Some(0));
    assert_eq!(t.get(three).await.exit_code, Some(3));
    assert_eq!(t.get(failed).await.exit_code, Some(1));
}

#[tokio::test]
async fn test_script_exit_without_sentinel_marks_failure() {
    let mut t = TestEngine::new(1).await;
    // `exit` ends the supervision script before it writes the sentinel file.
    let id = t.submit(t.job(["exit 5"])).await;

    t.wait_for_completion(&[id], TIMEOUT).await;

    let job = t.get(id).await;
    assert_eq!(job.exit_code, Some(1));
    assert!(job.end_time.is_some());
}

#[tokio::test]
async fn test_lifecycle_fields_follow_state() {
    let mut t = TestEngine::new(1).await;
    let running = t.submit(t.gated("gate")).await;
    let queued = t.submit(t.job(["true"])).await;

    let job = t.get(queued).await;
    assert_eq!(job.state, JobState::Queued);
    assert!(job.pid.is_none());
    assert!(job.start_time.is_none());
    assert!(job.exit_code.is_none());
    assert!(job.end_time.is_none());

    let job = t.get(running).await;
    assert_eq!(job.state, JobState::Running);
    assert!(job.pid.is_some());
    assert!(job.start_time.is_some());
    assert!(job.exit_code.is_none());
    assert!(job.end_time.is_none());

    let artifacts = t.engine.state_dir().to_path_buf();
    assert!(artifacts.join(format!("__job{running}.sh")).exists());

    t.release("gate");
    t.wait_for_completion(&[running, queued], TIMEOUT).await;

    for id in [running, queued] {
        let job = t.get(id).await;
        assert_eq!(job.state, JobState::Completed);
        assert!(job.pid.is_some());
        assert_eq!(job.exit_code, Some(0));
        assert!(job.end_time.is_some());
        assert!(!artifacts.join(format!("__job{id}.sh")).exists());
        assert!(!artifacts.join(format!("__exit_code.{id}")).exists());
    }
}

#[tokio::test]
async fn test_list_excludes_completed_jobs() {
    let mut t = TestEngine::new(1).await;
    let done = t.submit(t.job(["true"])).await;
    t.wait_for_completion(&[done], TIMEOUT).await;

    let running = t.submit(t.gated("gate")).await;
    let queued = t.submit(t.job(["true"])).await;

    let jobs = t.engine.list(&UserFilter::All).await.unwrap();
    let ids: Vec<i64> = jobs.iter().map(|j| j.id).collect();
    assert_eq!(ids, vec![running, queued]);
    assert!(jobs.iter().all(|j| j.state != JobState::Completed));

    t.drain(&["gate"]).await;
    assert!(t.engine.list(&UserFilter::All).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_list_filters_by_user() {
    let mut t = TestEngine::new(2).await;
    let user = t.engine.user().to_string();
    let mine = t.submit(t.gated("gate")).await;

    let jobs = t.engine.list(&UserFilter::User(user)).await.unwrap();
    assert_eq!(jobs.iter().map(|j| j.id).collect::<Vec<_>>(), vec![mine]);

    let others = t
        .engine
        .list(&UserFilter::User("nobody-else".to_string()))
        .await
        .unwrap();
    assert!(others.is_empty());

    assert_eq!(t.engine.list(&UserFilter::parse("*")).await.unwrap().len(), 1);

    t.drain(&["gate"]).await;
}

#[tokio::test]
async fn test_submitting_user_is_recorded() {
    let state = tempfile::TempDir::new().unwrap();
    let work = tempfile::TempDir::new().unwrap();
    let config = mockge::config::EngineConfig::new(state.path()).with_queue("all.q");
    let mut engine = mockge::MockGe::open(config)
        .await
        .unwrap()
        .with_user("alice");

    let submission = engine
        .submit(
            mockge::scheduler::JobRequest::new(["sleep 0.2"]).with_working_dir(work.path()),
        )
        .await
        .unwrap();

    let alice = engine.list(&UserFilter::parse("alice")).await.unwrap();
    assert_eq!(alice.len(), 1);
    assert_eq!(alice[0].id, submission.job_id);
    assert_eq!(alice[0].user, "alice");
    assert_eq!(alice[0].queue, "all.q");
    assert!(engine.list(&UserFilter::parse("bob")).await.unwrap().is_empty());

    let start = tokio::time::Instant::now();
    while !engine.list(&UserFilter::All).await.unwrap().is_empty() {
        assert!(start.elapsed() < TIMEOUT);
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn test_accounting_outcomes() {
    let mut t = TestEngine::new(1).await;
    assert_eq!(t.engine.accounting(404).await.unwrap(), Accounting::Unavailable);

    let running = t.submit(t.gated("gate")).await;
    let queued = t.submit(t.job(["true"])).await;
    assert_eq!(t.engine.accounting(running).await.unwrap(), Accounting::Unavailable);
    assert_eq!(t.engine.accounting(queued).await.unwrap(), Accounting::Unavailable);

    t.release("gate");
    t.wait_for_completion(&[running, queued], TIMEOUT).await;

    match t.engine.accounting(running).await.unwrap() {
        Accounting::Ready { job } => {
            assert_eq!(job.id, running);
            assert_eq!(job.exit_code, Some(0));
        }
        other => panic!("expected accounting record, got {other:?}"),
    }
}

#[tokio::test]
async fn test_accounting_waits_for_delay() {
    let mut t =
        TestEngine::with_config(|config| config.with_qacct_delay(Duration::from_secs(3600))).await;
    let id = t.submit(t.job(["true"])).await;
    t.wait_for_completion(&[id], TIMEOUT).await;

    assert!(matches!(
        t.engine.accounting(id).await.unwrap(),
        Accounting::Pending { .. }
    ));
}

#[tokio::test]
async fn test_accounting_becomes_available_after_delay() {
    let mut t =
        TestEngine::with_config(|config| config.with_qacct_delay(Duration::from_millis(500))).await;
    let id = t.submit(t.job(["true"])).await;
    t.wait_for_completion(&[id], TIMEOUT).await;

    let start = tokio::time::Instant::now();
    loop {
        match t.engine.accounting(id).await.unwrap() {
            Accounting::Ready { job } => {
                assert_eq!(job.id, id);
                break;
            }
            Accounting::Pending { .. } => {}
            Accounting::Unavailable => panic!("completed job reported as unavailable"),
        }
        assert!(start.elapsed() < TIMEOUT);
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[tokio::test]
async fn test_reconcile_is_idempotent() {
    let mut t = TestEngine::new(1).await;
    let done = t.submit(t.job(["true"])).await;
    t.wait_for_completion(&[done], TIMEOUT).await;
    t.submit(t.gated("gate")).await;
    t.submit(t.job(["true"])).await;

    let before = t.all_jobs().await;
    for _ in 0..3 {
        let report = t.engine.reconcile().await.unwrap();
        assert!(report.is_empty());
    }
    assert_eq!(t.all_jobs().await, before);

    t.drain(&["gate"]).await;
}

#[tokio::test]
async fn test_jobs_persist_across_reopen() {
    let state = tempfile::TempDir::new().unwrap();
    let work = tempfile::TempDir::new().unwrap();
    let config = mockge::config::EngineConfig::new(state.path()).with_qacct_delay(Duration::ZERO);

    let id = {
        let mut engine = mockge::MockGe::open(config.clone()).await.unwrap();
        let id = engine
            .submit(mockge::scheduler::JobRequest::new(["true"]).with_working_dir(work.path()))
            .await
            .unwrap()
            .job_id;
        let start = tokio::time::Instant::now();
        while engine.store().get(id).await.unwrap().unwrap().state != JobState::Completed {
            engine.reconcile().await.unwrap();
            assert!(start.elapsed() < TIMEOUT);
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        engine.close().await;
        id
    };

    let mut engine = mockge::MockGe::open(config).await.unwrap();
    assert!(matches!(
        engine.accounting(id).await.unwrap(),
        Accounting::Ready { .. }
    ));
}
