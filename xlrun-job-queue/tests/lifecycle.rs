use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Map;
use uuid::Uuid;
use xlrun_job_queue::{
    async_trait, ExecutionError, Job, JobProgress, JobQueue, JobRunner, JobStatus, QueueSettings,
};

/// Writes a marker named after the job into its workspace and tracks concurrency.
#[derive(Default)]
struct RecordingRunner {
    active: AtomicUsize,
    max_active: AtomicUsize,
    order: Mutex<Vec<Uuid>>,
}

#[async_trait]
impl JobRunner for RecordingRunner {
    async fn run(&self, job: &Job, progress: &JobProgress) -> Result<i32, ExecutionError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        self.order.lock().unwrap().push(job.id);

        progress.report(50, "executing").await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        tokio::fs::write(job.work_dir().join(format!("{}.out", job.id)), b"ok")
            .await
            .map_err(ExecutionError::io)?;

        self.active.fetch_sub(1, Ordering::SeqCst);
        let code = job
            .options
            .get("exit_code")
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        Ok(code as i32)
    }
}

fn fast_settings() -> QueueSettings {
    QueueSettings::default()
        .with_poll_interval(Duration::from_millis(20))
        .with_reap_interval(Duration::from_secs(3600))
}

fn new_job(root: &Path, session_id: Uuid, options: Map<String, serde_json::Value>) -> Job {
    let id = Uuid::new_v4();
    let work_dir = root.join("jobs").join(id.to_string());
    std::fs::create_dir_all(&work_dir).expect("create work dir");
    Job::with_id(id, session_id, options, work_dir)
}

async fn wait_terminal(queue: &JobQueue, id: Uuid) -> Job {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let Some(job) = queue.get(id).await {
                if job.status.is_terminal() {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("job did not finish in time")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn jobs_run_one_at_a_time_in_fifo_order() {
    let root = tempfile::tempdir().unwrap();
    let runner = Arc::new(RecordingRunner::default());
    let queue = JobQueue::new(runner.clone(), fast_settings());
    queue.start().unwrap();

    let session = Uuid::new_v4();
    let mut ids = Vec::new();
    for _ in 0..4 {
        let id = queue
            .enqueue(new_job(root.path(), session, Map::new()))
            .await
            .unwrap();
        ids.push(id);
    }

    // At no observed instant is more than one job running.
    for _ in 0..10 {
        let running = queue
            .list()
            .await
            .into_iter()
            .filter(|j| j.status == JobStatus::Running)
            .count();
        assert!(running <= 1, "observed {running} running jobs");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let mut finished = Vec::new();
    for id in &ids {
        finished.push(wait_terminal(&queue, *id).await);
    }

    assert_eq!(runner.max_active.load(Ordering::SeqCst), 1);
    assert_eq!(*runner.order.lock().unwrap(), ids);
    for pair in finished.windows(2) {
        assert!(pair[0].started_at.unwrap() <= pair[1].started_at.unwrap());
    }
    for job in &finished {
        assert_eq!(job.status, JobStatus::Succeeded);
        assert!(job.started_at.is_some());
        assert!(job.finished_at.is_some());
    }

    queue.shutdown().await;
}

#[tokio::test]
async fn exit_codes_map_to_terminal_status() {
    let root = tempfile::tempdir().unwrap();
    let queue = JobQueue::new(Arc::new(RecordingRunner::default()), fast_settings());
    queue.start().unwrap();

    let mut failing = Map::new();
    failing.insert("exit_code".to_string(), 2.into());
    let ok = queue
        .enqueue(new_job(root.path(), Uuid::new_v4(), Map::new()))
        .await
        .unwrap();
    let bad = queue
        .enqueue(new_job(root.path(), Uuid::new_v4(), failing))
        .await
        .unwrap();

    assert_eq!(wait_terminal(&queue, ok).await.status, JobStatus::Succeeded);
    let bad = wait_terminal(&queue, bad).await;
    assert_eq!(bad.status, JobStatus::Failed);
    assert!(bad.message.contains('2'), "message: {}", bad.message);

    queue.shutdown().await;
}

#[tokio::test]
async fn queued_jobs_have_no_timestamps() {
    let root = tempfile::tempdir().unwrap();
    // Not started: the job stays queued.
    let queue = JobQueue::new(Arc::new(RecordingRunner::default()), fast_settings());
    let id = queue
        .enqueue(new_job(root.path(), Uuid::new_v4(), Map::new()))
        .await
        .unwrap();

    let job = queue.get(id).await.unwrap();
    assert_eq!(job.status, JobStatus::Queued);
    assert!(job.started_at.is_none());
    assert!(job.finished_at.is_none());
    assert_eq!(queue.pending(), 1);
}

#[tokio::test]
async fn zero_ttl_job_is_reclaimed_after_one_tick() {
    let root = tempfile::tempdir().unwrap();
    let settings = fast_settings().with_ttl(Duration::ZERO);
    let queue = JobQueue::new(Arc::new(RecordingRunner::default()), settings);
    queue.start().unwrap();

    let job = new_job(root.path(), Uuid::new_v4(), Map::new());
    let work_dir = job.work_dir().to_path_buf();
    let id = queue.enqueue(job).await.unwrap();
    wait_terminal(&queue, id).await;

    tokio::time::sleep(Duration::from_millis(5)).await;
    let report = queue.reap_expired().await;
    assert_eq!(report.removed, 1);
    assert!(queue.get(id).await.is_none());
    assert!(!work_dir.exists());

    // A second tick finds nothing to do.
    assert_eq!(queue.reap_expired().await.removed, 0);
    queue.shutdown().await;
}

#[tokio::test]
async fn background_reaper_evicts_expired_jobs() {
    let root = tempfile::tempdir().unwrap();
    let settings = QueueSettings::default()
        .with_ttl(Duration::ZERO)
        .with_poll_interval(Duration::from_millis(20))
        .with_reap_interval(Duration::from_millis(50));
    let queue = JobQueue::new(Arc::new(RecordingRunner::default()), settings);
    queue.start().unwrap();

    let job = new_job(root.path(), Uuid::new_v4(), Map::new());
    let work_dir = job.work_dir().to_path_buf();
    let id = queue.enqueue(job).await.unwrap();

    tokio::time::timeout(Duration::from_secs(10), async {
        while queue.get(id).await.is_some() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("job was not reclaimed");
    assert!(!work_dir.exists());
    queue.shutdown().await;
}

#[tokio::test]
async fn same_session_jobs_write_to_disjoint_workspaces() {
    let root = tempfile::tempdir().unwrap();
    let queue = JobQueue::new(Arc::new(RecordingRunner::default()), fast_settings());
    queue.start().unwrap();

    let session = Uuid::new_v4();
    let a = queue
        .enqueue(new_job(root.path(), session, Map::new()))
        .await
        .unwrap();
    let b = queue
        .enqueue(new_job(root.path(), session, Map::new()))
        .await
        .unwrap();

    let job_a = wait_terminal(&queue, a).await;
    let job_b = wait_terminal(&queue, b).await;
    assert_ne!(job_a.work_dir(), job_b.work_dir());

    for (job, other) in [(&job_a, &job_b), (&job_b, &job_a)] {
        let names: Vec<String> = std::fs::read_dir(job.work_dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.contains(&format!("{}.out", job.id)));
        assert!(!names.contains(&format!("{}.out", other.id)));
    }
    queue.shutdown().await;
}

#[tokio::test]
async fn finished_job_can_be_deleted_explicitly() {
    let root = tempfile::tempdir().unwrap();
    let queue = JobQueue::new(Arc::new(RecordingRunner::default()), fast_settings());
    queue.start().unwrap();

    let job = new_job(root.path(), Uuid::new_v4(), Map::new());
    let work_dir = job.work_dir().to_path_buf();
    let id = queue.enqueue(job).await.unwrap();
    wait_terminal(&queue, id).await;

    let deleted = queue.delete(id).await.expect("delete finished job");
    assert_eq!(deleted.status, JobStatus::Succeeded, "status is not relabelled");
    assert!(queue.get(id).await.is_none());
    assert!(!work_dir.exists());
    queue.shutdown().await;
}
