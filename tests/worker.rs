use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Result, bail};

use mineru_relay::background::queue::{Job, job_queue};
use mineru_relay::background::registry::{JobRegistry, JobStatus};
use mineru_relay::background::worker::{WorkerContext, run_worker};
use mineru_relay::common::WORKER_FAILURE_PAUSE;
use mineru_relay::config::environment::HostEnvironment;
use mineru_relay::config::{ServiceConfig, StorageKind};
use mineru_relay::storage::{LocalStore, ObjectStore};
use tempfile::TempDir;
use tokio::sync::broadcast;

const BUCKET: &str = "docs";

// Mimics magic-pdf: `{out}/{name}/auto/` holds the markdown and a nested
// images tree. Inputs named `blank*` produce nothing, `broken*` exit nonzero.
const FAKE_MAGIC_PDF: &str = r##"#!/bin/sh
input="$2"
out="$4"
name=$(basename "$input" .pdf)
echo "processing $name"
echo "loading models" >&2
case "$name" in
  blank*) exit 0 ;;
esac
mkdir -p "$out/$name/auto/images/nested"
echo "# $name" > "$out/$name/auto/$name.md"
echo '{"pdf_info": []}' > "$out/$name/auto/${name}_middle.json"
case "$name" in
  broken*) exit 3 ;;
esac
echo "jpg" > "$out/$name/auto/images/nested/fig1.jpg"
echo "jpg" > "$out/$name/auto/images/fig2.jpg"
"##;

struct Harness {
    _dirs: Vec<TempDir>,
    storage_root: PathBuf,
    scratch_root: PathBuf,
    config: ServiceConfig,
    environment: HostEnvironment,
}

fn harness(with_executable: bool) -> Harness {
    let storage = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let home = tempfile::tempdir().unwrap();

    let install_dir = home.path().join("miniconda");
    let bin_dir = install_dir.join("envs").join("mineru").join("bin");
    std::fs::create_dir_all(&bin_dir).unwrap();
    if with_executable {
        let exe = bin_dir.join("magic-pdf");
        std::fs::write(&exe, FAKE_MAGIC_PDF).unwrap();
        std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    let config = ServiceConfig {
        storage: StorageKind::Local,
        local_storage_root: Some(storage.path().to_path_buf()),
        scratch_root: scratch.path().to_path_buf(),
        normalize_ownership: false,
        use_sudo: false,
        ..ServiceConfig::default()
    };
    let environment = HostEnvironment::from_os_release(None)
        .with_overrides(None, Some(home.path().to_path_buf()));

    Harness {
        storage_root: storage.path().to_path_buf(),
        scratch_root: scratch.path().to_path_buf(),
        _dirs: vec![storage, scratch, home],
        config,
        environment,
    }
}

fn put_object(root: &Path, key: &str) {
    let path = root.join(BUCKET).join(key);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, b"%PDF-1.7 fake").unwrap();
}

/// Panics while fetching `boom.pdf`, delegates everything else.
struct PanickingStore(LocalStore);

#[rocket::async_trait]
impl ObjectStore for PanickingStore {
    async fn download(&self, bucket: &str, key: &str, destination: &Path) -> Result<()> {
        if key.ends_with("boom.pdf") {
            panic!("storage client blew up on {}", key);
        }
        self.0.download(bucket, key, destination).await
    }

    async fn upload(&self, bucket: &str, key: &str, source: &Path) -> Result<()> {
        self.0.upload(bucket, key, source).await
    }

    async fn put_empty(&self, bucket: &str, key: &str) -> Result<()> {
        self.0.put_empty(bucket, key).await
    }
}

/// Refuses to create marker objects.
struct NoMarkerStore(LocalStore);

#[rocket::async_trait]
impl ObjectStore for NoMarkerStore {
    async fn download(&self, bucket: &str, key: &str, destination: &Path) -> Result<()> {
        self.0.download(bucket, key, destination).await
    }

    async fn upload(&self, bucket: &str, key: &str, source: &Path) -> Result<()> {
        self.0.upload(bucket, key, source).await
    }

    async fn put_empty(&self, _bucket: &str, key: &str) -> Result<()> {
        bail!("access denied for {}", key)
    }
}

fn local_store(h: &Harness) -> LocalStore {
    LocalStore::new(&h.storage_root).unwrap()
}

/// Runs every job through one worker until the queue drains.
async fn run_jobs(h: &Harness, jobs: Vec<Job>) -> Arc<JobRegistry> {
    run_jobs_on(h, Arc::new(local_store(h)), jobs).await
}

async fn run_jobs_on(h: &Harness, store: Arc<dyn ObjectStore>, jobs: Vec<Job>) -> Arc<JobRegistry> {
    let registry = Arc::new(JobRegistry::default());
    let (queue, receiver) = job_queue();
    for job in jobs {
        registry.insert_queued(&job);
        queue.submit(job).unwrap();
    }
    drop(queue);

    let ctx = WorkerContext {
        config: Arc::new(h.config.clone()),
        environment: Arc::new(h.environment.clone()),
        store,
        registry: registry.clone(),
    };
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
    run_worker(ctx, receiver, shutdown_rx).await;
    registry
}

fn scratch_leftovers(h: &Harness) -> Vec<PathBuf> {
    std::fs::read_dir(&h.scratch_root)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect()
}

#[tokio::test]
async fn successful_job_uploads_flattened_artifacts() {
    let h = harness(true);
    put_object(&h.storage_root, "reports/Annual Report.pdf");

    let job = Job::new(BUCKET, "reports/Annual%20Report.pdf", "pdf");
    let id = job.id;
    let registry = run_jobs(&h, vec![job]).await;

    let record = registry.get(&id).unwrap();
    assert_eq!(record.status, JobStatus::Succeeded);
    assert_eq!(record.uploaded, 4);

    let prefix = h.storage_root.join(BUCKET).join("output").join("Annual Report");
    assert!(prefix.join("Annual_Report.md").is_file());
    assert!(prefix.join("Annual_Report_middle.json").is_file());
    assert!(prefix.join("images").join("nested").join("fig1.jpg").is_file());
    assert!(prefix.join("images").join("fig2.jpg").is_file());
    assert!(!prefix.join("auto").exists());

    let log = std::fs::read_to_string(prefix.join("magic_pdf_execution.log")).unwrap();
    assert!(log.contains("processing Annual_Report"));
    assert!(log.contains("loading models"));

    assert!(scratch_leftovers(&h).is_empty());
}

#[tokio::test]
async fn nonzero_exit_still_uploads_and_marks_missing_images() {
    let h = harness(true);
    put_object(&h.storage_root, "broken.pdf");

    let job = Job::new(BUCKET, "broken.pdf", "pdf");
    let id = job.id;
    let registry = run_jobs(&h, vec![job]).await;

    assert_eq!(registry.get(&id).unwrap().status, JobStatus::Succeeded);
    let prefix = h.storage_root.join(BUCKET).join("output").join("broken");
    assert!(prefix.join("broken.md").is_file());
    let marker = prefix.join("images");
    assert!(marker.is_dir());
    assert_eq!(std::fs::read_dir(&marker).unwrap().count(), 0);
    assert!(scratch_leftovers(&h).is_empty());
}

#[tokio::test]
async fn job_without_output_fails_without_uploads() {
    let h = harness(true);
    put_object(&h.storage_root, "blank.pdf");

    let job = Job::new(BUCKET, "blank.pdf", "pdf");
    let id = job.id;
    let registry = run_jobs(&h, vec![job]).await;

    let record = registry.get(&id).unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(record.uploaded, 0);
    assert!(!h.storage_root.join(BUCKET).join("output").exists());
    assert!(scratch_leftovers(&h).is_empty());
}

#[tokio::test]
async fn failing_jobs_do_not_stall_the_queue() {
    let h = harness(true);
    put_object(&h.storage_root, "good.pdf");

    let missing = Job::new(BUCKET, "does-not-exist.pdf", "pdf");
    let good = Job::new(BUCKET, "good.pdf", "pdf");
    let (missing_id, good_id) = (missing.id, good.id);
    let registry = run_jobs(&h, vec![missing, good]).await;

    let failed = registry.get(&missing_id).unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.error.unwrap().contains("does-not-exist.pdf"));
    assert_eq!(registry.get(&good_id).unwrap().status, JobStatus::Succeeded);
    assert!(scratch_leftovers(&h).is_empty());
}

#[tokio::test]
async fn missing_executable_fails_the_job() {
    let h = harness(false);
    put_object(&h.storage_root, "paper.pdf");

    let job = Job::new(BUCKET, "paper.pdf", "pdf");
    let id = job.id;
    let registry = run_jobs(&h, vec![job]).await;

    let record = registry.get(&id).unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    assert!(record.error.unwrap().contains("magic-pdf"));
    assert!(!h.storage_root.join(BUCKET).join("output").exists());
    assert!(scratch_leftovers(&h).is_empty());
}

#[tokio::test]
async fn missing_executable_does_not_stall_later_jobs() {
    let h = harness(false);
    put_object(&h.storage_root, "first.pdf");
    put_object(&h.storage_root, "second.pdf");

    let first = Job::new(BUCKET, "first.pdf", "pdf");
    let second = Job::new(BUCKET, "second.pdf", "pdf");
    let ids = [first.id, second.id];
    let registry = run_jobs(&h, vec![first, second]).await;

    for id in ids {
        let record = registry.get(&id).unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record.started_at.is_some());
        assert!(record.finished_at.is_some());
        assert!(record.error.unwrap().contains("Cannot find the magic-pdf executable"));
    }
    assert!(scratch_leftovers(&h).is_empty());
}

#[tokio::test]
async fn panicking_job_is_recorded_and_the_loop_continues() {
    let h = harness(true);
    put_object(&h.storage_root, "boom.pdf");
    put_object(&h.storage_root, "after.pdf");

    let boom = Job::new(BUCKET, "boom.pdf", "pdf");
    let after = Job::new(BUCKET, "after.pdf", "pdf");
    let (boom_id, after_id) = (boom.id, after.id);

    let started = Instant::now();
    let store = Arc::new(PanickingStore(local_store(&h)));
    let registry = run_jobs_on(&h, store, vec![boom, after]).await;
    assert!(started.elapsed() >= WORKER_FAILURE_PAUSE);

    let failed = registry.get(&boom_id).unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.error.unwrap().contains("panicked"));

    assert_eq!(registry.get(&after_id).unwrap().status, JobStatus::Succeeded);
    assert!(h.storage_root.join(BUCKET).join("output").join("after").join("after.md").is_file());
    assert!(scratch_leftovers(&h).is_empty());
}

#[tokio::test]
async fn failed_marker_keeps_the_upload_count() {
    let h = harness(true);
    put_object(&h.storage_root, "broken.pdf");

    let job = Job::new(BUCKET, "broken.pdf", "pdf");
    let id = job.id;
    let store = Arc::new(NoMarkerStore(local_store(&h)));
    let registry = run_jobs_on(&h, store, vec![job]).await;

    let record = registry.get(&id).unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(record.uploaded, 2);
    assert!(record.error.unwrap().contains("output/broken/images/"));

    // The execution log still goes up after the marker failed.
    let prefix = h.storage_root.join(BUCKET).join("output").join("broken");
    assert!(prefix.join("magic_pdf_execution.log").is_file());
    assert!(scratch_leftovers(&h).is_empty());
}
