pub mod errors;

use std::sync::LazyLock;
use std::time::Duration;

use tokio::runtime::{Builder, Runtime};

pub const SERVICE_NAME: &str = "MinerU PDF Processing Service";

pub const SERVICE_VERSION: &str = "1.0";

/// Path segment that marks an output file as an image.
pub const IMAGES_SEGMENT: &str = "images";

/// Object name of the per-job execution log, relative to the output prefix.
pub const EXECUTION_LOG_NAME: &str = "magic_pdf_execution.log";

pub const APP_LOG_NAME: &str = "mineru_api.log";

pub const JOB_LOGS_SUBDIR: &str = "mineru_pdf_logs";

pub const SCRATCH_DIR_PREFIX: &str = "mineru_temp_";

pub const DEFAULT_FILE_TYPE: &str = "pdf";

/// Finished job records kept for `GET /jobs/<id>`; older ones are evicted.
pub const FINISHED_JOBS_RETAINED: usize = 1000;

pub const WORKER_FAILURE_PAUSE: Duration = Duration::from_secs(1);

pub static CURRENT_NUM_THREADS: LazyLock<usize> = LazyLock::new(|| {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
});

// Rocket-specific Tokio Runtime
// This runtime is dedicated to handling network requests, with thread names clearly labeled.
pub static ROCKET_RUNTIME: LazyLock<Runtime> = LazyLock::new(|| {
    Builder::new_multi_thread()
        .worker_threads(*CURRENT_NUM_THREADS)
        .thread_name("rocket-io-worker")
        .enable_all()
        .build()
        .expect("Failed to build Rocket Tokio runtime")
});

// Conversion worker runtime. Only one job runs at a time, so two threads cover
// the object storage I/O; the subprocess itself sits on the blocking pool.
pub static WORKER_RUNTIME: LazyLock<Runtime> = LazyLock::new(|| {
    Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("conversion-worker")
        .enable_all()
        .build()
        .expect("Failed to build Worker Tokio runtime")
});
