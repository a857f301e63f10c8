use log::{error, info};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;

use crate::background::flows::conversion_workflow;
use crate::background::queue::JobReceiver;
use crate::background::registry::JobRegistry;
use crate::common::WORKER_FAILURE_PAUSE;
use crate::common::errors::handle_error;
use crate::config::ServiceConfig;
use crate::config::environment::HostEnvironment;
use crate::storage::ObjectStore;

/// Everything a conversion needs, handed to the worker at construction.
#[derive(Clone)]
pub struct WorkerContext {
    pub config: Arc<ServiceConfig>,
    pub environment: Arc<HostEnvironment>,
    pub store: Arc<dyn ObjectStore>,
    pub registry: Arc<JobRegistry>,
}

/// Consumes jobs one by one until shutdown is signalled or every producer is gone.
///
/// A job that errors or panics is recorded as failed; the loop always moves on.
/// Shutdown is only observed between jobs.
pub async fn run_worker(
    ctx: WorkerContext,
    mut receiver: JobReceiver,
    mut shutdown: broadcast::Receiver<()>,
) {
    info!("Conversion worker started");
    loop {
        let job = tokio::select! {
            biased;
            _ = shutdown.recv() => {
                info!("Conversion worker received shutdown signal");
                break;
            }
            job = receiver.recv() => match job {
                Some(job) => job,
                None => {
                    info!("Job queue closed, conversion worker exiting");
                    break;
                }
            },
        };

        info!("Start processing queued job {}: {}/{}", job.id, job.bucket, job.key);
        ctx.registry.mark_running(&job.id);
        let start_time = Instant::now();

        let handle = tokio::spawn({
            let ctx = ctx.clone();
            let job = job.clone();
            async move { conversion_workflow(&ctx, &job).await }
        });

        match handle.await {
            Ok(Ok(report)) => match report.failure() {
                None => {
                    info!(
                        duration = &*format!("{:?}", start_time.elapsed());
                        "Queued job {} completed: {} ({} uploaded, {} failed uploads)",
                        job.id,
                        job.key,
                        report.uploaded,
                        report.failed_uploads
                    );
                    ctx.registry.mark_succeeded(&job.id, report.uploaded);
                }
                Some(reason) => {
                    error!(
                        duration = &*format!("{:?}", start_time.elapsed());
                        "Queued job {} failed: {}, {} ({} uploaded)",
                        job.id,
                        job.key,
                        reason,
                        report.uploaded
                    );
                    ctx.registry.mark_failed(&job.id, report.uploaded, reason);
                }
            },
            Ok(Err(err)) => {
                let err = handle_error(err.context(format!("Queued job {} failed: {}", job.id, job.key)));
                ctx.registry.mark_failed(&job.id, 0, format!("{:#}", err));
            }
            Err(join_err) => {
                error!("Worker task for job {} panicked: {}", job.id, join_err);
                ctx.registry
                    .mark_failed(&job.id, 0, format!("conversion panicked: {}", join_err));
                tokio::time::sleep(WORKER_FAILURE_PAUSE).await;
            }
        }

        info!("Jobs remaining in queue: {}", receiver.pending());
    }
}
