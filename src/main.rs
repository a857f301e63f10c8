use anyhow::Result;
use log::{error, info};
use std::sync::Arc;
use std::thread;
use tokio::sync::broadcast;

use mineru_relay::api::build_rocket;
use mineru_relay::background::queue::job_queue;
use mineru_relay::background::registry::JobRegistry;
use mineru_relay::background::worker::{WorkerContext, run_worker};
use mineru_relay::bootstrap::setup::initialize;
use mineru_relay::common::errors::handle_error;
use mineru_relay::common::{ROCKET_RUNTIME, WORKER_RUNTIME};
use mineru_relay::config::ServiceConfig;
use mineru_relay::context::ServiceContext;
use mineru_relay::storage::open_store;

fn main() -> Result<()> {
    let config = Arc::new(ServiceConfig::from_env()?);
    let environment = Arc::new(config.host_environment());
    initialize(&config, &environment)?;

    info!(
        "Starting service on {}:{} as {} ({:?})",
        config.host, config.port, environment.user, environment.os_type
    );

    let (queue, receiver) = job_queue();
    let registry = Arc::new(JobRegistry::default());
    let context = ServiceContext::new(
        config.clone(),
        environment.clone(),
        queue,
        registry.clone(),
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let worker_handle = thread::spawn({
        let shutdown_tx = shutdown_tx.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();
        let worker_shutdown = shutdown_tx.subscribe();
        move || -> Result<()> {
            WORKER_RUNTIME.block_on(async {
                let store = match open_store(&config).await {
                    Ok(store) => store,
                    Err(e) => {
                        let e = handle_error(e.context("Failed to open object storage"));
                        let _ = shutdown_tx.send(());
                        return Err(e);
                    }
                };

                let ctx = WorkerContext {
                    config,
                    environment,
                    store,
                    registry,
                };
                let worker = WORKER_RUNTIME.spawn(run_worker(ctx, receiver, worker_shutdown));

                let is_ctrl_c = tokio::select! {
                    _ = tokio::signal::ctrl_c() => true,
                    _ = shutdown_rx.recv() => false,
                };
                if is_ctrl_c {
                    info!("Received Ctrl-C, finishing the current job before exit");
                    let _ = shutdown_tx.send(());
                }

                if let Err(e) = worker.await {
                    error!("Conversion worker stopped abnormally: {}", e);
                }
                Ok(())
            })
        }
    });

    let rocket_handle = thread::spawn({
        let shutdown_tx = shutdown_tx.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();
        move || {
            let result = ROCKET_RUNTIME.block_on(async {
                let rocket_instance = build_rocket(context).ignite().await?;
                let shutdown_handle = rocket_instance.shutdown();
                ROCKET_RUNTIME.spawn(async move {
                    if shutdown_rx.recv().await.is_ok() {
                        shutdown_handle.notify();
                    }
                });
                rocket_instance.launch().await
            });
            // Rocket may also stop on SIGTERM; the worker has to follow either way.
            let _ = shutdown_tx.send(());
            if let Err(e) = result {
                error!("Rocket server failed: {}", e);
                return Err(anyhow::Error::from(e));
            }
            Ok(())
        }
    });

    let worker_result = worker_handle.join().expect("Worker thread panicked");
    let rocket_result = rocket_handle.join().expect("Rocket thread panicked");
    worker_result.and(rocket_result)
}
