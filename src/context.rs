use std::sync::Arc;

use crate::background::queue::JobQueue;
use crate::background::registry::JobRegistry;
use crate::config::ServiceConfig;
use crate::config::environment::HostEnvironment;

/// State shared by every request handler, managed by Rocket.
#[derive(Debug, Clone)]
pub struct ServiceContext {
    pub config: Arc<ServiceConfig>,
    pub environment: Arc<HostEnvironment>,
    pub queue: JobQueue,
    pub registry: Arc<JobRegistry>,
}

impl ServiceContext {
    pub fn new(
        config: Arc<ServiceConfig>,
        environment: Arc<HostEnvironment>,
        queue: JobQueue,
        registry: Arc<JobRegistry>,
    ) -> Self {
        Self {
            config,
            environment,
            queue,
            registry,
        }
    }
}
