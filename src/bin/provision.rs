//! Downloads the converter's models and writes `magic-pdf.json`.

use anyhow::Result;
use log::info;
use std::time::Instant;

use mineru_relay::bootstrap::setup::initialize_logger;
use mineru_relay::common::errors::handle_error;
use mineru_relay::provision::modelscope::ModelScopeClient;
use mineru_relay::provision::{HttpTemplate, ProvisionConfig, detect_device, provision};

fn main() -> Result<()> {
    initialize_logger(None)?;
    let start_time = Instant::now();

    let config = ProvisionConfig::from_env()?;
    let registry = ModelScopeClient::new(config.registry_endpoint.clone())?;
    let template = HttpTemplate::new(registry.http_client().clone(), config.template_url.clone());
    let device = config.device.clone().unwrap_or_else(detect_device);

    let report = provision(&config, &registry, &template, &device)
        .map_err(|e| handle_error(e.context("Model provisioning failed")))?;

    info!(
        duration = &*format!("{:?}", start_time.elapsed());
        "Models are ready, configuration written to {}",
        report.config_path.display()
    );
    Ok(())
}
