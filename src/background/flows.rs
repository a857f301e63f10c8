use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local};
use log::{error, info, warn};
use std::path::Path;
use tokio::task::spawn_blocking;

use crate::background::processors::artifacts::{
    ArtifactKind, artifact_key, collect_artifacts, images_marker_key, output_prefix,
};
use crate::background::processors::executable::{locate_executable, run_extraction};
use crate::background::processors::scratch::ScratchDir;
use crate::background::queue::Job;
use crate::background::worker::WorkerContext;
use crate::common::EXECUTION_LOG_NAME;
use crate::utils::ownership::Ownership;
use crate::utils::{PathExt, decode_object_key, local_filename, original_filename};

/// Outcome of a conversion that ran to the upload stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversionReport {
    pub exit_code: Option<i32>,
    pub artifacts: usize,
    pub images: usize,
    pub uploaded: usize,
    pub failed_uploads: usize,
    pub marker_error: Option<String>,
}

impl ConversionReport {
    /// Why the job counts as failed even though it ran to the end, if it does.
    pub fn failure(&self) -> Option<String> {
        if self.uploaded == 0 {
            return Some(format!(
                "none of {} artifacts could be uploaded",
                self.artifacts
            ));
        }
        self.marker_error.clone()
    }

    pub fn succeeded(&self) -> bool {
        self.failure().is_none()
    }
}

/// Per-job log file name; unique even for jobs started in the same second.
pub fn job_log_name(job: &Job, at: DateTime<Local>) -> String {
    format!(
        "magic_pdf_{}_{}.log",
        at.format("%Y%m%d_%H%M%S_%3f"),
        job.id.simple()
    )
}

pub async fn conversion_workflow(ctx: &WorkerContext, job: &Job) -> Result<ConversionReport> {
    let config = &ctx.config;

    // Step 1: Scratch directory. `Drop` only covers panics; normally it is
    // released on the blocking pool, since chown and removal block.
    let ownership = config
        .normalize_ownership
        .then(|| Ownership::new(ctx.environment.user.clone(), config.use_sudo));
    let scratch = ScratchDir::create(&config.scratch_root, ownership)?;

    let result = convert_in_scratch(ctx, job, scratch.path()).await;

    if let Err(err) = spawn_blocking(move || scratch.cleanup()).await {
        error!("Scratch cleanup for job {} panicked: {}", job.id, err);
    }
    result
}

async fn convert_in_scratch(
    ctx: &WorkerContext,
    job: &Job,
    scratch_dir: &Path,
) -> Result<ConversionReport> {
    let config = &ctx.config;
    let environment = &ctx.environment;

    // Step 2: Per-job log file
    let job_logs_dir = config.job_logs_dir(environment);
    tokio::fs::create_dir_all(&job_logs_dir)
        .await
        .context(format!("Failed to create {}", job_logs_dir.display()))?;
    let log_file = job_logs_dir.join(job_log_name(job, Local::now()));

    // Step 3: Download the source object
    let decoded_key = decode_object_key(&job.key);
    let original = original_filename(&decoded_key)?.to_string();
    let local_path = scratch_dir.join(local_filename(&original));

    info!(
        "Downloading {}/{} -> {}",
        job.bucket,
        decoded_key,
        local_path.display()
    );
    ctx.store
        .download(&job.bucket, &decoded_key, &local_path)
        .await
        .context(format!("Failed to download {}/{}", job.bucket, decoded_key))?;

    let output_dir = scratch_dir.join("output");
    tokio::fs::create_dir_all(&output_dir).await?;

    // Step 4: Locate the executable
    let executable = locate_executable(
        config.executable_path.as_deref(),
        &config.install_dir(environment),
        &config.executable_name,
    )?;
    info!("Found magic-pdf at: {}", executable.display());

    // Step 5: Run it and list what it produced (in blocking thread)
    let (summary, artifacts) = spawn_blocking({
        let output_dir = output_dir.clone();
        let log_file = log_file.clone();
        move || -> Result<_> {
            let summary = run_extraction(&executable, &local_path, &output_dir, &log_file)?;
            let artifacts = collect_artifacts(&output_dir)?;
            Ok((summary, artifacts))
        }
    })
    .await
    .context("magic-pdf runner thread panicked")??;

    info!("Found {} output files", artifacts.len());
    if artifacts.is_empty() {
        warn!("No output files found for {}", decoded_key);
        bail!(
            "magic-pdf produced no output files for {}/{}",
            job.bucket,
            decoded_key
        );
    }

    // Step 6: Upload artifacts under output/{stem}/
    let prefix = output_prefix(&config.output_prefix, &Path::new(&original).stem_lossy());
    let mut report = ConversionReport {
        exit_code: summary.exit_code,
        artifacts: artifacts.len(),
        ..Default::default()
    };

    for artifact in &artifacts {
        if artifact.kind == ArtifactKind::Image {
            report.images += 1;
        }
        let key = artifact_key(&prefix, artifact);
        match ctx
            .store
            .upload(&job.bucket, &key, &artifact.local_path)
            .await
        {
            Ok(()) => {
                report.uploaded += 1;
                info!("Uploaded: {}/{}", job.bucket, key);
            }
            Err(err) => {
                report.failed_uploads += 1;
                error!(
                    "Upload failed: {} -> {:#}",
                    artifact.local_path.display(),
                    err
                );
            }
        }
    }

    // Step 7: Make sure images/ exists even when nothing was extracted
    if report.images == 0 {
        let marker = images_marker_key(&prefix);
        match ctx.store.put_empty(&job.bucket, &marker).await {
            Ok(()) => info!("Created empty images directory: {}/{}", job.bucket, marker),
            Err(err) => {
                error!("Failed to create {}/{}: {:#}", job.bucket, marker, err);
                report.marker_error = Some(format!("failed to create {}: {:#}", marker, err));
            }
        }
    }

    // Step 8: Execution log next to the results
    let log_key = format!("{}{}", prefix, EXECUTION_LOG_NAME);
    match ctx.store.upload(&job.bucket, &log_key, &log_file).await {
        Ok(()) => info!("Uploaded execution log: {}/{}", job.bucket, log_key),
        Err(err) => error!("Failed to upload execution log: {:#}", err),
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};

    #[test]
    fn log_names_carry_millis_and_job_id() {
        let at = Local.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap() + TimeDelta::milliseconds(678);
        let a = Job::new("b", "a.pdf", "pdf");
        let b = Job::new("b", "a.pdf", "pdf");

        let name = job_log_name(&a, at);
        assert_eq!(
            name,
            format!("magic_pdf_20240102_030405_678_{}.log", a.id.simple())
        );
        assert_ne!(name, job_log_name(&b, at));
    }

    #[test]
    fn report_failure_reasons() {
        let ok = ConversionReport {
            artifacts: 3,
            uploaded: 3,
            ..Default::default()
        };
        assert!(ok.succeeded());

        let nothing = ConversionReport {
            artifacts: 2,
            failed_uploads: 2,
            ..Default::default()
        };
        assert_eq!(
            nothing.failure().as_deref(),
            Some("none of 2 artifacts could be uploaded")
        );

        let no_marker = ConversionReport {
            artifacts: 2,
            uploaded: 2,
            marker_error: Some("failed to create output/a/images/".to_string()),
            ..Default::default()
        };
        assert!(!no_marker.succeeded());
        assert_eq!(no_marker.uploaded, 2);
    }
}
