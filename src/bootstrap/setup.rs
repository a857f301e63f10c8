//! Setup/initialization module - handles application startup tasks
//!
//! Includes:
//! - Logger initialization (stderr plus the application log file)
//! - Folder structure initialization
//! - External executable availability check

use anyhow::{Context, Result};
use env_logger::{Builder, WriteStyle};
use log::kv::Key;
use log::{error, info, warn};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Mutex;

use crate::background::processors::executable::locate_executable;
use crate::config::ServiceConfig;
use crate::config::environment::HostEnvironment;
use crate::utils::ownership::Ownership;

// ────────────────────────────────────────────────────────────────
// Logger Initialization
// ────────────────────────────────────────────────────────────────

/// A `Write` adapter that mirrors every record to stderr and an append-mode file.
pub struct TeePipe {
    file: Option<Mutex<File>>,
}

impl Write for TeePipe {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        std::io::stderr().write_all(buf)?;
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                file.write_all(buf)?;
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        std::io::stderr().flush()?;
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                file.flush()?;
            }
        }
        Ok(())
    }
}

/// Initializes the global logger. `RUST_LOG` overrides the default filters.
pub fn initialize_logger(log_file: Option<&Path>) -> Result<()> {
    let file = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .context(format!("Failed to create log directory {}", parent.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .context(format!("Failed to open log file {}", path.display()))?;
            Some(Mutex::new(file))
        }
        None => None,
    };

    let mut builder = Builder::new();
    builder
        // The same bytes go to a file, so no ANSI codes
        .write_style(WriteStyle::Never)
        .format(|buf, record| {
            let ts = buf.timestamp();

            // Extract raw duration and format to 2 decimal places
            let dur = record
                .key_values()
                .get(Key::from("duration"))
                .map(|v| {
                    let s = format!("{}", v);
                    if let Some(idx) = s.find(|c: char| c.is_alphabetic()) {
                        let (num, unit) = (&s[..idx], &s[idx..]);
                        if let Ok(val) = num.parse::<f32>() {
                            return format!(" [{:.2} {}]", val, unit);
                        }
                    }
                    format!(" [{}]", s)
                })
                .unwrap_or_default();

            writeln!(
                buf,
                "{} - {} - {}{} - {}",
                ts,
                record.target(),
                record.level(),
                dur,
                record.args()
            )
        })
        .target(env_logger::Target::Pipe(Box::new(TeePipe { file })))
        // Only show INFO+ globally, WARN+ for Rocket and the AWS SDK
        .filter(None, log::LevelFilter::Info)
        .filter(Some("rocket"), log::LevelFilter::Warn)
        .filter(Some("aws_config"), log::LevelFilter::Warn)
        .filter(Some("aws_smithy_runtime"), log::LevelFilter::Warn);

    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }

    builder
        .try_init()
        .context("Logger has already been initialized")?;
    Ok(())
}

// ────────────────────────────────────────────────────────────────
// Folder Initialization
// ────────────────────────────────────────────────────────────────

/// Creates the log and scratch folders the worker writes into.
pub fn initialize_folder(config: &ServiceConfig, env: &HostEnvironment) -> Result<()> {
    let logs_dir = config.logs_dir(env);
    std::fs::create_dir_all(config.job_logs_dir(env))
        .context(format!("Failed to create {}", logs_dir.display()))?;
    std::fs::create_dir_all(&config.scratch_root)
        .context(format!("Failed to create {}", config.scratch_root.display()))?;

    std::fs::set_permissions(&logs_dir, std::fs::Permissions::from_mode(0o755))
        .context(format!("Failed to chmod {}", logs_dir.display()))?;

    if config.normalize_ownership {
        let ownership = Ownership::new(env.user.clone(), config.use_sudo);
        if let Err(err) = ownership.apply(&logs_dir) {
            warn!("Could not hand {} to {}: {:#}", logs_dir.display(), env.user, err);
        }
    }
    Ok(())
}

// ────────────────────────────────────────────────────────────────
// Executable Check
// ────────────────────────────────────────────────────────────────

/// Reports whether the external executable can be found right now.
///
/// Jobs look it up again, so a later installation is still picked up.
pub fn check_executable(config: &ServiceConfig, env: &HostEnvironment) {
    match locate_executable(
        config.executable_path.as_deref(),
        &config.install_dir(env),
        &config.executable_name,
    ) {
        Ok(path) => info!("{} found at {}", config.executable_name, path.display()),
        Err(err) => error!(
            "{:#}. Conversions will fail until it is installed.",
            err
        ),
    }
}

pub fn initialize(config: &ServiceConfig, env: &HostEnvironment) -> Result<()> {
    initialize_logger(Some(&config.app_log_path(env)))?;
    initialize_folder(config, env)?;
    check_executable(config, env);
    Ok(())
}
