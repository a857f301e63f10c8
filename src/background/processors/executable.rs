//! External executable handling - finds and runs `magic-pdf`.
//!
//! Includes:
//! - Discovery by name inside an installation tree
//! - Invocation with stdout/stderr relayed line by line into the application
//!   log and the per-job log file

use anyhow::{Context, Result, anyhow};
use log::{error, info};
use std::{
    fs::File,
    io::{BufRead, BufReader, Read, Write},
    path::{Path, PathBuf},
    process::{Command, Stdio},
    sync::Mutex,
    time::{Duration, Instant},
};
use walkdir::WalkDir;

/// How one run of the external executable ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionSummary {
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub elapsed: Duration,
}

impl ExecutionSummary {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

// ────────────────────────────────────────────────────────────────
// Discovery
// ────────────────────────────────────────────────────────────────

/// Resolves the executable: an explicit path wins, otherwise the first file
/// called `name` found while walking `install_dir`.
pub fn locate_executable(
    explicit: Option<&Path>,
    install_dir: &Path,
    name: &str,
) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        return Err(anyhow!(
            "Configured executable does not exist: {}",
            path.display()
        ));
    }

    WalkDir::new(install_dir)
        .follow_links(true)
        .into_iter()
        .filter_map(Result::ok)
        .find(|entry| entry.file_type().is_file() && entry.file_name() == name)
        .map(|entry| entry.into_path())
        .ok_or_else(|| {
            anyhow!(
                "Cannot find the {} executable under {}",
                name,
                install_dir.display()
            )
        })
}

// ────────────────────────────────────────────────────────────────
// Invocation
// ────────────────────────────────────────────────────────────────

/// Runs `<exe> -p <input> -o <output_dir> -m auto` and waits for it.
///
/// Both pipes are drained at the same time; a child that fills its stderr
/// buffer while stdout is being read would otherwise block forever. A nonzero
/// exit code is logged and reported, not turned into an error.
pub fn run_extraction(
    executable: &Path,
    input: &Path,
    output_dir: &Path,
    log_file: &Path,
) -> Result<ExecutionSummary> {
    let mut cmd = Command::new(executable);
    cmd.arg("-p")
        .arg(input)
        .arg("-o")
        .arg(output_dir)
        .args(["-m", "auto"]);

    info!(
        "Starting command: {} -p {} -o {} -m auto",
        executable.display(),
        input.display(),
        output_dir.display()
    );
    let start = Instant::now();

    let log_sink = Mutex::new(
        File::create(log_file)
            .context(format!("Failed to create job log {}", log_file.display()))?,
    );

    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .context(format!("Failed to spawn {}", executable.display()))?;
    info!("Command process started, PID: {}", child.id());

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout of the child process was not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr of the child process was not captured"))?;

    let sink = &log_sink;
    std::thread::scope(|scope| {
        scope.spawn(move || relay_lines(stderr, "stderr", sink));
        relay_lines(stdout, "stdout", sink);
    });

    let status = child.wait().context("Failed to wait for magic-pdf")?;
    let summary = ExecutionSummary {
        exit_code: status.code(),
        elapsed: start.elapsed(),
    };

    info!(
        duration = &*format!("{:?}", summary.elapsed);
        "magic-pdf finished with exit code: {:?}",
        summary.exit_code
    );
    if !summary.success() {
        error!(
            duration = &*format!("{:?}", summary.elapsed);
            "magic-pdf failed with exit code: {:?}",
            summary.exit_code
        );
    }

    Ok(summary)
}

/// Copies every non-empty, trimmed line of `stream` to the log and `sink`.
///
/// Lines are decoded lossily so stray non-UTF-8 output never stops the read
/// loop before EOF.
fn relay_lines<R: Read>(stream: R, label: &str, sink: &Mutex<File>) {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf);
                let line = text.trim();
                if line.is_empty() {
                    continue;
                }
                info!("magic-pdf ({}): {}", label, line);
                if let Ok(mut file) = sink.lock() {
                    let _ = writeln!(file, "{}", line);
                    let _ = file.flush();
                }
            }
            Err(err) => {
                error!("Failed to read magic-pdf {}: {}", label, err);
                break;
            }
        }
    }
}
