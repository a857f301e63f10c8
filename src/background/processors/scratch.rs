use anyhow::{Context, Result};
use log::{error, info};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::common::SCRATCH_DIR_PREFIX;
use crate::utils::now_millis;
use crate::utils::ownership::Ownership;

// ────────────────────────────────────────────────────────────────
// ScratchDir - per-job working directory, removed on drop
// ────────────────────────────────────────────────────────────────

/// Timestamp-named working directory of one job.
///
/// Releasing the guard hands the tree back to the service account (when an
/// [`Ownership`] is set) and deletes it. [`ScratchDir::cleanup`] does this
/// explicitly; `Drop` does it for every path that skips it, including panics.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
    ownership: Option<Ownership>,
    released: bool,
}

impl ScratchDir {
    pub fn create(root: &Path, ownership: Option<Ownership>) -> Result<Self> {
        std::fs::create_dir_all(root)
            .context(format!("Failed to create scratch root {}", root.display()))?;

        let stamp = now_millis();
        let mut attempt = 0u32;
        loop {
            let name = if attempt == 0 {
                format!("{}{}", SCRATCH_DIR_PREFIX, stamp)
            } else {
                format!("{}{}_{}", SCRATCH_DIR_PREFIX, stamp, attempt)
            };
            let path = root.join(name);
            match std::fs::create_dir(&path) {
                Ok(()) => {
                    return Ok(Self {
                        path,
                        ownership,
                        released: false,
                    });
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => attempt += 1,
                Err(err) => {
                    return Err(err).context(format!(
                        "Failed to create scratch directory {}",
                        path.display()
                    ));
                }
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Normalizes ownership and removes the tree. Blocks on `chown`.
    pub fn cleanup(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if std::mem::replace(&mut self.released, true) || !self.path.exists() {
            return;
        }
        if let Some(ownership) = &self.ownership {
            // Files written by a privileged subprocess may not be removable otherwise.
            if let Err(err) = ownership.apply(&self.path) {
                error!("Failed to normalize ownership of {}: {:#}", self.path.display(), err);
            }
        }
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => info!("Scratch directory cleaned up: {}", self.path.display()),
            Err(err) => error!(
                "Failed to clean up scratch directory {}: {}",
                self.path.display(),
                err
            ),
        }
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        self.release();
    }
}
