use anyhow::{Context, Result, anyhow};
use std::path::Path;
use std::process::{Command, Stdio};

/// Account that should own files the service or provisioner leaves behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ownership {
    pub user: String,
    pub use_sudo: bool,
}

impl Ownership {
    pub fn new(user: impl Into<String>, use_sudo: bool) -> Self {
        Self {
            user: user.into(),
            use_sudo,
        }
    }

    /// Recursively hands `path` to `user:user` through `chown -R`.
    pub fn apply(&self, path: &Path) -> Result<()> {
        let owner = format!("{0}:{0}", self.user);
        let mut cmd = if self.use_sudo {
            let mut cmd = Command::new("sudo");
            cmd.arg("chown");
            cmd
        } else {
            Command::new("chown")
        };
        cmd.arg("-R").arg(&owner).arg(path);

        let status = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .context(format!("Failed to spawn chown for {}", path.display()))?;

        if !status.success() {
            return Err(anyhow!(
                "chown {} {} failed with exit code: {}",
                owner,
                path.display(),
                status.code().unwrap_or(-1)
            ));
        }
        Ok(())
    }
}

/// Whether the current process runs with uid 0, as reported by `id -u`.
pub fn is_root() -> bool {
    Command::new("id")
        .arg("-u")
        .output()
        .ok()
        .filter(|output| output.status.success())
        .map(|output| String::from_utf8_lossy(&output.stdout).trim() == "0")
        .unwrap_or(false)
}
