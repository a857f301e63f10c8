//! Detection of the host distribution and the account the service works for.

use log::info;
use serde::Serialize;
use std::path::PathBuf;

const OS_RELEASE_PATH: &str = "/etc/os-release";

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OsFamily {
    Ubuntu,
    AmazonLinux,
}

impl OsFamily {
    pub fn default_user(self) -> &'static str {
        match self {
            OsFamily::Ubuntu => "ubuntu",
            OsFamily::AmazonLinux => "ec2-user",
        }
    }
}

/// Reported as `system_info` by the status endpoints.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HostEnvironment {
    pub os_type: OsFamily,
    pub user: String,
    pub home_dir: PathBuf,
}

impl HostEnvironment {
    pub fn detect() -> Self {
        let content = std::fs::read_to_string(OS_RELEASE_PATH).ok();
        let env = Self::from_os_release(content.as_deref());
        info!(
            "Detected host environment: os={:?}, user={}, home={}",
            env.os_type,
            env.user,
            env.home_dir.display()
        );
        env
    }

    /// Anything that is not Ubuntu, including a missing os-release, counts as Amazon Linux.
    pub fn from_os_release(content: Option<&str>) -> Self {
        let os_type = match content {
            Some(text) if text.to_lowercase().contains("ubuntu") => OsFamily::Ubuntu,
            _ => OsFamily::AmazonLinux,
        };
        let user = os_type.default_user().to_string();
        let home_dir = PathBuf::from(format!("/home/{}", user));
        Self {
            os_type,
            user,
            home_dir,
        }
    }

    /// Overriding the user without a home moves the home to `/home/{user}`.
    pub fn with_overrides(mut self, user: Option<String>, home_dir: Option<PathBuf>) -> Self {
        if let Some(user) = user {
            self.home_dir = PathBuf::from(format!("/home/{}", user));
            self.user = user;
        }
        if let Some(home_dir) = home_dir {
            self.home_dir = home_dir;
        }
        self
    }
}
