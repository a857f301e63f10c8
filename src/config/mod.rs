pub mod environment;

use anyhow::{Context, Result};
use dotenv::dotenv;
use log::info;
use serde::Deserialize;
use std::path::PathBuf;

use crate::common::{APP_LOG_NAME, JOB_LOGS_SUBDIR};
use environment::HostEnvironment;

/// Which object storage backend the worker talks to.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    S3,
    Local,
}

/// Runtime settings of the conversion service, read from `MINERU_*` variables.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub storage: StorageKind,
    /// Root directory of the local backend; buckets are its subdirectories.
    #[serde(default)]
    pub local_storage_root: Option<PathBuf>,
    #[serde(default = "default_region")]
    pub s3_region: String,
    /// Custom S3-compatible endpoint (MinIO etc.), addressed path-style.
    #[serde(default)]
    pub s3_endpoint: Option<String>,
    #[serde(default = "default_executable_name")]
    pub executable_name: String,
    /// Skips the install directory walk when set.
    #[serde(default)]
    pub executable_path: Option<PathBuf>,
    #[serde(default)]
    pub install_dir: Option<PathBuf>,
    #[serde(default = "default_scratch_root")]
    pub scratch_root: PathBuf,
    #[serde(default)]
    pub logs_dir: Option<PathBuf>,
    #[serde(default = "default_output_prefix")]
    pub output_prefix: String,
    #[serde(default = "default_true")]
    pub normalize_ownership: bool,
    #[serde(default = "default_true")]
    pub use_sudo: bool,
    #[serde(default)]
    pub service_user: Option<String>,
    #[serde(default)]
    pub home_dir: Option<PathBuf>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_region() -> String {
    "cn-north-1".to_string()
}

fn default_executable_name() -> String {
    "magic-pdf".to_string()
}

fn default_scratch_root() -> PathBuf {
    std::env::temp_dir()
}

fn default_output_prefix() -> String {
    "output".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            storage: StorageKind::default(),
            local_storage_root: None,
            s3_region: default_region(),
            s3_endpoint: None,
            executable_name: default_executable_name(),
            executable_path: None,
            install_dir: None,
            scratch_root: default_scratch_root(),
            logs_dir: None,
            output_prefix: default_output_prefix(),
            normalize_ownership: default_true(),
            use_sudo: default_true(),
            service_user: None,
            home_dir: None,
        }
    }
}

impl ServiceConfig {
    /// Loads `.env` (if any) and then the `MINERU_`-prefixed environment.
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        let config = envy::prefixed("MINERU_")
            .from_env::<ServiceConfig>()
            .context("Failed to read MINERU_* service configuration")?;
        info!("Loaded service configuration: {:?}", config);
        Ok(config)
    }

    /// Host detection with the configured user/home overrides applied.
    pub fn host_environment(&self) -> HostEnvironment {
        HostEnvironment::detect().with_overrides(self.service_user.clone(), self.home_dir.clone())
    }

    /// Tree searched for the external executable; `{home}/miniconda` by default.
    pub fn install_dir(&self, env: &HostEnvironment) -> PathBuf {
        self.install_dir
            .clone()
            .unwrap_or_else(|| env.home_dir.join("miniconda"))
    }

    pub fn logs_dir(&self, env: &HostEnvironment) -> PathBuf {
        self.logs_dir
            .clone()
            .unwrap_or_else(|| env.home_dir.join("logs"))
    }

    pub fn app_log_path(&self, env: &HostEnvironment) -> PathBuf {
        self.logs_dir(env).join(APP_LOG_NAME)
    }

    pub fn job_logs_dir(&self, env: &HostEnvironment) -> PathBuf {
        self.logs_dir(env).join(JOB_LOGS_SUBDIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_environment_yields_defaults() {
        let config: ServiceConfig = envy::from_iter(HashMap::<String, String>::new()).unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.storage, StorageKind::S3);
        assert_eq!(config.s3_region, "cn-north-1");
        assert_eq!(config.executable_name, "magic-pdf");
        assert!(config.normalize_ownership);
    }

    #[test]
    fn overrides_are_parsed() {
        let vars = HashMap::from([
            ("PORT".to_string(), "8080".to_string()),
            ("STORAGE".to_string(), "local".to_string()),
            ("LOCAL_STORAGE_ROOT".to_string(), "/srv/buckets".to_string()),
            ("NORMALIZE_OWNERSHIP".to_string(), "false".to_string()),
        ]);
        let config: ServiceConfig = envy::from_iter(vars).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.storage, StorageKind::Local);
        assert_eq!(config.local_storage_root, Some(PathBuf::from("/srv/buckets")));
        assert!(!config.normalize_ownership);
    }

    #[test]
    fn derived_paths_follow_home_dir() {
        let config = ServiceConfig::default();
        let env = HostEnvironment::from_os_release(None).with_overrides(None, Some("/home/svc".into()));
        assert_eq!(config.install_dir(&env), PathBuf::from("/home/svc/miniconda"));
        assert_eq!(
            config.app_log_path(&env),
            PathBuf::from("/home/svc/logs/mineru_api.log")
        );
        assert_eq!(
            config.job_logs_dir(&env),
            PathBuf::from("/home/svc/logs/mineru_pdf_logs")
        );
    }
}
