//! Model provisioning for the external converter.
//!
//! Downloads the model snapshots `magic-pdf` needs from the ModelScope registry
//! and writes (or refreshes) the `magic-pdf.json` configuration that points at
//! them. Running it twice with unchanged inputs leaves the same bytes on disk.

pub mod modelscope;
pub mod template;

use anyhow::{Context, Result};
use dotenv::dotenv;
use log::{info, warn};
use serde::Deserialize;
use serde_json::Value;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::config::environment::OsFamily;
use crate::utils::ownership::{Ownership, is_root};
use modelscope::ModelRegistry;
use template::{ConfigOverlay, TemplateSource};

pub const PDF_EXTRACT_KIT_MODEL: &str = "opendatalab/PDF-Extract-Kit-1.0";
pub const PDF_EXTRACT_KIT_PATTERNS: &[&str] = &[
    "models/Layout/LayoutLMv3/*",
    "models/Layout/YOLO/*",
    "models/MFD/YOLO/*",
    "models/MFR/unimernet_small_2501/*",
    "models/TabRec/TableMaster/*",
    "models/TabRec/StructEqTable/*",
];
pub const LAYOUTREADER_MODEL: &str = "ppaanngggg/layoutreader";

pub const DEFAULT_TEMPLATE_URL: &str =
    "https://gcore.jsdelivr.net/gh/opendatalab/MinerU@master/magic-pdf.template.json";
pub const DEFAULT_REGISTRY_ENDPOINT: &str = "https://www.modelscope.cn";
pub const CONFIG_FILE_NAME: &str = "magic-pdf.json";

/// Provisioner settings, read from `PROVISION_*` variables.
///
/// Paths default to the `ec2-user` account whatever the host distribution is;
/// `OWNER` and `HOME_DIR` move them elsewhere.
#[derive(Debug, Clone, Deserialize)]
pub struct ProvisionConfig {
    /// `{home}/magic-pdf.json` when unset.
    #[serde(default)]
    pub config_path: Option<PathBuf>,
    /// `{home}/.cache/modelscope` when unset.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default = "default_template_url")]
    pub template_url: String,
    #[serde(default = "default_registry_endpoint")]
    pub registry_endpoint: String,
    /// Forces `device-mode` instead of probing for a GPU.
    #[serde(default)]
    pub device: Option<String>,
    /// Account that receives the config and the model cache when run as root.
    #[serde(default)]
    pub owner: Option<String>,
    /// `/home/{owner}` when unset.
    #[serde(default)]
    pub home_dir: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub normalize_ownership: bool,
}

fn default_template_url() -> String {
    DEFAULT_TEMPLATE_URL.to_string()
}

fn default_registry_endpoint() -> String {
    DEFAULT_REGISTRY_ENDPOINT.to_string()
}

fn default_true() -> bool {
    true
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            config_path: None,
            cache_dir: None,
            template_url: default_template_url(),
            registry_endpoint: default_registry_endpoint(),
            device: None,
            owner: None,
            home_dir: None,
            normalize_ownership: default_true(),
        }
    }
}

impl ProvisionConfig {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        envy::prefixed("PROVISION_")
            .from_env::<ProvisionConfig>()
            .context("Failed to read PROVISION_* configuration")
    }

    pub fn owner(&self) -> String {
        self.owner
            .clone()
            .unwrap_or_else(|| OsFamily::AmazonLinux.default_user().to_string())
    }

    pub fn home_dir(&self) -> PathBuf {
        self.home_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("/home/{}", self.owner())))
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_path
            .clone()
            .unwrap_or_else(|| self.home_dir().join(CONFIG_FILE_NAME))
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| self.home_dir().join(".cache").join("modelscope"))
    }
}

/// Fetches the configuration template over HTTP.
pub struct HttpTemplate {
    client: reqwest::blocking::Client,
    url: String,
}

impl HttpTemplate {
    pub fn new(client: reqwest::blocking::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

impl TemplateSource for HttpTemplate {
    fn fetch_template(&self) -> Result<Value> {
        info!("Downloading configuration template from {}", self.url);
        let template = self
            .client
            .get(&self.url)
            .send()
            .context(format!("Failed to request {}", self.url))?
            .error_for_status()
            .context(format!("Template server refused {}", self.url))?
            .json::<Value>()
            .context(format!("Template at {} is not valid JSON", self.url))?;
        Ok(template)
    }
}

/// `cuda` when `nvidia-smi` runs successfully, `cpu` otherwise.
pub fn detect_device() -> String {
    let has_gpu = Command::new("nvidia-smi")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false);
    let device = if has_gpu { "cuda" } else { "cpu" };
    info!("Detected device mode: {}", device);
    device.to_string()
}

/// What a provisioning run left on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionReport {
    pub config_path: PathBuf,
    pub overlay: ConfigOverlay,
}

/// Downloads both snapshots and writes the merged configuration.
pub fn provision(
    config: &ProvisionConfig,
    registry: &dyn ModelRegistry,
    template: &dyn TemplateSource,
    device_mode: &str,
) -> Result<ProvisionReport> {
    let cache_dir = config.cache_dir();
    std::fs::create_dir_all(&cache_dir)
        .context(format!("Failed to create {}", cache_dir.display()))?;

    info!("Downloading {} into {}", PDF_EXTRACT_KIT_MODEL, cache_dir.display());
    let kit_dir = registry
        .snapshot_download(PDF_EXTRACT_KIT_MODEL, PDF_EXTRACT_KIT_PATTERNS, &cache_dir)
        .context(format!("Failed to download {}", PDF_EXTRACT_KIT_MODEL))?;

    info!("Downloading {} into {}", LAYOUTREADER_MODEL, cache_dir.display());
    let layoutreader_dir = registry
        .snapshot_download(LAYOUTREADER_MODEL, &[], &cache_dir)
        .context(format!("Failed to download {}", LAYOUTREADER_MODEL))?;

    let overlay = ConfigOverlay {
        models_dir: kit_dir.join("models"),
        layoutreader_model_dir: layoutreader_dir,
        device_mode: device_mode.to_string(),
    };

    let config_path = config.config_path();
    let data = template::load_or_fetch_template(&config_path, template)?;
    let data = template::apply_overlay(data, &overlay)?;
    template::write_config(&config_path, &data)?;
    std::fs::set_permissions(&config_path, std::fs::Permissions::from_mode(0o644))
        .context(format!("Failed to chmod {}", config_path.display()))?;

    if config.normalize_ownership && is_root() {
        hand_over(
            &Ownership::new(config.owner(), false),
            &[config_path.as_path(), cache_dir.as_path()],
        );
    }

    info!(
        "Wrote {} (models-dir {}, layoutreader-model-dir {}, device-mode {})",
        config_path.display(),
        overlay.models_dir.display(),
        overlay.layoutreader_model_dir.display(),
        overlay.device_mode
    );
    Ok(ProvisionReport {
        config_path,
        overlay,
    })
}

fn hand_over(ownership: &Ownership, paths: &[&Path]) {
    for path in paths {
        match ownership.apply(path) {
            Ok(()) => info!("{} now belongs to {}", path.display(), ownership.user),
            Err(err) => warn!("Could not hand {} to {}: {:#}", path.display(), ownership.user, err),
        }
    }
}
