//! The `magic-pdf.json` configuration record: template versioning, overlay and
//! deterministic serialization.

use anyhow::{Context, Result, anyhow};
use log::{info, warn};
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Cached configs older than this are replaced by a fresh template.
pub const MIN_CONFIG_VERSION: &str = "1.1.1";

static REGEX_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*v?(\d+(?:\.\d+)*)").unwrap());

/// Source of the remote configuration template.
pub trait TemplateSource {
    fn fetch_template(&self) -> Result<Value>;
}

/// Fields computed locally and written over the template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigOverlay {
    pub models_dir: PathBuf,
    pub layoutreader_model_dir: PathBuf,
    pub device_mode: String,
}

/// Compares dotted version strings numerically (`1.10.0 > 1.9.9`).
///
/// Unparseable versions sort before everything else; missing components count as zero.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (parse_version(a), parse_version(b)) {
        (Some(a), Some(b)) => {
            let len = a.len().max(b.len());
            let pad = |v: &[u64], i: usize| v.get(i).copied().unwrap_or(0);
            (0..len)
                .map(|i| pad(&a, i).cmp(&pad(&b, i)))
                .find(|ord| ord.is_ne())
                .unwrap_or(Ordering::Equal)
        }
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn parse_version(version: &str) -> Option<Vec<u64>> {
    let caps = REGEX_VERSION.captures(version)?;
    caps[1].split('.').map(|part| part.parse().ok()).collect()
}

/// Reuses the config at `path` when it is current, otherwise fetches the template.
pub fn load_or_fetch_template(path: &Path, source: &dyn TemplateSource) -> Result<Value> {
    if path.exists() {
        let cached = std::fs::read_to_string(path)
            .map_err(anyhow::Error::from)
            .and_then(|text| serde_json::from_str::<Value>(&text).map_err(anyhow::Error::from));
        match cached {
            Ok(data) if data.is_object() => {
                let version = data
                    .get("config_version")
                    .and_then(Value::as_str)
                    .unwrap_or("0.0.0")
                    .to_string();
                if compare_versions(&version, MIN_CONFIG_VERSION) != Ordering::Less {
                    info!("Reusing {} (config_version {})", path.display(), version);
                    return Ok(data);
                }
                info!(
                    "{} has config_version {} < {}, downloading a fresh template",
                    path.display(),
                    version,
                    MIN_CONFIG_VERSION
                );
            }
            Ok(_) => warn!("{} is not a JSON object, downloading a fresh template", path.display()),
            Err(err) => warn!("{} is unreadable ({:#}), downloading a fresh template", path.display(), err),
        }
    }

    let template = source
        .fetch_template()
        .context("Failed to download the configuration template")?;
    if !template.is_object() {
        return Err(anyhow!("Configuration template is not a JSON object"));
    }
    Ok(template)
}

/// Writes the overlay fields into the template object.
pub fn apply_overlay(mut data: Value, overlay: &ConfigOverlay) -> Result<Value> {
    let object: &mut Map<String, Value> = data
        .as_object_mut()
        .ok_or_else(|| anyhow!("Configuration document is not a JSON object"))?;
    object.insert(
        "models-dir".to_string(),
        Value::String(overlay.models_dir.to_string_lossy().into_owned()),
    );
    object.insert(
        "layoutreader-model-dir".to_string(),
        Value::String(overlay.layoutreader_model_dir.to_string_lossy().into_owned()),
    );
    object.insert(
        "device-mode".to_string(),
        Value::String(overlay.device_mode.clone()),
    );
    Ok(data)
}

/// Serializes with 4-space indentation and sorted keys, so equal documents
/// always produce equal bytes.
pub fn render_config(data: &Value) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    sort_keys(data)
        .serialize(&mut serializer)
        .context("Failed to serialize configuration")?;
    Ok(out)
}

// Rebuilt explicitly: with serde_json's `preserve_order` feature turned on by
// another crate, `Map` keeps insertion order instead of sorting.
fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), sort_keys(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

pub fn write_config(path: &Path, data: &Value) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .context(format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, render_config(data)?)
        .context(format!("Failed to write {}", path.display()))?;
    Ok(())
}
