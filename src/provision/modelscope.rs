//! Snapshot downloads from the ModelScope model registry.
//!
//! A snapshot is the file tree of one model repository at a revision. Files
//! are listed through the repository API, filtered with glob allow patterns and
//! fetched one by one into `{cache_dir}/{model_id}`. Files already present with
//! the advertised size are skipped, so re-running a provision is cheap.

use anyhow::{Context, Result, anyhow, bail};
use glob::Pattern;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use serde::Deserialize;
use std::fs::File;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_REVISION: &str = "master";

/// Anything that can materialize a model snapshot on local disk.
pub trait ModelRegistry {
    /// Returns the local directory that holds the snapshot. An empty
    /// `allow_patterns` selects every file.
    fn snapshot_download(
        &self,
        model_id: &str,
        allow_patterns: &[&str],
        cache_dir: &Path,
    ) -> Result<PathBuf>;
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct RepoFile {
    pub path: String,
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(default)]
    pub size: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListFilesResponse {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<ListFilesData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListFilesData {
    #[serde(default)]
    files: Vec<RepoFile>,
}

/// Keeps regular files whose repository path matches one of `allow_patterns`.
pub fn select_files(files: Vec<RepoFile>, allow_patterns: &[&str]) -> Result<Vec<RepoFile>> {
    let patterns = allow_patterns
        .iter()
        .map(|p| Pattern::new(p).context(format!("Invalid allow pattern {:?}", p)))
        .collect::<Result<Vec<_>>>()?;

    Ok(files
        .into_iter()
        .filter(|file| file.kind == "blob")
        .filter(|file| patterns.is_empty() || patterns.iter().any(|p| p.matches(&file.path)))
        .collect())
}

/// Joins a repository path under `root`, refusing anything that could escape it.
pub fn local_path(root: &Path, repo_path: &str) -> Result<PathBuf> {
    let relative = Path::new(repo_path);
    if repo_path.is_empty()
        || relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
    {
        bail!("Refusing unsafe repository path {:?}", repo_path);
    }
    Ok(root.join(relative))
}

pub struct ModelScopeClient {
    client: reqwest::blocking::Client,
    endpoint: String,
    revision: String,
}

impl ModelScopeClient {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("mineru-relay/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30))
            // Model weights take minutes; only the connect phase is bounded.
            .timeout(Option::<Duration>::None)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            revision: DEFAULT_REVISION.to_string(),
        })
    }

    pub fn http_client(&self) -> &reqwest::blocking::Client {
        &self.client
    }

    fn list_files(&self, model_id: &str) -> Result<Vec<RepoFile>> {
        let url = format!("{}/api/v1/models/{}/repo/files", self.endpoint, model_id);
        let response: ListFilesResponse = self
            .client
            .get(&url)
            .query(&[("Revision", self.revision.as_str()), ("Recursive", "true")])
            .send()
            .context(format!("Failed to list files of {}", model_id))?
            .error_for_status()
            .context(format!("Registry refused to list {}", model_id))?
            .json()
            .context(format!("Unexpected file listing for {}", model_id))?;

        match response.data {
            Some(data) => Ok(data.files),
            None => Err(anyhow!(
                "Registry returned no files for {} (code {:?}: {})",
                model_id,
                response.code,
                response.message.unwrap_or_default()
            )),
        }
    }

    fn download_file(&self, model_id: &str, file: &RepoFile, target: &Path) -> Result<()> {
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .context(format!("Failed to create {}", parent.display()))?;
        }

        let url = format!("{}/api/v1/models/{}/repo", self.endpoint, model_id);
        let mut response = self
            .client
            .get(&url)
            .query(&[("Revision", self.revision.as_str()), ("FilePath", file.path.as_str())])
            .send()
            .context(format!("Failed to request {}/{}", model_id, file.path))?
            .error_for_status()
            .context(format!("Registry refused {}/{}", model_id, file.path))?;

        let progress = ProgressBar::new(file.size);
        progress.set_style(
            ProgressStyle::with_template("{msg} [{bar:40}] {bytes}/{total_bytes} ({eta})")?
                .progress_chars("=> "),
        );
        progress.set_message(file.path.clone());

        let mut partial = target.as_os_str().to_owned();
        partial.push(".part");
        let partial = PathBuf::from(partial);

        let mut out = File::create(&partial)
            .context(format!("Failed to create {}", partial.display()))?;
        response
            .copy_to(&mut progress.wrap_write(&mut out))
            .context(format!("Failed to download {}/{}", model_id, file.path))?;
        progress.finish_and_clear();

        std::fs::rename(&partial, target)
            .context(format!("Failed to move download into {}", target.display()))?;
        Ok(())
    }
}

impl ModelRegistry for ModelScopeClient {
    fn snapshot_download(
        &self,
        model_id: &str,
        allow_patterns: &[&str],
        cache_dir: &Path,
    ) -> Result<PathBuf> {
        let root = cache_dir.join(model_id);
        let files = select_files(self.list_files(model_id)?, allow_patterns)?;
        if files.is_empty() {
            warn!("No files of {} matched {:?}", model_id, allow_patterns);
        }

        let (mut fetched, mut cached) = (0usize, 0usize);
        for file in &files {
            let target = local_path(&root, &file.path)?;
            let is_cached = std::fs::metadata(&target)
                .map(|meta| meta.is_file() && meta.len() == file.size)
                .unwrap_or(false);
            if is_cached {
                cached += 1;
                continue;
            }
            self.download_file(model_id, file, &target)?;
            fetched += 1;
        }

        info!(
            "Snapshot {} ready at {} ({} downloaded, {} already cached)",
            model_id,
            root.display(),
            fetched,
            cached
        );
        Ok(root)
    }
}
