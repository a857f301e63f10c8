use anyhow::{Context, Result};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

use crate::common::IMAGES_SEGMENT;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Image,
    Document,
}

/// One file produced by the external executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub local_path: PathBuf,
    /// Path relative to the output directory.
    pub relative_path: PathBuf,
    pub kind: ArtifactKind,
}

/// Lists every regular file below `output_dir`, in a stable order.
pub fn collect_artifacts(output_dir: &Path) -> Result<Vec<Artifact>> {
    let mut artifacts = Vec::new();
    for entry in WalkDir::new(output_dir).sort_by_file_name() {
        let entry = entry.context(format!("Failed to walk {}", output_dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative_path = entry
            .path()
            .strip_prefix(output_dir)
            .context("Walked entry is outside the output directory")?
            .to_path_buf();
        let kind = classify(&relative_path);
        artifacts.push(Artifact {
            local_path: entry.into_path(),
            relative_path,
            kind,
        });
    }
    Ok(artifacts)
}

/// A file is an image when any directory on its relative path is named `images`.
pub fn classify(relative_path: &Path) -> ArtifactKind {
    if images_tail(relative_path).is_some() {
        ArtifactKind::Image
    } else {
        ArtifactKind::Document
    }
}

/// `output/{stem}/` under the configured root prefix.
pub fn output_prefix(root: &str, stem: &str) -> String {
    let root = root.trim_matches('/');
    if root.is_empty() {
        format!("{}/", stem)
    } else {
        format!("{}/{}/", root, stem)
    }
}

/// Object key of an artifact below `prefix`.
///
/// Images keep whatever follows their first `images` directory and land under
/// a single `images/`; documents keep only their file name.
pub fn artifact_key(prefix: &str, artifact: &Artifact) -> String {
    match images_tail(&artifact.relative_path) {
        Some(tail) => format!("{}{}/{}", prefix, IMAGES_SEGMENT, tail),
        None => format!("{}{}", prefix, file_name(&artifact.relative_path)),
    }
}

pub fn images_marker_key(prefix: &str) -> String {
    format!("{}{}/", prefix, IMAGES_SEGMENT)
}

fn images_tail(relative_path: &Path) -> Option<String> {
    let parts: Vec<String> = relative_path
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    // The last part is the file itself; only directories count as markers.
    let position = parts[..parts.len().saturating_sub(1)]
        .iter()
        .position(|part| part == IMAGES_SEGMENT)?;
    Some(parts[position + 1..].join("/"))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(relative: &str) -> Artifact {
        let relative_path = PathBuf::from(relative);
        Artifact {
            local_path: Path::new("/scratch/output").join(&relative_path),
            kind: classify(&relative_path),
            relative_path,
        }
    }

    #[test]
    fn classification_uses_whole_segments() {
        assert_eq!(classify(Path::new("report/auto/images/a.jpg")), ArtifactKind::Image);
        assert_eq!(classify(Path::new("images/a.jpg")), ArtifactKind::Image);
        assert_eq!(classify(Path::new("report/auto/report.md")), ArtifactKind::Document);
        assert_eq!(classify(Path::new("report/myimages/a.jpg")), ArtifactKind::Document);
        assert_eq!(classify(Path::new("report/auto/images")), ArtifactKind::Document);
    }

    #[test]
    fn images_are_flattened_under_one_prefix() {
        let prefix = output_prefix("output", "report");
        assert_eq!(prefix, "output/report/");
        assert_eq!(
            artifact_key(&prefix, &artifact("report/auto/images/abc.jpg")),
            "output/report/images/abc.jpg"
        );
        assert_eq!(
            artifact_key(&prefix, &artifact("deep/er/still/images/sub/x.png")),
            "output/report/images/sub/x.png"
        );
    }

    #[test]
    fn documents_lose_their_directories() {
        let prefix = output_prefix("output", "report");
        assert_eq!(
            artifact_key(&prefix, &artifact("report/auto/report.md")),
            "output/report/report.md"
        );
        assert_eq!(
            artifact_key(&prefix, &artifact("report/auto/report_middle.json")),
            "output/report/report_middle.json"
        );
    }

    #[test]
    fn prefix_handles_custom_roots() {
        assert_eq!(output_prefix("/results/", "a.b"), "results/a.b/");
        assert_eq!(output_prefix("", "doc"), "doc/");
        assert_eq!(images_marker_key("output/doc/"), "output/doc/images/");
    }

    #[test]
    fn collects_nested_files_only() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path();
        std::fs::create_dir_all(out.join("doc/auto/images")).unwrap();
        std::fs::write(out.join("doc/auto/doc.md"), "md").unwrap();
        std::fs::write(out.join("doc/auto/images/1.jpg"), "jpg").unwrap();
        std::fs::create_dir_all(out.join("empty")).unwrap();

        let artifacts = collect_artifacts(out).unwrap();
        assert_eq!(artifacts.len(), 2);
        assert_eq!(artifacts[0].relative_path, PathBuf::from("doc/auto/doc.md"));
        assert_eq!(artifacts[0].kind, ArtifactKind::Document);
        assert_eq!(artifacts[1].relative_path, PathBuf::from("doc/auto/images/1.jpg"));
        assert_eq!(artifacts[1].kind, ArtifactKind::Image);
    }
}
