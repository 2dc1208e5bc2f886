//! Artifact collection.
//!
//! After a testcase finishes (or is torn down), artifacts matching the
//! module's fetch policy are copied out of the driver work directory into
//! the session's results directory and indexed in a manifest. Collection
//! is strictly best-effort: a missing or uncopyable artifact becomes a
//! warning on the session, never a failure.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::defs::FetchPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Pdf,
    Csv,
    CapturesAndLogs,
}

impl ArtifactKind {
    fn extensions(self) -> &'static [&'static str] {
        match self {
            ArtifactKind::Pdf => &["pdf"],
            ArtifactKind::Csv => &["csv"],
            ArtifactKind::CapturesAndLogs => &["pcap", "zip", "log"],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactEntry {
    pub kind: ArtifactKind,
    /// Files copied into the session directory, relative paths.
    pub collected: Vec<String>,
}

/// Index of everything collected for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub session_id: String,
    pub created_at: String,
    pub exported_config: String,
    /// Digest of the exported configuration actually used, when readable.
    pub exported_config_sha256: Option<String>,
    pub artifacts: Vec<ArtifactEntry>,
    pub warnings: Vec<String>,
}

/// Collect artifacts per the fetch policy and write `manifest.json` into
/// `session_dir`. Returns the warnings so the caller can attach them to
/// the session record too.
pub fn collect(
    session_id: &str,
    work_dir: &Path,
    session_dir: &Path,
    fetch: &FetchPolicy,
    exported_config: &Path,
) -> Vec<String> {
    let mut warnings = Vec::new();
    let mut artifacts = Vec::new();

    let wanted: &[(bool, ArtifactKind)] = &[
        (fetch.pdf, ArtifactKind::Pdf),
        (fetch.csv, ArtifactKind::Csv),
        (fetch.captures_and_logs, ArtifactKind::CapturesAndLogs),
    ];
    for &(enabled, kind) in wanted {
        if !enabled {
            continue;
        }
        let collected = copy_matching(work_dir, session_dir, kind, &mut warnings);
        if collected.is_empty() {
            warnings.push(format!("no {kind:?} artifacts found in work directory"));
        }
        artifacts.push(ArtifactEntry { kind, collected });
    }

    let exported_config_sha256 = match file_sha256(exported_config) {
        Ok(digest) => Some(digest),
        Err(e) => {
            warnings.push(format!("could not digest exported config: {e:#}"));
            None
        }
    };

    let manifest = Manifest {
        session_id: session_id.to_string(),
        created_at: Utc::now().to_rfc3339(),
        exported_config: exported_config.display().to_string(),
        exported_config_sha256,
        artifacts,
        warnings: warnings.clone(),
    };
    if let Err(e) = write_json(&session_dir.join("manifest.json"), &manifest) {
        warn!("failed to write manifest: {e:#}");
        warnings.push(format!("failed to write manifest: {e:#}"));
    }
    warnings
}

/// Recursively copy files under `work_dir` whose extension matches `kind`
/// into `session_dir`, flattening name collisions with a numeric suffix.
fn copy_matching(
    work_dir: &Path,
    session_dir: &Path,
    kind: ArtifactKind,
    warnings: &mut Vec<String>,
) -> Vec<String> {
    let mut files = Vec::new();
    walk(work_dir, kind.extensions(), &mut files, warnings);
    files.sort();

    let mut collected = Vec::new();
    for source in files {
        let name = source
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("artifact")
            .to_string();
        let mut dest_name = name.clone();
        let mut counter = 1;
        while session_dir.join(&dest_name).exists() {
            dest_name = format!("{counter}_{name}");
            counter += 1;
        }
        match std::fs::copy(&source, session_dir.join(&dest_name)) {
            Ok(_) => collected.push(dest_name),
            Err(e) => warnings.push(format!("failed to copy {}: {e}", source.display())),
        }
    }
    debug!(kind = ?kind, count = collected.len(), "artifacts collected");
    collected
}

fn walk(dir: &Path, extensions: &[&str], out: &mut Vec<PathBuf>, warnings: &mut Vec<String>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warnings.push(format!("failed to scan {}: {e}", dir.display()));
            }
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            walk(&path, extensions, out, warnings);
        } else if let Some(ext) = path.extension().and_then(|e| e.to_str())
            && extensions.contains(&ext)
        {
            out.push(path);
        }
    }
}

/// SHA-256 of a file, hex encoded.
pub fn file_sha256(path: &Path) -> anyhow::Result<String> {
    let mut file = std::fs::File::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(hex::encode(hasher.finalize()))
}

/// Pretty-printed JSON with a trailing newline.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let mut text = serde_json::to_string_pretty(value)
        .with_context(|| format!("failed to serialize {}", path.display()))?;
    text.push('\n');
    std::fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
