//! Run report aggregation.
//!
//! Walks a run directory for `session.json` records and folds them into a
//! summary. Malformed or unreadable records are skipped with a warning so
//! one corrupt session never hides the rest of the run.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::artifacts::write_json;
use crate::session::{SESSION_FILE, SessionRecord, SessionStatus};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportSummary {
    pub sessions: usize,
    pub pass: usize,
    pub fail: usize,
    pub inconclusive: usize,
    pub aborted: usize,
    /// Failure kind → occurrence count.
    pub causes: BTreeMap<String, usize>,
}

impl ReportSummary {
    pub fn add(&mut self, record: &SessionRecord) {
        self.sessions += 1;
        match record.status {
            SessionStatus::Pass => self.pass += 1,
            SessionStatus::Fail => self.fail += 1,
            SessionStatus::Inconclusive => self.inconclusive += 1,
            SessionStatus::Aborted => self.aborted += 1,
        }
        if let Some(cause) = &record.cause {
            *self.causes.entry(cause.kind().to_string()).or_default() += 1;
        }
    }
}

/// Aggregate every session record under `run_dir`. Returns the summary
/// and the paths that could not be read.
pub fn aggregate(run_dir: &Path) -> anyhow::Result<(ReportSummary, Vec<String>)> {
    let mut summary = ReportSummary::default();
    let mut skipped = Vec::new();
    visit(run_dir, &mut summary, &mut skipped);
    Ok((summary, skipped))
}

fn visit(dir: &Path, summary: &mut ReportSummary, skipped: &mut Vec<String>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            visit(&path, summary, skipped);
        } else if path.file_name().and_then(|n| n.to_str()) == Some(SESSION_FILE) {
            match SessionRecord::read(dir) {
                Ok(record) => summary.add(&record),
                Err(_) => skipped.push(path.display().to_string()),
            }
        }
    }
}

/// Write the run-level `summary.json`.
pub fn write_summary(run_dir: &Path, summary: &ReportSummary) -> anyhow::Result<()> {
    write_json(&run_dir.join("summary.json"), summary)
}
