//! Result ingestion.
//!
//! The driver leaves one CSV per result group in its work directory's
//! `results/` subdirectory. Each file is a two-column metric/value table;
//! the group name is the file stem. Drivers may rewrite a file while the
//! test winds down, so ingestion polls until the grace deadline and takes
//! the latest write for any duplicated metric.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

use anyhow::Context;
use tracing::debug;

use crate::abort::{AbortFlag, POLL_INTERVAL};
use crate::error::Failure;

/// A single observed value, kept verbatim with a numeric view when the
/// text parses as a number.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricValue {
    pub raw: String,
    pub number: Option<f64>,
}

impl MetricValue {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let number = raw.trim().parse::<f64>().ok();
        Self { raw, number }
    }
}

/// One result group: metric name → latest observed value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultGroup {
    pub records: BTreeMap<String, MetricValue>,
}

/// All result groups produced by one driver run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub groups: BTreeMap<String, ResultGroup>,
}

impl ResultSet {
    pub fn value(&self, group: &str, metric: &str) -> Option<&MetricValue> {
        self.groups.get(group)?.records.get(metric)
    }
}

/// Outcome of an abort-aware wait for results.
#[derive(Debug)]
pub enum Ingested {
    Ready(ResultSet),
    Aborted,
}

/// Load every `*.csv` under `dir` into a result set.
///
/// Returns `Ok(None)` when the directory is missing or holds no CSV files
/// yet; the caller decides whether that means "keep waiting" or
/// "results not found". A present-but-malformed file is a hard parse
/// failure.
pub fn load_results(dir: &Path) -> Result<Option<ResultSet>, Failure> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(Failure::ResultsParse {
                message: format!("failed to read {}: {e}", dir.display()),
            });
        }
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| Failure::ResultsParse {
            message: format!("failed to read {}: {e}", dir.display()),
        })?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("csv") {
            files.push(path);
        }
    }
    if files.is_empty() {
        return Ok(None);
    }
    files.sort();

    let mut set = ResultSet::default();
    for path in files {
        let group = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        let records = parse_metric_csv(&path)?;
        // Re-exported files replace earlier data for the same group.
        let entry = set.groups.entry(group).or_default();
        for (metric, value) in records {
            entry.records.insert(metric, value);
        }
    }
    Ok(Some(set))
}

fn parse_metric_csv(path: &Path) -> Result<BTreeMap<String, MetricValue>, Failure> {
    let parse_err = |message: String| Failure::ResultsParse {
        message: format!("{}: {message}", path.display()),
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|e| parse_err(e.to_string()))?;

    let mut records = BTreeMap::new();
    for (idx, row) in reader.records().enumerate() {
        let row = row.map_err(|e| parse_err(e.to_string()))?;
        let metric = row.get(0).unwrap_or_default().trim();
        if metric.is_empty() && row.iter().all(|f| f.trim().is_empty()) {
            continue;
        }
        // Tolerate an exported header row.
        if idx == 0 && metric.eq_ignore_ascii_case("metric") {
            continue;
        }
        let Some(value) = row.get(1) else {
            return Err(parse_err(format!("row {} has no value column", idx + 1)));
        };
        if metric.is_empty() {
            return Err(parse_err(format!("row {} has an empty metric name", idx + 1)));
        }
        // Later rows win: drivers append corrected values at the end.
        records.insert(metric.to_string(), MetricValue::new(value.trim()));
    }
    Ok(records)
}

/// Poll `dir` for result files until they appear, the grace deadline
/// passes, or the run is aborted.
pub fn await_results(
    dir: &Path,
    grace: std::time::Duration,
    abort: &AbortFlag,
) -> Result<Ingested, Failure> {
    let start = Instant::now();
    loop {
        if abort.is_raised() {
            return Ok(Ingested::Aborted);
        }
        if let Some(set) = load_results(dir)? {
            debug!(groups = set.groups.len(), "results ingested");
            return Ok(Ingested::Ready(set));
        }
        if start.elapsed() >= grace {
            return Err(Failure::ResultsNotFound {
                waited_secs: grace.as_secs(),
            });
        }
        std::thread::sleep(POLL_INTERVAL.min(grace));
    }
}

/// Conventional results subdirectory inside a driver work directory.
pub fn results_dir(work_dir: &Path) -> std::path::PathBuf {
    work_dir.join("results")
}

/// Create the results subdirectory so the driver can write into it.
pub fn prepare_results_dir(work_dir: &Path) -> anyhow::Result<std::path::PathBuf> {
    let dir = results_dir(work_dir);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create results dir: {}", dir.display()))?;
    Ok(dir)
}
