//! Testcase definitions.
//!
//! A testcase names the driver executable, the exported test configuration
//! it should load, and the KPI rule groups used to judge its results. The
//! KPI table maps a result group name to a list of rule strings; rules are
//! kept as text here and compiled at evaluation time.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};

use super::validate_slug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct TestcaseFile {
    testcase: TestcaseMeta,
    #[serde(default)]
    kpi: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct TestcaseMeta {
    #[serde(default)]
    description: String,
    #[serde(default)]
    objective: String,
    exported_config: String,
    driver_script: String,
    #[serde(default)]
    params_file: Option<String>,
    #[serde(default)]
    library_paths: Vec<String>,
}

/// A loaded, validated testcase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Testcase {
    pub id: String,
    pub description: String,
    pub objective: String,
    /// Path to the exported test configuration the driver should load,
    /// relative to the definition root.
    pub exported_config: String,
    /// Driver executable, relative to the definition root or absolute.
    pub driver_script: String,
    pub params_file: Option<String>,
    pub library_paths: Vec<String>,
    /// Result group name → KPI rule strings.
    pub kpi: BTreeMap<String, Vec<String>>,
}

impl Testcase {
    /// Load `testcases/<id>.toml`, stamping the file stem as the id.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read testcase: {}", path.display()))?;
        let file: TestcaseFile = toml::from_str(&text)
            .with_context(|| format!("failed to parse testcase: {}", path.display()))?;
        let id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_string)
            .with_context(|| format!("testcase file has no usable stem: {}", path.display()))?;
        let testcase = Self {
            id,
            description: file.testcase.description,
            objective: file.testcase.objective,
            exported_config: file.testcase.exported_config,
            driver_script: file.testcase.driver_script,
            params_file: file.testcase.params_file,
            library_paths: file.testcase.library_paths,
            kpi: file.kpi,
        };
        testcase
            .validate()
            .with_context(|| format!("invalid testcase: {}", path.display()))?;
        Ok(testcase)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        validate_slug("testcase id", &self.id)?;
        if self.exported_config.is_empty() {
            bail!("testcase.exported_config must not be empty");
        }
        if self.driver_script.is_empty() {
            bail!("testcase.driver_script must not be empty");
        }
        for (group, rules) in &self.kpi {
            if group.is_empty() {
                bail!("kpi group name must not be empty");
            }
            if rules.is_empty() {
                bail!("kpi group {group:?} has no rules");
            }
        }
        Ok(())
    }
}

/// Discover all testcases under `dir`, sorted by id.
///
/// Non-TOML files are ignored. Two files resolving to the same id cannot
/// happen within one directory, but an unreadable or invalid file is a
/// hard error so a playbook never silently runs with missing cases.
pub fn discover_testcases(dir: &Path) -> anyhow::Result<Vec<Testcase>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read testcase dir: {}", dir.display()))?;

    let mut cases = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("toml") {
            continue;
        }
        cases.push(Testcase::load(&path)?);
    }
    cases.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(cases)
}
