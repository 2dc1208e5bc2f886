//! Playbook definitions.
//!
//! A playbook is an ordered list of stages; each stage holds the modules
//! that run concurrently within it. A module binds an environment to an
//! ordered playlist of testcase ids, plus its execution and fetch
//! policies.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};

use super::validate_slug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Playbook {
    /// Name derived from the file stem.
    #[serde(skip)]
    pub name: String,

    pub stages: Vec<Stage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Stage {
    pub name: String,
    pub modules: Vec<ModuleDef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleDef {
    pub name: String,
    /// Environment id; can be overridden per module on the command line.
    pub env: String,
    /// Ordered testcase ids.
    pub playlist: Vec<String>,
    #[serde(default)]
    pub policy: ModulePolicy,
    #[serde(default)]
    pub fetch: FetchPolicy,
}

/// Per-module execution policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModulePolicy {
    pub reboot_agents_before_each_test: bool,
    pub delete_device_logs_on_success: bool,
    /// Idle time between consecutive testcases, in seconds. Not applied
    /// after the last testcase of the playlist.
    pub wait_time_between_tests: u64,
    pub delete_session: bool,
    /// Only meaningful with `delete_session`; keeps the device session for
    /// post-mortem when a testcase failed.
    pub delete_session_on_failure: bool,
    /// Stop the whole run at the first failed testcase.
    pub abort_on_failure: bool,
}

/// Which artifact classes to pull from the driver work directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchPolicy {
    pub pdf: bool,
    pub csv: bool,
    pub captures_and_logs: bool,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            pdf: false,
            csv: true,
            captures_and_logs: false,
        }
    }
}

impl Playbook {
    /// Load `playbooks/<name>.toml`, stamping the file stem as the name.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read playbook: {}", path.display()))?;
        let mut playbook: Self = toml::from_str(&text)
            .with_context(|| format!("failed to parse playbook: {}", path.display()))?;
        playbook.name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_string)
            .with_context(|| format!("playbook file has no usable stem: {}", path.display()))?;
        playbook
            .validate()
            .with_context(|| format!("invalid playbook: {}", path.display()))?;
        Ok(playbook)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        validate_slug("playbook name", &self.name)?;
        if self.stages.is_empty() {
            bail!("playbook has no stages");
        }
        let mut stage_names = BTreeSet::new();
        for stage in &self.stages {
            validate_slug("stage name", &stage.name)?;
            if !stage_names.insert(stage.name.as_str()) {
                bail!("duplicate stage name {:?}", stage.name);
            }
            if stage.modules.is_empty() {
                bail!("stage {:?} has no modules", stage.name);
            }
            let mut module_names = BTreeSet::new();
            for module in &stage.modules {
                validate_slug("module name", &module.name)?;
                if !module_names.insert(module.name.as_str()) {
                    bail!(
                        "duplicate module name {:?} in stage {:?}",
                        module.name,
                        stage.name
                    );
                }
                validate_slug("module env", &module.env)?;
                if module.playlist.is_empty() {
                    bail!("module {:?} has an empty playlist", module.name);
                }
                for id in &module.playlist {
                    validate_slug("playlist entry", id)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
[[stages]]
name = "smoke"

[[stages.modules]]
name = "core"
env = "lab1"
playlist = ["attach_storm", "detach_storm"]

[stages.modules.policy]
wait_time_between_tests = 5
abort_on_failure = true

[stages.modules.fetch]
pdf = true
"#;

    fn load_str(body: &str) -> anyhow::Result<Playbook> {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nightly.toml");
        std::fs::write(&path, body).expect("write");
        Playbook::load(&path)
    }

    #[test]
    fn loads_valid_playbook() {
        let playbook = load_str(VALID).expect("load");
        assert_eq!(playbook.name, "nightly");
        let module = &playbook.stages[0].modules[0];
        assert_eq!(module.playlist.len(), 2);
        assert!(module.policy.abort_on_failure);
        assert_eq!(module.policy.wait_time_between_tests, 5);
        // fetch defaults still apply to unnamed fields
        assert!(module.fetch.pdf);
        assert!(module.fetch.csv);
        assert!(!module.fetch.captures_and_logs);
    }

    #[test]
    fn default_policy_is_conservative() {
        let policy = ModulePolicy::default();
        assert!(!policy.abort_on_failure);
        assert!(!policy.delete_session);
        assert_eq!(policy.wait_time_between_tests, 0);
    }

    #[test]
    fn rejects_duplicate_module_names() {
        let body = VALID.replace("name = \"core\"", "name = \"dup\"")
            + "\n[[stages.modules]]\nname = \"dup\"\nenv = \"lab1\"\nplaylist = [\"x\"]\n";
        assert!(load_str(&body).is_err());
    }

    #[test]
    fn rejects_empty_playlist() {
        let body = VALID.replace("[\"attach_storm\", \"detach_storm\"]", "[]");
        assert!(load_str(&body).is_err());
    }

    #[test]
    fn rejects_playlist_entry_with_path_separator() {
        let body = VALID.replace("\"detach_storm\"", "\"../escape\"");
        assert!(load_str(&body).is_err());
    }
}
