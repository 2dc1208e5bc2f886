//! Engine configuration.
//!
//! Timeouts and limits that apply to every session of a run. Loaded from
//! an optional `rig.toml` at the definition root; absent file means
//! defaults.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RigConfig {
    /// Deadline for a single driver invocation, in seconds.
    pub driver_timeout_secs: u64,
    /// Deadline for acquiring an exclusive environment lock, in seconds.
    pub lock_timeout_secs: u64,
    /// Grace period to wait for result files after the driver exits,
    /// in seconds.
    pub results_grace_secs: u64,
    /// Cap on captured driver stdout/stderr, in bytes per stream.
    pub driver_output_limit_bytes: usize,
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            driver_timeout_secs: 1800,
            lock_timeout_secs: 3600,
            results_grace_secs: 30,
            driver_output_limit_bytes: 100_000,
        }
    }
}

impl RigConfig {
    pub fn driver_timeout(&self) -> Duration {
        Duration::from_secs(self.driver_timeout_secs)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    pub fn results_grace(&self) -> Duration {
        Duration::from_secs(self.results_grace_secs)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.driver_timeout_secs == 0 {
            bail!("driver_timeout_secs must be positive");
        }
        if self.lock_timeout_secs == 0 {
            bail!("lock_timeout_secs must be positive");
        }
        if self.driver_output_limit_bytes == 0 {
            bail!("driver_output_limit_bytes must be positive");
        }
        Ok(())
    }

    /// Load configuration from `path`, falling back to defaults when the
    /// file does not exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;
        let config: Self = toml::from_str(&text)
            .with_context(|| format!("failed to parse config: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = RigConfig::load(&dir.path().join("rig.toml")).expect("load");
        assert_eq!(config, RigConfig::default());
    }

    #[test]
    fn partial_file_overrides_only_named_fields() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("rig.toml");
        std::fs::write(&path, "driver_timeout_secs = 60\n").expect("write");
        let config = RigConfig::load(&path).expect("load");
        assert_eq!(config.driver_timeout_secs, 60);
        assert_eq!(config.results_grace_secs, RigConfig::default().results_grace_secs);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("rig.toml");
        std::fs::write(&path, "lock_timeout_secs = 0\n").expect("write");
        assert!(RigConfig::load(&path).is_err());
    }

    #[test]
    fn unknown_field_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("rig.toml");
        std::fs::write(&path, "driver_timeout = 60\n").expect("write");
        assert!(RigConfig::load(&path).is_err());
    }
}
