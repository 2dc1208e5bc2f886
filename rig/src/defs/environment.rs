//! Environment definitions.
//!
//! An environment names one device under test, its license server, and the
//! traffic agents attached to it. The `parallel_usage` flag decides whether
//! concurrent modules may share it or must serialize.

use std::path::Path;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};

use super::validate_slug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Environment {
    /// Identifier derived from the file stem, not the document body.
    #[serde(skip)]
    pub id: String,

    /// When false (the default) the environment is exclusive: only one
    /// session may hold it at a time.
    #[serde(default)]
    pub parallel_usage: bool,

    pub device: Device,
    pub license_server: LicenseServer,

    #[serde(default)]
    pub agents: Vec<Agent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Device {
    pub address: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LicenseKind {
    Legacy,
    Embedded,
    External,
}

impl LicenseKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LicenseKind::Legacy => "legacy",
            LicenseKind::Embedded => "embedded",
            LicenseKind::External => "external",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LicenseServer {
    pub address: String,
    #[serde(default = "default_license_port")]
    pub port: u16,
    pub kind: LicenseKind,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

fn default_license_port() -> u16 {
    7443
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Agent {
    pub address: String,
    pub interface: String,
}

impl Environment {
    /// Load `envs/<id>.toml`, stamping the file stem as the id.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read environment: {}", path.display()))?;
        let mut env: Self = toml::from_str(&text)
            .with_context(|| format!("failed to parse environment: {}", path.display()))?;
        env.id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_string)
            .with_context(|| format!("environment file has no usable stem: {}", path.display()))?;
        env.validate()
            .with_context(|| format!("invalid environment: {}", path.display()))?;
        Ok(env)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        validate_slug("environment id", &self.id)?;
        if self.device.address.is_empty() {
            bail!("device.address must not be empty");
        }
        if self.device.username.is_empty() {
            bail!("device.username must not be empty");
        }
        if self.license_server.address.is_empty() {
            bail!("license_server.address must not be empty");
        }
        for (i, agent) in self.agents.iter().enumerate() {
            if agent.address.is_empty() {
                bail!("agents[{i}].address must not be empty");
            }
            if agent.interface.is_empty() {
                bail!("agents[{i}].interface must not be empty");
            }
        }
        Ok(())
    }
}
