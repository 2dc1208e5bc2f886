//! Declarative definitions: environments, testcases, playbooks.
//!
//! Definitions live under a root directory:
//!
//! ```text
//! <root>/
//!   envs/<env-id>.toml
//!   testcases/<testcase-id>.toml
//!   playbooks/<playbook-name>.toml
//!   rig.toml            (optional engine config)
//! ```
//!
//! Identifiers are derived from file stems and double as path components
//! in the results tree, so they are restricted to a filesystem-safe
//! alphabet.

mod environment;
mod playbook;
mod testcase;

pub use environment::{Agent, Device, Environment, LicenseKind, LicenseServer};
pub use playbook::{FetchPolicy, ModuleDef, ModulePolicy, Playbook, Stage};
pub use testcase::{Testcase, discover_testcases};

use anyhow::bail;

/// Validate an identifier that will be used as a path component.
///
/// Allowed: lowercase ASCII alphanumerics, `-`, `_`. This keeps ids usable
/// verbatim in directory names and environment variables.
pub(crate) fn validate_slug(what: &str, slug: &str) -> anyhow::Result<()> {
    if slug.is_empty() {
        bail!("{what} must not be empty");
    }
    if !slug
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
    {
        bail!("{what} {slug:?} contains characters outside [a-z0-9_-]");
    }
    Ok(())
}
