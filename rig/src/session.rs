//! Session records.
//!
//! A session is one testcase execution inside a module. Its record is the
//! durable account of what happened, written as `session.json` in the
//! session's results directory and later aggregated into the run report.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::artifacts::write_json;
use crate::error::Failure;
use crate::kpi::RuleVerdict;

/// Lifecycle of a session. States advance strictly in declaration order;
/// a failed session records the last state it reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Pending,
    Locking,
    Configuring,
    Running,
    Fetching,
    Evaluating,
    Cleaning,
    Done,
}

/// Final status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pass,
    Fail,
    Inconclusive,
    /// The run-wide abort interrupted this session before a verdict.
    Aborted,
}

impl SessionStatus {
    pub fn passed(self) -> bool {
        self == SessionStatus::Pass
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub stage: String,
    pub module: String,
    pub testcase: String,
    pub environment: String,
    pub started_at: String,
    pub ended_at: String,
    /// Milliseconds spent waiting for the environment lock.
    pub lock_wait_ms: u64,
    pub driver_exit_code: Option<i32>,
    pub state_reached: SessionState,
    pub status: SessionStatus,
    /// Cause of a failed session.
    pub cause: Option<Failure>,
    pub rules: Vec<RuleVerdict>,
    /// Non-fatal problems (artifact collection, cleanup actions).
    pub warnings: Vec<String>,
}

pub const SESSION_FILE: &str = "session.json";

impl SessionRecord {
    pub fn write(&self, session_dir: &Path) -> anyhow::Result<()> {
        write_json(&session_dir.join(SESSION_FILE), self)
    }

    pub fn read(session_dir: &Path) -> anyhow::Result<Self> {
        let path = session_dir.join(SESSION_FILE);
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))
    }
}
