//! Failure taxonomy for testcase execution.
//!
//! Failures are contained at the testcase boundary: every variant here is
//! fatal to the owning testcase only and is recorded on its session record
//! as the failure cause. Artifact problems are deliberately *not* part of
//! this enum; they stay non-fatal warnings on the session.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A testcase-level failure with a stable, serializable cause.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Failure {
    /// Malformed or missing definition field. Fatal to the affected
    /// testcase or module only, never to the whole run.
    #[error("invalid definition: {message}")]
    Config { message: String },

    /// Malformed KPI rule string. Degrades only that rule's verdict to
    /// inconclusive.
    #[error("malformed kpi rule {rule:?}: {message}")]
    RuleSyntax { rule: String, message: String },

    /// Environment lock could not be acquired before the deadline.
    #[error("timed out after {waited_secs}s waiting for environment {env}")]
    LockTimeout { env: String, waited_secs: u64 },

    /// Driver process exceeded its deadline and was killed.
    #[error("driver action {action} exceeded {timeout_secs}s deadline")]
    DriverTimeout { action: String, timeout_secs: u64 },

    /// Driver process failed to start or exited abnormally.
    #[error("driver action {action} failed (exit code {exit_code:?})")]
    DriverCrash {
        action: String,
        exit_code: Option<i32>,
        stderr_tail: String,
    },

    /// No result file appeared within the grace deadline after the driver
    /// run completed.
    #[error("no result files appeared within {waited_secs}s")]
    ResultsNotFound { waited_secs: u64 },

    /// A result file existed but could not be parsed.
    #[error("malformed result data: {message}")]
    ResultsParse { message: String },
}

impl Failure {
    pub fn config(message: impl Into<String>) -> Self {
        Failure::Config {
            message: message.into(),
        }
    }

    /// Stable label used in session records and report aggregation.
    pub fn kind(&self) -> &'static str {
        match self {
            Failure::Config { .. } => "config",
            Failure::RuleSyntax { .. } => "rule_syntax",
            Failure::LockTimeout { .. } => "lock_timeout",
            Failure::DriverTimeout { .. } => "driver_timeout",
            Failure::DriverCrash { .. } => "driver_crash",
            Failure::ResultsNotFound { .. } => "results_not_found",
            Failure::ResultsParse { .. } => "results_parse",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_labels_are_stable() {
        let failure = Failure::LockTimeout {
            env: "lab1".to_string(),
            waited_secs: 30,
        };
        assert_eq!(failure.kind(), "lock_timeout");
        assert!(failure.to_string().contains("lab1"));
    }

    #[test]
    fn failure_round_trips_through_json() {
        let failure = Failure::DriverCrash {
            action: "run".to_string(),
            exit_code: Some(2),
            stderr_tail: "boom".to_string(),
        };
        let json = serde_json::to_string(&failure).expect("serialize");
        let back: Failure = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, failure);
        assert!(json.contains("driver_crash"));
    }
}
