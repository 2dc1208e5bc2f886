//! Test-orchestration engine for driver-based device testing.
//!
//! The engine resolves declarative definitions (environments, testcases,
//! playbooks) into an executable plan, serializes access to exclusive
//! hardware, invokes an external driver per testcase, ingests the tabular
//! KPI results the driver leaves behind, judges them against declared
//! thresholds, and collects artifacts into a per-session results tree.
//!
//! The architecture keeps a strict split:
//!
//! - **[`defs`] / [`kpi`]**: Pure parsing, validation, and evaluation.
//!   No I/O side effects beyond reading definition files.
//! - **[`driver`] / [`results`] / [`artifacts`]**: Side-effecting stages
//!   around the external driver process.
//! - **[`orchestrator`]**: The stage → module → testcase loop that wires
//!   the pieces together and owns session-level state.

pub mod abort;
pub mod artifacts;
pub mod cli;
pub mod config;
pub mod defs;
pub mod driver;
pub mod error;
pub mod exit_codes;
pub mod kpi;
pub mod locker;
pub mod logging;
pub mod orchestrator;
pub mod report;
pub mod results;
pub mod session;
