//! Stable process exit codes.
//!
//! Scripts wrapping the CLI key off these values, so they are part of the
//! public contract and must not be renumbered.

/// Every executed session passed.
pub const OK: i32 = 0;

/// Definitions or arguments were invalid; no run was attempted (or the
/// engine itself failed).
pub const INVALID: i32 = 1;

/// At least one session failed or was aborted.
pub const FAILED: i32 = 2;

/// No session failed, but at least one was inconclusive.
pub const INCONCLUSIVE: i32 = 3;
