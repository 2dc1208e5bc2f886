//! KPI rules: parsing and evaluation.

mod eval;
mod rule;

pub use eval::{Judgment, RuleVerdict, Verdict, evaluate};
pub use rule::{Operator, Rule, Threshold, parse_rule};
