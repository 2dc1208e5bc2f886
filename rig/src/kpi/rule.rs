//! KPI rule strings.
//!
//! A rule has the shape `Metric OP threshold`, e.g.
//! `Registration Succeeded >= 95`. Metric names may contain spaces and
//! are matched verbatim against result table rows, so the parser scans
//! for the operator rather than splitting on whitespace. At each position
//! two-character operators are tried before one-character ones, so
//! `>= 95` never parses as `>` with threshold `= 95`.

use crate::error::Failure;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

impl Operator {
    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Gt => ">",
            Operator::Lt => "<",
            Operator::Ge => ">=",
            Operator::Le => "<=",
        }
    }

    /// Ordering operators require a numeric threshold and observation.
    pub fn is_ordering(self) -> bool {
        matches!(
            self,
            Operator::Gt | Operator::Lt | Operator::Ge | Operator::Le
        )
    }
}

/// Right-hand side of a rule.
#[derive(Debug, Clone, PartialEq)]
pub enum Threshold {
    Number(f64),
    /// Inclusive numeric range, written `lo-hi`. Valid with `=` and `!=`.
    Range(f64, f64),
    /// Verbatim text comparison. Valid with `=` and `!=`.
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub metric: String,
    pub op: Operator,
    pub threshold: Threshold,
}

/// Operators ordered longest-first so the scan is greedy per position.
const OPERATORS: &[(&str, Operator)] = &[
    (">=", Operator::Ge),
    ("<=", Operator::Le),
    ("!=", Operator::Ne),
    ("==", Operator::Eq),
    ("=", Operator::Eq),
    (">", Operator::Gt),
    ("<", Operator::Lt),
];

/// Parse a rule string into metric, operator, and threshold.
pub fn parse_rule(raw: &str) -> Result<Rule, Failure> {
    let syntax = |message: &str| Failure::RuleSyntax {
        rule: raw.to_string(),
        message: message.to_string(),
    };

    let mut split = None;
    'scan: for (pos, _) in raw.char_indices() {
        for (symbol, op) in OPERATORS {
            if raw[pos..].starts_with(symbol) {
                split = Some((pos, symbol.len(), *op));
                break 'scan;
            }
        }
    }
    let Some((pos, len, op)) = split else {
        return Err(syntax("no comparison operator found"));
    };

    let metric = raw[..pos].trim();
    if metric.is_empty() {
        return Err(syntax("missing metric name before operator"));
    }
    let rhs = raw[pos + len..].trim();
    if rhs.is_empty() {
        return Err(syntax("missing threshold after operator"));
    }

    let threshold = parse_threshold(rhs);
    match &threshold {
        Threshold::Number(_) => {}
        Threshold::Range(lo, hi) => {
            if op.is_ordering() {
                return Err(syntax("range threshold requires = or !="));
            }
            if lo > hi {
                return Err(syntax("range lower bound exceeds upper bound"));
            }
        }
        Threshold::Text(_) => {
            if op.is_ordering() {
                return Err(syntax("ordering operator requires a numeric threshold"));
            }
        }
    }

    Ok(Rule {
        metric: metric.to_string(),
        op,
        threshold,
    })
}

fn parse_threshold(rhs: &str) -> Threshold {
    if let Ok(n) = rhs.parse::<f64>() {
        return Threshold::Number(n);
    }
    // `lo-hi` range, both sides plain non-negative numbers. A leading
    // minus sign already failed the f64 parse above only for genuine
    // non-numbers, so "-5" never lands here.
    if let Some((lo, hi)) = rhs.split_once('-')
        && let (Ok(lo), Ok(hi)) = (lo.trim().parse::<f64>(), hi.trim().parse::<f64>())
    {
        return Threshold::Range(lo, hi);
    }
    Threshold::Text(rhs.to_string())
}
