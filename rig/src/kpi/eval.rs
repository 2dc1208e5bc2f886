//! KPI evaluation.
//!
//! Each declared rule is judged independently against the ingested result
//! set and the per-rule verdicts are folded into one session verdict:
//! any Fail → Fail, else any Inconclusive → Inconclusive, else Pass.
//! Missing data never masquerades as success or failure — an absent group,
//! an absent metric, or a non-numeric observation under an ordering
//! operator all yield Inconclusive.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::kpi::rule::{Operator, Threshold, parse_rule};
use crate::results::{MetricValue, ResultSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail,
    Inconclusive,
}

/// Judgment of a single rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleVerdict {
    pub group: String,
    /// The rule exactly as declared.
    pub rule: String,
    pub verdict: Verdict,
    /// Observed raw value, when the metric was found.
    pub observed: Option<String>,
    /// Explanation for non-Pass verdicts.
    pub note: Option<String>,
}

/// Judgment of a whole testcase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Judgment {
    pub rules: Vec<RuleVerdict>,
    pub verdict: Verdict,
}

/// Evaluate every rule of every group against `results`.
///
/// An empty rule table means the testcase declared nothing to check and
/// passes vacuously.
pub fn evaluate(kpi: &BTreeMap<String, Vec<String>>, results: &ResultSet) -> Judgment {
    let mut rules = Vec::new();
    for (group, rule_strings) in kpi {
        for raw in rule_strings {
            rules.push(evaluate_rule(group, raw, results));
        }
    }
    let verdict = fold(&rules);
    debug!(rules = rules.len(), ?verdict, "kpi evaluated");
    Judgment { rules, verdict }
}

fn fold(rules: &[RuleVerdict]) -> Verdict {
    if rules.iter().any(|r| r.verdict == Verdict::Fail) {
        Verdict::Fail
    } else if rules.iter().any(|r| r.verdict == Verdict::Inconclusive) {
        Verdict::Inconclusive
    } else {
        Verdict::Pass
    }
}

fn evaluate_rule(group: &str, raw: &str, results: &ResultSet) -> RuleVerdict {
    let mut out = RuleVerdict {
        group: group.to_string(),
        rule: raw.to_string(),
        verdict: Verdict::Inconclusive,
        observed: None,
        note: None,
    };

    let rule = match parse_rule(raw) {
        Ok(rule) => rule,
        Err(e) => {
            out.note = Some(e.to_string());
            return out;
        }
    };

    let Some(value) = results.value(group, &rule.metric) else {
        out.note = Some(if results.groups.contains_key(group) {
            format!("metric {:?} not present in group {group:?}", rule.metric)
        } else {
            format!("result group {group:?} not present")
        });
        return out;
    };
    out.observed = Some(value.raw.clone());

    match check(&rule.op, &rule.threshold, value) {
        Some(true) => out.verdict = Verdict::Pass,
        Some(false) => {
            out.verdict = Verdict::Fail;
            out.note = Some(format!(
                "observed {:?}, required {} {}",
                value.raw,
                rule.op.symbol(),
                threshold_display(&rule.threshold)
            ));
        }
        None => {
            out.note = Some(format!(
                "observed {:?} is not numeric, cannot compare with {}",
                value.raw,
                rule.op.symbol()
            ));
        }
    }
    out
}

/// `None` means the comparison is undecidable (non-numeric observation
/// against a numeric threshold).
fn check(op: &Operator, threshold: &Threshold, value: &MetricValue) -> Option<bool> {
    match threshold {
        Threshold::Number(want) => {
            let got = value.number?;
            Some(match op {
                Operator::Eq => got == *want,
                Operator::Ne => got != *want,
                Operator::Gt => got > *want,
                Operator::Lt => got < *want,
                Operator::Ge => got >= *want,
                Operator::Le => got <= *want,
            })
        }
        Threshold::Range(lo, hi) => {
            let got = value.number?;
            let inside = got >= *lo && got <= *hi;
            Some(match op {
                Operator::Eq => inside,
                Operator::Ne => !inside,
                // parse_rule rejects ordering ops for ranges
                _ => inside,
            })
        }
        Threshold::Text(want) => {
            let got = value.raw.trim();
            Some(match op {
                Operator::Eq => got == want.as_str(),
                Operator::Ne => got != want.as_str(),
                _ => return None,
            })
        }
    }
}

fn threshold_display(threshold: &Threshold) -> String {
    match threshold {
        Threshold::Number(n) => n.to_string(),
        Threshold::Range(lo, hi) => format!("{lo}-{hi}"),
        Threshold::Text(t) => format!("{t:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::ResultGroup;

    fn results(rows: &[(&str, &str, &str)]) -> ResultSet {
        let mut set = ResultSet::default();
        for (group, metric, value) in rows {
            set.groups
                .entry((*group).to_string())
                .or_insert_with(ResultGroup::default)
                .records
                .insert((*metric).to_string(), MetricValue::new(*value));
        }
        set
    }

    fn kpi(group: &str, rules: &[&str]) -> BTreeMap<String, Vec<String>> {
        let mut map = BTreeMap::new();
        map.insert(
            group.to_string(),
            rules.iter().map(|r| (*r).to_string()).collect(),
        );
        map
    }

    #[test]
    fn passing_threshold() {
        let set = results(&[("RegistrationStats", "Registration Succeeded", "85")]);
        let judgment = evaluate(&kpi("RegistrationStats", &["Registration Succeeded>80"]), &set);
        assert_eq!(judgment.verdict, Verdict::Pass);
        assert_eq!(judgment.rules[0].observed.as_deref(), Some("85"));
    }

    #[test]
    fn strict_greater_fails_on_equal_value() {
        let set = results(&[("RegistrationStats", "Registration Succeeded", "80")]);
        let judgment = evaluate(&kpi("RegistrationStats", &["Registration Succeeded>80"]), &set);
        assert_eq!(judgment.verdict, Verdict::Fail);
        assert!(judgment.rules[0].note.as_deref().unwrap().contains("observed"));
    }

    #[test]
    fn missing_metric_is_inconclusive() {
        let set = results(&[("RegistrationStats", "Registration Succeeded", "85")]);
        let judgment = evaluate(&kpi("RegistrationStats", &["Registration Failed=0"]), &set);
        assert_eq!(judgment.verdict, Verdict::Inconclusive);
        assert!(judgment.rules[0].note.as_deref().unwrap().contains("not present"));
    }

    #[test]
    fn missing_group_is_inconclusive() {
        let set = results(&[("Other", "x", "1")]);
        let judgment = evaluate(&kpi("RegistrationStats", &["Registration Failed=0"]), &set);
        assert_eq!(judgment.verdict, Verdict::Inconclusive);
    }

    #[test]
    fn malformed_rule_is_inconclusive_not_fatal() {
        let set = results(&[("Stats", "Sessions", "5")]);
        let judgment = evaluate(&kpi("Stats", &["Sessions 5", "Sessions=5"]), &set);
        assert_eq!(judgment.rules[0].verdict, Verdict::Inconclusive);
        assert_eq!(judgment.rules[1].verdict, Verdict::Pass);
        assert_eq!(judgment.verdict, Verdict::Inconclusive);
    }

    #[test]
    fn fail_dominates_inconclusive() {
        let set = results(&[("Stats", "Sessions", "5")]);
        let judgment = evaluate(&kpi("Stats", &["Missing=0", "Sessions=9"]), &set);
        assert_eq!(judgment.verdict, Verdict::Fail);
    }

    #[test]
    fn non_numeric_observation_under_ordering_is_inconclusive() {
        let set = results(&[("Stats", "Sessions", "n/a")]);
        let judgment = evaluate(&kpi("Stats", &["Sessions>0"]), &set);
        assert_eq!(judgment.verdict, Verdict::Inconclusive);
        assert!(judgment.rules[0].note.as_deref().unwrap().contains("not numeric"));
    }

    #[test]
    fn text_equality() {
        let set = results(&[("Stats", "Status", "up")]);
        assert_eq!(evaluate(&kpi("Stats", &["Status=up"]), &set).verdict, Verdict::Pass);
        assert_eq!(evaluate(&kpi("Stats", &["Status!=down"]), &set).verdict, Verdict::Pass);
        assert_eq!(evaluate(&kpi("Stats", &["Status=down"]), &set).verdict, Verdict::Fail);
    }

    #[test]
    fn range_membership() {
        let set = results(&[("Stats", "Latency", "15")]);
        assert_eq!(evaluate(&kpi("Stats", &["Latency=10-20"]), &set).verdict, Verdict::Pass);
        assert_eq!(evaluate(&kpi("Stats", &["Latency!=10-20"]), &set).verdict, Verdict::Fail);
    }

    #[test]
    fn empty_rule_table_passes() {
        let judgment = evaluate(&BTreeMap::new(), &ResultSet::default());
        assert_eq!(judgment.verdict, Verdict::Pass);
        assert!(judgment.rules.is_empty());
    }
}
