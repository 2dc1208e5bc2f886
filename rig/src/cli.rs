//! Command implementations behind the CLI surface.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use tracing::info;

use crate::config::RigConfig;
use crate::defs::{Environment, Playbook, discover_testcases};
use crate::exit_codes;
use crate::kpi::parse_rule;
use crate::orchestrator::{self, RunRequest};
use crate::report;

pub struct RunArgs {
    pub root: PathBuf,
    pub playbook: String,
    pub config: Option<PathBuf>,
    pub env_overrides: BTreeMap<String, String>,
}

/// Parse a `MODULE=ENVID` override pair.
pub fn parse_env_override(raw: &str) -> anyhow::Result<(String, String)> {
    let Some((module, env)) = raw.split_once('=') else {
        bail!("expected MODULE=ENVID, got {raw:?}");
    };
    if module.is_empty() || env.is_empty() {
        bail!("expected MODULE=ENVID, got {raw:?}");
    }
    Ok((module.to_string(), env.to_string()))
}

/// Execute a playbook and return the process exit code.
pub fn run(args: &RunArgs) -> anyhow::Result<i32> {
    let playbook_path = args
        .root
        .join("playbooks")
        .join(format!("{}.toml", args.playbook));
    let playbook = Playbook::load(&playbook_path)?;

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| args.root.join("rig.toml"));
    let config = RigConfig::load(&config_path)?;

    let run_id = orchestrator::generate_run_id();
    let run_dir = args.root.join("results").join(&run_id);
    info!(run_id = %run_id, playbook = %playbook.name, "run starting");

    let request = RunRequest {
        root: &args.root,
        playbook: &playbook,
        config: &config,
        run_id: &run_id,
        run_dir: &run_dir,
        env_overrides: &args.env_overrides,
    };
    let run_report = orchestrator::run_playbook(&request)?;

    let (summary, skipped) = report::aggregate(&run_dir)?;
    report::write_summary(&run_dir, &summary)?;
    for path in &skipped {
        eprintln!("warning: unreadable session record: {path}");
    }

    println!("run {run_id}: {}", run_dir.display());
    print_summary(&summary);
    if run_report.aborted {
        println!("run aborted before completion");
    }
    Ok(run_report.exit_code())
}

/// Check every definition under the root, including KPI rule syntax.
/// Prints one line per problem and fails when any exist.
pub fn validate(root: &Path) -> anyhow::Result<i32> {
    let mut problems = Vec::new();

    for (dir, what) in [("envs", "environment"), ("playbooks", "playbook")] {
        let path = root.join(dir);
        if !path.exists() {
            problems.push(format!("missing {dir}/ directory under {}", root.display()));
            continue;
        }
        for entry in std::fs::read_dir(&path)
            .with_context(|| format!("failed to read {}", path.display()))?
        {
            let file = entry?.path();
            if file.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }
            let result = match what {
                "environment" => Environment::load(&file).map(|_| ()),
                _ => Playbook::load(&file).map(|_| ()),
            };
            if let Err(e) = result {
                problems.push(format!("{e:#}"));
            }
        }
    }

    match discover_testcases(&root.join("testcases")) {
        Ok(testcases) => {
            for testcase in &testcases {
                for (group, rules) in &testcase.kpi {
                    for rule in rules {
                        if let Err(e) = parse_rule(rule) {
                            problems.push(format!("testcase {} group {group:?}: {e}", testcase.id));
                        }
                    }
                }
            }
        }
        Err(e) => problems.push(format!("{e:#}")),
    }

    if problems.is_empty() {
        println!("definitions ok");
        Ok(exit_codes::OK)
    } else {
        for problem in &problems {
            println!("problem: {problem}");
        }
        println!("{} problem(s) found", problems.len());
        Ok(exit_codes::INVALID)
    }
}

/// List the definitions available under the root.
pub fn list(root: &Path) -> anyhow::Result<()> {
    println!("environments:");
    for name in toml_stems(&root.join("envs"))? {
        println!("  {name}");
    }
    println!("testcases:");
    for name in toml_stems(&root.join("testcases"))? {
        println!("  {name}");
    }
    println!("playbooks:");
    for name in toml_stems(&root.join("playbooks"))? {
        println!("  {name}");
    }
    Ok(())
}

/// Re-aggregate an existing run directory.
pub fn report(run_dir: &Path) -> anyhow::Result<i32> {
    if !run_dir.is_dir() {
        bail!("run directory not found: {}", run_dir.display());
    }
    let (summary, skipped) = report::aggregate(run_dir)?;
    for path in &skipped {
        eprintln!("warning: unreadable session record: {path}");
    }
    print_summary(&summary);
    let code = if summary.fail > 0 || summary.aborted > 0 {
        exit_codes::FAILED
    } else if summary.inconclusive > 0 {
        exit_codes::INCONCLUSIVE
    } else {
        exit_codes::OK
    };
    Ok(code)
}

fn print_summary(summary: &report::ReportSummary) {
    println!(
        "sessions: {} (pass {}, fail {}, inconclusive {}, aborted {})",
        summary.sessions, summary.pass, summary.fail, summary.inconclusive, summary.aborted
    );
    for (kind, count) in &summary.causes {
        println!("  cause {kind}: {count}");
    }
}

fn toml_stems(dir: &Path) -> anyhow::Result<Vec<String>> {
    let mut stems = Vec::new();
    if !dir.exists() {
        return Ok(stems);
    }
    for entry in
        std::fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?
    {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some("toml")
            && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
        {
            stems.push(stem.to_string());
        }
    }
    stems.sort();
    Ok(stems)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_override_parsing() {
        assert_eq!(
            parse_env_override("core=lab2").expect("parse"),
            ("core".to_string(), "lab2".to_string())
        );
        assert!(parse_env_override("core").is_err());
        assert!(parse_env_override("=lab2").is_err());
        assert!(parse_env_override("core=").is_err());
    }

    #[test]
    fn validate_reports_bad_rule_syntax() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        std::fs::create_dir_all(root.join("envs")).expect("mkdir");
        std::fs::create_dir_all(root.join("playbooks")).expect("mkdir");
        std::fs::create_dir_all(root.join("testcases")).expect("mkdir");
        std::fs::write(
            root.join("testcases/tc.toml"),
            r#"
[testcase]
exported_config = "c.zip"
driver_script = "d.sh"

[kpi]
"Stats" = ["Sessions 5"]
"#,
        )
        .expect("write");

        let code = validate(root).expect("validate");
        assert_eq!(code, exit_codes::INVALID);
    }

    #[test]
    fn validate_passes_on_clean_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        std::fs::create_dir_all(root.join("envs")).expect("mkdir");
        std::fs::create_dir_all(root.join("playbooks")).expect("mkdir");
        std::fs::create_dir_all(root.join("testcases")).expect("mkdir");
        std::fs::write(
            root.join("envs/lab1.toml"),
            r#"
[device]
address = "10.0.0.5"
username = "admin"
password = "secret"

[license_server]
address = "10.0.0.9"
kind = "embedded"
"#,
        )
        .expect("write");
        std::fs::write(
            root.join("playbooks/nightly.toml"),
            r#"
[[stages]]
name = "smoke"

[[stages.modules]]
name = "core"
env = "lab1"
playlist = ["tc"]
"#,
        )
        .expect("write");
        std::fs::write(
            root.join("testcases/tc.toml"),
            r#"
[testcase]
exported_config = "c.zip"
driver_script = "d.sh"
"#,
        )
        .expect("write");

        let code = validate(root).expect("validate");
        assert_eq!(code, exit_codes::OK);
    }
}
