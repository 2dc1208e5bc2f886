//! Playbook execution.
//!
//! Stages run sequentially; the modules of a stage run concurrently, one
//! worker thread per module; a module's playlist runs in order. Every
//! testcase becomes exactly one session record, written to disk as soon
//! as the session ends, so a crash mid-run loses at most the in-flight
//! sessions.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{Local, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use tracing::{info, instrument, warn};

use crate::abort::AbortFlag;
use crate::artifacts;
use crate::config::RigConfig;
use crate::defs::{Environment, ModuleDef, Playbook, Testcase};
use crate::driver::{self, DriverAction, DriverRequest, Invoked};
use crate::error::Failure;
use crate::exit_codes;
use crate::kpi::{self, Verdict};
use crate::locker::{Acquire, EnvironmentLocker};
use crate::results::{self, Ingested};
use crate::session::{SessionRecord, SessionState, SessionStatus};

pub struct RunRequest<'a> {
    pub root: &'a Path,
    pub playbook: &'a Playbook,
    pub config: &'a RigConfig,
    pub run_id: &'a str,
    pub run_dir: &'a Path,
    /// Module name → environment id, overriding the playbook binding.
    pub env_overrides: &'a BTreeMap<String, String>,
}

pub struct RunReport {
    pub run_id: String,
    pub sessions: Vec<SessionRecord>,
    pub aborted: bool,
}

impl RunReport {
    pub fn exit_code(&self) -> i32 {
        if self.aborted
            || self
                .sessions
                .iter()
                .any(|s| matches!(s.status, SessionStatus::Fail | SessionStatus::Aborted))
        {
            exit_codes::FAILED
        } else if self
            .sessions
            .iter()
            .any(|s| s.status == SessionStatus::Inconclusive)
        {
            exit_codes::INCONCLUSIVE
        } else {
            exit_codes::OK
        }
    }
}

/// Timestamped run id with a random suffix to disambiguate rapid starts.
pub fn generate_run_id() -> String {
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect();
    format!("run-{stamp}_{suffix}")
}

/// Execute a playbook end to end.
pub fn run_playbook(req: &RunRequest<'_>) -> anyhow::Result<RunReport> {
    std::fs::create_dir_all(req.run_dir)
        .with_context(|| format!("failed to create run dir: {}", req.run_dir.display()))?;

    let locker = EnvironmentLocker::new(req.config.lock_timeout());
    let abort = AbortFlag::new();
    let mut sessions = Vec::new();

    for stage in &req.playbook.stages {
        if abort.is_raised() {
            break;
        }
        info!(stage = %stage.name, modules = stage.modules.len(), "stage starting");

        let stage_sessions: Vec<Vec<SessionRecord>> = std::thread::scope(|scope| {
            let handles: Vec<_> = stage
                .modules
                .iter()
                .map(|module| {
                    let ctx = ModuleCtx {
                        req,
                        locker: &locker,
                        abort: &abort,
                        stage: &stage.name,
                        module,
                    };
                    scope.spawn(move || ctx.run())
                })
                .collect();
            handles
                .into_iter()
                .map(|h| {
                    h.join().unwrap_or_else(|_| {
                        warn!(stage = %stage.name, "module worker panicked");
                        Vec::new()
                    })
                })
                .collect()
        });
        sessions.extend(stage_sessions.into_iter().flatten());
    }

    Ok(RunReport {
        run_id: req.run_id.to_string(),
        sessions,
        aborted: abort.is_raised(),
    })
}

enum Executed {
    Verdict(Verdict),
    Aborted,
}

struct ModuleCtx<'a> {
    req: &'a RunRequest<'a>,
    locker: &'a Arc<EnvironmentLocker>,
    abort: &'a AbortFlag,
    stage: &'a str,
    module: &'a ModuleDef,
}

impl ModuleCtx<'_> {
    #[instrument(skip_all, fields(stage = self.stage, module = %self.module.name))]
    fn run(&self) -> Vec<SessionRecord> {
        let env_id = self
            .req
            .env_overrides
            .get(&self.module.name)
            .map(String::as_str)
            .unwrap_or(&self.module.env);

        let env_path = self.req.root.join("envs").join(format!("{env_id}.toml"));
        let env = match Environment::load(&env_path) {
            Ok(env) => env,
            Err(e) => {
                // Without an environment nothing can run; every playlist
                // entry gets a definition-failure session.
                warn!(env = env_id, "environment unavailable: {e:#}");
                return self.definition_failures(env_id, Failure::config(format!("{e:#}")));
            }
        };

        let mut records = Vec::new();
        let last = self.module.playlist.len().saturating_sub(1);
        for (idx, testcase_id) in self.module.playlist.iter().enumerate() {
            if self.abort.is_raised() {
                break;
            }

            let record = match self.load_testcase(testcase_id) {
                Ok(testcase) => self.run_testcase(idx, &testcase, &env),
                Err(failure) => self.failed_record(idx, testcase_id, &env.id, failure),
            };
            let failed = matches!(record.status, SessionStatus::Fail);
            records.push(record);

            if failed && self.module.policy.abort_on_failure {
                warn!(testcase = %testcase_id, "aborting run after failed testcase");
                self.abort.raise();
                break;
            }
            let wait = self.module.policy.wait_time_between_tests;
            if wait > 0 && idx < last && !self.abort.sleep(Duration::from_secs(wait)) {
                break;
            }
        }
        records
    }

    fn load_testcase(&self, id: &str) -> Result<Testcase, Failure> {
        let path = self.req.root.join("testcases").join(format!("{id}.toml"));
        Testcase::load(&path).map_err(|e| Failure::config(format!("{e:#}")))
    }

    #[instrument(skip_all, fields(testcase = %testcase.id))]
    fn run_testcase(&self, idx: usize, testcase: &Testcase, env: &Environment) -> SessionRecord {
        let session_dir = self.session_dir(idx, &testcase.id);
        let work_dir = session_dir.join("work");
        let mut record = self.new_record(idx, &testcase.id, &env.id);

        if let Err(e) = std::fs::create_dir_all(&work_dir) {
            record.status = SessionStatus::Fail;
            record.cause = Some(Failure::config(format!(
                "failed to create session dir {}: {e}",
                work_dir.display()
            )));
            record.ended_at = Utc::now().to_rfc3339();
            return record;
        }

        let status = self.execute(testcase, env, &mut record, &session_dir, &work_dir);
        record.status = status;
        record.ended_at = Utc::now().to_rfc3339();
        if let Err(e) = record.write(&session_dir) {
            warn!("failed to persist session record: {e:#}");
        }
        info!(
            testcase = %testcase.id,
            status = ?record.status,
            state = ?record.state_reached,
            "session finished"
        );
        record
    }

    /// Drive one session through its states. The environment lease is
    /// scoped to this function, so release is guaranteed on every path,
    /// including panics in the phases below.
    fn execute(
        &self,
        testcase: &Testcase,
        env: &Environment,
        record: &mut SessionRecord,
        session_dir: &Path,
        work_dir: &Path,
    ) -> SessionStatus {
        record.state_reached = SessionState::Locking;
        let lease = match self
            .locker
            .acquire(&env.id, !env.parallel_usage, self.abort)
        {
            Ok(Acquire::Granted(lease)) => lease,
            Ok(Acquire::Aborted) => return SessionStatus::Aborted,
            Err(failure) => {
                record.cause = Some(failure);
                return SessionStatus::Fail;
            }
        };
        record.lock_wait_ms = lease.wait.as_millis() as u64;

        let executed = self.run_phases(testcase, env, record, session_dir, work_dir);

        // Finalize: artifacts are pulled even for failed or aborted
        // sessions so partial evidence survives.
        let exported_config = resolve(self.req.root, &testcase.exported_config);
        let mut warnings = artifacts::collect(
            &record.session_id,
            work_dir,
            session_dir,
            &self.module.fetch,
            &exported_config,
        );
        record.warnings.append(&mut warnings);

        let status = match executed {
            Ok(Executed::Verdict(Verdict::Pass)) => SessionStatus::Pass,
            Ok(Executed::Verdict(Verdict::Fail)) => SessionStatus::Fail,
            Ok(Executed::Verdict(Verdict::Inconclusive)) => SessionStatus::Inconclusive,
            Ok(Executed::Aborted) => SessionStatus::Aborted,
            Err(failure) => {
                record.cause = Some(failure);
                SessionStatus::Fail
            }
        };

        record.state_reached = SessionState::Cleaning;
        self.cleanup(testcase, env, status, record, work_dir);
        lease.release();

        if !matches!(status, SessionStatus::Aborted) {
            record.state_reached = SessionState::Done;
        }
        status
    }

    fn run_phases(
        &self,
        testcase: &Testcase,
        env: &Environment,
        record: &mut SessionRecord,
        session_dir: &Path,
        work_dir: &Path,
    ) -> Result<Executed, Failure> {
        record.state_reached = SessionState::Configuring;
        let results_dir = results::prepare_results_dir(work_dir)
            .map_err(|e| Failure::config(format!("{e:#}")))?;
        if self.module.policy.reboot_agents_before_each_test {
            match self.invoke(DriverAction::RebootAgents, testcase, env, work_dir)? {
                Invoked::Aborted => return Ok(Executed::Aborted),
                Invoked::Finished(outcome) => {
                    check_outcome(DriverAction::RebootAgents, &outcome, self.req.config)?;
                }
            }
        }

        record.state_reached = SessionState::Running;
        match self.invoke(DriverAction::Run, testcase, env, work_dir)? {
            Invoked::Aborted => return Ok(Executed::Aborted),
            Invoked::Finished(outcome) => {
                record.driver_exit_code = outcome.exit_code;
                persist_driver_logs(session_dir, &outcome, &mut record.warnings);
                check_outcome(DriverAction::Run, &outcome, self.req.config)?;
            }
        }

        // A testcase without KPI rules has nothing to fetch or judge.
        if testcase.kpi.is_empty() {
            record.state_reached = SessionState::Evaluating;
            return Ok(Executed::Verdict(Verdict::Pass));
        }

        record.state_reached = SessionState::Fetching;
        let set = match results::await_results(
            &results_dir,
            self.req.config.results_grace(),
            self.abort,
        )? {
            Ingested::Ready(set) => set,
            Ingested::Aborted => return Ok(Executed::Aborted),
        };

        record.state_reached = SessionState::Evaluating;
        let judgment = kpi::evaluate(&testcase.kpi, &set);
        record.rules = judgment.rules;
        Ok(Executed::Verdict(judgment.verdict))
    }

    /// Post-verdict device cleanup. Problems here degrade to warnings;
    /// the verdict is already settled.
    fn cleanup(
        &self,
        testcase: &Testcase,
        env: &Environment,
        status: SessionStatus,
        record: &mut SessionRecord,
        work_dir: &Path,
    ) {
        let policy = &self.module.policy;
        let failed = matches!(status, SessionStatus::Fail | SessionStatus::Aborted);

        if policy.delete_session && (!failed || policy.delete_session_on_failure) {
            self.cleanup_action(DriverAction::DeleteSession, testcase, env, work_dir, record);
        }
        if policy.delete_device_logs_on_success && status.passed() {
            self.cleanup_action(DriverAction::DeleteLogs, testcase, env, work_dir, record);
        }
    }

    fn cleanup_action(
        &self,
        action: DriverAction,
        testcase: &Testcase,
        env: &Environment,
        work_dir: &Path,
        record: &mut SessionRecord,
    ) {
        match self.invoke(action, testcase, env, work_dir) {
            Ok(Invoked::Finished(outcome)) if outcome.success() => {}
            Ok(Invoked::Finished(outcome)) => {
                record.warnings.push(format!(
                    "cleanup action {} failed (exit code {:?})",
                    action.as_str(),
                    outcome.exit_code
                ));
            }
            Ok(Invoked::Aborted) => {
                record
                    .warnings
                    .push(format!("cleanup action {} interrupted by abort", action.as_str()));
            }
            Err(failure) => {
                record
                    .warnings
                    .push(format!("cleanup action {} failed: {failure}", action.as_str()));
            }
        }
    }

    fn invoke(
        &self,
        action: DriverAction,
        testcase: &Testcase,
        env: &Environment,
        work_dir: &Path,
    ) -> Result<Invoked, Failure> {
        let req = DriverRequest {
            root: self.req.root,
            testcase,
            env,
            work_dir,
            timeout: self.req.config.driver_timeout(),
            output_limit_bytes: self.req.config.driver_output_limit_bytes,
        };
        driver::invoke(action, &req, self.abort)
    }

    fn session_dir(&self, idx: usize, testcase_id: &str) -> PathBuf {
        self.req
            .run_dir
            .join(self.stage)
            .join(&self.module.name)
            .join(format!("{:02}_{testcase_id}", idx + 1))
    }

    fn new_record(&self, idx: usize, testcase_id: &str, env_id: &str) -> SessionRecord {
        SessionRecord {
            session_id: format!(
                "{}.{}.{:02}_{testcase_id}",
                self.stage,
                self.module.name,
                idx + 1
            ),
            stage: self.stage.to_string(),
            module: self.module.name.to_string(),
            testcase: testcase_id.to_string(),
            environment: env_id.to_string(),
            started_at: Utc::now().to_rfc3339(),
            ended_at: String::new(),
            lock_wait_ms: 0,
            driver_exit_code: None,
            state_reached: SessionState::Pending,
            status: SessionStatus::Fail,
            cause: None,
            rules: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// A session that failed before execution started. The record is
    /// still written to disk when the session directory can be created.
    fn failed_record(
        &self,
        idx: usize,
        testcase_id: &str,
        env_id: &str,
        failure: Failure,
    ) -> SessionRecord {
        let mut record = self.new_record(idx, testcase_id, env_id);
        record.cause = Some(failure);
        record.ended_at = Utc::now().to_rfc3339();
        let session_dir = self.session_dir(idx, testcase_id);
        if std::fs::create_dir_all(&session_dir).is_ok()
            && let Err(e) = record.write(&session_dir)
        {
            warn!("failed to persist session record: {e:#}");
        }
        record
    }

    fn definition_failures(&self, env_id: &str, failure: Failure) -> Vec<SessionRecord> {
        self.module
            .playlist
            .iter()
            .enumerate()
            .map(|(idx, testcase_id)| {
                self.failed_record(idx, testcase_id, env_id, failure.clone())
            })
            .collect()
    }
}

fn check_outcome(
    action: DriverAction,
    outcome: &driver::DriverOutcome,
    config: &RigConfig,
) -> Result<(), Failure> {
    if outcome.timed_out {
        return Err(Failure::DriverTimeout {
            action: action.as_str().to_string(),
            timeout_secs: config.driver_timeout_secs,
        });
    }
    if outcome.exit_code != Some(0) {
        return Err(Failure::DriverCrash {
            action: action.as_str().to_string(),
            exit_code: outcome.exit_code,
            stderr_tail: outcome.stderr_tail(),
        });
    }
    Ok(())
}

fn persist_driver_logs(
    session_dir: &Path,
    outcome: &driver::DriverOutcome,
    warnings: &mut Vec<String>,
) {
    for (name, data) in [
        ("driver.stdout.log", &outcome.stdout),
        ("driver.stderr.log", &outcome.stderr),
    ] {
        if let Err(e) = std::fs::write(session_dir.join(name), data) {
            warnings.push(format!("failed to write {name}: {e}"));
        }
    }
}

fn resolve(root: &Path, rel: &str) -> PathBuf {
    let path = Path::new(rel);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}
