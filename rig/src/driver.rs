//! Driver invocation.
//!
//! All device interaction happens through an external driver executable.
//! The engine passes everything the driver needs through environment
//! variables and command-line arguments, enforces a wall-clock deadline,
//! and captures bounded stdout/stderr. The same executable serves the
//! main test run and the auxiliary device actions (agent reboot, session
//! and log cleanup); the action is passed as the first argument and in
//! `RIG_ACTION`.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, warn};
use wait_timeout::ChildExt;

use crate::abort::{AbortFlag, POLL_INTERVAL};
use crate::defs::{Environment, Testcase};
use crate::error::Failure;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverAction {
    Run,
    RebootAgents,
    DeleteSession,
    DeleteLogs,
}

impl DriverAction {
    pub fn as_str(self) -> &'static str {
        match self {
            DriverAction::Run => "run",
            DriverAction::RebootAgents => "reboot-agents",
            DriverAction::DeleteSession => "delete-session",
            DriverAction::DeleteLogs => "delete-logs",
        }
    }
}

/// Everything needed to launch the driver for one testcase.
pub struct DriverRequest<'a> {
    pub root: &'a Path,
    pub testcase: &'a Testcase,
    pub env: &'a Environment,
    /// Working directory for the child; results and artifacts land here.
    pub work_dir: &'a Path,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

/// Captured result of a finished (or killed) driver process.
#[derive(Debug)]
pub struct DriverOutcome {
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub timed_out: bool,
    pub duration: Duration,
}

impl DriverOutcome {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Last portion of stderr as lossy UTF-8, for failure records.
    pub fn stderr_tail(&self) -> String {
        const TAIL: usize = 2048;
        let start = self.stderr.len().saturating_sub(TAIL);
        String::from_utf8_lossy(&self.stderr[start..]).into_owned()
    }
}

/// Outcome of an abort-aware invocation.
#[derive(Debug)]
pub enum Invoked {
    Finished(DriverOutcome),
    Aborted,
}

/// Launch the driver and wait for it, bounded by the deadline and the
/// abort flag. Timeouts and aborts both kill the child; the distinction
/// is reported to the caller, which treats only the former as a failure.
pub fn invoke(
    action: DriverAction,
    req: &DriverRequest<'_>,
    abort: &AbortFlag,
) -> Result<Invoked, Failure> {
    let script = resolve(req.root, &req.testcase.driver_script);
    let mut command = Command::new(&script);
    command
        .arg(action.as_str())
        .current_dir(req.work_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    apply_env(&mut command, action, req);

    let start = Instant::now();
    let mut child = command.spawn().map_err(|e| Failure::DriverCrash {
        action: action.as_str().to_string(),
        exit_code: None,
        stderr_tail: format!("failed to spawn {}: {e}", script.display()),
    })?;

    // Bounded reader threads keep the pipes drained so a chatty driver
    // cannot deadlock on a full pipe buffer.
    let stdout = child.stdout.take().map(|s| spawn_reader(s, req.output_limit_bytes));
    let stderr = child.stderr.take().map(|s| spawn_reader(s, req.output_limit_bytes));

    let deadline = start + req.timeout;
    let (status, timed_out) = loop {
        if abort.is_raised() {
            kill_quietly(&mut child, action);
            let _ = child.wait();
            join_reader(stdout);
            join_reader(stderr);
            return Ok(Invoked::Aborted);
        }
        let now = Instant::now();
        if now >= deadline {
            kill_quietly(&mut child, action);
            let status = child.wait().ok();
            break (status, true);
        }
        let slice = deadline.saturating_duration_since(now).min(POLL_INTERVAL * 2);
        match child.wait_timeout(slice) {
            Ok(Some(status)) => break (Some(status), false),
            Ok(None) => {}
            Err(e) => {
                kill_quietly(&mut child, action);
                let _ = child.wait();
                join_reader(stdout);
                join_reader(stderr);
                return Err(Failure::DriverCrash {
                    action: action.as_str().to_string(),
                    exit_code: None,
                    stderr_tail: format!("failed to wait on driver: {e}"),
                });
            }
        }
    };

    let outcome = DriverOutcome {
        exit_code: status.and_then(|s| s.code()),
        stdout: join_reader(stdout),
        stderr: join_reader(stderr),
        timed_out,
        duration: start.elapsed(),
    };
    debug!(
        action = action.as_str(),
        exit_code = ?outcome.exit_code,
        timed_out,
        duration_ms = outcome.duration.as_millis() as u64,
        "driver finished"
    );
    Ok(Invoked::Finished(outcome))
}

fn resolve(root: &Path, script: &str) -> PathBuf {
    let path = Path::new(script);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

fn apply_env(command: &mut Command, action: DriverAction, req: &DriverRequest<'_>) {
    let env = req.env;
    let tc = req.testcase;
    command
        .env("RIG_ACTION", action.as_str())
        .env("RIG_WORK_DIR", req.work_dir)
        .env("RIG_EXPORTED_CONFIG", resolve(req.root, &tc.exported_config))
        .env("RIG_DEVICE_ADDRESS", &env.device.address)
        .env("RIG_DEVICE_USERNAME", &env.device.username)
        .env("RIG_DEVICE_PASSWORD", &env.device.password)
        .env("RIG_LICENSE_ADDRESS", &env.license_server.address)
        .env("RIG_LICENSE_PORT", env.license_server.port.to_string())
        .env("RIG_LICENSE_KIND", env.license_server.kind.as_str());
    if !env.license_server.username.is_empty() {
        command
            .env("RIG_LICENSE_USERNAME", &env.license_server.username)
            .env("RIG_LICENSE_PASSWORD", &env.license_server.password);
    }
    if let Some(params) = &tc.params_file {
        command.env("RIG_PARAMS_FILE", resolve(req.root, params));
    }
    if !env.agents.is_empty() {
        let agents: Vec<String> = env
            .agents
            .iter()
            .map(|a| format!("{}/{}", a.address, a.interface))
            .collect();
        command.env("RIG_AGENTS", agents.join(","));
    }
    if !tc.library_paths.is_empty() {
        command.env("RIG_LIBRARY_PATHS", tc.library_paths.join(":"));
    }
}

fn kill_quietly(child: &mut std::process::Child, action: DriverAction) {
    if let Err(e) = child.kill() {
        warn!(action = action.as_str(), error = %e, "failed to kill driver");
    }
}

fn spawn_reader<R: Read + Send + 'static>(
    mut stream: R,
    limit: usize,
) -> std::thread::JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut captured = Vec::new();
        let mut buf = [0u8; 8192];
        loop {
            match stream.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let room = limit.saturating_sub(captured.len());
                    captured.extend_from_slice(&buf[..n.min(room)]);
                    // Keep draining past the cap so the child never blocks.
                }
            }
        }
        captured
    })
}

fn join_reader(handle: Option<std::thread::JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defs::{Device, LicenseKind, LicenseServer};
    use std::collections::BTreeMap;
    use std::os::unix::fs::PermissionsExt;

    fn stub_env() -> Environment {
        Environment {
            id: "lab1".to_string(),
            parallel_usage: false,
            device: Device {
                address: "10.0.0.5".to_string(),
                username: "admin".to_string(),
                password: "secret".to_string(),
            },
            license_server: LicenseServer {
                address: "10.0.0.9".to_string(),
                port: 7443,
                kind: LicenseKind::Embedded,
                username: String::new(),
                password: String::new(),
            },
            agents: Vec::new(),
        }
    }

    fn stub_testcase(script: &str) -> Testcase {
        Testcase {
            id: "tc1".to_string(),
            description: String::new(),
            objective: String::new(),
            exported_config: "configs/tc1.zip".to_string(),
            driver_script: script.to_string(),
            params_file: None,
            library_paths: Vec::new(),
            kpi: BTreeMap::new(),
        }
    }

    fn write_script(dir: &Path, body: &str) -> String {
        let path = dir.join("driver.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
        let mut perms = std::fs::metadata(&path).expect("metadata").permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).expect("chmod");
        "driver.sh".to_string()
    }

    fn request<'a>(
        root: &'a Path,
        testcase: &'a Testcase,
        env: &'a Environment,
        work_dir: &'a Path,
        timeout: Duration,
    ) -> DriverRequest<'a> {
        DriverRequest {
            root,
            testcase,
            env,
            work_dir,
            timeout,
            output_limit_bytes: 10_000,
        }
    }

    #[test]
    fn captures_output_and_exit_code() {
        let root = tempfile::tempdir().expect("tempdir");
        let work = tempfile::tempdir().expect("tempdir");
        let script = write_script(root.path(), "echo out; echo err >&2; exit 0");
        let tc = stub_testcase(&script);
        let env = stub_env();
        let req = request(root.path(), &tc, &env, work.path(), Duration::from_secs(10));

        let outcome = match invoke(DriverAction::Run, &req, &AbortFlag::new()).expect("invoke") {
            Invoked::Finished(outcome) => outcome,
            Invoked::Aborted => panic!("not aborted"),
        };
        assert!(outcome.success());
        assert_eq!(String::from_utf8_lossy(&outcome.stdout).trim(), "out");
        assert_eq!(String::from_utf8_lossy(&outcome.stderr).trim(), "err");
    }

    #[test]
    fn action_and_environment_are_exported() {
        let root = tempfile::tempdir().expect("tempdir");
        let work = tempfile::tempdir().expect("tempdir");
        let script = write_script(
            root.path(),
            "echo \"$1 $RIG_ACTION $RIG_DEVICE_ADDRESS $RIG_LICENSE_KIND\"",
        );
        let tc = stub_testcase(&script);
        let env = stub_env();
        let req = request(root.path(), &tc, &env, work.path(), Duration::from_secs(10));

        let outcome = match invoke(DriverAction::RebootAgents, &req, &AbortFlag::new()).expect("invoke") {
            Invoked::Finished(outcome) => outcome,
            Invoked::Aborted => panic!("not aborted"),
        };
        assert_eq!(
            String::from_utf8_lossy(&outcome.stdout).trim(),
            "reboot-agents reboot-agents 10.0.0.5 embedded"
        );
    }

    #[test]
    fn deadline_kills_the_driver() {
        let root = tempfile::tempdir().expect("tempdir");
        let work = tempfile::tempdir().expect("tempdir");
        let script = write_script(root.path(), "sleep 30");
        let tc = stub_testcase(&script);
        let env = stub_env();
        let req = request(root.path(), &tc, &env, work.path(), Duration::from_millis(300));

        let start = Instant::now();
        let outcome = match invoke(DriverAction::Run, &req, &AbortFlag::new()).expect("invoke") {
            Invoked::Finished(outcome) => outcome,
            Invoked::Aborted => panic!("not aborted"),
        };
        assert!(outcome.timed_out);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn abort_kills_the_driver_without_failure() {
        let root = tempfile::tempdir().expect("tempdir");
        let work = tempfile::tempdir().expect("tempdir");
        let script = write_script(root.path(), "sleep 30");
        let tc = stub_testcase(&script);
        let env = stub_env();
        let req = request(root.path(), &tc, &env, work.path(), Duration::from_secs(60));

        let abort = AbortFlag::new();
        let aborter = abort.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(200));
            aborter.raise();
        });

        let start = Instant::now();
        assert!(matches!(
            invoke(DriverAction::Run, &req, &abort).expect("invoke"),
            Invoked::Aborted
        ));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn missing_executable_is_a_crash() {
        let root = tempfile::tempdir().expect("tempdir");
        let work = tempfile::tempdir().expect("tempdir");
        let tc = stub_testcase("drivers/does_not_exist.sh");
        let env = stub_env();
        let req = request(root.path(), &tc, &env, work.path(), Duration::from_secs(1));

        let err = invoke(DriverAction::Run, &req, &AbortFlag::new()).unwrap_err();
        assert_eq!(err.kind(), "driver_crash");
    }

    #[test]
    fn output_capture_is_bounded() {
        let root = tempfile::tempdir().expect("tempdir");
        let work = tempfile::tempdir().expect("tempdir");
        let script = write_script(root.path(), "yes x | head -c 100000");
        let tc = stub_testcase(&script);
        let env = stub_env();
        let mut req = request(root.path(), &tc, &env, work.path(), Duration::from_secs(10));
        req.output_limit_bytes = 1024;

        let outcome = match invoke(DriverAction::Run, &req, &AbortFlag::new()).expect("invoke") {
            Invoked::Finished(outcome) => outcome,
            Invoked::Aborted => panic!("not aborted"),
        };
        assert!(outcome.stdout.len() <= 1024);
    }
}
