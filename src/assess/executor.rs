//! Command Execution
//!
//! [`CommandExecutor`] is the seam between the runner and the operating
//! system. [`ShellExecutor`] writes the command line to `run.sh` in the run
//! directory and runs it with bash, blocking until it exits. There is no
//! timeout; a caller that needs cancellation kills the process group from
//! outside, which surfaces here as a missing exit code.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use log::{debug, error, info};

use super::invocation::JobInvocation;
use super::staging::RunLayout;
use crate::error::Result;
use crate::monitoring::ResourceMonitor;

/// Interval between exit checks (and resource samples) while waiting.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How a subprocess ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ExecutionOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs a job invocation to completion.
pub trait CommandExecutor {
    /// Executes `job` and blocks until it terminates.
    ///
    /// Returns `Err` only if the process could not be started or its
    /// output could not be collected; a non-zero exit is a normal outcome.
    fn execute(&self, job: &JobInvocation) -> Result<ExecutionOutcome>;
}

/// Executes jobs through `bash` in the run directory.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    poll_interval: Duration,
}

impl ShellExecutor {
    pub fn new() -> Self {
        Self {
            poll_interval: POLL_INTERVAL,
        }
    }

    /// Sets how often the child is checked while waiting.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandExecutor for ShellExecutor {
    fn execute(&self, job: &JobInvocation) -> Result<ExecutionOutcome> {
        let layout = RunLayout::at(&job.working_dir);
        let command_text = job.command_line();
        let script_path = create_execution_script(&layout.script_path(), &command_text)?;

        let stdout_path = layout.stdout_path();
        let stderr_path = layout.stderr_path();

        let mut cmd = shell_command(job, &script_path);
        cmd.stdout(File::create(&stdout_path)?)
            .stderr(File::create(&stderr_path)?);

        info!("Running: {}", command_text);
        debug!("Executing in directory: {}", job.working_dir.display());

        let mut child = cmd.spawn()?;
        let mut monitor = ResourceMonitor::for_process(child.id());

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            monitor.sample();
            thread::sleep(self.poll_interval);
        };

        debug!("{}", monitor.get_summary());

        let stdout = read_lossy(&stdout_path)?;
        let stderr = read_lossy(&stderr_path)?;

        if status.success() {
            if !stdout.trim().is_empty() {
                debug!("{} output:\n{}", job.program, stdout);
            }
        } else {
            match status.code() {
                Some(code) => error!("{} failed with exit code: {}", job.program, code),
                None => error!("{} was terminated by a signal", job.program),
            }
            if !stderr.trim().is_empty() {
                error!("stderr:\n{}", stderr);
            }
        }

        Ok(ExecutionOutcome {
            exit_code: status.code(),
            stdout,
            stderr,
        })
    }
}

/// The `bash` command running `script_path` for `job`, without output redirection.
fn shell_command(job: &JobInvocation, script_path: &Path) -> Command {
    let mut cmd = Command::new("bash");
    cmd.arg(script_path)
        .current_dir(&job.working_dir)
        .stdin(Stdio::null());

    for var in &job.unset_env {
        cmd.env_remove(var);
    }

    cmd
}

/// Writes the bash script for a job.
fn create_execution_script(script_path: &Path, command_text: &str) -> Result<PathBuf> {
    let mut file = File::create(script_path)?;

    writeln!(file, "#!/bin/bash")?;
    writeln!(file, "set -e")?;
    writeln!(file, "{}", command_text)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(script_path, fs::Permissions::from_mode(0o755))?;
    }

    Ok(script_path.to_path_buf())
}

fn read_lossy(path: &Path) -> Result<String> {
    let bytes = fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::AssessKind;
    use tempfile::tempdir;

    fn job(dir: &Path, program: &str, args: &[&str]) -> JobInvocation {
        let layout = RunLayout::at(dir);
        JobInvocation {
            kind: AssessKind::Micrograph,
            activation: None,
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            working_dir: layout.root.clone(),
            input: layout.input_dir.clone(),
            output_dir: layout.output_dir.clone(),
            unset_env: vec!["PYTHONPATH".to_string()],
        }
    }

    fn executor() -> ShellExecutor {
        ShellExecutor::new().with_poll_interval(Duration::from_millis(10))
    }

    #[test]
    fn test_create_execution_script() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("run.sh");

        create_execution_script(&path, "micassess --model m.h5").unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("#!/bin/bash"));
        assert!(content.contains("set -e"));
        assert!(content.contains("micassess --model m.h5"));
    }

    #[test]
    fn test_successful_command() {
        let temp_dir = tempdir().unwrap();
        let job = job(temp_dir.path(), "echo", &["hello"]);

        let outcome = executor().execute(&job).unwrap();
        assert!(outcome.success());
        assert_eq!(outcome.stdout.trim(), "hello");
        assert!(temp_dir.path().join("run.sh").exists());
        assert!(temp_dir.path().join("run.stdout").exists());
    }

    #[test]
    fn test_failing_command_captures_stderr() {
        let temp_dir = tempdir().unwrap();
        let job = job(temp_dir.path(), "sh", &["-c", "echo 'model not found' >&2; exit 3"]);

        let outcome = executor().execute(&job).unwrap();
        assert!(!outcome.success());
        assert_eq!(outcome.exit_code, Some(3));
        assert!(outcome.stderr.contains("model not found"));
    }

    #[test]
    fn test_activation_failure_stops_command() {
        let temp_dir = tempdir().unwrap();
        let marker = temp_dir.path().join("ran");
        let mut job = job(temp_dir.path(), "touch", &[marker.to_str().unwrap()]);
        job.activation = Some("false".to_string());

        let outcome = executor().execute(&job).unwrap();
        assert!(!outcome.success());
        assert!(!marker.exists());
    }

    #[test]
    fn test_shell_command_removes_unset_vars() {
        let temp_dir = tempdir().unwrap();
        let job = job(temp_dir.path(), "echo", &["hi"]);
        let script = temp_dir.path().join("run.sh");

        let cmd = shell_command(&job, &script);

        let removed: Vec<_> = cmd
            .get_envs()
            .filter(|(_, value)| value.is_none())
            .map(|(key, _)| key.to_string_lossy().to_string())
            .collect();
        assert_eq!(removed, vec!["PYTHONPATH"]);
        assert_eq!(cmd.get_current_dir(), Some(temp_dir.path()));
        assert_eq!(cmd.get_program(), "bash");
    }

    #[cfg(unix)]
    #[test]
    fn test_signal_termination_has_no_exit_code() {
        let temp_dir = tempdir().unwrap();
        let job = job(temp_dir.path(), "sh", &["-c", "kill -9 $$"]);

        let outcome = executor().execute(&job).unwrap();
        assert!(!outcome.success());
        assert!(outcome.exit_code.is_none() || outcome.exit_code == Some(137));
    }

    #[test]
    fn test_missing_working_dir() {
        let job = job(Path::new("/nonexistent/run_dir"), "echo", &["hi"]);
        assert!(executor().execute(&job).is_err());
    }
}
