//! DRE Runner
//!
//! Executes the DRE CLI tool that generates node rewards CSV output. Every run
//! writes into a fresh timestamped directory under the configured output base.

use async_trait::async_trait;
use chrono::Utc;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

/// Hard limit for a rewards generation run (15 minutes)
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(900);

/// Limit for the preflight availability check
const VERIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Classified DRE failure
#[derive(Debug, Error)]
pub enum DreError {
    #[error("DRE command or working directory not found: {0}")]
    NotFound(String),

    #[error("DRE command timed out after {} seconds", .0.as_secs())]
    Timeout(Duration),

    #[error("DRE command failed with return code {code:?}: {stderr}")]
    NonZeroExit { code: Option<i32>, stderr: String },

    #[error("Failed to run DRE command: {0}")]
    Io(#[from] std::io::Error),
}

/// Output of a successful run
#[derive(Debug, Clone)]
pub struct DreOutput {
    pub output_path: PathBuf,
    pub stdout: String,
    pub stderr: String,
}

/// Anything that can produce a DRE-style output tree
#[async_trait]
pub trait RewardsGenerator: Send + Sync {
    /// Cheap check that the tool can be invoked at all
    async fn verify(&self) -> bool;

    /// Generate rewards data, returning the directory holding one
    /// subdirectory per node provider
    async fn run(&self) -> Result<DreOutput, DreError>;
}

/// How to invoke the DRE tool
#[derive(Debug, Clone)]
pub struct DreCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Flag preceding the output directory argument
    pub output_flag: String,
    /// Working directory the tool runs in
    pub working_dir: PathBuf,
    pub timeout: Duration,
}

impl DreCommand {
    /// `cargo run --bin dre node-rewards ongoing --csv-detailed-output-path <dir>`
    pub fn cargo(dre_path: impl Into<PathBuf>) -> Self {
        Self {
            program: "cargo".to_string(),
            args: ["run", "--bin", "dre", "node-rewards", "ongoing"]
                .into_iter()
                .map(String::from)
                .collect(),
            output_flag: "--csv-detailed-output-path".to_string(),
            working_dir: dre_path.into(),
            timeout: DEFAULT_RUN_TIMEOUT,
        }
    }
}

/// Runs the DRE tool as a child process
#[derive(Debug, Clone)]
pub struct DreRunner {
    command: DreCommand,
    output_base_dir: PathBuf,
}

impl DreRunner {
    pub fn new(command: DreCommand, output_base_dir: impl Into<PathBuf>) -> Self {
        Self {
            command,
            output_base_dir: output_base_dir.into(),
        }
    }

    /// Fresh, collision-free output directory path for one run
    fn next_output_path(&self) -> PathBuf {
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        self.output_base_dir
            .join(format!("rewards_{}_{}", timestamp, &suffix[..8]))
    }

    fn base_command(&self) -> Command {
        let mut cmd = Command::new(&self.command.program);
        cmd.current_dir(&self.command.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // The tool runs under `cargo run`, so the real work happens in a grandchild
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }

    async fn execute(
        &self,
        mut cmd: Command,
        timeout: Duration,
    ) -> Result<std::process::Output, DreError> {
        let child = cmd.spawn().map_err(|e| self.classify_spawn_error(e))?;
        let pid = child.id();

        // Dropping the pending future on timeout drops the child, which kills it
        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                if let Some(pid) = pid {
                    kill_process_group(pid);
                }
                Err(DreError::Timeout(timeout))
            }
        }
    }

    fn classify_spawn_error(&self, e: std::io::Error) -> DreError {
        if e.kind() == std::io::ErrorKind::NotFound {
            DreError::NotFound(format!(
                "{} (in {})",
                self.command.program,
                self.command.working_dir.display()
            ))
        } else {
            DreError::Io(e)
        }
    }

}

/// SIGKILL every process in the group led by `pid`
#[cfg(unix)]
fn kill_process_group(pid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    let ret = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if ret != 0 {
        warn!(
            pgid,
            "Failed to kill DRE process group: {}",
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

#[async_trait]
impl RewardsGenerator for DreRunner {
    async fn verify(&self) -> bool {
        let mut cmd = self.base_command();
        cmd.arg("--version");

        match self.execute(cmd, VERIFY_TIMEOUT).await {
            Ok(output) if output.status.success() => true,
            Ok(output) => {
                error!(
                    code = ?output.status.code(),
                    "DRE verification failed: {}",
                    String::from_utf8_lossy(&output.stderr)
                );
                false
            }
            Err(e) => {
                error!("DRE verification failed: {}", e);
                false
            }
        }
    }

    async fn run(&self) -> Result<DreOutput, DreError> {
        let output_path = self.next_output_path();
        tokio::fs::create_dir_all(&output_path).await?;

        info!(output_path = %output_path.display(), "Running DRE command");

        let mut cmd = self.base_command();
        cmd.args(&self.command.args)
            .arg(&self.command.output_flag)
            .arg(&output_path);

        debug!(
            "Executing: {} {} {} {}",
            self.command.program,
            self.command.args.join(" "),
            self.command.output_flag,
            output_path.display()
        );

        let output = match self.execute(cmd, self.command.timeout).await {
            Ok(output) => output,
            Err(e) => {
                error!("{}", e);
                return Err(e);
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            error!(code = ?output.status.code(), "DRE command failed");
            error!("stderr: {}", stderr);
            return Err(DreError::NonZeroExit {
                code: output.status.code(),
                stderr,
            });
        }

        info!("DRE command completed successfully");
        debug!("Output: {}", stdout.chars().take(500).collect::<String>());

        Ok(DreOutput {
            output_path,
            stdout,
            stderr,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn shell(script: &str, dir: &TempDir, timeout: Duration) -> DreCommand {
        DreCommand {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string(), "sh".to_string()],
            output_flag: "--out".to_string(),
            working_dir: dir.path().to_path_buf(),
            timeout,
        }
    }

    #[tokio::test]
    async fn test_run_success_writes_into_fresh_dir() {
        let dir = TempDir::new().unwrap();
        // $1 is the output flag, $2 the output directory
        let cmd = shell(r#"mkdir "$2/p1" && echo done"#, &dir, Duration::from_secs(10));
        let runner = DreRunner::new(cmd, dir.path().join("out"));

        let output = runner.run().await.unwrap();

        assert!(output.output_path.starts_with(dir.path().join("out")));
        assert!(output.output_path.join("p1").is_dir());
        assert_eq!(output.stdout.trim(), "done");
    }

    #[tokio::test]
    async fn test_output_dirs_do_not_collide() {
        let dir = TempDir::new().unwrap();
        let runner = DreRunner::new(shell("true", &dir, Duration::from_secs(10)), dir.path());

        let first = runner.run().await.unwrap();
        let second = runner.run().await.unwrap();

        assert_ne!(first.output_path, second.output_path);
    }

    #[tokio::test]
    async fn test_run_non_zero_exit() {
        let dir = TempDir::new().unwrap();
        let cmd = shell("echo boom >&2; exit 3", &dir, Duration::from_secs(10));
        let runner = DreRunner::new(cmd, dir.path());

        match runner.run().await {
            Err(DreError::NonZeroExit { code, stderr }) => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr.trim(), "boom");
            }
            other => panic!("expected NonZeroExit, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_run_timeout() {
        let dir = TempDir::new().unwrap();
        let cmd = shell("sleep 5", &dir, Duration::from_millis(200));
        let runner = DreRunner::new(cmd, dir.path());

        assert!(matches!(runner.run().await, Err(DreError::Timeout(_))));
    }

    /// Running means present in /proc and not a zombie awaiting reaping
    #[cfg(target_os = "linux")]
    fn is_running(pid: &str) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => stat
                .rsplit_once(')')
                .map(|(_, rest)| !rest.trim_start().starts_with('Z'))
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_timeout_kills_background_children() {
        let dir = TempDir::new().unwrap();
        let pid_file = dir.path().join("pid");
        let cmd = shell(
            r#"sleep 30 & echo $! > pid; wait"#,
            &dir,
            Duration::from_millis(500),
        );
        let runner = DreRunner::new(cmd, dir.path().join("out"));

        assert!(matches!(runner.run().await, Err(DreError::Timeout(_))));

        let pid = std::fs::read_to_string(&pid_file).unwrap();
        let pid = pid.trim();
        let mut gone = false;
        for _ in 0..40 {
            if !is_running(pid) {
                gone = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(gone, "background sleep {} survived the timeout", pid);
    }

    #[tokio::test]
    async fn test_missing_program() {
        let dir = TempDir::new().unwrap();
        let mut cmd = DreCommand::cargo(dir.path());
        cmd.program = "definitely-not-a-dre-binary".to_string();
        let runner = DreRunner::new(cmd, dir.path());

        assert!(!runner.verify().await);
        assert!(matches!(runner.run().await, Err(DreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_missing_working_dir() {
        let dir = TempDir::new().unwrap();
        let cmd = shell("true", &dir, Duration::from_secs(10));
        let cmd = DreCommand {
            working_dir: dir.path().join("no-such-dre"),
            ..cmd
        };
        let runner = DreRunner::new(cmd, dir.path());

        assert!(matches!(runner.run().await, Err(DreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_verify_available_program() {
        let dir = TempDir::new().unwrap();
        let mut cmd = shell("true", &dir, Duration::from_secs(10));
        // `true --version` exits 0 regardless of flavor
        cmd.program = "true".to_string();
        let runner = DreRunner::new(cmd, dir.path());

        assert!(runner.verify().await);
    }

    #[test]
    fn test_cargo_command_defaults() {
        let cmd = DreCommand::cargo("/opt/dre");
        assert_eq!(cmd.program, "cargo");
        assert_eq!(cmd.args, vec!["run", "--bin", "dre", "node-rewards", "ongoing"]);
        assert_eq!(cmd.output_flag, "--csv-detailed-output-path");
        assert_eq!(cmd.timeout, DEFAULT_RUN_TIMEOUT);
    }
}
