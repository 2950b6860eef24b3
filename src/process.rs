//! External process execution.
//!
//! Every tool the orchestrator drives runs through [`ToolCommand`]: a cleared
//! environment populated only from the session, secrets fed through stdin,
//! and captured output scrubbed by a [`Redactor`] before anyone sees it.

use crate::credentials::{Redactor, Secret};
use crate::error::{Result, ToolError};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Lines of stderr kept in failure messages
const STDERR_TAIL_LINES: usize = 20;

/// A single external command invocation
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    env: BTreeMap<String, String>,
    stdin: Option<Secret>,
    timeout: Option<Duration>,
}

/// Captured result of a finished command
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Redacted command line
    pub command: String,
    /// Exit code, -1 when terminated by a signal
    pub code: i32,
    /// Redacted stdout
    pub stdout: String,
    /// Redacted stderr
    pub stderr: String,
    /// Wall-clock duration
    pub duration: Duration,
}

impl ToolOutput {
    /// Whether the process exited with code 0
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// Last lines of stderr, falling back to stdout when stderr is empty
    pub fn stderr_tail(&self) -> String {
        let source = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        let lines: Vec<&str> = source.lines().collect();
        let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
        lines[start..].join("\n")
    }

    /// Convert a non-zero exit into [`ToolError::Failed`]
    pub fn into_checked(self) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(ToolError::Failed {
                stderr_tail: self.stderr_tail(),
                command: self.command,
                code: self.code,
            }
            .into())
        }
    }
}

impl ToolCommand {
    /// Start building a command for `program`
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
            stdin: None,
            timeout: None,
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Working directory
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Set one environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set several environment variables
    pub fn envs<'a, I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Feed a secret to the process on stdin
    pub fn stdin_secret(mut self, secret: &Secret) -> Self {
        self.stdin = Some(secret.clone());
        self
    }

    /// Kill the process if it runs longer than `timeout`
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Program name
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments, unredacted
    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Command line with every secret value scrubbed
    pub fn display(&self, redactor: &Redactor) -> String {
        let line = std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        redactor.redact(&line)
    }

    fn resolve_program(&self) -> Result<PathBuf> {
        let search_path = self
            .env
            .get("PATH")
            .cloned()
            .or_else(|| std::env::var("PATH").ok());
        let cwd = self.cwd.clone().unwrap_or_else(|| PathBuf::from("."));
        which::which_in(&self.program, search_path, cwd).map_err(|_| {
            ToolError::NotFound {
                tool: self.program.clone(),
            }
            .into()
        })
    }

    /// Run to completion and capture output; a non-zero exit is not an error here
    pub async fn output(&self, redactor: &Redactor) -> Result<ToolOutput> {
        let display = self.display(redactor);
        let program = self.resolve_program()?;
        log::info!("Running: {display}");

        let mut command = Command::new(&program);
        command
            .args(&self.args)
            .env_clear()
            .envs(&self.env)
            .stdin(if self.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }

        let start = Instant::now();
        let mut child = command.spawn().map_err(|e| ToolError::SpawnFailed {
            command: display.clone(),
            reason: e.to_string(),
        })?;

        if let (Some(secret), Some(mut stdin)) = (&self.stdin, child.stdin.take()) {
            let bytes = secret.expose().as_bytes().to_vec();
            // Written from a task so a chatty child cannot deadlock on a full stdout pipe
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&bytes).await {
                    log::debug!("stdin write failed: {e}");
                }
                let _ = stdin.shutdown().await;
            });
        }

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| ToolError::TimedOut {
                    command: display.clone(),
                    seconds: limit.as_secs(),
                })?,
            None => child.wait_with_output().await,
        }
        .map_err(|e| ToolError::SpawnFailed {
            command: display.clone(),
            reason: e.to_string(),
        })?;

        let result = ToolOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: redactor.redact(&String::from_utf8_lossy(&output.stdout)),
            stderr: redactor.redact(&String::from_utf8_lossy(&output.stderr)),
            duration: start.elapsed(),
            command: display,
        };

        if !result.stdout.is_empty() {
            log::debug!("{} stdout:\n{}", self.program, result.stdout);
        }
        if !result.stderr.is_empty() {
            log::debug!("{} stderr:\n{}", self.program, result.stderr);
        }
        log::info!(
            "{} exited with {} after {:.1}s",
            self.program,
            result.code,
            result.duration.as_secs_f64()
        );
        Ok(result)
    }

    /// Run and fail on a non-zero exit
    pub async fn run(&self, redactor: &Redactor) -> Result<ToolOutput> {
        self.output(redactor).await?.into_checked()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReleaseError;

    fn path_env() -> BTreeMap<String, String> {
        std::env::var("PATH")
            .map(|p| BTreeMap::from([("PATH".to_string(), p)]))
            .unwrap_or_default()
    }

    #[test]
    fn display_redacts_arguments() {
        let redactor = Redactor::new(vec!["s3cr3t-value".to_string()]);
        let cmd = ToolCommand::new("mvn").arg("-Dtoken=s3cr3t-value").arg("deploy");
        assert_eq!(cmd.display(&redactor), "mvn -Dtoken=*** deploy");
    }

    #[test]
    fn stderr_tail_keeps_last_lines() {
        let stderr = (1..=30).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let output = ToolOutput {
            command: "mvn".to_string(),
            code: 1,
            stdout: String::new(),
            stderr,
            duration: Duration::ZERO,
        };
        let tail = output.stderr_tail();
        assert!(tail.starts_with("line 11"));
        assert!(tail.ends_with("line 30"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn output_is_redacted() {
        let redactor = Redactor::new(vec!["tok-123456".to_string()]);
        let output = ToolCommand::new("sh")
            .args(["-c", "echo token is $SECRET; echo again tok-123456 >&2"])
            .envs(&path_env())
            .env("SECRET", "tok-123456")
            .run(&redactor)
            .await
            .unwrap();
        assert_eq!(output.stdout.trim(), "token is ***");
        assert_eq!(output.stderr.trim(), "again ***");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn environment_is_cleared() {
        let output = ToolCommand::new("sh")
            .args(["-c", "echo \"[$HOME]\""])
            .envs(&path_env())
            .run(&Redactor::default())
            .await
            .unwrap();
        assert_eq!(output.stdout.trim(), "[]");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn secrets_reach_stdin() {
        let secret = Secret::new("key-material-42");
        let output = ToolCommand::new("sh")
            .args(["-c", "wc -c"])
            .envs(&path_env())
            .stdin_secret(&secret)
            .run(&Redactor::default())
            .await
            .unwrap();
        assert_eq!(output.stdout.trim(), "15");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_a_tool_failure() {
        let err = ToolCommand::new("sh")
            .args(["-c", "echo boom >&2; exit 3"])
            .envs(&path_env())
            .run(&Redactor::default())
            .await
            .unwrap_err();
        match err {
            ReleaseError::Tool(ToolError::Failed {
                code, stderr_tail, ..
            }) => {
                assert_eq!(code, 3);
                assert_eq!(stderr_tail, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeouts_are_enforced() {
        let err = ToolCommand::new("sh")
            .args(["-c", "sleep 5"])
            .envs(&path_env())
            .timeout(Some(Duration::from_millis(100)))
            .output(&Redactor::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ReleaseError::Tool(ToolError::TimedOut { .. })));
    }

    #[tokio::test]
    async fn missing_programs_are_reported() {
        let err = ToolCommand::new("definitely-not-a-real-tool-xyz")
            .output(&Redactor::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ReleaseError::Tool(ToolError::NotFound { .. })));
    }
}
