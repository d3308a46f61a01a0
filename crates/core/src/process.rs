//! Process Execution
//!
//! Spawns external tools, captures their output and supports cancellation.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Result, ToolsError};
use crate::platform::Platform;

/// How to run a child process
#[derive(Debug, Clone, Default)]
pub struct ProcessRunOptions {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Environment overrides applied on top of the inherited environment
    pub env: Vec<(String, String)>,
    /// Lines written to stdin, each followed by a newline; stdin is closed afterwards
    pub stdin_lines: Vec<String>,
    pub timeout: Option<Duration>,
}

impl ProcessRunOptions {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn stdin_lines<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stdin_lines = lines.into_iter().map(Into::into).collect();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn display(&self) -> String {
        let mut s = self.program.display().to_string();
        for arg in &self.args {
            s.push(' ');
            s.push_str(arg);
        }
        s
    }
}

/// How a child process exited
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessExitState {
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessExitState {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// A single line of child output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputLine {
    Stdout(String),
    Stderr(String),
}

impl OutputLine {
    pub fn text(&self) -> &str {
        match self {
            OutputLine::Stdout(s) | OutputLine::Stderr(s) => s,
        }
    }
}

enum Outcome {
    Finished(Result<ProcessExitState>),
    Cancelled,
    TimedOut,
}

/// Run a process to completion, capturing its output
pub async fn run(options: &ProcessRunOptions, cancel: &CancellationToken) -> Result<ProcessExitState> {
    run_streaming(options, cancel, |_| {}).await
}

/// Run a process to completion, invoking `on_line` for every output line
pub async fn run_streaming<F>(
    options: &ProcessRunOptions,
    cancel: &CancellationToken,
    mut on_line: F,
) -> Result<ProcessExitState>
where
    F: FnMut(&OutputLine),
{
    debug!("Running: {}", options.display());

    let mut cmd = Command::new(&options.program);
    cmd.args(&options.args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(if options.stdin_lines.is_empty() {
            Stdio::null()
        } else {
            Stdio::piped()
        })
        .kill_on_drop(true);

    if let Some(dir) = &options.working_dir {
        cmd.current_dir(dir);
    }
    for (key, value) in &options.env {
        cmd.env(key, value);
    }

    let mut child = cmd.spawn().map_err(|e| {
        ToolsError::Process(format!("failed to start {}: {}", options.program.display(), e))
    })?;

    if let Some(mut stdin) = child.stdin.take() {
        let lines = options.stdin_lines.clone();
        tokio::spawn(async move {
            for line in lines {
                if stdin.write_all(format!("{}\n", line).as_bytes()).await.is_err() {
                    break;
                }
            }
        });
    }

    let (tx, rx) = mpsc::unbounded_channel();
    if let Some(stdout) = child.stdout.take() {
        let tx = tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tx.send(OutputLine::Stdout(line)).is_err() {
                    break;
                }
            }
        });
    }
    if let Some(stderr) = child.stderr.take() {
        let tx = tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tx.send(OutputLine::Stderr(line)).is_err() {
                    break;
                }
            }
        });
    }
    drop(tx);

    let timeout = options.timeout;
    let outcome = {
        let drive = drive(&mut child, rx, &mut on_line);
        let deadline = async move {
            match timeout {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            result = drive => Outcome::Finished(result),
            _ = cancel.cancelled() => Outcome::Cancelled,
            _ = deadline => Outcome::TimedOut,
        }
    };

    match outcome {
        Outcome::Finished(result) => result,
        Outcome::Cancelled => {
            warn!("Cancelling {}", options.program.display());
            let _ = child.kill().await;
            Err(ToolsError::Cancelled)
        }
        Outcome::TimedOut => {
            let _ = child.kill().await;
            Err(ToolsError::Timeout(format!(
                "{} did not exit within {:?}",
                options.program.display(),
                timeout.unwrap_or_default()
            )))
        }
    }
}

async fn drive<F>(
    child: &mut Child,
    mut rx: mpsc::UnboundedReceiver<OutputLine>,
    on_line: &mut F,
) -> Result<ProcessExitState>
where
    F: FnMut(&OutputLine),
{
    let mut stdout = String::new();
    let mut stderr = String::new();

    while let Some(line) = rx.recv().await {
        on_line(&line);
        let buf = match &line {
            OutputLine::Stdout(_) => &mut stdout,
            OutputLine::Stderr(_) => &mut stderr,
        };
        buf.push_str(line.text());
        buf.push('\n');
    }

    let status = child.wait().await?;
    Ok(ProcessExitState {
        exit_code: status.code(),
        stdout,
        stderr,
    })
}

/// Every match for `name` on `PATH`, in `PATH` order
pub fn find_executables_in_path(name: &str) -> Vec<PathBuf> {
    match which::which_all(name) {
        Ok(found) => found.collect(),
        Err(_) => Vec::new(),
    }
}

/// Find `name` directly inside `dir`, trying every host executable extension
pub fn find_executable_in_directory(platform: &Platform, dir: &Path, name: &str) -> Option<PathBuf> {
    platform
        .executable_names(name)
        .into_iter()
        .map(|n| dir.join(n))
        .find(|p| p.is_file())
}
