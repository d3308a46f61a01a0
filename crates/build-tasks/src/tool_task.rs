//! Tool Task Base
//!
//! Tasks that wrap an external command line tool. The tool runs on a private
//! current-thread runtime and every output line is handed back to the task on
//! the calling thread, so `execute_tool` must not be called from inside a
//! tokio runtime.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::time::Duration;

use android_tools_core::process::{self, find_executable_in_directory, find_executables_in_path};
use android_tools_core::{CancellationToken, OutputLine, Platform, ProcessExitState, ProcessRunOptions, ToolsError};
use tracing::debug;

use crate::engine::{BuildEngine, MessageImportance};
use crate::task::TaskLog;
use crate::unhandled;

/// Code logged when a tool exits unsuccessfully
pub const TOOL_EXIT_CODE: u32 = 6006;

/// A task that runs an external tool
pub trait AndroidToolTask {
    fn task_prefix(&self) -> &str;

    /// Executable name without extension, e.g. `aapt2`
    fn tool_name(&self) -> &str;

    /// Directory holding the tool; `None` searches `PATH`
    fn tool_path(&self) -> Option<PathBuf> {
        None
    }

    fn command_line_args(&self) -> anyhow::Result<Vec<String>>;

    fn environment(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    fn working_directory(&self) -> Option<PathBuf> {
        None
    }

    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Called for every stdout/stderr line as it arrives
    fn log_tool_line(&mut self, log: &mut TaskLog<'_>, line: &OutputLine) {
        log.log_message_with(MessageImportance::Normal, line.text());
    }

    /// Called once the tool exits
    fn handle_exit(&mut self, log: &mut TaskLog<'_>, exit: &ProcessExitState) -> anyhow::Result<()> {
        if !exit.success() {
            let status = exit
                .exit_code
                .map(|c| format!("exited with code {}", c))
                .unwrap_or_else(|| "was terminated by a signal".to_string());
            let code = format!("XA{}{:04}", self.task_prefix(), TOOL_EXIT_CODE);
            log.log_coded_error(&code, &format!("\"{}\" {}.", self.tool_name(), status));
        }
        Ok(())
    }
}

fn resolve_tool<T: AndroidToolTask + ?Sized>(task: &T) -> Result<PathBuf, ToolsError> {
    let name = task.tool_name();
    match task.tool_path() {
        Some(dir) => find_executable_in_directory(&Platform::current(), &dir, name)
            .ok_or_else(|| ToolsError::NotFound(format!("{} in {:?}", name, dir))),
        None => find_executables_in_path(name)
            .into_iter()
            .next()
            .ok_or_else(|| ToolsError::NotFound(format!("{} on PATH", name))),
    }
}

fn run_tool<T: AndroidToolTask + ?Sized>(
    task: &mut T,
    log: &mut TaskLog<'_>,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let program = resolve_tool(task)?;

    let mut options = ProcessRunOptions::new(&program).args(task.command_line_args()?);
    for (key, value) in task.environment() {
        options = options.env(key, value);
    }
    if let Some(dir) = task.working_directory() {
        options = options.working_dir(dir);
    }
    if let Some(timeout) = task.timeout() {
        options = options.timeout(timeout);
    }

    log.log_debug_message(&format!("{} {}", program.display(), options.args.join(" ")));
    debug!("Running tool {:?}", program);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let exit = runtime.block_on(process::run_streaming(&options, cancel, |line| {
        task.log_tool_line(log, line)
    }))?;

    task.handle_exit(log, &exit)
}

/// Run `task`'s tool, returning `true` when no error was logged
pub fn execute_tool<T: AndroidToolTask + ?Sized>(
    task: &mut T,
    engine: &mut dyn BuildEngine,
    cancel: &CancellationToken,
) -> bool {
    let prefix = task.task_prefix().to_string();
    let mut log = TaskLog::new(engine);

    let outcome = catch_unwind(AssertUnwindSafe(|| run_tool(task, &mut log, cancel)));
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(err)) => unhandled::log_unhandled(&mut log, &prefix, &err),
        Err(payload) => unhandled::log_panic(&mut log, &prefix, payload.as_ref()),
    }

    !log.has_logged_errors()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::engine::RecordingEngine;

    struct Shell {
        script: &'static str,
        lines: usize,
    }

    impl AndroidToolTask for Shell {
        fn task_prefix(&self) -> &str {
            "SH"
        }

        fn tool_name(&self) -> &str {
            "sh"
        }

        fn command_line_args(&self) -> anyhow::Result<Vec<String>> {
            Ok(vec!["-c".into(), self.script.into()])
        }

        fn log_tool_line(&mut self, log: &mut TaskLog<'_>, line: &OutputLine) {
            self.lines += 1;
            log.log_message(line.text());
        }
    }

    #[test]
    fn test_tool_output_is_logged() {
        let mut engine = RecordingEngine::new();
        let mut task = Shell {
            script: "echo hello",
            lines: 0,
        };
        assert!(execute_tool(&mut task, &mut engine, &CancellationToken::new()));
        assert_eq!(task.lines, 1);
        assert!(engine.messages().contains(&"hello"));
    }

    #[test]
    fn test_non_zero_exit_logs_error() {
        let mut engine = RecordingEngine::new();
        let mut task = Shell {
            script: "echo oops 1>&2; exit 3",
            lines: 0,
        };
        assert!(!execute_tool(&mut task, &mut engine, &CancellationToken::new()));

        let errors = engine.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, Some("XASH6006"));
        assert!(errors[0].1.contains("exited with code 3"));
        assert!(engine.messages().contains(&"oops"));
    }

    struct Missing;

    impl AndroidToolTask for Missing {
        fn task_prefix(&self) -> &str {
            "MIS"
        }

        fn tool_name(&self) -> &str {
            "definitely-not-a-real-tool-name"
        }

        fn command_line_args(&self) -> anyhow::Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_missing_tool_is_unhandled_failure() {
        let mut engine = RecordingEngine::new();
        assert!(!execute_tool(&mut Missing, &mut engine, &CancellationToken::new()));
        assert_eq!(engine.errors()[0].0, Some("XAMIS7008"));
    }
}
