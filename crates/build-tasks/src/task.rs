//! Task Base
//!
//! `AndroidTask` is the synchronous task contract. `execute` runs a task and
//! turns any error or panic escaping it into a classified build error, so a
//! failing task never takes the host down.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::engine::{BuildEngine, CustomEvent, MessageImportance};
use crate::unhandled;

/// Logging handle passed to a running task
pub struct TaskLog<'a> {
    engine: &'a mut dyn BuildEngine,
    has_logged_errors: bool,
}

impl<'a> TaskLog<'a> {
    pub fn new(engine: &'a mut dyn BuildEngine) -> Self {
        Self {
            engine,
            has_logged_errors: false,
        }
    }

    /// Whether any error has been logged through this handle
    pub fn has_logged_errors(&self) -> bool {
        self.has_logged_errors
    }

    pub fn log_message(&mut self, message: &str) {
        self.engine.log_message(MessageImportance::Normal, message);
    }

    pub fn log_message_with(&mut self, importance: MessageImportance, message: &str) {
        self.engine.log_message(importance, message);
    }

    pub fn log_debug_message(&mut self, message: &str) {
        self.engine.log_message(MessageImportance::Low, message);
    }

    pub fn log_warning(&mut self, message: &str) {
        self.engine.log_warning(None, message);
    }

    pub fn log_coded_warning(&mut self, code: &str, message: &str) {
        self.engine.log_warning(Some(code), message);
    }

    pub fn log_error(&mut self, message: &str) {
        self.has_logged_errors = true;
        self.engine.log_error(None, message);
    }

    pub fn log_coded_error(&mut self, code: &str, message: &str) {
        self.has_logged_errors = true;
        self.engine.log_error(Some(code), message);
    }

    /// Forward a warning or error with an optional code
    pub(crate) fn log_raw(&mut self, is_error: bool, code: Option<&str>, message: &str) {
        if is_error {
            self.has_logged_errors = true;
            self.engine.log_error(code, message);
        } else {
            self.engine.log_warning(code, message);
        }
    }

    pub fn log_custom(&mut self, event: &CustomEvent) {
        self.engine.log_custom(event);
    }

    pub fn log_telemetry(&mut self, name: &str, properties: &BTreeMap<String, String>) {
        self.engine.log_telemetry(name, properties);
    }
}

/// A synchronous build task
pub trait AndroidTask {
    /// Short prefix identifying the task in error codes, e.g. `CIC` for `XACIC7000`
    fn task_prefix(&self) -> &str;

    fn run_task(&mut self, log: &mut TaskLog<'_>) -> anyhow::Result<()>;
}

/// Run `task` against `engine`, returning `true` when no error was logged
pub fn execute<T: AndroidTask + ?Sized>(task: &mut T, engine: &mut dyn BuildEngine) -> bool {
    let prefix = task.task_prefix().to_string();
    let mut log = TaskLog::new(engine);

    let outcome = catch_unwind(AssertUnwindSafe(|| task.run_task(&mut log)));
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(err)) => unhandled::log_unhandled(&mut log, &prefix, &err),
        Err(payload) => unhandled::log_panic(&mut log, &prefix, payload.as_ref()),
    }

    !log.has_logged_errors()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RecordingEngine;
    use android_tools_core::ToolsError;

    struct Scripted {
        outcome: fn(&mut TaskLog<'_>) -> anyhow::Result<()>,
    }

    impl AndroidTask for Scripted {
        fn task_prefix(&self) -> &str {
            "TST"
        }

        fn run_task(&mut self, log: &mut TaskLog<'_>) -> anyhow::Result<()> {
            (self.outcome)(log)
        }
    }

    #[test]
    fn test_success() {
        let mut engine = RecordingEngine::new();
        let mut task = Scripted {
            outcome: |log| {
                log.log_message("hello");
                log.log_coded_warning("XA0001", "careful");
                Ok(())
            },
        };
        assert!(execute(&mut task, &mut engine));
        assert_eq!(engine.messages(), vec!["hello"]);
        assert_eq!(engine.warnings(), vec![(Some("XA0001"), "careful")]);
    }

    #[test]
    fn test_logged_error_fails_task() {
        let mut engine = RecordingEngine::new();
        let mut task = Scripted {
            outcome: |log| {
                log.log_coded_error("XA1234", "bad input");
                Ok(())
            },
        };
        assert!(!execute(&mut task, &mut engine));
        assert_eq!(engine.errors(), vec![(Some("XA1234"), "bad input")]);
    }

    #[test]
    fn test_error_is_classified() {
        let mut engine = RecordingEngine::new();
        let mut task = Scripted {
            outcome: |_| Err(ToolsError::InvalidOperation("no sdkmanager".into()).into()),
        };
        assert!(!execute(&mut task, &mut engine));

        let errors = engine.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, Some("XATST7012"));
        assert!(errors[0].1.contains("no sdkmanager"));
    }

    #[test]
    fn test_panic_is_caught() {
        let mut engine = RecordingEngine::new();
        let mut task = Scripted {
            outcome: |_| panic!("boom"),
        };
        assert!(!execute(&mut task, &mut engine));

        let errors = engine.errors();
        assert_eq!(errors[0].0, Some("XATST7000"));
        assert!(errors[0].1.contains("boom"));
    }
}
