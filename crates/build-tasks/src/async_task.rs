//! Async Task Base
//!
//! Runs a task body on a worker thread with its own tokio runtime while the
//! calling thread keeps ownership of the build engine. Logging calls made
//! from the worker travel through one bounded channel per message kind and
//! are replayed on the calling thread as they arrive. Order is preserved
//! within a kind, not across kinds.

use std::collections::BTreeMap;
use std::thread;

use android_tools_core::CancellationToken;
use crossbeam_channel::{bounded, Receiver, Select, Sender, TrySendError};
use futures::future::BoxFuture;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, info};

use crate::engine::{BuildEngine, CustomEvent, MessageImportance};
use crate::task::TaskLog;
use crate::unhandled;

const CHANNEL_CAPACITY: usize = 256;

type Coded = (Option<String>, String);

/// A task whose body is asynchronous
pub trait AsyncTask: Sync {
    fn task_prefix(&self) -> &str;

    fn run_task_async<'a>(&'a self, ctx: AsyncTaskContext) -> BoxFuture<'a, anyhow::Result<()>>;
}

/// Logging and cancellation available to an async task body.
///
/// Clones share the same channels; cloning it into spawned futures is fine.
/// Each kind of message is buffered up to a fixed capacity. Past that, a
/// logging call waits for the host to drain the channel; on the task's
/// multi-thread runtime the waiting worker thread is handed off first so
/// other futures keep running.
#[derive(Clone)]
pub struct AsyncTaskContext {
    messages: Sender<(MessageImportance, String)>,
    warnings: Sender<Coded>,
    errors: Sender<Coded>,
    custom: Sender<CustomEvent>,
    telemetry: Sender<(String, BTreeMap<String, String>)>,
    cancel: CancellationToken,
}

impl AsyncTaskContext {
    pub fn log_message(&self, message: impl Into<String>) {
        send(&self.messages, (MessageImportance::Normal, message.into()));
    }

    pub fn log_message_with(&self, importance: MessageImportance, message: impl Into<String>) {
        send(&self.messages, (importance, message.into()));
    }

    pub fn log_debug_message(&self, message: impl Into<String>) {
        send(&self.messages, (MessageImportance::Low, message.into()));
    }

    pub fn log_warning(&self, message: impl Into<String>) {
        send(&self.warnings, (None, message.into()));
    }

    pub fn log_coded_warning(&self, code: impl Into<String>, message: impl Into<String>) {
        send(&self.warnings, (Some(code.into()), message.into()));
    }

    pub fn log_error(&self, message: impl Into<String>) {
        send(&self.errors, (None, message.into()));
    }

    pub fn log_coded_error(&self, code: impl Into<String>, message: impl Into<String>) {
        send(&self.errors, (Some(code.into()), message.into()));
    }

    pub fn log_custom(&self, event: CustomEvent) {
        send(&self.custom, event);
    }

    pub fn log_telemetry(&self, name: impl Into<String>, properties: BTreeMap<String, String>) {
        send(&self.telemetry, (name.into(), properties));
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

fn send<T>(sender: &Sender<T>, value: T) {
    let value = match sender.try_send(value) {
        Ok(()) => return,
        Err(TrySendError::Full(value)) => value,
        Err(TrySendError::Disconnected(_)) => {
            debug!("Task message dropped, the host stopped receiving");
            return;
        }
    };

    // block_in_place panics on a current-thread runtime
    let blocked = match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(|| sender.send(value))
        }
        _ => sender.send(value),
    };
    if blocked.is_err() {
        debug!("Task message dropped, the host stopped receiving");
    }
}

/// Lets the host cancel a running async task
#[derive(Debug, Clone, Default)]
pub struct AsyncTaskHandle {
    token: CancellationToken,
}

impl AsyncTaskHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

enum Completion {
    Finished(anyhow::Result<()>),
    Cancelled,
}

struct Receivers {
    messages: Receiver<(MessageImportance, String)>,
    warnings: Receiver<Coded>,
    errors: Receiver<Coded>,
    custom: Receiver<CustomEvent>,
    telemetry: Receiver<(String, BTreeMap<String, String>)>,
}

fn channels(cancel: CancellationToken) -> (AsyncTaskContext, Receivers) {
    let (messages, messages_rx) = bounded(CHANNEL_CAPACITY);
    let (warnings, warnings_rx) = bounded(CHANNEL_CAPACITY);
    let (errors, errors_rx) = bounded(CHANNEL_CAPACITY);
    let (custom, custom_rx) = bounded(CHANNEL_CAPACITY);
    let (telemetry, telemetry_rx) = bounded(CHANNEL_CAPACITY);

    let ctx = AsyncTaskContext {
        messages,
        warnings,
        errors,
        custom,
        telemetry,
        cancel,
    };
    let receivers = Receivers {
        messages: messages_rx,
        warnings: warnings_rx,
        errors: errors_rx,
        custom: custom_rx,
        telemetry: telemetry_rx,
    };
    (ctx, receivers)
}

fn run_worker<T: AsyncTask + ?Sized>(
    task: &T,
    ctx: AsyncTaskContext,
    cancel: CancellationToken,
    done: Sender<Completion>,
) {
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            let _ = done.send(Completion::Finished(Err(e.into())));
            return;
        }
    };

    let completion = runtime.block_on(async {
        tokio::select! {
            result = task.run_task_async(ctx) => Completion::Finished(result),
            _ = cancel.cancelled() => Completion::Cancelled,
        }
    });
    // Detached work still holding a context must not keep the host waiting
    runtime.shutdown_background();

    let _ = done.send(completion);
}

/// Replay everything received until the worker reports completion
fn pump(log: &mut TaskLog<'_>, rx: &Receivers, done: &Receiver<Completion>) -> Option<Completion> {
    let mut select = Select::new();
    let messages = select.recv(&rx.messages);
    let warnings = select.recv(&rx.warnings);
    let errors = select.recv(&rx.errors);
    let custom = select.recv(&rx.custom);
    let telemetry = select.recv(&rx.telemetry);
    let finished = select.recv(done);

    loop {
        let oper = select.select();
        let index = oper.index();

        if index == finished {
            return oper.recv(done).ok();
        } else if index == messages {
            match oper.recv(&rx.messages) {
                Ok((importance, text)) => log.log_message_with(importance, &text),
                Err(_) => select.remove(messages),
            }
        } else if index == warnings {
            match oper.recv(&rx.warnings) {
                Ok((code, text)) => log.log_raw(false, code.as_deref(), &text),
                Err(_) => select.remove(warnings),
            }
        } else if index == errors {
            match oper.recv(&rx.errors) {
                Ok((code, text)) => log.log_raw(true, code.as_deref(), &text),
                Err(_) => select.remove(errors),
            }
        } else if index == custom {
            match oper.recv(&rx.custom) {
                Ok(event) => log.log_custom(&event),
                Err(_) => select.remove(custom),
            }
        } else if index == telemetry {
            match oper.recv(&rx.telemetry) {
                Ok((name, properties)) => log.log_telemetry(&name, &properties),
                Err(_) => select.remove(telemetry),
            }
        }
    }
}

fn flush(log: &mut TaskLog<'_>, rx: &Receivers) {
    for (importance, text) in rx.messages.try_iter() {
        log.log_message_with(importance, &text);
    }
    for (code, text) in rx.warnings.try_iter() {
        log.log_raw(false, code.as_deref(), &text);
    }
    for (code, text) in rx.errors.try_iter() {
        log.log_raw(true, code.as_deref(), &text);
    }
    for event in rx.custom.try_iter() {
        log.log_custom(&event);
    }
    for (name, properties) in rx.telemetry.try_iter() {
        log.log_telemetry(&name, &properties);
    }
}

/// Run `task` to completion or cancellation, returning `true` when no error
/// was logged. Blocks the calling thread, which is the only thread that
/// touches `engine`.
pub fn execute_async<T: AsyncTask + ?Sized>(
    task: &T,
    engine: &mut dyn BuildEngine,
    handle: &AsyncTaskHandle,
) -> bool {
    let prefix = task.task_prefix().to_string();
    let cancel = handle.token();
    let mut log = TaskLog::new(engine);

    let (ctx, receivers) = channels(cancel.clone());
    let (done_tx, done_rx) = bounded::<Completion>(1);

    let (completion, joined) = thread::scope(|scope| {
        let worker_cancel = cancel.clone();
        let worker = scope.spawn(move || run_worker(task, ctx, worker_cancel, done_tx));

        let completion = pump(&mut log, &receivers, &done_rx);
        flush(&mut log, &receivers);
        (completion, worker.join())
    });

    if let Err(payload) = joined {
        unhandled::log_panic(&mut log, &prefix, payload.as_ref());
        return false;
    }

    match completion {
        Some(Completion::Finished(Ok(()))) => {}
        Some(Completion::Finished(Err(err))) if cancel.is_cancelled() => {
            debug!("Task {} stopped after cancellation: {:#}", prefix, err);
        }
        Some(Completion::Finished(Err(err))) => unhandled::log_unhandled(&mut log, &prefix, &err),
        Some(Completion::Cancelled) => info!("Task {} was cancelled", prefix),
        None => debug!("Task {} worker exited without reporting", prefix),
    }

    !log.has_logged_errors()
}
