//! Android Build Tasks
//!
//! Base contracts for tasks hosted by a build engine, plus the file, pooling
//! and ABI helpers those tasks share.

pub mod abi;
pub mod async_task;
pub mod engine;
pub mod files;
pub mod pool;
pub mod task;
pub mod tool_task;
pub mod unhandled;

pub use abi::{abi_to_runtime_identifier, abi_to_target_arch, runtime_identifier_to_abi, Abi, AndroidTargetArch};
pub use async_task::{execute_async, AsyncTask, AsyncTaskContext, AsyncTaskHandle};
pub use engine::{BuildEngine, CustomEvent, EngineEvent, MessageImportance, RecordingEngine, TracingEngine};
pub use files::{ExtractOptions, Files, RetryPolicy};
pub use pool::{MemoryStreamPool, ObjectPool, Pooled};
pub use task::{execute, AndroidTask, TaskLog};
pub use tool_task::{execute_tool, AndroidToolTask};
pub use unhandled::FailureKind;

use std::path::PathBuf;

/// File utility errors
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Could not find file: {0:?}")]
    FileNotFound(PathBuf),
    #[error("Could not find directory: {0:?}")]
    DirectoryNotFound(PathBuf),
    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("Archive entry escapes the destination: {0}")]
    UnsafeEntry(String),
}

pub type Result<T> = std::result::Result<T, TaskError>;
