//! Unhandled Failures
//!
//! Errors and panics escaping a task body are classified and logged as a
//! single coded error, `XA<prefix><code>`.

use std::any::Any;
use std::io::ErrorKind;
use std::num::{ParseFloatError, ParseIntError};

use android_tools_core::ToolsError;
use tracing::debug;

use crate::task::TaskLog;
use crate::TaskError;

/// Category of an unhandled failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Generic,
    InvalidArgument,
    DirectoryNotFound,
    UnexpectedEof,
    FileNotFound,
    Format,
    InvalidOperation,
    Io,
    NotSupported,
    Timeout,
    UnauthorizedAccess,
    Xml,
    Serialization,
}

impl FailureKind {
    /// Numeric code appended to the task prefix
    pub fn code(self) -> u32 {
        match self {
            FailureKind::Generic => 7000,
            FailureKind::InvalidArgument => 7001,
            FailureKind::DirectoryNotFound => 7004,
            FailureKind::UnexpectedEof => 7006,
            FailureKind::FileNotFound => 7008,
            FailureKind::Format => 7009,
            FailureKind::InvalidOperation => 7012,
            FailureKind::Io => 7014,
            FailureKind::NotSupported => 7016,
            FailureKind::Timeout => 7024,
            FailureKind::UnauthorizedAccess => 7026,
            FailureKind::Xml => 7028,
            FailureKind::Serialization => 7029,
        }
    }

    /// `XA<prefix><code>`
    pub fn error_code(self, prefix: &str) -> String {
        format!("XA{}{:04}", prefix, self.code())
    }
}

fn classify_io(kind: ErrorKind) -> FailureKind {
    match kind {
        ErrorKind::NotFound => FailureKind::FileNotFound,
        ErrorKind::PermissionDenied => FailureKind::UnauthorizedAccess,
        ErrorKind::UnexpectedEof => FailureKind::UnexpectedEof,
        ErrorKind::TimedOut => FailureKind::Timeout,
        ErrorKind::InvalidInput => FailureKind::InvalidArgument,
        ErrorKind::InvalidData => FailureKind::Format,
        ErrorKind::Unsupported => FailureKind::NotSupported,
        _ => FailureKind::Io,
    }
}

fn classify_tools(err: &ToolsError) -> FailureKind {
    match err {
        ToolsError::Io(e) => classify_io(e.kind()),
        ToolsError::TomlParse(_) | ToolsError::TomlSerialize(_) | ToolsError::Json(_) => {
            FailureKind::Serialization
        }
        ToolsError::Xml(_) => FailureKind::Xml,
        ToolsError::NotFound(_) => FailureKind::FileNotFound,
        ToolsError::InvalidArgument(_) => FailureKind::InvalidArgument,
        ToolsError::Config(_)
        | ToolsError::InvalidOperation(_)
        | ToolsError::Process(_)
        | ToolsError::ChecksumMismatch { .. } => FailureKind::InvalidOperation,
        ToolsError::NotSupported(_) => FailureKind::NotSupported,
        ToolsError::Download(_) | ToolsError::Extraction(_) => FailureKind::Io,
        ToolsError::Timeout(_) => FailureKind::Timeout,
        ToolsError::Cancelled => FailureKind::Generic,
    }
}

fn classify_task(err: &TaskError) -> FailureKind {
    match err {
        TaskError::Io(e) => classify_io(e.kind()),
        TaskError::FileNotFound(_) => FailureKind::FileNotFound,
        TaskError::DirectoryNotFound(_) => FailureKind::DirectoryNotFound,
        TaskError::Zip(zip::result::ZipError::Io(e)) => classify_io(e.kind()),
        TaskError::Zip(_) => FailureKind::Format,
        TaskError::UnsafeEntry(_) => FailureKind::InvalidOperation,
    }
}

/// Classify the first recognised error in the chain of `err`
pub fn classify(err: &anyhow::Error) -> FailureKind {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<ToolsError>() {
            return classify_tools(e);
        }
        if let Some(e) = cause.downcast_ref::<TaskError>() {
            return classify_task(e);
        }
        if let Some(e) = cause.downcast_ref::<std::io::Error>() {
            return classify_io(e.kind());
        }
        if cause.is::<ParseIntError>() || cause.is::<ParseFloatError>() {
            return FailureKind::Format;
        }
        if cause.is::<roxmltree::Error>() {
            return FailureKind::Xml;
        }
        if cause.is::<serde_json::Error>() {
            return FailureKind::Serialization;
        }
        if cause.is::<zip::result::ZipError>() {
            return FailureKind::Format;
        }
    }
    FailureKind::Generic
}

/// Log `err` as the task's unhandled failure
pub fn log_unhandled(log: &mut TaskLog<'_>, prefix: &str, err: &anyhow::Error) {
    let kind = classify(err);
    debug!("Unhandled {:?} failure in task {}: {:?}", kind, prefix, err);
    log.log_coded_error(&kind.error_code(prefix), &format!("{:#}", err));
}

/// Text carried by a panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Log a panic escaping the task body
pub fn log_panic(log: &mut TaskLog<'_>, prefix: &str, payload: &(dyn Any + Send)) {
    let message = panic_message(payload);
    log.log_coded_error(
        &FailureKind::Generic.error_code(prefix),
        &format!("Task panicked: {}", message),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use std::path::PathBuf;

    #[test]
    fn test_codes() {
        assert_eq!(FailureKind::Generic.error_code("CIC"), "XACIC7000");
        assert_eq!(FailureKind::Serialization.error_code("GAS"), "XAGAS7029");
        assert_eq!(FailureKind::DirectoryNotFound.code(), 7004);
    }

    #[test]
    fn test_classify_io_kinds() {
        let err = anyhow::Error::from(std::io::Error::from(ErrorKind::PermissionDenied));
        assert_eq!(classify(&err), FailureKind::UnauthorizedAccess);

        let err = anyhow::Error::from(std::io::Error::from(ErrorKind::UnexpectedEof));
        assert_eq!(classify(&err), FailureKind::UnexpectedEof);

        let err = anyhow::Error::from(std::io::Error::from(ErrorKind::BrokenPipe));
        assert_eq!(classify(&err), FailureKind::Io);
    }

    #[test]
    fn test_classify_walks_context_chain() {
        let parse: Result<u32, _> = "abc".parse::<u32>();
        let err = parse.context("reading API level").unwrap_err();
        assert_eq!(classify(&err), FailureKind::Format);

        let xml = roxmltree::Document::parse("<a>").map(|_| ()).context("AndroidApiInfo.xml");
        assert_eq!(classify(&xml.unwrap_err()), FailureKind::Xml);
    }

    #[test]
    fn test_classify_domain_errors() {
        let err = anyhow::Error::from(ToolsError::NotSupported("x86".into()));
        assert_eq!(classify(&err), FailureKind::NotSupported);

        let err = anyhow::Error::from(TaskError::DirectoryNotFound(PathBuf::from("/nope")));
        assert_eq!(classify(&err), FailureKind::DirectoryNotFound);

        let err = anyhow::anyhow!("something odd");
        assert_eq!(classify(&err), FailureKind::Generic);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("static text");
        assert_eq!(panic_message(payload.as_ref()), "static text");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(42);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
