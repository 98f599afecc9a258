pub mod adapter;
pub mod catalog;
pub mod config;
pub mod deck;
pub mod fingerprint;
pub mod model;
pub mod scanner;
pub mod scheduler;
pub mod session;
pub mod sync;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("Sqlx Error: {source}")]
    Sqlx { source: sqlx::Error },
    #[error("Io Error: {description}, {source}")]
    Io {
        description: String,
        source: std::io::Error,
    },
    #[error(transparent)]
    #[diagnostic(transparent)]
    Library(#[from] LibraryError),
}

/// Finer-grained failure kinds. `Clone` so a library error can be captured
/// in a log line and also returned to the caller.
#[derive(Clone, Debug, Diagnostic, Error)]
pub enum LibraryError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Adapter(#[from] AdapterErrorKind),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Scheduler(#[from] SchedulerErrorKind),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Scan(#[from] ScanErrorKind),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Session(#[from] SessionErrorKind),
    #[error("{0}")]
    InvalidConfig(String),
}

#[derive(Clone, Debug, Diagnostic, Error)]
pub enum AdapterErrorKind {
    #[error("No adapter named `{0}` was found.")]
    NotFound(String),
    #[error("`{adapter_name}` adapter returned an error: {error}")]
    Custom { adapter_name: String, error: String },
    #[error("Adapter `{adapter_name}` produced a duplicate key `{key}` in one `parse` call.")]
    DuplicateKey { adapter_name: String, key: String },
    #[error("Adapter `{adapter_name}` produced non-object content for key `{key}`.")]
    NonObjectContent { adapter_name: String, key: String },
}

#[derive(Clone, Debug, Diagnostic, Error)]
pub enum SchedulerErrorKind {
    #[error("No scheduler named `{0}` was found.")]
    NotFound(String),
    #[error("`{scheduler_id}` scheduler hook failed: {error}")]
    HookFailed { scheduler_id: String, error: String },
}

#[derive(Clone, Debug, Diagnostic, Error)]
pub enum ScanErrorKind {
    #[error("`.sr.config` in `{0}` is missing the required `adapter` key.")]
    MissingAdapterKey(String),
}

#[derive(Clone, Debug, Diagnostic, Error)]
pub enum SessionErrorKind {
    #[error("No current card to {0}.")]
    NoCurrentCard(&'static str),
    #[error("Grade must be 0 or 1, got `{0}`.")]
    InvalidGrade(i64),
    #[error("Nothing to undo.")]
    EmptyUndoStack,
    #[error("Flag name must not be empty.")]
    EmptyFlagName,
}
