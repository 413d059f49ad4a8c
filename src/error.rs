use std::error::Error as _;
use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, Diagnostic)]
pub enum Wf2RoError {
    #[error("invalid URI {value}: {message}")]
    InvalidUri { value: String, message: String },

    #[error("invalid destination {value}: {message}")]
    InvalidDestination { value: String, message: String },

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("can't fetch workflow bundle {uri}: {message}")]
    BundleFetch { uri: String, message: String },

    #[error("can't parse workflow bundle: {0}")]
    BundleParse(String),

    #[error("unsupported workflow bundle format: {0}")]
    UnsupportedFormat(String),

    #[error("RODL request failed: {0}")]
    RemoteHttp(String),

    #[error("RODL returned status {status}: {message}")]
    RemoteStatus { status: u16, message: String },

    #[error("manifest inconsistency: {0}")]
    ManifestInconsistency(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("conversion cancelled")]
    Cancelled,

    #[error("this job has already been started; create another job for another conversion")]
    AlreadyStarted,

    #[error("job not found: {0}")]
    JobNotFound(Uuid),

    #[error("job has been cancelled: {0}")]
    JobCancelled(Uuid),

    #[error("too many active jobs (limit {limit})")]
    ServiceBusy { limit: usize },

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),
}

impl Wf2RoError {
    pub fn invalid_uri(value: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Wf2RoError::InvalidUri {
            value: value.into(),
            message: err.to_string(),
        }
    }

    pub fn invalid_destination(value: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Wf2RoError::InvalidDestination {
            value: value.into(),
            message: err.to_string(),
        }
    }

    /// Errors caused by the submitted source rather than by the conversion itself.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Wf2RoError::BundleFetch { .. }
                | Wf2RoError::BundleParse(_)
                | Wf2RoError::UnsupportedFormat(_)
                | Wf2RoError::InvalidUri { .. }
        )
    }

    pub fn is_remote_error(&self) -> bool {
        matches!(
            self,
            Wf2RoError::RemoteHttp(_) | Wf2RoError::RemoteStatus { .. }
        )
    }

    /// Renders the error followed by its source chain, one cause per line.
    pub fn report(&self) -> String {
        let mut report = self.to_string();
        let mut source = self.source();
        while let Some(cause) = source {
            let cause_text = cause.to_string();
            if !report.ends_with(&cause_text) {
                report.push_str("\ncaused by: ");
                report.push_str(&cause_text);
            }
            source = cause.source();
        }
        report
    }
}
