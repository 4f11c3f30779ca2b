//! Errors of one processing attempt

use std::path::Path;
use thiserror::Error;

use crate::db::fault::BackendFault;
use crate::retry::RetryableError;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Backend fault: {0}")]
    Backend(#[from] BackendFault),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Checksum error: {0}")]
    Checksum(#[from] patchpub_common::PatchpubError),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl ProcessError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn io_at(action: &str, path: &Path, source: std::io::Error) -> Self {
        Self::io(format!("Failed to {} {}", action, path.display()), source)
    }
}

impl From<tokio::task::JoinError> for ProcessError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}

impl RetryableError for ProcessError {
    fn backend_fault(&self) -> Option<&BackendFault> {
        match self {
            ProcessError::Backend(fault) => Some(fault),
            _ => None,
        }
    }
}
