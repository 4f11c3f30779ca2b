//! Error types shared across the patchpub crates

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, PatchpubError>;

#[derive(Error, Debug)]
pub enum PatchpubError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
