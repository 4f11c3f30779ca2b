//! Publication metadata sinks
//!
//! Each published archive gets a row in the download catalog and a block in
//! the portal descriptor. The two sinks are independent: a failure in one is
//! reported and does not stop the other.

pub mod catalog;
pub mod descriptor;
pub mod sanitize;

use thiserror::Error;

pub use catalog::{CatalogRecord, CatalogSink};
pub use descriptor::{DescriptorBlock, DescriptorSettings, DescriptorSink, UpsertAction};
pub use sanitize::sanitize_markup;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Catalog is locked or not writable: {0}")]
    Locked(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Descriptor parse error: {0}")]
    Parse(String),

    #[error("Descriptor write error: {0}")]
    Write(String),
}

impl SinkError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::PermissionDenied {
            return Self::Locked(path.display().to_string());
        }
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Write `data` to a temporary sibling of `path`, then rename it into place.
pub(crate) fn replace_file(path: &std::path::Path, data: &[u8]) -> Result<(), SinkError> {
    use std::io::Write;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| SinkError::io(parent, e))?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    let mut file = std::fs::File::create(&tmp_path).map_err(|e| SinkError::io(&tmp_path, e))?;
    file.write_all(data).map_err(|e| SinkError::io(&tmp_path, e))?;
    file.sync_all().map_err(|e| SinkError::io(&tmp_path, e))?;
    drop(file);

    std::fs::rename(&tmp_path, path).map_err(|e| SinkError::io(path, e))
}
