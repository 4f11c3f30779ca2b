//! Patchpub Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the patch publication
//! workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`PatchpubError`] and the crate [`Result`] alias
//! - **Checksums**: MD5 digests for published archives
//! - **Logging**: `tracing` subscriber setup shared by every binary
//! - **Types**: access policy and release status of catalog rows
//!
//! # Example
//!
//! ```no_run
//! use patchpub_common::checksum::compute_file_md5;
//! use patchpub_common::Result;
//!
//! fn digest(path: &str) -> Result<String> {
//!     compute_file_md5(path)
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{PatchpubError, Result};
