//! Patchpub worker
//!
//! Exports software-patch files from the catalog database into checksummed
//! archives and records each archive in the download catalog and the portal
//! descriptor.
//!
//! A run takes a batch of identifiers from the queue file ([`queue`]), runs
//! each through the publication pipeline ([`pipeline`]) under bounded retry
//! ([`retry`]) on sessions from the supervised pool ([`db`]), and commits the
//! queue once at least one item was published ([`runner`]).

pub mod config;
pub mod db;
pub mod error;
pub mod pipeline;
pub mod queue;
pub mod retry;
pub mod runner;
pub mod sinks;
pub mod source;
pub mod upload;

pub use config::Config;
pub use error::ProcessError;
pub use runner::{BatchRunner, RunnerSettings};
