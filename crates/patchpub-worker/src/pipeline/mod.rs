//! Per-identifier publication pipeline

pub mod archive;
pub mod files;
pub mod naming;
pub mod processor;

pub use processor::{
    inspect, AttemptResult, Inspection, ItemFailureReason, ItemOutcome, OutputLayout,
    PublishedItem, RecordProcessor,
};
