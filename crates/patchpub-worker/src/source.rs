//! Seams between the pipeline and the metadata backend
//!
//! [`ConnectionSource`] hands out live sessions and [`PatchSession`] runs the
//! catalog queries on one of them. The Postgres implementations live in
//! [`crate::db`]; tests substitute in-memory ones.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use patchpub_common::types::ReleaseStatus;
use serde::Serialize;

use crate::db::fault::{self, BackendFault, FaultClass};

pub const UNKNOWN_TYPE: &str = "Unknown Type";
pub const UNKNOWN_PRODUCT: &str = "Unknown_Product";
pub const UNKNOWN_RELEASE: &str = "Unknown Release";
pub const NO_DESCRIPTION: &str = "No Description Available";
pub const UNKNOWN_RELEASE_DATE: &str = "Unknown Date";

/// One metadata row of a catalog identifier
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PatchMetadata {
    pub identifier: String,
    pub superseded_by: Option<String>,
    pub type_desc: Option<String>,
    pub status_desc: Option<String>,
    pub category_desc: Option<String>,
    pub product_name: Option<String>,
    pub product_id: Option<i64>,
    pub title_text: Option<String>,
    pub release: Option<String>,
    pub platform_name: Option<String>,
}

fn or_default<'a>(value: &'a Option<String>, default: &'a str) -> &'a str {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(default)
}

impl PatchMetadata {
    pub fn type_desc(&self) -> &str {
        or_default(&self.type_desc, UNKNOWN_TYPE)
    }

    pub fn product_name(&self) -> &str {
        or_default(&self.product_name, UNKNOWN_PRODUCT)
    }

    pub fn release(&self) -> &str {
        or_default(&self.release, UNKNOWN_RELEASE)
    }

    pub fn title(&self) -> &str {
        or_default(&self.title_text, NO_DESCRIPTION)
    }

    pub fn status(&self) -> ReleaseStatus {
        ReleaseStatus::parse(self.status_desc.as_deref().unwrap_or_default())
    }
}

/// Latest milestone date of an identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseDate {
    pub date: DateTime<Utc>,
    /// `YYYYMMDD`, or [`UNKNOWN_RELEASE_DATE`] when the backend had none
    pub formatted: String,
}

impl ReleaseDate {
    pub fn known(date: DateTime<Utc>) -> Self {
        Self {
            formatted: date.format("%Y%m%d").to_string(),
            date,
        }
    }

    pub fn unknown(now: DateTime<Utc>) -> Self {
        Self {
            date: now,
            formatted: UNKNOWN_RELEASE_DATE.to_string(),
        }
    }
}

/// Where a file's content lives in the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobHandle {
    /// Content returned with the row
    Inline(Vec<u8>),
    /// Large object read in chunks by oid
    LargeObject(u32),
    Missing,
}

/// One file row of a catalog identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchFileRow {
    pub identifier: String,
    pub filename: Option<String>,
    pub external_view: Option<String>,
    pub blob: BlobHandle,
}

/// An identifier with its latest milestone date, used to seed the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSeed {
    pub identifier: String,
    /// `YYYYMMDD`
    pub latest_date: String,
}

/// Catalog queries bound to one live backend session.
///
/// Sessions are cheap handles; clones share the same underlying connection.
#[async_trait]
pub trait PatchSession: Clone + Send + Sync + 'static {
    async fn fetch_metadata(&self, identifier: &str) -> Result<Vec<PatchMetadata>, BackendFault>;

    async fn fetch_dependencies(&self, identifier: &str) -> Result<Vec<String>, BackendFault>;

    async fn fetch_release_date(&self, identifier: &str)
        -> Result<Option<ReleaseDate>, BackendFault>;

    /// File rows whose identifier starts with `identifier`, ordered by file name.
    ///
    /// The match is deliberately broad; callers narrow it to exact or
    /// `identifier_`-prefixed rows.
    async fn fetch_file_rows(&self, identifier: &str) -> Result<Vec<PatchFileRow>, BackendFault>;

    /// Read up to `len` bytes of a large object starting at `offset`.
    async fn read_large_object(
        &self,
        oid: u32,
        offset: i64,
        len: i32,
    ) -> Result<Vec<u8>, BackendFault>;

    /// All identifiers with a milestone, latest first.
    async fn list_queue_seeds(&self) -> Result<Vec<QueueSeed>, BackendFault>;
}

/// Hands out live sessions and classifies the faults they produce.
#[async_trait]
pub trait ConnectionSource: Send + Sync {
    type Session: PatchSession;

    /// Obtain a session that has just passed a liveness check.
    async fn acquire(&self) -> Result<Self::Session, BackendFault>;

    /// Give a session back. Called after every attempt, successful or not.
    async fn release(&self, session: Self::Session);

    fn classify(&self, fault: &BackendFault) -> FaultClass {
        fault::classify(fault)
    }
}
