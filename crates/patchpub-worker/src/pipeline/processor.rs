//! Turn one work item into an archive, a catalog row and a descriptor block

use chrono::Utc;
use patchpub_common::types::AccessPolicy;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use super::archive::{bundle, ArchiveReport};
use super::files::save_blob;
use super::naming::{
    archive_file_name, belongs_to, local_file_name, portable_relative_path, product_folder_name,
};
use crate::error::ProcessError;
use crate::queue::WorkItem;
use crate::retry::{RetryExecutor, RetryOutcome};
use crate::sinks::{CatalogRecord, CatalogSink, DescriptorBlock, DescriptorSink};
use crate::source::{ConnectionSource, PatchMetadata, PatchSession, ReleaseDate};
use crate::upload::{ArchiveUploader, UploadOutcome};

/// Where archives are written
#[derive(Debug, Clone)]
pub struct OutputLayout {
    /// Catalog paths are recorded relative to this directory
    pub base_dir: PathBuf,
    /// Product folders are created under this directory
    pub patch_root: PathBuf,
}

impl OutputLayout {
    pub fn new(base_dir: impl Into<PathBuf>, patch_folder: impl AsRef<Path>) -> Self {
        let base_dir = base_dir.into();
        Self {
            patch_root: base_dir.join(patch_folder),
            base_dir,
        }
    }
}

/// Why an item was abandoned without publishing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemFailureReason {
    NoMetadata,
    NoFiles,
    NoFilesSaved,
    RetriesExhausted { attempts: u32, fault: String },
}

impl std::fmt::Display for ItemFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemFailureReason::NoMetadata => write!(f, "no metadata found"),
            ItemFailureReason::NoFiles => write!(f, "no files found"),
            ItemFailureReason::NoFilesSaved => write!(f, "no files could be saved"),
            ItemFailureReason::RetriesExhausted { attempts, fault } => {
                write!(f, "gave up after {} attempts: {}", attempts, fault)
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct PublishedItem {
    pub identifier: String,
    pub publication_id: String,
    pub folder: String,
    pub archive: ArchiveReport,
    pub files_saved: usize,
    pub files_skipped: usize,
    pub access_policy: AccessPolicy,
    pub release_date: String,
    /// Sinks that failed to record the item
    pub sink_failures: Vec<String>,
    pub upload: Option<UploadOutcome>,
}

/// Result of one attempt that did not hit an error
#[derive(Debug)]
pub enum AttemptResult {
    Published(PublishedItem),
    /// The data rules the item out; retrying would not help
    Abandoned(ItemFailureReason),
}

#[derive(Debug)]
pub enum ItemOutcome {
    Success(PublishedItem),
    ItemFailure(ItemFailureReason),
    FatalAbort(ProcessError),
}

pub struct RecordProcessor {
    layout: OutputLayout,
    catalog: CatalogSink,
    descriptor: DescriptorSink,
    uploader: ArchiveUploader,
}

impl RecordProcessor {
    pub fn new(
        layout: OutputLayout,
        catalog: CatalogSink,
        descriptor: DescriptorSink,
        uploader: ArchiveUploader,
    ) -> Self {
        Self {
            layout,
            catalog,
            descriptor,
            uploader,
        }
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    /// Process one item under retry.
    pub async fn process<C: ConnectionSource>(
        &self,
        executor: &RetryExecutor<'_, C>,
        item: &WorkItem,
    ) -> ItemOutcome {
        let outcome = executor
            .run(&item.identifier, |session| self.attempt(session, item))
            .await;

        match outcome {
            RetryOutcome::Done {
                value: AttemptResult::Published(published),
                attempts,
            } => {
                info!(
                    identifier = %item.identifier,
                    publication_id = %item.publication_id,
                    attempts,
                    md5 = %published.archive.md5,
                    "Item published"
                );
                ItemOutcome::Success(published)
            },
            RetryOutcome::Done {
                value: AttemptResult::Abandoned(reason),
                ..
            } => {
                warn!(identifier = %item.identifier, reason = %reason, "Item abandoned");
                ItemOutcome::ItemFailure(reason)
            },
            RetryOutcome::RetriesExhausted { error, attempts } => {
                let reason = ItemFailureReason::RetriesExhausted {
                    attempts,
                    fault: error.to_string(),
                };
                warn!(identifier = %item.identifier, reason = %reason, "Item abandoned");
                ItemOutcome::ItemFailure(reason)
            },
            RetryOutcome::Fatal { error, .. } => ItemOutcome::FatalAbort(error),
        }
    }

    /// One attempt on a live session.
    pub async fn attempt<S: PatchSession>(
        &self,
        session: S,
        item: &WorkItem,
    ) -> Result<AttemptResult, ProcessError> {
        let id = item.identifier.as_str();

        let (metadata, dependencies) =
            tokio::try_join!(session.fetch_metadata(id), session.fetch_dependencies(id))?;

        let Some(meta) = metadata.into_iter().next() else {
            return Ok(AttemptResult::Abandoned(ItemFailureReason::NoMetadata));
        };
        log_metadata(&meta, &dependencies);

        let release = match session.fetch_release_date(id).await? {
            Some(release) => release,
            None => {
                warn!(identifier = %id, "No release date recorded, using current time");
                ReleaseDate::unknown(Utc::now())
            },
        };

        let folder = product_folder_name(meta.product_name());
        let target_dir = self.layout.patch_root.join(&folder);
        tokio::fs::create_dir_all(&target_dir)
            .await
            .map_err(|e| ProcessError::io_at("create", &target_dir, e))?;

        let rows: Vec<_> = session
            .fetch_file_rows(id)
            .await?
            .into_iter()
            .filter(|row| belongs_to(row.identifier.trim(), id))
            .collect();
        if rows.is_empty() {
            return Ok(AttemptResult::Abandoned(ItemFailureReason::NoFiles));
        }

        let status = meta.status();
        let mut access_policy = AccessPolicy::Restricted;
        let mut saved: Vec<PathBuf> = Vec::with_capacity(rows.len());
        let mut skipped = 0;

        for (index, row) in rows.iter().enumerate() {
            // The last row's policy applies to the whole item.
            let external_view = AccessPolicy::external_view_flag(row.external_view.as_deref());
            access_policy = AccessPolicy::for_row(external_view, &status);

            let path = target_dir.join(local_file_name(row.filename.as_deref(), index));
            if saved.contains(&path) {
                warn!(identifier = %id, path = %path.display(), "Duplicate file name, skipping row");
                skipped += 1;
                continue;
            }

            match save_blob(&session, &row.blob, &path).await {
                Ok(bytes) => {
                    debug!(identifier = %id, path = %path.display(), bytes, policy = %access_policy, "File saved");
                    saved.push(path);
                },
                Err(e) => {
                    warn!(identifier = %id, path = %path.display(), error = %e, "Could not save file, skipping");
                    skipped += 1;
                    if let Err(cleanup) = tokio::fs::remove_file(&path).await {
                        debug!(path = %path.display(), error = %cleanup, "No partial file to remove");
                    }
                },
            }
        }

        if saved.is_empty() {
            return Ok(AttemptResult::Abandoned(ItemFailureReason::NoFilesSaved));
        }
        let files_saved = saved.len();

        let archive_path = target_dir.join(archive_file_name(&item.publication_id));
        let archive = bundle(saved, archive_path).await?;
        info!(
            identifier = %id,
            archive = %archive.path.display(),
            md5 = %archive.md5,
            bytes = archive.size_bytes,
            files = files_saved,
            "Archive created"
        );

        let mut sink_failures = Vec::new();

        let record = CatalogRecord {
            publication_id: item.publication_id.clone(),
            product_name: meta.product_name().to_string(),
            release_date: release.formatted.clone(),
            bundle_path: portable_relative_path(&archive.path, &self.layout.base_dir),
            size_bytes: archive.size_bytes,
            access_policy,
        };
        if let Err(e) = self.catalog.upsert(&record) {
            error!(identifier = %id, sink = "catalog", error = %e, "Catalog write failed");
            sink_failures.push(format!("catalog: {e}"));
        }

        let block = DescriptorBlock::new(
            &item.publication_id,
            id,
            meta.product_name(),
            meta.title(),
            &archive.md5,
            &dependencies,
        );
        if let Err(e) = self.descriptor.upsert(block) {
            error!(identifier = %id, sink = "descriptor", error = %e, "Descriptor write failed");
            sink_failures.push(format!("descriptor: {e}"));
        }

        let upload = if self.uploader.is_enabled() {
            match self.uploader.upload(&archive.path, &folder).await {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    error!(identifier = %id, error = %e, "Upload failed");
                    None
                },
            }
        } else {
            None
        };

        Ok(AttemptResult::Published(PublishedItem {
            identifier: id.to_string(),
            publication_id: item.publication_id.clone(),
            folder,
            archive,
            files_saved,
            files_skipped: skipped,
            access_policy,
            release_date: release.formatted,
            sink_failures,
            upload,
        }))
    }
}

fn log_metadata(meta: &PatchMetadata, dependencies: &[String]) {
    info!(
        identifier = %meta.identifier,
        product = %meta.product_name(),
        release = %meta.release(),
        kind = %meta.type_desc(),
        status = %meta.status(),
        "Metadata loaded"
    );
    if !dependencies.is_empty() {
        info!(
            identifier = %meta.identifier,
            dependencies = %dependencies.join(", "),
            "Item has dependencies"
        );
    }
}

/// Metadata-only view of an identifier
#[derive(Debug, Clone, Serialize)]
pub struct Inspection {
    pub identifier: String,
    pub metadata: Vec<PatchMetadata>,
    pub dependencies: Vec<String>,
    pub release_date: Option<ReleaseDate>,
    pub product_folder: Option<String>,
}

/// Read everything the pipeline would use for an identifier, writing nothing.
pub async fn inspect<S: PatchSession>(
    session: S,
    identifier: &str,
) -> Result<Inspection, ProcessError> {
    let (metadata, dependencies, release_date) = tokio::try_join!(
        session.fetch_metadata(identifier),
        session.fetch_dependencies(identifier),
        session.fetch_release_date(identifier),
    )?;

    Ok(Inspection {
        identifier: identifier.to_string(),
        product_folder: metadata.first().map(|m| product_folder_name(m.product_name())),
        metadata,
        dependencies,
        release_date,
    })
}
