//! Test helpers for patchpub worker integration tests
//!
//! Provides an in-memory catalog backend that implements the connection and
//! session traits, with scripted faults, plus builders for a processor writing
//! into a temporary directory.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use patchpub_worker::db::BackendFault;
use patchpub_worker::pipeline::{OutputLayout, RecordProcessor};
use patchpub_worker::queue::{format_queue_line, seeded_publication_id};
use patchpub_worker::retry::RetryPolicy;
use patchpub_worker::sinks::{CatalogSink, DescriptorSettings, DescriptorSink};
use patchpub_worker::source::{
    BlobHandle, ConnectionSource, PatchFileRow, PatchMetadata, PatchSession, QueueSeed,
    ReleaseDate,
};
use patchpub_worker::upload::{ArchiveUploader, UploadConfig};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Catalog content of one identifier
#[derive(Debug, Clone, Default)]
pub struct FakePatch {
    pub metadata: Vec<PatchMetadata>,
    pub dependencies: Vec<String>,
    pub release_date: Option<ReleaseDate>,
    pub files: Vec<PatchFileRow>,
}

impl FakePatch {
    /// A released patch with metadata and a release date but no files yet.
    pub fn released(identifier: &str, product: &str) -> Self {
        Self {
            metadata: vec![PatchMetadata {
                identifier: identifier.to_string(),
                type_desc: Some("Service Pack".to_string()),
                status_desc: Some("Released".to_string()),
                product_name: Some(product.to_string()),
                product_id: Some(17),
                title_text: Some(format!("Cumulative fixes for {identifier}")),
                release: Some("10.1".to_string()),
                ..Default::default()
            }],
            release_date: Some(ReleaseDate::known(
                Utc.with_ymd_and_hms(2024, 3, 7, 12, 0, 0).unwrap(),
            )),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: &str) -> Self {
        for meta in &mut self.metadata {
            meta.status_desc = Some(status.to_string());
        }
        self
    }

    pub fn with_file(mut self, row_identifier: &str, filename: &str, content: &[u8], external: bool) -> Self {
        self.files.push(PatchFileRow {
            identifier: row_identifier.to_string(),
            filename: Some(filename.to_string()),
            external_view: Some(if external { "Y" } else { "N" }.to_string()),
            blob: BlobHandle::Inline(content.to_vec()),
        });
        self
    }

    pub fn with_blob(mut self, row_identifier: &str, filename: Option<&str>, blob: BlobHandle) -> Self {
        self.files.push(PatchFileRow {
            identifier: row_identifier.to_string(),
            filename: filename.map(str::to_string),
            external_view: Some("Y".to_string()),
            blob,
        });
        self
    }

    pub fn with_dependencies(mut self, dependencies: &[&str]) -> Self {
        self.dependencies = dependencies.iter().map(|d| d.to_string()).collect();
        self
    }
}

#[derive(Default)]
struct Shared {
    patches: Mutex<HashMap<String, FakePatch>>,
    large_objects: Mutex<HashMap<u32, Vec<u8>>>,
    metadata_faults: Mutex<HashMap<String, VecDeque<BackendFault>>>,
    acquire_faults: Mutex<VecDeque<BackendFault>>,
    acquired: AtomicUsize,
    released: AtomicUsize,
    max_outstanding: AtomicUsize,
    metadata_calls: Mutex<Vec<String>>,
}

/// In-memory backend; clones share state
#[derive(Clone, Default)]
pub struct FakeBackend {
    shared: Arc<Shared>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_patch(&self, identifier: &str, patch: FakePatch) {
        self.shared
            .patches
            .lock()
            .unwrap()
            .insert(identifier.to_string(), patch);
    }

    pub fn add_large_object(&self, oid: u32, content: Vec<u8>) {
        self.shared.large_objects.lock().unwrap().insert(oid, content);
    }

    /// Fail the next metadata fetches for `identifier` with these faults, in order.
    pub fn fail_metadata(&self, identifier: &str, faults: Vec<BackendFault>) {
        self.shared
            .metadata_faults
            .lock()
            .unwrap()
            .entry(identifier.to_string())
            .or_default()
            .extend(faults);
    }

    /// Fail the next session acquisitions with these faults, in order.
    pub fn fail_acquire(&self, faults: Vec<BackendFault>) {
        self.shared.acquire_faults.lock().unwrap().extend(faults);
    }

    pub fn acquired(&self) -> usize {
        self.shared.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.shared.released.load(Ordering::SeqCst)
    }

    pub fn outstanding(&self) -> usize {
        self.acquired() - self.released()
    }

    /// Highest number of sessions ever held at once
    pub fn max_outstanding(&self) -> usize {
        self.shared.max_outstanding.load(Ordering::SeqCst)
    }

    /// Identifiers whose metadata was requested, in call order
    pub fn metadata_calls(&self) -> Vec<String> {
        self.shared.metadata_calls.lock().unwrap().clone()
    }
}

#[derive(Clone)]
pub struct FakeSession {
    shared: Arc<Shared>,
}

impl FakeSession {
    fn patch(&self, identifier: &str) -> Option<FakePatch> {
        self.shared.patches.lock().unwrap().get(identifier).cloned()
    }
}

#[async_trait]
impl PatchSession for FakeSession {
    async fn fetch_metadata(&self, identifier: &str) -> Result<Vec<PatchMetadata>, BackendFault> {
        self.shared
            .metadata_calls
            .lock()
            .unwrap()
            .push(identifier.to_string());

        let fault = self
            .shared
            .metadata_faults
            .lock()
            .unwrap()
            .get_mut(identifier)
            .and_then(VecDeque::pop_front);
        if let Some(fault) = fault {
            return Err(fault);
        }

        Ok(self.patch(identifier).map(|p| p.metadata).unwrap_or_default())
    }

    async fn fetch_dependencies(&self, identifier: &str) -> Result<Vec<String>, BackendFault> {
        Ok(self.patch(identifier).map(|p| p.dependencies).unwrap_or_default())
    }

    async fn fetch_release_date(
        &self,
        identifier: &str,
    ) -> Result<Option<ReleaseDate>, BackendFault> {
        Ok(self.patch(identifier).and_then(|p| p.release_date))
    }

    async fn fetch_file_rows(&self, identifier: &str) -> Result<Vec<PatchFileRow>, BackendFault> {
        let patches = self.shared.patches.lock().unwrap();
        let mut rows: Vec<PatchFileRow> = patches
            .values()
            .flat_map(|p| p.files.iter())
            .filter(|row| row.identifier.starts_with(identifier))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(rows)
    }

    async fn read_large_object(
        &self,
        oid: u32,
        offset: i64,
        len: i32,
    ) -> Result<Vec<u8>, BackendFault> {
        let objects = self.shared.large_objects.lock().unwrap();
        let content = objects
            .get(&oid)
            .ok_or_else(|| BackendFault::new(format!("large object {oid} does not exist")).with_code("42704"))?;
        let start = (offset as usize).min(content.len());
        let end = (start + len as usize).min(content.len());
        Ok(content[start..end].to_vec())
    }

    async fn list_queue_seeds(&self) -> Result<Vec<QueueSeed>, BackendFault> {
        let patches = self.shared.patches.lock().unwrap();
        let mut seeds: Vec<QueueSeed> = patches
            .iter()
            .map(|(identifier, patch)| QueueSeed {
                identifier: identifier.clone(),
                latest_date: patch
                    .release_date
                    .as_ref()
                    .map(|d| d.formatted.clone())
                    .unwrap_or_default(),
            })
            .collect();
        seeds.sort_by(|a, b| b.latest_date.cmp(&a.latest_date));
        Ok(seeds)
    }
}

#[async_trait]
impl ConnectionSource for FakeBackend {
    type Session = FakeSession;

    async fn acquire(&self) -> Result<FakeSession, BackendFault> {
        if let Some(fault) = self.shared.acquire_faults.lock().unwrap().pop_front() {
            return Err(fault);
        }
        let acquired = self.shared.acquired.fetch_add(1, Ordering::SeqCst) + 1;
        let outstanding = acquired - self.shared.released.load(Ordering::SeqCst);
        self.shared.max_outstanding.fetch_max(outstanding, Ordering::SeqCst);
        Ok(FakeSession {
            shared: Arc::clone(&self.shared),
        })
    }

    async fn release(&self, _session: FakeSession) {
        self.shared.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// A fault the classifier treats as recoverable
pub fn transient_fault() -> BackendFault {
    BackendFault::new("terminating connection due to administrator command").with_code("57P01")
}

/// A fault the classifier treats as fatal
pub fn fatal_fault() -> BackendFault {
    BackendFault::new("permission denied for table mm_data").with_code("42501")
}

/// Default retry counts with short waits
pub fn quick_policy() -> RetryPolicy {
    RetryPolicy {
        max_retries: 4,
        base_delay: Duration::from_millis(1),
    }
}

pub struct TestOutput {
    pub root: PathBuf,
}

impl TestOutput {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn patch_root(&self) -> PathBuf {
        self.root.join("patches")
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.root.join("catalog.csv")
    }

    pub fn descriptor_path(&self) -> PathBuf {
        self.root.join("mplplds.xml")
    }

    pub fn queue_path(&self) -> PathBuf {
        self.root.join("queue.txt")
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.root.join("processed.txt")
    }

    pub fn processor(&self) -> RecordProcessor {
        self.processor_with_catalog(self.catalog_path())
    }

    pub fn processor_with_catalog(&self, catalog: PathBuf) -> RecordProcessor {
        RecordProcessor::new(
            OutputLayout::new(&self.root, "patches"),
            CatalogSink::new(catalog),
            DescriptorSink::new(self.descriptor_path(), DescriptorSettings::default()),
            ArchiveUploader::new(UploadConfig::default()),
        )
    }
}

/// Queue line for `identifier` with a deterministic publication id
pub fn queue_line(identifier: &str, counter: usize) -> String {
    format_queue_line(identifier, &seeded_publication_id(counter), "20240307")
}
