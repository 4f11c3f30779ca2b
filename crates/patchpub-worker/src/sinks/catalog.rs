//! Download catalog: one CSV row per published archive, keyed by publication id

use patchpub_common::types::AccessPolicy;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{replace_file, SinkError};

pub const CATALOG_COLUMNS: [&str; 27] = [
    "downloadPubID",
    "nameCode",
    "statusCode",
    "releaseDate",
    "typeCode",
    "productLineCode",
    "priorityCode",
    "sizeInMB",
    "isSuggest",
    "descriptionCode",
    "detailsBaseName",
    "isvProperty1",
    "isvProperty2",
    "isvProperty3",
    "isvProperty4",
    "isvProperty5",
    "isvProperty6",
    "isvProperty7",
    "isvProperty8",
    "isvProperty9",
    "isvProperty10",
    "restrictionTypeCode",
    "maxDownloads",
    "maxDuration",
    "pluginCode",
    "fileName",
    "listLinkedProducts",
];

const KEY_COLUMN: usize = 0;

const STATUS_CODE: &str = "ACTIV";
const TYPE_CODE: &str = "A1SOFTDOWN";
const PRODUCT_LINE_CODE: &str = "MPLMM";
const PRIORITY_CODE: &str = "XPXX";
const IS_SUGGEST: &str = "F";
const UNLIMITED: &str = "999999";
const PLUGIN_CODE: &str = "CLOUDFLARE";

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogRecord {
    pub publication_id: String,
    pub product_name: String,
    /// `YYYYMMDD` or the unknown-date label
    pub release_date: String,
    /// Archive path relative to the working directory, forward slashes
    pub bundle_path: String,
    pub size_bytes: u64,
    pub access_policy: AccessPolicy,
}

impl CatalogRecord {
    pub fn size_mb(&self) -> String {
        format!("{:.2}", self.size_bytes as f64 / BYTES_PER_MB)
    }

    fn to_row(&self) -> Vec<String> {
        let mut row = vec![String::new(); CATALOG_COLUMNS.len()];
        let mut set = |column: &str, value: &str| {
            if let Some(idx) = column_index(column) {
                row[idx] = value.to_string();
            }
        };

        set("downloadPubID", &self.publication_id);
        set("nameCode", &self.publication_id);
        set("statusCode", STATUS_CODE);
        set("releaseDate", &self.release_date);
        set("typeCode", TYPE_CODE);
        set("productLineCode", PRODUCT_LINE_CODE);
        set("priorityCode", PRIORITY_CODE);
        set("sizeInMB", &self.size_mb());
        set("isSuggest", IS_SUGGEST);
        set("descriptionCode", &self.publication_id);
        set("detailsBaseName", &self.publication_id);
        set("isvProperty1", &self.product_name);
        set("restrictionTypeCode", self.access_policy.restriction_code());
        set("maxDownloads", UNLIMITED);
        set("maxDuration", UNLIMITED);
        set("pluginCode", PLUGIN_CODE);
        set("fileName", &self.bundle_path);
        set("listLinkedProducts", self.access_policy.portal_code());
        row
    }
}

fn column_index(name: &str) -> Option<usize> {
    CATALOG_COLUMNS.iter().position(|c| *c == name)
}

#[derive(Debug, Clone)]
pub struct CatalogSink {
    path: PathBuf,
}

impl CatalogSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Existing rows in canonical column order.
    ///
    /// Columns are matched by header name, so a file written with a different
    /// column order or missing columns is still read correctly.
    pub fn read_rows(&self) -> Result<Vec<Vec<String>>, SinkError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(&self.path)?;
        let mapping: Vec<Option<usize>> = reader
            .headers()?
            .iter()
            .map(|header| column_index(header.trim()))
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            let mut row = vec![String::new(); CATALOG_COLUMNS.len()];
            for (value, target) in record.iter().zip(&mapping) {
                if let Some(idx) = target {
                    row[*idx] = value.to_string();
                }
            }
            rows.push(row);
        }
        Ok(rows)
    }

    /// Replace any rows for the record's publication id with a single new row.
    pub fn upsert(&self, record: &CatalogRecord) -> Result<(), SinkError> {
        let mut rows = self.read_rows()?;
        let before = rows.len();
        rows.retain(|row| row[KEY_COLUMN] != record.publication_id);
        let removed = before - rows.len();
        if removed > 0 {
            debug!(
                publication_id = %record.publication_id,
                removed,
                "Removed existing catalog rows"
            );
        }
        rows.push(record.to_row());

        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(CATALOG_COLUMNS)?;
        for row in &rows {
            writer.write_record(row)?;
        }
        let data = writer
            .into_inner()
            .map_err(|e| SinkError::Write(e.to_string()))?;

        replace_file(&self.path, &data)?;
        info!(
            publication_id = %record.publication_id,
            path = %self.path.display(),
            "Catalog row written"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(id: &str, size_bytes: u64) -> CatalogRecord {
        CatalogRecord {
            publication_id: id.to_string(),
            product_name: "Call Manager".to_string(),
            release_date: "20240307".to_string(),
            bundle_path: format!("patches/CallManager/{id}_all_files.zip"),
            size_bytes,
            access_policy: AccessPolicy::Open,
        }
    }

    fn cell<'a>(row: &'a [String], column: &str) -> &'a str {
        &row[column_index(column).unwrap()]
    }

    #[test]
    fn test_size_mb_has_two_decimals() {
        assert_eq!(record("X", 1_572_864).size_mb(), "1.50");
        assert_eq!(record("X", 0).size_mb(), "0.00");
    }

    #[test]
    fn test_upsert_replaces_existing_row() {
        let dir = TempDir::new().unwrap();
        let sink = CatalogSink::new(dir.path().join("catalog.csv"));

        sink.upsert(&record("MPLMM0000001", 1024)).unwrap();
        sink.upsert(&record("MPLMM0000002", 2048)).unwrap();
        let mut updated = record("MPLMM0000001", 4_194_304);
        updated.access_policy = AccessPolicy::Restricted;
        sink.upsert(&updated).unwrap();

        let rows = sink.read_rows().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(cell(&rows[0], "downloadPubID"), "MPLMM0000002");
        assert_eq!(cell(&rows[1], "downloadPubID"), "MPLMM0000001");
        assert_eq!(cell(&rows[1], "sizeInMB"), "4.00");
        assert_eq!(cell(&rows[1], "restrictionTypeCode"), "ENT_PROD");
        assert_eq!(cell(&rows[1], "listLinkedProducts"), "AVAYA_ONLY_DOWNLOAD");
    }

    #[test]
    fn test_static_columns() {
        let row = record("MPLMM0000003", 10).to_row();
        assert_eq!(row.len(), CATALOG_COLUMNS.len());
        assert_eq!(cell(&row, "statusCode"), "ACTIV");
        assert_eq!(cell(&row, "typeCode"), "A1SOFTDOWN");
        assert_eq!(cell(&row, "pluginCode"), "CLOUDFLARE");
        assert_eq!(cell(&row, "maxDownloads"), "999999");
        assert_eq!(cell(&row, "nameCode"), "MPLMM0000003");
        assert_eq!(cell(&row, "isvProperty2"), "");
    }

    #[test]
    fn test_reorders_columns_by_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catalog.csv");
        std::fs::write(&path, "fileName,downloadPubID\nold.zip,MPLMM0000009\n").unwrap();

        let sink = CatalogSink::new(&path);
        let rows = sink.read_rows().unwrap();
        assert_eq!(cell(&rows[0], "downloadPubID"), "MPLMM0000009");
        assert_eq!(cell(&rows[0], "fileName"), "old.zip");

        sink.upsert(&record("MPLMM0000010", 1)).unwrap();
        let header = std::fs::read_to_string(&path).unwrap();
        assert!(header.starts_with("downloadPubID,nameCode,statusCode"));
    }
}
