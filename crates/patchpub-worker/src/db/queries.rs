//! Catalog queries against the `patch` schema

use async_trait::async_trait;
use chrono::{NaiveDateTime, TimeZone, Utc};
use sqlx::postgres::types::Oid;

use super::fault::BackendFault;
use super::supervisor::PgSession;
use crate::source::{
    BlobHandle, PatchFileRow, PatchMetadata, PatchSession, QueueSeed, ReleaseDate,
};

/// Products at or above this id are internal tooling and never published.
const MAX_PUBLISHED_PRODUCT_ID: i64 = 200;

const METADATA_SQL: &str = r#"
SELECT DISTINCT
    m.mm_id,
    m.mm_superseded_by      AS superseded_by,
    rt.rps_type_desc        AS type_desc,
    rs.rps_status_desc      AS status_desc,
    rc.rps_category_desc    AS category_desc,
    p.mmp_product_name      AS product_name,
    p.mmp_product_id::BIGINT AS product_id,
    t.mmi_title_text        AS title_text,
    m.mmr_release           AS release,
    pf.mmf_platform_name    AS platform_name
FROM patch.multimedia m
JOIN patch.rps_type rt     ON rt.rps_type_id = m.mm_type_id
JOIN patch.rps_status rs   ON rs.rps_status_id = m.mm_status_id
LEFT JOIN patch.rps_category rc ON rc.rps_category_id = m.mm_category_id
JOIN patch.mm_product p    ON p.mmp_mm_id = m.mm_id
LEFT JOIN patch.mm_platform pf ON pf.mmf_mm_id = m.mm_id
LEFT JOIN patch.mm_title t ON t.mmi_mm_id = m.mm_id
WHERE UPPER(TRIM(m.mm_id)) = UPPER(TRIM($1))
  AND p.mmp_product_id < $2
ORDER BY m.mm_id
"#;

const DEPENDENCIES_SQL: &str = r#"
SELECT mmd_dep_mm_id
FROM patch.mm_dependency
WHERE mmd_mm_id = $1
ORDER BY mmd_dep_mm_id
"#;

const RELEASE_DATE_SQL: &str = r#"
SELECT mmm_update_date
FROM patch.mm_milestone
WHERE mmm_mm_id = $1
ORDER BY mmm_update_date DESC
LIMIT 1
"#;

const FILE_ROWS_SQL: &str = r#"
SELECT mmd_mm_id, mmd_filename, mmd_ext_view, mmd_data, mmd_data_oid
FROM patch.mm_data
WHERE mmd_mm_id LIKE $1 ESCAPE '\'
ORDER BY mmd_filename
"#;

const LARGE_OBJECT_SQL: &str = "SELECT lo_get($1, $2, $3)";

const QUEUE_SEEDS_SQL: &str = r#"
SELECT mmm_mm_id, TO_CHAR(MAX(mmm_update_date), 'YYYYMMDD') AS latest_date
FROM patch.mm_milestone
GROUP BY mmm_mm_id
ORDER BY MAX(mmm_update_date) DESC, mmm_mm_id
"#;

#[derive(sqlx::FromRow)]
struct MetadataRow {
    mm_id: String,
    superseded_by: Option<String>,
    type_desc: Option<String>,
    status_desc: Option<String>,
    category_desc: Option<String>,
    product_name: Option<String>,
    product_id: Option<i64>,
    title_text: Option<String>,
    release: Option<String>,
    platform_name: Option<String>,
}

impl From<MetadataRow> for PatchMetadata {
    fn from(row: MetadataRow) -> Self {
        Self {
            identifier: row.mm_id,
            superseded_by: row.superseded_by,
            type_desc: row.type_desc,
            status_desc: row.status_desc,
            category_desc: row.category_desc,
            product_name: row.product_name,
            product_id: row.product_id,
            title_text: row.title_text,
            release: row.release,
            platform_name: row.platform_name,
        }
    }
}

#[derive(sqlx::FromRow)]
struct FileRow {
    mmd_mm_id: String,
    mmd_filename: Option<String>,
    mmd_ext_view: Option<String>,
    mmd_data: Option<Vec<u8>>,
    mmd_data_oid: Option<Oid>,
}

impl From<FileRow> for PatchFileRow {
    fn from(row: FileRow) -> Self {
        let blob = match (row.mmd_data_oid, row.mmd_data) {
            (Some(oid), _) => BlobHandle::LargeObject(oid.0),
            (None, Some(bytes)) => BlobHandle::Inline(bytes),
            (None, None) => BlobHandle::Missing,
        };
        Self {
            identifier: row.mmd_mm_id,
            filename: row.mmd_filename,
            external_view: row.mmd_ext_view,
            blob,
        }
    }
}

/// Escape `LIKE` wildcards so an identifier only matches as a literal prefix.
fn like_prefix(identifier: &str) -> String {
    let mut pattern = String::with_capacity(identifier.len() + 1);
    for ch in identifier.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

#[async_trait]
impl PatchSession for PgSession {
    async fn fetch_metadata(&self, identifier: &str) -> Result<Vec<PatchMetadata>, BackendFault> {
        let mut conn = self.lock().await;
        let rows: Vec<MetadataRow> = sqlx::query_as(METADATA_SQL)
            .bind(identifier)
            .bind(MAX_PUBLISHED_PRODUCT_ID)
            .fetch_all(&mut **conn)
            .await?;
        Ok(rows.into_iter().map(PatchMetadata::from).collect())
    }

    async fn fetch_dependencies(&self, identifier: &str) -> Result<Vec<String>, BackendFault> {
        let mut conn = self.lock().await;
        let rows: Vec<(String,)> = sqlx::query_as(DEPENDENCIES_SQL)
            .bind(identifier)
            .fetch_all(&mut **conn)
            .await?;
        Ok(rows.into_iter().map(|(dep,)| dep).collect())
    }

    async fn fetch_release_date(
        &self,
        identifier: &str,
    ) -> Result<Option<ReleaseDate>, BackendFault> {
        let mut conn = self.lock().await;
        let row: Option<(Option<NaiveDateTime>,)> = sqlx::query_as(RELEASE_DATE_SQL)
            .bind(identifier)
            .fetch_optional(&mut **conn)
            .await?;
        Ok(row
            .and_then(|(date,)| date)
            .map(|date| ReleaseDate::known(Utc.from_utc_datetime(&date))))
    }

    async fn fetch_file_rows(&self, identifier: &str) -> Result<Vec<PatchFileRow>, BackendFault> {
        let mut conn = self.lock().await;
        let rows: Vec<FileRow> = sqlx::query_as(FILE_ROWS_SQL)
            .bind(like_prefix(identifier))
            .fetch_all(&mut **conn)
            .await?;
        Ok(rows.into_iter().map(PatchFileRow::from).collect())
    }

    async fn read_large_object(
        &self,
        oid: u32,
        offset: i64,
        len: i32,
    ) -> Result<Vec<u8>, BackendFault> {
        let mut conn = self.lock().await;
        let (chunk,): (Option<Vec<u8>>,) = sqlx::query_as(LARGE_OBJECT_SQL)
            .bind(Oid(oid))
            .bind(offset)
            .bind(len)
            .fetch_one(&mut **conn)
            .await?;
        Ok(chunk.unwrap_or_default())
    }

    async fn list_queue_seeds(&self) -> Result<Vec<QueueSeed>, BackendFault> {
        let mut conn = self.lock().await;
        let rows: Vec<(String, Option<String>)> = sqlx::query_as(QUEUE_SEEDS_SQL)
            .fetch_all(&mut **conn)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(identifier, latest_date)| QueueSeed {
                identifier,
                latest_date: latest_date.unwrap_or_default(),
            })
            .collect())
    }
}
