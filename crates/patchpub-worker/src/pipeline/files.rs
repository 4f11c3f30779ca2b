//! Materialize catalog blobs as local files

use std::io;
use std::path::Path;
use tokio::io::AsyncWriteExt;

use crate::error::ProcessError;
use crate::source::{BlobHandle, PatchSession};

/// Bytes requested per large-object read
pub const LARGE_OBJECT_CHUNK: i32 = 1024 * 1024;

/// Write one blob to `path`, returning the number of bytes written.
///
/// Inline content is written in one go; large objects are streamed chunk by
/// chunk so a multi-gigabyte file never sits in memory.
pub async fn save_blob<S: PatchSession>(
    session: &S,
    blob: &BlobHandle,
    path: &Path,
) -> Result<u64, ProcessError> {
    match blob {
        BlobHandle::Inline(bytes) => {
            tokio::fs::write(path, bytes)
                .await
                .map_err(|e| ProcessError::io_at("write", path, e))?;
            Ok(bytes.len() as u64)
        },
        BlobHandle::LargeObject(oid) => stream_large_object(session, *oid, path).await,
        BlobHandle::Missing => Err(ProcessError::io_at(
            "write",
            path,
            io::Error::new(io::ErrorKind::NotFound, "row has no stored content"),
        )),
    }
}

async fn stream_large_object<S: PatchSession>(
    session: &S,
    oid: u32,
    path: &Path,
) -> Result<u64, ProcessError> {
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| ProcessError::io_at("create", path, e))?;
    let mut offset: i64 = 0;

    loop {
        let chunk = session
            .read_large_object(oid, offset, LARGE_OBJECT_CHUNK)
            .await?;
        if chunk.is_empty() {
            break;
        }
        file.write_all(&chunk)
            .await
            .map_err(|e| ProcessError::io_at("write", path, e))?;
        offset += chunk.len() as i64;
        if chunk.len() < LARGE_OBJECT_CHUNK as usize {
            break;
        }
    }

    file.flush()
        .await
        .map_err(|e| ProcessError::io_at("flush", path, e))?;
    Ok(offset as u64)
}
