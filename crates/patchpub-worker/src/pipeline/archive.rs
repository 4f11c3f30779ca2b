//! Bundle saved files into one zip archive and checksum it

use patchpub_common::checksum::compute_file_md5;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::ProcessError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveReport {
    pub path: PathBuf,
    /// Lowercase hex MD5 of the finished archive
    pub md5: String,
    pub size_bytes: u64,
    pub entries: usize,
    /// Source files that could not be removed afterwards
    pub leftover_sources: Vec<PathBuf>,
}

/// Archive `sources` into `archive_path`, checksum the result, then delete
/// the sources.
///
/// The checksum is taken only after the archive is finalized. A source that
/// cannot be deleted is logged and reported, not treated as a failure.
pub async fn bundle(sources: Vec<PathBuf>, archive_path: PathBuf) -> Result<ArchiveReport, ProcessError> {
    let (mut report, sources) = tokio::task::spawn_blocking(move || {
        write_archive(&sources, &archive_path).map(|report| (report, sources))
    })
    .await??;

    for source in sources {
        if let Err(e) = tokio::fs::remove_file(&source).await {
            warn!(path = %source.display(), error = %e, "Could not remove archived source file");
            report.leftover_sources.push(source);
        }
    }

    Ok(report)
}

fn write_archive(sources: &[PathBuf], archive_path: &Path) -> Result<ArchiveReport, ProcessError> {
    let file = File::create(archive_path).map_err(|e| ProcessError::io_at("create", archive_path, e))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));

    for source in sources {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| source.display().to_string());
        let len = std::fs::metadata(source)
            .map_err(|e| ProcessError::io_at("stat", source, e))?
            .len();
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .large_file(len >= u64::from(u32::MAX));

        zip.start_file(name.as_str(), options)?;
        let mut input = File::open(source).map_err(|e| ProcessError::io_at("open", source, e))?;
        std::io::copy(&mut input, &mut zip).map_err(|e| ProcessError::io_at("compress", source, e))?;
        debug!(file = %name, bytes = len, "Added file to archive");
    }

    let mut writer = zip.finish()?;
    writer
        .flush()
        .map_err(|e| ProcessError::io_at("flush", archive_path, e))?;
    drop(writer);

    let md5 = compute_file_md5(archive_path)?;
    let size_bytes = std::fs::metadata(archive_path)
        .map_err(|e| ProcessError::io_at("stat", archive_path, e))?
        .len();

    Ok(ArchiveReport {
        path: archive_path.to_path_buf(),
        md5,
        size_bytes,
        entries: sources.len(),
        leftover_sources: Vec::new(),
    })
}
