//! Checkpointed work queue
//!
//! The backlog is a plain text file, one item per line:
//!
//! ```text
//! MMID: CM10_SP2, DownloadPubID: MPLMM0000123  LatestDate: 20240307
//! ```
//!
//! A run takes a batch from the head, appends the raw lines to an audit
//! ledger, processes them, and then rewrites the backlog without the lines
//! that were published. Rewrites go through a temporary sibling file and a
//! rename, so an interrupted commit leaves either the old or the new backlog.

use regex::Regex;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

static IDENTIFIER_FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)MMID:\s*([^,]+?)\s*(?:,|$)").expect("valid identifier regex"));

static PUBLICATION_FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)DownloadPubID:\s*([^\s,]+)").expect("valid publication regex"));

/// One unit of work parsed from a queue line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub identifier: String,
    pub publication_id: String,
}

impl WorkItem {
    /// Parse a queue line. Returns `None` when either field is missing.
    pub fn parse(line: &str) -> Option<Self> {
        let identifier = IDENTIFIER_FIELD.captures(line)?.get(1)?.as_str().trim();
        let publication_id = PUBLICATION_FIELD.captures(line)?.get(1)?.as_str().trim();
        if identifier.is_empty() || publication_id.is_empty() {
            return None;
        }
        Some(Self {
            identifier: identifier.to_string(),
            publication_id: publication_id.to_string(),
        })
    }
}

/// Render a queue line in the backlog format.
pub fn format_queue_line(identifier: &str, publication_id: &str, latest_date: &str) -> String {
    format!("MMID: {identifier}, DownloadPubID: {publication_id}  LatestDate: {latest_date}")
}

/// Publication id assigned by the queue seeder: `MPLMM` and a 7-digit counter.
pub fn seeded_publication_id(counter: usize) -> String {
    format!("MPLMM{counter:07}")
}

/// A bounded slice from the head of the backlog
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    /// Raw lines taken from the head, in order
    pub lines: Vec<String>,
    /// Items parsed from `lines`, malformed lines and duplicates removed
    pub items: Vec<WorkItem>,
    /// Lines after the batch, untouched
    pub remainder: Vec<String>,
}

impl Batch {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Lines that stay queued after `success_count` items were published.
    ///
    /// Drops exactly `success_count` raw lines from the front of the batch.
    /// This is only exact when the failures of a batch come after all of its
    /// successes.
    pub fn surviving_tail(&self, success_count: usize) -> &[String] {
        &self.lines[success_count.min(self.lines.len())..]
    }
}

fn split_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone)]
pub struct WorkQueue {
    checkpoint: PathBuf,
    ledger: PathBuf,
}

impl WorkQueue {
    pub fn new(checkpoint: impl Into<PathBuf>, ledger: impl Into<PathBuf>) -> Self {
        Self {
            checkpoint: checkpoint.into(),
            ledger: ledger.into(),
        }
    }

    pub fn checkpoint_path(&self) -> &Path {
        &self.checkpoint
    }

    pub fn ledger_path(&self) -> &Path {
        &self.ledger
    }

    /// Take up to `size` lines from the head of the backlog.
    ///
    /// A missing or unreadable backlog is an empty batch, not an error.
    pub async fn load_batch(&self, size: usize) -> Batch {
        let content = match tokio::fs::read_to_string(&self.checkpoint).await {
            Ok(content) => content,
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(
                        path = %self.checkpoint.display(),
                        error = %e,
                        "Queue file unreadable, treating as empty"
                    );
                }
                return Batch::default();
            },
        };

        let mut lines = split_lines(&content);
        let remainder = lines.split_off(size.min(lines.len()));

        let mut seen = HashSet::new();
        let mut items = Vec::with_capacity(lines.len());
        for line in &lines {
            let Some(item) = WorkItem::parse(line) else {
                debug!(line = %line, "Skipping malformed queue line");
                continue;
            };
            if !seen.insert(item.identifier.clone()) {
                warn!(identifier = %item.identifier, "Duplicate identifier in batch, skipping");
                continue;
            }
            items.push(item);
        }

        Batch {
            lines,
            items,
            remainder,
        }
    }

    /// Append raw lines to the audit ledger.
    pub async fn record_consumed(&self, lines: &[String]) -> io::Result<()> {
        if lines.is_empty() {
            return Ok(());
        }
        if let Some(parent) = self.ledger.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut buffer = String::new();
        for line in lines {
            buffer.push_str(line);
            buffer.push('\n');
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.ledger)
            .await?;
        file.write_all(buffer.as_bytes()).await?;
        file.flush().await
    }

    /// Replace the backlog with `surviving_tail` followed by `remainder`.
    pub async fn commit(&self, surviving_tail: &[String], remainder: &[String]) -> io::Result<()> {
        let lines: Vec<&str> = surviving_tail
            .iter()
            .chain(remainder)
            .map(String::as_str)
            .collect();
        self.replace_backlog(&lines).await
    }

    /// Write a fresh backlog, replacing any existing one.
    pub async fn seed(&self, lines: &[String]) -> io::Result<()> {
        let lines: Vec<&str> = lines.iter().map(String::as_str).collect();
        self.replace_backlog(&lines).await
    }

    async fn replace_backlog(&self, lines: &[&str]) -> io::Result<()> {
        let mut content = lines.join("\n");
        if !content.is_empty() {
            content.push('\n');
        }
        write_atomically(&self.checkpoint, content.as_bytes()).await
    }
}

/// Write `data` to a temporary sibling of `path`, then rename it into place.
pub(crate) async fn write_atomically(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    let mut file = tokio::fs::File::create(&tmp_path).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&tmp_path, path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn line(id: &str, n: usize) -> String {
        format_queue_line(id, &seeded_publication_id(n), "20240101")
    }

    #[test]
    fn test_parse_queue_line() {
        let item = WorkItem::parse("MMID: CM10_SP2, DownloadPubID: MPLMM0000123  LatestDate: 20240307")
            .unwrap();
        assert_eq!(item.identifier, "CM10_SP2");
        assert_eq!(item.publication_id, "MPLMM0000123");
    }

    #[test]
    fn test_parse_rejects_malformed_lines() {
        assert!(WorkItem::parse("garbage").is_none());
        assert!(WorkItem::parse("MMID: , DownloadPubID: MPLMM0000001").is_none());
        assert!(WorkItem::parse("MMID: CM10").is_none());
    }

    #[test]
    fn test_seeded_publication_id_is_zero_padded() {
        assert_eq!(seeded_publication_id(42), "MPLMM0000042");
    }

    #[tokio::test]
    async fn test_missing_file_is_empty_batch() {
        let dir = TempDir::new().unwrap();
        let queue = WorkQueue::new(dir.path().join("absent.txt"), dir.path().join("ledger.txt"));
        assert!(queue.load_batch(3).await.is_empty());
    }

    #[tokio::test]
    async fn test_load_batch_splits_head_and_remainder() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue.txt");
        let content = format!("{}\n\n  {}  \nnot a queue line\n{}\n", line("A", 3), line("B", 2), line("C", 1));
        std::fs::write(&path, content).unwrap();

        let queue = WorkQueue::new(&path, dir.path().join("ledger.txt"));
        let batch = queue.load_batch(3).await;

        assert_eq!(batch.lines.len(), 3);
        assert_eq!(batch.lines[1], line("B", 2));
        assert_eq!(batch.items.len(), 2);
        assert_eq!(batch.remainder, vec![line("C", 1)]);
    }

    #[tokio::test]
    async fn test_duplicate_identifier_in_batch_is_dropped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue.txt");
        std::fs::write(&path, format!("{}\n{}\n", line("A", 2), line("A", 1))).unwrap();

        let batch = WorkQueue::new(&path, dir.path().join("ledger.txt")).load_batch(5).await;
        assert_eq!(batch.lines.len(), 2);
        assert_eq!(batch.items.len(), 1);
    }

    #[tokio::test]
    async fn test_ledger_appends_in_order() {
        let dir = TempDir::new().unwrap();
        let queue = WorkQueue::new(dir.path().join("q.txt"), dir.path().join("logs/ledger.txt"));

        queue.record_consumed(&[line("A", 1)]).await.unwrap();
        queue.record_consumed(&[line("B", 2), line("C", 3)]).await.unwrap();

        let ledger = std::fs::read_to_string(queue.ledger_path()).unwrap();
        assert_eq!(ledger, format!("{}\n{}\n{}\n", line("A", 1), line("B", 2), line("C", 3)));
    }

    #[tokio::test]
    async fn test_commit_rewrites_backlog_without_temp_leftovers() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue.txt");
        let queue = WorkQueue::new(&path, dir.path().join("ledger.txt"));

        queue.commit(&[line("B", 2)], &[line("C", 3)]).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            format!("{}\n{}\n", line("B", 2), line("C", 3))
        );
        assert!(!dir.path().join("queue.txt.tmp").exists());

        queue.commit(&[], &[]).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn test_surviving_tail_drops_from_front() {
        let batch = Batch {
            lines: vec!["a".into(), "b".into(), "c".into()],
            ..Default::default()
        };
        assert_eq!(batch.surviving_tail(2), &["c".to_string()]);
        assert!(batch.surviving_tail(5).is_empty());
    }
}
