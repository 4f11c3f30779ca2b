//! MD5 digests for published archives
//!
//! The distribution portal verifies downloads against a lowercase hex MD5,
//! so every archive gets one computed after the archive is finalized.

use crate::error::Result;
use std::io::Read;
use std::path::Path;

const READ_BUFFER_SIZE: usize = 8192;

/// Compute the MD5 hex digest of an in-memory buffer
pub fn compute_md5(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

/// Compute the MD5 hex digest of any readable source without buffering it whole
pub fn compute_md5_reader<R: Read>(reader: &mut R) -> Result<String> {
    let mut context = md5::Context::new();
    let mut buffer = [0u8; READ_BUFFER_SIZE];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        context.consume(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", context.compute()))
}

/// Compute the MD5 hex digest of a file on disk
pub fn compute_file_md5(path: impl AsRef<Path>) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    compute_md5_reader(&mut file)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::PatchpubError;
    use std::io::{Cursor, Write};

    #[test]
    fn test_compute_md5_known_value() {
        assert_eq!(compute_md5(b"hello world"), "5eb63bbbe01eeed093cb22bb8f5acdc3");
        assert_eq!(compute_md5(b""), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn test_reader_matches_buffer() {
        let data: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        let mut cursor = Cursor::new(&data);
        assert_eq!(compute_md5_reader(&mut cursor).unwrap(), compute_md5(&data));
    }

    #[test]
    fn test_file_digest() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"hello world").unwrap();
        file.flush().unwrap();

        assert_eq!(compute_file_md5(file.path()).unwrap(), "5eb63bbbe01eeed093cb22bb8f5acdc3");

        let missing = file.path().with_extension("missing");
        assert!(matches!(compute_file_md5(&missing), Err(PatchpubError::Io(_))));
    }
}
