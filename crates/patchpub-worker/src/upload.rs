//! Hand published archives to the distribution server over FTP
//!
//! Uploads are disabled unless configured. The transfer uses the blocking
//! `suppaftp` client on a blocking thread, in extended passive mode.

use std::fs::File;
use std::path::Path;
use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Local archive not found: {0}")]
    MissingLocal(String),

    #[error("FTP error: {0}")]
    Ftp(#[from] FtpError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Upload task failed: {0}")]
    Task(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Remote directory under which product folders are created
    pub remote_root: String,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "localhost".to_string(),
            port: 21,
            username: "anonymous".to_string(),
            password: String::new(),
            remote_root: "/MPL".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded,
    /// The remote file already existed; nothing was sent
    AlreadyPresent,
}

/// Join remote path segments with single slashes.
pub fn remote_dir(root: &str, folder: &str) -> String {
    let root = root.trim_end_matches('/');
    let folder = folder.trim_matches('/');
    if folder.is_empty() {
        return root.to_string();
    }
    format!("{root}/{folder}")
}

pub struct ArchiveUploader {
    config: UploadConfig,
}

impl ArchiveUploader {
    pub fn new(config: UploadConfig) -> Self {
        Self { config }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Upload `local` into `<remote_root>/<folder>`, then delete the local copy.
    pub async fn upload(&self, local: &Path, folder: &str) -> Result<UploadOutcome, UploadError> {
        if !tokio::fs::try_exists(local).await.unwrap_or(false) {
            return Err(UploadError::MissingLocal(local.display().to_string()));
        }

        let config = self.config.clone();
        let local_path = local.to_path_buf();
        let dir = remote_dir(&config.remote_root, folder);

        let outcome = tokio::task::spawn_blocking(move || Self::upload_sync(&config, &local_path, &dir))
            .await
            .map_err(|e| UploadError::Task(e.to_string()))??;

        if outcome == UploadOutcome::Uploaded {
            if let Err(e) = tokio::fs::remove_file(local).await {
                warn!(path = %local.display(), error = %e, "Could not remove uploaded archive");
            }
        }
        Ok(outcome)
    }

    fn upload_sync(config: &UploadConfig, local: &Path, dir: &str) -> Result<UploadOutcome, UploadError> {
        let address = format!("{}:{}", config.host, config.port);
        debug!(address = %address, "Connecting to FTP server");

        let mut ftp = FtpStream::connect(&address)?;
        ftp.set_mode(suppaftp::Mode::ExtendedPassive);

        let result = Self::transfer(&mut ftp, config, local, dir);

        if let Err(e) = ftp.quit() {
            debug!(error = %e, "FTP quit failed");
        }
        result
    }

    fn transfer(
        ftp: &mut FtpStream,
        config: &UploadConfig,
        local: &Path,
        dir: &str,
    ) -> Result<UploadOutcome, UploadError> {
        ftp.login(&config.username, &config.password)?;
        ftp.transfer_type(FileType::Binary)?;
        Self::ensure_dir(ftp, dir)?;

        let name = local
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let remote = format!("{dir}/{name}");

        if ftp.size(&name).is_ok() {
            info!(remote = %remote, "Remote archive already present, skipping upload");
            return Ok(UploadOutcome::AlreadyPresent);
        }

        let mut file = File::open(local)?;
        let bytes = ftp.put_file(&name, &mut file)?;
        info!(remote = %remote, bytes, "Archive uploaded");
        Ok(UploadOutcome::Uploaded)
    }

    /// Change into `dir`, creating missing components one by one.
    fn ensure_dir(ftp: &mut FtpStream, dir: &str) -> Result<(), UploadError> {
        if ftp.cwd(dir).is_ok() {
            return Ok(());
        }

        let mut current = if dir.starts_with('/') { String::from("/") } else { String::new() };
        for component in dir.split('/').filter(|c| !c.is_empty()) {
            if !current.is_empty() && !current.ends_with('/') {
                current.push('/');
            }
            current.push_str(component);
            if ftp.cwd(&current).is_err() {
                ftp.mkdir(&current)?;
                debug!(dir = %current, "Created remote directory");
            }
        }
        ftp.cwd(dir)?;
        Ok(())
    }
}
