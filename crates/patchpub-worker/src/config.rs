//! Configuration management
//!
//! Values come from the environment (a `.env` file is loaded first when
//! present), falling back to the defaults below.

use std::path::PathBuf;
use std::time::Duration;

use crate::db::DbConfig;
use crate::retry::RetryPolicy;
use crate::runner::RunnerSettings;
use crate::sinks::DescriptorSettings;
use crate::upload::UploadConfig;

// ============================================================================
// Database
// ============================================================================

pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/patches";
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 1;
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

// ============================================================================
// Queue
// ============================================================================

pub const DEFAULT_QUEUE_FILE: &str = "unique_mmids.txt";
pub const DEFAULT_LEDGER_FILE: &str = "processed_mmids.txt";
pub const DEFAULT_BATCH_SIZE: usize = 3;
pub const DEFAULT_ONE_BATCH_ONLY: bool = true;

// ============================================================================
// Retry
// ============================================================================

pub const DEFAULT_MAX_RETRIES: u32 = 4;
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 750;

// ============================================================================
// Output
// ============================================================================

pub const DEFAULT_OUTPUT_DIR: &str = ".";
pub const DEFAULT_PATCH_FOLDER: &str = "patches";
pub const DEFAULT_CATALOG_FILE: &str = "define-download-loads.csv";
pub const DEFAULT_DESCRIPTOR_FILE: &str = "mplplds.xml";

// ============================================================================
// Upload
// ============================================================================

pub const DEFAULT_UPLOAD_PORT: u16 = 21;
pub const DEFAULT_UPLOAD_REMOTE_ROOT: &str = "/MPL";

#[derive(Debug, Clone)]
pub struct Config {
    pub database: DbConfig,
    pub queue: QueueConfig,
    pub retry: RetryPolicy,
    pub output: OutputConfig,
    pub descriptor: DescriptorSettings,
    pub upload: UploadConfig,
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub checkpoint_path: PathBuf,
    pub ledger_path: PathBuf,
    pub batch_size: usize,
    pub one_batch_only: bool,
}

#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub base_dir: PathBuf,
    pub patch_folder: PathBuf,
    pub catalog_path: PathBuf,
    pub descriptor_path: PathBuf,
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|s| s.trim().parse().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    env_string(key).and_then(|s| match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    })
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let config = Self::from_env();
        config.validate()?;
        Ok(config)
    }

    /// Read the environment without loading `.env` or validating.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let descriptor_defaults = defaults.descriptor;

        Config {
            database: DbConfig {
                url: env_string("DATABASE_URL").unwrap_or(defaults.database.url),
                max_connections: env_parse("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or(DEFAULT_DATABASE_MAX_CONNECTIONS),
                min_connections: env_parse("DATABASE_MIN_CONNECTIONS")
                    .unwrap_or(DEFAULT_DATABASE_MIN_CONNECTIONS),
                connect_timeout_secs: env_parse("DATABASE_CONNECT_TIMEOUT")
                    .unwrap_or(DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS),
                idle_timeout_secs: Some(
                    env_parse("DATABASE_IDLE_TIMEOUT").unwrap_or(DEFAULT_DATABASE_IDLE_TIMEOUT_SECS),
                ),
            },
            queue: QueueConfig {
                checkpoint_path: env_string("PATCHPUB_QUEUE_FILE")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.queue.checkpoint_path),
                ledger_path: env_string("PATCHPUB_LEDGER_FILE")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.queue.ledger_path),
                batch_size: env_parse("PATCHPUB_BATCH_SIZE").unwrap_or(DEFAULT_BATCH_SIZE),
                one_batch_only: env_flag("PATCHPUB_ONE_BATCH_ONLY").unwrap_or(DEFAULT_ONE_BATCH_ONLY),
            },
            retry: RetryPolicy {
                max_retries: env_parse("PATCHPUB_MAX_RETRIES").unwrap_or(DEFAULT_MAX_RETRIES),
                base_delay: Duration::from_millis(
                    env_parse("PATCHPUB_RETRY_BASE_DELAY_MS").unwrap_or(DEFAULT_RETRY_BASE_DELAY_MS),
                ),
            },
            output: OutputConfig {
                base_dir: env_string("PATCHPUB_OUTPUT_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.output.base_dir),
                patch_folder: env_string("PATCHPUB_PATCH_FOLDER")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.output.patch_folder),
                catalog_path: env_string("PATCHPUB_CATALOG_FILE")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.output.catalog_path),
                descriptor_path: env_string("PATCHPUB_DESCRIPTOR_FILE")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.output.descriptor_path),
            },
            descriptor: DescriptorSettings {
                config_type: env_string("PATCHPUB_DESCRIPTOR_CONFIG_TYPE")
                    .unwrap_or(descriptor_defaults.config_type),
                source: env_string("PATCHPUB_DESCRIPTOR_SOURCE").unwrap_or(descriptor_defaults.source),
                build_number: env_string("PATCHPUB_DESCRIPTOR_BUILD_NUMBER")
                    .unwrap_or(descriptor_defaults.build_number),
                list_build_number: env_string("PATCHPUB_DESCRIPTOR_LIST_BUILD_NUMBER")
                    .unwrap_or(descriptor_defaults.list_build_number),
                is_active: env_string("PATCHPUB_DESCRIPTOR_IS_ACTIVE")
                    .unwrap_or(descriptor_defaults.is_active),
                display_sequence: env_string("PATCHPUB_DESCRIPTOR_DISPLAY_SEQUENCE")
                    .unwrap_or(descriptor_defaults.display_sequence),
                language_code: env_string("PATCHPUB_DESCRIPTOR_LANGUAGE")
                    .unwrap_or(descriptor_defaults.language_code),
                context_code: env_string("PATCHPUB_DESCRIPTOR_CONTEXT")
                    .unwrap_or(descriptor_defaults.context_code),
            },
            upload: UploadConfig {
                enabled: env_flag("PATCHPUB_UPLOAD_ENABLED").unwrap_or(false),
                host: env_string("PATCHPUB_UPLOAD_HOST").unwrap_or(defaults.upload.host),
                port: env_parse("PATCHPUB_UPLOAD_PORT").unwrap_or(DEFAULT_UPLOAD_PORT),
                username: env_string("PATCHPUB_UPLOAD_USER").unwrap_or(defaults.upload.username),
                password: std::env::var("PATCHPUB_UPLOAD_PASSWORD").unwrap_or_default(),
                remote_root: env_string("PATCHPUB_UPLOAD_REMOTE_ROOT")
                    .unwrap_or(defaults.upload.remote_root),
            },
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        self.database.validate()?;

        if self.queue.batch_size == 0 {
            anyhow::bail!("Batch size must be greater than 0");
        }

        if self.retry.base_delay.is_zero() {
            tracing::warn!("Retry base delay is zero - retries will not back off");
        }

        if self.upload.enabled && self.upload.host.trim().is_empty() {
            anyhow::bail!("Upload is enabled but PATCHPUB_UPLOAD_HOST is empty");
        }

        Ok(())
    }

    pub fn runner_settings(&self) -> RunnerSettings {
        RunnerSettings {
            batch_size: self.queue.batch_size,
            one_batch_only: self.queue.one_batch_only,
            retry: self.retry,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DbConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                idle_timeout_secs: Some(DEFAULT_DATABASE_IDLE_TIMEOUT_SECS),
            },
            queue: QueueConfig {
                checkpoint_path: PathBuf::from(DEFAULT_QUEUE_FILE),
                ledger_path: PathBuf::from(DEFAULT_LEDGER_FILE),
                batch_size: DEFAULT_BATCH_SIZE,
                one_batch_only: DEFAULT_ONE_BATCH_ONLY,
            },
            retry: RetryPolicy {
                max_retries: DEFAULT_MAX_RETRIES,
                base_delay: Duration::from_millis(DEFAULT_RETRY_BASE_DELAY_MS),
            },
            output: OutputConfig {
                base_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
                patch_folder: PathBuf::from(DEFAULT_PATCH_FOLDER),
                catalog_path: PathBuf::from(DEFAULT_CATALOG_FILE),
                descriptor_path: PathBuf::from(DEFAULT_DESCRIPTOR_FILE),
            },
            descriptor: DescriptorSettings::default(),
            upload: UploadConfig {
                port: DEFAULT_UPLOAD_PORT,
                remote_root: DEFAULT_UPLOAD_REMOTE_ROOT.to_string(),
                ..UploadConfig::default()
            },
        }
    }
}
