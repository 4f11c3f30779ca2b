//! Metadata backend access: pool construction, supervision and catalog queries

pub mod fault;
pub mod queries;
pub mod supervisor;

use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub use fault::{classify, BackendFault, FaultClass};
pub use supervisor::{ConnectionSupervisor, PgSession};

/// Pool setup errors
#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database pool setup failed: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Database configuration error: {0}. Check DATABASE_URL and pool settings.")]
    Config(String),
}

impl DbError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: Option<u64>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/patches".to_string(),
            max_connections: 5,
            min_connections: 1,
            connect_timeout_secs: 60,
            idle_timeout_secs: Some(600),
        }
    }
}

impl DbConfig {
    pub fn validate(&self) -> DbResult<()> {
        if self.url.trim().is_empty() {
            return Err(DbError::config("database URL cannot be empty"));
        }
        if self.max_connections == 0 {
            return Err(DbError::config("max_connections must be greater than 0"));
        }
        if self.min_connections > self.max_connections {
            return Err(DbError::config(format!(
                "min_connections ({}) cannot exceed max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }
        Ok(())
    }

    /// Parse the URL into connection options.
    pub fn connect_options(&self) -> DbResult<PgConnectOptions> {
        PgConnectOptions::from_str(&self.url)
            .map_err(|e| DbError::config(format!("invalid database URL: {e}")))
    }
}

pub async fn create_pool(config: &DbConfig) -> DbResult<PgPool> {
    let connect = config.connect_options()?;
    create_pool_with(config, connect).await
}

/// Build a pool with the sizing from `config` against explicit connection
/// options. `config.url` is not consulted.
pub async fn create_pool_with(config: &DbConfig, connect: PgConnectOptions) -> DbResult<PgPool> {
    config.validate()?;

    let mut options = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs));

    if let Some(idle_timeout) = config.idle_timeout_secs {
        options = options.idle_timeout(Duration::from_secs(idle_timeout));
    }

    let pool = options.connect_with(connect).await?;

    tracing::info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Database connection pool created"
    );

    Ok(pool)
}
