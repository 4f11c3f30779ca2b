//! Pooled session lifecycle with a single pool rebuild on acquisition failure

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgPool};
use sqlx::{Connection, Postgres};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::fault::BackendFault;
use super::{create_pool_with, DbConfig, DbResult};
use crate::source::ConnectionSource;

/// A checked-out pool connection.
///
/// Clones share the connection; queries issued concurrently through clones are
/// serialized on it. The connection returns to the pool when the last clone is
/// dropped.
#[derive(Clone)]
pub struct PgSession {
    conn: Arc<Mutex<PoolConnection<Postgres>>>,
}

impl PgSession {
    pub(crate) fn new(conn: PoolConnection<Postgres>) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    pub(crate) async fn lock(&self) -> tokio::sync::MutexGuard<'_, PoolConnection<Postgres>> {
        self.conn.lock().await
    }
}

/// Owns the connection pool for the lifetime of a run.
pub struct ConnectionSupervisor {
    config: DbConfig,
    connect: PgConnectOptions,
    pool: RwLock<PgPool>,
}

impl ConnectionSupervisor {
    /// Build the pool. Failure here is a startup error.
    pub async fn init(config: DbConfig) -> DbResult<Self> {
        let connect = config.connect_options()?;
        Self::init_with(config, connect).await
    }

    /// Build the pool against explicit connection options; rebuilds reuse them.
    pub async fn init_with(config: DbConfig, connect: PgConnectOptions) -> DbResult<Self> {
        let pool = create_pool_with(&config, connect.clone()).await?;
        Ok(Self {
            config,
            connect,
            pool: RwLock::new(pool),
        })
    }

    /// Close the pool, waiting for checked-out connections to come back.
    pub async fn shutdown(&self) {
        let pool = self.pool.read().await.clone();
        pool.close().await;
        info!("Database connection pool closed");
    }

    async fn checkout(&self) -> Result<PgSession, BackendFault> {
        let pool = self.pool.read().await.clone();
        let mut conn = pool.acquire().await?;
        conn.ping().await?;
        Ok(PgSession::new(conn))
    }

    async fn rebuild(&self) -> Result<(), BackendFault> {
        let fresh = create_pool_with(&self.config, self.connect.clone())
            .await
            .map_err(|e| BackendFault::connection_lost(e.to_string()))?;
        let stale = {
            let mut guard = self.pool.write().await;
            std::mem::replace(&mut *guard, fresh)
        };
        stale.close().await;
        info!("Database connection pool rebuilt");
        Ok(())
    }
}

#[async_trait]
impl ConnectionSource for ConnectionSupervisor {
    type Session = PgSession;

    async fn acquire(&self) -> Result<PgSession, BackendFault> {
        match self.checkout().await {
            Ok(session) => Ok(session),
            Err(first) => {
                warn!(error = %first, "Session acquisition failed, rebuilding pool");
                self.rebuild().await?;
                self.checkout().await
            },
        }
    }

    async fn release(&self, session: PgSession) {
        debug!("Releasing database session");
        drop(session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{classify, FaultClass};
    use sqlx::postgres::PgPoolOptions;

    fn test_config() -> DbConfig {
        DbConfig {
            max_connections: 2,
            min_connections: 0,
            connect_timeout_secs: 5,
            ..DbConfig::default()
        }
    }

    async fn assert_live(session: &PgSession) {
        let mut conn = session.lock().await;
        conn.ping().await.unwrap();
    }

    #[sqlx::test]
    async fn test_acquire_returns_live_session(_pool_opts: PgPoolOptions, connect: PgConnectOptions) {
        let supervisor = ConnectionSupervisor::init_with(test_config(), connect).await.unwrap();

        let session = supervisor.acquire().await.unwrap();
        assert_live(&session).await;
        supervisor.release(session).await;

        supervisor.shutdown().await;
    }

    #[sqlx::test]
    async fn test_acquire_rebuilds_closed_pool(_pool_opts: PgPoolOptions, connect: PgConnectOptions) {
        let supervisor = ConnectionSupervisor::init_with(test_config(), connect).await.unwrap();
        supervisor.shutdown().await;
        assert!(supervisor.pool.read().await.is_closed());

        let session = supervisor.acquire().await.unwrap();
        assert_live(&session).await;
        assert!(!supervisor.pool.read().await.is_closed());
        supervisor.release(session).await;

        supervisor.shutdown().await;
    }

    #[sqlx::test]
    async fn test_failed_rebuild_is_connection_lost(pool_opts: PgPoolOptions, connect: PgConnectOptions) {
        let admin = pool_opts.connect_with(connect.clone()).await.unwrap();
        let mut admin_conn = admin.acquire().await.unwrap();
        let (database,): (String,) = sqlx::query_as("SELECT current_database()")
            .fetch_one(&mut *admin_conn)
            .await
            .unwrap();

        let supervisor = ConnectionSupervisor::init_with(test_config(), connect).await.unwrap();
        supervisor.shutdown().await;

        sqlx::query(&format!("ALTER DATABASE \"{database}\" WITH ALLOW_CONNECTIONS false"))
            .execute(&mut *admin_conn)
            .await
            .unwrap();

        let result = supervisor.acquire().await;

        sqlx::query(&format!("ALTER DATABASE \"{database}\" WITH ALLOW_CONNECTIONS true"))
            .execute(&mut *admin_conn)
            .await
            .unwrap();
        drop(admin_conn);
        admin.close().await;

        let fault = result.err().expect("acquire should fail when the rebuild cannot connect");
        assert!(fault.connection_lost);
        assert_eq!(classify(&fault), FaultClass::Recoverable);
    }
}
