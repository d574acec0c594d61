use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Sqlite, SqlitePool, Transaction};
use tokio::sync::{Mutex, MutexGuard};

use crate::config::GraftConfig;
use crate::error::GraftResult;
use crate::metrics::record_rollback;

/// Handle to the active database.
///
/// Every public operation locks the handle for its whole duration, so two
/// cascades never interleave their statements. Clones share the same lock
/// and connection.
#[derive(Clone)]
pub struct Graft {
    inner: Arc<Mutex<Handle>>,
}

pub(crate) struct Handle {
    pub pool: SqlitePool,
    pub config: GraftConfig,
    /// Foreign-key columns declared by `has_many`/`has_one` on tables that
    /// did not exist yet when the owning model was synced.
    pub pending_columns: BTreeMap<String, BTreeSet<&'static str>>,
}

impl std::fmt::Debug for Graft {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graft").finish_non_exhaustive()
    }
}

impl Graft {
    pub async fn connect(config: GraftConfig) -> GraftResult<Self> {
        let pool = build_pool(&config).await?;
        tracing::info!(url = %config.url, "graft connected");
        Ok(Self {
            inner: Arc::new(Mutex::new(Handle {
                pool,
                config,
                pending_columns: BTreeMap::new(),
            })),
        })
    }

    pub async fn open(url: &str) -> GraftResult<Self> {
        Self::connect(GraftConfig::new(url)).await
    }

    /// A private in-memory database, mostly for tests.
    pub async fn memory() -> GraftResult<Self> {
        Self::connect(GraftConfig::default()).await
    }

    /// Switches every clone of this handle to another database.
    ///
    /// Waits for the running operation to finish; the previous pool is
    /// closed afterwards.
    pub async fn use_database(&self, config: GraftConfig) -> GraftResult<()> {
        let pool = build_pool(&config).await?;
        let mut handle = self.inner.lock().await;
        let previous = std::mem::replace(&mut handle.pool, pool);
        tracing::info!(from = %handle.config.url, to = %config.url, "graft switched database");
        handle.config = config;
        handle.pending_columns.clear();
        previous.close().await;
        Ok(())
    }

    pub async fn config(&self) -> GraftConfig {
        self.inner.lock().await.config.clone()
    }

    pub async fn close(&self) {
        self.inner.lock().await.pool.close().await;
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, Handle> {
        self.inner.lock().await
    }
}

async fn build_pool(config: &GraftConfig) -> GraftResult<SqlitePool> {
    let options = config.connect_options()?;
    // One connection that never idles out: in-memory databases live as long
    // as their connection.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Commits on success, rolls back and re-raises otherwise.
pub(crate) async fn finish<T>(
    tx: Transaction<'static, Sqlite>,
    operation: &'static str,
    result: GraftResult<T>,
) -> GraftResult<T> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            tracing::warn!(operation, error = %err, "graft transaction rolled back");
            record_rollback(operation);
            if let Err(rollback_err) = tx.rollback().await {
                tracing::error!(operation, error = %rollback_err, "graft rollback failed");
            }
            Err(err)
        }
    }
}
