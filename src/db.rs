use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{error, info, warn};

const CONNECT_ATTEMPTS: u32 = 5;
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(5);
const WATCH_INTERVAL: Duration = Duration::from_secs(5);

/// Owned database handle: connection pool plus an availability flag the
/// background watcher keeps current. Requests consult the flag so that during
/// an outage they fail fast instead of queueing behind a dead connection.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
    available: Arc<AtomicBool>,
}

impl Database {
    /// Connect with a bounded number of fixed-delay retries before giving up.
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let mut attempt = 1u32;
        let pool = loop {
            let result = PgPoolOptions::new()
                .max_connections(10)
                .acquire_timeout(Duration::from_secs(5))
                .connect(url)
                .await;
            match result {
                Ok(pool) => break pool,
                Err(e) if attempt < CONNECT_ATTEMPTS => {
                    warn!(error = %e, attempt, max = CONNECT_ATTEMPTS, "database connect failed, retrying");
                    tokio::time::sleep(CONNECT_RETRY_DELAY).await;
                    attempt += 1;
                }
                Err(e) => return Err(e).context("connect to database"),
            }
        };
        info!("database connected");
        Ok(Self {
            pool,
            available: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Lazily connecting handle for tests; never touches the network.
    pub fn connect_lazy(url: &str) -> Self {
        let pool = PgPoolOptions::new()
            .connect_lazy(url)
            .expect("lazy pool should construct");
        Self {
            pool,
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Background watcher: pings on a fixed interval and flips the
    /// availability flag. Reconnection itself is handled by the pool; the flag
    /// only decides whether requests are admitted.
    pub fn spawn_watcher(&self) {
        let pool = self.pool.clone();
        let available = self.available.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(WATCH_INTERVAL).await;
                let ok = sqlx::query("SELECT 1").execute(&pool).await.is_ok();
                let was = available.swap(ok, Ordering::SeqCst);
                if was && !ok {
                    error!("database connection lost, watching for recovery");
                } else if !was && ok {
                    info!("database connection restored");
                }
            }
        });
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
