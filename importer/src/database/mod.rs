mod import_state;
mod investments;
mod prices;
mod products;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use std::future::Future;
use std::time::Duration;

pub use import_state::ImportStateUpdate;
pub use investments::InvestmentBatch;
pub use prices::PriceBatch;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Per transaction statement budget.
const STATEMENT_TIMEOUT: &str = "SET LOCAL statement_timeout = 2000;";

const CONNECTION_RETRIES: usize = 10;
const CONNECTION_RETRY_BASE: Duration = Duration::from_millis(500);
const CONNECTION_RETRY_CAP: Duration = Duration::from_secs(1);

// The pool uses an Arc internally.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(uri: &str) -> Result<Self> {
        Ok(Self {
            pool: PgPoolOptions::new()
                .acquire_timeout(CONNECT_TIMEOUT)
                .connect_lazy(uri)?,
        })
    }

    pub(crate) async fn begin_with_timeout(
        &self,
    ) -> Result<Transaction<'static, Postgres>, sqlx::Error> {
        let mut transaction = self.pool.begin().await?;
        sqlx::query(STATEMENT_TIMEOUT)
            .execute(&mut *transaction)
            .await?;
        Ok(transaction)
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Delete all data in the database. Only used by tests.
    pub async fn clear(&self) -> Result<()> {
        use sqlx::Executor;
        for table in [
            "import_state",
            "price_ts",
            "investment_ts",
            "investor",
            "debug_data_ts",
        ] {
            self.pool
                .execute(sqlx::query(&format!("TRUNCATE {};", table)))
                .await?;
        }
        Ok(())
    }
}

fn is_connection_timeout(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed
    )
}

/// Runs a database operation, retrying connection level timeouts with
/// jittered backoff. Query errors are not retried.
pub(crate) async fn with_connection_retries<T, F, Fut>(operation: F) -> Result<T, sqlx::Error>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, sqlx::Error>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) if attempt + 1 < CONNECTION_RETRIES && is_connection_timeout(&error) => {
                let backoff = CONNECTION_RETRY_BASE
                    .mul_f64(1.0 + rand::random::<f64>())
                    .min(CONNECTION_RETRY_CAP);
                tracing::warn!(%error, attempt, ?backoff, "database connection timeout, retrying");
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}
