use std::str::FromStr;

use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use tracing::info;

pub mod changes;
pub mod models;

use changes::{ChangeFeed, RecordChange};

/// Handle to the GoalFlow store: the connection pool plus the change feed that
/// real-time listeners subscribe to.
#[derive(Clone)]
pub struct DBService {
    pub pool: SqlitePool,
    changes: ChangeFeed,
}

impl DBService {
    /// Open (creating if needed) the database at `database_url` and run
    /// pending migrations.
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    /// Private in-memory database. A single connection keeps every query on
    /// the same database.
    pub async fn new_in_memory() -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self, sqlx::Error> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| sqlx::Error::Migrate(Box::new(e)))?;
        info!("Database ready");
        Ok(Self {
            pool,
            changes: ChangeFeed::default(),
        })
    }

    pub fn changes(&self) -> &ChangeFeed {
        &self.changes
    }

    /// Announce a committed write to every listener.
    pub fn publish(&self, change: RecordChange) {
        self.changes.publish(change);
    }
}
