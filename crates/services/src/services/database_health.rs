//! Startup and `/api/health` checks for the goal/task schema.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{info, warn};
use ts_rs::TS;

pub const REQUIRED_TABLES: &[&str] = &["goals", "tasks"];

#[derive(Debug, Error)]
pub enum DatabaseHealthError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("schema incomplete, missing tables: {0:?}")]
    MissingTables(Vec<String>),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseReport {
    pub migrations_applied: i64,
    pub latest_migration: Option<String>,
    pub missing_tables: Vec<String>,
    pub goals: i64,
    pub tasks: i64,
}

impl DatabaseReport {
    pub fn is_ok(&self) -> bool {
        self.migrations_applied > 0 && self.missing_tables.is_empty()
    }
}

pub struct DatabaseHealth {
    pool: SqlitePool,
}

impl DatabaseHealth {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Cheap liveness check.
    pub async fn ping(&self) -> bool {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .is_ok()
    }

    async fn table_exists(&self, table: &str) -> Result<bool, sqlx::Error> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(table)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    async fn count(&self, table: &str) -> Result<i64, sqlx::Error> {
        // `table` only ever comes from REQUIRED_TABLES.
        sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&self.pool)
            .await
    }

    pub async fn report(&self) -> Result<DatabaseReport, DatabaseHealthError> {
        let mut missing_tables = Vec::new();
        for table in REQUIRED_TABLES {
            if !self.table_exists(table).await? {
                missing_tables.push(table.to_string());
            }
        }

        let has_migrations = self.table_exists("_sqlx_migrations").await?;
        let (migrations_applied, latest_migration) = if has_migrations {
            let applied = sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM _sqlx_migrations WHERE success = 1",
            )
            .fetch_one(&self.pool)
            .await?;
            let latest = sqlx::query_scalar::<_, String>(
                "SELECT description FROM _sqlx_migrations WHERE success = 1 ORDER BY version DESC LIMIT 1",
            )
            .fetch_optional(&self.pool)
            .await?;
            (applied, latest)
        } else {
            (0, None)
        };

        let (goals, tasks) = if missing_tables.is_empty() {
            (self.count("goals").await?, self.count("tasks").await?)
        } else {
            (0, 0)
        };

        Ok(DatabaseReport {
            migrations_applied,
            latest_migration,
            missing_tables,
            goals,
            tasks,
        })
    }

    /// Fail unless every required table exists.
    pub async fn validate(&self) -> Result<DatabaseReport, DatabaseHealthError> {
        let report = self.report().await?;
        if !report.missing_tables.is_empty() {
            warn!(missing = ?report.missing_tables, "database schema incomplete");
            return Err(DatabaseHealthError::MissingTables(report.missing_tables));
        }
        info!(
            migrations_applied = report.migrations_applied,
            latest = report.latest_migration.as_deref().unwrap_or("-"),
            goals = report.goals,
            tasks = report.tasks,
            "database validated"
        );
        Ok(report)
    }
}
