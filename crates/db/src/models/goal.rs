use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqlitePool};
use strum_macros::Display;
use ts_rs::TS;
use uuid::Uuid;

use super::task::Task;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
pub struct Goal {
    pub id: Uuid,
    pub user_id: String,
    pub name: String,
    pub kpi_name: Option<String>,
    pub kpi_target: Option<f64>,
    pub kpi_current: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Where a goal's progress figure comes from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ProgressSource {
    Kpi,
    Tasks,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
pub struct GoalProgress {
    pub goal_id: Uuid,
    /// Percentage in `[0, 100]`
    pub percent: f64,
    pub source: ProgressSource,
    pub completed_tasks: usize,
    pub total_tasks: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct CreateGoal {
    pub name: String,
    pub kpi_name: Option<String>,
    pub kpi_target: Option<f64>,
    pub kpi_current: Option<f64>,
}

impl CreateGoal {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kpi_name: None,
            kpi_target: None,
            kpi_current: None,
        }
    }

    pub fn with_kpi(mut self, kpi_name: impl Into<String>, target: f64, current: f64) -> Self {
        self.kpi_name = Some(kpi_name.into());
        self.kpi_target = Some(target);
        self.kpi_current = Some(current);
        self
    }
}

/// Partial update; `null` clears an optional KPI field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateGoal {
    pub name: Option<String>,
    #[serde(default, with = "serde_with::rust::double_option")]
    pub kpi_name: Option<Option<String>>,
    #[serde(default, with = "serde_with::rust::double_option")]
    pub kpi_target: Option<Option<f64>>,
    #[serde(default, with = "serde_with::rust::double_option")]
    pub kpi_current: Option<Option<f64>>,
}

impl UpdateGoal {
    pub fn apply_to(&self, goal: &mut Goal) {
        if let Some(name) = &self.name {
            goal.name = name.clone();
        }
        if let Some(kpi_name) = &self.kpi_name {
            goal.kpi_name = kpi_name.clone();
        }
        if let Some(target) = self.kpi_target {
            goal.kpi_target = target;
        }
        if let Some(current) = self.kpi_current {
            goal.kpi_current = current;
        }
    }
}

const GOAL_COLUMNS: &str =
    "id, user_id, name, kpi_name, kpi_target, kpi_current, created_at, updated_at";

impl Goal {
    /// Progress of this goal. A positive KPI target wins; otherwise the share
    /// of this goal's tasks that are completed. Tasks of other goals in
    /// `tasks` are ignored.
    pub fn progress(&self, tasks: &[Task]) -> GoalProgress {
        let own = tasks.iter().filter(|t| t.goal_id == self.id);
        let total_tasks = own.clone().count();
        let completed_tasks = own.filter(|t| t.completed).count();

        let (ratio, source) = match self.kpi_target {
            Some(target) if target > 0.0 => {
                (self.kpi_current.unwrap_or(0.0) / target, ProgressSource::Kpi)
            }
            _ if total_tasks == 0 => (0.0, ProgressSource::Tasks),
            _ => (completed_tasks as f64 / total_tasks as f64, ProgressSource::Tasks),
        };

        GoalProgress {
            goal_id: self.id,
            percent: (ratio * 100.0).clamp(0.0, 100.0),
            source,
            completed_tasks,
            total_tasks,
        }
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Goal>(&format!("SELECT {GOAL_COLUMNS} FROM goals WHERE id = $1"))
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_user(pool: &SqlitePool, user_id: &str) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Goal>(&format!(
            "SELECT {GOAL_COLUMNS} FROM goals WHERE user_id = $1 ORDER BY created_at ASC"
        ))
        .bind(user_id)
        .fetch_all(pool)
        .await
    }

    pub async fn create(
        pool: &SqlitePool,
        data: &CreateGoal,
        goal_id: Uuid,
        user_id: &str,
    ) -> Result<Self, sqlx::Error> {
        let now = Utc::now();
        sqlx::query_as::<_, Goal>(&format!(
            r#"INSERT INTO goals (id, user_id, name, kpi_name, kpi_target, kpi_current, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
               RETURNING {GOAL_COLUMNS}"#
        ))
        .bind(goal_id)
        .bind(user_id)
        .bind(data.name.trim())
        .bind(&data.kpi_name)
        .bind(data.kpi_target)
        .bind(data.kpi_current)
        .bind(now)
        .fetch_one(pool)
        .await
    }

    /// Persist every mutable field of `goal`.
    pub async fn save(pool: &SqlitePool, goal: &Goal) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Goal>(&format!(
            r#"UPDATE goals
               SET name = $2, kpi_name = $3, kpi_target = $4, kpi_current = $5, updated_at = $6
               WHERE id = $1
               RETURNING {GOAL_COLUMNS}"#
        ))
        .bind(goal.id)
        .bind(&goal.name)
        .bind(&goal.kpi_name)
        .bind(goal.kpi_target)
        .bind(goal.kpi_current)
        .bind(Utc::now())
        .fetch_one(pool)
        .await
    }

    pub async fn delete<'e, E>(executor: E, id: Uuid) -> Result<u64, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query("DELETE FROM goals WHERE id = $1")
            .bind(id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }

    /// Delete a goal and every task under it in one transaction. Returns the
    /// ids of the removed tasks, or `None` when the goal did not exist.
    pub async fn delete_with_tasks(
        pool: &SqlitePool,
        id: Uuid,
    ) -> Result<Option<Vec<Uuid>>, sqlx::Error> {
        let mut tx = pool.begin().await?;
        let task_ids = Task::find_ids_by_goal(&mut *tx, id).await?;
        Task::delete_by_goal(&mut *tx, id).await?;
        if Self::delete(&mut *tx, id).await? == 0 {
            tx.rollback().await?;
            return Ok(None);
        }
        tx.commit().await?;
        Ok(Some(task_ids))
    }
}
