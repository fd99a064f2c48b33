use std::cmp::Reverse;

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqliteConnection, SqlitePool, Type};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

#[derive(
    Debug,
    Clone,
    Copy,
    Type,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    TS,
    EnumString,
    Display,
    Default,
)]
#[sqlx(type_name = "task_priority", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
}

/// How often a task repeats once completed
#[derive(
    Debug,
    Clone,
    Copy,
    Type,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    TS,
    EnumString,
    Display,
    Default,
)]
#[sqlx(type_name = "task_recurrence", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Recurrence {
    #[default]
    None,
    Daily,
    Weekly,
    Monthly,
}

impl Recurrence {
    /// Deadline of the occurrence after `deadline`, or `None` for one-off tasks.
    /// Monthly steps clamp to the last day of a shorter month.
    pub fn next_deadline(self, deadline: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Recurrence::None => None,
            Recurrence::Daily => Some(deadline + Duration::days(1)),
            Recurrence::Weekly => Some(deadline + Duration::weeks(1)),
            Recurrence::Monthly => deadline.checked_add_months(Months::new(1)),
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: Uuid,
    pub goal_id: Uuid, // Foreign key to Goal
    pub user_id: String,
    pub title: String,
    pub completed: bool,
    pub priority: TaskPriority,
    pub deadline: Option<DateTime<Utc>>,
    pub recurrence: Recurrence,
    pub duration_minutes: Option<i32>,
    /// Set once completing this recurring task has scheduled its successor.
    pub next_occurrence_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct CreateTask {
    pub goal_id: Uuid,
    pub title: String,
    pub priority: Option<TaskPriority>,
    pub deadline: Option<DateTime<Utc>>,
    pub recurrence: Option<Recurrence>,
    pub duration_minutes: Option<i32>,
}

impl CreateTask {
    pub fn from_title(goal_id: Uuid, title: impl Into<String>) -> Self {
        Self {
            goal_id,
            title: title.into(),
            priority: None,
            deadline: None,
            recurrence: None,
            duration_minutes: None,
        }
    }

    /// The next occurrence of a completed recurring task
    pub fn next_occurrence_of(task: &Task) -> Option<Self> {
        let deadline = task.recurrence.next_deadline(task.deadline?)?;
        Some(Self {
            goal_id: task.goal_id,
            title: task.title.clone(),
            priority: Some(task.priority),
            deadline: Some(deadline),
            recurrence: Some(task.recurrence),
            duration_minutes: task.duration_minutes,
        })
    }
}

/// Partial update; absent fields are left untouched. `deadline` and
/// `durationMinutes` accept an explicit `null` to clear the value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTask {
    pub title: Option<String>,
    pub goal_id: Option<Uuid>,
    pub completed: Option<bool>,
    pub priority: Option<TaskPriority>,
    #[serde(default, with = "serde_with::rust::double_option")]
    pub deadline: Option<Option<DateTime<Utc>>>,
    pub recurrence: Option<Recurrence>,
    #[serde(default, with = "serde_with::rust::double_option")]
    pub duration_minutes: Option<Option<i32>>,
}

impl UpdateTask {
    pub fn apply_to(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title = title.clone();
        }
        if let Some(goal_id) = self.goal_id {
            task.goal_id = goal_id;
        }
        if let Some(completed) = self.completed {
            task.completed = completed;
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(deadline) = self.deadline {
            task.deadline = deadline;
        }
        if let Some(recurrence) = self.recurrence {
            task.recurrence = recurrence;
        }
        if let Some(duration) = self.duration_minutes {
            task.duration_minutes = duration;
        }
    }
}

const TASK_COLUMNS: &str = "id, goal_id, user_id, title, completed, priority, deadline, recurrence, duration_minutes, next_occurrence_id, created_at, updated_at";

impl Task {
    /// Whole calendar days from `now` until the deadline; negative when overdue.
    pub fn days_to_deadline(&self, now: DateTime<Utc>) -> Option<i64> {
        self.deadline
            .map(|deadline| (deadline.date_naive() - now.date_naive()).num_days())
    }

    pub async fn find_by_id<'e, E>(executor: E, id: Uuid) -> Result<Option<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Task>(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"))
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    pub async fn find_by_user(pool: &SqlitePool, user_id: &str) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Task>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE user_id = $1 ORDER BY created_at ASC"
        ))
        .bind(user_id)
        .fetch_all(pool)
        .await
    }

    pub async fn find_by_goal(pool: &SqlitePool, goal_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Task>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE goal_id = $1 ORDER BY created_at ASC"
        ))
        .bind(goal_id)
        .fetch_all(pool)
        .await
    }

    pub async fn create<'e, E>(
        executor: E,
        data: &CreateTask,
        task_id: Uuid,
        user_id: &str,
    ) -> Result<Self, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let now = Utc::now();
        sqlx::query_as::<_, Task>(&format!(
            r#"INSERT INTO tasks (id, goal_id, user_id, title, completed, priority, deadline, recurrence, duration_minutes, created_at, updated_at)
               VALUES ($1, $2, $3, $4, 0, $5, $6, $7, $8, $9, $9)
               RETURNING {TASK_COLUMNS}"#
        ))
        .bind(task_id)
        .bind(data.goal_id)
        .bind(user_id)
        .bind(data.title.trim())
        .bind(data.priority.unwrap_or_default())
        .bind(data.deadline)
        .bind(data.recurrence.unwrap_or_default())
        .bind(data.duration_minutes)
        .bind(now)
        .fetch_one(executor)
        .await
    }

    /// Persist every mutable field of `task`.
    pub async fn save<'e, E>(executor: E, task: &Task) -> Result<Self, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Task>(&format!(
            r#"UPDATE tasks
               SET goal_id = $2, title = $3, completed = $4, priority = $5, deadline = $6,
                   recurrence = $7, duration_minutes = $8, updated_at = $9
               WHERE id = $1
               RETURNING {TASK_COLUMNS}"#
        ))
        .bind(task.id)
        .bind(task.goal_id)
        .bind(&task.title)
        .bind(task.completed)
        .bind(task.priority)
        .bind(task.deadline)
        .bind(task.recurrence)
        .bind(task.duration_minutes)
        .bind(Utc::now())
        .fetch_one(executor)
        .await
    }

    /// Save `task` and schedule its next occurrence if it is now completed.
    /// Returns the saved task and the occurrence created, if any.
    pub async fn save_and_schedule(
        pool: &SqlitePool,
        task: &Task,
    ) -> Result<(Self, Option<Self>), sqlx::Error> {
        let mut tx = pool.begin().await?;
        let saved = Self::save(&mut *tx, task).await?;
        let scheduled = Self::schedule_next_occurrence(&mut tx, saved).await?;
        tx.commit().await?;
        Ok(scheduled)
    }

    /// Flip the completion flag. Completing a recurring task schedules its
    /// next occurrence unless one was already scheduled from it.
    pub async fn toggle_completed(
        pool: &SqlitePool,
        id: Uuid,
    ) -> Result<Option<(Self, Option<Self>)>, sqlx::Error> {
        let mut tx = pool.begin().await?;
        let Some(current) = Self::find_by_id(&mut *tx, id).await? else {
            tx.rollback().await?;
            return Ok(None);
        };
        let Some(task) = Self::set_completed(&mut *tx, id, !current.completed).await? else {
            tx.rollback().await?;
            return Ok(None);
        };
        let scheduled = Self::schedule_next_occurrence(&mut tx, task).await?;
        tx.commit().await?;
        Ok(Some(scheduled))
    }

    async fn schedule_next_occurrence(
        conn: &mut SqliteConnection,
        task: Task,
    ) -> Result<(Self, Option<Self>), sqlx::Error> {
        if !task.completed || task.next_occurrence_id.is_some() {
            return Ok((task, None));
        }
        let Some(next) = CreateTask::next_occurrence_of(&task) else {
            return Ok((task, None));
        };
        let created = Self::create(&mut *conn, &next, Uuid::new_v4(), &task.user_id).await?;
        let task = sqlx::query_as::<_, Task>(&format!(
            "UPDATE tasks SET next_occurrence_id = $2 WHERE id = $1 RETURNING {TASK_COLUMNS}"
        ))
        .bind(task.id)
        .bind(created.id)
        .fetch_one(&mut *conn)
        .await?;
        Ok((task, Some(created)))
    }

    pub async fn set_completed<'e, E>(
        executor: E,
        id: Uuid,
        completed: bool,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Task>(&format!(
            "UPDATE tasks SET completed = $2, updated_at = $3 WHERE id = $1 RETURNING {TASK_COLUMNS}"
        ))
        .bind(id)
        .bind(completed)
        .bind(Utc::now())
        .fetch_optional(executor)
        .await
    }

    pub async fn delete<'e, E>(executor: E, id: Uuid) -> Result<u64, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }

    /// Ids of the tasks under a goal, used to announce cascaded deletes.
    pub async fn find_ids_by_goal<'e, E>(
        executor: E,
        goal_id: Uuid,
    ) -> Result<Vec<Uuid>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let rows: Vec<(Uuid,)> = sqlx::query_as("SELECT id FROM tasks WHERE goal_id = $1")
            .bind(goal_id)
            .fetch_all(executor)
            .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    pub async fn delete_by_goal<'e, E>(executor: E, goal_id: Uuid) -> Result<u64, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query("DELETE FROM tasks WHERE goal_id = $1")
            .bind(goal_id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }
}

/// Display order: open tasks first, then nearest deadline (tasks without a
/// deadline last), then highest priority.
pub fn sort_for_display(tasks: &mut [Task], now: DateTime<Utc>) {
    tasks.sort_by_key(|task| {
        (
            task.completed,
            task.days_to_deadline(now).unwrap_or(i64::MAX),
            Reverse(task.priority),
        )
    });
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::{
        DBService,
        models::goal::{CreateGoal, Goal},
    };

    fn task(
        title: &str,
        completed: bool,
        priority: TaskPriority,
        deadline: Option<DateTime<Utc>>,
    ) -> Task {
        let now = Utc::now();
        Task {
            id: Uuid::new_v4(),
            goal_id: Uuid::nil(),
            user_id: "user-1".to_string(),
            title: title.to_string(),
            completed,
            priority,
            deadline,
            recurrence: Recurrence::None,
            duration_minutes: None,
            next_occurrence_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn sorts_open_first_then_deadline_then_priority() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap();
        let in_two_days = Some(now + Duration::days(2));
        let tomorrow = Some(now + Duration::days(1));

        let mut tasks = vec![
            task("done-urgent", true, TaskPriority::High, tomorrow),
            task("no-deadline-high", false, TaskPriority::High, None),
            task("later-low", false, TaskPriority::Low, in_two_days),
            task("later-high", false, TaskPriority::High, in_two_days),
            task("tomorrow-low", false, TaskPriority::Low, tomorrow),
        ];
        sort_for_display(&mut tasks, now);

        let order: Vec<_> = tasks.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(
            order,
            vec!["tomorrow-low", "later-high", "later-low", "no-deadline-high", "done-urgent"]
        );
    }

    #[test]
    fn overdue_tasks_come_before_upcoming() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap();
        let mut tasks = vec![
            task("today", false, TaskPriority::Medium, Some(now)),
            task("overdue", false, TaskPriority::Low, Some(now - Duration::days(3))),
        ];
        sort_for_display(&mut tasks, now);
        assert_eq!(tasks[0].title, "overdue");
        assert_eq!(tasks[0].days_to_deadline(now), Some(-3));
    }

    #[test]
    fn monthly_recurrence_clamps_to_month_end() {
        let jan_31 = Utc.with_ymd_and_hms(2025, 1, 31, 12, 0, 0).unwrap();
        let next = Recurrence::Monthly.next_deadline(jan_31).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 2, 28, 12, 0, 0).unwrap());
        assert_eq!(
            Recurrence::Weekly.next_deadline(jan_31),
            Some(jan_31 + Duration::days(7))
        );
        assert_eq!(Recurrence::None.next_deadline(jan_31), None);
    }

    #[test]
    fn next_occurrence_requires_deadline_and_recurrence() {
        let now = Utc::now();
        let mut recurring = task("water plants", true, TaskPriority::Low, Some(now));
        recurring.recurrence = Recurrence::Daily;
        let next = CreateTask::next_occurrence_of(&recurring).unwrap();
        assert_eq!(next.deadline, Some(now + Duration::days(1)));
        assert_eq!(next.recurrence, Some(Recurrence::Daily));

        recurring.deadline = None;
        assert!(CreateTask::next_occurrence_of(&recurring).is_none());
    }

    #[test]
    fn update_distinguishes_null_from_absent() {
        let update: UpdateTask = serde_json::from_str(r#"{"deadline": null}"#).unwrap();
        assert_eq!(update.deadline, Some(None));
        assert_eq!(update.duration_minutes, None);

        let mut t = task("x", false, TaskPriority::Low, Some(Utc::now()));
        t.duration_minutes = Some(25);
        update.apply_to(&mut t);
        assert!(t.deadline.is_none());
        assert_eq!(t.duration_minutes, Some(25));
    }

    #[tokio::test]
    async fn create_toggle_and_delete_roundtrip_through_sqlite() {
        let db = DBService::new_in_memory().await.unwrap();
        let marathon = CreateGoal::named("Run a marathon");
        let goal = Goal::create(&db.pool, &marathon, Uuid::new_v4(), "user-1")
            .await
            .unwrap();

        let mut data = CreateTask::from_title(goal.id, "  Buy shoes ");
        data.priority = Some(TaskPriority::High);
        data.duration_minutes = Some(30);
        let created = Task::create(&db.pool, &data, Uuid::new_v4(), "user-1").await.unwrap();
        assert_eq!(created.title, "Buy shoes");
        assert!(!created.completed);
        assert_eq!(created.recurrence, Recurrence::None);

        let toggled = Task::set_completed(&db.pool, created.id, true).await.unwrap().unwrap();
        assert!(toggled.completed);

        assert_eq!(Task::find_by_user(&db.pool, "user-1").await.unwrap().len(), 1);
        assert!(Task::find_by_user(&db.pool, "user-2").await.unwrap().is_empty());

        assert_eq!(Task::delete(&db.pool, created.id).await.unwrap(), 1);
        assert!(Task::find_by_id(&db.pool, created.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn recompleting_a_recurring_task_schedules_one_occurrence() {
        let db = DBService::new_in_memory().await.unwrap();
        let goal = Goal::create(&db.pool, &CreateGoal::named("Fitness"), Uuid::new_v4(), "user-1")
            .await
            .unwrap();
        let deadline = Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap();
        let mut data = CreateTask::from_title(goal.id, "long run");
        data.deadline = Some(deadline);
        data.recurrence = Some(Recurrence::Weekly);
        let original = Task::create(&db.pool, &data, Uuid::new_v4(), "user-1").await.unwrap();

        let (done, next) = Task::toggle_completed(&db.pool, original.id).await.unwrap().unwrap();
        let next = next.unwrap();
        assert_eq!(done.next_occurrence_id, Some(next.id));
        assert_eq!(next.deadline, Some(deadline + Duration::weeks(1)));

        let (undone, none) = Task::toggle_completed(&db.pool, original.id).await.unwrap().unwrap();
        assert!(!undone.completed);
        assert!(none.is_none());
        let (redone, none) = Task::toggle_completed(&db.pool, original.id).await.unwrap().unwrap();
        assert!(redone.completed);
        assert!(none.is_none());

        let tasks = Task::find_by_user(&db.pool, "user-1").await.unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks.iter().filter(|t| t.id != original.id).count(), 1);
    }

    #[tokio::test]
    async fn deleting_the_occurrence_allows_scheduling_again() {
        let db = DBService::new_in_memory().await.unwrap();
        let goal = Goal::create(&db.pool, &CreateGoal::named("Home"), Uuid::new_v4(), "user-1")
            .await
            .unwrap();
        let mut data = CreateTask::from_title(goal.id, "water plants");
        data.deadline = Some(Utc::now());
        data.recurrence = Some(Recurrence::Daily);
        let original = Task::create(&db.pool, &data, Uuid::new_v4(), "user-1").await.unwrap();

        let (_, next) = Task::toggle_completed(&db.pool, original.id).await.unwrap().unwrap();
        Task::delete(&db.pool, next.unwrap().id).await.unwrap();
        let reloaded = Task::find_by_id(&db.pool, original.id).await.unwrap().unwrap();
        assert_eq!(reloaded.next_occurrence_id, None);

        Task::toggle_completed(&db.pool, original.id).await.unwrap();
        let (_, next) = Task::toggle_completed(&db.pool, original.id).await.unwrap().unwrap();
        assert!(next.is_some());
    }

    #[tokio::test]
    async fn toggling_a_missing_task_is_none() {
        let db = DBService::new_in_memory().await.unwrap();
        assert!(Task::toggle_completed(&db.pool, Uuid::new_v4()).await.unwrap().is_none());
    }
}
