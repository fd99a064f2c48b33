//! Goal and task writes: ownership checks, basic schema validation, then the
//! write itself and a change notification for listeners.

use chrono::{DateTime, Utc};
use db::{
    DBService,
    changes::{ChangeKind, RecordChange, Table},
    models::{
        goal::{CreateGoal, Goal, GoalProgress, UpdateGoal},
        task::{CreateTask, Task, UpdateTask, sort_for_display},
    },
};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use ts_rs::TS;
use uuid::Uuid;

use super::{state::GoalAction, sync::SyncRegistry};

#[derive(Debug, Error)]
pub enum GoalServiceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("goal not found")]
    GoalNotFound,
    #[error("task not found")]
    TaskNotFound,
}

/// Result of toggling a task; completing a recurring task schedules the next one.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct TaskToggle {
    pub task: Task,
    pub next_occurrence: Option<Task>,
}

#[derive(Clone)]
pub struct GoalService {
    db: DBService,
    sync: Option<Arc<SyncRegistry>>,
}

impl GoalService {
    pub fn new(db: DBService) -> Self {
        Self { db, sync: None }
    }

    /// Apply successful writes to the user's synchronized store right away,
    /// ahead of the listener snapshot.
    pub fn with_sync(mut self, sync: Arc<SyncRegistry>) -> Self {
        self.sync = Some(sync);
        self
    }

    pub async fn list_goals(&self, user_id: &str) -> Result<Vec<Goal>, GoalServiceError> {
        Ok(Goal::find_by_user(&self.db.pool, user_id).await?)
    }

    pub async fn get_goal(&self, user_id: &str, id: Uuid) -> Result<Goal, GoalServiceError> {
        Goal::find_by_id(&self.db.pool, id)
            .await?
            .filter(|g| g.user_id == user_id)
            .ok_or(GoalServiceError::GoalNotFound)
    }

    pub async fn create_goal(
        &self,
        user_id: &str,
        data: CreateGoal,
    ) -> Result<Goal, GoalServiceError> {
        validate_goal(&data.name, data.kpi_target, data.kpi_current)?;
        let goal = Goal::create(&self.db.pool, &data, Uuid::new_v4(), user_id).await?;
        info!(user_id = %user_id, goal_id = %goal.id, "goal created");
        self.notify(Table::Goals, ChangeKind::Insert, user_id, goal.id);
        self.dispatch(user_id, GoalAction::AddGoal(goal.clone())).await;
        Ok(goal)
    }

    pub async fn update_goal(
        &self,
        user_id: &str,
        id: Uuid,
        update: UpdateGoal,
    ) -> Result<Goal, GoalServiceError> {
        let mut goal = self.get_goal(user_id, id).await?;
        update.apply_to(&mut goal);
        validate_goal(&goal.name, goal.kpi_target, goal.kpi_current)?;
        goal.name = goal.name.trim().to_string();
        let goal = Goal::save(&self.db.pool, &goal).await?;
        self.notify(Table::Goals, ChangeKind::Update, user_id, goal.id);
        self.dispatch(user_id, GoalAction::EditGoal(goal.clone())).await;
        Ok(goal)
    }

    /// Deletes the goal and its tasks; returns how many tasks went with it.
    pub async fn delete_goal(&self, user_id: &str, id: Uuid) -> Result<usize, GoalServiceError> {
        self.get_goal(user_id, id).await?;
        let task_ids = Goal::delete_with_tasks(&self.db.pool, id)
            .await?
            .ok_or(GoalServiceError::GoalNotFound)?;

        info!(user_id = %user_id, goal_id = %id, tasks_removed = task_ids.len(), "goal deleted");
        self.notify(Table::Goals, ChangeKind::Delete, user_id, id);
        for task_id in &task_ids {
            self.notify(Table::Tasks, ChangeKind::Delete, user_id, *task_id);
        }
        self.dispatch(user_id, GoalAction::DeleteGoal(id)).await;
        Ok(task_ids.len())
    }

    pub async fn goal_progress(
        &self,
        user_id: &str,
        id: Uuid,
    ) -> Result<GoalProgress, GoalServiceError> {
        let goal = self.get_goal(user_id, id).await?;
        let tasks = Task::find_by_goal(&self.db.pool, id).await?;
        Ok(goal.progress(&tasks))
    }

    pub async fn list_tasks(&self, user_id: &str) -> Result<Vec<Task>, GoalServiceError> {
        Ok(Task::find_by_user(&self.db.pool, user_id).await?)
    }

    pub async fn sorted_tasks(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Task>, GoalServiceError> {
        let mut tasks = self.list_tasks(user_id).await?;
        sort_for_display(&mut tasks, now);
        Ok(tasks)
    }

    async fn get_task(&self, user_id: &str, id: Uuid) -> Result<Task, GoalServiceError> {
        Task::find_by_id(&self.db.pool, id)
            .await?
            .filter(|t| t.user_id == user_id)
            .ok_or(GoalServiceError::TaskNotFound)
    }

    pub async fn create_task(
        &self,
        user_id: &str,
        data: CreateTask,
    ) -> Result<Task, GoalServiceError> {
        validate_task(&data.title, data.duration_minutes)?;
        self.get_goal(user_id, data.goal_id).await?;
        let task = Task::create(&self.db.pool, &data, Uuid::new_v4(), user_id).await?;
        self.notify(Table::Tasks, ChangeKind::Insert, user_id, task.id);
        self.dispatch(user_id, GoalAction::AddTask(task.clone())).await;
        Ok(task)
    }

    pub async fn update_task(
        &self,
        user_id: &str,
        id: Uuid,
        update: UpdateTask,
    ) -> Result<Task, GoalServiceError> {
        let mut task = self.get_task(user_id, id).await?;
        update.apply_to(&mut task);
        validate_task(&task.title, task.duration_minutes)?;
        if update.goal_id.is_some() {
            self.get_goal(user_id, task.goal_id).await?;
        }
        task.title = task.title.trim().to_string();
        let (task, next_occurrence) = Task::save_and_schedule(&self.db.pool, &task).await?;
        self.notify(Table::Tasks, ChangeKind::Update, user_id, task.id);
        self.dispatch(user_id, GoalAction::EditTask(task.clone())).await;
        if let Some(next) = next_occurrence {
            self.announce_occurrence(user_id, &task, next).await;
        }
        Ok(task)
    }

    pub async fn delete_task(&self, user_id: &str, id: Uuid) -> Result<(), GoalServiceError> {
        self.get_task(user_id, id).await?;
        Task::delete(&self.db.pool, id).await?;
        self.notify(Table::Tasks, ChangeKind::Delete, user_id, id);
        self.dispatch(user_id, GoalAction::DeleteTask(id)).await;
        Ok(())
    }

    /// Flip a task's completion. Completing a recurring task with a deadline
    /// schedules its next occurrence, once per task.
    pub async fn toggle_task(
        &self,
        user_id: &str,
        id: Uuid,
    ) -> Result<TaskToggle, GoalServiceError> {
        self.get_task(user_id, id).await?;
        let (task, next_occurrence) = Task::toggle_completed(&self.db.pool, id)
            .await?
            .ok_or(GoalServiceError::TaskNotFound)?;
        self.notify(Table::Tasks, ChangeKind::Update, user_id, task.id);
        self.dispatch(
            user_id,
            GoalAction::ToggleTask {
                id: task.id,
                completed: task.completed,
            },
        )
        .await;

        let next_occurrence = match next_occurrence {
            Some(next) => Some(self.announce_occurrence(user_id, &task, next).await),
            None => None,
        };
        Ok(TaskToggle {
            task,
            next_occurrence,
        })
    }

    async fn announce_occurrence(&self, user_id: &str, task: &Task, next: Task) -> Task {
        info!(
            task_id = %task.id,
            next_task_id = %next.id,
            recurrence = %task.recurrence,
            "scheduled next occurrence"
        );
        self.notify(Table::Tasks, ChangeKind::Insert, user_id, next.id);
        self.dispatch(user_id, GoalAction::AddTask(next.clone())).await;
        next
    }

    async fn dispatch(&self, user_id: &str, action: GoalAction) {
        if let Some(store) = self.sync.as_ref().and_then(|sync| sync.store(user_id)) {
            store.dispatch(action).await;
        }
    }

    fn notify(&self, table: Table, kind: ChangeKind, user_id: &str, record_id: Uuid) {
        self.db
            .publish(RecordChange::new(table, kind, user_id, record_id));
    }
}

fn validate_goal(
    name: &str,
    kpi_target: Option<f64>,
    kpi_current: Option<f64>,
) -> Result<(), GoalServiceError> {
    if name.trim().is_empty() {
        return Err(GoalServiceError::Validation("goal name is required".to_string()));
    }
    for (field, value) in [("kpiTarget", kpi_target), ("kpiCurrent", kpi_current)] {
        if matches!(value, Some(v) if !v.is_finite() || v < 0.0) {
            return Err(GoalServiceError::Validation(format!(
                "{field} must be a non-negative number"
            )));
        }
    }
    Ok(())
}

fn validate_task(title: &str, duration_minutes: Option<i32>) -> Result<(), GoalServiceError> {
    if title.trim().is_empty() {
        return Err(GoalServiceError::Validation("task title is required".to_string()));
    }
    if duration_minutes.is_some_and(|d| d <= 0) {
        return Err(GoalServiceError::Validation(
            "durationMinutes must be positive".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use db::models::task::{Recurrence, TaskPriority};

    use super::*;
    use crate::services::state::{GoalState, GoalStore};

    async fn service() -> GoalService {
        GoalService::new(DBService::new_in_memory().await.unwrap())
    }

    async fn eventually<F>(store: &GoalStore, predicate: F)
    where
        F: Fn(&GoalState) -> bool,
    {
        let mut rx = store.subscribe();
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            loop {
                let state = rx.borrow_and_update().clone();
                if predicate(&state) {
                    return;
                }
                rx.changed().await.unwrap();
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn rejects_blank_names_and_negative_kpis() {
        let svc = service().await;
        assert!(matches!(
            svc.create_goal("u1", CreateGoal::named("   ")).await,
            Err(GoalServiceError::Validation(_))
        ));
        assert!(matches!(
            svc.create_goal("u1", CreateGoal::named("Save").with_kpi("eur", -1.0, 0.0))
                .await,
            Err(GoalServiceError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn other_users_cannot_touch_goals() {
        let svc = service().await;
        let goal = svc.create_goal("u1", CreateGoal::named("Private")).await.unwrap();
        assert!(matches!(
            svc.delete_goal("u2", goal.id).await,
            Err(GoalServiceError::GoalNotFound)
        ));
        assert!(matches!(
            svc.create_task("u2", CreateTask::from_title(goal.id, "sneaky")).await,
            Err(GoalServiceError::GoalNotFound)
        ));
    }

    #[tokio::test]
    async fn delete_goal_cascades_and_notifies() {
        let svc = service().await;
        let goal = svc.create_goal("u1", CreateGoal::named("Garden")).await.unwrap();
        svc.create_task("u1", CreateTask::from_title(goal.id, "dig")).await.unwrap();
        svc.create_task("u1", CreateTask::from_title(goal.id, "plant")).await.unwrap();

        let mut changes = svc.db.changes().subscribe();
        assert_eq!(svc.delete_goal("u1", goal.id).await.unwrap(), 2);
        assert!(svc.list_tasks("u1").await.unwrap().is_empty());

        let first = changes.recv().await.unwrap();
        assert_eq!((first.table, first.kind), (Table::Goals, ChangeKind::Delete));
        let second = changes.recv().await.unwrap();
        assert_eq!(second.table, Table::Tasks);
    }

    #[tokio::test]
    async fn completing_recurring_task_schedules_next() {
        let svc = service().await;
        let goal = svc.create_goal("u1", CreateGoal::named("Health")).await.unwrap();
        let deadline = Utc::now();
        let mut data = CreateTask::from_title(goal.id, "weigh in");
        data.deadline = Some(deadline);
        data.recurrence = Some(Recurrence::Weekly);
        data.priority = Some(TaskPriority::Low);
        let task = svc.create_task("u1", data).await.unwrap();

        let toggle = svc.toggle_task("u1", task.id).await.unwrap();
        assert!(toggle.task.completed);
        let next = toggle.next_occurrence.unwrap();
        assert!(!next.completed);
        assert_eq!(next.deadline, Some(deadline + Duration::weeks(1)));
        assert_eq!(next.priority, TaskPriority::Low);

        // Un-completing and completing again reuses the scheduled occurrence.
        let toggle = svc.toggle_task("u1", task.id).await.unwrap();
        assert!(!toggle.task.completed);
        assert!(toggle.next_occurrence.is_none());
        let toggle = svc.toggle_task("u1", task.id).await.unwrap();
        assert!(toggle.task.completed);
        assert!(toggle.next_occurrence.is_none());
        assert_eq!(toggle.task.next_occurrence_id, Some(next.id));

        let tasks = svc.list_tasks("u1").await.unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks.iter().filter(|t| t.id != task.id).count(), 1);
    }

    #[tokio::test]
    async fn completing_through_update_also_schedules_once() {
        let svc = service().await;
        let goal = svc.create_goal("u1", CreateGoal::named("Admin")).await.unwrap();
        let mut data = CreateTask::from_title(goal.id, "pay rent");
        data.deadline = Some(Utc::now());
        data.recurrence = Some(Recurrence::Monthly);
        let task = svc.create_task("u1", data).await.unwrap();

        let complete = || UpdateTask {
            completed: Some(true),
            ..Default::default()
        };
        let updated = svc.update_task("u1", task.id, complete()).await.unwrap();
        assert!(updated.next_occurrence_id.is_some());
        svc.update_task("u1", task.id, complete()).await.unwrap();
        assert_eq!(svc.list_tasks("u1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn writes_reach_a_running_store_immediately() {
        let db = DBService::new_in_memory().await.unwrap();
        let sync = Arc::new(SyncRegistry::default());
        let svc = GoalService::new(db.clone()).with_sync(sync.clone());
        let subscription = sync.subscribe(&db, "u1");
        let store = subscription.store().clone();
        eventually(&store, |s| !s.loading).await;

        // No live query is pending here, so only the direct dispatch can
        // explain the new records.
        let goal = svc.create_goal("u1", CreateGoal::named("Read more")).await.unwrap();
        assert!(store.snapshot().await.goal(goal.id).is_some());
        let task = svc
            .create_task("u1", CreateTask::from_title(goal.id, "pick a book"))
            .await
            .unwrap();
        assert_eq!(store.snapshot().await.tasks_for(goal.id).count(), 1);

        svc.toggle_task("u1", task.id).await.unwrap();
        eventually(&store, |s| s.tasks.iter().any(|t| t.id == task.id && t.completed)).await;

        svc.delete_goal("u1", goal.id).await.unwrap();
        eventually(&store, |s| s.goal(goal.id).is_none() && s.tasks.is_empty()).await;

        // Users without a running sync are left alone.
        svc.create_goal("u2", CreateGoal::named("Elsewhere")).await.unwrap();
        assert!(sync.store("u2").is_none());
    }

    #[tokio::test]
    async fn progress_follows_task_completion() {
        let svc = service().await;
        let goal = svc.create_goal("u1", CreateGoal::named("Course")).await.unwrap();
        let a = svc.create_task("u1", CreateTask::from_title(goal.id, "module 1")).await.unwrap();
        svc.create_task("u1", CreateTask::from_title(goal.id, "module 2")).await.unwrap();
        svc.toggle_task("u1", a.id).await.unwrap();

        let progress = svc.goal_progress("u1", goal.id).await.unwrap();
        assert_eq!(progress.percent, 50.0);

        let updated = svc
            .update_goal(
                "u1",
                goal.id,
                UpdateGoal {
                    kpi_target: Some(Some(4.0)),
                    kpi_current: Some(Some(3.0)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.kpi_target, Some(4.0));
        assert_eq!(svc.goal_progress("u1", goal.id).await.unwrap().percent, 75.0);
    }

    #[tokio::test]
    async fn update_task_rejects_non_positive_duration() {
        let svc = service().await;
        let goal = svc.create_goal("u1", CreateGoal::named("Focus")).await.unwrap();
        let task = svc
            .create_task("u1", CreateTask::from_title(goal.id, "deep work"))
            .await
            .unwrap();
        let result = svc
            .update_task(
                "u1",
                task.id,
                UpdateTask {
                    duration_minutes: Some(Some(0)),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(GoalServiceError::Validation(_))));
    }
}
