//! Client-side goal/task state and its transition function.
//!
//! [`reduce`] is the only place state changes; [`GoalStore`] wraps it behind
//! a lock and republishes every new state on a watch channel.

use db::models::{goal::Goal, task::Task};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, watch};
use ts_rs::TS;
use uuid::Uuid;

use super::events::PermissionError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
pub struct GoalState {
    pub goals: Vec<Goal>,
    pub tasks: Vec<Task>,
    pub loading: bool,
    pub error: Option<PermissionError>,
}

impl Default for GoalState {
    fn default() -> Self {
        Self {
            goals: Vec::new(),
            tasks: Vec::new(),
            loading: true,
            error: None,
        }
    }
}

impl GoalState {
    pub fn goal(&self, id: Uuid) -> Option<&Goal> {
        self.goals.iter().find(|g| g.id == id)
    }

    pub fn tasks_for(&self, goal_id: Uuid) -> impl Iterator<Item = &Task> {
        self.tasks.iter().filter(move |t| t.goal_id == goal_id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GoalAction {
    /// Both initial snapshots have arrived.
    Hydrate { goals: Vec<Goal>, tasks: Vec<Task> },
    SetGoals(Vec<Goal>),
    SetTasks(Vec<Task>),
    AddGoal(Goal),
    EditGoal(Goal),
    /// Removes the goal and every task whose `goal_id` matches.
    DeleteGoal(Uuid),
    AddTask(Task),
    EditTask(Task),
    DeleteTask(Uuid),
    /// Carries the flag the toggle produced, so replaying it after a listener
    /// snapshot is harmless.
    ToggleTask { id: Uuid, completed: bool },
    SetError(PermissionError),
}

pub fn reduce(state: &mut GoalState, action: GoalAction) {
    match action {
        GoalAction::Hydrate { goals, tasks } => {
            state.goals = goals;
            state.tasks = tasks;
            state.loading = false;
            state.error = None;
        }
        GoalAction::SetGoals(goals) => state.goals = goals,
        GoalAction::SetTasks(tasks) => state.tasks = tasks,
        GoalAction::AddGoal(goal) => upsert(&mut state.goals, goal, |g| g.id),
        GoalAction::EditGoal(goal) => {
            if let Some(existing) = state.goals.iter_mut().find(|g| g.id == goal.id) {
                *existing = goal;
            }
        }
        GoalAction::DeleteGoal(id) => {
            state.goals.retain(|g| g.id != id);
            state.tasks.retain(|t| t.goal_id != id);
        }
        GoalAction::AddTask(task) => upsert(&mut state.tasks, task, |t| t.id),
        GoalAction::EditTask(task) => {
            if let Some(existing) = state.tasks.iter_mut().find(|t| t.id == task.id) {
                *existing = task;
            }
        }
        GoalAction::DeleteTask(id) => state.tasks.retain(|t| t.id != id),
        GoalAction::ToggleTask { id, completed } => {
            if let Some(task) = state.tasks.iter_mut().find(|t| t.id == id) {
                task.completed = completed;
            }
        }
        GoalAction::SetError(error) => {
            state.error = Some(error);
            state.loading = false;
        }
    }
}

// Adds are idempotent: a listener snapshot may already contain the record.
fn upsert<T>(items: &mut Vec<T>, item: T, key: impl Fn(&T) -> Uuid) {
    let id = key(&item);
    match items.iter_mut().find(|existing| key(existing) == id) {
        Some(existing) => *existing = item,
        None => items.push(item),
    }
}

/// Shared state for one user, observable through [`GoalStore::subscribe`].
pub struct GoalStore {
    state: RwLock<GoalState>,
    tx: watch::Sender<GoalState>,
}

impl Default for GoalStore {
    fn default() -> Self {
        let (tx, _) = watch::channel(GoalState::default());
        Self {
            state: RwLock::new(GoalState::default()),
            tx,
        }
    }
}

impl GoalStore {
    pub async fn dispatch(&self, action: GoalAction) {
        let mut state = self.state.write().await;
        reduce(&mut state, action);
        self.tx.send_replace(state.clone());
    }

    pub async fn snapshot(&self) -> GoalState {
        self.state.read().await.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<GoalState> {
        self.tx.subscribe()
    }
}


#[cfg(test)]
mod tests {
    use super::{fixtures::*, *};

    #[test]
    fn delete_goal_cascades_to_its_tasks() {
        let fitness = goal("Fitness");
        let reading = goal("Reading");
        let mut state = GoalState::default();
        reduce(
            &mut state,
            GoalAction::Hydrate {
                goals: vec![fitness.clone(), reading.clone()],
                tasks: vec![
                    task(fitness.id, "run"),
                    task(fitness.id, "stretch"),
                    task(reading.id, "chapter 1"),
                ],
            },
        );

        reduce(&mut state, GoalAction::DeleteGoal(fitness.id));

        assert_eq!(state.goals, vec![reading.clone()]);
        assert_eq!(state.tasks.len(), 1);
        assert!(state.tasks.iter().all(|t| t.goal_id == reading.id));
    }

    #[test]
    fn hydrate_clears_loading_and_error() {
        let mut state = GoalState::default();
        assert!(state.loading);
        reduce(&mut state, GoalAction::SetError(PermissionError::list("goals", "denied")));
        assert!(state.error.is_some());

        reduce(&mut state, GoalAction::Hydrate { goals: vec![], tasks: vec![] });
        assert!(!state.loading);
        assert!(state.error.is_none());
    }

    #[test]
    fn toggle_edit_and_delete_task() {
        let g = goal("Write");
        let t = task(g.id, "outline");
        let mut state = GoalState::default();
        reduce(&mut state, GoalAction::AddGoal(g.clone()));
        reduce(&mut state, GoalAction::AddTask(t.clone()));
        reduce(&mut state, GoalAction::AddTask(t.clone()));
        assert_eq!(state.tasks.len(), 1);

        let complete = GoalAction::ToggleTask { id: t.id, completed: true };
        reduce(&mut state, complete.clone());
        reduce(&mut state, complete);
        assert!(state.tasks[0].completed);
        reduce(&mut state, GoalAction::ToggleTask { id: t.id, completed: false });
        assert!(!state.tasks[0].completed);

        let mut renamed = t.clone();
        renamed.title = "detailed outline".to_string();
        reduce(&mut state, GoalAction::EditTask(renamed));
        assert_eq!(state.tasks_for(g.id).next().unwrap().title, "detailed outline");

        reduce(&mut state, GoalAction::DeleteTask(t.id));
        assert!(state.tasks.is_empty());
        assert!(state.goal(g.id).is_some());
    }

    #[test]
    fn edit_of_unknown_goal_is_ignored() {
        let mut state = GoalState::default();
        reduce(&mut state, GoalAction::EditGoal(goal("ghost")));
        assert!(state.goals.is_empty());
    }

    #[tokio::test]
    async fn store_publishes_each_dispatch() {
        let store = GoalStore::default();
        let mut rx = store.subscribe();
        let g = goal("Publish");
        store.dispatch(GoalAction::AddGoal(g.clone())).await;

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().goals, vec![g]);
        assert_eq!(store.snapshot().await.goals.len(), 1);
    }
}
