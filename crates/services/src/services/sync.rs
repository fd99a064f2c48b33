//! Keeps a [`GoalStore`] in step with the goal and task listeners of one user.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use dashmap::DashMap;
use db::{
    DBService,
    models::{goal::Goal, task::Task},
};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::{
    events::{PermissionError, error_emitter},
    listeners::{Listener, ListenerError, watch_goals, watch_tasks},
    state::{GoalAction, GoalStore},
};

pub struct GoalSync;

impl GoalSync {
    /// Spawn a sync loop for `user_id` backed by the store's live queries.
    pub fn spawn(db: &DBService, user_id: &str) -> (Arc<GoalStore>, JoinHandle<()>) {
        let store = Arc::new(GoalStore::default());
        let goals = watch_goals(db, user_id);
        let tasks = watch_tasks(db, user_id);
        let handle = tokio::spawn(Self::run(store.clone(), goals, tasks));
        info!(user_id = %user_id, "goal sync started");
        (store, handle)
    }

    /// Nothing reaches the store until both listeners have delivered their
    /// first snapshot; those are applied together as one `Hydrate`. Every later
    /// snapshot is dispatched on its own. Returns once both listeners close.
    pub async fn run(store: Arc<GoalStore>, mut goals: Listener<Goal>, mut tasks: Listener<Task>) {
        let mut first_goals: Option<Vec<Goal>> = None;
        let mut first_tasks: Option<Vec<Task>> = None;
        let mut hydrated = false;
        let (mut goals_open, mut tasks_open) = (true, true);

        while goals_open || tasks_open {
            tokio::select! {
                snapshot = goals.next(), if goals_open => match snapshot {
                    Some(Ok(snapshot)) if hydrated => {
                        store.dispatch(GoalAction::SetGoals(snapshot)).await
                    }
                    Some(Ok(snapshot)) => first_goals = Some(snapshot),
                    Some(Err(e)) => Self::report(&store, e).await,
                    None => goals_open = false,
                },
                snapshot = tasks.next(), if tasks_open => match snapshot {
                    Some(Ok(snapshot)) if hydrated => {
                        store.dispatch(GoalAction::SetTasks(snapshot)).await
                    }
                    Some(Ok(snapshot)) => first_tasks = Some(snapshot),
                    Some(Err(e)) => Self::report(&store, e).await,
                    None => tasks_open = false,
                },
            }

            if !hydrated && first_goals.is_some() && first_tasks.is_some() {
                let goals = first_goals.take().unwrap_or_default();
                let tasks = first_tasks.take().unwrap_or_default();
                debug!(goals = goals.len(), tasks = tasks.len(), "initial snapshots joined");
                store.dispatch(GoalAction::Hydrate { goals, tasks }).await;
                hydrated = true;
            }
        }

        debug!("goal sync finished, listeners closed");
    }

    async fn report(store: &GoalStore, error: ListenerError) {
        error!(path = %error.path, error = %error.message, "listener error");
        let error = PermissionError::from(error);
        error_emitter().emit(error.clone());
        store.dispatch(GoalAction::SetError(error)).await;
    }
}

struct SyncEntry {
    store: Arc<GoalStore>,
    handle: JoinHandle<()>,
    generation: u64,
    subscribers: usize,
}

/// One synchronized store per user, running while at least one
/// [`SyncSubscription`] for that user is alive.
#[derive(Default)]
pub struct SyncRegistry {
    entries: DashMap<String, SyncEntry>,
    generations: AtomicU64,
}

impl SyncRegistry {
    /// Join the user's sync, starting it on first use.
    pub fn subscribe(self: &Arc<Self>, db: &DBService, user_id: &str) -> SyncSubscription {
        let mut entry = self.entries.entry(user_id.to_string()).or_insert_with(|| {
            let (store, handle) = GoalSync::spawn(db, user_id);
            SyncEntry {
                store,
                handle,
                generation: self.generations.fetch_add(1, Ordering::Relaxed),
                subscribers: 0,
            }
        });
        entry.subscribers += 1;
        debug!(user_id = %user_id, subscribers = entry.subscribers, "sync subscriber joined");

        SyncSubscription {
            registry: Arc::clone(self),
            user_id: user_id.to_string(),
            generation: entry.generation,
            store: entry.store.clone(),
        }
    }

    /// The user's store while their sync is running.
    pub fn store(&self, user_id: &str) -> Option<Arc<GoalStore>> {
        self.entries.get(user_id).map(|entry| entry.store.clone())
    }

    pub fn is_syncing(&self, user_id: &str) -> bool {
        self.entries.contains_key(user_id)
    }

    /// Stop syncing a user regardless of subscribers, e.g. after sign-out.
    /// Aborting the loop drops both listeners, which ends their live queries.
    pub fn remove(&self, user_id: &str) {
        if let Some((_, entry)) = self.entries.remove(user_id) {
            entry.handle.abort();
            info!(user_id = %user_id, "goal sync stopped");
        }
    }

    fn release(&self, user_id: &str, generation: u64) {
        let removed = self.entries.remove_if_mut(user_id, |_, entry| {
            if entry.generation != generation {
                return false;
            }
            entry.subscribers = entry.subscribers.saturating_sub(1);
            entry.subscribers == 0
        });
        if let Some((_, entry)) = removed {
            entry.handle.abort();
            info!(user_id = %user_id, "last sync subscriber left, goal sync stopped");
        }
    }
}

/// Keeps a user's sync running; dropping the last one stops it.
pub struct SyncSubscription {
    registry: Arc<SyncRegistry>,
    user_id: String,
    generation: u64,
    store: Arc<GoalStore>,
}

impl SyncSubscription {
    pub fn store(&self) -> &Arc<GoalStore> {
        &self.store
    }
}

impl Drop for SyncSubscription {
    fn drop(&mut self) {
        self.registry.release(&self.user_id, self.generation);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use db::models::{goal::CreateGoal, task::CreateTask};

    use super::*;
    use crate::services::{
        goals::GoalService,
        state::{GoalState, fixtures},
    };

    async fn wait_for<F>(store: &GoalStore, predicate: F) -> GoalState
    where
        F: Fn(&GoalState) -> bool,
    {
        let mut rx = store.subscribe();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let state = rx.borrow_and_update().clone();
                if predicate(&state) {
                    return state;
                }
                rx.changed().await.unwrap();
            }
        })
        .await
        .expect("state never matched")
    }

    #[tokio::test]
    async fn waits_for_both_initial_snapshots() {
        let store = Arc::new(GoalStore::default());
        let (goals_tx, goals) = Listener::channel(4);
        let (tasks_tx, tasks) = Listener::channel(4);
        let handle = tokio::spawn(GoalSync::run(store.clone(), goals, tasks));

        let g = fixtures::goal("Learn Rust");
        goals_tx.send(Ok(vec![g.clone()])).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let state = store.snapshot().await;
        assert!(state.loading);
        assert!(state.goals.is_empty());

        let t = fixtures::task(g.id, "read the book");
        tasks_tx.send(Ok(vec![t.clone()])).await.unwrap();
        let state = wait_for(&store, |s| !s.loading).await;
        assert_eq!(state.goals, vec![g.clone()]);
        assert_eq!(state.tasks, vec![t.clone()]);

        tasks_tx.send(Ok(vec![])).await.unwrap();
        wait_for(&store, |s| s.tasks.is_empty()).await;

        drop(goals_tx);
        drop(tasks_tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn listener_errors_reach_state_and_emitter() {
        let mut emitted = error_emitter().subscribe();
        let store = Arc::new(GoalStore::default());
        let (goals_tx, goals) = Listener::channel(4);
        let (_tasks_tx, tasks) = Listener::<Task>::channel(4);
        tokio::spawn(GoalSync::run(store.clone(), goals, tasks));

        let failure = ListenerError {
            path: "users/u-err/goals".to_string(),
            message: "permission denied".to_string(),
        };
        goals_tx.send(Err(failure.clone())).await.unwrap();

        let state = wait_for(&store, |s| s.error.is_some()).await;
        let expected = PermissionError::from(failure);
        assert_eq!(state.error, Some(expected.clone()));
        loop {
            if emitted.recv().await.unwrap() == expected {
                break;
            }
        }
    }

    #[tokio::test]
    async fn live_queries_follow_service_writes() {
        let db = DBService::new_in_memory().await.unwrap();
        let service = GoalService::new(db.clone());
        let registry = Arc::new(SyncRegistry::default());
        let subscription = registry.subscribe(&db, "u1");
        let store = subscription.store().clone();
        wait_for(&store, |s| !s.loading).await;

        let goal = service.create_goal("u1", CreateGoal::named("Ship v1")).await.unwrap();
        service
            .create_task("u1", CreateTask::from_title(goal.id, "write tests"))
            .await
            .unwrap();
        service.create_goal("u2", CreateGoal::named("Not mine")).await.unwrap();

        let state = wait_for(&store, |s| s.goals.len() == 1 && s.tasks.len() == 1).await;
        assert_eq!(state.goals[0].name, "Ship v1");

        service.delete_goal("u1", goal.id).await.unwrap();
        wait_for(&store, |s| s.goals.is_empty() && s.tasks.is_empty()).await;
    }

    #[tokio::test]
    async fn sync_stops_when_the_last_subscriber_leaves() {
        let db = DBService::new_in_memory().await.unwrap();
        let registry = Arc::new(SyncRegistry::default());

        let first = registry.subscribe(&db, "u1");
        let second = registry.subscribe(&db, "u1");
        assert!(Arc::ptr_eq(first.store(), second.store()));

        drop(first);
        assert!(registry.is_syncing("u1"));
        let store = Arc::downgrade(second.store());
        drop(second);
        assert!(!registry.is_syncing("u1"));

        // The aborted loop releases its handle on the store.
        tokio::time::timeout(Duration::from_secs(2), async {
            while store.upgrade().is_some() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn stale_subscriptions_do_not_stop_a_restarted_sync() {
        let db = DBService::new_in_memory().await.unwrap();
        let registry = Arc::new(SyncRegistry::default());

        let before_sign_out = registry.subscribe(&db, "u1");
        registry.remove("u1");
        let after_sign_in = registry.subscribe(&db, "u1");
        assert!(!Arc::ptr_eq(before_sign_out.store(), after_sign_in.store()));

        drop(before_sign_out);
        assert!(registry.is_syncing("u1"));
        drop(after_sign_in);
        assert!(!registry.is_syncing("u1"));
    }
}
