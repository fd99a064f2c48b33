//! Real-time listeners: live queries that deliver a full snapshot first and
//! again after every committed write touching the subscribed owner.

use std::future::Future;

use db::{
    DBService,
    changes::Table,
    models::{goal::Goal, task::Task},
};
use sqlx::SqlitePool;
use thiserror::Error;
use tokio::sync::{broadcast::error::RecvError, mpsc};
use tracing::debug;

use super::events::PermissionError;

const LISTENER_BUFFER: usize = 16;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("listener on {path} failed: {message}")]
pub struct ListenerError {
    pub path: String,
    pub message: String,
}

impl From<ListenerError> for PermissionError {
    fn from(error: ListenerError) -> Self {
        PermissionError::list(error.path, error.message)
    }
}

pub type Snapshot<T> = Result<Vec<T>, ListenerError>;

/// Receiving end of a live query. Ends after the first error, like a
/// document-store listener that has been revoked.
pub struct Listener<T> {
    rx: mpsc::Receiver<Snapshot<T>>,
}

impl<T> Listener<T> {
    pub fn channel(buffer: usize) -> (mpsc::Sender<Snapshot<T>>, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (tx, Self { rx })
    }

    pub async fn next(&mut self) -> Option<Snapshot<T>> {
        self.rx.recv().await
    }
}

pub fn watch_goals(db: &DBService, user_id: &str) -> Listener<Goal> {
    live_query(
        db,
        Table::Goals,
        user_id,
        |pool, user_id| async move { Goal::find_by_user(&pool, &user_id).await },
    )
}

pub fn watch_tasks(db: &DBService, user_id: &str) -> Listener<Task> {
    live_query(
        db,
        Table::Tasks,
        user_id,
        |pool, user_id| async move { Task::find_by_user(&pool, &user_id).await },
    )
}

fn live_query<T, F, Fut>(db: &DBService, table: Table, user_id: &str, query: F) -> Listener<T>
where
    T: Send + 'static,
    F: Fn(SqlitePool, String) -> Fut + Send + 'static,
    Fut: Future<Output = Result<Vec<T>, sqlx::Error>> + Send,
{
    let (tx, listener) = Listener::channel(LISTENER_BUFFER);
    let pool = db.pool.clone();
    let user_id = user_id.to_string();
    let path = format!("users/{user_id}/{table}");
    // Subscribe before the first read so no write can slip in between.
    let mut changes = db.changes().subscribe();

    tokio::spawn(async move {
        loop {
            let snapshot = query(pool.clone(), user_id.clone())
                .await
                .map_err(|e| ListenerError {
                    path: path.clone(),
                    message: e.to_string(),
                });
            let failed = snapshot.is_err();
            if tx.send(snapshot).await.is_err() || failed {
                return;
            }

            loop {
                tokio::select! {
                    _ = tx.closed() => return,
                    change = changes.recv() => match change {
                        Ok(change) if change.affects(table, &user_id) => break,
                        Ok(_) => continue,
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(path = %path, skipped, "listener lagged, re-reading");
                            break;
                        }
                        Err(RecvError::Closed) => return,
                    },
                }
            }
        }
    });

    listener
}
