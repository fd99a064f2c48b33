//! Change notifications for committed writes.
//!
//! Every write that goes through the service layer publishes a
//! [`RecordChange`]; live queries re-run when a change touches their owner.

use strum_macros::Display;
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

const CHANGE_FEED_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Table {
    Goals,
    Tasks,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordChange {
    pub table: Table,
    pub kind: ChangeKind,
    pub user_id: String,
    pub record_id: Uuid,
}

impl RecordChange {
    pub fn new(
        table: Table,
        kind: ChangeKind,
        user_id: impl Into<String>,
        record_id: Uuid,
    ) -> Self {
        Self {
            table,
            kind,
            user_id: user_id.into(),
            record_id,
        }
    }

    pub fn affects(&self, table: Table, user_id: &str) -> bool {
        self.table == table && self.user_id == user_id
    }
}

#[derive(Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<RecordChange>,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self { tx }
    }
}

impl ChangeFeed {
    pub fn subscribe(&self) -> broadcast::Receiver<RecordChange> {
        self.tx.subscribe()
    }

    pub fn publish(&self, change: RecordChange) {
        trace!(
            table = %change.table,
            kind = %change.kind,
            record_id = %change.record_id,
            "record changed"
        );
        // No receivers simply means nobody is listening yet.
        let _ = self.tx.send(change);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_changes() {
        let feed = ChangeFeed::default();
        let mut rx = feed.subscribe();
        let id = Uuid::new_v4();
        feed.publish(RecordChange::new(Table::Tasks, ChangeKind::Insert, "user-1", id));

        let change = rx.recv().await.unwrap();
        assert!(change.affects(Table::Tasks, "user-1"));
        assert!(!change.affects(Table::Goals, "user-1"));
        assert!(!change.affects(Table::Tasks, "user-2"));
        assert_eq!(change.record_id, id);
    }
}
