//! Activity Log
//!
//! Append-only event table with a fixed `{Timestamp, Actor, Action}` column
//! set. If the table at the log's path has any other column set it is
//! treated as corrupt: the existing rows are discarded and the log restarts
//! with the new event. This loses data on purpose; it is not a merge.
//!
//! Appends share the read-then-write race of
//! [`TableStore::append_records`](crate::store::TableStore::append_records).

use crate::clock::{Clock, SystemClock};
use crate::error::{StoreError, StoreResult};
use crate::store::{ObjectStore, TableStore};
use crate::table::{Cell, CellKind, ColumnDef, Record, Schema, Table};
use std::sync::Arc;
use tracing::warn;

pub const COL_TIMESTAMP: &str = "Timestamp";
pub const COL_ACTOR: &str = "Actor";
pub const COL_ACTION: &str = "Action";

/// Format of the `Timestamp` column
pub const LOG_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// The log's canonical column set
pub fn log_schema() -> Schema {
    Schema::new(vec![
        ColumnDef::new(COL_TIMESTAMP, CellKind::String),
        ColumnDef::new(COL_ACTOR, CellKind::String),
        ColumnDef::new(COL_ACTION, CellKind::String),
    ])
}

/// One row of the activity log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityEvent {
    pub timestamp: String,
    pub actor: String,
    pub action: String,
}

impl ActivityEvent {
    pub fn new(
        timestamp: impl Into<String>,
        actor: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        ActivityEvent {
            timestamp: timestamp.into(),
            actor: actor.into(),
            action: action.into(),
        }
    }

    /// Event stamped with the clock's current time
    pub fn now<C: Clock>(clock: &C, actor: impl Into<String>, action: impl Into<String>) -> Self {
        let timestamp = clock
            .now()
            .to_datetime()
            .format(LOG_TIMESTAMP_FORMAT)
            .to_string();
        ActivityEvent::new(timestamp, actor, action)
    }

    pub fn to_record(&self) -> Record {
        let mut record = Record::new();
        record.insert(COL_TIMESTAMP.to_string(), Cell::from(self.timestamp.as_str()));
        record.insert(COL_ACTOR.to_string(), Cell::from(self.actor.as_str()));
        record.insert(COL_ACTION.to_string(), Cell::from(self.action.as_str()));
        record
    }

    pub fn from_record(record: &Record) -> StoreResult<Self> {
        let field = |name: &str| -> StoreResult<String> {
            record
                .get(name)
                .and_then(Cell::as_str)
                .map(str::to_string)
                .ok_or_else(|| StoreError::Schema(format!("log row has no text '{}'", name)))
        };
        Ok(ActivityEvent {
            timestamp: field(COL_TIMESTAMP)?,
            actor: field(COL_ACTOR)?,
            action: field(COL_ACTION)?,
        })
    }
}

pub struct ActivityLog<S: ObjectStore, C: Clock = SystemClock> {
    store: Arc<TableStore<S, C>>,
    path: String,
    schema: Schema,
}

impl<S: ObjectStore, C: Clock> ActivityLog<S, C> {
    pub fn new(store: Arc<TableStore<S, C>>, path: impl Into<String>) -> Self {
        ActivityLog {
            store,
            path: path.into(),
            schema: log_schema(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Append one event. Returns whether the write completed.
    ///
    /// A log whose column set differs from the canonical one is reset to
    /// empty first.
    pub async fn append(&self, event: &ActivityEvent) -> StoreResult<bool> {
        let current = self.store.read_table(&self.path).await?;
        let mut table = if self.schema.matches_columns(&current) {
            current
        } else {
            warn!(
                path = %self.path,
                columns = ?current.columns(),
                discarded_rows = current.len(),
                "activity log has unexpected columns, resetting"
            );
            Table::new()
        };
        table.push(event.to_record());
        Ok(self.store.write_table(&self.path, &table).await)
    }

    /// All events, oldest first
    pub async fn events(&self) -> StoreResult<Vec<ActivityEvent>> {
        self.store
            .read_table(&self.path)
            .await?
            .records()
            .iter()
            .map(ActivityEvent::from_record)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::InMemoryObjectStore;
    use crate::table::record;

    const LOG: &str = "/audit/activity_log.sheet";

    fn log() -> (
        Arc<TableStore<InMemoryObjectStore, ManualClock>>,
        ActivityLog<InMemoryObjectStore, ManualClock>,
    ) {
        let store = Arc::new(TableStore::with_clock(
            InMemoryObjectStore::new(),
            ManualClock::new(1_704_103_200_000),
        ));
        let log = ActivityLog::new(Arc::clone(&store), LOG);
        (store, log)
    }

    #[test]
    fn test_event_now_formats_timestamp() {
        let clock = ManualClock::new(1_704_103_200_000);
        let event = ActivityEvent::now(&clock, "audit_group1", "AuditGroup");
        assert_eq!(event.timestamp, "2024-01-01 10:00:00");
        assert!(log_schema().validate(&event.to_record()).is_ok());
    }

    #[test]
    fn test_from_record_requires_text() {
        let row = record([
            (COL_TIMESTAMP, Cell::from("2024-01-01 10:00:00")),
            (COL_ACTOR, Cell::Null),
            (COL_ACTION, Cell::from("x")),
        ]);
        assert!(matches!(
            ActivityEvent::from_record(&row),
            Err(StoreError::Schema(_))
        ));
    }

    #[tokio::test]
    async fn test_appends_accumulate() {
        let (_, log) = log();
        let first = ActivityEvent::new("2024-01-01 10:00:00", "a", "Login");
        let second = ActivityEvent::new("2024-01-01 10:05:00", "b", "Upload");

        assert!(log.append(&first).await.unwrap());
        assert!(log.append(&second).await.unwrap());
        assert_eq!(log.events().await.unwrap(), vec![first, second]);
    }

    #[tokio::test]
    async fn test_mismatched_columns_reset() {
        let (store, log) = log();
        let legacy = Table::from_records(vec![
            record([("When", "yesterday"), ("Who", "x")]),
            record([("When", "today"), ("Who", "y")]),
        ]);
        assert!(store.write_table(LOG, &legacy).await);

        let event = ActivityEvent::new("2024-01-01 10:00:00", "audit_group1", "AuditGroup");
        assert!(log.append(&event).await.unwrap());
        assert_eq!(log.events().await.unwrap(), vec![event]);
    }
}
