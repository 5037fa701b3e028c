//! Table Store
//!
//! The public surface callers use: read, write and append whole tables at a
//! path. Reads go through the TTL cache; writes go through the two-phase
//! write and collapse its outcome to a success flag.
//!
//! `append_records` is a read followed by a write with nothing in between.
//! Two processes appending to the same path can both read the same base and
//! the later write drops the earlier append. No lock or version check guards
//! against this; callers that need it must coordinate externally.

use crate::clock::{Clock, SystemClock};
use crate::config::StoreConfig;
use crate::error::StoreResult;
use crate::retry::{is_transient, retry_with_backoff, RetryPolicy};
use crate::store::object_store::ObjectStore;
use crate::store::read_cache::{CacheStats, ReadCache};
use crate::store::write_coordinator::{
    TempNamer, TimestampTempNamer, WriteCoordinator, WriteFailure, WritePath,
};
use crate::table::{Record, Schema, Table, TableCodec};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Default freshness bound for cached reads
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

pub struct TableStore<S: ObjectStore, C: Clock = SystemClock> {
    coordinator: WriteCoordinator<S>,
    codec: TableCodec,
    cache: ReadCache<Table, C>,
    cache_ttl: Duration,
}

impl<S: ObjectStore> TableStore<S, SystemClock> {
    pub fn new(store: S) -> Self {
        TableStore::with_clock(store, SystemClock)
    }

    /// Store using the TTL and encoder threshold from `config`
    pub fn from_config(store: S, config: &StoreConfig) -> Self {
        TableStore::new(store)
            .with_cache_ttl(config.cache_ttl)
            .with_codec(TableCodec::new(config.fast_encoder_threshold))
    }
}

impl<S: ObjectStore, C: Clock + Clone> TableStore<S, C> {
    pub fn with_clock(store: S, clock: C) -> Self {
        let namer: Arc<dyn TempNamer> = Arc::new(TimestampTempNamer::new(clock.clone()));
        TableStore {
            coordinator: WriteCoordinator::new(store, namer),
            codec: TableCodec::default(),
            cache: ReadCache::new(clock),
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }
}

impl<S: ObjectStore, C: Clock> TableStore<S, C> {
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_codec(mut self, codec: TableCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Name fallback temps with `namer`
    pub fn with_temp_namer(mut self, namer: Arc<dyn TempNamer>) -> Self {
        self.coordinator = self.coordinator.with_namer(namer);
        self
    }

    pub fn store(&self) -> &S {
        self.coordinator.store()
    }

    pub fn codec(&self) -> &TableCodec {
        &self.codec
    }

    pub fn cache_ttl(&self) -> Duration {
        self.cache_ttl
    }

    /// Table at `path`. A path with no object reads as an empty table.
    ///
    /// Served from the cache while the entry is younger than the TTL, so a
    /// write by another process may not be visible for up to one TTL.
    pub async fn read_table(&self, path: &str) -> StoreResult<Table> {
        self.cache
            .get_or_load(path, self.cache_ttl, || self.load_table(path))
            .await
    }

    /// Read `path` from the store, bypassing the cache
    pub async fn load_table(&self, path: &str) -> StoreResult<Table> {
        match self.store().download_object(path).await {
            Ok(bytes) => self.codec.decode(&bytes),
            Err(e) if e.is_not_found() => {
                debug!(path, "no object at path, reading as empty table");
                Ok(Table::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Replace the table at `path`. Returns whether the write completed.
    pub async fn write_table(&self, path: &str, table: &Table) -> bool {
        match self.write_table_report(path, table).await {
            Ok(Ok(_)) => true,
            Ok(Err(_)) => false,
            Err(e) => {
                error!(path, error = %e, "table could not be encoded");
                false
            }
        }
    }

    /// Like [`TableStore::write_table`], reporting how the write went.
    ///
    /// The outer error is an encoding failure, before any I/O.
    pub async fn write_table_report(
        &self,
        path: &str,
        table: &Table,
    ) -> StoreResult<Result<WritePath, WriteFailure>> {
        let bytes = self.codec.encode(table)?;
        Ok(self.write_bytes(path, &bytes).await)
    }

    async fn write_bytes(&self, path: &str, bytes: &[u8]) -> Result<WritePath, WriteFailure> {
        let outcome = self.coordinator.write(path, bytes).await;
        if outcome.is_ok() {
            self.cache.invalidate(path);
        }
        outcome
    }

    /// Append `records` to the table at `path`.
    ///
    /// Read errors propagate; a failed write is `Ok(false)`. Not atomic
    /// across the read and the write.
    pub async fn append_records(&self, path: &str, records: Vec<Record>) -> StoreResult<bool> {
        let mut table = self.read_table(path).await?;
        table.extend(records);
        Ok(self.write_table(path, &table).await)
    }

    /// Validate `records` against `schema`, then append them
    pub async fn append_checked(
        &self,
        path: &str,
        schema: &Schema,
        records: Vec<Record>,
    ) -> StoreResult<bool> {
        schema.validate_all(&records)?;
        self.append_records(path, records).await
    }

    /// Re-run the whole write until it completes or `policy` gives up
    pub async fn write_table_with_retry(
        &self,
        path: &str,
        table: &Table,
        policy: &RetryPolicy,
    ) -> bool {
        let bytes = match self.codec.encode(table) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(path, error = %e, "table could not be encoded");
                return false;
            }
        };
        let bytes = bytes.as_slice();
        let outcome = retry_with_backoff(
            policy,
            // A failed move leaves the path in an unknown state
            |failure: &WriteFailure| failure.orphaned_temp().is_none(),
            || self.write_bytes(path, bytes),
        )
        .await;
        if let Err(failure) = &outcome {
            warn!(path, error = %failure, "write abandoned");
        }
        outcome.is_ok()
    }

    /// [`TableStore::read_table`], retrying transport failures
    pub async fn read_table_with_retry(
        &self,
        path: &str,
        policy: &RetryPolicy,
    ) -> StoreResult<Table> {
        retry_with_backoff(policy, is_transient, || self.read_table(path)).await
    }

    /// Temp objects orphaned beside `path` by failed moves
    pub async fn orphaned_temps(&self, path: &str) -> StoreResult<Vec<String>> {
        self.coordinator.orphaned_temps(path).await
    }

    /// Drop the cached table for `path`
    pub fn invalidate(&self, path: &str) {
        self.cache.invalidate(path);
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::StoreError;
    use crate::store::object_store::{InMemoryObjectStore, UploadMode};
    use crate::store::simulated_store::{SimulatedObjectStore, SimulatedStoreConfig};
    use crate::table::{record, Cell, CellKind, ColumnDef};

    fn store_with_clock() -> (
        InMemoryObjectStore,
        ManualClock,
        TableStore<InMemoryObjectStore, ManualClock>,
    ) {
        let backend = InMemoryObjectStore::new();
        let clock = ManualClock::new(1_700_000_000_000);
        let store = TableStore::with_clock(backend.clone(), clock.clone());
        (backend, clock, store)
    }

    fn sample() -> Table {
        Table::from_records(vec![
            record([("Name", Cell::from("alpha")), ("Amount", Cell::from(10.5))]),
            record([("Name", Cell::from("beta")), ("Amount", Cell::from(2.0))]),
        ])
    }

    #[tokio::test]
    async fn test_missing_path_reads_empty() {
        let (_, _, store) = store_with_clock();
        assert!(store.read_table("/audit/none.sheet").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let (_, _, store) = store_with_clock();
        assert!(store.write_table("/t", &sample()).await);
        assert_eq!(store.read_table("/t").await.unwrap(), sample());
    }

    #[tokio::test]
    async fn test_corrupt_object_is_parse_error() {
        let (backend, _, store) = store_with_clock();
        backend
            .upload_object("/t", b"not a table", UploadMode::Overwrite)
            .await
            .unwrap();
        let err = store.read_table("/t").await.unwrap_err();
        assert!(matches!(err, StoreError::Parse(_)));
    }

    #[tokio::test]
    async fn test_cached_read_is_stale_until_ttl() {
        let (backend, clock, store) = store_with_clock();
        let other = TableStore::with_clock(backend.session(), clock.clone());

        assert!(store.read_table("/t").await.unwrap().is_empty());
        assert!(other.write_table("/t", &sample()).await);

        // Another process wrote; this handle still serves its cached read
        assert!(store.read_table("/t").await.unwrap().is_empty());
        clock.advance(DEFAULT_CACHE_TTL);
        assert_eq!(store.read_table("/t").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_own_write_invalidates_cache() {
        let (_, _, store) = store_with_clock();
        assert!(store.read_table("/t").await.unwrap().is_empty());
        assert!(store.write_table("/t", &sample()).await);
        assert_eq!(store.read_table("/t").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_append_records() {
        let (_, _, store) = store_with_clock();
        assert!(store.append_records("/t", sample().into_records()).await.unwrap());
        assert!(store
            .append_records("/t", vec![record([("Name", "gamma")])])
            .await
            .unwrap());

        let table = store.read_table("/t").await.unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.records()[2]["Name"], Cell::from("gamma"));
        assert!(table.records()[2]["Amount"].is_null());
    }

    #[tokio::test]
    async fn test_append_checked_rejects_before_io() {
        let (backend, _, store) = store_with_clock();
        let schema = Schema::new(vec![
            ColumnDef::new("Name", CellKind::String),
            ColumnDef::new("Amount", CellKind::Number),
        ]);

        let err = store
            .append_checked("/t", &schema, vec![record([("Name", "x")])])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Schema(_)));
        assert!(backend.is_empty());

        assert!(store
            .append_checked("/t", &schema, sample().into_records())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_failed_write_returns_false() {
        let config = SimulatedStoreConfig {
            upload_fail_prob: 1.0,
            ..SimulatedStoreConfig::no_faults()
        };
        let backend = SimulatedObjectStore::new(InMemoryObjectStore::new(), 3, config);
        let store = TableStore::with_clock(backend, ManualClock::new(0));
        assert!(!store.write_table("/t", &sample()).await);
    }

    #[tokio::test]
    async fn test_write_with_retry() {
        let config = SimulatedStoreConfig {
            upload_fail_prob: 1.0,
            ..SimulatedStoreConfig::no_faults()
        };
        let inner = InMemoryObjectStore::new();
        let backend = Arc::new(SimulatedObjectStore::new(inner.clone(), 3, config));
        let store = TableStore::with_clock(Arc::clone(&backend), ManualClock::new(0));

        let policy = RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(1), 1.0);
        assert!(!store.write_table_with_retry("/t", &sample(), &policy).await);
        assert_eq!(backend.stats().upload_attempts, 6);

        let backend = SimulatedObjectStore::new(inner, 3, SimulatedStoreConfig::no_faults());
        let store = TableStore::with_clock(backend, ManualClock::new(0));
        assert!(store.write_table_with_retry("/t", &sample(), &policy).await);
    }
}
