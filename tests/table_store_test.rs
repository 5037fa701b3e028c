//! Table Store Integration Tests
//!
//! End-to-end behaviour of read, write and append through the public
//! surface, over the in-memory store and the fault-injecting wrapper.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tablestore::store::{SimulatedObjectStore, SimulatedStoreConfig, TableStore, WritePath};
use tablestore::table::{record, Cell, EncoderKind, Table, TableCodec};
use tablestore::{InMemoryObjectStore, ManualClock, ObjectStore};

const PATH: &str = "/audit/master_data.sheet";

fn new_store() -> TableStore<InMemoryObjectStore, ManualClock> {
    TableStore::with_clock(InMemoryObjectStore::new(), ManualClock::new(1_700_000_000_000))
}

fn suppliers() -> Table {
    Table::from_records(vec![
        record([
            ("Supplier", Cell::from("Acme")),
            ("Amount", Cell::from(1234.5678)),
            ("Approved", Cell::from(true)),
        ]),
        record([
            ("Supplier", Cell::from("Globex")),
            ("Amount", Cell::from(0.005)),
            ("Approved", Cell::from(false)),
        ]),
    ])
}

// =============================================================================
// Reads
// =============================================================================

#[tokio::test]
async fn test_missing_path_reads_as_empty_table() {
    let store = new_store();
    let table = store.read_table("/audit/never_written.sheet").await.unwrap();
    assert_eq!(table.len(), 0);
}

// =============================================================================
// Round trip and idempotence
// =============================================================================

#[tokio::test]
async fn test_round_trip_up_to_rounding() {
    let store = new_store();
    assert!(store.write_table(PATH, &suppliers()).await);

    let read = store.read_table(PATH).await.unwrap();
    let expected: Vec<_> = suppliers()
        .records()
        .iter()
        .map(|r| r.iter().map(|(k, v)| (k.clone(), v.rounded())).collect())
        .collect();
    assert_eq!(read.records(), expected.as_slice());
    assert_eq!(read.records()[0]["Amount"], Cell::Number(1234.57));
    assert_eq!(read.records()[1]["Amount"], Cell::Number(0.01));
}

#[tokio::test]
async fn test_extreme_numbers_round_trip_unchanged() {
    let store = new_store();
    let extremes = Table::from_records(vec![
        record([("Amount", Cell::from(1e307))]),
        record([("Amount", Cell::from(-f64::MAX))]),
        record([("Amount", Cell::from(9_007_199_254_740_994.0))]),
    ]);
    assert!(store.write_table(PATH, &extremes).await);
    assert_eq!(store.read_table(PATH).await.unwrap(), extremes);
}

#[tokio::test]
async fn test_ragged_table_round_trips_normalized() {
    let store = new_store();
    let ragged = Table::from_records(vec![
        record([("a", Cell::from(1.0))]),
        record([("b", Cell::from("x"))]),
    ]);
    assert!(store.write_table(PATH, &ragged).await);
    assert_eq!(store.read_table(PATH).await.unwrap(), ragged.normalized());
}

#[tokio::test]
async fn test_double_write_does_not_duplicate() {
    let store = new_store();
    assert!(store.write_table(PATH, &suppliers()).await);
    assert!(store.write_table(PATH, &suppliers()).await);

    let read = store.read_table(PATH).await.unwrap();
    assert_eq!(read.len(), suppliers().len());
    assert_eq!(store.store().paths(), vec![PATH.to_string()]);
}

#[tokio::test]
async fn test_column_set_may_change_between_writes() {
    let store = new_store();
    assert!(store.write_table(PATH, &suppliers()).await);

    let other = Table::from_records(vec![record([("Period", "2024-Q1")])]);
    assert!(store.write_table(PATH, &other).await);
    assert_eq!(store.read_table(PATH).await.unwrap(), other);
}

// =============================================================================
// Fallback path
// =============================================================================

#[tokio::test]
async fn test_forced_fallback_still_completes() {
    let inner = InMemoryObjectStore::new();
    let sim = SimulatedObjectStore::new(inner.clone(), 11, SimulatedStoreConfig::forced_fallback());
    let store = TableStore::with_clock(sim, ManualClock::new(0));

    assert!(store.write_table(PATH, &suppliers()).await);
    let updated = Table::from_records(vec![record([("Supplier", "Initech")])]);
    let outcome = store.write_table_report(PATH, &updated).await.unwrap();
    assert_eq!(outcome.unwrap(), WritePath::Replaced);

    assert_eq!(store.read_table(PATH).await.unwrap(), updated);
    assert_eq!(inner.paths(), vec![PATH.to_string()]);
    assert!(store.store().stats().update_conflicts >= 2);
}

#[tokio::test]
async fn test_second_write_goes_in_place() {
    let store = new_store();
    let first = store.write_table_report(PATH, &suppliers()).await.unwrap();
    let second = store.write_table_report(PATH, &suppliers()).await.unwrap();
    assert_eq!(first.unwrap(), WritePath::Replaced);
    assert_eq!(second.unwrap(), WritePath::InPlace);
}

// =============================================================================
// Cache
// =============================================================================

#[tokio::test]
async fn test_ttl_bounds_staleness_across_processes() {
    let backend = InMemoryObjectStore::new();
    let clock = ManualClock::new(0);
    let reader = TableStore::with_clock(backend.clone(), clock.clone())
        .with_cache_ttl(Duration::from_secs(60));
    let writer = TableStore::with_clock(backend.session(), clock.clone());

    assert!(writer.write_table(PATH, &suppliers()).await);
    assert_eq!(reader.read_table(PATH).await.unwrap().len(), 2);

    assert!(writer.write_table(PATH, &Table::new()).await);
    clock.advance(Duration::from_secs(59));
    assert_eq!(reader.read_table(PATH).await.unwrap().len(), 2);

    clock.advance(Duration::from_secs(1));
    assert_eq!(reader.read_table(PATH).await.unwrap().len(), 0);

    let stats = reader.cache_stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.loads, 2);
}

#[tokio::test]
async fn test_read_errors_propagate() {
    let config = SimulatedStoreConfig {
        download_fail_prob: 1.0,
        ..SimulatedStoreConfig::no_faults()
    };
    let store = TableStore::with_clock(
        SimulatedObjectStore::new(InMemoryObjectStore::new(), 5, config),
        ManualClock::new(0),
    );
    assert!(store.read_table(PATH).await.unwrap_err().is_transient());
    assert!(store
        .append_records(PATH, suppliers().into_records())
        .await
        .is_err());
}

// =============================================================================
// Encoder selection
// =============================================================================

#[tokio::test]
async fn test_encoder_selection_through_the_store() {
    let seen = Arc::new(Mutex::new(Vec::<(EncoderKind, usize)>::new()));
    let sink = Arc::clone(&seen);
    let codec = TableCodec::default()
        .with_hook(Arc::new(move |kind: EncoderKind, rows: usize| sink.lock().push((kind, rows))));
    let store = new_store().with_codec(codec);

    let rows = |n: usize| {
        Table::from_records(
            (0..n)
                .map(|i| record([("n", Cell::from(i as i64))]))
                .collect(),
        )
    };
    assert!(store.write_table("/small.sheet", &rows(10)).await);
    assert!(store.write_table("/large.sheet", &rows(5000)).await);

    assert_eq!(
        *seen.lock(),
        vec![(EncoderKind::Fast, 10), (EncoderKind::Streaming, 5000)]
    );
    assert_eq!(store.read_table("/large.sheet").await.unwrap().len(), 5000);
}

#[tokio::test]
async fn test_local_backend_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let backend = tablestore::LocalFsObjectStore::new(dir.path().to_path_buf());
    let store = TableStore::with_clock(backend, ManualClock::new(0));

    assert!(store.write_table(PATH, &suppliers()).await);
    assert!(store.write_table(PATH, &suppliers()).await);
    assert_eq!(store.read_table(PATH).await.unwrap().len(), 2);
    assert_eq!(
        store.store().list_folder("/audit").await.unwrap(),
        vec!["master_data.sheet"]
    );
}
