//! Deterministic Simulation Testing for the Two-Phase Write
//!
//! Drives a [`TableStore`] over a fault-injecting store with a seeded
//! workload of writes, appends and reads, and checks every read against a
//! shadow model of what each path may legitimately hold.
//!
//! ```text
//! for seed in 0..N {
//!     let mut harness = WriteDstHarness::new(DstConfig::moderate(seed));
//!     harness.run(500).await;
//!     harness.check_invariants().await;   // violations carry the seed
//! }
//! ```
//!
//! Invariants:
//! - a read never fails to parse (no torn or half-written table)
//! - a read returns the last completed write, or after a failed write the
//!   prior content, the attempted content or an empty table
//! - every temp object reported orphaned by a failed move is still in the
//!   store and is listed by the orphan report

use crate::clock::ManualClock;
use crate::error::StoreError;
use crate::store::object_store::InMemoryObjectStore;
use crate::store::simulated_store::{
    SimulatedObjectStore, SimulatedStoreConfig, SimulatedStoreStats,
};
use crate::store::table_store::TableStore;
use crate::store::write_coordinator::{TimestampTempNamer, WriteFailure, WritePath};
use crate::table::{record, Cell, Record, Table};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for a DST run
#[derive(Debug, Clone)]
pub struct DstConfig {
    pub seed: u64,
    pub store_config: SimulatedStoreConfig,
    /// Number of distinct table paths
    pub path_count: usize,
    pub read_probability: f64,
    pub append_probability: f64,
    pub max_rows_per_write: usize,
}

impl Default for DstConfig {
    fn default() -> Self {
        DstConfig {
            seed: 0,
            store_config: SimulatedStoreConfig::default(),
            path_count: 3,
            read_probability: 0.4,
            append_probability: 0.3,
            max_rows_per_write: 8,
        }
    }
}

impl DstConfig {
    pub fn new(seed: u64) -> Self {
        DstConfig {
            seed,
            ..Default::default()
        }
    }

    /// No faults
    pub fn calm(seed: u64) -> Self {
        DstConfig {
            seed,
            store_config: SimulatedStoreConfig::no_faults(),
            ..Default::default()
        }
    }

    pub fn moderate(seed: u64) -> Self {
        DstConfig {
            seed,
            store_config: SimulatedStoreConfig::default(),
            ..Default::default()
        }
    }

    pub fn chaos(seed: u64) -> Self {
        DstConfig {
            seed,
            store_config: SimulatedStoreConfig::high_chaos(),
            ..Default::default()
        }
    }
}

/// Workload operation
#[derive(Debug, Clone)]
pub enum DstOperation {
    Write { path: String, rows: usize },
    Append { path: String, rows: usize },
    Read { path: String },
}

/// Result of a DST run
#[derive(Debug, Clone)]
pub struct DstResult {
    pub seed: u64,
    pub total_operations: u64,
    pub successful_operations: u64,
    /// Operations that failed under injected faults
    pub failed_operations: u64,
    pub reads_checked: u64,
    pub in_place_writes: u64,
    pub replaced_writes: u64,
    /// Temp objects left by failed moves
    pub orphaned_temps: Vec<String>,
    pub store_stats: SimulatedStoreStats,
    pub invariant_violations: Vec<String>,
}

impl DstResult {
    pub fn new(seed: u64) -> Self {
        DstResult {
            seed,
            total_operations: 0,
            successful_operations: 0,
            failed_operations: 0,
            reads_checked: 0,
            in_place_writes: 0,
            replaced_writes: 0,
            orphaned_temps: Vec::new(),
            store_stats: SimulatedStoreStats::default(),
            invariant_violations: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.invariant_violations.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "Seed {}: {} ops ({} ok, {} failed), {} reads checked, {} in-place, {} replaced, {} orphans, {} violations",
            self.seed,
            self.total_operations,
            self.successful_operations,
            self.failed_operations,
            self.reads_checked,
            self.in_place_writes,
            self.replaced_writes,
            self.orphaned_temps.len(),
            self.invariant_violations.len()
        )
    }
}

type DstStore = Arc<SimulatedObjectStore<InMemoryObjectStore>>;

/// Harness running one seed
pub struct WriteDstHarness {
    config: DstConfig,
    rng: ChaCha8Rng,
    clock: ManualClock,
    sim: DstStore,
    inner: InMemoryObjectStore,
    tables: TableStore<DstStore, ManualClock>,
    /// Tables each path may hold; a single entry once the state is known
    shadow: HashMap<String, Vec<Table>>,
    next_row_id: u64,
    result: DstResult,
}

impl WriteDstHarness {
    pub fn new(config: DstConfig) -> Self {
        let inner = InMemoryObjectStore::new();
        let sim = Arc::new(SimulatedObjectStore::new(
            inner.clone(),
            config.seed.wrapping_add(1),
            config.store_config.clone(),
        ));
        let clock = ManualClock::new(1_700_000_000_000);
        // Zero TTL: every read reaches the store
        let tables = TableStore::with_clock(Arc::clone(&sim), clock.clone())
            .with_cache_ttl(Duration::ZERO)
            .with_temp_namer(Arc::new(TimestampTempNamer::with_nonce(
                clock.clone(),
                config.seed,
            )));

        WriteDstHarness {
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            result: DstResult::new(config.seed),
            config,
            clock,
            sim,
            inner,
            tables,
            shadow: HashMap::new(),
            next_row_id: 0,
        }
    }

    pub fn next_operation(&mut self) -> DstOperation {
        let path = format!("/dst/table_{}.sheet", self.rng.gen_range(0..self.config.path_count));
        let roll: f64 = self.rng.gen();
        let rows = self.rng.gen_range(1..=self.config.max_rows_per_write);

        if roll < self.config.read_probability {
            DstOperation::Read { path }
        } else if roll < self.config.read_probability + self.config.append_probability {
            DstOperation::Append { path, rows }
        } else {
            DstOperation::Write { path, rows }
        }
    }

    pub async fn run(&mut self, operations: usize) {
        for _ in 0..operations {
            let op = self.next_operation();
            self.execute(op).await;
            self.clock.advance(Duration::from_millis(10));
        }
    }

    async fn execute(&mut self, op: DstOperation) {
        self.result.total_operations += 1;
        let ok = match op {
            DstOperation::Read { path } => self.read_and_check(&path).await.is_some(),
            DstOperation::Write { path, rows } => {
                let table = self.generate_rows(rows);
                self.write(&path, table).await
            }
            DstOperation::Append { path, rows } => match self.read_and_check(&path).await {
                Some(mut base) => {
                    base.extend(self.generate_rows(rows).into_records());
                    self.write(&path, base).await
                }
                None => false,
            },
        };
        if ok {
            self.result.successful_operations += 1;
        } else {
            self.result.failed_operations += 1;
        }
    }

    fn generate_rows(&mut self, rows: usize) -> Table {
        let records: Vec<Record> = (0..rows)
            .map(|_| {
                self.next_row_id += 1;
                let cents: u32 = self.rng.gen_range(0..1_000_000);
                record([
                    ("id", Cell::from(self.next_row_id as i64)),
                    ("amount", Cell::from(cents as f64 / 100.0)),
                    ("flag", Cell::from(self.rng.gen_bool(0.5))),
                    ("name", Cell::from(format!("row-{}", self.next_row_id))),
                ])
            })
            .collect();
        Table::from_records(records)
    }

    fn candidates(&self, path: &str) -> Vec<Table> {
        self.shadow
            .get(path)
            .cloned()
            .unwrap_or_else(|| vec![Table::new()])
    }

    /// Read `path` and check it against the shadow. `None` if the read failed.
    async fn read_and_check(&mut self, path: &str) -> Option<Table> {
        match self.tables.read_table(path).await {
            Ok(table) => {
                self.result.reads_checked += 1;
                let candidates = self.candidates(path);
                if !candidates.iter().any(|c| *c == table) {
                    self.result.invariant_violations.push(format!(
                        "seed {}: read of {} returned {} rows matching none of {} candidates",
                        self.config.seed,
                        path,
                        table.len(),
                        candidates.len()
                    ));
                }
                // The state is known again
                self.shadow.insert(path.to_string(), vec![table.clone()]);
                Some(table)
            }
            Err(StoreError::Parse(msg)) => {
                self.result.invariant_violations.push(format!(
                    "seed {}: read of {} failed to parse: {}",
                    self.config.seed, path, msg
                ));
                None
            }
            Err(_) => None,
        }
    }

    async fn write(&mut self, path: &str, table: Table) -> bool {
        let outcome = match self.tables.write_table_report(path, &table).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.result
                    .invariant_violations
                    .push(format!("seed {}: encode failed: {}", self.config.seed, e));
                return false;
            }
        };

        match outcome {
            Ok(write_path) => {
                match write_path {
                    WritePath::InPlace => self.result.in_place_writes += 1,
                    WritePath::Replaced => self.result.replaced_writes += 1,
                }
                self.shadow.insert(path.to_string(), vec![table]);
                true
            }
            Err(failure) => {
                if let WriteFailure::Move { temp_path, .. } = &failure {
                    self.result.orphaned_temps.push(temp_path.clone());
                }
                let mut candidates = self.candidates(path);
                candidates.push(table);
                candidates.push(Table::new());
                candidates.dedup();
                self.shadow.insert(path.to_string(), candidates);
                false
            }
        }
    }

    /// Final checks, run against the fault-free inner store
    pub async fn check_invariants(&mut self) {
        let checker = TableStore::with_clock(self.inner.session(), self.clock.clone())
            .with_cache_ttl(Duration::ZERO);

        let mut paths: Vec<String> = self.shadow.keys().cloned().collect();
        paths.sort();
        for path in &paths {
            match checker.read_table(path).await {
                Ok(table) => {
                    if !self.candidates(path).iter().any(|c| *c == table) {
                        self.result.invariant_violations.push(format!(
                            "seed {}: final content of {} matches no candidate",
                            self.config.seed, path
                        ));
                    }
                }
                Err(e) => self.result.invariant_violations.push(format!(
                    "seed {}: final read of {} failed: {}",
                    self.config.seed, path, e
                )),
            }
        }

        for temp in &self.result.orphaned_temps {
            if !self.inner.contains(temp) {
                self.result.invariant_violations.push(format!(
                    "seed {}: reported orphan {} is not in the store",
                    self.config.seed, temp
                ));
            }
        }
        for path in &paths {
            let listed = checker.orphaned_temps(path).await.unwrap_or_default();
            for temp in self
                .result
                .orphaned_temps
                .iter()
                .filter(|t| t.starts_with(path.as_str()))
            {
                if !listed.contains(temp) {
                    self.result.invariant_violations.push(format!(
                        "seed {}: orphan report for {} misses {}",
                        self.config.seed, path, temp
                    ));
                }
            }
        }

        self.result.store_stats = self.sim.stats();
    }

    pub fn result(&self) -> &DstResult {
        &self.result
    }

    pub fn into_result(self) -> DstResult {
        self.result
    }
}

/// Run a batch of seeds
pub async fn run_dst_batch(
    base_seed: u64,
    count: usize,
    ops_per_run: usize,
    config_fn: impl Fn(u64) -> DstConfig,
) -> Vec<DstResult> {
    let mut results = Vec::with_capacity(count);
    for i in 0..count {
        let mut harness = WriteDstHarness::new(config_fn(base_seed + i as u64));
        harness.run(ops_per_run).await;
        harness.check_invariants().await;
        results.push(harness.into_result());
    }
    results
}

pub fn summarize_batch(results: &[DstResult]) -> String {
    let passed = results.iter().filter(|r| r.is_success()).count();
    let failed_seeds: Vec<u64> = results
        .iter()
        .filter(|r| !r.is_success())
        .map(|r| r.seed)
        .collect();
    let total_ops: u64 = results.iter().map(|r| r.total_operations).sum();
    let replaced: u64 = results.iter().map(|r| r.replaced_writes).sum();
    let orphans: usize = results.iter().map(|r| r.orphaned_temps.len()).sum();

    let mut summary = format!(
        "Batch: {}/{} passed, {} total ops, {} replaced writes, {} orphans",
        passed,
        results.len(),
        total_ops,
        replaced,
        orphans
    );
    if !failed_seeds.is_empty() {
        summary.push_str(&format!("\nFailed seeds: {:?}", failed_seeds));
    }
    summary
}
