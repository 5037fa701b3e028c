//! Simulated Object Store with Fault Injection
//!
//! Wraps another store and injects failures drawn from a seeded RNG, so a
//! failing run can be replayed from its seed. Two switches force specific
//! failures deterministically: conflicting in-place updates and failing
//! moves.

use crate::error::StoreError;
use crate::store::object_store::{ObjectMeta, ObjectStore, StoreFuture, UploadMode};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Fault probabilities for the simulated store
#[derive(Debug, Clone)]
pub struct SimulatedStoreConfig {
    /// Probability of a download failing
    pub download_fail_prob: f64,
    /// Probability of a download returning a flipped byte
    pub download_corrupt_prob: f64,
    /// Probability of an upload failing before it is applied
    pub upload_fail_prob: f64,
    /// Probability of an upload being applied but reported as a timeout
    pub ambiguous_upload_prob: f64,
    /// Probability of an `UpdateExisting` upload being rejected as a conflict
    pub update_conflict_prob: f64,
    /// Probability of a delete failing
    pub delete_fail_prob: f64,
    /// Probability of a move failing
    pub move_fail_prob: f64,
    /// Simulated latency range in microseconds (min, max)
    pub latency_range_us: (u64, u64),
    /// Reject every `UpdateExisting` upload
    pub force_update_conflict: bool,
    /// Fail every move
    pub force_move_failure: bool,
}

impl Default for SimulatedStoreConfig {
    fn default() -> Self {
        SimulatedStoreConfig {
            download_fail_prob: 0.01,
            download_corrupt_prob: 0.0,
            upload_fail_prob: 0.01,
            ambiguous_upload_prob: 0.005,
            update_conflict_prob: 0.05,
            delete_fail_prob: 0.01,
            move_fail_prob: 0.01,
            latency_range_us: (0, 0),
            force_update_conflict: false,
            force_move_failure: false,
        }
    }
}

impl SimulatedStoreConfig {
    /// No faults - for baseline testing
    pub fn no_faults() -> Self {
        SimulatedStoreConfig {
            download_fail_prob: 0.0,
            download_corrupt_prob: 0.0,
            upload_fail_prob: 0.0,
            ambiguous_upload_prob: 0.0,
            update_conflict_prob: 0.0,
            delete_fail_prob: 0.0,
            move_fail_prob: 0.0,
            latency_range_us: (0, 0),
            force_update_conflict: false,
            force_move_failure: false,
        }
    }

    /// High chaos configuration for stress testing
    pub fn high_chaos() -> Self {
        SimulatedStoreConfig {
            download_fail_prob: 0.05,
            download_corrupt_prob: 0.0,
            upload_fail_prob: 0.05,
            ambiguous_upload_prob: 0.03,
            update_conflict_prob: 0.3,
            delete_fail_prob: 0.05,
            move_fail_prob: 0.05,
            latency_range_us: (0, 0),
            force_update_conflict: false,
            force_move_failure: false,
        }
    }

    /// Every in-place update conflicts, nothing else fails
    pub fn forced_fallback() -> Self {
        SimulatedStoreConfig {
            force_update_conflict: true,
            ..Self::no_faults()
        }
    }
}

/// Statistics for fault injection
#[derive(Debug, Clone, Default)]
pub struct SimulatedStoreStats {
    pub download_attempts: u64,
    pub download_failures: u64,
    pub download_corruptions: u64,
    pub upload_attempts: u64,
    pub upload_failures: u64,
    pub ambiguous_uploads: u64,
    pub update_conflicts: u64,
    pub delete_attempts: u64,
    pub delete_failures: u64,
    pub move_attempts: u64,
    pub move_failures: u64,
}

struct SimulatedStoreInner {
    rng: ChaCha8Rng,
    stats: SimulatedStoreStats,
}

/// Object store wrapper that injects faults
pub struct SimulatedObjectStore<S: ObjectStore> {
    inner_store: S,
    config: SimulatedStoreConfig,
    force_update_conflict: AtomicBool,
    force_move_failure: AtomicBool,
    state: Arc<Mutex<SimulatedStoreInner>>,
}

impl<S: ObjectStore> SimulatedObjectStore<S> {
    pub fn new(inner_store: S, seed: u64, config: SimulatedStoreConfig) -> Self {
        SimulatedObjectStore {
            inner_store,
            force_update_conflict: AtomicBool::new(config.force_update_conflict),
            force_move_failure: AtomicBool::new(config.force_move_failure),
            config,
            state: Arc::new(Mutex::new(SimulatedStoreInner {
                rng: ChaCha8Rng::seed_from_u64(seed),
                stats: SimulatedStoreStats::default(),
            })),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner_store
    }

    pub fn stats(&self) -> SimulatedStoreStats {
        self.state.lock().stats.clone()
    }

    pub fn reset_stats(&self) {
        self.state.lock().stats = SimulatedStoreStats::default();
    }

    pub fn set_force_update_conflict(&self, on: bool) {
        self.force_update_conflict.store(on, Ordering::SeqCst);
    }

    pub fn set_force_move_failure(&self, on: bool) {
        self.force_move_failure.store(on, Ordering::SeqCst);
    }

    fn roll(&self, probability: f64) -> bool {
        if probability <= 0.0 {
            return false;
        }
        self.state.lock().rng.gen_bool(probability.min(1.0))
    }

    fn record(&self, f: impl FnOnce(&mut SimulatedStoreStats)) {
        f(&mut self.state.lock().stats);
    }

    async fn latency(&self) {
        let (min, max) = self.config.latency_range_us;
        if max == 0 {
            return;
        }
        let us = if max > min {
            self.state.lock().rng.gen_range(min..max)
        } else {
            min
        };
        tokio::time::sleep(std::time::Duration::from_micros(us)).await;
    }
}

impl<S: ObjectStore> ObjectStore for SimulatedObjectStore<S> {
    fn download_object<'a>(&'a self, path: &'a str) -> StoreFuture<'a, Vec<u8>> {
        Box::pin(async move {
            self.record(|s| s.download_attempts += 1);
            self.latency().await;

            if self.roll(self.config.download_fail_prob) {
                self.record(|s| s.download_failures += 1);
                return Err(StoreError::Transport(format!(
                    "simulated download failure: {}",
                    path
                )));
            }

            let mut data = self.inner_store.download_object(path).await?;

            if !data.is_empty() && self.roll(self.config.download_corrupt_prob) {
                self.record(|s| s.download_corruptions += 1);
                let idx = self.state.lock().rng.gen_range(0..data.len());
                data[idx] ^= 0xFF;
            }
            Ok(data)
        })
    }

    fn upload_object<'a>(
        &'a self,
        path: &'a str,
        data: &'a [u8],
        mode: UploadMode,
    ) -> StoreFuture<'a, ObjectMeta> {
        Box::pin(async move {
            self.record(|s| s.upload_attempts += 1);
            self.latency().await;

            if mode == UploadMode::UpdateExisting
                && (self.force_update_conflict.load(Ordering::SeqCst)
                    || self.roll(self.config.update_conflict_prob))
            {
                self.record(|s| s.update_conflicts += 1);
                return Err(StoreError::Conflict(format!(
                    "simulated revision conflict: {}",
                    path
                )));
            }

            if self.roll(self.config.upload_fail_prob) {
                self.record(|s| s.upload_failures += 1);
                return Err(StoreError::Transport(format!(
                    "simulated upload failure: {}",
                    path
                )));
            }

            let meta = self.inner_store.upload_object(path, data, mode).await?;

            if self.roll(self.config.ambiguous_upload_prob) {
                self.record(|s| s.ambiguous_uploads += 1);
                return Err(StoreError::Transport(format!(
                    "simulated timeout after upload: {}",
                    path
                )));
            }
            Ok(meta)
        })
    }

    fn delete_object<'a>(&'a self, path: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.record(|s| s.delete_attempts += 1);
            if self.roll(self.config.delete_fail_prob) {
                self.record(|s| s.delete_failures += 1);
                return Err(StoreError::Transport(format!(
                    "simulated delete failure: {}",
                    path
                )));
            }
            self.inner_store.delete_object(path).await
        })
    }

    fn move_object<'a>(&'a self, from: &'a str, to: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.record(|s| s.move_attempts += 1);
            if self.force_move_failure.load(Ordering::SeqCst)
                || self.roll(self.config.move_fail_prob)
            {
                self.record(|s| s.move_failures += 1);
                return Err(StoreError::Transport(format!(
                    "simulated move failure: {} -> {}",
                    from, to
                )));
            }
            self.inner_store.move_object(from, to).await
        })
    }

    fn create_folder<'a>(&'a self, path: &'a str) -> StoreFuture<'a, ()> {
        self.inner_store.create_folder(path)
    }

    fn list_folder<'a>(&'a self, path: &'a str) -> StoreFuture<'a, Vec<String>> {
        self.inner_store.list_folder(path)
    }
}
