//! Table persistence over an object store
//!
//! ```text
//! TableStore ──read──► ReadCache ──miss──► ObjectStore::download ─► TableCodec::decode
//!            ──write─► TableCodec::encode ─► WriteCoordinator ─► ObjectStore
//! ```

pub mod dst;
pub mod object_store;
pub mod read_cache;
#[cfg(feature = "remote")]
pub mod remote;
pub mod simulated_store;
pub mod table_store;
pub mod write_coordinator;

pub use dst::{DstConfig, DstResult, WriteDstHarness};
pub use object_store::{
    InMemoryObjectStore, LocalFsObjectStore, ObjectMeta, ObjectStore, StoreFuture, UploadMode,
};
pub use read_cache::{CacheStats, ReadCache};
#[cfg(feature = "remote")]
pub use remote::{RemoteCredentials, RemoteEndpoints, RemoteObjectStore};
pub use simulated_store::{SimulatedObjectStore, SimulatedStoreConfig, SimulatedStoreStats};
pub use table_store::{TableStore, DEFAULT_CACHE_TTL};
pub use write_coordinator::{
    TempNamer, TimestampTempNamer, WriteCoordinator, WriteFailure, WritePath,
};
