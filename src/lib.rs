//! Tabular records persisted as whole-file blobs in an object store.
//!
//! A table is read, mutated in memory and rewritten in full. Writes try an
//! in-place revision-checked update first and fall back to temp upload,
//! delete and rename. Reads of hot tables go through a TTL cache.

pub mod activity_log;
pub mod clock;
pub mod config;
pub mod error;
pub mod observability;
pub mod retry;
pub mod store;
pub mod table;

pub use activity_log::{ActivityEvent, ActivityLog};
pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use config::{open_store, BackendKind, StoreConfig};
pub use error::{StoreError, StoreResult};
pub use retry::RetryPolicy;
pub use store::{
    InMemoryObjectStore, LocalFsObjectStore, ObjectStore, TableStore, UploadMode, WriteFailure,
    WritePath,
};
pub use table::{record, Cell, Record, Schema, Table, TableCodec};
