//! In-memory tables and their binary encoding.

pub mod cell;
pub mod codec;
pub mod schema;

pub use cell::{record, Cell, CellKind, Record, Table, DATE_FORMAT};
pub use codec::{EncoderHook, EncoderKind, TableCodec, DEFAULT_FAST_THRESHOLD};
pub use schema::{ColumnDef, Schema};
