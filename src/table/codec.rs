//! Table Codec
//!
//! Serializes a [`Table`] into a single-sheet binary container and back.
//!
//! ## Container Layout
//!
//! ```text
//! ┌──────────────────────────────────┐
//! │ Header (6 bytes)                 │
//! │ - magic: "TSHT"                  │
//! │ - version: u8                    │
//! │ - flags: u8 (reserved, 0)        │
//! ├──────────────────────────────────┤
//! │ Sheet (bincode)                  │
//! │ - row 0: column names            │
//! │ - rows: typed cells              │
//! ├──────────────────────────────────┤
//! │ Footer (8 bytes)                 │
//! │ - checksum: crc32 of all above   │
//! │ - footer_magic: "THST"           │
//! └──────────────────────────────────┘
//! ```
//!
//! Two encoders produce the same bytes. The fast encoder materializes the
//! whole sheet and serializes it in one pass; the streaming encoder
//! serializes row by row through a checksumming writer and never holds more
//! than one converted row. Which one runs is decided by row count.

use crate::error::{StoreError, StoreResult};
use crate::table::cell::{Cell, Record, Table, DATE_FORMAT};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::{BufWriter, Write};
use std::sync::Arc;
use tracing::debug;

/// Container magic number
pub const SHEET_MAGIC: [u8; 4] = *b"TSHT";
/// Reversed magic for footer validation
pub const FOOTER_MAGIC: [u8; 4] = *b"THST";
/// Current container version
pub const SHEET_VERSION: u8 = 1;
/// Row count at which encoding switches to the streaming encoder
pub const DEFAULT_FAST_THRESHOLD: usize = 1000;

const HEADER_SIZE: usize = 6;
const FOOTER_SIZE: usize = 8;

/// Cell as stored in the container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum WireCell {
    Text(String),
    Number(f64),
    Bool(bool),
    Empty,
    Date(String),
}

impl WireCell {
    fn from_cell(cell: Option<&Cell>) -> WireCell {
        match cell.map(Cell::rounded) {
            Some(Cell::String(s)) => WireCell::Text(s),
            Some(Cell::Number(n)) => WireCell::Number(n),
            Some(Cell::Bool(b)) => WireCell::Bool(b),
            Some(Cell::Date(d)) => WireCell::Date(d.format(DATE_FORMAT).to_string()),
            Some(Cell::Null) | None => WireCell::Empty,
        }
    }

    fn into_cell(self) -> StoreResult<Cell> {
        Ok(match self {
            WireCell::Text(s) => Cell::String(s),
            WireCell::Number(n) => Cell::Number(n),
            WireCell::Bool(b) => Cell::Bool(b),
            WireCell::Empty => Cell::Null,
            WireCell::Date(s) => Cell::Date(
                NaiveDateTime::parse_from_str(&s, DATE_FORMAT)
                    .map_err(|e| StoreError::Parse(format!("bad date cell '{}': {}", s, e)))?,
            ),
        })
    }
}

/// Which encoder handled a table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncoderKind {
    /// Single in-memory pass, for small tables
    Fast,
    /// Row-at-a-time, for large tables
    Streaming,
}

/// Observer called with the selected encoder and the table's row count
pub type EncoderHook = Arc<dyn Fn(EncoderKind, usize) + Send + Sync>;

/// Encodes and decodes tables
#[derive(Clone)]
pub struct TableCodec {
    fast_threshold: usize,
    hook: Option<EncoderHook>,
}

impl Default for TableCodec {
    fn default() -> Self {
        TableCodec::new(DEFAULT_FAST_THRESHOLD)
    }
}

impl std::fmt::Debug for TableCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableCodec")
            .field("fast_threshold", &self.fast_threshold)
            .field("hook", &self.hook.is_some())
            .finish()
    }
}

impl TableCodec {
    /// Tables with fewer than `fast_threshold` rows use the fast encoder
    pub fn new(fast_threshold: usize) -> Self {
        TableCodec {
            fast_threshold,
            hook: None,
        }
    }

    /// Install an observer of encoder selection
    pub fn with_hook(mut self, hook: EncoderHook) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn fast_threshold(&self) -> usize {
        self.fast_threshold
    }

    pub fn select_encoder(&self, row_count: usize) -> EncoderKind {
        if row_count < self.fast_threshold {
            EncoderKind::Fast
        } else {
            EncoderKind::Streaming
        }
    }

    /// Encode a table. Numbers are rounded to two decimals first.
    pub fn encode(&self, table: &Table) -> StoreResult<Vec<u8>> {
        let kind = self.select_encoder(table.len());
        debug!(rows = table.len(), encoder = ?kind, "encoding table");
        if let Some(hook) = &self.hook {
            hook(kind, table.len());
        }
        self.encode_with(kind, table)
    }

    /// Encode with a specific encoder, bypassing selection
    pub fn encode_with(&self, kind: EncoderKind, table: &Table) -> StoreResult<Vec<u8>> {
        match kind {
            EncoderKind::Fast => encode_fast(table),
            EncoderKind::Streaming => {
                let mut out = Vec::new();
                encode_streaming(table, &mut out)?;
                Ok(out)
            }
        }
    }

    /// Decode container bytes. Empty input is an empty table.
    pub fn decode(&self, bytes: &[u8]) -> StoreResult<Table> {
        decode(bytes)
    }
}

fn to_row(columns: &[String], record: &Record) -> Vec<WireCell> {
    columns
        .iter()
        .map(|c| WireCell::from_cell(record.get(c)))
        .collect()
}

fn header() -> [u8; HEADER_SIZE] {
    let mut h = [0u8; HEADER_SIZE];
    h[..4].copy_from_slice(&SHEET_MAGIC);
    h[4] = SHEET_VERSION;
    h
}

fn encode_fast(table: &Table) -> StoreResult<Vec<u8>> {
    let columns = table.columns();
    let rows: Vec<Vec<WireCell>> = table
        .records()
        .iter()
        .map(|r| to_row(&columns, r))
        .collect();

    let mut buf = Vec::with_capacity(HEADER_SIZE + FOOTER_SIZE + table.len() * 32);
    buf.extend_from_slice(&header());
    bincode::serialize_into(&mut buf, &(&columns, &rows))?;

    let checksum = crc32fast::hash(&buf);
    buf.extend_from_slice(&checksum.to_le_bytes());
    buf.extend_from_slice(&FOOTER_MAGIC);
    Ok(buf)
}

/// Writer that checksums everything passing through it
struct ChecksumWriter<W: Write> {
    inner: W,
    hasher: crc32fast::Hasher,
}

impl<W: Write> Write for ChecksumWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

fn encode_streaming<W: Write>(table: &Table, writer: W) -> StoreResult<()> {
    let columns = table.columns();
    let mut out = ChecksumWriter {
        inner: BufWriter::with_capacity(64 * 1024, writer),
        hasher: crc32fast::Hasher::new(),
    };

    out.write_all(&header())?;
    // Same layout bincode gives `(columns, rows)` in one call: the column
    // vector, then the row count as u64, then each row.
    bincode::serialize_into(&mut out, &columns)?;
    bincode::serialize_into(&mut out, &(table.len() as u64))?;
    for record in table.records() {
        bincode::serialize_into(&mut out, &to_row(&columns, record))?;
    }

    let checksum = out.hasher.finalize();
    let mut inner = out.inner;
    inner.write_all(&checksum.to_le_bytes())?;
    inner.write_all(&FOOTER_MAGIC)?;
    inner.flush()?;
    Ok(())
}

fn decode(bytes: &[u8]) -> StoreResult<Table> {
    if bytes.is_empty() {
        return Ok(Table::new());
    }
    if bytes.len() < HEADER_SIZE + FOOTER_SIZE {
        return Err(StoreError::Parse(format!(
            "container too short: {} bytes",
            bytes.len()
        )));
    }
    if bytes[..4] != SHEET_MAGIC {
        return Err(StoreError::Parse("invalid container magic".to_string()));
    }
    if bytes[4] != SHEET_VERSION {
        return Err(StoreError::Parse(format!(
            "unsupported container version: {}",
            bytes[4]
        )));
    }

    let footer_start = bytes.len() - FOOTER_SIZE;
    if bytes[footer_start + 4..] != FOOTER_MAGIC {
        return Err(StoreError::Parse("invalid footer magic".to_string()));
    }
    let mut stored = [0u8; 4];
    stored.copy_from_slice(&bytes[footer_start..footer_start + 4]);
    let expected = u32::from_le_bytes(stored);
    let actual = crc32fast::hash(&bytes[..footer_start]);
    if expected != actual {
        return Err(StoreError::Parse(format!(
            "checksum mismatch: expected {:08x}, got {:08x}",
            expected, actual
        )));
    }

    let (columns, rows): (Vec<String>, Vec<Vec<WireCell>>) =
        bincode::deserialize(&bytes[HEADER_SIZE..footer_start])?;

    let mut seen = HashSet::new();
    if let Some(dup) = columns.iter().find(|c| !seen.insert(c.as_str())) {
        return Err(StoreError::Parse(format!("duplicate column '{}'", dup)));
    }

    let mut records = Vec::with_capacity(rows.len());
    for (i, row) in rows.into_iter().enumerate() {
        if row.len() != columns.len() {
            return Err(StoreError::Parse(format!(
                "row {} has {} cells, header has {}",
                i + 1,
                row.len(),
                columns.len()
            )));
        }
        let record = columns
            .iter()
            .cloned()
            .zip(row)
            .map(|(name, cell)| Ok((name, cell.into_cell()?)))
            .collect::<StoreResult<Record>>()?;
        records.push(record);
    }
    Ok(Table::from_records(records))
}
