//! Cells, records and tables.

use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::BTreeMap;

/// Text layout used when a date cell is written or displayed
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// A single typed value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Cell {
    String(String),
    Number(f64),
    Bool(bool),
    Null,
    #[serde(serialize_with = "serialize_date")]
    Date(NaiveDateTime),
}

/// Kind of a cell, without its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellKind {
    String,
    Number,
    Bool,
    Null,
    Date,
}

impl Cell {
    pub fn kind(&self) -> CellKind {
        match self {
            Cell::String(_) => CellKind::String,
            Cell::Number(_) => CellKind::Number,
            Cell::Bool(_) => CellKind::Bool,
            Cell::Null => CellKind::Null,
            Cell::Date(_) => CellKind::Date,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Numbers rounded to two decimal places; non-finite numbers become `Null`.
    /// Every other cell is returned unchanged.
    pub fn rounded(&self) -> Cell {
        match self {
            Cell::Number(n) if n.is_finite() => Cell::Number(round2(*n)),
            Cell::Number(_) => Cell::Null,
            other => other.clone(),
        }
    }
}

/// Above 2^52 every f64 is already an integer.
const NO_FRACTION: f64 = 4_503_599_627_370_496.0;

pub(crate) fn round2(n: f64) -> f64 {
    if n.abs() >= NO_FRACTION {
        return n;
    }
    let scaled = n * 100.0;
    if !scaled.is_finite() {
        return n;
    }
    scaled.round() / 100.0
}

fn serialize_date<S>(date: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&date.format(DATE_FORMAT).to_string())
}

impl From<&str> for Cell {
    fn from(s: &str) -> Self {
        Cell::String(s.to_string())
    }
}

impl From<String> for Cell {
    fn from(s: String) -> Self {
        Cell::String(s)
    }
}

impl From<f64> for Cell {
    fn from(n: f64) -> Self {
        Cell::Number(n)
    }
}

impl From<i64> for Cell {
    fn from(n: i64) -> Self {
        Cell::Number(n as f64)
    }
}

impl From<bool> for Cell {
    fn from(b: bool) -> Self {
        Cell::Bool(b)
    }
}

impl From<NaiveDateTime> for Cell {
    fn from(d: NaiveDateTime) -> Self {
        Cell::Date(d)
    }
}

impl<T: Into<Cell>> From<Option<T>> for Cell {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Cell::Null)
    }
}

/// Column name to cell. Column names are unique within a record.
pub type Record = BTreeMap<String, Cell>;

/// Build a record from `(column, value)` pairs.
pub fn record<K, V, I>(pairs: I) -> Record
where
    K: Into<String>,
    V: Into<Cell>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// Ordered sequence of records persisted as one object.
///
/// The column set is not stored; it is the union of the records' keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Table {
    records: Vec<Record>,
}

impl Table {
    pub fn new() -> Self {
        Table::default()
    }

    pub fn from_records(records: Vec<Record>) -> Self {
        Table { records }
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn push(&mut self, record: Record) {
        self.records.push(record);
    }

    pub fn extend<I: IntoIterator<Item = Record>>(&mut self, records: I) {
        self.records.extend(records);
    }

    /// Union of the records' column names, in first-seen order.
    pub fn columns(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut columns = Vec::new();
        for record in &self.records {
            for name in record.keys() {
                if seen.insert(name.as_str()) {
                    columns.push(name.clone());
                }
            }
        }
        columns
    }

    /// The table as it reads back after a write: numbers rounded to two
    /// decimals and every record carrying every column (`Null` where absent).
    pub fn normalized(&self) -> Table {
        let columns = self.columns();
        let records = self
            .records
            .iter()
            .map(|r| {
                columns
                    .iter()
                    .map(|c| {
                        let cell = r.get(c).map(Cell::rounded).unwrap_or(Cell::Null);
                        (c.clone(), cell)
                    })
                    .collect()
            })
            .collect();
        Table { records }
    }
}

impl From<Vec<Record>> for Table {
    fn from(records: Vec<Record>) -> Self {
        Table::from_records(records)
    }
}

impl IntoIterator for Table {
    type Item = Record;
    type IntoIter = std::vec::IntoIter<Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}
