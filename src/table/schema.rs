//! Schema descriptors validated at the store boundary.

use crate::error::{StoreError, StoreResult};
use crate::table::cell::{CellKind, Record, Table};

/// One column of a schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub kind: CellKind,
    /// Whether `Null` is accepted in place of `kind`
    pub nullable: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, kind: CellKind) -> Self {
        ColumnDef {
            name: name.into(),
            kind,
            nullable: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// Fixed set of columns with expected cell kinds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    columns: Vec<ColumnDef>,
}

impl Schema {
    pub fn new(columns: Vec<ColumnDef>) -> Self {
        Schema { columns }
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// True when the table's column set equals the schema's, ignoring order.
    /// An empty table has no column set and matches any schema.
    pub fn matches_columns(&self, table: &Table) -> bool {
        if table.is_empty() {
            return true;
        }
        let mut actual = table.columns();
        let mut expected: Vec<String> = self.columns.iter().map(|c| c.name.clone()).collect();
        actual.sort();
        expected.sort();
        actual == expected
    }

    /// Check one record: exactly the schema's columns, each of the right kind.
    pub fn validate(&self, record: &Record) -> StoreResult<()> {
        for name in record.keys() {
            if !self.columns.iter().any(|c| &c.name == name) {
                return Err(StoreError::Schema(format!("unexpected column '{}'", name)));
            }
        }
        for col in &self.columns {
            match record.get(&col.name) {
                None => {
                    return Err(StoreError::Schema(format!("missing column '{}'", col.name)));
                }
                Some(cell) if cell.is_null() && col.nullable => {}
                Some(cell) if cell.kind() != col.kind => {
                    return Err(StoreError::Schema(format!(
                        "column '{}' expects {:?}, got {:?}",
                        col.name,
                        col.kind,
                        cell.kind()
                    )));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    pub fn validate_all(&self, records: &[Record]) -> StoreResult<()> {
        records.iter().try_for_each(|r| self.validate(r))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::cell::{record, Cell};

    fn schema() -> Schema {
        Schema::new(vec![
            ColumnDef::new("Name", CellKind::String),
            ColumnDef::new("Amount", CellKind::Number).nullable(),
        ])
    }

    #[test]
    fn test_validate_accepts_matching_record() {
        let r = record([("Name", Cell::from("a")), ("Amount", Cell::Number(1.0))]);
        assert!(schema().validate(&r).is_ok());

        let r = record([("Name", Cell::from("a")), ("Amount", Cell::Null)]);
        assert!(schema().validate(&r).is_ok());
    }

    #[test]
    fn test_validate_rejects_drift() {
        let missing = record([("Name", Cell::from("a"))]);
        assert!(matches!(schema().validate(&missing), Err(StoreError::Schema(_))));

        let extra = record([
            ("Name", Cell::from("a")),
            ("Amount", Cell::Number(1.0)),
            ("Other", Cell::Bool(true)),
        ]);
        assert!(schema().validate(&extra).is_err());

        let wrong_kind = record([("Name", Cell::Number(3.0)), ("Amount", Cell::Null)]);
        assert!(schema().validate(&wrong_kind).is_err());
    }

    #[test]
    fn test_matches_columns_ignores_order() {
        let table = Table::from_records(vec![record([
            ("Amount", Cell::Number(1.0)),
            ("Name", Cell::from("x")),
        ])]);
        assert!(schema().matches_columns(&table));
        assert!(schema().matches_columns(&Table::new()));

        let other = Table::from_records(vec![record([("Name", Cell::from("x"))])]);
        assert!(!schema().matches_columns(&other));
    }
}
