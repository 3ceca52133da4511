//! Columnar payload codec.
//!
//! Query results travel as an Arrow IPC stream: a schema message naming
//! every column, then one record batch holding the rows. Each Arrow field
//! carries a `typeTag` metadata entry with the column's SQL type name, and
//! decimal precision and scale live in the Arrow type itself.
//!
//! | SQL type                     | Arrow type                                   |
//! |------------------------------|----------------------------------------------|
//! | BOOLEAN, integers, floats    | the matching native-width type               |
//! | HUGEINT                      | `Decimal128(38, 0)`                          |
//! | DECIMAL(p, s)                | `Decimal128(p, s)`                           |
//! | VARCHAR                      | `Utf8`                                       |
//! | DATE                         | `Date32`                                     |
//! | TIME                         | `Time64(Microsecond)`                        |
//! | TIMESTAMP                    | `Timestamp(Microsecond, None)`               |
//! | TIMESTAMP_WITH_TIME_ZONE     | `Timestamp(Microsecond, "<offset>")`         |
//!
//! A zoned column takes the offset of its first non-null row; every row keeps
//! its instant.
//!
//! Encoding never fails because of one cell: a value that cannot be
//! represented in its column's type is stored as null.
mod codec;
mod schema;

use thiserror::Error;

use crate::types::{ColumnType, Value};

pub use codec::{decode, encode};

#[derive(Debug, Error)]
pub enum ColumnarError {
    #[error("invalid schema: {0}")]
    Schema(String),
    #[error("column '{column}' does not hold {rows} rows: {detail}")]
    RowCountMismatch {
        column: String,
        rows: usize,
        detail: String,
    },
    #[error("column '{column}': {reason}")]
    Region { column: String, reason: String },
    #[error("{rows} rows cannot fit in a {size} byte payload")]
    ImplausibleRowCount { rows: usize, size: usize },
    #[error("arrow error: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),
}

/// Name and declared type of one result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub column_type: ColumnType,
}

impl Field {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// One column of a result set, [`Value::Null`] marking null rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub field: Field,
    pub values: Vec<Value>,
}

impl Column {
    pub fn new(field: Field, values: Vec<Value>) -> Self {
        Self { field, values }
    }

    pub fn name(&self) -> &str {
        &self.field.name
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_null(&self, row: usize) -> bool {
        self.values.get(row).is_none_or(Value::is_null)
    }
}

/// Transpose row-major engine output into columns.
pub fn columns_from_rows(fields: Vec<Field>, rows: Vec<Vec<Value>>) -> Vec<Column> {
    let mut columns: Vec<Column> = fields
        .into_iter()
        .map(|field| Column::new(field, Vec::with_capacity(rows.len())))
        .collect();

    for row in rows {
        let mut cells = row.into_iter();
        for column in columns.iter_mut() {
            column.values.push(cells.next().unwrap_or(Value::Null));
        }
    }
    columns
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transposes_rows() {
        let fields = vec![
            Field::new("id", ColumnType::BigInt),
            Field::new("name", ColumnType::Varchar),
        ];
        let rows = vec![
            vec![Value::Int64(1), Value::Varchar("a".into())],
            vec![Value::Int64(2), Value::Null],
        ];

        let columns = columns_from_rows(fields, rows);
        assert_eq!(columns.len(), 2);
        assert_eq!(columns[0].values, vec![Value::Int64(1), Value::Int64(2)]);
        assert!(columns[1].is_null(1));
        assert!(!columns[1].is_null(0));
    }
}
