//! Source file reading and schema discovery.

pub mod columns;
pub mod reader;

pub use columns::{ColumnDescriptor, ColumnKind, RoleClassifier, SubstringClassifier, TableLayout};
pub use reader::{Extraction, SourceFile, SqliteReader};

use chrono::NaiveDateTime;

/// A single source cell value, decoupled from the sqlite driver types.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl From<rusqlite::types::Value> for CellValue {
    fn from(value: rusqlite::types::Value) -> Self {
        use rusqlite::types::Value;
        match value {
            Value::Null => CellValue::Null,
            Value::Integer(v) => CellValue::Integer(v),
            Value::Real(v) => CellValue::Real(v),
            Value::Text(v) => CellValue::Text(v),
            Value::Blob(v) => CellValue::Blob(v),
        }
    }
}

/// One extracted record: cells ordered as the discovered columns, tagged
/// with the normalized timestamp used for ordering and checkpoint
/// computation.
#[derive(Debug, Clone)]
pub struct Row {
    pub cells: Vec<CellValue>,
    pub timestamp: NaiveDateTime,
}
