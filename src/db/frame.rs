//! Tabular data shared by all dialects: query results and write inputs

use crate::error::{Result, SessionError};
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;

/// Represents a cell value in a frame
#[derive(Clone, Debug, PartialEq)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    String(String),
    DateTime(NaiveDateTime),
    Date(NaiveDate),
    Binary(Vec<u8>),
}

impl std::fmt::Display for CellValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CellValue::Null => write!(f, "NULL"),
            CellValue::Bool(v) => write!(f, "{}", if *v { "true" } else { "false" }),
            CellValue::Int(v) => write!(f, "{}", v),
            CellValue::Float(v) => write!(f, "{}", v),
            CellValue::Decimal(v) => write!(f, "{}", v),
            CellValue::String(v) => write!(f, "{}", v),
            CellValue::DateTime(v) => write!(f, "{}", v.format("%Y-%m-%d %H:%M:%S")),
            CellValue::Date(v) => write!(f, "{}", v.format("%Y-%m-%d")),
            CellValue::Binary(v) => write!(f, "0x{}", hex::encode(v)),
        }
    }
}

impl From<i64> for CellValue {
    fn from(v: i64) -> Self {
        CellValue::Int(v)
    }
}

impl From<i32> for CellValue {
    fn from(v: i32) -> Self {
        CellValue::Int(v as i64)
    }
}

impl From<f64> for CellValue {
    fn from(v: f64) -> Self {
        CellValue::Float(v)
    }
}

impl From<bool> for CellValue {
    fn from(v: bool) -> Self {
        CellValue::Bool(v)
    }
}

impl From<&str> for CellValue {
    fn from(v: &str) -> Self {
        CellValue::String(v.to_string())
    }
}

impl From<String> for CellValue {
    fn from(v: String) -> Self {
        CellValue::String(v)
    }
}

impl<T: Into<CellValue>> From<Option<T>> for CellValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(CellValue::Null)
    }
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// The column type this value naturally belongs to (`None` for NULL)
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            CellValue::Null => None,
            CellValue::Bool(_) => Some(DataType::Bool),
            CellValue::Int(_) => Some(DataType::Int),
            CellValue::Float(_) => Some(DataType::Float),
            CellValue::Decimal(_) => Some(DataType::Decimal),
            CellValue::String(_) => Some(DataType::Text),
            CellValue::DateTime(_) => Some(DataType::DateTime),
            CellValue::Date(_) => Some(DataType::Date),
            CellValue::Binary(_) => Some(DataType::Binary),
        }
    }

    /// Parse a loosely typed text literal, as found in CSV fields or CLI
    /// arguments: empty or `NULL` is Null, then bool, integer, float, and
    /// finally plain text.
    pub fn parse_literal(raw: &str) -> CellValue {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("null") {
            return CellValue::Null;
        }
        if trimmed.eq_ignore_ascii_case("true") {
            return CellValue::Bool(true);
        }
        if trimmed.eq_ignore_ascii_case("false") {
            return CellValue::Bool(false);
        }
        if let Ok(v) = trimmed.parse::<i64>() {
            return CellValue::Int(v);
        }
        if let Ok(v) = trimmed.parse::<f64>() {
            if v.is_finite() {
                return CellValue::Float(v);
            }
        }
        CellValue::String(raw.to_string())
    }

    /// Convert the value so it can be bound into a column of `target` type.
    /// Values that cannot be represented fall back to their text form.
    pub fn coerce(&self, target: DataType) -> CellValue {
        match (self, target) {
            (CellValue::Null, _) => CellValue::Null,
            (v, t) if v.data_type() == Some(t) => v.clone(),
            (CellValue::Int(v), DataType::Float) => CellValue::Float(*v as f64),
            (CellValue::Int(v), DataType::Decimal) => CellValue::Decimal(Decimal::from(*v)),
            (CellValue::Date(d), DataType::DateTime) => {
                CellValue::DateTime(d.and_hms_opt(0, 0, 0).unwrap_or_default())
            }
            (v, _) => CellValue::String(v.to_string()),
        }
    }

    /// Typed JSON rendering used by the exporters
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            CellValue::Null => Value::Null,
            CellValue::Bool(v) => Value::Bool(*v),
            CellValue::Int(v) => Value::from(*v),
            CellValue::Float(v) => serde_json::Number::from_f64(*v)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            other => Value::String(other.to_string()),
        }
    }
}

/// Logical column type, mapped to a concrete SQL type by each dialect
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataType {
    Bool,
    Int,
    Float,
    Decimal,
    Text,
    DateTime,
    Date,
    Binary,
}

impl DataType {
    /// Combine two observed types of the same column
    fn unify(self, other: DataType) -> DataType {
        use DataType::*;
        match (self, other) {
            (a, b) if a == b => a,
            (Int, Float) | (Float, Int) => Float,
            (Int, Decimal) | (Decimal, Int) => Decimal,
            (Date, DateTime) | (DateTime, Date) => DateTime,
            _ => Text,
        }
    }
}

/// Column metadata
#[derive(Clone, Debug, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    /// Driver-reported type name; empty for frames built in memory
    pub type_name: String,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: String::new(),
        }
    }
}

/// Row labels of a frame
#[derive(Clone, Debug, PartialEq)]
pub struct Index {
    pub name: Option<String>,
    pub values: Vec<CellValue>,
}

/// Rows of named columns, returned by `select_statement` and accepted by
/// `write_table`
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Frame {
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Vec<CellValue>>,
    /// Explicit row labels; `None` means a 0-based range index
    pub index: Option<Index>,
}

impl Frame {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(ColumnInfo::new).collect(),
            rows: Vec::new(),
            index: None,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Append a row, checking it has one cell per column
    pub fn push_row(&mut self, row: Vec<CellValue>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(SessionError::RowWidth {
                expected: self.columns.len(),
                found: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    /// Attach explicit row labels
    pub fn with_index(mut self, name: Option<String>, values: Vec<CellValue>) -> Result<Self> {
        if values.len() != self.rows.len() {
            return Err(SessionError::RowWidth {
                expected: self.rows.len(),
                found: values.len(),
            });
        }
        self.index = Some(Index { name, values });
        Ok(self)
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Position of a column by name
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Values of one column, top to bottom
    pub fn column(&self, name: &str) -> Option<Vec<&CellValue>> {
        let i = self.column_index(name)?;
        Some(self.rows.iter().map(|r| &r[i]).collect())
    }

    /// Labels for every row: the explicit index, or 0..n
    pub fn index_values(&self) -> Vec<CellValue> {
        match &self.index {
            Some(index) => index.values.clone(),
            None => (0..self.rows.len() as i64).map(CellValue::Int).collect(),
        }
    }

    /// Inferred type of every column. All-null columns are Text.
    pub fn column_types(&self) -> Vec<DataType> {
        (0..self.columns.len())
            .map(|i| infer_type(self.rows.iter().map(|r| &r[i])))
            .collect()
    }
}

/// Infer one column type from its values
pub fn infer_type<'a>(values: impl Iterator<Item = &'a CellValue>) -> DataType {
    values
        .filter_map(CellValue::data_type)
        .reduce(DataType::unify)
        .unwrap_or(DataType::Text)
}

// Helper for hex encoding binary data
mod hex {
    pub fn encode(data: &[u8]) -> String {
        data.iter().map(|b| format!("{:02X}", b)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_literal() {
        assert_eq!(CellValue::parse_literal(""), CellValue::Null);
        assert_eq!(CellValue::parse_literal("NULL"), CellValue::Null);
        assert_eq!(CellValue::parse_literal("true"), CellValue::Bool(true));
        assert_eq!(CellValue::parse_literal("42"), CellValue::Int(42));
        assert_eq!(CellValue::parse_literal("-1.5"), CellValue::Float(-1.5));
        assert_eq!(CellValue::parse_literal("inf"), CellValue::String("inf".into()));
        assert_eq!(CellValue::parse_literal("abc"), CellValue::String("abc".into()));
    }

    #[test]
    fn test_push_row_checks_width() {
        let mut frame = Frame::new(["a", "b"]);
        assert!(frame.push_row(vec![1.into(), "x".into()]).is_ok());
        let err = frame.push_row(vec![1.into()]).unwrap_err();
        assert!(matches!(err, SessionError::RowWidth { expected: 2, found: 1 }));
        assert_eq!(frame.row_count(), 1);
    }

    #[test]
    fn test_column_types_inference() {
        let mut frame = Frame::new(["id", "score", "note", "mixed", "empty"]);
        frame
            .push_row(vec![1.into(), 1.into(), "a".into(), 1.into(), CellValue::Null])
            .unwrap();
        frame
            .push_row(vec![2.into(), 2.5.into(), CellValue::Null, true.into(), CellValue::Null])
            .unwrap();

        assert_eq!(
            frame.column_types(),
            vec![DataType::Int, DataType::Float, DataType::Text, DataType::Text, DataType::Text]
        );
    }

    #[test]
    fn test_coerce() {
        assert_eq!(CellValue::Int(3).coerce(DataType::Float), CellValue::Float(3.0));
        assert_eq!(CellValue::Bool(true).coerce(DataType::Text), CellValue::String("true".into()));
        assert_eq!(CellValue::Null.coerce(DataType::Int), CellValue::Null);
        assert_eq!(CellValue::Int(7).coerce(DataType::Int), CellValue::Int(7));
    }

    #[test]
    fn test_index_values_default_to_range() {
        let mut frame = Frame::new(["a"]);
        frame.push_row(vec!["x".into()]).unwrap();
        frame.push_row(vec!["y".into()]).unwrap();
        assert_eq!(frame.index_values(), vec![CellValue::Int(0), CellValue::Int(1)]);

        let frame = frame
            .with_index(Some("key".into()), vec!["k1".into(), "k2".into()])
            .unwrap();
        assert_eq!(frame.index_values()[1], CellValue::String("k2".into()));
    }

    #[test]
    fn test_binary_display() {
        assert_eq!(CellValue::Binary(vec![0xde, 0xad]).to_string(), "0xDEAD");
    }
}
