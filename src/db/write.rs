//! Table writes: target parsing, write policy, and the SQL each dialect
//! renders to create and fill a table

use crate::db::frame::{CellValue, DataType, Frame};
use crate::error::{Result, SessionError};
use std::collections::HashMap;
use std::str::FromStr;

/// A `schema.table` target
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableName {
    pub schema: String,
    pub table: String,
}

impl TableName {
    /// Split a fully qualified name on its single `.` separator
    pub fn parse(fully_qualified: &str) -> Result<Self> {
        let parts: Vec<&str> = fully_qualified.split('.').collect();
        match parts.as_slice() {
            [schema, table] if !schema.is_empty() && !table.is_empty() => Ok(Self {
                schema: schema.to_string(),
                table: table.to_string(),
            }),
            _ => Err(SessionError::InvalidTableName(fully_qualified.to_string())),
        }
    }
}

impl std::fmt::Display for TableName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// What to do when the target table already exists
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IfExists {
    #[default]
    Fail,
    Replace,
    Append,
}

impl FromStr for IfExists {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fail" => Ok(IfExists::Fail),
            "replace" => Ok(IfExists::Replace),
            "append" => Ok(IfExists::Append),
            other => Err(SessionError::InvalidOption(format!(
                "if_exists must be fail, replace or append, got {other:?}"
            ))),
        }
    }
}

/// Options for `Session::write_table`
#[derive(Clone, Debug, Default)]
pub struct WriteOptions {
    /// Also write the frame's row labels as the first column
    pub index: bool,
    pub if_exists: IfExists,
    /// Column name for the row labels (default: index name, else `index`)
    pub index_label: Option<String>,
    /// Rows per INSERT statement, further capped by the dialect
    pub chunksize: Option<usize>,
    /// SQL type overrides by column name, used verbatim in CREATE TABLE
    pub dtype: HashMap<String, String>,
}

impl WriteOptions {
    pub fn new(if_exists: IfExists) -> Self {
        Self {
            if_exists,
            ..Self::default()
        }
    }

    pub fn with_index(mut self, index: bool) -> Self {
        self.index = index;
        self
    }

    pub fn with_index_label(mut self, label: impl Into<String>) -> Self {
        self.index_label = Some(label.into());
        self
    }

    pub fn with_chunksize(mut self, rows: usize) -> Self {
        self.chunksize = Some(rows);
        self
    }

    pub fn with_dtype(mut self, column: impl Into<String>, sql_type: impl Into<String>) -> Self {
        self.dtype.insert(column.into(), sql_type.into());
        self
    }
}

/// A column as it will be created in the target table
#[derive(Clone, Debug, PartialEq)]
pub struct PlannedColumn {
    pub name: String,
    pub data_type: DataType,
    pub sql_type: Option<String>,
}

/// Everything a dialect needs to perform one write
#[derive(Clone, Debug)]
pub struct WritePlan {
    pub target: TableName,
    pub if_exists: IfExists,
    pub columns: Vec<PlannedColumn>,
    /// Rows with values already coerced to their column types
    pub rows: Vec<Vec<CellValue>>,
    pub chunksize: Option<usize>,
}

impl WritePlan {
    /// Fails when a row's width or the index length does not match the frame
    pub fn new(data: &Frame, target: TableName, options: &WriteOptions) -> Result<Self> {
        let width = data.columns.len();
        if let Some(row) = data.rows.iter().find(|r| r.len() != width) {
            return Err(SessionError::RowWidth {
                expected: width,
                found: row.len(),
            });
        }
        if let Some(index) = data.index.as_ref().filter(|_| options.index) {
            if index.values.len() != data.rows.len() {
                return Err(SessionError::IndexLength {
                    expected: data.rows.len(),
                    found: index.values.len(),
                });
            }
        }

        let mut names: Vec<String> = Vec::with_capacity(data.columns.len() + 1);
        let mut columns: Vec<Vec<CellValue>> = Vec::with_capacity(data.columns.len() + 1);

        if options.index {
            let label = options
                .index_label
                .clone()
                .or_else(|| data.index.as_ref().and_then(|i| i.name.clone()))
                .unwrap_or_else(|| "index".to_string());
            names.push(label);
            columns.push(data.index_values());
        }
        for (i, col) in data.columns.iter().enumerate() {
            names.push(col.name.clone());
            columns.push(data.rows.iter().map(|r| r[i].clone()).collect());
        }

        let planned: Vec<PlannedColumn> = names
            .into_iter()
            .zip(&columns)
            .map(|(name, values)| PlannedColumn {
                data_type: crate::db::frame::infer_type(values.iter()),
                sql_type: options.dtype.get(&name).cloned(),
                name,
            })
            .collect();

        let rows = (0..data.rows.len())
            .map(|r| {
                planned
                    .iter()
                    .zip(&columns)
                    .map(|(col, values)| values[r].coerce(col.data_type))
                    .collect()
            })
            .collect();

        Ok(Self {
            target,
            if_exists: options.if_exists,
            columns: planned,
            rows,
            chunksize: options.chunksize,
        })
    }

    /// Rows per INSERT: the requested chunk size, capped by the flavor's
    /// row and parameter limits
    pub fn rows_per_statement(&self, flavor: &dyn SqlFlavor) -> usize {
        let by_params = (flavor.max_params() / self.columns.len().max(1)).max(1);
        let cap = flavor.max_rows().min(by_params);
        self.chunksize.map_or(cap, |n| n.clamp(1, cap))
    }
}

/// Dialect-specific pieces of SQL text
pub trait SqlFlavor {
    fn quote_ident(&self, ident: &str) -> String;

    /// Placeholder for the 1-based parameter `n`
    fn placeholder(&self, n: usize) -> String;

    fn type_name(&self, data_type: DataType) -> &'static str;

    /// Most bind parameters allowed in one statement
    fn max_params(&self) -> usize;

    /// Most rows allowed in one VALUES list
    fn max_rows(&self) -> usize;

    fn qualified(&self, target: &TableName) -> String {
        format!(
            "{}.{}",
            self.quote_ident(&target.schema),
            self.quote_ident(&target.table)
        )
    }
}

/// Query returning a row when the table exists; binds schema then table
pub fn table_exists_sql(flavor: &dyn SqlFlavor) -> String {
    format!(
        "SELECT 1 FROM INFORMATION_SCHEMA.TABLES WHERE TABLE_SCHEMA = {} AND TABLE_NAME = {}",
        flavor.placeholder(1),
        flavor.placeholder(2)
    )
}

pub fn drop_table_sql(flavor: &dyn SqlFlavor, target: &TableName) -> String {
    format!("DROP TABLE {}", flavor.qualified(target))
}

pub fn create_table_sql(flavor: &dyn SqlFlavor, target: &TableName, columns: &[PlannedColumn]) -> String {
    let defs: Vec<String> = columns
        .iter()
        .map(|c| {
            let sql_type = c
                .sql_type
                .clone()
                .unwrap_or_else(|| flavor.type_name(c.data_type).to_string());
            format!("{} {} NULL", flavor.quote_ident(&c.name), sql_type)
        })
        .collect();
    format!("CREATE TABLE {} ({})", flavor.qualified(target), defs.join(", "))
}

/// Multi-row INSERT with numbered placeholders for `row_count` rows
pub fn insert_sql(
    flavor: &dyn SqlFlavor,
    target: &TableName,
    columns: &[PlannedColumn],
    row_count: usize,
) -> String {
    let names: Vec<String> = columns.iter().map(|c| flavor.quote_ident(&c.name)).collect();
    let width = columns.len();
    let tuples: Vec<String> = (0..row_count)
        .map(|r| {
            let marks: Vec<String> = (1..=width).map(|c| flavor.placeholder(r * width + c)).collect();
            format!("({})", marks.join(", "))
        })
        .collect();
    format!(
        "INSERT INTO {} ({}) VALUES {}",
        flavor.qualified(target),
        names.join(", "),
        tuples.join(", ")
    )
}
