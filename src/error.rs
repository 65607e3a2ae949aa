//! Error types for sql_session

use thiserror::Error;

/// Errors that may occur while working with a [`Session`](crate::Session)
#[derive(Error, Debug)]
pub enum SessionError {
    /// Target table name is not of the form `schema.table`
    #[error("table name should be like \"schema_name.table_name\", got {0:?}")]
    InvalidTableName(String),

    /// Stored procedure name is not a plain or bracketed identifier path
    #[error("invalid stored procedure name: {0:?}")]
    InvalidProcedureName(String),

    /// Write refused because the table exists and the policy is `fail`
    #[error("table {0} already exists")]
    TableExists(String),

    /// The dialect does not support this operation
    #[error("{0} is not implemented for this dialect")]
    NotImplemented(&'static str),

    /// The session's connection has already been closed
    #[error("connection is closed")]
    Closed,

    /// A frame row does not have one cell per column
    #[error("row has {found} cells but the frame has {expected} columns")]
    RowWidth { expected: usize, found: usize },

    /// Explicit row labels do not match the number of rows
    #[error("index has {found} labels but the frame has {expected} rows")]
    IndexLength { expected: usize, found: usize },

    /// An option string could not be parsed
    #[error("invalid option: {0}")]
    InvalidOption(String),

    /// Connection settings could not be resolved
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    SqlServer(#[from] tiberius::error::Error),

    #[error(transparent)]
    Postgres(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A type alias for Results with our Error type
pub type Result<T> = std::result::Result<T, SessionError>;
