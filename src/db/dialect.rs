//! Database dialect abstraction trait
//!
//! Defines the interface that each supported database must implement. A
//! [`Session`](crate::Session) owns one dialect value, the engine it built
//! and the connection opened from that engine.

use crate::config::ConnectionConfig;
use crate::db::frame::{CellValue, Frame};
use crate::db::write::WritePlan;
use crate::error::{Result, SessionError};
use async_trait::async_trait;
use std::str::FromStr;

/// Which database backend is in use
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    #[serde(alias = "mssql")]
    SqlServer,
    Postgres,
}

impl DatabaseBackend {
    /// Port used when none is configured
    pub fn default_port(&self) -> u16 {
        match self {
            DatabaseBackend::SqlServer => 1433,
            DatabaseBackend::Postgres => 5432,
        }
    }
}

impl std::fmt::Display for DatabaseBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseBackend::SqlServer => write!(f, "SQL Server"),
            DatabaseBackend::Postgres => write!(f, "PostgreSQL"),
        }
    }
}

impl Default for DatabaseBackend {
    fn default() -> Self {
        DatabaseBackend::SqlServer
    }
}

impl FromStr for DatabaseBackend {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mssql" | "sqlserver" => Ok(DatabaseBackend::SqlServer),
            "postgres" | "postgresql" | "pg" => Ok(DatabaseBackend::Postgres),
            other => Err(SessionError::InvalidOption(format!("unknown backend {other:?}"))),
        }
    }
}

/// Trait that every database dialect must implement.
///
/// Methods are async because both clients are async; `Session` drives them
/// from its own runtime so callers see blocking calls.
#[async_trait]
pub trait SqlDialect: Send + Sync {
    /// Configured but not yet connected target
    type Engine: Send + Sync;

    /// Live connection opened from an engine
    type Connection: Send;

    /// Which backend this dialect represents
    fn backend(&self) -> DatabaseBackend;

    /// Build a driver-specific engine from the stored credentials
    fn make_engine(&self, config: &ConnectionConfig) -> Result<Self::Engine>;

    /// Open a connection from the engine
    async fn connect(&self, engine: &Self::Engine) -> Result<Self::Connection>;

    /// Run a query and return its first result set
    async fn select_statement(&self, conn: &mut Self::Connection, query: &str) -> Result<Frame>;

    /// Whether `exec_sp` is available. Dialects that override `exec_sp`
    /// must also return `true` here.
    fn supports_stored_procedures(&self) -> bool {
        false
    }

    /// Execute a stored procedure with positional parameters
    async fn exec_sp(
        &self,
        _engine: &Self::Engine,
        _conn: &mut Self::Connection,
        _name: &str,
        _params: &[CellValue],
    ) -> Result<()> {
        Err(SessionError::NotImplemented("exec_sp"))
    }

    /// Create and/or fill the planned table over the connection
    async fn write_table(&self, conn: &mut Self::Connection, plan: &WritePlan) -> Result<()>;

    /// Release the connection
    async fn close(&self, conn: Self::Connection) -> Result<()>;
}
