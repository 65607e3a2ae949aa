//! SQL Session - Library
//! Blocking sessions against SQL Server and PostgreSQL: run queries, execute
//! stored procedures and write frames into tables

pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod session;

pub use config::{AppConfig, ConnectionConfig};
pub use db::{
    CellValue, DataType, DatabaseBackend, Frame, IfExists, MssqlDialect, PostgresDialect, SqlDialect,
    WriteOptions,
};
pub use error::{Result, SessionError};
pub use session::{MssqlSession, Output, PostgresSession, Session};

/// Install the stderr log subscriber, filtered by `RUST_LOG` (default `warn`)
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
