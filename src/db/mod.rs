//! Database module — dialect abstraction + SQL Server and PostgreSQL backends

mod dialect;
mod frame;
mod write;
pub mod postgres;
pub mod sqlserver;

pub use dialect::*;
pub use frame::*;
pub use postgres::{PostgresDialect, PostgresEngine};
pub use sqlserver::{MssqlDialect, MssqlEngine};
pub use write::*;
