//! Blocking database session
//!
//! A [`Session`] holds credentials, the engine built from them and exactly one
//! open connection. Every call blocks until the driver returns. The
//! connection is released by [`Session::close`], at the end of
//! [`Session::scoped`], or when the session is dropped.

use crate::config::ConnectionConfig;
use crate::db::{
    CellValue, Frame, MssqlDialect, PostgresDialect, SqlDialect, TableName, WriteOptions, WritePlan,
};
use crate::error::{Result, SessionError};
use regex::Regex;
use std::io::Write;
use std::sync::OnceLock;
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, warn};
use unicode_width::UnicodeWidthStr;

pub type MssqlSession = Session<MssqlDialect>;
pub type PostgresSession = Session<PostgresDialect>;

const CLOSED: &str = "Connection closed";
const ALREADY_CLOSED: &str = "Connection is already closed";

/// Where connect and close banners are written
pub type Output = Box<dyn Write + Send>;

/// Connection to one database through dialect `D`
pub struct Session<D: SqlDialect> {
    config: ConnectionConfig,
    silent: bool,
    out: Output,
    dialect: D,
    engine: D::Engine,
    // Declared before the runtime so a connection left open drops first
    connection: Option<D::Connection>,
    runtime: Runtime,
}

impl<D: SqlDialect> Session<D> {
    /// Build the engine, open the connection and, unless `silent`, print a
    /// banner naming server, database and user
    pub fn connect(dialect: D, config: ConnectionConfig, silent: bool) -> Result<Self> {
        Self::connect_with_output(dialect, config, silent, Box::new(std::io::stdout()))
    }

    /// Like [`Session::connect`], with banners written to `out` instead of
    /// stdout
    pub fn connect_with_output(dialect: D, config: ConnectionConfig, silent: bool, out: Output) -> Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let engine = dialect.make_engine(&config)?;
        let connection = runtime.block_on(dialect.connect(&engine))?;

        debug!(
            backend = %dialect.backend(),
            host = %config.host,
            database = %config.database,
            "session connected"
        );
        let mut session = Self {
            config,
            silent,
            out,
            dialect,
            engine,
            connection: Some(connection),
            runtime,
        };
        let banner = connect_banner(&session.config, '-');
        session.announce(&banner);
        Ok(session)
    }

    fn announce(&mut self, text: &str) {
        if self.silent {
            return;
        }
        if let Err(e) = writeln!(self.out, "{text}").and_then(|_| self.out.flush()) {
            warn!(error = %e, "could not write session banner");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn is_silent(&self) -> bool {
        self.silent
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn dialect(&self) -> &D {
        &self.dialect
    }

    pub fn engine(&self) -> &D::Engine {
        &self.engine
    }

    /// Run a query and return its result as a frame
    pub fn select_statement(&mut self, query: &str) -> Result<Frame> {
        let conn = self.connection.as_mut().ok_or(SessionError::Closed)?;
        debug!(query, "select");
        self.runtime.block_on(self.dialect.select_statement(conn, query))
    }

    /// Execute a stored procedure with positional parameters. Dialects
    /// without stored procedures fail before anything else is checked.
    pub fn exec_sp(&mut self, name: &str, params: &[CellValue]) -> Result<()> {
        if !self.dialect.supports_stored_procedures() {
            return Err(SessionError::NotImplemented("exec_sp"));
        }
        if !is_valid_procedure_name(name) {
            return Err(SessionError::InvalidProcedureName(name.to_string()));
        }
        let conn = self.connection.as_mut().ok_or(SessionError::Closed)?;
        debug!(name, params = params.len(), "exec stored procedure");
        self.runtime
            .block_on(self.dialect.exec_sp(&self.engine, conn, name, params))
    }

    /// Write `data` into `fully_qualified` (`schema.table`). The name is
    /// checked before the connection is used.
    pub fn write_table(&mut self, data: &Frame, fully_qualified: &str, options: WriteOptions) -> Result<()> {
        let target = TableName::parse(fully_qualified)?;
        let conn = self.connection.as_mut().ok_or(SessionError::Closed)?;

        let plan = WritePlan::new(data, target, &options)?;
        debug!(
            table = %plan.target,
            rows = plan.rows.len(),
            if_exists = ?plan.if_exists,
            "write table"
        );
        self.runtime.block_on(self.dialect.write_table(conn, &plan))
    }

    /// Close the connection. Closing an already closed session is a no-op
    /// that only reports the fact.
    pub fn close(&mut self) -> Result<()> {
        let was_connected = self.connection.is_some();
        if let Some(conn) = self.connection.take() {
            self.runtime.block_on(self.dialect.close(conn))?;
            debug!(host = %self.config.host, "session closed");
        }
        self.announce(&framed(close_message(was_connected), '-'));
        Ok(())
    }

    /// Run `f` with the session, then close it whatever `f` returned.
    ///
    /// The result of `f` wins over a failure to close; a close error is only
    /// returned when `f` succeeded.
    pub fn scoped<T, E, F>(mut self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut Self) -> std::result::Result<T, E>,
        E: From<SessionError>,
    {
        let outcome = f(&mut self);
        let closed = self.close();
        match (outcome, closed) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e.into()),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(close_err)) => {
                warn!(error = %close_err, "closing session after a failed scope");
                Err(e)
            }
        }
    }
}

impl Session<MssqlDialect> {
    /// SQL Server session with default dialect options
    pub fn mssql(config: ConnectionConfig, silent: bool) -> Result<Self> {
        Self::connect(MssqlDialect::default(), config, silent)
    }
}

impl Session<PostgresDialect> {
    pub fn postgres(config: ConnectionConfig, silent: bool) -> Result<Self> {
        Self::connect(PostgresDialect, config, silent)
    }
}

impl<D: SqlDialect> Drop for Session<D> {
    fn drop(&mut self) {
        if self.is_connected() {
            if let Err(e) = self.close() {
                warn!(error = %e, "closing session on drop");
            }
        }
    }
}

impl<D: SqlDialect> std::fmt::Debug for Session<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("backend", &self.dialect.backend())
            .field("config", &self.config)
            .field("silent", &self.silent)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Banner printed after connecting
pub fn connect_banner(config: &ConnectionConfig, symbol: char) -> String {
    let lines = [
        format!("Server: {}", config.host),
        format!("Database: {}", config.database),
        format!("User: {}", config.user),
    ];
    let width = lines.iter().map(|l| l.width()).max().unwrap_or(0);
    let fill = symbol.to_string().repeat(width);
    format!("Connected to\n{fill}\n{}\n{fill}", lines.join("\n"))
}

/// `message` between two rules of its own width
pub fn framed(message: &str, symbol: char) -> String {
    let fill = symbol.to_string().repeat(message.width());
    format!("{fill}\n{message}\n{fill}")
}

/// Message `close` reports for a session in the given state
pub fn close_message(was_connected: bool) -> &'static str {
    if was_connected {
        CLOSED
    } else {
        ALREADY_CLOSED
    }
}

/// Plain or `[bracketed]` identifiers joined by dots, at most four parts
pub fn is_valid_procedure_name(name: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"^(?:\[[^\]]+\]|[A-Za-z_#@][\w@#$]*)(?:\.(?:\[[^\]]+\]|[A-Za-z_#@][\w@#$]*)){0,3}$")
                .expect("static pattern compiles")
        })
        .is_match(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_banner_is_aligned() {
        let config = ConnectionConfig::new("db1", 1433, "warehouse", "sa", "pw");
        let banner = connect_banner(&config, '-');
        let lines: Vec<&str> = banner.lines().collect();
        assert_eq!(
            lines,
            vec![
                "Connected to",
                "-------------------",
                "Server: db1",
                "Database: warehouse",
                "User: sa",
                "-------------------",
            ]
        );
    }

    #[test]
    fn test_banner_uses_display_width() {
        let config = ConnectionConfig::new("サーバー", 1433, "d", "u", "pw");
        let banner = connect_banner(&config, '=');
        // "Server: " is 8 columns, each katakana is 2
        assert!(banner.contains(&format!("\n{}\n", "=".repeat(16))));
    }

    #[test]
    fn test_close_messages_differ() {
        assert_eq!(framed(close_message(true), '-'), "-----------------\nConnection closed\n-----------------");
        assert_ne!(close_message(true), close_message(false));
        assert!(framed(close_message(false), '-').contains("already closed"));
    }

    #[test]
    fn test_procedure_names() {
        for ok in ["sp1", "dbo.load_day", "[dbo].[My Proc]", "db.dbo.sp_x", "#temp_proc"] {
            assert!(is_valid_procedure_name(ok), "{ok}");
        }
        for bad in ["", "sp1; drop table x", "dbo.", "a.b.c.d.e", "1proc", "sp name"] {
            assert!(!is_valid_procedure_name(bad), "{bad}");
        }
    }
}
