//! Session lifecycle tests
//!
//! These run the shared `Session` logic against an in-memory dialect that
//! records every call, so no database server is needed.

use async_trait::async_trait;
use sql_session::db::{CellValue, DatabaseBackend, Frame, IfExists, Index, SqlDialect, WriteOptions, WritePlan};
use sql_session::{ConnectionConfig, Result, Session, SessionError};
use std::io::Write;
use std::sync::{Arc, Mutex};

// Test infrastructure

#[derive(Clone, Default)]
struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    fn push(&self, call: impl Into<String>) {
        self.0.lock().unwrap().push(call.into());
    }

    fn calls(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }
}

#[derive(Default)]
struct MemoryDialect {
    log: CallLog,
    fail_connect: bool,
    fail_close: bool,
    stored_procedures: bool,
    result: Frame,
    plans: Arc<Mutex<Vec<WritePlan>>>,
}

struct MemoryConnection {
    database: String,
}

#[async_trait]
impl SqlDialect for MemoryDialect {
    type Engine = String;
    type Connection = MemoryConnection;

    fn backend(&self) -> DatabaseBackend {
        DatabaseBackend::Postgres
    }

    fn make_engine(&self, config: &ConnectionConfig) -> Result<String> {
        self.log.push("make_engine");
        Ok(config.database.clone())
    }

    async fn connect(&self, engine: &String) -> Result<MemoryConnection> {
        self.log.push("connect");
        if self.fail_connect {
            return Err(SessionError::Io(std::io::Error::other("connection refused")));
        }
        Ok(MemoryConnection {
            database: engine.clone(),
        })
    }

    async fn select_statement(&self, conn: &mut MemoryConnection, query: &str) -> Result<Frame> {
        self.log.push(format!("select {} {}", conn.database, query));
        Ok(self.result.clone())
    }

    fn supports_stored_procedures(&self) -> bool {
        self.stored_procedures
    }

    async fn exec_sp(
        &self,
        _engine: &String,
        _conn: &mut MemoryConnection,
        name: &str,
        params: &[CellValue],
    ) -> Result<()> {
        self.log.push(format!("exec {} {}", name, params.len()));
        Ok(())
    }

    async fn write_table(&self, _conn: &mut MemoryConnection, plan: &WritePlan) -> Result<()> {
        self.log.push(format!("write {}", plan.target));
        self.plans.lock().unwrap().push(plan.clone());
        Ok(())
    }

    async fn close(&self, _conn: MemoryConnection) -> Result<()> {
        self.log.push("close");
        if self.fail_close {
            return Err(SessionError::Io(std::io::Error::other("socket already gone")));
        }
        Ok(())
    }
}

/// Captures banner output
#[derive(Clone, Default)]
struct SharedOutput(Arc<Mutex<Vec<u8>>>);

impl SharedOutput {
    fn text(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for SharedOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn config() -> ConnectionConfig {
    ConnectionConfig::new("localhost", 5432, "warehouse", "etl", "secret")
}

fn open(dialect: MemoryDialect) -> Session<MemoryDialect> {
    Session::connect(dialect, config(), true).unwrap()
}

fn sample_frame() -> Frame {
    let mut frame = Frame::new(["id", "name"]);
    frame.push_row(vec![1.into(), "a".into()]).unwrap();
    frame.push_row(vec![2.into(), "b".into()]).unwrap();
    frame
}

// Lifecycle

#[test]
fn test_connected_after_construction_and_closed_after_close() {
    let log = CallLog::default();
    let mut session = open(MemoryDialect {
        log: log.clone(),
        ..Default::default()
    });

    assert!(session.is_connected());
    assert!(session.is_silent());
    assert_eq!(log.calls(), vec!["make_engine", "connect"]);
    assert_eq!(session.engine(), "warehouse");

    session.close().unwrap();
    assert!(!session.is_connected());
}

#[test]
fn test_close_twice_is_a_noop() {
    let log = CallLog::default();
    let mut session = open(MemoryDialect {
        log: log.clone(),
        ..Default::default()
    });

    session.close().unwrap();
    session.close().unwrap();
    assert!(!session.is_connected());
    assert_eq!(log.count("close"), 1);
}

#[test]
fn test_connect_failure_propagates() {
    let log = CallLog::default();
    let err = Session::connect(
        MemoryDialect {
            log: log.clone(),
            fail_connect: true,
            ..Default::default()
        },
        config(),
        true,
    )
    .unwrap_err();

    assert!(matches!(err, SessionError::Io(_)));
    assert_eq!(log.count("close"), 0);
}

#[test]
fn test_failed_close_still_marks_session_closed() {
    let mut session = open(MemoryDialect {
        fail_close: true,
        ..Default::default()
    });

    assert!(session.close().is_err());
    assert!(!session.is_connected());
    assert!(session.close().is_ok());
}

#[test]
fn test_drop_closes_open_connection() {
    let log = CallLog::default();
    {
        let _session = open(MemoryDialect {
            log: log.clone(),
            ..Default::default()
        });
    }
    assert_eq!(log.count("close"), 1);
}

#[test]
fn test_drop_after_close_does_not_close_again() {
    let log = CallLog::default();
    {
        let mut session = open(MemoryDialect {
            log: log.clone(),
            ..Default::default()
        });
        session.close().unwrap();
    }
    assert_eq!(log.count("close"), 1);
}

// Scoped use

#[test]
fn test_scoped_returns_value_and_closes() {
    let log = CallLog::default();
    let session = open(MemoryDialect {
        log: log.clone(),
        result: sample_frame(),
        ..Default::default()
    });

    let rows = session
        .scoped(|s| s.select_statement("SELECT * FROM t").map(|f| f.row_count()))
        .unwrap();

    assert_eq!(rows, 2);
    assert_eq!(log.calls().last().map(String::as_str), Some("close"));
}

#[test]
fn test_scoped_closes_when_scope_fails() {
    let log = CallLog::default();
    let session = open(MemoryDialect {
        log: log.clone(),
        ..Default::default()
    });

    let err = session
        .scoped(|s| -> Result<()> {
            assert!(s.is_connected());
            s.write_table(&sample_frame(), "no_schema", WriteOptions::default())
        })
        .unwrap_err();

    assert!(matches!(err, SessionError::InvalidTableName(_)));
    assert_eq!(log.count("close"), 1);
}

#[test]
fn test_scoped_error_wins_over_close_error() {
    let session = open(MemoryDialect {
        fail_close: true,
        ..Default::default()
    });

    let err = session
        .scoped(|_| -> Result<()> { Err(SessionError::NotImplemented("test")) })
        .unwrap_err();
    assert!(matches!(err, SessionError::NotImplemented("test")));
}

#[test]
fn test_scoped_reports_close_error_after_success() {
    let session = open(MemoryDialect {
        fail_close: true,
        ..Default::default()
    });

    let err = session.scoped(|_| -> Result<u8> { Ok(1) }).unwrap_err();
    assert!(matches!(err, SessionError::Io(_)));
}

#[test]
fn test_scoped_closes_on_panic() {
    let log = CallLog::default();
    let session = open(MemoryDialect {
        log: log.clone(),
        ..Default::default()
    });

    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        session.scoped(|_| -> Result<()> { panic!("boom") })
    }));

    assert!(outcome.is_err());
    assert_eq!(log.count("close"), 1);
}

// Operations

#[test]
fn test_select_delegates_to_dialect() {
    let log = CallLog::default();
    let mut session = open(MemoryDialect {
        log: log.clone(),
        result: sample_frame(),
        ..Default::default()
    });

    let frame = session.select_statement("SELECT id, name FROM t").unwrap();
    assert_eq!(frame.column_names(), vec!["id", "name"]);
    assert!(log.calls().contains(&"select warehouse SELECT id, name FROM t".to_string()));
}

#[test]
fn test_operations_on_closed_session_fail() {
    let mut session = open(MemoryDialect {
        stored_procedures: true,
        ..Default::default()
    });
    session.close().unwrap();

    assert!(matches!(session.select_statement("SELECT 1"), Err(SessionError::Closed)));
    assert!(matches!(
        session.write_table(&sample_frame(), "s.t", WriteOptions::default()),
        Err(SessionError::Closed)
    ));
    assert!(matches!(session.exec_sp("sp1", &[]), Err(SessionError::Closed)));
}

#[test]
fn test_write_table_rejects_malformed_names_before_touching_connection() {
    let log = CallLog::default();
    let mut session = open(MemoryDialect {
        log: log.clone(),
        ..Default::default()
    });

    for bad in ["onlytablename", "a.b.c", "", "schema."] {
        let err = session
            .write_table(&sample_frame(), bad, WriteOptions::default())
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidTableName(_)), "{bad}");
    }
    assert_eq!(log.count("write"), 0);
    assert!(session.is_connected());
}

#[test]
fn test_malformed_name_fails_even_when_closed() {
    let mut session = open(MemoryDialect::default());
    session.close().unwrap();
    let err = session
        .write_table(&sample_frame(), "onlytablename", WriteOptions::default())
        .unwrap_err();
    assert!(matches!(err, SessionError::InvalidTableName(_)));
}

#[test]
fn test_write_table_passes_plan() {
    let plans = Arc::new(Mutex::new(Vec::new()));
    let mut session = open(MemoryDialect {
        plans: plans.clone(),
        ..Default::default()
    });

    let options = WriteOptions::new(IfExists::Replace).with_index(true);
    session.write_table(&sample_frame(), "staging.people", options).unwrap();

    let plans = plans.lock().unwrap();
    let plan = &plans[0];
    assert_eq!(plan.target.schema, "staging");
    assert_eq!(plan.target.table, "people");
    assert_eq!(plan.if_exists, IfExists::Replace);
    let names: Vec<&str> = plan.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["index", "id", "name"]);
    assert_eq!(plan.rows[1][0], CellValue::Int(1));
}

#[test]
fn test_exec_sp_defaults_to_not_implemented() {
    let mut session = open(MemoryDialect::default());
    let err = session
        .exec_sp("sp1", &[CellValue::Int(1), CellValue::Int(2)])
        .unwrap_err();
    assert!(matches!(err, SessionError::NotImplemented(_)));
    assert!(err.to_string().contains("not implemented"));
}

#[test]
fn test_exec_sp_rejects_bad_names() {
    let mut session = open(MemoryDialect {
        stored_procedures: true,
        ..Default::default()
    });
    let err = session.exec_sp("sp1; DROP TABLE users", &[]).unwrap_err();
    assert!(matches!(err, SessionError::InvalidProcedureName(_)));
}

#[test]
fn test_exec_sp_delegates_when_supported() {
    let log = CallLog::default();
    let mut session = open(MemoryDialect {
        log: log.clone(),
        stored_procedures: true,
        ..Default::default()
    });
    session.exec_sp("dbo.load_day", &[1.into(), "2024-01-01".into()]).unwrap();
    assert!(log.calls().contains(&"exec dbo.load_day 2".to_string()));
}

#[test]
fn test_exec_sp_without_support_is_not_implemented_before_other_checks() {
    let mut session = open(MemoryDialect::default());
    let err = session.exec_sp("my proc", &[]).unwrap_err();
    assert!(matches!(err, SessionError::NotImplemented(_)));

    session.close().unwrap();
    let err = session.exec_sp("sp1", &[1.into(), 2.into()]).unwrap_err();
    assert!(matches!(err, SessionError::NotImplemented(_)));
}

#[test]
fn test_write_table_rejects_ragged_rows() {
    let log = CallLog::default();
    let mut session = open(MemoryDialect {
        log: log.clone(),
        ..Default::default()
    });
    let mut frame = sample_frame();
    frame.rows.push(vec![CellValue::Int(3)]);

    let err = session.write_table(&frame, "s.t", WriteOptions::default()).unwrap_err();
    assert!(matches!(err, SessionError::RowWidth { expected: 2, found: 1 }));
    assert_eq!(log.count("write"), 0);
    assert!(session.is_connected());
}

#[test]
fn test_write_table_rejects_index_of_wrong_length() {
    let log = CallLog::default();
    let mut session = open(MemoryDialect {
        log: log.clone(),
        ..Default::default()
    });
    let mut frame = sample_frame();
    frame.index = Some(Index {
        name: None,
        values: vec![CellValue::Int(7)],
    });

    let err = session
        .write_table(&frame, "s.t", WriteOptions::default().with_index(true))
        .unwrap_err();
    assert!(matches!(err, SessionError::IndexLength { expected: 2, found: 1 }));
    assert_eq!(log.count("write"), 0);
}

// Banners

#[test]
fn test_silent_session_prints_nothing() {
    let out = SharedOutput::default();
    let mut session = Session::connect_with_output(MemoryDialect::default(), config(), true, Box::new(out.clone())).unwrap();
    session.close().unwrap();
    session.close().unwrap();
    drop(session);
    assert_eq!(out.text(), "");
}

#[test]
fn test_banners_when_not_silent() {
    let out = SharedOutput::default();
    let mut session = Session::connect_with_output(MemoryDialect::default(), config(), false, Box::new(out.clone())).unwrap();

    let banner = out.text();
    assert!(banner.starts_with("Connected to\n"));
    assert!(banner.contains("Server: localhost\n"));
    assert!(banner.contains("Database: warehouse\n"));
    assert!(banner.contains("User: etl\n"));
    assert!(!banner.contains("secret"));

    session.close().unwrap();
    assert!(out.text().ends_with("-----------------\nConnection closed\n-----------------\n"));

    session.close().unwrap();
    assert!(out.text().ends_with("Connection is already closed\n----------------------------\n"));
}

#[test]
fn test_drop_prints_close_banner() {
    let out = SharedOutput::default();
    {
        let _session =
            Session::connect_with_output(MemoryDialect::default(), config(), false, Box::new(out.clone())).unwrap();
    }
    assert!(out.text().contains("\nConnection closed\n"));
    assert!(!out.text().contains("already closed"));
}

#[test]
fn test_debug_hides_password() {
    let session = open(MemoryDialect::default());
    let rendered = format!("{:?}", session);
    assert!(rendered.contains("connected: true"));
    assert!(!rendered.contains("secret"));
}
