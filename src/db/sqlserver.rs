//! SQL Server dialect implementation using tiberius

use crate::config::ConnectionConfig;
use crate::db::dialect::{DatabaseBackend, SqlDialect};
use crate::db::frame::{CellValue, ColumnInfo, DataType, Frame};
use crate::db::write::{
    create_table_sql, drop_table_sql, insert_sql, table_exists_sql, IfExists, SqlFlavor, TableName,
    WritePlan,
};
use crate::error::{Result, SessionError};
use async_trait::async_trait;
use rust_decimal::Decimal;
use tiberius::numeric::Numeric;
use tiberius::time::chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use tiberius::{AuthMethod, Client, Column, ColumnType, Config, EncryptionLevel, Query, Row};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, warn};

/// ODBC driver named in the engine's connection string
pub const ODBC_DRIVER: &str = "ODBC Driver 13 for SQL Server";

/// Prefix that stops row-count messages from preceding result sets
const NOCOUNT: &str = "set nocount on; ";

pub type MssqlClient = Client<Compat<TcpStream>>;

/// SQL Server dialect options
#[derive(Clone, Debug)]
pub struct MssqlDialect {
    pub encrypt: bool,
    pub trust_cert: bool,
    /// Send table writes as multi-row INSERT batches instead of one row per
    /// statement
    pub fast_executemany: bool,
}

impl Default for MssqlDialect {
    fn default() -> Self {
        Self {
            encrypt: false,
            trust_cert: true,
            fast_executemany: true,
        }
    }
}

/// Configured SQL Server target
#[derive(Clone)]
pub struct MssqlEngine {
    config: Config,
    connection_string: String,
    fast_executemany: bool,
}

impl std::fmt::Debug for MssqlEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MssqlEngine")
            .field("connection_string", &self.connection_string)
            .finish()
    }
}

impl MssqlEngine {
    /// Connection string with the password redacted
    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    /// `host:port` the engine connects to
    pub fn addr(&self) -> String {
        self.config.get_addr()
    }

    pub fn fast_executemany(&self) -> bool {
        self.fast_executemany
    }

    /// Open a new TCP + TDS connection
    pub async fn raw_connection(&self) -> Result<MssqlClient> {
        let tcp = TcpStream::connect(self.config.get_addr()).await?;
        tcp.set_nodelay(true)?;

        let client = Client::connect(self.config.clone(), tcp.compat_write()).await?;
        Ok(client)
    }
}

/// Identifier quoting, placeholders and type names for T-SQL
pub struct MssqlFlavor;

impl SqlFlavor for MssqlFlavor {
    fn quote_ident(&self, ident: &str) -> String {
        format!("[{}]", ident.replace(']', "]]"))
    }

    fn placeholder(&self, n: usize) -> String {
        format!("@P{}", n)
    }

    fn type_name(&self, data_type: DataType) -> &'static str {
        match data_type {
            DataType::Bool => "BIT",
            DataType::Int => "BIGINT",
            DataType::Float => "FLOAT",
            DataType::Decimal => "DECIMAL(38, 18)",
            DataType::Text => "NVARCHAR(MAX)",
            DataType::DateTime => "DATETIME2",
            DataType::Date => "DATE",
            DataType::Binary => "VARBINARY(MAX)",
        }
    }

    // The server allows 2100 parameters per request
    fn max_params(&self) -> usize {
        2000
    }

    fn max_rows(&self) -> usize {
        1000
    }
}

/// `exec` batch for a stored procedure with `param_count` positional binds
pub fn exec_sp_sql(name: &str, param_count: usize) -> String {
    let marks: Vec<String> = (1..=param_count).map(|n| MssqlFlavor.placeholder(n)).collect();
    if marks.is_empty() {
        format!("{NOCOUNT}exec {name}")
    } else {
        format!("{NOCOUNT}exec {name} {}", marks.join(", "))
    }
}

/// Query text actually sent by `select_statement`
pub fn select_sql(query: &str) -> String {
    format!("{NOCOUNT}{query}")
}

/// Run a batch and drain its results
async fn run_batch(client: &mut MssqlClient, sql: &str) -> Result<()> {
    client.simple_query(sql).await?.into_results().await?;
    Ok(())
}

async fn table_exists(client: &mut MssqlClient, target: &TableName) -> Result<bool> {
    let mut query = Query::new(table_exists_sql(&MssqlFlavor));
    query.bind(target.schema.clone());
    query.bind(target.table.clone());
    let row = query.query(client).await?.into_row().await?;
    Ok(row.is_some())
}

/// tiberius binds decimals as `Numeric`; the mantissa and scale carry over as is
fn to_numeric(v: &Decimal) -> Numeric {
    Numeric::new_with_scale(v.mantissa(), v.scale() as u8)
}

/// Bind one value; NULLs take the column's type so the server can convert them
fn bind_cell(query: &mut Query<'_>, cell: &CellValue, data_type: DataType) {
    match cell {
        CellValue::Null => match data_type {
            DataType::Bool => query.bind(Option::<bool>::None),
            DataType::Int => query.bind(Option::<i64>::None),
            DataType::Float => query.bind(Option::<f64>::None),
            DataType::Decimal => query.bind(Option::<Numeric>::None),
            DataType::Text => query.bind(Option::<String>::None),
            DataType::DateTime => query.bind(Option::<NaiveDateTime>::None),
            DataType::Date => query.bind(Option::<NaiveDate>::None),
            DataType::Binary => query.bind(Option::<Vec<u8>>::None),
        },
        CellValue::Bool(v) => query.bind(*v),
        CellValue::Int(v) => query.bind(*v),
        CellValue::Float(v) => query.bind(*v),
        CellValue::Decimal(v) => query.bind(to_numeric(v)),
        CellValue::String(v) => query.bind(v.clone()),
        CellValue::DateTime(v) => query.bind(*v),
        CellValue::Date(v) => query.bind(*v),
        CellValue::Binary(v) => query.bind(v.clone()),
    }
}

impl MssqlDialect {
    async fn write_rows(&self, client: &mut MssqlClient, plan: &WritePlan) -> Result<()> {
        let exists = table_exists(client, &plan.target).await?;
        let create = create_table_sql(&MssqlFlavor, &plan.target, &plan.columns);

        match (exists, plan.if_exists) {
            (true, IfExists::Fail) => return Err(SessionError::TableExists(plan.target.to_string())),
            (true, IfExists::Replace) => {
                run_batch(client, &drop_table_sql(&MssqlFlavor, &plan.target)).await?;
                run_batch(client, &create).await?;
            }
            (true, IfExists::Append) => {}
            (false, _) => run_batch(client, &create).await?,
        }

        let per_statement = if self.fast_executemany {
            plan.rows_per_statement(&MssqlFlavor)
        } else {
            1
        };

        for chunk in plan.rows.chunks(per_statement) {
            let mut query = Query::new(insert_sql(&MssqlFlavor, &plan.target, &plan.columns, chunk.len()));
            for row in chunk {
                for (cell, col) in row.iter().zip(&plan.columns) {
                    bind_cell(&mut query, cell, col.data_type);
                }
            }
            query.execute(client).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl SqlDialect for MssqlDialect {
    type Engine = MssqlEngine;
    type Connection = MssqlClient;

    fn backend(&self) -> DatabaseBackend {
        DatabaseBackend::SqlServer
    }

    fn supports_stored_procedures(&self) -> bool {
        true
    }

    fn make_engine(&self, cfg: &ConnectionConfig) -> Result<MssqlEngine> {
        let mut config = Config::new();
        config.host(&cfg.host);
        config.port(cfg.port);
        config.database(&cfg.database);
        config.authentication(AuthMethod::sql_server(&cfg.user, &cfg.password));

        if self.trust_cert {
            config.trust_cert();
        }
        if !self.encrypt {
            config.encryption(EncryptionLevel::NotSupported);
        }

        let connection_string = format!(
            "mssql://{}:***@{}:{}/{}?driver={}&fast_executemany={}",
            cfg.user,
            cfg.host,
            cfg.port,
            cfg.database,
            ODBC_DRIVER.replace(' ', "+"),
            self.fast_executemany
        );

        Ok(MssqlEngine {
            config,
            connection_string,
            fast_executemany: self.fast_executemany,
        })
    }

    async fn connect(&self, engine: &MssqlEngine) -> Result<MssqlClient> {
        debug!(engine = %engine.connection_string, "opening SQL Server connection");
        engine.raw_connection().await
    }

    async fn select_statement(&self, conn: &mut MssqlClient, query: &str) -> Result<Frame> {
        let mut stream = conn.simple_query(select_sql(query)).await?;

        let columns: Vec<ColumnInfo> = stream
            .columns()
            .await?
            .map(|cols| {
                cols.iter()
                    .map(|c| ColumnInfo {
                        name: c.name().to_string(),
                        type_name: format_column_type(c),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let mut frame = Frame {
            columns,
            rows: Vec::new(),
            index: None,
        };
        for row in stream.into_first_result().await? {
            let cells = row
                .columns()
                .iter()
                .enumerate()
                .map(|(i, col)| extract_cell_value(&row, i, col))
                .collect();
            frame.push_row(cells)?;
        }
        Ok(frame)
    }

    async fn exec_sp(
        &self,
        engine: &MssqlEngine,
        _conn: &mut MssqlClient,
        name: &str,
        params: &[CellValue],
    ) -> Result<()> {
        // Runs on its own raw connection and commits there, independent of
        // whatever the session connection is doing.
        let mut raw = engine.raw_connection().await?;
        run_batch(&mut raw, "BEGIN TRANSACTION").await?;

        let mut query = Query::new(exec_sp_sql(name, params.len()));
        for param in params {
            let data_type = param.data_type().unwrap_or(DataType::Text);
            bind_cell(&mut query, param, data_type);
        }
        query.execute(&mut raw).await?;

        run_batch(&mut raw, "COMMIT TRANSACTION").await?;
        raw.close().await?;
        Ok(())
    }

    async fn write_table(&self, conn: &mut MssqlClient, plan: &WritePlan) -> Result<()> {
        run_batch(conn, "BEGIN TRANSACTION").await?;
        match self.write_rows(conn, plan).await {
            Ok(()) => run_batch(conn, "COMMIT TRANSACTION").await,
            Err(e) => {
                if let Err(rollback) = run_batch(conn, "IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION").await {
                    warn!(error = %rollback, "rollback after failed write did not complete");
                }
                Err(e)
            }
        }
    }

    async fn close(&self, conn: MssqlClient) -> Result<()> {
        conn.close().await?;
        Ok(())
    }
}

// ---- Type conversion helpers ----

fn format_column_type(col: &Column) -> String {
    match col.column_type() {
        ColumnType::Null => "NULL".to_string(),
        ColumnType::Bit | ColumnType::Bitn => "BIT".to_string(),
        ColumnType::Int1 => "TINYINT".to_string(),
        ColumnType::Int2 => "SMALLINT".to_string(),
        ColumnType::Int4 => "INT".to_string(),
        ColumnType::Int8 => "BIGINT".to_string(),
        ColumnType::Intn => "INT".to_string(),
        ColumnType::Float4 => "REAL".to_string(),
        ColumnType::Float8 | ColumnType::Floatn => "FLOAT".to_string(),
        ColumnType::Datetime | ColumnType::Datetimen => "DATETIME".to_string(),
        ColumnType::Datetime2 => "DATETIME2".to_string(),
        ColumnType::DatetimeOffsetn => "DATETIMEOFFSET".to_string(),
        ColumnType::Daten => "DATE".to_string(),
        ColumnType::Timen => "TIME".to_string(),
        ColumnType::Decimaln => "DECIMAL".to_string(),
        ColumnType::Numericn => "NUMERIC".to_string(),
        ColumnType::Money => "MONEY".to_string(),
        ColumnType::Money4 => "SMALLMONEY".to_string(),
        ColumnType::Guid => "UNIQUEIDENTIFIER".to_string(),
        ColumnType::BigVarChar => "VARCHAR".to_string(),
        ColumnType::BigChar => "CHAR".to_string(),
        ColumnType::NVarchar => "NVARCHAR".to_string(),
        ColumnType::NChar => "NCHAR".to_string(),
        ColumnType::Text => "TEXT".to_string(),
        ColumnType::NText => "NTEXT".to_string(),
        ColumnType::BigVarBin => "VARBINARY".to_string(),
        ColumnType::BigBinary => "BINARY".to_string(),
        ColumnType::Image => "IMAGE".to_string(),
        ColumnType::Xml => "XML".to_string(),
        _ => "UNKNOWN".to_string(),
    }
}

fn extract_cell_value(row: &Row, index: usize, col: &Column) -> CellValue {
    match col.column_type() {
        ColumnType::Null => CellValue::Null,
        ColumnType::Bit | ColumnType::Bitn => row.get::<bool, _>(index).into(),
        ColumnType::Int1 => row.get::<u8, _>(index).map(|v| v as i64).into(),
        ColumnType::Int2 => row.get::<i16, _>(index).map(|v| v as i64).into(),
        ColumnType::Int4 => row.get::<i32, _>(index).into(),
        ColumnType::Int8 => row.get::<i64, _>(index).into(),
        ColumnType::Float4 => row.get::<f32, _>(index).map(|v| v as f64).into(),
        ColumnType::Float8 | ColumnType::Money | ColumnType::Money4 => row.get::<f64, _>(index).into(),
        ColumnType::Decimaln | ColumnType::Numericn => row
            .get::<Decimal, _>(index)
            .map(CellValue::Decimal)
            .unwrap_or(CellValue::Null),
        ColumnType::Datetime | ColumnType::Datetime2 | ColumnType::Datetimen | ColumnType::Datetime4 => row
            .get::<NaiveDateTime, _>(index)
            .map(CellValue::DateTime)
            .unwrap_or(CellValue::Null),
        ColumnType::Daten => row
            .get::<NaiveDate, _>(index)
            .map(CellValue::Date)
            .unwrap_or(CellValue::Null),
        ColumnType::Timen => row
            .get::<NaiveTime, _>(index)
            .map(|v| CellValue::String(v.format("%H:%M:%S%.f").to_string()))
            .unwrap_or(CellValue::Null),
        ColumnType::DatetimeOffsetn => row
            .get::<DateTime<FixedOffset>, _>(index)
            .map(|v| CellValue::String(v.format("%Y-%m-%d %H:%M:%S %:z").to_string()))
            .unwrap_or(CellValue::Null),
        ColumnType::BigVarChar
        | ColumnType::BigChar
        | ColumnType::NVarchar
        | ColumnType::NChar
        | ColumnType::Text
        | ColumnType::NText
        | ColumnType::Xml => row.get::<&str, _>(index).into(),
        ColumnType::Guid => row
            .get::<tiberius::Uuid, _>(index)
            .map(|v| CellValue::String(v.to_string()))
            .unwrap_or(CellValue::Null),
        ColumnType::BigVarBin | ColumnType::BigBinary | ColumnType::Image => row
            .get::<&[u8], _>(index)
            .map(|v| CellValue::Binary(v.to_vec()))
            .unwrap_or(CellValue::Null),
        _ => {
            // Nullable variable-width types (Intn, Floatn) report their width
            // only through the value itself
            if let Some(v) = row.try_get::<i64, _>(index).ok().flatten() {
                return CellValue::Int(v);
            }
            if let Some(v) = row.try_get::<i32, _>(index).ok().flatten() {
                return CellValue::Int(v as i64);
            }
            if let Some(v) = row.try_get::<i16, _>(index).ok().flatten() {
                return CellValue::Int(v as i64);
            }
            if let Some(v) = row.try_get::<u8, _>(index).ok().flatten() {
                return CellValue::Int(v as i64);
            }
            if let Some(v) = row.try_get::<f64, _>(index).ok().flatten() {
                return CellValue::Float(v);
            }
            if let Some(v) = row.try_get::<f32, _>(index).ok().flatten() {
                return CellValue::Float(v as f64);
            }
            if let Some(v) = row.try_get::<&str, _>(index).ok().flatten() {
                return CellValue::String(v.to_string());
            }
            if let Some(v) = row.try_get::<NaiveDateTime, _>(index).ok().flatten() {
                return CellValue::DateTime(v);
            }
            CellValue::Null
        }
    }
}
