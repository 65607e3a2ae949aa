use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use comfy_table::presets::UTF8_FULL;
use comfy_table::Table;
use sql_session::db::{CellValue, DatabaseBackend, Frame, IfExists, SqlDialect, WriteOptions};
use sql_session::{export, AppConfig, ConnectionConfig, MssqlDialect, PostgresDialect, Session};
use std::path::PathBuf;

/// Run queries, stored procedures and table loads against SQL Server or PostgreSQL.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    /// Do not print connect/close banners.
    #[arg(long, global = true)]
    silent: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ConnectionArgs {
    /// Saved profile to connect with (see `profiles`).
    #[arg(long, global = true)]
    profile: Option<String>,

    /// mssql or postgres.
    #[arg(long, global = true, default_value = "mssql")]
    backend: DatabaseBackend,

    #[arg(long, global = true)]
    host: Option<String>,

    /// Defaults to the backend's standard port.
    #[arg(long, global = true)]
    port: Option<u16>,

    #[arg(long, global = true)]
    database: Option<String>,

    #[arg(long, global = true)]
    user: Option<String>,

    /// Falls back to SQLSESSION_PASSWORD.
    #[arg(long, global = true)]
    password: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a query and print or export the result.
    Query {
        sql: String,
        /// Write the result to a CSV file instead of printing it.
        #[arg(long)]
        csv: Option<PathBuf>,
        /// Write the result to a JSON file instead of printing it.
        #[arg(long)]
        json: Option<PathBuf>,
    },
    /// Execute a stored procedure with positional parameters.
    ExecSp { name: String, params: Vec<String> },
    /// Load a CSV file into schema.table.
    Load {
        csv: PathBuf,
        table: String,
        /// fail, replace or append.
        #[arg(long, default_value = "fail")]
        if_exists: IfExists,
        /// Also write the row number as an `index` column.
        #[arg(long)]
        index: bool,
        #[arg(long)]
        chunksize: Option<usize>,
    },
    /// Manage saved connection profiles.
    Profiles {
        #[command(subcommand)]
        action: ProfileAction,
    },
}

#[derive(Subcommand)]
enum ProfileAction {
    List,
    /// Save the connection flags under NAME.
    Add { name: String },
    Remove { name: String },
}

fn main() -> anyhow::Result<()> {
    sql_session::init_tracing();
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    match cli.command {
        Commands::Profiles { action } => handle_profiles(action, &cli.connection),
        command => {
            let config = resolve_connection(&cli.connection)?;
            match config.backend {
                DatabaseBackend::SqlServer => {
                    let session = Session::connect(MssqlDialect::default(), config, cli.silent)?;
                    session.scoped(|s| run_command(s, command))
                }
                DatabaseBackend::Postgres => {
                    let session = Session::connect(PostgresDialect, config, cli.silent)?;
                    session.scoped(|s| run_command(s, command))
                }
            }
        }
    }
}

/// Profile if given, otherwise the individual connection flags
fn resolve_connection(args: &ConnectionArgs) -> anyhow::Result<ConnectionConfig> {
    if let Some(name) = &args.profile {
        let app_config = AppConfig::load()?;
        return app_config
            .get_connection(name)
            .cloned()
            .with_context(|| format!("no saved profile named {name:?}"));
    }

    let password = match &args.password {
        Some(p) => p.clone(),
        None => std::env::var("SQLSESSION_PASSWORD").unwrap_or_default(),
    };
    let config = ConnectionConfig::new(
        args.host.clone().unwrap_or_default(),
        args.port.unwrap_or_else(|| args.backend.default_port()),
        args.database.clone().unwrap_or_default(),
        args.user.clone().unwrap_or_default(),
        password,
    )
    .with_backend(args.backend);

    if !config.is_valid() {
        bail!("--host, --database and --user are required without --profile");
    }
    Ok(config)
}

fn run_command<D: SqlDialect>(session: &mut Session<D>, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Query { sql, csv, json } => {
            let frame = session.select_statement(&sql)?;
            if let Some(path) = &csv {
                export::write_csv(&frame, path)?;
            }
            if let Some(path) = &json {
                export::write_json(&frame, path)?;
            }
            if csv.is_none() && json.is_none() {
                println!("{}", render(&frame));
            }
            println!("({} rows)", frame.row_count());
        }
        Commands::ExecSp { name, params } => {
            let params: Vec<CellValue> = params.iter().map(|p| CellValue::parse_literal(p)).collect();
            session.exec_sp(&name, &params)?;
        }
        Commands::Load {
            csv,
            table,
            if_exists,
            index,
            chunksize,
        } => {
            let frame = export::read_csv(&csv)
                .with_context(|| format!("reading {}", csv.display()))?;
            let mut options = WriteOptions::new(if_exists).with_index(index);
            options.chunksize = chunksize;
            session.write_table(&frame, &table, options)?;
            println!("{} rows written to {}", frame.row_count(), table);
        }
        Commands::Profiles { .. } => bail!("profiles do not open a session"),
    }
    Ok(())
}

fn handle_profiles(action: ProfileAction, args: &ConnectionArgs) -> anyhow::Result<()> {
    let mut app_config = AppConfig::load()?;
    match action {
        ProfileAction::List => {
            for conn in &app_config.connections {
                let marker = if app_config.last_connection.as_deref() == Some(conn.name.as_str()) {
                    "*"
                } else {
                    " "
                };
                println!(
                    "{marker} {} ({}) {}@{}:{}/{}",
                    conn.name, conn.backend, conn.user, conn.host, conn.port, conn.database
                );
            }
        }
        ProfileAction::Add { name } => {
            let config = resolve_connection(&ConnectionArgs {
                profile: None,
                backend: args.backend,
                host: args.host.clone(),
                port: args.port,
                database: args.database.clone(),
                user: args.user.clone(),
                password: args.password.clone(),
            })?
            .with_name(&name);
            app_config.add_connection(config);
            app_config.set_last_connection(&name);
            app_config.save()?;
            println!("Saved profile {name}");
        }
        ProfileAction::Remove { name } => {
            app_config.remove_connection(&name);
            app_config.save()?;
            println!("Removed profile {name}");
        }
    }
    Ok(())
}

fn render(frame: &Frame) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(frame.column_names());
    for row in &frame.rows {
        table.add_row(row.iter().map(|c| c.to_string()));
    }
    table
}
