use clap::{Args, Parser, Subcommand, ValueHint};
use serde::Serialize;
use std::error::Error;
use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;

use crate::db::{
    ConnectionIds, OracleConnector, ProcessRegistry, RunReport, Session, SessionBuilder,
    SourceOptions,
};
use crate::utils::credential_store;
use crate::utils::GovernanceConfig;

#[derive(Debug, Parser)]
#[command(name = "sqlgate")]
#[command(about = "Audit, execute, print or split SQL scripts against a governed database")]
pub struct Cli {
    /// Configuration file (defaults to the user config directory).
    #[arg(long, global = true, value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Check a script without changing anything.
    Audit(RunArgs),
    /// Check a script, then execute it when no statement is blocked.
    Execute(RunArgs),
    /// Print the parsed structure of each statement.
    Print(RunArgs),
    /// Regroup a script into batches by table and statement kind.
    Split(RunArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Script file. Use '-' or omit to read from stdin.
    #[arg(long, short = 'f', value_hint = ValueHint::FilePath)]
    pub file: Option<PathBuf>,

    /// JSON file holding the data source options; flags below override it.
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub options: Option<PathBuf>,

    #[arg(long)]
    pub host: Option<String>,
    #[arg(long)]
    pub port: Option<u16>,
    #[arg(long, short = 'u')]
    pub user: Option<String>,
    /// Password; when empty the OS keyring is consulted.
    #[arg(long, short = 'p')]
    pub password: Option<String>,
    #[arg(long)]
    pub db: Option<String>,
    #[arg(long)]
    pub ssl: Option<String>,

    #[arg(long)]
    pub backup: bool,
    #[arg(long)]
    pub ignore_warnings: bool,
    #[arg(long)]
    pub fingerprint: bool,
    #[arg(long)]
    pub sleep: Option<i64>,
    #[arg(long)]
    pub sleep_rows: Option<i64>,
    #[arg(long)]
    pub tran_batch: Option<i64>,
    #[arg(long)]
    pub middleware_extend: Option<String>,
    #[arg(long)]
    pub middleware_db: Option<String>,

    /// Override a configuration variable, `name=value`. Repeatable.
    #[arg(long = "set", value_name = "NAME=VALUE")]
    pub overrides: Vec<String>,

    /// Store the given password in the OS keyring for this target.
    #[arg(long)]
    pub remember_password: bool,
}

impl RunArgs {
    fn source_options(&self) -> Result<SourceOptions, Box<dyn Error>> {
        let mut options = match &self.options {
            Some(path) => serde_json::from_str::<SourceOptions>(&fs::read_to_string(path)?)?,
            None => SourceOptions::default(),
        };

        if let Some(host) = &self.host {
            options.host = host.clone();
        }
        if let Some(port) = self.port {
            options.port = port;
        }
        if let Some(user) = &self.user {
            options.user = user.clone();
        }
        if let Some(password) = &self.password {
            options.password = password.clone();
        }
        if let Some(db) = &self.db {
            options.db = db.clone();
        }
        if let Some(ssl) = &self.ssl {
            options.ssl = ssl.clone();
        }
        if let Some(extend) = &self.middleware_extend {
            options.middleware_extend = extend.clone();
        }
        if let Some(db) = &self.middleware_db {
            options.middleware_db = db.clone();
        }
        if let Some(sleep) = self.sleep {
            options.sleep = sleep;
        }
        if let Some(rows) = self.sleep_rows {
            options.sleep_rows = rows;
        }
        if let Some(batch) = self.tran_batch {
            options.tran_batch = batch;
        }
        options.backup |= self.backup;
        options.ignore_warnings |= self.ignore_warnings;
        options.fingerprint |= self.fingerprint;
        Ok(options)
    }

    fn read_script(&self) -> io::Result<String> {
        match &self.file {
            Some(path) if path.as_os_str() != "-" => fs::read_to_string(path),
            _ => {
                let mut script = String::new();
                io::stdin().read_to_string(&mut script)?;
                Ok(script)
            }
        }
    }
}

pub struct App {
    config: GovernanceConfig,
    command: Command,
}

impl App {
    pub fn new(cli: Cli) -> Result<Self, Box<dyn Error>> {
        let config = match &cli.config {
            Some(path) => GovernanceConfig::load_from(path)?,
            None => GovernanceConfig::load(),
        };
        Ok(Self {
            config,
            command: cli.command,
        })
    }

    /// Run the selected command; returns the process exit code.
    pub fn run(mut self) -> Result<i32, Box<dyn Error>> {
        let args = match &self.command {
            Command::Audit(args)
            | Command::Execute(args)
            | Command::Print(args)
            | Command::Split(args) => args,
        };

        for item in &args.overrides {
            let (name, value) = item
                .split_once('=')
                .ok_or_else(|| format!("expected NAME=VALUE, got `{}`", item))?;
            self.config.set_var(name, value)?;
        }

        let options = args.source_options()?;
        if args.remember_password && !options.password.is_empty() {
            let account = credential_store::account_name(&options.user, &options.host, options.port);
            credential_store::store_password(&account, &options.password)?;
            log::info!("password stored for {}", account);
        }
        let script = args.read_script()?;

        let registry = Arc::new(ProcessRegistry::new());
        let mut session = SessionBuilder::new(Arc::new(OracleConnector), Arc::new(self.config))
            .registry(registry)
            .build(&ConnectionIds::default());
        session.load_options(options);

        let code = match &self.command {
            Command::Audit(_) => emit(session.audit(&script), &session)?,
            Command::Execute(_) => emit(session.run_execute(&script), &session)?,
            Command::Print(_) => emit(session.print(&script), &session)?,
            Command::Split(_) => emit(session.split(&script), &session)?,
        };
        Ok(code)
    }
}

fn emit<T: Serialize>(report: RunReport<T>, session: &Session) -> Result<i32, Box<dyn Error>> {
    for diagnostic in &report.diagnostics {
        log::warn!("con:{} {}", session.conn_id(), diagnostic);
    }
    let out = io::stdout();
    match session.last_result_set() {
        Some(result_set) => serde_json::to_writer_pretty(out.lock(), result_set)?,
        None => serde_json::to_writer_pretty(out.lock(), &report)?,
    }
    println!();
    Ok(if report.is_ok() { 0 } else { 1 })
}
