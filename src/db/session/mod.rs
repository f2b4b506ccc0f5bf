pub mod context;
pub mod pipeline;
pub mod process;
pub mod provision;
pub mod records;

pub use process::{ProcessCell, ProcessRegistry, SessionPhase};
pub use records::{PrintRecord, Record, RunReport, SplitRecord};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::db::connection::Connector;
use crate::db::error::{Result, SessionError};
use crate::db::handler::{BasicCommandHandler, CommandHandler};
use crate::db::options::{RunMode, SourceOptions};
use crate::db::query::{DialectParser, ResultSet, SqlParser};
use crate::utils::GovernanceConfig;

use context::{RunContext, RunOutput};
use pipeline::Services;

/// Source of connection ids, shared by every session a process creates.
#[derive(Debug)]
pub struct ConnectionIds {
    next: AtomicU64,
}

impl ConnectionIds {
    pub fn new(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for ConnectionIds {
    fn default() -> Self {
        Self::new(1)
    }
}

pub struct SessionBuilder {
    connector: Arc<dyn Connector>,
    config: Arc<GovernanceConfig>,
    parser: Option<Box<dyn SqlParser>>,
    handler: Option<Box<dyn CommandHandler>>,
    registry: Option<Arc<ProcessRegistry>>,
}

impl SessionBuilder {
    pub fn new(connector: Arc<dyn Connector>, config: Arc<GovernanceConfig>) -> Self {
        Self {
            connector,
            config,
            parser: None,
            handler: None,
            registry: None,
        }
    }

    pub fn parser(mut self, parser: Box<dyn SqlParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    pub fn handler(mut self, handler: Box<dyn CommandHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn registry(mut self, registry: Arc<ProcessRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn build(self, ids: &ConnectionIds) -> Session {
        let conn_id = ids.next();
        let process = Arc::new(ProcessCell::new(conn_id));
        if let Some(registry) = &self.registry {
            registry.register(conn_id, Arc::clone(&process));
        }
        let parser = self
            .parser
            .unwrap_or_else(|| Box::new(DialectParser::new(&self.config.sql_dialect)) as Box<dyn SqlParser>);
        Session {
            conn_id,
            options: None,
            config: self.config,
            parser,
            connector: self.connector,
            handler: self
                .handler
                .unwrap_or_else(|| Box::new(BasicCommandHandler::new()) as Box<dyn CommandHandler>),
            process,
            registry: self.registry,
            last_result_set: None,
        }
    }
}

/// One logical client connection.
///
/// Reused across runs; everything a run touches lives in a `RunContext`
/// that is dropped when the entry point returns. Calls must be serialized.
pub struct Session {
    conn_id: u64,
    options: Option<SourceOptions>,
    config: Arc<GovernanceConfig>,
    parser: Box<dyn SqlParser>,
    connector: Arc<dyn Connector>,
    handler: Box<dyn CommandHandler>,
    process: Arc<ProcessCell>,
    registry: Option<Arc<ProcessRegistry>>,
    last_result_set: Option<ResultSet>,
}

impl Session {
    pub fn conn_id(&self) -> u64 {
        self.conn_id
    }

    /// Shared status cell, for polling progress or requesting a kill.
    pub fn process_handle(&self) -> Arc<ProcessCell> {
        Arc::clone(&self.process)
    }

    pub fn load_options(&mut self, options: SourceOptions) {
        self.options = Some(options);
    }

    /// Result set produced by an administrative statement in the last run.
    pub fn last_result_set(&self) -> Option<&ResultSet> {
        self.last_result_set.as_ref()
    }

    /// Check-only run: no mutation, no commit.
    pub fn audit(&mut self, script: &str) -> RunReport<Record> {
        let (mut ctx, result) = match self.start(RunMode::Check, script) {
            Ok(started) => started,
            Err(err) => return RunReport::failed(err),
        };
        self.finish_records(&mut ctx, result)
    }

    /// Check, then execute the batch when no record blocks it.
    pub fn run_execute(&mut self, script: &str) -> RunReport<Record> {
        let (mut ctx, mut result) = match self.start(RunMode::Execute, script) {
            Ok(started) => started,
            Err(err) => return RunReport::failed(err),
        };

        if result.is_ok() && ctx.result_set.is_none() {
            if ctx.has_error_before() {
                log::info!("con:{} execution skipped, check found errors", self.conn_id);
            } else if let Err(err) = self.handler.commit(&mut ctx) {
                log::error!("con:{} {}", self.conn_id, err);
                result = Err(err);
            }
        }
        self.finish_records(&mut ctx, result)
    }

    pub fn print(&mut self, script: &str) -> RunReport<PrintRecord> {
        let (mut ctx, result) = match self.start(RunMode::Print, script) {
            Ok(started) => started,
            Err(err) => return RunReport::failed(err),
        };
        let rows = match ctx.take_output() {
            RunOutput::Print(sets) => sets.into_rows(),
            _ => Vec::new(),
        };
        self.report(&mut ctx, rows, result)
    }

    /// Alias of `print`.
    pub fn query_tree(&mut self, script: &str) -> RunReport<PrintRecord> {
        self.print(script)
    }

    pub fn split(&mut self, script: &str) -> RunReport<SplitRecord> {
        let (mut ctx, result) = match self.start(RunMode::Split, script) {
            Ok(started) => started,
            Err(err) => return RunReport::failed(err),
        };
        let rows = match ctx.take_output() {
            RunOutput::Split(sets) => sets.into_rows(),
            _ => Vec::new(),
        };
        self.report(&mut ctx, rows, result)
    }

    /// Build the run's context and drive the shared pipeline.
    fn start(&mut self, mode: RunMode, script: &str) -> Result<(RunContext, Result<()>)> {
        let options = self
            .options
            .as_ref()
            .ok_or(SessionError::NoDataSource)?
            .with_mode(mode);

        self.process.reset_kill();
        self.last_result_set = None;

        let mut ctx = RunContext::new(
            self.conn_id,
            options,
            GovernanceConfig::clone(&self.config),
            Arc::clone(&self.process),
            self.registry.clone(),
        );
        let services = Services {
            parser: &*self.parser,
            connector: &*self.connector,
            handler: &mut *self.handler,
        };
        let result = pipeline::audit(&mut ctx, script, services);
        if let Err(err) = &result {
            log::error!("con:{} {}", self.conn_id, err);
        }
        Ok((ctx, result))
    }

    fn finish_records(&mut self, ctx: &mut RunContext, result: Result<()>) -> RunReport<Record> {
        let rows = match ctx.take_output() {
            RunOutput::Records(sets) => sets.into_rows(),
            _ => Vec::new(),
        };
        self.report(ctx, rows, result)
    }

    fn report<T>(&mut self, ctx: &mut RunContext, records: Vec<T>, result: Result<()>) -> RunReport<T> {
        ctx.set_phase(SessionPhase::Finalizing);
        self.last_result_set = ctx.result_set.take();
        RunReport {
            records,
            error: result.err(),
            affected_rows: ctx.affected_rows.unwrap_or(0),
            diagnostics: std::mem::take(&mut ctx.diagnostics),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(registry) = &self.registry {
            registry.unregister(self.conn_id);
        }
    }
}
