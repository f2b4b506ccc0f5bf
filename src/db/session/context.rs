use chrono::Local;
use std::collections::HashMap;
use std::mem;
use std::sync::Arc;

use crate::db::connection::{DbHandle, ServerFlavor};
use crate::db::options::{RunMode, SourceOptions};
use crate::db::query::ResultSet;
use crate::utils::GovernanceConfig;

use super::process::{ProcessCell, ProcessRegistry, SessionPhase};
use super::records::{PrintSets, Record, RecordSets, SplitSets, Stage, LEVEL_ERROR};

pub const KILLED_MESSAGE: &str = "Operation has been killed!";

/// What the run knows about a table it has seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    pub name: String,
    /// Created earlier in this batch.
    pub is_new: bool,
    /// Dropped earlier in this batch.
    pub is_deleted: bool,
}

/// The single result container a run fills, selected by mode.
#[derive(Debug)]
pub enum RunOutput {
    Records(RecordSets),
    Print(PrintSets),
    Split(SplitSets),
}

impl RunOutput {
    pub fn for_mode(mode: RunMode) -> Self {
        match mode {
            RunMode::Print => RunOutput::Print(PrintSets::new()),
            RunMode::Split => RunOutput::Split(SplitSets::new()),
            RunMode::Check | RunMode::Execute => RunOutput::Records(RecordSets::new()),
        }
    }

    pub fn count(&self) -> usize {
        match self {
            RunOutput::Records(sets) => sets.count(),
            RunOutput::Print(sets) => sets.count(),
            RunOutput::Split(sets) => sets.count(),
        }
    }
}

impl Default for RunOutput {
    fn default() -> Self {
        RunOutput::Records(RecordSets::new())
    }
}

/// State owned by exactly one entry-point call.
///
/// Created when the call starts and dropped when it returns; dropping it
/// releases every connection it holds and publishes the idle state.
pub struct RunContext {
    pub conn_id: u64,
    pub options: SourceOptions,
    pub config: GovernanceConfig,
    pub mode: RunMode,
    pub stage: Stage,

    pub db: Option<Box<dyn DbHandle>>,
    pub ddl_db: Option<Box<dyn DbHandle>>,
    pub backup_db: Option<Box<dyn DbHandle>>,
    /// Inline routing directive prefixed to executed statements.
    pub directive: Option<String>,
    pub server_version: String,
    pub flavor: ServerFlavor,

    pub db_name: String,
    pub have_begin: bool,
    pub have_commit: bool,

    pub table_cache: HashMap<String, TableInfo>,
    pub db_cache: HashMap<String, bool>,
    pub backup_cache: HashMap<String, bool>,
    /// Fingerprint to index of the first record carrying it.
    pub fingerprints: Option<HashMap<String, usize>>,

    pub output: RunOutput,
    pub current: Record,
    pub result_set: Option<ResultSet>,
    pub affected_rows: Option<u64>,
    pub diagnostics: Vec<String>,

    pub process: Arc<ProcessCell>,
    pub registry: Option<Arc<ProcessRegistry>>,
}

impl RunContext {
    pub fn new(
        conn_id: u64,
        options: SourceOptions,
        config: GovernanceConfig,
        process: Arc<ProcessCell>,
        registry: Option<Arc<ProcessRegistry>>,
    ) -> Self {
        let mode = options.mode();
        process.publish(|pi| {
            pi.oper_state = SessionPhase::Initializing;
            pi.percent = 0.0;
            pi.info.clear();
        });
        Self {
            conn_id,
            options,
            config,
            mode,
            stage: Stage::Check,
            db: None,
            ddl_db: None,
            backup_db: None,
            directive: None,
            server_version: String::new(),
            flavor: ServerFlavor::Standard,
            db_name: String::new(),
            have_begin: false,
            have_commit: false,
            table_cache: HashMap::new(),
            db_cache: HashMap::new(),
            backup_cache: HashMap::new(),
            fingerprints: None,
            output: RunOutput::default(),
            current: Record::new("", None, Stage::Check),
            result_set: None,
            affected_rows: None,
            diagnostics: Vec::new(),
            process,
            registry,
        }
    }

    pub fn records(&self) -> Option<&RecordSets> {
        match &self.output {
            RunOutput::Records(sets) => Some(sets),
            _ => None,
        }
    }

    pub fn records_mut(&mut self) -> Option<&mut RecordSets> {
        match &mut self.output {
            RunOutput::Records(sets) => Some(sets),
            _ => None,
        }
    }

    pub fn print_sets_mut(&mut self) -> Option<&mut PrintSets> {
        match &mut self.output {
            RunOutput::Print(sets) => Some(sets),
            _ => None,
        }
    }

    pub fn split_sets_mut(&mut self) -> Option<&mut SplitSets> {
        match &mut self.output {
            RunOutput::Split(sets) => Some(sets),
            _ => None,
        }
    }

    pub fn set_phase(&self, phase: SessionPhase) {
        self.process.publish(|pi| pi.oper_state = phase);
    }

    pub fn publish_progress(&self, sql: &str, percent: f64) {
        self.process.publish(|pi| {
            pi.info = sql.to_string();
            pi.time = Some(Local::now());
            pi.percent = percent;
        });
    }

    /// Terminal entry for text the parser rejected.
    pub fn append_parse_failure(&mut self, sql: &str, message: &str) {
        match &mut self.output {
            RunOutput::Print(sets) => sets.append(LEVEL_ERROR, sql, "", message),
            RunOutput::Split(sets) => {
                sets.add_new_split_node();
                sets.append(sql, message);
            }
            RunOutput::Records(sets) => {
                sets.append(Record::parse_failure(sql, message));
            }
        }
    }

    /// Terminal entry for a run stopped by a kill request.
    pub fn append_killed(&mut self) {
        self.current.append_message(LEVEL_ERROR, KILLED_MESSAGE);
        let current = mem::replace(&mut self.current, Record::new("", None, self.stage));
        match &mut self.output {
            RunOutput::Print(sets) => sets.append(LEVEL_ERROR, "", "", current.buf.trim()),
            RunOutput::Split(sets) => {
                sets.add_new_split_node();
                sets.append("", current.buf.trim());
            }
            RunOutput::Records(sets) => {
                sets.append(current);
            }
        }
    }

    /// Whether any checked record should block execution.
    pub fn has_error_before(&self) -> bool {
        let ignore_warnings = self.options.ignore_warnings;
        self.records().map_or(false, |sets| {
            sets.iter()
                .any(|r| r.is_error() || (r.is_warning() && !ignore_warnings))
        })
    }

    /// Take the output container out, leaving an empty one behind.
    pub fn take_output(&mut self) -> RunOutput {
        mem::take(&mut self.output)
    }

    fn open_connections(&self) -> usize {
        [&self.db, &self.ddl_db, &self.backup_db]
            .iter()
            .filter(|handle| handle.is_some())
            .count()
    }
}

impl Drop for RunContext {
    fn drop(&mut self) {
        let open = self.open_connections();
        if open > 0 {
            log::debug!("con:{} releasing {} connection(s)", self.conn_id, open);
        }
        self.db = None;
        self.ddl_db = None;
        self.backup_db = None;
        self.process.publish(|pi| {
            pi.oper_state = SessionPhase::Idle;
            pi.info.clear();
        });
    }
}
