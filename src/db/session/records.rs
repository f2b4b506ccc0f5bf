use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::Arc;

use crate::db::error::SessionError;
use crate::db::query::StatementNode;

pub const LEVEL_OK: u8 = 0;
pub const LEVEL_WARNING: u8 = 1;
pub const LEVEL_ERROR: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Check,
    Execute,
    Backup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StageStatus {
    None,
    AuditCompleted,
    ExecuteSuccessfully,
    ExecuteFailed,
    Skipped,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            StageStatus::None => "",
            StageStatus::AuditCompleted => "Audit Completed",
            StageStatus::ExecuteSuccessfully => "Execute Successfully",
            StageStatus::ExecuteFailed => "Execute Failed",
            StageStatus::Skipped => "Skipped",
        };
        f.write_str(text)
    }
}

/// Audit/execute outcome of one statement.
#[derive(Debug, Clone, Serialize)]
pub struct Record {
    pub seq_no: usize,
    pub sql: String,
    pub err_level: u8,
    pub error_message: String,
    #[serde(skip)]
    pub buf: String,
    pub stage: Stage,
    pub stage_status: StageStatus,
    pub affected_rows: u64,
    pub exec_time: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub execute_message: String,
    pub db_name: String,
    #[serde(skip_serializing_if = "is_zero")]
    pub duplicates: usize,
    #[serde(skip)]
    pub node: Option<Arc<StatementNode>>,
}

fn is_zero(value: &usize) -> bool {
    *value == 0
}

impl Record {
    pub fn new(sql: &str, node: Option<Arc<StatementNode>>, stage: Stage) -> Self {
        Self {
            seq_no: 0,
            sql: sql.to_string(),
            err_level: LEVEL_OK,
            error_message: String::new(),
            buf: String::new(),
            stage,
            stage_status: StageStatus::None,
            affected_rows: 0,
            exec_time: "0".to_string(),
            execute_message: String::new(),
            db_name: String::new(),
            duplicates: 0,
            node,
        }
    }

    /// Terminal entry for a batch that could not be parsed.
    pub fn parse_failure(sql: &str, message: &str) -> Self {
        let mut record = Self::new(sql, None, Stage::Check);
        record.append_message(LEVEL_ERROR, message);
        record.seal();
        record
    }

    /// Add a diagnostic line; the level only ever rises.
    pub fn append_message(&mut self, level: u8, message: &str) {
        self.err_level = self.err_level.max(level.min(LEVEL_ERROR));
        if !self.buf.is_empty() {
            self.buf.push('\n');
        }
        self.buf.push_str(message.trim());
    }

    /// Move the diagnostic buffer into the visible message.
    pub fn seal(&mut self) {
        self.error_message = self.buf.trim().to_string();
    }

    pub fn is_error(&self) -> bool {
        self.err_level >= LEVEL_ERROR
    }

    pub fn is_warning(&self) -> bool {
        self.err_level == LEVEL_WARNING
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordSets {
    records: Vec<Record>,
}

impl RecordSets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, record: Record) -> usize {
        self.records.push(record);
        self.records.len() - 1
    }

    pub fn count(&self) -> usize {
        self.records.len()
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Record> {
        self.records.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.iter()
    }

    /// Final output: sealed and renumbered to match output order.
    pub fn into_rows(self) -> Vec<Record> {
        self.records
            .into_iter()
            .enumerate()
            .map(|(seq_no, mut record)| {
                record.seq_no = seq_no;
                record.seal();
                record
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrintRecord {
    pub id: usize,
    pub sql: String,
    pub query_tree: String,
    pub err_level: u8,
    pub error_message: String,
}

#[derive(Debug, Clone, Default)]
pub struct PrintSets {
    records: Vec<PrintRecord>,
}

impl PrintSets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, err_level: u8, sql: &str, query_tree: &str, error_message: &str) {
        let id = self.records.len();
        self.records.push(PrintRecord {
            id,
            sql: sql.to_string(),
            query_tree: query_tree.to_string(),
            err_level,
            error_message: error_message.to_string(),
        });
    }

    pub fn count(&self) -> usize {
        self.records.len()
    }

    pub fn into_rows(self) -> Vec<PrintRecord> {
        self.records
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SplitRecord {
    pub id: usize,
    pub sql: String,
    pub ddl_flag: bool,
    pub error_message: String,
}

/// Group of consecutive statements being collected into one split record.
#[derive(Debug, Clone)]
struct SplitGroup {
    table: Option<String>,
    ddl: bool,
    statements: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SplitSets {
    records: Vec<SplitRecord>,
    current: Option<SplitGroup>,
}

impl SplitSets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a statement to the open group, opening a new one when the
    /// table or the DDL/DML kind changes.
    pub fn push_statement(&mut self, table: Option<&str>, ddl: bool, sql: &str) {
        let table = table.map(|t| t.to_lowercase());
        let starts_new = match &self.current {
            Some(group) => {
                group.ddl != ddl || (table.is_some() && group.table.is_some() && group.table != table)
            }
            None => true,
        };
        if starts_new {
            self.add_new_split_node();
        }

        let group = self.current.get_or_insert_with(|| SplitGroup {
            table: None,
            ddl,
            statements: Vec::new(),
        });
        if group.table.is_none() {
            group.table = table;
        }
        group.statements.push(sql.to_string());
    }

    /// Attach a statement to the open group without affecting grouping.
    pub fn push_passthrough(&mut self, sql: &str) {
        match self.current.as_mut() {
            Some(group) => group.statements.push(sql.to_string()),
            None => {
                self.current = Some(SplitGroup {
                    table: None,
                    ddl: false,
                    statements: vec![sql.to_string()],
                })
            }
        }
    }

    /// Close the open group, if any, into a split record.
    pub fn add_new_split_node(&mut self) {
        if let Some(group) = self.current.take() {
            if group.statements.is_empty() {
                return;
            }
            let mut sql = group.statements.join(";\n");
            sql.push(';');
            let id = self.records.len();
            self.records.push(SplitRecord {
                id,
                sql,
                ddl_flag: group.ddl,
                error_message: String::new(),
            });
        }
    }

    pub fn append(&mut self, sql: &str, error_message: &str) {
        let id = self.records.len();
        self.records.push(SplitRecord {
            id,
            sql: sql.to_string(),
            ddl_flag: false,
            error_message: error_message.to_string(),
        });
    }

    pub fn count(&self) -> usize {
        self.records.len()
    }

    pub fn into_rows(mut self) -> Vec<SplitRecord> {
        self.add_new_split_node();
        self.records
    }
}

/// What an entry operation hands back: the records plus the run's own error.
#[derive(Debug, Serialize)]
pub struct RunReport<T> {
    pub records: Vec<T>,
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<SessionError>,
    pub affected_rows: u64,
    pub diagnostics: Vec<String>,
}

fn serialize_error<S: Serializer>(
    error: &Option<SessionError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match error {
        Some(err) => serializer.serialize_some(&err.to_string()),
        None => serializer.serialize_none(),
    }
}

impl<T> RunReport<T> {
    pub fn failed(error: SessionError) -> Self {
        Self {
            records: Vec::new(),
            error: Some(error),
            affected_rows: 0,
            diagnostics: Vec::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_result(self) -> Result<Vec<T>, SessionError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.records),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_message_raises_level_only() {
        let mut record = Record::new("DELETE FROM t", None, Stage::Check);
        record.append_message(LEVEL_ERROR, "first");
        record.append_message(LEVEL_WARNING, "second");
        record.seal();
        assert_eq!(record.err_level, LEVEL_ERROR);
        assert_eq!(record.error_message, "first\nsecond");
    }

    #[test]
    fn test_record_sets_resequence() {
        let mut sets = RecordSets::new();
        for sql in ["a", "b", "c"] {
            let mut record = Record::new(sql, None, Stage::Check);
            record.seq_no = 99;
            sets.append(record);
        }
        let rows = sets.into_rows();
        let seqs: Vec<usize> = rows.iter().map(|r| r.seq_no).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[test]
    fn test_split_groups_by_table_and_kind() {
        let mut sets = SplitSets::new();
        sets.push_statement(Some("t1"), false, "insert into t1 values(1)");
        sets.push_statement(Some("T1"), false, "update t1 set a = 2");
        sets.push_statement(Some("t1"), true, "alter table t1 add column b int");
        sets.push_statement(Some("t2"), true, "alter table t2 add column c int");
        let rows = sets.into_rows();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].sql, "insert into t1 values(1);\nupdate t1 set a = 2;");
        assert!(!rows[0].ddl_flag);
        assert!(rows[1].ddl_flag);
        assert_eq!(rows[2].id, 2);
    }

    #[test]
    fn test_run_report_serializes_error_text() {
        let report: RunReport<Record> = RunReport::failed(SessionError::Killed);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["error"], "Operation has been killed!");
        assert!(report.into_result().unwrap_err().is_killed());
    }
}
