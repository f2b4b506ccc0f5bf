use serde::Serialize;
use sqlparser::ast::Statement;

/// One flushable piece of a script, as cut by the statement splitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptChunk {
    pub text: String,
    /// Zero-based index of the line that closed this chunk.
    pub end_line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum AdminCommand {
    ShowVariables,
    ShowProcesslist,
    Kill { id: u64 },
}

/// Closed set of statement shapes the mode router understands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StatementKind {
    /// Session-control marker opening a governed batch.
    MagicStart,
    /// Session-control marker closing a governed batch.
    MagicCommit,
    LocalSet {
        variable: String,
        value: String,
    },
    Admin(AdminCommand),
    Use {
        database: String,
    },
    Query,
    Insert {
        table: String,
    },
    Update {
        table: String,
        has_where: bool,
    },
    Delete {
        table: String,
        has_where: bool,
    },
    Ddl {
        verb: String,
        object: String,
        table: Option<String>,
    },
    Other,
}

impl StatementKind {
    /// Markers are consumed by the pipeline and never reach a handler.
    pub fn is_session_marker(&self) -> bool {
        matches!(self, StatementKind::MagicStart | StatementKind::MagicCommit)
    }

    pub fn is_ddl(&self) -> bool {
        matches!(self, StatementKind::Ddl { .. })
    }

    pub fn is_dml(&self) -> bool {
        matches!(
            self,
            StatementKind::Insert { .. } | StatementKind::Update { .. } | StatementKind::Delete { .. }
        )
    }

    /// Table touched by the statement, when it touches exactly one.
    pub fn table(&self) -> Option<&str> {
        match self {
            StatementKind::Insert { table }
            | StatementKind::Update { table, .. }
            | StatementKind::Delete { table, .. } => Some(table.as_str()),
            StatementKind::Ddl { table, .. } => table.as_deref(),
            _ => None,
        }
    }

    /// Whether literal-independent deduplication applies.
    ///
    /// Only queries and DML qualify: their verdict does not depend on, or
    /// change, the schema state tracked across the batch.
    pub fn is_fingerprintable(&self) -> bool {
        matches!(self, StatementKind::Query) || self.is_dml()
    }
}

/// A parsed statement: its original text, its shape, and its AST when it has one.
#[derive(Debug, Clone)]
pub struct StatementNode {
    pub text: String,
    pub kind: StatementKind,
    pub ast: Option<Statement>,
}

impl StatementNode {
    pub fn new(text: &str, kind: StatementKind, ast: Option<Statement>) -> Self {
        Self {
            text: text.to_string(),
            kind,
            ast,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
}

impl ColumnInfo {
    pub fn text(name: &str) -> Self {
        Self {
            name: name.to_string(),
            data_type: "VARCHAR2".to_string(),
        }
    }
}

/// Tabular output of an administrative statement that takes over the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultSet {
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Vec<String>>,
    pub message: String,
}

impl ResultSet {
    pub fn new(columns: Vec<ColumnInfo>, rows: Vec<Vec<String>>) -> Self {
        let message = format!("{} rows fetched", rows.len());
        Self {
            columns,
            rows,
            message,
        }
    }

    pub fn message(message: &str) -> Self {
        Self {
            columns: vec![],
            rows: vec![],
            message: message.to_string(),
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}
