use thiserror::Error;

/// Errors raised by a database handle or connector.
#[derive(Error, Debug)]
pub enum DbError {
    #[error(transparent)]
    Oracle(#[from] oracle::Error),

    #[error("{0}")]
    Other(String),
}

/// Errors raised by the parser adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("{0}")]
    Syntax(String),

    #[error("parser produced no nodes for non-trivial input")]
    Empty,
}

/// Top-level failure of a session run.
///
/// Per-statement problems never show up here; they are recorded on the
/// statement's own record. Only failures that stop the whole batch do.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("no data source configured")]
    NoDataSource,

    #[error("Invalid source information: {0}")]
    InvalidSource(String),

    #[error("Invalid backup host information: {0}")]
    InvalidBackupSource(String),

    #[error("binary logging is not enabled on the target, backup is impossible")]
    BinlogDisabled,

    #[error("invalid tls mode `{0}`")]
    InvalidTls(String),

    #[error("con:{conn_id} {source}")]
    Connect {
        conn_id: u64,
        #[source]
        source: DbError,
    },

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("Operation has been killed!")]
    Killed,

    #[error(transparent)]
    Db(#[from] DbError),
}

impl SessionError {
    pub fn is_killed(&self) -> bool {
        matches!(self, SessionError::Killed)
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
