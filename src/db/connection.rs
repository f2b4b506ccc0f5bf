use oracle::Connection;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::db::error::DbError;
use crate::db::options::{redacted, TlsMode};
use crate::utils::credential_store;

/// A resolved connection target: where to connect and with which parameters.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    pub user: String,
    #[serde(skip_serializing, default)]
    pub password: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub encrypted: bool,
    pub params: Vec<(String, String)>,
}

impl fmt::Debug for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSource")
            .field("user", &self.user)
            .field("password", &redacted(&self.password))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("encrypted", &self.encrypted)
            .field("params", &self.params)
            .finish()
    }
}

impl DataSource {
    pub fn new(user: &str, password: &str, host: &str, port: u16, database: &str) -> Self {
        Self {
            user: user.to_string(),
            password: password.to_string(),
            host: host.to_string(),
            port,
            database: database.to_string(),
            encrypted: false,
            params: Vec::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: impl ToString) -> Self {
        self.params.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_tls(mut self, mode: TlsMode) -> Self {
        self.encrypted = mode.is_encrypted();
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Identity of the target including its parameters; never includes the password.
    pub fn dsn(&self) -> String {
        let query: Vec<String> = self
            .params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        let mut dsn = format!(
            "{}@{}({}:{})/{}",
            self.user,
            self.protocol(),
            self.host,
            self.port,
            self.database
        );
        if !query.is_empty() {
            dsn.push('?');
            dsn.push_str(&query.join("&"));
        }
        dsn
    }

    fn protocol(&self) -> &'static str {
        if self.encrypted {
            "tcps"
        } else {
            "tcp"
        }
    }

    /// Easy Connect string handed to the Oracle client.
    pub fn connection_string(&self) -> String {
        let mut conn_str = if self.encrypted {
            format!("tcps://{}:{}/{}", self.host, self.port, self.database)
        } else {
            format!("//{}:{}/{}", self.host, self.port, self.database)
        };
        if let Some(sdu) = self.param("maxAllowedPacket") {
            conn_str.push_str(&format!("?sdu={}", sdu));
        }
        conn_str
    }

    pub fn display_string(&self) -> String {
        format!(
            "{}@{}:{}/{}",
            self.user, self.host, self.port, self.database
        )
    }
}

/// Engine flavour detected from the server banner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerFlavor {
    Standard,
    Autonomous,
}

impl ServerFlavor {
    pub fn from_banner(banner: &str) -> Self {
        if banner.to_ascii_lowercase().contains("autonomous") {
            ServerFlavor::Autonomous
        } else {
            ServerFlavor::Standard
        }
    }

    /// Redo-based backup needs LogMiner, which managed autonomous instances restrict.
    pub fn supports_backup(&self) -> bool {
        matches!(self, ServerFlavor::Standard)
    }
}

/// An open connection owned by a single session run.
pub trait DbHandle: Send {
    /// Execute one statement; returns the number of affected rows.
    fn execute(&mut self, sql: &str) -> Result<u64, DbError>;
    fn commit(&mut self) -> Result<(), DbError>;
    fn rollback(&mut self) -> Result<(), DbError>;
    fn set_autocommit(&mut self, enabled: bool);
    fn server_version(&mut self) -> Result<String, DbError>;
    /// Whether change logging required for backups is on.
    fn binlog_enabled(&mut self) -> Result<bool, DbError>;
    fn schema_exists(&mut self, name: &str) -> Result<bool, DbError>;
    /// Make `name` the default schema for unqualified statements.
    fn use_schema(&mut self, name: &str) -> Result<(), DbError>;
    /// Append an executed statement to the change log kept in `schema`.
    fn save_backup(&mut self, schema: &str, sql: &str, affected_rows: u64) -> Result<(), DbError>;
}

/// Opens connections for a session; swapped out in tests.
pub trait Connector: Send + Sync {
    fn connect(&self, source: &DataSource) -> Result<Box<dyn DbHandle>, DbError>;
}

pub struct OracleConnector;

impl OracleConnector {
    fn resolve_password(source: &DataSource) -> String {
        if !source.password.is_empty() {
            return source.password.clone();
        }
        let account = credential_store::account_name(&source.user, &source.host, source.port);
        match credential_store::get_password(&account) {
            Ok(Some(password)) => password,
            Ok(None) => String::new(),
            Err(err) => {
                log::warn!("{err}");
                String::new()
            }
        }
    }
}

impl Connector for OracleConnector {
    fn connect(&self, source: &DataSource) -> Result<Box<dyn DbHandle>, DbError> {
        let password = Self::resolve_password(source);
        let conn_str = source.connection_string();
        let mut connection = match Connection::connect(&source.user, &password, &conn_str) {
            Ok(connection) => connection,
            Err(err) => {
                log::error!("Connection error ({}): {err}", source.display_string());
                return Err(err.into());
            }
        };

        let autocommit = source.param("autocommit") != Some("0");
        connection.set_autocommit(autocommit);
        OracleHandle::apply_default_session_settings(&connection);

        Ok(Box::new(OracleHandle { connection }))
    }
}

pub struct OracleHandle {
    connection: Connection,
}

impl OracleHandle {
    fn apply_default_session_settings(conn: &Connection) {
        let statements = [
            "ALTER SESSION SET NLS_TIMESTAMP_FORMAT = 'yyyy-mm-dd hh24:mi:ss'",
            "ALTER SESSION SET NLS_DATE_FORMAT = 'yyyy-mm-dd hh24:mi:ss'",
        ];

        for statement in statements {
            if let Err(err) = conn.execute(statement, &[]) {
                log::warn!("failed to apply default session setting `{statement}`: {err}");
            }
        }
    }
}

impl DbHandle for OracleHandle {
    fn execute(&mut self, sql: &str) -> Result<u64, DbError> {
        let stmt = self.connection.execute(sql, &[])?;
        Ok(stmt.row_count()?)
    }

    fn commit(&mut self) -> Result<(), DbError> {
        Ok(self.connection.commit()?)
    }

    fn rollback(&mut self) -> Result<(), DbError> {
        Ok(self.connection.rollback()?)
    }

    fn set_autocommit(&mut self, enabled: bool) {
        self.connection.set_autocommit(enabled);
    }

    fn server_version(&mut self) -> Result<String, DbError> {
        let banner = self
            .connection
            .query_row_as::<String>("SELECT banner FROM v$version WHERE ROWNUM = 1", &[])?;
        Ok(banner)
    }

    fn binlog_enabled(&mut self) -> Result<bool, DbError> {
        let (log_mode, supplemental) = self.connection.query_row_as::<(String, String)>(
            "SELECT log_mode, supplemental_log_data_min FROM v$database",
            &[],
        )?;
        Ok(log_mode.eq_ignore_ascii_case("ARCHIVELOG") && !supplemental.eq_ignore_ascii_case("NO"))
    }

    fn schema_exists(&mut self, name: &str) -> Result<bool, DbError> {
        let count = self.connection.query_row_as::<i64>(
            "SELECT COUNT(*) FROM all_users WHERE username = :1",
            &[&name.to_uppercase()],
        )?;
        Ok(count > 0)
    }

    fn use_schema(&mut self, name: &str) -> Result<(), DbError> {
        check_identifier(name)?;
        self.connection.execute(
            &format!("ALTER SESSION SET CURRENT_SCHEMA = {}", name.to_uppercase()),
            &[],
        )?;
        Ok(())
    }

    fn save_backup(&mut self, schema: &str, sql: &str, affected_rows: u64) -> Result<(), DbError> {
        check_identifier(schema)?;
        let text = sql.to_string();
        let rows = affected_rows as i64;
        self.connection.execute(
            &format!(
                "INSERT INTO {}.SQLGATE_BACKUP_LOG (sql_text, affected_rows, created_at) \
                 VALUES (:1, :2, SYSTIMESTAMP)",
                schema.to_uppercase()
            ),
            &[&text, &rows],
        )?;
        Ok(())
    }
}

/// Schema names are spliced into statement text, so only plain identifiers pass.
fn check_identifier(name: &str) -> Result<(), DbError> {
    if !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '$' || c == '#') {
        Ok(())
    } else {
        Err(DbError::Other(format!("invalid schema name `{}`", name)))
    }
}

impl Drop for OracleHandle {
    fn drop(&mut self) {
        if let Err(err) = self.connection.close() {
            log::debug!("closing connection failed: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_names_must_be_plain_identifiers() {
        assert!(check_identifier("DB1_1521_ORCL").is_ok());
        assert!(check_identifier("").is_err());
        assert!(check_identifier("x; DROP TABLE t").is_err());
        assert!(check_identifier("a.b").is_err());
    }

    #[test]
    fn test_dsn_hides_password_and_lists_params() {
        let source = DataSource::new("scott", "tiger", "db1", 1521, "ORCL")
            .with_param("charset", "AL32UTF8")
            .with_param("autocommit", 1);
        let dsn = source.dsn();
        assert_eq!(dsn, "scott@tcp(db1:1521)/ORCL?charset=AL32UTF8&autocommit=1");
        assert!(!dsn.contains("tiger"));
        assert!(!format!("{:?}", source).contains("tiger"));
    }

    #[test]
    fn test_connection_string_tls_and_sdu() {
        let plain = DataSource::new("scott", "", "db1", 1521, "ORCL");
        assert_eq!(plain.connection_string(), "//db1:1521/ORCL");

        let secure = DataSource::new("scott", "", "db1", 2484, "ORCL")
            .with_tls(TlsMode::Required)
            .with_param("maxAllowedPacket", 8192);
        assert_eq!(secure.connection_string(), "tcps://db1:2484/ORCL?sdu=8192");
        assert!(secure.dsn().contains("@tcps("));
    }

    #[test]
    fn test_server_flavor_from_banner() {
        let banner = "Oracle Database 19c Enterprise Edition Release 19.0.0.0.0 - Production";
        assert_eq!(ServerFlavor::from_banner(banner), ServerFlavor::Standard);
        let adb = "Oracle Database 19c Enterprise Edition (Autonomous Transaction Processing)";
        assert!(!ServerFlavor::from_banner(adb).supports_backup());
    }
}
