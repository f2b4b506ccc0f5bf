use serde::{Deserialize, Serialize};
use std::fmt;

use crate::db::error::{Result, SessionError};

/// Per-run data source configuration handed to a session via `load_options`.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SourceOptions {
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(skip_serializing, default)]
    pub password: String,
    pub db: String,

    pub check: bool,
    pub execute: bool,
    pub print: bool,
    pub split: bool,
    pub backup: bool,

    pub ignore_warnings: bool,
    pub fingerprint: bool,
    /// Milliseconds to sleep between executed statements.
    pub sleep: i64,
    pub sleep_rows: i64,
    pub tran_batch: i64,

    pub middleware_extend: String,
    #[serde(rename = "middlewareDB")]
    pub middleware_db: String,

    pub ssl: String,
}

impl fmt::Debug for SourceOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &redacted(&self.password))
            .field("db", &self.db)
            .field("mode", &self.mode())
            .field("backup", &self.backup)
            .field("ignore_warnings", &self.ignore_warnings)
            .field("fingerprint", &self.fingerprint)
            .field("sleep", &self.sleep)
            .field("sleep_rows", &self.sleep_rows)
            .field("tran_batch", &self.tran_batch)
            .field("middleware_extend", &self.middleware_extend)
            .field("middleware_db", &self.middleware_db)
            .field("ssl", &self.ssl)
            .finish()
    }
}

/// Stand-in for a secret in diagnostic output.
pub(crate) fn redacted(secret: &str) -> &'static str {
    if secret.is_empty() {
        ""
    } else {
        "******"
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunMode {
    Check,
    Execute,
    Print,
    Split,
}

impl RunMode {
    pub fn command_label(&self) -> &'static str {
        match self {
            RunMode::Check => "CHECK",
            RunMode::Execute => "EXECUTE",
            RunMode::Print => "PRINT",
            RunMode::Split => "SPLIT",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.command_label())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TlsMode {
    Disabled,
    Preferred,
    Required,
    VerifyCa,
    VerifyIdentity,
}

impl TlsMode {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "" | "disabled" | "false" => Ok(TlsMode::Disabled),
            "preferred" => Ok(TlsMode::Preferred),
            "required" | "true" => Ok(TlsMode::Required),
            "verify-ca" => Ok(TlsMode::VerifyCa),
            "verify-identity" => Ok(TlsMode::VerifyIdentity),
            _ => Err(SessionError::InvalidTls(value.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TlsMode::Disabled => "false",
            TlsMode::Preferred => "preferred",
            TlsMode::Required => "true",
            TlsMode::VerifyCa => "verify-ca",
            TlsMode::VerifyIdentity => "verify-identity",
        }
    }

    /// Whether the transport must be encrypted.
    pub fn is_encrypted(&self) -> bool {
        matches!(
            self,
            TlsMode::Required | TlsMode::VerifyCa | TlsMode::VerifyIdentity
        )
    }
}

impl SourceOptions {
    pub fn new(host: &str, port: u16, user: &str, password: &str) -> Self {
        Self {
            host: host.to_string(),
            port,
            user: user.to_string(),
            password: password.to_string(),
            ..Self::default()
        }
    }

    /// Copy of these options with exactly one mode flag raised.
    pub fn with_mode(&self, mode: RunMode) -> Self {
        let mut opts = self.clone();
        opts.check = mode == RunMode::Check;
        opts.execute = mode == RunMode::Execute;
        opts.print = mode == RunMode::Print;
        opts.split = mode == RunMode::Split;
        opts
    }

    pub fn mode(&self) -> RunMode {
        if self.print {
            RunMode::Print
        } else if self.split {
            RunMode::Split
        } else if self.execute && !self.check {
            RunMode::Execute
        } else {
            RunMode::Check
        }
    }

    /// Resolve conflicting flags. Rules apply in a fixed order.
    pub fn normalize(&mut self) {
        if self.split || self.check || self.print {
            self.execute = false;
            self.backup = false;
            // checking never aborts early on warnings
            self.ignore_warnings = true;
        }

        if self.sleep <= 0 {
            self.sleep_rows = 0;
        } else if self.sleep_rows < 1 {
            self.sleep_rows = 1;
        }

        if self.split || self.print {
            self.check = false;
        }
    }

    /// Host, port and user are mandatory; the password may be empty.
    pub fn validate(&self) -> Result<()> {
        let missing = missing_target_fields(&self.host, self.port, &self.user);
        if missing.is_empty() {
            Ok(())
        } else {
            log::warn!("incomplete data source {}@{}:{}", self.user, self.host, self.port);
            Err(SessionError::InvalidSource(missing.join(",")))
        }
    }

    pub fn tls_mode(&self) -> Result<TlsMode> {
        TlsMode::parse(&self.ssl)
    }

    pub fn uses_middleware(&self) -> bool {
        !self.middleware_extend.is_empty()
    }

    /// Inline directive sent ahead of routed statements, e.g. `/*shard=3*/`.
    pub fn middleware_directive(&self) -> Option<String> {
        if self.middleware_extend.is_empty() {
            return None;
        }
        let tag = self.middleware_extend.trim();
        if tag.starts_with("/*") && tag.ends_with("*/") {
            return Some(tag.to_string());
        }
        Some(format!("/*{}*/", tag.replacen(": ", "=", 1)))
    }
}

/// Names every missing mandatory field of a connection target.
pub(crate) fn missing_target_fields(host: &str, port: u16, user: &str) -> Vec<&'static str> {
    let mut missing = Vec::new();
    if host.trim().is_empty() {
        missing.push("host is empty");
    }
    if port == 0 {
        missing.push("port is 0");
    }
    if user.trim().is_empty() {
        missing.push("user is empty");
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_forces_read_only() {
        let mut opts = SourceOptions::new("db1", 1521, "scott", "tiger");
        opts.check = true;
        opts.execute = true;
        opts.backup = true;
        opts.normalize();
        assert!(!opts.execute);
        assert!(!opts.backup);
        assert!(opts.ignore_warnings);
        assert_eq!(opts.mode(), RunMode::Check);
    }

    #[test]
    fn test_print_and_split_override_check() {
        let mut opts = SourceOptions::new("db1", 1521, "scott", "tiger");
        opts.check = true;
        opts.split = true;
        opts.normalize();
        assert!(!opts.check);
        assert_eq!(opts.mode(), RunMode::Split);

        let mut opts = SourceOptions::new("db1", 1521, "scott", "tiger");
        opts.check = true;
        opts.print = true;
        opts.normalize();
        assert!(!opts.check);
        assert_eq!(opts.mode(), RunMode::Print);
    }

    #[test]
    fn test_sleep_rows_normalization() {
        let mut opts = SourceOptions::new("db1", 1521, "scott", "");
        opts.sleep = 0;
        opts.sleep_rows = 10;
        opts.normalize();
        assert_eq!(opts.sleep_rows, 0);

        opts.sleep = 100;
        opts.sleep_rows = 0;
        opts.normalize();
        assert_eq!(opts.sleep_rows, 1);

        opts.sleep_rows = 50;
        opts.normalize();
        assert_eq!(opts.sleep_rows, 50);
    }

    #[test]
    fn test_validate_names_every_missing_field() {
        let opts = SourceOptions::new("", 0, "", "");
        let err = opts.validate().unwrap_err().to_string();
        assert!(err.contains("host"), "{err}");
        assert!(err.contains("port"), "{err}");
        assert!(err.contains("user"), "{err}");

        let opts = SourceOptions::new("db1", 1521, "scott", "");
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_with_mode_is_exclusive() {
        let mut opts = SourceOptions::new("db1", 1521, "scott", "tiger");
        opts.print = true;
        let audit = opts.with_mode(RunMode::Check);
        assert!(audit.check && !audit.print && !audit.split && !audit.execute);
        assert_eq!(audit.mode(), RunMode::Check);
    }

    #[test]
    fn test_middleware_directive() {
        let mut opts = SourceOptions::new("proxy", 3307, "app", "");
        assert_eq!(opts.middleware_directive(), None);
        opts.middleware_extend = "shard: 3".to_string();
        assert_eq!(opts.middleware_directive().as_deref(), Some("/*shard=3*/"));
        opts.middleware_extend = "/*node=a*/".to_string();
        assert_eq!(opts.middleware_directive().as_deref(), Some("/*node=a*/"));
    }

    #[test]
    fn test_tls_mode_parse() {
        assert_eq!(TlsMode::parse("").unwrap(), TlsMode::Disabled);
        assert_eq!(TlsMode::parse("VERIFY_CA").unwrap(), TlsMode::VerifyCa);
        assert!(TlsMode::parse("required").unwrap().is_encrypted());
        assert!(!TlsMode::parse("preferred").unwrap().is_encrypted());
        assert!(TlsMode::parse("sometimes").is_err());
    }

    #[test]
    fn test_debug_redacts_password() {
        let opts = SourceOptions::new("", 1521, "scott", "s3cret");
        let text = format!("{:?}", opts);
        assert!(!text.contains("s3cret"), "{text}");
        assert!(text.contains("******"));
        assert!(text.contains("scott"));
        assert!(format!("{:?}", SourceOptions::default()).contains("password: \"\""));
    }

    #[test]
    fn test_password_not_serialized() {
        let opts = SourceOptions::new("db1", 1521, "scott", "tiger");
        let json = serde_json::to_string(&opts).unwrap();
        assert!(!json.contains("tiger"));
        assert!(json.contains("\"middlewareDB\""));
        let back: SourceOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(back.host, "db1");
        assert!(back.password.is_empty());
    }
}
