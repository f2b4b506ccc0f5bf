use std::time::{Duration, Instant};

use crate::db::connection::DbHandle;
use crate::db::error::DbError;

pub struct QueryExecutor;

/// Result of running one statement against a target.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecOutcome {
    pub affected_rows: u64,
    pub execution_time: Duration,
    pub message: String,
}

impl QueryExecutor {
    /// Execute a single statement, prefixed with an optional routing directive.
    pub fn execute(
        handle: &mut dyn DbHandle,
        sql: &str,
        directive: Option<&str>,
    ) -> Result<ExecOutcome, DbError> {
        let sql_clean = sql.trim().trim_end_matches(';').trim();
        let start = Instant::now();

        let routed;
        let text = match directive {
            Some(directive) => {
                routed = format!("{}{}", directive, sql_clean);
                routed.as_str()
            }
            None => sql_clean,
        };

        let affected_rows = handle.execute(text)?;
        let execution_time = start.elapsed();

        let message = match Self::leading_keyword(sql_clean).as_deref() {
            Some(verb @ ("INSERT" | "UPDATE" | "DELETE" | "MERGE" | "REPLACE")) => {
                format!("{} {} row(s) affected", verb, affected_rows)
            }
            _ => Self::ddl_message(sql_clean),
        };

        Ok(ExecOutcome {
            affected_rows,
            execution_time,
            message,
        })
    }

    pub fn ddl_message(sql: &str) -> String {
        let stripped = Self::strip_leading_comments(sql);
        let sql_upper = stripped.to_uppercase();
        if sql_upper.starts_with("CREATE") {
            let obj_type = Self::parse_ddl_object_type(&sql_upper);
            format!("{} created", obj_type)
        } else if sql_upper.starts_with("ALTER SESSION") {
            "Session altered".to_string()
        } else if sql_upper.starts_with("ALTER") {
            let obj_type = Self::parse_ddl_object_type(&sql_upper);
            format!("{} altered", obj_type)
        } else if sql_upper.starts_with("DROP") {
            let obj_type = Self::parse_ddl_object_type(&sql_upper);
            format!("{} dropped", obj_type)
        } else if sql_upper.starts_with("TRUNCATE") {
            "Table truncated".to_string()
        } else if sql_upper.starts_with("RENAME") {
            "Table renamed".to_string()
        } else if sql_upper.starts_with("GRANT") {
            "Grant succeeded".to_string()
        } else if sql_upper.starts_with("REVOKE") {
            "Revoke succeeded".to_string()
        } else if sql_upper.starts_with("COMMENT") {
            "Comment added".to_string()
        } else {
            "Statement executed successfully".to_string()
        }
    }

    /// Parse the object type from a DDL statement header.
    /// Only examines the leading tokens (verb + modifiers + type keyword).
    pub fn parse_ddl_object_type(sql_upper: &str) -> &'static str {
        let cleaned = Self::strip_leading_comments(sql_upper);
        let normalized = cleaned.to_uppercase();
        let tokens: Vec<&str> = normalized.split_whitespace().collect();
        if tokens.len() < 2 {
            return "Object";
        }

        let verb = tokens[0];
        let mut idx = 1usize;

        if verb == "CREATE" {
            if tokens.get(idx).map_or(false, |t| *t == "OR")
                && tokens.get(idx + 1).map_or(false, |t| *t == "REPLACE")
            {
                idx += 2;
            }
            if tokens
                .get(idx)
                .map_or(false, |t| *t == "TEMPORARY" || *t == "EDITIONABLE")
            {
                idx += 1;
            }
        }

        match tokens.get(idx).copied() {
            Some("TABLE") => "Table",
            Some("GLOBAL") | Some("PRIVATE")
                if tokens.get(idx + 1).map_or(false, |t| *t == "TEMPORARY")
                    && tokens.get(idx + 2).map_or(false, |t| *t == "TABLE") =>
            {
                "Table"
            }
            Some("VIEW") | Some("MATERIALIZED") => "View",
            Some("INDEX") | Some("UNIQUE") | Some("BITMAP") | Some("FULLTEXT")
            | Some("SPATIAL") => "Index",
            Some("PROCEDURE") => "Procedure",
            Some("FUNCTION") => "Function",
            Some("TRIGGER") => "Trigger",
            Some("SEQUENCE") => "Sequence",
            Some("SYNONYM") => "Synonym",
            Some("DATABASE") | Some("SCHEMA") => "Database",
            Some("USER") => "User",
            Some("ROLE") => "Role",
            Some("TABLESPACE") => "Tablespace",
            Some("SESSION") => "Session",
            _ => "Object",
        }
    }
}
