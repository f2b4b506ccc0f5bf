use std::thread;
use std::time::Duration;

use crate::db::connection::DbHandle;
use crate::db::error::{DbError, Result, SessionError};
use crate::db::query::{
    AdminCommand, ColumnInfo, QueryExecutor, ResultSet, StatementKind, StatementNode,
};
use crate::db::session::context::{RunContext, TableInfo, KILLED_MESSAGE};
use crate::db::session::process::SessionPhase;
use crate::db::session::records::{Stage, StageStatus, LEVEL_ERROR, LEVEL_WARNING};

/// Per-statement rule engine driven by the session pipeline.
///
/// `process`, `print` and `split` report findings on `ctx.current` or the
/// active output container. Returning `Some(ResultSet)` hands the whole run's
/// output to that result set and stops the batch.
pub trait CommandHandler: Send {
    fn process(
        &mut self,
        ctx: &mut RunContext,
        node: &StatementNode,
        sql: &str,
    ) -> Result<Option<ResultSet>>;

    fn print(
        &mut self,
        ctx: &mut RunContext,
        node: &StatementNode,
        sql: &str,
    ) -> Result<Option<ResultSet>>;

    fn split(
        &mut self,
        ctx: &mut RunContext,
        node: &StatementNode,
        sql: &str,
    ) -> Result<Option<ResultSet>>;

    /// Execute the checked batch.
    fn commit(&mut self, ctx: &mut RunContext) -> Result<()>;
}

/// Small built-in rule set.
#[derive(Debug, Default)]
pub struct BasicCommandHandler;

impl BasicCommandHandler {
    pub fn new() -> Self {
        Self
    }

    fn check_database(ctx: &mut RunContext, database: &str) -> Result<bool> {
        let key = database.to_lowercase();
        if let Some(exists) = ctx.db_cache.get(&key) {
            return Ok(*exists);
        }
        let exists = match ctx.db.as_mut() {
            Some(db) => db.schema_exists(database)?,
            None => true,
        };
        ctx.db_cache.insert(key, exists);
        Ok(exists)
    }

    fn table_key(ctx: &RunContext, table: &str) -> String {
        if table.contains('.') || ctx.db_name.is_empty() {
            table.to_lowercase()
        } else {
            format!("{}.{}", ctx.db_name, table).to_lowercase()
        }
    }

    fn check_table_alive(ctx: &mut RunContext, table: &str) {
        let key = Self::table_key(ctx, table);
        if ctx.table_cache.get(&key).map_or(false, |t| t.is_deleted) {
            ctx.current
                .append_message(LEVEL_ERROR, &format!("Table '{}' doesn't exist.", table));
        }
    }

    fn check_ddl(ctx: &mut RunContext, verb: &str, object: &str, table: Option<&str>) {
        if verb == "DROP" || verb == "TRUNCATE" {
            ctx.current.append_message(
                LEVEL_WARNING,
                &format!("High-risk statement: {} {}.", verb, object.to_uppercase()),
            );
        }

        let table = match table {
            Some(table) if object == "Table" || verb == "TRUNCATE" => table,
            _ => return,
        };
        let key = Self::table_key(ctx, table);
        match verb {
            "CREATE" => {
                if ctx.table_cache.get(&key).map_or(false, |t| !t.is_deleted) {
                    ctx.current
                        .append_message(LEVEL_ERROR, &format!("Table '{}' already exists.", table));
                    return;
                }
                ctx.table_cache.insert(
                    key.clone(),
                    TableInfo {
                        name: key,
                        is_new: true,
                        is_deleted: false,
                    },
                );
            }
            "DROP" => {
                Self::check_table_alive(ctx, table);
                ctx.table_cache.insert(
                    key.clone(),
                    TableInfo {
                        name: key,
                        is_new: false,
                        is_deleted: true,
                    },
                );
            }
            _ => Self::check_table_alive(ctx, table),
        }
    }

    fn admin(ctx: &mut RunContext, command: &AdminCommand) -> Result<Option<ResultSet>> {
        let result = match command {
            AdminCommand::ShowVariables => {
                let rows: Vec<Vec<String>> = ctx
                    .config
                    .variables()
                    .into_iter()
                    .map(|(name, value)| vec![name, value])
                    .collect();
                ResultSet::new(
                    vec![ColumnInfo::text("Variable_name"), ColumnInfo::text("Value")],
                    rows,
                )
            }
            AdminCommand::ShowProcesslist => {
                let snapshots = match &ctx.registry {
                    Some(registry) => registry.snapshots(),
                    None => vec![ctx.process.snapshot()],
                };
                let rows = snapshots
                    .iter()
                    .map(|pi| {
                        vec![
                            pi.id.to_string(),
                            pi.dest_user.clone(),
                            format!("{}:{}", pi.dest_host, pi.dest_port),
                            pi.command.clone(),
                            pi.oper_state.to_string(),
                            pi.time
                                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                                .unwrap_or_default(),
                            pi.info.clone(),
                            format!("{:.2}%", pi.percent * 100.0),
                        ]
                    })
                    .collect();
                let columns = ["Id", "Dest_User", "Dest_Host", "Command", "State", "Time", "Info", "Percent"]
                    .iter()
                    .map(|name| ColumnInfo::text(name))
                    .collect();
                ResultSet::new(columns, rows)
            }
            AdminCommand::Kill { id } => {
                let killed = ctx
                    .registry
                    .as_ref()
                    .map_or(false, |registry| registry.kill(*id));
                if !killed {
                    ctx.current
                        .append_message(LEVEL_ERROR, &format!("Unknown thread id: {}", id));
                    return Ok(None);
                }
                ResultSet::message(&format!("Thread {} killed", id))
            }
        };
        ctx.affected_rows = Some(result.row_count() as u64);
        Ok(Some(result))
    }

    /// Backup schema for the current target, checked once per run.
    fn ensure_backup_schema(ctx: &mut RunContext) -> std::result::Result<Option<String>, DbError> {
        let database = if ctx.db_name.is_empty() {
            ctx.options.db.clone()
        } else {
            ctx.db_name.clone()
        };
        let name = format!(
            "{}_{}_{}",
            ctx.options.host.replace(['.', '-'], "_"),
            ctx.options.port,
            database
        );
        if let Some(exists) = ctx.backup_cache.get(&name) {
            return Ok((*exists).then_some(name));
        }
        let exists = match ctx.backup_db.as_mut() {
            Some(backup) => backup.schema_exists(&name)?,
            None => false,
        };
        ctx.backup_cache.insert(name.clone(), exists);
        Ok(exists.then_some(name))
    }

    /// Hand an executed DML statement to the backup connection.
    fn save_backup(ctx: &mut RunContext, sql: &str, affected_rows: u64) -> Result<BackupOutcome> {
        let schema = match Self::ensure_backup_schema(ctx)? {
            Some(schema) => schema,
            None => {
                return Ok(BackupOutcome::Skipped(
                    "Backup database not found, rollback statements were not saved.".to_string(),
                ))
            }
        };
        let saved = match ctx.backup_db.as_deref_mut() {
            Some(backup) => backup.save_backup(&schema, sql, affected_rows),
            None => Err(DbError::Other("no backup connection".to_string())),
        };
        Ok(match saved {
            Ok(()) => BackupOutcome::Saved,
            Err(err) => {
                log::warn!("con:{} backup to {} failed: {}", ctx.conn_id, schema, err);
                BackupOutcome::Skipped(format!("Backup failed: {}", err))
            }
        })
    }
}

enum BackupOutcome {
    Saved,
    Skipped(String),
}

impl CommandHandler for BasicCommandHandler {
    fn process(
        &mut self,
        ctx: &mut RunContext,
        node: &StatementNode,
        _sql: &str,
    ) -> Result<Option<ResultSet>> {
        match &node.kind {
            StatementKind::MagicStart => ctx.have_begin = true,
            StatementKind::MagicCommit => ctx.have_commit = true,
            StatementKind::LocalSet { variable, value } => {
                if let Err(message) = ctx.config.set_var(variable, value) {
                    ctx.current.append_message(LEVEL_ERROR, &message);
                }
            }
            StatementKind::Admin(command) => return Self::admin(ctx, command),
            StatementKind::Use { database } => {
                if Self::check_database(ctx, database)? {
                    ctx.db_name = database.clone();
                } else {
                    ctx.current
                        .append_message(LEVEL_ERROR, &format!("Unknown database '{}'.", database));
                }
            }
            StatementKind::Insert { table } => Self::check_table_alive(ctx, table),
            StatementKind::Update { table, has_where } | StatementKind::Delete { table, has_where } => {
                if !has_where {
                    ctx.current.append_message(
                        LEVEL_WARNING,
                        "Set the where condition for update/delete statement.",
                    );
                }
                Self::check_table_alive(ctx, table);
            }
            StatementKind::Ddl { verb, object, table } => {
                Self::check_ddl(ctx, verb, object, table.as_deref())
            }
            StatementKind::Query | StatementKind::Other => {}
        }
        Ok(None)
    }

    fn print(
        &mut self,
        ctx: &mut RunContext,
        node: &StatementNode,
        sql: &str,
    ) -> Result<Option<ResultSet>> {
        let tree = match &node.ast {
            Some(statement) => serde_json::to_string(statement),
            None => serde_json::to_string(&node.kind),
        };
        if let Some(sets) = ctx.print_sets_mut() {
            match tree {
                Ok(tree) => sets.append(0, sql, &tree, ""),
                Err(err) => sets.append(LEVEL_ERROR, sql, "", &err.to_string()),
            }
        }
        Ok(None)
    }

    fn split(
        &mut self,
        ctx: &mut RunContext,
        node: &StatementNode,
        sql: &str,
    ) -> Result<Option<ResultSet>> {
        if let StatementKind::Use { database } = &node.kind {
            ctx.db_name = database.clone();
        }
        if let Some(sets) = ctx.split_sets_mut() {
            match &node.kind {
                StatementKind::Use { .. } | StatementKind::LocalSet { .. } => {
                    sets.push_passthrough(sql)
                }
                kind => sets.push_statement(kind.table(), kind.is_ddl(), sql),
            }
        }
        Ok(None)
    }

    fn commit(&mut self, ctx: &mut RunContext) -> Result<()> {
        ctx.stage = Stage::Execute;
        ctx.set_phase(SessionPhase::Executing);

        let total = ctx.records().map_or(0, |sets| sets.count());
        let tran_batch = ctx.options.tran_batch.max(1) as usize;
        let sleep_rows = ctx.options.sleep_rows.max(0) as usize;
        let sleep = Duration::from_millis(ctx.options.sleep.max(0) as u64);
        let cancel = ctx.process.cancel_token();

        // records executed in the currently open transaction
        let mut open_batch: Vec<usize> = Vec::new();
        let mut executed = 0usize;
        let mut failed = false;

        for index in 0..total {
            if cancel.is_cancelled() && !failed {
                log::warn!("con:{} killed during execution", ctx.conn_id);
                if let Some(record) = ctx.records_mut().and_then(|sets| sets.get_mut(index)) {
                    record.append_message(LEVEL_ERROR, KILLED_MESSAGE);
                }
                failed = true;
            }

            let (sql, kind) = match ctx.records_mut().and_then(|sets| sets.get_mut(index)) {
                Some(record) => {
                    record.stage = Stage::Execute;
                    if failed {
                        record.stage_status = StageStatus::Skipped;
                        continue;
                    }
                    let kind = record.node.as_ref().map(|n| n.kind.clone());
                    (record.sql.clone(), kind.unwrap_or(StatementKind::Other))
                }
                None => continue,
            };
            ctx.publish_progress(&sql, index as f64 / total as f64);

            let outcome = match &kind {
                StatementKind::Query | StatementKind::LocalSet { .. } | StatementKind::Admin(_) => {
                    Ok(None)
                }
                StatementKind::Use { database } => {
                    ctx.db_name = database.clone();
                    match ctx.db.as_mut() {
                        Some(db) => db.use_schema(database).map(|_| None),
                        None => Ok(None),
                    }
                }
                StatementKind::Ddl { .. } => {
                    if !open_batch.is_empty() {
                        commit_batch(&mut ctx.db, &mut open_batch)?;
                    }
                    let directive = ctx.directive.clone();
                    let target = match ctx.ddl_db.as_deref_mut() {
                        Some(ddl) => Some(ddl),
                        None => ctx.db.as_deref_mut(),
                    };
                    match target {
                        Some(handle) => {
                            QueryExecutor::execute(handle, &sql, directive.as_deref()).map(Some)
                        }
                        None => Err(DbError::Other("no open connection".to_string())),
                    }
                }
                _ => {
                    let directive = ctx.directive.clone();
                    match ctx.db.as_deref_mut() {
                        Some(db) => {
                            if tran_batch > 1 && open_batch.is_empty() {
                                db.set_autocommit(false);
                            }
                            QueryExecutor::execute(db, &sql, directive.as_deref()).map(Some)
                        }
                        None => Err(DbError::Other("no open connection".to_string())),
                    }
                }
            };

            match outcome {
                Ok(outcome) => {
                    let affected_rows = outcome.as_ref().map_or(0, |o| o.affected_rows);
                    let backup = if ctx.options.backup && kind.is_dml() {
                        Some(Self::save_backup(ctx, &sql, affected_rows)?)
                    } else {
                        None
                    };
                    if let Some(record) = ctx.records_mut().and_then(|sets| sets.get_mut(index)) {
                        record.stage_status = StageStatus::ExecuteSuccessfully;
                        if let Some(outcome) = outcome {
                            record.affected_rows = outcome.affected_rows;
                            record.exec_time =
                                format!("{:.3}", outcome.execution_time.as_secs_f64());
                            record.execute_message = outcome.message;
                        }
                        match backup {
                            Some(BackupOutcome::Saved) => record.stage = Stage::Backup,
                            Some(BackupOutcome::Skipped(reason)) => {
                                record.append_message(LEVEL_WARNING, &reason)
                            }
                            None => {}
                        }
                    }
                    if tran_batch > 1 && kind.is_dml() {
                        open_batch.push(index);
                        if open_batch.len() >= tran_batch {
                            commit_batch(&mut ctx.db, &mut open_batch)?;
                        }
                    }
                    executed += 1;
                    if sleep_rows > 0 && executed % sleep_rows == 0 {
                        thread::sleep(sleep);
                    }
                }
                Err(err) => {
                    log::error!("con:{} execution failed: {}", ctx.conn_id, err);
                    failed = true;
                    // a batched DML statement runs with autocommit off even when it opens the batch
                    if !open_batch.is_empty() || (tran_batch > 1 && kind.is_dml()) {
                        if let Some(db) = ctx.db.as_deref_mut() {
                            db.rollback()?;
                            db.set_autocommit(true);
                        }
                        let rolled_back = std::mem::take(&mut open_batch);
                        if let Some(sets) = ctx.records_mut() {
                            for i in rolled_back {
                                if let Some(record) = sets.get_mut(i) {
                                    record.stage_status = StageStatus::ExecuteFailed;
                                    record.append_message(
                                        LEVEL_WARNING,
                                        "Rolled back with the failed transaction batch.",
                                    );
                                }
                            }
                        }
                    }
                    if let Some(record) = ctx.records_mut().and_then(|sets| sets.get_mut(index)) {
                        record.stage_status = StageStatus::ExecuteFailed;
                        record.append_message(LEVEL_ERROR, &err.to_string());
                    }
                }
            }
        }

        if !open_batch.is_empty() {
            commit_batch(&mut ctx.db, &mut open_batch)?;
        }
        ctx.publish_progress("", 1.0);

        if cancel.is_cancelled() {
            return Err(SessionError::Killed);
        }
        Ok(())
    }
}

fn commit_batch(db: &mut Option<Box<dyn DbHandle>>, open_batch: &mut Vec<usize>) -> Result<()> {
    if let Some(db) = db.as_mut() {
        db.commit()?;
        db.set_autocommit(true);
    }
    open_batch.clear();
    Ok(())
}
