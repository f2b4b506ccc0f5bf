use std::collections::HashMap;
use std::sync::Arc;

use crate::db::connection::Connector;
use crate::db::error::{ParseError, Result, SessionError};
use crate::db::handler::CommandHandler;
use crate::db::options::RunMode;
use crate::db::query::{fingerprint, QueryExecutor, ScriptSplitter, SqlParser, StatementKind, StatementNode};

use super::context::{RunContext, RunOutput};
use super::process::SessionPhase;
use super::provision;
use super::records::{Record, Stage, StageStatus, LEVEL_OK};

/// Characters trimmed from both ends of a statement's text, including NBSP.
const STATEMENT_TRIM: &[char] = &[' ', ';', '\t', '\n', '\x0B', '\x0C', '\r', '\u{a0}'];

/// Collaborators the pipeline calls out to.
pub struct Services<'a> {
    pub parser: &'a dyn SqlParser,
    pub connector: &'a dyn Connector,
    pub handler: &'a mut dyn CommandHandler,
}

/// The shared statement pipeline behind every entry point.
///
/// Whatever the outcome, the affected-row count is settled and the general
/// log written before returning.
pub fn audit(ctx: &mut RunContext, script: &str, services: Services<'_>) -> Result<()> {
    let result = run(ctx, script, services);

    if let RunOutput::Split(sets) = &mut ctx.output {
        sets.add_new_split_node();
    }
    if ctx.affected_rows.is_none() {
        ctx.affected_rows = Some(ctx.output.count() as u64);
    }
    if ctx.config.general_log {
        log::info!(target: "general_log", "con:{} {}", ctx.conn_id, script);
    }
    result
}

fn run(ctx: &mut RunContext, script: &str, services: Services<'_>) -> Result<()> {
    let Services {
        parser,
        connector,
        handler,
    } = services;

    ctx.process.publish(|pi| {
        pi.oper_state = SessionPhase::Checking;
        pi.percent = 0.0;
    });
    ctx.stage = Stage::Check;

    provision::check_options(ctx, connector)?;

    ctx.output = RunOutput::for_mode(ctx.mode);
    ctx.set_phase(match ctx.mode {
        RunMode::Print => SessionPhase::Printing,
        RunMode::Split => SessionPhase::Splitting,
        RunMode::Check | RunMode::Execute => SessionPhase::Checking,
    });

    if ctx.options.fingerprint {
        ctx.config.enable_fingerprint = true;
    }
    // print and split output one entry per statement
    let audits = matches!(ctx.mode, RunMode::Check | RunMode::Execute);
    if audits && ctx.config.enable_fingerprint {
        ctx.fingerprints = Some(HashMap::with_capacity(64));
    }

    let splitter = ScriptSplitter::new(script);
    let total_lines = splitter.total_lines().max(1) as f64;

    for chunk in splitter {
        let nodes = match parse_chunk(parser, &chunk.text) {
            Ok(nodes) => nodes,
            Err(err) => {
                log::error!("con:{} parse failed: {}", ctx.conn_id, err);
                log::error!("con:{} {}", ctx.conn_id, chunk.text);
                ctx.append_parse_failure(chunk.text.trim(), &err.to_string());
                return Err(err.into());
            }
        };
        let percent = (chunk.end_line + 1) as f64 / total_lines;

        for node in nodes {
            match &node.kind {
                StatementKind::MagicStart => {
                    ctx.have_begin = true;
                    continue;
                }
                StatementKind::MagicCommit => {
                    ctx.have_commit = true;
                    continue;
                }
                _ => {}
            }

            let sql = node.text.trim_matches(STATEMENT_TRIM).to_string();
            let node = Arc::new(node);
            ctx.current = Record::new(&sql, Some(Arc::clone(&node)), Stage::Check);
            ctx.publish_progress(&sql, percent);

            let signature = if ctx.fingerprints.is_some() && node.kind.is_fingerprintable() {
                Some(fingerprint(&node))
            } else {
                None
            };
            let first_seen = signature
                .as_ref()
                .and_then(|sig| ctx.fingerprints.as_ref().and_then(|fps| fps.get(sig).copied()));

            if let Some(first) = first_seen {
                if !absorb_duplicate(ctx, first) {
                    check_killed(ctx)?;
                    continue;
                }
            } else {
                let result = match ctx.mode {
                    RunMode::Print => handler.print(ctx, &node, &sql)?,
                    RunMode::Split => handler.split(ctx, &node, &sql)?,
                    RunMode::Check | RunMode::Execute => handler.process(ctx, &node, &sql)?,
                };
                if let Some(result_set) = result {
                    ctx.result_set = Some(result_set);
                    return Ok(());
                }
            }

            check_killed(ctx)?;
            append_current(ctx, &node, signature);
        }
    }

    Ok(())
}

fn parse_chunk(parser: &dyn SqlParser, text: &str) -> std::result::Result<Vec<StatementNode>, ParseError> {
    let nodes = parser.parse(text)?;
    if nodes.is_empty() && !QueryExecutor::is_trivial_text(text) {
        return Err(ParseError::Empty);
    }
    Ok(nodes)
}

/// Handle a statement whose fingerprint was already seen.
///
/// Returns true when the statement still needs its own record: in execute
/// runs every statement runs, reusing the first verdict.
fn absorb_duplicate(ctx: &mut RunContext, first: usize) -> bool {
    let execute = ctx.mode == RunMode::Execute;
    let sets = match ctx.records_mut() {
        Some(sets) => sets,
        None => return true,
    };
    let first = match sets.get_mut(first) {
        Some(first) => first,
        None => return true,
    };
    first.duplicates += 1;
    if !execute {
        return false;
    }
    let (level, buf) = (first.err_level, first.buf.clone());
    if !buf.is_empty() {
        ctx.current.append_message(level, &buf);
    }
    true
}

fn check_killed(ctx: &mut RunContext) -> Result<()> {
    if !ctx.process.is_killed() {
        return Ok(());
    }
    log::warn!("con:{} killed", ctx.conn_id);
    ctx.append_killed();
    Err(SessionError::Killed)
}

/// Fold the finished statement into the active container.
fn append_current(ctx: &mut RunContext, node: &StatementNode, signature: Option<String>) {
    if matches!(ctx.mode, RunMode::Print | RunMode::Split) {
        return;
    }
    if matches!(node.kind, StatementKind::LocalSet { .. }) && ctx.current.err_level == LEVEL_OK {
        log::info!("con:{} {}", ctx.conn_id, ctx.current.sql);
        return;
    }

    let mut record = std::mem::replace(&mut ctx.current, Record::new("", None, Stage::Check));
    record.stage_status = StageStatus::AuditCompleted;
    record.db_name = ctx.db_name.clone();

    let index = match ctx.records_mut() {
        Some(sets) => sets.append(record),
        None => return,
    };
    if let (Some(signature), Some(fps)) = (signature, ctx.fingerprints.as_mut()) {
        fps.entry(signature).or_insert(index);
    }
}
