use once_cell::sync::Lazy;
use sqlparser::dialect::{dialect_from_str, Dialect, GenericDialect};
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Location, Token, TokenWithSpan, Tokenizer};
use std::collections::HashSet;

use crate::db::error::ParseError;

use super::{AdminCommand, QueryExecutor, StatementKind, StatementNode};

static DDL_VERBS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "CREATE", "ALTER", "DROP", "TRUNCATE", "RENAME", "GRANT", "REVOKE", "COMMENT",
    ]
    .into_iter()
    .collect()
});

static READ_VERBS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    ["SELECT", "WITH", "SHOW", "EXPLAIN", "DESC", "DESCRIBE", "VALUES"]
        .into_iter()
        .collect()
});

const MAGIC_START: &str = "INCEPTION_MAGIC_START";
const MAGIC_COMMIT: &str = "INCEPTION_MAGIC_COMMIT";
const LOCAL_PREFIX: &str = "INCEPTION";

/// Turns statement text into typed statement nodes.
pub trait SqlParser: Send {
    fn parse(&self, text: &str) -> Result<Vec<StatementNode>, ParseError>;
}

/// `SqlParser` backed by sqlparser with a named dialect.
#[derive(Debug, Clone)]
pub struct DialectParser {
    dialect_name: String,
}

impl DialectParser {
    pub fn new(dialect_name: &str) -> Self {
        Self {
            dialect_name: dialect_name.to_string(),
        }
    }

    fn dialect(&self) -> Box<dyn Dialect> {
        dialect_from_str(&self.dialect_name).unwrap_or_else(|| {
            log::warn!(
                "unknown sql dialect `{}`, using generic",
                self.dialect_name
            );
            Box::new(GenericDialect {})
        })
    }
}

impl Default for DialectParser {
    fn default() -> Self {
        Self::new("generic")
    }
}

impl SqlParser for DialectParser {
    fn parse(&self, text: &str) -> Result<Vec<StatementNode>, ParseError> {
        let dialect = self.dialect();
        let tokens = Tokenizer::new(dialect.as_ref(), text)
            .tokenize_with_location()
            .map_err(|e| ParseError::Syntax(e.to_string()))?;

        let offsets = LineOffsets::new(text);
        let mut nodes = Vec::new();

        for group in tokens.split(|t| t.token == Token::SemiColon) {
            let significant: Vec<&TokenWithSpan> =
                group.iter().filter(|t| is_significant(&t.token)).collect();
            let (first, last) = match (significant.first(), significant.last()) {
                (Some(first), Some(last)) => (first, last),
                _ => continue,
            };

            let start = offsets.offset(text, first.span.start);
            let end = offsets.offset(text, last.span.end).max(start);
            let slice = text[start..end].trim();
            let words: Vec<&Token> = significant.iter().map(|t| &t.token).collect();

            if let Some(node) = parse_local_command(slice, &words)? {
                nodes.push(node);
                continue;
            }

            let statements = Parser::new(dialect.as_ref())
                .try_with_sql(slice)
                .and_then(|mut parser| parser.parse_statements())
                .map_err(|e| ParseError::Syntax(e.to_string()))?;

            let kind = classify(&words);
            match statements.len() {
                0 => {}
                1 => {
                    let ast = statements.into_iter().next();
                    nodes.push(StatementNode::new(slice, kind, ast));
                }
                _ => {
                    for stmt in statements {
                        let rendered = stmt.to_string();
                        let kind = classify_text(dialect.as_ref(), &rendered);
                        nodes.push(StatementNode::new(&rendered, kind, Some(stmt)));
                    }
                }
            }
        }

        Ok(nodes)
    }
}

fn is_significant(token: &Token) -> bool {
    !matches!(token, Token::Whitespace(_) | Token::EOF)
}

/// Byte offsets of line starts, for mapping tokenizer locations back to text.
struct LineOffsets {
    starts: Vec<usize>,
}

impl LineOffsets {
    fn new(text: &str) -> Self {
        let mut starts = vec![0];
        for (i, b) in text.bytes().enumerate() {
            if b == b'\n' {
                starts.push(i + 1);
            }
        }
        Self { starts }
    }

    fn offset(&self, text: &str, location: Location) -> usize {
        let line = (location.line.max(1) - 1) as usize;
        let column = (location.column.max(1) - 1) as usize;
        let line_start = match self.starts.get(line) {
            Some(start) => *start,
            None => return text.len(),
        };
        let rest = &text[line_start..];
        let line_text = rest.split('\n').next().unwrap_or("");
        let within = line_text
            .char_indices()
            .nth(column)
            .map(|(i, _)| i)
            .unwrap_or(line_text.len());
        line_start + within
    }
}

fn word_upper(token: &Token) -> Option<String> {
    match token {
        Token::Word(word) => Some(word.value.to_uppercase()),
        _ => None,
    }
}

fn word_is(tokens: &[&Token], index: usize, expected: &str) -> bool {
    tokens
        .get(index)
        .and_then(|t| word_upper(t))
        .map_or(false, |w| w == expected)
}

/// Reads `name(.name)*` starting at `index`; returns the name and the next index.
fn object_name_at(tokens: &[&Token], index: usize) -> Option<(String, usize)> {
    let mut parts = Vec::new();
    let mut i = index;
    loop {
        match tokens.get(i) {
            Some(Token::Word(word)) => parts.push(word.value.clone()),
            _ => break,
        }
        i += 1;
        if matches!(tokens.get(i), Some(Token::Period)) {
            i += 1;
        } else {
            break;
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some((parts.join("."), i))
    }
}

fn skip_words(tokens: &[&Token], mut index: usize, optional: &[&str]) -> usize {
    while tokens
        .get(index)
        .and_then(|t| word_upper(t))
        .map_or(false, |w| optional.contains(&w.as_str()))
    {
        index += 1;
    }
    index
}

fn has_word(tokens: &[&Token], expected: &str) -> bool {
    tokens
        .iter()
        .any(|t| word_upper(t).map_or(false, |w| w == expected))
}

/// Handles the tool's own `inception ...` statements, which no SQL dialect knows.
fn parse_local_command(slice: &str, tokens: &[&Token]) -> Result<Option<StatementNode>, ParseError> {
    let head = match tokens.first().and_then(|t| word_upper(t)) {
        Some(head) => head,
        None => return Ok(None),
    };

    if head == MAGIC_START && tokens.len() == 1 {
        return Ok(Some(StatementNode::new(slice, StatementKind::MagicStart, None)));
    }
    if head == MAGIC_COMMIT && tokens.len() == 1 {
        return Ok(Some(StatementNode::new(slice, StatementKind::MagicCommit, None)));
    }
    if head != LOCAL_PREFIX {
        return Ok(None);
    }

    let action = tokens.get(1).and_then(|t| word_upper(t)).unwrap_or_default();
    let kind = match action.as_str() {
        "SET" => {
            let start = skip_words(tokens, 2, &["SESSION", "GLOBAL"]);
            let (variable, next) = object_name_at(tokens, start)
                .ok_or_else(|| ParseError::Syntax(format!("missing variable name: {}", slice)))?;
            if !matches!(tokens.get(next), Some(Token::Eq)) {
                return Err(ParseError::Syntax(format!("expected `=` in: {}", slice)));
            }
            let value: String = tokens[next + 1..].iter().map(|t| t.to_string()).collect();
            if value.is_empty() {
                return Err(ParseError::Syntax(format!("missing value in: {}", slice)));
            }
            StatementKind::LocalSet {
                variable: variable.to_lowercase(),
                value,
            }
        }
        "SHOW" if word_is(tokens, 2, "VARIABLES") => StatementKind::Admin(AdminCommand::ShowVariables),
        "SHOW" if word_is(tokens, 2, "PROCESSLIST") => {
            StatementKind::Admin(AdminCommand::ShowProcesslist)
        }
        "KILL" => {
            let id = match tokens.get(2) {
                Some(Token::Number(value, _)) => value.parse::<u64>().ok(),
                _ => None,
            };
            match id {
                Some(id) if tokens.len() == 3 => StatementKind::Admin(AdminCommand::Kill { id }),
                _ => return Err(ParseError::Syntax(format!("invalid kill target: {}", slice))),
            }
        }
        _ => return Err(ParseError::Syntax(format!("unsupported local command: {}", slice))),
    };

    Ok(Some(StatementNode::new(slice, kind, None)))
}

fn classify_text(dialect: &dyn Dialect, sql: &str) -> StatementKind {
    match Tokenizer::new(dialect, sql).tokenize() {
        Ok(tokens) => {
            let significant: Vec<&Token> = tokens.iter().filter(|t| is_significant(t)).collect();
            classify(&significant)
        }
        Err(_) => StatementKind::Other,
    }
}

/// Shape of an ordinary statement, from its leading tokens.
fn classify(tokens: &[&Token]) -> StatementKind {
    if matches!(tokens.first(), Some(Token::LParen)) {
        return StatementKind::Query;
    }
    let verb = match tokens.first().and_then(|t| word_upper(t)) {
        Some(verb) => verb,
        None => return StatementKind::Other,
    };

    match verb.as_str() {
        "USE" => match object_name_at(tokens, 1) {
            Some((database, _)) => StatementKind::Use { database },
            None => StatementKind::Other,
        },
        v if READ_VERBS.contains(v) => StatementKind::Query,
        "INSERT" | "REPLACE" => {
            let at = skip_words(tokens, 1, &["IGNORE", "LOW_PRIORITY", "DELAYED", "INTO"]);
            match object_name_at(tokens, at) {
                Some((table, _)) => StatementKind::Insert { table },
                None => StatementKind::Other,
            }
        }
        "UPDATE" => {
            let at = skip_words(tokens, 1, &["LOW_PRIORITY", "IGNORE"]);
            match object_name_at(tokens, at) {
                Some((table, _)) => StatementKind::Update {
                    table,
                    has_where: has_word(tokens, "WHERE"),
                },
                None => StatementKind::Other,
            }
        }
        "DELETE" => {
            let from = tokens
                .iter()
                .position(|t| word_upper(t).map_or(false, |w| w == "FROM"));
            match from.and_then(|i| object_name_at(tokens, i + 1)) {
                Some((table, _)) => StatementKind::Delete {
                    table,
                    has_where: has_word(tokens, "WHERE"),
                },
                None => StatementKind::Other,
            }
        }
        v if DDL_VERBS.contains(v) => {
            let header: Vec<String> = tokens
                .iter()
                .take(8)
                .map(|t| t.to_string().to_uppercase())
                .collect();
            let object = QueryExecutor::parse_ddl_object_type(&header.join(" "));
            StatementKind::Ddl {
                verb: verb.clone(),
                object: object.to_string(),
                table: ddl_target_table(tokens, &verb, object),
            }
        }
        _ => StatementKind::Other,
    }
}

fn ddl_target_table(tokens: &[&Token], verb: &str, object: &str) -> Option<String> {
    match (verb, object) {
        ("TRUNCATE", _) => {
            let at = skip_words(tokens, 1, &["TABLE"]);
            object_name_at(tokens, at).map(|(name, _)| name)
        }
        ("RENAME", _) | (_, "Table") => {
            let table_pos = tokens
                .iter()
                .position(|t| word_upper(t).map_or(false, |w| w == "TABLE"))?;
            let at = skip_words(tokens, table_pos + 1, &["IF", "NOT", "EXISTS"]);
            object_name_at(tokens, at).map(|(name, _)| name)
        }
        (_, "Index") => {
            let on_pos = tokens
                .iter()
                .position(|t| word_upper(t).map_or(false, |w| w == "ON"))?;
            object_name_at(tokens, on_pos + 1).map(|(name, _)| name)
        }
        _ => None,
    }
}
