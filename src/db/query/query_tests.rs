use super::*;
use crate::db::error::ParseError;

fn chunk_texts(sql: &str) -> Vec<String> {
    QueryExecutor::split_script(sql)
        .into_iter()
        .map(|chunk| chunk.text)
        .collect()
}

fn parse_one(sql: &str) -> StatementNode {
    let mut nodes = DialectParser::default().parse(sql).unwrap();
    assert_eq!(nodes.len(), 1, "expected one node for {sql}");
    nodes.remove(0)
}

#[test]
fn test_split_semicolon_inside_quotes() {
    let chunks = chunk_texts("SELECT 1;\nSELECT 'a;b';\nSELECT 2");
    assert_eq!(chunks, vec!["SELECT 1", "SELECT 'a;b'", "SELECT 2"]);
}

#[test]
fn test_split_last_line_without_terminator() {
    let chunks = chunk_texts("SELECT 1;\nSELECT 2");
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[1], "SELECT 2");
}

#[test]
fn test_split_crlf_terminator() {
    let chunks = chunk_texts("SELECT 1;\r\nSELECT 2;\r\n");
    assert_eq!(chunks.len(), 3);
    assert_eq!(chunks[0], "SELECT 1;\r");
    assert_eq!(chunks[2], "");
}

#[test]
fn test_split_multiline_statement_joined() {
    let chunks = QueryExecutor::split_script("UPDATE t\nSET a = 1\nWHERE id = 2;\nSELECT 1;");
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].text, "UPDATE t\nSET a = 1\nWHERE id = 2");
    assert_eq!(chunks[0].end_line, 2);
    assert_eq!(chunks[1].end_line, 3);
}

#[test]
fn test_split_open_quote_spans_lines() {
    let chunks = chunk_texts("INSERT INTO t VALUES ('line one;\nline two');\nSELECT 1;");
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0], "INSERT INTO t VALUES ('line one;\nline two')");
}

#[test]
fn test_split_trailing_semicolons_trimmed() {
    assert_eq!(chunk_texts("SELECT 1;;"), vec!["SELECT 1"]);
}

// Escaped quotes are counted like any other quote; the odd count on the first
// line keeps both statements in one chunk.
#[test]
fn test_split_escaped_quote_known_limitation() {
    let chunks = chunk_texts("SELECT 'it\\'s';\nSELECT 2;\nSELECT 3");
    assert_eq!(chunks.len(), 1);
    assert!(chunks[0].contains("SELECT 2"));
}

// An apostrophe inside a comment flips parity too.
#[test]
fn test_split_comment_quote_known_limitation() {
    let chunks = chunk_texts("-- don't\nSELECT 1;\nSELECT 2;\nSELECT 3");
    assert_eq!(chunks.len(), 1);
}

#[test]
fn test_trivial_text() {
    assert!(QueryExecutor::is_trivial_text("   "));
    assert!(QueryExecutor::is_trivial_text("-- note"));
    assert!(QueryExecutor::is_trivial_text("# note"));
    assert!(QueryExecutor::is_trivial_text("/* note */"));
    assert!(!QueryExecutor::is_trivial_text("SELECT 1"));
}

#[test]
fn test_strip_leading_comments_and_keyword() {
    let sql = "-- header\n/* block */ # hash\nselect * from dual";
    assert_eq!(QueryExecutor::strip_leading_comments(sql), "select * from dual");
    assert_eq!(QueryExecutor::leading_keyword(sql).as_deref(), Some("SELECT"));
}

#[test]
fn test_parse_multiple_statements_keeps_text() {
    let nodes = DialectParser::default()
        .parse("SELECT 1; select  2 ;  SELECT 'x;y'")
        .unwrap();
    let texts: Vec<&str> = nodes.iter().map(|n| n.text.as_str()).collect();
    assert_eq!(texts, vec!["SELECT 1", "select  2", "SELECT 'x;y'"]);
    assert!(nodes.iter().all(|n| n.kind == StatementKind::Query));
    assert!(nodes.iter().all(|n| n.ast.is_some()));
}

#[test]
fn test_parse_syntax_error() {
    let err = DialectParser::default().parse("SELEC x FROM t").unwrap_err();
    assert!(matches!(err, ParseError::Syntax(_)));
}

#[test]
fn test_parse_blank_and_comment_yield_nothing() {
    let parser = DialectParser::default();
    assert!(parser.parse("").unwrap().is_empty());
    assert!(parser.parse("-- only a comment").unwrap().is_empty());
}

#[test]
fn test_classify_dml() {
    assert_eq!(
        parse_one("UPDATE t1 SET a = 1").kind,
        StatementKind::Update {
            table: "t1".to_string(),
            has_where: false
        }
    );
    assert_eq!(
        parse_one("DELETE FROM app.orders WHERE id = 1").kind,
        StatementKind::Delete {
            table: "app.orders".to_string(),
            has_where: true
        }
    );
    assert_eq!(
        parse_one("INSERT INTO t2 (a) VALUES (1)").kind,
        StatementKind::Insert {
            table: "t2".to_string()
        }
    );
    assert!(parse_one("INSERT INTO t2 (a) VALUES (1)").kind.is_dml());
}

#[test]
fn test_classify_ddl_targets() {
    let node = parse_one("CREATE TABLE IF NOT EXISTS t3 (id INT)");
    assert_eq!(
        node.kind,
        StatementKind::Ddl {
            verb: "CREATE".to_string(),
            object: "Table".to_string(),
            table: Some("t3".to_string()),
        }
    );
    assert_eq!(parse_one("CREATE INDEX idx_a ON t1 (a)").kind.table(), Some("t1"));
    assert_eq!(parse_one("TRUNCATE TABLE t4").kind.table(), Some("t4"));
    assert!(parse_one("DROP TABLE t5").kind.is_ddl());
}

#[test]
fn test_classify_use() {
    assert_eq!(
        parse_one("USE sales").kind,
        StatementKind::Use {
            database: "sales".to_string()
        }
    );
}

#[test]
fn test_magic_markers() {
    let nodes = DialectParser::default()
        .parse("/*--user=scott;--host=db1;*/\ninception_magic_start;\nSELECT 1;\ninception_magic_commit")
        .unwrap();
    let kinds: Vec<&StatementKind> = nodes.iter().map(|n| &n.kind).collect();
    assert_eq!(kinds.len(), 3);
    assert!(kinds[0].is_session_marker());
    assert_eq!(kinds[1], &StatementKind::Query);
    assert_eq!(kinds[2], &StatementKind::MagicCommit);
}

#[test]
fn test_local_commands() {
    assert_eq!(
        parse_one("inception set session enable_fingerprint = 1").kind,
        StatementKind::LocalSet {
            variable: "enable_fingerprint".to_string(),
            value: "1".to_string()
        }
    );
    assert_eq!(
        parse_one("inception show variables").kind,
        StatementKind::Admin(AdminCommand::ShowVariables)
    );
    assert_eq!(
        parse_one("INCEPTION KILL 42").kind,
        StatementKind::Admin(AdminCommand::Kill { id: 42 })
    );
    assert!(DialectParser::default().parse("inception kill everyone").is_err());
    assert!(DialectParser::default().parse("inception frobnicate").is_err());
}

#[test]
fn test_unknown_dialect_falls_back() {
    let nodes = DialectParser::new("no-such-dialect").parse("SELECT 1").unwrap();
    assert_eq!(nodes.len(), 1);
}

#[test]
fn test_fingerprint_ignores_literals() {
    let a = fingerprint(&parse_one("SELECT * FROM t WHERE id = 1 AND name = 'x'"));
    let b = fingerprint(&parse_one("SELECT * FROM t WHERE id = 22 AND name = 'yy'"));
    let c = fingerprint(&parse_one("SELECT * FROM t WHERE id > 1 AND name = 'x'"));
    assert_eq!(a, b);
    assert_ne!(a, c);

    let i1 = fingerprint(&parse_one("INSERT INTO t VALUES (1, 'a')"));
    let i2 = fingerprint(&parse_one("INSERT INTO t VALUES (2, 'b')"));
    assert_eq!(i1, i2);
}

#[test]
fn test_fingerprint_ignores_keyword_and_identifier_case() {
    let upper = fingerprint(&parse_one("SELECT A FROM T WHERE ID = 1"));
    let lower = fingerprint(&parse_one("select a from t where id = 2"));
    assert_eq!(upper, lower);
    assert_eq!(upper, upper.to_lowercase());
}

#[test]
fn test_only_queries_and_dml_are_fingerprintable() {
    assert!(parse_one("SELECT 1").kind.is_fingerprintable());
    assert!(parse_one("UPDATE t SET a = 1 WHERE id = 2").kind.is_fingerprintable());
    assert!(parse_one("INSERT INTO t VALUES (1)").kind.is_fingerprintable());
    assert!(!parse_one("CREATE TABLE t1 (a INT)").kind.is_fingerprintable());
    assert!(!parse_one("DROP TABLE t1").kind.is_fingerprintable());
    assert!(!parse_one("USE sales").kind.is_fingerprintable());
    assert!(!parse_one("inception set session enable_fingerprint = 1").kind.is_fingerprintable());
}

#[test]
fn test_fingerprint_without_ast_normalizes_text() {
    let node = StatementNode::new("SELECT   1\nFROM dual", StatementKind::Other, None);
    assert_eq!(fingerprint(&node), "select 1 from dual");
}

#[test]
fn test_ddl_messages() {
    assert_eq!(QueryExecutor::ddl_message("CREATE TABLE t (a INT)"), "Table created");
    assert_eq!(QueryExecutor::ddl_message("create or replace view v as select 1"), "View created");
    assert_eq!(QueryExecutor::ddl_message("DROP INDEX idx"), "Index dropped");
    assert_eq!(QueryExecutor::ddl_message("TRUNCATE TABLE t"), "Table truncated");
    assert_eq!(QueryExecutor::ddl_message("ALTER SESSION SET x = 1"), "Session altered");
}
