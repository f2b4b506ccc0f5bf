use sqlparser::ast::{Value, VisitMut, VisitorMut};
use std::ops::ControlFlow;

use super::StatementNode;

/// Replaces every literal with a placeholder so only the statement's shape remains.
struct LiteralMasker;

impl VisitorMut for LiteralMasker {
    type Break = ();

    fn pre_visit_value(&mut self, value: &mut Value) -> ControlFlow<Self::Break> {
        *value = Value::Placeholder("?".to_string());
        ControlFlow::Continue(())
    }
}

/// Literal-independent signature of a statement.
pub fn fingerprint(node: &StatementNode) -> String {
    match &node.ast {
        Some(statement) => {
            let mut masked = statement.clone();
            let _ = masked.visit(&mut LiteralMasker);
            masked.to_string().to_lowercase()
        }
        None => node
            .text
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase(),
    }
}
