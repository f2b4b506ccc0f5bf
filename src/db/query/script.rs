use super::{QueryExecutor, ScriptChunk};

/// Line-oriented statement splitter.
///
/// A chunk is flushed when a line ends with `;` (optionally followed by `\r`)
/// while the single-quote parity is balanced, or when the last line is
/// reached. Parity flips whenever a line holds an odd number of `'`.
///
/// Known limitation: parity is a heuristic. Escaped quotes (`\'`) and
/// apostrophes inside comments are counted like any other quote, so such a
/// line can keep the following statements glued together.
pub struct ScriptSplitter<'a> {
    lines: Vec<&'a str>,
    next_line: usize,
    buffer: Vec<&'a str>,
    quotes_balanced: bool,
}

impl<'a> ScriptSplitter<'a> {
    pub fn new(sql: &'a str) -> Self {
        Self {
            lines: sql.split('\n').collect(),
            next_line: 0,
            buffer: Vec::new(),
            quotes_balanced: true,
        }
    }

    pub fn total_lines(&self) -> usize {
        self.lines.len()
    }

    fn is_terminated(line: &str) -> bool {
        line.ends_with(';') || line.ends_with(";\r")
    }
}

impl<'a> Iterator for ScriptSplitter<'a> {
    type Item = ScriptChunk;

    fn next(&mut self) -> Option<ScriptChunk> {
        let last_line = self.lines.len().saturating_sub(1);

        while self.next_line < self.lines.len() {
            let index = self.next_line;
            let line = self.lines[index];
            self.next_line += 1;

            if line.matches('\'').count() % 2 == 1 {
                self.quotes_balanced = !self.quotes_balanced;
            }

            self.buffer.push(line);
            if (Self::is_terminated(line) && self.quotes_balanced) || index == last_line {
                let joined = self.buffer.join("\n");
                self.buffer.clear();
                return Some(ScriptChunk {
                    text: joined.trim_end_matches(';').to_string(),
                    end_line: index,
                });
            }
        }

        None
    }
}

impl QueryExecutor {
    pub fn split_script(sql: &str) -> Vec<ScriptChunk> {
        ScriptSplitter::new(sql).collect()
    }

    /// Text that may legitimately parse to nothing: blank or comment-led.
    pub fn is_trivial_text(sql: &str) -> bool {
        let trimmed = sql.trim();
        trimmed.is_empty()
            || trimmed.starts_with('#')
            || trimmed.starts_with("--")
            || trimmed.starts_with("/*")
    }

    pub fn strip_leading_comments(sql: &str) -> String {
        let mut remaining = sql;

        loop {
            let trimmed = remaining.trim_start();

            if trimmed.starts_with("--") || trimmed.starts_with('#') {
                if let Some(line_end) = trimmed.find('\n') {
                    remaining = &trimmed[line_end + 1..];
                    continue;
                }
                return String::new();
            }

            if trimmed.starts_with("/*") {
                if let Some(block_end) = trimmed.find("*/") {
                    remaining = &trimmed[block_end + 2..];
                    continue;
                }
                return String::new();
            }

            return trimmed.to_string();
        }
    }

    pub fn leading_keyword(sql: &str) -> Option<String> {
        let cleaned = Self::strip_leading_comments(sql);
        cleaned
            .split(|c: char| c.is_whitespace() || c == '(' || c == ';')
            .find(|token| !token.is_empty())
            .map(|token| token.to_uppercase())
    }
}
