//! Editing of stored `CREATE TABLE` statements.
//!
//! The pragmas do not expose `CHECK`, `COLLATE`, `AUTOINCREMENT` or generated
//! column expressions, so a rebuilt table starts from the text SQLite keeps
//! in `sqlite_master` and only the foreign key clauses are touched. The text
//! is split into its column and constraint items with a logos tokenizer that
//! understands quoting and comments; everything else is copied as written.

use super::quote_ident;
use logos::Logos;

#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip r"--[^\n]*")]
#[logos(skip r"/\*([^*]|\*+[^*/])*\*+/")]
enum TokenKind {
    #[regex(r"[A-Za-z0-9_$\x{80}-\x{10FFFF}]+")]
    Word,

    #[regex(r#""([^"]|"")*""#)]
    #[regex(r"`([^`]|``)*`")]
    #[regex(r"\[[^\]]*\]")]
    Quoted,

    #[regex(r"'([^']|'')*'")]
    Literal,

    #[token("(")]
    Open,

    #[token(")")]
    Close,

    #[token(",")]
    Comma,

    #[regex(r#"[^\sA-Za-z0-9_$(),'"`\[\x{80}-\x{10FFFF}]"#)]
    Other,
}

#[derive(Debug, Clone, Copy)]
struct Token {
    kind: TokenKind,
    start: usize,
    end: usize,
}

// `None` on an unterminated quote or literal.
fn tokenize(sql: &str) -> Option<Vec<Token>> {
    let mut lexer = TokenKind::lexer(sql);
    let mut tokens = Vec::new();
    while let Some(kind) = lexer.next() {
        let span = lexer.span();
        tokens.push(Token {
            kind: kind.ok()?,
            start: span.start,
            end: span.end,
        });
    }
    Some(tokens)
}

// One column definition or table constraint.
struct Item<'a> {
    text: &'a str,
    tokens: Vec<Token>,
}

impl<'a> Item<'a> {
    fn parse(text: &'a str) -> Option<Self> {
        Some(Self {
            text,
            tokens: tokenize(text)?,
        })
    }

    fn is_word(&self, index: usize, word: &str) -> bool {
        self.tokens.get(index).map_or(false, |t| {
            t.kind == TokenKind::Word && self.text[t.start..t.end].eq_ignore_ascii_case(word)
        })
    }

    fn is_name(&self, index: usize) -> bool {
        self.tokens
            .get(index)
            .map_or(false, |t| matches!(t.kind, TokenKind::Word | TokenKind::Quoted))
    }

    fn name(&self, index: usize) -> Option<String> {
        let token = self.tokens.get(index)?;
        let raw = &self.text[token.start..token.end];
        match token.kind {
            TokenKind::Word => Some(raw.to_string()),
            TokenKind::Quoted => {
                let inner = &raw[1..raw.len() - 1];
                Some(match raw.as_bytes()[0] {
                    b'"' => inner.replace("\"\"", "\""),
                    b'`' => inner.replace("``", "`"),
                    _ => inner.to_string(),
                })
            }
            _ => None,
        }
    }

    // Index just past the group opened at `open`.
    fn skip_group(&self, open: usize) -> Option<usize> {
        let mut depth = 0usize;
        for (index, token) in self.tokens.iter().enumerate().skip(open) {
            match token.kind {
                TokenKind::Open => depth += 1,
                TokenKind::Close => {
                    depth = depth.checked_sub(1)?;
                    if depth == 0 {
                        return Some(index + 1);
                    }
                }
                _ => {}
            }
        }
        None
    }

    // Index of the first token after an optional `CONSTRAINT name`.
    fn body_start(&self) -> usize {
        if self.is_word(0, "CONSTRAINT") && self.is_name(1) {
            2
        } else {
            0
        }
    }

    fn is_table_constraint(&self) -> bool {
        let start = self.body_start();
        ["PRIMARY", "UNIQUE", "CHECK", "FOREIGN"]
            .iter()
            .any(|word| self.is_word(start, word))
            || start == 2
    }

    /// Columns of a table-level `FOREIGN KEY (..)` item.
    fn foreign_key_columns(&self) -> Option<Vec<String>> {
        let start = self.body_start();
        if !(self.is_word(start, "FOREIGN") && self.is_word(start + 1, "KEY")) {
            return None;
        }
        let open = start + 2;
        if self.tokens.get(open)?.kind != TokenKind::Open {
            return None;
        }
        let end = self.skip_group(open)?;
        (open + 1..end - 1)
            .filter(|&index| self.is_name(index))
            .map(|index| self.name(index))
            .collect()
    }

    // Token range of an inline `[CONSTRAINT name] REFERENCES ..` clause.
    fn inline_reference(&self) -> Option<(usize, usize)> {
        let mut index = 0;
        let mut at = None;
        while index < self.tokens.len() {
            if self.tokens[index].kind == TokenKind::Open {
                index = self.skip_group(index)?;
                continue;
            }
            if self.is_word(index, "REFERENCES") {
                at = Some(index);
                break;
            }
            index += 1;
        }
        let at = at?;
        let start = if at >= 2 && self.is_word(at - 2, "CONSTRAINT") {
            at - 2
        } else {
            at
        };

        let mut end = at + 2;
        if self.tokens.get(end).map(|t| t.kind) == Some(TokenKind::Open) {
            end = self.skip_group(end)?;
        }
        loop {
            if self.is_word(end, "ON") {
                let action = end + 2;
                end = if self.is_word(action, "SET") || self.is_word(action, "NO") {
                    action + 2
                } else {
                    action + 1
                };
            } else if self.is_word(end, "MATCH") {
                end += 2;
            } else if self.is_word(end, "NOT") && self.is_word(end + 1, "DEFERRABLE") {
                end += 2;
            } else if self.is_word(end, "DEFERRABLE") {
                end += 1;
            } else if self.is_word(end, "INITIALLY") {
                end += 2;
            } else {
                break;
            }
        }
        Some((start, end.min(self.tokens.len())))
    }

    fn without(&self, range: (usize, usize)) -> String {
        let from = self.tokens[range.0].start;
        let to = self.tokens[range.1 - 1].end;
        format!("{}{}", self.text[..from].trim_end(), &self.text[to..])
    }
}

/// A stored `CREATE TABLE` split into its column and constraint items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    items: Vec<String>,
    options: String,
}

impl TableDefinition {
    /// Split a `CREATE TABLE` statement. `None` for anything else (virtual
    /// tables included), when it has no column list, or when the text cannot
    /// be tokenized.
    pub fn parse(sql: &str) -> Option<Self> {
        let tokens = tokenize(sql)?;
        let head = Item {
            text: sql,
            tokens: tokens.iter().take(2).copied().collect(),
        };
        if !(head.is_word(0, "CREATE") && head.is_word(1, "TABLE")) {
            return None;
        }
        let open = tokens.iter().position(|t| t.kind == TokenKind::Open)?;

        let mut items = Vec::new();
        let mut depth = 0usize;
        // Leading and trailing comments of an item are left out.
        let mut item: Option<(usize, usize)> = None;
        for token in &tokens[open + 1..] {
            match token.kind {
                TokenKind::Close | TokenKind::Comma if depth == 0 => {
                    let (start, end) = item.take()?;
                    items.push(sql[start..end].to_string());
                    if token.kind == TokenKind::Close {
                        let options = sql[token.end..].trim().to_string();
                        return Some(Self { items, options });
                    }
                    continue;
                }
                TokenKind::Open => depth += 1,
                TokenKind::Close => depth -= 1,
                _ => {}
            }
            let start = item.map_or(token.start, |(start, _)| start);
            item = Some((start, token.end));
        }
        None
    }

    /// Column definitions and table constraints as written.
    pub fn items(&self) -> &[String] {
        &self.items
    }

    /// Append a table constraint.
    pub fn push_constraint(&mut self, clause: impl Into<String>) {
        self.items.push(clause.into());
    }

    /// Remove the foreign key on `columns`, whether declared as a table
    /// constraint or inline on a single column. Returns whether one was found.
    pub fn drop_foreign_key(&mut self, columns: &[String]) -> bool {
        let same = |found: &[String]| {
            found.len() == columns.len()
                && found
                    .iter()
                    .zip(columns)
                    .all(|(a, b)| a.eq_ignore_ascii_case(b))
        };

        let table_level = self.items.iter().position(|text| {
            Item::parse(text)
                .and_then(|item| item.foreign_key_columns())
                .map_or(false, |found| same(&found))
        });
        if let Some(index) = table_level {
            self.items.remove(index);
            return true;
        }

        let [column] = columns else {
            return false;
        };
        for text in &mut self.items {
            let Some(item) = Item::parse(text) else {
                continue;
            };
            if item.is_table_constraint()
                || !item.name(0).map_or(false, |name| name.eq_ignore_ascii_case(column))
            {
                continue;
            }
            if let Some(range) = item.inline_reference() {
                let edited = item.without(range);
                *text = edited;
                return true;
            }
        }
        false
    }

    /// Render the statement under `name`.
    pub fn create_sql(&self, name: &str) -> String {
        let mut sql = format!("CREATE TABLE {} ({})", quote_ident(name), self.items.join(", "));
        if !self.options.is_empty() {
            sql.push(' ');
            sql.push_str(&self.options);
        }
        sql
    }
}
