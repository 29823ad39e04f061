//! Splits template source into literal text and `{{ ... }}` actions, then
//! tokenizes each action.

use super::TemplateError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    /// Keyword or function name such as `if`, `range`, `not`
    Ident(String),
    /// `.` or `.A.B`
    Field(Vec<String>),
    /// `$` or `$.A.B`
    Variable(Vec<String>),
    Str(String),
    Int(i64),
    LParen,
    RParen,
    Pipe,
    Declare,
    Comma,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Item {
    Text(String),
    Action { line: usize, tokens: Vec<Token> },
}

fn syntax(line: usize, message: impl Into<String>) -> TemplateError {
    TemplateError::Syntax {
        line,
        message: message.into(),
    }
}

fn starts_with_trim_marker(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next() == Some('-') && chars.next().is_some_and(char::is_whitespace)
}

fn ends_with_trim_marker(s: &str) -> bool {
    let mut chars = s.chars().rev();
    chars.next() == Some('-') && chars.next().is_some_and(char::is_whitespace)
}

/// Byte offset of the `}}` closing the action that starts at `body`, skipping
/// over quoted strings.
fn find_action_end(body: &str) -> Option<usize> {
    let bytes = body.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => {
                i += 1;
                while i < bytes.len() && bytes[i] != b'"' {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
            }
            b'`' => {
                i += 1;
                while i < bytes.len() && bytes[i] != b'`' {
                    i += 1;
                }
            }
            b'}' if bytes.get(i + 1) == Some(&b'}') => return Some(i),
            _ => {}
        }
        i += 1;
    }
    None
}

/// Comments may contain `}}`, so their end is found by the `*/` marker.
fn comment_end(after_open: &str, trim_left: bool) -> Option<usize> {
    let skip = if trim_left { 1 } else { 0 };
    let body = &after_open[skip..];
    if !body.trim_start().starts_with("/*") {
        return None;
    }
    let close_comment = body.find("*/")? + 2;
    let tail = &body[close_comment..];
    let before_braces = tail.find("}}")?;
    let between = tail[..before_braces].trim();
    if !(between.is_empty() || between == "-") {
        return None;
    }
    Some(skip + close_comment + before_braces)
}

pub(crate) fn lex(source: &str) -> Result<Vec<Item>, TemplateError> {
    let mut items = Vec::new();
    let mut rest = source;
    let mut line = 1;
    let mut trim_next_text = false;

    loop {
        let Some(open) = rest.find("{{") else {
            let text = if trim_next_text { rest.trim_start() } else { rest };
            if !text.is_empty() {
                items.push(Item::Text(text.to_string()));
            }
            return Ok(items);
        };

        let mut text = &rest[..open];
        if trim_next_text {
            text = text.trim_start();
        }
        let after_open = &rest[open + 2..];
        let trim_left = starts_with_trim_marker(after_open);
        if trim_left {
            text = text.trim_end();
        }
        if !text.is_empty() {
            items.push(Item::Text(text.to_string()));
        }
        line += rest[..open].matches('\n').count();

        let close = comment_end(after_open, trim_left)
            .or_else(|| find_action_end(after_open))
            .ok_or_else(|| syntax(line, "unclosed action"))?;
        let mut inner = &after_open[..close];
        if trim_left {
            inner = &inner[1..];
        }
        trim_next_text = ends_with_trim_marker(inner);
        if trim_next_text {
            inner = &inner[..inner.len() - 1];
        }

        let action_line = line;
        line += after_open[..close].matches('\n').count();
        rest = &after_open[close + 2..];

        let trimmed = inner.trim();
        if trimmed.starts_with("/*") {
            if !trimmed.ends_with("*/") {
                return Err(syntax(action_line, "unclosed comment"));
            }
            continue;
        }
        if trimmed.is_empty() {
            return Err(syntax(action_line, "missing value for command"));
        }

        items.push(Item::Action {
            line: action_line,
            tokens: tokenize(trimmed, action_line)?,
        });
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn read_path(chars: &[char], mut i: usize) -> (Vec<String>, usize) {
    let mut fields = Vec::new();
    while i < chars.len() && chars[i] == '.' {
        let start = i + 1;
        let mut end = start;
        while end < chars.len() && is_ident_char(chars[end]) {
            end += 1;
        }
        if end == start {
            i = end;
            break;
        }
        fields.push(chars[start..end].iter().collect());
        i = end;
    }
    (fields, i)
}

pub(crate) fn tokenize(action: &str, line: usize) -> Result<Vec<Token>, TemplateError> {
    let chars: Vec<char> = action.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '|' => {
                tokens.push(Token::Pipe);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            ':' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Declare);
                i += 2;
            }
            '.' => {
                let (fields, next) = read_path(&chars, i);
                if fields.is_empty() && next > i + 1 {
                    return Err(syntax(line, "malformed field reference"));
                }
                if next < chars.len() && !chars[next].is_whitespace() && chars[next] != ')' {
                    return Err(syntax(
                        line,
                        format!("unexpected character {:?} in field reference", chars[next]),
                    ));
                }
                tokens.push(Token::Field(fields));
                i = next.max(i + 1);
            }
            '$' => {
                let mut j = i + 1;
                while j < chars.len() && is_ident_char(chars[j]) {
                    j += 1;
                }
                if j > i + 1 {
                    return Err(syntax(line, "template variables are not supported"));
                }
                let (fields, next) = read_path(&chars, j);
                tokens.push(Token::Variable(fields));
                i = next;
            }
            '"' => {
                let mut value = String::new();
                let mut j = i + 1;
                loop {
                    match chars.get(j) {
                        None => return Err(syntax(line, "unterminated quoted string")),
                        Some('"') => break,
                        Some('\\') => {
                            let escaped = match chars.get(j + 1) {
                                Some('n') => '\n',
                                Some('t') => '\t',
                                Some('r') => '\r',
                                Some('\\') => '\\',
                                Some('"') => '"',
                                Some(other) => {
                                    return Err(syntax(
                                        line,
                                        format!("unknown escape sequence \\{other}"),
                                    ))
                                }
                                None => return Err(syntax(line, "unterminated quoted string")),
                            };
                            value.push(escaped);
                            j += 2;
                        }
                        Some(ch) => {
                            value.push(*ch);
                            j += 1;
                        }
                    }
                }
                tokens.push(Token::Str(value));
                i = j + 1;
            }
            '`' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|ch| *ch == '`')
                    .ok_or_else(|| syntax(line, "unterminated raw string"))?;
                tokens.push(Token::Str(chars[i + 1..i + 1 + end].iter().collect()));
                i += end + 2;
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) => {
                let start = i;
                i += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                let value = literal
                    .parse::<i64>()
                    .map_err(|_| syntax(line, format!("bad number {literal}")))?;
                tokens.push(Token::Int(value));
            }
            c if is_ident_char(c) => {
                let start = i;
                while i < chars.len() && is_ident_char(chars[i]) {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => {
                return Err(syntax(line, format!("unexpected {other:?} in action")));
            }
        }
    }

    Ok(tokens)
}
