//! Builds the node tree from lexed items.

use std::iter::Peekable;
use std::vec::IntoIter;

use super::lexer::{Item, Token};
use super::TemplateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Builtin {
    Not,
    And,
    Or,
    Eq,
    Ne,
    Len,
}

impl Builtin {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "not" => Some(Builtin::Not),
            "and" => Some(Builtin::And),
            "or" => Some(Builtin::Or),
            "eq" => Some(Builtin::Eq),
            "ne" => Some(Builtin::Ne),
            "len" => Some(Builtin::Len),
            _ => None,
        }
    }

    pub(crate) fn name(self) -> &'static str {
        match self {
            Builtin::Not => "not",
            Builtin::And => "and",
            Builtin::Or => "or",
            Builtin::Eq => "eq",
            Builtin::Ne => "ne",
            Builtin::Len => "len",
        }
    }

    fn arity_ok(self, count: usize) -> bool {
        match self {
            Builtin::Not | Builtin::Len => count == 1,
            Builtin::Ne => count == 2,
            Builtin::Eq => count >= 2,
            Builtin::And | Builtin::Or => count >= 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    /// Path from the current dot (`.A.B`)
    Dot(Vec<String>),
    /// Path from the root data (`$.A.B`)
    Root(Vec<String>),
    Str(String),
    Int(i64),
    Bool(bool),
    Call(Builtin, Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Node {
    Text(String),
    Output {
        line: usize,
        expr: Expr,
    },
    If {
        line: usize,
        branches: Vec<(Expr, Vec<Node>)>,
        otherwise: Vec<Node>,
    },
    Range {
        line: usize,
        expr: Expr,
        body: Vec<Node>,
        otherwise: Vec<Node>,
    },
}

enum Terminator {
    Eof,
    End { line: usize },
    Else { line: usize, condition: Option<Expr> },
}

fn syntax(line: usize, message: impl Into<String>) -> TemplateError {
    TemplateError::Syntax {
        line,
        message: message.into(),
    }
}

pub(crate) fn parse(items: Vec<Item>) -> Result<Vec<Node>, TemplateError> {
    let mut items = items.into_iter().peekable();
    let (nodes, terminator) = parse_list(&mut items)?;
    match terminator {
        Terminator::Eof => Ok(nodes),
        Terminator::End { line } => Err(syntax(line, "unexpected {{end}}")),
        Terminator::Else { line, .. } => Err(syntax(line, "unexpected {{else}}")),
    }
}

fn parse_list(
    items: &mut Peekable<IntoIter<Item>>,
) -> Result<(Vec<Node>, Terminator), TemplateError> {
    let mut nodes = Vec::new();

    while let Some(item) = items.next() {
        let (line, tokens) = match item {
            Item::Text(text) => {
                nodes.push(Node::Text(text));
                continue;
            }
            Item::Action { line, tokens } => (line, tokens),
        };

        match tokens.first() {
            Some(Token::Ident(keyword)) if keyword == "end" => {
                if tokens.len() > 1 {
                    return Err(syntax(line, "unexpected arguments after end"));
                }
                return Ok((nodes, Terminator::End { line }));
            }
            Some(Token::Ident(keyword)) if keyword == "else" => {
                let condition = match tokens.get(1) {
                    None => None,
                    Some(Token::Ident(next)) if next == "if" => {
                        Some(parse_expr(&tokens[2..], line)?)
                    }
                    Some(_) => return Err(syntax(line, "unexpected arguments after else")),
                };
                return Ok((nodes, Terminator::Else { line, condition }));
            }
            Some(Token::Ident(keyword)) if keyword == "if" => {
                let condition = parse_expr(&tokens[1..], line)?;
                nodes.push(parse_if(items, line, condition)?);
            }
            Some(Token::Ident(keyword)) if keyword == "range" => {
                let expr = parse_expr(&tokens[1..], line)?;
                nodes.push(parse_range(items, line, expr)?);
            }
            Some(Token::Ident(keyword))
                if matches!(
                    keyword.as_str(),
                    "with" | "define" | "template" | "block" | "break" | "continue"
                ) =>
            {
                return Err(syntax(line, format!("{{{{{keyword}}}}} is not supported")));
            }
            _ => {
                let expr = parse_expr(&tokens, line)?;
                nodes.push(Node::Output { line, expr });
            }
        }
    }

    Ok((nodes, Terminator::Eof))
}

fn parse_if(
    items: &mut Peekable<IntoIter<Item>>,
    line: usize,
    condition: Expr,
) -> Result<Node, TemplateError> {
    let mut branches = Vec::new();
    let mut condition = condition;

    loop {
        let (body, terminator) = parse_list(items)?;
        match terminator {
            Terminator::End { .. } => {
                branches.push((condition, body));
                return Ok(Node::If {
                    line,
                    branches,
                    otherwise: Vec::new(),
                });
            }
            Terminator::Else {
                condition: Some(next),
                ..
            } => {
                branches.push((condition, body));
                condition = next;
            }
            Terminator::Else {
                condition: None, ..
            } => {
                branches.push((condition, body));
                let (otherwise, terminator) = parse_list(items)?;
                return match terminator {
                    Terminator::End { .. } => Ok(Node::If {
                        line,
                        branches,
                        otherwise,
                    }),
                    Terminator::Else { line, .. } => {
                        Err(syntax(line, "{{else}} after final {{else}}"))
                    }
                    Terminator::Eof => Err(syntax(line, "unexpected EOF, missing {{end}}")),
                };
            }
            Terminator::Eof => return Err(syntax(line, "unexpected EOF, missing {{end}}")),
        }
    }
}

fn parse_range(
    items: &mut Peekable<IntoIter<Item>>,
    line: usize,
    expr: Expr,
) -> Result<Node, TemplateError> {
    let (body, terminator) = parse_list(items)?;
    let otherwise = match terminator {
        Terminator::End { .. } => Vec::new(),
        Terminator::Else {
            condition: None, ..
        } => {
            let (otherwise, terminator) = parse_list(items)?;
            match terminator {
                Terminator::End { .. } => otherwise,
                Terminator::Else { line, .. } => {
                    return Err(syntax(line, "{{else}} after final {{else}}"))
                }
                Terminator::Eof => return Err(syntax(line, "unexpected EOF, missing {{end}}")),
            }
        }
        Terminator::Else {
            condition: Some(_),
            line,
        } => return Err(syntax(line, "{{else if}} inside {{range}}")),
        Terminator::Eof => return Err(syntax(line, "unexpected EOF, missing {{end}}")),
    };

    Ok(Node::Range {
        line,
        expr,
        body,
        otherwise,
    })
}

/// Parse a full action body into one expression.
fn parse_expr(tokens: &[Token], line: usize) -> Result<Expr, TemplateError> {
    if tokens.is_empty() {
        return Err(syntax(line, "missing value for command"));
    }
    let (expr, used) = parse_command(tokens, line)?;
    if used != tokens.len() {
        return Err(syntax(line, "unexpected trailing tokens"));
    }
    Ok(expr)
}

/// A function call with its arguments, or a single operand.
fn parse_command(tokens: &[Token], line: usize) -> Result<(Expr, usize), TemplateError> {
    if let Some(Token::Ident(name)) = tokens.first() {
        if let Some(builtin) = Builtin::from_name(name) {
            let mut args = Vec::new();
            let mut index = 1;
            while index < tokens.len() && tokens[index] != Token::RParen {
                let (arg, used) = parse_operand(&tokens[index..], line)?;
                args.push(arg);
                index += used;
            }
            if !builtin.arity_ok(args.len()) {
                return Err(syntax(
                    line,
                    format!("wrong number of args for {}: got {}", builtin.name(), args.len()),
                ));
            }
            return Ok((Expr::Call(builtin, args), index));
        }
    }
    parse_operand(tokens, line)
}

fn parse_operand(tokens: &[Token], line: usize) -> Result<(Expr, usize), TemplateError> {
    let Some(first) = tokens.first() else {
        return Err(syntax(line, "missing operand"));
    };
    let expr = match first {
        Token::Field(path) => Expr::Dot(path.clone()),
        Token::Variable(path) => Expr::Root(path.clone()),
        Token::Str(value) => Expr::Str(value.clone()),
        Token::Int(value) => Expr::Int(*value),
        Token::Ident(name) if name == "true" => Expr::Bool(true),
        Token::Ident(name) if name == "false" => Expr::Bool(false),
        Token::Ident(name) if Builtin::from_name(name).is_some() => {
            return Err(syntax(
                line,
                format!("{name} must be called inside parentheses when used as an argument"),
            ))
        }
        Token::Ident(name) => return Err(syntax(line, format!("function {name:?} not defined"))),
        Token::LParen => {
            let (inner, used) = parse_command(&tokens[1..], line)?;
            if tokens.get(used + 1) != Some(&Token::RParen) {
                return Err(syntax(line, "unclosed left paren"));
            }
            return Ok((inner, used + 2));
        }
        Token::RParen => return Err(syntax(line, "unexpected right paren")),
        Token::Pipe => return Err(syntax(line, "pipelines are not supported")),
        Token::Declare | Token::Comma => {
            return Err(syntax(line, "variable declarations are not supported"))
        }
    };
    Ok((expr, 1))
}
