use super::parser::{Builtin, Expr, Node};
use super::value::Value;
use super::TemplateError;

fn render_error(line: usize, message: impl Into<String>) -> TemplateError {
    TemplateError::Render {
        line,
        message: message.into(),
    }
}

pub(crate) struct Renderer<'a> {
    root: &'a Value,
    out: String,
}

impl<'a> Renderer<'a> {
    pub(crate) fn new(root: &'a Value) -> Self {
        Self {
            root,
            out: String::new(),
        }
    }

    pub(crate) fn finish(self) -> String {
        self.out
    }

    pub(crate) fn render_nodes(&mut self, nodes: &[Node], dot: &Value) -> Result<(), TemplateError> {
        for node in nodes {
            self.render_node(node, dot)?;
        }
        Ok(())
    }

    fn render_node(&mut self, node: &Node, dot: &Value) -> Result<(), TemplateError> {
        match node {
            Node::Text(text) => self.out.push_str(text),
            Node::Output { line, expr } => {
                let value = self.eval(expr, dot, *line)?;
                if let Value::Record(name, _) = value {
                    return Err(render_error(
                        *line,
                        format!("can't print value of type {name}"),
                    ));
                }
                self.out.push_str(&value.to_string());
            }
            Node::If {
                line,
                branches,
                otherwise,
            } => {
                for (condition, body) in branches {
                    if self.eval(condition, dot, *line)?.is_truthy() {
                        return self.render_nodes(body, dot);
                    }
                }
                self.render_nodes(otherwise, dot)?;
            }
            Node::Range {
                line,
                expr,
                body,
                otherwise,
            } => {
                let items = match self.eval(expr, dot, *line)? {
                    Value::List(items) => items,
                    Value::Nil => Vec::new(),
                    other => {
                        return Err(render_error(
                            *line,
                            format!("range can't iterate over {}", other.type_name()),
                        ))
                    }
                };
                if items.is_empty() {
                    self.render_nodes(otherwise, dot)?;
                } else {
                    for item in &items {
                        self.render_nodes(body, item)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn eval(&self, expr: &Expr, dot: &Value, line: usize) -> Result<Value, TemplateError> {
        match expr {
            Expr::Dot(fields) => walk(dot, fields, line),
            Expr::Root(fields) => walk(self.root, fields, line),
            Expr::Str(value) => Ok(Value::Str(value.clone())),
            Expr::Int(value) => Ok(Value::Int(*value)),
            Expr::Bool(value) => Ok(Value::Bool(*value)),
            Expr::Call(builtin, args) => self.call(*builtin, args, dot, line),
        }
    }

    fn call(
        &self,
        builtin: Builtin,
        args: &[Expr],
        dot: &Value,
        line: usize,
    ) -> Result<Value, TemplateError> {
        match builtin {
            Builtin::Not => Ok(Value::Bool(!self.eval(&args[0], dot, line)?.is_truthy())),
            // and/or short-circuit and yield the deciding operand
            Builtin::And => {
                let mut last = Value::Nil;
                for arg in args {
                    last = self.eval(arg, dot, line)?;
                    if !last.is_truthy() {
                        break;
                    }
                }
                Ok(last)
            }
            Builtin::Or => {
                let mut last = Value::Nil;
                for arg in args {
                    last = self.eval(arg, dot, line)?;
                    if last.is_truthy() {
                        break;
                    }
                }
                Ok(last)
            }
            Builtin::Eq => {
                let first = self.eval(&args[0], dot, line)?;
                for arg in &args[1..] {
                    let other = self.eval(arg, dot, line)?;
                    if compare(&first, &other, line)? {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
            Builtin::Ne => {
                let left = self.eval(&args[0], dot, line)?;
                let right = self.eval(&args[1], dot, line)?;
                Ok(Value::Bool(!compare(&left, &right, line)?))
            }
            Builtin::Len => match self.eval(&args[0], dot, line)? {
                Value::Str(s) => Ok(Value::Int(s.len() as i64)),
                Value::List(items) => Ok(Value::Int(items.len() as i64)),
                Value::Record(_, fields) => Ok(Value::Int(fields.len() as i64)),
                other => Err(render_error(
                    line,
                    format!("len of type {}", other.type_name()),
                )),
            },
        }
    }
}

fn walk(start: &Value, fields: &[String], line: usize) -> Result<Value, TemplateError> {
    let mut current = start;
    for field in fields {
        current = match current {
            Value::Record(name, map) => map.get(field.as_str()).ok_or_else(|| {
                render_error(
                    line,
                    format!("can't evaluate field {field} in type {name}"),
                )
            })?,
            Value::Nil => {
                return Err(render_error(
                    line,
                    format!("nil pointer evaluating .{field}"),
                ))
            }
            other => {
                return Err(render_error(
                    line,
                    format!("can't evaluate field {field} in type {}", other.type_name()),
                ))
            }
        };
    }
    Ok(current.clone())
}

fn compare(left: &Value, right: &Value, line: usize) -> Result<bool, TemplateError> {
    match (left, right) {
        (Value::Bool(a), Value::Bool(b)) => Ok(a == b),
        (Value::Int(a), Value::Int(b)) => Ok(a == b),
        (Value::Str(a), Value::Str(b)) => Ok(a == b),
        _ => Err(render_error(
            line,
            format!(
                "incompatible types for comparison: {} and {}",
                left.type_name(),
                right.type_name()
            ),
        )),
    }
}
