//! Path and intrinsic expression engine.
//!
//! An expression is one of:
//! - a path rooted at `$` (evaluated against the state's input) or `$$`
//!   (evaluated against the execution context), with `.key`, `['key']` and
//!   `[index]` segments;
//! - a single-quoted string literal, where `\` escapes the next character;
//! - an intrinsic call `States.Function(arg, ...)` whose arguments are
//!   themselves expressions, evaluated before the call.
//!
//! This single evaluator backs every `.$`-suffixed payload template field,
//! every Choice predicate operand and every `*Path` state field.

use serde_json::{Map, Value};

use crate::context::Context;
use crate::error::{names, ExecutionError, Result};

/// Evaluate `expression` against `input` and `context`, requiring a value.
///
/// A path that matches nothing fails with `PathNotFound`; syntax errors fail
/// with `InvalidPath` and unknown intrinsics with `InvalidIntrinsicFunction`.
pub fn select(expression: &str, input: &Value, context: &Context) -> Result<Value> {
    resolve(expression, input, context)?.ok_or_else(|| {
        ExecutionError::new(
            names::PATH_NOT_FOUND,
            format!("no value matched '{expression}'"),
        )
    })
}

/// Evaluate `expression`, distinguishing "no value" from failure.
///
/// Choice predicates use this form: a dangling path contributes `None`
/// instead of an error, which `IsPresent` then observes directly.
pub fn resolve(expression: &str, input: &Value, context: &Context) -> Result<Option<Value>> {
    let expr = ExprParser::new(expression).parse_top_level()?;
    evaluate(&expr, input, context)
}

/// Write `value` into `target` at an input-rooted path, creating missing
/// intermediate objects (and padding arrays) along the way.
pub fn write_path(target: &mut Value, path: &str, value: Value) -> Result<()> {
    let (root, segments) = parse_path(path)?;
    if !matches!(root, Root::Input) {
        return Err(mismatch(path, "only input-rooted paths can be written"));
    }
    let Some((last, parents)) = segments.split_last() else {
        *target = value;
        return Ok(());
    };
    let mut current = target;
    for segment in parents {
        current = match segment {
            Segment::Key(key) => {
                if current.is_null() {
                    *current = Value::Object(Map::new());
                }
                match current {
                    Value::Object(map) => map.entry(key.as_str()).or_insert(Value::Null),
                    _ => return Err(mismatch(path, "segment traverses a non-object")),
                }
            }
            Segment::Index(index) => {
                if current.is_null() {
                    *current = Value::Array(Vec::new());
                }
                match current {
                    Value::Array(items) => {
                        if items.len() <= *index {
                            items.resize(index + 1, Value::Null);
                        }
                        &mut items[*index]
                    }
                    _ => return Err(mismatch(path, "segment indexes a non-array")),
                }
            }
        };
    }
    match last {
        Segment::Key(key) => {
            if current.is_null() {
                *current = Value::Object(Map::new());
            }
            match current {
                Value::Object(map) => {
                    map.insert(key.clone(), value);
                }
                _ => return Err(mismatch(path, "segment traverses a non-object")),
            }
        }
        Segment::Index(index) => {
            if current.is_null() {
                *current = Value::Array(Vec::new());
            }
            match current {
                Value::Array(items) => {
                    if items.len() <= *index {
                        items.resize(index + 1, Value::Null);
                    }
                    items[*index] = value;
                }
                _ => return Err(mismatch(path, "segment indexes a non-array")),
            }
        }
    }
    Ok(())
}

fn mismatch(path: &str, detail: &str) -> ExecutionError {
    ExecutionError::new(
        names::RESULT_PATH_MATCH_FAILURE,
        format!("cannot write '{path}': {detail}"),
    )
}

// ---------------------------------------------------------------------------
// Evaluation

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Path(String),
    StringLiteral {
        value: String,
        /// Original quoted source text, re-parsed by `States.Format`.
        raw: String,
    },
    Call {
        function: String,
        args: Vec<Expr>,
    },
}

fn evaluate(expr: &Expr, input: &Value, context: &Context) -> Result<Option<Value>> {
    match expr {
        Expr::Path(path) => evaluate_path(path, input, context),
        Expr::StringLiteral { value, .. } => Ok(Some(Value::String(value.clone()))),
        Expr::Call { function, args } => call_intrinsic(function, args, input, context).map(Some),
    }
}

fn evaluate_path(path: &str, input: &Value, context: &Context) -> Result<Option<Value>> {
    let (root, segments) = parse_path(path)?;
    let context_value;
    let mut current = match root {
        Root::Input => input,
        Root::Context => {
            context_value = context.to_value()?;
            &context_value
        }
    };
    for segment in &segments {
        let next = match (segment, current) {
            (Segment::Key(key), Value::Object(map)) => map.get(key),
            (Segment::Index(index), Value::Array(items)) => items.get(*index),
            _ => None,
        };
        match next {
            Some(value) => current = value,
            None => return Ok(None),
        }
    }
    Ok(Some(current.clone()))
}

fn evaluate_required(expr: &Expr, input: &Value, context: &Context) -> Result<Value> {
    evaluate(expr, input, context)?.ok_or_else(|| {
        ExecutionError::new(names::PATH_NOT_FOUND, "intrinsic argument matched no value")
    })
}

fn call_intrinsic(function: &str, args: &[Expr], input: &Value, context: &Context) -> Result<Value> {
    match function {
        "States.StringToJson" => {
            let [arg] = args else {
                return Err(arity(function, 1, args.len()));
            };
            let value = evaluate_required(arg, input, context)?;
            let text = value.as_str().ok_or_else(|| {
                ExecutionError::new(
                    names::INTRINSIC_FAILURE,
                    "States.StringToJson expects a string argument",
                )
            })?;
            serde_json::from_str(text).map_err(|e| {
                ExecutionError::new(names::INTRINSIC_FAILURE, format!("invalid JSON: {e}"))
            })
        }
        "States.JsonToString" => {
            let [arg] = args else {
                return Err(arity(function, 1, args.len()));
            };
            let value = evaluate_required(arg, input, context)?;
            let text = serde_json::to_string(&value).map_err(|e| {
                ExecutionError::new(names::INTRINSIC_FAILURE, format!("unserializable value: {e}"))
            })?;
            Ok(Value::String(text))
        }
        "States.Array" => {
            let mut items = Vec::with_capacity(args.len());
            for arg in args {
                items.push(evaluate_required(arg, input, context)?);
            }
            Ok(Value::Array(items))
        }
        "States.ArrayContains" => {
            let [haystack, needle] = args else {
                return Err(arity(function, 2, args.len()));
            };
            let haystack = evaluate_required(haystack, input, context)?;
            let items = haystack.as_array().ok_or_else(|| {
                ExecutionError::new(
                    names::INTRINSIC_FAILURE,
                    "States.ArrayContains expects an array argument",
                )
            })?;
            let needle = evaluate_required(needle, input, context)?;
            Ok(Value::Bool(items.contains(&needle)))
        }
        "States.Format" => format_intrinsic(args, input, context),
        other => Err(ExecutionError::new(
            names::INVALID_INTRINSIC_FUNCTION,
            format!("Function '{other}' is not supported"),
        )),
    }
}

fn arity(function: &str, expected: usize, got: usize) -> ExecutionError {
    ExecutionError::new(
        names::INTRINSIC_FAILURE,
        format!("{function} expects {expected} argument(s), got {got}"),
    )
}

fn format_intrinsic(args: &[Expr], input: &Value, context: &Context) -> Result<Value> {
    let Some((template, rest)) = args.split_first() else {
        return Err(ExecutionError::new(
            names::INTRINSIC_FAILURE,
            "States.Format expects a template argument",
        ));
    };
    let Expr::StringLiteral { raw, .. } = template else {
        return Err(ExecutionError::new(
            names::INVALID_TEMPLATE,
            "States.Format template must be a single-quoted string",
        ));
    };
    let parts = TemplateParser::new(raw).parse()?;
    let mut filled = Vec::with_capacity(rest.len());
    for arg in rest {
        filled.push(evaluate_required(arg, input, context)?);
    }
    let mut out = String::new();
    for part in parts {
        match part {
            TemplatePart::Literal(text) => out.push_str(&text),
            TemplatePart::Placeholder(index) => match filled.get(index) {
                Some(Value::String(s)) => out.push_str(s),
                Some(value) => out.push_str(&value.to_string()),
                None => {
                    return Err(ExecutionError::new(
                        names::INTRINSIC_FAILURE,
                        format!("no argument for placeholder {index}"),
                    ))
                }
            },
        }
    }
    Ok(Value::String(out))
}

// ---------------------------------------------------------------------------
// Path parsing

enum Root {
    Input,
    Context,
}

#[derive(Debug, PartialEq)]
enum Segment {
    Key(String),
    Index(usize),
}

fn invalid_path(path: &str, detail: &str) -> ExecutionError {
    ExecutionError::new(names::INVALID_PATH, format!("invalid path '{path}': {detail}"))
}

fn parse_path(path: &str) -> Result<(Root, Vec<Segment>)> {
    let (root, mut rest) = if let Some(rest) = path.strip_prefix("$$") {
        (Root::Context, rest)
    } else if let Some(rest) = path.strip_prefix('$') {
        (Root::Input, rest)
    } else {
        return Err(invalid_path(path, "paths start with '$' or '$$'"));
    };
    let mut segments = Vec::new();
    while !rest.is_empty() {
        if let Some(tail) = rest.strip_prefix('.') {
            let end = tail
                .find(|c| c == '.' || c == '[')
                .unwrap_or(tail.len());
            let (key, tail) = tail.split_at(end);
            if key.is_empty() {
                return Err(invalid_path(path, "empty segment"));
            }
            segments.push(Segment::Key(key.to_string()));
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix("['") {
            let end = tail
                .find('\'')
                .ok_or_else(|| invalid_path(path, "unterminated quoted segment"))?;
            let key = &tail[..end];
            let tail = tail[end + 1..]
                .strip_prefix(']')
                .ok_or_else(|| invalid_path(path, "expected ']' after quoted segment"))?;
            segments.push(Segment::Key(key.to_string()));
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix('[') {
            let end = tail
                .find(']')
                .ok_or_else(|| invalid_path(path, "unterminated index segment"))?;
            let index: usize = tail[..end]
                .trim()
                .parse()
                .map_err(|_| invalid_path(path, "index is not a number"))?;
            segments.push(Segment::Index(index));
            rest = &tail[end + 1..];
        } else {
            return Err(invalid_path(path, "unexpected character"));
        }
    }
    Ok((root, segments))
}

// ---------------------------------------------------------------------------
// Expression parsing

struct ExprParser {
    chars: Vec<char>,
    pos: usize,
}

impl ExprParser {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
        }
    }

    fn parse_top_level(mut self) -> Result<Expr> {
        self.skip_ws();
        match self.peek() {
            Some('$') => {
                let path: String = self.chars[self.pos..].iter().collect();
                Ok(Expr::Path(path.trim_end().to_string()))
            }
            Some('\'') => {
                let literal = self.parse_string_literal()?;
                self.skip_ws();
                if !self.eof() {
                    return Err(self.error("trailing characters after string literal"));
                }
                Ok(literal)
            }
            Some(_) => {
                let call = self.parse_call()?;
                self.skip_ws();
                if !self.eof() {
                    return Err(self.error("trailing characters after intrinsic call"));
                }
                Ok(call)
            }
            None => Err(self.error("empty expression")),
        }
    }

    fn parse_call(&mut self) -> Result<Expr> {
        let mut function = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '.' || c == '_' {
                function.push(c);
                self.advance();
            } else {
                break;
            }
        }
        if function.is_empty() {
            return Err(self.error("expected a function name"));
        }
        self.skip_ws();
        if self.next_char()? != '(' {
            return Err(self.error("expected '(' after function name"));
        }
        let mut args = Vec::new();
        self.skip_ws();
        if self.peek() == Some(')') {
            self.advance();
            return Ok(Expr::Call { function, args });
        }
        loop {
            args.push(self.parse_argument()?);
            self.skip_ws();
            match self.next_char()? {
                ',' => self.skip_ws(),
                ')' => break,
                _ => return Err(self.error("expected ',' or ')' in argument list")),
            }
        }
        Ok(Expr::Call { function, args })
    }

    fn parse_argument(&mut self) -> Result<Expr> {
        match self.peek() {
            Some('\'') => self.parse_string_literal(),
            Some('$') => {
                let start = self.pos;
                let mut depth = 0usize;
                let mut in_quote = false;
                while let Some(c) = self.peek() {
                    if in_quote {
                        if c == '\'' {
                            in_quote = false;
                        }
                    } else {
                        match c {
                            '\'' => in_quote = true,
                            '[' => depth += 1,
                            ']' => depth = depth.saturating_sub(1),
                            ',' | ')' if depth == 0 => break,
                            _ => {}
                        }
                    }
                    self.advance();
                }
                let path: String = self.chars[start..self.pos].iter().collect();
                Ok(Expr::Path(path.trim_end().to_string()))
            }
            Some(_) => self.parse_call(),
            None => Err(self.error("unexpected end of expression")),
        }
    }

    /// Cursor is on the opening quote; afterwards it is past the closing one.
    fn parse_string_literal(&mut self) -> Result<Expr> {
        let start = self.pos;
        if self.next_char()? != '\'' {
            return Err(self.error("expected a string literal"));
        }
        let mut value = String::new();
        loop {
            match self.next_char()? {
                '\\' => value.push(self.next_char()?),
                '\'' => break,
                c => value.push(c),
            }
        }
        let raw: String = self.chars[start..self.pos].iter().collect();
        Ok(Expr::StringLiteral { value, raw })
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.advance();
        }
    }

    fn eof(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    fn next_char(&mut self) -> Result<char> {
        let c = self
            .peek()
            .ok_or_else(|| self.error("unexpected end of expression"))?;
        self.advance();
        Ok(c)
    }

    fn error(&self, detail: &str) -> ExecutionError {
        let source: String = self.chars.iter().collect();
        ExecutionError::new(
            names::INVALID_PATH,
            format!("invalid expression: {detail} at index {} in {source:?}", self.pos),
        )
    }
}

// ---------------------------------------------------------------------------
// `States.Format` template parsing

#[derive(Debug, PartialEq)]
pub(crate) enum TemplatePart {
    Literal(String),
    Placeholder(usize),
}

/// Parses the single-quoted template of a `States.Format` call: literal runs
/// interleaved with positional `{}` placeholders. `\` escapes the following
/// character verbatim, so `\'` is a literal quote and `\{` a literal brace.
pub(crate) struct TemplateParser {
    chars: Vec<char>,
    pos: usize,
    placeholders: usize,
}

impl TemplateParser {
    pub(crate) fn new(template: &str) -> Self {
        Self {
            chars: template.chars().collect(),
            pos: 0,
            placeholders: 0,
        }
    }

    pub(crate) fn parse(mut self) -> Result<Vec<TemplatePart>> {
        if self.next()? != '\'' {
            return Err(self.error("expected opening quote"));
        }
        let mut parts = Vec::new();
        loop {
            match self.peek() {
                None => return Err(self.error("unexpected end of template")),
                Some('{') => {
                    self.pos += 1;
                    if self.next()? != '}' {
                        return Err(self.error("expected '}'"));
                    }
                    parts.push(TemplatePart::Placeholder(self.placeholders));
                    self.placeholders += 1;
                }
                Some('\'') => {
                    self.pos += 1;
                    if self.pos < self.chars.len() {
                        return Err(self.error("expected end of template after closing quote"));
                    }
                    return Ok(parts);
                }
                Some(_) => parts.push(TemplatePart::Literal(self.consume_literal()?)),
            }
        }
    }

    fn consume_literal(&mut self) -> Result<String> {
        let mut literal = String::new();
        loop {
            match self.peek() {
                None => return Err(self.error("unexpected end of template")),
                Some('{') | Some('\'') => return Ok(literal),
                Some('\\') => {
                    self.pos += 1;
                    literal.push(self.next()?);
                }
                Some(c) => {
                    literal.push(c);
                    self.pos += 1;
                }
            }
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn next(&mut self) -> Result<char> {
        let c = self
            .peek()
            .ok_or_else(|| self.error("unexpected end of template"))?;
        self.pos += 1;
        Ok(c)
    }

    fn error(&self, detail: &str) -> ExecutionError {
        let source: String = self.chars.iter().collect();
        ExecutionError::new(
            names::INVALID_TEMPLATE,
            format!("invalid template: {detail} at index {} in {source:?}", self.pos),
        )
    }
}
