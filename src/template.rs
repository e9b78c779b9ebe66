//! String interpolation templates.
//!
//! `$name`, `${expr}` and (optionally) bare `{expr}` embed expressions
//! in plain text. `\` escapes the next character. A `:format` suffix
//! directly after a closing brace attaches a format spec, applied at
//! evaluation time by a caller-supplied formatter or the built-in
//! default. Parsing runs an explicit state-machine stack so quoted
//! strings nested inside `{}` do not close the expression region early.
//!
//! A template that is one single placeholder evaluates to the raw value
//! of its expression; anything else concatenates into a string.

use std::collections::BTreeSet;

use crate::error::{Error, EvalResult, ParseResult, Span};
use crate::expr::Expr;
use crate::name::Name;
use crate::parser::parse_expression;
use crate::scope::{Scope, SymbolTable};
use crate::value::Value;

/// Caller-supplied formatter. Return `None` to fall back to the
/// built-in formats.
pub type Formatter = dyn Fn(&Value, &str) -> Option<String> + Send + Sync;

/// Knobs for template parsing.
#[derive(Debug, Clone, Copy)]
pub struct TemplateOptions {
    /// Recognize bare `{expr}` in addition to `${expr}`. Document text
    /// wants this; contexts where braces are ordinary characters turn
    /// it off.
    pub bare_braces: bool,
}

impl Default for TemplateOptions {
    fn default() -> TemplateOptions {
        TemplateOptions { bare_braces: true }
    }
}

#[derive(Debug, Clone)]
enum Segment {
    /// Plain text.
    Literal(String),
    /// A placeholder that collapsed at parse time; keeps raw typing.
    Const(Value),
    /// A live placeholder, evaluated and formatted per scope.
    Expr { expr: Expr, format: Option<String> },
}

/// A parsed interpolation template.
#[derive(Debug, Clone)]
pub struct TemplateExpr {
    segments: Vec<Segment>,
}

impl TemplateExpr {
    pub fn parse(source: &str, symbols: &SymbolTable) -> ParseResult<TemplateExpr> {
        TemplateExpr::parse_with(source, symbols, TemplateOptions::default())
    }

    pub fn parse_with(
        source: &str,
        symbols: &SymbolTable,
        options: TemplateOptions,
    ) -> ParseResult<TemplateExpr> {
        let segments = TemplateParser::new(source, symbols, options).run()?;
        Ok(TemplateExpr {
            segments: collapse(segments),
        })
    }

    /// True when evaluation cannot depend on the scope or a formatter.
    pub fn is_constant(&self) -> bool {
        self.segments
            .iter()
            .all(|s| matches!(s, Segment::Literal(_) | Segment::Const(_)))
    }

    /// The value of a constant template, `None` for live ones.
    pub fn constant_value(&self) -> Option<Value> {
        match self.segments.as_slice() {
            [] => Some(Value::Str(String::new())),
            [Segment::Literal(text)] => Some(Value::Str(text.clone())),
            [Segment::Const(v)] => Some(v.clone()),
            _ => None,
        }
    }

    /// Evaluate against a scope. A template that is exactly one
    /// unformatted placeholder returns the raw value of its expression;
    /// every other shape renders to a string.
    pub fn evaluate(&self, scope: &Scope, formatter: Option<&Formatter>) -> EvalResult<Value> {
        if let [seg] = self.segments.as_slice() {
            match seg {
                Segment::Const(v) => return Ok(v.clone()),
                Segment::Expr { expr, format: None } => return expr.evaluate(scope),
                _ => {}
            }
        }
        let mut out = String::new();
        for seg in &self.segments {
            match seg {
                Segment::Literal(text) => out.push_str(text),
                Segment::Const(v) => out.push_str(&v.to_string()),
                Segment::Expr { expr, format } => {
                    let value = expr.evaluate(scope)?;
                    match format {
                        Some(spec) => out.push_str(&apply_format(&value, spec, formatter)?),
                        None => out.push_str(&value.to_string()),
                    }
                }
            }
        }
        Ok(Value::Str(out))
    }

    /// Names the template still needs from a runtime scope.
    pub fn free_variables(&self) -> BTreeSet<Name> {
        let mut vars = BTreeSet::new();
        for seg in &self.segments {
            if let Segment::Expr { expr, .. } = seg {
                vars.extend(expr.free_variables());
            }
        }
        vars
    }
}

/// Join a fully-constant multi-segment template into one literal.
fn collapse(segments: Vec<Segment>) -> Vec<Segment> {
    let all_const = segments
        .iter()
        .all(|s| matches!(s, Segment::Literal(_) | Segment::Const(_)));
    if segments.len() > 1 && all_const {
        let mut joined = String::new();
        for seg in &segments {
            match seg {
                Segment::Literal(text) => joined.push_str(text),
                Segment::Const(v) => joined.push_str(&v.to_string()),
                Segment::Expr { .. } => {}
            }
        }
        return vec![Segment::Literal(joined)];
    }
    segments
}

// =====================================================================
// Formatting
// =====================================================================

fn apply_format(
    value: &Value,
    spec: &str,
    formatter: Option<&Formatter>,
) -> EvalResult<String> {
    if let Some(custom) = formatter {
        if let Some(s) = custom(value, spec) {
            return Ok(s);
        }
    }
    default_format(value, spec).ok_or_else(|| {
        Error::calculation(format!(
            "unknown format `{}` for {}",
            spec,
            value.kind_name()
        ))
    })
}

/// Built-in formats: `.N` fixed decimals, `x`/`X` hex, `upper`,
/// `lower`, `trim`.
fn default_format(value: &Value, spec: &str) -> Option<String> {
    if let Some(digits) = spec.strip_prefix('.') {
        let n: usize = digits.parse().ok()?;
        let v = value.as_f64().ok()?;
        return Some(format!("{:.*}", n, v));
    }
    match spec {
        "x" => hex(value, false),
        "X" => hex(value, true),
        "upper" => Some(value.to_string().to_uppercase()),
        "lower" => Some(value.to_string().to_lowercase()),
        "trim" => Some(value.to_string().trim().to_string()),
        _ => None,
    }
}

fn hex(value: &Value, upper: bool) -> Option<String> {
    let v = value.as_i64().ok()?;
    let sign = if v < 0 { "-" } else { "" };
    let mag = v.unsigned_abs();
    Some(if upper {
        format!("{}{:X}", sign, mag)
    } else {
        format!("{}{:x}", sign, mag)
    })
}

// =====================================================================
// State machine
// =====================================================================

#[derive(Debug, Clone, Copy)]
enum State {
    Text,
    Escape,
    /// Just saw `$`.
    ExprStart { start: usize },
    /// Scanning a bare `$name`.
    Key { start: usize },
    /// Inside a braced expression; `depth` counts nested `{`.
    Expr { start: usize, depth: u32 },
    /// Inside a quoted string within a braced expression.
    ExprString,
}

struct TemplateParser<'a> {
    symbols: &'a SymbolTable,
    options: TemplateOptions,
    chars: Vec<(usize, char)>,
    pos: usize,
    text: String,
    buf: String,
    segments: Vec<Segment>,
    stack: Vec<State>,
}

impl<'a> TemplateParser<'a> {
    fn new(source: &'a str, symbols: &'a SymbolTable, options: TemplateOptions) -> Self {
        TemplateParser {
            symbols,
            options,
            chars: source.char_indices().collect(),
            pos: 0,
            text: String::new(),
            buf: String::new(),
            segments: Vec::new(),
            stack: vec![State::Text],
        }
    }

    fn state(&self) -> State {
        self.stack.last().copied().unwrap_or(State::Text)
    }

    fn run(mut self) -> ParseResult<Vec<Segment>> {
        while self.pos < self.chars.len() {
            let (offset, c) = self.chars[self.pos];
            self.pos += 1;
            match self.state() {
                State::Text => match c {
                    '\\' => self.stack.push(State::Escape),
                    '$' => self.stack.push(State::ExprStart { start: offset }),
                    '{' if self.options.bare_braces => {
                        self.stack.push(State::Expr {
                            start: offset,
                            depth: 1,
                        });
                    }
                    _ => self.text.push(c),
                },
                State::Escape => {
                    self.text.push(c);
                    self.stack.pop();
                }
                State::ExprStart { start } => {
                    self.stack.pop();
                    if c == '{' {
                        self.stack.push(State::Expr { start, depth: 1 });
                    } else if c.is_ascii_alphabetic() {
                        self.buf.push(c);
                        self.stack.push(State::Key { start });
                    } else {
                        // a `$` that introduces nothing is plain text
                        self.text.push('$');
                        self.pos -= 1;
                    }
                }
                State::Key { start } => {
                    if c.is_ascii_alphanumeric() {
                        self.buf.push(c);
                    } else {
                        self.stack.pop();
                        self.finish_key(start)?;
                        self.pos -= 1;
                    }
                }
                State::Expr { start, depth } => match c {
                    '"' => {
                        self.buf.push('"');
                        self.stack.push(State::ExprString);
                    }
                    '{' => {
                        self.buf.push('{');
                        if let Some(State::Expr { depth, .. }) = self.stack.last_mut() {
                            *depth += 1;
                        }
                    }
                    '}' => {
                        if depth == 1 {
                            self.stack.pop();
                            self.finish_expr(start, offset)?;
                        } else {
                            self.buf.push('}');
                            if let Some(State::Expr { depth, .. }) = self.stack.last_mut() {
                                *depth -= 1;
                            }
                        }
                    }
                    _ => self.buf.push(c),
                },
                State::ExprString => match c {
                    '\\' => {
                        self.buf.push('\\');
                        if let Some((_, next)) = self.chars.get(self.pos).copied() {
                            self.buf.push(next);
                            self.pos += 1;
                        }
                    }
                    '"' => {
                        self.buf.push('"');
                        self.stack.pop();
                    }
                    _ => self.buf.push(c),
                },
            }
        }
        match self.state() {
            State::Text => {}
            State::Escape => {
                return Err(Error::syntax("template ends with a dangling escape"));
            }
            State::ExprStart { .. } => self.text.push('$'),
            State::Key { start } => self.finish_key(start)?,
            State::Expr { start, .. } => {
                return Err(Error::syntax("unclosed expression in template")
                    .with_span(Span::at_offset(start, 1)));
            }
            State::ExprString => {
                return Err(Error::syntax("unterminated string in template expression"));
            }
        }
        self.flush_text();
        Ok(self.segments)
    }

    fn flush_text(&mut self) {
        if !self.text.is_empty() {
            self.segments
                .push(Segment::Literal(std::mem::take(&mut self.text)));
        }
    }

    fn finish_key(&mut self, start: usize) -> ParseResult<()> {
        let key = std::mem::take(&mut self.buf);
        let placeholder = format!("${}", key);
        let expr = parse_expression(&placeholder, self.symbols).map_err(|e| {
            e.locate(
                Span::at_offset(start, key.len() + 1),
                format!("in `${}`", key),
            )
        })?;
        self.flush_text();
        self.push_expr(expr, None)
    }

    fn finish_expr(&mut self, start: usize, close: usize) -> ParseResult<()> {
        let text = std::mem::take(&mut self.buf);
        let span = Span::at_offset(start, close - start + 1);
        let expr = parse_expression(&text, self.symbols)
            .map_err(|e| e.locate(span, "in template expression"))?;
        let format = self.scan_format();
        self.flush_text();
        self.push_expr(expr, format)
    }

    /// A `:` glued to the closing brace followed by a non-empty run of
    /// format characters attaches a format; anything else stays text.
    fn scan_format(&mut self) -> Option<String> {
        if self.chars.get(self.pos).map(|(_, c)| *c) != Some(':') {
            return None;
        }
        let mut end = self.pos + 1;
        while end < self.chars.len() && is_format_char(self.chars[end].1) {
            end += 1;
        }
        if end == self.pos + 1 {
            return None;
        }
        let spec: String = self.chars[self.pos + 1..end].iter().map(|(_, c)| *c).collect();
        self.pos = end;
        Some(spec)
    }

    fn push_expr(&mut self, expr: Expr, format: Option<String>) -> ParseResult<()> {
        if format.is_none() && expr.is_constant() {
            let value = expr.evaluate(&Scope::empty())?;
            self.segments.push(Segment::Const(value));
            return Ok(());
        }
        self.segments.push(Segment::Expr { expr, format });
        Ok(())
    }
}

fn is_format_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '+' | '-')
}
