//! Restricted expression evaluator, per §7.
//!
//! Grammar covers arithmetic, comparisons, boolean combinators, dotted
//! attribute access into the per-tick input snapshot, and list/mapping
//! literals. There is no call syntax and no import statement in the
//! grammar at all, so "restrict builtins to a whitelist" and "disallow
//! import statements" fall out of parsing rather than needing a denylist.
//! The one runtime check the grammar can't encode structurally is §7's
//! "no access to names starting with an underscore", enforced in
//! [`parse_checked`] by walking the parsed attribute paths.

use std::collections::HashMap;
use std::iter::Peekable;
use std::str::Chars;

use crate::error::{ChompError, Result};
use crate::model::FieldValue;

/// A value flowing through the evaluator: either a literal produced by
/// parsing, a variable lookup result, or an evaluation result.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absence of a value.
    Null,
    /// A boolean.
    Bool(bool),
    /// A numeric scalar.
    Number(f64),
    /// A string literal.
    String(String),
    /// A list literal.
    List(Vec<Value>),
    /// A mapping literal, keyed by identifier or string-literal keys.
    Map(HashMap<String, Value>),
}

impl Value {
    fn truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0,
            Self::String(s) => !s.is_empty(),
            Self::List(items) => !items.is_empty(),
            Self::Map(map) => !map.is_empty(),
        }
    }

    fn as_number(&self, op: &str) -> Result<f64> {
        match self {
            Self::Number(n) => Ok(*n),
            other => Err(ChompError::HandlerError {
                ingester: "<expression>".to_string(),
                reason: format!("operator {op:?} expects a number, found {other:?}"),
            }),
        }
    }
}

impl From<&FieldValue> for Value {
    fn from(value: &FieldValue) -> Self {
        match value {
            FieldValue::Null => Self::Null,
            FieldValue::Number(n) => Self::Number(*n),
            FieldValue::String(s) => Self::String(s.clone()),
            FieldValue::Bytes(b) => Self::String(hex::encode(b)),
            FieldValue::Structured(v) => json_to_value(v),
        }
    }
}

fn json_to_value(v: &serde_json::Value) -> Value {
    match v {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or_default()),
        serde_json::Value::String(s) => Value::String(s.clone()),
        serde_json::Value::Array(items) => Value::List(items.iter().map(json_to_value).collect()),
        serde_json::Value::Object(map) => Value::Map(
            map.iter()
                .map(|(k, v)| (k.clone(), json_to_value(v)))
                .collect(),
        ),
    }
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Number(if b { 1.0 } else { 0.0 }),
            Value::Number(n) => Self::Number(n),
            Value::String(s) => Self::String(s),
            Value::List(items) => Self::Structured(serde_json::Value::Array(
                items.into_iter().map(value_to_json).collect(),
            )),
            Value::Map(map) => Self::Structured(serde_json::Value::Object(
                map.into_iter().map(|(k, v)| (k, value_to_json(v))).collect(),
            )),
        }
    }
}

fn value_to_json(value: Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(b),
        Value::Number(n) => serde_json::Number::from_f64(n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::String(s) => serde_json::Value::String(s),
        Value::List(items) => serde_json::Value::Array(items.into_iter().map(value_to_json).collect()),
        Value::Map(map) => {
            serde_json::Value::Object(map.into_iter().map(|(k, v)| (k, value_to_json(v))).collect())
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// AST
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnOp {
    Neg,
    Not,
}

/// A parsed, safety-checked expression, ready to evaluate repeatedly
/// against different input snapshots without re-parsing.
#[derive(Debug, Clone)]
pub enum Expr {
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    /// Dotted variable path, e.g. `priceFeed.usd`.
    Var(Vec<String>),
    List(Vec<Expr>),
    Map(Vec<(String, Expr)>),
    Unary(UnOp, Box<Expr>),
    Binary(Box<Expr>, BinOp, Box<Expr>),
}

// ═══════════════════════════════════════════════════════════════════════════════
// TOKENIZER
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Bang,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,
}

struct Lexer<'a> {
    chars: Peekable<Chars<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            chars: src.chars().peekable(),
        }
    }

    fn tokenize(mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        while let Some(&c) = self.chars.peek() {
            match c {
                c if c.is_whitespace() => {
                    self.chars.next();
                }
                '0'..='9' => tokens.push(self.read_number()?),
                '\'' | '"' => tokens.push(self.read_string(c)?),
                c if c.is_alphabetic() || c == '_' => tokens.push(self.read_ident()),
                '+' => {
                    self.chars.next();
                    tokens.push(Token::Plus);
                }
                '-' => {
                    self.chars.next();
                    tokens.push(Token::Minus);
                }
                '*' => {
                    self.chars.next();
                    tokens.push(Token::Star);
                }
                '/' => {
                    self.chars.next();
                    tokens.push(Token::Slash);
                }
                '%' => {
                    self.chars.next();
                    tokens.push(Token::Percent);
                }
                '(' => {
                    self.chars.next();
                    tokens.push(Token::LParen);
                }
                ')' => {
                    self.chars.next();
                    tokens.push(Token::RParen);
                }
                '[' => {
                    self.chars.next();
                    tokens.push(Token::LBracket);
                }
                ']' => {
                    self.chars.next();
                    tokens.push(Token::RBracket);
                }
                '{' => {
                    self.chars.next();
                    tokens.push(Token::LBrace);
                }
                '}' => {
                    self.chars.next();
                    tokens.push(Token::RBrace);
                }
                ',' => {
                    self.chars.next();
                    tokens.push(Token::Comma);
                }
                ':' => {
                    self.chars.next();
                    tokens.push(Token::Colon);
                }
                '.' => {
                    self.chars.next();
                    tokens.push(Token::Dot);
                }
                '=' => {
                    self.chars.next();
                    self.expect('=')?;
                    tokens.push(Token::EqEq);
                }
                '!' => {
                    self.chars.next();
                    if self.chars.peek() == Some(&'=') {
                        self.chars.next();
                        tokens.push(Token::NotEq);
                    } else {
                        tokens.push(Token::Bang);
                    }
                }
                '<' => {
                    self.chars.next();
                    if self.chars.peek() == Some(&'=') {
                        self.chars.next();
                        tokens.push(Token::Le);
                    } else {
                        tokens.push(Token::Lt);
                    }
                }
                '>' => {
                    self.chars.next();
                    if self.chars.peek() == Some(&'=') {
                        self.chars.next();
                        tokens.push(Token::Ge);
                    } else {
                        tokens.push(Token::Gt);
                    }
                }
                '&' => {
                    self.chars.next();
                    self.expect('&')?;
                    tokens.push(Token::AndAnd);
                }
                '|' => {
                    self.chars.next();
                    self.expect('|')?;
                    tokens.push(Token::OrOr);
                }
                other => {
                    return Err(parse_error(format!("unexpected character {other:?}")));
                }
            }
        }
        Ok(tokens)
    }

    fn expect(&mut self, want: char) -> Result<()> {
        if self.chars.next() == Some(want) {
            Ok(())
        } else {
            Err(parse_error(format!("expected {want:?}")))
        }
    }

    fn read_number(&mut self) -> Result<Token> {
        let mut buf = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_digit() || c == '.' {
                buf.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        buf.parse::<f64>()
            .map(Token::Number)
            .map_err(|_| parse_error(format!("invalid number literal {buf:?}")))
    }

    fn read_string(&mut self, quote: char) -> Result<Token> {
        self.chars.next();
        let mut buf = String::new();
        loop {
            match self.chars.next() {
                Some(c) if c == quote => return Ok(Token::Str(buf)),
                Some(c) => buf.push(c),
                None => return Err(parse_error("unterminated string literal")),
            }
        }
    }

    fn read_ident(&mut self) -> Token {
        let mut buf = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_alphanumeric() || c == '_' {
                buf.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        Token::Ident(buf)
    }
}

fn parse_error(reason: impl Into<String>) -> ChompError {
    ChompError::ConfigError(format!("expression parse error: {}", reason.into()))
}

// ═══════════════════════════════════════════════════════════════════════════════
// RECURSIVE-DESCENT PARSER
// ═══════════════════════════════════════════════════════════════════════════════

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn expect(&mut self, tok: &Token) -> Result<()> {
        if self.peek() == Some(tok) {
            self.pos += 1;
            Ok(())
        } else {
            Err(parse_error(format!(
                "expected {tok:?}, found {:?}",
                self.peek()
            )))
        }
    }

    fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_and()?;
        while self.peek() == Some(&Token::OrOr) {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::Binary(Box::new(lhs), BinOp::Or, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_not()?;
        while self.peek() == Some(&Token::AndAnd) {
            self.advance();
            let rhs = self.parse_not()?;
            lhs = Expr::Binary(Box::new(lhs), BinOp::And, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr> {
        if self.peek() == Some(&Token::Bang) {
            self.advance();
            let inner = self.parse_not()?;
            return Ok(Expr::Unary(UnOp::Not, Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let lhs = self.parse_additive()?;
        let op = match self.peek() {
            Some(Token::EqEq) => BinOp::Eq,
            Some(Token::NotEq) => BinOp::Ne,
            Some(Token::Lt) => BinOp::Lt,
            Some(Token::Le) => BinOp::Le,
            Some(Token::Gt) => BinOp::Gt,
            Some(Token::Ge) => BinOp::Ge,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.parse_additive()?;
        Ok(Expr::Binary(Box::new(lhs), op, Box::new(rhs)))
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary(Box::new(lhs), op, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::Percent) => BinOp::Mod,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(Box::new(lhs), op, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.peek() == Some(&Token::Minus) {
            self.advance();
            let inner = self.parse_unary()?;
            return Ok(Expr::Unary(UnOp::Neg, Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Str(s)) => Ok(Expr::Str(s)),
            Some(Token::Ident(name)) => match name.as_str() {
                "true" => Ok(Expr::Bool(true)),
                "false" => Ok(Expr::Bool(false)),
                "null" => Ok(Expr::Null),
                _ => {
                    let mut path = vec![name];
                    while self.peek() == Some(&Token::Dot) {
                        self.advance();
                        match self.advance() {
                            Some(Token::Ident(segment)) => path.push(segment),
                            other => {
                                return Err(parse_error(format!(
                                    "expected identifier after '.', found {other:?}"
                                )));
                            }
                        }
                    }
                    Ok(Expr::Var(path))
                }
            },
            Some(Token::LParen) => {
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(Token::LBracket) => {
                let mut items = Vec::new();
                if self.peek() != Some(&Token::RBracket) {
                    loop {
                        items.push(self.parse_expr()?);
                        if self.peek() == Some(&Token::Comma) {
                            self.advance();
                        } else {
                            break;
                        }
                    }
                }
                self.expect(&Token::RBracket)?;
                Ok(Expr::List(items))
            }
            Some(Token::LBrace) => {
                let mut entries = Vec::new();
                if self.peek() != Some(&Token::RBrace) {
                    loop {
                        let key = match self.advance() {
                            Some(Token::Ident(k)) | Some(Token::Str(k)) => k,
                            other => {
                                return Err(parse_error(format!(
                                    "expected mapping key, found {other:?}"
                                )));
                            }
                        };
                        self.expect(&Token::Colon)?;
                        let value = self.parse_expr()?;
                        entries.push((key, value));
                        if self.peek() == Some(&Token::Comma) {
                            self.advance();
                        } else {
                            break;
                        }
                    }
                }
                self.expect(&Token::RBrace)?;
                Ok(Expr::Map(entries))
            }
            other => Err(parse_error(format!("unexpected token {other:?}"))),
        }
    }
}

/// Walk the parsed AST rejecting any dotted path segment that starts with
/// `_`, per §7's private-name guard.
fn validate(expr: &Expr) -> Result<()> {
    match expr {
        Expr::Var(path) => {
            if let Some(segment) = path.iter().find(|s| s.starts_with('_')) {
                return Err(ChompError::ConfigError(format!(
                    "expression references private name {segment:?}"
                )));
            }
            Ok(())
        }
        Expr::List(items) => items.iter().try_for_each(validate),
        Expr::Map(entries) => entries.iter().try_for_each(|(_, v)| validate(v)),
        Expr::Unary(_, inner) => validate(inner),
        Expr::Binary(lhs, _, rhs) => {
            validate(lhs)?;
            validate(rhs)
        }
        Expr::Null | Expr::Bool(_) | Expr::Number(_) | Expr::Str(_) => Ok(()),
    }
}

/// Parse and safety-check `source`, returning an [`Expr`] ready for
/// repeated evaluation via [`eval`]. This is the single entry point a
/// handler resolution step should call once per expression, caching the
/// result for the ingester's lifetime.
///
/// # Errors
/// Returns [`ChompError::ConfigError`] if the expression fails to parse
/// or references a private (`_`-prefixed) name.
pub fn parse_checked(source: &str) -> Result<Expr> {
    let tokens = Lexer::new(source).tokenize()?;
    let mut parser = Parser::new(tokens);
    let expr = parser.parse_expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(parse_error("trailing input after expression"));
    }
    validate(&expr)?;
    Ok(expr)
}

/// Evaluate a previously-[`parse_checked`] expression against a variable
/// environment (typically one entry per upstream ingester, each a nested
/// mapping of field name to value).
///
/// # Errors
/// Returns [`ChompError::HandlerError`] on an unresolved variable, a type
/// mismatch, or division by zero.
pub fn eval(expr: &Expr, env: &HashMap<String, Value>) -> Result<Value> {
    match expr {
        Expr::Null => Ok(Value::Null),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Number(n) => Ok(Value::Number(*n)),
        Expr::Str(s) => Ok(Value::String(s.clone())),
        Expr::Var(path) => lookup(path, env),
        Expr::List(items) => Ok(Value::List(
            items
                .iter()
                .map(|item| eval(item, env))
                .collect::<Result<Vec<_>>>()?,
        )),
        Expr::Map(entries) => {
            let mut map = HashMap::with_capacity(entries.len());
            for (key, value_expr) in entries {
                map.insert(key.clone(), eval(value_expr, env)?);
            }
            Ok(Value::Map(map))
        }
        Expr::Unary(UnOp::Neg, inner) => Ok(Value::Number(-eval(inner, env)?.as_number("-")?)),
        Expr::Unary(UnOp::Not, inner) => Ok(Value::Bool(!eval(inner, env)?.truthy())),
        Expr::Binary(lhs, op, rhs) => eval_binary(lhs, *op, rhs, env),
    }
}

fn lookup(path: &[String], env: &HashMap<String, Value>) -> Result<Value> {
    let Some((head, rest)) = path.split_first() else {
        return Ok(Value::Null);
    };
    let mut current = env.get(head).cloned().ok_or_else(|| ChompError::HandlerError {
        ingester: "<expression>".to_string(),
        reason: format!("undefined name {head:?}"),
    })?;
    for segment in rest {
        current = match current {
            Value::Map(map) => map.get(segment).cloned().ok_or_else(|| ChompError::HandlerError {
                ingester: "<expression>".to_string(),
                reason: format!("no attribute {segment:?}"),
            })?,
            other => {
                return Err(ChompError::HandlerError {
                    ingester: "<expression>".to_string(),
                    reason: format!("{other:?} has no attribute {segment:?}"),
                });
            }
        };
    }
    Ok(current)
}

fn eval_binary(lhs: &Expr, op: BinOp, rhs: &Expr, env: &HashMap<String, Value>) -> Result<Value> {
    if matches!(op, BinOp::And) {
        let l = eval(lhs, env)?;
        return if l.truthy() { eval(rhs, env) } else { Ok(l) };
    }
    if matches!(op, BinOp::Or) {
        let l = eval(lhs, env)?;
        return if l.truthy() { Ok(l) } else { eval(rhs, env) };
    }

    let l = eval(lhs, env)?;
    let r = eval(rhs, env)?;
    match op {
        BinOp::Add => match (&l, &r) {
            (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{a}{b}"))),
            _ => Ok(Value::Number(l.as_number("+")? + r.as_number("+")?)),
        },
        BinOp::Sub => Ok(Value::Number(l.as_number("-")? - r.as_number("-")?)),
        BinOp::Mul => Ok(Value::Number(l.as_number("*")? * r.as_number("*")?)),
        BinOp::Div => {
            let divisor = r.as_number("/")?;
            if divisor == 0.0 {
                return Err(ChompError::HandlerError {
                    ingester: "<expression>".to_string(),
                    reason: "division by zero".to_string(),
                });
            }
            Ok(Value::Number(l.as_number("/")? / divisor))
        }
        BinOp::Mod => {
            let divisor = r.as_number("%")?;
            if divisor == 0.0 {
                return Err(ChompError::HandlerError {
                    ingester: "<expression>".to_string(),
                    reason: "modulo by zero".to_string(),
                });
            }
            Ok(Value::Number(l.as_number("%")? % divisor))
        }
        BinOp::Eq => Ok(Value::Bool(l == r)),
        BinOp::Ne => Ok(Value::Bool(l != r)),
        BinOp::Lt => Ok(Value::Bool(l.as_number("<")? < r.as_number("<")?)),
        BinOp::Le => Ok(Value::Bool(l.as_number("<=")? <= r.as_number("<=")?)),
        BinOp::Gt => Ok(Value::Bool(l.as_number(">")? > r.as_number(">")?)),
        BinOp::Ge => Ok(Value::Bool(l.as_number(">=")? >= r.as_number(">=")?)),
        BinOp::And | BinOp::Or => unreachable!("handled by short-circuit branch above"),
    }
}
