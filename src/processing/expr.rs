//! Small expression language for field transformations.
//!
//! Grammar (loosest binding first):
//! ```text
//! expr       := or_expr ['if' or_expr 'else' expr]
//! or_expr    := and_expr ('or' and_expr)*
//! and_expr   := not_expr ('and' not_expr)*
//! not_expr   := 'not' not_expr | comparison
//! comparison := sum (('==' | '!=' | '<' | '<=' | '>' | '>=' | 'in' | 'not' 'in') sum)*
//! sum        := term (('+' | '-') term)*
//! term       := unary (('*' | '/' | '//' | '%') unary)*
//! unary      := ('-' | '+') unary | power
//! power      := postfix ['**' unary]
//! postfix    := primary ('[' subscript ']' | '.' NAME '(' args ')')*
//! primary    := NUMBER | STRING | 'True' | 'False' | 'None' | 'value' | 'item'
//!             | NAME '(' args ')' | '(' expr ')' | '[' [expr (',' expr)*] ']'
//! ```
//!
//! Only the functions in [`Func`] can be called. `x.f(args)` is sugar for
//! `f(x, args)`, so `', '.join(parts)` and `value.split(' ')` both work.
//! There is no attribute access, assignment, import or lambda.

use serde_json::{Map, Number, Value};
use std::cmp::Ordering;
use std::fmt;

const MAX_STRING_LEN: usize = 1 << 20;

#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub offset: usize,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at offset {}", self.message, self.offset)
    }
}

impl std::error::Error for ParseError {}

#[derive(Debug, Clone, PartialEq)]
pub enum EvalError {
    /// The result (or an intermediate) is NaN or infinite
    NonFinite,
    Failed(String),
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonFinite => f.write_str("result is not a finite number"),
            Self::Failed(reason) => f.write_str(reason),
        }
    }
}

impl std::error::Error for EvalError {}

type EvalResult = Result<Value, EvalError>;

fn fail<T>(reason: impl Into<String>) -> Result<T, EvalError> {
    Err(EvalError::Failed(reason.into()))
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Name(String),
    Op(&'static str),
    Eof,
}

const OPERATORS: [&str; 20] = [
    "**", "//", "==", "!=", "<=", ">=", "+", "-", "*", "/", "%", "<", ">", "(", ")", "[", "]", ",", ".", ":",
];

fn tokenize(source: &str) -> Result<Vec<(Token, usize)>, ParseError> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (offset, c) = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|(_, n)| n.is_ascii_digit())) {
            let start = i;
            let mut seen_dot = false;
            while let Some(&(_, d)) = chars.get(i) {
                if d.is_ascii_digit() || d == '_' {
                    i += 1;
                } else if d == '.' && !seen_dot {
                    seen_dot = true;
                    i += 1;
                } else {
                    break;
                }
            }
            let text: String = chars[start..i].iter().map(|(_, d)| *d).filter(|d| *d != '_').collect();
            let token = if seen_dot {
                text.parse().map(Token::Float).ok()
            } else {
                text.parse().map(Token::Int).ok()
            };
            let token = token.ok_or_else(|| ParseError {
                message: format!("invalid number '{}'", text),
                offset,
            })?;
            tokens.push((token, offset));
            continue;
        }

        if c == '\'' || c == '"' {
            let quote = c;
            let mut text = String::new();
            i += 1;
            loop {
                let Some(&(_, d)) = chars.get(i) else {
                    return Err(ParseError {
                        message: "unterminated string".to_string(),
                        offset,
                    });
                };
                i += 1;
                match d {
                    _ if d == quote => break,
                    '\\' => {
                        let Some(&(_, escaped)) = chars.get(i) else {
                            continue;
                        };
                        i += 1;
                        text.push(match escaped {
                            'n' => '\n',
                            't' => '\t',
                            'r' => '\r',
                            other => other,
                        });
                    }
                    _ => text.push(d),
                }
            }
            tokens.push((Token::Str(text), offset));
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            let start = i;
            while chars.get(i).is_some_and(|(_, d)| d.is_alphanumeric() || *d == '_') {
                i += 1;
            }
            let name: String = chars[start..i].iter().map(|(_, d)| *d).collect();
            tokens.push((Token::Name(name), offset));
            continue;
        }

        let rest = &source[offset..];
        match OPERATORS.iter().find(|op| rest.starts_with(*op)) {
            Some(op) => {
                tokens.push((Token::Op(*op), offset));
                i += op.chars().count();
            }
            None => {
                return Err(ParseError {
                    message: format!("unexpected character '{}'", c),
                    offset,
                })
            }
        }
    }

    tokens.push((Token::Eof, source.len()));
    Ok(tokens)
}

/// Callable functions. Nothing outside this list can be reached from an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Str,
    Int,
    Float,
    Bool,
    Len,
    Lower,
    Upper,
    Strip,
    Lstrip,
    Rstrip,
    Replace,
    Split,
    Join,
    Round,
    Abs,
    Min,
    Max,
    Sum,
    Contains,
    StartsWith,
    EndsWith,
    Default,
    Slice,
}

impl Func {
    fn from_name(name: &str) -> Option<Self> {
        let func = match name {
            "str" => Self::Str,
            "int" => Self::Int,
            "float" => Self::Float,
            "bool" => Self::Bool,
            "len" => Self::Len,
            "lower" => Self::Lower,
            "upper" => Self::Upper,
            "strip" => Self::Strip,
            "lstrip" => Self::Lstrip,
            "rstrip" => Self::Rstrip,
            "replace" => Self::Replace,
            "split" => Self::Split,
            "join" => Self::Join,
            "round" => Self::Round,
            "abs" => Self::Abs,
            "min" => Self::Min,
            "max" => Self::Max,
            "sum" => Self::Sum,
            "contains" => Self::Contains,
            "startswith" => Self::StartsWith,
            "endswith" => Self::EndsWith,
            "default" => Self::Default,
            "slice" => Self::Slice,
            _ => return None,
        };
        Some(func)
    }

    /// Accepted argument counts, receiver included
    fn arity(self) -> (usize, usize) {
        match self {
            Self::Str | Self::Int | Self::Float | Self::Bool | Self::Len | Self::Lower | Self::Upper | Self::Abs => {
                (1, 1)
            }
            Self::Strip | Self::Lstrip | Self::Rstrip | Self::Split | Self::Round | Self::Sum => (1, 2),
            Self::Join | Self::Contains | Self::StartsWith | Self::EndsWith | Self::Default => (2, 2),
            Self::Replace | Self::Slice => (2, 3),
            Self::Min | Self::Max => (1, usize::MAX),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    CurrentValue,
    Item,
    List(Vec<Expr>),
    Neg(Box<Expr>),
    Not(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Compare(Box<Expr>, Vec<(CmpOp, Expr)>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Conditional {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Index(Box<Expr>, Box<Expr>),
    Slice(Box<Expr>, Option<Box<Expr>>, Option<Box<Expr>>),
    Call(Func, Vec<Expr>),
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].0
    }

    fn offset(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].1
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn error<T>(&self, message: impl Into<String>) -> Result<T, ParseError> {
        Err(ParseError {
            message: message.into(),
            offset: self.offset(),
        })
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if matches!(self.peek(), Token::Op(o) if *o == op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if matches!(self.peek(), Token::Name(n) if n == keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> Result<(), ParseError> {
        if self.eat_op(op) {
            Ok(())
        } else {
            self.error(format!("expected '{}'", op))
        }
    }

    fn expression(&mut self) -> Result<Expr, ParseError> {
        let body = self.or_expr()?;
        if self.eat_keyword("if") {
            let condition = self.or_expr()?;
            if !self.eat_keyword("else") {
                return self.error("expected 'else'");
            }
            let otherwise = self.expression()?;
            return Ok(Expr::Conditional {
                condition: Box::new(condition),
                then: Box::new(body),
                otherwise: Box::new(otherwise),
            });
        }
        Ok(body)
    }

    fn or_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.and_expr()?;
        while self.eat_keyword("or") {
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.not_expr()?;
        while self.eat_keyword("and") {
            let right = self.not_expr()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Expr, ParseError> {
        if self.eat_keyword("not") {
            return Ok(Expr::Not(Box::new(self.not_expr()?)));
        }
        self.comparison()
    }

    fn comparison_op(&mut self) -> Option<CmpOp> {
        let op = match self.peek().clone() {
            Token::Op("==") => CmpOp::Eq,
            Token::Op("!=") => CmpOp::Ne,
            Token::Op("<") => CmpOp::Lt,
            Token::Op("<=") => CmpOp::Le,
            Token::Op(">") => CmpOp::Gt,
            Token::Op(">=") => CmpOp::Ge,
            Token::Name(n) if n == "in" => CmpOp::In,
            Token::Name(n) if n == "not" => {
                let followed_by_in = matches!(self.tokens.get(self.pos + 1), Some((Token::Name(n), _)) if n == "in");
                if !followed_by_in {
                    return None;
                }
                self.pos += 1;
                CmpOp::NotIn
            }
            _ => return None,
        };
        self.pos += 1;
        Some(op)
    }

    fn comparison(&mut self) -> Result<Expr, ParseError> {
        let first = self.sum()?;
        let mut rest = Vec::new();
        while let Some(op) = self.comparison_op() {
            rest.push((op, self.sum()?));
        }
        if rest.is_empty() {
            Ok(first)
        } else {
            Ok(Expr::Compare(Box::new(first), rest))
        }
    }

    fn sum(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.term()?;
        loop {
            let op = if self.eat_op("+") {
                BinOp::Add
            } else if self.eat_op("-") {
                BinOp::Sub
            } else {
                return Ok(left);
            };
            let right = self.term()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn term(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.unary()?;
        loop {
            let op = if self.eat_op("*") {
                BinOp::Mul
            } else if self.eat_op("//") {
                BinOp::FloorDiv
            } else if self.eat_op("/") {
                BinOp::Div
            } else if self.eat_op("%") {
                BinOp::Mod
            } else {
                return Ok(left);
            };
            let right = self.unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        if self.eat_op("-") {
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        if self.eat_op("+") {
            return self.unary();
        }
        self.power()
    }

    fn power(&mut self) -> Result<Expr, ParseError> {
        let base = self.postfix()?;
        if self.eat_op("**") {
            let exponent = self.unary()?;
            return Ok(Expr::Binary(BinOp::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.primary()?;
        loop {
            if self.eat_op("[") {
                expr = self.subscript(expr)?;
            } else if self.eat_op(".") {
                let Token::Name(name) = self.advance() else {
                    return self.error("expected a method name after '.'");
                };
                if !self.eat_op("(") {
                    return self.error(format!("attribute access '.{}' is not allowed", name));
                }
                let Some(func) = Func::from_name(&name) else {
                    return self.error(format!("unknown method '{}'", name));
                };
                let mut args = vec![expr];
                args.extend(self.arguments()?);
                expr = self.call(func, args)?;
            } else {
                return Ok(expr);
            }
        }
    }

    fn subscript(&mut self, target: Expr) -> Result<Expr, ParseError> {
        let start = if matches!(self.peek(), Token::Op(":")) {
            None
        } else {
            Some(Box::new(self.expression()?))
        };

        if self.eat_op(":") {
            let end = if matches!(self.peek(), Token::Op("]")) {
                None
            } else {
                Some(Box::new(self.expression()?))
            };
            self.expect_op("]")?;
            return Ok(Expr::Slice(Box::new(target), start, end));
        }

        self.expect_op("]")?;
        match start {
            Some(index) => Ok(Expr::Index(Box::new(target), index)),
            None => self.error("empty subscript"),
        }
    }

    /// Comma-separated arguments up to the closing parenthesis; the '(' is already consumed
    fn arguments(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut args = Vec::new();
        if self.eat_op(")") {
            return Ok(args);
        }
        loop {
            args.push(self.expression()?);
            if self.eat_op(")") {
                return Ok(args);
            }
            self.expect_op(",")?;
        }
    }

    fn call(&self, func: Func, args: Vec<Expr>) -> Result<Expr, ParseError> {
        let (min, max) = func.arity();
        if args.len() < min || args.len() > max {
            return self.error(format!("{:?} takes {} to {} arguments, got {}", func, min, max, args.len()));
        }
        Ok(Expr::Call(func, args))
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        let offset = self.offset();
        match self.advance() {
            Token::Int(i) => Ok(Expr::Literal(Value::from(i))),
            Token::Float(f) => Ok(Expr::Literal(Value::from(f))),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::Op("(") => {
                let inner = self.expression()?;
                self.expect_op(")")?;
                Ok(inner)
            }
            Token::Op("[") => {
                let mut items = Vec::new();
                if !self.eat_op("]") {
                    loop {
                        items.push(self.expression()?);
                        if self.eat_op("]") {
                            break;
                        }
                        self.expect_op(",")?;
                    }
                }
                Ok(Expr::List(items))
            }
            Token::Name(name) => match name.as_str() {
                "value" => Ok(Expr::CurrentValue),
                "item" => Ok(Expr::Item),
                "True" => Ok(Expr::Literal(Value::Bool(true))),
                "False" => Ok(Expr::Literal(Value::Bool(false))),
                "None" => Ok(Expr::Literal(Value::Null)),
                _ => {
                    let Some(func) = Func::from_name(&name) else {
                        return Err(ParseError {
                            message: format!("unknown name '{}'", name),
                            offset,
                        });
                    };
                    self.expect_op("(")?;
                    let args = self.arguments()?;
                    self.call(func, args)
                }
            },
            Token::Eof => Err(ParseError {
                message: "unexpected end of expression".to_string(),
                offset,
            }),
            other => Err(ParseError {
                message: format!("unexpected token {:?}", other),
                offset,
            }),
        }
    }
}

/// A parsed transformation, evaluated once per record
#[derive(Debug, Clone)]
pub struct Expression {
    source: String,
    root: Expr,
}

impl Expression {
    pub fn parse(source: &str) -> Result<Self, ParseError> {
        let mut parser = Parser {
            tokens: tokenize(source)?,
            pos: 0,
        };
        let root = parser.expression()?;
        if !matches!(parser.peek(), Token::Eof) {
            return parser.error("unexpected trailing input");
        }
        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate with `value` bound to the field and `item` to the whole record
    pub fn evaluate(&self, value: &Value, item: &Map<String, Value>) -> EvalResult {
        let scope = Scope { value, item };
        scope.eval(&self.root)
    }
}

struct Scope<'a> {
    value: &'a Value,
    item: &'a Map<String, Value>,
}

impl Scope<'_> {
    fn eval(&self, expr: &Expr) -> EvalResult {
        match expr {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::CurrentValue => Ok(self.value.clone()),
            Expr::Item => Ok(Value::Object(self.item.clone())),
            Expr::List(items) => items.iter().map(|e| self.eval(e)).collect::<Result<Vec<_>, _>>().map(Value::Array),
            Expr::Neg(inner) => match self.eval(inner)? {
                Value::Number(n) => match n.as_i64() {
                    Some(i) => i.checked_neg().map(Value::from).ok_or(EvalError::NonFinite),
                    None => float(-as_f64(&n)),
                },
                Value::Bool(b) => Ok(Value::from(-(b as i64))),
                other => fail(format!("bad operand for unary -: {}", type_name(&other))),
            },
            Expr::Not(inner) => Ok(Value::Bool(!truthy(&self.eval(inner)?))),
            Expr::And(left, right) => {
                let left = self.eval(left)?;
                if truthy(&left) {
                    self.eval(right)
                } else {
                    Ok(left)
                }
            }
            Expr::Or(left, right) => {
                let left = self.eval(left)?;
                if truthy(&left) {
                    Ok(left)
                } else {
                    self.eval(right)
                }
            }
            Expr::Conditional {
                condition,
                then,
                otherwise,
            } => {
                if truthy(&self.eval(condition)?) {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            Expr::Binary(op, left, right) => binary(*op, self.eval(left)?, self.eval(right)?),
            Expr::Compare(first, rest) => {
                let mut left = self.eval(first)?;
                for (op, next) in rest {
                    let right = self.eval(next)?;
                    if !compare(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::Index(target, index) => index_value(&self.eval(target)?, &self.eval(index)?),
            Expr::Slice(target, start, end) => {
                let start = start.as_ref().map(|e| self.eval(e)).transpose()?;
                let end = end.as_ref().map(|e| self.eval(e)).transpose()?;
                slice_value(&self.eval(target)?, start.as_ref(), end.as_ref())
            }
            Expr::Call(func, args) => {
                let args = args.iter().map(|e| self.eval(e)).collect::<Result<Vec<_>, _>>()?;
                call(*func, args)
            }
        }
    }
}

/// Null, false, zero and empty containers are falsy
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => as_f64(n) != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "None",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

fn as_f64(n: &Number) -> f64 {
    n.as_f64().unwrap_or(0.0)
}

fn float(f: f64) -> EvalResult {
    Number::from_f64(f).map(Value::Number).ok_or(EvalError::NonFinite)
}

enum Num {
    Int(i64),
    Float(f64),
}

fn numeric(value: &Value) -> Option<Num> {
    match value {
        Value::Number(n) => Some(match n.as_i64() {
            Some(i) => Num::Int(i),
            None => Num::Float(as_f64(n)),
        }),
        Value::Bool(b) => Some(Num::Int(*b as i64)),
        _ => None,
    }
}

fn to_f64(n: &Num) -> f64 {
    match n {
        Num::Int(i) => *i as f64,
        Num::Float(f) => *f,
    }
}

fn overflow() -> EvalError {
    EvalError::Failed("integer overflow".to_string())
}

fn binary(op: BinOp, left: Value, right: Value) -> EvalResult {
    match (op, &left, &right) {
        (BinOp::Add, Value::String(a), Value::String(b)) => {
            let joined = format!("{}{}", a, b);
            bounded(joined)
        }
        (BinOp::Add, Value::Array(a), Value::Array(b)) => {
            let mut joined = a.clone();
            joined.extend(b.iter().cloned());
            Ok(Value::Array(joined))
        }
        (BinOp::Mul, Value::String(s), n) | (BinOp::Mul, n, Value::String(s)) if numeric(n).is_some() => {
            let times = match numeric(n) {
                Some(Num::Int(i)) => usize::try_from(i).unwrap_or(0),
                _ => return fail("can't multiply sequence by non-int"),
            };
            if s.len().saturating_mul(times) > MAX_STRING_LEN {
                return fail("string result too large");
            }
            Ok(Value::String(s.repeat(times)))
        }
        _ => {
            let (Some(a), Some(b)) = (numeric(&left), numeric(&right)) else {
                return fail(format!(
                    "unsupported operand types for {:?}: {} and {}",
                    op,
                    type_name(&left),
                    type_name(&right)
                ));
            };
            arithmetic(op, a, b)
        }
    }
}

fn bounded(s: String) -> EvalResult {
    if s.len() > MAX_STRING_LEN {
        return fail("string result too large");
    }
    Ok(Value::String(s))
}

fn arithmetic(op: BinOp, a: Num, b: Num) -> EvalResult {
    if let (Num::Int(x), Num::Int(y)) = (&a, &b) {
        let (x, y) = (*x, *y);
        return match op {
            BinOp::Add => x.checked_add(y).map(Value::from).ok_or_else(overflow),
            BinOp::Sub => x.checked_sub(y).map(Value::from).ok_or_else(overflow),
            BinOp::Mul => x.checked_mul(y).map(Value::from).ok_or_else(overflow),
            BinOp::Div if y == 0 => fail("division by zero"),
            BinOp::Div => float(x as f64 / y as f64),
            BinOp::FloorDiv | BinOp::Mod if y == 0 => fail("integer division or modulo by zero"),
            BinOp::FloorDiv => {
                let q = x.checked_div(y).ok_or_else(overflow)?;
                let adjust = if (x % y != 0) && ((x < 0) != (y < 0)) { 1 } else { 0 };
                Ok(Value::from(q - adjust))
            }
            BinOp::Mod => {
                let r = x.checked_rem(y).ok_or_else(overflow)?;
                let r = if r != 0 && ((r < 0) != (y < 0)) { r + y } else { r };
                Ok(Value::from(r))
            }
            BinOp::Pow if y >= 0 => {
                let exp = u32::try_from(y).map_err(|_| overflow())?;
                x.checked_pow(exp).map(Value::from).ok_or_else(overflow)
            }
            BinOp::Pow => float((x as f64).powf(y as f64)),
        };
    }

    let (x, y) = (to_f64(&a), to_f64(&b));
    match op {
        BinOp::Add => float(x + y),
        BinOp::Sub => float(x - y),
        BinOp::Mul => float(x * y),
        BinOp::Div | BinOp::FloorDiv | BinOp::Mod if y == 0.0 => fail("float division by zero"),
        BinOp::Div => float(x / y),
        BinOp::FloorDiv => float((x / y).floor()),
        BinOp::Mod => float(x - y * (x / y).floor()),
        BinOp::Pow => float(x.powf(y)),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (numeric_only(a), numeric_only(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn numeric_only(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => Some(as_f64(n)),
        Value::Bool(b) => Some(*b as i64 as f64),
        _ => None,
    }
}

fn ordering(a: &Value, b: &Value) -> Result<Ordering, EvalError> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y) {
                match ordering(l, r)? {
                    Ordering::Equal => continue,
                    other => return Ok(other),
                }
            }
            Ok(x.len().cmp(&y.len()))
        }
        _ => match (numeric_only(a), numeric_only(b)) {
            (Some(x), Some(y)) => x.partial_cmp(&y).ok_or(EvalError::NonFinite),
            _ => fail(format!("cannot compare {} with {}", type_name(a), type_name(b))),
        },
    }
}

fn contains(haystack: &Value, needle: &Value) -> Result<bool, EvalError> {
    match haystack {
        Value::String(s) => match needle {
            Value::String(n) => Ok(s.contains(n.as_str())),
            other => fail(format!("'in <str>' requires str, not {}", type_name(other))),
        },
        Value::Array(items) => Ok(items.iter().any(|i| values_equal(i, needle))),
        Value::Object(map) => match needle {
            Value::String(key) => Ok(map.contains_key(key)),
            _ => Ok(false),
        },
        other => fail(format!("argument of type {} is not iterable", type_name(other))),
    }
}

fn compare(op: CmpOp, left: &Value, right: &Value) -> Result<bool, EvalError> {
    Ok(match op {
        CmpOp::Eq => values_equal(left, right),
        CmpOp::Ne => !values_equal(left, right),
        CmpOp::Lt => ordering(left, right)? == Ordering::Less,
        CmpOp::Le => ordering(left, right)? != Ordering::Greater,
        CmpOp::Gt => ordering(left, right)? == Ordering::Greater,
        CmpOp::Ge => ordering(left, right)? != Ordering::Less,
        CmpOp::In => contains(right, left)?,
        CmpOp::NotIn => !contains(right, left)?,
    })
}

/// Resolve a possibly negative index against `len`
fn position(index: &Value, len: usize) -> Result<Option<usize>, EvalError> {
    let Some(Num::Int(i)) = numeric(index) else {
        return fail(format!("indices must be integers, not {}", type_name(index)));
    };
    let len = len as i64;
    let i = if i < 0 { i + len } else { i };
    Ok((0..len).contains(&i).then_some(i as usize))
}

fn index_value(target: &Value, index: &Value) -> EvalResult {
    match target {
        Value::Array(items) => match position(index, items.len())? {
            Some(i) => Ok(items[i].clone()),
            None => fail("list index out of range"),
        },
        Value::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            match position(index, chars.len())? {
                Some(i) => Ok(Value::String(chars[i].to_string())),
                None => fail("string index out of range"),
            }
        }
        Value::Object(map) => match index {
            Value::String(key) => map.get(key).cloned().ok_or_else(|| EvalError::Failed(format!("key '{}' not found", key))),
            other => fail(format!("dict keys are strings, not {}", type_name(other))),
        },
        other => fail(format!("{} is not subscriptable", type_name(other))),
    }
}

/// Slice bound; negative values count from the end, clamped to `0..=len`
fn bound(value: Option<&Value>, len: usize, default: usize) -> Result<usize, EvalError> {
    let Some(value) = value.filter(|v| !v.is_null()) else {
        return Ok(default);
    };
    let Some(Num::Int(i)) = numeric(value) else {
        return fail("slice indices must be integers");
    };
    let len = len as i64;
    let i = if i < 0 { i + len } else { i };
    Ok(i.clamp(0, len) as usize)
}

fn slice_value(target: &Value, start: Option<&Value>, end: Option<&Value>) -> EvalResult {
    match target {
        Value::Array(items) => {
            let from = bound(start, items.len(), 0)?;
            let to = bound(end, items.len(), items.len())?;
            Ok(Value::Array(if from < to { items[from..to].to_vec() } else { Vec::new() }))
        }
        Value::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            let from = bound(start, chars.len(), 0)?;
            let to = bound(end, chars.len(), chars.len())?;
            Ok(Value::String(if from < to { chars[from..to].iter().collect() } else { String::new() }))
        }
        other => fail(format!("{} cannot be sliced", type_name(other))),
    }
}

/// `str()` rendering
pub fn to_text(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn text_arg<'v>(func: Func, value: &'v Value) -> Result<&'v str, EvalError> {
    match value {
        Value::String(s) => Ok(s.as_str()),
        other => fail(format!("{:?}() expects a str, got {}", func, type_name(other))),
    }
}

fn strip_with(s: &str, chars: Option<&Value>, left: bool, right: bool) -> Result<String, EvalError> {
    let set: Option<Vec<char>> = match chars {
        None | Some(Value::Null) => None,
        Some(Value::String(c)) => Some(c.chars().collect()),
        Some(other) => return fail(format!("strip chars must be str, not {}", type_name(other))),
    };
    let matches = |c: char| match &set {
        Some(set) => set.contains(&c),
        None => c.is_whitespace(),
    };
    let mut out = s;
    if left {
        out = out.trim_start_matches(matches);
    }
    if right {
        out = out.trim_end_matches(matches);
    }
    Ok(out.to_string())
}

fn call(func: Func, args: Vec<Value>) -> EvalResult {
    let arg = |i: usize| args.get(i);
    let first = args.first().cloned().unwrap_or(Value::Null);

    match func {
        Func::Str => Ok(Value::String(to_text(&first))),
        Func::Int => match &first {
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .or_else(|_| fail(format!("invalid literal for int(): '{}'", s))),
            other => match numeric(other) {
                Some(Num::Int(i)) => Ok(Value::from(i)),
                Some(Num::Float(f)) if f.is_finite() && f.abs() < 9.2e18 => Ok(Value::from(f.trunc() as i64)),
                Some(Num::Float(_)) => Err(EvalError::NonFinite),
                None => fail(format!("int() argument must be a string or a number, not {}", type_name(other))),
            },
        },
        Func::Float => match &first {
            Value::String(s) => match s.trim().parse::<f64>() {
                Ok(f) => float(f),
                Err(_) => fail(format!("could not convert string to float: '{}'", s)),
            },
            other => match numeric(other) {
                Some(n) => float(to_f64(&n)),
                None => fail(format!("float() argument must be a string or a number, not {}", type_name(other))),
            },
        },
        Func::Bool => Ok(Value::Bool(truthy(&first))),
        Func::Len => match &first {
            Value::String(s) => Ok(Value::from(s.chars().count())),
            Value::Array(a) => Ok(Value::from(a.len())),
            Value::Object(o) => Ok(Value::from(o.len())),
            other => fail(format!("object of type {} has no len()", type_name(other))),
        },
        Func::Lower => Ok(Value::String(text_arg(func, &first)?.to_lowercase())),
        Func::Upper => Ok(Value::String(text_arg(func, &first)?.to_uppercase())),
        Func::Strip => strip_with(text_arg(func, &first)?, arg(1), true, true).map(Value::String),
        Func::Lstrip => strip_with(text_arg(func, &first)?, arg(1), true, false).map(Value::String),
        Func::Rstrip => strip_with(text_arg(func, &first)?, arg(1), false, true).map(Value::String),
        Func::Replace => {
            let s = text_arg(func, &first)?;
            let old = text_arg(func, arg(1).unwrap_or(&Value::Null))?;
            let new = match arg(2) {
                Some(v) => text_arg(func, v)?,
                None => "",
            };
            if old.is_empty() {
                return fail("replace() needs a non-empty pattern");
            }
            bounded(s.replace(old, new))
        }
        Func::Split => {
            let s = text_arg(func, &first)?;
            let parts: Vec<Value> = match arg(1) {
                None | Some(Value::Null) => s.split_whitespace().map(|p| Value::String(p.to_string())).collect(),
                Some(sep) => {
                    let sep = text_arg(func, sep)?;
                    if sep.is_empty() {
                        return fail("empty separator");
                    }
                    s.split(sep).map(|p| Value::String(p.to_string())).collect()
                }
            };
            Ok(Value::Array(parts))
        }
        Func::Join => {
            let sep = text_arg(func, &first)?;
            let Some(Value::Array(items)) = arg(1) else {
                return fail("join() expects a list");
            };
            let parts: Vec<String> = items.iter().map(to_text).collect();
            bounded(parts.join(sep))
        }
        Func::Round => {
            let Some(n) = numeric(&first) else {
                return fail(format!("round() expects a number, not {}", type_name(&first)));
            };
            match arg(1).filter(|v| !v.is_null()) {
                None => match n {
                    Num::Int(i) => Ok(Value::from(i)),
                    Num::Float(f) if f.is_finite() && f.abs() < 9.2e18 => {
                        Ok(Value::from(f.round_ties_even() as i64))
                    }
                    Num::Float(_) => Err(EvalError::NonFinite),
                },
                Some(digits) => {
                    let Some(Num::Int(digits)) = numeric(digits) else {
                        return fail("round() digits must be an int");
                    };
                    match n {
                        Num::Int(i) if digits >= 0 => Ok(Value::from(i)),
                        n => {
                            let scale = 10f64.powi(digits.clamp(-308, 308) as i32);
                            float((to_f64(&n) * scale).round_ties_even() / scale)
                        }
                    }
                }
            }
        }
        Func::Abs => match numeric(&first) {
            Some(Num::Int(i)) => i.checked_abs().map(Value::from).ok_or_else(overflow),
            Some(Num::Float(f)) => float(f.abs()),
            None => fail(format!("bad operand type for abs(): {}", type_name(&first))),
        },
        Func::Min | Func::Max => {
            let candidates: Vec<Value> = match (args.len(), &first) {
                (1, Value::Array(items)) => items.clone(),
                (1, other) => return fail(format!("{} object is not iterable", type_name(other))),
                _ => args.clone(),
            };
            let mut best: Option<Value> = None;
            for candidate in candidates {
                best = Some(match best {
                    None => candidate,
                    Some(current) => {
                        let order = ordering(&candidate, &current)?;
                        let better = if func == Func::Min {
                            order == Ordering::Less
                        } else {
                            order == Ordering::Greater
                        };
                        if better {
                            candidate
                        } else {
                            current
                        }
                    }
                });
            }
            best.map_or_else(|| fail(format!("{:?}() arg is an empty sequence", func)), Ok)
        }
        Func::Sum => {
            let Value::Array(items) = &first else {
                return fail(format!("sum() expects a list, not {}", type_name(&first)));
            };
            let mut total = arg(1).cloned().unwrap_or(Value::from(0));
            for item in items {
                total = binary(BinOp::Add, total, item.clone())?;
            }
            Ok(total)
        }
        Func::Contains => contains(&first, arg(1).unwrap_or(&Value::Null)).map(Value::Bool),
        Func::StartsWith => {
            let s = text_arg(func, &first)?;
            let prefix = text_arg(func, arg(1).unwrap_or(&Value::Null))?;
            Ok(Value::Bool(s.starts_with(prefix)))
        }
        Func::EndsWith => {
            let s = text_arg(func, &first)?;
            let suffix = text_arg(func, arg(1).unwrap_or(&Value::Null))?;
            Ok(Value::Bool(s.ends_with(suffix)))
        }
        Func::Default => match &first {
            Value::Null => Ok(arg(1).cloned().unwrap_or(Value::Null)),
            Value::String(s) if s.is_empty() => Ok(arg(1).cloned().unwrap_or(Value::Null)),
            other => Ok(other.clone()),
        },
        Func::Slice => slice_value(&first, arg(1), arg(2)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval_with(source: &str, value: Value, item: Value) -> EvalResult {
        let item = match item {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Expression::parse(source).unwrap().evaluate(&value, &item)
    }

    fn eval(source: &str, value: Value) -> EvalResult {
        eval_with(source, value, json!({}))
    }

    #[test]
    fn test_join_split_conditional() {
        let source = "', '.join(value.split(' ')) if value else ''";
        assert_eq!(eval(source, json!("love life humor")).unwrap(), json!("love, life, humor"));
        assert_eq!(eval(source, json!("")).unwrap(), json!(""));
        assert_eq!(eval(source, Value::Null).unwrap(), json!(""));
    }

    #[test]
    fn test_arithmetic_floors_and_wraps() {
        assert_eq!(eval("value * 2 + 1", json!(20)).unwrap(), json!(41));
        assert_eq!(eval("value / 4", json!(10)).unwrap(), json!(2.5));
        assert_eq!(eval("-7 // 2", Value::Null).unwrap(), json!(-4));
        assert_eq!(eval("-7 % 3", Value::Null).unwrap(), json!(2));
        assert_eq!(eval("2 ** 10", Value::Null).unwrap(), json!(1024));
        assert_eq!(eval("-2 ** 2", Value::Null).unwrap(), json!(-4));
        assert_eq!(eval("round(value * 1.1, 2)", json!(10)).unwrap(), json!(11.0));
        assert_eq!(eval("'ab' * 3", Value::Null).unwrap(), json!("ababab"));
    }

    #[test]
    fn test_item_binding_and_indexing() {
        let item = json!({"price": 12.5, "qty": 4, "tags": ["a", "b", "c"]});
        assert_eq!(eval_with("item['price'] * item['qty']", Value::Null, item.clone()).unwrap(), json!(50.0));
        assert_eq!(eval_with("item['tags'][-1]", Value::Null, item.clone()).unwrap(), json!("c"));
        assert_eq!(eval_with("item['tags'][1:]", Value::Null, item.clone()).unwrap(), json!(["b", "c"]));
        assert_eq!(eval_with("'qty' in item", Value::Null, item).unwrap(), json!(true));
    }

    #[test]
    fn test_string_methods() {
        assert_eq!(eval("value.strip().lower()", json!("  HeLLo ")).unwrap(), json!("hello"));
        assert_eq!(eval("value.replace('-', '')", json!("555-0100")).unwrap(), json!("5550100"));
        assert_eq!(eval("value[:3]", json!("abcdef")).unwrap(), json!("abc"));
        assert_eq!(eval("value.startswith('http')", json!("https://x")).unwrap(), json!(true));
        assert_eq!(eval("len(value.split(','))", json!("a,b,c")).unwrap(), json!(3));
        assert_eq!(eval("default(value, 'n/a')", json!("")).unwrap(), json!("n/a"));
        assert_eq!(eval("max(value)", json!([3, 9, 2])).unwrap(), json!(9));
        assert_eq!(eval("str(int('42') + 1)", Value::Null).unwrap(), json!("43"));
    }

    #[test]
    fn test_comparisons_and_logic() {
        assert_eq!(eval("1 < value <= 3", json!(3)).unwrap(), json!(true));
        assert_eq!(eval("1 < value <= 3", json!(4)).unwrap(), json!(false));
        assert_eq!(eval("'x' not in value", json!("abc")).unwrap(), json!(true));
        assert_eq!(eval("value or 'fallback'", json!("")).unwrap(), json!("fallback"));
        assert_eq!(eval("not value and True", json!(0)).unwrap(), json!(true));
        assert_eq!(eval("value == 1.0", json!(1)).unwrap(), json!(true));
    }

    #[test]
    fn test_runtime_failures() {
        assert!(matches!(eval("value / 0", json!(1)), Err(EvalError::Failed(_))));
        assert!(matches!(eval("value + 1", json!("a")), Err(EvalError::Failed(_))));
        assert!(matches!(eval("value[5]", json!([1])), Err(EvalError::Failed(_))));
        assert_eq!(eval("float(value) ** 400", json!(10)), Err(EvalError::NonFinite));
    }

    #[test]
    fn test_rejects_names_outside_allow_list() {
        for source in [
            "__import__('os')",
            "value.__class__",
            "open('/etc/passwd')",
            "eval('1')",
            "value.upper",
            "x + 1",
            "len(value, 2)",
            "value if value",
            "1 +",
        ] {
            assert!(Expression::parse(source).is_err(), "{} should not parse", source);
        }
    }
}
