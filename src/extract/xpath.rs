//! XPath 1.0 subset evaluated over a `scraper` document.
//!
//! Supported: absolute and relative location paths, `//`, `.`, `..`, `*`,
//! `@attr`, `@*`, `text()`, `node()`, the axes child, descendant,
//! descendant-or-self, self, parent, ancestor, attribute, following-sibling
//! and preceding-sibling, predicates (positional and boolean), `|`, `or`,
//! `and`, comparisons, and the functions listed in [`FUNCTIONS`].

use ego_tree::{NodeId, NodeRef};
use scraper::{node::Node, ElementRef, Html};
use std::collections::HashMap;
use thiserror::Error;

const FUNCTIONS: &[&str] = &[
    "last",
    "position",
    "count",
    "contains",
    "starts-with",
    "ends-with",
    "normalize-space",
    "string",
    "string-length",
    "concat",
    "not",
    "true",
    "false",
    "name",
    "local-name",
];

#[derive(Debug, Clone, Error, PartialEq)]
#[error("{message} at offset {offset}")]
pub struct XPathError {
    pub message: String,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Slash,
    DoubleSlash,
    Dot,
    DotDot,
    At,
    Star,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Comma,
    Pipe,
    ColonColon,
    Cmp(CmpOp),
    Name(String),
    Literal(String),
    Number(f64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CmpOp {
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
}

fn tokenize(src: &str) -> Result<Vec<(Token, usize)>, XPathError> {
    let chars: Vec<(usize, char)> = src.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let err = |message: &str, offset: usize| XPathError {
        message: message.to_string(),
        offset,
    };

    while i < chars.len() {
        let (offset, c) = chars[i];
        let next = chars.get(i + 1).map(|(_, c)| *c);

        let (token, width) = match c {
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            '/' if next == Some('/') => (Token::DoubleSlash, 2),
            '/' => (Token::Slash, 1),
            '.' if next == Some('.') => (Token::DotDot, 2),
            '.' if next.map_or(false, |n| n.is_ascii_digit()) => {
                let (n, w) = read_number(&chars[i..]);
                (Token::Number(n), w)
            }
            '.' => (Token::Dot, 1),
            '@' => (Token::At, 1),
            '*' => (Token::Star, 1),
            '[' => (Token::LBracket, 1),
            ']' => (Token::RBracket, 1),
            '(' => (Token::LParen, 1),
            ')' => (Token::RParen, 1),
            ',' => (Token::Comma, 1),
            '|' => (Token::Pipe, 1),
            ':' if next == Some(':') => (Token::ColonColon, 2),
            '=' => (Token::Cmp(CmpOp::Eq), 1),
            '!' if next == Some('=') => (Token::Cmp(CmpOp::NotEq), 2),
            '<' if next == Some('=') => (Token::Cmp(CmpOp::Le), 2),
            '<' => (Token::Cmp(CmpOp::Lt), 1),
            '>' if next == Some('=') => (Token::Cmp(CmpOp::Ge), 2),
            '>' => (Token::Cmp(CmpOp::Gt), 1),
            '"' | '\'' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|(_, ch)| *ch == c)
                    .ok_or_else(|| err("unterminated string literal", offset))?;
                let literal: String = chars[i + 1..i + 1 + end].iter().map(|(_, ch)| ch).collect();
                (Token::Literal(literal), end + 2)
            }
            c if c.is_ascii_digit() => {
                let (n, w) = read_number(&chars[i..]);
                (Token::Number(n), w)
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut w = 1;
                while let Some((_, ch)) = chars.get(i + w) {
                    let is_axis_sep = *ch == ':' && chars.get(i + w + 1).map(|(_, c)| *c) == Some(':');
                    if ch.is_alphanumeric() || *ch == '-' || *ch == '_' || (*ch == '.' && !is_axis_sep) {
                        w += 1;
                    } else {
                        break;
                    }
                }
                let name: String = chars[i..i + w].iter().map(|(_, ch)| ch).collect();
                (Token::Name(name), w)
            }
            _ => return Err(err(&format!("unexpected character `{}`", c), offset)),
        };

        tokens.push((token, offset));
        i += width;
    }

    Ok(tokens)
}

fn read_number(chars: &[(usize, char)]) -> (f64, usize) {
    let mut w = 0;
    let mut seen_dot = false;
    while let Some((_, c)) = chars.get(w) {
        if c.is_ascii_digit() || (*c == '.' && !seen_dot) {
            seen_dot |= *c == '.';
            w += 1;
        } else {
            break;
        }
    }
    let text: String = chars[..w].iter().map(|(_, c)| c).collect();
    (text.parse().unwrap_or(f64::NAN), w)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Axis {
    Child,
    Descendant,
    DescendantOrSelf,
    SelfNode,
    Parent,
    Ancestor,
    Attribute,
    FollowingSibling,
    PrecedingSibling,
}

impl Axis {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "child" => Self::Child,
            "descendant" => Self::Descendant,
            "descendant-or-self" => Self::DescendantOrSelf,
            "self" => Self::SelfNode,
            "parent" => Self::Parent,
            "ancestor" => Self::Ancestor,
            "attribute" => Self::Attribute,
            "following-sibling" => Self::FollowingSibling,
            "preceding-sibling" => Self::PrecedingSibling,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum NodeTest {
    Name(String),
    Wildcard,
    Text,
    AnyNode,
}

#[derive(Debug, Clone, PartialEq)]
struct Step {
    axis: Axis,
    test: NodeTest,
    predicates: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Path { absolute: bool, steps: Vec<Step> },
    Union(Vec<Expr>),
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Compare(CmpOp, Box<Expr>, Box<Expr>),
    Literal(String),
    Number(f64),
    Call(String, Vec<Expr>),
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek_at(&self, ahead: usize) -> Option<&Token> {
        self.tokens.get(self.pos + ahead).map(|(t, _)| t)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end, |(_, o)| *o)
    }

    fn error(&self, message: impl Into<String>) -> XPathError {
        XPathError {
            message: message.into(),
            offset: self.offset(),
        }
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, what: &str) -> Result<(), XPathError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(format!("expected {}", what)))
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if matches!(self.peek(), Some(Token::Name(n)) if n == keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_or(&mut self) -> Result<Expr, XPathError> {
        let mut lhs = self.parse_and()?;
        while self.eat_keyword("or") {
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, XPathError> {
        let mut lhs = self.parse_compare()?;
        while self.eat_keyword("and") {
            let rhs = self.parse_compare()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_compare(&mut self) -> Result<Expr, XPathError> {
        let mut lhs = self.parse_union()?;
        while let Some(Token::Cmp(op)) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.parse_union()?;
            lhs = Expr::Compare(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_union(&mut self) -> Result<Expr, XPathError> {
        let first = self.parse_primary()?;
        if self.peek() != Some(&Token::Pipe) {
            return Ok(first);
        }
        let mut parts = vec![first];
        while self.eat(&Token::Pipe) {
            parts.push(self.parse_primary()?);
        }
        Ok(Expr::Union(parts))
    }

    fn parse_primary(&mut self) -> Result<Expr, XPathError> {
        match self.peek().cloned() {
            Some(Token::Literal(s)) => {
                self.pos += 1;
                Ok(Expr::Literal(s))
            }
            Some(Token::Number(n)) => {
                self.pos += 1;
                Ok(Expr::Number(n))
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.parse_or()?;
                self.expect(&Token::RParen, "`)`")?;
                Ok(inner)
            }
            Some(Token::Name(name))
                if self.peek_at(1) == Some(&Token::LParen) && name != "text" && name != "node" =>
            {
                if !FUNCTIONS.contains(&name.as_str()) {
                    return Err(self.error(format!("unsupported function `{}`", name)));
                }
                self.pos += 2;
                let mut args = Vec::new();
                if !self.eat(&Token::RParen) {
                    loop {
                        args.push(self.parse_or()?);
                        if self.eat(&Token::RParen) {
                            break;
                        }
                        self.expect(&Token::Comma, "`,` or `)`")?;
                    }
                }
                Ok(Expr::Call(name, args))
            }
            _ => self.parse_path(),
        }
    }

    fn starts_step(&self) -> bool {
        matches!(
            self.peek(),
            Some(Token::Name(_) | Token::Star | Token::At | Token::Dot | Token::DotDot)
        )
    }

    fn parse_path(&mut self) -> Result<Expr, XPathError> {
        let mut steps = Vec::new();
        let mut absolute = false;

        if self.eat(&Token::Slash) {
            absolute = true;
            if !self.starts_step() {
                return Ok(Expr::Path { absolute, steps });
            }
        } else if self.eat(&Token::DoubleSlash) {
            absolute = true;
            steps.push(descendant_or_self());
        } else if !self.starts_step() {
            return Err(self.error("expected a location path or expression"));
        }

        loop {
            steps.push(self.parse_step()?);
            if self.eat(&Token::Slash) {
                continue;
            }
            if self.eat(&Token::DoubleSlash) {
                steps.push(descendant_or_self());
                continue;
            }
            break;
        }

        Ok(Expr::Path { absolute, steps })
    }

    fn parse_step(&mut self) -> Result<Step, XPathError> {
        if self.eat(&Token::Dot) {
            return Ok(Step {
                axis: Axis::SelfNode,
                test: NodeTest::AnyNode,
                predicates: Vec::new(),
            });
        }
        if self.eat(&Token::DotDot) {
            return Ok(Step {
                axis: Axis::Parent,
                test: NodeTest::AnyNode,
                predicates: Vec::new(),
            });
        }

        let mut axis = Axis::Child;
        if self.eat(&Token::At) {
            axis = Axis::Attribute;
        } else if let (Some(Token::Name(name)), Some(Token::ColonColon)) = (self.peek(), self.peek_at(1)) {
            axis = Axis::from_name(name).ok_or_else(|| self.error(format!("unsupported axis `{}`", name)))?;
            self.pos += 2;
        }

        let test = match self.peek().cloned() {
            Some(Token::Star) => {
                self.pos += 1;
                NodeTest::Wildcard
            }
            Some(Token::Name(name)) if self.peek_at(1) == Some(&Token::LParen) => {
                let test = match name.as_str() {
                    "text" => NodeTest::Text,
                    "node" => NodeTest::AnyNode,
                    _ => return Err(self.error(format!("unexpected function `{}` in path", name))),
                };
                self.pos += 2;
                self.expect(&Token::RParen, "`)`")?;
                test
            }
            Some(Token::Name(name)) => {
                self.pos += 1;
                NodeTest::Name(name.to_lowercase())
            }
            _ => return Err(self.error("expected a node test")),
        };

        let mut predicates = Vec::new();
        while self.eat(&Token::LBracket) {
            predicates.push(self.parse_or()?);
            self.expect(&Token::RBracket, "`]`")?;
        }

        Ok(Step {
            axis,
            test,
            predicates,
        })
    }
}

fn descendant_or_self() -> Step {
    Step {
        axis: Axis::DescendantOrSelf,
        test: NodeTest::AnyNode,
        predicates: Vec::new(),
    }
}

/// A compiled XPath expression
#[derive(Debug, Clone, PartialEq)]
pub struct XPath {
    source: String,
    expr: Expr,
}

impl XPath {
    pub fn parse(source: &str) -> Result<Self, XPathError> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(XPathError {
                message: "empty expression".to_string(),
                offset: 0,
            });
        }
        let mut parser = Parser {
            tokens,
            pos: 0,
            end: source.len(),
        };
        let expr = parser.parse_or()?;
        if parser.pos < parser.tokens.len() {
            return Err(parser.error("unexpected trailing input"));
        }
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

/// A node an expression can select
#[derive(Debug, Clone, Copy)]
pub enum XNode<'a> {
    Node(NodeRef<'a, Node>),
    Attr {
        owner: NodeRef<'a, Node>,
        name: &'a str,
        value: &'a str,
    },
}

impl<'a> XNode<'a> {
    pub fn element(&self) -> Option<ElementRef<'a>> {
        match self {
            Self::Node(node) => ElementRef::wrap(*node),
            Self::Attr { .. } => None,
        }
    }

    /// Text content for elements and documents, the text itself for text nodes, the value for attributes
    pub fn string_value(&self) -> String {
        match self {
            Self::Attr { value, .. } => value.to_string(),
            Self::Node(node) => match node.value() {
                Node::Text(text) => text.to_string(),
                Node::Element(_) | Node::Document | Node::Fragment => node
                    .descendants()
                    .filter_map(|n| n.value().as_text().map(|t| t.to_string()))
                    .collect(),
                Node::Comment(comment) => comment.to_string(),
                _ => String::new(),
            },
        }
    }

    fn name(&self) -> &'a str {
        match self {
            Self::Attr { name, .. } => *name,
            Self::Node(node) => match node.value() {
                Node::Element(element) => element.name(),
                _ => "",
            },
        }
    }
}

/// Result of evaluating an expression
#[derive(Debug, Clone)]
pub enum XValue<'a> {
    Nodes(Vec<XNode<'a>>),
    Str(String),
    Num(f64),
    Bool(bool),
}

impl<'a> XValue<'a> {
    pub fn to_bool(&self) -> bool {
        match self {
            Self::Nodes(nodes) => !nodes.is_empty(),
            Self::Str(s) => !s.is_empty(),
            Self::Num(n) => *n != 0.0 && !n.is_nan(),
            Self::Bool(b) => *b,
        }
    }

    pub fn to_text(&self) -> String {
        match self {
            Self::Nodes(nodes) => nodes.first().map(XNode::string_value).unwrap_or_default(),
            Self::Str(s) => s.clone(),
            Self::Num(n) => format_number(*n),
            Self::Bool(b) => b.to_string(),
        }
    }

    fn to_num(&self) -> f64 {
        match self {
            Self::Num(n) => *n,
            Self::Bool(b) => f64::from(u8::from(*b)),
            other => other.to_text().trim().parse().unwrap_or(f64::NAN),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.is_finite() {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

struct Focus<'a> {
    node: XNode<'a>,
    position: usize,
    size: usize,
}

/// Parsed page plus the document-order index expressions need
pub struct XPathDocument<'a> {
    html: &'a Html,
    order: HashMap<NodeId, usize>,
}

impl<'a> XPathDocument<'a> {
    pub fn new(html: &'a Html) -> Self {
        let order = html
            .tree
            .root()
            .descendants()
            .enumerate()
            .map(|(i, n)| (n.id(), i))
            .collect();
        Self { html, order }
    }

    pub fn root(&self) -> XNode<'a> {
        XNode::Node(self.html.tree.root())
    }

    /// Evaluate `xpath` with `context` as the context node
    pub fn evaluate(&self, xpath: &XPath, context: XNode<'a>) -> XValue<'a> {
        let focus = Focus {
            node: context,
            position: 1,
            size: 1,
        };
        self.eval(&xpath.expr, &focus)
    }

    /// Nodes selected by `xpath`; non-node results select nothing
    pub fn select(&self, xpath: &XPath, context: XNode<'a>) -> Vec<XNode<'a>> {
        match self.evaluate(xpath, context) {
            XValue::Nodes(nodes) => nodes,
            _ => Vec::new(),
        }
    }

    fn sort_key(&self, node: &XNode<'a>) -> (usize, &'a str) {
        match node {
            XNode::Node(n) => (self.order.get(&n.id()).copied().unwrap_or(usize::MAX), ""),
            XNode::Attr { owner, name, .. } => {
                (self.order.get(&owner.id()).copied().unwrap_or(usize::MAX), *name)
            }
        }
    }

    fn normalize(&self, mut nodes: Vec<XNode<'a>>) -> Vec<XNode<'a>> {
        nodes.sort_by_key(|n| self.sort_key(n));
        nodes.dedup_by_key(|n| self.sort_key(n));
        nodes
    }

    fn eval(&self, expr: &Expr, focus: &Focus<'a>) -> XValue<'a> {
        match expr {
            Expr::Literal(s) => XValue::Str(s.clone()),
            Expr::Number(n) => XValue::Num(*n),
            Expr::Or(a, b) => XValue::Bool(self.eval(a, focus).to_bool() || self.eval(b, focus).to_bool()),
            Expr::And(a, b) => XValue::Bool(self.eval(a, focus).to_bool() && self.eval(b, focus).to_bool()),
            Expr::Compare(op, a, b) => XValue::Bool(compare(*op, &self.eval(a, focus), &self.eval(b, focus))),
            Expr::Union(parts) => {
                let mut nodes = Vec::new();
                for part in parts {
                    if let XValue::Nodes(found) = self.eval(part, focus) {
                        nodes.extend(found);
                    }
                }
                XValue::Nodes(self.normalize(nodes))
            }
            Expr::Path { absolute, steps } => {
                let start = if *absolute { self.root() } else { focus.node };
                XValue::Nodes(self.walk(start, steps))
            }
            Expr::Call(name, args) => self.call(name, args, focus),
        }
    }

    fn walk(&self, start: XNode<'a>, steps: &[Step]) -> Vec<XNode<'a>> {
        let mut current = vec![start];
        for step in steps {
            let mut next = Vec::new();
            for node in &current {
                let mut candidates: Vec<XNode<'a>> = axis_nodes(node, step.axis)
                    .into_iter()
                    .filter(|n| matches_test(n, &step.test, step.axis))
                    .collect();

                for predicate in &step.predicates {
                    let size = candidates.len();
                    candidates = candidates
                        .into_iter()
                        .enumerate()
                        .filter(|(i, candidate)| {
                            let focus = Focus {
                                node: *candidate,
                                position: i + 1,
                                size,
                            };
                            match self.eval(predicate, &focus) {
                                XValue::Num(n) => n == (i + 1) as f64,
                                other => other.to_bool(),
                            }
                        })
                        .map(|(_, c)| c)
                        .collect();
                }
                next.extend(candidates);
            }
            current = self.normalize(next);
        }
        current
    }

    fn call(&self, name: &str, args: &[Expr], focus: &Focus<'a>) -> XValue<'a> {
        let arg_text = |i: usize| -> String {
            match args.get(i) {
                Some(expr) => self.eval(expr, focus).to_text(),
                None => focus.node.string_value(),
            }
        };

        match name {
            "last" => XValue::Num(focus.size as f64),
            "position" => XValue::Num(focus.position as f64),
            "count" => match args.first().map(|a| self.eval(a, focus)) {
                Some(XValue::Nodes(nodes)) => XValue::Num(nodes.len() as f64),
                _ => XValue::Num(0.0),
            },
            "contains" => XValue::Bool(arg_text(0).contains(&arg_text(1))),
            "starts-with" => XValue::Bool(arg_text(0).starts_with(&arg_text(1))),
            "ends-with" => XValue::Bool(arg_text(0).ends_with(&arg_text(1))),
            "normalize-space" => XValue::Str(arg_text(0).split_whitespace().collect::<Vec<_>>().join(" ")),
            "string" => XValue::Str(arg_text(0)),
            "string-length" => XValue::Num(arg_text(0).chars().count() as f64),
            "concat" => XValue::Str(
                args.iter()
                    .map(|a| self.eval(a, focus).to_text())
                    .collect::<String>(),
            ),
            "not" => XValue::Bool(!args.first().map_or(false, |a| self.eval(a, focus).to_bool())),
            "true" => XValue::Bool(true),
            "false" => XValue::Bool(false),
            "name" | "local-name" => {
                let node = match args.first().map(|a| self.eval(a, focus)) {
                    Some(XValue::Nodes(nodes)) => nodes.first().copied(),
                    Some(_) => None,
                    None => Some(focus.node),
                };
                XValue::Str(node.map(|n| n.name().to_string()).unwrap_or_default())
            }
            _ => XValue::Nodes(Vec::new()),
        }
    }
}

fn axis_nodes<'a>(node: &XNode<'a>, axis: Axis) -> Vec<XNode<'a>> {
    let n = match node {
        XNode::Node(n) => *n,
        XNode::Attr { owner, .. } => {
            return match axis {
                Axis::SelfNode => vec![*node],
                Axis::Parent => vec![XNode::Node(*owner)],
                Axis::Ancestor => std::iter::once(*owner)
                    .chain(owner.ancestors())
                    .map(XNode::Node)
                    .collect(),
                _ => Vec::new(),
            };
        }
    };

    match axis {
        Axis::Child => n.children().map(XNode::Node).collect(),
        Axis::Descendant => n.descendants().skip(1).map(XNode::Node).collect(),
        Axis::DescendantOrSelf => n.descendants().map(XNode::Node).collect(),
        Axis::SelfNode => vec![XNode::Node(n)],
        Axis::Parent => n.parent().map(XNode::Node).into_iter().collect(),
        Axis::Ancestor => n.ancestors().map(XNode::Node).collect(),
        Axis::FollowingSibling => n.next_siblings().map(XNode::Node).collect(),
        Axis::PrecedingSibling => n.prev_siblings().map(XNode::Node).collect(),
        Axis::Attribute => match n.value() {
            Node::Element(element) => element
                .attrs()
                .map(|(name, value)| XNode::Attr {
                    owner: n,
                    name,
                    value,
                })
                .collect(),
            _ => Vec::new(),
        },
    }
}

fn matches_test(node: &XNode<'_>, test: &NodeTest, axis: Axis) -> bool {
    match node {
        XNode::Attr { name, .. } => match test {
            NodeTest::Name(wanted) => name.eq_ignore_ascii_case(wanted),
            NodeTest::Wildcard | NodeTest::AnyNode => axis == Axis::Attribute || axis == Axis::SelfNode,
            NodeTest::Text => false,
        },
        XNode::Node(n) => match (test, n.value()) {
            (NodeTest::AnyNode, _) => true,
            (NodeTest::Text, Node::Text(_)) => true,
            (NodeTest::Wildcard, Node::Element(_)) => true,
            (NodeTest::Name(wanted), Node::Element(element)) => element.name().eq_ignore_ascii_case(wanted),
            _ => false,
        },
    }
}

fn compare(op: CmpOp, a: &XValue<'_>, b: &XValue<'_>) -> bool {
    match (a, b) {
        (XValue::Nodes(nodes), other) => nodes
            .iter()
            .any(|n| compare(op, &XValue::Str(n.string_value()), other)),
        (other, XValue::Nodes(nodes)) => nodes
            .iter()
            .any(|n| compare(op, other, &XValue::Str(n.string_value()))),
        _ => match op {
            CmpOp::Eq | CmpOp::NotEq => {
                let equal = match (a, b) {
                    (XValue::Bool(_), _) | (_, XValue::Bool(_)) => a.to_bool() == b.to_bool(),
                    (XValue::Num(_), _) | (_, XValue::Num(_)) => a.to_num() == b.to_num(),
                    _ => a.to_text() == b.to_text(),
                };
                equal == (op == CmpOp::Eq)
            }
            CmpOp::Lt => a.to_num() < b.to_num(),
            CmpOp::Le => a.to_num() <= b.to_num(),
            CmpOp::Gt => a.to_num() > b.to_num(),
            CmpOp::Ge => a.to_num() >= b.to_num(),
        },
    }
}
