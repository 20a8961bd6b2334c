//! Matcher expression syntax: tokens, AST and a recursive-descent parser.
//!
//! Precedence, loosest first:
//!
//! ```text
//! ||
//! &&
//! == != < <= > >= in
//! + -
//! * / %
//! ! - (unary)
//! ```

use crate::error::{EngineError, EngineResult};
use crate::value::Value;

/// Which definition an attribute reference points into.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    /// `r.<name>`
    Request,
    /// `p.<name>`
    Policy,
}

/// `r.sub`, `p.obj`, `r.sub.Owner.Name`, ...
#[derive(Debug, Clone, PartialEq)]
pub struct AttrRef {
    pub scope: Scope,
    pub name: String,
    /// Record field path after the attribute name (request attributes only).
    pub path: Vec<String>,
}

impl AttrRef {
    pub fn is_bare_request(&self) -> bool {
        self.scope == Scope::Request && self.path.is_empty()
    }
}

impl core::fmt::Display for AttrRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let prefix = match self.scope {
            Scope::Request => "r",
            Scope::Policy => "p",
        };
        write!(f, "{prefix}.{}", self.name)?;
        for field in &self.path {
            write!(f, ".{field}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinaryOp {
    pub fn is_ordering(&self) -> bool {
        matches!(self, BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge)
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    /// Arithmetic operators that only make sense on numbers (`+` also concatenates text).
    pub fn is_numeric_arithmetic(&self) -> bool {
        matches!(self, BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Attr(AttrRef),
    Call { name: String, args: Vec<Expr> },
    Unary { op: UnaryOp, expr: Box<Expr> },
    Binary { op: BinaryOp, lhs: Box<Expr>, rhs: Box<Expr> },
    In { needle: Box<Expr>, haystack: Vec<Expr> },
}

impl Expr {
    /// The bare request attribute this expression is, if any.
    pub fn as_bare_request(&self) -> Option<&str> {
        match self {
            Expr::Attr(attr) if attr.is_bare_request() => Some(&attr.name),
            _ => None,
        }
    }

    /// Visit every attribute reference in the tree.
    pub fn for_each_attr(&self, f: &mut impl FnMut(&AttrRef)) {
        match self {
            Expr::Literal(_) => {}
            Expr::Attr(attr) => f(attr),
            Expr::Call { args, .. } => args.iter().for_each(|a| a.for_each_attr(f)),
            Expr::Unary { expr, .. } => expr.for_each_attr(f),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.for_each_attr(f);
                rhs.for_each_attr(f);
            }
            Expr::In { needle, haystack } => {
                needle.for_each_attr(f);
                haystack.iter().for_each(|h| h.for_each_attr(f));
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    Dot,
    Comma,
    LParen,
    RParen,
    Op(&'static str),
}

fn tokenize(src: &str) -> EngineResult<Vec<(usize, Token)>> {
    let chars: Vec<char> = src.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let start = i;

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() {
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let n = text
                .parse::<f64>()
                .map_err(|_| EngineError::model_parse(format!("invalid number '{text}' at {start}")))?;
            out.push((start, Token::Number(n)));
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            out.push((start, Token::Ident(chars[start..i].iter().collect())));
            continue;
        }

        if c == '"' || c == '\'' {
            let quote = c;
            let mut s = String::new();
            i += 1;
            loop {
                match chars.get(i) {
                    None => {
                        return Err(EngineError::model_parse(format!(
                            "unterminated string starting at {start}"
                        )));
                    }
                    Some('\\') => {
                        match chars.get(i + 1) {
                            Some(escaped) => s.push(*escaped),
                            None => {
                                return Err(EngineError::model_parse(format!(
                                    "unterminated string starting at {start}"
                                )));
                            }
                        }
                        i += 2;
                    }
                    Some(ch) if *ch == quote => {
                        i += 1;
                        break;
                    }
                    Some(ch) => {
                        s.push(*ch);
                        i += 1;
                    }
                }
            }
            out.push((start, Token::Str(s)));
            continue;
        }

        let next = chars.get(i + 1).copied();
        let (tok, width) = match (c, next) {
            ('&', Some('&')) => (Token::Op("&&"), 2),
            ('|', Some('|')) => (Token::Op("||"), 2),
            ('=', Some('=')) => (Token::Op("=="), 2),
            ('!', Some('=')) => (Token::Op("!="), 2),
            ('<', Some('=')) => (Token::Op("<="), 2),
            ('>', Some('=')) => (Token::Op(">="), 2),
            ('<', _) => (Token::Op("<"), 1),
            ('>', _) => (Token::Op(">"), 1),
            ('!', _) => (Token::Op("!"), 1),
            ('+', _) => (Token::Op("+"), 1),
            ('-', _) => (Token::Op("-"), 1),
            ('*', _) => (Token::Op("*"), 1),
            ('/', _) => (Token::Op("/"), 1),
            ('%', _) => (Token::Op("%"), 1),
            ('.', _) => (Token::Dot, 1),
            (',', _) => (Token::Comma, 1),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            _ => {
                return Err(EngineError::model_parse(format!(
                    "unexpected character '{c}' at {start}"
                )));
            }
        };
        out.push((start, tok));
        i += width;
    }

    Ok(out)
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    len: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map(|(o, _)| *o).unwrap_or(self.len)
    }

    fn bump(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        self.pos += 1;
        tok
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if matches!(self.peek(), Some(Token::Op(o)) if *o == op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, want: Token, what: &str) -> EngineResult<()> {
        let at = self.offset();
        match self.bump() {
            Some(t) if t == want => Ok(()),
            Some(t) => Err(EngineError::model_parse(format!(
                "expected {what} at {at}, found {t:?}"
            ))),
            None => Err(EngineError::model_parse(format!(
                "expected {what} at {at}, found end of matcher"
            ))),
        }
    }

    fn parse_or(&mut self) -> EngineResult<Expr> {
        let mut lhs = self.parse_and()?;
        while self.eat_op("||") {
            let rhs = self.parse_and()?;
            lhs = binary(BinaryOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> EngineResult<Expr> {
        let mut lhs = self.parse_comparison()?;
        while self.eat_op("&&") {
            let rhs = self.parse_comparison()?;
            lhs = binary(BinaryOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> EngineResult<Expr> {
        let lhs = self.parse_additive()?;

        if matches!(self.peek(), Some(Token::Ident(kw)) if kw == "in") {
            self.pos += 1;
            self.expect(Token::LParen, "'(' after 'in'")?;
            let haystack = self.parse_list()?;
            return Ok(Expr::In {
                needle: Box::new(lhs),
                haystack,
            });
        }

        let op = match self.peek() {
            Some(Token::Op("==")) => BinaryOp::Eq,
            Some(Token::Op("!=")) => BinaryOp::Ne,
            Some(Token::Op("<")) => BinaryOp::Lt,
            Some(Token::Op("<=")) => BinaryOp::Le,
            Some(Token::Op(">")) => BinaryOp::Gt,
            Some(Token::Op(">=")) => BinaryOp::Ge,
            _ => return Ok(lhs),
        };
        self.pos += 1;
        let rhs = self.parse_additive()?;
        Ok(binary(op, lhs, rhs))
    }

    fn parse_additive(&mut self) -> EngineResult<Expr> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = if self.eat_op("+") {
                BinaryOp::Add
            } else if self.eat_op("-") {
                BinaryOp::Sub
            } else {
                return Ok(lhs);
            };
            let rhs = self.parse_multiplicative()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn parse_multiplicative(&mut self) -> EngineResult<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = if self.eat_op("*") {
                BinaryOp::Mul
            } else if self.eat_op("/") {
                BinaryOp::Div
            } else if self.eat_op("%") {
                BinaryOp::Mod
            } else {
                return Ok(lhs);
            };
            let rhs = self.parse_unary()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn parse_unary(&mut self) -> EngineResult<Expr> {
        if self.eat_op("!") {
            let expr = self.parse_unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                expr: Box::new(expr),
            });
        }
        if self.eat_op("-") {
            let expr = self.parse_unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                expr: Box::new(expr),
            });
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> EngineResult<Expr> {
        let at = self.offset();
        match self.bump() {
            Some(Token::Number(n)) => Ok(Expr::Literal(Value::Number(n))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::Text(s))),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => self.parse_ident(name, at),
            Some(t) => Err(EngineError::model_parse(format!(
                "unexpected token {t:?} at {at}"
            ))),
            None => Err(EngineError::model_parse("unexpected end of matcher")),
        }
    }

    fn parse_ident(&mut self, name: String, at: usize) -> EngineResult<Expr> {
        match name.as_str() {
            "true" => return Ok(Expr::Literal(Value::Bool(true))),
            "false" => return Ok(Expr::Literal(Value::Bool(false))),
            _ => {}
        }

        if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            let args = self.parse_list()?;
            return Ok(Expr::Call { name, args });
        }

        let scope = match name.as_str() {
            "r" => Scope::Request,
            "p" => Scope::Policy,
            _ => {
                return Err(EngineError::model_parse(format!(
                    "unknown identifier '{name}' at {at}"
                )));
            }
        };

        let mut segments = Vec::new();
        while self.peek() == Some(&Token::Dot) {
            self.pos += 1;
            let seg_at = self.offset();
            match self.bump() {
                Some(Token::Ident(seg)) => segments.push(seg),
                _ => {
                    return Err(EngineError::model_parse(format!(
                        "expected attribute name at {seg_at}"
                    )));
                }
            }
        }

        let mut segments = segments.into_iter();
        let Some(attr) = segments.next() else {
            return Err(EngineError::model_parse(format!(
                "'{name}' must be followed by an attribute name at {at}"
            )));
        };
        let path: Vec<String> = segments.collect();
        if scope == Scope::Policy && !path.is_empty() {
            return Err(EngineError::model_parse(format!(
                "policy attributes have no fields (p.{attr}.{}) at {at}",
                path.join(".")
            )));
        }

        Ok(Expr::Attr(AttrRef {
            scope,
            name: attr,
            path,
        }))
    }

    /// Comma-separated expressions up to the closing `)` (opening paren already consumed).
    fn parse_list(&mut self) -> EngineResult<Vec<Expr>> {
        let mut items = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.pos += 1;
            return Ok(items);
        }
        loop {
            items.push(self.parse_or()?);
            let at = self.offset();
            match self.bump() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => return Ok(items),
                _ => {
                    return Err(EngineError::model_parse(format!(
                        "expected ',' or ')' at {at}"
                    )));
                }
            }
        }
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

/// Parse a matcher expression.
pub fn parse(src: &str) -> EngineResult<Expr> {
    let tokens = tokenize(src)?;
    if tokens.is_empty() {
        return Err(EngineError::model_parse("matcher is empty"));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        len: src.len(),
    };
    let expr = parser.parse_or()?;
    if parser.pos < parser.tokens.len() {
        return Err(EngineError::model_parse(format!(
            "unexpected trailing input at {}",
            parser.offset()
        )));
    }
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attr(scope: Scope, name: &str) -> Expr {
        Expr::Attr(AttrRef {
            scope,
            name: name.to_string(),
            path: vec![],
        })
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let expr = parse("r.a == p.a || r.b == p.b && r.c == p.c").unwrap();
        match expr {
            Expr::Binary { op: BinaryOp::Or, rhs, .. } => {
                assert!(matches!(*rhs, Expr::Binary { op: BinaryOp::And, .. }));
            }
            other => panic!("expected top-level ||, got {other:?}"),
        }
    }

    #[test]
    fn parses_record_paths_and_literals() {
        let expr = parse("r.sub.Age >= 18.5 && r.obj == 'doc'").unwrap();
        let Expr::Binary { op: BinaryOp::And, lhs, rhs } = expr else {
            panic!("expected &&");
        };
        assert_eq!(
            *lhs,
            Expr::Binary {
                op: BinaryOp::Ge,
                lhs: Box::new(Expr::Attr(AttrRef {
                    scope: Scope::Request,
                    name: "sub".to_string(),
                    path: vec!["Age".to_string()],
                })),
                rhs: Box::new(Expr::Literal(Value::Number(18.5))),
            }
        );
        assert_eq!(
            *rhs,
            Expr::Binary {
                op: BinaryOp::Eq,
                lhs: Box::new(attr(Scope::Request, "obj")),
                rhs: Box::new(Expr::Literal(Value::text("doc"))),
            }
        );
    }

    #[test]
    fn parses_calls_and_in_lists() {
        let expr = parse("g(r.sub, p.sub) && r.act in ('read', \"write\")").unwrap();
        let Expr::Binary { lhs, rhs, .. } = expr else {
            panic!("expected &&");
        };
        assert!(matches!(*lhs, Expr::Call { ref name, ref args } if name == "g" && args.len() == 2));
        assert!(matches!(*rhs, Expr::In { ref haystack, .. } if haystack.len() == 2));
    }

    #[test]
    fn syntax_errors_are_model_parse_errors() {
        for bad in ["", "r.sub ==", "r.sub == 'x", "(r.sub == p.sub", "foo == 1", "p.sub.x == 1", "r == 1", "r.a # 1"] {
            match parse(bad) {
                Err(EngineError::ModelParse(_)) => {}
                other => panic!("expected parse error for {bad:?}, got {other:?}"),
            }
        }
    }
}
