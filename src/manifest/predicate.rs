// src/manifest/predicate.rs

//! Conditional-item predicates
//!
//! Admins gate manifest fragments with boolean expressions over machine
//! facts, e.g.
//!
//! ```text
//! machine_type == "laptop" AND os_vers_major >= 12
//! ANY catalogs == "testing" OR hostname BEGINSWITH[c] "lab-"
//! arch IN {"arm64", "x86_64"} AND NOT department == "finance"
//! ```
//!
//! Expressions parse into an [`Expr`] tree and evaluate against [`Facts`].
//! Anything that fails to parse evaluates to false.

use crate::facts::{FactValue, Facts};
use regex::RegexBuilder;
use std::cmp::Ordering;
use thiserror::Error;
use tracing::warn;

/// Predicate parse errors
#[derive(Debug, Error, PartialEq)]
pub enum PredicateError {
    #[error("Unexpected token {0:?}")]
    UnexpectedToken(String),

    #[error("Unexpected end of predicate")]
    UnexpectedEnd,

    #[error("Unterminated string literal")]
    UnterminatedString,

    #[error("Invalid character {0:?}")]
    InvalidCharacter(char),
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    BeginsWith,
    EndsWith,
    Contains,
    Like,
}

/// Literal operands
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Str(String),
    Num(f64),
    Bool(bool),
}

/// Predicate expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Const(bool),
    Not(Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    /// `[ANY] key op[c] literal`
    Compare {
        key: String,
        op: CompareOp,
        value: Literal,
        any: bool,
        case_insensitive: bool,
    },
    /// `key IN {a, b, ...}`
    InSet { key: String, values: Vec<Literal> },
    /// `literal IN key`, where `key` is a list fact
    Member { value: Literal, key: String },
}

// =============================================================================
// Tokenizer
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    Op(&'static str),
    CaseModifier,
    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
}

fn tokenize(input: &str) -> Result<Vec<Token>, PredicateError> {
    let chars: Vec<char> = input.chars().collect();
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
            '{' => {
                tokens.push(Token::LBrace);
                i += 1;
            }
            '}' => {
                tokens.push(Token::RBrace);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '[' => {
                // Only the [c] / [cd] modifiers are supported
                let end = chars[i..].iter().position(|&ch| ch == ']').map(|p| i + p);
                let Some(end) = end else {
                    return Err(PredicateError::InvalidCharacter('['));
                };
                let modifier: String = chars[i + 1..end].iter().collect();
                if !modifier.to_ascii_lowercase().contains('c') {
                    return Err(PredicateError::UnexpectedToken(format!("[{}]", modifier)));
                }
                tokens.push(Token::CaseModifier);
                i = end + 1;
            }
            '\'' | '"' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(PredicateError::UnterminatedString),
                        Some('\\') if chars.get(i + 1).is_some() => {
                            s.push(chars[i + 1]);
                            i += 2;
                        }
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(&ch) => {
                            s.push(ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(s));
            }
            '=' | '!' | '<' | '>' | '&' | '|' => {
                let next = chars.get(i + 1).copied();
                let (op, len) = match (c, next) {
                    ('=', Some('=')) => ("==", 2),
                    ('=', Some('<')) => ("<=", 2),
                    ('=', Some('>')) => (">=", 2),
                    ('=', _) => ("==", 1),
                    ('!', Some('=')) => ("!=", 2),
                    ('!', _) => ("!", 1),
                    ('<', Some('=')) => ("<=", 2),
                    ('<', Some('>')) => ("!=", 2),
                    ('<', _) => ("<", 1),
                    ('>', Some('=')) => (">=", 2),
                    ('>', _) => (">", 1),
                    ('&', Some('&')) => ("&&", 2),
                    ('|', Some('|')) => ("||", 2),
                    _ => return Err(PredicateError::InvalidCharacter(c)),
                };
                tokens.push(Token::Op(op));
                i += len;
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                match text.parse::<f64>() {
                    Ok(n) => tokens.push(Token::Num(n)),
                    // Dotted versions like 10.15.7 compare as strings
                    Err(_) => tokens.push(Token::Str(text)),
                }
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(PredicateError::InvalidCharacter(other)),
        }
    }

    Ok(tokens)
}

// =============================================================================
// Parser
// =============================================================================

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

fn is_keyword(token: Option<&Token>, keyword: &str) -> bool {
    matches!(token, Some(Token::Ident(s)) if s.eq_ignore_ascii_case(keyword))
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), PredicateError> {
        match self.next() {
            Some(t) if t == expected => Ok(()),
            Some(t) => Err(PredicateError::UnexpectedToken(format!("{:?}", t))),
            None => Err(PredicateError::UnexpectedEnd),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, PredicateError> {
        let mut terms = vec![self.parse_and()?];
        while is_keyword(self.peek(), "OR") || self.peek() == Some(&Token::Op("||")) {
            self.pos += 1;
            terms.push(self.parse_and()?);
        }
        Ok(if terms.len() == 1 { terms.remove(0) } else { Expr::Or(terms) })
    }

    fn parse_and(&mut self) -> Result<Expr, PredicateError> {
        let mut terms = vec![self.parse_unary()?];
        while is_keyword(self.peek(), "AND") || self.peek() == Some(&Token::Op("&&")) {
            self.pos += 1;
            terms.push(self.parse_unary()?);
        }
        Ok(if terms.len() == 1 { terms.remove(0) } else { Expr::And(terms) })
    }

    fn parse_unary(&mut self) -> Result<Expr, PredicateError> {
        if is_keyword(self.peek(), "NOT") || self.peek() == Some(&Token::Op("!")) {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, PredicateError> {
        match self.peek() {
            Some(Token::LParen) => {
                self.pos += 1;
                let expr = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(expr)
            }
            t if is_keyword(t, "TRUEPREDICATE") => {
                self.pos += 1;
                Ok(Expr::Const(true))
            }
            t if is_keyword(t, "FALSEPREDICATE") => {
                self.pos += 1;
                Ok(Expr::Const(false))
            }
            Some(Token::Str(_)) | Some(Token::Num(_)) => self.parse_membership(),
            t if is_keyword(t, "TRUE") || is_keyword(t, "FALSE") => self.parse_membership(),
            Some(Token::Ident(_)) => self.parse_comparison(),
            Some(t) => Err(PredicateError::UnexpectedToken(format!("{:?}", t))),
            None => Err(PredicateError::UnexpectedEnd),
        }
    }

    /// `literal IN key`
    fn parse_membership(&mut self) -> Result<Expr, PredicateError> {
        let value = self.parse_literal()?;
        if !is_keyword(self.peek(), "IN") {
            return match self.next() {
                Some(t) => Err(PredicateError::UnexpectedToken(format!("{:?}", t))),
                None => Err(PredicateError::UnexpectedEnd),
            };
        }
        self.pos += 1;
        let key = self.parse_key()?;
        Ok(Expr::Member { value, key })
    }

    fn parse_comparison(&mut self) -> Result<Expr, PredicateError> {
        let any = if is_keyword(self.peek(), "ANY") {
            self.pos += 1;
            true
        } else {
            false
        };
        let key = self.parse_key()?;

        if is_keyword(self.peek(), "IN") {
            self.pos += 1;
            self.expect(Token::LBrace)?;
            let mut values = Vec::new();
            if self.peek() != Some(&Token::RBrace) {
                loop {
                    values.push(self.parse_literal()?);
                    match self.next() {
                        Some(Token::Comma) => continue,
                        Some(Token::RBrace) => break,
                        Some(t) => return Err(PredicateError::UnexpectedToken(format!("{:?}", t))),
                        None => return Err(PredicateError::UnexpectedEnd),
                    }
                }
            } else {
                self.pos += 1;
            }
            return Ok(Expr::InSet { key, values });
        }

        let op = match self.next() {
            Some(Token::Op("==")) => CompareOp::Eq,
            Some(Token::Op("!=")) => CompareOp::Ne,
            Some(Token::Op("<")) => CompareOp::Lt,
            Some(Token::Op("<=")) => CompareOp::Le,
            Some(Token::Op(">")) => CompareOp::Gt,
            Some(Token::Op(">=")) => CompareOp::Ge,
            Some(Token::Ident(word)) => match word.to_ascii_uppercase().as_str() {
                "BEGINSWITH" => CompareOp::BeginsWith,
                "ENDSWITH" => CompareOp::EndsWith,
                "CONTAINS" => CompareOp::Contains,
                "LIKE" => CompareOp::Like,
                _ => return Err(PredicateError::UnexpectedToken(word)),
            },
            Some(t) => return Err(PredicateError::UnexpectedToken(format!("{:?}", t))),
            None => return Err(PredicateError::UnexpectedEnd),
        };
        let case_insensitive = if self.peek() == Some(&Token::CaseModifier) {
            self.pos += 1;
            true
        } else {
            false
        };
        let value = self.parse_literal()?;

        Ok(Expr::Compare {
            key,
            op,
            value,
            any,
            case_insensitive,
        })
    }

    fn parse_key(&mut self) -> Result<String, PredicateError> {
        match self.next() {
            Some(Token::Ident(name)) => Ok(name),
            Some(t) => Err(PredicateError::UnexpectedToken(format!("{:?}", t))),
            None => Err(PredicateError::UnexpectedEnd),
        }
    }

    fn parse_literal(&mut self) -> Result<Literal, PredicateError> {
        match self.next() {
            Some(Token::Str(s)) => Ok(Literal::Str(s)),
            Some(Token::Num(n)) => Ok(Literal::Num(n)),
            Some(Token::Ident(word)) => match word.to_ascii_uppercase().as_str() {
                "TRUE" | "YES" => Ok(Literal::Bool(true)),
                "FALSE" | "NO" => Ok(Literal::Bool(false)),
                _ => Err(PredicateError::UnexpectedToken(word)),
            },
            Some(t) => Err(PredicateError::UnexpectedToken(format!("{:?}", t))),
            None => Err(PredicateError::UnexpectedEnd),
        }
    }
}

/// Parse a predicate string
pub fn parse(input: &str) -> Result<Expr, PredicateError> {
    let mut parser = Parser {
        tokens: tokenize(input)?,
        pos: 0,
    };
    let expr = parser.parse_or()?;
    match parser.next() {
        None => Ok(expr),
        Some(t) => Err(PredicateError::UnexpectedToken(format!("{:?}", t))),
    }
}

// =============================================================================
// Evaluation
// =============================================================================

fn like_matches(text: &str, pattern: &str, case_insensitive: bool) -> bool {
    let mut re = String::from("^");
    for c in pattern.chars() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    RegexBuilder::new(&re)
        .case_insensitive(case_insensitive)
        .build()
        .is_ok_and(|r| r.is_match(text))
}

fn compare_scalar(fact: &FactValue, op: CompareOp, literal: &Literal, ci: bool) -> bool {
    let ordering = |ord: Ordering| match op {
        CompareOp::Eq => ord == Ordering::Equal,
        CompareOp::Ne => ord != Ordering::Equal,
        CompareOp::Lt => ord == Ordering::Less,
        CompareOp::Le => ord != Ordering::Greater,
        CompareOp::Gt => ord == Ordering::Greater,
        CompareOp::Ge => ord != Ordering::Less,
        _ => false,
    };

    match (fact, literal) {
        (FactValue::Num(a), Literal::Num(b)) => a.partial_cmp(b).is_some_and(ordering),
        (FactValue::Str(s), Literal::Num(b)) => s
            .parse::<f64>()
            .ok()
            .and_then(|a| a.partial_cmp(b))
            .is_some_and(ordering),
        (FactValue::Num(a), Literal::Str(s)) => s
            .parse::<f64>()
            .ok()
            .and_then(|b| a.partial_cmp(&b))
            .is_some_and(ordering),
        (FactValue::Bool(a), Literal::Bool(b)) => match op {
            CompareOp::Eq => a == b,
            CompareOp::Ne => a != b,
            _ => false,
        },
        (FactValue::Str(a), Literal::Str(b)) => {
            let (a, b) = if ci {
                (a.to_lowercase(), b.to_lowercase())
            } else {
                (a.clone(), b.clone())
            };
            match op {
                CompareOp::BeginsWith => a.starts_with(&b),
                CompareOp::EndsWith => a.ends_with(&b),
                CompareOp::Contains => a.contains(&b),
                CompareOp::Like => like_matches(&a, &b, ci),
                _ => ordering(a.cmp(&b)),
            }
        }
        _ => op == CompareOp::Ne,
    }
}

fn literal_matches(fact: &FactValue, literal: &Literal) -> bool {
    compare_scalar(fact, CompareOp::Eq, literal, false)
}

impl Expr {
    /// Evaluate against a set of facts
    pub fn evaluate(&self, facts: &Facts) -> bool {
        match self {
            Expr::Const(b) => *b,
            Expr::Not(inner) => !inner.evaluate(facts),
            Expr::And(terms) => terms.iter().all(|t| t.evaluate(facts)),
            Expr::Or(terms) => terms.iter().any(|t| t.evaluate(facts)),
            Expr::Compare {
                key,
                op,
                value,
                any,
                case_insensitive,
            } => match facts.lookup(key) {
                Some(FactValue::List(items)) => {
                    if *any || matches!(op, CompareOp::Contains) {
                        if matches!(op, CompareOp::Contains) && !*any {
                            return items.iter().any(|i| literal_matches(i, value));
                        }
                        items
                            .iter()
                            .any(|i| compare_scalar(i, *op, value, *case_insensitive))
                    } else {
                        false
                    }
                }
                Some(fact) => compare_scalar(&fact, *op, value, *case_insensitive),
                None => *op == CompareOp::Ne,
            },
            Expr::InSet { key, values } => match facts.lookup(key) {
                Some(FactValue::List(items)) => items
                    .iter()
                    .any(|i| values.iter().any(|v| literal_matches(i, v))),
                Some(fact) => values.iter().any(|v| literal_matches(&fact, v)),
                None => false,
            },
            Expr::Member { value, key } => match facts.lookup(key) {
                Some(FactValue::List(items)) => items.iter().any(|i| literal_matches(i, value)),
                Some(FactValue::Str(s)) => match value {
                    Literal::Str(v) => s.contains(v.as_str()),
                    _ => false,
                },
                _ => false,
            },
        }
    }
}

/// Parse and evaluate, treating parse errors as false
pub fn evaluate(predicate: &str, facts: &Facts) -> bool {
    match parse(predicate) {
        Ok(expr) => expr.evaluate(facts),
        Err(e) => {
            warn!("Could not evaluate predicate {:?}: {}", predicate, e);
            false
        }
    }
}
