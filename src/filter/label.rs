//! Label filter expressions.
//!
//! ```text
//! expr    := or (',' or)*          ',' is an OR with the lowest precedence
//! or      := and ('||' and)*
//! and     := unary ('&&' unary)*
//! unary   := '!' unary | primary
//! primary := '(' expr ')' | '/' regex '/' | label | key ':' set-op
//! set-op  := containsAny {a,b} | containsAll {a,b} | consistsOf {a,b}
//!          | isSubsetOf {a,b} | isEmpty
//! ```
//!
//! Bare labels match case-insensitively. Set operations look at the values
//! of every `key:value` label with the given key.

use std::collections::BTreeSet;

use regex::Regex;

use crate::error::LabelFilterError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    LParen,
    RParen,
    Not,
    And,
    Or,
    Comma,
    Regex(String),
    Label(String),
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::LParen => "'('".into(),
            Token::RParen => "')'".into(),
            Token::Not => "'!'".into(),
            Token::And => "'&&'".into(),
            Token::Or => "'||'".into(),
            Token::Comma => "','".into(),
            Token::Regex(re) => format!("regex /{re}/"),
            Token::Label(label) => format!("label {label:?}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SetOp {
    ContainsAny,
    ContainsAll,
    ConsistsOf,
    IsSubsetOf,
    IsEmpty,
}

impl SetOp {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "containsAny" => SetOp::ContainsAny,
            "containsAll" => SetOp::ContainsAll,
            "consistsOf" => SetOp::ConsistsOf,
            "isSubsetOf" => SetOp::IsSubsetOf,
            "isEmpty" => SetOp::IsEmpty,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone)]
enum Expr {
    Label(String),
    Regex(Regex),
    Set {
        key: String,
        op: SetOp,
        values: BTreeSet<String>,
    },
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

impl Expr {
    fn eval(&self, labels: &[String]) -> bool {
        match self {
            Expr::Label(wanted) => labels.iter().any(|label| normalize(label) == *wanted),
            Expr::Regex(re) => labels.iter().any(|label| re.is_match(label)),
            Expr::Set { key, op, values } => {
                let set: BTreeSet<String> = labels
                    .iter()
                    .filter_map(|label| {
                        let (k, v) = label.split_once(':')?;
                        (normalize(k) == *key).then(|| normalize(v))
                    })
                    .collect();
                match op {
                    SetOp::ContainsAny => !set.is_disjoint(values),
                    SetOp::ContainsAll => set.is_superset(values),
                    SetOp::ConsistsOf => set == *values,
                    SetOp::IsSubsetOf => set.is_subset(values),
                    SetOp::IsEmpty => set.is_empty(),
                }
            }
            Expr::Not(inner) => !inner.eval(labels),
            Expr::And(a, b) => a.eval(labels) && b.eval(labels),
            Expr::Or(a, b) => a.eval(labels) || b.eval(labels),
        }
    }
}

fn normalize(label: &str) -> String {
    label.trim().to_lowercase()
}

/// A compiled label filter.
#[derive(Debug, Clone)]
pub struct LabelFilter {
    source: String,
    expr: Expr,
}

impl LabelFilter {
    pub fn parse(input: &str) -> Result<Self, LabelFilterError> {
        let tokens = tokenize(input)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            input,
        };
        let expr = parser.expr()?;
        if let Some((token, position)) = parser.tokens.get(parser.pos) {
            return Err(LabelFilterError::UnexpectedToken {
                found: token.describe(),
                position: *position,
                input: input.to_string(),
            });
        }
        Ok(Self {
            source: input.to_string(),
            expr,
        })
    }

    pub fn matches(&self, labels: &[String]) -> bool {
        self.expr.eval(labels)
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

fn tokenize(input: &str) -> Result<Vec<(Token, usize)>, LabelFilterError> {
    let chars: Vec<(usize, char)> = input.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (pos, c) = chars[i];
        let next = chars.get(i + 1).map(|(_, c)| *c);
        match c {
            ' ' | '\t' | '\n' => i += 1,
            '(' => {
                tokens.push((Token::LParen, pos));
                i += 1;
            }
            ')' => {
                tokens.push((Token::RParen, pos));
                i += 1;
            }
            '!' => {
                tokens.push((Token::Not, pos));
                i += 1;
            }
            ',' => {
                tokens.push((Token::Comma, pos));
                i += 1;
            }
            '&' if next == Some('&') => {
                tokens.push((Token::And, pos));
                i += 2;
            }
            '|' if next == Some('|') => {
                tokens.push((Token::Or, pos));
                i += 2;
            }
            '&' | '|' => {
                return Err(LabelFilterError::UnexpectedToken {
                    found: format!("'{c}'"),
                    position: pos,
                    input: input.to_string(),
                });
            }
            '/' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|(_, c)| *c == '/')
                    .map(|offset| i + 1 + offset)
                    .ok_or_else(|| LabelFilterError::UnclosedRegex {
                        position: pos,
                        input: input.to_string(),
                    })?;
                let pattern: String = chars[i + 1..end].iter().map(|(_, c)| c).collect();
                tokens.push((Token::Regex(pattern), pos));
                i = end + 1;
            }
            _ => {
                let start = i;
                let mut depth = 0usize;
                while let Some((_, c)) = chars.get(i) {
                    match c {
                        '{' => depth += 1,
                        '}' => depth = depth.saturating_sub(1),
                        '&' | '|' | '!' | ',' | '(' | ')' | '/' if depth == 0 => break,
                        _ => {}
                    }
                    i += 1;
                }
                let label: String = chars[start..i].iter().map(|(_, c)| c).collect();
                tokens.push((Token::Label(label.trim().to_string()), pos));
            }
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    input: &'a str,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(token, _)| token)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expr(&mut self) -> Result<Expr, LabelFilterError> {
        let mut expr = self.or()?;
        while self.eat(&Token::Comma) {
            expr = Expr::Or(Box::new(expr), Box::new(self.or()?));
        }
        Ok(expr)
    }

    fn or(&mut self) -> Result<Expr, LabelFilterError> {
        let mut expr = self.and()?;
        while self.eat(&Token::Or) {
            expr = Expr::Or(Box::new(expr), Box::new(self.and()?));
        }
        Ok(expr)
    }

    fn and(&mut self) -> Result<Expr, LabelFilterError> {
        let mut expr = self.unary()?;
        while self.eat(&Token::And) {
            expr = Expr::And(Box::new(expr), Box::new(self.unary()?));
        }
        Ok(expr)
    }

    fn unary(&mut self) -> Result<Expr, LabelFilterError> {
        if self.eat(&Token::Not) {
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, LabelFilterError> {
        let Some((token, position)) = self.tokens.get(self.pos).cloned() else {
            return Err(LabelFilterError::UnexpectedEnd {
                input: self.input.to_string(),
            });
        };
        self.pos += 1;

        match token {
            Token::LParen => {
                let expr = self.expr()?;
                if !self.eat(&Token::RParen) {
                    return Err(match self.tokens.get(self.pos) {
                        Some((token, position)) => LabelFilterError::UnexpectedToken {
                            found: token.describe(),
                            position: *position,
                            input: self.input.to_string(),
                        },
                        None => LabelFilterError::UnexpectedEnd {
                            input: self.input.to_string(),
                        },
                    });
                }
                Ok(expr)
            }
            Token::Regex(pattern) => Regex::new(&format!("(?i){pattern}"))
                .map(Expr::Regex)
                .map_err(|err| LabelFilterError::InvalidRegex {
                    pattern,
                    reason: err.to_string(),
                }),
            Token::Label(label) => self.label(label),
            other => Err(LabelFilterError::UnexpectedToken {
                found: other.describe(),
                position,
                input: self.input.to_string(),
            }),
        }
    }

    fn label(&self, label: String) -> Result<Expr, LabelFilterError> {
        let Some((key, rest)) = label.split_once(':') else {
            return Ok(Expr::Label(normalize(&label)));
        };
        let rest = rest.trim();
        let name_end = rest
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(rest.len());
        let (name, tail) = rest.split_at(name_end);
        let tail = tail.trim();

        let is_set_syntax = tail.starts_with('{') || (tail.is_empty() && name == "isEmpty");
        if !is_set_syntax || name.is_empty() {
            return Ok(Expr::Label(normalize(&label)));
        }
        let Some(op) = SetOp::parse(name) else {
            return Err(LabelFilterError::UnknownSetOperation {
                operation: name.to_string(),
                input: self.input.to_string(),
            });
        };

        let values = match tail.strip_prefix('{').and_then(|t| t.strip_suffix('}')) {
            Some(inner) => inner
                .split(',')
                .map(normalize)
                .filter(|value| !value.is_empty())
                .collect(),
            None if op == SetOp::IsEmpty => BTreeSet::new(),
            None => {
                return Err(LabelFilterError::UnexpectedEnd {
                    input: self.input.to_string(),
                });
            }
        };
        Ok(Expr::Set {
            key: normalize(key),
            op,
            values,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(labels: &[&str]) -> Vec<String> {
        labels.iter().map(|label| label.to_string()).collect()
    }

    fn check(filter: &str, with: &[&str]) -> bool {
        LabelFilter::parse(filter).unwrap().matches(&labels(with))
    }

    #[test]
    fn boolean_operators_and_precedence() {
        assert!(check("fast", &["Fast"]));
        assert!(!check("fast", &["slow"]));
        assert!(check("fast && !flaky", &["fast"]));
        assert!(!check("fast && !flaky", &["fast", "flaky"]));
        assert!(check("a || b && c", &["a"]));
        assert!(!check("(a || b) && c", &["a"]));
        assert!(check("a && b, c", &["c"]));
        assert!(check("!(a || b)", &[]));
    }

    #[test]
    fn regex_labels() {
        assert!(check("/^net/", &["network"]));
        assert!(check("/NET/", &["network"]));
        assert!(!check("/^net$/", &["network"]));
    }

    #[test]
    fn set_operations_on_keyed_labels() {
        let with = ["env:prod", "env: staging", "team:core"];
        assert!(check("env: containsAny {prod, dev}", &with));
        assert!(!check("env: containsAll {prod, dev}", &with));
        assert!(check("env: consistsOf {staging,prod}", &with));
        assert!(check("env: isSubsetOf {prod, staging, dev}", &with));
        assert!(!check("env: isEmpty", &with));
        assert!(check("region: isEmpty", &with));
        assert!(check("team:core", &with));
    }

    #[test]
    fn errors_are_descriptive() {
        assert!(matches!(
            LabelFilter::parse("a &&"),
            Err(LabelFilterError::UnexpectedEnd { .. })
        ));
        assert!(matches!(
            LabelFilter::parse("/abc"),
            Err(LabelFilterError::UnclosedRegex { position: 0, .. })
        ));
        assert!(matches!(
            LabelFilter::parse("a & b"),
            Err(LabelFilterError::UnexpectedToken { position: 2, .. })
        ));
        assert!(matches!(
            LabelFilter::parse("(a"),
            Err(LabelFilterError::UnexpectedEnd { .. })
        ));
        assert!(matches!(
            LabelFilter::parse("a b)"),
            Err(LabelFilterError::UnexpectedToken { .. })
        ));
        assert!(matches!(
            LabelFilter::parse("env: hasAll {a}"),
            Err(LabelFilterError::UnknownSetOperation { .. })
        ));
        assert!(matches!(
            LabelFilter::parse("/(/"),
            Err(LabelFilterError::InvalidRegex { .. })
        ));
    }
}
