//! Conditions for `Filtered` instance scopes and `Custom` rules.
//!
//! Full expression languages live in external evaluators plugged in through
//! [`ExpressionEvaluator`]. The built-in evaluator understands the small
//! subset rule authors use for conditions:
//!
//! ```text
//! system = 'http://example.org/mrn'
//! use != 'old' and period.end.empty()
//! (status = 'final' or status = 'amended') and value.exists()
//! ```

use crate::error::{BundleValidatorError, Result};
use crate::validation::model::ModelElement;

pub trait ExpressionEvaluator: Send + Sync + std::fmt::Debug {
    /// Evaluates `condition` with `context` as the focus element.
    fn evaluate(&self, condition: &str, context: &dyn ModelElement) -> Result<bool>;
}

#[derive(Debug, Clone, Default)]
pub struct BasicExpressionEvaluator;

impl BasicExpressionEvaluator {
    pub fn new() -> Self {
        Self
    }
}

impl ExpressionEvaluator for BasicExpressionEvaluator {
    fn evaluate(&self, condition: &str, context: &dyn ModelElement) -> Result<bool> {
        let tokens = tokenize(condition)?;
        let mut parser = Parser {
            source: condition,
            tokens,
            position: 0,
        };
        let expr = parser.expression()?;
        if parser.position != parser.tokens.len() {
            return Err(parser.error("unexpected trailing input"));
        }
        expr.eval(context, condition)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Path(String),
    Literal(String),
    Call { path: String, function: String },
    Eq,
    Ne,
    And,
    Or,
    LParen,
    RParen,
}

fn tokenize(source: &str) -> Result<Vec<Token>> {
    let fail =
        |message: &str| BundleValidatorError::expression(source.to_string(), message.to_string());
    let chars: Vec<char> = source.chars().collect();
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
            '=' => {
                tokens.push(Token::Eq);
                i += 1;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Ne);
                i += 2;
            }
            '\'' => {
                let start = i + 1;
                let Some(len) = chars[start..].iter().position(|c| *c == '\'') else {
                    return Err(fail("unterminated string literal"));
                };
                tokens.push(Token::Literal(chars[start..start + len].iter().collect()));
                i = start + len + 1;
            }
            c if c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '-') => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric()
                        || matches!(chars[i], '_' | '$' | '.' | '-'))
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();

                if chars.get(i) == Some(&'(') && chars.get(i + 1) == Some(&')') {
                    let (path, function) = match word.rsplit_once('.') {
                        Some((path, function)) => (path.to_string(), function.to_string()),
                        None => (String::new(), word),
                    };
                    tokens.push(Token::Call { path, function });
                    i += 2;
                    continue;
                }

                tokens.push(match word.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "true" | "false" => Token::Literal(word),
                    _ if word.starts_with(|c: char| c.is_ascii_digit() || c == '-') => {
                        Token::Literal(word)
                    }
                    _ => Token::Path(word),
                });
            }
            other => return Err(fail(&format!("unexpected character '{other}'"))),
        }
    }
    Ok(tokens)
}

#[derive(Debug)]
enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Exists(String),
    Empty(String),
    Compare { path: String, literal: String, equal: bool },
}

struct Parser<'s> {
    source: &'s str,
    tokens: Vec<Token>,
    position: usize,
}

impl Parser<'_> {
    fn error(&self, message: &str) -> BundleValidatorError {
        BundleValidatorError::expression(
            self.source.to_string(),
            format!("{message} at token {}", self.position),
        )
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn expression(&mut self) -> Result<Expr> {
        let mut left = self.conjunction()?;
        while self.peek() == Some(&Token::Or) {
            self.position += 1;
            left = Expr::Or(Box::new(left), Box::new(self.conjunction()?));
        }
        Ok(left)
    }

    fn conjunction(&mut self) -> Result<Expr> {
        let mut left = self.term()?;
        while self.peek() == Some(&Token::And) {
            self.position += 1;
            left = Expr::And(Box::new(left), Box::new(self.term()?));
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<Expr> {
        match self.next() {
            Some(Token::LParen) => {
                let inner = self.expression()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(self.error("expected ')'")),
                }
            }
            Some(Token::Call { path, function }) => match function.as_str() {
                "exists" => Ok(Expr::Exists(path)),
                "empty" => Ok(Expr::Empty(path)),
                other => Err(self.error(&format!("unsupported function '{other}()'"))),
            },
            Some(Token::Path(path)) => {
                let equal = match self.next() {
                    Some(Token::Eq) => true,
                    Some(Token::Ne) => false,
                    _ => return Err(self.error("expected '=' or '!='")),
                };
                match self.next() {
                    Some(Token::Literal(literal)) => Ok(Expr::Compare {
                        path,
                        literal,
                        equal,
                    }),
                    _ => Err(self.error("expected a literal")),
                }
            }
            _ => Err(self.error("expected a condition")),
        }
    }
}

impl Expr {
    fn eval(&self, context: &dyn ModelElement, source: &str) -> Result<bool> {
        Ok(match self {
            Expr::Or(left, right) => left.eval(context, source)? || right.eval(context, source)?,
            Expr::And(left, right) => left.eval(context, source)? && right.eval(context, source)?,
            Expr::Exists(path) => select(context, path).iter().any(|e| !e.is_empty_value()),
            Expr::Empty(path) => select(context, path).iter().all(|e| e.is_empty_value()),
            Expr::Compare {
                path,
                literal,
                equal,
            } => {
                let matched = select(context, path)
                    .iter()
                    .any(|e| e.primitive_text().as_deref() == Some(literal.as_str()));
                matched == *equal
            }
        })
    }
}

/// Elements reached by a dotted path, arrays flattened.
fn select<'e>(context: &'e dyn ModelElement, path: &str) -> Vec<&'e dyn ModelElement> {
    let mut current = vec![context];
    for segment in path.split('.').filter(|s| !s.is_empty() && *s != "$this") {
        current = current
            .into_iter()
            .filter_map(|element| element.child(segment))
            .flat_map(|value| value.items())
            .collect();
    }
    current
}
