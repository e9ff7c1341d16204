//! The access-rule expression language.
//!
//! Rules are plain strings persisted as configuration, e.g.
//! `@request.auth.role = 'parent' || user_id = @request.auth.id`. They are
//! parsed once at load time into a small expression tree; evaluation is
//! infallible and fail-closed: anything that cannot be resolved (unknown
//! field, missing actor on a role comparison) denies.

use crate::PolicyError;
use volt_types::{Actor, RecordFields};

/// One side of a comparison.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operand {
    /// `@request.auth.id` — empty string when the request is unauthenticated.
    AuthId,
    /// `@request.auth.role` — unresolvable when unauthenticated.
    AuthRole,
    /// A field of the target record, by name.
    Field(String),
    /// A quoted string literal.
    Literal(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
}

/// A compiled access rule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RuleExpr {
    /// The empty rule string: admits any request.
    Unrestricted,
    Compare {
        lhs: Operand,
        op: CmpOp,
        rhs: Operand,
    },
    And(Box<RuleExpr>, Box<RuleExpr>),
    Or(Box<RuleExpr>, Box<RuleExpr>),
}

/// Evaluation context: the requesting actor (if authenticated) and the
/// target record's fields.
pub struct RequestContext<'a> {
    pub actor: Option<&'a Actor>,
    pub record: &'a dyn RecordFields,
}

impl<'a> RequestContext<'a> {
    pub fn new(actor: Option<&'a Actor>, record: &'a dyn RecordFields) -> Self {
        Self { actor, record }
    }
}

impl RuleExpr {
    /// Parse a persisted rule string. Malformed expressions fail here, at
    /// load time; the evaluation path never sees them.
    pub fn parse(input: &str) -> Result<Self, PolicyError> {
        let input = input.trim();
        if input.is_empty() {
            return Ok(RuleExpr::Unrestricted);
        }
        let tokens = lex(input)?;
        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
            input,
        };
        let expr = parser.parse_or()?;
        if parser.pos != tokens.len() {
            return Err(PolicyError::InvalidExpression(format!(
                "unexpected trailing input in rule '{input}'"
            )));
        }
        Ok(expr)
    }

    /// Evaluate against a request context. Left-to-right, short-circuit;
    /// never mutates state, never fails.
    pub fn evaluate(&self, ctx: &RequestContext<'_>) -> bool {
        match self {
            RuleExpr::Unrestricted => true,
            RuleExpr::And(a, b) => a.evaluate(ctx) && b.evaluate(ctx),
            RuleExpr::Or(a, b) => a.evaluate(ctx) || b.evaluate(ctx),
            RuleExpr::Compare { lhs, op, rhs } => {
                let (Some(lhs), Some(rhs)) = (resolve(lhs, ctx), resolve(rhs, ctx)) else {
                    return false;
                };
                match op {
                    CmpOp::Eq => lhs == rhs,
                    CmpOp::Ne => lhs != rhs,
                }
            }
        }
    }
}

fn resolve(operand: &Operand, ctx: &RequestContext<'_>) -> Option<String> {
    match operand {
        Operand::AuthId => Some(
            ctx.actor
                .map(|actor| actor.id.0.clone())
                .unwrap_or_default(),
        ),
        Operand::AuthRole => ctx.actor.map(|actor| actor.role.as_str().to_string()),
        Operand::Field(name) => ctx.record.field(name).and_then(|value| value.as_text()),
        Operand::Literal(text) => Some(text.clone()),
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Token {
    AuthId,
    AuthRole,
    Ident(String),
    Literal(String),
    Eq,
    Ne,
    And,
    Or,
    LParen,
    RParen,
}

fn lex(input: &str) -> Result<Vec<Token>, PolicyError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '=' => {
                chars.next();
                tokens.push(Token::Eq);
            }
            '!' => {
                chars.next();
                match chars.next() {
                    Some((_, '=')) => tokens.push(Token::Ne),
                    _ => {
                        return Err(PolicyError::InvalidExpression(format!(
                            "expected '=' after '!' in rule '{input}'"
                        )))
                    }
                }
            }
            '&' => {
                chars.next();
                match chars.next() {
                    Some((_, '&')) => tokens.push(Token::And),
                    _ => {
                        return Err(PolicyError::InvalidExpression(format!(
                            "expected '&&' in rule '{input}'"
                        )))
                    }
                }
            }
            '|' => {
                chars.next();
                match chars.next() {
                    Some((_, '|')) => tokens.push(Token::Or),
                    _ => {
                        return Err(PolicyError::InvalidExpression(format!(
                            "expected '||' in rule '{input}'"
                        )))
                    }
                }
            }
            '\'' | '"' => {
                let quote = c;
                chars.next();
                let mut text = String::new();
                let mut closed = false;
                for (_, c) in chars.by_ref() {
                    if c == quote {
                        closed = true;
                        break;
                    }
                    text.push(c);
                }
                if !closed {
                    return Err(PolicyError::InvalidExpression(format!(
                        "unterminated string literal in rule '{input}'"
                    )));
                }
                tokens.push(Token::Literal(text));
            }
            '@' => {
                let mut end = start;
                while let Some(&(i, c)) = chars.peek() {
                    if c == '@' || c == '.' || c.is_ascii_alphanumeric() || c == '_' {
                        end = i + c.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                match &input[start..end] {
                    "@request.auth.id" => tokens.push(Token::AuthId),
                    "@request.auth.role" => tokens.push(Token::AuthRole),
                    other => {
                        return Err(PolicyError::InvalidExpression(format!(
                            "unsupported request selector '{other}'"
                        )))
                    }
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut end = start;
                while let Some(&(i, c)) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        end = i + c.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(input[start..end].to_string()));
            }
            other => {
                return Err(PolicyError::InvalidExpression(format!(
                    "unexpected character '{other}' in rule '{input}'"
                )))
            }
        }
    }

    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    input: &'a str,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn parse_or(&mut self) -> Result<RuleExpr, PolicyError> {
        let mut expr = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.next();
            let rhs = self.parse_and()?;
            expr = RuleExpr::Or(Box::new(expr), Box::new(rhs));
        }
        Ok(expr)
    }

    fn parse_and(&mut self) -> Result<RuleExpr, PolicyError> {
        let mut expr = self.parse_primary()?;
        while self.peek() == Some(&Token::And) {
            self.next();
            let rhs = self.parse_primary()?;
            expr = RuleExpr::And(Box::new(expr), Box::new(rhs));
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<RuleExpr, PolicyError> {
        if self.peek() == Some(&Token::LParen) {
            self.next();
            let expr = self.parse_or()?;
            if self.next() != Some(&Token::RParen) {
                return Err(PolicyError::InvalidExpression(format!(
                    "missing ')' in rule '{}'",
                    self.input
                )));
            }
            return Ok(expr);
        }

        let lhs = self.parse_operand()?;
        let op = match self.next() {
            Some(Token::Eq) => CmpOp::Eq,
            Some(Token::Ne) => CmpOp::Ne,
            _ => {
                return Err(PolicyError::InvalidExpression(format!(
                    "expected '=' or '!=' in rule '{}'",
                    self.input
                )))
            }
        };
        let rhs = self.parse_operand()?;
        Ok(RuleExpr::Compare { lhs, op, rhs })
    }

    fn parse_operand(&mut self) -> Result<Operand, PolicyError> {
        match self.next() {
            Some(Token::AuthId) => Ok(Operand::AuthId),
            Some(Token::AuthRole) => Ok(Operand::AuthRole),
            Some(Token::Ident(name)) => Ok(Operand::Field(name.clone())),
            Some(Token::Literal(text)) => Ok(Operand::Literal(text.clone())),
            _ => Err(PolicyError::InvalidExpression(format!(
                "expected an operand in rule '{}'",
                self.input
            ))),
        }
    }
}
