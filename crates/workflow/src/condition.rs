// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Loom contributors

//! Evaluates a step's `condition`: a pure boolean expression over `context`
//! (spec.md §4.7). Grammar (lowest to highest precedence):
//!
//! ```text
//! or_expr    := and_expr ('||' and_expr)*
//! and_expr   := unary ('&&' unary)*
//! unary      := '!' unary | comparison
//! comparison := primary (('==' | '!=' | '<=' | '>=' | '<' | '>') primary)?
//! primary    := '(' or_expr ')' | true | false | null | number | "string" | dotted.path
//! ```

use crate::template::lookup;
use loom_core::{OrchestrationError, Result};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    String(String),
    Number(f64),
    True,
    False,
    Null,
    Eq,
    Ne,
    Le,
    Ge,
    Lt,
    Gt,
    And,
    Or,
    Not,
    LParen,
    RParen,
}

fn tokenize(src: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '"' => {
                let mut s = String::new();
                i += 1;
                while i < chars.len() && chars[i] != '"' {
                    s.push(chars[i]);
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(OrchestrationError::ValidationFailed {
                        reason: "unterminated string literal in condition".to_string(),
                    });
                }
                i += 1; // closing quote
                tokens.push(Token::String(s));
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Eq);
                i += 2;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Ne);
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '<' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Le);
                i += 2;
            }
            '<' => {
                tokens.push(Token::Lt);
                i += 1;
            }
            '>' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Ge);
                i += 2;
            }
            '>' => {
                tokens.push(Token::Gt);
                i += 1;
            }
            '&' if chars.get(i + 1) == Some(&'&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if chars.get(i + 1) == Some(&'|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            _ if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text.parse::<f64>().map_err(|_| OrchestrationError::ValidationFailed {
                    reason: format!("invalid number in condition: {text}"),
                })?;
                tokens.push(Token::Number(n));
            }
            _ if c.is_alphanumeric() || c == '_' || c == '.' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.')
                {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                tokens.push(match text.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    _ => Token::Ident(text),
                });
            }
            other => {
                return Err(OrchestrationError::ValidationFailed {
                    reason: format!("unexpected character in condition: {other:?}"),
                });
            }
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    context: &'a Value,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&Token> {
        let t = self.tokens.get(self.pos);
        self.pos += 1;
        t
    }

    fn or_expr(&mut self) -> Result<Value> {
        let mut lhs = self.and_expr()?;
        while matches!(self.peek(), Some(Token::Or)) {
            self.advance();
            let rhs = self.and_expr()?;
            lhs = Value::Bool(as_bool(&lhs) || as_bool(&rhs));
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Value> {
        let mut lhs = self.unary()?;
        while matches!(self.peek(), Some(Token::And)) {
            self.advance();
            let rhs = self.unary()?;
            lhs = Value::Bool(as_bool(&lhs) && as_bool(&rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Value> {
        if matches!(self.peek(), Some(Token::Not)) {
            self.advance();
            let v = self.unary()?;
            return Ok(Value::Bool(!as_bool(&v)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Value> {
        let lhs = self.primary()?;
        let op = match self.peek() {
            Some(Token::Eq) => Token::Eq,
            Some(Token::Ne) => Token::Ne,
            Some(Token::Le) => Token::Le,
            Some(Token::Ge) => Token::Ge,
            Some(Token::Lt) => Token::Lt,
            Some(Token::Gt) => Token::Gt,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.primary()?;
        Ok(Value::Bool(compare(&op, &lhs, &rhs)?))
    }

    fn primary(&mut self) -> Result<Value> {
        match self.advance().cloned() {
            Some(Token::LParen) => {
                let v = self.or_expr()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(v),
                    _ => Err(OrchestrationError::ValidationFailed {
                        reason: "expected closing ')' in condition".to_string(),
                    }),
                }
            }
            Some(Token::True) => Ok(Value::Bool(true)),
            Some(Token::False) => Ok(Value::Bool(false)),
            Some(Token::Null) => Ok(Value::Null),
            Some(Token::Number(n)) => Ok(serde_json::Number::from_f64(n)
                .map(Value::Number)
                .unwrap_or(Value::Null)),
            Some(Token::String(s)) => Ok(Value::String(s)),
            Some(Token::Ident(path)) => Ok(lookup(self.context, &path).cloned().unwrap_or(Value::Null)),
            other => Err(OrchestrationError::ValidationFailed {
                reason: format!("unexpected token in condition: {other:?}"),
            }),
        }
    }
}

fn as_bool(v: &Value) -> bool {
    matches!(v, Value::Bool(true))
}

fn compare(op: &Token, lhs: &Value, rhs: &Value) -> Result<bool> {
    match op {
        Token::Eq => Ok(lhs == rhs),
        Token::Ne => Ok(lhs != rhs),
        Token::Lt | Token::Le | Token::Gt | Token::Ge => {
            let (a, b) = match (lhs.as_f64(), rhs.as_f64()) {
                (Some(a), Some(b)) => (a, b),
                _ => {
                    return Err(OrchestrationError::ValidationFailed {
                        reason: "ordering comparison requires two numbers".to_string(),
                    });
                }
            };
            Ok(match op {
                Token::Lt => a < b,
                Token::Le => a <= b,
                Token::Gt => a > b,
                Token::Ge => a >= b,
                _ => unreachable!(),
            })
        }
        _ => unreachable!("non-comparison operator reached compare()"),
    }
}

/// Evaluate `expr` against `context`, returning the boolean result.
///
/// A condition must evaluate to a boolean; anything else is a validation
/// error rather than a silent truthy/falsy coercion.
pub fn evaluate(expr: &str, context: &Value) -> Result<bool> {
    let tokens = tokenize(expr)?;
    let mut parser = Parser { tokens: &tokens, pos: 0, context };
    let result = parser.or_expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(OrchestrationError::ValidationFailed {
            reason: format!("trailing tokens in condition: {expr}"),
        });
    }
    match result {
        Value::Bool(b) => Ok(b),
        other => Err(OrchestrationError::ValidationFailed {
            reason: format!("condition did not evaluate to a boolean: {other}"),
        }),
    }
}

#[cfg(test)]
#[path = "condition_tests.rs"]
mod tests;
