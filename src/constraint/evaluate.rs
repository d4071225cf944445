// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagecraft contributors

//! The `evaluate` condition language
//!
//! A small boolean expression language over the step environment:
//!
//! ```text
//! CI_COMMIT_BRANCH == "main" && !(CI_COMMIT_MESSAGE contains "[skip deploy]")
//! ```
//!
//! Bare identifiers resolve to environment values (missing names are empty
//! strings), `true`/`false` are booleans, and string literals use single or
//! double quotes. Operators by increasing precedence: `||`, `&&`, `!`, then
//! `==`, `!=` and `contains`.

use std::collections::BTreeMap;

use crate::errors::{StagecraftError, StagecraftResult};

/// Maximum nesting of parentheses and `!` operators
const MAX_DEPTH: usize = 64;

/// Evaluate `expression` against `env`; the result must be a boolean
pub fn evaluate(expression: &str, env: &BTreeMap<String, String>) -> StagecraftResult<bool> {
    let fail = |reason: String| StagecraftError::InvalidExpression {
        expression: expression.to_string(),
        reason,
    };

    let tokens = tokenize(expression).map_err(fail)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
        env,
    };
    let value = parser.parse_or().map_err(fail)?;
    if let Some(token) = parser.peek() {
        return Err(fail(format!("unexpected token {}", token)));
    }

    match value {
        Value::Bool(b) => Ok(b),
        Value::Str(s) => Err(fail(format!(
            "expression evaluates to the string \"{}\", not a boolean",
            s
        ))),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    LParen,
    RParen,
    Eq,
    Ne,
    And,
    Or,
    Not,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Ident(name) => write!(f, "'{}'", name),
            Token::Str(s) => write!(f, "\"{}\"", s),
            Token::LParen => f.write_str("'('"),
            Token::RParen => f.write_str("')'"),
            Token::Eq => f.write_str("'=='"),
            Token::Ne => f.write_str("'!='"),
            Token::And => f.write_str("'&&'"),
            Token::Or => f.write_str("'||'"),
            Token::Not => f.write_str("'!'"),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
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
            '=' | '!' | '&' | '|' => {
                chars.next();
                let next = chars.peek().copied();
                let token = match (c, next) {
                    ('=', Some('=')) => Token::Eq,
                    ('!', Some('=')) => Token::Ne,
                    ('&', Some('&')) => Token::And,
                    ('|', Some('|')) => Token::Or,
                    ('!', _) => {
                        tokens.push(Token::Not);
                        continue;
                    }
                    _ => return Err(format!("unexpected character '{}'", c)),
                };
                chars.next();
                tokens.push(token);
            }
            '"' | '\'' => {
                chars.next();
                let mut literal = String::new();
                loop {
                    match chars.next() {
                        Some('\\') => match chars.next() {
                            Some(escaped) => literal.push(escaped),
                            None => return Err("unterminated string literal".into()),
                        },
                        Some(ch) if ch == c => break,
                        Some(ch) => literal.push(ch),
                        None => return Err("unterminated string literal".into()),
                    }
                }
                tokens.push(Token::Str(literal));
            }
            c if c.is_alphanumeric() || c == '_' => {
                let mut ident = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_alphanumeric() || ch == '_' || ch == '.' || ch == '-' {
                        ident.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            other => return Err(format!("unexpected character '{}'", other)),
        }
    }

    Ok(tokens)
}

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Bool(bool),
    Str(String),
}

impl Value {
    fn as_bool(&self, op: &str) -> Result<bool, String> {
        match self {
            Value::Bool(b) => Ok(*b),
            Value::Str(s) => Err(format!("operator {} expects booleans, got \"{}\"", op, s)),
        }
    }

    fn into_string(self) -> String {
        match self {
            Value::Bool(b) => b.to_string(),
            Value::Str(s) => s,
        }
    }
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    env: &'a BTreeMap<String, String>,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn descend(&mut self) -> Result<(), String> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(format!("expression is nested deeper than {} levels", MAX_DEPTH));
        }
        Ok(())
    }

    fn parse_or(&mut self) -> Result<Value, String> {
        let mut left = self.parse_and()?;
        while self.eat(&Token::Or) {
            let right = self.parse_and()?;
            left = Value::Bool(left.as_bool("||")? || right.as_bool("||")?);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Value, String> {
        let mut left = self.parse_unary()?;
        while self.eat(&Token::And) {
            let right = self.parse_unary()?;
            left = Value::Bool(left.as_bool("&&")? && right.as_bool("&&")?);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Value, String> {
        if self.eat(&Token::Not) {
            self.descend()?;
            let inner = self.parse_unary()?;
            self.depth -= 1;
            return Ok(Value::Bool(!inner.as_bool("!")?));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Value, String> {
        let left = self.parse_atom()?;

        match self.peek() {
            Some(Token::Eq) => {
                self.advance();
                let right = self.parse_atom()?;
                Ok(Value::Bool(equals(left, right)))
            }
            Some(Token::Ne) => {
                self.advance();
                let right = self.parse_atom()?;
                Ok(Value::Bool(!equals(left, right)))
            }
            Some(Token::Ident(op)) if op == "contains" => {
                self.advance();
                let right = self.parse_atom()?;
                Ok(Value::Bool(
                    left.into_string().contains(right.into_string().as_str()),
                ))
            }
            _ => Ok(left),
        }
    }

    fn parse_atom(&mut self) -> Result<Value, String> {
        match self.advance() {
            Some(Token::LParen) => {
                self.descend()?;
                let value = self.parse_or()?;
                if !self.eat(&Token::RParen) {
                    return Err("missing closing ')'".into());
                }
                self.depth -= 1;
                Ok(value)
            }
            Some(Token::Str(s)) => Ok(Value::Str(s)),
            Some(Token::Ident(name)) => Ok(match name.as_str() {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                _ => Value::Str(self.env.get(&name).cloned().unwrap_or_default()),
            }),
            Some(token) => Err(format!("unexpected token {}", token)),
            None => Err("unexpected end of expression".into()),
        }
    }
}

fn equals(left: Value, right: Value) -> bool {
    match (left, right) {
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (a, b) => a.into_string() == b.into_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("CI_COMMIT_BRANCH".to_string(), "main".to_string()),
            ("CI_COMMIT_MESSAGE".to_string(), "fix: things [skip deploy]".to_string()),
            ("CI_PIPELINE_EVENT".to_string(), "push".to_string()),
        ])
    }

    #[test]
    fn test_equality() {
        assert!(evaluate(r#"CI_COMMIT_BRANCH == "main""#, &env()).unwrap());
        assert!(!evaluate(r#"CI_COMMIT_BRANCH != 'main'"#, &env()).unwrap());
    }

    #[test]
    fn test_boolean_operators_and_precedence() {
        let expr = r#"CI_PIPELINE_EVENT == "tag" || CI_COMMIT_BRANCH == "main" && true"#;
        assert!(evaluate(expr, &env()).unwrap());

        let expr = r#"(CI_PIPELINE_EVENT == "tag" || CI_COMMIT_BRANCH == "main") && false"#;
        assert!(!evaluate(expr, &env()).unwrap());
    }

    #[test]
    fn test_not_and_contains() {
        let expr = r#"!(CI_COMMIT_MESSAGE contains "[skip deploy]")"#;
        assert!(!evaluate(expr, &env()).unwrap());
    }

    #[test]
    fn test_missing_variable_is_empty() {
        assert!(evaluate(r#"UNKNOWN == """#, &env()).unwrap());
    }

    #[test]
    fn test_non_boolean_result_is_rejected() {
        let err = evaluate("CI_COMMIT_BRANCH", &env()).unwrap_err();
        assert!(matches!(err, StagecraftError::InvalidExpression { .. }));
    }

    #[test]
    fn test_syntax_errors() {
        assert!(evaluate(r#"CI_COMMIT_BRANCH == "main"#, &env()).is_err());
        assert!(evaluate("(true", &env()).is_err());
        assert!(evaluate("true true", &env()).is_err());
        assert!(evaluate("a = b", &env()).is_err());
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let expr = format!("{}true{}", "(".repeat(10_000), ")".repeat(10_000));
        let err = evaluate(&expr, &env()).unwrap_err();
        assert!(matches!(err, StagecraftError::InvalidExpression { ref reason, .. } if reason.contains("nested")));

        let expr = format!("{}true", "!".repeat(10_000));
        assert!(matches!(
            evaluate(&expr, &env()).unwrap_err(),
            StagecraftError::InvalidExpression { .. }
        ));
    }

    #[test]
    fn test_moderate_nesting_is_accepted() {
        let expr = format!("{}true{}", "(".repeat(32), ")".repeat(32));
        assert!(evaluate(&expr, &env()).unwrap());
        assert!(evaluate(&format!("{}true", "!".repeat(32)), &env()).unwrap());
    }
}
