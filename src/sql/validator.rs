//! Finite-state statement validator
//!
//! An independent well-formedness check over raw token streams, separate from
//! the statement parser and from the transactional path. It walks a state
//! machine over token classes (keyword, attribute, relation, operator, value,
//! punctuation) and accepts the SELECT / UPDATE / BEGIN / COMMIT statement
//! shapes.

use crate::error::{Error, Result};
use crate::sql::tokenizer::{tokenize, Token};

const KEYWORDS: &[&str] = &[
    "SELECT", "FROM", "WHERE", "AS", "UPDATE", "SET", "BEGIN", "TRANSACTION", "COMMIT", "ORDER",
    "BY", "LIMIT", "ASC", "DESC",
];

const OPERATORS: &[&str] = &["=", ">", "<", ">=", "<=", "<>"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    SelectList,
    SelectAttr,
    SelectAlias,
    FromKeyword,
    Relation,
    WhereColumn,
    WhereOperator,
    WhereValue,
    AfterWhere,
    OrderKeyword,
    OrderColumn,
    OrderAttr,
    AfterDirection,
    LimitKeyword,
    AfterLimit,
    UpdateRelation,
    SetKeyword,
    SetColumn,
    SetEquals,
    SetValue,
    AfterAssignment,
    BeginBody,
    CommitBody,
    Finish,
}

/// Token-stream validator for statement well-formedness
pub struct SqlValidator {
    state: State,
}

impl SqlValidator {
    pub fn new() -> Self {
        Self {
            state: State::Start,
        }
    }

    /// Validate a raw statement string
    pub fn validate_str(&mut self, sql: &str) -> Result<()> {
        let tokens = tokenize(sql)?;
        self.validate(&tokens)
    }

    /// Validate a token stream, resetting the machine first
    pub fn validate(&mut self, tokens: &[Token]) -> Result<()> {
        self.state = State::Start;
        for token in tokens {
            if self.state == State::Finish {
                return Err(Error::ValidationRejected(format!(
                    "trailing token {:?} after statement end",
                    token
                )));
            }
            self.step(token)?;
        }
        if self.state != State::Finish {
            return Err(Error::ValidationRejected(
                "statement did not reach a valid end state".to_string(),
            ));
        }
        Ok(())
    }

    fn step(&mut self, token: &Token) -> Result<()> {
        self.state = match (self.state, token) {
            (State::Start, t) if t.is_keyword("SELECT") => State::SelectList,
            (State::Start, t) if t.is_keyword("UPDATE") => State::UpdateRelation,
            (State::Start, t) if t.is_keyword("BEGIN") => State::BeginBody,
            (State::Start, t) if t.is_keyword("COMMIT") => State::CommitBody,

            (State::SelectList, Token::Symbol('*')) => State::SelectAttr,
            (State::SelectList, t) if Self::is_attribute(t) => State::SelectAttr,
            (State::SelectAttr, Token::Symbol(',')) => State::SelectList,
            (State::SelectAttr, t) if t.is_keyword("AS") => State::SelectAlias,
            (State::SelectAttr, t) if t.is_keyword("FROM") => State::FromKeyword,
            (State::SelectAlias, t) if Self::is_attribute(t) => State::SelectAttr,

            (State::FromKeyword, t) if Self::is_attribute(t) => State::Relation,
            (State::Relation, t) if t.is_keyword("WHERE") => State::WhereColumn,
            (State::Relation, t) if t.is_keyword("ORDER") => State::OrderKeyword,
            (State::Relation, t) if t.is_keyword("LIMIT") => State::LimitKeyword,
            (State::Relation, Token::Symbol(';')) => State::Finish,

            (State::WhereColumn, t) if Self::is_attribute(t) => State::WhereOperator,
            (State::WhereOperator, Token::Op(op)) if OPERATORS.contains(&op.as_str()) => {
                State::WhereValue
            }
            (State::WhereValue, t) if Self::is_value(t) => State::AfterWhere,
            (State::AfterWhere, t) if t.is_keyword("ORDER") => State::OrderKeyword,
            (State::AfterWhere, t) if t.is_keyword("LIMIT") => State::LimitKeyword,
            (State::AfterWhere, Token::Symbol(';')) => State::Finish,

            (State::OrderKeyword, t) if t.is_keyword("BY") => State::OrderColumn,
            (State::OrderColumn, t) if Self::is_attribute(t) => State::OrderAttr,
            (State::OrderAttr, t) if t.is_keyword("ASC") || t.is_keyword("DESC") => {
                State::AfterDirection
            }
            (State::OrderAttr, t) if t.is_keyword("LIMIT") => State::LimitKeyword,
            (State::OrderAttr, Token::Symbol(';')) => State::Finish,
            (State::AfterDirection, t) if t.is_keyword("LIMIT") => State::LimitKeyword,
            (State::AfterDirection, Token::Symbol(';')) => State::Finish,

            (State::LimitKeyword, Token::Number(n)) if !n.starts_with('-') => State::AfterLimit,
            (State::AfterLimit, Token::Symbol(';')) => State::Finish,

            (State::UpdateRelation, t) if Self::is_attribute(t) => State::SetKeyword,
            (State::SetKeyword, t) if t.is_keyword("SET") => State::SetColumn,
            (State::SetColumn, t) if Self::is_attribute(t) => State::SetEquals,
            (State::SetEquals, Token::Op(op)) if op == "=" => State::SetValue,
            (State::SetValue, t) if Self::is_value(t) => State::AfterAssignment,
            (State::AfterAssignment, Token::Symbol(',')) => State::SetColumn,
            (State::AfterAssignment, t) if t.is_keyword("WHERE") => State::WhereColumn,
            (State::AfterAssignment, Token::Symbol(';')) => State::Finish,

            (State::BeginBody, t) if t.is_keyword("TRANSACTION") => State::CommitBody,
            (State::BeginBody, Token::Symbol(';')) => State::Finish,
            (State::CommitBody, Token::Symbol(';')) => State::Finish,

            (state, token) => {
                return Err(Error::ValidationRejected(format!(
                    "unexpected token {:?} in state {:?}",
                    token, state
                )))
            }
        };
        Ok(())
    }

    fn is_attribute(token: &Token) -> bool {
        matches!(token, Token::Ident(s)
            if !KEYWORDS.iter().any(|kw| s.eq_ignore_ascii_case(kw)))
    }

    fn is_value(token: &Token) -> bool {
        matches!(token, Token::Number(_) | Token::StringLit(_)) || Self::is_attribute(token)
    }
}

impl Default for SqlValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accepts(sql: &str) -> bool {
        SqlValidator::new().validate_str(sql).is_ok()
    }

    #[test]
    fn test_accepts_well_formed_statements() {
        let cases = [
            "SELECT * FROM users;",
            "SELECT id, name FROM users;",
            "SELECT * FROM employee WHERE salary > 1000;",
            "SELECT * FROM orders WHERE price >= 100;",
            "SELECT name FROM users ORDER BY name ASC;",
            "SELECT salary FROM employee ORDER BY salary DESC;",
            "SELECT * FROM users LIMIT 10;",
            "SELECT * FROM products WHERE price < 500 LIMIT 20;",
            "SELECT * FROM orders WHERE price <= 1000 ORDER BY price DESC;",
            "SELECT * FROM users WHERE name = 'John';",
            "SELECT * FROM books WHERE title <> 'Unknown';",
            "SELECT id, salary FROM employee ORDER BY salary ASC LIMIT 5;",
            "SELECT name AS n FROM users;",
            "UPDATE employee SET salary = 1000 WHERE id = 7;",
            "UPDATE users SET age = 21;",
            "BEGIN TRANSACTION;",
            "BEGIN;",
            "COMMIT;",
        ];
        for sql in cases {
            assert!(accepts(sql), "should accept: {}", sql);
        }
    }

    #[test]
    fn test_rejects_malformed_statements() {
        let cases = [
            "SELET * FROM users;",
            "SELECT * WHEN users;",
            "SELECT FROM users WHERE age > 18;",
            "SELECT * FROM users ORDER YB name;",
            "UPDATE employee SET salary;",
            "SELECT * WHERE id > 10;",
            "SELECT name, FROM users;",
            "SELECT * FROM table1 LIMIT -5;",
            "SELECT * FROM orders ORDER BY ASC;",
            "UPDATE employee SET salary = WHERE id = 5;",
            "SELECT * FROM users WHERE age <>;",
            "SELECT name FROM WHERE id = 1;",
            "UPDATE employee SET WHERE id = 5;",
            "SELECT * FROM users LIMIT LIMIT;",
            "SELECT * FROM users WHERE name == 'John';",
            "SELECT * FROM employee ORDER salary;",
            "SELECT * FROM users WHERE age <> ;",
        ];
        for sql in cases {
            assert!(!accepts(sql), "should reject: {}", sql);
        }
    }

    #[test]
    fn test_validator_resets_between_calls() {
        let mut validator = SqlValidator::new();
        assert!(validator.validate_str("SELECT *").is_err());
        assert!(validator.validate_str("SELECT * FROM users;").is_ok());
    }
}
