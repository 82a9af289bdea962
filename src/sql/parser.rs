//! SQL statement parser for LockstepDB
//!
//! Recursive-descent parser over the token list. The dialect is deliberately
//! small: single-table SELECT with WHERE/ORDER BY/LIMIT, INSERT .. VALUES,
//! UPDATE .. SET with literal assignments, DELETE, CREATE TABLE, DROP TABLE
//! and the transaction-bracketing statements.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sql::tokenizer::{tokenize, Token};
use crate::storage::schema::{Column, Schema};
use crate::storage::value::{DataType, Row, Value};

/// Comparison operator in a predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    Gt,
    Lt,
    Ge,
    Le,
    Ne,
}

impl CompareOp {
    /// Parse an operator as written in a statement
    pub fn parse(op: &str) -> Result<Self> {
        match op {
            "=" => Ok(CompareOp::Eq),
            ">" => Ok(CompareOp::Gt),
            "<" => Ok(CompareOp::Lt),
            ">=" => Ok(CompareOp::Ge),
            "<=" => Ok(CompareOp::Le),
            "<>" => Ok(CompareOp::Ne),
            other => Err(Error::ParseRejected(format!(
                "unknown operator '{}'",
                other
            ))),
        }
    }

    /// Apply this operator to an ordering outcome
    pub fn evaluate(&self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            CompareOp::Eq => ordering == Equal,
            CompareOp::Gt => ordering == Greater,
            CompareOp::Lt => ordering == Less,
            CompareOp::Ge => ordering != Less,
            CompareOp::Le => ordering != Greater,
            CompareOp::Ne => ordering != Equal,
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompareOp::Eq => "=",
            CompareOp::Gt => ">",
            CompareOp::Lt => "<",
            CompareOp::Ge => ">=",
            CompareOp::Le => "<=",
            CompareOp::Ne => "<>",
        };
        write!(f, "{}", s)
    }
}

/// A single-comparison predicate: `column operator literal`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub column: String,
    pub op: CompareOp,
    pub value: Value,
}

impl Predicate {
    /// Parse a predicate from a bare condition string such as `salary > 1000`
    pub fn parse(condition: &str) -> Result<Self> {
        let tokens = tokenize(condition)?;
        let mut parser = Parser::from_tokens(tokens);
        let predicate = parser.parse_predicate()?;
        parser.expect_end()?;
        Ok(predicate)
    }

    /// Evaluate this predicate against a row under the given schema.
    ///
    /// Fails with `UnknownColumn` if the column is absent.
    pub fn matches(&self, row: &[Value], schema: &Schema) -> Result<bool> {
        let idx = schema
            .column_index(&self.column)
            .ok_or_else(|| Error::UnknownColumn(self.column.clone()))?;
        let ordering = row[idx].compare(&self.value)?;
        Ok(self.op.evaluate(ordering))
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.column, self.op, self.value.to_literal())
    }
}

/// Sort direction in ORDER BY
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortDirection::Asc => write!(f, "ASC"),
            SortDirection::Desc => write!(f, "DESC"),
        }
    }
}

/// Statement kind, carried through results and log records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    CreateTable,
    DropTable,
    Begin,
    Commit,
    Rollback,
    Unknown,
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StatementKind::Select => "SELECT",
            StatementKind::Insert => "INSERT",
            StatementKind::Update => "UPDATE",
            StatementKind::Delete => "DELETE",
            StatementKind::CreateTable => "CREATE TABLE",
            StatementKind::DropTable => "DROP TABLE",
            StatementKind::Begin => "BEGIN",
            StatementKind::Commit => "COMMIT",
            StatementKind::Rollback => "ROLLBACK",
            StatementKind::Unknown => "UNKNOWN",
        };
        write!(f, "{}", s)
    }
}

/// A parsed SELECT statement, prior to query-tree shaping
#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    pub table: String,
    /// `None` means `SELECT *`
    pub columns: Option<Vec<(String, Option<String>)>>,
    pub predicate: Option<Predicate>,
    pub order: Option<(String, SortDirection)>,
    pub limit: Option<u64>,
}

/// A parsed statement
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Select(SelectQuery),
    Insert {
        table: String,
        rows: Vec<Row>,
    },
    Update {
        table: String,
        assignments: Vec<(String, Value)>,
        predicate: Option<Predicate>,
    },
    Delete {
        table: String,
        predicate: Option<Predicate>,
    },
    CreateTable {
        table: String,
        schema: Schema,
    },
    DropTable {
        table: String,
    },
    Begin,
    Commit,
    Rollback,
}

impl Statement {
    pub fn kind(&self) -> StatementKind {
        match self {
            Statement::Select(_) => StatementKind::Select,
            Statement::Insert { .. } => StatementKind::Insert,
            Statement::Update { .. } => StatementKind::Update,
            Statement::Delete { .. } => StatementKind::Delete,
            Statement::CreateTable { .. } => StatementKind::CreateTable,
            Statement::DropTable { .. } => StatementKind::DropTable,
            Statement::Begin => StatementKind::Begin,
            Statement::Commit => StatementKind::Commit,
            Statement::Rollback => StatementKind::Rollback,
        }
    }
}

/// Parse a statement string
pub fn parse(sql: &str) -> Result<Statement> {
    let mut parser = Parser::new(sql)?;
    let statement = parser.parse_statement()?;
    parser.expect_end()?;
    Ok(statement)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(sql: &str) -> Result<Self> {
        Ok(Self::from_tokens(tokenize(sql)?))
    }

    fn from_tokens(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if matches!(self.peek(), Some(t) if t.is_keyword(kw)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<()> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            Err(Error::ParseRejected(format!(
                "expected {}, found {:?}",
                kw,
                self.peek()
            )))
        }
    }

    fn eat_symbol(&mut self, c: char) -> bool {
        if matches!(self.peek(), Some(Token::Symbol(s)) if *s == c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_symbol(&mut self, c: char) -> Result<()> {
        if self.eat_symbol(c) {
            Ok(())
        } else {
            Err(Error::ParseRejected(format!(
                "expected '{}', found {:?}",
                c,
                self.peek()
            )))
        }
    }

    fn ident(&mut self) -> Result<String> {
        match self.advance() {
            Some(Token::Ident(s)) => Ok(s),
            other => Err(Error::ParseRejected(format!(
                "expected identifier, found {:?}",
                other
            ))),
        }
    }

    fn literal(&mut self) -> Result<Value> {
        match self.advance() {
            Some(Token::Number(text)) => {
                if let Ok(i) = text.parse::<i64>() {
                    Ok(Value::Integer(i))
                } else {
                    text.parse::<f64>().map(Value::Float).map_err(|_| {
                        Error::ParseRejected(format!("invalid numeric literal '{}'", text))
                    })
                }
            }
            Some(Token::StringLit(text)) => Ok(Value::Text(text)),
            Some(Token::Ident(s)) if s.eq_ignore_ascii_case("NULL") => Ok(Value::Null),
            other => Err(Error::ParseRejected(format!(
                "expected literal, found {:?}",
                other
            ))),
        }
    }

    fn expect_end(&mut self) -> Result<()> {
        self.eat_symbol(';');
        match self.peek() {
            None => Ok(()),
            Some(t) => Err(Error::ParseRejected(format!(
                "trailing input after statement: {:?}",
                t
            ))),
        }
    }

    fn parse_statement(&mut self) -> Result<Statement> {
        let keyword = match self.peek() {
            Some(Token::Ident(s)) => s.to_ascii_uppercase(),
            other => {
                return Err(Error::ParseRejected(format!(
                    "expected statement keyword, found {:?}",
                    other
                )))
            }
        };

        match keyword.as_str() {
            "SELECT" => self.parse_select(),
            "INSERT" => self.parse_insert(),
            "UPDATE" => self.parse_update(),
            "DELETE" => self.parse_delete(),
            "CREATE" => self.parse_create(),
            "DROP" => self.parse_drop(),
            "BEGIN" => {
                self.pos += 1;
                self.eat_keyword("TRANSACTION");
                Ok(Statement::Begin)
            }
            "COMMIT" => {
                self.pos += 1;
                Ok(Statement::Commit)
            }
            "ROLLBACK" | "ABORT" => {
                self.pos += 1;
                Ok(Statement::Rollback)
            }
            other => Err(Error::ParseRejected(format!(
                "unsupported statement '{}'",
                other
            ))),
        }
    }

    fn parse_select(&mut self) -> Result<Statement> {
        self.expect_keyword("SELECT")?;

        let columns = if self.eat_symbol('*') {
            None
        } else {
            let mut list = Vec::new();
            loop {
                let name = self.ident()?;
                let alias = if self.eat_keyword("AS") {
                    Some(self.ident()?)
                } else {
                    None
                };
                list.push((name, alias));
                if !self.eat_symbol(',') {
                    break;
                }
            }
            Some(list)
        };

        self.expect_keyword("FROM")?;
        let table = self.ident()?;

        let predicate = if self.eat_keyword("WHERE") {
            Some(self.parse_predicate()?)
        } else {
            None
        };

        let order = if self.eat_keyword("ORDER") {
            self.expect_keyword("BY")?;
            let column = self.ident()?;
            let direction = if self.eat_keyword("DESC") {
                SortDirection::Desc
            } else {
                self.eat_keyword("ASC");
                SortDirection::Asc
            };
            Some((column, direction))
        } else {
            None
        };

        let limit = if self.eat_keyword("LIMIT") {
            match self.advance() {
                Some(Token::Number(text)) => {
                    let n = text.parse::<i64>().map_err(|_| {
                        Error::ParseRejected(format!("invalid LIMIT '{}'", text))
                    })?;
                    if n < 0 {
                        return Err(Error::ParseRejected(format!(
                            "LIMIT must be non-negative, got {}",
                            n
                        )));
                    }
                    Some(n as u64)
                }
                other => {
                    return Err(Error::ParseRejected(format!(
                        "expected row count after LIMIT, found {:?}",
                        other
                    )))
                }
            }
        } else {
            None
        };

        Ok(Statement::Select(SelectQuery {
            table,
            columns,
            predicate,
            order,
            limit,
        }))
    }

    fn parse_insert(&mut self) -> Result<Statement> {
        self.expect_keyword("INSERT")?;
        self.expect_keyword("INTO")?;
        let table = self.ident()?;
        self.expect_keyword("VALUES")?;

        let mut rows = Vec::new();
        loop {
            self.expect_symbol('(')?;
            let mut row = Vec::new();
            loop {
                row.push(self.literal()?);
                if !self.eat_symbol(',') {
                    break;
                }
            }
            self.expect_symbol(')')?;
            rows.push(row);
            if !self.eat_symbol(',') {
                break;
            }
        }

        Ok(Statement::Insert { table, rows })
    }

    fn parse_update(&mut self) -> Result<Statement> {
        self.expect_keyword("UPDATE")?;
        let table = self.ident()?;
        self.expect_keyword("SET")?;

        let mut assignments = Vec::new();
        loop {
            let column = self.ident()?;
            match self.advance() {
                Some(Token::Op(op)) if op == "=" => {}
                other => {
                    return Err(Error::ParseRejected(format!(
                        "expected '=', found {:?}",
                        other
                    )))
                }
            }
            assignments.push((column, self.literal()?));
            if !self.eat_symbol(',') {
                break;
            }
        }

        let predicate = if self.eat_keyword("WHERE") {
            Some(self.parse_predicate()?)
        } else {
            None
        };

        Ok(Statement::Update {
            table,
            assignments,
            predicate,
        })
    }

    fn parse_delete(&mut self) -> Result<Statement> {
        self.expect_keyword("DELETE")?;
        self.expect_keyword("FROM")?;
        let table = self.ident()?;
        let predicate = if self.eat_keyword("WHERE") {
            Some(self.parse_predicate()?)
        } else {
            None
        };
        Ok(Statement::Delete { table, predicate })
    }

    fn parse_create(&mut self) -> Result<Statement> {
        self.expect_keyword("CREATE")?;
        self.expect_keyword("TABLE")?;
        let table = self.ident()?;
        self.expect_symbol('(')?;

        let mut columns = Vec::new();
        loop {
            let name = self.ident()?;
            let type_name = self.ident()?;
            columns.push(Column::new(name, DataType::parse(&type_name)?));
            if !self.eat_symbol(',') {
                break;
            }
        }
        self.expect_symbol(')')?;

        Ok(Statement::CreateTable {
            table,
            schema: Schema::from_columns(columns),
        })
    }

    fn parse_drop(&mut self) -> Result<Statement> {
        self.expect_keyword("DROP")?;
        self.expect_keyword("TABLE")?;
        let table = self.ident()?;
        Ok(Statement::DropTable { table })
    }

    fn parse_predicate(&mut self) -> Result<Predicate> {
        let column = self.ident()?;
        let op = match self.advance() {
            Some(Token::Op(op)) => CompareOp::parse(&op)?,
            other => {
                return Err(Error::ParseRejected(format!(
                    "expected comparison operator, found {:?}",
                    other
                )))
            }
        };
        let value = self.literal()?;
        Ok(Predicate { column, op, value })
    }
}
