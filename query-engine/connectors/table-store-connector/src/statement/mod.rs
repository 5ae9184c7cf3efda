//! Parsed statements.
//!
//! A statement is parsed once, dispatched once on its [`Statement`] variant and discarded after
//! execution. Placeholders are numbered by the lexer in textual order, so every operand that
//! refers to a parameter already knows its slot in the parameter list.

mod lexer;
mod parser;

use std::fmt;

use serde_json::Value as JsonValue;

pub use parser::parse;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    SelectCount,
    Insert,
    Update,
    Delete,
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StatementKind::Select => "SELECT",
            StatementKind::SelectCount => "SELECT COUNT",
            StatementKind::Insert => "INSERT",
            StatementKind::Update => "UPDATE",
            StatementKind::Delete => "DELETE",
        };

        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Select(Select),
    SelectCount(SelectCount),
    Insert(Insert),
    Update(Update),
    Delete(Delete),
}

impl Statement {
    pub fn kind(&self) -> StatementKind {
        match self {
            Statement::Select(_) => StatementKind::Select,
            Statement::SelectCount(_) => StatementKind::SelectCount,
            Statement::Insert(_) => StatementKind::Insert,
            Statement::Update(_) => StatementKind::Update,
            Statement::Delete(_) => StatementKind::Delete,
        }
    }

    pub fn table(&self) -> &str {
        match self {
            Statement::Select(s) => &s.table.name,
            Statement::SelectCount(s) => &s.table.name,
            Statement::Insert(s) => &s.table,
            Statement::Update(s) => &s.table,
            Statement::Delete(s) => &s.table,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableRef {
    pub name: String,
    pub alias: Option<String>,
}

impl TableRef {
    /// True when `qualifier` names this table, either by alias or by table name.
    pub fn is_named(&self, qualifier: &str) -> bool {
        self.name.eq_ignore_ascii_case(qualifier)
            || self.alias.as_deref().is_some_and(|a| a.eq_ignore_ascii_case(qualifier))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRef {
    pub qualifier: Option<String>,
    pub name: String,
    /// Byte offset of the reference in the statement text.
    pub position: usize,
}

impl ColumnRef {
    pub fn bare(name: impl Into<String>) -> Self {
        Self {
            qualifier: None,
            name: name.into(),
            position: 0,
        }
    }

    pub fn at(mut self, position: usize) -> Self {
        self.position = position;
        self
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.qualifier {
            Some(q) => write!(f, "{q}.{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    /// `*` or `alias.*`.
    Wildcard { qualifier: Option<String>, position: usize },
    Column { column: ColumnRef, alias: Option<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

/// One `(INNER|LEFT) JOIN foreign [alias] ON a.x = b.y` clause, with the `ON` sides already
/// assigned to the primary and the joined table.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinSpec {
    pub kind: JoinKind,
    pub foreign_table: String,
    pub alias: Option<String>,
    pub local_column: String,
    pub foreign_column: String,
}

impl JoinSpec {
    /// The name rows of this join are embedded under.
    pub fn embed_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.foreign_table)
    }

    pub fn is_named(&self, qualifier: &str) -> bool {
        self.foreign_table.eq_ignore_ascii_case(qualifier)
            || self.alias.as_deref().is_some_and(|a| a.eq_ignore_ascii_case(qualifier))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Like,
    In,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// Zero-based index into the parameter list.
    Param(usize),
    Literal(JsonValue),
}

/// A single `WHERE` conjunct.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub column: ColumnRef,
    pub operator: Operator,
    pub operands: Vec<Operand>,
}

impl Predicate {
    pub fn param_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.operands.iter().filter_map(|o| match o {
            Operand::Param(i) => Some(*i),
            Operand::Literal(_) => None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub column: ColumnRef,
    pub direction: Direction,
}

/// A `LIMIT` or `OFFSET` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowBound {
    Literal(u64),
    Param(usize),
}

/// Right-hand side of an `INSERT` value or `SET` assignment.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueExpr {
    Param(usize),
    Literal(JsonValue),
    /// `NOW()` or `CURRENT_TIMESTAMP`.
    Now,
    /// `COALESCE(?, column)`. Compiles to the parameter or null; the column is never read.
    Coalesce { param: usize, column: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub table: TableRef,
    pub columns: Vec<SelectItem>,
    pub joins: Vec<JoinSpec>,
    pub predicates: Vec<Predicate>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<RowBound>,
    pub offset: Option<RowBound>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectCount {
    pub table: TableRef,
    /// `COUNT(DISTINCT column)`; `None` for `COUNT(*)`.
    pub distinct: Option<ColumnRef>,
    pub alias: Option<String>,
    pub predicates: Vec<Predicate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    pub table: String,
    pub columns: Vec<String>,
    pub values: Vec<ValueExpr>,
    /// `ON CONFLICT ..` or `ON DUPLICATE KEY UPDATE ..` was present. The clause body is ignored.
    pub upsert: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub table: String,
    pub assignments: Vec<(String, ValueExpr)>,
    pub predicates: Vec<Predicate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    pub table: String,
    pub predicates: Vec<Predicate>,
}
