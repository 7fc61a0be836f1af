//! Statement Types - structured statements handed to backends
//!
//! Every table and column here is an [`Identifier`]; every runtime value is a
//! [`DatabaseValue`] that backends bind as a parameter.

use std::fmt;

use crate::backends::DatabaseValue;
use crate::security::Identifier;

/// Query operator types
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOperator {
    Equal,
    In,
    NotIn,
    IsNull,
    IsNotNull,
}

impl fmt::Display for QueryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryOperator::Equal => write!(f, "="),
            QueryOperator::In => write!(f, "IN"),
            QueryOperator::NotIn => write!(f, "NOT IN"),
            QueryOperator::IsNull => write!(f, "IS NULL"),
            QueryOperator::IsNotNull => write!(f, "IS NOT NULL"),
        }
    }
}

/// A column, optionally qualified by its table
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRef {
    pub table: Option<Identifier>,
    pub column: Identifier,
}

impl ColumnRef {
    pub fn qualified(table: &Identifier, column: &Identifier) -> Self {
        Self {
            table: Some(table.clone()),
            column: column.clone(),
        }
    }

    pub fn bare(column: &Identifier) -> Self {
        Self {
            table: None,
            column: column.clone(),
        }
    }
}

/// Where clause condition
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub column: ColumnRef,
    pub operator: QueryOperator,
    pub values: Vec<DatabaseValue>,
}

/// Join types
#[derive(Debug, Clone, PartialEq)]
pub enum JoinType {
    Inner,
    Left,
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinType::Inner => write!(f, "INNER JOIN"),
            JoinType::Left => write!(f, "LEFT JOIN"),
        }
    }
}

/// Join clause: `<join_type> table ON left = right`
#[derive(Debug, Clone, PartialEq)]
pub struct JoinClause {
    pub join_type: JoinType,
    pub table: Identifier,
    pub left: ColumnRef,
    pub right: ColumnRef,
}

/// What a select returns
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    /// `table.*`
    AllFrom(Identifier),
    Columns(Vec<ColumnRef>),
    /// `COUNT(*) AS count`
    Count,
}

/// Conflict handling for inserts
#[derive(Debug, Clone, PartialEq, Default)]
pub enum OnConflict {
    #[default]
    Fail,
    /// Skip rows that collide on the given key columns
    Ignore { target: Vec<Identifier> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectStatement {
    pub table: Identifier,
    pub projection: Projection,
    pub joins: Vec<JoinClause>,
    pub conditions: Vec<Condition>,
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertStatement {
    pub table: Identifier,
    pub columns: Vec<Identifier>,
    pub rows: Vec<Vec<DatabaseValue>>,
    pub on_conflict: OnConflict,
    pub returning: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStatement {
    pub table: Identifier,
    pub assignments: Vec<(Identifier, DatabaseValue)>,
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStatement {
    pub table: Identifier,
    pub conditions: Vec<Condition>,
}

/// A complete statement ready for a backend
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Select(SelectStatement),
    Insert(InsertStatement),
    Update(UpdateStatement),
    Delete(DeleteStatement),
}

impl Statement {
    /// The table the statement reads from or writes to
    pub fn table(&self) -> &Identifier {
        match self {
            Statement::Select(s) => &s.table,
            Statement::Insert(s) => &s.table,
            Statement::Update(s) => &s.table,
            Statement::Delete(s) => &s.table,
        }
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self, Statement::Select(_))
    }
}

impl From<SelectStatement> for Statement {
    fn from(statement: SelectStatement) -> Self {
        Statement::Select(statement)
    }
}

impl From<InsertStatement> for Statement {
    fn from(statement: InsertStatement) -> Self {
        Statement::Insert(statement)
    }
}

impl From<UpdateStatement> for Statement {
    fn from(statement: UpdateStatement) -> Self {
        Statement::Update(statement)
    }
}

impl From<DeleteStatement> for Statement {
    fn from(statement: DeleteStatement) -> Self {
        Statement::Delete(statement)
    }
}
