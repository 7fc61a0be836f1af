//! SQL generation for structured statements
//!
//! Identifiers are quoted for the target dialect; values are never written
//! into the SQL text and come back as the ordered parameter list.

use super::types::*;
use crate::backends::{DatabaseValue, SqlDialect};
use crate::error::{OrmError, OrmResult};

struct SqlWriter {
    dialect: SqlDialect,
    sql: String,
    params: Vec<DatabaseValue>,
}

impl SqlWriter {
    fn new(dialect: SqlDialect) -> Self {
        Self {
            dialect,
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn push(&mut self, text: &str) {
        self.sql.push_str(text);
    }

    fn push_identifier(&mut self, identifier: &crate::security::Identifier) {
        let quoted = identifier.quoted(self.dialect.identifier_quote());
        self.sql.push_str(&quoted);
    }

    fn push_column(&mut self, column: &ColumnRef) {
        if let Some(table) = &column.table {
            self.push_identifier(table);
            self.sql.push('.');
        }
        self.push_identifier(&column.column);
    }

    fn bind(&mut self, value: &DatabaseValue) {
        let placeholder = self.dialect.parameter_placeholder(self.params.len());
        self.sql.push_str(&placeholder);
        self.params.push(value.clone());
    }

    fn bind_list(&mut self, values: &[DatabaseValue]) {
        self.sql.push('(');
        for (i, value) in values.iter().enumerate() {
            if i > 0 {
                self.sql.push_str(", ");
            }
            self.bind(value);
        }
        self.sql.push(')');
    }

    fn push_conditions(&mut self, conditions: &[Condition]) -> OrmResult<()> {
        if conditions.is_empty() {
            return Ok(());
        }

        self.push(" WHERE ");
        for (i, condition) in conditions.iter().enumerate() {
            if i > 0 {
                self.push(" AND ");
            }
            self.push_condition(condition)?;
        }
        Ok(())
    }

    fn push_condition(&mut self, condition: &Condition) -> OrmResult<()> {
        match condition.operator {
            QueryOperator::Equal => {
                let value = condition.values.first().ok_or_else(|| {
                    OrmError::UnsupportedStatement(format!(
                        "equality on {} has no value",
                        condition.column.column
                    ))
                })?;
                self.push_column(&condition.column);
                self.push(" = ");
                self.bind(value);
            }
            // An empty list matches nothing (IN) or everything (NOT IN)
            QueryOperator::In if condition.values.is_empty() => self.push("1 = 0"),
            QueryOperator::NotIn if condition.values.is_empty() => self.push("1 = 1"),
            QueryOperator::In | QueryOperator::NotIn => {
                self.push_column(&condition.column);
                self.push(&format!(" {} ", condition.operator));
                self.bind_list(&condition.values);
            }
            QueryOperator::IsNull | QueryOperator::IsNotNull => {
                self.push_column(&condition.column);
                self.push(&format!(" {}", condition.operator));
            }
        }
        Ok(())
    }

    fn finish(self) -> (String, Vec<DatabaseValue>) {
        (self.sql, self.params)
    }
}

impl Statement {
    /// Render to SQL text plus the parameters to bind, in order
    pub fn to_sql(&self, dialect: SqlDialect) -> OrmResult<(String, Vec<DatabaseValue>)> {
        match self {
            Statement::Select(select) => build_select_sql(select, dialect),
            Statement::Insert(insert) => build_insert_sql(insert, dialect),
            Statement::Update(update) => build_update_sql(update, dialect),
            Statement::Delete(delete) => build_delete_sql(delete, dialect),
        }
    }
}

fn build_select_sql(
    select: &SelectStatement,
    dialect: SqlDialect,
) -> OrmResult<(String, Vec<DatabaseValue>)> {
    let mut w = SqlWriter::new(dialect);

    w.push("SELECT ");
    match &select.projection {
        Projection::AllFrom(table) => {
            w.push_identifier(table);
            w.push(".*");
        }
        Projection::Columns(columns) => {
            if columns.is_empty() {
                return Err(OrmError::UnsupportedStatement(
                    "select with an empty column list".to_string(),
                ));
            }
            for (i, column) in columns.iter().enumerate() {
                if i > 0 {
                    w.push(", ");
                }
                w.push_column(column);
            }
        }
        Projection::Count => w.push("COUNT(*) AS count"),
    }

    w.push(" FROM ");
    w.push_identifier(&select.table);

    for join in &select.joins {
        w.push(&format!(" {} ", join.join_type));
        w.push_identifier(&join.table);
        w.push(" ON ");
        w.push_column(&join.left);
        w.push(" = ");
        w.push_column(&join.right);
    }

    w.push_conditions(&select.conditions)?;

    if let Some(limit) = select.limit {
        w.push(&format!(" LIMIT {}", limit));
    }

    Ok(w.finish())
}

fn build_insert_sql(
    insert: &InsertStatement,
    dialect: SqlDialect,
) -> OrmResult<(String, Vec<DatabaseValue>)> {
    if insert.rows.is_empty() || insert.columns.is_empty() {
        return Err(OrmError::UnsupportedStatement(format!(
            "insert into {} without values",
            insert.table
        )));
    }

    let mut w = SqlWriter::new(dialect);

    let ignore = matches!(insert.on_conflict, OnConflict::Ignore { .. });
    if ignore && dialect == SqlDialect::MySQL {
        w.push("INSERT IGNORE INTO ");
    } else {
        w.push("INSERT INTO ");
    }
    w.push_identifier(&insert.table);

    w.push(" (");
    for (i, column) in insert.columns.iter().enumerate() {
        if i > 0 {
            w.push(", ");
        }
        w.push_identifier(column);
    }
    w.push(") VALUES ");

    for (i, row) in insert.rows.iter().enumerate() {
        if i > 0 {
            w.push(", ");
        }
        w.bind_list(row);
    }

    if let OnConflict::Ignore { target } = &insert.on_conflict {
        if dialect != SqlDialect::MySQL {
            w.push(" ON CONFLICT");
            if !target.is_empty() {
                w.push(" (");
                for (i, column) in target.iter().enumerate() {
                    if i > 0 {
                        w.push(", ");
                    }
                    w.push_identifier(column);
                }
                w.push(")");
            }
            w.push(" DO NOTHING");
        }
    }

    if insert.returning {
        if !dialect.supports_returning() {
            return Err(OrmError::UnsupportedStatement(format!(
                "{:?} does not support RETURNING",
                dialect
            )));
        }
        w.push(" RETURNING *");
    }

    Ok(w.finish())
}

fn build_update_sql(
    update: &UpdateStatement,
    dialect: SqlDialect,
) -> OrmResult<(String, Vec<DatabaseValue>)> {
    if update.assignments.is_empty() {
        return Err(OrmError::UnsupportedStatement(format!(
            "update of {} without assignments",
            update.table
        )));
    }

    let mut w = SqlWriter::new(dialect);
    w.push("UPDATE ");
    w.push_identifier(&update.table);
    w.push(" SET ");
    for (i, (column, value)) in update.assignments.iter().enumerate() {
        if i > 0 {
            w.push(", ");
        }
        w.push_identifier(column);
        w.push(" = ");
        w.bind(value);
    }
    w.push_conditions(&update.conditions)?;

    Ok(w.finish())
}

fn build_delete_sql(
    delete: &DeleteStatement,
    dialect: SqlDialect,
) -> OrmResult<(String, Vec<DatabaseValue>)> {
    let mut w = SqlWriter::new(dialect);
    w.push("DELETE FROM ");
    w.push_identifier(&delete.table);
    w.push_conditions(&delete.conditions)?;

    Ok(w.finish())
}
