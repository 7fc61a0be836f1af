//! Statement Builders - fluent construction of structured statements

use super::types::*;
use crate::backends::DatabaseValue;
use crate::error::{OrmError, OrmResult};
use crate::security::Identifier;

impl Condition {
    pub fn eq(column: ColumnRef, value: impl Into<DatabaseValue>) -> Self {
        Self {
            column,
            operator: QueryOperator::Equal,
            values: vec![value.into()],
        }
    }

    pub fn is_in(column: ColumnRef, values: Vec<DatabaseValue>) -> Self {
        Self {
            column,
            operator: QueryOperator::In,
            values,
        }
    }

    pub fn not_in(column: ColumnRef, values: Vec<DatabaseValue>) -> Self {
        Self {
            column,
            operator: QueryOperator::NotIn,
            values,
        }
    }

    pub fn is_null(column: ColumnRef) -> Self {
        Self {
            column,
            operator: QueryOperator::IsNull,
            values: Vec::new(),
        }
    }

    pub fn is_not_null(column: ColumnRef) -> Self {
        Self {
            column,
            operator: QueryOperator::IsNotNull,
            values: Vec::new(),
        }
    }
}

impl SelectStatement {
    /// `SELECT table.* FROM table`
    pub fn from(table: &Identifier) -> Self {
        Self {
            table: table.clone(),
            projection: Projection::AllFrom(table.clone()),
            joins: Vec::new(),
            conditions: Vec::new(),
            limit: None,
        }
    }

    pub fn columns(mut self, columns: Vec<ColumnRef>) -> Self {
        self.projection = Projection::Columns(columns);
        self
    }

    pub fn count(mut self) -> Self {
        self.projection = Projection::Count;
        self
    }

    pub fn inner_join(mut self, table: &Identifier, left: ColumnRef, right: ColumnRef) -> Self {
        self.joins.push(JoinClause {
            join_type: JoinType::Inner,
            table: table.clone(),
            left,
            right,
        });
        self
    }

    pub fn filter(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn filters(mut self, conditions: impl IntoIterator<Item = Condition>) -> Self {
        self.conditions.extend(conditions);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

impl InsertStatement {
    pub fn into_table(table: &Identifier, columns: Vec<Identifier>) -> Self {
        Self {
            table: table.clone(),
            columns,
            rows: Vec::new(),
            on_conflict: OnConflict::Fail,
            returning: false,
        }
    }

    /// Append a row; its arity must match the column list
    pub fn row(mut self, values: Vec<DatabaseValue>) -> OrmResult<Self> {
        if values.len() != self.columns.len() {
            return Err(OrmError::UnsupportedStatement(format!(
                "insert into {} has {} columns but row has {} values",
                self.table,
                self.columns.len(),
                values.len()
            )));
        }
        self.rows.push(values);
        Ok(self)
    }

    pub fn on_conflict_ignore(mut self, target: Vec<Identifier>) -> Self {
        self.on_conflict = OnConflict::Ignore { target };
        self
    }

    pub fn returning(mut self) -> Self {
        self.returning = true;
        self
    }
}

impl UpdateStatement {
    pub fn table(table: &Identifier) -> Self {
        Self {
            table: table.clone(),
            assignments: Vec::new(),
            conditions: Vec::new(),
        }
    }

    pub fn set(mut self, column: &Identifier, value: impl Into<DatabaseValue>) -> Self {
        self.assignments.push((column.clone(), value.into()));
        self
    }

    pub fn filter(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }
}

impl DeleteStatement {
    pub fn from(table: &Identifier) -> Self {
        Self {
            table: table.clone(),
            conditions: Vec::new(),
        }
    }

    pub fn filter(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(name: &str) -> Identifier {
        Identifier::parse(name).unwrap()
    }

    #[test]
    fn test_insert_row_arity_is_checked() {
        let insert = InsertStatement::into_table(&ident("post_tag"), vec![ident("post_id"), ident("tag_id")]);
        assert!(insert.clone().row(vec![1.into(), 10.into()]).is_ok());
        assert!(insert.row(vec![1.into()]).is_err());
    }

    #[test]
    fn test_select_builder_accumulates_conditions() {
        let table = ident("tag");
        let select = SelectStatement::from(&table)
            .filter(Condition::eq(ColumnRef::bare(&ident("id")), 1))
            .filter(Condition::is_null(ColumnRef::bare(&ident("deleted_at"))))
            .limit(1);

        assert_eq!(select.conditions.len(), 2);
        assert_eq!(select.limit, Some(1));
        assert_eq!(select.projection, Projection::AllFrom(table));
    }
}
