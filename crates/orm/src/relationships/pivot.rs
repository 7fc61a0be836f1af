//! Pivot (join-table) shape for many-to-many relationships
//!
//! Every identifier here comes from entity descriptors or from the
//! relationship declaration. Nothing supplied to attach/detach at call time
//! can become a table or column name.

use chrono::Utc;

use crate::backends::DatabaseValue;
use crate::entity::EntityDescriptor;
use crate::error::{OrmError, OrmResult};
use crate::security::Identifier;

/// Pivot options given when a many-to-many relationship is declared
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PivotConfig {
    /// Explicit pivot table name
    pub table: Option<String>,

    /// Pivot column holding the source entity's key
    pub foreign_key: Option<String>,

    /// Pivot column holding the target entity's key
    pub related_key: Option<String>,

    /// Target attribute the pivot's related key refers to (default: its primary key)
    pub related_local_key: Option<String>,

    /// Extra pivot columns callers may fill on attach
    pub additional_columns: Vec<String>,

    /// Maintain `created_at`/`updated_at` on pivot rows
    pub with_timestamps: bool,
}

/// Validated pivot table shape
#[derive(Debug, Clone, PartialEq)]
pub struct PivotDescriptor {
    table: Identifier,
    source_key: Identifier,
    target_key: Identifier,
    extra_columns: Vec<Identifier>,
    with_timestamps: bool,
}

/// Order-independent pivot table name: the two table names sorted and joined by `_`
pub fn pivot_table_name(a: &str, b: &str) -> String {
    let mut tables = [a, b];
    tables.sort_unstable();
    tables.join("_")
}

const CREATED_AT: &str = "created_at";
const UPDATED_AT: &str = "updated_at";

impl PivotDescriptor {
    /// Derive the pivot for `source` → `target`, honouring explicit configuration
    pub fn derive(
        source: &EntityDescriptor,
        target: &EntityDescriptor,
        config: &PivotConfig,
    ) -> OrmResult<Self> {
        let table = match &config.table {
            Some(table) => Identifier::parse(table)?,
            None => Identifier::parse(&pivot_table_name(
                source.table().as_str(),
                target.table().as_str(),
            ))?,
        };

        let source_key = match &config.foreign_key {
            Some(key) => Identifier::parse(key)?,
            None => Identifier::parse(&source.foreign_key_name())?,
        };
        let target_key = match &config.related_key {
            Some(key) => Identifier::parse(key)?,
            None => Identifier::parse(&target.foreign_key_name())?,
        };

        if source_key == target_key {
            return Err(OrmError::Configuration(format!(
                "pivot {} uses '{}' for both sides; declare foreign_key and related_key explicitly",
                table, source_key
            )));
        }

        let mut extra_columns = Vec::with_capacity(config.additional_columns.len());
        for column in &config.additional_columns {
            let column = Identifier::parse(column)?;
            if column == source_key || column == target_key {
                return Err(OrmError::Configuration(format!(
                    "extra pivot column '{}' collides with a key column",
                    column
                )));
            }
            extra_columns.push(column);
        }

        Ok(Self {
            table,
            source_key,
            target_key,
            extra_columns,
            with_timestamps: config.with_timestamps,
        })
    }

    pub fn table(&self) -> &Identifier {
        &self.table
    }

    pub fn source_key(&self) -> &Identifier {
        &self.source_key
    }

    pub fn target_key(&self) -> &Identifier {
        &self.target_key
    }

    pub fn extra_columns(&self) -> &[Identifier] {
        &self.extra_columns
    }

    pub fn with_timestamps(&self) -> bool {
        self.with_timestamps
    }

    /// Map caller-supplied extra data onto declared columns.
    ///
    /// Unknown names are rejected, so call-time input never names a column.
    pub fn extra_assignments(
        &self,
        extra: &[(&str, DatabaseValue)],
    ) -> OrmResult<Vec<(Identifier, DatabaseValue)>> {
        let mut assignments: Vec<(Identifier, DatabaseValue)> = Vec::with_capacity(extra.len() + 2);
        for (name, value) in extra {
            let column = self
                .extra_columns
                .iter()
                .find(|c| c.as_str() == *name)
                .ok_or_else(|| {
                    OrmError::injection_risk(
                        *name,
                        format!("not a declared extra column of pivot {}", self.table),
                    )
                })?;
            match assignments.iter_mut().find(|(c, _)| c == column) {
                Some(existing) => existing.1 = value.clone(),
                None => assignments.push((column.clone(), value.clone())),
            }
        }

        if self.with_timestamps {
            let now = DatabaseValue::DateTime(Utc::now());
            for name in [CREATED_AT, UPDATED_AT] {
                let column = Identifier::parse(name)?;
                if !assignments.iter().any(|(c, _)| *c == column) {
                    assignments.push((column, now.clone()));
                }
            }
        }

        Ok(assignments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(name: &str) -> EntityDescriptor {
        EntityDescriptor::builder(name).build().unwrap()
    }

    #[test]
    fn test_pivot_table_name_is_order_independent() {
        assert_eq!(pivot_table_name("post", "tag"), "post_tag");
        assert_eq!(pivot_table_name("tag", "post"), "post_tag");
        assert_eq!(pivot_table_name("users", "roles"), "roles_users");
    }

    #[test]
    fn test_derived_pivot() {
        let pivot = PivotDescriptor::derive(&entity("Post"), &entity("Tag"), &PivotConfig::default())
            .unwrap();
        assert_eq!(pivot.table().as_str(), "post_tag");
        assert_eq!(pivot.source_key().as_str(), "post_id");
        assert_eq!(pivot.target_key().as_str(), "tag_id");

        let inverse = PivotDescriptor::derive(&entity("Tag"), &entity("Post"), &PivotConfig::default())
            .unwrap();
        assert_eq!(inverse.table(), pivot.table());
        assert_eq!(inverse.source_key().as_str(), "tag_id");
    }

    #[test]
    fn test_explicit_configuration_is_validated() {
        let config = PivotConfig {
            table: Some("post_tag; DROP TABLE post".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            PivotDescriptor::derive(&entity("Post"), &entity("Tag"), &config),
            Err(OrmError::InjectionRisk { .. })
        ));

        let config = PivotConfig {
            related_key: Some("tag id".to_string()),
            ..Default::default()
        };
        assert!(PivotDescriptor::derive(&entity("Post"), &entity("Tag"), &config).is_err());
    }

    #[test]
    fn test_self_referential_pivot_needs_explicit_keys() {
        let user = entity("User");
        assert!(matches!(
            PivotDescriptor::derive(&user, &user, &PivotConfig::default()),
            Err(OrmError::Configuration(_))
        ));

        let config = PivotConfig {
            table: Some("friendships".to_string()),
            foreign_key: Some("user_id".to_string()),
            related_key: Some("friend_id".to_string()),
            ..Default::default()
        };
        let pivot = PivotDescriptor::derive(&user, &user, &config).unwrap();
        assert_eq!(pivot.target_key().as_str(), "friend_id");
    }

    #[test]
    fn test_undeclared_extra_column_is_injection_risk() {
        let config = PivotConfig {
            additional_columns: vec!["role".to_string()],
            ..Default::default()
        };
        let pivot = PivotDescriptor::derive(&entity("User"), &entity("Team"), &config).unwrap();

        let assignments = pivot.extra_assignments(&[("role", "owner".into())]).unwrap();
        assert_eq!(assignments.len(), 1);

        assert!(matches!(
            pivot.extra_assignments(&[("role = 'x'; --", "owner".into())]),
            Err(OrmError::InjectionRisk { .. })
        ));
    }

    #[test]
    fn test_timestamps_are_added() {
        let config = PivotConfig {
            with_timestamps: true,
            ..Default::default()
        };
        let pivot = PivotDescriptor::derive(&entity("Post"), &entity("Tag"), &config).unwrap();
        let columns: Vec<String> = pivot
            .extra_assignments(&[])
            .unwrap()
            .into_iter()
            .map(|(c, _)| c.to_string())
            .collect();
        assert_eq!(columns, vec!["created_at", "updated_at"]);
    }
}
