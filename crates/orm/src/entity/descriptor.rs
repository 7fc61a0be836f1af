//! Entity descriptors: logical name, table, key and attribute-to-column map

use crate::error::{OrmError, OrmResult};
use crate::query::{ColumnRef, Condition};
use crate::security::Identifier;

/// Everything the core needs to know about one entity type
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDescriptor {
    name: String,
    table: Identifier,
    primary_key: String,
    primary_key_column: Identifier,
    attributes: Vec<(String, Identifier)>,
    soft_delete_column: Option<Identifier>,
}

impl EntityDescriptor {
    pub fn builder(name: impl Into<String>) -> EntityDescriptorBuilder {
        EntityDescriptorBuilder {
            name: name.into(),
            table: None,
            primary_key: "id".to_string(),
            attributes: Vec::new(),
            soft_delete_column: None,
        }
    }

    /// Logical name used for registry lookups
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &Identifier {
        &self.table
    }

    /// Primary key attribute name
    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    pub fn primary_key_column(&self) -> &Identifier {
        &self.primary_key_column
    }

    pub fn soft_delete_column(&self) -> Option<&Identifier> {
        self.soft_delete_column.as_ref()
    }

    /// Declared attributes with their columns, in declaration order
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &Identifier)> {
        self.attributes.iter().map(|(a, c)| (a.as_str(), c))
    }

    /// Default foreign key naming: `lower(name) + "_id"`
    pub fn foreign_key_name(&self) -> String {
        format!("{}_id", self.name.to_lowercase())
    }

    /// Column for a key attribute named in a relationship declaration.
    ///
    /// Declared attributes use their mapped column; anything else must itself
    /// be a valid identifier.
    pub fn column_for(&self, attribute: &str) -> OrmResult<Identifier> {
        match self.declared_column(attribute) {
            Some(column) => Ok(column.clone()),
            None => Identifier::parse(attribute),
        }
    }

    /// Column for an attribute supplied at call time; it must be declared
    pub fn require_column(&self, attribute: &str) -> OrmResult<Identifier> {
        self.declared_column(attribute).cloned().ok_or_else(|| {
            OrmError::injection_risk(
                attribute,
                format!("not a declared attribute of {}", self.name),
            )
        })
    }

    fn declared_column(&self, attribute: &str) -> Option<&Identifier> {
        self.attributes
            .iter()
            .find(|(a, _)| a == attribute)
            .map(|(_, c)| c)
    }

    /// Predicates every read of this entity must carry (soft-delete filter)
    pub fn scope_conditions(&self) -> Vec<Condition> {
        self.soft_delete_column
            .iter()
            .map(|column| Condition::is_null(ColumnRef::qualified(&self.table, column)))
            .collect()
    }
}

/// Builder for [`EntityDescriptor`]; validation happens in [`build`](Self::build)
#[derive(Debug, Clone)]
pub struct EntityDescriptorBuilder {
    name: String,
    table: Option<String>,
    primary_key: String,
    attributes: Vec<(String, String)>,
    soft_delete_column: Option<String>,
}

impl EntityDescriptorBuilder {
    /// Table name; defaults to the lowercased entity name
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn primary_key(mut self, attribute: impl Into<String>) -> Self {
        self.primary_key = attribute.into();
        self
    }

    /// Attribute stored in a column of the same name
    pub fn attribute(self, attribute: impl Into<String>) -> Self {
        let attribute = attribute.into();
        let column = attribute.clone();
        self.attribute_column(attribute, column)
    }

    pub fn attribute_column(mut self, attribute: impl Into<String>, column: impl Into<String>) -> Self {
        let attribute = attribute.into();
        let column = column.into();
        match self.attributes.iter_mut().find(|(a, _)| *a == attribute) {
            Some(existing) => existing.1 = column,
            None => self.attributes.push((attribute, column)),
        }
        self
    }

    /// Rows with a non-null value in `column` are treated as deleted
    pub fn soft_deletes(mut self, column: impl Into<String>) -> Self {
        self.soft_delete_column = Some(column.into());
        self
    }

    pub fn build(self) -> OrmResult<EntityDescriptor> {
        if self.name.trim().is_empty() {
            return Err(OrmError::Configuration(
                "entity name cannot be empty".to_string(),
            ));
        }

        let table = match &self.table {
            Some(table) => Identifier::parse(table)?,
            None => Identifier::parse(&self.name.to_lowercase())?,
        };

        let mut attributes = Vec::with_capacity(self.attributes.len() + 1);
        for (attribute, column) in &self.attributes {
            attributes.push((attribute.clone(), Identifier::parse(column)?));
        }

        let primary_key_column = match attributes.iter().find(|(a, _)| *a == self.primary_key) {
            Some((_, column)) => column.clone(),
            None => {
                let column = Identifier::parse(&self.primary_key)?;
                attributes.insert(0, (self.primary_key.clone(), column.clone()));
                column
            }
        };

        let soft_delete_column = self
            .soft_delete_column
            .as_deref()
            .map(Identifier::parse)
            .transpose()?;

        Ok(EntityDescriptor {
            name: self.name,
            table,
            primary_key: self.primary_key,
            primary_key_column,
            attributes,
            soft_delete_column,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let post = EntityDescriptor::builder("Post").build().unwrap();
        assert_eq!(post.table().as_str(), "post");
        assert_eq!(post.primary_key(), "id");
        assert_eq!(post.primary_key_column().as_str(), "id");
        assert_eq!(post.foreign_key_name(), "post_id");
        assert!(post.scope_conditions().is_empty());
    }

    #[test]
    fn test_attribute_column_mapping() {
        let user = EntityDescriptor::builder("User")
            .table("users")
            .primary_key("uid")
            .attribute_column("uid", "user_uid")
            .attribute("email")
            .build()
            .unwrap();

        assert_eq!(user.primary_key_column().as_str(), "user_uid");
        assert_eq!(user.column_for("uid").unwrap().as_str(), "user_uid");
        assert_eq!(user.require_column("email").unwrap().as_str(), "email");
        assert!(matches!(
            user.require_column("password"),
            Err(OrmError::InjectionRisk { .. })
        ));
    }

    #[test]
    fn test_invalid_names_are_rejected_at_build() {
        assert!(EntityDescriptor::builder("Post").table("post; DROP").build().is_err());
        assert!(EntityDescriptor::builder("Post")
            .attribute_column("title", "title--")
            .build()
            .is_err());
        assert!(EntityDescriptor::builder("Post").soft_deletes("deleted at").build().is_err());
        assert!(EntityDescriptor::builder("  ").build().is_err());
    }

    #[test]
    fn test_soft_delete_scope() {
        let post = EntityDescriptor::builder("Post")
            .soft_deletes("deleted_at")
            .build()
            .unwrap();
        let conditions = post.scope_conditions();
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].column.column.as_str(), "deleted_at");
    }
}
