//! Entities
//!
//! An entity type is known to the core only through its [`EntityDescriptor`]
//! (registered by name) and, at runtime, through instances implementing
//! [`Entity`] so relationship code can read key attributes.

pub mod descriptor;
pub mod reference;
pub mod registry;

pub use descriptor::{EntityDescriptor, EntityDescriptorBuilder};
pub use reference::{EntityRef, LazyEntity};
pub use registry::EntityRegistry;

use crate::backends::{DatabaseValue, Record};
use crate::error::OrmResult;

/// A persisted (or to-be-persisted) entity instance
pub trait Entity: Send + Sync {
    /// Logical name the entity is registered under
    fn entity_name(&self) -> &str;

    /// Current value of an attribute; `None` when the entity has no such attribute
    fn attribute(&self, name: &str) -> Option<DatabaseValue>;

    /// Attributes to write when the entity is inserted
    fn attributes(&self) -> Vec<(String, DatabaseValue)> {
        Vec::new()
    }
}

/// Conversion from a result row
pub trait FromRow: Sized {
    fn from_row(record: &Record) -> OrmResult<Self>;
}

impl FromRow for Record {
    fn from_row(record: &Record) -> OrmResult<Self> {
        Ok(record.clone())
    }
}

/// An entity instance backed by a plain [`Record`]
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecord {
    name: String,
    record: Record,
}

impl EntityRecord {
    pub fn new(name: impl Into<String>, record: Record) -> Self {
        Self {
            name: name.into(),
            record,
        }
    }

    pub fn record(&self) -> &Record {
        &self.record
    }
}

impl Entity for EntityRecord {
    fn entity_name(&self) -> &str {
        &self.name
    }

    fn attribute(&self, name: &str) -> Option<DatabaseValue> {
        self.record.get_value(name).cloned()
    }

    fn attributes(&self) -> Vec<(String, DatabaseValue)> {
        self.record
            .iter()
            .map(|(column, value)| (column.to_string(), value.clone()))
            .collect()
    }
}
