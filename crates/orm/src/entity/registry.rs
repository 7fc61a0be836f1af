//! Entity Registry - name to descriptor lookup shared by every relationship

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use once_cell::sync::Lazy;

use super::descriptor::EntityDescriptor;
use super::reference::EntityRef;
use crate::error::{OrmError, OrmResult};

static GLOBAL_REGISTRY: Lazy<Arc<EntityRegistry>> = Lazy::new(|| Arc::new(EntityRegistry::new()));

/// Thread-safe registry of entity descriptors keyed by logical name
#[derive(Debug, Default)]
pub struct EntityRegistry {
    entities: DashMap<String, Arc<EntityDescriptor>>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self {
            entities: DashMap::new(),
        }
    }

    /// Process-wide registry for applications that do not pass one around
    pub fn global() -> Arc<EntityRegistry> {
        GLOBAL_REGISTRY.clone()
    }

    /// Register a descriptor; a second registration under the same name fails
    pub fn register(&self, descriptor: EntityDescriptor) -> OrmResult<Arc<EntityDescriptor>> {
        match self.entities.entry(descriptor.name().to_string()) {
            Entry::Occupied(existing) => {
                Err(OrmError::DuplicateEntity(existing.key().clone()))
            }
            Entry::Vacant(slot) => {
                let descriptor = Arc::new(descriptor);
                slot.insert(descriptor.clone());
                tracing::debug!(entity = %descriptor.name(), table = %descriptor.table(), "registered entity");
                Ok(descriptor)
            }
        }
    }

    /// Register, replacing any descriptor of the same name
    pub fn register_or_replace(&self, descriptor: EntityDescriptor) -> Arc<EntityDescriptor> {
        let descriptor = Arc::new(descriptor);
        if self
            .entities
            .insert(descriptor.name().to_string(), descriptor.clone())
            .is_some()
        {
            tracing::warn!(entity = %descriptor.name(), "replaced registered entity");
        }
        descriptor
    }

    pub fn get(&self, name: &str) -> Option<Arc<EntityDescriptor>> {
        self.entities.get(name).map(|entry| entry.value().clone())
    }

    /// Look a name up, failing with a resolution error when it is unknown
    pub fn lookup(&self, name: &str) -> OrmResult<Arc<EntityDescriptor>> {
        self.get(name).ok_or_else(|| OrmError::Resolution {
            name: name.to_string(),
        })
    }

    pub fn resolve(&self, reference: &EntityRef) -> OrmResult<Arc<EntityDescriptor>> {
        match reference {
            EntityRef::Descriptor(descriptor) => Ok(descriptor.clone()),
            EntityRef::Name(name) => self.lookup(name),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entities.contains_key(name)
    }

    pub fn unregister(&self, name: &str) -> Option<Arc<EntityDescriptor>> {
        self.entities.remove(name).map(|(_, descriptor)| descriptor)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entities.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(name: &str) -> EntityDescriptor {
        EntityDescriptor::builder(name).build().unwrap()
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = EntityRegistry::new();
        registry.register(descriptor("Post")).unwrap();

        assert!(registry.contains("Post"));
        assert_eq!(registry.lookup("Post").unwrap().table().as_str(), "post");
        assert_eq!(registry.names(), vec!["Post".to_string()]);
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let registry = EntityRegistry::new();
        registry.register(descriptor("Post")).unwrap();

        match registry.register(descriptor("Post")) {
            Err(OrmError::DuplicateEntity(name)) => assert_eq!(name, "Post"),
            other => panic!("expected DuplicateEntity, got {:?}", other),
        }

        let replaced = registry.register_or_replace(
            EntityDescriptor::builder("Post").table("posts").build().unwrap(),
        );
        assert_eq!(replaced.table().as_str(), "posts");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unknown_name_is_resolution_error() {
        let registry = EntityRegistry::new();
        match registry.resolve(&EntityRef::from("Tag")) {
            Err(OrmError::Resolution { name }) => assert_eq!(name, "Tag"),
            other => panic!("expected Resolution, got {:?}", other),
        }
    }

    #[test]
    fn test_descriptor_reference_bypasses_registry() {
        let registry = EntityRegistry::new();
        let reference = EntityRef::from(descriptor("Tag"));
        assert_eq!(registry.resolve(&reference).unwrap().name(), "Tag");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_global_registry_is_shared() {
        let a = EntityRegistry::global();
        let b = EntityRegistry::global();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
