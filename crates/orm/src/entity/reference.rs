//! Entity references and their lazily resolved form

use std::sync::Arc;

use once_cell::sync::OnceCell;

use super::descriptor::EntityDescriptor;
use super::registry::EntityRegistry;
use crate::error::OrmResult;

/// How a relationship names its target: directly, or by a name looked up later
#[derive(Debug, Clone)]
pub enum EntityRef {
    Descriptor(Arc<EntityDescriptor>),
    Name(String),
}

impl EntityRef {
    pub fn name(&self) -> &str {
        match self {
            EntityRef::Descriptor(descriptor) => descriptor.name(),
            EntityRef::Name(name) => name,
        }
    }
}

impl From<&str> for EntityRef {
    fn from(name: &str) -> Self {
        EntityRef::Name(name.to_string())
    }
}

impl From<String> for EntityRef {
    fn from(name: String) -> Self {
        EntityRef::Name(name)
    }
}

impl From<Arc<EntityDescriptor>> for EntityRef {
    fn from(descriptor: Arc<EntityDescriptor>) -> Self {
        EntityRef::Descriptor(descriptor)
    }
}

impl From<EntityDescriptor> for EntityRef {
    fn from(descriptor: EntityDescriptor) -> Self {
        EntityRef::Descriptor(Arc::new(descriptor))
    }
}

/// An [`EntityRef`] that remembers its first successful resolution.
///
/// Failures are not cached, so registering the entity later makes the next
/// resolution succeed. Concurrent first resolutions may both look the name up;
/// one result wins and both are identical.
#[derive(Debug, Clone)]
pub struct LazyEntity {
    reference: EntityRef,
    resolved: OnceCell<Arc<EntityDescriptor>>,
}

impl LazyEntity {
    pub fn new(reference: impl Into<EntityRef>) -> Self {
        let reference = reference.into();
        let resolved = OnceCell::new();
        if let EntityRef::Descriptor(descriptor) = &reference {
            let _ = resolved.set(descriptor.clone());
        }
        Self {
            reference,
            resolved,
        }
    }

    pub fn reference(&self) -> &EntityRef {
        &self.reference
    }

    pub fn name(&self) -> &str {
        self.reference.name()
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.get().is_some()
    }

    pub fn resolve(&self, registry: &EntityRegistry) -> OrmResult<&Arc<EntityDescriptor>> {
        self.resolved
            .get_or_try_init(|| registry.resolve(&self.reference))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OrmError;

    #[test]
    fn test_descriptor_reference_is_resolved_immediately() {
        let lazy = LazyEntity::new(EntityDescriptor::builder("Tag").build().unwrap());
        assert!(lazy.is_resolved());
    }

    #[test]
    fn test_failed_resolution_is_not_cached() {
        let registry = EntityRegistry::new();
        let lazy = LazyEntity::new("Tag");

        assert!(matches!(
            lazy.resolve(&registry),
            Err(OrmError::Resolution { .. })
        ));
        assert!(!lazy.is_resolved());

        registry
            .register(EntityDescriptor::builder("Tag").build().unwrap())
            .unwrap();
        assert_eq!(lazy.resolve(&registry).unwrap().name(), "Tag");
        assert!(lazy.is_resolved());
    }

    #[test]
    fn test_successful_resolution_is_cached() {
        let registry = EntityRegistry::new();
        registry
            .register(EntityDescriptor::builder("Tag").build().unwrap())
            .unwrap();
        let lazy = LazyEntity::new("Tag");
        let first = lazy.resolve(&registry).unwrap().clone();

        registry.unregister("Tag");
        let second = lazy.resolve(&registry).unwrap();
        assert!(Arc::ptr_eq(&first, second));
    }
}
