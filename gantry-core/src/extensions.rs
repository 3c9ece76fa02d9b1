//! Typed attachment bag for a request.
//!
//! Values are keyed by their Rust type, so two stages can only share a slot
//! by agreeing on a type. There are no string keys to collide on.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// Type-keyed storage
#[derive(Clone, Default)]
pub struct Extensions {
    map: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Extensions {
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    /// Insert a value, replacing any previous value of the same type
    pub fn insert<T: Send + Sync + 'static>(&mut self, value: T) {
        self.map.insert(TypeId::of::<T>(), Arc::new(value));
    }

    /// Get a reference to a typed value
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|arc| arc.downcast_ref::<T>())
    }

    /// Get a shared handle to a typed value
    pub fn get_arc<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|arc| arc.clone().downcast::<T>().ok())
    }

    pub fn contains<T: Send + Sync + 'static>(&self) -> bool {
        self.map.contains_key(&TypeId::of::<T>())
    }

    /// Remove a typed value, returning true if it existed
    pub fn remove<T: Send + Sync + 'static>(&mut self) -> bool {
        self.map.remove(&TypeId::of::<T>()).is_some()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl std::fmt::Debug for Extensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extensions")
            .field("count", &self.map.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct TenantId(u32);

    #[test]
    fn test_insert_and_get() {
        let mut ext = Extensions::new();
        ext.insert(TenantId(7));

        assert_eq!(ext.get::<TenantId>(), Some(&TenantId(7)));
        assert_eq!(ext.get::<String>(), None);
    }

    #[test]
    fn test_insert_replaces() {
        let mut ext = Extensions::new();
        ext.insert(TenantId(1));
        ext.insert(TenantId(2));

        assert_eq!(ext.len(), 1);
        assert_eq!(ext.get_arc::<TenantId>().map(|t| t.0), Some(2));
    }

    #[test]
    fn test_remove() {
        let mut ext = Extensions::new();
        ext.insert(TenantId(1));

        assert!(ext.remove::<TenantId>());
        assert!(!ext.contains::<TenantId>());
        assert!(!ext.remove::<TenantId>());
    }
}
