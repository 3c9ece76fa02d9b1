//! Declaration-time metadata attached to handlers and controllers.
//!
//! Metadata is written through a [`MetadataStoreBuilder`] during startup and
//! frozen into an immutable [`MetadataStore`] before the first request is
//! dispatched. Reads at dispatch time need no locking.
//!
//! Missing keys are not errors; callers decide the default (for example,
//! no [`ROLES`] entry means "no role restriction").

use crate::Error;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// What a metadata entry is attached to
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Subject {
    /// A single handler, by handler id
    Handler(String),
    /// A controller (class-level) by name
    Class(String),
}

impl Subject {
    pub fn handler(id: impl Into<String>) -> Self {
        Subject::Handler(id.into())
    }

    pub fn class(name: impl Into<String>) -> Self {
        Subject::Class(name.into())
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Handler(id) => write!(f, "handler:{}", id),
            Subject::Class(name) => write!(f, "class:{}", name),
        }
    }
}

/// Typed metadata key
pub struct MetadataKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> MetadataKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for MetadataKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for MetadataKey<T> {}

impl<T> fmt::Debug for MetadataKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MetadataKey({})", self.name)
    }
}

/// Roles required to reach a handler
pub const ROLES: MetadataKey<Vec<String>> = MetadataKey::new("roles");

/// Explicit response status code
pub const HTTP_CODE: MetadataKey<u16> = MetadataKey::new("http_code");

/// Marks a handler as reachable without authentication
pub const PUBLIC: MetadataKey<bool> = MetadataKey::new("public");

/// Extra response headers
pub const HEADERS: MetadataKey<Vec<(String, String)>> = MetadataKey::new("headers");

type Entries = HashMap<(Subject, &'static str), Arc<dyn Any + Send + Sync>>;

/// Collects metadata during startup
#[derive(Default)]
pub struct MetadataStoreBuilder {
    entries: Entries,
}

impl MetadataStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a value; each (subject, key) pair may be written once
    pub fn set<T: Send + Sync + 'static>(
        &mut self,
        subject: Subject,
        key: MetadataKey<T>,
        value: T,
    ) -> Result<&mut Self, Error> {
        let slot = (subject, key.name);
        if self.entries.contains_key(&slot) {
            return Err(Error::DuplicateMetadata(format!(
                "'{}' already set on {}",
                key.name, slot.0
            )));
        }
        self.entries.insert(slot, Arc::new(value));
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Freeze into the read-only store
    pub fn build(self) -> MetadataStore {
        MetadataStore {
            entries: Arc::new(self.entries),
        }
    }
}

/// Read-only, process-wide metadata
#[derive(Clone, Default)]
pub struct MetadataStore {
    entries: Arc<Entries>,
}

impl MetadataStore {
    pub fn builder() -> MetadataStoreBuilder {
        MetadataStoreBuilder::new()
    }

    /// Read a value; `None` when the key was never set on this subject
    pub fn get<T: Send + Sync + 'static>(&self, subject: &Subject, key: MetadataKey<T>) -> Option<&T> {
        self.entries
            .get(&(subject.clone(), key.name))
            .and_then(|value| value.downcast_ref::<T>())
    }

    /// First value found, in subject order (handler before class)
    pub fn get_all_and_override<T: Send + Sync + 'static>(
        &self,
        key: MetadataKey<T>,
        subjects: &[Subject],
    ) -> Option<&T> {
        subjects.iter().find_map(|subject| self.get(subject, key))
    }

    /// Concatenation of list values across subjects
    pub fn get_all_and_merge<T: Clone + Send + Sync + 'static>(
        &self,
        key: MetadataKey<Vec<T>>,
        subjects: &[Subject],
    ) -> Vec<T> {
        subjects
            .iter()
            .filter_map(|subject| self.get(subject, key))
            .flat_map(|values| values.iter().cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for MetadataStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataStore")
            .field("entries", &self.entries.len())
            .finish()
    }
}
