//! The per-request service container.
//!
//! A [`Service`] maps capabilities to implementations. Each middleware
//! produces a `Service` holding the capabilities it adds, and the engine
//! folds those contributions into the request's accumulated container.
//!
//! Capabilities are keyed by type. A capability registered first is never
//! overwritten by a later contribution: when two middleware produce the same
//! capability, the earlier one wins and the conflict is reported by
//! [`Service::absorb`].
//!
//! # Example
//!
//! ```rust
//! use lamina_core::Service;
//!
//! struct Database {
//!     url: String,
//! }
//!
//! let service = Service::new().with(Database {
//!     url: "postgres://localhost/db".to_string(),
//! });
//!
//! let db = service.require::<Database>().unwrap();
//! assert_eq!(db.url, "postgres://localhost/db");
//! ```

use indexmap::IndexMap;
use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Identifies a capability by type.
///
/// Creators declare the capabilities they provide and require with
/// `Capability::of::<T>()`; the pipeline checks at materialization that
/// every requirement is provided by an earlier stage.
#[derive(Debug, Clone, Copy)]
pub struct Capability {
    id: TypeId,
    name: &'static str,
}

impl Capability {
    /// The capability for type `T`.
    #[must_use]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: crate::error::short_type_name::<T>(),
        }
    }

    /// Short type name of the capability.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for Capability {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Capability {}

impl Hash for Capability {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Error when a capability cannot be resolved from the container.
#[derive(Debug, Clone)]
pub struct InjectionError {
    /// The type name that could not be resolved.
    pub type_name: &'static str,
    /// The reason for the failure.
    pub reason: String,
}

impl fmt::Display for InjectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Failed to resolve {}: {}", self.type_name, self.reason)
    }
}

impl std::error::Error for InjectionError {}

impl InjectionError {
    /// Creates an error for a capability that no middleware produced.
    pub fn not_provided<T>() -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
            reason: "capability not provided".to_string(),
        }
    }
}

#[derive(Clone)]
struct Entry {
    capability: Capability,
    value: Arc<dyn Any + Send + Sync>,
}

/// A typed capability container.
///
/// Cloning is cheap: values are stored behind `Arc`. Iteration order is
/// insertion order.
#[derive(Clone, Default)]
pub struct Service {
    entries: IndexMap<TypeId, Entry>,
}

impl Service {
    /// Creates an empty container.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a capability, keeping an existing one of the same type.
    ///
    /// Returns `false` if the capability was already present.
    pub fn insert<T: Send + Sync + 'static>(&mut self, value: T) -> bool {
        self.insert_arc(Arc::new(value))
    }

    /// Adds an `Arc`-wrapped capability, keeping an existing one.
    pub fn insert_arc<T: Send + Sync + 'static>(&mut self, value: Arc<T>) -> bool {
        let id = TypeId::of::<T>();
        if self.entries.contains_key(&id) {
            return false;
        }
        self.entries.insert(
            id,
            Entry {
                capability: Capability::of::<T>(),
                value,
            },
        );
        true
    }

    /// Builder form of [`insert`](Self::insert).
    #[must_use]
    pub fn with<T: Send + Sync + 'static>(mut self, value: T) -> Self {
        self.insert(value);
        self
    }

    /// Resolves a capability.
    #[must_use]
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.entries
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.value.clone().downcast::<T>().ok())
    }

    /// Resolves a capability or returns an error.
    ///
    /// The error converts into a fault with `?`: a missing capability is a
    /// composition bug, not a declared failure.
    pub fn require<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, InjectionError> {
        self.get().ok_or_else(InjectionError::not_provided::<T>)
    }

    /// Checks if a capability is present.
    #[must_use]
    pub fn contains<T: Send + Sync + 'static>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<T>())
    }

    /// Checks if a capability id is present.
    #[must_use]
    pub fn provides(&self, capability: &Capability) -> bool {
        self.entries.contains_key(&capability.id)
    }

    /// Returns the capabilities in insertion order.
    pub fn capabilities(&self) -> impl Iterator<Item = Capability> + '_ {
        self.entries.values().map(|entry| entry.capability)
    }

    /// Returns the capability names in insertion order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.capabilities().map(|c| c.name()).collect()
    }

    /// Folds a middleware contribution into this container.
    ///
    /// Capabilities already present are kept. Returns the names of the
    /// contributed capabilities that were dropped because of that.
    pub fn absorb(&mut self, contribution: Service) -> Vec<&'static str> {
        let mut conflicts = Vec::new();
        for (id, entry) in contribution.entries {
            if self.entries.contains_key(&id) {
                conflicts.push(entry.capability.name());
            } else {
                self.entries.insert(id, entry);
            }
        }
        conflicts
    }

    /// Returns the number of capabilities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the container is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("capabilities", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, PartialEq)]
    struct Test1(u32);

    #[derive(Debug, PartialEq)]
    struct Test2(u32);

    #[test]
    fn test_service_new() {
        let service = Service::new();
        assert!(service.is_empty());
        assert_eq!(service.len(), 0);
    }

    #[test]
    fn test_insert_and_get() {
        let service = Service::new().with(Test1(1));
        assert_eq!(*service.get::<Test1>().unwrap(), Test1(1));
        assert!(service.get::<Test2>().is_none());
    }

    #[test]
    fn test_insert_keeps_existing() {
        let mut service = Service::new().with(Test1(1));
        assert!(!service.insert(Test1(2)));
        assert_eq!(*service.get::<Test1>().unwrap(), Test1(1));
    }

    #[test]
    fn test_require_missing() {
        let err = Service::new().require::<Test1>().unwrap_err();
        assert!(err.to_string().contains("Test1"));
        assert!(err.to_string().contains("not provided"));
    }

    #[test]
    fn test_absorb_earlier_wins() {
        let mut acc = Service::new().with(Test1(1));
        let conflicts = acc.absorb(Service::new().with(Test1(9)).with(Test2(2)));

        assert_eq!(conflicts, vec!["Test1"]);
        assert_eq!(*acc.get::<Test1>().unwrap(), Test1(1));
        assert_eq!(*acc.get::<Test2>().unwrap(), Test2(2));
        assert_eq!(acc.names(), vec!["Test1", "Test2"]);
    }

    #[test]
    fn test_capability_identity() {
        assert_eq!(Capability::of::<Test1>(), Capability::of::<Test1>());
        assert_ne!(Capability::of::<Test1>(), Capability::of::<Test2>());
        assert_eq!(Capability::of::<Test1>().name(), "Test1");

        let service = Service::new().with(Test2(0));
        assert!(service.provides(&Capability::of::<Test2>()));
        assert!(!service.provides(&Capability::of::<Test1>()));
    }

    #[test]
    fn test_debug_lists_names() {
        let debug = format!("{:?}", Service::new().with(Test1(1)));
        assert!(debug.contains("Service"));
        assert!(debug.contains("Test1"));
    }

    proptest! {
        #[test]
        fn prop_absorb_never_overwrites(first in any::<u32>(), second in any::<u32>()) {
            let mut acc = Service::new().with(Test1(first));
            acc.absorb(Service::new().with(Test1(second)));
            prop_assert_eq!(acc.get::<Test1>().unwrap().0, first);
            prop_assert_eq!(acc.len(), 1);
        }
    }
}
