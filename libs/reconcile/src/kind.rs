//! Per-kind configuration table and the engine registry.
//!
//! There is no ambient global state: everything the engine needs to know
//! about a resource kind (field classes, collection policies, wait specs,
//! and the client binding) is supplied explicitly at construction time.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::client::RemoteClient;
use crate::config::EngineConfig;
use crate::reconciler::Reconciler;
use crate::state::Status;
use crate::waiter::WaitSpec;

/// How a scalar field participates in the update precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldClass {
    /// A protection/guard boolean that can block other mutations. Disabling
    /// toggles are applied before the fields they would otherwise block;
    /// enabling toggles after.
    GuardToggle,

    /// An independently mutable scalar with no ordering constraints.
    Plain,

    /// A policy or primary-reference field, applied after all plain scalars.
    PolicyRef,
}

/// Declaration of one scalar field.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub class: FieldClass,
}

/// Declaration of one collection field.
#[derive(Debug, Clone)]
pub struct CollectionSpec {
    pub name: String,

    /// Treat an "inaccessible" rejection of a removal call as a soft success
    /// (the element was already detached by a prior operation).
    pub ignore_inaccessible_removal: bool,
}

/// Everything the engine needs to know about one resource kind.
#[derive(Debug, Clone)]
pub struct KindSpec {
    pub kind: String,
    pub fields: Vec<FieldSpec>,
    pub collections: Vec<CollectionSpec>,
    pub create_wait: WaitSpec,
    pub update_wait: WaitSpec,
    pub delete_wait: WaitSpec,
}

impl KindSpec {
    /// Build a kind spec with the standard lifecycle wait specs derived from
    /// the engine configuration:
    ///
    /// - create: Provisioning → Ready
    /// - update: Provisioning → Ready, with a settle delay before the first
    ///   poll (associate-type calls can report a stale "ready" briefly)
    /// - delete: Deleting → gone
    pub fn with_defaults(kind: impl Into<String>, config: &EngineConfig) -> Self {
        let create_wait = WaitSpec::new(
            [Status::Provisioning],
            [Status::Ready],
            config.create_timeout,
        )
        .poll_every(config.poll_interval);

        let update_wait = WaitSpec::new(
            [Status::Provisioning],
            [Status::Ready],
            config.update_timeout,
        )
        .poll_every(config.poll_interval)
        .delay_first_poll(config.settle_delay);

        let delete_wait = WaitSpec::new([Status::Deleting], [], config.delete_timeout)
            .poll_every(config.poll_interval);

        Self {
            kind: kind.into(),
            fields: Vec::new(),
            collections: Vec::new(),
            create_wait,
            update_wait,
            delete_wait,
        }
    }

    /// Declare a scalar field and its ordering class.
    pub fn field(mut self, name: impl Into<String>, class: FieldClass) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            class,
        });
        self
    }

    /// Declare a collection field.
    pub fn collection_field(
        mut self,
        name: impl Into<String>,
        ignore_inaccessible_removal: bool,
    ) -> Self {
        self.collections.push(CollectionSpec {
            name: name.into(),
            ignore_inaccessible_removal,
        });
        self
    }

    /// Ordering class for a scalar field. Undeclared fields are plain.
    pub fn field_class(&self, name: &str) -> FieldClass {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.class)
            .unwrap_or(FieldClass::Plain)
    }

    /// Declaration for a collection field, if any.
    pub fn collection(&self, name: &str) -> Option<&CollectionSpec> {
        self.collections.iter().find(|c| c.name == name)
    }
}

/// A resource kind bound to its remote client.
pub struct Binding {
    pub client: Arc<dyn RemoteClient>,
    pub spec: KindSpec,
}

/// Explicit kind → binding table, supplied at construction.
#[derive(Default)]
pub struct Registry {
    entries: BTreeMap<String, Binding>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a kind binding, replacing any previous binding for the kind.
    pub fn register(&mut self, binding: Binding) {
        self.entries.insert(binding.spec.kind.clone(), binding);
    }

    /// Build a reconciler for one kind, or `None` if the kind is unknown.
    pub fn reconciler(&self, kind: &str) -> Option<Reconciler> {
        self.entries
            .get(kind)
            .map(|b| Reconciler::new(Arc::clone(&b.client), b.spec.clone()))
    }

    /// Registered kind names, in deterministic order.
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

/// Default poll interval when none is configured.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::InMemoryRemote;

    #[test]
    fn test_field_class_defaults_to_plain() {
        let spec = KindSpec::with_defaults("firewall", &EngineConfig::default())
            .field("delete_protection", FieldClass::GuardToggle);
        assert_eq!(spec.field_class("delete_protection"), FieldClass::GuardToggle);
        assert_eq!(spec.field_class("description"), FieldClass::Plain);
    }

    #[test]
    fn test_registry_lookup() {
        let config = EngineConfig::default();
        let mut registry = Registry::new();
        registry.register(Binding {
            client: Arc::new(InMemoryRemote::new(1)),
            spec: KindSpec::with_defaults("firewall", &config),
        });

        assert!(registry.reconciler("firewall").is_some());
        assert!(registry.reconciler("cluster").is_none());
        assert_eq!(registry.kinds().collect::<Vec<_>>(), vec!["firewall"]);
    }

    #[test]
    fn test_default_wait_specs() {
        let spec = KindSpec::with_defaults("firewall", &EngineConfig::default());
        assert!(spec.create_wait.target.contains(&Status::Ready));
        assert!(spec.delete_wait.target.is_empty());
        assert!(spec.update_wait.initial_delay > Duration::ZERO);
        assert_eq!(spec.create_wait.initial_delay, Duration::ZERO);
    }
}
