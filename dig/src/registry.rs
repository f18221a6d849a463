//! Producers and decorators registered directly on one scope.
//!
//! A [`Registry`] only ever holds entries registered in its own scope — it
//! has no notion of inheritance; that is [`crate::scope::Scope::owning_scope`]'s
//! job, which walks the registries of a scope and its ancestors in order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::anyval::AnyValue;
use crate::deferred::Deferred;
use crate::engine::ResolveCtx;
use crate::error::RegistrationError;
use crate::introspect::{ParamSpec, ResultSpec};
use crate::key::Key;

static NEXT_PRODUCER_ID: AtomicUsize = AtomicUsize::new(0);

/// A fresh, crate-wide unique producer identity, used to key in-flight
/// memoization and diagnostics nodes.
pub fn next_producer_id() -> usize {
    NEXT_PRODUCER_ID.fetch_add(1, Ordering::Relaxed)
}

/// A registered constructor: its declared shape plus a closure able to run
/// it against a given resolution context.
pub struct Producer {
    /// Crate-wide unique id, stable for the producer's lifetime.
    pub id: usize,
    /// Caller-supplied or call-site-derived description of where this
    /// producer was registered, used in error messages and diagnostics.
    pub location: &'static str,
    /// Every parameter this producer's body needs resolved before it runs.
    pub params: Vec<ParamSpec>,
    /// Every result key this producer is responsible for.
    pub results: Vec<ResultSpec>,
    /// Resolves parameters, schedules the body, and stores its results.
    /// Settles with `()` once every result has been written to its owning
    /// scope's cache (or the producer has failed).
    pub run: Box<dyn Fn(&ResolveCtx) -> Deferred<()> + Send + Sync>,
}

impl Producer {
    /// The keys this producer's parameters depend on — the edges a cycle
    /// detector walks.
    pub fn dependencies(&self) -> Vec<Key> {
        self.params.iter().map(|p| p.key().clone()).collect()
    }
}

/// A registered decorator: runs after a producer (or an enclosing
/// decorator) settles, free to replace the value before it is cached.
pub struct Decorator {
    /// Crate-wide unique id.
    pub id: usize,
    /// Where this decorator was registered.
    pub location: &'static str,
    /// The key being decorated.
    pub key: Key,
    /// Every parameter this decorator's body needs beyond the decorated
    /// value itself.
    pub params: Vec<ParamSpec>,
    /// Runs the decorator body against the already-resolved original value
    /// plus whatever other parameters it asked for.
    pub run: Box<dyn Fn(&ResolveCtx, AnyValue) -> Deferred<AnyValue> + Send + Sync>,
}

/// Everything registered directly on one scope.
#[derive(Default)]
pub struct Registry {
    values: RwLock<HashMap<Key, Arc<Producer>>>,
    groups: RwLock<HashMap<Key, Vec<Arc<Producer>>>>,
    decorators: RwLock<HashMap<Key, Arc<Decorator>>>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` if this exact registry (not an ancestor) has a producer for
    /// `key`, whether a sole value producer or at least one group
    /// contributor.
    pub fn provides(&self, key: &Key) -> bool {
        if key.is_group() {
            self.groups.read().contains_key(key)
        } else {
            self.values.read().contains_key(key)
        }
    }

    /// Registers the sole producer of a value key. Fails if one is already
    /// registered for the exact same key.
    pub fn register_value(&self, key: Key, producer: Arc<Producer>) -> Result<(), RegistrationError> {
        let mut values = self.values.write();
        if let Some(existing) = values.get(&key) {
            return Err(RegistrationError::AlreadyProvided {
                key,
                existing: Some(existing.location.to_string()),
            });
        }
        values.insert(key, producer);
        Ok(())
    }

    /// Registers one more contributor to a group key. Groups never
    /// collide — every registration simply appends another contributor, in
    /// registration order.
    pub fn register_group_item(&self, key: Key, producer: Arc<Producer>) {
        self.groups.write().entry(key).or_default().push(producer);
    }

    /// Registers a decorator for `key`. Fails if this scope already has one
    /// for the same key.
    pub fn register_decorator(&self, decorator: Decorator) -> Result<(), RegistrationError> {
        let mut decorators = self.decorators.write();
        if decorators.contains_key(&decorator.key) {
            return Err(RegistrationError::DuplicateDecorator { key: decorator.key });
        }
        decorators.insert(decorator.key.clone(), Arc::new(decorator));
        Ok(())
    }

    /// The sole producer for a value key, if registered directly here.
    pub fn lookup_value(&self, key: &Key) -> Option<Arc<Producer>> {
        self.values.read().get(key).cloned()
    }

    /// Every contributor to a group key, in registration order, if
    /// registered directly here.
    pub fn lookup_group(&self, key: &Key) -> Vec<Arc<Producer>> {
        self.groups.read().get(key).cloned().unwrap_or_default()
    }

    /// The decorator for a key, if registered directly here.
    pub fn lookup_decorator(&self, key: &Key) -> Option<Arc<Decorator>> {
        self.decorators.read().get(key).cloned()
    }

    /// Every producer registered directly here, value and group alike — used
    /// by the cycle detector and by diagnostics/introspection dumps.
    pub fn all_producers(&self) -> Vec<Arc<Producer>> {
        let mut out: Vec<Arc<Producer>> = self.values.read().values().cloned().collect();
        for group in self.groups.read().values() {
            out.extend(group.iter().cloned());
        }
        out
    }

    /// Every key this registry has a producer for, value and group alike.
    pub fn all_keys(&self) -> Vec<Key> {
        let mut out: Vec<Key> = self.values.read().keys().cloned().collect();
        out.extend(self.groups.read().keys().cloned());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn producer(id: usize) -> Arc<Producer> {
        Arc::new(Producer {
            id,
            location: "test.rs:1",
            params: Vec::new(),
            results: Vec::new(),
            run: Box::new(|_ctx| Deferred::settled(())),
        })
    }

    #[test]
    fn duplicate_value_registration_is_rejected() {
        let reg = Registry::new();
        let key = Key::value::<u8>();
        assert!(reg.register_value(key.clone(), producer(0)).is_ok());
        assert!(reg.register_value(key, producer(1)).is_err());
    }

    #[test]
    fn group_registrations_accumulate() {
        let reg = Registry::new();
        let key = Key::group::<u8>("g");
        reg.register_group_item(key.clone(), producer(0));
        reg.register_group_item(key.clone(), producer(1));
        assert_eq!(reg.lookup_group(&key).len(), 2);
    }

    #[test]
    fn duplicate_decorator_is_rejected() {
        let reg = Registry::new();
        let key = Key::value::<u8>();
        let dec = |id: usize| Decorator {
            id,
            location: "test.rs:1",
            key: key.clone(),
            params: Vec::new(),
            run: Box::new(|_ctx, v| Deferred::settled(v)),
        };
        assert!(reg.register_decorator(dec(0)).is_ok());
        assert!(reg.register_decorator(dec(1)).is_err());
    }
}
