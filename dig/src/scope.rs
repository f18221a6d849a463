//! The scope tree: a hierarchy of value caches and visible producers.
//!
//! A [`Scope`] is a cheaply cloned handle (an `Arc` of shared state) onto one
//! node of a tree rooted at the container itself. Resolution always starts
//! from one scope and walks upward: a value cached or produced in an
//! ancestor is visible to every descendant, but never the reverse, mirroring
//! `illicit`'s dynamically-scoped environment stack except held in an
//! explicit tree rather than a thread-local linked list, since more than one
//! scope may be resolving concurrently.
//!
//! A named group is the one exception to strict ancestor-only visibility: a
//! group key is meant to be seen by the whole subtree that shares it, not
//! just the chain from a consumer up to the root, so collecting a group also
//! walks down into every descendant (see [`Scope::collect_group`]).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::anyval::AnyValue;
use crate::deferred::Deferred;
use crate::key::Key;
use crate::registry::Registry;

static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(0);

/// Opaque identity of a scope node, stable for the lifetime of the tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ScopeId(u64);

struct ScopeInner {
    id: ScopeId,
    name: Option<String>,
    parent: Option<Scope>,
    children: RwLock<Vec<Scope>>,
    registry: Registry,
    values: RwLock<HashMap<Key, AnyValue>>,
    groups: RwLock<HashMap<Key, Vec<AnyValue>>>,
    inflight: RwLock<HashMap<usize, Deferred<()>>>,
    decorator_inflight: RwLock<HashMap<usize, Deferred<AnyValue>>>,
}

/// A node in the scope tree.
///
/// Cloning a `Scope` clones a handle, not the tree: all clones of the same
/// scope share one cache and one registry.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

impl Scope {
    /// The root scope of a new container: no parent, an empty registry.
    pub fn root() -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                id: ScopeId(NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed)),
                name: None,
                parent: None,
                children: RwLock::new(Vec::new()),
                registry: Registry::new(),
                values: RwLock::new(HashMap::new()),
                groups: RwLock::new(HashMap::new()),
                inflight: RwLock::new(HashMap::new()),
                decorator_inflight: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// A child scope with its own cache and registry, able to see every
    /// value and producer visible from `self`. Registered into `self`'s own
    /// child list so group collection and diagnostics can later walk back
    /// down into it.
    pub fn subscope(&self, name: impl Into<Option<String>>) -> Self {
        let child = Self {
            inner: Arc::new(ScopeInner {
                id: ScopeId(NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed)),
                name: name.into(),
                parent: Some(self.clone()),
                children: RwLock::new(Vec::new()),
                registry: Registry::new(),
                values: RwLock::new(HashMap::new()),
                groups: RwLock::new(HashMap::new()),
                inflight: RwLock::new(HashMap::new()),
                decorator_inflight: RwLock::new(HashMap::new()),
            }),
        };
        self.inner.children.write().push(child.clone());
        child
    }

    /// This scope's identity.
    pub fn id(&self) -> ScopeId {
        self.inner.id
    }

    /// The name this scope was created with, if any.
    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// This scope's own registry (producers and decorators registered
    /// directly here, not inherited from an ancestor).
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// The parent scope, if any.
    pub fn parent(&self) -> Option<&Scope> {
        self.inner.parent.as_ref()
    }

    /// Walks from `self` up to the root, innermost first.
    pub fn ancestry(&self) -> Vec<Scope> {
        let mut chain = vec![self.clone()];
        let mut cur = self.clone();
        while let Some(parent) = cur.parent().cloned() {
            chain.push(parent.clone());
            cur = parent;
        }
        chain
    }

    /// Every scope below `self` in the tree, in pre-order (a child before
    /// any of its own children), not including `self`.
    pub fn descendants(&self) -> Vec<Scope> {
        let mut out = Vec::new();
        for child in self.inner.children.read().iter() {
            out.push(child.clone());
            out.extend(child.descendants());
        }
        out
    }

    /// A previously cached value for `key`, searching this scope and then
    /// every ancestor in order.
    pub fn lookup_cached(&self, key: &Key) -> Option<AnyValue> {
        for scope in self.ancestry() {
            if let Some(value) = scope.inner.values.read().get(key) {
                return Some(value.clone());
            }
        }
        None
    }

    /// Caches `value` for `key` in exactly this scope (the scope whose
    /// registry owns the producer responsible for `key`).
    pub fn cache_value(&self, key: Key, value: AnyValue) {
        self.inner.values.write().insert(key, value);
    }

    /// Appends `value` to the named group's accumulator in exactly this
    /// scope, in call order.
    pub fn append_group(&self, key: Key, value: AnyValue) {
        self.inner.groups.write().entry(key).or_default().push(value);
    }

    /// Every contributor cached so far for a group key, across the whole
    /// subtree this scope sits in: root scope's contributions first, then
    /// each ancestor down to `self`, then every descendant in pre-order.
    /// Unlike a plain value lookup, a group is visible to the container that
    /// consumes it regardless of whether the contributor was registered
    /// above or below it in the tree.
    pub fn collect_group(&self, key: &Key) -> Vec<AnyValue> {
        let mut out = Vec::new();
        for scope in self.ancestry().into_iter().rev() {
            if let Some(values) = scope.inner.groups.read().get(key) {
                out.extend(values.iter().cloned());
            }
        }
        for scope in self.descendants() {
            if let Some(values) = scope.inner.groups.read().get(key) {
                out.extend(values.iter().cloned());
            }
        }
        out
    }

    /// The scope, among `self` and its ancestors, whose own registry
    /// provides `key` — the scope a producer for `key` would be cached in.
    pub fn owning_scope(&self, key: &Key) -> Option<Scope> {
        self.ancestry().into_iter().find(|scope| scope.inner.registry.provides(key))
    }

    /// Returns the in-flight `Deferred` for producer `id` if one is already
    /// running in exactly this scope, else registers `make`'s result as the
    /// new in-flight entry. Guarantees a producer body runs at most once per
    /// scope even when several consumers request it concurrently.
    pub fn producer_inflight_or_insert(
        &self,
        id: usize,
        make: impl FnOnce() -> Deferred<()>,
    ) -> Deferred<()> {
        let mut table = self.inner.inflight.write();
        if let Some(existing) = table.get(&id) {
            return existing.clone();
        }
        let deferred = make();
        table.insert(id, deferred.clone());
        deferred
    }

    /// As [`Scope::producer_inflight_or_insert`], but for a decorator
    /// application, which settles with the decorated value itself rather
    /// than `()`.
    pub fn decorator_inflight_or_insert(
        &self,
        id: usize,
        make: impl FnOnce() -> Deferred<AnyValue>,
    ) -> Deferred<AnyValue> {
        let mut table = self.inner.decorator_inflight.write();
        if let Some(existing) = table.get(&id) {
            return existing.clone();
        }
        let deferred = make();
        table.insert(id, deferred.clone());
        deferred
    }
}
