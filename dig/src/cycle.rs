//! Cycle detection over the producer graph reachable from one registration.
//!
//! A plain (non-group) dependency only ever resolves within the registry a
//! producer is registered in, or an already-registered ancestor's registry —
//! an ancestor can never depend on a descendant for a plain key, since it
//! cannot name a key that exists only there. So a value-key edge is still
//! walked one [`Registry`] at a time, exactly as before.
//!
//! A group-key dependency breaks that assumption: `Scope::collect_group`
//! pulls contributors from both ancestors and descendants of whoever
//! consumes the group, so a parent producer that depends on a group with a
//! child contributor depending back on the parent closes a real cycle no
//! single registry can see. Group-key edges are therefore walked across
//! every registry in the whole scope tree, not just the registering scope's
//! own — a conservative superset of what's actually visible from any one
//! consumer, trading the rare false-positive rejection for never missing a
//! real cycle.
//!
//! The search itself is a depth-first walk with an explicit "currently on
//! the stack" set, in the spirit of a textbook cycle-detecting DFS: every
//! registered producer is acyclic by induction (it was checked when it was
//! added), so the only candidate for a new cycle is the producer being
//! registered right now.

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{Frame, RegistrationError};
use crate::key::Key;
use crate::registry::Producer;
use crate::scope::Scope;

/// Checks whether registering a producer with the given `results` and
/// `deps` in `scope` would close a cycle. `location` is used only to label
/// the closing frame if a cycle is found.
pub fn check_for_cycle(
    scope: &Scope,
    location: &'static str,
    results: &[Key],
    deps: &[Key],
) -> Result<(), RegistrationError> {
    for start in deps {
        let mut path = Vec::new();
        let mut visiting = HashSet::new();
        if let Some(found) = find_path(scope, start, results, &mut path, &mut visiting) {
            let mut frames: Vec<Frame> = found
                .iter()
                .map(|key| Frame { key: key.clone(), location: producer_location(scope, key) })
                .collect();
            frames.push(Frame { key: start.clone(), location: Some(location) });
            return Err(RegistrationError::CycleDetected { path: frames });
        }
    }
    Ok(())
}

/// Every scope in the whole tree `scope` belongs to (root plus every
/// descendant of the root), used to search group-key producers wherever in
/// the tree they might live.
fn whole_tree(scope: &Scope) -> Vec<Scope> {
    let root = scope.ancestry().into_iter().last().expect("ancestry always includes self");
    let mut all = vec![root.clone()];
    all.extend(root.descendants());
    all
}

fn producer_location(scope: &Scope, key: &Key) -> Option<&'static str> {
    if key.is_group() {
        whole_tree(scope).iter().find_map(|s| s.registry().lookup_group(key).first().map(|p| p.location))
    } else {
        scope.registry().lookup_value(key).map(|p| p.location)
    }
}

fn find_path(
    scope: &Scope,
    current: &Key,
    targets: &[Key],
    path: &mut Vec<Key>,
    visiting: &mut HashSet<Key>,
) -> Option<Vec<Key>> {
    if targets.contains(current) {
        path.push(current.clone());
        return Some(path.clone());
    }
    if !visiting.insert(current.clone()) {
        return None;
    }
    path.push(current.clone());

    let producers: Vec<Arc<Producer>> = if current.is_group() {
        whole_tree(scope).iter().flat_map(|s| s.registry().lookup_group(current)).collect()
    } else {
        scope.registry().lookup_value(current).into_iter().collect()
    };

    for producer in &producers {
        for dep in producer.dependencies() {
            if let Some(found) = find_path(scope, &dep, targets, path, visiting) {
                return Some(found);
            }
        }
    }

    path.pop();
    visiting.remove(current);
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deferred::Deferred;
    use crate::introspect::ResultSpec;
    use crate::registry::Producer;

    fn producer(params: Vec<Key>) -> Arc<Producer> {
        use crate::introspect::ParamSpec;
        Arc::new(Producer {
            id: crate::registry::next_producer_id(),
            location: "test.rs:1",
            params: params.into_iter().map(ParamSpec::Value).collect(),
            results: Vec::new(),
            run: Box::new(|_ctx| Deferred::settled(())),
        })
    }

    fn group_producer(dep: Option<Key>, group_key: Key) -> Arc<Producer> {
        use crate::introspect::ParamSpec;
        Arc::new(Producer {
            id: crate::registry::next_producer_id(),
            location: "test.rs:1",
            params: dep.into_iter().map(ParamSpec::Value).collect(),
            results: vec![ResultSpec::GroupItem(group_key)],
            run: Box::new(|_ctx| Deferred::settled(())),
        })
    }

    #[test]
    fn direct_self_dependency_is_a_cycle() {
        let scope = Scope::root();
        let a = Key::value::<u8>();
        assert!(check_for_cycle(&scope, "loc", &[a.clone()], &[a]).is_err());
    }

    #[test]
    fn transitive_cycle_through_existing_producers_is_detected() {
        let scope = Scope::root();
        let a = Key::value::<u16>();
        let b = Key::value::<u32>();
        // b depends on a.
        scope.registry().register_value(b.clone(), producer(vec![a.clone()])).unwrap();
        // registering a new producer for a that depends on b closes a cycle.
        assert!(check_for_cycle(&scope, "loc", &[a], &[b]).is_err());
    }

    #[test]
    fn acyclic_registration_is_accepted() {
        let scope = Scope::root();
        let a = Key::value::<u64>();
        let b = Key::value::<i64>();
        scope.registry().register_value(a.clone(), producer(Vec::new())).unwrap();
        assert!(check_for_cycle(&scope, "loc", &[b], &[a]).is_ok());
    }

    #[test]
    fn cross_scope_group_cycle_through_a_child_contributor_is_detected() {
        // Parent producer for `p` consumes group "g". A child scope registers
        // a group contributor that itself depends on `p` — a cycle that only
        // exists once group edges are allowed to reach into descendants.
        let root = Scope::root();
        let child = root.subscope(Some("child".to_string()));
        let group_key = Key::group::<u8>("g");
        let p = Key::value::<u16>();

        child.registry().register_group_item(group_key.clone(), group_producer(Some(p.clone()), group_key.clone()));

        assert!(check_for_cycle(&root, "loc", &[p], &[group_key]).is_err());
    }
}
