//! A recorded view of the producer graph for failure reporting and
//! visualization: tracks nodes/edges and renders DOT.
//!
//! Grounded on the `to_dot` debug dump pattern used by container-shaped
//! reference crates in this space: nodes are keys, edges are dependency
//! relationships, and a node's color reflects whether it failed, failed
//! transitively, or never ran.

use std::collections::HashMap;
use std::fmt::Write as _;

use parking_lot::Mutex;

use crate::error::Classification;
use crate::key::Key;

#[derive(Clone, Debug)]
struct Node {
    key: Key,
    location: &'static str,
    deps: Vec<Key>,
    status: Classification,
    note: Option<String>,
}

/// Records producer registrations and resolution outcomes for rendering.
#[derive(Default)]
pub struct DiagGraph {
    nodes: Mutex<HashMap<Key, Node>>,
}

impl DiagGraph {
    /// An empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a producer's result key and its dependency edges.
    pub fn add_producer(&self, key: Key, location: &'static str, deps: Vec<Key>) {
        self.nodes
            .lock()
            .insert(key.clone(), Node { key, location, deps, status: Classification::None, note: None });
    }

    /// Marks `key` as a root-cause failure, e.g. a constructor error.
    pub fn fail_value(&self, key: &Key, note: impl Into<String>) {
        if let Some(node) = self.nodes.lock().get_mut(key) {
            node.status = Classification::RootCause;
            node.note = Some(note.into());
        }
    }

    /// Marks `key` as transitively failed because one of its dependencies
    /// did not produce a value.
    pub fn fail_transitive(&self, key: &Key, note: impl Into<String>) {
        if let Some(node) = self.nodes.lock().get_mut(key) {
            node.status = Classification::Transitive;
            node.note = Some(note.into());
        }
    }

    /// Marks a named group key as transitively failed because at least one
    /// of its contributors did not produce a value. Every contributor to a
    /// group shares the group's own key in this graph (there's no separate
    /// node per contributor to single one out), so this marks that one node.
    pub fn fail_group(&self, group_key: &Key, note: impl Into<String>) {
        if let Some(node) = self.nodes.lock().get_mut(group_key) {
            node.status = Classification::Transitive;
            node.note = Some(note.into());
        }
    }

    /// Marks `key` as having no registered producer at all.
    pub fn add_missing(&self, key: Key) {
        self.nodes.lock().entry(key.clone()).or_insert(Node {
            key,
            location: "<missing>",
            deps: Vec::new(),
            status: Classification::RootCause,
            note: Some("no producer registered".to_string()),
        });
    }

    /// Clears every failure marker, restoring a graph to its
    /// post-registration, pre-resolution state.
    pub fn prune_success(&self) {
        for node in self.nodes.lock().values_mut() {
            node.status = Classification::None;
            node.note = None;
        }
    }

    /// Renders the graph in Graphviz DOT form, color-coding nodes by
    /// failure classification: red for root-cause, orange for transitive,
    /// black otherwise.
    pub fn to_dot(&self) -> String {
        let nodes = self.nodes.lock();
        let mut out = String::new();
        let _ = writeln!(out, "digraph dig {{");
        for node in nodes.values() {
            let color = match node.status {
                Classification::None => "black",
                Classification::RootCause => "red",
                Classification::Transitive => "orange",
            };
            let label = match &node.note {
                Some(note) => format!("{}\\n{}", node.key, note),
                None => node.key.display_name(),
            };
            let _ = writeln!(
                out,
                "  \"{}\" [label=\"{}\", color={}];",
                node.key, label, color
            );
        }
        for node in nodes.values() {
            for dep in &node.deps {
                let _ = writeln!(out, "  \"{}\" -> \"{}\";", node.key, dep);
            }
        }
        let _ = writeln!(out, "}}");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dot_output_includes_every_node_and_edge() {
        let graph = DiagGraph::new();
        let a = Key::value::<u8>();
        let b = Key::value::<u16>();
        graph.add_producer(a.clone(), "a.rs:1", vec![b.clone()]);
        graph.add_producer(b.clone(), "b.rs:1", Vec::new());
        let dot = graph.to_dot();
        assert!(dot.contains("digraph dig"));
        assert!(dot.contains(&a.to_string()));
        assert!(dot.contains(&b.to_string()));
    }

    #[test]
    fn failures_change_node_color() {
        let graph = DiagGraph::new();
        let a = Key::value::<u8>();
        graph.add_producer(a.clone(), "a.rs:1", Vec::new());
        graph.fail_value(&a, "boom");
        assert!(graph.to_dot().contains("color=red"));
    }

    #[test]
    fn fail_group_marks_the_group_node_transitive() {
        let graph = DiagGraph::new();
        let group = Key::group::<u8>("g");
        graph.add_producer(group.clone(), "g.rs:1", Vec::new());
        graph.fail_group(&group, "missing contributor");
        assert!(graph.to_dot().contains("color=orange"));
    }

    #[test]
    fn prune_success_clears_failures() {
        let graph = DiagGraph::new();
        let a = Key::value::<u8>();
        graph.add_producer(a.clone(), "a.rs:1", Vec::new());
        graph.fail_value(&a, "boom");
        graph.prune_success();
        assert!(graph.to_dot().contains("color=black"));
    }
}
