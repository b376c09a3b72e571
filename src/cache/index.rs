//! Reverse-dependency index between cached resources
//!
//! An edge `parent → child` exists while the raw data of `parent` holds at least one
//! reference to `child`. Edges are counted: a model referencing the same child from
//! two fields keeps the edge until both fields stop referencing it.

use std::collections::{BTreeSet, HashMap};

/// Forward edge counts plus the reverse `child → parents` lookup, kept in lockstep
#[derive(Debug, Default, Clone)]
pub struct DependencyIndex {
    children: HashMap<String, HashMap<String, usize>>,
    parents: HashMap<String, BTreeSet<String>>,
}

impl DependencyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one more reference from `parent` to `child`
    pub fn add(&mut self, parent: &str, child: &str) {
        let count = self
            .children
            .entry(parent.to_string())
            .or_default()
            .entry(child.to_string())
            .or_insert(0);
        *count += 1;

        if *count == 1 {
            self.parents
                .entry(child.to_string())
                .or_default()
                .insert(parent.to_string());
        }
    }

    /// Drop one reference from `parent` to `child`
    ///
    /// Returns `false` if no such edge was recorded.
    pub fn remove(&mut self, parent: &str, child: &str) -> bool {
        let Some(targets) = self.children.get_mut(parent) else {
            return false;
        };
        let Some(count) = targets.get_mut(child) else {
            return false;
        };

        *count -= 1;
        if *count == 0 {
            targets.remove(child);
            if targets.is_empty() {
                self.children.remove(parent);
            }
            self.unlink_parent(parent, child);
        }
        true
    }

    /// Drop every outgoing edge of `parent`
    pub fn remove_parent(&mut self, parent: &str) {
        if let Some(targets) = self.children.remove(parent) {
            for child in targets.keys() {
                self.unlink_parent(parent, child);
            }
        }
    }

    fn unlink_parent(&mut self, parent: &str, child: &str) {
        if let Some(set) = self.parents.get_mut(child) {
            set.remove(parent);
            if set.is_empty() {
                self.parents.remove(child);
            }
        }
    }

    /// Resources directly referencing `child`, in rid order
    pub fn parents_of(&self, child: &str) -> Vec<String> {
        self.parents
            .get(child)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Resources directly referenced by `parent`, in rid order
    pub fn children_of(&self, parent: &str) -> Vec<String> {
        let mut children: Vec<String> = self
            .children
            .get(parent)
            .map(|targets| targets.keys().cloned().collect())
            .unwrap_or_default();
        children.sort();
        children
    }

    pub fn contains(&self, parent: &str, child: &str) -> bool {
        self.children
            .get(parent)
            .is_some_and(|targets| targets.contains_key(child))
    }

    /// Number of distinct `(parent, child)` pairs
    pub fn edge_count(&self) -> usize {
        self.children.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}
