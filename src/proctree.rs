//! Process-tree enumeration, isolated behind a trait per the design notes:
//! one production (Linux `/proc`) implementation, one scripted test fake.

use std::collections::HashSet;

/// Enumerates the transitive closure of a process's descendants.
pub trait ProcessTree: Send + Sync {
    /// Returns the root PID plus every descendant reachable via the OS
    /// children relation. Missing or unreadable `/proc` entries contribute
    /// an empty subtree, never an error.
    fn descendants(&self, root_pid: i32) -> HashSet<i32>;
}

/// Reads `/proc/<pid>/task/<pid>/children` recursively. Linux-only; on other
/// platforms the children lookup always yields an empty set, so only the
/// root PID is ever returned (matching the design notes).
#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxProcessTree;

impl LinuxProcessTree {
    fn children_of(pid: i32) -> Vec<i32> {
        let path = format!("/proc/{pid}/task/{pid}/children");
        match std::fs::read_to_string(path) {
            Ok(contents) => contents
                .split_whitespace()
                .filter_map(|tok| tok.parse::<i32>().ok())
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

impl ProcessTree for LinuxProcessTree {
    fn descendants(&self, root_pid: i32) -> HashSet<i32> {
        let mut seen = HashSet::new();
        let mut stack = vec![root_pid];
        while let Some(pid) = stack.pop() {
            if !seen.insert(pid) {
                continue;
            }
            for child in Self::children_of(pid) {
                if !seen.contains(&child) {
                    stack.push(child);
                }
            }
        }
        seen
    }
}

/// A scripted process tree for tests: a fixed adjacency map handed in by the
/// test, independent of the real `/proc`.
#[derive(Debug, Default, Clone)]
pub struct FakeProcessTree {
    children: std::collections::HashMap<i32, Vec<i32>>,
}

impl FakeProcessTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_children(mut self, parent: i32, children: Vec<i32>) -> Self {
        self.children.insert(parent, children);
        self
    }
}

impl ProcessTree for FakeProcessTree {
    fn descendants(&self, root_pid: i32) -> HashSet<i32> {
        let mut seen = HashSet::new();
        let mut stack = vec![root_pid];
        while let Some(pid) = stack.pop() {
            if !seen.insert(pid) {
                continue;
            }
            if let Some(children) = self.children.get(&pid) {
                for &child in children {
                    if !seen.contains(&child) {
                        stack.push(child);
                    }
                }
            }
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_tree_includes_root_and_descendants() {
        let tree = FakeProcessTree::new()
            .with_children(1, vec![2, 3])
            .with_children(2, vec![4]);
        let result = tree.descendants(1);
        assert_eq!(result, HashSet::from([1, 2, 3, 4]));
    }

    #[test]
    fn fake_tree_leaf_is_just_root() {
        let tree = FakeProcessTree::new();
        assert_eq!(tree.descendants(42), HashSet::from([42]));
    }

    #[test]
    fn linux_tree_missing_proc_entry_is_empty_not_error() {
        let tree = LinuxProcessTree;
        // A PID this high is extremely unlikely to exist; the lookup must
        // degrade to "root only", never panic or propagate an error.
        let result = tree.descendants(i32::MAX - 1);
        assert_eq!(result, HashSet::from([i32::MAX - 1]));
    }
}
