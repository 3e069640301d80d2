use std::collections::HashMap;
use std::sync::RwLock;

use nfr_core::{Name, NameComponent};

use crate::table::fib::{default_strategy, FibNextHopEntry, FibStrategyEntry, FibStrategyTable};

const ROOT: usize = 0;

struct Node {
    component: NameComponent,
    name: Name,
    depth: usize,
    parent: usize,
    children: HashMap<u64, usize>,
    nexthops: Vec<FibNextHopEntry>,
    strategy: Option<Name>,
}

struct Tree {
    nodes: Vec<Node>,
    free: Vec<usize>,
}

/// Name-trie backend of the FIB-Strategy table.
pub struct FibStrategyTree {
    inner: RwLock<Tree>,
}

impl Default for FibStrategyTree {
    fn default() -> Self {
        Self::new()
    }
}

impl FibStrategyTree {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Tree {
                nodes: vec![Node {
                    component: NameComponent::new(Vec::new()),
                    name: Name::new(),
                    depth: 0,
                    parent: ROOT,
                    children: HashMap::new(),
                    nexthops: Vec::new(),
                    strategy: Some(default_strategy()),
                }],
                free: Vec::new(),
            }),
        }
    }
}

impl Tree {
    fn find_longest_prefix(&self, name: &Name) -> usize {
        let mut cur = ROOT;
        while let Some(component) = name.get(self.nodes[cur].depth) {
            match self.nodes[cur].children.get(&component.hash_value()) {
                Some(&child) => cur = child,
                None => break,
            }
        }
        cur
    }

    fn find_exact_match(&self, name: &Name) -> Option<usize> {
        let node = self.find_longest_prefix(name);
        (self.nodes[node].depth == name.len()).then_some(node)
    }

    fn fill_tree_to_prefix(&mut self, name: &Name) -> usize {
        let mut cur = self.find_longest_prefix(name);
        for depth in self.nodes[cur].depth..name.len() {
            let component = match name.get(depth) {
                Some(component) => component.clone(),
                None => break,
            };
            let hash = component.hash_value();
            let node = Node {
                name: self.nodes[cur].name.appended(component.clone()),
                depth: depth + 1,
                component,
                parent: cur,
                children: HashMap::new(),
                nexthops: Vec::new(),
                strategy: None,
            };
            let child = match self.free.pop() {
                Some(idx) => {
                    self.nodes[idx] = node;
                    idx
                }
                None => {
                    self.nodes.push(node);
                    self.nodes.len() - 1
                }
            };
            self.nodes[cur].children.insert(hash, child);
            cur = child;
        }
        cur
    }

    fn prune_if_empty(&mut self, node: usize) {
        let mut cur = node;
        while cur != ROOT
            && self.nodes[cur].children.is_empty()
            && self.nodes[cur].nexthops.is_empty()
            && self.nodes[cur].strategy.is_none()
        {
            let parent = self.nodes[cur].parent;
            let hash = self.nodes[cur].component.hash_value();
            self.nodes[parent].children.remove(&hash);
            self.free.push(cur);
            cur = parent;
        }
    }

    fn walk(&self, mut visit: impl FnMut(&Node)) {
        let mut stack = vec![ROOT];
        while let Some(node) = stack.pop() {
            stack.extend(self.nodes[node].children.values().copied());
            visit(&self.nodes[node]);
        }
    }
}

impl FibStrategyTable for FibStrategyTree {
    fn find_next_hops(&self, name: &Name) -> Vec<FibNextHopEntry> {
        let tree = self.inner.read().unwrap_or_else(|e| e.into_inner());
        // Longest prefix, then step back up to the nearest node that
        // actually carries nexthops
        let mut cur = tree.find_longest_prefix(name);
        loop {
            if !tree.nodes[cur].nexthops.is_empty() {
                return tree.nodes[cur].nexthops.clone();
            }
            if cur == ROOT {
                return Vec::new();
            }
            cur = tree.nodes[cur].parent;
        }
    }

    fn find_strategy(&self, name: &Name) -> Name {
        let tree = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut cur = tree.find_longest_prefix(name);
        loop {
            if let Some(strategy) = &tree.nodes[cur].strategy {
                return strategy.clone();
            }
            if cur == ROOT {
                return default_strategy();
            }
            cur = tree.nodes[cur].parent;
        }
    }

    fn insert_next_hop(&self, name: &Name, nexthop: u64, cost: u64) {
        let mut tree = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let node = tree.fill_tree_to_prefix(name);
        for nh in &mut tree.nodes[node].nexthops {
            if nh.nexthop == nexthop {
                nh.cost = cost;
                return;
            }
        }
        tree.nodes[node].nexthops.push(FibNextHopEntry { nexthop, cost });
    }

    fn remove_next_hop(&self, name: &Name, nexthop: u64) {
        let mut tree = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(node) = tree.find_exact_match(name) {
            tree.nodes[node].nexthops.retain(|nh| nh.nexthop != nexthop);
            tree.prune_if_empty(node);
        }
    }

    fn clear_next_hops(&self, name: &Name) {
        if name.is_empty() {
            return; // don't clear root
        }
        let mut tree = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(node) = tree.find_exact_match(name) {
            tree.nodes[node].nexthops.clear();
        }
    }

    fn set_strategy(&self, name: &Name, strategy: Name) {
        let mut tree = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let node = tree.fill_tree_to_prefix(name);
        tree.nodes[node].strategy = Some(strategy);
    }

    fn unset_strategy(&self, name: &Name) {
        if name.is_empty() {
            return; // root keeps the default strategy
        }
        let mut tree = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(node) = tree.find_exact_match(name) {
            tree.nodes[node].strategy = None;
            tree.prune_if_empty(node);
        }
    }

    fn entries(&self) -> Vec<FibStrategyEntry> {
        let tree = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut entries = Vec::new();
        tree.walk(|node| {
            if !node.nexthops.is_empty() {
                entries.push(FibStrategyEntry {
                    name: node.name.clone(),
                    nexthops: node.nexthops.clone(),
                    strategy: node.strategy.clone(),
                });
            }
        });
        entries
    }

    fn strategy_choices(&self) -> Vec<FibStrategyEntry> {
        let tree = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut entries = Vec::new();
        tree.walk(|node| {
            if node.strategy.is_some() {
                entries.push(FibStrategyEntry {
                    name: node.name.clone(),
                    nexthops: node.nexthops.clone(),
                    strategy: node.strategy.clone(),
                });
            }
        });
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(uri: &str) -> Name {
        Name::from_str(uri).unwrap()
    }

    #[test]
    fn test_longest_prefix_next_hops() {
        let fib = FibStrategyTree::new();
        fib.insert_next_hop(&name("/a"), 1, 10);
        fib.insert_next_hop(&name("/a/b/c"), 2, 20);

        assert_eq!(fib.find_next_hops(&name("/a/b")), vec![FibNextHopEntry {
            nexthop: 1,
            cost: 10
        }]);
        assert_eq!(fib.find_next_hops(&name("/a/b/c/d")).len(), 1);
        assert_eq!(fib.find_next_hops(&name("/a/b/c/d"))[0].nexthop, 2);
        assert!(fib.find_next_hops(&name("/z")).is_empty());
    }

    #[test]
    fn test_nexthop_dedup_by_face() {
        let fib = FibStrategyTree::new();
        fib.insert_next_hop(&name("/a"), 1, 10);
        fib.insert_next_hop(&name("/a"), 1, 5);
        let hops = fib.find_next_hops(&name("/a"));
        assert_eq!(hops, vec![FibNextHopEntry { nexthop: 1, cost: 5 }]);
    }

    #[test]
    fn test_remove_and_prune() {
        let fib = FibStrategyTree::new();
        fib.insert_next_hop(&name("/a/b/c"), 1, 10);
        fib.remove_next_hop(&name("/a/b/c"), 1);
        assert!(fib.find_next_hops(&name("/a/b/c")).is_empty());
        assert!(fib.entries().is_empty());
    }

    #[test]
    fn test_strategy_lookup_is_independent() {
        let fib = FibStrategyTree::new();
        fib.insert_next_hop(&name("/a/b"), 1, 10);
        fib.set_strategy(&name("/a"), make_test_strategy());

        // Strategy at /a applies below, even though /a/b has only nexthops
        assert_eq!(fib.find_strategy(&name("/a/b/c")), make_test_strategy());
        assert_eq!(fib.find_strategy(&name("/z")), default_strategy());

        fib.unset_strategy(&name("/a"));
        assert_eq!(fib.find_strategy(&name("/a/b/c")), default_strategy());
    }

    fn make_test_strategy() -> Name {
        crate::table::fib::make_strategy_name("multicast", 1)
    }
}
