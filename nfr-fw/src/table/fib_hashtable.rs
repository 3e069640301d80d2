use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use nfr_core::Name;

use crate::table::fib::{default_strategy, FibNextHopEntry, FibStrategyEntry, FibStrategyTable};

struct RealEntry {
    name: Name,
    nexthops: Vec<FibNextHopEntry>,
    strategy: Option<Name>,
}

/// Virtual node at a depth-m prefix, tracking how many real entries exist
/// at each depth below it. The maximum tracked depth bounds the probe.
#[derive(Default)]
struct VirtEntry {
    depths: BTreeMap<usize, usize>,
}

impl VirtEntry {
    fn max_depth(&self) -> usize {
        self.depths.keys().next_back().copied().unwrap_or(0)
    }
}

struct Table {
    m: usize,
    /// Real entries keyed by the hash of their full prefix.
    real: HashMap<u64, RealEntry>,
    /// Virtual nodes keyed by the hash of the depth-m prefix.
    virt: HashMap<u64, VirtEntry>,
}

/// Hashtable backend of the FIB-Strategy table: O(1) average per probed
/// depth, with virtual nodes limiting how many depths a lookup probes.
pub struct FibStrategyHashTable {
    inner: RwLock<Table>,
}

impl FibStrategyHashTable {
    pub fn new(m: usize) -> Self {
        let mut real = HashMap::new();
        // Root entry carries the default strategy
        real.insert(
            Name::new().hash_value(),
            RealEntry {
                name: Name::new(),
                nexthops: Vec::new(),
                strategy: Some(default_strategy()),
            },
        );
        Self {
            inner: RwLock::new(Table {
                m,
                real,
                virt: HashMap::new(),
            }),
        }
    }
}

impl Table {
    /// Depths to probe for a lookup on `name`, longest first. Prefixes
    /// deeper than m are only probed up to the deepest real entry the
    /// virtual node has seen.
    fn probe_depths(&self, name: &Name, hashes: &[u64]) -> Vec<usize> {
        let n = name.len();
        let mut depths = Vec::new();
        if n > self.m {
            if let Some(virt) = self.virt.get(&hashes[self.m]) {
                let start = virt.max_depth().min(n);
                depths.extend((self.m + 1..=start).rev());
            }
        }
        depths.extend((0..=self.m.min(n)).rev());
        depths
    }

    fn get_or_create(&mut self, name: &Name) -> &mut RealEntry {
        let hashes = name.prefix_hashes();
        let hash = hashes[name.len()];
        if !self.real.contains_key(&hash) && name.len() > self.m {
            *self
                .virt
                .entry(hashes[self.m])
                .or_default()
                .depths
                .entry(name.len())
                .or_insert(0) += 1;
        }
        self.real.entry(hash).or_insert_with(|| RealEntry {
            name: name.clone(),
            nexthops: Vec::new(),
            strategy: None,
        })
    }

    fn prune_if_empty(&mut self, name: &Name) {
        if name.is_empty() {
            return;
        }
        let hashes = name.prefix_hashes();
        let hash = hashes[name.len()];
        let empty = match self.real.get(&hash) {
            Some(entry) => entry.nexthops.is_empty() && entry.strategy.is_none(),
            None => false,
        };
        if !empty {
            return;
        }
        self.real.remove(&hash);
        if name.len() > self.m {
            if let Some(virt) = self.virt.get_mut(&hashes[self.m]) {
                if let Some(count) = virt.depths.get_mut(&name.len()) {
                    *count -= 1;
                    if *count == 0 {
                        virt.depths.remove(&name.len());
                    }
                }
                if virt.depths.is_empty() {
                    self.virt.remove(&hashes[self.m]);
                }
            }
        }
    }
}

impl FibStrategyTable for FibStrategyHashTable {
    fn find_next_hops(&self, name: &Name) -> Vec<FibNextHopEntry> {
        let table = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let hashes = name.prefix_hashes();
        for depth in table.probe_depths(name, &hashes) {
            if let Some(entry) = table.real.get(&hashes[depth]) {
                if !entry.nexthops.is_empty() && entry.name == name.get_prefix(depth) {
                    return entry.nexthops.clone();
                }
            }
        }
        Vec::new()
    }

    fn find_strategy(&self, name: &Name) -> Name {
        let table = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let hashes = name.prefix_hashes();
        for depth in table.probe_depths(name, &hashes) {
            if let Some(entry) = table.real.get(&hashes[depth]) {
                if entry.name == name.get_prefix(depth) {
                    if let Some(strategy) = &entry.strategy {
                        return strategy.clone();
                    }
                }
            }
        }
        default_strategy()
    }

    fn insert_next_hop(&self, name: &Name, nexthop: u64, cost: u64) {
        let mut table = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let entry = table.get_or_create(name);
        for nh in &mut entry.nexthops {
            if nh.nexthop == nexthop {
                nh.cost = cost;
                return;
            }
        }
        entry.nexthops.push(FibNextHopEntry { nexthop, cost });
    }

    fn remove_next_hop(&self, name: &Name, nexthop: u64) {
        let mut table = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let hash = name.hash_value();
        if let Some(entry) = table.real.get_mut(&hash) {
            entry.nexthops.retain(|nh| nh.nexthop != nexthop);
        }
        table.prune_if_empty(name);
    }

    fn clear_next_hops(&self, name: &Name) {
        if name.is_empty() {
            return; // don't clear root
        }
        let mut table = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = table.real.get_mut(&name.hash_value()) {
            entry.nexthops.clear();
        }
    }

    fn set_strategy(&self, name: &Name, strategy: Name) {
        let mut table = self.inner.write().unwrap_or_else(|e| e.into_inner());
        table.get_or_create(name).strategy = Some(strategy);
    }

    fn unset_strategy(&self, name: &Name) {
        if name.is_empty() {
            return; // root keeps the default strategy
        }
        let mut table = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = table.real.get_mut(&name.hash_value()) {
            entry.strategy = None;
        }
        table.prune_if_empty(name);
    }

    fn entries(&self) -> Vec<FibStrategyEntry> {
        let table = self.inner.read().unwrap_or_else(|e| e.into_inner());
        table
            .real
            .values()
            .filter(|entry| !entry.nexthops.is_empty())
            .map(|entry| FibStrategyEntry {
                name: entry.name.clone(),
                nexthops: entry.nexthops.clone(),
                strategy: entry.strategy.clone(),
            })
            .collect()
    }

    fn strategy_choices(&self) -> Vec<FibStrategyEntry> {
        let table = self.inner.read().unwrap_or_else(|e| e.into_inner());
        table
            .real
            .values()
            .filter(|entry| entry.strategy.is_some())
            .map(|entry| FibStrategyEntry {
                name: entry.name.clone(),
                nexthops: entry.nexthops.clone(),
                strategy: entry.strategy.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::fib::make_strategy_name;
    use crate::table::fib_tree::FibStrategyTree;

    fn name(uri: &str) -> Name {
        Name::from_str(uri).unwrap()
    }

    #[test]
    fn test_longest_prefix_beyond_virtual_depth() {
        // m = 2, entries both above and below the virtual layer
        let fib = FibStrategyHashTable::new(2);
        fib.insert_next_hop(&name("/a"), 1, 10);
        fib.insert_next_hop(&name("/a/b/c/d"), 2, 20);

        assert_eq!(fib.find_next_hops(&name("/a/b"))[0].nexthop, 1);
        assert_eq!(fib.find_next_hops(&name("/a/b/c/d/e"))[0].nexthop, 2);
        assert_eq!(fib.find_next_hops(&name("/a/b/c"))[0].nexthop, 1);
        assert!(fib.find_next_hops(&name("/z/z/z/z")).is_empty());
    }

    #[test]
    fn test_removal_updates_virtual_nodes() {
        let fib = FibStrategyHashTable::new(1);
        fib.insert_next_hop(&name("/a/b/c"), 1, 10);
        fib.remove_next_hop(&name("/a/b/c"), 1);

        assert!(fib.find_next_hops(&name("/a/b/c")).is_empty());
        assert!(fib.entries().is_empty());
        let table = fib.inner.read().unwrap();
        assert!(table.virt.is_empty());
    }

    #[test]
    fn test_strategy_default_and_override() {
        let fib = FibStrategyHashTable::new(2);
        assert_eq!(fib.find_strategy(&name("/a/b/c")), default_strategy());

        let multicast = make_strategy_name("multicast", 1);
        fib.set_strategy(&name("/a/b/c"), multicast.clone());
        assert_eq!(fib.find_strategy(&name("/a/b/c/d")), multicast);
        assert_eq!(fib.find_strategy(&name("/a/b")), default_strategy());

        fib.unset_strategy(&name("/a/b/c"));
        assert_eq!(fib.find_strategy(&name("/a/b/c/d")), default_strategy());
    }

    #[test]
    fn test_parity_with_nametree() {
        let tree = FibStrategyTree::new();
        let hash = FibStrategyHashTable::new(2);
        let fibs: [&dyn FibStrategyTable; 2] = [&tree, &hash];

        for fib in fibs {
            fib.insert_next_hop(&name("/p"), 1, 5);
            fib.insert_next_hop(&name("/p/q/r"), 2, 1);
            fib.insert_next_hop(&name("/p/q/r"), 3, 2);
            fib.remove_next_hop(&name("/p/q/r"), 3);
            fib.set_strategy(&name("/p/q"), make_strategy_name("multicast", 1));
        }

        for lookup in ["/p", "/p/q", "/p/q/r", "/p/q/r/s", "/x"] {
            let mut a = tree.find_next_hops(&name(lookup));
            let mut b = hash.find_next_hops(&name(lookup));
            a.sort_by_key(|nh| nh.nexthop);
            b.sort_by_key(|nh| nh.nexthop);
            assert_eq!(a, b, "nexthop mismatch for {lookup}");
            assert_eq!(
                tree.find_strategy(&name(lookup)),
                hash.find_strategy(&name(lookup)),
                "strategy mismatch for {lookup}"
            );
        }
    }
}
