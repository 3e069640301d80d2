use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use log::debug;
use nfr_core::{Name, NameComponent};

use crate::table::fib::FibStrategyTable;

/// Route flag: the route applies to all sub-prefixes as well.
pub const ROUTE_FLAG_CHILD_INHERIT: u64 = 1;
/// Route flag: inheritance from shorter prefixes stops here.
pub const ROUTE_FLAG_CAPTURE: u64 = 2;

/// Route registered by a local application.
pub const ROUTE_ORIGIN_APP: u64 = 0;
/// Route from static configuration.
pub const ROUTE_ORIGIN_STATIC: u64 = 255;

/// A route registered for a prefix, keyed by (face, origin).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub face: u64,
    pub origin: u64,
    pub cost: u64,
    pub flags: u64,
    pub expiration_period: Option<Duration>,
}

impl Route {
    pub fn has_child_inherit(&self) -> bool {
        self.flags & ROUTE_FLAG_CHILD_INHERIT != 0
    }

    pub fn has_capture(&self) -> bool {
        self.flags & ROUTE_FLAG_CAPTURE != 0
    }
}

/// Hook invoked when a prefix gains or loses a route, for prefix
/// readvertisement to a routing daemon.
pub trait Readvertise: Send + Sync {
    fn announce(&self, name: &Name, route: &Route);
    fn withdraw(&self, name: &Name, route: &Route);
}

const ROOT: usize = 0;

struct Node {
    component: NameComponent,
    name: Name,
    depth: usize,
    parent: usize,
    children: HashMap<u64, usize>,
    routes: Vec<Route>,
}

struct Trie {
    nodes: Vec<Node>,
    free: Vec<usize>,
}

/// Routing Information Base. Every mutation recomputes the flattened
/// minimum-cost-per-face nexthops of the affected subtree into the FIB,
/// applying child-inherit and capture semantics.
pub struct RibTable {
    inner: Mutex<Trie>,
    fib: Arc<dyn FibStrategyTable>,
    readvertise: RwLock<Option<Arc<dyn Readvertise>>>,
}

impl RibTable {
    pub fn new(fib: Arc<dyn FibStrategyTable>) -> Self {
        Self {
            inner: Mutex::new(Trie {
                nodes: vec![Node {
                    component: NameComponent::new(Vec::new()),
                    name: Name::new(),
                    depth: 0,
                    parent: ROOT,
                    children: HashMap::new(),
                    routes: Vec::new(),
                }],
                free: Vec::new(),
            }),
            fib,
            readvertise: RwLock::new(None),
        }
    }

    pub fn fib(&self) -> &Arc<dyn FibStrategyTable> {
        &self.fib
    }

    pub fn set_readvertise(&self, readvertise: Arc<dyn Readvertise>) {
        *self.readvertise.write().unwrap_or_else(|e| e.into_inner()) = Some(readvertise);
    }

    fn announce(&self, name: &Name, route: &Route) {
        let guard = self.readvertise.read().unwrap_or_else(|e| e.into_inner());
        if let Some(readvertise) = guard.as_ref() {
            readvertise.announce(name, route);
        }
    }

    fn withdraw(&self, name: &Name, route: &Route) {
        let guard = self.readvertise.read().unwrap_or_else(|e| e.into_inner());
        if let Some(readvertise) = guard.as_ref() {
            readvertise.withdraw(name, route);
        }
    }

    /// Add or update (by face and origin) a route for the prefix.
    pub fn add_route(&self, name: &Name, route: Route) {
        let mut trie = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let node = trie.fill_tree_to_prefix(name);

        let mut updated = false;
        for existing in &mut trie.nodes[node].routes {
            if existing.face == route.face && existing.origin == route.origin {
                existing.cost = route.cost;
                existing.flags = route.flags;
                existing.expiration_period = route.expiration_period;
                updated = true;
                break;
            }
        }
        if !updated {
            trie.nodes[node].routes.push(route.clone());
        }
        debug!("rib: added route {} -> face {}", name, route.face);

        trie.update_nexthops(node, self.fib.as_ref());
        drop(trie);
        self.announce(name, &route);
    }

    /// Remove the route for (face, origin) from the prefix.
    pub fn remove_route(&self, name: &Name, face: u64, origin: u64) {
        let mut trie = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let Some(node) = trie.find_exact_match(name) else {
            return;
        };

        let mut removed = None;
        if let Some(pos) = trie.nodes[node]
            .routes
            .iter()
            .position(|r| r.face == face && r.origin == origin)
        {
            removed = Some(trie.nodes[node].routes.remove(pos));
        }

        trie.update_nexthops(node, self.fib.as_ref());
        trie.prune_if_empty(node);
        drop(trie);
        if let Some(route) = removed {
            self.withdraw(name, &route);
        }
    }

    /// Remove every route through `face`, used when a face is destroyed.
    pub fn cleanup_face(&self, face: u64) {
        let mut trie = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut withdrawn = Vec::new();

        let mut stack = vec![ROOT];
        let mut affected = Vec::new();
        while let Some(node) = stack.pop() {
            stack.extend(trie.nodes[node].children.values().copied());
            if trie.nodes[node].routes.iter().any(|r| r.face == face) {
                affected.push(node);
            }
        }

        for node in affected {
            let name = trie.nodes[node].name.clone();
            trie.nodes[node].routes.retain(|route| {
                if route.face == face {
                    withdrawn.push((name.clone(), route.clone()));
                    false
                } else {
                    true
                }
            });
            trie.update_nexthops(node, self.fib.as_ref());
            trie.prune_if_empty(node);
        }
        drop(trie);

        for (name, route) in withdrawn {
            self.withdraw(&name, &route);
        }
    }

    /// All prefixes with their routes.
    pub fn entries(&self) -> Vec<(Name, Vec<Route>)> {
        let trie = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut entries = Vec::new();
        let mut stack = vec![ROOT];
        while let Some(node) = stack.pop() {
            stack.extend(trie.nodes[node].children.values().copied());
            if !trie.nodes[node].routes.is_empty() {
                entries.push((trie.nodes[node].name.clone(), trie.nodes[node].routes.clone()));
            }
        }
        entries
    }
}

impl Trie {
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
                routes: Vec::new(),
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
            && self.nodes[cur].routes.is_empty()
        {
            let parent = self.nodes[cur].parent;
            let hash = self.nodes[cur].component.hash_value();
            self.nodes[parent].children.remove(&hash);
            self.free.push(cur);
            cur = parent;
        }
    }

    /// Recompute FIB nexthops for `node` and everything below it.
    fn update_nexthops(&self, node: usize, fib: &dyn FibStrategyTable) {
        let mut stack = vec![node];
        while let Some(cur) = stack.pop() {
            stack.extend(self.nodes[cur].children.values().copied());

            let name = &self.nodes[cur].name;
            fib.clear_next_hops(name);
            if self.nodes[cur].routes.is_empty() {
                continue;
            }

            let mut routes: Vec<&Route> = self.nodes[cur].routes.iter().collect();

            // Inherit child-inherit routes from ancestors unless captured
            let captured = self.nodes[cur].routes.iter().any(Route::has_capture);
            if !captured {
                let mut ancestor = cur;
                while ancestor != ROOT {
                    ancestor = self.nodes[ancestor].parent;
                    let mut stop = false;
                    for route in &self.nodes[ancestor].routes {
                        if route.has_child_inherit() {
                            routes.push(route);
                        }
                        if route.has_capture() {
                            stop = true;
                            break;
                        }
                    }
                    if stop {
                        break;
                    }
                }
            }

            // Flatten to the minimum cost per face
            let mut min_cost: HashMap<u64, u64> = HashMap::new();
            for route in routes {
                let cost = min_cost.entry(route.face).or_insert(route.cost);
                if route.cost < *cost {
                    *cost = route.cost;
                }
            }
            for (face, cost) in min_cost {
                fib.insert_next_hop(name, face, cost);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::fib_tree::FibStrategyTree;

    fn name(uri: &str) -> Name {
        Name::from_str(uri).unwrap()
    }

    fn route(face: u64, cost: u64, flags: u64) -> Route {
        Route { face, origin: 0, cost, flags, expiration_period: None }
    }

    fn setup() -> (Arc<FibStrategyTree>, RibTable) {
        let fib = Arc::new(FibStrategyTree::new());
        let rib = RibTable::new(fib.clone());
        (fib, rib)
    }

    #[test]
    fn test_add_route_populates_fib() {
        let (fib, rib) = setup();
        rib.add_route(&name("/a"), route(1, 10, 0));
        let hops = fib.find_next_hops(&name("/a/b"));
        assert_eq!(hops.len(), 1);
        assert_eq!(hops[0].nexthop, 1);
    }

    #[test]
    fn test_min_cost_flattening() {
        let (fib, rib) = setup();
        rib.add_route(&name("/a"), Route { origin: 0, ..route(1, 10, 0) });
        rib.add_route(&name("/a"), Route { origin: 1, ..route(1, 5, 0) });
        let hops = fib.find_next_hops(&name("/a"));
        assert_eq!(hops.len(), 1);
        assert_eq!(hops[0].cost, 5);
    }

    #[test]
    fn test_child_inherit() {
        let (fib, rib) = setup();
        rib.add_route(&name("/a"), route(1, 10, ROUTE_FLAG_CHILD_INHERIT));
        rib.add_route(&name("/a/b"), route(2, 20, 0));

        let mut hops = fib.find_next_hops(&name("/a/b"));
        hops.sort_by_key(|nh| nh.nexthop);
        assert_eq!(hops.len(), 2);
        assert_eq!(hops[0].nexthop, 1);
        assert_eq!(hops[1].nexthop, 2);
    }

    #[test]
    fn test_capture_blocks_inheritance() {
        let (fib, rib) = setup();
        rib.add_route(&name("/a"), route(1, 10, ROUTE_FLAG_CHILD_INHERIT));
        rib.add_route(&name("/a/b"), route(2, 20, ROUTE_FLAG_CAPTURE));

        let hops = fib.find_next_hops(&name("/a/b"));
        assert_eq!(hops.len(), 1);
        assert_eq!(hops[0].nexthop, 2);
    }

    #[test]
    fn test_remove_route_clears_fib() {
        let (fib, rib) = setup();
        rib.add_route(&name("/a"), route(1, 10, 0));
        rib.remove_route(&name("/a"), 1, 0);
        assert!(fib.find_next_hops(&name("/a")).is_empty());
        assert!(rib.entries().is_empty());
    }

    #[test]
    fn test_cleanup_face() {
        let (fib, rib) = setup();
        rib.add_route(&name("/a"), route(1, 10, 0));
        rib.add_route(&name("/b"), route(1, 10, 0));
        rib.add_route(&name("/b"), route(2, 20, 0));
        rib.cleanup_face(1);

        assert!(fib.find_next_hops(&name("/a")).is_empty());
        let hops = fib.find_next_hops(&name("/b"));
        assert_eq!(hops.len(), 1);
        assert_eq!(hops[0].nexthop, 2);
    }

    #[test]
    fn test_readvertise_hooks() {
        use std::sync::Mutex as StdMutex;

        #[derive(Default)]
        struct Recorder {
            announced: StdMutex<Vec<Name>>,
            withdrawn: StdMutex<Vec<Name>>,
        }
        impl Readvertise for Recorder {
            fn announce(&self, name: &Name, _route: &Route) {
                self.announced.lock().unwrap().push(name.clone());
            }
            fn withdraw(&self, name: &Name, _route: &Route) {
                self.withdrawn.lock().unwrap().push(name.clone());
            }
        }

        let (_fib, rib) = setup();
        let recorder = Arc::new(Recorder::default());
        rib.set_readvertise(recorder.clone());

        rib.add_route(&name("/a"), route(1, 10, 0));
        rib.remove_route(&name("/a"), 1, 0);

        assert_eq!(recorder.announced.lock().unwrap().as_slice(), &[name("/a")]);
        assert_eq!(recorder.withdrawn.lock().unwrap().as_slice(), &[name("/a")]);
    }
}
