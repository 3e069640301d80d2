use std::collections::{BTreeMap, HashMap};

/// Content store replacement policy. The table notifies the policy of
/// entry lifecycle events and asks it for eviction victims after inserts.
/// Entries are identified by their name hash index.
pub trait CsReplacementPolicy: Send {
    /// A new entry was inserted under `index`.
    fn after_insert(&mut self, index: u64);
    /// An existing entry under `index` was replaced in place.
    fn after_refresh(&mut self, index: u64);
    /// The entry under `index` is about to be used to satisfy an Interest.
    fn before_use(&mut self, index: u64);
    /// An entry was erased by the table for a reason other than eviction.
    fn after_erase(&mut self, index: u64);
    /// Return the indices of entries to evict to get back under capacity.
    fn evict_entries(&mut self) -> Vec<u64>;
}

/// Least-recently-used replacement: every insert, refresh, and use moves
/// the entry to the back of the recency order.
pub struct CsLru {
    capacity: usize,
    counter: u64,
    recency: HashMap<u64, u64>,
    order: BTreeMap<u64, u64>,
}

impl CsLru {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            counter: 0,
            recency: HashMap::new(),
            order: BTreeMap::new(),
        }
    }

    fn touch(&mut self, index: u64) {
        if let Some(prev) = self.recency.remove(&index) {
            self.order.remove(&prev);
        }
        self.counter += 1;
        self.recency.insert(index, self.counter);
        self.order.insert(self.counter, index);
    }
}

impl CsReplacementPolicy for CsLru {
    fn after_insert(&mut self, index: u64) {
        self.touch(index);
    }

    fn after_refresh(&mut self, index: u64) {
        self.touch(index);
    }

    fn before_use(&mut self, index: u64) {
        self.touch(index);
    }

    fn after_erase(&mut self, index: u64) {
        if let Some(prev) = self.recency.remove(&index) {
            self.order.remove(&prev);
        }
    }

    fn evict_entries(&mut self) -> Vec<u64> {
        let mut victims = Vec::new();
        while self.recency.len() > self.capacity {
            let (&recency, &index) = match self.order.iter().next() {
                Some(front) => front,
                None => break,
            };
            self.order.remove(&recency);
            self.recency.remove(&index);
            victims.push(index);
        }
        victims
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lru_evicts_oldest() {
        let mut lru = CsLru::new(2);
        lru.after_insert(1);
        lru.after_insert(2);
        lru.after_insert(3);
        assert_eq!(lru.evict_entries(), vec![1]);
    }

    #[test]
    fn test_use_refreshes_recency() {
        let mut lru = CsLru::new(2);
        lru.after_insert(1);
        lru.after_insert(2);
        lru.before_use(1);
        lru.after_insert(3);
        assert_eq!(lru.evict_entries(), vec![2]);
    }

    #[test]
    fn test_erase_removes_tracking() {
        let mut lru = CsLru::new(1);
        lru.after_insert(1);
        lru.after_insert(2);
        lru.after_erase(1);
        assert!(lru.evict_entries().is_empty());
    }
}
