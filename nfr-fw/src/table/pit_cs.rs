use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::{Duration, Instant};

use nfr_core::{Data, Interest, Name, NameComponent};

use crate::config::ContentStoreConfig;
use crate::table::cs_replacement::{CsLru, CsReplacementPolicy};

/// Interval at which the owning thread should drive `update`.
pub const PIT_UPDATE_INTERVAL: Duration = Duration::from_millis(200);

/// Default Interest lifetime when the packet does not carry one.
pub const DEFAULT_INTEREST_LIFETIME: Duration = Duration::from_millis(4000);

// 1MB of token slots
const PIT_TOKEN_TABLE_SIZE: usize = 125_000;

/// Handle to a PIT entry inside its owning `PitCsTree`.
pub type PitEntryId = usize;

/// Records an incoming Interest on a given face.
#[derive(Debug, Clone)]
pub struct PitInRecord {
    pub face: u64,
    pub latest_timestamp: Instant,
    pub latest_nonce: u32,
    pub expiration_time: Instant,
    pub pit_token: Option<Vec<u8>>,
}

/// Records an outgoing Interest on a given face.
#[derive(Debug, Clone)]
pub struct PitOutRecord {
    pub face: u64,
    pub latest_timestamp: Instant,
    pub latest_nonce: u32,
    pub expiration_time: Instant,
}

/// A pending Interest. Interests aggregate into the same entry only when
/// name, CanBePrefix, MustBeFresh, and forwarding hint all match.
#[derive(Debug)]
pub struct PitEntry {
    pub name: Name,
    pub can_be_prefix: bool,
    pub must_be_fresh: bool,
    pub forwarding_hint: Option<Name>,
    pub in_records: HashMap<u64, PitInRecord>,
    pub out_records: HashMap<u64, PitOutRecord>,
    pub expiration: Option<Instant>,
    pub satisfied: bool,
    token: u32,
    node: usize,
}

impl PitEntry {
    pub fn token(&self) -> u32 {
        self.token
    }

    /// Find or insert the in-record for `face`. Returns whether the entry
    /// was already pending on this face, the previous nonce if so, and the
    /// new record expiration.
    pub fn insert_in_record(
        &mut self,
        interest: &Interest,
        face: u64,
        pit_token: Option<Vec<u8>>,
    ) -> (bool, u32, Instant) {
        let now = Instant::now();
        let expiration = now + interest.lifetime.unwrap_or(DEFAULT_INTEREST_LIFETIME);
        let nonce = interest.nonce.unwrap_or(0);

        match self.in_records.get_mut(&face) {
            Some(record) => {
                let previous_nonce = record.latest_nonce;
                record.latest_nonce = nonce;
                record.latest_timestamp = now;
                record.expiration_time = expiration;
                (true, previous_nonce, expiration)
            }
            None => {
                self.in_records.insert(
                    face,
                    PitInRecord {
                        face,
                        latest_timestamp: now,
                        latest_nonce: nonce,
                        expiration_time: expiration,
                        pit_token,
                    },
                );
                (false, 0, expiration)
            }
        }
    }

    /// Create or refresh the out-record for `face`.
    pub fn insert_out_record(&mut self, interest: &Interest, face: u64) {
        let now = Instant::now();
        let expiration = now + interest.lifetime.unwrap_or(DEFAULT_INTEREST_LIFETIME);
        let nonce = interest.nonce.unwrap_or(0);

        let record = self.out_records.entry(face).or_insert(PitOutRecord {
            face,
            latest_timestamp: now,
            latest_nonce: nonce,
            expiration_time: expiration,
        });
        record.latest_nonce = nonce;
        record.latest_timestamp = now;
        record.expiration_time = expiration;
    }

    pub fn clear_in_records(&mut self) {
        self.in_records.clear();
    }

    pub fn clear_out_records(&mut self) {
        self.out_records.clear();
    }
}

/// A cached Data packet.
#[derive(Debug, Clone)]
pub struct CsEntry {
    /// Name hash, used as the content store index.
    pub index: u64,
    pub wire: Vec<u8>,
    pub stale_time: Instant,
}

impl CsEntry {
    pub fn is_fresh(&self, now: Instant) -> bool {
        now < self.stale_time
    }
}

struct Node {
    component: NameComponent,
    name: Name,
    depth: usize,
    parent: usize,
    children: HashMap<u64, usize>,
    pit_entries: Vec<PitEntryId>,
    cs_entry: Option<CsEntry>,
}

/// Combined PIT and content store backed by a single name trie.
///
/// Owned exclusively by one forwarding thread; nodes and entries live in
/// index-addressed arenas with free lists so removal recycles slots.
pub struct PitCsTree {
    nodes: Vec<Node>,
    free_nodes: Vec<usize>,
    entries: Vec<Option<PitEntry>>,
    free_entries: Vec<usize>,

    n_pit_entries: usize,
    next_token: u32,
    /// Fast path from PIT token to entry, indexed by `token % size`.
    token_table: Vec<Option<PitEntryId>>,

    n_cs_entries: usize,
    cs_map: HashMap<u64, usize>,
    cs_admit: bool,
    cs_serve: bool,
    replacement: Box<dyn CsReplacementPolicy>,

    /// Lazy-deletion expiry queue; entry state is the source of truth.
    expiry_queue: BinaryHeap<Reverse<(Instant, PitEntryId, u32)>>,
}

const ROOT: usize = 0;

impl PitCsTree {
    pub fn new(cs: &ContentStoreConfig) -> Self {
        // Replacement policy name is validated at startup; "lru" is the
        // only implemented policy.
        let replacement = Box::new(CsLru::new(cs.capacity));
        Self {
            nodes: vec![Node {
                component: NameComponent::new(Vec::new()),
                name: Name::new(),
                depth: 0,
                parent: ROOT,
                children: HashMap::new(),
                pit_entries: Vec::new(),
                cs_entry: None,
            }],
            free_nodes: Vec::new(),
            entries: Vec::new(),
            free_entries: Vec::new(),
            n_pit_entries: 0,
            next_token: 0,
            token_table: vec![None; PIT_TOKEN_TABLE_SIZE],
            n_cs_entries: 0,
            cs_map: HashMap::new(),
            cs_admit: cs.admit,
            cs_serve: cs.serve,
            replacement,
            expiry_queue: BinaryHeap::new(),
        }
    }

    pub fn pit_size(&self) -> usize {
        self.n_pit_entries
    }

    pub fn cs_size(&self) -> usize {
        self.n_cs_entries
    }

    pub fn is_cs_admitting(&self) -> bool {
        self.cs_admit
    }

    pub fn is_cs_serving(&self) -> bool {
        self.cs_serve
    }

    pub fn entry(&self, id: PitEntryId) -> Option<&PitEntry> {
        self.entries.get(id).and_then(|slot| slot.as_ref())
    }

    pub fn entry_mut(&mut self, id: PitEntryId) -> Option<&mut PitEntry> {
        self.entries.get_mut(id).and_then(|slot| slot.as_mut())
    }

    /// Insert an Interest into the PIT, aggregating with an existing entry
    /// when the identity tuple matches. The second return value is true if
    /// the nonce duplicates an in-record from a *different* face, which
    /// indicates a loop rather than a retransmission.
    pub fn insert_interest(
        &mut self,
        interest: &Interest,
        hint: Option<&Name>,
        in_face: u64,
    ) -> (PitEntryId, bool) {
        let node = self.fill_tree_to_prefix(&interest.name);

        let mut found = None;
        for &id in &self.nodes[node].pit_entries {
            if let Some(entry) = self.entry(id) {
                if entry.can_be_prefix == interest.can_be_prefix
                    && entry.must_be_fresh == interest.must_be_fresh
                    && entry.forwarding_hint.as_ref() == hint
                {
                    found = Some(id);
                    break;
                }
            }
        }

        let id = match found {
            Some(id) => id,
            None => {
                self.n_pit_entries += 1;
                self.next_token = self.next_token.wrapping_add(1);
                let entry = PitEntry {
                    name: self.nodes[node].name.clone(),
                    can_be_prefix: interest.can_be_prefix,
                    must_be_fresh: interest.must_be_fresh,
                    forwarding_hint: hint.cloned(),
                    in_records: HashMap::new(),
                    out_records: HashMap::new(),
                    expiration: None,
                    satisfied: false,
                    token: self.next_token,
                    node,
                };
                let token = entry.token;
                let id = match self.free_entries.pop() {
                    Some(id) => {
                        self.entries[id] = Some(entry);
                        id
                    }
                    None => {
                        self.entries.push(Some(entry));
                        self.entries.len() - 1
                    }
                };
                self.nodes[node].pit_entries.push(id);
                let slot = token as usize % self.token_table.len();
                self.token_table[slot] = Some(id);
                id
            }
        };

        // A matching nonce on the same face is a retransmission, not a loop
        if let Some(entry) = self.entry(id) {
            for (&face, record) in &entry.in_records {
                if face != in_face && interest.nonce == Some(record.latest_nonce) {
                    return (id, true);
                }
            }
        }

        // Pipeline will reschedule from the in-record
        if let Some(entry) = self.entry_mut(id) {
            entry.expiration = None;
        }

        (id, false)
    }

    /// Remove a PIT entry, pruning now-empty trie nodes and recycling the
    /// entry slot. Returns the removed entry, if it still existed.
    pub fn remove_interest(&mut self, id: PitEntryId) -> Option<PitEntry> {
        let entry = self.entries.get_mut(id).and_then(|slot| slot.take())?;
        self.free_entries.push(id);
        self.n_pit_entries -= 1;

        let node = entry.node;
        self.nodes[node].pit_entries.retain(|&e| e != id);
        self.prune_if_empty(node);

        // Clear the token slot only if it still points at this entry
        let slot = entry.token as usize % self.token_table.len();
        if self.token_table[slot] == Some(id) {
            self.token_table[slot] = None;
        }

        Some(entry)
    }

    /// Find the PIT entry exactly matching the Interest's identity.
    pub fn find_interest_exact_match(&self, interest: &Interest) -> Option<PitEntryId> {
        let node = self.find_exact_match(&interest.name)?;
        for &id in &self.nodes[node].pit_entries {
            if let Some(entry) = self.entry(id) {
                if entry.can_be_prefix == interest.can_be_prefix
                    && entry.must_be_fresh == interest.must_be_fresh
                {
                    return Some(id);
                }
            }
        }
        None
    }

    /// Find all PIT entries a Data packet could satisfy. A valid PIT token
    /// short-circuits to a single entry; otherwise entries at every prefix
    /// of the Data name match if CanBePrefix is set or the depth is exact.
    pub fn find_interest_prefix_match_by_data(
        &self,
        data: &Data,
        token: Option<u32>,
    ) -> Vec<PitEntryId> {
        if let Some(token) = token {
            let slot = token as usize % self.token_table.len();
            if let Some(id) = self.token_table[slot] {
                if let Some(entry) = self.entry(id) {
                    if entry.token == token {
                        return vec![id];
                    }
                }
            }
        }
        self.find_interest_prefix_match_by_name(&data.name)
    }

    fn find_interest_prefix_match_by_name(&self, name: &Name) -> Vec<PitEntryId> {
        let mut matching = Vec::new();
        let data_name_len = name.len();
        let mut cur = self.find_longest_prefix(name);
        loop {
            for &id in &self.nodes[cur].pit_entries {
                if let Some(entry) = self.entry(id) {
                    if entry.can_be_prefix || self.nodes[cur].depth == data_name_len {
                        matching.push(id);
                    }
                }
            }
            if cur == ROOT {
                break;
            }
            cur = self.nodes[cur].parent;
        }
        matching
    }

    /// Set the entry's expiration and schedule it on the expiry queue.
    pub fn update_expiration(&mut self, id: PitEntryId, when: Instant) {
        let token = match self.entry_mut(id) {
            Some(entry) => {
                entry.expiration = Some(when);
                entry.token
            }
            None => return,
        };
        self.expiry_queue.push(Reverse((when, id, token)));
    }

    /// Remove and return all PIT entries due at `now`. The caller finalizes
    /// each returned entry (dead nonce seeding, counters).
    pub fn update(&mut self, now: Instant) -> Vec<PitEntry> {
        let mut expired = Vec::new();
        while let Some(&Reverse((deadline, id, token))) = self.expiry_queue.peek() {
            if deadline > now {
                break;
            }
            self.expiry_queue.pop();

            // Stale queue items: the entry may be gone, reused, or moved
            let current = match self.entry(id) {
                Some(entry) if entry.token == token => entry.expiration,
                _ => continue,
            };
            match current {
                Some(expiration) if expiration <= now => {
                    if let Some(entry) = self.remove_interest(id) {
                        expired.push(entry);
                    }
                }
                Some(expiration) => {
                    self.expiry_queue.push(Reverse((expiration, id, token)));
                }
                None => {}
            }
        }
        expired
    }

    /// Insert a Data packet into the content store, replacing any entry
    /// with the same name in place.
    pub fn insert_data(&mut self, data: &Data, wire: &[u8]) {
        let index = data.name.hash_value();
        let now = Instant::now();
        let stale_time = match data.freshness_period() {
            Some(freshness) => now + freshness,
            None => now, // never fresh
        };

        if let Some(&node) = self.cs_map.get(&index) {
            if let Some(entry) = self.nodes[node].cs_entry.as_mut() {
                entry.wire = wire.to_vec();
                entry.stale_time = stale_time;
                self.replacement.after_refresh(index);
                return;
            }
        }

        self.n_cs_entries += 1;
        let node = self.fill_tree_to_prefix(&data.name);
        self.nodes[node].cs_entry = Some(CsEntry {
            index,
            wire: wire.to_vec(),
            stale_time,
        });
        self.cs_map.insert(index, node);
        self.replacement.after_insert(index);

        for victim in self.replacement.evict_entries() {
            self.erase_cs_entry(victim);
        }
    }

    /// Find the best matching content store entry for an Interest, if any.
    /// Honors MustBeFresh; with CanBePrefix, searches below the matched
    /// node depth-first.
    pub fn find_matching_data(&mut self, interest: &Interest) -> Option<&CsEntry> {
        let now = Instant::now();
        let node = self.find_exact_match(&interest.name)?;
        let found = if interest.can_be_prefix {
            self.find_matching_data_prefix(node, interest, now)
        } else {
            match &self.nodes[node].cs_entry {
                Some(entry) if !interest.must_be_fresh || entry.is_fresh(now) => Some(node),
                _ => None,
            }
        }?;
        if let Some(entry) = &self.nodes[found].cs_entry {
            self.replacement.before_use(entry.index);
        }
        self.nodes[found].cs_entry.as_ref()
    }

    // DFS below the matched node; the Interest name is fully consumed at
    // or above `node`, so everything underneath matches by prefix.
    fn find_matching_data_prefix(
        &self,
        node: usize,
        interest: &Interest,
        now: Instant,
    ) -> Option<usize> {
        if let Some(entry) = &self.nodes[node].cs_entry {
            if !interest.must_be_fresh || entry.is_fresh(now) {
                return Some(node);
            }
        }
        if self.nodes[node].depth >= interest.name.len() {
            for &child in self.nodes[node].children.values() {
                if let Some(found) = self.find_matching_data_prefix(child, interest, now) {
                    return Some(found);
                }
            }
        }
        None
    }

    fn erase_cs_entry(&mut self, index: u64) {
        if let Some(node) = self.cs_map.remove(&index) {
            self.nodes[node].cs_entry = None;
            self.n_cs_entries -= 1;
            self.replacement.after_erase(index);
            self.prune_if_empty(node);
        }
    }

    fn find_longest_prefix(&self, name: &Name) -> usize {
        let mut cur = ROOT;
        loop {
            let depth = self.nodes[cur].depth;
            if name.len() <= depth {
                return cur;
            }
            let hash = match name.get(depth) {
                Some(component) => component.hash_value(),
                None => return cur,
            };
            match self.nodes[cur].children.get(&hash) {
                Some(&child) => cur = child,
                None => return cur,
            }
        }
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
                pit_entries: Vec::new(),
                cs_entry: None,
            };
            let child = match self.free_nodes.pop() {
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
            && self.nodes[cur].pit_entries.is_empty()
            && self.nodes[cur].cs_entry.is_none()
        {
            let parent = self.nodes[cur].parent;
            let hash = self.nodes[cur].component.hash_value();
            self.nodes[parent].children.remove(&hash);
            self.free_nodes.push(cur);
            cur = parent;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn make_tree() -> PitCsTree {
        PitCsTree::new(&ContentStoreConfig::default())
    }

    fn interest(uri: &str) -> Interest {
        Interest::new(Name::from_str(uri).unwrap()).with_nonce(1)
    }

    fn data(uri: &str) -> Data {
        Data::new(Name::from_str(uri).unwrap(), vec![0xAA])
    }

    #[test]
    fn test_insert_and_exact_match() {
        let mut tree = make_tree();
        let i = interest("/a/b/c");
        let (id, duplicate) = tree.insert_interest(&i, None, 1);
        assert!(!duplicate);
        assert_eq!(tree.pit_size(), 1);
        assert_eq!(tree.find_interest_exact_match(&i), Some(id));
        assert_eq!(tree.find_interest_exact_match(&interest("/a/b")), None);
    }

    #[test]
    fn test_identity_tuple_aggregation() {
        let mut tree = make_tree();
        let plain = interest("/a");
        let cbp = interest("/a").with_can_be_prefix(true);

        let (id1, _) = tree.insert_interest(&plain, None, 1);
        let (id2, _) = tree.insert_interest(&plain, None, 2);
        let (id3, _) = tree.insert_interest(&cbp, None, 1);
        assert_eq!(id1, id2);
        assert_ne!(id1, id3);
        assert_eq!(tree.pit_size(), 2);
    }

    #[test]
    fn test_duplicate_nonce_only_across_faces() {
        let mut tree = make_tree();
        let i = interest("/a").with_nonce(7);

        let (id, duplicate) = tree.insert_interest(&i, None, 1);
        assert!(!duplicate);
        tree.entry_mut(id).unwrap().insert_in_record(&i, 1, None);

        // Same nonce, same face: retransmission
        let (_, duplicate) = tree.insert_interest(&i, None, 1);
        assert!(!duplicate);

        // Same nonce, different face: loop
        let (_, duplicate) = tree.insert_interest(&i, None, 2);
        assert!(duplicate);

        // Different nonce, different face: fine
        let fresh = interest("/a").with_nonce(8);
        let (_, duplicate) = tree.insert_interest(&fresh, None, 2);
        assert!(!duplicate);
    }

    #[test]
    fn test_remove_interest_prunes() {
        let mut tree = make_tree();
        let (id, _) = tree.insert_interest(&interest("/a/b/c"), None, 1);
        assert!(tree.remove_interest(id).is_some());
        assert!(tree.remove_interest(id).is_none());
        assert_eq!(tree.pit_size(), 0);
        // All interior nodes were pruned back into the free list
        assert_eq!(tree.free_nodes.len(), 3);
    }

    #[test]
    fn test_prefix_match_by_data() {
        let mut tree = make_tree();
        let (short, _) =
            tree.insert_interest(&interest("/a").with_can_be_prefix(true), None, 1);
        let (exact, _) = tree.insert_interest(&interest("/a/b"), None, 1);
        let (_deeper, _) = tree.insert_interest(&interest("/a/b/c/d"), None, 1);

        let mut matches = tree.find_interest_prefix_match_by_data(&data("/a/b"), None);
        matches.sort_unstable();
        let mut expected = vec![short, exact];
        expected.sort_unstable();
        assert_eq!(matches, expected);
    }

    #[test]
    fn test_token_fast_path() {
        let mut tree = make_tree();
        let (id, _) = tree.insert_interest(&interest("/a"), None, 1);
        let token = tree.entry(id).unwrap().token();

        // Valid token hits even though the name would not match
        let matches = tree.find_interest_prefix_match_by_data(&data("/z"), Some(token));
        assert_eq!(matches, vec![id]);

        // Invalid token falls back to the name walk
        let matches = tree.find_interest_prefix_match_by_data(&data("/z"), Some(token + 999));
        assert!(matches.is_empty());
    }

    #[test]
    fn test_cs_insert_and_match() {
        let mut tree = make_tree();
        tree.insert_data(&data("/a/b"), &[1, 2, 3]);
        assert_eq!(tree.cs_size(), 1);

        assert!(tree.find_matching_data(&interest("/a/b")).is_some());
        assert!(tree.find_matching_data(&interest("/a")).is_none());
        assert!(tree
            .find_matching_data(&interest("/a").with_can_be_prefix(true))
            .is_some());
    }

    #[test]
    fn test_cs_must_be_fresh() {
        let mut tree = make_tree();
        // No freshness period: immediately stale
        tree.insert_data(&data("/a"), &[1]);
        assert!(tree
            .find_matching_data(&interest("/a").with_must_be_fresh(true))
            .is_none());
        assert!(tree.find_matching_data(&interest("/a")).is_some());

        let fresh = data("/b").with_freshness_period(Duration::from_secs(10));
        tree.insert_data(&fresh, &[2]);
        assert!(tree
            .find_matching_data(&interest("/b").with_must_be_fresh(true))
            .is_some());
    }

    #[test]
    fn test_cs_replace_in_place() {
        let mut tree = make_tree();
        tree.insert_data(&data("/a"), &[1]);
        tree.insert_data(&data("/a"), &[2]);
        assert_eq!(tree.cs_size(), 1);
        assert_eq!(tree.find_matching_data(&interest("/a")).unwrap().wire, vec![2]);
    }

    #[test]
    fn test_cs_capacity_eviction() {
        let mut tree = PitCsTree::new(&ContentStoreConfig {
            capacity: 1,
            ..ContentStoreConfig::default()
        });
        tree.insert_data(&data("/a"), &[1]);
        tree.insert_data(&data("/b"), &[2]);
        assert_eq!(tree.cs_size(), 1);
        assert!(tree.find_matching_data(&interest("/a")).is_none());
        assert!(tree.find_matching_data(&interest("/b")).is_some());
    }

    #[test]
    fn test_expiry_queue() {
        let mut tree = make_tree();
        let now = Instant::now();
        let (id, _) = tree.insert_interest(&interest("/a"), None, 1);
        tree.update_expiration(id, now + Duration::from_millis(100));

        assert!(tree.update(now).is_empty());
        assert_eq!(tree.pit_size(), 1);

        let expired = tree.update(now + Duration::from_millis(200));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].name, Name::from_str("/a").unwrap());
        assert_eq!(tree.pit_size(), 0);
    }

    #[test]
    fn test_expiry_rescheduled_later() {
        let mut tree = make_tree();
        let now = Instant::now();
        let (id, _) = tree.insert_interest(&interest("/a"), None, 1);
        tree.update_expiration(id, now + Duration::from_millis(100));
        // Refresh pushes the deadline out; the stale queue item must not fire
        tree.update_expiration(id, now + Duration::from_secs(10));

        assert!(tree.update(now + Duration::from_millis(200)).is_empty());
        assert_eq!(tree.pit_size(), 1);
    }
}
