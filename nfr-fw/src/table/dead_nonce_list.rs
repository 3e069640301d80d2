use std::collections::{HashSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

use nfr_core::Name;

/// Tracks recently seen (name, nonce) pairs of satisfied or expired
/// Interests so that looping retransmissions can be detected after the
/// PIT entry is gone. One instance per forwarding thread.
pub struct DeadNonceList {
    lifetime: Duration,
    hashes: HashSet<u64>,
    expiry: VecDeque<(Instant, u64)>,
}

impl DeadNonceList {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            lifetime,
            hashes: HashSet::new(),
            expiry: VecDeque::new(),
        }
    }

    fn hash(name: &Name, nonce: u32) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        name.hash(&mut hasher);
        nonce.hash(&mut hasher);
        hasher.finish()
    }

    /// Record a (name, nonce) pair.
    pub fn insert(&mut self, name: &Name, nonce: u32) {
        let hash = Self::hash(name, nonce);
        if self.hashes.insert(hash) {
            self.expiry.push_back((Instant::now() + self.lifetime, hash));
        }
    }

    /// Whether the given (name, nonce) pair is on the list.
    pub fn contains(&self, name: &Name, nonce: u32) -> bool {
        self.hashes.contains(&Self::hash(name, nonce))
    }

    /// Drop entries past their lifetime.
    pub fn remove_expired(&mut self, now: Instant) {
        while let Some(&(deadline, hash)) = self.expiry.front() {
            if deadline > now {
                break;
            }
            self.expiry.pop_front();
            self.hashes.remove(&hash);
        }
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    /// Interval at which the owning thread should call `remove_expired`.
    pub fn sweep_interval(&self) -> Duration {
        (self.lifetime / 4).max(Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_find() {
        let mut dnl = DeadNonceList::new(Duration::from_secs(6));
        let name = Name::from_str("/a/b").unwrap();
        dnl.insert(&name, 42);
        assert!(dnl.contains(&name, 42));
        assert!(!dnl.contains(&name, 43));
        assert!(!dnl.contains(&Name::from_str("/a").unwrap(), 42));
    }

    #[test]
    fn test_expiry() {
        let mut dnl = DeadNonceList::new(Duration::from_millis(10));
        let name = Name::from_str("/a").unwrap();
        dnl.insert(&name, 1);
        dnl.remove_expired(Instant::now());
        assert!(dnl.contains(&name, 1));
        dnl.remove_expired(Instant::now() + Duration::from_millis(20));
        assert!(!dnl.contains(&name, 1));
        assert!(dnl.is_empty());
    }

    #[test]
    fn test_sweep_interval_floor() {
        let dnl = DeadNonceList::new(Duration::from_millis(100));
        assert_eq!(dnl.sweep_interval(), Duration::from_secs(1));
        let dnl = DeadNonceList::new(Duration::from_secs(60));
        assert_eq!(dnl.sweep_interval(), Duration::from_secs(15));
    }
}
