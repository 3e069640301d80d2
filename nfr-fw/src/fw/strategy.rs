use std::collections::HashMap;
use std::sync::Arc;

use nfr_core::Name;

use crate::fw::best_route::BestRoute;
use crate::fw::multicast::Multicast;
use crate::fw::thread::Thread;
use crate::pkt::Pkt;
use crate::table::fib::{make_strategy_name, FibNextHopEntry};
use crate::table::pit_cs::PitEntryId;

/// A forwarding strategy. Strategies are stateless; per-Interest state
/// lives in the PIT entry, and send decisions go back through the owning
/// thread's outgoing pipelines.
pub trait Strategy: Send + Sync {
    /// Versioned strategy name, e.g. `/localhost/nfd/strategy/best-route/v=1`.
    fn name(&self) -> &Name;

    /// A cached Data packet satisfied the Interest; `packet` has already
    /// been rewritten as the Data.
    fn after_content_store_hit(
        &self,
        thread: &mut Thread,
        packet: Pkt,
        entry: PitEntryId,
        in_face: u64,
    );

    /// A Data packet matched a single PIT entry.
    fn after_receive_data(&self, thread: &mut Thread, packet: &Pkt, entry: PitEntryId, in_face: u64);

    /// An Interest passed the incoming pipeline; `nexthops` are the
    /// already filtered eligible faces.
    fn after_receive_interest(
        &self,
        thread: &mut Thread,
        packet: &Pkt,
        entry: PitEntryId,
        in_face: u64,
        nexthops: Vec<FibNextHopEntry>,
    );

    /// A Data packet is about to satisfy one of several matching PIT
    /// entries; forwarding happens in the thread without the strategy.
    fn before_satisfy_interest(&self, thread: &mut Thread, entry: PitEntryId, in_face: u64);
}

/// Common fields shared by all strategy implementations.
pub struct StrategyBase {
    name: Name,
}

impl StrategyBase {
    pub fn new(strategy: &str, version: u64) -> Self {
        Self { name: make_strategy_name(strategy, version) }
    }

    pub fn name(&self) -> &Name {
        &self.name
    }
}

/// Instantiate one of every known strategy, keyed by the hash of its
/// versioned name as returned by the FIB-Strategy table.
pub fn instantiate_strategies() -> HashMap<u64, Arc<dyn Strategy>> {
    let strategies: Vec<Arc<dyn Strategy>> =
        vec![Arc::new(BestRoute::new()), Arc::new(Multicast::new())];
    strategies
        .into_iter()
        .map(|strategy| (strategy.name().hash_value(), strategy))
        .collect()
}

/// Names and versions of all known strategies, for management addressing.
pub fn known_strategies() -> Vec<(&'static str, u64)> {
    vec![("best-route", 1), ("multicast", 1)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::fib::default_strategy;

    #[test]
    fn test_registry_covers_default_strategy() {
        let strategies = instantiate_strategies();
        assert_eq!(strategies.len(), 2);
        assert!(strategies.contains_key(&default_strategy().hash_value()));
    }

    #[test]
    fn test_registry_keys_match_names() {
        for (name, strategy) in instantiate_strategies() {
            assert_eq!(name, strategy.name().hash_value());
        }
    }
}
