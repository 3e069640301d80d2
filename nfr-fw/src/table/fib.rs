use std::sync::Arc;

use nfr_core::tlv::TlvElement;
use nfr_core::{Name, NameComponent};

use crate::config::FibConfig;
use crate::table::fib_hashtable::FibStrategyHashTable;
use crate::table::fib_tree::FibStrategyTree;

/// Name prefix under which forwarding strategies are addressed.
pub const STRATEGY_PREFIX: &str = "/localhost/nfd/strategy";

// NDN naming conventions version component
const TLV_VERSION_COMPONENT: u64 = 54;

/// Build the full versioned name of a strategy, e.g.
/// `/localhost/nfd/strategy/best-route/v=1`.
pub fn make_strategy_name(strategy: &str, version: u64) -> Name {
    let mut name = match Name::from_str(STRATEGY_PREFIX) {
        Ok(name) => name,
        // The prefix constant is a valid URI
        Err(_) => Name::new(),
    };
    name.push(NameComponent::new(strategy.as_bytes().to_vec()));
    name.push(NameComponent::with_type(
        TLV_VERSION_COMPONENT,
        TlvElement::from_nonneg_integer(TLV_VERSION_COMPONENT, version).value,
    ));
    name
}

/// Strategy used when no prefix carries an explicit choice.
pub fn default_strategy() -> Name {
    make_strategy_name("best-route", 1)
}

/// A nexthop for a FIB entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FibNextHopEntry {
    pub nexthop: u64,
    pub cost: u64,
}

/// Snapshot of one FIB-Strategy table entry, for enumeration.
#[derive(Debug, Clone)]
pub struct FibStrategyEntry {
    pub name: Name,
    pub nexthops: Vec<FibNextHopEntry>,
    pub strategy: Option<Name>,
}

/// Combined FIB and strategy choice table, shared read-mostly across all
/// forwarding threads. Nexthop and strategy searches are independent
/// longest-prefix matches: a prefix may carry one without the other.
pub trait FibStrategyTable: Send + Sync {
    /// Nexthops of the longest prefix of `name` that has any.
    fn find_next_hops(&self, name: &Name) -> Vec<FibNextHopEntry>;
    /// Strategy choice of the longest prefix of `name` that has one.
    fn find_strategy(&self, name: &Name) -> Name;

    /// Add or update (by face) a nexthop for the exact prefix.
    fn insert_next_hop(&self, name: &Name, nexthop: u64, cost: u64);
    /// Remove the nexthop through `nexthop` from the exact prefix.
    fn remove_next_hop(&self, name: &Name, nexthop: u64);
    /// Drop all nexthops of the exact prefix. The root cannot be cleared.
    fn clear_next_hops(&self, name: &Name);

    fn set_strategy(&self, name: &Name, strategy: Name);
    fn unset_strategy(&self, name: &Name);

    /// All entries carrying nexthops.
    fn entries(&self) -> Vec<FibStrategyEntry>;
    /// All entries carrying a strategy choice.
    fn strategy_choices(&self) -> Vec<FibStrategyEntry>;
}

/// Construct the FIB backend selected by the (already validated) config.
pub fn make_fib(config: &FibConfig) -> Arc<dyn FibStrategyTable> {
    match config.algorithm.as_str() {
        "hashtable" => Arc::new(FibStrategyHashTable::new(config.hashtable.m)),
        _ => Arc::new(FibStrategyTree::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_name_shape() {
        let name = make_strategy_name("multicast", 1);
        assert_eq!(name.len(), 5);
        assert_eq!(name.get_prefix(3).to_string(), STRATEGY_PREFIX);
        assert_eq!(name.get(3).unwrap().value, b"multicast");
        assert_eq!(name.get(4).unwrap().typ, 54);
    }

    #[test]
    fn test_default_strategy_is_best_route() {
        let name = default_strategy();
        assert_eq!(name.get(3).unwrap().value, b"best-route");
    }
}
