//! Forwarder tables: the per-thread PIT-CS and dead nonce list, and the
//! shared FIB-Strategy table, RIB, and network region table.

pub mod cs_replacement;
pub mod dead_nonce_list;
pub mod fib;
pub mod fib_hashtable;
pub mod fib_tree;
pub mod network_region;
pub mod pit_cs;
pub mod rib;

pub use dead_nonce_list::DeadNonceList;
pub use fib::{make_fib, FibNextHopEntry, FibStrategyTable};
pub use network_region::NetworkRegionTable;
pub use pit_cs::{PitCsTree, PitEntry, PitEntryId};
pub use rib::{RibTable, Route};
