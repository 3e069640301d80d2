//! Forwarding threads and strategies.

pub mod best_route;
pub mod multicast;
pub mod strategy;
pub mod thread;

pub use best_route::BestRoute;
pub use multicast::Multicast;
pub use strategy::{instantiate_strategies, known_strategies, Strategy};
pub use thread::{Thread, ThreadCounters, ThreadCountersSnapshot};
