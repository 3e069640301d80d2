use std::time::{Duration, Instant};

use log::{debug, trace};
use nfr_core::Name;

use crate::fw::strategy::{Strategy, StrategyBase};
use crate::fw::thread::Thread;
use crate::pkt::Pkt;
use crate::table::fib::FibNextHopEntry;
use crate::table::pit_cs::PitEntryId;

/// Window during which retransmissions of the same Interest are dropped.
pub const BEST_ROUTE_SUPPRESSION_TIME: Duration = Duration::from_millis(400);

/// Forwards Interests to the lowest-cost nexthop.
pub struct BestRoute {
    base: StrategyBase,
}

impl BestRoute {
    pub fn new() -> Self {
        Self { base: StrategyBase::new("best-route", 1) }
    }
}

impl Default for BestRoute {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for BestRoute {
    fn name(&self) -> &Name {
        self.base.name()
    }

    fn after_content_store_hit(
        &self,
        thread: &mut Thread,
        packet: Pkt,
        entry: PitEntryId,
        in_face: u64,
    ) {
        trace!("best-route: content store hit name={} faceid={}", packet.name, in_face);
        // 0 indicates the content store as source
        thread.send_data(&packet, entry, in_face, 0);
    }

    fn after_receive_data(
        &self,
        thread: &mut Thread,
        packet: &Pkt,
        entry: PitEntryId,
        in_face: u64,
    ) {
        let downstreams = thread.pending_downstreams(entry);
        trace!("best-route: data name={} downstreams={}", packet.name, downstreams.len());
        for face in downstreams {
            thread.send_data(packet, entry, face, in_face);
        }
    }

    fn after_receive_interest(
        &self,
        thread: &mut Thread,
        packet: &Pkt,
        entry: PitEntryId,
        in_face: u64,
        mut nexthops: Vec<FibNextHopEntry>,
    ) {
        if nexthops.is_empty() {
            debug!("best-route: no nexthop for {} - DROP", packet.name);
            return;
        }

        nexthops.sort_by_key(|nh| nh.cost);

        let now = Instant::now();
        for pass in 0..2 {
            for nh in &nexthops {
                // First pass skips hops that already have an out-record
                if pass == 0 {
                    if let Some(record) = thread.out_record(entry, nh.nexthop) {
                        if record.latest_timestamp + BEST_ROUTE_SUPPRESSION_TIME > now {
                            debug!("best-route: suppressed {} - DROP", packet.name);
                            return;
                        }
                        continue;
                    }
                }

                trace!("best-route: forwarding {} faceid={}", packet.name, nh.nexthop);
                if thread.process_outgoing_interest(packet, entry, nh.nexthop, in_face) {
                    return;
                }
            }
        }

        debug!("best-route: no usable nexthop for {} - DROP", packet.name);
    }

    fn before_satisfy_interest(&self, _thread: &mut Thread, _entry: PitEntryId, _in_face: u64) {
        // Nothing to do
    }
}
