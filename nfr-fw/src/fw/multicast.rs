use std::time::{Duration, Instant};

use log::{debug, trace};
use nfr_core::Name;

use crate::fw::strategy::{Strategy, StrategyBase};
use crate::fw::thread::Thread;
use crate::pkt::Pkt;
use crate::table::fib::FibNextHopEntry;
use crate::table::pit_cs::PitEntryId;

pub const MULTICAST_SUPPRESSION_TIME: Duration = Duration::from_millis(500);

/// Forwards Interests to all eligible nexthop faces.
pub struct Multicast {
    base: StrategyBase,
}

impl Multicast {
    pub fn new() -> Self {
        Self { base: StrategyBase::new("multicast", 1) }
    }
}

impl Default for Multicast {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for Multicast {
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
        trace!("multicast: content store hit name={} faceid={}", packet.name, in_face);
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
        trace!("multicast: data name={} downstreams={}", packet.name, downstreams.len());
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
        nexthops: Vec<FibNextHopEntry>,
    ) {
        if nexthops.is_empty() {
            debug!("multicast: no nexthop for {}", packet.name);
            return;
        }

        // Drop retransmissions with a differing nonce inside the
        // suppression window
        let nonce = packet.interest().and_then(|i| i.nonce);
        let now = Instant::now();
        if thread.any_out_record(entry, |record| {
            Some(record.latest_nonce) != nonce
                && record.latest_timestamp + MULTICAST_SUPPRESSION_TIME > now
        }) {
            debug!("multicast: suppressed {}", packet.name);
            return;
        }

        for nh in nexthops {
            trace!("multicast: forwarding {} faceid={}", packet.name, nh.nexthop);
            thread.process_outgoing_interest(packet, entry, nh.nexthop, in_face);
        }
    }

    fn before_satisfy_interest(&self, _thread: &mut Thread, _entry: PitEntryId, _in_face: u64) {
        // Nothing to do
    }
}
