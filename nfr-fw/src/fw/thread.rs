//! Forwarding thread: owns a PIT-CS shard and a dead nonce list and runs
//! the incoming/outgoing Interest and Data pipelines.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use log::{debug, error, info, trace, warn};
use tokio::sync::{mpsc, oneshot};

use nfr_core::{Name, Packet};

use crate::config::Config;
use crate::dispatch::{is_localhop, is_localhost};
use crate::face::{FaceTable, LinkType, Scope};
use crate::fw::strategy::{instantiate_strategies, Strategy};
use crate::pkt::{L3, OutPkt, Pkt};
use crate::table::dead_nonce_list::DeadNonceList;
use crate::table::fib::FibStrategyTable;
use crate::table::network_region::NetworkRegionTable;
use crate::table::pit_cs::{
    PitCsTree, PitEntry, PitEntryId, PitOutRecord, PIT_UPDATE_INTERVAL,
};

/// Per-thread forwarding counters.
#[derive(Debug, Default)]
pub struct ThreadCounters {
    pub n_in_interests: AtomicU64,
    pub n_in_data: AtomicU64,
    pub n_out_interests: AtomicU64,
    pub n_out_data: AtomicU64,
    pub n_satisfied_interests: AtomicU64,
    pub n_unsatisfied_interests: AtomicU64,
    pub n_cs_hits: AtomicU64,
    pub n_cs_misses: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadCountersSnapshot {
    pub n_in_interests: u64,
    pub n_in_data: u64,
    pub n_out_interests: u64,
    pub n_out_data: u64,
    pub n_satisfied_interests: u64,
    pub n_unsatisfied_interests: u64,
    pub n_cs_hits: u64,
    pub n_cs_misses: u64,
}

impl ThreadCounters {
    pub fn snapshot(&self) -> ThreadCountersSnapshot {
        ThreadCountersSnapshot {
            n_in_interests: self.n_in_interests.load(Ordering::Relaxed),
            n_in_data: self.n_in_data.load(Ordering::Relaxed),
            n_out_interests: self.n_out_interests.load(Ordering::Relaxed),
            n_out_data: self.n_out_data.load(Ordering::Relaxed),
            n_satisfied_interests: self.n_satisfied_interests.load(Ordering::Relaxed),
            n_unsatisfied_interests: self.n_unsatisfied_interests.load(Ordering::Relaxed),
            n_cs_hits: self.n_cs_hits.load(Ordering::Relaxed),
            n_cs_misses: self.n_cs_misses.load(Ordering::Relaxed),
        }
    }
}

/// A forwarding thread. Each thread owns its shard of the PIT-CS and its
/// own dead nonce list; the FIB and face table are shared.
pub struct Thread {
    thread_id: usize,
    pit_cs: PitCsTree,
    dead_nonce_list: DeadNonceList,
    strategies: HashMap<u64, Arc<dyn Strategy>>,
    fib: Arc<dyn FibStrategyTable>,
    faces: Arc<FaceTable>,
    network_region: Arc<NetworkRegionTable>,
    counters: Arc<ThreadCounters>,
    queue: Option<mpsc::Receiver<Pkt>>,
    quit: Option<mpsc::Receiver<()>>,
    done: Option<oneshot::Sender<()>>,
}

impl Thread {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        thread_id: usize,
        config: &Config,
        fib: Arc<dyn FibStrategyTable>,
        faces: Arc<FaceTable>,
        network_region: Arc<NetworkRegionTable>,
        queue: mpsc::Receiver<Pkt>,
        quit: mpsc::Receiver<()>,
        done: oneshot::Sender<()>,
    ) -> Self {
        Self {
            thread_id,
            pit_cs: PitCsTree::new(&config.tables.content_store),
            dead_nonce_list: DeadNonceList::new(config.tables.dead_nonce_list.lifetime()),
            strategies: instantiate_strategies(),
            fib,
            faces,
            network_region,
            counters: Arc::new(ThreadCounters::default()),
            queue: Some(queue),
            quit: Some(quit),
            done: Some(done),
        }
    }

    pub fn id(&self) -> usize {
        self.thread_id
    }

    pub fn counters(&self) -> Arc<ThreadCounters> {
        self.counters.clone()
    }

    pub fn pit_size(&self) -> usize {
        self.pit_cs.pit_size()
    }

    pub fn cs_size(&self) -> usize {
        self.pit_cs.cs_size()
    }

    /// Main loop: drain the ingress queue, expire PIT entries, and sweep
    /// the dead nonce list.
    pub async fn run(mut self) {
        let mut queue = match self.queue.take() {
            Some(queue) => queue,
            None => return,
        };
        let mut quit = match self.quit.take() {
            Some(quit) => quit,
            None => return,
        };

        let mut pit_tick = tokio::time::interval(PIT_UPDATE_INTERVAL);
        pit_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut dnl_tick = tokio::time::interval(self.dead_nonce_list.sweep_interval());
        dnl_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!("fw-thread-{}: Starting", self.thread_id);
        loop {
            tokio::select! {
                pkt = queue.recv() => match pkt {
                    Some(pkt) => match pkt.l3 {
                        L3::Interest(_) => self.process_incoming_interest(pkt),
                        L3::Data(_) => self.process_incoming_data(pkt),
                    },
                    None => break,
                },
                _ = pit_tick.tick() => self.update_pit(),
                _ = dnl_tick.tick() => self.dead_nonce_list.remove_expired(Instant::now()),
                _ = quit.recv() => break,
            }
        }

        info!("fw-thread-{}: Stopping thread", self.thread_id);
        if let Some(done) = self.done.take() {
            let _ = done.send(());
        }
    }

    fn update_pit(&mut self) {
        for entry in self.pit_cs.update(Instant::now()) {
            self.finalize_interest(entry);
        }
    }

    /// Called when a PIT entry is removed on expiry.
    fn finalize_interest(&mut self, entry: PitEntry) {
        for record in entry.out_records.values() {
            self.dead_nonce_list.insert(&entry.name, record.latest_nonce);
        }
        if !entry.satisfied {
            self.counters
                .n_unsatisfied_interests
                .fetch_add(entry.in_records.len() as u64, Ordering::Relaxed);
        }
    }

    pub(crate) fn process_incoming_interest(&mut self, mut packet: Pkt) {
        let in_face_id = packet.incoming_face_id;
        let in_face = match self.faces.get(in_face_id) {
            Some(face) => face,
            None => {
                error!(
                    "fw-thread-{}: Interest has non-existent incoming face faceid={} name={}",
                    self.thread_id, in_face_id, packet.name
                );
                return;
            }
        };

        let interest = match &mut packet.l3 {
            L3::Interest(interest) => {
                if let Some(hop_limit) = interest.hop_limit {
                    trace!(
                        "fw-thread-{}: HopLimit check name={} hoplimit={}",
                        self.thread_id, packet.name, hop_limit
                    );
                    if hop_limit == 0 {
                        return;
                    }
                    interest.hop_limit = Some(hop_limit - 1);
                    packet.raw = interest.encode();
                }
                interest.clone()
            }
            L3::Data(_) => panic!("process_incoming_interest called with non-Interest packet"),
        };

        trace!(
            "fw-thread-{}: OnIncomingInterest name={} faceid={}",
            self.thread_id, packet.name, in_face_id
        );

        if in_face.scope() == Scope::NonLocal && is_localhost(&packet.name) {
            warn!(
                "fw-thread-{}: Interest from non-local face violates /localhost scope name={} faceid={}",
                self.thread_id, packet.name, in_face_id
            );
            return;
        }

        self.counters.n_in_interests.fetch_add(1, Ordering::Relaxed);

        // A forwarding hint is only honored until the Interest reaches the
        // producer region named by one of its delegations
        let mut hint: Option<Name> = None;
        if !interest.forwarding_hint.is_empty() {
            let mut reaching_producer_region = false;
            for delegation in &interest.forwarding_hint {
                if self.network_region.is_producer(delegation) {
                    reaching_producer_region = true;
                    break;
                }
                if hint.is_none() {
                    hint = Some(delegation.clone());
                }
            }
            if reaching_producer_region {
                hint = None;
            }
        }

        let nonce = match interest.nonce {
            Some(nonce) => nonce,
            None => {
                debug!(
                    "fw-thread-{}: Interest is missing Nonce name={}",
                    self.thread_id, packet.name
                );
                return;
            }
        };

        if self.dead_nonce_list.contains(&interest.name, nonce) {
            debug!(
                "fw-thread-{}: Interest is looping (DNL) name={} nonce={}",
                self.thread_id, packet.name, nonce
            );
            return;
        }

        let (entry_id, is_duplicate) =
            self.pit_cs.insert_interest(&interest, hint.as_ref(), in_face_id);
        if is_duplicate {
            // Interest loop; no Nacks, just drop
            debug!(
                "fw-thread-{}: Interest is looping (PIT) name={}",
                self.thread_id, packet.name
            );
            return;
        }

        let strategy_name = self.fib.find_strategy(&interest.name);
        let strategy = match self.strategies.get(&strategy_name.hash_value()).cloned() {
            Some(strategy) => strategy,
            None => {
                error!(
                    "fw-thread-{}: Unknown strategy {} for name={}",
                    self.thread_id, strategy_name, packet.name
                );
                return;
            }
        };

        let (already_pending, prev_nonce, in_expiration) = match self.pit_cs.entry_mut(entry_id) {
            Some(entry) => entry.insert_in_record(&interest, in_face_id, packet.pit_token.clone()),
            None => return,
        };

        if !already_pending {
            trace!(
                "fw-thread-{}: Interest is not pending name={}",
                self.thread_id, packet.name
            );

            if self.pit_cs.is_cs_serving() {
                let cached = self.pit_cs.find_matching_data(&interest).map(|e| e.wire.clone());
                match cached {
                    Some(wire) => {
                        self.counters.n_cs_hits.fetch_add(1, Ordering::Relaxed);
                        match Packet::decode(&wire) {
                            Ok((Packet::Data(data), _)) => {
                                self.pit_cs.update_expiration(entry_id, Instant::now());
                                packet.name = data.name.clone();
                                packet.l3 = L3::Data(data);
                                packet.raw = wire;
                                strategy.after_content_store_hit(self, packet, entry_id, in_face_id);
                                return;
                            }
                            _ => {
                                error!(
                                    "fw-thread-{}: Unable to decode cached Data name={}",
                                    self.thread_id, packet.name
                                );
                            }
                        }
                    }
                    None => {
                        self.counters.n_cs_misses.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        } else {
            trace!(
                "fw-thread-{}: Interest is already pending name={}",
                self.thread_id, packet.name
            );

            // The previous nonce can no longer be used downstream
            self.dead_nonce_list.insert(&interest.name, prev_nonce);
        }

        let needs_refresh = self
            .pit_cs
            .entry(entry_id)
            .map(|entry| entry.expiration.map_or(true, |current| in_expiration > current))
            .unwrap_or(false);
        if needs_refresh {
            self.pit_cs.update_expiration(entry_id, in_expiration);
        }

        // Consumer-controlled forwarding overrides the FIB
        if let Some(hop) = packet.next_hop_face_id {
            if self.faces.get(hop).is_some() {
                trace!(
                    "fw-thread-{}: NextHopFaceId is set for Interest name={}",
                    self.thread_id, packet.name
                );
                self.process_outgoing_interest(&packet, entry_id, hop, in_face_id);
            } else {
                info!(
                    "fw-thread-{}: Non-existent face specified in NextHopFaceId for Interest name={} faceid={}",
                    self.thread_id, packet.name, hop
                );
            }
            return;
        }

        let lookup_name = hint.as_ref().unwrap_or(&interest.name);
        let nexthops = self.fib.find_next_hops(lookup_name);

        // Interests received under /localhop on a non-local face may only
        // go out on local faces
        let local_faces_only = in_face.scope() != Scope::Local && is_localhop(&packet.name);

        let pending_faces: HashSet<u64> = self
            .pit_cs
            .entry(entry_id)
            .map(|entry| entry.in_records.keys().copied().collect())
            .unwrap_or_default();
        let allowed_nexthops = nexthops
            .into_iter()
            .filter(|nexthop| {
                if nexthop.nexthop == in_face_id {
                    return false;
                }
                if local_faces_only {
                    if let Some(face) = self.faces.get(nexthop.nexthop) {
                        if face.scope() != Scope::Local {
                            return false;
                        }
                    }
                }
                !pending_faces.contains(&nexthop.nexthop)
            })
            .collect();

        strategy.after_receive_interest(self, &packet, entry_id, in_face_id, allowed_nexthops);
    }

    /// Forward an Interest to `nexthop`. Returns whether the packet was
    /// handed to the face.
    pub(crate) fn process_outgoing_interest(
        &mut self,
        packet: &Pkt,
        entry: PitEntryId,
        nexthop: u64,
        in_face: u64,
    ) -> bool {
        let interest = match packet.interest() {
            Some(interest) => interest,
            None => panic!("process_outgoing_interest called with non-Interest packet"),
        };

        trace!(
            "fw-thread-{}: OnOutgoingInterest name={} faceid={}",
            self.thread_id, packet.name, nexthop
        );

        let out_face = match self.faces.get(nexthop) {
            Some(face) => face,
            None => {
                error!(
                    "fw-thread-{}: Non-existent nexthop name={} faceid={}",
                    self.thread_id, packet.name, nexthop
                );
                return false;
            }
        };
        if nexthop == in_face && out_face.link_type() != LinkType::AdHoc {
            debug!(
                "fw-thread-{}: Prevent send Interest back to incoming face name={} faceid={}",
                self.thread_id, packet.name, nexthop
            );
            return false;
        }
        if interest.hop_limit == Some(0) && out_face.scope() == Scope::NonLocal {
            debug!(
                "fw-thread-{}: Prevent send Interest with HopLimit=0 to non-local face name={} faceid={}",
                self.thread_id, packet.name, nexthop
            );
            return false;
        }

        let token = match self.pit_cs.entry_mut(entry) {
            Some(entry) => {
                entry.insert_out_record(interest, nexthop);
                entry.token()
            }
            None => return false,
        };

        self.counters.n_out_interests.fetch_add(1, Ordering::Relaxed);

        let mut pit_token = Vec::with_capacity(6);
        pit_token.extend_from_slice(&(self.thread_id as u16).to_be_bytes());
        pit_token.extend_from_slice(&token.to_be_bytes());

        out_face.send_packet(OutPkt {
            pkt: packet.clone(),
            pit_token: Some(pit_token),
            in_face,
        });
        true
    }

    pub(crate) fn process_incoming_data(&mut self, packet: Pkt) {
        let data = match &packet.l3 {
            L3::Data(data) => data.clone(),
            L3::Interest(_) => panic!("process_incoming_data called with non-Data packet"),
        };

        let token = match &packet.pit_token {
            Some(token) if token.len() == 6 => {
                Some(u32::from_be_bytes([token[2], token[3], token[4], token[5]]))
            }
            _ => None,
        };

        let in_face_id = packet.incoming_face_id;
        let in_face = match self.faces.get(in_face_id) {
            Some(face) => face,
            None => {
                error!(
                    "fw-thread-{}: Data has non-existent incoming face faceid={} name={}",
                    self.thread_id, in_face_id, packet.name
                );
                return;
            }
        };

        self.counters.n_in_data.fetch_add(1, Ordering::Relaxed);

        if in_face.scope() == Scope::NonLocal && is_localhost(&packet.name) {
            warn!(
                "fw-thread-{}: Data from non-local face violates /localhost scope name={} faceid={}",
                self.thread_id, packet.name, in_face_id
            );
            return;
        }

        if self.pit_cs.is_cs_admitting() {
            self.pit_cs.insert_data(&data, &packet.raw);
        }

        let matching = self.pit_cs.find_interest_prefix_match_by_data(&data, token);
        if matching.is_empty() {
            debug!(
                "fw-thread-{}: Unsolicited data name={} faceid={}",
                self.thread_id, packet.name, in_face_id
            );
            return;
        }

        let strategy_name = self.fib.find_strategy(&data.name);
        let strategy = match self.strategies.get(&strategy_name.hash_value()).cloned() {
            Some(strategy) => strategy,
            None => {
                error!(
                    "fw-thread-{}: Unknown strategy {} for name={}",
                    self.thread_id, strategy_name, packet.name
                );
                return;
            }
        };

        if matching.len() == 1 {
            // Single matching PIT entry: the strategy forwards downstream
            let entry_id = matching[0];
            self.pit_cs.update_expiration(entry_id, Instant::now());

            trace!(
                "fw-thread-{}: Sending Data name={} strategy={}",
                self.thread_id, packet.name, strategy_name
            );
            strategy.after_receive_data(self, &packet, entry_id, in_face_id);

            let nonces: Vec<u32> = match self.pit_cs.entry_mut(entry_id) {
                Some(entry) => {
                    entry.satisfied = true;
                    let nonces = entry.out_records.values().map(|r| r.latest_nonce).collect();
                    entry.clear_in_records();
                    entry.clear_out_records();
                    nonces
                }
                None => Vec::new(),
            };
            for nonce in nonces {
                self.dead_nonce_list.insert(&data.name, nonce);
            }
        } else {
            // Multiple entries can match when Interests differ in flags or
            // forwarding hints; forward to all downstreams without the
            // strategy
            for entry_id in matching {
                let (downstreams, nonces) = match self.pit_cs.entry(entry_id) {
                    Some(entry) => {
                        let downstreams: Vec<(u64, Option<Vec<u8>>)> = entry
                            .in_records
                            .values()
                            .filter(|record| record.face != in_face_id)
                            .map(|record| (record.face, record.pit_token.clone()))
                            .collect();
                        let nonces: Vec<u32> =
                            entry.out_records.values().map(|r| r.latest_nonce).collect();
                        (downstreams, nonces)
                    }
                    None => continue,
                };

                self.pit_cs.update_expiration(entry_id, Instant::now());
                strategy.before_satisfy_interest(self, entry_id, in_face_id);
                if let Some(entry) = self.pit_cs.entry_mut(entry_id) {
                    entry.satisfied = true;
                    entry.clear_in_records();
                    entry.clear_out_records();
                }
                for nonce in nonces {
                    self.dead_nonce_list.insert(&data.name, nonce);
                }

                for (face, pit_token) in downstreams {
                    trace!(
                        "fw-thread-{}: Multiple PIT entries for Data name={}",
                        self.thread_id, packet.name
                    );
                    self.process_outgoing_data(&packet, face, pit_token, in_face_id);
                }
            }
        }
    }

    pub(crate) fn process_outgoing_data(
        &mut self,
        packet: &Pkt,
        nexthop: u64,
        pit_token: Option<Vec<u8>>,
        in_face: u64,
    ) {
        if packet.data().is_none() {
            panic!("process_outgoing_data called with non-Data packet");
        }

        trace!(
            "fw-thread-{}: OnOutgoingData name={} faceid={}",
            self.thread_id, packet.name, nexthop
        );

        let out_face = match self.faces.get(nexthop) {
            Some(face) => face,
            None => {
                error!(
                    "fw-thread-{}: Non-existent nexthop for Data name={} faceid={}",
                    self.thread_id, packet.name, nexthop
                );
                return;
            }
        };

        if out_face.scope() == Scope::NonLocal && is_localhost(&packet.name) {
            warn!(
                "fw-thread-{}: Data cannot be sent to non-local face since violates /localhost scope name={} faceid={}",
                self.thread_id, packet.name, nexthop
            );
            return;
        }

        self.counters.n_out_data.fetch_add(1, Ordering::Relaxed);
        self.counters
            .n_satisfied_interests
            .fetch_add(1, Ordering::Relaxed);

        out_face.send_packet(OutPkt {
            pkt: packet.clone(),
            pit_token,
            in_face,
        });
    }

    /// Send a Data packet downstream, consuming the in-record for
    /// `nexthop` and its stored PIT token.
    pub fn send_data(&mut self, packet: &Pkt, entry: PitEntryId, nexthop: u64, in_face: u64) {
        let pit_token = match self.pit_cs.entry_mut(entry) {
            Some(entry) => entry.in_records.remove(&nexthop).and_then(|r| r.pit_token),
            None => None,
        };
        self.process_outgoing_data(packet, nexthop, pit_token, in_face);
    }

    /// Faces with a pending in-record on the entry.
    pub fn pending_downstreams(&self, entry: PitEntryId) -> Vec<u64> {
        self.pit_cs
            .entry(entry)
            .map(|entry| entry.in_records.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn out_record(&self, entry: PitEntryId, face: u64) -> Option<&PitOutRecord> {
        self.pit_cs.entry(entry).and_then(|e| e.out_records.get(&face))
    }

    pub fn any_out_record(&self, entry: PitEntryId, pred: impl Fn(&PitOutRecord) -> bool) -> bool {
        self.pit_cs
            .entry(entry)
            .map(|e| e.out_records.values().any(pred))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::face::{Face, FaceCounters, FaceCountersSnapshot, FaceState};
    use crate::table::fib::{make_fib, make_strategy_name};
    use crate::table::rib::RibTable;
    use nfr_core::{Data, Interest};
    use std::sync::Mutex;
    use std::time::Duration;

    struct CaptureFace {
        id: u64,
        scope: Scope,
        sent: Mutex<Vec<OutPkt>>,
        counters: FaceCounters,
    }

    impl CaptureFace {
        fn new(id: u64, scope: Scope) -> Arc<Self> {
            Arc::new(Self { id, scope, sent: Mutex::new(Vec::new()), counters: FaceCounters::default() })
        }

        fn sent(&self) -> Vec<OutPkt> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl Face for CaptureFace {
        fn face_id(&self) -> u64 {
            self.id
        }
        fn scope(&self) -> Scope {
            self.scope
        }
        fn link_type(&self) -> LinkType {
            LinkType::PointToPoint
        }
        fn mtu(&self) -> usize {
            8800
        }
        fn state(&self) -> FaceState {
            FaceState::Up
        }
        fn send_packet(&self, out: OutPkt) {
            self.sent.lock().unwrap().push(out);
        }
        fn counters(&self) -> FaceCountersSnapshot {
            self.counters.snapshot()
        }
        fn close(&self) {}
        fn expired(&self) -> bool {
            false
        }
    }

    fn setup() -> (Thread, Arc<FaceTable>, Arc<dyn FibStrategyTable>) {
        let config = Config::default();
        let fib = make_fib(&config.tables.fib);
        let rib = Arc::new(RibTable::new(fib.clone()));
        let faces = Arc::new(FaceTable::new(rib));
        let region = Arc::new(NetworkRegionTable::from_config(&config.tables.network_region));
        let (tx, rx) = mpsc::channel(16);
        let (quit_tx, quit_rx) = mpsc::channel(1);
        let (done_tx, done_rx) = oneshot::channel();
        std::mem::forget((tx, quit_tx, done_rx));
        let thread = Thread::new(0, &config, fib.clone(), faces.clone(), region, rx, quit_rx, done_tx);
        (thread, faces, fib)
    }

    fn add_face(faces: &FaceTable, scope: Scope) -> Arc<CaptureFace> {
        let face = CaptureFace::new(faces.allocate_id(), scope);
        faces.insert(face.clone());
        face
    }

    fn interest_pkt(interest: Interest, from: u64) -> Pkt {
        let wire = interest.encode();
        Pkt::from_interest(interest, wire, from)
    }

    fn data_pkt(data: Data, from: u64) -> Pkt {
        let wire = data.encode();
        Pkt::from_data(data, wire, from)
    }

    #[test]
    fn test_interest_without_nonce_dropped() {
        let (mut thread, faces, _fib) = setup();
        let a = add_face(&faces, Scope::NonLocal);

        let interest = Interest::new(Name::from_str("/test/1").unwrap());
        thread.process_incoming_interest(interest_pkt(interest, a.face_id()));

        assert_eq!(thread.pit_size(), 0);
        assert!(a.sent().is_empty());
    }

    #[test]
    fn test_interest_forwarded_to_nexthop() {
        let (mut thread, faces, fib) = setup();
        let a = add_face(&faces, Scope::NonLocal);
        let b = add_face(&faces, Scope::NonLocal);
        fib.insert_next_hop(&Name::from_str("/test").unwrap(), b.face_id(), 10);

        let interest = Interest::new(Name::from_str("/test/1").unwrap()).with_nonce(7);
        thread.process_incoming_interest(interest_pkt(interest, a.face_id()));

        assert_eq!(thread.pit_size(), 1);
        assert!(a.sent().is_empty());
        let sent = b.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].pkt.is_interest());

        let token = sent[0].pit_token.clone().unwrap();
        assert_eq!(token.len(), 6);
        assert_eq!(&token[..2], &[0, 0]);

        assert_eq!(thread.counters().snapshot().n_out_interests, 1);
    }

    #[test]
    fn test_interest_without_route_creates_pit_entry_only() {
        let (mut thread, faces, _fib) = setup();
        let a = add_face(&faces, Scope::NonLocal);
        let b = add_face(&faces, Scope::NonLocal);

        let interest = Interest::new(Name::from_str("/test/1").unwrap()).with_nonce(7);
        thread.process_incoming_interest(interest_pkt(interest, a.face_id()));

        assert_eq!(thread.pit_size(), 1);
        assert!(b.sent().is_empty());
    }

    #[test]
    fn test_looping_interest_dropped() {
        let (mut thread, faces, fib) = setup();
        let a = add_face(&faces, Scope::NonLocal);
        let b = add_face(&faces, Scope::NonLocal);
        let c = add_face(&faces, Scope::NonLocal);
        fib.insert_next_hop(&Name::from_str("/test").unwrap(), c.face_id(), 10);

        let interest = Interest::new(Name::from_str("/test/1").unwrap()).with_nonce(7);
        thread.process_incoming_interest(interest_pkt(interest.clone(), a.face_id()));
        assert_eq!(c.sent().len(), 1);

        // Same nonce arriving on a different face is a loop
        thread.process_incoming_interest(interest_pkt(interest, b.face_id()));
        assert_eq!(c.sent().len(), 1);
        assert_eq!(thread.pit_size(), 1);
    }

    #[test]
    fn test_data_satisfies_pending_interest() {
        let (mut thread, faces, fib) = setup();
        let a = add_face(&faces, Scope::NonLocal);
        let b = add_face(&faces, Scope::NonLocal);
        fib.insert_next_hop(&Name::from_str("/test").unwrap(), b.face_id(), 10);

        let interest = Interest::new(Name::from_str("/test/1").unwrap()).with_nonce(7);
        thread.process_incoming_interest(interest_pkt(interest, a.face_id()));
        let token = b.sent()[0].pit_token.clone();

        let data = Data::new(Name::from_str("/test/1").unwrap(), vec![1, 2, 3])
            .with_freshness_period(Duration::from_secs(1));
        let mut pkt = data_pkt(data, b.face_id());
        pkt.pit_token = token;
        thread.process_incoming_data(pkt);

        let delivered = a.sent();
        assert_eq!(delivered.len(), 1);
        assert!(delivered[0].pkt.data().is_some());

        let counters = thread.counters().snapshot();
        assert_eq!(counters.n_satisfied_interests, 1);
        assert_eq!(counters.n_out_data, 1);
        assert_eq!(thread.cs_size(), 1);
    }

    #[test]
    fn test_content_store_serves_subsequent_interest() {
        let (mut thread, faces, fib) = setup();
        let a = add_face(&faces, Scope::NonLocal);
        let b = add_face(&faces, Scope::NonLocal);
        let c = add_face(&faces, Scope::NonLocal);
        fib.insert_next_hop(&Name::from_str("/test").unwrap(), b.face_id(), 10);

        let interest = Interest::new(Name::from_str("/test/1").unwrap()).with_nonce(7);
        thread.process_incoming_interest(interest_pkt(interest, a.face_id()));
        let token = b.sent()[0].pit_token.clone();

        let data = Data::new(Name::from_str("/test/1").unwrap(), vec![1, 2, 3])
            .with_freshness_period(Duration::from_secs(30));
        let mut pkt = data_pkt(data, b.face_id());
        pkt.pit_token = token;
        thread.process_incoming_data(pkt);

        let retry = Interest::new(Name::from_str("/test/1").unwrap()).with_nonce(8);
        thread.process_incoming_interest(interest_pkt(retry, c.face_id()));

        let delivered = c.sent();
        assert_eq!(delivered.len(), 1);
        assert!(delivered[0].pkt.data().is_some());
        assert_eq!(thread.counters().snapshot().n_cs_hits, 1);
        // Upstream was not asked again
        assert_eq!(b.sent().len(), 1);
    }

    #[test]
    fn test_localhost_scope_enforced() {
        let (mut thread, faces, fib) = setup();
        let a = add_face(&faces, Scope::NonLocal);
        let b = add_face(&faces, Scope::Local);
        fib.insert_next_hop(&Name::from_str("/localhost").unwrap(), b.face_id(), 10);

        let interest = Interest::new(Name::from_str("/localhost/nfd/status").unwrap()).with_nonce(7);
        thread.process_incoming_interest(interest_pkt(interest, a.face_id()));

        assert_eq!(thread.pit_size(), 0);
        assert!(b.sent().is_empty());
    }

    #[test]
    fn test_unsolicited_data_admitted_but_not_forwarded() {
        let (mut thread, faces, _fib) = setup();
        let a = add_face(&faces, Scope::NonLocal);
        let b = add_face(&faces, Scope::NonLocal);

        let data = Data::new(Name::from_str("/test/1").unwrap(), vec![1]);
        thread.process_incoming_data(data_pkt(data, b.face_id()));

        assert!(a.sent().is_empty());
        assert_eq!(thread.cs_size(), 1);
        assert_eq!(thread.counters().snapshot().n_out_data, 0);
    }

    #[test]
    fn test_multicast_strategy_forwards_to_all_nexthops() {
        let (mut thread, faces, fib) = setup();
        let a = add_face(&faces, Scope::NonLocal);
        let b = add_face(&faces, Scope::NonLocal);
        let c = add_face(&faces, Scope::NonLocal);
        let prefix = Name::from_str("/test").unwrap();
        fib.insert_next_hop(&prefix, b.face_id(), 10);
        fib.insert_next_hop(&prefix, c.face_id(), 20);
        fib.set_strategy(&prefix, make_strategy_name("multicast", 1));

        let interest = Interest::new(Name::from_str("/test/1").unwrap()).with_nonce(7);
        thread.process_incoming_interest(interest_pkt(interest, a.face_id()));

        assert_eq!(b.sent().len(), 1);
        assert_eq!(c.sent().len(), 1);
    }

    #[test]
    fn test_hop_limit_expired_interest_dropped() {
        let (mut thread, faces, fib) = setup();
        let a = add_face(&faces, Scope::NonLocal);
        let b = add_face(&faces, Scope::NonLocal);
        fib.insert_next_hop(&Name::from_str("/test").unwrap(), b.face_id(), 10);

        let dead = Interest::new(Name::from_str("/test/1").unwrap())
            .with_nonce(7)
            .with_hop_limit(0);
        thread.process_incoming_interest(interest_pkt(dead, a.face_id()));
        assert!(b.sent().is_empty());

        // HopLimit 1 decrements to 0 and cannot reach a non-local face
        let last_hop = Interest::new(Name::from_str("/test/1").unwrap())
            .with_nonce(8)
            .with_hop_limit(1);
        thread.process_incoming_interest(interest_pkt(last_hop, a.face_id()));
        assert!(b.sent().is_empty());
    }
}
