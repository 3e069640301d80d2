//! NDNLPv2 link service: fragmentation, reassembly, PIT tokens, and
//! congestion marking between a transport and the forwarding threads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, error, info, trace, warn};
use tokio::sync::{mpsc, watch};

use nfr_core::{LpPacket, Packet};

use crate::config::FacesConfig;
use crate::dispatch::Dispatch;
use crate::face::{
    Face, FaceCounters, FaceCountersSnapshot, FaceError, FaceState, FaceTable, LinkType, Scope,
    Transport, TransportRx, TransportTx,
};
use crate::pkt::{OutPkt, Pkt};

// LpPacket type + length of up to 2^16, plus the Fragment header
const LP_PACKET_OVERHEAD: usize = 1 + 3 + 1 + 3;
const PIT_TOKEN_OVERHEAD: usize = 1 + 1 + 6;
const CONGESTION_MARK_OVERHEAD: usize = 3 + 1 + 8;
// Sequence + FragIndex + FragCount (max 2^16 fragments)
const FRAGMENTATION_OVERHEAD: usize = (1 + 1 + 8) + (1 + 1 + 2) + (1 + 1 + 2);
const INCOMING_FACE_ID_OVERHEAD: usize = 3 + 1 + 8;

const REASSEMBLY_BUFFERS: usize = 16;
// FragCount is carried in at most two bytes
const MAX_FRAG_COUNT: u64 = 1 << 16;

/// Settings for an NDNLPv2 link service.
#[derive(Debug, Clone)]
pub struct LinkServiceOptions {
    pub is_fragmentation_enabled: bool,
    pub is_reassembly_enabled: bool,
    pub is_consumer_controlled_forwarding_enabled: bool,
    pub is_incoming_face_indication_enabled: bool,
    pub is_congestion_marking_enabled: bool,
    pub congestion_marking_interval: Duration,
    pub congestion_threshold_bytes: u64,
    pub send_queue_length: usize,
}

impl Default for LinkServiceOptions {
    fn default() -> Self {
        Self {
            is_fragmentation_enabled: true,
            is_reassembly_enabled: true,
            is_consumer_controlled_forwarding_enabled: false,
            is_incoming_face_indication_enabled: false,
            is_congestion_marking_enabled: false,
            congestion_marking_interval: Duration::from_millis(100),
            congestion_threshold_bytes: 1 << 16,
            send_queue_length: 1024,
        }
    }
}

impl LinkServiceOptions {
    pub fn from_config(faces: &FacesConfig) -> Self {
        Self {
            is_congestion_marking_enabled: faces.congestion_marking,
            congestion_marking_interval: faces.congestion_interval(),
            congestion_threshold_bytes: faces.congestion_threshold_bytes,
            send_queue_length: faces.queue_size,
            ..Self::default()
        }
    }

    fn header_overhead(&self) -> usize {
        let mut overhead = LP_PACKET_OVERHEAD;
        if self.is_fragmentation_enabled {
            overhead += FRAGMENTATION_OVERHEAD;
        }
        if self.is_incoming_face_indication_enabled {
            overhead += INCOMING_FACE_ID_OVERHEAD;
        }
        overhead
    }
}

struct NdnlpFace {
    face_id: u64,
    scope: Scope,
    link_type: LinkType,
    mtu: usize,
    expiration_period: Option<Duration>,
    sender: mpsc::Sender<OutPkt>,
    counters: Arc<FaceCounters>,
    running: AtomicBool,
    close_signal: watch::Sender<bool>,
    expiry: Mutex<Option<Instant>>,
}

impl NdnlpFace {
    fn touch(&self) {
        if let Some(period) = self.expiration_period {
            *self.expiry.lock().unwrap_or_else(|e| e.into_inner()) =
                Some(Instant::now() + period);
        }
    }
}

impl Face for NdnlpFace {
    fn face_id(&self) -> u64 {
        self.face_id
    }

    fn scope(&self) -> Scope {
        self.scope
    }

    fn link_type(&self) -> LinkType {
        self.link_type
    }

    fn mtu(&self) -> usize {
        self.mtu
    }

    fn state(&self) -> FaceState {
        if self.running.load(Ordering::Acquire) {
            FaceState::Up
        } else {
            FaceState::Down
        }
    }

    fn send_packet(&self, out: OutPkt) {
        if self.sender.try_send(out).is_err() {
            debug!("faceid={}: Dropped packet due to full send queue", self.face_id);
            return;
        }
        self.touch();
    }

    fn counters(&self) -> FaceCountersSnapshot {
        self.counters.snapshot()
    }

    fn close(&self) {
        let _ = self.close_signal.send(true);
    }

    fn expired(&self) -> bool {
        self.expiry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .map(|at| Instant::now() > at)
            .unwrap_or(false)
    }
}

/// NDNLPv2 link service. [`NdnlpLinkService::spawn`] wires a transport
/// into the forwarder and drives it with a receive task and a send task.
pub struct NdnlpLinkService;

impl NdnlpLinkService {
    /// Register a face for `transport` and start its tasks, returning
    /// the allocated face ID.
    pub fn spawn(
        transport: Box<dyn Transport>,
        options: LinkServiceOptions,
        face_table: Arc<FaceTable>,
        dispatch: Arc<Dispatch>,
    ) -> u64 {
        let face_id = face_table.allocate_id();
        let mtu = transport.mtu();
        let scope = transport.scope();
        let link_type = transport.link_type();
        let expiration_period = transport.expiration_period();

        let (sender, out_rx) = mpsc::channel(options.send_queue_length.max(1));
        let (close_signal, close_rx) = watch::channel(false);
        let face = Arc::new(NdnlpFace {
            face_id,
            scope,
            link_type,
            mtu,
            expiration_period,
            sender,
            counters: Arc::new(FaceCounters::default()),
            running: AtomicBool::new(true),
            close_signal,
            expiry: Mutex::new(expiration_period.map(|p| Instant::now() + p)),
        });
        face_table.insert(face.clone());
        info!(
            "faceid={}: Face up mtu={} scope={:?} link-type={:?}",
            face_id, mtu, scope, link_type
        );

        let (rx_half, tx_half) = transport.split();
        let receive = ReceiveTask {
            face: face.clone(),
            options: options.clone(),
            dispatch,
            face_table,
            transport: rx_half,
            close: close_rx.clone(),
            reassembler: Reassembler::new(),
        };
        let header_overhead = options.header_overhead();
        let send = SendTask {
            face,
            options,
            header_overhead,
            transport: tx_half,
            queue: out_rx,
            close: close_rx,
            next_sequence: 0,
            congestion_check: 0,
            last_congestion_mark: None,
        };
        tokio::spawn(receive.run());
        tokio::spawn(send.run());

        face_id
    }
}

struct ReassemblySlot {
    base_sequence: u64,
    fragments: Option<Vec<Option<Vec<u8>>>>,
}

/// Ring of in-progress reassemblies keyed by the base sequence of the
/// fragmented packet. A new sequence claims the next slot round-robin,
/// abandoning whatever partial packet held it.
struct Reassembler {
    slots: Vec<ReassemblySlot>,
    index: usize,
}

impl Reassembler {
    fn new() -> Self {
        Self {
            slots: (0..REASSEMBLY_BUFFERS)
                .map(|_| ReassemblySlot { base_sequence: 0, fragments: None })
                .collect(),
            index: 0,
        }
    }

    /// Accept one fragment; returns the reassembled packet once all
    /// fragments of the sequence have arrived.
    fn accept(
        &mut self,
        fragment: Vec<u8>,
        base_sequence: u64,
        frag_index: u64,
        frag_count: u64,
    ) -> Option<Vec<u8>> {
        if frag_count == 0 || frag_count > MAX_FRAG_COUNT {
            warn!("Received fragment with invalid count {} - DROP", frag_count);
            return None;
        }

        let slot = match self
            .slots
            .iter()
            .position(|s| s.fragments.is_some() && s.base_sequence == base_sequence)
        {
            Some(i) => i,
            None => {
                let i = (self.index + 1) % REASSEMBLY_BUFFERS;
                self.index = i;
                self.slots[i] = ReassemblySlot {
                    base_sequence,
                    fragments: Some(vec![None; frag_count as usize]),
                };
                i
            }
        };

        let buffer = self.slots[slot].fragments.as_mut()?;
        if frag_count as usize != buffer.len() {
            warn!(
                "Received fragment count {} does not match expected {} base={}",
                frag_count,
                buffer.len(),
                base_sequence
            );
            return None;
        }
        if frag_index as usize >= buffer.len() {
            warn!(
                "Received fragment index {} out of range count={} base={}",
                frag_index, frag_count, base_sequence
            );
            return None;
        }
        buffer[frag_index as usize] = Some(fragment);

        if buffer.iter().any(|f| f.is_none()) {
            return None;
        }
        let complete = self.slots[slot].fragments.take()?;
        self.slots[slot].base_sequence = 0;
        let mut packet = Vec::with_capacity(complete.iter().flatten().map(Vec::len).sum());
        for frag in complete.into_iter().flatten() {
            packet.extend_from_slice(&frag);
        }
        Some(packet)
    }
}

struct ReceiveTask {
    face: Arc<NdnlpFace>,
    options: LinkServiceOptions,
    dispatch: Arc<Dispatch>,
    face_table: Arc<FaceTable>,
    transport: Box<dyn TransportRx>,
    close: watch::Receiver<bool>,
    reassembler: Reassembler,
}

impl ReceiveTask {
    async fn run(mut self) {
        loop {
            tokio::select! {
                frame = self.transport.recv_frame() => match frame {
                    Ok(frame) => self.handle_incoming_frame(&frame),
                    Err(err) => {
                        info!("faceid={}: Transport closed: {}", self.face.face_id, err);
                        break;
                    }
                },
                changed = self.close.changed() => {
                    if changed.is_err() || *self.close.borrow() {
                        break;
                    }
                }
            }
        }
        self.face.running.store(false, Ordering::Release);
        self.face.close();
        self.face_table.remove(self.face.face_id);
    }

    fn handle_incoming_frame(&mut self, frame: &[u8]) {
        let face_id = self.face.face_id;
        self.face
            .counters
            .n_in_bytes
            .fetch_add(frame.len() as u64, Ordering::Relaxed);
        self.face.touch();

        let l2 = match Packet::decode(frame) {
            Ok((packet, _)) => packet,
            Err(err) => {
                error!("faceid={}: Unable to decode incoming frame: {}", face_id, err);
                return;
            }
        };

        let mut pit_token = None;
        let mut congestion_mark = None;
        let mut next_hop_face_id = None;
        let (l3, raw) = match l2 {
            // Bare Interest or Data packet
            bare @ (Packet::Interest(_) | Packet::Data(_)) => (bare, frame.to_vec()),
            Packet::Lp(lp) => {
                if lp.fragment.is_empty() {
                    trace!("faceid={}: IDLE frame - DROP", face_id);
                    return;
                }

                let fragment;
                if self.options.is_reassembly_enabled && lp.sequence.is_some() {
                    let sequence = lp.sequence.unwrap_or(0);
                    let frag_index = lp.frag_index.unwrap_or(0);
                    let frag_count = lp.frag_count.unwrap_or(1);
                    let base_sequence = sequence.wrapping_sub(frag_index);
                    trace!(
                        "faceid={}: Received fragment index={} count={} base={}",
                        face_id, frag_index, frag_count, base_sequence
                    );
                    if frag_index == 0 && frag_count == 1 {
                        // Single fragment, bypass reassembly
                        fragment = lp.fragment;
                    } else {
                        match self.reassembler.accept(
                            lp.fragment,
                            base_sequence,
                            frag_index,
                            frag_count,
                        ) {
                            Some(packet) => fragment = packet,
                            None => return,
                        }
                    }
                } else if lp.frag_index.is_some() || lp.frag_count.is_some() {
                    warn!(
                        "faceid={}: Fragmentation fields present but reassembly disabled - DROP",
                        face_id
                    );
                    return;
                } else {
                    fragment = lp.fragment;
                }

                congestion_mark = lp.congestion_mark;
                if self.options.is_consumer_controlled_forwarding_enabled {
                    next_hop_face_id = lp.next_hop_face_id;
                }
                pit_token = lp.pit_token;

                match Packet::decode(&fragment) {
                    Ok((packet, _)) => (packet, fragment),
                    Err(err) => {
                        error!("faceid={}: Unable to decode fragment: {}", face_id, err);
                        return;
                    }
                }
            }
        };

        match l3 {
            Packet::Interest(interest) => {
                self.face
                    .counters
                    .n_in_interests
                    .fetch_add(1, Ordering::Relaxed);
                let mut pkt = Pkt::from_interest(interest, raw, face_id);
                pkt.pit_token = pit_token;
                pkt.congestion_mark = congestion_mark;
                pkt.next_hop_face_id = next_hop_face_id;
                self.dispatch.dispatch_interest(pkt);
            }
            Packet::Data(data) => {
                self.face.counters.n_in_data.fetch_add(1, Ordering::Relaxed);
                let mut pkt = Pkt::from_data(data, raw, face_id);
                pkt.pit_token = pit_token;
                pkt.congestion_mark = congestion_mark;
                self.dispatch.dispatch_data(pkt);
            }
            Packet::Lp(_) => {
                error!("faceid={}: Nested link protocol frame - DROP", face_id);
            }
        }
    }
}

struct SendTask {
    face: Arc<NdnlpFace>,
    options: LinkServiceOptions,
    header_overhead: usize,
    transport: Box<dyn TransportTx>,
    queue: mpsc::Receiver<OutPkt>,
    close: watch::Receiver<bool>,
    next_sequence: u64,
    congestion_check: u64,
    last_congestion_mark: Option<Instant>,
}

impl SendTask {
    async fn run(mut self) {
        loop {
            tokio::select! {
                out = self.queue.recv() => match out {
                    Some(out) => {
                        if let Err(err) = self.send_packet(out).await {
                            info!("faceid={}: Send failed: {}", self.face.face_id, err);
                            break;
                        }
                    }
                    None => break,
                },
                changed = self.close.changed() => {
                    if changed.is_err() || *self.close.borrow() {
                        break;
                    }
                }
            }
        }
        self.face.running.store(false, Ordering::Release);
    }

    async fn send_packet(&mut self, out: OutPkt) -> Result<(), FaceError> {
        let wire = &out.pkt.raw;
        if out.pkt.is_interest() {
            self.face
                .counters
                .n_out_interests
                .fetch_add(1, Ordering::Relaxed);
        } else {
            self.face.counters.n_out_data.fetch_add(1, Ordering::Relaxed);
        }

        // A mark from upstream is passed through unchanged
        let mut congestion_mark = out.pkt.congestion_mark;
        if congestion_mark.is_none() && self.check_congestion(wire.len() as u64) {
            debug!("faceid={}: Marking congestion", self.face.face_id);
            congestion_mark = Some(1);
        }

        let mut effective_mtu = self.face.mtu.saturating_sub(self.header_overhead);
        if let Some(token) = &out.pit_token {
            if token.len() != 6 {
                panic!("outgoing PIT token length must be 6 bytes");
            }
            effective_mtu = effective_mtu.saturating_sub(PIT_TOKEN_OVERHEAD);
        }
        if congestion_mark.is_some() {
            effective_mtu = effective_mtu.saturating_sub(CONGESTION_MARK_OVERHEAD);
        }
        if effective_mtu == 0 {
            error!("faceid={}: MTU too small for link headers - DROP", self.face.face_id);
            return Ok(());
        }

        let fragments = if wire.len() > effective_mtu {
            if !self.options.is_fragmentation_enabled {
                info!(
                    "faceid={}: Attempted to send frame over MTU on link without fragmentation - DROP",
                    self.face.face_id
                );
                return Ok(());
            }
            fragment_packet(wire, effective_mtu, &mut self.next_sequence)
        } else {
            vec![LpPacket { fragment: wire.clone(), ..Default::default() }]
        };

        for mut fragment in fragments {
            if let Some(token) = &out.pit_token {
                fragment.pit_token = Some(token.clone());
            }
            if self.options.is_incoming_face_indication_enabled {
                fragment.incoming_face_id = Some(out.in_face);
            }
            fragment.congestion_mark = congestion_mark;

            let frame = fragment.encode();
            self.transport.send_frame(&frame).await?;
            self.face
                .counters
                .n_out_bytes
                .fetch_add(frame.len() as u64, Ordering::Relaxed);
        }
        self.face.touch();
        Ok(())
    }

    /// Size-triggered congestion detection. The transport queue depth is
    /// expensive to read, so it is only consulted once the byte counter
    /// passes the threshold.
    fn check_congestion(&mut self, wire_len: u64) -> bool {
        if !self.options.is_congestion_marking_enabled {
            return false;
        }

        if self.congestion_check > self.options.congestion_threshold_bytes {
            let now = Instant::now();
            let marked_recently = self
                .last_congestion_mark
                .map(|at| now < at + self.options.congestion_marking_interval)
                .unwrap_or(false);
            if !marked_recently
                && self.transport.send_queue_size() > self.options.congestion_threshold_bytes
            {
                self.last_congestion_mark = Some(now);
                return true;
            }
            self.congestion_check = 0;
        }

        self.congestion_check += wire_len;
        false
    }
}

/// Split `wire` into LP fragments of at most `effective_mtu` payload
/// bytes, assigning strictly increasing sequence numbers.
fn fragment_packet(wire: &[u8], effective_mtu: usize, next_sequence: &mut u64) -> Vec<LpPacket> {
    let frag_count = wire.len().div_ceil(effective_mtu);
    let mut fragments = Vec::with_capacity(frag_count);
    for (i, chunk) in wire.chunks(effective_mtu).enumerate() {
        *next_sequence += 1;
        fragments.push(LpPacket {
            sequence: Some(*next_sequence),
            frag_index: Some(i as u64),
            frag_count: Some(frag_count as u64),
            fragment: chunk.to_vec(),
            ..Default::default()
        });
    }
    fragments
}
