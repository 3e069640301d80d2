use std::sync::Arc;

use log::{error, info};
use tokio::sync::{mpsc, oneshot, watch};

use nfr_core::Name;

use crate::config::{Config, ConfigError};
use crate::face::link_service::{LinkServiceOptions, NdnlpLinkService};
use crate::face::{FaceTable, Transport};
use crate::fw::thread::{Thread, ThreadCounters};
use crate::pkt::Pkt;
use crate::table::fib::{make_fib, FibStrategyTable};
use crate::table::network_region::NetworkRegionTable;
use crate::table::rib::RibTable;

pub(crate) fn is_localhost(name: &Name) -> bool {
    matches!(name.get(0), Some(c) if c.typ == nfr_core::name::TLV_GENERIC_COMPONENT && c.value == b"localhost")
}

pub(crate) fn is_localhop(name: &Name) -> bool {
    matches!(name.get(0), Some(c) if c.typ == nfr_core::name::TLV_GENERIC_COMPONENT && c.value == b"localhop")
}

/// Shard a name onto a forwarding thread. All `/localhost` management
/// traffic is pinned to thread 0.
pub fn hash_name_to_thread(name: &Name, thread_count: usize) -> usize {
    if is_localhost(name) {
        return 0;
    }
    (name.hash_value() % thread_count as u64) as usize
}

/// Routes incoming packets from the faces onto the per-thread ingress
/// queues. Interests shard by full-name hash; Data follows the PIT
/// token back to the thread that owns the entry, or fans out to every
/// thread matching a prefix of its name when no token is present.
pub struct Dispatch {
    queues: Vec<mpsc::Sender<Pkt>>,
}

impl Dispatch {
    pub fn new(queues: Vec<mpsc::Sender<Pkt>>) -> Self {
        Self { queues }
    }

    pub fn thread_count(&self) -> usize {
        self.queues.len()
    }

    pub fn dispatch_interest(&self, pkt: Pkt) {
        let thread = hash_name_to_thread(&pkt.name, self.queues.len());
        self.enqueue(thread, pkt, "Interest");
    }

    /// A 6-byte PIT token carries the owning thread id in its first two
    /// bytes, so returning Data goes straight back to that thread. An
    /// Interest sent with CanBePrefix can be satisfied by Data with a
    /// longer name, so without a token the Data must reach every thread
    /// a prefix of its name shards onto.
    pub fn dispatch_data(&self, pkt: Pkt) {
        if let Some(token) = pkt.pit_token.as_deref() {
            if token.len() == 6 {
                let thread = u16::from_be_bytes([token[0], token[1]]) as usize;
                if thread < self.queues.len() {
                    self.enqueue(thread, pkt, "Data");
                    return;
                }
            }
        }
        for thread in self.prefix_threads(&pkt.name) {
            self.enqueue(thread, pkt.clone(), "Data");
        }
    }

    fn prefix_threads(&self, name: &Name) -> Vec<usize> {
        if is_localhost(name) {
            return vec![0];
        }
        let count = self.queues.len() as u64;
        // Skip index 0 (the empty prefix).
        let mut threads: Vec<usize> = name.prefix_hashes()[1..]
            .iter()
            .map(|hash| (hash % count) as usize)
            .collect();
        threads.sort_unstable();
        threads.dedup();
        threads
    }

    fn enqueue(&self, thread: usize, pkt: Pkt, kind: &str) {
        if self.queues[thread].try_send(pkt).is_err() {
            error!("fw-thread-{}: {} dropped due to full queue", thread, kind);
        }
    }
}

/// The forwarder: tables, faces, and forwarding threads under one roof.
pub struct Forwarder {
    config: Config,
    fib: Arc<dyn FibStrategyTable>,
    rib: Arc<RibTable>,
    network_region: Arc<NetworkRegionTable>,
    face_table: Arc<FaceTable>,
    dispatch: Arc<Dispatch>,
    workers: Option<Vec<Thread>>,
    counters: Vec<Arc<ThreadCounters>>,
    controls: Vec<(mpsc::Sender<()>, oneshot::Receiver<()>)>,
    sweeper_quit: watch::Sender<bool>,
}

impl Forwarder {
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        config.validate()?;

        let fib = make_fib(&config.tables.fib);
        let rib = Arc::new(RibTable::new(fib.clone()));
        let network_region = Arc::new(NetworkRegionTable::from_config(
            &config.tables.network_region,
        ));
        let face_table = Arc::new(FaceTable::new(rib.clone()));

        let mut queues = Vec::with_capacity(config.forwarder.threads);
        let mut receivers = Vec::with_capacity(config.forwarder.threads);
        for _ in 0..config.forwarder.threads {
            let (tx, rx) = mpsc::channel(config.forwarder.queue_size);
            queues.push(tx);
            receivers.push(rx);
        }
        let dispatch = Arc::new(Dispatch::new(queues));

        let mut workers = Vec::with_capacity(config.forwarder.threads);
        let mut counters = Vec::with_capacity(config.forwarder.threads);
        let mut controls = Vec::with_capacity(config.forwarder.threads);
        for (id, rx) in receivers.into_iter().enumerate() {
            let (quit_tx, quit_rx) = mpsc::channel(1);
            let (done_tx, done_rx) = oneshot::channel();
            let worker = Thread::new(
                id,
                &config,
                fib.clone(),
                face_table.clone(),
                network_region.clone(),
                rx,
                quit_rx,
                done_tx,
            );
            counters.push(worker.counters());
            workers.push(worker);
            controls.push((quit_tx, done_rx));
        }

        let (sweeper_quit, _) = watch::channel(false);

        Ok(Self {
            config,
            fib,
            rib,
            network_region,
            face_table,
            dispatch,
            workers: Some(workers),
            counters,
            controls,
            sweeper_quit,
        })
    }

    /// Spawn the forwarding threads and the face expiration sweeper.
    pub fn start(&mut self) {
        if let Some(workers) = self.workers.take() {
            info!("Starting {} forwarding threads", workers.len());
            for worker in workers {
                tokio::spawn(worker.run());
            }
            let face_table = self.face_table.clone();
            let quit = self.sweeper_quit.subscribe();
            tokio::spawn(async move { face_table.run_sweeper(quit).await });
        }
    }

    /// Signal all forwarding threads to quit and wait for each to
    /// acknowledge.
    pub async fn stop(&mut self) {
        info!("Stopping forwarder");
        let _ = self.sweeper_quit.send(true);
        let controls = std::mem::take(&mut self.controls);
        let mut acks = Vec::with_capacity(controls.len());
        for (quit, done) in controls {
            let _ = quit.send(()).await;
            acks.push(done);
        }
        for result in futures::future::join_all(acks).await {
            let _ = result;
        }
        info!("All forwarding threads stopped");
    }

    /// Create a face over `transport` and start its tasks.
    pub fn add_face(
        &self,
        transport: Box<dyn Transport>,
        options: LinkServiceOptions,
    ) -> u64 {
        NdnlpLinkService::spawn(
            transport,
            options,
            self.face_table.clone(),
            self.dispatch.clone(),
        )
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn fib(&self) -> &Arc<dyn FibStrategyTable> {
        &self.fib
    }

    pub fn rib(&self) -> &Arc<RibTable> {
        &self.rib
    }

    pub fn network_region(&self) -> &Arc<NetworkRegionTable> {
        &self.network_region
    }

    pub fn face_table(&self) -> &Arc<FaceTable> {
        &self.face_table
    }

    pub fn dispatch(&self) -> &Arc<Dispatch> {
        &self.dispatch
    }

    pub fn thread_counters(&self) -> &[Arc<ThreadCounters>] {
        &self.counters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nfr_core::Data;

    fn data_pkt(name: Name) -> Pkt {
        let data = Data::new(name, vec![1]);
        let raw = data.encode();
        Pkt::from_data(data, raw, 1)
    }

    #[test]
    fn test_localhost_pinned_to_thread_zero() {
        let name = Name::from_str("/localhost/nfd/status").unwrap();
        for threads in 1..=8 {
            assert_eq!(hash_name_to_thread(&name, threads), 0);
        }
    }

    #[test]
    fn test_sharding_is_stable() {
        let name = Name::from_str("/example/data/1").unwrap();
        let a = hash_name_to_thread(&name, 8);
        let b = hash_name_to_thread(&name, 8);
        assert_eq!(a, b);
        assert!(a < 8);
    }

    #[test]
    fn test_data_with_token_routes_to_owning_thread() {
        let (tx0, mut rx0) = mpsc::channel(4);
        let (tx1, mut rx1) = mpsc::channel(4);
        let dispatch = Dispatch::new(vec![tx0, tx1]);

        let mut pkt = data_pkt(Name::from_str("/a/b").unwrap());
        pkt.pit_token = Some(vec![0, 1, 0, 0, 0, 7]);
        dispatch.dispatch_data(pkt);

        assert!(rx0.try_recv().is_err());
        assert!(rx1.try_recv().is_ok());
    }

    #[test]
    fn test_data_without_token_reaches_prefix_interest_thread() {
        // A CanBePrefix Interest for a prefix pends on the thread the
        // prefix shards onto; the Data satisfying it can carry a longer
        // name that shards onto a different thread. Find such a pair.
        let prefix = Name::from_str("/cbp").unwrap();
        let interest_thread = hash_name_to_thread(&prefix, 2);
        let data_name = (0..64)
            .map(|i| Name::from_str(&format!("/cbp/seg{}", i)).unwrap())
            .find(|n| hash_name_to_thread(n, 2) != interest_thread)
            .unwrap();
        let data_thread = hash_name_to_thread(&data_name, 2);

        let (tx0, mut rx0) = mpsc::channel(4);
        let (tx1, mut rx1) = mpsc::channel(4);
        let dispatch = Dispatch::new(vec![tx0, tx1]);
        dispatch.dispatch_data(data_pkt(data_name));

        let received = [rx0.try_recv().is_ok(), rx1.try_recv().is_ok()];
        assert!(received[interest_thread]);
        assert!(received[data_thread]);
    }

    #[test]
    fn test_localhost_data_without_token_pinned_to_thread_zero() {
        let (tx0, mut rx0) = mpsc::channel(4);
        let (tx1, mut rx1) = mpsc::channel(4);
        let dispatch = Dispatch::new(vec![tx0, tx1]);

        dispatch.dispatch_data(data_pkt(
            Name::from_str("/localhost/nfd/status/1").unwrap(),
        ));

        assert!(rx0.try_recv().is_ok());
        assert!(rx0.try_recv().is_err());
        assert!(rx1.try_recv().is_err());
    }
}
