use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use log::info;
use tokio::sync::watch;

use crate::face::Face;
use crate::table::rib::RibTable;

/// How often on-demand faces are checked for expiration.
pub const FACE_SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// Tracks all active faces by ID. Face IDs are allocated monotonically
/// starting at 1 and never reused.
pub struct FaceTable {
    faces: RwLock<HashMap<u64, Arc<dyn Face>>>,
    next_id: AtomicU64,
    rib: Arc<RibTable>,
}

impl FaceTable {
    pub fn new(rib: Arc<RibTable>) -> Self {
        Self {
            faces: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            rib,
        }
    }

    /// Reserve the ID for a face about to be created.
    pub fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn insert(&self, face: Arc<dyn Face>) {
        let id = face.face_id();
        self.faces
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, face);
        info!("faceid={}: Registered face", id);
    }

    pub fn get(&self, face_id: u64) -> Option<Arc<dyn Face>> {
        self.faces
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&face_id)
            .cloned()
    }

    /// Remove a face and purge every route registered through it.
    pub fn remove(&self, face_id: u64) -> Option<Arc<dyn Face>> {
        let removed = self
            .faces
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&face_id);
        if removed.is_some() {
            self.rib.cleanup_face(face_id);
            info!("faceid={}: Unregistered face", face_id);
        }
        removed
    }

    pub fn faces(&self) -> Vec<Arc<dyn Face>> {
        self.faces
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.faces.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Periodically close and remove on-demand faces that have been idle
    /// past their expiration period.
    pub async fn run_sweeper(self: Arc<Self>, mut quit: watch::Receiver<bool>) {
        let mut tick = tokio::time::interval(FACE_SWEEP_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = tick.tick() => self.sweep(),
                changed = quit.changed() => {
                    if changed.is_err() || *quit.borrow() {
                        return;
                    }
                }
            }
        }
    }

    fn sweep(&self) {
        let expired: Vec<Arc<dyn Face>> = self
            .faces
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|face| face.expired())
            .cloned()
            .collect();
        for face in expired {
            info!("faceid={}: Closing expired face", face.face_id());
            face.close();
            self.remove(face.face_id());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::face::{FaceCounters, FaceCountersSnapshot, FaceState, LinkType, Scope};
    use crate::pkt::OutPkt;
    use crate::table::fib::{make_fib, FibNextHopEntry};
    use crate::table::rib::{Route, ROUTE_ORIGIN_APP};
    use nfr_core::Name;
    use std::sync::atomic::AtomicBool;

    struct StubFace {
        id: u64,
        expired: AtomicBool,
        closed: AtomicBool,
        counters: FaceCounters,
    }

    impl StubFace {
        fn new(id: u64) -> Self {
            Self {
                id,
                expired: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                counters: FaceCounters::default(),
            }
        }
    }

    impl Face for StubFace {
        fn face_id(&self) -> u64 {
            self.id
        }
        fn scope(&self) -> Scope {
            Scope::NonLocal
        }
        fn link_type(&self) -> LinkType {
            LinkType::PointToPoint
        }
        fn mtu(&self) -> usize {
            1500
        }
        fn state(&self) -> FaceState {
            FaceState::Up
        }
        fn send_packet(&self, _out: OutPkt) {}
        fn counters(&self) -> FaceCountersSnapshot {
            self.counters.snapshot()
        }
        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
        fn expired(&self) -> bool {
            self.expired.load(Ordering::SeqCst)
        }
    }

    fn make_table() -> (FaceTable, Arc<RibTable>) {
        let fib = make_fib(&crate::config::FibConfig::default());
        let rib = Arc::new(RibTable::new(fib));
        (FaceTable::new(rib.clone()), rib)
    }

    #[test]
    fn test_ids_start_at_one_and_increase() {
        let (table, _) = make_table();
        assert_eq!(table.allocate_id(), 1);
        assert_eq!(table.allocate_id(), 2);
        assert_eq!(table.allocate_id(), 3);
    }

    #[test]
    fn test_insert_get_remove() {
        let (table, _) = make_table();
        let id = table.allocate_id();
        table.insert(Arc::new(StubFace::new(id)));
        assert_eq!(table.len(), 1);
        assert!(table.get(id).is_some());
        assert!(table.remove(id).is_some());
        assert!(table.get(id).is_none());
        assert!(table.remove(id).is_none());
    }

    #[test]
    fn test_remove_cleans_routes() {
        let (table, rib) = make_table();
        let id = table.allocate_id();
        table.insert(Arc::new(StubFace::new(id)));

        let prefix = Name::from_str("/example").unwrap();
        rib.add_route(
            &prefix,
            Route { face: id, origin: ROUTE_ORIGIN_APP, cost: 10, flags: 0, expiration_period: None },
        );
        assert_eq!(
            rib.fib().find_next_hops(&prefix),
            vec![FibNextHopEntry { nexthop: id, cost: 10 }]
        );

        table.remove(id);
        assert!(rib.fib().find_next_hops(&prefix).is_empty());
    }

    #[test]
    fn test_sweep_closes_expired_faces() {
        let (table, _) = make_table();
        let keep = Arc::new(StubFace::new(table.allocate_id()));
        let stale = Arc::new(StubFace::new(table.allocate_id()));
        stale.expired.store(true, Ordering::SeqCst);
        table.insert(keep.clone());
        table.insert(stale.clone());

        table.sweep();
        assert_eq!(table.len(), 1);
        assert!(stale.closed.load(Ordering::SeqCst));
        assert!(!keep.closed.load(Ordering::SeqCst));
    }
}
