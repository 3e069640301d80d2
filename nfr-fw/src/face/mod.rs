//! Face abstraction: transports move frames, link services turn frames
//! into packets, and the face table tracks every active face.

pub mod link_service;
pub mod table;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::pkt::OutPkt;

pub use link_service::{LinkServiceOptions, NdnlpLinkService};
pub use table::FaceTable;

/// Errors from face transports and link services.
#[derive(Debug, thiserror::Error)]
pub enum FaceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Transport closed")]
    Closed,
    #[error("Frame of {0} bytes exceeds MTU")]
    FrameTooLarge(usize),
}

/// Locality of a face.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Local,
    NonLocal,
}

/// Link type of a face.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    PointToPoint,
    MultiAccess,
    AdHoc,
}

/// Administrative and operational state of a face.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaceState {
    Up,
    Down,
    AdminDown,
}

/// A lower-layer channel carrying opaque frames. Splitting separates the
/// receive and send halves so they can be driven by independent tasks.
pub trait Transport: Send + 'static {
    fn mtu(&self) -> usize;
    fn scope(&self) -> Scope;
    fn link_type(&self) -> LinkType;
    /// Idle lifetime for on-demand faces; `None` for persistent ones.
    fn expiration_period(&self) -> Option<Duration>;
    fn split(self: Box<Self>) -> (Box<dyn TransportRx>, Box<dyn TransportTx>);
}

#[async_trait]
pub trait TransportRx: Send {
    /// Receive the next frame. An error closes the face.
    async fn recv_frame(&mut self) -> Result<Vec<u8>, FaceError>;
}

#[async_trait]
pub trait TransportTx: Send {
    async fn send_frame(&mut self, frame: &[u8]) -> Result<(), FaceError>;
    /// Bytes currently queued in the transport, for congestion marking.
    fn send_queue_size(&self) -> u64;
}

/// An active face as seen by the forwarding threads.
pub trait Face: Send + Sync {
    fn face_id(&self) -> u64;
    fn scope(&self) -> Scope;
    fn link_type(&self) -> LinkType;
    fn mtu(&self) -> usize;
    fn state(&self) -> FaceState;
    /// Queue a packet for transmission. Never blocks; drops on overflow.
    fn send_packet(&self, out: OutPkt);
    fn counters(&self) -> FaceCountersSnapshot;
    /// Idempotent; stops both face tasks.
    fn close(&self);
    /// Whether this on-demand face has been idle past its lifetime.
    fn expired(&self) -> bool;
}

/// Per-face packet and byte counters, updated by the face tasks.
#[derive(Debug, Default)]
pub struct FaceCounters {
    pub n_in_interests: AtomicU64,
    pub n_in_data: AtomicU64,
    pub n_out_interests: AtomicU64,
    pub n_out_data: AtomicU64,
    pub n_in_bytes: AtomicU64,
    pub n_out_bytes: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaceCountersSnapshot {
    pub n_in_interests: u64,
    pub n_in_data: u64,
    pub n_out_interests: u64,
    pub n_out_data: u64,
    pub n_in_bytes: u64,
    pub n_out_bytes: u64,
}

impl FaceCounters {
    pub fn snapshot(&self) -> FaceCountersSnapshot {
        FaceCountersSnapshot {
            n_in_interests: self.n_in_interests.load(Ordering::Relaxed),
            n_in_data: self.n_in_data.load(Ordering::Relaxed),
            n_out_interests: self.n_out_interests.load(Ordering::Relaxed),
            n_out_data: self.n_out_data.load(Ordering::Relaxed),
            n_in_bytes: self.n_in_bytes.load(Ordering::Relaxed),
            n_out_bytes: self.n_out_bytes.load(Ordering::Relaxed),
        }
    }
}
