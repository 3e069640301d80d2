//! NDN packet forwarder: forwarding threads, the PIT-CS and FIB tables,
//! faces with the NDNLPv2 link protocol, and the packet dispatcher that
//! ties them together.

pub mod config;
pub mod dispatch;
pub mod face;
pub mod fw;
pub mod pkt;
pub mod table;

pub use config::Config;
pub use dispatch::{hash_name_to_thread, Dispatch, Forwarder};
pub use face::{Face, FaceTable, LinkServiceOptions, NdnlpLinkService, Transport};
pub use pkt::{L3, OutPkt, Pkt};
