//! Core NDN data model: names, the TLV codec, and the Interest/Data/LP
//! packet types shared by the forwarding engine and the daemon.

pub mod name;
pub mod packets;
pub mod tlv;

pub use name::{Name, NameComponent, NameParseError};
pub use packets::{Data, Interest, LpPacket, MetaInfo, Packet};
pub use tlv::{TlvElement, TlvError};

/// Maximum size of an NDN packet on the wire.
pub const MAX_PACKET_SIZE: usize = 8800;
