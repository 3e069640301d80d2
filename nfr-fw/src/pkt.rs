use nfr_core::{Data, Interest, Name};

/// Network-layer payload of a packet moving through the forwarder.
#[derive(Debug, Clone)]
pub enum L3 {
    Interest(Interest),
    Data(Data),
}

/// A packet in flight through the forwarding pipelines, together with the
/// link-layer metadata extracted by the link service.
#[derive(Debug, Clone)]
pub struct Pkt {
    pub l3: L3,
    /// Original wire encoding of the network-layer packet.
    pub raw: Vec<u8>,
    pub name: Name,
    pub incoming_face_id: u64,
    pub pit_token: Option<Vec<u8>>,
    pub congestion_mark: Option<u64>,
    pub next_hop_face_id: Option<u64>,
}

impl Pkt {
    pub fn from_interest(interest: Interest, raw: Vec<u8>, incoming_face_id: u64) -> Self {
        let name = interest.name.clone();
        Self {
            l3: L3::Interest(interest),
            raw,
            name,
            incoming_face_id,
            pit_token: None,
            congestion_mark: None,
            next_hop_face_id: None,
        }
    }

    pub fn from_data(data: Data, raw: Vec<u8>, incoming_face_id: u64) -> Self {
        let name = data.name.clone();
        Self {
            l3: L3::Data(data),
            raw,
            name,
            incoming_face_id,
            pit_token: None,
            congestion_mark: None,
            next_hop_face_id: None,
        }
    }

    pub fn interest(&self) -> Option<&Interest> {
        match &self.l3 {
            L3::Interest(interest) => Some(interest),
            L3::Data(_) => None,
        }
    }

    pub fn data(&self) -> Option<&Data> {
        match &self.l3 {
            L3::Data(data) => Some(data),
            L3::Interest(_) => None,
        }
    }

    pub fn is_interest(&self) -> bool {
        matches!(self.l3, L3::Interest(_))
    }
}

/// A packet queued for transmission on a face.
#[derive(Debug, Clone)]
pub struct OutPkt {
    pub pkt: Pkt,
    /// Token to attach to the outgoing LP frame, if any.
    pub pit_token: Option<Vec<u8>>,
    /// Face the packet arrived on, for incoming face indication.
    pub in_face: u64,
}
