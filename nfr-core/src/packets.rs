use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::name::Name;
use crate::tlv::{self, TlvElement, TlvError};

/// TLV type constants for NDN packets and the NDNLPv2 link protocol.
pub mod tlv_types {
    pub const INTEREST: u64 = 0x05;
    pub const DATA: u64 = 0x06;
    pub const NAME: u64 = 0x07;
    pub const CAN_BE_PREFIX: u64 = 0x21;
    pub const MUST_BE_FRESH: u64 = 0x12;
    pub const FORWARDING_HINT: u64 = 0x1E;
    pub const NONCE: u64 = 0x0A;
    pub const INTEREST_LIFETIME: u64 = 0x0C;
    pub const HOP_LIMIT: u64 = 0x22;

    pub const META_INFO: u64 = 0x14;
    pub const CONTENT_TYPE: u64 = 0x18;
    pub const FRESHNESS_PERIOD: u64 = 0x19;
    pub const FINAL_BLOCK_ID: u64 = 0x1A;
    pub const CONTENT: u64 = 0x15;
    pub const SIGNATURE_INFO: u64 = 0x16;
    pub const SIGNATURE_VALUE: u64 = 0x17;

    pub const LP_PACKET: u64 = 0x64;
    pub const LP_FRAGMENT: u64 = 0x50;
    pub const LP_SEQUENCE: u64 = 0x51;
    pub const LP_FRAG_INDEX: u64 = 0x52;
    pub const LP_FRAG_COUNT: u64 = 0x53;
    pub const LP_PIT_TOKEN: u64 = 0x62;
    pub const LP_NACK: u64 = 0x0320;
    pub const LP_NACK_REASON: u64 = 0x0321;
    pub const LP_INCOMING_FACE_ID: u64 = 0x032C;
    pub const LP_NEXT_HOP_FACE_ID: u64 = 0x0330;
    pub const LP_CACHE_POLICY: u64 = 0x0334;
    pub const LP_CACHE_POLICY_TYPE: u64 = 0x0335;
    pub const LP_CONGESTION_MARK: u64 = 0x0340;
}

/// Interest packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interest {
    pub name: Name,
    pub can_be_prefix: bool,
    pub must_be_fresh: bool,
    pub forwarding_hint: Vec<Name>,
    pub nonce: Option<u32>,
    pub lifetime: Option<Duration>,
    pub hop_limit: Option<u8>,
}

impl Interest {
    pub fn new(name: Name) -> Self {
        Self {
            name,
            can_be_prefix: false,
            must_be_fresh: false,
            forwarding_hint: Vec::new(),
            nonce: None,
            lifetime: None,
            hop_limit: None,
        }
    }

    pub fn with_nonce(mut self, nonce: u32) -> Self {
        self.nonce = Some(nonce);
        self
    }

    pub fn with_can_be_prefix(mut self, can_be_prefix: bool) -> Self {
        self.can_be_prefix = can_be_prefix;
        self
    }

    pub fn with_must_be_fresh(mut self, must_be_fresh: bool) -> Self {
        self.must_be_fresh = must_be_fresh;
        self
    }

    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = Some(lifetime);
        self
    }

    pub fn with_hop_limit(mut self, hop_limit: u8) -> Self {
        self.hop_limit = Some(hop_limit);
        self
    }

    pub fn with_forwarding_hint(mut self, hint: Vec<Name>) -> Self {
        self.forwarding_hint = hint;
        self
    }

    /// Encode to wire format.
    pub fn encode(&self) -> Vec<u8> {
        let mut elements = Vec::new();
        elements.push(TlvElement::new(
            tlv_types::NAME,
            name_tlv_value(&self.name),
        ));
        if self.can_be_prefix {
            elements.push(TlvElement::new(tlv_types::CAN_BE_PREFIX, vec![]));
        }
        if self.must_be_fresh {
            elements.push(TlvElement::new(tlv_types::MUST_BE_FRESH, vec![]));
        }
        if !self.forwarding_hint.is_empty() {
            let mut inner = Vec::new();
            for name in &self.forwarding_hint {
                inner.extend_from_slice(&name.encode());
            }
            elements.push(TlvElement::new(tlv_types::FORWARDING_HINT, inner));
        }
        if let Some(nonce) = self.nonce {
            elements.push(TlvElement::new(
                tlv_types::NONCE,
                nonce.to_be_bytes().to_vec(),
            ));
        }
        if let Some(lifetime) = self.lifetime {
            elements.push(TlvElement::from_nonneg_integer(
                tlv_types::INTEREST_LIFETIME,
                lifetime.as_millis() as u64,
            ));
        }
        if let Some(hop_limit) = self.hop_limit {
            elements.push(TlvElement::new(tlv_types::HOP_LIMIT, vec![hop_limit]));
        }

        TlvElement::new(tlv_types::INTEREST, tlv::encode_sequence(&elements)).encode()
    }

    /// Decode from the inner value of an Interest TLV element.
    fn decode_value(value: &[u8]) -> Result<Self, TlvError> {
        let mut name = None;
        let mut can_be_prefix = false;
        let mut must_be_fresh = false;
        let mut forwarding_hint = Vec::new();
        let mut nonce = None;
        let mut lifetime = None;
        let mut hop_limit = None;

        for element in tlv::decode_sequence(value)? {
            match element.typ {
                tlv_types::NAME => name = Some(Name::from_tlv_value(&element.value)?),
                tlv_types::CAN_BE_PREFIX => can_be_prefix = true,
                tlv_types::MUST_BE_FRESH => must_be_fresh = true,
                tlv_types::FORWARDING_HINT => {
                    let mut offset = 0;
                    while offset < element.value.len() {
                        let (hint, consumed) = Name::decode(&element.value[offset..])?;
                        forwarding_hint.push(hint);
                        offset += consumed;
                    }
                }
                tlv_types::NONCE => {
                    if element.value.len() != 4 {
                        return Err(TlvError::InvalidValueLength {
                            typ: element.typ,
                            actual: element.value.len(),
                        });
                    }
                    nonce = Some(u32::from_be_bytes(element.value[..4].try_into().unwrap()));
                }
                tlv_types::INTEREST_LIFETIME => {
                    lifetime = Some(Duration::from_millis(element.as_nonneg_integer()?));
                }
                tlv_types::HOP_LIMIT => {
                    if element.value.len() != 1 {
                        return Err(TlvError::InvalidValueLength {
                            typ: element.typ,
                            actual: element.value.len(),
                        });
                    }
                    hop_limit = Some(element.value[0]);
                }
                // Unrecognized fields (signature placeholders, app params)
                // are tolerated and skipped
                _ => {}
            }
        }

        Ok(Self {
            name: name.ok_or(TlvError::MissingField("Name"))?,
            can_be_prefix,
            must_be_fresh,
            forwarding_hint,
            nonce,
            lifetime,
            hop_limit,
        })
    }
}

/// MetaInfo of a Data packet.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MetaInfo {
    pub content_type: Option<u64>,
    pub freshness_period: Option<Duration>,
}

/// Data packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Data {
    pub name: Name,
    pub meta_info: Option<MetaInfo>,
    pub content: Vec<u8>,
}

impl Data {
    pub fn new(name: Name, content: Vec<u8>) -> Self {
        Self { name, meta_info: None, content }
    }

    pub fn with_freshness_period(mut self, freshness: Duration) -> Self {
        self.meta_info.get_or_insert_with(Default::default).freshness_period = Some(freshness);
        self
    }

    pub fn with_content_type(mut self, content_type: u64) -> Self {
        self.meta_info.get_or_insert_with(Default::default).content_type = Some(content_type);
        self
    }

    /// Encode to wire format.
    pub fn encode(&self) -> Vec<u8> {
        let mut elements = Vec::new();
        elements.push(TlvElement::new(
            tlv_types::NAME,
            name_tlv_value(&self.name),
        ));
        if let Some(meta_info) = &self.meta_info {
            let mut inner = Vec::new();
            if let Some(content_type) = meta_info.content_type {
                inner.extend_from_slice(
                    &TlvElement::from_nonneg_integer(tlv_types::CONTENT_TYPE, content_type)
                        .encode(),
                );
            }
            if let Some(freshness) = meta_info.freshness_period {
                inner.extend_from_slice(
                    &TlvElement::from_nonneg_integer(
                        tlv_types::FRESHNESS_PERIOD,
                        freshness.as_millis() as u64,
                    )
                    .encode(),
                );
            }
            elements.push(TlvElement::new(tlv_types::META_INFO, inner));
        }
        elements.push(TlvElement::new(tlv_types::CONTENT, self.content.clone()));

        TlvElement::new(tlv_types::DATA, tlv::encode_sequence(&elements)).encode()
    }

    fn decode_value(value: &[u8]) -> Result<Self, TlvError> {
        let mut name = None;
        let mut meta_info = None;
        let mut content = Vec::new();

        for element in tlv::decode_sequence(value)? {
            match element.typ {
                tlv_types::NAME => name = Some(Name::from_tlv_value(&element.value)?),
                tlv_types::META_INFO => {
                    let mut info = MetaInfo::default();
                    for inner in tlv::decode_sequence(&element.value)? {
                        match inner.typ {
                            tlv_types::CONTENT_TYPE => {
                                info.content_type = Some(inner.as_nonneg_integer()?);
                            }
                            tlv_types::FRESHNESS_PERIOD => {
                                info.freshness_period =
                                    Some(Duration::from_millis(inner.as_nonneg_integer()?));
                            }
                            _ => {}
                        }
                    }
                    meta_info = Some(info);
                }
                tlv_types::CONTENT => content = element.value,
                _ => {}
            }
        }

        Ok(Self {
            name: name.ok_or(TlvError::MissingField("Name"))?,
            meta_info,
            content,
        })
    }

    /// Freshness period, if the producer declared one.
    pub fn freshness_period(&self) -> Option<Duration> {
        self.meta_info.as_ref().and_then(|m| m.freshness_period)
    }
}

/// NDNLPv2 link protocol packet. All fields are optional; a frame with
/// no fragment is an IDLE frame.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LpPacket {
    pub sequence: Option<u64>,
    pub frag_index: Option<u64>,
    pub frag_count: Option<u64>,
    pub pit_token: Option<Vec<u8>>,
    pub nack_reason: Option<u64>,
    pub incoming_face_id: Option<u64>,
    pub next_hop_face_id: Option<u64>,
    pub cache_policy_type: Option<u64>,
    pub congestion_mark: Option<u64>,
    pub fragment: Vec<u8>,
}

impl LpPacket {
    /// Encode to wire format.
    pub fn encode(&self) -> Vec<u8> {
        let mut elements = Vec::new();
        if let Some(sequence) = self.sequence {
            elements.push(TlvElement::new(
                tlv_types::LP_SEQUENCE,
                sequence.to_be_bytes().to_vec(),
            ));
        }
        if let Some(frag_index) = self.frag_index {
            elements.push(TlvElement::from_nonneg_integer(
                tlv_types::LP_FRAG_INDEX,
                frag_index,
            ));
        }
        if let Some(frag_count) = self.frag_count {
            elements.push(TlvElement::from_nonneg_integer(
                tlv_types::LP_FRAG_COUNT,
                frag_count,
            ));
        }
        if let Some(pit_token) = &self.pit_token {
            elements.push(TlvElement::new(tlv_types::LP_PIT_TOKEN, pit_token.clone()));
        }
        if let Some(reason) = self.nack_reason {
            let inner = TlvElement::from_nonneg_integer(tlv_types::LP_NACK_REASON, reason);
            elements.push(TlvElement::new(tlv_types::LP_NACK, inner.encode()));
        }
        if let Some(face_id) = self.incoming_face_id {
            elements.push(TlvElement::from_nonneg_integer(
                tlv_types::LP_INCOMING_FACE_ID,
                face_id,
            ));
        }
        if let Some(face_id) = self.next_hop_face_id {
            elements.push(TlvElement::from_nonneg_integer(
                tlv_types::LP_NEXT_HOP_FACE_ID,
                face_id,
            ));
        }
        if let Some(policy) = self.cache_policy_type {
            let inner = TlvElement::from_nonneg_integer(tlv_types::LP_CACHE_POLICY_TYPE, policy);
            elements.push(TlvElement::new(tlv_types::LP_CACHE_POLICY, inner.encode()));
        }
        if let Some(mark) = self.congestion_mark {
            elements.push(TlvElement::from_nonneg_integer(
                tlv_types::LP_CONGESTION_MARK,
                mark,
            ));
        }
        if !self.fragment.is_empty() {
            elements.push(TlvElement::new(
                tlv_types::LP_FRAGMENT,
                self.fragment.clone(),
            ));
        }

        TlvElement::new(tlv_types::LP_PACKET, tlv::encode_sequence(&elements)).encode()
    }

    fn decode_value(value: &[u8]) -> Result<Self, TlvError> {
        let mut lp = LpPacket::default();

        for element in tlv::decode_sequence(value)? {
            match element.typ {
                tlv_types::LP_SEQUENCE => {
                    if element.value.len() != 8 {
                        return Err(TlvError::InvalidValueLength {
                            typ: element.typ,
                            actual: element.value.len(),
                        });
                    }
                    lp.sequence =
                        Some(u64::from_be_bytes(element.value[..8].try_into().unwrap()));
                }
                tlv_types::LP_FRAG_INDEX => lp.frag_index = Some(element.as_nonneg_integer()?),
                tlv_types::LP_FRAG_COUNT => lp.frag_count = Some(element.as_nonneg_integer()?),
                tlv_types::LP_PIT_TOKEN => lp.pit_token = Some(element.value),
                tlv_types::LP_NACK => {
                    for inner in tlv::decode_sequence(&element.value)? {
                        if inner.typ == tlv_types::LP_NACK_REASON {
                            lp.nack_reason = Some(inner.as_nonneg_integer()?);
                        }
                    }
                }
                tlv_types::LP_INCOMING_FACE_ID => {
                    lp.incoming_face_id = Some(element.as_nonneg_integer()?)
                }
                tlv_types::LP_NEXT_HOP_FACE_ID => {
                    lp.next_hop_face_id = Some(element.as_nonneg_integer()?)
                }
                tlv_types::LP_CACHE_POLICY => {
                    for inner in tlv::decode_sequence(&element.value)? {
                        if inner.typ == tlv_types::LP_CACHE_POLICY_TYPE {
                            lp.cache_policy_type = Some(inner.as_nonneg_integer()?);
                        }
                    }
                }
                tlv_types::LP_CONGESTION_MARK => {
                    lp.congestion_mark = Some(element.as_nonneg_integer()?)
                }
                tlv_types::LP_FRAGMENT => lp.fragment = element.value,
                _ => {}
            }
        }

        Ok(lp)
    }
}

/// A decoded top-level NDN packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Interest(Interest),
    Data(Data),
    Lp(Box<LpPacket>),
}

impl Packet {
    /// Decode a packet from the front of `data`, returning the packet and
    /// the number of bytes consumed.
    pub fn decode(data: &[u8]) -> Result<(Self, usize), TlvError> {
        let (element, consumed) = TlvElement::decode(data)?;
        let packet = match element.typ {
            tlv_types::INTEREST => Packet::Interest(Interest::decode_value(&element.value)?),
            tlv_types::DATA => Packet::Data(Data::decode_value(&element.value)?),
            tlv_types::LP_PACKET => Packet::Lp(Box::new(LpPacket::decode_value(&element.value)?)),
            typ => return Err(TlvError::UnexpectedType(typ)),
        };
        Ok((packet, consumed))
    }
}

fn name_tlv_value(name: &Name) -> Vec<u8> {
    let mut inner = Vec::new();
    for component in &name.components {
        inner.extend_from_slice(&TlvElement::new(component.typ, component.value.clone()).encode());
    }
    inner
}
