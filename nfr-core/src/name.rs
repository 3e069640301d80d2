use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::tlv::{self, TlvElement, TlvError};

/// TLV type of a Name element.
pub const TLV_NAME: u64 = 0x07;
/// TLV type of a GenericNameComponent.
pub const TLV_GENERIC_COMPONENT: u64 = 0x08;

/// Errors from parsing a name URI.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NameParseError {
    #[error("Invalid percent-encoding in component: {0}")]
    InvalidPercentEncoding(String),
    #[error("Invalid component type number: {0}")]
    InvalidComponentType(String),
}

/// One opaque binary name component with its TLV type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NameComponent {
    pub typ: u64,
    pub value: Vec<u8>,
}

impl NameComponent {
    pub fn new(value: Vec<u8>) -> Self {
        Self { typ: TLV_GENERIC_COMPONENT, value }
    }

    pub fn with_type(typ: u64, value: Vec<u8>) -> Self {
        Self { typ, value }
    }

    pub fn from_str_component(s: &str) -> Result<Self, NameParseError> {
        // Optional "<number>=" prefix selects a non-generic component type
        let (typ, rest) = match s.split_once('=') {
            Some((t, rest)) if t.chars().all(|c| c.is_ascii_digit()) && !t.is_empty() => {
                let typ = t
                    .parse::<u64>()
                    .map_err(|_| NameParseError::InvalidComponentType(s.to_string()))?;
                (typ, rest)
            }
            _ => (TLV_GENERIC_COMPONENT, s),
        };

        let mut value = Vec::with_capacity(rest.len());
        let bytes = rest.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'%' {
                if i + 2 >= bytes.len() {
                    return Err(NameParseError::InvalidPercentEncoding(s.to_string()));
                }
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3])
                    .ok()
                    .and_then(|h| u8::from_str_radix(h, 16).ok())
                    .ok_or_else(|| NameParseError::InvalidPercentEncoding(s.to_string()))?;
                value.push(hex);
                i += 3;
            } else {
                value.push(bytes[i]);
                i += 1;
            }
        }

        Ok(Self { typ, value })
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// Deterministic 64-bit hash of this component, stable across runs.
    pub fn hash_value(&self) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.typ.hash(&mut hasher);
        self.value.hash(&mut hasher);
        hasher.finish()
    }
}

impl Hash for NameComponent {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.typ.hash(state);
        self.value.hash(state);
    }
}

impl fmt::Display for NameComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.typ != TLV_GENERIC_COMPONENT {
            write!(f, "{}=", self.typ)?;
        }
        for &b in &self.value {
            if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~') {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "%{:02X}", b)?;
            }
        }
        Ok(())
    }
}

/// A hierarchical NDN name: an ordered sequence of opaque components.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Name {
    pub components: Vec<NameComponent>,
}

impl Name {
    pub fn new() -> Self {
        Self { components: Vec::new() }
    }

    /// Parse a name from URI form, e.g. `/a/b/%00%01`.
    pub fn from_str(uri: &str) -> Result<Self, NameParseError> {
        let mut components = Vec::new();
        let trimmed = uri.strip_prefix('/').unwrap_or(uri);
        for part in trimmed.split('/') {
            if !part.is_empty() {
                components.push(NameComponent::from_str_component(part)?);
            }
        }
        Ok(Self { components })
    }

    pub fn push(&mut self, component: NameComponent) {
        self.components.push(component);
    }

    /// Return a new name with `component` appended.
    pub fn appended(&self, component: NameComponent) -> Name {
        let mut name = self.clone();
        name.push(component);
        name
    }

    pub fn get(&self, index: usize) -> Option<&NameComponent> {
        self.components.get(index)
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn is_prefix_of(&self, other: &Name) -> bool {
        self.len() <= other.len()
            && self
                .components
                .iter()
                .zip(other.components.iter())
                .all(|(a, b)| a == b)
    }

    pub fn get_prefix(&self, length: usize) -> Name {
        let end = length.min(self.components.len());
        Name { components: self.components[..end].to_vec() }
    }

    /// Deterministic 64-bit hash of the whole name.
    pub fn hash_value(&self) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        for component in &self.components {
            component.typ.hash(&mut hasher);
            component.value.hash(&mut hasher);
        }
        hasher.finish()
    }

    /// Hashes of every prefix of this name. Index `i` holds the hash of
    /// the first `i` components; index 0 is the hash of the empty name.
    /// Used for thread sharding and the hashtable FIB backend.
    pub fn prefix_hashes(&self) -> Vec<u64> {
        let mut hashes = Vec::with_capacity(self.components.len() + 1);
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        hashes.push(hasher.finish());
        for component in &self.components {
            component.typ.hash(&mut hasher);
            component.value.hash(&mut hasher);
            hashes.push(hasher.finish());
        }
        hashes
    }

    /// Encode to a TLV Name element.
    pub fn encode(&self) -> Vec<u8> {
        let mut inner = Vec::new();
        for component in &self.components {
            inner.extend_from_slice(&TlvElement::new(component.typ, component.value.clone()).encode());
        }
        TlvElement::new(TLV_NAME, inner).encode()
    }

    /// Decode from a TLV Name element, returning the name and the number
    /// of bytes consumed.
    pub fn decode(data: &[u8]) -> Result<(Self, usize), TlvError> {
        let (element, consumed) = TlvElement::decode(data)?;
        if element.typ != TLV_NAME {
            return Err(TlvError::UnexpectedType(element.typ));
        }
        Ok((Self::from_tlv_value(&element.value)?, consumed))
    }

    /// Decode the inner component list of an already-unwrapped Name element.
    pub fn from_tlv_value(value: &[u8]) -> Result<Self, TlvError> {
        let mut name = Name::new();
        for element in tlv::decode_sequence(value)? {
            name.push(NameComponent::with_type(element.typ, element.value));
        }
        Ok(name)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.components.is_empty() {
            return write!(f, "/");
        }
        for component in &self.components {
            write!(f, "/{}", component)?;
        }
        Ok(())
    }
}
