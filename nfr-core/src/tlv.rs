use std::io::{self, Write};

/// TLV (Type-Length-Value) codec for NDN wire encoding.
///
/// Wire format (per the NDN packet format spec):
/// - Type: variable-size number (1, 3, 5, or 9 bytes)
/// - Length: variable-size number (1, 3, 5, or 9 bytes)
/// - Value: `Length` bytes of data
///
/// Variable-size numbers below 253 occupy a single byte; larger values
/// use a marker byte (0xFD/0xFE/0xFF) followed by 2, 4, or 8 big-endian
/// bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlvElement {
    pub typ: u64,
    pub value: Vec<u8>,
}

/// Errors that can occur during TLV encoding/decoding
#[derive(Debug, thiserror::Error)]
pub enum TlvError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid number encoding")]
    InvalidNumber,
    #[error("Buffer too short")]
    BufferTooShort,
    #[error("Unexpected TLV type: {0}")]
    UnexpectedType(u64),
    #[error("Invalid value length {actual} for type {typ}")]
    InvalidValueLength { typ: u64, actual: usize },
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
}

impl TlvElement {
    pub fn new(typ: u64, value: Vec<u8>) -> Self {
        Self { typ, value }
    }

    /// Total encoded length of this element.
    pub fn encoded_length(&self) -> usize {
        varnum_size(self.typ) + varnum_size(self.value.len() as u64) + self.value.len()
    }

    /// Encode this element to a fresh buffer.
    pub fn encode(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(self.encoded_length());
        // Writing to a Vec cannot fail
        self.encode_to(&mut buffer).unwrap();
        buffer
    }

    /// Encode this element to a writer.
    pub fn encode_to<W: Write>(&self, writer: &mut W) -> Result<(), TlvError> {
        write_varnum(self.typ, writer)?;
        write_varnum(self.value.len() as u64, writer)?;
        writer.write_all(&self.value)?;
        Ok(())
    }

    /// Decode one element from the front of `data`, returning the element
    /// and the number of bytes consumed.
    pub fn decode(data: &[u8]) -> Result<(Self, usize), TlvError> {
        let (typ, typ_len) = read_varnum(data)?;
        let (length, len_len) = read_varnum(&data[typ_len..])?;
        let offset = typ_len + len_len;
        let length = length as usize;

        if data.len() < offset + length {
            return Err(TlvError::BufferTooShort);
        }

        let value = data[offset..offset + length].to_vec();
        Ok((TlvElement::new(typ, value), offset + length))
    }

    /// Interpret the value as a big-endian non-negative integer.
    pub fn as_nonneg_integer(&self) -> Result<u64, TlvError> {
        match self.value.len() {
            1 => Ok(self.value[0] as u64),
            2 => Ok(u16::from_be_bytes(self.value[..2].try_into().unwrap()) as u64),
            4 => Ok(u32::from_be_bytes(self.value[..4].try_into().unwrap()) as u64),
            8 => Ok(u64::from_be_bytes(self.value[..8].try_into().unwrap())),
            n => Err(TlvError::InvalidValueLength { typ: self.typ, actual: n }),
        }
    }

    /// Create an element holding a big-endian non-negative integer using
    /// the shortest of the 1/2/4/8-byte encodings.
    pub fn from_nonneg_integer(typ: u64, n: u64) -> Self {
        let value = if n <= u8::MAX as u64 {
            vec![n as u8]
        } else if n <= u16::MAX as u64 {
            (n as u16).to_be_bytes().to_vec()
        } else if n <= u32::MAX as u64 {
            (n as u32).to_be_bytes().to_vec()
        } else {
            n.to_be_bytes().to_vec()
        };
        Self { typ, value }
    }
}

/// Number of bytes needed to encode `n` as a variable-size number.
pub fn varnum_size(n: u64) -> usize {
    if n < 253 {
        1
    } else if n <= u16::MAX as u64 {
        3
    } else if n <= u32::MAX as u64 {
        5
    } else {
        9
    }
}

/// Write a variable-size number.
pub fn write_varnum<W: Write>(n: u64, writer: &mut W) -> Result<(), TlvError> {
    if n < 253 {
        writer.write_all(&[n as u8])?;
    } else if n <= u16::MAX as u64 {
        writer.write_all(&[0xFD])?;
        writer.write_all(&(n as u16).to_be_bytes())?;
    } else if n <= u32::MAX as u64 {
        writer.write_all(&[0xFE])?;
        writer.write_all(&(n as u32).to_be_bytes())?;
    } else {
        writer.write_all(&[0xFF])?;
        writer.write_all(&n.to_be_bytes())?;
    }
    Ok(())
}

/// Read a variable-size number from the front of `data`, returning the
/// value and the number of bytes consumed.
pub fn read_varnum(data: &[u8]) -> Result<(u64, usize), TlvError> {
    let first = *data.first().ok_or(TlvError::BufferTooShort)?;
    match first {
        0..=252 => Ok((first as u64, 1)),
        0xFD => {
            if data.len() < 3 {
                return Err(TlvError::BufferTooShort);
            }
            Ok((u16::from_be_bytes(data[1..3].try_into().unwrap()) as u64, 3))
        }
        0xFE => {
            if data.len() < 5 {
                return Err(TlvError::BufferTooShort);
            }
            Ok((u32::from_be_bytes(data[1..5].try_into().unwrap()) as u64, 5))
        }
        0xFF => {
            if data.len() < 9 {
                return Err(TlvError::BufferTooShort);
            }
            Ok((u64::from_be_bytes(data[1..9].try_into().unwrap()), 9))
        }
    }
}

/// Encode multiple TLV elements into a single buffer.
pub fn encode_sequence(elements: &[TlvElement]) -> Vec<u8> {
    let total: usize = elements.iter().map(|e| e.encoded_length()).sum();
    let mut buffer = Vec::with_capacity(total);
    for element in elements {
        buffer.extend_from_slice(&element.encode());
    }
    buffer
}

/// Decode all TLV elements from a buffer.
pub fn decode_sequence(data: &[u8]) -> Result<Vec<TlvElement>, TlvError> {
    let mut elements = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        let (element, consumed) = TlvElement::decode(&data[offset..])?;
        elements.push(element);
        offset += consumed;
    }
    Ok(elements)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_encoding() {
        let element = TlvElement::new(1, vec![0x01, 0x02, 0x03]);
        assert_eq!(element.encode(), vec![1, 3, 0x01, 0x02, 0x03]);
    }

    #[test]
    fn test_basic_decoding() {
        let data = vec![1, 3, 0x01, 0x02, 0x03];
        let (element, consumed) = TlvElement::decode(&data).unwrap();
        assert_eq!(element.typ, 1);
        assert_eq!(element.value, vec![0x01, 0x02, 0x03]);
        assert_eq!(consumed, 5);
    }

    #[test]
    fn test_wide_type() {
        // NDNLPv2 CongestionMark uses a 2-byte type code
        let element = TlvElement::new(0x0340, vec![1]);
        let encoded = element.encode();
        assert_eq!(encoded, vec![0xFD, 0x03, 0x40, 1, 1]);

        let (decoded, consumed) = TlvElement::decode(&encoded).unwrap();
        assert_eq!(decoded, element);
        assert_eq!(consumed, encoded.len());
    }

    #[test]
    fn test_long_value() {
        let value = vec![0xAA; 300];
        let element = TlvElement::new(0x50, value.clone());
        let encoded = element.encode();

        assert_eq!(encoded[0], 0x50);
        assert_eq!(encoded[1], 0xFD);
        assert_eq!(u16::from_be_bytes([encoded[2], encoded[3]]), 300);
        assert_eq!(&encoded[4..], &value[..]);

        let (decoded, _) = TlvElement::decode(&encoded).unwrap();
        assert_eq!(decoded, element);
    }

    #[test]
    fn test_truncated_value() {
        let data = vec![1, 5, 0x01, 0x02];
        assert!(matches!(
            TlvElement::decode(&data),
            Err(TlvError::BufferTooShort)
        ));
    }

    #[test]
    fn test_nonneg_integer_round_trip() {
        for n in [0u64, 1, 255, 256, 65535, 65536, u32::MAX as u64, u64::MAX] {
            let element = TlvElement::from_nonneg_integer(0x0C, n);
            assert_eq!(element.as_nonneg_integer().unwrap(), n);
        }
    }

    #[test]
    fn test_sequence_round_trip() {
        let elements = vec![
            TlvElement::new(1, vec![0x01]),
            TlvElement::new(0x0330, vec![0x02, 0x03]),
            TlvElement::new(3, vec![]),
        ];
        let encoded = encode_sequence(&elements);
        let decoded = decode_sequence(&encoded).unwrap();
        assert_eq!(decoded, elements);
    }

    #[test]
    fn test_varnum_boundaries() {
        for (n, expected) in [
            (0u64, vec![0u8]),
            (252, vec![252]),
            (253, vec![0xFD, 0, 253]),
            (65535, vec![0xFD, 0xFF, 0xFF]),
            (65536, vec![0xFE, 0, 1, 0, 0]),
        ] {
            let mut buf = Vec::new();
            write_varnum(n, &mut buf).unwrap();
            assert_eq!(buf, expected);
            assert_eq!(read_varnum(&buf).unwrap(), (n, expected.len()));
        }
    }
}
