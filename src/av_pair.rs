//! Attribute-value pairs carrying target information.
//!
//! The server lists information about itself and the authentication context as a sequence of AV
//! pairs in its Challenge message; an NTLMv2 client replays (and extends) that sequence inside its
//! response. Textual values are always UTF-16, even if the messages themselves use OEM encoding.


use bitflags::bitflags;

use crate::error::{ParsingError, StoringError};
use crate::oem::{decode_utf16le, encode_utf16le};


/// The identifier of an AV pair.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum AvId {
    EndOfList,
    NbComputerName,
    NbDomainName,
    DnsComputerName,
    DnsDomainName,
    DnsTreeName,
    Flags,
    Timestamp,
    SingleHost,
    TargetName,
    ChannelBindings,
    Unknown(u16),
}
impl From<AvId> for u16 {
    fn from(id: AvId) -> Self {
        match id {
            AvId::EndOfList => 0x0000,
            AvId::NbComputerName => 0x0001,
            AvId::NbDomainName => 0x0002,
            AvId::DnsComputerName => 0x0003,
            AvId::DnsDomainName => 0x0004,
            AvId::DnsTreeName => 0x0005,
            AvId::Flags => 0x0006,
            AvId::Timestamp => 0x0007,
            AvId::SingleHost => 0x0008,
            AvId::TargetName => 0x0009,
            AvId::ChannelBindings => 0x000A,
            AvId::Unknown(w) => w,
        }
    }
}
impl From<u16> for AvId {
    fn from(w: u16) -> Self {
        match w {
            0x0000 => AvId::EndOfList,
            0x0001 => AvId::NbComputerName,
            0x0002 => AvId::NbDomainName,
            0x0003 => AvId::DnsComputerName,
            0x0004 => AvId::DnsDomainName,
            0x0005 => AvId::DnsTreeName,
            0x0006 => AvId::Flags,
            0x0007 => AvId::Timestamp,
            0x0008 => AvId::SingleHost,
            0x0009 => AvId::TargetName,
            0x000A => AvId::ChannelBindings,
            other => AvId::Unknown(other),
        }
    }
}

bitflags! {
    /// The value of an [`AvId::Flags`] pair.
    #[derive(Clone, Copy, Debug, Default, Hash, Eq, Ord, PartialEq, PartialOrd)]
    pub struct AvFlags: u32 {
        const CONSTRAINED_AUTHENTICATION = 0x0000_0001;
        const MIC_PRESENT = 0x0000_0002;
        const UNTRUSTED_SPN_SOURCE = 0x0000_0004;
    }
}

/// A single AV pair.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct AvPair {
    pub id: AvId,
    pub value: Vec<u8>,
}
impl AvPair {
    /// Creates an AV pair from an identifier and a string.
    pub fn from_string(id: AvId, string: &str) -> Self {
        Self {
            id,
            value: encode_utf16le(string),
        }
    }

    /// Attempts to interpret the value of this pair as a string.
    pub fn value_string(&self) -> Result<String, ParsingError> {
        decode_utf16le(&self.value)
    }

    /// Creates an [`AvId::Flags`] pair.
    pub fn from_flags(flags: AvFlags) -> Self {
        Self {
            id: AvId::Flags,
            value: Vec::from(flags.bits().to_le_bytes()),
        }
    }

    /// Interprets the value of this pair as [`AvFlags`], if it has the correct length.
    pub fn as_flags(&self) -> Option<AvFlags> {
        let bytes: [u8; 4] = self.value.as_slice().try_into().ok()?;
        Some(AvFlags::from_bits_retain(u32::from_le_bytes(bytes)))
    }

    /// Interprets the value of this pair as a FILETIME timestamp, if it has the correct length.
    pub fn as_timestamp(&self) -> Option<u64> {
        let bytes: [u8; 8] = self.value.as_slice().try_into().ok()?;
        Some(u64::from_le_bytes(bytes))
    }

    /// Serializes this pair, appending it to `buf`.
    fn write_to(&self, buf: &mut Vec<u8>) -> Result<(), StoringError> {
        let length: u16 = self.value.len().try_into()
            .map_err(|_| StoringError::FieldTooLong { field: "AV pair value", length: self.value.len() })?;
        buf.extend_from_slice(&u16::from(self.id).to_le_bytes());
        buf.extend_from_slice(&length.to_le_bytes());
        buf.extend_from_slice(&self.value);
        Ok(())
    }

    /// Attempts to deserialize an AV pair from the given byte slice. If successful, returns the
    /// pair as well as the bytes following it.
    fn try_from_bytes(bytes: &[u8]) -> Result<(Self, &[u8]), ParsingError> {
        if bytes.len() < 4 {
            return Err(ParsingError::UnterminatedAvPairs);
        }

        let id = AvId::from(u16::from_le_bytes([bytes[0], bytes[1]]));
        let length = usize::from(u16::from_le_bytes([bytes[2], bytes[3]]));
        if 4 + length > bytes.len() {
            return Err(ParsingError::UnterminatedAvPairs);
        }

        let pair = Self {
            id,
            value: Vec::from(&bytes[4..4+length]),
        };
        Ok((pair, &bytes[4+length..]))
    }
}


/// Encodes a sequence of AV pairs, in order, followed by the end-of-list marker.
///
/// End-of-list entries within `pairs` are skipped; exactly one terminator is always written.
pub fn encode_av_pairs(pairs: &[AvPair]) -> Result<Vec<u8>, StoringError> {
    let mut buf = Vec::new();
    for pair in pairs.iter().filter(|p| p.id != AvId::EndOfList) {
        pair.write_to(&mut buf)?;
    }
    buf.extend_from_slice(&[0, 0, 0, 0]);
    Ok(buf)
}

/// Decodes a sequence of AV pairs up to (and excluding) the end-of-list marker.
///
/// Bytes following the marker are ignored. Duplicate identifiers are kept in their original order.
pub fn decode_av_pairs(mut bytes: &[u8]) -> Result<Vec<AvPair>, ParsingError> {
    let mut pairs = Vec::new();
    loop {
        let (pair, rest) = AvPair::try_from_bytes(bytes)?;
        if pair.id == AvId::EndOfList {
            return Ok(pairs);
        }
        pairs.push(pair);
        bytes = rest;
    }
}

/// Returns the first pair with the given identifier.
pub fn find_av_pair(pairs: &[AvPair], id: AvId) -> Option<&AvPair> {
    pairs.iter().find(|p| p.id == id)
}
