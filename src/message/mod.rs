//! The three NTLM messages and their shared building blocks.
//!
//! Every variable-length field is referenced from the fixed header by a security buffer, a
//! (length, capacity, offset) triple whose offset is counted from the start of the message.


mod authenticate;
mod challenge;
mod negotiate;


pub use crate::message::authenticate::{AuthenticateMessage, MIC_LEN};
pub use crate::message::challenge::ChallengeMessage;
pub use crate::message::negotiate::NegotiateMessage;

use tracing::trace;

use crate::Flags;
use crate::error::{ParsingError, StoringError};
use crate::oem::{decode_oem, decode_utf16le, encode_oem, encode_utf16le};


/// The magic value at the start of every NTLMSSP data packet.
pub const NTLMSSP_MAGIC: [u8; 8] = *b"NTLMSSP\0";

pub(crate) const NEGOTIATE_MESSAGE_TYPE: u32 = 0x0000_0001;
pub(crate) const CHALLENGE_MESSAGE_TYPE: u32 = 0x0000_0002;
pub(crate) const AUTHENTICATE_MESSAGE_TYPE: u32 = 0x0000_0003;


/// An NTLM message.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Message {
    Negotiate(NegotiateMessage),
    Challenge(ChallengeMessage),
    Authenticate(AuthenticateMessage),
    Other(u32, Vec<u8>),
}
impl Message {
    /// Returns the 32-bit message number identifying the type of this message.
    pub fn message_number(&self) -> u32 {
        match self {
            Self::Negotiate(_) => NEGOTIATE_MESSAGE_TYPE,
            Self::Challenge(_) => CHALLENGE_MESSAGE_TYPE,
            Self::Authenticate(_) => AUTHENTICATE_MESSAGE_TYPE,
            Self::Other(t, _data) => *t,
        }
    }

    /// Serializes the NTLM message into bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, StoringError> {
        match self {
            Self::Negotiate(m) => m.to_bytes(),
            Self::Challenge(m) => m.to_bytes(),
            Self::Authenticate(m) => m.to_bytes(),
            Self::Other(msg_num, data) => {
                let mut buf = Vec::with_capacity(12 + data.len());
                buf.extend_from_slice(&NTLMSSP_MAGIC);
                buf.extend_from_slice(&msg_num.to_le_bytes());
                buf.extend_from_slice(data);
                Ok(buf)
            },
        }
    }
}
impl TryFrom<&[u8]> for Message {
    type Error = ParsingError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let message_type = read_message_type(value)?;
        trace!(message_type, length = value.len(), "decoding NTLM message");
        match message_type {
            NEGOTIATE_MESSAGE_TYPE => NegotiateMessage::try_from(value)
                .map(Message::Negotiate),
            CHALLENGE_MESSAGE_TYPE => ChallengeMessage::try_from(value)
                .map(Message::Challenge),
            AUTHENTICATE_MESSAGE_TYPE => AuthenticateMessage::try_from(value)
                .map(Message::Authenticate),
            other_type => Ok(Message::Other(other_type, Vec::from(&value[12..]))),
        }
    }
}


/// Verifies the magic value and returns the message type.
pub(crate) fn read_message_type(message: &[u8]) -> Result<u32, ParsingError> {
    if message.len() < 12 {
        return Err(ParsingError::ShortHeader { expected_min_len: 12, obtained_len: message.len() });
    }
    if message[0..8] != NTLMSSP_MAGIC {
        return Err(ParsingError::MagicMismatch { expected: NTLMSSP_MAGIC, obtained: Vec::from(&message[0..8]) });
    }
    Ok(read_u32(message, 8))
}

/// Checks the header of a message expected to be of a specific type and at least `min_len` long.
fn check_header(message: &[u8], expected_type: u32, min_len: usize) -> Result<(), ParsingError> {
    let obtained = read_message_type(message)?;
    if obtained != expected_type {
        return Err(ParsingError::MessageTypeMismatch { expected: expected_type, obtained });
    }
    if message.len() < min_len {
        return Err(ParsingError::ShortHeader { expected_min_len: min_len, obtained_len: message.len() });
    }
    Ok(())
}

/// Reads a little-endian `u32`. The caller has verified that the bytes exist.
fn read_u32(message: &[u8], at: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&message[at..at+4]);
    u32::from_le_bytes(bytes)
}


/// A structure representing the version of an operating system as well as the NTLM revision used.
///
/// The all-zero value means that no version is transmitted.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct NtlmVersion {
    pub major_version: u8,
    pub minor_version: u8,
    pub build_number: u16,
    pub ntlm_revision: u8,
}
impl NtlmVersion {
    /// The NTLM revision introduced with Windows Server 2003.
    pub const NTLMSSP_REVISION_W2K3: u8 = 0x0F;

    /// No version information.
    pub const UNSET: Self = Self::new(0, 0, 0, 0);

    /// Windows XP SP2.
    pub const WINDOWS_XP: Self = Self::new(5, 1, 2600, Self::NTLMSSP_REVISION_W2K3);

    /// Windows Server 2003.
    pub const SERVER_2003: Self = Self::new(5, 2, 3790, Self::NTLMSSP_REVISION_W2K3);

    pub const fn new(major_version: u8, minor_version: u8, build_number: u16, ntlm_revision: u8) -> Self {
        Self {
            major_version,
            minor_version,
            build_number,
            ntlm_revision,
        }
    }

    /// Whether this is the all-zero "absent" value.
    pub fn is_unset(&self) -> bool {
        *self == Self::UNSET
    }

    /// Serializes the version structure into bytes.
    pub fn to_bytes(&self) -> [u8; 8] {
        let build = self.build_number.to_le_bytes();
        [
            self.major_version, self.minor_version, build[0], build[1],
            0, 0, 0, // reserved
            self.ntlm_revision,
        ]
    }

    /// Reads the version structure at `at`, which must be followed by at least 8 bytes.
    fn read(message: &[u8], at: usize) -> Result<Self, ParsingError> {
        let bytes = message.get(at..at+8)
            .ok_or(ParsingError::ShortHeader { expected_min_len: at + 8, obtained_len: message.len() })?;
        Ok(Self {
            major_version: bytes[0],
            minor_version: bytes[1],
            build_number: u16::from_le_bytes([bytes[2], bytes[3]]),
            ntlm_revision: bytes[7],
        })
    }
}


/// An NTLM security buffer, pointing to data contained later in the message.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SecurityBuffer {
    pub length: u16,
    pub capacity: u16,
    pub offset: u32,
}
impl SecurityBuffer {
    /// Serializes the security buffer into bytes.
    pub fn to_bytes(&self) -> [u8; 8] {
        let mut ret = [0u8; 8];
        ret[0..2].copy_from_slice(&self.length.to_le_bytes());
        ret[2..4].copy_from_slice(&self.capacity.to_le_bytes());
        ret[4..8].copy_from_slice(&self.offset.to_le_bytes());
        ret
    }

    /// Reads the security buffer at `at`. The caller has verified that the header is long enough.
    pub(crate) fn read(message: &[u8], at: usize) -> Self {
        Self {
            length: u16::from_le_bytes([message[at], message[at+1]]),
            capacity: u16::from_le_bytes([message[at+2], message[at+3]]),
            offset: read_u32(message, at + 4),
        }
    }

    /// Extracts the data the security buffer points to from the whole message.
    ///
    /// Empty buffers yield an empty slice regardless of their offset.
    pub fn apply_to_slice<'a>(&self, message: &'a [u8]) -> Result<&'a [u8], ParsingError> {
        if self.length == 0 {
            return Ok(&[]);
        }

        let out_of_range = || ParsingError::BufferOutOfRange {
            offset: self.offset,
            length: self.length,
            message_len: message.len(),
        };
        let start: usize = self.offset.try_into()
            .map_err(|_| out_of_range())?;
        let end = start.checked_add(usize::from(self.length))
            .ok_or_else(out_of_range)?;
        message.get(start..end)
            .ok_or_else(out_of_range)
    }
}


/// Assembles a message from a zeroed fixed header and a growing payload.
///
/// Each variable field is appended to the payload and the security buffer pointing to it is
/// patched into the header at once, so offsets are always absolute.
pub(crate) struct PayloadWriter {
    buf: Vec<u8>,
}
impl PayloadWriter {
    /// Starts a message of the given type whose fixed part (including magic and type) spans
    /// `header_len` bytes.
    pub fn new(message_type: u32, header_len: usize) -> Self {
        let mut buf = vec![0u8; header_len];
        buf[0..8].copy_from_slice(&NTLMSSP_MAGIC);
        buf[8..12].copy_from_slice(&message_type.to_le_bytes());
        Self { buf }
    }

    /// Writes raw bytes into the fixed header.
    pub fn put(&mut self, at: usize, bytes: &[u8]) {
        self.buf[at..at+bytes.len()].copy_from_slice(bytes);
    }

    /// Appends `data` to the payload and stores the security buffer pointing to it at `pointer_at`.
    pub fn append(&mut self, pointer_at: usize, field: &'static str, data: &[u8]) -> Result<(), StoringError> {
        let length: u16 = data.len().try_into()
            .map_err(|_| StoringError::FieldTooLong { field, length: data.len() })?;
        let offset: u32 = self.buf.len().try_into()
            .map_err(|_| StoringError::FieldTooLong { field: "message", length: self.buf.len() })?;

        let sb = SecurityBuffer {
            length,
            capacity: length,
            offset,
        };
        self.put(pointer_at, &sb.to_bytes());
        self.buf.extend_from_slice(data);
        Ok(())
    }

    /// Encodes `string` according to `flags` and appends it like [`PayloadWriter::append`].
    pub fn append_string(&mut self, pointer_at: usize, field: &'static str, flags: Flags, string: &str) -> Result<(), StoringError> {
        let bytes = encode_string(flags, string)?;
        self.append(pointer_at, field, &bytes)
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}


/// Encodes a string as UTF-16 if the flags request Unicode, otherwise as Latin-1.
pub(crate) fn encode_string(flags: Flags, string: &str) -> Result<Vec<u8>, StoringError> {
    if flags.contains(Flags::NEGOTIATE_UNICODE) {
        Ok(encode_utf16le(string))
    } else {
        encode_oem(string)
    }
}

/// Decodes a string as UTF-16 if the flags request Unicode, otherwise as Latin-1.
pub(crate) fn decode_string(flags: Flags, bytes: &[u8]) -> Result<String, ParsingError> {
    if flags.contains(Flags::NEGOTIATE_UNICODE) {
        decode_utf16le(bytes)
    } else {
        Ok(decode_oem(bytes))
    }
}
