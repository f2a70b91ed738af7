use crate::Flags;
use crate::av_pair::{AvId, AvPair, decode_av_pairs, encode_av_pairs, find_av_pair};
use crate::error::{ParsingError, StoringError};
use crate::message::{
    check_header, decode_string, read_u32, CHALLENGE_MESSAGE_TYPE, NtlmVersion, PayloadWriter,
    SecurityBuffer,
};


const TARGET_NAME_AT: usize = 12;
const FLAGS_AT: usize = 20;
const CHALLENGE_AT: usize = 24;
const TARGET_INFO_AT: usize = 40;
const VERSION_AT: usize = 48;
const FIXED_LEN: usize = 48;


/// The contents of an NTLM Challenge message.
///
/// The Challenge message is sent by the server in response to the client's Negotiate message; the
/// client is expected to respond with an Authenticate message.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ChallengeMessage {
    /// Stores which NTLM behavior has been accepted by the server from the client's request.
    ///
    /// The target-name, target-info and version flags are derived from the other fields.
    pub flags: Flags,

    /// The host or domain against which the client is authenticating.
    pub target_name: String,

    /// The challenge value.
    pub server_challenge: [u8; 8],

    /// Information about the targets of the authentication, in the server's order.
    pub target_info: Vec<AvPair>,

    /// Version information about the server's operating system.
    pub version: NtlmVersion,
}
impl ChallengeMessage {
    /// Flags whose state follows from the message's fields.
    pub const DERIVED_FLAGS: Flags = Flags::REQUEST_TARGET
        .union(Flags::NEGOTIATE_TARGET_INFO)
        .union(Flags::NEGOTIATE_VERSION);

    /// The flags as they appear on the wire.
    pub fn wire_flags(&self) -> Flags {
        let mut flags = self.flags.difference(Self::DERIVED_FLAGS);
        flags.set(Flags::REQUEST_TARGET, !self.target_name.is_empty());
        flags.set(Flags::NEGOTIATE_TARGET_INFO, !self.target_info.is_empty());
        flags.set(Flags::NEGOTIATE_VERSION, !self.version.is_unset());
        flags
    }

    /// Returns the textual value of the first target information pair with the given identifier.
    pub fn target_info_string(&self, id: AvId) -> Option<String> {
        find_av_pair(&self.target_info, id)
            .and_then(|pair| pair.value_string().ok())
    }

    /// Returns the server's timestamp, if it sent one.
    pub fn timestamp(&self) -> Option<u64> {
        find_av_pair(&self.target_info, AvId::Timestamp)
            .and_then(|pair| pair.as_timestamp())
    }

    /// Serializes the whole Challenge message into bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, StoringError> {
        let flags = self.wire_flags();
        let header_len = if flags.contains(Flags::NEGOTIATE_VERSION) { FIXED_LEN + 8 } else { FIXED_LEN };

        let mut writer = PayloadWriter::new(CHALLENGE_MESSAGE_TYPE, header_len);
        writer.put(FLAGS_AT, &flags.bits().to_le_bytes());
        writer.put(CHALLENGE_AT, &self.server_challenge);
        if flags.contains(Flags::NEGOTIATE_VERSION) {
            writer.put(VERSION_AT, &self.version.to_bytes());
        }
        writer.append_string(TARGET_NAME_AT, "target name", flags, &self.target_name)?;
        let target_info_bytes = if self.target_info.is_empty() {
            Vec::new()
        } else {
            encode_av_pairs(&self.target_info)?
        };
        writer.append(TARGET_INFO_AT, "target info", &target_info_bytes)?;
        Ok(writer.finish())
    }
}
impl TryFrom<&[u8]> for ChallengeMessage {
    type Error = ParsingError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        check_header(value, CHALLENGE_MESSAGE_TYPE, FIXED_LEN)?;

        let wire_flags = Flags::from_bits_retain(read_u32(value, FLAGS_AT));
        let mut server_challenge = [0u8; 8];
        server_challenge.copy_from_slice(&value[CHALLENGE_AT..CHALLENGE_AT+8]);

        let target_name_bytes = SecurityBuffer::read(value, TARGET_NAME_AT).apply_to_slice(value)?;
        let target_info_bytes = SecurityBuffer::read(value, TARGET_INFO_AT).apply_to_slice(value)?;
        let version = if wire_flags.contains(Flags::NEGOTIATE_VERSION) {
            NtlmVersion::read(value, VERSION_AT)?
        } else {
            NtlmVersion::UNSET
        };

        let target_info = if target_info_bytes.is_empty() {
            Vec::new()
        } else {
            decode_av_pairs(target_info_bytes)?
        };

        Ok(Self {
            flags: wire_flags.difference(Self::DERIVED_FLAGS),
            target_name: decode_string(wire_flags, target_name_bytes)?,
            server_challenge,
            target_info,
            version,
        })
    }
}
