use crate::Flags;
use crate::error::{ParsingError, StoringError};
use crate::message::{
    check_header, read_u32, NEGOTIATE_MESSAGE_TYPE, NtlmVersion, PayloadWriter, SecurityBuffer,
};
use crate::oem::{decode_oem, encode_oem};


const FLAGS_AT: usize = 12;
const DOMAIN_AT: usize = 16;
const WORKSTATION_AT: usize = 24;
const VERSION_AT: usize = 32;
const FIXED_LEN: usize = 32;


/// The contents of an NTLM Negotiate message.
///
/// The Negotiate message is the first message in an NTLM challenge-response process and is sent by
/// the client to the server; the server is expected to respond with a Challenge message.
///
/// Domain and workstation are always OEM-encoded, whatever the Unicode flag says.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct NegotiateMessage {
    /// The NTLM behavior the client requests.
    ///
    /// The flags announcing the presence of the domain, the workstation and the version are derived
    /// from the other fields when encoding and are never stored here.
    pub flags: Flags,

    /// The domain against which the client wishes to authenticate.
    pub supplied_domain: String,

    /// The NT hostname of the client.
    pub supplied_workstation: String,

    /// Version information about the client's operating system.
    pub version: NtlmVersion,
}
impl NegotiateMessage {
    /// Flags whose state follows from the message's fields.
    pub const DERIVED_FLAGS: Flags = Flags::NEGOTIATE_DOMAIN_SUPPLIED
        .union(Flags::NEGOTIATE_WORKSTATION_SUPPLIED)
        .union(Flags::NEGOTIATE_VERSION);

    /// The flags as they appear on the wire.
    pub fn wire_flags(&self) -> Flags {
        let mut flags = self.flags.difference(Self::DERIVED_FLAGS);
        flags.set(Flags::NEGOTIATE_DOMAIN_SUPPLIED, !self.supplied_domain.is_empty());
        flags.set(Flags::NEGOTIATE_WORKSTATION_SUPPLIED, !self.supplied_workstation.is_empty());
        flags.set(Flags::NEGOTIATE_VERSION, !self.version.is_unset());
        flags
    }

    /// Serializes the whole Negotiate message into bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, StoringError> {
        let flags = self.wire_flags();
        let header_len = if flags.contains(Flags::NEGOTIATE_VERSION) { FIXED_LEN + 8 } else { FIXED_LEN };

        let mut writer = PayloadWriter::new(NEGOTIATE_MESSAGE_TYPE, header_len);
        writer.put(FLAGS_AT, &flags.bits().to_le_bytes());
        if flags.contains(Flags::NEGOTIATE_VERSION) {
            writer.put(VERSION_AT, &self.version.to_bytes());
        }
        writer.append(DOMAIN_AT, "domain", &encode_oem(&self.supplied_domain)?)?;
        writer.append(WORKSTATION_AT, "workstation", &encode_oem(&self.supplied_workstation)?)?;
        Ok(writer.finish())
    }
}
impl TryFrom<&[u8]> for NegotiateMessage {
    type Error = ParsingError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        check_header(value, NEGOTIATE_MESSAGE_TYPE, FIXED_LEN)?;

        let wire_flags = Flags::from_bits_retain(read_u32(value, FLAGS_AT));
        let domain_bytes = SecurityBuffer::read(value, DOMAIN_AT).apply_to_slice(value)?;
        let workstation_bytes = SecurityBuffer::read(value, WORKSTATION_AT).apply_to_slice(value)?;
        let version = if wire_flags.contains(Flags::NEGOTIATE_VERSION) {
            NtlmVersion::read(value, VERSION_AT)?
        } else {
            NtlmVersion::UNSET
        };

        Ok(Self {
            flags: wire_flags.difference(Self::DERIVED_FLAGS),
            supplied_domain: decode_oem(domain_bytes),
            supplied_workstation: decode_oem(workstation_bytes),
            version,
        })
    }
}
