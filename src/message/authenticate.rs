use crate::Flags;
use crate::av_pair::{AvFlags, AvId, find_av_pair};
use crate::error::{ParsingError, StoringError};
use crate::message::{
    check_header, decode_string, read_u32, AUTHENTICATE_MESSAGE_TYPE, NtlmVersion, PayloadWriter,
    SecurityBuffer,
};
use crate::response::{is_ntlm_v2_response, NtlmV2ClientChallenge};


const LM_RESPONSE_AT: usize = 12;
const NT_RESPONSE_AT: usize = 20;
const DOMAIN_AT: usize = 28;
const USER_AT: usize = 36;
const WORKSTATION_AT: usize = 44;
const SESSION_KEY_AT: usize = 52;
const FLAGS_AT: usize = 60;
const VERSION_AT: usize = 64;
const FIXED_LEN: usize = 64;

/// Length of the message integrity code.
pub const MIC_LEN: usize = 16;


/// The contents of an NTLM Authenticate message.
///
/// The Authenticate message is sent by the client in response to the server's Challenge message;
/// once it is accepted by the server, the authentication has succeeded.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct AuthenticateMessage {
    /// The NTLM behavior the client has settled on.
    ///
    /// The key-exchange and version flags are derived from the other fields.
    pub flags: Flags,

    /// One zero byte for anonymous authentication, otherwise 24 bytes.
    pub lm_challenge_response: Vec<u8>,

    /// Empty for anonymous authentication, 24 bytes for NTLMv1, at least 48 bytes for NTLMv2.
    pub nt_challenge_response: Vec<u8>,

    pub domain_name: String,
    pub user_name: String,
    pub workstation: String,

    /// The session key encrypted with the key exchange key; empty without key exchange.
    pub encrypted_random_session_key: Vec<u8>,

    pub version: NtlmVersion,

    /// The message integrity code, covering all three messages of the exchange.
    ///
    /// When decoding, the MIC is recognized by the gap between the fixed header and the payload,
    /// not by the MsvAvFlags pair: NTLMv1 responses carry a MIC but no AV pairs to announce it.
    /// [`AuthenticateMessage::mic_flag_set`] reports the pair separately.
    pub mic: Option<[u8; MIC_LEN]>,
}
impl AuthenticateMessage {
    /// Flags whose state follows from the message's fields.
    pub const DERIVED_FLAGS: Flags = Flags::NEGOTIATE_KEY_EXCHANGE
        .union(Flags::NEGOTIATE_VERSION);

    /// The flags as they appear on the wire.
    pub fn wire_flags(&self) -> Flags {
        let mut flags = self.flags.difference(Self::DERIVED_FLAGS);
        flags.set(Flags::NEGOTIATE_KEY_EXCHANGE, !self.encrypted_random_session_key.is_empty());
        flags.set(Flags::NEGOTIATE_VERSION, !self.version.is_unset());
        flags
    }

    /// The offset of the MIC within the encoded message, if the message carries one.
    pub fn mic_offset(&self) -> Option<usize> {
        self.mic.map(|_| self.header_len_without_mic())
    }

    /// Whether the NTLMv2 response announces a MIC through its MsvAvFlags pair.
    pub fn mic_flag_set(&self) -> bool {
        if !is_ntlm_v2_response(&self.nt_challenge_response) {
            return false;
        }
        let Ok(client_challenge) = NtlmV2ClientChallenge::try_from_bytes(&self.nt_challenge_response[16..]) else {
            return false;
        };
        find_av_pair(&client_challenge.av_pairs, AvId::Flags)
            .and_then(|pair| pair.as_flags())
            .map(|flags| flags.contains(AvFlags::MIC_PRESENT))
            .unwrap_or(false)
    }

    fn header_len_without_mic(&self) -> usize {
        if self.version.is_unset() { FIXED_LEN } else { FIXED_LEN + 8 }
    }

    /// Serializes the whole Authenticate message into bytes.
    ///
    /// The payload is laid out as domain, user, workstation, LM response, NT response and
    /// encrypted session key.
    pub fn to_bytes(&self) -> Result<Vec<u8>, StoringError> {
        let flags = self.wire_flags();
        let mic_at = self.header_len_without_mic();
        let header_len = if self.mic.is_some() { mic_at + MIC_LEN } else { mic_at };

        let mut writer = PayloadWriter::new(AUTHENTICATE_MESSAGE_TYPE, header_len);
        writer.put(FLAGS_AT, &flags.bits().to_le_bytes());
        if flags.contains(Flags::NEGOTIATE_VERSION) {
            writer.put(VERSION_AT, &self.version.to_bytes());
        }
        if let Some(mic) = &self.mic {
            writer.put(mic_at, mic);
        }
        writer.append_string(DOMAIN_AT, "domain", flags, &self.domain_name)?;
        writer.append_string(USER_AT, "user name", flags, &self.user_name)?;
        writer.append_string(WORKSTATION_AT, "workstation", flags, &self.workstation)?;
        writer.append(LM_RESPONSE_AT, "LM response", &self.lm_challenge_response)?;
        writer.append(NT_RESPONSE_AT, "NT response", &self.nt_challenge_response)?;
        writer.append(SESSION_KEY_AT, "encrypted session key", &self.encrypted_random_session_key)?;
        Ok(writer.finish())
    }
}
impl TryFrom<&[u8]> for AuthenticateMessage {
    type Error = ParsingError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        check_header(value, AUTHENTICATE_MESSAGE_TYPE, FIXED_LEN)?;

        let wire_flags = Flags::from_bits_retain(read_u32(value, FLAGS_AT));
        let pointers = [LM_RESPONSE_AT, NT_RESPONSE_AT, DOMAIN_AT, USER_AT, WORKSTATION_AT, SESSION_KEY_AT]
            .map(|at| SecurityBuffer::read(value, at));
        let [lm_sb, nt_sb, domain_sb, user_sb, workstation_sb, key_sb] = pointers;

        let version = if wire_flags.contains(Flags::NEGOTIATE_VERSION) {
            NtlmVersion::read(value, VERSION_AT)?
        } else {
            NtlmVersion::UNSET
        };

        // the MIC is there if the payload leaves room for it
        let mic_at = if wire_flags.contains(Flags::NEGOTIATE_VERSION) { FIXED_LEN + 8 } else { FIXED_LEN };
        let payload_start = pointers.iter()
            .filter(|sb| sb.length > 0)
            .map(|sb| sb.offset)
            .min()
            .or_else(|| pointers.iter().map(|sb| sb.offset).min())
            .unwrap_or(0);
        let mic = if payload_start as usize >= mic_at + MIC_LEN && value.len() >= mic_at + MIC_LEN {
            let mut mic = [0u8; MIC_LEN];
            mic.copy_from_slice(&value[mic_at..mic_at+MIC_LEN]);
            Some(mic)
        } else {
            None
        };

        Ok(Self {
            flags: wire_flags.difference(Self::DERIVED_FLAGS),
            lm_challenge_response: Vec::from(lm_sb.apply_to_slice(value)?),
            nt_challenge_response: Vec::from(nt_sb.apply_to_slice(value)?),
            domain_name: decode_string(wire_flags, domain_sb.apply_to_slice(value)?)?,
            user_name: decode_string(wire_flags, user_sb.apply_to_slice(value)?)?,
            workstation: decode_string(wire_flags, workstation_sb.apply_to_slice(value)?)?,
            encrypted_random_session_key: Vec::from(key_sb.apply_to_slice(value)?),
            version,
            mic,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::av_pair::{AvPair, encode_av_pairs};
    use proptest::prelude::*;

    fn sample() -> AuthenticateMessage {
        AuthenticateMessage {
            flags: Flags::NEGOTIATE_UNICODE | Flags::NEGOTIATE_NTLM | Flags::NEGOTIATE_EXTENDED_SESSION_SECURITY,
            lm_challenge_response: vec![0xAA; 24],
            nt_challenge_response: vec![0xBB; 24],
            domain_name: "Domain".to_owned(),
            user_name: "User".to_owned(),
            workstation: "COMPUTER".to_owned(),
            encrypted_random_session_key: vec![0xCC; 16],
            version: NtlmVersion::SERVER_2003,
            mic: Some([0xDD; MIC_LEN]),
        }
    }

    #[test]
    fn layout_with_version_and_mic() {
        let message = sample();
        let bytes = message.to_bytes().unwrap();

        assert_eq!(message.mic_offset(), Some(72));
        assert_eq!(&bytes[72..88], &[0xDD; MIC_LEN]);
        let wire = Flags::from_bits_retain(read_u32(&bytes, FLAGS_AT));
        assert!(wire.contains(Flags::NEGOTIATE_KEY_EXCHANGE | Flags::NEGOTIATE_VERSION));

        // domain (12), user (8), workstation (16), LM (24), NT (24), key (16)
        let expected_offsets = [
            (DOMAIN_AT, 88, 12),
            (USER_AT, 100, 8),
            (WORKSTATION_AT, 108, 16),
            (LM_RESPONSE_AT, 124, 24),
            (NT_RESPONSE_AT, 148, 24),
            (SESSION_KEY_AT, 172, 16),
        ];
        for (at, offset, length) in expected_offsets {
            assert_eq!(SecurityBuffer::read(&bytes, at), SecurityBuffer { length, capacity: length, offset });
        }
        assert_eq!(bytes.len(), 188);

        assert_eq!(AuthenticateMessage::try_from(bytes.as_slice()).unwrap(), message);
    }

    #[test]
    fn without_version_or_mic() {
        let message = AuthenticateMessage {
            version: NtlmVersion::UNSET,
            mic: None,
            encrypted_random_session_key: Vec::new(),
            ..sample()
        };
        let bytes = message.to_bytes().unwrap();
        assert_eq!(message.mic_offset(), None);
        assert_eq!(SecurityBuffer::read(&bytes, DOMAIN_AT).offset, 64);
        let wire = Flags::from_bits_retain(read_u32(&bytes, FLAGS_AT));
        assert!(!wire.contains(Flags::NEGOTIATE_KEY_EXCHANGE));
        assert!(!wire.contains(Flags::NEGOTIATE_VERSION));
        assert_eq!(AuthenticateMessage::try_from(bytes.as_slice()).unwrap(), message);
    }

    #[test]
    fn mic_without_version() {
        let message = AuthenticateMessage {
            version: NtlmVersion::UNSET,
            ..sample()
        };
        assert_eq!(message.mic_offset(), Some(64));
        let bytes = message.to_bytes().unwrap();
        assert_eq!(AuthenticateMessage::try_from(bytes.as_slice()).unwrap(), message);
    }

    #[test]
    fn anonymous_with_empty_payload() {
        let message = AuthenticateMessage {
            flags: Flags::NEGOTIATE_UNICODE | Flags::NEGOTIATE_ANONYMOUS,
            lm_challenge_response: vec![0],
            nt_challenge_response: Vec::new(),
            domain_name: String::new(),
            user_name: String::new(),
            workstation: String::new(),
            encrypted_random_session_key: Vec::new(),
            version: NtlmVersion::SERVER_2003,
            mic: Some([0; MIC_LEN]),
        };
        let bytes = message.to_bytes().unwrap();
        assert_eq!(bytes.len(), 64 + 8 + 16 + 1);
        assert_eq!(AuthenticateMessage::try_from(bytes.as_slice()).unwrap(), message);
    }

    #[test]
    fn oem_strings() {
        let message = AuthenticateMessage {
            flags: Flags::NEGOTIATE_OEM,
            ..sample()
        };
        let bytes = message.to_bytes().unwrap();
        assert_eq!(&bytes[88..94], b"Domain");
        assert_eq!(AuthenticateMessage::try_from(bytes.as_slice()).unwrap(), message);
    }

    #[test]
    fn mic_flag_in_v2_response() {
        let client_challenge = NtlmV2ClientChallenge {
            timestamp: 0,
            client_challenge: [0xAA; 8],
            av_pairs: vec![
                AvPair::from_string(AvId::NbDomainName, "Domain"),
                AvPair::from_flags(AvFlags::MIC_PRESENT),
            ],
        };
        let mut nt = vec![0x11; 16];
        nt.extend_from_slice(&client_challenge.to_bytes().unwrap());

        let message = AuthenticateMessage {
            nt_challenge_response: nt,
            ..sample()
        };
        assert!(message.mic_flag_set());

        let v1 = sample();
        assert!(!v1.mic_flag_set());

        let mut without_flags = vec![0x11; 16];
        without_flags.extend_from_slice(&[0x01, 0x01, 0, 0, 0, 0, 0, 0]);
        without_flags.extend_from_slice(&[0u8; 16]);
        without_flags.extend_from_slice(&[0u8; 4]);
        without_flags.extend_from_slice(&encode_av_pairs(&[]).unwrap());
        let message = AuthenticateMessage {
            nt_challenge_response: without_flags,
            ..sample()
        };
        assert!(!message.mic_flag_set());
    }

    #[test]
    fn v1_mic_found_without_av_flags() {
        let message = sample();
        assert!(!message.mic_flag_set());

        let bytes = message.to_bytes().unwrap();
        let decoded = AuthenticateMessage::try_from(bytes.as_slice()).unwrap();
        assert_eq!(decoded.mic, Some([0xDD; MIC_LEN]));
        assert!(!decoded.mic_flag_set());

        // same response, no MIC: the payload starts right after the version
        let bytes = AuthenticateMessage { mic: None, ..sample() }.to_bytes().unwrap();
        assert_eq!(SecurityBuffer::read(&bytes, DOMAIN_AT).offset, 72);
        assert_eq!(AuthenticateMessage::try_from(bytes.as_slice()).unwrap().mic, None);
    }

    proptest! {
        #[test]
        fn round_trip(
            lm in proptest::collection::vec(any::<u8>(), 0..30),
            nt in proptest::collection::vec(any::<u8>(), 0..80),
            user in "[A-Za-z]{0,10}",
            domain in "[A-Z]{0,10}",
            workstation in "[A-Z0-9]{0,15}",
            key in proptest::option::of(any::<[u8; 16]>()),
            with_version in any::<bool>(),
            mic in proptest::option::of(any::<[u8; 16]>()),
            unicode in any::<bool>(),
        ) {
            let message = AuthenticateMessage {
                flags: if unicode { Flags::NEGOTIATE_UNICODE } else { Flags::NEGOTIATE_OEM },
                lm_challenge_response: lm,
                nt_challenge_response: nt,
                domain_name: domain,
                user_name: user,
                workstation,
                encrypted_random_session_key: key.map(Vec::from).unwrap_or_default(),
                version: if with_version { NtlmVersion::SERVER_2003 } else { NtlmVersion::UNSET },
                mic,
            };
            let bytes = message.to_bytes().unwrap();
            for at in [LM_RESPONSE_AT, NT_RESPONSE_AT, DOMAIN_AT, USER_AT, WORKSTATION_AT, SESSION_KEY_AT] {
                let sb = SecurityBuffer::read(&bytes, at);
                prop_assert_eq!(sb.length, sb.capacity);
                prop_assert!(sb.offset as usize + sb.length as usize <= bytes.len());
            }
            prop_assert_eq!(AuthenticateMessage::try_from(bytes.as_slice()).unwrap(), message);
        }
    }
}
