//! NTLM authentication for SMB clients, optionally wrapped in SPNEGO.
//!
//! The crate encodes and decodes the three NTLM messages, calculates NTLMv1 and NTLMv2 responses,
//! derives the session keys and drives the whole exchange through [`NtlmClient`]. It performs no
//! I/O: the caller moves the blobs between [`NtlmClient::step`] and the server.
//!
//! Sample usage, with a stand-in for the server:
//! ```
//! use smbntlm::{AuthConfig, ChallengeMessage, Credentials, Flags, NtlmClient, NtlmVersion};
//!
//! let config = AuthConfig::new(Credentials {
//!     username: "User".to_owned(),
//!     password: "Password".to_owned(),
//!     domain: "Domain".to_owned(),
//! }).with_workstation("COMPUTER");
//! let mut client = NtlmClient::new(config);
//!
//! // no initial token from the server: plain NTLM
//! let negotiate = client.step(&[]).expect("failed to create Negotiate message");
//! assert_eq!(&negotiate[0..8], b"NTLMSSP\0");
//!
//! // this is what the server would answer
//! let challenge = ChallengeMessage {
//!     flags: Flags::NEGOTIATE_UNICODE
//!         | Flags::NEGOTIATE_NTLM
//!         | Flags::NEGOTIATE_EXTENDED_SESSION_SECURITY
//!         | Flags::NEGOTIATE_KEY_EXCHANGE,
//!     target_name: "Domain".to_owned(),
//!     server_challenge: [0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef],
//!     target_info: Vec::new(),
//!     version: NtlmVersion::UNSET,
//! };
//! let challenge_bytes = challenge.to_bytes().expect("failed to encode Challenge message");
//!
//! let authenticate = client.step(&challenge_bytes).expect("failed to answer challenge");
//! assert_eq!(&authenticate[8..12], &[0x03, 0x00, 0x00, 0x00]);
//! assert_eq!(client.session_key().map(|k| k.len()), Some(16));
//! ```


mod av_pair;
mod client;
pub mod crypto;
mod error;
mod message;
mod oem;
mod response;
pub mod spnego;


use bitflags::bitflags;

pub use crate::av_pair::{AvFlags, AvId, AvPair, decode_av_pairs, encode_av_pairs, find_av_pair};
pub use crate::client::{AuthConfig, AuthMethod, NtlmClient};
pub use crate::error::{AuthError, NegotiationError, ParsingError, StoringError};
pub use crate::message::{
    AuthenticateMessage, ChallengeMessage, Message, MIC_LEN, NegotiateMessage, NTLMSSP_MAGIC,
    NtlmVersion, SecurityBuffer,
};
pub use crate::response::{
    get_ntlm_time, is_ntlm_v1_extended_session_security, is_ntlm_v2_response, ntlm_time,
    respond_anonymous, respond_challenge_ntlm_v1, respond_challenge_ntlm_v1_extended,
    respond_challenge_ntlm_v2, ChallengeResponse, NtlmV2ClientChallenge,
};


/// Standard NTLM credentials, consisting of username, password and domain.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Credentials {
    /// The username part of the credentials.
    pub username: String,

    /// The password part of the credentials.
    pub password: String,

    /// The domain part of the credentials.
    ///
    /// Often specified in combination with the username as `<DOMAIN>\<USERNAME>`. In credentials
    /// without a domain, the domain is an empty string.
    pub domain: String,
}


bitflags! {
    /// NTLM negotiation flags.
    #[derive(Clone, Copy, Debug, Default, Hash, Eq, Ord, PartialEq, PartialOrd)]
    pub struct Flags: u32 {
        const NEGOTIATE_UNICODE = 0x0000_0001;
        const NEGOTIATE_OEM = 0x0000_0002;
        const REQUEST_TARGET = 0x0000_0004;
        const UNKNOWN_8 = 0x0000_0008;
        const NEGOTIATE_SIGN = 0x0000_0010;
        const NEGOTIATE_SEAL = 0x0000_0020;
        const NEGOTIATE_DATAGRAM = 0x0000_0040;
        const NEGOTIATE_LANMAN_KEY = 0x0000_0080;
        const NEGOTIATE_NETWARE = 0x0000_0100;
        const NEGOTIATE_NTLM = 0x0000_0200;
        const UNKNOWN_400 = 0x0000_0400;
        const NEGOTIATE_ANONYMOUS = 0x0000_0800;
        const NEGOTIATE_DOMAIN_SUPPLIED = 0x0000_1000;
        const NEGOTIATE_WORKSTATION_SUPPLIED = 0x0000_2000;
        const NEGOTIATE_LOCAL_CALL = 0x0000_4000;
        const NEGOTIATE_ALWAYS_SIGN = 0x0000_8000;
        const TARGET_TYPE_DOMAIN = 0x0001_0000;
        const TARGET_TYPE_SERVER = 0x0002_0000;
        const TARGET_TYPE_SHARE = 0x0004_0000;
        const NEGOTIATE_EXTENDED_SESSION_SECURITY = 0x0008_0000;
        const NEGOTIATE_IDENTIFY = 0x0010_0000;
        const UNKNOWN_200000 = 0x0020_0000;
        const REQUEST_NON_NT_SESSION_KEY = 0x0040_0000;
        const NEGOTIATE_TARGET_INFO = 0x0080_0000;
        const UNKNOWN_1000000 = 0x0100_0000;
        const NEGOTIATE_VERSION = 0x0200_0000;
        const UNKNOWN_4000000 = 0x0400_0000;
        const UNKNOWN_8000000 = 0x0800_0000;
        const UNKNOWN_10000000 = 0x1000_0000;
        const NEGOTIATE_128BIT = 0x2000_0000;
        const NEGOTIATE_KEY_EXCHANGE = 0x4000_0000;
        const NEGOTIATE_56BIT = 0x8000_0000;
    }
}
