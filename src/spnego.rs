//! The SPNEGO negotiation envelope (RFC 4178 with the MS-SPNG `NegTokenInit2` extension).
//!
//! The tokens are ASN.1 types encoded with DER. `NegTokenInit` and `NegTokenInit2` share the
//! context tag 0 of the `NegotiationToken` choice, so decoding needs to know where in the exchange
//! a token was received.


use rasn::{der, AsnType, Decode, Encode};
use rasn::types::{Any, BitString, GeneralString, ObjectIdentifier, OctetString, Oid};
use tracing::trace;

use crate::error::NegotiationError;


/// The object identifier of SPNEGO itself (1.3.6.1.5.5.2).
pub const SPNEGO_OID: &Oid = Oid::const_new(&[1, 3, 6, 1, 5, 5, 2]);

/// The object identifier of NTLMSSP (1.3.6.1.4.1.311.2.2.10).
pub const NTLMSSP_OID: &Oid = Oid::const_new(&[1, 3, 6, 1, 4, 1, 311, 2, 2, 10]);

/// The hint name Windows servers place into `NegTokenInit2`.
pub const DEFAULT_HINT_NAME: &str = "not_defined_in_RFC4178@please_ignore";


const TAG_APPLICATION: u8 = 0x60;
const TAG_NEG_TOKEN_INIT: u8 = 0xa0;
const TAG_NEG_TOKEN_RESP: u8 = 0xa1;


/// How a token carrying the `NegTokenInit` tag is to be understood.
///
/// `NegTokenInit` and `NegTokenInit2` share their tag; only the position in the exchange tells
/// them apart.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum DecodeContext {
    /// The first token of an exchange started by the server, e.g. from an SMB Negotiate response.
    ServerInitiated,

    /// Any other token.
    Standard,
}


/// The state of the negotiation as reported by the acceptor.
#[derive(AsnType, Clone, Copy, Debug, Decode, Encode, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[rasn(enumerated)]
pub enum NegState {
    AcceptCompleted = 0,
    AcceptIncomplete = 1,
    Reject = 2,
    RequestMic = 3,
}


/// The initiator's first token (RFC 4178 `NegTokenInit`).
#[derive(AsnType, Clone, Debug, Decode, Default, Encode, Eq, PartialEq)]
pub struct NegTokenInit {
    /// The offered mechanisms in decreasing order of preference. Left out when empty.
    #[rasn(tag(explicit(0)), default)]
    pub mech_types: Vec<ObjectIdentifier>,

    /// The obsolete context flags; kept when decoded, never set by this crate.
    #[rasn(tag(explicit(1)))]
    pub req_flags: Option<BitString>,

    /// The optimistic token of the preferred mechanism.
    #[rasn(tag(explicit(2)))]
    pub mech_token: Option<OctetString>,

    #[rasn(tag(explicit(3)))]
    pub mech_list_mic: Option<OctetString>,
}

/// The server's unsolicited first token (MS-SPNG `NegTokenInit2`).
#[derive(AsnType, Clone, Debug, Decode, Encode, Eq, PartialEq)]
pub struct NegTokenInit2 {
    #[rasn(tag(explicit(0)), default)]
    pub mech_types: Vec<ObjectIdentifier>,

    #[rasn(tag(explicit(1)))]
    pub req_flags: Option<BitString>,

    #[rasn(tag(explicit(2)))]
    pub mech_token: Option<OctetString>,

    #[rasn(tag(explicit(3)))]
    pub neg_hints: Option<NegHints>,

    #[rasn(tag(explicit(4)))]
    pub mech_list_mic: Option<OctetString>,
}
impl Default for NegTokenInit2 {
    /// An empty token with the hints a Windows server sends.
    fn default() -> Self {
        Self {
            mech_types: Vec::new(),
            req_flags: None,
            mech_token: None,
            neg_hints: Some(NegHints {
                hint_name: GeneralString::try_from(DEFAULT_HINT_NAME.to_owned()).ok(),
                hint_address: None,
            }),
            mech_list_mic: None,
        }
    }
}

/// Hints about the acceptor carried by `NegTokenInit2`.
#[derive(AsnType, Clone, Debug, Decode, Default, Encode, Eq, PartialEq)]
pub struct NegHints {
    #[rasn(tag(explicit(0)))]
    pub hint_name: Option<GeneralString>,

    #[rasn(tag(explicit(1)))]
    pub hint_address: Option<OctetString>,
}

/// Any token after the first (RFC 4178 `NegTokenResp`).
#[derive(AsnType, Clone, Debug, Decode, Default, Encode, Eq, PartialEq)]
pub struct NegTokenResp {
    #[rasn(tag(explicit(0)))]
    pub neg_state: Option<NegState>,

    #[rasn(tag(explicit(1)))]
    pub supported_mech: Option<ObjectIdentifier>,

    #[rasn(tag(explicit(2)))]
    pub response_token: Option<OctetString>,

    #[rasn(tag(explicit(3)))]
    pub mech_list_mic: Option<OctetString>,
}


/// The generic GSS-API framing (RFC 2743 `InitialContextToken`).
#[derive(AsnType, Decode, Encode)]
#[rasn(tag(application, 0))]
struct InitialContextToken {
    this_mech: ObjectIdentifier,
    inner_context_token: Any,
}

/// `NegotiationToken` as it appears everywhere except the first token of a server.
#[derive(AsnType, Decode, Encode)]
#[rasn(choice)]
enum StandardToken {
    #[rasn(tag(explicit(0)))]
    Init(NegTokenInit),

    #[rasn(tag(explicit(1)))]
    Response(NegTokenResp),
}

/// `NegotiationToken` as a server sends it to start the exchange.
#[derive(AsnType, Decode, Encode)]
#[rasn(choice)]
enum ServerInitiatedToken {
    #[rasn(tag(explicit(0)))]
    Init2(NegTokenInit2),

    #[rasn(tag(explicit(1)))]
    Response(NegTokenResp),
}


/// A SPNEGO token.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum NegotiationToken {
    Init(NegTokenInit),
    Init2(NegTokenInit2),
    Response(NegTokenResp),
}
impl NegotiationToken {
    /// Decodes a token, with or without the generic GSS-API header.
    ///
    /// Returns `Ok(None)` if the token starts with a tag that is not a SPNEGO token at all.
    pub fn decode(bytes: &[u8], context: DecodeContext) -> Result<Option<Self>, NegotiationError> {
        let header: InitialContextToken;
        let body = match bytes.first() {
            None => return Err(NegotiationError::Empty),
            Some(&TAG_APPLICATION) => {
                header = der::decode(bytes).map_err(malformed)?;
                if *header.this_mech != *SPNEGO_OID {
                    return Err(NegotiationError::WrongHeaderMechanism { obtained: header.this_mech.clone() });
                }
                header.inner_context_token.as_bytes()
            },
            Some(_) => bytes,
        };

        match body.first() {
            Some(&(TAG_NEG_TOKEN_INIT | TAG_NEG_TOKEN_RESP)) => {},
            other => {
                trace!(tag = ?other, "not a SPNEGO token");
                return Ok(None);
            },
        }

        let token = match context {
            DecodeContext::ServerInitiated => match der::decode(body).map_err(malformed)? {
                ServerInitiatedToken::Init2(init2) => Self::Init2(init2),
                ServerInitiatedToken::Response(resp) => Self::Response(resp),
            },
            DecodeContext::Standard => match der::decode(body).map_err(malformed)? {
                StandardToken::Init(init) => Self::Init(init),
                StandardToken::Response(resp) => Self::Response(resp),
            },
        };
        trace!(token = token.kind(), "decoded SPNEGO token");
        Ok(Some(token))
    }

    /// Encodes the token, optionally prefixed with the generic GSS-API header.
    ///
    /// The header is required on the initiator's first token and optional on all others.
    pub fn to_bytes(&self, with_header: bool) -> Result<Vec<u8>, NegotiationError> {
        let token = match self {
            Self::Init(init) => der::encode(&StandardToken::Init(init.clone())),
            Self::Init2(init2) => der::encode(&ServerInitiatedToken::Init2(init2.clone())),
            Self::Response(resp) => der::encode(&StandardToken::Response(resp.clone())),
        }.map_err(encoding)?;
        if !with_header {
            return Ok(token);
        }

        let header = InitialContextToken {
            this_mech: ObjectIdentifier::from(SPNEGO_OID),
            inner_context_token: Any::new(token),
        };
        der::encode(&header).map_err(encoding)
    }

    /// The mechanisms the token offers; empty for responses.
    pub fn mech_types(&self) -> &[ObjectIdentifier] {
        match self {
            Self::Init(init) => &init.mech_types,
            Self::Init2(init2) => &init2.mech_types,
            Self::Response(_) => &[],
        }
    }

    /// Whether the token offers the given mechanism.
    pub fn offers(&self, mechanism: &Oid) -> bool {
        self.mech_types()
            .iter()
            .any(|mech| **mech == *mechanism)
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Init(_) => "NegTokenInit",
            Self::Init2(_) => "NegTokenInit2",
            Self::Response(_) => "NegTokenResp",
        }
    }
}


/// Encodes a list of mechanisms as a DER `MechTypeList` sequence.
///
/// These are the bytes protected by the mechanism list MIC.
pub fn encode_mech_type_list(mech_types: &[ObjectIdentifier]) -> Result<Vec<u8>, NegotiationError> {
    der::encode(&mech_types.to_vec())
        .map_err(encoding)
}


fn malformed(error: impl std::fmt::Display) -> NegotiationError {
    NegotiationError::Malformed(error.to_string())
}

fn encoding(error: impl std::fmt::Display) -> NegotiationError {
    NegotiationError::Encoding(error.to_string())
}
