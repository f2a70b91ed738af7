//! Error types returned by the codecs and the authentication client.


use rasn::types::ObjectIdentifier;
use thiserror::Error;


/// An error that may occur while parsing existing NTLM packets.
#[derive(Clone, Debug, Eq, Error, Hash, PartialEq)]
pub enum ParsingError {
    /// The header is shorter than expected.
    #[error("header too short (expected at least {expected_min_len} bytes, obtained {obtained_len})")]
    ShortHeader { expected_min_len: usize, obtained_len: usize },

    /// The magic value does not match the expected one.
    #[error("mismatched magic (expected {expected:?}, obtained {obtained:?})")]
    MagicMismatch { expected: [u8; 8], obtained: Vec<u8> },

    /// The message is of a different type than the one being decoded.
    #[error("unexpected message type (expected {expected}, obtained {obtained})")]
    MessageTypeMismatch { expected: u32, obtained: u32 },

    /// An internal item is shorter than expected.
    #[error("insufficient minimum length for an internal item (expected at least {expected_at_least}, obtained {obtained})")]
    ItemMinLengthMismatch { expected_at_least: usize, obtained: usize },

    /// A security buffer points outside of the message.
    #[error("security buffer (offset {offset}, length {length}) out of range (message has {message_len} bytes)")]
    BufferOutOfRange { offset: u32, length: u16, message_len: usize },

    /// The AV pair list ends before its terminator.
    #[error("AV pair list is not terminated")]
    UnterminatedAvPairs,

    /// A string of 16-bit characters could not be decoded.
    #[error("failed to decode value as UTF-16: {value:?}")]
    InvalidUtf16 { value: Vec<u16> },

    /// A UTF-16 value has an odd number of bytes.
    #[error("UTF-16 value has odd length {obtained_length}")]
    OddUtf16Length { obtained_length: usize },
}

/// An error that may occur while writing an NTLM packet.
#[derive(Clone, Debug, Eq, Error, Hash, PartialEq)]
pub enum StoringError {
    /// The string cannot be encoded using the OEM encoding.
    #[error("failed to encode {string:?} using OEM encoding")]
    NonOemEncodable { string: String },

    /// A variable-length field does not fit into its 16-bit length.
    #[error("{field} is {length} bytes long, which does not fit into a security buffer")]
    FieldTooLong { field: &'static str, length: usize },
}

/// An error that may occur while decoding or encoding a negotiation envelope token.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum NegotiationError {
    /// The token contains no bytes at all.
    #[error("empty token")]
    Empty,

    /// The token is not valid DER or does not match the expected structure.
    #[error("malformed token: {0}")]
    Malformed(String),

    /// The generic header names a mechanism other than the negotiation mechanism.
    #[error("header names mechanism {obtained:?} instead of the negotiation mechanism")]
    WrongHeaderMechanism { obtained: ObjectIdentifier },

    /// The token could not be encoded.
    #[error("failed to encode token: {0}")]
    Encoding(String),
}

/// An error that terminates an authentication attempt.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum AuthError {
    /// The peer's negotiation envelope could not be decoded.
    #[error("failed to decode negotiation token: {0}")]
    Negotiation(#[from] NegotiationError),

    /// The peer's NTLM message could not be decoded.
    #[error("failed to decode NTLM message: {0}")]
    Parsing(#[from] ParsingError),

    /// Our own NTLM message could not be encoded.
    #[error("failed to encode NTLM message: {0}")]
    Storing(#[from] StoringError),

    /// The server did not offer NTLM among its mechanisms.
    #[error("the server does not offer NTLM authentication")]
    MechanismNotOffered,

    /// The peer sent a token of a shape that does not fit the current step.
    #[error("unexpected negotiation token ({0})")]
    UnexpectedToken(&'static str),

    /// The peer's negotiation response carries no NTLM message.
    #[error("negotiation response carries no NTLM message")]
    MissingResponseToken,

    /// The NTLM message received is not a Challenge message.
    #[error("expected a Challenge message, obtained message type {0}")]
    NotAChallenge(u32),
}
