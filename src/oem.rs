//! Conversion between Rust strings and the OEM character set.
//!
//! SMB peers do not agree on a code page for the non-Unicode fields, so the OEM character set is
//! fixed to ISO 8859-1 (Latin-1) on every platform. Each byte maps onto the Unicode code point
//! of the same value.


use crate::error::{ParsingError, StoringError};


/// Decodes an OEM-encoded byte string into a Rust string.
///
/// Every byte sequence is valid Latin-1.
pub(crate) fn decode_oem(bytes: &[u8]) -> String {
    bytes.iter()
        .map(|&b| char::from(b))
        .collect()
}

/// Encodes a Rust string into the OEM character set.
///
/// Fails if the string contains characters beyond U+00FF.
pub(crate) fn encode_oem(string: &str) -> Result<Vec<u8>, StoringError> {
    string.chars()
        .map(|c| u8::try_from(c).ok())
        .collect::<Option<Vec<u8>>>()
        .ok_or_else(|| StoringError::NonOemEncodable { string: string.to_owned() })
}

/// Encodes a Rust string as UTF-16 in little-endian byte order, without a Byte Order Mark.
pub(crate) fn encode_utf16le(string: &str) -> Vec<u8> {
    string.encode_utf16()
        .flat_map(|w| w.to_le_bytes())
        .collect()
}

/// Decodes UTF-16 values stored as bytes in little-endian format into a string.
pub(crate) fn decode_utf16le(bytes: &[u8]) -> Result<String, ParsingError> {
    if bytes.len() % 2 != 0 {
        return Err(ParsingError::OddUtf16Length { obtained_length: bytes.len() });
    }
    let words: Vec<u16> = bytes.chunks_exact(2)
        .map(|chunk| u16::from_le_bytes([chunk[0], chunk[1]]))
        .collect();
    String::from_utf16(&words)
        .map_err(|_| ParsingError::InvalidUtf16 { value: words })
}
