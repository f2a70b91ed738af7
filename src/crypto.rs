//! The cryptographic functions used by NTLM.
//!
//! All of them are pure and operate on fixed-length inputs; the legacy primitives (DES, MD4, RC4)
//! are only ever used in the constructions below.


use cipher::{BlockEncrypt, KeyInit, StreamCipher};
use cipher::consts::U16;
use cipher::generic_array::GenericArray;
use des::Des;
use digest::Digest;
use hmac::{Hmac, Mac};
use md4::Md4;
use md5::Md5;
use rc4::Rc4;

use crate::Flags;
use crate::oem::{encode_oem, encode_utf16le};


/// Which side of the connection a signing or sealing key protects.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Role {
    /// Messages from the client to the server.
    Client,

    /// Messages from the server to the client.
    Server,
}


fn hmac_md5(key: &[u8], parts: &[&[u8]]) -> [u8; 16] {
    let mut mac = <Hmac<Md5> as Mac>::new_from_slice(key)
        .expect("HMAC accepts keys of any length");
    for part in parts {
        mac.update(part);
    }
    mac.finalize().into_bytes().into()
}

fn md4(data: &[u8]) -> [u8; 16] {
    <Md4 as Digest>::digest(data).into()
}

fn md5(parts: &[&[u8]]) -> [u8; 16] {
    let mut state = <Md5 as Digest>::new();
    for part in parts {
        state.update(part);
    }
    state.finalize().into()
}


/// Spreads 56 key bits over eight bytes, leaving the lowest (parity) bit of each byte unset.
pub fn expand_des_key(key: &[u8; 7]) -> [u8; 8] {
    let expanded = [
        key[0] >> 1,
        ((key[0] & 0x01) << 6) | (key[1] >> 2),
        ((key[1] & 0x03) << 5) | (key[2] >> 3),
        ((key[2] & 0x07) << 4) | (key[3] >> 4),
        ((key[3] & 0x0F) << 3) | (key[4] >> 5),
        ((key[4] & 0x1F) << 2) | (key[5] >> 6),
        ((key[5] & 0x3F) << 1) | (key[6] >> 7),
        key[6] & 0x7F,
    ];
    expanded.map(|b| b << 1)
}

/// Encrypts a single block with DES under a 7-byte key.
pub fn des_encrypt(key: &[u8; 7], plaintext: &[u8; 8]) -> [u8; 8] {
    let des = Des::new(GenericArray::from_slice(&expand_des_key(key)));
    let mut block = GenericArray::clone_from_slice(plaintext);
    des.encrypt_block(&mut block);

    let mut ret = [0u8; 8];
    ret.copy_from_slice(block.as_slice());
    ret
}

fn seven(bytes: &[u8]) -> [u8; 7] {
    let mut ret = [0u8; 7];
    ret.copy_from_slice(&bytes[0..7]);
    ret
}

/// Encrypts `data` three times with DES, using consecutive 7-byte slices of `key` (the last one
/// zero-padded), and concatenates the results.
pub fn desl(key: &[u8; 16], data: &[u8; 8]) -> [u8; 24] {
    let third = [key[14], key[15], 0, 0, 0, 0, 0];

    let mut ret = [0u8; 24];
    ret[0..8].copy_from_slice(&des_encrypt(&seven(&key[0..7]), data));
    ret[8..16].copy_from_slice(&des_encrypt(&seven(&key[7..14]), data));
    ret[16..24].copy_from_slice(&des_encrypt(&third, data));
    ret
}


/// Derives the LanManager hash of a password.
///
/// The password is converted to uppercase, encoded as Latin-1 and truncated or
/// zero-padded to 14 bytes. Each 7-byte half is used as a DES key to encrypt "KGS!@#$%".
///
/// ```plain
///            ┌────────────┐  ┌───────────────┐  ┌─────────────┐
/// password ──┤ convert to ├──┤ encode using  ├──┤ truncate or ├──┐
///            │ uppercase  │  │ Latin-1       │  │ pad to 14 B │  │
///            └────────────┘  └───────────────┘  └─────────────┘  │
///           ┌────────────────────────────────────────────────────┘
///           │┌───────┐
///           └┤ split │           "KGS!@#$%"
///            └─┬───┬─┘               │ input
///         0..7 │   │ 7..14    key ┌──┴──┐ output
///              │   └──────────────┤ DES ├────────────┐
///              │                  └─────┘            │ 8..16
///              │                                  ┌──┴───┐
///              │                 "KGS!@#$%"       │ join ├──── key
///              │                     │ input      └──┬───┘
///              │              key ┌──┴──┐ output     │ 0..8
///              └──────────────────┤ DES ├────────────┘
///                                 └─────┘
/// ```
pub fn lmowf_v1(password: &str) -> [u8; 16] {
    const PLAINTEXT: [u8; 8] = *b"KGS!@#$%";

    // unencodable passwords are hashed as if empty
    let mut password_bytes = encode_oem(&password.to_uppercase())
        .unwrap_or_default();
    password_bytes.resize(14, 0x00);

    let mut ret = [0u8; 16];
    ret[0..8].copy_from_slice(&des_encrypt(&seven(&password_bytes[0..7]), &PLAINTEXT));
    ret[8..16].copy_from_slice(&des_encrypt(&seven(&password_bytes[7..14]), &PLAINTEXT));
    ret
}

/// Derives the NT hash of a password: MD4 over the password encoded as UTF-16LE.
pub fn ntowf_v1(password: &str) -> [u8; 16] {
    md4(&encode_utf16le(password))
}

/// Derives the NTLMv2 response key.
///
/// This is an HMAC-MD5 whose key is the NT hash of the password and whose message is the uppercase
/// username followed by the unchanged domain, both encoded as UTF-16LE.
pub fn ntowf_v2(password: &str, username: &str, domain: &str) -> [u8; 16] {
    let user_bytes = encode_utf16le(&username.to_uppercase());
    let domain_bytes = encode_utf16le(domain);
    hmac_md5(&ntowf_v1(password), &[&user_bytes[..], &domain_bytes[..]])
}

/// Derives the LMv2 response key, which is the same as the NTLMv2 one.
pub fn lmowf_v2(password: &str, username: &str, domain: &str) -> [u8; 16] {
    ntowf_v2(password, username, domain)
}


/// Calculates an NTLMv1 or LMv1 response from the respective hash.
pub fn v1_response(hash: &[u8; 16], server_challenge: &[u8; 8]) -> [u8; 24] {
    desl(hash, server_challenge)
}

/// Calculates the NTLMv1 response with extended session security.
///
/// The matching LM response is the client challenge followed by 16 zero bytes.
pub fn ess_response(nt_hash: &[u8; 16], server_challenge: &[u8; 8], client_challenge: &[u8; 8]) -> [u8; 24] {
    let digest = md5(&[&server_challenge[..], &client_challenge[..]]);
    let mut plaintext = [0u8; 8];
    plaintext.copy_from_slice(&digest[0..8]);
    desl(nt_hash, &plaintext)
}

/// Calculates the NTProofStr over the padded NTLMv2 client challenge structure.
pub fn nt_proof_str(response_key: &[u8; 16], server_challenge: &[u8; 8], client_structure: &[u8]) -> [u8; 16] {
    hmac_md5(response_key, &[&server_challenge[..], client_structure])
}

/// Calculates the LMv2 response.
pub fn lm_v2_response(response_key: &[u8; 16], server_challenge: &[u8; 8], client_challenge: &[u8; 8]) -> [u8; 24] {
    let mut ret = [0u8; 24];
    ret[0..16].copy_from_slice(&hmac_md5(response_key, &[&server_challenge[..], &client_challenge[..]]));
    ret[16..24].copy_from_slice(client_challenge);
    ret
}


/// The NTLMv1 session base key: the MD4 hash of the NT hash.
pub fn session_base_key_v1(nt_hash: &[u8; 16]) -> [u8; 16] {
    md4(nt_hash)
}

/// The NTLMv2 session base key.
pub fn session_base_key_v2(response_key: &[u8; 16], nt_proof_str: &[u8; 16]) -> [u8; 16] {
    hmac_md5(response_key, &[&nt_proof_str[..]])
}

/// Derives the NTLMv1 key exchange key.
///
/// `flags` are the flags of the Authenticate message. (With NTLMv2, the key exchange key is the
/// session base key.)
pub fn kx_key_v1(
    session_base_key: &[u8; 16],
    flags: Flags,
    lm_response: &[u8],
    server_challenge: &[u8; 8],
    lm_hash: &[u8; 16],
) -> [u8; 16] {
    let mut lm_head = [0u8; 8];
    let head_len = lm_response.len().min(8);
    lm_head[..head_len].copy_from_slice(&lm_response[..head_len]);

    if flags.contains(Flags::NEGOTIATE_EXTENDED_SESSION_SECURITY) {
        return hmac_md5(session_base_key, &[&server_challenge[..], &lm_head[..]]);
    }

    if flags.contains(Flags::NEGOTIATE_LANMAN_KEY) {
        let second = [lm_hash[7], 0xBD, 0xBD, 0xBD, 0xBD, 0xBD, 0xBD];
        let mut ret = [0u8; 16];
        ret[0..8].copy_from_slice(&des_encrypt(&seven(&lm_hash[0..7]), &lm_head));
        ret[8..16].copy_from_slice(&des_encrypt(&second, &lm_head));
        ret
    } else if flags.contains(Flags::REQUEST_NON_NT_SESSION_KEY) {
        let mut ret = [0u8; 16];
        ret[0..8].copy_from_slice(&lm_hash[0..8]);
        ret
    } else {
        *session_base_key
    }
}


/// Derives the signing key for messages sent by `role`.
pub fn sign_key(exported_session_key: &[u8], role: Role) -> [u8; 16] {
    let magic: &[u8] = match role {
        Role::Client => b"session key to client-to-server signing key magic constant\0",
        Role::Server => b"session key to server-to-client signing key magic constant\0",
    };
    md5(&[exported_session_key, magic])
}

/// Derives the sealing key for messages sent by `role`.
pub fn seal_key(exported_session_key: &[u8], role: Role) -> [u8; 16] {
    let magic: &[u8] = match role {
        Role::Client => b"session key to client-to-server sealing key magic constant\0",
        Role::Server => b"session key to server-to-client sealing key magic constant\0",
    };
    md5(&[exported_session_key, magic])
}


/// Calculates the message integrity code over the three messages of an exchange.
///
/// The MIC field of `authenticate` must be zeroed.
pub fn compute_mic(exported_session_key: &[u8], negotiate: &[u8], challenge: &[u8], authenticate: &[u8]) -> [u8; 16] {
    hmac_md5(exported_session_key, &[negotiate, challenge, authenticate])
}

/// Checks the MIC stored at `mic_offset` within `authenticate`.
///
/// Returns `false` if the message is too short to contain a MIC at that offset.
pub fn verify_mic(
    exported_session_key: &[u8],
    negotiate: &[u8],
    challenge: &[u8],
    authenticate: &[u8],
    mic_offset: usize,
) -> bool {
    let Some(expected) = authenticate.get(mic_offset..mic_offset+16) else {
        return false;
    };
    let mut zeroed = Vec::from(authenticate);
    zeroed[mic_offset..mic_offset+16].fill(0);

    let mut mac = <Hmac<Md5> as Mac>::new_from_slice(exported_session_key)
        .expect("HMAC accepts keys of any length");
    mac.update(negotiate);
    mac.update(challenge);
    mac.update(&zeroed);
    mac.verify_slice(expected).is_ok()
}

/// Calculates the signature of a message, as used for the negotiation mechanism list MIC.
///
/// The result is a version number (1), the first 8 bytes of the HMAC encrypted with RC4 under the
/// sealing key, and the sequence number.
pub fn mech_list_mic(sign_key: &[u8; 16], seal_key: &[u8; 16], sequence_number: u32, message: &[u8]) -> [u8; 16] {
    let seq = sequence_number.to_le_bytes();
    let digest = hmac_md5(sign_key, &[&seq[..], message]);

    let mut ret = [0u8; 16];
    ret[0..4].copy_from_slice(&[0x01, 0x00, 0x00, 0x00]);
    ret[4..12].copy_from_slice(&rc4(seal_key, &digest[0..8]));
    ret[12..16].copy_from_slice(&seq);
    ret
}

/// Encrypts (or decrypts) `data` with RC4.
pub fn rc4(key: &[u8; 16], data: &[u8]) -> Vec<u8> {
    let mut cipher = Rc4::<U16>::new(&(*key).into());
    let mut buf = Vec::from(data);
    cipher.apply_keystream(&mut buf);
    buf
}
