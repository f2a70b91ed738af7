//! Calculation of the responses to a server challenge.


use chrono::{DateTime, Utc};

use crate::Credentials;
use crate::av_pair::{AvFlags, AvId, AvPair, decode_av_pairs, encode_av_pairs};
use crate::crypto;
use crate::error::{ParsingError, StoringError};
use crate::message::ChallengeMessage;
use crate::Flags;


/// Seconds between 1601-01-01 (the Windows epoch) and 1970-01-01 (the Unix epoch).
const WINDOWS_TO_UNIX_EPOCH_SECS: i64 = 11_644_473_600;


/// Converts a point in time into an NTLM timestamp (tenths of a microsecond since 1601-01-01).
pub fn ntlm_time(at: DateTime<Utc>) -> u64 {
    let secs = u64::try_from(at.timestamp() + WINDOWS_TO_UNIX_EPOCH_SECS)
        .unwrap_or(0);
    secs * 10_000_000 + u64::from(at.timestamp_subsec_nanos() / 100)
}

/// Obtains the current NTLM timestamp.
pub fn get_ntlm_time() -> u64 {
    ntlm_time(Utc::now())
}


/// The responses to a challenge along with the keys derived while calculating them.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ChallengeResponse {
    /// The LanManager (LM) response.
    pub lm_response: Vec<u8>,

    /// The NT LanManager (NTLM) response.
    pub nt_response: Vec<u8>,

    pub session_base_key: [u8; 16],

    /// The key that is either exported directly or used to encrypt a random session key.
    pub key_exchange_key: [u8; 16],
}


/// The structure an NTLMv2 client hashes together with the server challenge.
///
/// It is transmitted as part of the NTLMv2 response, following the NTProofStr.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct NtlmV2ClientChallenge {
    /// When the response was calculated, as an NTLM timestamp.
    pub timestamp: u64,

    pub client_challenge: [u8; 8],

    /// Target information, usually the server's sequence with the client's additions.
    pub av_pairs: Vec<AvPair>,
}
impl NtlmV2ClientChallenge {
    /// The response version and the highest response version understood by the client.
    pub const STRUCTURE_VERSION: u8 = 0x01;

    /// Length of the fixed part, preceding the AV pairs.
    const HEADER_LEN: usize = 28;

    /// Length of the smallest valid structure (no AV pairs besides the terminator).
    pub const MIN_LEN: usize = Self::HEADER_LEN + 4;

    /// Builds the structure answering `challenge`.
    ///
    /// The server's target information is echoed. If the server sent a timestamp, it replaces
    /// `local_time` and the AV flags announce a MIC. A non-empty `target_spn` is appended as the
    /// target name.
    pub fn for_challenge(
        challenge: &ChallengeMessage,
        client_challenge: [u8; 8],
        local_time: u64,
        target_spn: Option<&str>,
    ) -> Self {
        let mut av_pairs = challenge.target_info.clone();

        let timestamp = match challenge.timestamp() {
            Some(server_time) => {
                match av_pairs.iter_mut().find(|p| p.id == AvId::Flags) {
                    Some(pair) => {
                        let flags = pair.as_flags().unwrap_or_default() | AvFlags::MIC_PRESENT;
                        *pair = AvPair::from_flags(flags);
                    },
                    None => av_pairs.push(AvPair::from_flags(AvFlags::MIC_PRESENT)),
                }
                server_time
            },
            None => local_time,
        };

        if let Some(spn) = target_spn.filter(|s| !s.is_empty()) {
            av_pairs.push(AvPair::from_string(AvId::TargetName, spn));
        }

        Self {
            timestamp,
            client_challenge,
            av_pairs,
        }
    }

    /// Serializes the structure as it is transmitted.
    pub fn to_bytes(&self) -> Result<Vec<u8>, StoringError> {
        let mut ret = Vec::with_capacity(Self::MIN_LEN);
        ret.push(Self::STRUCTURE_VERSION);
        ret.push(Self::STRUCTURE_VERSION);
        ret.extend_from_slice(&[0u8; 6]);
        ret.extend_from_slice(&self.timestamp.to_le_bytes());
        ret.extend_from_slice(&self.client_challenge);
        ret.extend_from_slice(&[0u8; 4]);
        ret.extend_from_slice(&encode_av_pairs(&self.av_pairs)?);
        Ok(ret)
    }

    /// Serializes the structure followed by four zero bytes, which is what enters the NTProofStr.
    pub fn to_bytes_padded(&self) -> Result<Vec<u8>, StoringError> {
        let mut ret = self.to_bytes()?;
        ret.extend_from_slice(&[0u8; 4]);
        Ok(ret)
    }

    /// Attempts to deserialize the structure from the bytes following the NTProofStr.
    pub fn try_from_bytes(bytes: &[u8]) -> Result<Self, ParsingError> {
        if bytes.len() < Self::MIN_LEN {
            return Err(ParsingError::ItemMinLengthMismatch { expected_at_least: Self::MIN_LEN, obtained: bytes.len() });
        }

        let mut timestamp = [0u8; 8];
        timestamp.copy_from_slice(&bytes[8..16]);
        let mut client_challenge = [0u8; 8];
        client_challenge.copy_from_slice(&bytes[16..24]);

        Ok(Self {
            timestamp: u64::from_le_bytes(timestamp),
            client_challenge,
            av_pairs: decode_av_pairs(&bytes[Self::HEADER_LEN..])?,
        })
    }
}


/// Whether an LM response has the shape used with NTLMv1 extended session security: an 8-byte
/// client challenge (not all zeroes) followed by 16 zero bytes.
pub fn is_ntlm_v1_extended_session_security(lm_response: &[u8]) -> bool {
    lm_response.len() == 24
        && lm_response[0..8].iter().any(|&b| b != 0)
        && lm_response[8..24].iter().all(|&b| b == 0)
}

/// Whether an NT response is an NTLMv2 response (as opposed to a 24-byte NTLMv1 one).
pub fn is_ntlm_v2_response(nt_response: &[u8]) -> bool {
    nt_response.len() >= 16 + NtlmV2ClientChallenge::MIN_LEN
        && nt_response[16] == NtlmV2ClientChallenge::STRUCTURE_VERSION
        && nt_response[17] == NtlmV2ClientChallenge::STRUCTURE_VERSION
}


/// The responses for anonymous authentication: a single zero byte as the LM response, an empty NT
/// response and all-zero keys.
pub fn respond_anonymous() -> ChallengeResponse {
    ChallengeResponse {
        lm_response: vec![0x00],
        nt_response: Vec::new(),
        session_base_key: [0; 16],
        key_exchange_key: [0; 16],
    }
}

/// Calculates an NTLMv1 response to the given server challenge.
///
/// An LMv1 response is also included. `flags` are those of the Authenticate message; they select
/// how the key exchange key is derived.
pub fn respond_challenge_ntlm_v1(server_challenge: &[u8; 8], creds: &Credentials, flags: Flags) -> ChallengeResponse {
    let nt_hash = crypto::ntowf_v1(&creds.password);
    let lm_hash = crypto::lmowf_v1(&creds.password);

    let nt_response = crypto::v1_response(&nt_hash, server_challenge);
    let lm_response = crypto::v1_response(&lm_hash, server_challenge);

    let session_base_key = crypto::session_base_key_v1(&nt_hash);
    let key_exchange_key = crypto::kx_key_v1(&session_base_key, flags, &lm_response, server_challenge, &lm_hash);

    ChallengeResponse {
        lm_response: Vec::from(lm_response),
        nt_response: Vec::from(nt_response),
        session_base_key,
        key_exchange_key,
    }
}

/// Calculates an NTLMv1 response with extended session security.
///
/// The LM response field contains the client challenge, which has also influenced the calculation
/// of the NT response.
pub fn respond_challenge_ntlm_v1_extended(
    server_challenge: &[u8; 8],
    client_challenge: &[u8; 8],
    creds: &Credentials,
    flags: Flags,
) -> ChallengeResponse {
    let nt_hash = crypto::ntowf_v1(&creds.password);
    let lm_hash = crypto::lmowf_v1(&creds.password);

    let nt_response = crypto::ess_response(&nt_hash, server_challenge, client_challenge);
    let mut lm_response = vec![0u8; 24];
    lm_response[0..8].copy_from_slice(client_challenge);

    let session_base_key = crypto::session_base_key_v1(&nt_hash);
    let key_exchange_key = crypto::kx_key_v1(
        &session_base_key,
        flags | Flags::NEGOTIATE_EXTENDED_SESSION_SECURITY,
        &lm_response,
        server_challenge,
        &lm_hash,
    );

    ChallengeResponse {
        lm_response,
        nt_response: Vec::from(nt_response),
        session_base_key,
        key_exchange_key,
    }
}

/// Calculates an NTLMv2 response to the given server challenge.
///
/// The NT response is the NTProofStr followed by the padded client challenge structure; the LM
/// response is the LMv2 response over the same client challenge.
///
/// The NT response key is keyed on the domain of the credentials, the LM response key on the
/// target name from the server's Challenge message.
pub fn respond_challenge_ntlm_v2(
    server_challenge: &[u8; 8],
    target_name: &str,
    client_structure: &NtlmV2ClientChallenge,
    creds: &Credentials,
) -> Result<ChallengeResponse, StoringError> {
    let structure_bytes = client_structure.to_bytes_padded()?;

    let response_key_nt = crypto::ntowf_v2(&creds.password, &creds.username, &creds.domain);
    let response_key_lm = crypto::lmowf_v2(&creds.password, &creds.username, target_name);

    let nt_proof_str = crypto::nt_proof_str(&response_key_nt, server_challenge, &structure_bytes);
    let mut nt_response = Vec::with_capacity(16 + structure_bytes.len());
    nt_response.extend_from_slice(&nt_proof_str);
    nt_response.extend_from_slice(&structure_bytes);

    let lm_response = crypto::lm_v2_response(&response_key_lm, server_challenge, &client_structure.client_challenge);

    let session_base_key = crypto::session_base_key_v2(&response_key_nt, &nt_proof_str);

    Ok(ChallengeResponse {
        lm_response: Vec::from(lm_response),
        nt_response,
        session_base_key,
        key_exchange_key: session_base_key,
    })
}
