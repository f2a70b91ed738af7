//! The client side of an NTLM exchange, optionally carried inside SPNEGO.


use rand::{CryptoRng, RngCore};
use rand::rngs::OsRng;
use rasn::types::{ObjectIdentifier, OctetString};
use tracing::{debug, warn};

use crate::{Credentials, Flags};
use crate::crypto::{self, Role};
use crate::error::AuthError;
use crate::message::{AuthenticateMessage, ChallengeMessage, Message, MIC_LEN, NegotiateMessage, NtlmVersion};
use crate::response::{
    get_ntlm_time, respond_anonymous, respond_challenge_ntlm_v1, respond_challenge_ntlm_v1_extended,
    respond_challenge_ntlm_v2, ChallengeResponse, NtlmV2ClientChallenge,
};
use crate::spnego::{
    encode_mech_type_list, DecodeContext, NegTokenInit, NegTokenResp, NegotiationToken, NTLMSSP_OID,
};


/// The algorithm used to answer the server's challenge.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum AuthMethod {
    /// NTLMv1 with LM session keys.
    NtlmV1,

    /// NTLMv1 with extended session security (sometimes called NTLM2 session response).
    NtlmV1ExtendedSessionSecurity,

    #[default]
    NtlmV2,
}


/// Everything an [`NtlmClient`] needs to know up front.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AuthConfig {
    /// The credentials to authenticate with. Empty username and password mean anonymous.
    pub credentials: Credentials,

    /// The name of the client machine. Defaults to the local host name; may be empty.
    pub workstation: String,

    /// The service principal name of the server, placed into NTLMv2 responses.
    pub target_spn: Option<String>,

    pub method: AuthMethod,
}
impl AuthConfig {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            workstation: machine_name(),
            target_spn: None,
            method: AuthMethod::default(),
        }
    }

    pub fn with_workstation(mut self, workstation: impl Into<String>) -> Self {
        self.workstation = workstation.into();
        self
    }

    pub fn with_target_spn(mut self, target_spn: impl Into<String>) -> Self {
        self.target_spn = Some(target_spn.into());
        self
    }

    pub fn with_method(mut self, method: AuthMethod) -> Self {
        self.method = method;
        self
    }

    /// Whether these are the credentials of an anonymous login.
    pub fn is_anonymous(&self) -> bool {
        self.credentials.username.is_empty() && self.credentials.password.is_empty()
    }
}


/// The first label of the local host name, or nothing if it cannot be read.
fn machine_name() -> String {
    match hostname::get() {
        Ok(name) => name.to_string_lossy()
            .split('.')
            .next()
            .unwrap_or_default()
            .to_owned(),
        Err(e) => {
            debug!(error = %e, "failed to obtain host name");
            String::new()
        },
    }
}


enum State {
    AwaitingNegotiateBlob,
    AwaitingChallengeBlob { negotiate_bytes: Vec<u8> },
    Done { session_key: Vec<u8> },
    Failed,
}


/// Drives one NTLM authentication attempt.
///
/// The surrounding protocol hands every blob it receives from the server to [`NtlmClient::step`]
/// and sends back what it returns. The first call takes the server's initial SPNEGO token (or
/// nothing, if the server did not send one); the second call takes the server's challenge. Once
/// the second call succeeds, [`NtlmClient::session_key`] yields the key for signing and sealing.
///
/// A client is good for exactly one attempt; any error ends it.
pub struct NtlmClient<R = OsRng> {
    config: AuthConfig,
    rng: R,
    state: State,
}
impl NtlmClient<OsRng> {
    /// Creates a client drawing its nonces from the operating system.
    pub fn new(config: AuthConfig) -> Self {
        Self::with_rng(config, OsRng)
    }
}
impl<R: RngCore + CryptoRng> NtlmClient<R> {
    /// Creates a client drawing its nonces from `rng`.
    pub fn with_rng(config: AuthConfig, rng: R) -> Self {
        Self {
            config,
            rng,
            state: State::AwaitingNegotiateBlob,
        }
    }

    /// Processes a blob from the server and returns the blob to send back.
    ///
    /// # Panics
    ///
    /// Panics if the exchange has already completed or failed.
    pub fn step(&mut self, blob: &[u8]) -> Result<Vec<u8>, AuthError> {
        if matches!(self.state, State::Done { .. } | State::Failed) {
            panic!("NTLM client stepped after the exchange ended");
        }

        match std::mem::replace(&mut self.state, State::Failed) {
            State::AwaitingNegotiateBlob => {
                let (negotiate_bytes, output) = self.negotiate(blob)
                    .map_err(|e| {
                        warn!(error = %e, "failed to start NTLM exchange");
                        e
                    })?;
                self.state = State::AwaitingChallengeBlob { negotiate_bytes };
                Ok(output)
            },
            State::AwaitingChallengeBlob { negotiate_bytes } => {
                let (session_key, output) = self.authenticate(&negotiate_bytes, blob)
                    .map_err(|e| {
                        warn!(error = %e, "failed to answer NTLM challenge");
                        e
                    })?;
                self.state = State::Done { session_key };
                Ok(output)
            },
            State::Done { .. } | State::Failed => unreachable!(),
        }
    }

    /// The exported session key, once the exchange has completed.
    pub fn session_key(&self) -> Option<&[u8]> {
        match &self.state {
            State::Done { session_key } => Some(session_key),
            _ => None,
        }
    }

    fn negotiate(&mut self, blob: &[u8]) -> Result<(Vec<u8>, Vec<u8>), AuthError> {
        let enveloped = !blob.is_empty();
        if enveloped {
            let token = NegotiationToken::decode(blob, DecodeContext::ServerInitiated)?
                .ok_or(AuthError::UnexpectedToken("unrecognized initial token"))?;
            if let NegotiationToken::Response(_) = token {
                return Err(AuthError::UnexpectedToken("response where an initial token was expected"));
            }
            if !token.offers(NTLMSSP_OID) {
                return Err(AuthError::MechanismNotOffered);
            }
        }

        let negotiate_bytes = self.negotiate_message().to_bytes()?;
        debug!(blob_len = blob.len(), enveloped, method = ?self.config.method, "sending NTLM Negotiate message");

        let output = if enveloped {
            NegotiationToken::Init(NegTokenInit {
                mech_types: vec![ObjectIdentifier::from(NTLMSSP_OID)],
                mech_token: Some(OctetString::from(negotiate_bytes.clone())),
                ..NegTokenInit::default()
            }).to_bytes(true)?
        } else {
            negotiate_bytes.clone()
        };
        Ok((negotiate_bytes, output))
    }

    fn negotiate_message(&self) -> NegotiateMessage {
        let mut flags
            = Flags::NEGOTIATE_UNICODE
            | Flags::NEGOTIATE_OEM
            | Flags::NEGOTIATE_SIGN
            | Flags::NEGOTIATE_NTLM
            | Flags::NEGOTIATE_ALWAYS_SIGN
            | Flags::NEGOTIATE_128BIT
            | Flags::NEGOTIATE_56BIT
            ;
        if !self.config.is_anonymous() {
            flags |= Flags::NEGOTIATE_KEY_EXCHANGE;
        }
        flags |= self.session_security_flag();

        NegotiateMessage {
            flags,
            supplied_domain: self.config.credentials.domain.clone(),
            supplied_workstation: self.config.workstation.clone(),
            version: NtlmVersion::SERVER_2003,
        }
    }

    fn session_security_flag(&self) -> Flags {
        match self.config.method {
            AuthMethod::NtlmV1 => Flags::NEGOTIATE_LANMAN_KEY,
            AuthMethod::NtlmV1ExtendedSessionSecurity | AuthMethod::NtlmV2
                => Flags::NEGOTIATE_EXTENDED_SESSION_SECURITY,
        }
    }

    fn authenticate(&mut self, negotiate_bytes: &[u8], blob: &[u8]) -> Result<(Vec<u8>, Vec<u8>), AuthError> {
        // a SPNEGO reply is answered in kind
        let (challenge_bytes, enveloped) = match NegotiationToken::decode(blob, DecodeContext::Standard)? {
            Some(NegotiationToken::Response(NegTokenResp { response_token: Some(token), .. })) => (token.to_vec(), true),
            Some(NegotiationToken::Response(_)) => return Err(AuthError::MissingResponseToken),
            Some(_) => return Err(AuthError::UnexpectedToken("initial token where a response was expected")),
            None => (blob.to_vec(), false),
        };
        let challenge = match Message::try_from(challenge_bytes.as_slice())? {
            Message::Challenge(challenge) => challenge,
            other => return Err(AuthError::NotAChallenge(other.message_number())),
        };

        let anonymous = self.config.is_anonymous();
        let key_exchange = challenge.flags.contains(Flags::NEGOTIATE_KEY_EXCHANGE);
        debug!(
            blob_len = blob.len(),
            enveloped,
            anonymous,
            key_exchange,
            method = ?self.config.method,
            "answering NTLM challenge",
        );

        let mut flags
            = Flags::NEGOTIATE_SIGN
            | Flags::NEGOTIATE_NTLM
            | Flags::NEGOTIATE_ALWAYS_SIGN
            | Flags::NEGOTIATE_128BIT
            | Flags::NEGOTIATE_56BIT
            ;
        if challenge.flags.contains(Flags::NEGOTIATE_UNICODE) {
            flags |= Flags::NEGOTIATE_UNICODE;
        } else {
            flags |= Flags::NEGOTIATE_OEM;
        }
        flags |= self.session_security_flag();
        if anonymous {
            flags |= Flags::NEGOTIATE_ANONYMOUS;
        }

        let response = if anonymous {
            respond_anonymous()
        } else {
            self.respond(&challenge, flags)?
        };

        let (exported_session_key, encrypted_random_session_key) = if key_exchange {
            let mut random_session_key = [0u8; 16];
            self.rng.fill_bytes(&mut random_session_key);
            let encrypted = crypto::rc4(&response.key_exchange_key, &random_session_key);
            (random_session_key, encrypted)
        } else {
            (response.key_exchange_key, Vec::new())
        };

        let credentials = &self.config.credentials;
        let message = AuthenticateMessage {
            flags,
            lm_challenge_response: response.lm_response,
            nt_challenge_response: response.nt_response,
            domain_name: credentials.domain.clone(),
            user_name: credentials.username.clone(),
            workstation: self.config.workstation.clone(),
            encrypted_random_session_key,
            version: NtlmVersion::SERVER_2003,
            mic: Some([0u8; MIC_LEN]),
        };
        let mut authenticate_bytes = message.to_bytes()?;
        let mic = crypto::compute_mic(&exported_session_key, negotiate_bytes, &challenge_bytes, &authenticate_bytes);
        if let Some(mic_at) = message.mic_offset() {
            authenticate_bytes[mic_at..mic_at+MIC_LEN].copy_from_slice(&mic);
        }

        let output = if enveloped {
            let mech_list = encode_mech_type_list(&[ObjectIdentifier::from(NTLMSSP_OID)])?;
            let mech_list_mic = crypto::mech_list_mic(
                &crypto::sign_key(&exported_session_key, Role::Client),
                &crypto::seal_key(&exported_session_key, Role::Client),
                0,
                &mech_list,
            );
            NegotiationToken::Response(NegTokenResp {
                neg_state: None,
                supported_mech: None,
                response_token: Some(OctetString::from(authenticate_bytes)),
                mech_list_mic: Some(OctetString::copy_from_slice(&mech_list_mic)),
            }).to_bytes(false)?
        } else {
            authenticate_bytes
        };

        Ok((exported_session_key.to_vec(), output))
    }

    fn respond(&mut self, challenge: &ChallengeMessage, flags: Flags) -> Result<ChallengeResponse, AuthError> {
        let credentials = &self.config.credentials;
        let server_challenge = &challenge.server_challenge;
        let mut client_challenge = [0u8; 8];
        self.rng.fill_bytes(&mut client_challenge);

        let response = match self.config.method {
            AuthMethod::NtlmV1 => respond_challenge_ntlm_v1(server_challenge, credentials, flags),
            AuthMethod::NtlmV1ExtendedSessionSecurity
                => respond_challenge_ntlm_v1_extended(server_challenge, &client_challenge, credentials, flags),
            AuthMethod::NtlmV2 => {
                let structure = NtlmV2ClientChallenge::for_challenge(
                    challenge,
                    client_challenge,
                    get_ntlm_time(),
                    self.config.target_spn.as_deref(),
                );
                respond_challenge_ntlm_v2(server_challenge, &challenge.target_name, &structure, credentials)?
            },
        };
        Ok(response)
    }
}
