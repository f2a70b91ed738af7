use rand::SeedableRng;
use rand::rngs::StdRng;
use rasn::types::{ObjectIdentifier, OctetString, Oid};

use smbntlm::crypto::{self, Role};
use smbntlm::spnego::{
    encode_mech_type_list, DecodeContext, NegState, NegTokenInit2, NegTokenResp, NegotiationToken,
    NTLMSSP_OID,
};
use smbntlm::{
    AuthConfig, AuthError, AuthMethod, AuthenticateMessage, AvFlags, AvId, AvPair, ChallengeMessage,
    Credentials, Flags, NegotiateMessage, NtlmClient, NtlmV2ClientChallenge, NtlmVersion,
    ParsingError, find_av_pair, is_ntlm_v1_extended_session_security, is_ntlm_v2_response,
};


const SERVER_CHALLENGE: [u8; 8] = [0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef];
const SERVER_TIME: u64 = 0x01d7_4b3c_8e2a_1f00;


fn credentials() -> Credentials {
    Credentials {
        username: "User".to_owned(),
        password: "Password".to_owned(),
        domain: "Domain".to_owned(),
    }
}

fn anonymous() -> Credentials {
    Credentials {
        username: String::new(),
        password: String::new(),
        domain: String::new(),
    }
}

fn client(config: AuthConfig) -> NtlmClient<StdRng> {
    NtlmClient::with_rng(config, StdRng::seed_from_u64(0x5eed))
}

fn server_challenge(flags: Flags) -> Vec<u8> {
    ChallengeMessage {
        flags,
        target_name: "DOMAIN".to_owned(),
        server_challenge: SERVER_CHALLENGE,
        target_info: vec![
            AvPair::from_string(AvId::NbDomainName, "DOMAIN"),
            AvPair::from_string(AvId::NbComputerName, "SERVER"),
            AvPair::from_string(AvId::DnsDomainName, "domain.example"),
            AvPair::from_string(AvId::DnsComputerName, "server.domain.example"),
            AvPair { id: AvId::Timestamp, value: SERVER_TIME.to_le_bytes().to_vec() },
        ],
        version: NtlmVersion::new(10, 0, 20348, 15),
    }.to_bytes().unwrap()
}

fn default_server_flags() -> Flags {
    Flags::NEGOTIATE_UNICODE
        | Flags::NEGOTIATE_SIGN
        | Flags::NEGOTIATE_NTLM
        | Flags::NEGOTIATE_ALWAYS_SIGN
        | Flags::TARGET_TYPE_DOMAIN
        | Flags::NEGOTIATE_EXTENDED_SESSION_SECURITY
        | Flags::NEGOTIATE_128BIT
        | Flags::NEGOTIATE_KEY_EXCHANGE
        | Flags::NEGOTIATE_56BIT
}


#[test]
fn bare_ntlm_v2() {
    let config = AuthConfig::new(credentials())
        .with_workstation("COMPUTER")
        .with_target_spn("cifs/server.domain.example");
    let mut client = client(config);

    let negotiate_bytes = client.step(&[]).unwrap();
    let negotiate = NegotiateMessage::try_from(negotiate_bytes.as_slice()).unwrap();
    assert_eq!(negotiate.supplied_domain, "Domain");
    assert_eq!(negotiate.supplied_workstation, "COMPUTER");

    let challenge_bytes = server_challenge(default_server_flags());
    let authenticate_bytes = client.step(&challenge_bytes).unwrap();
    let authenticate = AuthenticateMessage::try_from(authenticate_bytes.as_slice()).unwrap();

    assert!(authenticate.flags.contains(Flags::NEGOTIATE_UNICODE | Flags::NEGOTIATE_EXTENDED_SESSION_SECURITY));
    assert!(!authenticate.flags.contains(Flags::NEGOTIATE_ANONYMOUS));
    assert_eq!(authenticate.user_name, "User");
    assert_eq!(authenticate.domain_name, "Domain");
    assert_eq!(authenticate.workstation, "COMPUTER");
    assert_eq!(authenticate.version, NtlmVersion::SERVER_2003);

    // the NT response proves knowledge of the password
    let nt = &authenticate.nt_challenge_response;
    assert!(is_ntlm_v2_response(nt));
    let response_key = crypto::ntowf_v2("Password", "User", "Domain");
    let nt_proof = crypto::nt_proof_str(&response_key, &SERVER_CHALLENGE, &nt[16..]);
    assert_eq!(&nt[..16], &nt_proof[..]);

    // the structure echoes the server's target info, its timestamp and our SPN
    let structure = NtlmV2ClientChallenge::try_from_bytes(&nt[16..]).unwrap();
    assert_eq!(structure.timestamp, SERVER_TIME);
    assert_eq!(
        find_av_pair(&structure.av_pairs, AvId::TargetName).unwrap().value_string().unwrap(),
        "cifs/server.domain.example",
    );
    assert_eq!(
        find_av_pair(&structure.av_pairs, AvId::Flags).and_then(|p| p.as_flags()),
        Some(AvFlags::MIC_PRESENT),
    );
    assert!(authenticate.mic_flag_set());

    // the LMv2 response is keyed on the server's target name, not the configured domain
    let lm_key = crypto::lmowf_v2("Password", "User", "DOMAIN");
    let lm = crypto::lm_v2_response(&lm_key, &SERVER_CHALLENGE, &structure.client_challenge);
    assert_eq!(authenticate.lm_challenge_response, lm.to_vec());

    // the random session key travels encrypted under the key exchange key
    let key_exchange_key = crypto::session_base_key_v2(&response_key, &nt_proof);
    assert_eq!(authenticate.encrypted_random_session_key.len(), 16);
    let session_key = client.session_key().unwrap();
    assert_eq!(crypto::rc4(&key_exchange_key, &authenticate.encrypted_random_session_key), session_key);

    let mic_offset = authenticate.mic_offset().unwrap();
    assert_eq!(mic_offset, 72);
    assert!(crypto::verify_mic(session_key, &negotiate_bytes, &challenge_bytes, &authenticate_bytes, mic_offset));
    assert!(!crypto::verify_mic(session_key, &negotiate_bytes, &challenge_bytes[1..], &authenticate_bytes, mic_offset));
}

#[test]
fn spnego_ntlm_v2() {
    let server_init = NegotiationToken::Init2(NegTokenInit2 {
        mech_types: vec![
            ObjectIdentifier::from(Oid::const_new(&[1, 2, 840, 48018, 1, 2, 2])),
            ObjectIdentifier::from(NTLMSSP_OID),
        ],
        ..NegTokenInit2::default()
    }).to_bytes(true).unwrap();

    let mut client = client(AuthConfig::new(credentials()));
    let client_init = client.step(&server_init).unwrap();
    assert_eq!(client_init[0], 0x60);
    let negotiate_bytes = match NegotiationToken::decode(&client_init, DecodeContext::Standard).unwrap() {
        Some(NegotiationToken::Init(init)) => {
            assert_eq!(init.mech_types, vec![ObjectIdentifier::from(NTLMSSP_OID)]);
            init.mech_token.unwrap().to_vec()
        },
        other => panic!("unexpected token {:?}", other),
    };
    NegotiateMessage::try_from(negotiate_bytes.as_slice()).unwrap();

    let challenge_bytes = server_challenge(default_server_flags());
    let server_response = NegotiationToken::Response(NegTokenResp {
        neg_state: Some(NegState::AcceptIncomplete),
        supported_mech: Some(ObjectIdentifier::from(NTLMSSP_OID)),
        response_token: Some(OctetString::from(challenge_bytes.clone())),
        mech_list_mic: None,
    }).to_bytes(false).unwrap();

    let client_response = client.step(&server_response).unwrap();
    assert_eq!(client_response[0], 0xa1);
    let response = match NegotiationToken::decode(&client_response, DecodeContext::Standard).unwrap() {
        Some(NegotiationToken::Response(response)) => response,
        other => panic!("unexpected token {:?}", other),
    };
    let authenticate_bytes = response.response_token.unwrap().to_vec();
    let authenticate = AuthenticateMessage::try_from(authenticate_bytes.as_slice()).unwrap();

    let session_key = client.session_key().unwrap();
    assert!(crypto::verify_mic(
        session_key,
        &negotiate_bytes,
        &challenge_bytes,
        &authenticate_bytes,
        authenticate.mic_offset().unwrap(),
    ));

    let expected_mech_list_mic = crypto::mech_list_mic(
        &crypto::sign_key(session_key, Role::Client),
        &crypto::seal_key(session_key, Role::Client),
        0,
        &encode_mech_type_list(&[ObjectIdentifier::from(NTLMSSP_OID)]).unwrap(),
    );
    assert_eq!(response.mech_list_mic.unwrap().to_vec(), expected_mech_list_mic.to_vec());
}

#[test]
fn v1_extended_without_key_exchange() {
    let config = AuthConfig::new(credentials())
        .with_method(AuthMethod::NtlmV1ExtendedSessionSecurity);
    let mut client = client(config);
    client.step(&[]).unwrap();

    let challenge_bytes = server_challenge(default_server_flags() - Flags::NEGOTIATE_KEY_EXCHANGE);
    let authenticate_bytes = client.step(&challenge_bytes).unwrap();
    let authenticate = AuthenticateMessage::try_from(authenticate_bytes.as_slice()).unwrap();

    let lm = &authenticate.lm_challenge_response;
    assert!(is_ntlm_v1_extended_session_security(lm));
    let mut client_challenge = [0u8; 8];
    client_challenge.copy_from_slice(&lm[0..8]);

    let nt_hash = crypto::ntowf_v1("Password");
    assert_eq!(
        authenticate.nt_challenge_response,
        crypto::ess_response(&nt_hash, &SERVER_CHALLENGE, &client_challenge).to_vec(),
    );

    assert!(authenticate.encrypted_random_session_key.is_empty());
    let key_exchange_key = crypto::kx_key_v1(
        &crypto::session_base_key_v1(&nt_hash),
        authenticate.flags,
        lm,
        &SERVER_CHALLENGE,
        &crypto::lmowf_v1("Password"),
    );
    assert_eq!(client.session_key(), Some(&key_exchange_key[..]));
}

#[test]
fn v1_with_oem_server() {
    let config = AuthConfig::new(credentials())
        .with_workstation("COMPUTER")
        .with_method(AuthMethod::NtlmV1);
    let mut client = client(config);
    client.step(&[]).unwrap();

    let flags = (default_server_flags() - Flags::NEGOTIATE_UNICODE - Flags::NEGOTIATE_EXTENDED_SESSION_SECURITY)
        | Flags::NEGOTIATE_OEM
        | Flags::NEGOTIATE_LANMAN_KEY;
    let authenticate_bytes = client.step(&server_challenge(flags)).unwrap();
    let authenticate = AuthenticateMessage::try_from(authenticate_bytes.as_slice()).unwrap();

    assert!(authenticate.flags.contains(Flags::NEGOTIATE_OEM | Flags::NEGOTIATE_LANMAN_KEY));
    assert!(!authenticate.flags.contains(Flags::NEGOTIATE_UNICODE));
    assert_eq!(authenticate.user_name, "User");
    assert!(authenticate_bytes.windows(8).any(|w| w == b"COMPUTER"));

    assert_eq!(
        authenticate.nt_challenge_response,
        crypto::v1_response(&crypto::ntowf_v1("Password"), &SERVER_CHALLENGE).to_vec(),
    );
    assert_eq!(
        authenticate.lm_challenge_response,
        crypto::v1_response(&crypto::lmowf_v1("Password"), &SERVER_CHALLENGE).to_vec(),
    );
    assert!(!authenticate.mic_flag_set());
    assert_eq!(authenticate.encrypted_random_session_key.len(), 16);
}

#[test]
fn anonymous_with_every_method() {
    for method in [AuthMethod::NtlmV1, AuthMethod::NtlmV1ExtendedSessionSecurity, AuthMethod::NtlmV2] {
        let mut client = client(AuthConfig::new(anonymous()).with_method(method));
        let negotiate_bytes = client.step(&[]).unwrap();
        let negotiate = NegotiateMessage::try_from(negotiate_bytes.as_slice()).unwrap();
        assert!(!negotiate.flags.contains(Flags::NEGOTIATE_KEY_EXCHANGE));

        let authenticate_bytes = client.step(&server_challenge(default_server_flags())).unwrap();
        let authenticate = AuthenticateMessage::try_from(authenticate_bytes.as_slice()).unwrap();
        assert!(authenticate.flags.contains(Flags::NEGOTIATE_ANONYMOUS));
        assert_eq!(authenticate.lm_challenge_response, vec![0x00]);
        assert!(authenticate.nt_challenge_response.is_empty());

        // the server still asked for key exchange; the key exchange key is all zeroes
        assert_eq!(
            crypto::rc4(&[0u8; 16], &authenticate.encrypted_random_session_key),
            client.session_key().unwrap(),
        );
    }
}

#[test]
fn step_two_rejects_other_messages() {
    let mut client = client(AuthConfig::new(credentials()));
    let negotiate_bytes = client.step(&[]).unwrap();
    assert_eq!(client.step(&negotiate_bytes), Err(AuthError::NotAChallenge(1)));
    assert_eq!(client.session_key(), None);
}

#[test]
fn step_two_rejects_empty_response() {
    let mut client = client(AuthConfig::new(credentials()));
    client.step(&[]).unwrap();
    let reject = NegotiationToken::Response(NegTokenResp {
        neg_state: Some(NegState::Reject),
        ..NegTokenResp::default()
    }).to_bytes(false).unwrap();
    assert_eq!(client.step(&reject), Err(AuthError::MissingResponseToken));
}

#[test]
fn step_two_rejects_garbage() {
    let mut client = client(AuthConfig::new(credentials()));
    client.step(&[]).unwrap();
    assert_eq!(
        client.step(b"HTTP/1.1 401 Unauthorized"),
        Err(AuthError::Parsing(ParsingError::MagicMismatch {
            expected: *b"NTLMSSP\0",
            obtained: b"HTTP/1.1".to_vec(),
        })),
    );
}
