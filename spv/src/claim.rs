//! Stateless borrower-claim tokens and the dual-signature message.
//!
//! No server-side session storage: the claim state travels inside an
//! HMAC-signed token binding `(borrower, btc_address, nonce, chain_id,
//! iat, exp)`. Both the Bitcoin and the EVM wallet sign the canonical
//! message recomposed from the verified token, never from user input.

use std::time::{SystemTime, UNIX_EPOCH};

use alloy_primitives::{Address, Signature};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Clock-skew allowance for freshly issued tokens.
const MAX_CLOCK_SKEW_SECS: u64 = 60;
/// Floor on a token's lifetime.
const MIN_TTL_SECS: u64 = 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClaimError {
    #[error("invalid claim token: {0}")]
    TokenBad(&'static str),
    #[error("claim token expired")]
    TokenExpired,
    #[error("EVM signature does not match the claimed borrower")]
    EvmSignatureMismatch,
}

/// The signed token payload. Field order is the sorted key order so the
/// serialized JSON is deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimPayload {
    pub borrower: String,
    pub btc_address: String,
    pub chain_id: u64,
    pub exp: u64,
    pub iat: u64,
    pub nonce: String,
    pub v: u32,
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// The canonical message both wallets sign. One trailing newline; the
/// exact byte string must never change.
pub fn build_claim_message(payload: &ClaimPayload) -> String {
    format!(
        "HashCredit Borrower Claim\n\
         Borrower EVM: {}\n\
         BTC Address: {}\n\
         Nonce: {}\n\
         Chain ID: {}\n\
         Issued At: {}\n\
         Expires At: {}\n",
        payload.borrower,
        payload.btc_address,
        payload.nonce,
        payload.chain_id,
        payload.iat,
        payload.exp,
    )
}

fn hmac_tag(secret: &str, body: &[u8]) -> Vec<u8> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(body);
    mac.finalize().into_bytes().to_vec()
}

/// Issue a claim token valid for `max(60, ttl_seconds)` from now.
pub fn issue_claim_token(
    secret: &str,
    borrower: &str,
    btc_address: &str,
    chain_id: u64,
    ttl_seconds: u64,
) -> (String, ClaimPayload) {
    let mut nonce = [0u8; 16];
    OsRng.fill_bytes(&mut nonce);

    let now = unix_now();
    let payload = ClaimPayload {
        borrower: borrower.to_string(),
        btc_address: btc_address.to_string(),
        chain_id,
        exp: now + ttl_seconds.max(MIN_TTL_SECS),
        iat: now,
        nonce: URL_SAFE_NO_PAD.encode(nonce),
        v: 1,
    };

    let body = serde_json::to_vec(&payload).expect("claim payload serializes");
    let tag = hmac_tag(secret, &body);
    let token = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(&body),
        URL_SAFE_NO_PAD.encode(tag)
    );
    (token, payload)
}

/// Verify a token's MAC and window, returning its payload.
pub fn verify_claim_token(secret: &str, token: &str, now: u64) -> Result<ClaimPayload, ClaimError> {
    let (body_b64, tag_b64) = token
        .split_once('.')
        .ok_or(ClaimError::TokenBad("malformed token"))?;
    let body = URL_SAFE_NO_PAD
        .decode(body_b64.trim_end_matches('='))
        .map_err(|_| ClaimError::TokenBad("malformed token"))?;
    let tag = URL_SAFE_NO_PAD
        .decode(tag_b64.trim_end_matches('='))
        .map_err(|_| ClaimError::TokenBad("malformed token"))?;

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(&body);
    mac.verify_slice(&tag)
        .map_err(|_| ClaimError::TokenBad("bad signature"))?;

    let payload: ClaimPayload =
        serde_json::from_slice(&body).map_err(|_| ClaimError::TokenBad("malformed payload"))?;
    if payload.v != 1 {
        return Err(ClaimError::TokenBad("unsupported version"));
    }
    if payload.exp < now {
        return Err(ClaimError::TokenExpired);
    }
    if payload.iat > now + MAX_CLOCK_SKEW_SECS {
        return Err(ClaimError::TokenBad("issued in the future"));
    }
    Ok(payload)
}

/// Recover the `personal_sign` signer of `message` and require it to be
/// `expected_borrower`.
pub fn verify_evm_signature(
    message: &str,
    signature_hex: &str,
    expected_borrower: Address,
) -> Result<Address, ClaimError> {
    let raw = hex::decode(signature_hex.trim_start_matches("0x"))
        .map_err(|_| ClaimError::EvmSignatureMismatch)?;
    let signature =
        Signature::from_raw(&raw).map_err(|_| ClaimError::EvmSignatureMismatch)?;
    let recovered = signature
        .recover_address_from_msg(message.as_bytes())
        .map_err(|_| ClaimError::EvmSignatureMismatch)?;
    if recovered != expected_borrower {
        return Err(ClaimError::EvmSignatureMismatch);
    }
    Ok(recovered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_signer::SignerSync;
    use alloy_signer_local::PrivateKeySigner;

    const SECRET: &str = "test-secret";
    const BORROWER: &str = "0x0000000000000000000000000000000000000001";
    const BTC_ADDR: &str = "tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx";

    fn issue() -> (String, ClaimPayload) {
        issue_claim_token(SECRET, BORROWER, BTC_ADDR, 102_031, 120)
    }

    #[test]
    fn token_round_trip() {
        let (token, payload) = issue();
        assert!(token.contains('.'));
        assert_eq!(payload.exp - payload.iat, 120);

        let verified = verify_claim_token(SECRET, &token, payload.iat + 1).unwrap();
        assert_eq!(verified, payload);
    }

    #[test]
    fn ttl_floor_is_sixty_seconds() {
        let (_, payload) = issue_claim_token(SECRET, BORROWER, BTC_ADDR, 102_031, 5);
        assert_eq!(payload.exp - payload.iat, 60);
    }

    #[test]
    fn payload_json_is_sorted_and_compact() {
        let payload = ClaimPayload {
            borrower: BORROWER.into(),
            btc_address: BTC_ADDR.into(),
            chain_id: 102_031,
            exp: 1_700_000_120,
            iat: 1_700_000_000,
            nonce: "abc".into(),
            v: 1,
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert_eq!(
            json,
            format!(
                "{{\"borrower\":\"{BORROWER}\",\"btc_address\":\"{BTC_ADDR}\",\
                 \"chain_id\":102031,\"exp\":1700000120,\"iat\":1700000000,\
                 \"nonce\":\"abc\",\"v\":1}}"
            )
        );
    }

    #[test]
    fn rejects_wrong_secret() {
        let (token, payload) = issue();
        assert_eq!(
            verify_claim_token("other-secret", &token, payload.iat + 1).unwrap_err(),
            ClaimError::TokenBad("bad signature")
        );
    }

    #[test]
    fn rejects_tampered_mac() {
        let (token, payload) = issue();
        let (body, tag) = token.split_once('.').unwrap();
        let mut raw_tag = URL_SAFE_NO_PAD.decode(tag).unwrap();
        raw_tag[0] ^= 0x01;
        let tampered = format!("{body}.{}", URL_SAFE_NO_PAD.encode(raw_tag));
        assert_eq!(
            verify_claim_token(SECRET, &tampered, payload.iat + 1).unwrap_err(),
            ClaimError::TokenBad("bad signature")
        );
    }

    #[test]
    fn rejects_expired_and_future_tokens() {
        let (token, payload) = issue();
        assert_eq!(
            verify_claim_token(SECRET, &token, payload.exp + 1).unwrap_err(),
            ClaimError::TokenExpired
        );
        // issued "in the future" relative to a rewound clock
        assert_eq!(
            verify_claim_token(SECRET, &token, payload.iat.saturating_sub(61)).unwrap_err(),
            ClaimError::TokenBad("issued in the future")
        );
    }

    #[test]
    fn claim_message_layout() {
        let (_, payload) = issue();
        let msg = build_claim_message(&payload);
        assert!(msg.starts_with("HashCredit Borrower Claim\n"));
        assert!(msg.contains(&format!("Borrower EVM: {BORROWER}\n")));
        assert!(msg.contains(&format!("BTC Address: {BTC_ADDR}\n")));
        assert!(msg.ends_with(&format!("Expires At: {}\n", payload.exp)));
        assert_eq!(msg.lines().count(), 7);
    }

    #[test]
    fn evm_signature_binds_to_the_signer() {
        let signer = PrivateKeySigner::random();
        let (_, payload) = issue();
        let message = build_claim_message(&payload);
        let signature = signer.sign_message_sync(message.as_bytes()).unwrap();
        let sig_hex = hex::encode(signature.as_bytes());

        verify_evm_signature(&message, &sig_hex, signer.address()).unwrap();

        let stranger = PrivateKeySigner::random();
        assert_eq!(
            verify_evm_signature(&message, &sig_hex, stranger.address()).unwrap_err(),
            ClaimError::EvmSignatureMismatch
        );

        // signature over a different message must not recover the signer
        assert_eq!(
            verify_evm_signature("something else", &sig_hex, signer.address()).unwrap_err(),
            ClaimError::EvmSignatureMismatch
        );
    }
}
