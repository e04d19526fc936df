//! Bitcoin `signmessage` verification (BIP-137).
//!
//! Wallets produce a 65-byte compact recoverable signature whose header
//! byte encodes the recovery id and the address family. Verification
//! recovers the public key and matches its hash160 against the claimed
//! address.

use bitcoin::hashes::{hash160, Hash};
use bitcoin::secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use bitcoin::secp256k1::{Message, Secp256k1};
use thiserror::Error;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;

use crate::address::decode_btc_address;
use crate::hash::sha256d;
use crate::wire::{write_varint, ScriptType};

const MESSAGE_PREFIX: &[u8] = b"\x18Bitcoin Signed Message:\n";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("invalid or unsupported bitcoin address")]
    InvalidAddress,
    #[error("malformed signature: {0}")]
    Malformed(&'static str),
    #[error("unsupported signature header byte {0}")]
    UnsupportedHeader(u8),
    #[error("bitcoin signature does not match the claimed address")]
    Mismatch,
}

/// The digest Bitcoin wallets actually sign:
/// `sha256d(prefix || varint(len(msg)) || msg)`.
pub fn bitcoin_message_hash(message: &str) -> [u8; 32] {
    let msg = message.as_bytes();
    let mut payload = Vec::with_capacity(MESSAGE_PREFIX.len() + 9 + msg.len());
    payload.extend_from_slice(MESSAGE_PREFIX);
    payload.extend_from_slice(&write_varint(msg.len() as u64));
    payload.extend_from_slice(msg);
    sha256d(&payload)
}

/// Verify a base64 BIP-137 signature over `message` for `btc_address`.
pub fn verify_bip137_signature(
    btc_address: &str,
    message: &str,
    signature_b64: &str,
) -> Result<(), SignatureError> {
    let (expected_hash, addr_type) =
        decode_btc_address(btc_address).ok_or(SignatureError::InvalidAddress)?;

    let sig = BASE64_STANDARD
        .decode(signature_b64.trim())
        .map_err(|_| SignatureError::Malformed("not base64"))?;
    if sig.len() != 65 {
        return Err(SignatureError::Malformed("signature must be 65 bytes"));
    }

    let header = sig[0];
    // 27-30 p2pkh uncompressed, 31-34 p2pkh compressed, 39-42 p2wpkh;
    // 35-38 (p2sh-segwit) and everything else unsupported.
    let (recid, compressed, family) = match header {
        27..=30 => (header - 27, false, ScriptType::P2pkh),
        31..=34 => (header - 31, true, ScriptType::P2pkh),
        39..=42 => (header - 39, true, ScriptType::P2wpkh),
        _ => return Err(SignatureError::UnsupportedHeader(header)),
    };
    if family != addr_type {
        return Err(SignatureError::Mismatch);
    }

    let recovery_id =
        RecoveryId::from_i32(recid as i32).map_err(|_| SignatureError::Malformed("recovery id"))?;
    let recoverable = RecoverableSignature::from_compact(&sig[1..65], recovery_id)
        .map_err(|_| SignatureError::Malformed("compact signature"))?;

    let digest = Message::from_digest(bitcoin_message_hash(message));
    let secp = Secp256k1::verification_only();
    let pubkey = secp
        .recover_ecdsa(&digest, &recoverable)
        .map_err(|_| SignatureError::Mismatch)?;

    let serialized: Vec<u8> = if compressed {
        pubkey.serialize().to_vec()
    } else {
        pubkey.serialize_uncompressed().to_vec()
    };
    let got = hash160::Hash::hash(&serialized).to_byte_array();
    if got != expected_hash {
        return Err(SignatureError::Mismatch);
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use bitcoin::address::KnownHrp;
    use bitcoin::key::CompressedPublicKey;
    use bitcoin::network::NetworkKind;
    use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};
    use bitcoin::Address;

    /// Sign `message` the way a wallet would for the given address family.
    pub(crate) fn sign_message(
        secret: &SecretKey,
        message: &str,
        family: ScriptType,
        compressed: bool,
    ) -> String {
        let secp = Secp256k1::new();
        let digest = Message::from_digest(bitcoin_message_hash(message));
        let signature = secp.sign_ecdsa_recoverable(&digest, secret);
        let (recovery_id, compact) = signature.serialize_compact();

        let base = match (family, compressed) {
            (ScriptType::P2pkh, false) => 27,
            (ScriptType::P2pkh, true) => 31,
            (ScriptType::P2wpkh, true) => 39,
            (ScriptType::P2wpkh, false) => panic!("p2wpkh keys are always compressed"),
        };
        let mut sig = vec![base + recovery_id.to_i32() as u8];
        sig.extend_from_slice(&compact);
        BASE64_STANDARD.encode(sig)
    }

    pub(crate) fn test_key() -> (SecretKey, PublicKey) {
        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(&[0x42; 32]).unwrap();
        let public = secret.public_key(&secp);
        (secret, public)
    }

    pub(crate) fn p2wpkh_address(public: &PublicKey) -> String {
        let compressed = CompressedPublicKey(*public);
        Address::p2wpkh(&compressed, KnownHrp::Testnets).to_string()
    }

    #[test]
    fn message_hash_uses_the_signed_message_envelope() {
        let hash = bitcoin_message_hash("test");
        let mut payload = b"\x18Bitcoin Signed Message:\n".to_vec();
        payload.push(4);
        payload.extend_from_slice(b"test");
        assert_eq!(hash, sha256d(&payload));
    }

    #[test]
    fn verifies_p2wpkh_signature() {
        let (secret, public) = test_key();
        let addr = p2wpkh_address(&public);
        let message = "hello hashcredit";
        let sig = sign_message(&secret, message, ScriptType::P2wpkh, true);
        verify_bip137_signature(&addr, message, &sig).unwrap();
    }

    #[test]
    fn verifies_p2pkh_signatures_both_compressions() {
        let (secret, public) = test_key();
        let message = "hello hashcredit";

        let compressed_addr = Address::p2pkh(
            bitcoin::PublicKey::new(public),
            NetworkKind::Test,
        )
        .to_string();
        let sig = sign_message(&secret, message, ScriptType::P2pkh, true);
        verify_bip137_signature(&compressed_addr, message, &sig).unwrap();

        let uncompressed_addr = Address::p2pkh(
            bitcoin::PublicKey::new_uncompressed(public),
            NetworkKind::Test,
        )
        .to_string();
        let sig = sign_message(&secret, message, ScriptType::P2pkh, false);
        verify_bip137_signature(&uncompressed_addr, message, &sig).unwrap();
    }

    #[test]
    fn rejects_wrong_message_and_wrong_key() {
        let (secret, public) = test_key();
        let addr = p2wpkh_address(&public);
        let sig = sign_message(&secret, "message one", ScriptType::P2wpkh, true);

        assert_eq!(
            verify_bip137_signature(&addr, "message two", &sig).unwrap_err(),
            SignatureError::Mismatch
        );

        let other = SecretKey::from_slice(&[0x43; 32]).unwrap();
        let sig = sign_message(&other, "message one", ScriptType::P2wpkh, true);
        assert_eq!(
            verify_bip137_signature(&addr, "message one", &sig).unwrap_err(),
            SignatureError::Mismatch
        );
    }

    #[test]
    fn rejects_family_mismatch_and_unsupported_headers() {
        let (secret, public) = test_key();
        let addr = p2wpkh_address(&public);
        // p2pkh header against a bech32 address
        let sig = sign_message(&secret, "msg", ScriptType::P2pkh, true);
        assert_eq!(
            verify_bip137_signature(&addr, "msg", &sig).unwrap_err(),
            SignatureError::Mismatch
        );

        // p2sh-segwit header range is rejected outright
        let mut raw = BASE64_STANDARD
            .decode(sign_message(&secret, "msg", ScriptType::P2wpkh, true))
            .unwrap();
        raw[0] = 35;
        assert_eq!(
            verify_bip137_signature(&addr, "msg", &BASE64_STANDARD.encode(&raw)).unwrap_err(),
            SignatureError::UnsupportedHeader(35)
        );
    }

    #[test]
    fn rejects_malformed_signatures() {
        let (_, public) = test_key();
        let addr = p2wpkh_address(&public);
        assert_eq!(
            verify_bip137_signature(&addr, "msg", "!!!not-base64!!!").unwrap_err(),
            SignatureError::Malformed("not base64")
        );
        assert_eq!(
            verify_bip137_signature(&addr, "msg", &BASE64_STANDARD.encode([0u8; 10]))
                .unwrap_err(),
            SignatureError::Malformed("signature must be 65 bytes")
        );
        assert_eq!(
            verify_bip137_signature("not-an-address", "msg", &BASE64_STANDARD.encode([0u8; 65]))
                .unwrap_err(),
            SignatureError::InvalidAddress
        );
    }
}
