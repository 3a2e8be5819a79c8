//! Ed25519 signing/verification over the canonical envelope payload (§4.1),
//! plus the EdDSA invite-token JWT helpers it shares an algorithm with.
//!
//! Grounded on the reference platform's `security::jwt` module: a small
//! `Signer`/config split, manual `exp` checking left to the caller so the
//! caller can order its own failure checks (see [`jwt::InviteJwt::verify`]).

pub mod jwt;

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey};
use rand::rngs::OsRng;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("signature does not verify against the sender's registered public key")]
    SignatureInvalid,
    #[error("malformed key material: {0}")]
    KeyFormat(String),
}

/// Generates a fresh Ed25519 keypair for a new agent identity.
pub fn generate_keypair() -> SigningKey {
    SigningKey::generate(&mut OsRng)
}

/// Decodes a base64 32-byte Ed25519 seed into a [`SigningKey`].
pub fn signing_key_from_base64(seed_b64: &str) -> Result<SigningKey, CryptoError> {
    let bytes = B64
        .decode(seed_b64.trim())
        .map_err(|e| CryptoError::KeyFormat(e.to_string()))?;
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| CryptoError::KeyFormat("seed must be 32 bytes".into()))?;
    Ok(SigningKey::from_bytes(&arr))
}

/// Decodes a base64 32-byte Ed25519 public key into a [`VerifyingKey`].
pub fn verifying_key_from_base64(key_b64: &str) -> Result<VerifyingKey, CryptoError> {
    let bytes = B64
        .decode(key_b64.trim())
        .map_err(|e| CryptoError::KeyFormat(e.to_string()))?;
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| CryptoError::KeyFormat("public key must be 32 bytes".into()))?;
    VerifyingKey::from_bytes(&arr).map_err(|e| CryptoError::KeyFormat(e.to_string()))
}

pub fn public_key_to_base64(key: &VerifyingKey) -> String {
    B64.encode(key.as_bytes())
}

pub fn seed_to_base64(key: &SigningKey) -> String {
    B64.encode(key.to_bytes())
}

/// Signs `payload` (the canonical signing payload, §4.1) and returns the
/// base64-encoded 64-byte signature carried on the wire.
pub fn sign(payload: &[u8], key: &SigningKey) -> String {
    let sig: Signature = key.sign(payload);
    B64.encode(sig.to_bytes())
}

/// Verifies `signature_b64` over `payload` against `public_key`. Returns
/// [`CryptoError::SignatureInvalid`] on any mismatch and
/// [`CryptoError::KeyFormat`] on malformed input — never partially accepts.
pub fn verify(
    payload: &[u8],
    signature_b64: &str,
    public_key: &VerifyingKey,
) -> Result<(), CryptoError> {
    let sig_bytes = B64
        .decode(signature_b64.trim())
        .map_err(|_| CryptoError::SignatureInvalid)?;
    let sig_arr: [u8; 64] = sig_bytes
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::SignatureInvalid)?;
    let sig = Signature::from_bytes(&sig_arr);
    public_key
        .verify(payload, &sig)
        .map_err(|_| CryptoError::SignatureInvalid)
}
