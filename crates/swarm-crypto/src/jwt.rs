//! EdDSA invite-token JWTs (§4.4).
//!
//! The reference platform's `security::jwt::{ActionClaims, JwtSigner}` signs
//! HS256/RS256/ES256 action links through the `jsonwebtoken` crate; this
//! module keeps the same shape (a claims struct, a `sign`/`verify` pair, and
//! a `verify` that deliberately leaves `exp` unchecked so the caller controls
//! ordering — see §4.4's "parse -> verify alg -> verify signature -> check
//! not expired -> ..." sequence) but builds the token directly on top of
//! [`ed25519_dalek`] instead of going through `jsonwebtoken`'s DER key
//! loaders, which assume a PKCS8/ring key format this crate's raw 32-byte
//! seeds don't carry.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD as B64URL, Engine as _};
use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

#[derive(Debug, Error)]
pub enum JwtError {
    #[error("token is not well-formed JWT")]
    Malformed,
    #[error("token algorithm is not EdDSA")]
    WrongAlgorithm,
    #[error("token signature does not verify")]
    SignatureInvalid,
}

#[derive(Serialize, Deserialize)]
struct JoseHeader<'a> {
    alg: &'a str,
    typ: &'a str,
}

/// Invite token payload (§3 Invite token).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteClaims {
    pub swarm_id: String,
    pub master: String,
    pub endpoint: String,
    pub iat: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_uses: Option<u32>,
}

impl InviteClaims {
    pub fn new(
        swarm_id: impl Into<String>,
        master: impl Into<String>,
        endpoint: impl Into<String>,
        expires_in: Option<time::Duration>,
        max_uses: Option<u32>,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            swarm_id: swarm_id.into(),
            master: master.into(),
            endpoint: endpoint.into(),
            iat: now.unix_timestamp(),
            expires_at: expires_in.map(|d| (now + d).unix_timestamp()),
            max_uses,
        }
    }

    /// ±60s clock-skew tolerance per §4.1.
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        match self.expires_at {
            Some(exp) => now.unix_timestamp() > exp + 60,
            None => false,
        }
    }
}

/// Encodes `claims` as a `typ=JWT, alg=EdDSA` token: base64url(header) `.`
/// base64url(payload) `.` base64url(Ed25519 signature over the first two
/// parts) — the exact byte string §4.1 specifies for invite JWTs.
pub fn sign_invite(claims: &InviteClaims, signer: &SigningKey) -> Result<String, JwtError> {
    let header = JoseHeader {
        alg: "EdDSA",
        typ: "JWT",
    };
    let header_b64 = B64URL.encode(serde_json::to_vec(&header).map_err(|_| JwtError::Malformed)?);
    let payload_b64 =
        B64URL.encode(serde_json::to_vec(claims).map_err(|_| JwtError::Malformed)?);
    let signing_input = format!("{header_b64}.{payload_b64}");
    let sig: Signature = signer.sign(signing_input.as_bytes());
    let sig_b64 = B64URL.encode(sig.to_bytes());
    Ok(format!("{signing_input}.{sig_b64}"))
}

/// Parses and signature-verifies `token`, returning its claims regardless of
/// expiry. §4.4 requires the caller to run the expiry and token-table checks
/// itself in a specific order, mirroring the reference platform's
/// `JwtSigner::verify` leaving `exp` unchecked for its caller.
pub fn verify_invite(token: &str, public_key: &VerifyingKey) -> Result<InviteClaims, JwtError> {
    let mut parts = token.split('.');
    let header_b64 = parts.next().ok_or(JwtError::Malformed)?;
    let payload_b64 = parts.next().ok_or(JwtError::Malformed)?;
    let sig_b64 = parts.next().ok_or(JwtError::Malformed)?;
    if parts.next().is_some() {
        return Err(JwtError::Malformed);
    }

    let header_bytes = B64URL.decode(header_b64).map_err(|_| JwtError::Malformed)?;
    let header: JoseHeader = serde_json::from_slice(&header_bytes).map_err(|_| JwtError::Malformed)?;
    if header.alg != "EdDSA" {
        return Err(JwtError::WrongAlgorithm);
    }
    if header.typ != "JWT" {
        return Err(JwtError::Malformed);
    }

    let sig_bytes = B64URL.decode(sig_b64).map_err(|_| JwtError::SignatureInvalid)?;
    let sig_arr: [u8; 64] = sig_bytes
        .as_slice()
        .try_into()
        .map_err(|_| JwtError::SignatureInvalid)?;
    let sig = Signature::from_bytes(&sig_arr);
    let signing_input = format!("{header_b64}.{payload_b64}");
    public_key
        .verify(signing_input.as_bytes(), &sig)
        .map_err(|_| JwtError::SignatureInvalid)?;

    let payload_bytes = B64URL.decode(payload_b64).map_err(|_| JwtError::Malformed)?;
    serde_json::from_slice(&payload_bytes).map_err(|_| JwtError::Malformed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate_keypair;

    #[test]
    fn sign_then_verify_round_trips() {
        let key = generate_keypair();
        let claims = InviteClaims::new(
            "11111111-1111-1111-1111-111111111111",
            "m",
            "https://m.example/swarm",
            Some(time::Duration::hours(1)),
            Some(1),
        );
        let token = sign_invite(&claims, &key).unwrap();
        assert_eq!(token.split('.').count(), 3);
        let verified = verify_invite(&token, &key.verifying_key()).unwrap();
        assert_eq!(verified.swarm_id, claims.swarm_id);
        assert_eq!(verified.max_uses, Some(1));
    }

    #[test]
    fn wrong_key_fails_verification() {
        let key = generate_keypair();
        let other = generate_keypair();
        let claims = InviteClaims::new("s", "m", "https://m.example", None, None);
        let token = sign_invite(&claims, &key).unwrap();
        assert!(verify_invite(&token, &other.verifying_key()).is_err());
    }

    #[test]
    fn tampered_payload_fails_verification() {
        let key = generate_keypair();
        let claims = InviteClaims::new("s", "m", "https://m.example", None, None);
        let token = sign_invite(&claims, &key).unwrap();
        let mut parts: Vec<&str> = token.split('.').collect();
        let tampered_payload = B64URL.encode(b"{\"swarm_id\":\"evil\"}");
        parts[1] = &tampered_payload;
        let tampered = parts.join(".");
        assert!(verify_invite(&tampered, &key.verifying_key()).is_err());
    }

    #[test]
    fn expiry_is_left_to_the_caller() {
        let key = generate_keypair();
        let claims = InviteClaims::new(
            "s",
            "m",
            "https://m.example",
            Some(time::Duration::seconds(-3600)),
            None,
        );
        let token = sign_invite(&claims, &key).unwrap();
        let verified = verify_invite(&token, &key.verifying_key()).unwrap();
        assert!(verified.is_expired(OffsetDateTime::now_utc()));
    }
}
