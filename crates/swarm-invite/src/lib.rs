//! Invite token issuance and validation (§4.4).
//!
//! Splits cleanly from [`swarm_store`]: this crate only knows how to mint and
//! cryptographically parse a token and its URL. The usage-metering checks
//! (`max_uses`, `revoked`) run against a [`swarm_types::InviteTokenRow`]
//! supplied by the caller, which owns the actual table lookup — the same
//! separation the reference platform draws between `security::jwt` (pure)
//! and the session/idempotency stores that hold state.

use ed25519_dalek::{SigningKey, VerifyingKey};
use sha2::{Digest, Sha256};
use swarm_crypto::jwt::{self, InviteClaims, JwtError};
use swarm_types::InviteTokenRow;
use thiserror::Error;
use time::OffsetDateTime;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("invite token is not well-formed")]
    Malformed,
    #[error("invite token uses an unsupported algorithm")]
    WrongAlgorithm,
    #[error("invite token signature does not verify")]
    SignatureInvalid,
    #[error("invite token has expired")]
    Expired,
    #[error("invite token's swarm_id does not match the invite URL")]
    SwarmMismatch,
    #[error("invite token's endpoint host does not match the invite URL")]
    HostMismatch,
    #[error("invite token is unknown")]
    NotFound,
    #[error("invite token has reached its max_uses")]
    Exhausted,
    #[error("invite token was revoked")]
    Revoked,
}

impl From<JwtError> for TokenError {
    fn from(e: JwtError) -> Self {
        match e {
            JwtError::Malformed => TokenError::Malformed,
            JwtError::WrongAlgorithm => TokenError::WrongAlgorithm,
            JwtError::SignatureInvalid => TokenError::SignatureInvalid,
        }
    }
}

/// `token_hash = SHA-256(jwt)`, hex-encoded (§4.4).
pub fn hash_token(jwt: &str) -> String {
    let digest = Sha256::digest(jwt.as_bytes());
    hex::encode(digest)
}

/// Extracts the host portion of an absolute HTTPS endpoint
/// (`https://host[:port]/path` -> `host[:port]`).
fn host_of(endpoint: &str) -> &str {
    let without_scheme = endpoint.split("://").nth(1).unwrap_or(endpoint);
    without_scheme.split('/').next().unwrap_or(without_scheme)
}

/// Parses a `swarm://<swarm_id>@<host>?token=<jwt>` invite URL.
fn parse_invite_url(url: &str) -> Result<(&str, &str, &str), TokenError> {
    let rest = url.strip_prefix("swarm://").ok_or(TokenError::Malformed)?;
    let (swarm_id, rest) = rest.split_once('@').ok_or(TokenError::Malformed)?;
    let (host, query) = rest.split_once('?').ok_or(TokenError::Malformed)?;
    let jwt = query
        .strip_prefix("token=")
        .ok_or(TokenError::Malformed)?;
    if swarm_id.is_empty() || host.is_empty() || jwt.is_empty() {
        return Err(TokenError::Malformed);
    }
    Ok((swarm_id, host, jwt))
}

/// `Generate(swarm_id, master_priv, expires_in?, max_uses?) -> (jwt,
/// token_hash, url)` (§4.4).
pub fn generate(
    swarm_id: &str,
    master_agent_id: &str,
    master_endpoint: &str,
    master_priv: &SigningKey,
    expires_in: Option<time::Duration>,
    max_uses: Option<u32>,
) -> Result<(String, String, String), TokenError> {
    let claims = InviteClaims::new(
        swarm_id,
        master_agent_id,
        master_endpoint,
        expires_in,
        max_uses,
    );
    let jwt = jwt::sign_invite(&claims, master_priv)?;
    let token_hash = hash_token(&jwt);
    let host = host_of(master_endpoint);
    let url = format!("swarm://{swarm_id}@{host}?token={jwt}");
    Ok((jwt, token_hash, url))
}

/// Runs every check §4.4 orders before a store lookup: parse, verify
/// algorithm, verify signature, check expiry, check the URL's `swarm_id` and
/// host against the payload. Returns the parsed claims and the `token_hash`
/// the caller should look up in its issued-tokens table.
pub fn verify_and_parse(
    jwt: &str,
    url: &str,
    master_pub: &VerifyingKey,
    now: OffsetDateTime,
) -> Result<(InviteClaims, String), TokenError> {
    let claims = jwt::verify_invite(jwt, master_pub)?;
    if claims.is_expired(now) {
        return Err(TokenError::Expired);
    }
    let (url_swarm_id, url_host, url_token) = parse_invite_url(url)?;
    if url_token != jwt {
        return Err(TokenError::Malformed);
    }
    if url_swarm_id != claims.swarm_id {
        return Err(TokenError::SwarmMismatch);
    }
    if url_host != host_of(&claims.endpoint) {
        return Err(TokenError::HostMismatch);
    }
    let token_hash = hash_token(jwt);
    Ok((claims, token_hash))
}

/// Checks the metering fields of an issued-tokens row (§4.4, property 8):
/// `uses >= max_uses` -> `Exhausted`; `revoked` -> `Revoked`.
pub fn check_usage(row: &InviteTokenRow) -> Result<(), TokenError> {
    if row.revoked {
        return Err(TokenError::Revoked);
    }
    if let Some(max_uses) = row.max_uses {
        if row.uses >= max_uses {
            return Err(TokenError::Exhausted);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarm_crypto::generate_keypair;

    #[test]
    fn generate_then_verify_round_trips() {
        let master = generate_keypair();
        let (jwt, token_hash, url) = generate(
            "11111111-1111-1111-1111-111111111111",
            "m",
            "https://m.example/swarm",
            &master,
            Some(time::Duration::hours(1)),
            Some(1),
        )
        .unwrap();
        assert!(url.starts_with("swarm://11111111-1111-1111-1111-111111111111@m.example"));

        let (claims, hash) =
            verify_and_parse(&jwt, &url, &master.verifying_key(), OffsetDateTime::now_utc()).unwrap();
        assert_eq!(claims.swarm_id, "11111111-1111-1111-1111-111111111111");
        assert_eq!(hash, token_hash);
    }

    #[test]
    fn swarm_id_mismatch_is_rejected() {
        let master = generate_keypair();
        let (jwt, _, _) = generate("s1", "m", "https://m.example/swarm", &master, None, None).unwrap();
        let wrong_url = format!("swarm://s2@m.example?token={jwt}");
        let err = verify_and_parse(&jwt, &wrong_url, &master.verifying_key(), OffsetDateTime::now_utc())
            .unwrap_err();
        assert!(matches!(err, TokenError::SwarmMismatch));
    }

    #[test]
    fn host_mismatch_is_rejected() {
        let master = generate_keypair();
        let (jwt, _, _) = generate("s1", "m", "https://m.example/swarm", &master, None, None).unwrap();
        let wrong_url = format!("swarm://s1@evil.example?token={jwt}");
        let err = verify_and_parse(&jwt, &wrong_url, &master.verifying_key(), OffsetDateTime::now_utc())
            .unwrap_err();
        assert!(matches!(err, TokenError::HostMismatch));
    }

    #[test]
    fn expired_token_is_rejected() {
        let master = generate_keypair();
        let (jwt, _, url) = generate(
            "s1",
            "m",
            "https://m.example/swarm",
            &master,
            Some(time::Duration::seconds(-10)),
            None,
        )
        .unwrap();
        let err =
            verify_and_parse(&jwt, &url, &master.verifying_key(), OffsetDateTime::now_utc()).unwrap_err();
        assert!(matches!(err, TokenError::Expired));
    }

    #[test]
    fn usage_checks_catch_exhaustion_and_revocation() {
        let exhausted = InviteTokenRow {
            token_hash: "h".into(),
            swarm_id: "s1".into(),
            max_uses: Some(1),
            uses: 1,
            created_at: "2026-01-01T00:00:00Z".into(),
            expires_at: None,
            revoked: false,
        };
        assert!(matches!(check_usage(&exhausted), Err(TokenError::Exhausted)));

        let revoked = InviteTokenRow {
            revoked: true,
            ..exhausted
        };
        assert!(matches!(check_usage(&revoked), Err(TokenError::Revoked)));
    }
}
