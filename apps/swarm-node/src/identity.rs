//! This node's own agent identity (§6 `[ADDED]`): a signing key plus the
//! `agent_id`/`endpoint` it presents to the rest of the swarm, persisted as
//! `<identity_dir>/identity.json` + `<identity_dir>/key.seed`.

use std::path::{Path, PathBuf};

use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};
use swarm_crypto::{public_key_to_base64, seed_to_base64, signing_key_from_base64};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IdentityFile {
    agent_id: String,
    endpoint: String,
    public_key: String,
}

pub struct Identity {
    pub agent_id: String,
    pub endpoint: String,
    pub signing_key: SigningKey,
}

impl Identity {
    fn paths(dir: &Path) -> (PathBuf, PathBuf) {
        (dir.join("identity.json"), dir.join("key.seed"))
    }

    /// Loads the identity at `dir` if present, or creates a fresh one with a
    /// newly generated keypair (`agent_id` defaults to a random UUID if the
    /// caller doesn't want to pick one). `key.seed` is written with `0o600`
    /// permissions on Unix.
    pub fn load_or_create(dir: &Path, endpoint: &str) -> anyhow::Result<Self> {
        let (identity_path, seed_path) = Self::paths(dir);

        if identity_path.exists() && seed_path.exists() {
            let identity: IdentityFile = serde_json::from_str(&std::fs::read_to_string(&identity_path)?)?;
            let seed = std::fs::read_to_string(&seed_path)?;
            let signing_key = signing_key_from_base64(seed.trim())?;
            return Ok(Self {
                agent_id: identity.agent_id,
                endpoint: identity.endpoint,
                signing_key,
            });
        }

        std::fs::create_dir_all(dir)?;
        let signing_key = swarm_crypto::generate_keypair();
        let agent_id = uuid::Uuid::new_v4().to_string();
        let identity = IdentityFile {
            agent_id: agent_id.clone(),
            endpoint: endpoint.to_string(),
            public_key: public_key_to_base64(&signing_key.verifying_key()),
        };
        std::fs::write(&identity_path, serde_json::to_string_pretty(&identity)?)?;
        write_seed(&seed_path, &seed_to_base64(&signing_key))?;

        Ok(Self {
            agent_id,
            endpoint: endpoint.to_string(),
            signing_key,
        })
    }
}

#[cfg(unix)]
fn write_seed(path: &Path, seed_b64: &str) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::write(path, seed_b64)?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn write_seed(path: &Path, seed_b64: &str) -> anyhow::Result<()> {
    std::fs::write(path, seed_b64)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_then_reloads_identical_identity() {
        let dir = tempfile::tempdir().unwrap();
        let first = Identity::load_or_create(dir.path(), "https://n.example/swarm").unwrap();
        let second = Identity::load_or_create(dir.path(), "https://n.example/swarm").unwrap();
        assert_eq!(first.agent_id, second.agent_id);
        assert_eq!(first.signing_key.to_bytes(), second.signing_key.to_bytes());
    }

    #[cfg(unix)]
    #[test]
    fn seed_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        Identity::load_or_create(dir.path(), "https://n.example/swarm").unwrap();
        let perms = std::fs::metadata(dir.path().join("key.seed")).unwrap().permissions();
        assert_eq!(perms.mode() & 0o777, 0o600);
    }
}
