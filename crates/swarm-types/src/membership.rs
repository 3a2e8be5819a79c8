use serde::{Deserialize, Serialize};

/// A single swarm participant (§3 Member).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub agent_id: String,
    pub endpoint: String,
    pub public_key: String,
    pub joined_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwarmSettings {
    pub allow_member_invite: bool,
    pub require_approval: bool,
}

impl Default for SwarmSettings {
    fn default() -> Self {
        Self {
            allow_member_invite: false,
            require_approval: false,
        }
    }
}

/// A membership group (§3 Swarm). `master` is a plain `agent_id`, never an
/// owning reference back into `members` (§9 "Cyclic/back-references").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Swarm {
    pub swarm_id: String,
    pub name: String,
    pub created_at: String,
    pub master: String,
    pub members: Vec<Member>,
    pub settings: SwarmSettings,
}

impl Swarm {
    pub fn is_member(&self, agent_id: &str) -> bool {
        self.members.iter().any(|m| m.agent_id == agent_id)
    }

    pub fn member(&self, agent_id: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.agent_id == agent_id)
    }

    pub fn is_master(&self, agent_id: &str) -> bool {
        self.master == agent_id
    }
}
