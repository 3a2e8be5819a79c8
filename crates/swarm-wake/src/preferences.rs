//! WakeTrigger evaluation (§4.8): decides `WAKE | QUEUE | SKIP` for an
//! inbound message against a node's notification preferences.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use swarm_types::{EnvelopeType, Priority};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WakeCondition {
    AnyMessage,
    DirectMention,
    HighPriority,
    FromSpecificAgent,
    KeywordMatch,
    SwarmSystemMessage,
}

/// §4.8's `NotificationPreferences` configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPreferences {
    pub enabled: bool,
    pub default_level: Priority,
    pub wake_conditions: HashSet<WakeCondition>,
    pub watched_agents: HashSet<String>,
    pub watched_keywords: HashSet<String>,
    pub muted_swarms: HashSet<String>,
    /// `(start_hour, end_hour)` in UTC; `start > end` wraps past midnight.
    pub quiet_hours: Option<(u8, u8)>,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            enabled: true,
            default_level: Priority::Normal,
            wake_conditions: HashSet::from([WakeCondition::AnyMessage]),
            watched_agents: HashSet::new(),
            watched_keywords: HashSet::new(),
            muted_swarms: HashSet::new(),
            quiet_hours: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeDecision {
    Wake,
    Queue,
    Skip,
}

pub struct EvaluationInput<'a> {
    pub swarm_id: &'a str,
    pub sender_id: &'a str,
    /// The envelope's recipient (`"broadcast"` or an agent id).
    pub recipient: &'a str,
    /// This node's own agent id, for the `DIRECT_MENTION` condition.
    pub this_agent_id: &'a str,
    pub priority: Priority,
    pub kind: EnvelopeType,
    pub content: &'a str,
    pub now_hour_utc: u8,
}

fn in_quiet_hours(quiet_hours: (u8, u8), hour: u8) -> bool {
    let (start, end) = quiet_hours;
    if start <= end {
        hour >= start && hour < end
    } else {
        hour >= start || hour < end
    }
}

/// Evaluates the ordered rules of §4.8, first match wins.
pub fn evaluate(prefs: &NotificationPreferences, input: &EvaluationInput<'_>) -> WakeDecision {
    if !prefs.enabled {
        return WakeDecision::Skip;
    }
    if prefs.muted_swarms.contains(input.swarm_id) {
        return WakeDecision::Skip;
    }
    if let Some(quiet_hours) = prefs.quiet_hours {
        if in_quiet_hours(quiet_hours, input.now_hour_utc) && input.priority != Priority::High {
            return WakeDecision::Queue;
        }
    }
    for condition in &prefs.wake_conditions {
        let matched = match condition {
            WakeCondition::AnyMessage => true,
            WakeCondition::DirectMention => input.recipient == input.this_agent_id,
            WakeCondition::HighPriority => input.priority == Priority::High,
            WakeCondition::FromSpecificAgent => prefs.watched_agents.contains(input.sender_id),
            WakeCondition::KeywordMatch => prefs
                .watched_keywords
                .iter()
                .any(|kw| input.content.contains(kw.as_str())),
            WakeCondition::SwarmSystemMessage => input.kind == EnvelopeType::System,
        };
        if matched {
            return WakeDecision::Wake;
        }
    }
    WakeDecision::Queue
}
