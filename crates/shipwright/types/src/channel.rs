//! Canonical stream and topic naming.
//!
//! Producers and consumers both derive names from [`Channel::name`]; no other
//! code spells a stream name by hand.

use crate::stage::AgentType;
use std::fmt;

pub const NAMESPACE: &str = "shipwright";

const DEAD_LETTER_SUFFIX: &str = "dead-letter";

/// A logical bus channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Durable stream of tasks for one agent type
    Tasks(AgentType),
    /// Durable stream of agent results, consumed by the orchestrator
    Results,
    /// Pub/sub topic for workflow status events
    Events,
}

impl Channel {
    pub fn name(&self) -> String {
        match self {
            Channel::Tasks(agent) => format!("{}:tasks:{}", NAMESPACE, agent),
            Channel::Results => format!("{}:results", NAMESPACE),
            Channel::Events => format!("{}:events", NAMESPACE),
        }
    }

    /// Dead-letter stream paired with this channel.
    pub fn dead_letter(&self) -> String {
        dead_letter_stream(&self.name())
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Dead-letter stream for an arbitrary stream name.
pub fn dead_letter_stream(stream: &str) -> String {
    format!("{}:{}", stream, DEAD_LETTER_SUFFIX)
}
