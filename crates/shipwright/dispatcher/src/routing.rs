//! Canonical stage → agent routing.
//!
//! This table is the only place that decides which agent type runs a stage.
//! Stage *order* lives with the workflow type; the two never derive from
//! each other.

use shipwright_types::{AgentType, Stage};

/// Every stage and the agent type that runs it.
pub const STAGE_AGENT_TABLE: [(Stage, AgentType); 5] = [
    (Stage::Scaffold, AgentType::Scaffolder),
    (Stage::Validate, AgentType::Validator),
    (Stage::Test, AgentType::Tester),
    (Stage::Integrate, AgentType::Integrator),
    (Stage::Deploy, AgentType::Deployer),
];

/// The agent type that runs `stage`, read from [`STAGE_AGENT_TABLE`].
pub fn agent_for_stage(stage: Stage) -> Option<AgentType> {
    STAGE_AGENT_TABLE
        .iter()
        .find(|(s, _)| *s == stage)
        .map(|(_, agent)| *agent)
}
