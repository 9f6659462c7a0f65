//! Delivery stages, agent types and the ordered stage sequences.
//!
//! The stage sequence of each workflow type is defined here and nowhere
//! else. Which agent type serves a stage is a separate, static table owned by
//! the dispatcher; neither is derived from the other.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A stage of the delivery pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Scaffold,
    Validate,
    Test,
    Integrate,
    Deploy,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Scaffold => "scaffold",
            Stage::Validate => "validate",
            Stage::Test => "test",
            Stage::Integrate => "integrate",
            Stage::Deploy => "deploy",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kind of worker process that performs a stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    Scaffolder,
    Validator,
    Tester,
    Integrator,
    Deployer,
}

impl AgentType {
    pub const ALL: [AgentType; 5] = [
        AgentType::Scaffolder,
        AgentType::Validator,
        AgentType::Tester,
        AgentType::Integrator,
        AgentType::Deployer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::Scaffolder => "scaffolder",
            AgentType::Validator => "validator",
            AgentType::Tester => "tester",
            AgentType::Integrator => "integrator",
            AgentType::Deployer => "deployer",
        }
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of workflow; selects the ordered stage sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    /// Full pipeline, scaffold through deploy
    #[default]
    Delivery,
    /// Scaffold a new project and prove it builds and passes tests
    Prototype,
    /// Ship already-scaffolded work: test, integrate, deploy
    Release,
}

const DELIVERY_STAGES: [Stage; 5] = [
    Stage::Scaffold,
    Stage::Validate,
    Stage::Test,
    Stage::Integrate,
    Stage::Deploy,
];

const PROTOTYPE_STAGES: [Stage; 3] = [Stage::Scaffold, Stage::Validate, Stage::Test];

const RELEASE_STAGES: [Stage; 3] = [Stage::Test, Stage::Integrate, Stage::Deploy];

impl WorkflowType {
    /// The ordered stage sequence for this workflow type. Never empty.
    pub fn stages(&self) -> &'static [Stage] {
        match self {
            WorkflowType::Delivery => &DELIVERY_STAGES,
            WorkflowType::Prototype => &PROTOTYPE_STAGES,
            WorkflowType::Release => &RELEASE_STAGES,
        }
    }

    pub fn first_stage(&self) -> Stage {
        self.stages()[0]
    }

    /// Position of `stage` in the sequence, if the workflow type runs it.
    pub fn position(&self, stage: Stage) -> Option<usize> {
        self.stages().iter().position(|s| *s == stage)
    }

    /// The stage following `stage`, or `None` when `stage` is the last one.
    pub fn next_stage(&self, stage: Stage) -> Option<Stage> {
        let idx = self.position(stage)?;
        self.stages().get(idx + 1).copied()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowType::Delivery => "delivery",
            WorkflowType::Prototype => "prototype",
            WorkflowType::Release => "release",
        }
    }
}

impl fmt::Display for WorkflowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
