//! Gate policy: which stages need approval and what confidence lets a
//! result through without a human.
//!
//! Evaluation is pure. Thresholds are configuration only; a flagged stage
//! whose category has no threshold always pauses for approval.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use shipwright_types::{
    ClarificationId, ClarificationRequest, DecisionCategory, DecisionId, PendingClarification,
    PendingDecision, Stage,
};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatePolicy {
    /// Stages that require approval, keyed to the category of change they make
    pub approval_stages: BTreeMap<Stage, DecisionCategory>,
    /// Minimum result confidence per category to skip approval
    pub decision_thresholds: BTreeMap<DecisionCategory, f64>,
    /// Requirement confidence below this pauses for clarification.
    /// Unset: only explicit questions pause.
    pub clarification_threshold: Option<f64>,
}

impl GatePolicy {
    pub fn require_approval(mut self, stage: Stage, category: DecisionCategory) -> Self {
        self.approval_stages.insert(stage, category);
        self
    }

    pub fn with_threshold(mut self, category: DecisionCategory, threshold: f64) -> Self {
        self.decision_thresholds.insert(category, threshold);
        self
    }

    pub fn with_clarification_threshold(mut self, threshold: f64) -> Self {
        self.clarification_threshold = Some(threshold);
        self
    }

    /// Pending decision for a result of `stage`, or `None` if it may pass.
    pub fn decision_gate(&self, stage: Stage, confidence: Option<f64>) -> Option<PendingDecision> {
        let category = *self.approval_stages.get(&stage)?;
        let threshold = self.decision_thresholds.get(&category).copied();

        let passes = match (confidence, threshold) {
            (Some(c), Some(t)) => c >= t,
            _ => false,
        };
        if passes {
            return None;
        }

        Some(PendingDecision {
            decision_id: DecisionId::generate(),
            stage,
            category,
            confidence,
            threshold,
            requested_at: Utc::now(),
        })
    }

    /// Pending clarification for a result of `stage`, or `None` if the agent
    /// understood the requirements well enough.
    pub fn clarification_gate(
        &self,
        stage: Stage,
        request: Option<&ClarificationRequest>,
    ) -> Option<PendingClarification> {
        let request = request?;
        let low_confidence = match (request.requirement_confidence, self.clarification_threshold) {
            (Some(c), Some(t)) => c < t,
            _ => false,
        };
        if request.questions.is_empty() && !low_confidence {
            return None;
        }

        Some(PendingClarification {
            clarification_id: ClarificationId::generate(),
            stage,
            questions: request.questions.clone(),
            requirement_confidence: request.requirement_confidence,
            requested_at: Utc::now(),
        })
    }
}
