// SPDX-License-Identifier: MIT OR Apache-2.0
//! `ReviewerReport` (§3.2): the verdict of one reviewer role in the
//! sequential pipeline (C9) for a single step.

use crate::support::require;
use gk_core::ArtifactMeta;
use gk_error::KernelError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The fixed reviewer roles (§4.9). Order within a `reviewerSequence` is
/// declared per step, not fixed here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReviewerRole {
    /// Static analysis rules.
    Static,
    /// Security-focused rules.
    Security,
    /// QA/test-coverage rules.
    Qa,
    /// End-to-end behavior rules.
    E2e,
    /// Automation/CI surface rules.
    Automation,
}

/// A single rule violation surfaced by a reviewer.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ReviewerViolation {
    /// Identifier of the rule that failed.
    #[serde(rename = "ruleId")]
    pub rule_id: String,
    /// Human-readable description of the violation.
    pub message: String,
}

/// The verdict of one reviewer role for a single step (§3.2).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ReviewerReport {
    /// Universal artifact fields (§3.1).
    #[serde(flatten)]
    pub meta: ArtifactMeta,
    /// Identity of the `StepPacket` this report was produced for.
    #[serde(rename = "stepId")]
    pub step_id: String,
    /// Which reviewer role produced this report.
    #[serde(rename = "reviewerRole")]
    pub reviewer_role: ReviewerRole,
    /// Whether every rule this role owns passed.
    pub passed: bool,
    /// Violations found; must be non-empty iff `passed` is `false`.
    pub violations: Vec<ReviewerViolation>,
    /// Self-hash: `hash(canonical(self ∖ hash))`.
    pub hash: String,
}

crate::impl_self_hashing!(ReviewerReport);

impl ReviewerReport {
    /// Structural validation: universal fields, non-empty `stepId`, and
    /// the `passed == violations.is_empty()` consistency invariant.
    pub fn validate(&self) -> Result<(), KernelError> {
        self.meta.validate()?;
        require(!self.step_id.is_empty(), "stepId must not be empty")?;
        require(
            self.passed == self.violations.is_empty(),
            "passed must be true iff violations is empty",
        )?;
        Ok(())
    }
}
