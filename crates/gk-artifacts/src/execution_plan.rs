// SPDX-License-Identifier: MIT OR Apache-2.0
//! `ExecutionPlan` (§3.2): the ordered, non-executable plan of steps a
//! session will carry out, binding to a [`crate::DecisionLock`] and
//! [`crate::DefinitionOfDone`] by hash.

use crate::support::{is_sha256_hex, require};
use gk_core::ArtifactMeta;
use gk_error::KernelError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single plan step.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExecutionStep {
    /// Stable step identifier, referenced by `StepPacket.stepId`.
    #[serde(rename = "stepId")]
    pub step_id: String,
    /// `DefinitionOfDone` item ids this step works toward.
    pub references: Vec<String>,
    /// Capabilities this step is declared to need, a subset of the plan's
    /// `allowedCapabilities`.
    #[serde(rename = "requiredCapabilities", default, skip_serializing_if = "Vec::is_empty")]
    pub required_capabilities: Vec<String>,
    /// Short description of what the step accomplishes.
    pub description: String,
}

/// Guarantees the plan itself makes no execution surface available. All
/// five must be `true` (§3.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct NonExecutableGuarantees {
    /// No shell execution.
    #[serde(rename = "noShellExecution")]
    pub no_shell_execution: bool,
    /// No network access.
    #[serde(rename = "noNetworkAccess")]
    pub no_network_access: bool,
    /// No filesystem mutation.
    #[serde(rename = "noFilesystemMutation")]
    pub no_filesystem_mutation: bool,
    /// No process spawning.
    #[serde(rename = "noProcessSpawning")]
    pub no_process_spawning: bool,
    /// No implicit I/O.
    #[serde(rename = "noImplicitIO")]
    pub no_implicit_io: bool,
}

impl NonExecutableGuarantees {
    /// `true` only when every guarantee field is `true`.
    #[must_use]
    pub fn all_true(&self) -> bool {
        self.no_shell_execution
            && self.no_network_access
            && self.no_filesystem_mutation
            && self.no_process_spawning
            && self.no_implicit_io
    }
}

impl Default for NonExecutableGuarantees {
    fn default() -> Self {
        Self {
            no_shell_execution: true,
            no_network_access: true,
            no_filesystem_mutation: true,
            no_process_spawning: true,
            no_implicit_io: true,
        }
    }
}

/// The ordered, non-executable plan of steps (§3.2).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExecutionPlan {
    /// Universal artifact fields (§3.1).
    #[serde(flatten)]
    pub meta: ArtifactMeta,
    /// Identity of the bound `DecisionLock`.
    #[serde(rename = "lockId")]
    pub lock_id: Uuid,
    /// Self-hash of the bound `DecisionLock`.
    #[serde(rename = "lockHash")]
    pub lock_hash: String,
    /// Identity of the bound `DefinitionOfDone`.
    #[serde(rename = "dodId")]
    pub dod_id: Uuid,
    /// Self-hash of the bound `DefinitionOfDone`.
    #[serde(rename = "dodHash")]
    pub dod_hash: String,
    /// Verbatim copy of `DecisionLock.goal`, checked by the structural
    /// linters (§3.3 "goal preservation", §4.8).
    pub goal: String,
    /// The ordered steps.
    pub steps: Vec<ExecutionStep>,
    /// The full set of capabilities any step in this plan may use.
    #[serde(rename = "allowedCapabilities")]
    pub allowed_capabilities: Vec<String>,
    /// Guarantees the plan makes no execution surface available.
    #[serde(rename = "nonExecutableGuarantees")]
    pub non_executable_guarantees: NonExecutableGuarantees,
    /// Criteria under which the plan is considered complete.
    #[serde(rename = "completionCriteria")]
    pub completion_criteria: Vec<String>,
    /// Self-hash: `hash(canonical(self ∖ hash))`.
    pub hash: String,
}

crate::impl_self_hashing!(ExecutionPlan);

impl ExecutionPlan {
    /// Structural validation: universal fields, bound-hash shapes, the
    /// `nonExecutableGuarantees` all-`true` invariant, at least one step,
    /// unique step ids, each step's `requiredCapabilities` a subset of
    /// `allowedCapabilities`.
    pub fn validate(&self) -> Result<(), KernelError> {
        self.meta.validate()?;
        require(is_sha256_hex(&self.lock_hash), "lockHash must be a SHA-256 hex digest")?;
        require(is_sha256_hex(&self.dod_hash), "dodHash must be a SHA-256 hex digest")?;
        require(!self.goal.trim().is_empty(), "goal must not be empty")?;
        require(!self.steps.is_empty(), "plan must have at least one step")?;
        require(
            self.non_executable_guarantees.all_true(),
            "nonExecutableGuarantees must all be true",
        )?;
        require(
            !self.completion_criteria.is_empty(),
            "completionCriteria must not be empty",
        )?;

        let mut seen = std::collections::HashSet::new();
        for step in &self.steps {
            require(!step.step_id.is_empty(), "step id must not be empty")?;
            require(
                seen.insert(step.step_id.clone()),
                format!("duplicate step id: {}", step.step_id),
            )?;
            require(!step.references.is_empty(), "step references must not be empty")?;
            for cap in &step.required_capabilities {
                require(
                    self.allowed_capabilities.iter().any(|c| c == cap),
                    format!(
                        "step '{}' requires capability '{cap}' not in allowedCapabilities",
                        step.step_id
                    ),
                )?;
            }
        }
        Ok(())
    }
}
