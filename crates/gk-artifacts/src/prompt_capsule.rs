// SPDX-License-Identifier: MIT OR Apache-2.0
//! `PromptCapsule` (§3.2): the exact, reproducible model invocation record
//! for a step — model parameters, intent, context, least-privilege
//! boundaries, and declared inputs.

use crate::support::{is_sha256_hex, require};
use gk_core::ArtifactMeta;
use gk_error::KernelError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Model invocation parameters. `temperature` and `topP` are pinned for
/// reproducibility (§3.2, B2); `seed` must fit in a signed 31-bit range.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CapsuleModel {
    /// Model provider (e.g. `"anthropic"`).
    pub provider: String,
    /// Model identifier.
    #[serde(rename = "modelId")]
    pub model_id: String,
    /// Sampling temperature; must equal exactly `0`.
    pub temperature: f64,
    /// Nucleus sampling parameter; must equal exactly `1`.
    #[serde(rename = "topP")]
    pub top_p: f64,
    /// Deterministic sampling seed, `0..=2^31-1`.
    pub seed: u32,
}

/// What the step is trying to accomplish.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ModelIntent {
    /// Excerpt of the session goal relevant to this step.
    #[serde(rename = "goalExcerpt")]
    pub goal_excerpt: String,
    /// Category of task (e.g. `"bugfix"`, `"refactor"`).
    #[serde(rename = "taskType")]
    pub task_type: String,
    /// Behaviors the model must not exhibit; at least 3 entries.
    #[serde(rename = "forbiddenBehaviors")]
    pub forbidden_behaviors: Vec<String>,
}

/// The literal prompt context sent to the model.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CapsuleContext {
    /// System prompt text.
    #[serde(rename = "systemPrompt")]
    pub system_prompt: String,
    /// User prompt text.
    #[serde(rename = "userPrompt")]
    pub user_prompt: String,
    /// Constraints surfaced to the model; at least 3 entries.
    pub constraints: Vec<String>,
}

/// Least-privilege surface the model's output is allowed to touch.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CapsuleBoundaries {
    /// Files the model may touch; at least 1 entry.
    #[serde(rename = "allowedFiles")]
    pub allowed_files: Vec<String>,
    /// Symbols the model may touch.
    #[serde(rename = "allowedSymbols", default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_symbols: Vec<String>,
    /// `DefinitionOfDone` item ids this invocation may work toward; at
    /// least 1 entry.
    #[serde(rename = "allowedDoDItems")]
    pub allowed_dod_items: Vec<String>,
    /// `ExecutionPlan` step ids this invocation may work toward; at least
    /// 1 entry.
    #[serde(rename = "allowedPlanStepIds")]
    pub allowed_plan_step_ids: Vec<String>,
    /// Capabilities this invocation may use.
    #[serde(rename = "allowedCapabilities", default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_capabilities: Vec<String>,
    /// Forbidden-surface patterns the output must not match; at least 5
    /// entries.
    #[serde(rename = "disallowedPatterns")]
    pub disallowed_patterns: Vec<String>,
    /// External module names the output may import from.
    #[serde(
        rename = "allowedExternalModules",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub allowed_external_modules: Vec<String>,
}

/// Declared inputs the model was given.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CapsuleInputs {
    /// Content hashes of files supplied to the model, keyed by path.
    #[serde(rename = "fileDigests")]
    pub file_digests: BTreeMap<String, String>,
    /// Whether `fileDigests` covers only part of `boundaries.allowedFiles`.
    #[serde(rename = "partialCoverage")]
    pub partial_coverage: bool,
}

/// The exact, reproducible model invocation record for one step (§3.2).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PromptCapsule {
    /// Universal artifact fields (§3.1).
    #[serde(flatten)]
    pub meta: ArtifactMeta,
    /// Identity of the bound `DecisionLock`.
    #[serde(rename = "lockId")]
    pub lock_id: Uuid,
    /// Self-hash of the bound `ExecutionPlan`.
    #[serde(rename = "planHash")]
    pub plan_hash: String,
    /// Model invocation parameters.
    pub model: CapsuleModel,
    /// Intent.
    pub intent: ModelIntent,
    /// Literal prompt context.
    pub context: CapsuleContext,
    /// Least-privilege boundaries.
    pub boundaries: CapsuleBoundaries,
    /// Declared inputs.
    pub inputs: CapsuleInputs,
    /// Self-hash: `hash(canonical(self ∖ hash))`.
    pub hash: String,
}

crate::impl_self_hashing!(PromptCapsule);

/// Maximum canonical JSON size of a `PromptCapsule`, shared with
/// `StepPacket` (§4.5 "packet JSON ≤ 200 KB").
pub const MAX_CAPSULE_SIZE_BYTES: usize = 200_000;

impl PromptCapsule {
    /// Structural + cross-field validation (§3.2, §4.5, B2):
    /// - universal fields, bound-hash shapes
    /// - `temperature == 0`, `topP == 1` exactly
    /// - `forbiddenBehaviors.len() >= 3`, `context.constraints.len() >= 3`
    /// - `boundaries.allowedFiles/allowedDoDItems/allowedPlanStepIds`
    ///   non-empty, `disallowedPatterns.len() >= 5`
    /// - `partialCoverage == false` implies `fileDigests` covers every
    ///   entry in `allowedFiles`
    /// - canonical size ceiling
    pub fn validate(&self) -> Result<(), KernelError> {
        self.meta.validate()?;
        require(is_sha256_hex(&self.plan_hash), "planHash must be a SHA-256 hex digest")?;

        require(self.model.temperature == 0.0, "model.temperature must equal 0")?;
        require(self.model.top_p == 1.0, "model.topP must equal 1")?;
        require(
            (self.model.seed as u64) <= (1u64 << 31) - 1,
            "model.seed must fit in 0..=2^31-1",
        )?;

        require(
            self.intent.forbidden_behaviors.len() >= 3,
            "intent.forbiddenBehaviors must have at least 3 entries",
        )?;
        require(
            self.context.constraints.len() >= 3,
            "context.constraints must have at least 3 entries",
        )?;

        require(!self.boundaries.allowed_files.is_empty(), "boundaries.allowedFiles must not be empty")?;
        require(
            !self.boundaries.allowed_dod_items.is_empty(),
            "boundaries.allowedDoDItems must not be empty",
        )?;
        require(
            !self.boundaries.allowed_plan_step_ids.is_empty(),
            "boundaries.allowedPlanStepIds must not be empty",
        )?;
        require(
            self.boundaries.disallowed_patterns.len() >= 5,
            "boundaries.disallowedPatterns must have at least 5 entries",
        )?;

        if !self.inputs.partial_coverage {
            for file in &self.boundaries.allowed_files {
                require(
                    self.inputs.file_digests.contains_key(file),
                    format!("fileDigests missing entry for allowedFiles entry '{file}' when partialCoverage is false"),
                )?;
            }
        }

        let size = gk_codec::canonicalize(self)
            .map(|b| b.len())
            .unwrap_or(usize::MAX);
        require(
            size <= MAX_CAPSULE_SIZE_BYTES,
            format!("PromptCapsule canonical size {size} exceeds {MAX_CAPSULE_SIZE_BYTES} bytes"),
        )?;

        Ok(())
    }
}
