// SPDX-License-Identifier: MIT OR Apache-2.0
//! `StepPacket` (§3.2): the least-privilege envelope a single execution
//! step is handed, binding to a `DecisionLock`, `ExecutionPlan`,
//! `PromptCapsule`, `RepoSnapshot`, and `DefinitionOfDone` by hash.

use crate::support::{is_sha256_hex, require};
use gk_core::ArtifactMeta;
use gk_error::{KernelError, KernelErrorCode};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// A source excerpt the step was handed as context.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Excerpt {
    /// Repo-relative path the excerpt was taken from.
    pub path: String,
    /// 1-based first line of the excerpt.
    #[serde(rename = "startLine")]
    pub start_line: u32,
    /// 1-based last line of the excerpt, inclusive.
    #[serde(rename = "endLine")]
    pub end_line: u32,
    /// The excerpt text itself; at most 2000 characters (§4.5).
    pub text: String,
}

impl Excerpt {
    fn validate(&self) -> Result<(), KernelError> {
        require(self.start_line >= 1, "excerpt startLine must be >= 1")?;
        require(
            self.start_line <= self.end_line,
            "excerpt startLine must be <= endLine",
        )?;
        require(
            self.text.chars().count() <= 2_000,
            "excerpt text must be at most 2000 characters",
        )?;
        Ok(())
    }
}

/// The context a step packet carries: declared file digests plus any
/// source excerpts handed to the step.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StepContext {
    /// Content hashes of files made available to the step, keyed by path.
    #[serde(rename = "fileDigests")]
    pub file_digests: BTreeMap<String, String>,
    /// Source excerpts handed to the step.
    pub excerpts: Vec<Excerpt>,
}

/// The least-privilege envelope a single execution step is handed (§3.2).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StepPacket {
    /// Universal artifact fields (§3.1).
    #[serde(flatten)]
    pub meta: ArtifactMeta,
    /// Identity of the bound `DecisionLock`.
    #[serde(rename = "lockId")]
    pub lock_id: Uuid,
    /// Self-hash of the bound `ExecutionPlan`.
    #[serde(rename = "planHash")]
    pub plan_hash: String,
    /// Self-hash of the bound `PromptCapsule`.
    #[serde(rename = "capsuleHash")]
    pub capsule_hash: String,
    /// Self-hash of the bound `RepoSnapshot`.
    #[serde(rename = "snapshotHash")]
    pub snapshot_hash: String,
    /// Identity of the bound `DefinitionOfDone`.
    #[serde(rename = "dodId")]
    pub dod_id: Uuid,
    /// The `ExecutionPlan` step this packet carries out.
    #[serde(rename = "stepId")]
    pub step_id: String,
    /// `DefinitionOfDone` item ids this step works toward.
    #[serde(rename = "dodItemRefs")]
    pub dod_item_refs: Vec<String>,
    /// Files this step may touch. Must be a subset of the bound capsule's
    /// `boundaries.allowedFiles` (§3.3 "least privilege propagation").
    #[serde(rename = "allowedFiles")]
    pub allowed_files: Vec<String>,
    /// Symbols this step may touch.
    #[serde(rename = "allowedSymbols", default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_symbols: Vec<String>,
    /// Capabilities this step may use.
    #[serde(rename = "requiredCapabilities", default, skip_serializing_if = "Vec::is_empty")]
    pub required_capabilities: Vec<String>,
    /// Order in which reviewer roles must run for this step; at least 3
    /// entries (§4.9).
    #[serde(rename = "reviewerSequence")]
    pub reviewer_sequence: Vec<String>,
    /// Declared file digests and excerpts.
    pub context: StepContext,
    /// The exact `DecisionLock.goal` substring this step traces to (§3.3
    /// "goal preservation").
    #[serde(rename = "goalReference")]
    pub goal_reference: String,
    /// Self-hash: `hash(canonical(self ∖ hash))`.
    pub hash: String,
}

crate::impl_self_hashing!(StepPacket);

/// Maximum canonical JSON size of a `StepPacket` (§4.5, B3).
pub const MAX_PACKET_SIZE_BYTES: usize = 200_000;

impl StepPacket {
    /// Structural + cross-field validation (§3.2, §4.5, §4.8, B3):
    /// - universal fields, bound-hash shapes
    /// - non-empty `stepId`/`dodItemRefs`/`allowedFiles`/`reviewerSequence`
    /// - `reviewerSequence.len() >= 3`, no duplicate roles
    /// - non-empty `goalReference`
    /// - each excerpt's own invariants
    /// - no forbidden key (§4.5(e)) present in the serialized object
    /// - canonical size ceiling (B3)
    pub fn validate(&self) -> Result<(), KernelError> {
        self.meta.validate()?;
        require(is_sha256_hex(&self.plan_hash), "planHash must be a SHA-256 hex digest")?;
        require(is_sha256_hex(&self.capsule_hash), "capsuleHash must be a SHA-256 hex digest")?;
        require(is_sha256_hex(&self.snapshot_hash), "snapshotHash must be a SHA-256 hex digest")?;
        require(!self.step_id.is_empty(), "stepId must not be empty")?;
        require(!self.dod_item_refs.is_empty(), "dodItemRefs must not be empty")?;
        require(!self.allowed_files.is_empty(), "allowedFiles must not be empty")?;
        require(!self.goal_reference.trim().is_empty(), "goalReference must not be empty")?;

        require(
            self.reviewer_sequence.len() >= 3,
            "reviewerSequence must have at least 3 entries",
        )?;
        let mut seen = std::collections::HashSet::new();
        for role in &self.reviewer_sequence {
            if !seen.insert(role.clone()) {
                return Err(KernelError::new(
                    KernelErrorCode::ReviewerDuplicate,
                    format!("duplicate reviewer role in reviewerSequence: {role}"),
                )
                .with_detail("role", role));
            }
        }

        for excerpt in &self.context.excerpts {
            excerpt.validate()?;
        }

        let value = serde_json::to_value(self).map_err(|e| {
            KernelError::new(KernelErrorCode::StepEnvelopeInvalid, format!("serialization failed: {e}"))
        })?;
        for key in crate::FORBIDDEN_STEP_PACKET_KEYS {
            require(
                !contains_key(&value, key),
                format!("step packet must not contain forbidden key '{key}'"),
            )
            .map_err(|_| {
                KernelError::new(
                    KernelErrorCode::StepPacketLintFailed,
                    format!("step packet contains forbidden key '{key}'"),
                )
            })?;
        }

        let size = gk_codec::canonicalize(self).map(|b| b.len()).unwrap_or(usize::MAX);
        if size > MAX_PACKET_SIZE_BYTES {
            return Err(KernelError::new(
                KernelErrorCode::StepPacketLintFailed,
                format!("StepPacket canonical size {size} exceeds {MAX_PACKET_SIZE_BYTES} bytes"),
            ));
        }
        Ok(())
    }
}

fn contains_key(value: &serde_json::Value, key: &str) -> bool {
    match value {
        serde_json::Value::Object(map) => {
            map.contains_key(key) || map.values().any(|v| contains_key(v, key))
        }
        serde_json::Value::Array(items) => items.iter().any(|v| contains_key(v, key)),
        _ => false,
    }
}
