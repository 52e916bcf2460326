// SPDX-License-Identifier: MIT OR Apache-2.0
//! `SessionAnchor` (§3.2): the terminal rollup of every hash produced
//! during a session, consumed by `SealedChangePackage` construction.

use crate::support::{is_sha256_hex, require};
use gk_core::ArtifactMeta;
use gk_error::KernelError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The terminal rollup of every hash produced during a session (§3.2).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionAnchor {
    /// Universal artifact fields (§3.1).
    #[serde(flatten)]
    pub meta: ArtifactMeta,
    /// The session this anchor closes out.
    #[serde(rename = "sessionId")]
    pub session_id: Uuid,
    /// Self-hash of the session's `ExecutionPlan`.
    #[serde(rename = "planHash")]
    pub plan_hash: String,
    /// Identity of the session's `DecisionLock`.
    #[serde(rename = "lockId")]
    pub lock_id: Uuid,
    /// Self-hash of the last `RunnerEvidence` item in the chain.
    #[serde(rename = "finalEvidenceHash")]
    pub final_evidence_hash: String,
    /// Self-hash of the session's `RunnerAttestation`, if one was
    /// produced.
    #[serde(rename = "finalAttestationHash", default, skip_serializing_if = "Option::is_none")]
    pub final_attestation_hash: Option<String>,
    /// Self-hash of the session's `RunnerIdentity`, if runner evidence was
    /// collected.
    #[serde(rename = "runnerIdentityHash", default, skip_serializing_if = "Option::is_none")]
    pub runner_identity_hash: Option<String>,
    /// Hash of the policy set evaluated for this session, if any.
    #[serde(rename = "policySetHash", default, skip_serializing_if = "Option::is_none")]
    pub policy_set_hash: Option<String>,
    /// Self-hash of the session's `PolicyEvaluation`, if any.
    #[serde(rename = "policyEvaluationHash", default, skip_serializing_if = "Option::is_none")]
    pub policy_evaluation_hash: Option<String>,
    /// Self-hash: `hash(canonical(self ∖ hash))`.
    pub hash: String,
}

crate::impl_self_hashing!(SessionAnchor);

impl SessionAnchor {
    /// Structural validation: universal fields, required bound-hash
    /// shapes, and optional bound-hash shapes when present.
    pub fn validate(&self) -> Result<(), KernelError> {
        self.meta.validate()?;
        require(is_sha256_hex(&self.plan_hash), "planHash must be a SHA-256 hex digest")?;
        require(
            is_sha256_hex(&self.final_evidence_hash),
            "finalEvidenceHash must be a SHA-256 hex digest",
        )?;
        for (name, value) in [
            ("finalAttestationHash", &self.final_attestation_hash),
            ("runnerIdentityHash", &self.runner_identity_hash),
            ("policySetHash", &self.policy_set_hash),
            ("policyEvaluationHash", &self.policy_evaluation_hash),
        ] {
            if let Some(hash) = value {
                require(is_sha256_hex(hash), format!("{name} must be a SHA-256 hex digest"))?;
            }
        }
        Ok(())
    }
}
