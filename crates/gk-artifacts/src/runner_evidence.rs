// SPDX-License-Identifier: MIT OR Apache-2.0
//! `RunnerEvidence` (§3.2): one link in the hash-chained evidence trail a
//! runner emits while carrying out a plan's steps.

use crate::support::{is_sha256_hex, require};
use gk_core::ArtifactMeta;
use gk_error::KernelError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Capabilities whose use requires `humanConfirmationProof` before the
/// evidence item is accepted (§3.2 "required iff capability demands it").
pub const CAPABILITIES_REQUIRING_CONFIRMATION: &[&str] =
    &["delete_file", "network_access", "force_push", "spawn_process"];

/// One link in a runner's hash-chained evidence trail (§3.2, §3.3 "chain
/// continuity").
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunnerEvidence {
    /// Universal artifact fields (§3.1).
    #[serde(flatten)]
    pub meta: ArtifactMeta,
    /// Self-hash of the `ExecutionPlan` this evidence was produced under.
    #[serde(rename = "planHash")]
    pub plan_hash: String,
    /// The `ExecutionPlan` step this evidence corresponds to.
    #[serde(rename = "stepId")]
    pub step_id: String,
    /// What kind of evidence this item records (e.g. `"capability_use"`,
    /// `"checkpoint"`).
    #[serde(rename = "evidenceType")]
    pub evidence_type: String,
    /// The capability exercised for this evidence item, if any.
    #[serde(rename = "capabilityUsed", default, skip_serializing_if = "Option::is_none")]
    pub capability_used: Option<String>,
    /// Proof a human confirmed this action, required whenever
    /// `capabilityUsed` is in [`CAPABILITIES_REQUIRING_CONFIRMATION`].
    #[serde(rename = "humanConfirmationProof", default, skip_serializing_if = "Option::is_none")]
    pub human_confirmation_proof: Option<String>,
    /// Hash of the prior evidence item in this run's chain, `None` only
    /// for the first item (§3.3 "chain continuity").
    #[serde(rename = "prevEvidenceHash", default, skip_serializing_if = "Option::is_none")]
    pub prev_evidence_hash: Option<String>,
    /// Self-hash: `hash(canonical(self ∖ hash))`. Per the hash-exclusion
    /// rule resolved in DESIGN.md, `prevEvidenceHash` IS covered by this
    /// hash — only the `hash` field itself is excluded.
    #[serde(rename = "evidenceHash")]
    pub hash: String,
    /// Session this evidence belongs to, threaded through for the replay
    /// verifier's context reconstruction.
    #[serde(rename = "sessionId")]
    pub session_id: Uuid,
}

crate::impl_self_hashing!(RunnerEvidence);

impl RunnerEvidence {
    /// Structural validation: universal fields, bound-hash shape,
    /// non-empty `stepId`/`evidenceType`, `prevEvidenceHash` shape when
    /// present, and the confirmation-proof requirement for capabilities
    /// in [`CAPABILITIES_REQUIRING_CONFIRMATION`].
    pub fn validate(&self) -> Result<(), KernelError> {
        self.meta.validate()?;
        require(is_sha256_hex(&self.plan_hash), "planHash must be a SHA-256 hex digest")?;
        require(!self.step_id.is_empty(), "stepId must not be empty")?;
        require(!self.evidence_type.trim().is_empty(), "evidenceType must not be empty")?;

        if let Some(prev) = &self.prev_evidence_hash {
            require(is_sha256_hex(prev), "prevEvidenceHash must be a SHA-256 hex digest")?;
        }

        if let Some(capability) = &self.capability_used {
            let requires_confirmation = CAPABILITIES_REQUIRING_CONFIRMATION
                .iter()
                .any(|c| c == capability);
            require(
                !requires_confirmation || self.human_confirmation_proof.is_some(),
                format!("capability '{capability}' requires humanConfirmationProof"),
            )?;
        }
        Ok(())
    }

    /// Verifies this item correctly chains from `previous` (§3.3 "chain
    /// continuity" and "monotonic time"): `prevEvidenceHash` equals
    /// `previous`'s stored hash, and this item's timestamp is not before
    /// `previous`'s.
    pub fn chains_from(&self, previous: &RunnerEvidence) -> bool {
        self.prev_evidence_hash.as_deref() == Some(previous.hash.as_str())
            && self.meta.created_at >= previous.meta.created_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gk_core::Actor;

    fn sample() -> RunnerEvidence {
        let mut evidence = RunnerEvidence {
            meta: ArtifactMeta::stamp(Actor::system("runner-1").unwrap()),
            plan_hash: "a".repeat(64),
            step_id: "s1".into(),
            evidence_type: "checkpoint".into(),
            capability_used: Some("read_file".into()),
            human_confirmation_proof: None,
            prev_evidence_hash: None,
            hash: String::new(),
            session_id: Uuid::new_v4(),
        };
        evidence.stamp_hash().unwrap();
        evidence
    }

    #[test]
    fn valid_evidence_passes() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn dangerous_capability_without_proof_is_rejected() {
        let mut evidence = sample();
        evidence.capability_used = Some("delete_file".into());
        assert!(evidence.validate().is_err());
        evidence.human_confirmation_proof = Some("confirmed-by-alice".into());
        assert!(evidence.validate().is_ok());
    }

    #[test]
    fn chains_from_checks_prev_hash_and_monotonic_time() {
        let first = sample();
        let mut second = sample();
        second.prev_evidence_hash = Some(first.hash.clone());
        second.meta.created_at = first.meta.created_at;
        assert!(second.chains_from(&first));

        second.prev_evidence_hash = Some("wrong".repeat(10)[..64].to_string());
        assert!(!second.chains_from(&first));
    }
}
