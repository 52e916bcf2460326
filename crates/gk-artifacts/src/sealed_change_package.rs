// SPDX-License-Identifier: MIT OR Apache-2.0
//! `SealedChangePackage` (§3.2): the terminal artifact enumerating every
//! hash produced by a session, with array-of-hash fields sorted before
//! hashing so `packageHash` is invariant under array reordering (I4).

use crate::support::{is_sha256_hex, require};
use gk_core::ArtifactMeta;
use gk_error::KernelError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The terminal artifact enumerating every hash produced by a session
/// (§3.2, §4.14).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SealedChangePackage {
    /// Universal artifact fields (§3.1).
    #[serde(flatten)]
    pub meta: ArtifactMeta,
    /// The session this package seals.
    #[serde(rename = "sessionId")]
    pub session_id: Uuid,
    /// Self-hash of the session's `DefinitionOfDone`.
    #[serde(rename = "dodHash")]
    pub dod_hash: String,
    /// Self-hash of the session's `DecisionLock`.
    #[serde(rename = "lockHash")]
    pub lock_hash: String,
    /// Self-hash of the session's `ExecutionPlan`.
    #[serde(rename = "planHash")]
    pub plan_hash: String,
    /// Self-hash of the session's `RepoSnapshot`.
    #[serde(rename = "snapshotHash")]
    pub snapshot_hash: String,
    /// Self-hash of the session's `SymbolIndex`, if one was recorded.
    #[serde(rename = "symbolIndexHash", default, skip_serializing_if = "Option::is_none")]
    pub symbol_index_hash: Option<String>,
    /// Self-hashes of every `StepPacket`, sorted before hashing (§4.14).
    #[serde(rename = "stepPacketHashes")]
    pub step_packet_hashes: Vec<String>,
    /// Self-hashes of every `PatchArtifact`, sorted before hashing.
    #[serde(rename = "patchArtifactHashes")]
    pub patch_artifact_hashes: Vec<String>,
    /// Self-hashes of every `ReviewerReport`, sorted before hashing.
    #[serde(rename = "reviewerReportHashes")]
    pub reviewer_report_hashes: Vec<String>,
    /// Self-hashes of every `RunnerEvidence` item, sorted before hashing.
    #[serde(rename = "evidenceChainHashes")]
    pub evidence_chain_hashes: Vec<String>,
    /// Self-hash of the session's `RunnerIdentity`, if one was recorded.
    #[serde(rename = "runnerIdentityHash", default, skip_serializing_if = "Option::is_none")]
    pub runner_identity_hash: Option<String>,
    /// Self-hash of the session's `RunnerAttestation`, if one was
    /// recorded.
    #[serde(rename = "runnerAttestationHash", default, skip_serializing_if = "Option::is_none")]
    pub runner_attestation_hash: Option<String>,
    /// Hash of the policy set evaluated, if any.
    #[serde(rename = "policySetHash", default, skip_serializing_if = "Option::is_none")]
    pub policy_set_hash: Option<String>,
    /// Self-hash of the session's `PolicyEvaluation`, if any.
    #[serde(rename = "policyEvaluationHash", default, skip_serializing_if = "Option::is_none")]
    pub policy_evaluation_hash: Option<String>,
    /// Self-hash of the session's `ApprovalPolicy`, if approval was
    /// required.
    #[serde(rename = "approvalPolicyHash", default, skip_serializing_if = "Option::is_none")]
    pub approval_policy_hash: Option<String>,
    /// Self-hash of the session's `ApprovalBundle`, if approval was
    /// required.
    #[serde(rename = "approvalBundleHash", default, skip_serializing_if = "Option::is_none")]
    pub approval_bundle_hash: Option<String>,
    /// Self-hash of the session's `SessionAnchor`.
    #[serde(rename = "sessionAnchorHash")]
    pub session_anchor_hash: String,
    /// Self-hash, named `packageHash` on the wire (§4.14):
    /// `hash(canonical(self ∖ hash))` computed AFTER array normalization.
    #[serde(rename = "packageHash")]
    pub hash: String,
}

crate::impl_self_hashing!(SealedChangePackage);

impl SealedChangePackage {
    /// Sorts every array-of-hash field in place. Must be called before
    /// [`crate::SelfHashing::stamp_hash`] so `packageHash` is invariant
    /// under the caller's original ordering (I4).
    pub fn normalize(&mut self) {
        self.step_packet_hashes.sort();
        self.patch_artifact_hashes.sort();
        self.reviewer_report_hashes.sort();
        self.evidence_chain_hashes.sort();
    }

    /// Structural validation: universal fields, every required/optional
    /// hash field's shape, non-empty required arrays, and that every
    /// array-of-hash field is sorted (the `normalize` precondition §4.14).
    pub fn validate(&self) -> Result<(), KernelError> {
        self.meta.validate()?;
        for (name, value) in [
            ("dodHash", self.dod_hash.as_str()),
            ("lockHash", self.lock_hash.as_str()),
            ("planHash", self.plan_hash.as_str()),
            ("snapshotHash", self.snapshot_hash.as_str()),
            ("sessionAnchorHash", self.session_anchor_hash.as_str()),
        ] {
            require(is_sha256_hex(value), format!("{name} must be a SHA-256 hex digest"))?;
        }
        for (name, value) in [
            ("symbolIndexHash", &self.symbol_index_hash),
            ("runnerIdentityHash", &self.runner_identity_hash),
            ("runnerAttestationHash", &self.runner_attestation_hash),
            ("policySetHash", &self.policy_set_hash),
            ("policyEvaluationHash", &self.policy_evaluation_hash),
            ("approvalPolicyHash", &self.approval_policy_hash),
            ("approvalBundleHash", &self.approval_bundle_hash),
        ] {
            if let Some(hash) = value {
                require(is_sha256_hex(hash), format!("{name} must be a SHA-256 hex digest"))?;
            }
        }

        require(!self.step_packet_hashes.is_empty(), "stepPacketHashes must not be empty")?;
        require(
            !self.reviewer_report_hashes.is_empty(),
            "reviewerReportHashes must not be empty",
        )?;
        require(
            !self.evidence_chain_hashes.is_empty(),
            "evidenceChainHashes must not be empty",
        )?;

        for (name, hashes) in [
            ("stepPacketHashes", &self.step_packet_hashes),
            ("patchArtifactHashes", &self.patch_artifact_hashes),
            ("reviewerReportHashes", &self.reviewer_report_hashes),
            ("evidenceChainHashes", &self.evidence_chain_hashes),
        ] {
            for hash in hashes {
                require(is_sha256_hex(hash), format!("{name} entry must be a SHA-256 hex digest"))?;
            }
            let mut sorted = hashes.clone();
            sorted.sort();
            require(&sorted == hashes, format!("{name} must be sorted before hashing (I4)"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SelfHashing;
    use gk_core::Actor;

    fn sample() -> SealedChangePackage {
        let mut scp = SealedChangePackage {
            meta: ArtifactMeta::stamp(Actor::system("gk-kernel").unwrap()),
            session_id: Uuid::new_v4(),
            dod_hash: "a".repeat(64),
            lock_hash: "b".repeat(64),
            plan_hash: "c".repeat(64),
            snapshot_hash: "d".repeat(64),
            symbol_index_hash: None,
            step_packet_hashes: vec!["e".repeat(64), "f".repeat(64)],
            patch_artifact_hashes: vec![],
            reviewer_report_hashes: vec!["g".repeat(64)],
            evidence_chain_hashes: vec!["h".repeat(64)],
            runner_identity_hash: None,
            runner_attestation_hash: None,
            policy_set_hash: None,
            policy_evaluation_hash: None,
            approval_policy_hash: None,
            approval_bundle_hash: None,
            session_anchor_hash: "i".repeat(64),
            hash: String::new(),
        };
        scp.normalize();
        scp.stamp_hash().unwrap();
        scp
    }

    #[test]
    fn valid_package_passes() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn package_hash_is_invariant_under_reordering() {
        let mut a = sample();
        a.step_packet_hashes = vec!["f".repeat(64), "e".repeat(64)];
        a.normalize();
        a.hash.clear();
        let hash_a = a.recompute_hash().unwrap();

        let mut b = sample();
        b.step_packet_hashes = vec!["e".repeat(64), "f".repeat(64)];
        b.normalize();
        b.hash.clear();
        let hash_b = b.recompute_hash().unwrap();

        assert_eq!(hash_a, hash_b);
    }

    #[test]
    fn unsorted_array_fails_validation() {
        let mut scp = sample();
        scp.step_packet_hashes = vec!["f".repeat(64), "e".repeat(64)];
        assert!(scp.validate().is_err());
    }

    #[test]
    fn empty_required_array_is_rejected() {
        let mut scp = sample();
        scp.step_packet_hashes.clear();
        assert!(scp.validate().is_err());
    }
}
