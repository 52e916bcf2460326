// SPDX-License-Identifier: MIT OR Apache-2.0
//! `ApprovalPolicy` and `ApprovalBundle` (§3.2): the quorum-of-signatures
//! requirement for sealing a change, and the collected signatures that
//! satisfy it.

use crate::support::{is_sha256_hex, require};
use gk_core::ArtifactMeta;
use gk_error::KernelError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A quorum requirement: `m` of `n` distinct approvers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Quorum {
    /// Minimum number of distinct signatures required.
    pub m: u32,
    /// Total number of eligible approvers the quorum is drawn from.
    pub n: u32,
}

/// A per-artifact-type approval rule: which artifact type this rule
/// governs, and which approvers are eligible to sign off on it.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ApprovalRule {
    /// The artifact type this rule governs (e.g. `"SealedChangePackage"`).
    #[serde(rename = "artifactType")]
    pub artifact_type: String,
    /// Approver ids eligible to satisfy this rule.
    #[serde(rename = "eligibleApprovers")]
    pub eligible_approvers: Vec<String>,
}

/// The quorum-of-signatures requirement for sealing a change (§3.2).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ApprovalPolicy {
    /// Universal artifact fields (§3.1).
    #[serde(flatten)]
    pub meta: ArtifactMeta,
    /// Every approver id recognized by this policy.
    pub approvers: Vec<String>,
    /// Per-artifact-type approval rules.
    pub rules: Vec<ApprovalRule>,
    /// The `m`-of-`n` quorum.
    pub quorum: Quorum,
    /// Must be `true`: every signature in a satisfying bundle must come
    /// from a distinct approver (§3.2).
    #[serde(rename = "requireDistinctApprovers")]
    pub require_distinct_approvers: bool,
    /// Signature algorithms this policy accepts; must be a subset of
    /// `{"RSA-SHA256"}` (§3.2).
    #[serde(rename = "allowedAlgorithms")]
    pub allowed_algorithms: Vec<String>,
    /// Self-hash: `hash(canonical(self ∖ hash))`.
    pub hash: String,
}

crate::impl_self_hashing!(ApprovalPolicy);

/// Every algorithm an `ApprovalPolicy.allowedAlgorithms` entry may name
/// (§3.2: `allowedAlgorithms ⊆ {"RSA-SHA256"}`).
pub const SUPPORTED_APPROVAL_ALGORITHMS: &[&str] = &["RSA-SHA256"];

impl ApprovalPolicy {
    /// Structural validation: universal fields, non-empty `approvers`,
    /// `quorum.m <= quorum.n` and both positive,
    /// `requireDistinctApprovers == true`, and `allowedAlgorithms` a
    /// subset of [`SUPPORTED_APPROVAL_ALGORITHMS`].
    pub fn validate(&self) -> Result<(), KernelError> {
        self.meta.validate()?;
        require(!self.approvers.is_empty(), "approvers must not be empty")?;
        require(self.quorum.n >= 1, "quorum.n must be at least 1")?;
        require(
            self.quorum.m >= 1 && self.quorum.m <= self.quorum.n,
            "quorum.m must be in 1..=quorum.n",
        )?;
        require(
            self.require_distinct_approvers,
            "requireDistinctApprovers must be true",
        )?;
        require(
            !self.allowed_algorithms.is_empty(),
            "allowedAlgorithms must not be empty",
        )?;
        for alg in &self.allowed_algorithms {
            require(
                SUPPORTED_APPROVAL_ALGORITHMS.contains(&alg.as_str()),
                format!("unsupported approval algorithm: {alg}"),
            )?;
        }

        let approver_set: HashSet<&str> = self.approvers.iter().map(String::as_str).collect();
        for rule in &self.rules {
            require(!rule.artifact_type.is_empty(), "artifactType must not be empty")?;
            for approver in &rule.eligible_approvers {
                require(
                    approver_set.contains(approver.as_str()),
                    format!("rule references unknown approver: {approver}"),
                )?;
            }
        }
        Ok(())
    }
}

/// One signature over a sealed payload, binding to a specific approver.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ApprovalSignature {
    /// The approver who produced this signature.
    #[serde(rename = "approverId")]
    pub approver_id: String,
    /// SHA-256 hex digest of the payload that was signed (e.g. the
    /// `SealedChangePackage`'s `packageHash`).
    #[serde(rename = "payloadHash")]
    pub payload_hash: String,
    /// Base64-encoded signature over `payloadHash`.
    pub signature: String,
    /// Algorithm used, must be in the bound policy's `allowedAlgorithms`.
    #[serde(rename = "signatureAlgorithm")]
    pub signature_algorithm: String,
}

/// The collected signatures satisfying an `ApprovalPolicy`'s quorum
/// (§3.2).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ApprovalBundle {
    /// Universal artifact fields (§3.1).
    #[serde(flatten)]
    pub meta: ArtifactMeta,
    /// Self-hash of the `ApprovalPolicy` this bundle satisfies.
    #[serde(rename = "approvalPolicyHash")]
    pub approval_policy_hash: String,
    /// The collected signatures.
    pub signatures: Vec<ApprovalSignature>,
    /// Self-hash: `hash(canonical(self ∖ hash))`.
    pub hash: String,
}

crate::impl_self_hashing!(ApprovalBundle);

impl ApprovalBundle {
    /// Structural validation: universal fields, bound-hash shape, and
    /// distinct-approver uniqueness (the quorum-size check against a
    /// specific `ApprovalPolicy` is `gk-kernel`'s job, since it needs the
    /// resolved policy).
    pub fn validate(&self) -> Result<(), KernelError> {
        self.meta.validate()?;
        require(
            is_sha256_hex(&self.approval_policy_hash),
            "approvalPolicyHash must be a SHA-256 hex digest",
        )?;
        require(!self.signatures.is_empty(), "signatures must not be empty")?;

        let mut seen = HashSet::new();
        for sig in &self.signatures {
            require(!sig.approver_id.is_empty(), "approverId must not be empty")?;
            require(
                seen.insert(sig.approver_id.clone()),
                format!("duplicate approver signature: {}", sig.approver_id),
            )?;
            require(
                is_sha256_hex(&sig.payload_hash),
                "payloadHash must be a SHA-256 hex digest",
            )?;
            require(!sig.signature.is_empty(), "signature must not be empty")?;
        }
        Ok(())
    }

    /// `true` once at least `m` distinct approvers have signed.
    #[must_use]
    pub fn satisfies_quorum(&self, quorum: Quorum) -> bool {
        self.signatures.len() as u32 >= quorum.m
    }
}
