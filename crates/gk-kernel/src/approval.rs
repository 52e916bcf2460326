// SPDX-License-Identifier: MIT OR Apache-2.0
//! `record_approval_policy`, `record_approval_bundle`: the quorum-of-
//! signatures gate on sealing a change (§3.2).

use crate::{self_hash_ok, Kernel};
use gk_artifacts::{ApprovalBundle, ApprovalPolicy, SelfHashing};
use gk_error::{KernelError, KernelErrorCode, KernelResult};
use std::collections::HashSet;
use uuid::Uuid;

impl Kernel {
    /// Records a session's `ApprovalPolicy` (§3.2). A session may only
    /// record one; later calls are rejected rather than silently replacing
    /// the quorum an already-collected `ApprovalBundle` may bind against.
    ///
    /// # Errors
    /// Propagates the artifact's own validation, or
    /// [`KernelErrorCode::ApprovalPolicyInvalid`] if an `ApprovalPolicy` has
    /// already been recorded for this session.
    pub fn record_approval_policy(&self, session_id: Uuid, policy: ApprovalPolicy) -> KernelResult<ApprovalPolicy> {
        policy.validate()?;
        self_hash_ok("approvalPolicy", &policy)?;

        let record = self.require_session(session_id)?;
        if record.approval_policy.is_some() {
            return Err(KernelError::new(
                KernelErrorCode::ApprovalPolicyInvalid,
                "an ApprovalPolicy has already been recorded for this session",
            ));
        }

        self.persist_artifact(
            session_id,
            &policy.meta.id.to_string(),
            "ApprovalPolicyRecorded",
            "application/json;schema=ApprovalPolicy",
            &policy,
        )?;
        self.mutate_session(session_id, |record| record.approval_policy = Some(policy.clone()))?;
        Ok(policy)
    }

    /// Records the `ApprovalBundle` satisfying the session's recorded
    /// `ApprovalPolicy` (§3.2), binding it by hash and checking every
    /// signature's approver and algorithm are ones the policy recognizes,
    /// and that the bundle actually reaches the policy's quorum.
    ///
    /// # Errors
    /// Returns [`KernelErrorCode::ApprovalPolicyInvalid`] if no
    /// `ApprovalPolicy` has been recorded, if a signature names an approver
    /// or algorithm the policy does not recognize, or if the bundle falls
    /// short of the quorum; returns [`KernelErrorCode::IdMismatch`] if
    /// `bundle.approvalPolicyHash` does not match the recorded policy.
    pub fn record_approval_bundle(&self, session_id: Uuid, bundle: ApprovalBundle) -> KernelResult<ApprovalBundle> {
        bundle.validate()?;
        self_hash_ok("approvalBundle", &bundle)?;

        let record = self.require_session(session_id)?;
        let policy = record.approval_policy.as_ref().ok_or_else(|| {
            KernelError::new(KernelErrorCode::ApprovalPolicyInvalid, "no ApprovalPolicy recorded for this session")
        })?;

        let check = gk_binding::check_hash_binding("approvalBundle.approvalPolicyHash", &bundle.approval_policy_hash, policy)?;
        if !check.passed {
            return Err(KernelError::new(
                KernelErrorCode::IdMismatch,
                "approvalBundle.approvalPolicyHash does not match the recorded ApprovalPolicy",
            )
            .with_detail("detail", check.detail.unwrap_or_default()));
        }

        let eligible: HashSet<&str> = policy.approvers.iter().map(String::as_str).collect();
        for sig in &bundle.signatures {
            if !eligible.contains(sig.approver_id.as_str()) {
                return Err(KernelError::new(
                    KernelErrorCode::ApprovalPolicyInvalid,
                    "approval signature from an approver not recognized by the bound ApprovalPolicy",
                )
                .with_detail("approverId", sig.approver_id.clone()));
            }
            if !policy.allowed_algorithms.iter().any(|alg| alg == &sig.signature_algorithm) {
                return Err(KernelError::new(
                    KernelErrorCode::ApprovalPolicyInvalid,
                    "approval signature algorithm not permitted by the bound ApprovalPolicy",
                )
                .with_detail("signatureAlgorithm", sig.signature_algorithm.clone()));
            }
        }
        if !bundle.satisfies_quorum(policy.quorum) {
            return Err(KernelError::new(
                KernelErrorCode::ApprovalPolicyInvalid,
                "approval bundle does not satisfy the bound ApprovalPolicy's quorum",
            )
            .with_detail("required", policy.quorum.m)
            .with_detail("actual", bundle.signatures.len() as u32));
        }

        self.persist_artifact(
            session_id,
            &bundle.meta.id.to_string(),
            "ApprovalBundleRecorded",
            "application/json;schema=ApprovalBundle",
            &bundle,
        )?;
        self.mutate_session(session_id, |record| record.approval_bundle = Some(bundle.clone()))?;
        Ok(bundle)
    }
}
