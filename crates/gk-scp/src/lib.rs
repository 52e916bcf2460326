// SPDX-License-Identifier: MIT OR Apache-2.0
//! Sealed Change Package builder and validator (C14, §4.14).
//!
//! [`gk_artifacts::SealedChangePackage`] already carries its own shape
//! validation and array-sorting invariant; this crate is the orchestration
//! layer around it — build one from a session's artifacts, or verify a
//! previously-built one against the artifacts it claims to seal. Composed
//! the same way as [`gk_binding`]'s `verify_*_binding` functions: a flat,
//! non-short-circuiting `Vec` of named checks aggregated into one report,
//! generalized from `abp-core/src/verify.rs`'s `ChainVerificationReport`
//! idiom to the terminal package.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use gk_artifacts::{
    ApprovalBundle, ApprovalPolicy, DecisionLock, DefinitionOfDone, ExecutionPlan, PolicyEvaluation,
    RepoSnapshot, RunnerAttestation, RunnerEvidence, RunnerIdentity, SealedChangePackage,
    SelfHashing, SessionAnchor,
};
use gk_core::Actor;
use gk_error::{KernelError, KernelErrorCode, KernelResult};

/// Every artifact a [`SealedChangePackage`] may seal, used both to build one
/// and to verify one against the artifacts it claims to reference.
pub struct SealArtifacts<'a> {
    /// The session's `DefinitionOfDone`.
    pub dod: &'a DefinitionOfDone,
    /// The session's `DecisionLock`.
    pub lock: &'a DecisionLock,
    /// The session's `ExecutionPlan`.
    pub plan: &'a ExecutionPlan,
    /// The `RepoSnapshot` the session executed against.
    pub snapshot: &'a RepoSnapshot,
    /// The derived `SymbolIndex`, if one was recorded.
    pub symbol_index: Option<&'a gk_artifacts::SymbolIndex>,
    /// Every `StepPacket` issued during the session, at least one.
    pub step_packets: &'a [gk_artifacts::StepPacket],
    /// Every `PatchArtifact` produced during the session.
    pub patch_artifacts: &'a [gk_artifacts::PatchArtifact],
    /// Every `ReviewerReport` produced during the session, at least one.
    pub reviewer_reports: &'a [gk_artifacts::ReviewerReport],
    /// The runner's hash-chained evidence trail, at least one item, in
    /// chain order.
    pub evidence_chain: &'a [RunnerEvidence],
    /// The runner's declared identity, if recorded.
    pub runner_identity: Option<&'a RunnerIdentity>,
    /// The runner's final attestation, if recorded.
    pub runner_attestation: Option<&'a RunnerAttestation>,
    /// Hash of the policy set evaluated, if any.
    pub policy_set_hash: Option<String>,
    /// The stored `PolicyEvaluation`, if policies were evaluated.
    pub policy_evaluation: Option<&'a PolicyEvaluation>,
    /// The session's `ApprovalPolicy`, if approval was required.
    pub approval_policy: Option<&'a ApprovalPolicy>,
    /// The session's `ApprovalBundle`, if approval was required.
    pub approval_bundle: Option<&'a ApprovalBundle>,
    /// The session's terminal `SessionAnchor`.
    pub session_anchor: &'a SessionAnchor,
}

/// Builds a [`SealedChangePackage`] from `artifacts`, normalizing its
/// array-of-hash fields before stamping so `packageHash` is set-stable
/// (I4).
///
/// # Errors
/// Returns [`KernelError`] if the built package fails its own structural
/// validation (an upstream artifact's own self-hash was never stamped,
/// leaving an empty hash field) or if canonicalization fails.
pub fn build_sealed_change_package(
    session_id: uuid::Uuid,
    artifacts: &SealArtifacts<'_>,
    created_by: Actor,
) -> KernelResult<SealedChangePackage> {
    let mut scp = SealedChangePackage {
        meta: gk_core::ArtifactMeta::stamp(created_by),
        session_id,
        dod_hash: artifacts.dod.stored_hash().to_string(),
        lock_hash: artifacts.lock.stored_hash().to_string(),
        plan_hash: artifacts.plan.stored_hash().to_string(),
        snapshot_hash: artifacts.snapshot.stored_hash().to_string(),
        symbol_index_hash: artifacts.symbol_index.map(|i| i.stored_hash().to_string()),
        step_packet_hashes: artifacts.step_packets.iter().map(|p| p.stored_hash().to_string()).collect(),
        patch_artifact_hashes: artifacts.patch_artifacts.iter().map(|p| p.stored_hash().to_string()).collect(),
        reviewer_report_hashes: artifacts.reviewer_reports.iter().map(|r| r.stored_hash().to_string()).collect(),
        evidence_chain_hashes: artifacts.evidence_chain.iter().map(|e| e.stored_hash().to_string()).collect(),
        runner_identity_hash: artifacts.runner_identity.map(|i| i.stored_hash().to_string()),
        runner_attestation_hash: artifacts.runner_attestation.map(|a| a.stored_hash().to_string()),
        policy_set_hash: artifacts.policy_set_hash.clone(),
        policy_evaluation_hash: artifacts.policy_evaluation.map(|e| e.stored_hash().to_string()),
        approval_policy_hash: artifacts.approval_policy.map(|p| p.stored_hash().to_string()),
        approval_bundle_hash: artifacts.approval_bundle.map(|b| b.stored_hash().to_string()),
        session_anchor_hash: artifacts.session_anchor.stored_hash().to_string(),
        hash: String::new(),
    };
    scp.normalize();
    scp.stamp_hash()?;
    scp.validate()
        .map_err(|e| KernelError::new(KernelErrorCode::SealInvalid, e.message().to_string()))?;
    Ok(scp)
}

/// The outcome of one named seal check (mirrors [`gk_binding::BindingCheck`]
/// but carries the specific [`KernelErrorCode`] a failure maps to).
#[derive(Debug, Clone)]
pub struct SealCheck {
    /// A short, stable name for the relationship being checked.
    pub name: String,
    /// Whether this check passed.
    pub passed: bool,
    /// The error code a failure of this check corresponds to.
    pub code: KernelErrorCode,
    /// Present when `passed` is `false`: diagnostic detail.
    pub detail: Option<String>,
}

/// The aggregated result of verifying a [`SealedChangePackage`] against the
/// artifacts it claims to seal (§4.14).
#[derive(Debug, Clone)]
pub struct SealReport {
    /// `true` iff every check in `checks` passed.
    pub passed: bool,
    /// Every check run, in declaration order.
    pub checks: Vec<SealCheck>,
}

fn check_hash(name: &str, code: KernelErrorCode, declared: &str, present: bool, actual: Option<&str>) -> SealCheck {
    if !present {
        return SealCheck {
            name: name.to_string(),
            passed: false,
            code: KernelErrorCode::SealMissingDependency,
            detail: Some(format!("no artifact supplied for {name}")),
        };
    }
    let actual = actual.unwrap_or_default();
    if declared == actual {
        SealCheck { name: name.to_string(), passed: true, code, detail: None }
    } else {
        SealCheck {
            name: name.to_string(),
            passed: false,
            code,
            detail: Some(format!("declared={declared} actual={actual}")),
        }
    }
}

fn check_hash_set(name: &str, declared: &[String], present: &[String]) -> SealCheck {
    let mut sorted_present: Vec<&str> = present.iter().map(String::as_str).collect();
    sorted_present.sort_unstable();
    let missing: Vec<&str> = declared
        .iter()
        .map(String::as_str)
        .filter(|h| !sorted_present.contains(h))
        .collect();
    if missing.is_empty() {
        SealCheck { name: name.to_string(), passed: true, code: KernelErrorCode::SealMissingDependency, detail: None }
    } else {
        SealCheck {
            name: name.to_string(),
            passed: false,
            code: KernelErrorCode::SealMissingDependency,
            detail: Some(format!("no supplied artifact matches hash(es): {}", missing.join(", "))),
        }
    }
}

fn push_binding(checks: &mut Vec<SealCheck>, report: &gk_binding::BindingReport) {
    for check in &report.checks {
        checks.push(SealCheck {
            name: check.name.clone(),
            passed: check.passed,
            code: KernelErrorCode::SealBindingViolation,
            detail: check.detail.clone(),
        });
    }
}

/// Verifies that `scp` is structurally valid and that every hash it
/// declares matches an artifact actually present in `artifacts`, including
/// the cross-artifact bindings those artifacts participate in (§4.14).
/// Every check always runs; a failure is recorded, not raised.
///
/// # Errors
/// Returns [`KernelError`] only on a canonicalization failure internal to a
/// check; a failed seal is reported in the returned [`SealReport`], not
/// raised as an `Err`.
pub fn verify_sealed_change_package(scp: &SealedChangePackage, artifacts: &SealArtifacts<'_>) -> KernelResult<SealReport> {
    let mut checks = Vec::new();

    if let Err(e) = scp.validate() {
        checks.push(SealCheck {
            name: "sealedChangePackage.structuralValidity".to_string(),
            passed: false,
            code: KernelErrorCode::SealInvalid,
            detail: Some(e.message().to_string()),
        });
    } else {
        checks.push(SealCheck {
            name: "sealedChangePackage.structuralValidity".to_string(),
            passed: true,
            code: KernelErrorCode::SealInvalid,
            detail: None,
        });
    }

    checks.push(check_hash(
        "sealedChangePackage.dodHash",
        KernelErrorCode::SealHashMismatch,
        &scp.dod_hash,
        true,
        Some(artifacts.dod.stored_hash()),
    ));
    checks.push(check_hash(
        "sealedChangePackage.lockHash",
        KernelErrorCode::SealHashMismatch,
        &scp.lock_hash,
        true,
        Some(artifacts.lock.stored_hash()),
    ));
    checks.push(check_hash(
        "sealedChangePackage.planHash",
        KernelErrorCode::SealHashMismatch,
        &scp.plan_hash,
        true,
        Some(artifacts.plan.stored_hash()),
    ));
    checks.push(check_hash(
        "sealedChangePackage.snapshotHash",
        KernelErrorCode::SealHashMismatch,
        &scp.snapshot_hash,
        true,
        Some(artifacts.snapshot.stored_hash()),
    ));
    checks.push(check_hash(
        "sealedChangePackage.sessionAnchorHash",
        KernelErrorCode::SealHashMismatch,
        &scp.session_anchor_hash,
        true,
        Some(artifacts.session_anchor.stored_hash()),
    ));

    if let Some(declared) = &scp.symbol_index_hash {
        checks.push(check_hash(
            "sealedChangePackage.symbolIndexHash",
            KernelErrorCode::SealHashMismatch,
            declared,
            artifacts.symbol_index.is_some(),
            artifacts.symbol_index.map(SelfHashing::stored_hash),
        ));
    }
    if let Some(declared) = &scp.runner_identity_hash {
        checks.push(check_hash(
            "sealedChangePackage.runnerIdentityHash",
            KernelErrorCode::SealHashMismatch,
            declared,
            artifacts.runner_identity.is_some(),
            artifacts.runner_identity.map(SelfHashing::stored_hash),
        ));
    }
    if let Some(declared) = &scp.runner_attestation_hash {
        checks.push(check_hash(
            "sealedChangePackage.runnerAttestationHash",
            KernelErrorCode::SealHashMismatch,
            declared,
            artifacts.runner_attestation.is_some(),
            artifacts.runner_attestation.map(SelfHashing::stored_hash),
        ));
    }
    if let Some(declared) = &scp.policy_evaluation_hash {
        checks.push(check_hash(
            "sealedChangePackage.policyEvaluationHash",
            KernelErrorCode::SealHashMismatch,
            declared,
            artifacts.policy_evaluation.is_some(),
            artifacts.policy_evaluation.map(SelfHashing::stored_hash),
        ));
    }
    if let Some(declared) = &scp.approval_policy_hash {
        checks.push(check_hash(
            "sealedChangePackage.approvalPolicyHash",
            KernelErrorCode::SealHashMismatch,
            declared,
            artifacts.approval_policy.is_some(),
            artifacts.approval_policy.map(SelfHashing::stored_hash),
        ));
    }
    if let Some(declared) = &scp.approval_bundle_hash {
        checks.push(check_hash(
            "sealedChangePackage.approvalBundleHash",
            KernelErrorCode::SealHashMismatch,
            declared,
            artifacts.approval_bundle.is_some(),
            artifacts.approval_bundle.map(SelfHashing::stored_hash),
        ));
    }

    checks.push(check_hash_set(
        "sealedChangePackage.stepPacketHashes",
        &scp.step_packet_hashes,
        &artifacts.step_packets.iter().map(|p| p.stored_hash().to_string()).collect::<Vec<_>>(),
    ));
    checks.push(check_hash_set(
        "sealedChangePackage.patchArtifactHashes",
        &scp.patch_artifact_hashes,
        &artifacts.patch_artifacts.iter().map(|p| p.stored_hash().to_string()).collect::<Vec<_>>(),
    ));
    checks.push(check_hash_set(
        "sealedChangePackage.reviewerReportHashes",
        &scp.reviewer_report_hashes,
        &artifacts.reviewer_reports.iter().map(|r| r.stored_hash().to_string()).collect::<Vec<_>>(),
    ));
    checks.push(check_hash_set(
        "sealedChangePackage.evidenceChainHashes",
        &scp.evidence_chain_hashes,
        &artifacts.evidence_chain.iter().map(|e| e.stored_hash().to_string()).collect::<Vec<_>>(),
    ));

    push_binding(&mut checks, &gk_binding::verify_decision_lock_binding(artifacts.lock, artifacts.dod)?);
    push_binding(
        &mut checks,
        &gk_binding::verify_execution_plan_binding(artifacts.plan, artifacts.lock, artifacts.dod)?,
    );
    if !artifacts.evidence_chain.is_empty() {
        push_binding(&mut checks, &gk_binding::verify_evidence_chain(artifacts.evidence_chain)?);
    }
    if let (Some(attestation), Some(identity), Some(tail)) = (
        artifacts.runner_attestation,
        artifacts.runner_identity,
        artifacts.evidence_chain.last(),
    ) {
        push_binding(
            &mut checks,
            &gk_binding::verify_runner_attestation_binding(attestation, artifacts.plan, identity, tail)?,
        );
    }
    if let Some(tail) = artifacts.evidence_chain.last() {
        push_binding(
            &mut checks,
            &gk_binding::verify_session_anchor_binding(artifacts.session_anchor, artifacts.plan, tail)?,
        );
    }

    let passed = checks.iter().all(|c| c.passed);
    Ok(SealReport { passed, checks })
}

/// Raises the first failing check's [`KernelErrorCode`] if `report` did not
/// pass; otherwise succeeds.
///
/// # Errors
/// Returns [`KernelError`] iff `report.passed` is `false`.
pub fn require_seal_valid(report: &SealReport) -> KernelResult<()> {
    if report.passed {
        return Ok(());
    }
    let failure = report.checks.iter().find(|c| !c.passed).expect("passed is false iff a check failed");
    Err(
        KernelError::new(failure.code, format!("seal check '{}' failed", failure.name))
            .with_detail("name", &failure.name)
            .with_detail("detail", failure.detail.clone().unwrap_or_default()),
    )
}
