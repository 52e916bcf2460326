// SPDX-License-Identifier: MIT OR Apache-2.0
//! Cross-artifact hash-binding resolution (C6, §4.6).
//!
//! Every artifact that references another by hash (`planHash`, `dodHash`,
//! `lockHash`, ...) declares that reference as a plain string field; nothing
//! about the Rust type system enforces that the declared hash still matches
//! the referent. This crate is where that check lives: given a declared
//! hash and the artifact it is supposed to bind to, recompute the
//! referent's self-hash and compare.
//!
//! Checks are composed the way [`gk_artifacts::SelfHashing`]'s callers in
//! `abp-core`'s `ReceiptVerifier`/`ChainVerifier` compose theirs: a flat
//! `Vec` of independently-run, named checks, aggregated into one report
//! rather than short-circuiting on the first failure (§3.3 "reference
//! closure").
#![deny(unsafe_code)]
#![warn(missing_docs)]

use gk_artifacts::SelfHashing;
use gk_error::{KernelError, KernelErrorCode};

/// The outcome of one named binding check.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BindingCheck {
    /// A short, stable name for the relationship being checked, e.g.
    /// `"executionPlan.lockHash"`.
    pub name: String,
    /// Whether the declared hash matched the recomputed one.
    pub passed: bool,
    /// Present when `passed` is `false`: the declared and recomputed
    /// values, for diagnostics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl BindingCheck {
    fn matched(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            detail: None,
        }
    }

    fn mismatched(name: impl Into<String>, declared: &str, actual: &str) -> Self {
        Self {
            name: name.into(),
            passed: false,
            detail: Some(format!("declared={declared} actual={actual}")),
        }
    }
}

/// The aggregated result of running a set of [`BindingCheck`]s (§4.6).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BindingReport {
    /// `true` iff every check in `checks` passed.
    pub passed: bool,
    /// Every check run, in declaration order, passed or not.
    pub checks: Vec<BindingCheck>,
}

impl BindingReport {
    /// Builds a report from a completed list of checks; `passed` is the
    /// conjunction of every check.
    #[must_use]
    pub fn from_checks(checks: Vec<BindingCheck>) -> Self {
        let passed = checks.iter().all(|c| c.passed);
        Self { passed, checks }
    }

    /// Returns the first mismatch, if any, as a ready-to-raise
    /// [`KernelError`] with code `ID_MISMATCH`. Callers that need to
    /// fail-fast on an otherwise-exhaustive report use this; callers that
    /// want the full report use the struct directly.
    #[must_use]
    pub fn first_error(&self) -> Option<KernelError> {
        self.checks.iter().find(|c| !c.passed).map(|c| {
            KernelError::new(
                KernelErrorCode::IdMismatch,
                format!("binding check '{}' failed", c.name),
            )
            .with_detail("check", &c.name)
            .with_detail("detail", c.detail.clone().unwrap_or_default())
        })
    }
}

/// Checks that `declared` (a hash a referencing artifact carries) equals
/// the self-hash of `referent`, recomputed fresh rather than trusted from
/// the referent's own stored `hash` field.
///
/// # Errors
/// Returns [`KernelError`] only if `referent` cannot be canonicalized;
/// this is a schema-level failure distinct from a binding mismatch.
pub fn check_hash_binding<T: SelfHashing>(
    name: &str,
    declared: &str,
    referent: &T,
) -> Result<BindingCheck, KernelError> {
    let actual = referent.recompute_hash()?;
    if declared == actual {
        Ok(BindingCheck::matched(name))
    } else {
        Ok(BindingCheck::mismatched(name, declared, &actual))
    }
}

/// Checks that a referencing artifact's own self-hash still matches its
/// stored value — used to defend against the case where the referent was
/// mutated after the reference was declared, but the referencing artifact
/// itself was left untouched.
///
/// # Errors
/// Returns [`KernelError`] only on a canonicalization failure.
pub fn check_self_hash<T: SelfHashing>(name: &str, artifact: &T) -> Result<BindingCheck, KernelError> {
    let actual = artifact.recompute_hash()?;
    if actual == artifact.stored_hash() {
        Ok(BindingCheck::matched(name))
    } else {
        Ok(BindingCheck::mismatched(name, artifact.stored_hash(), &actual))
    }
}

/// Verifies the `DecisionLock -> DefinitionOfDone` binding (§3.2).
///
/// # Errors
/// Returns [`KernelError`] only on a canonicalization failure.
pub fn verify_decision_lock_binding(
    lock: &gk_artifacts::DecisionLock,
    dod: &gk_artifacts::DefinitionOfDone,
) -> Result<BindingReport, KernelError> {
    let checks = vec![
        check_hash_binding("decisionLock.dodHash", &lock.dod_hash, dod)?,
        check_self_hash("decisionLock.selfHash", lock)?,
    ];
    Ok(BindingReport::from_checks(checks))
}

/// Verifies the `ExecutionPlan -> DecisionLock, DefinitionOfDone` bindings
/// and the goal-preservation invariant (§3.2, §3.3).
///
/// # Errors
/// Returns [`KernelError`] only on a canonicalization failure.
pub fn verify_execution_plan_binding(
    plan: &gk_artifacts::ExecutionPlan,
    lock: &gk_artifacts::DecisionLock,
    dod: &gk_artifacts::DefinitionOfDone,
) -> Result<BindingReport, KernelError> {
    let mut checks = vec![
        check_hash_binding("executionPlan.lockHash", &plan.lock_hash, lock)?,
        check_hash_binding("executionPlan.dodHash", &plan.dod_hash, dod)?,
        check_self_hash("executionPlan.selfHash", plan)?,
    ];
    checks.push(BindingCheck {
        name: "executionPlan.goalPreservation".into(),
        passed: plan.goal == lock.goal,
        detail: (plan.goal != lock.goal)
            .then(|| format!("declared={} actual={}", plan.goal, lock.goal)),
    });
    Ok(BindingReport::from_checks(checks))
}

/// Verifies the `StepPacket -> ExecutionPlan, PromptCapsule, RepoSnapshot`
/// bindings (§3.2).
///
/// # Errors
/// Returns [`KernelError`] only on a canonicalization failure.
pub fn verify_step_packet_binding(
    packet: &gk_artifacts::StepPacket,
    plan: &gk_artifacts::ExecutionPlan,
    capsule: &gk_artifacts::PromptCapsule,
    snapshot: &gk_artifacts::RepoSnapshot,
) -> Result<BindingReport, KernelError> {
    let checks = vec![
        check_hash_binding("stepPacket.planHash", &packet.plan_hash, plan)?,
        check_hash_binding("stepPacket.capsuleHash", &packet.capsule_hash, capsule)?,
        check_hash_binding("stepPacket.snapshotHash", &packet.snapshot_hash, snapshot)?,
        check_self_hash("stepPacket.selfHash", packet)?,
    ];
    Ok(BindingReport::from_checks(checks))
}

/// Verifies the `PatchApplyReport -> PatchArtifact, RepoSnapshot` bindings
/// (§3.2).
///
/// # Errors
/// Returns [`KernelError`] only on a canonicalization failure.
pub fn verify_patch_apply_report_binding(
    report: &gk_artifacts::PatchApplyReport,
    patch: &gk_artifacts::PatchArtifact,
    snapshot: &gk_artifacts::RepoSnapshot,
) -> Result<BindingReport, KernelError> {
    let checks = vec![
        check_hash_binding("patchApplyReport.patchHash", &report.patch_hash, patch)?,
        check_hash_binding("patchApplyReport.snapshotHash", &report.snapshot_hash, snapshot)?,
        check_self_hash("patchApplyReport.selfHash", report)?,
    ];
    Ok(BindingReport::from_checks(checks))
}

/// Verifies the `RunnerAttestation -> ExecutionPlan, RunnerIdentity,
/// RunnerEvidence(tail)` bindings and the evidence-chain-tail identity
/// (§3.2, §3.3 "chain continuity").
///
/// # Errors
/// Returns [`KernelError`] only on a canonicalization failure.
pub fn verify_runner_attestation_binding(
    attestation: &gk_artifacts::RunnerAttestation,
    plan: &gk_artifacts::ExecutionPlan,
    identity: &gk_artifacts::RunnerIdentity,
    evidence_tail: &gk_artifacts::RunnerEvidence,
) -> Result<BindingReport, KernelError> {
    let checks = vec![
        check_hash_binding("runnerAttestation.planHash", &attestation.plan_hash, plan)?,
        check_hash_binding("runnerAttestation.identityHash", &attestation.identity_hash, identity)?,
        check_hash_binding(
            "runnerAttestation.evidenceChainTailHash",
            &attestation.evidence_chain_tail_hash,
            evidence_tail,
        )?,
        check_self_hash("runnerAttestation.selfHash", attestation)?,
    ];
    Ok(BindingReport::from_checks(checks))
}

/// Verifies that a chain of [`gk_artifacts::RunnerEvidence`] items, in
/// order, forms an unbroken chain: every item after the first chains from
/// its predecessor (§3.3 "chain continuity", §4.3).
///
/// # Errors
/// Never returns `Err`; kept `Result`-shaped for call-site consistency
/// with the other verifiers in this crate.
pub fn verify_evidence_chain(items: &[gk_artifacts::RunnerEvidence]) -> Result<BindingReport, KernelError> {
    let mut checks = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let name = format!("evidenceChain[{i}]");
        if i == 0 {
            checks.push(BindingCheck {
                name,
                passed: item.prev_evidence_hash.is_none(),
                detail: item
                    .prev_evidence_hash
                    .as_ref()
                    .map(|h| format!("expected no prevEvidenceHash, found {h}")),
            });
        } else {
            let passed = item.chains_from(&items[i - 1]);
            checks.push(BindingCheck {
                name,
                passed,
                detail: (!passed).then(|| "prevEvidenceHash or createdAt broke the chain".to_string()),
            });
        }
    }
    Ok(BindingReport::from_checks(checks))
}

/// Verifies the `SessionAnchor -> ExecutionPlan, RunnerEvidence(tail)`
/// bindings (§3.2).
///
/// # Errors
/// Returns [`KernelError`] only on a canonicalization failure.
pub fn verify_session_anchor_binding(
    anchor: &gk_artifacts::SessionAnchor,
    plan: &gk_artifacts::ExecutionPlan,
    evidence_tail: &gk_artifacts::RunnerEvidence,
) -> Result<BindingReport, KernelError> {
    let checks = vec![
        check_hash_binding("sessionAnchor.planHash", &anchor.plan_hash, plan)?,
        check_hash_binding("sessionAnchor.finalEvidenceHash", &anchor.final_evidence_hash, evidence_tail)?,
        check_self_hash("sessionAnchor.selfHash", anchor)?,
    ];
    Ok(BindingReport::from_checks(checks))
}
