// SPDX-License-Identifier: MIT OR Apache-2.0
//! The replay verifier (C12, §4.12): `replay_session(bundle) -> ReplayResult`,
//! a pure function that re-derives every self-hash, cross-artifact binding,
//! policy evaluation, and attestation signature from an in-memory bundle and
//! compares each against what the bundle claims.
//!
//! Generalized from `abp-core/src/verify.rs`'s `ChainVerifier` — a flat
//! receipt-by-receipt recomputation aggregated into one report — from a
//! single linear chain to the full artifact DAG plus the policy engine and
//! the attestation signature. Like [`gk_binding`], every check always runs;
//! a mismatch is recorded, not raised, so a caller sees the complete set of
//! divergences from one pass.
//!
//! This crate touches no filesystem, no network, and no clock: every input
//! arrives already loaded in [`ReplayBundle`], and [`replay_session`]
//! consults nothing else.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use gk_artifacts::{
    DecisionLock, DefinitionOfDone, ExecutionPlan, PatchApplyReport, PatchArtifact, Policy,
    PolicyEvaluation, PromptCapsule, RepoSnapshot, ReviewerReport, RunnerAttestation,
    RunnerEvidence, RunnerIdentity, SelfHashing, SessionAnchor, StepPacket, SymbolIndex,
};
use gk_core::Actor;
use gk_error::{KernelError, KernelErrorCode, KernelResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What kind of divergence a [`ReplayMismatch`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayMismatchKind {
    /// An artifact's recomputed self-hash does not match its stored `hash`.
    SelfHash,
    /// A cross-artifact hash binding does not match.
    Binding,
    /// The recomputed policy set hash does not match the stored one.
    PolicySetHash,
    /// The recomputed policy evaluation hash does not match the stored one.
    PolicyEvaluationHash,
    /// The recomputed policy evaluation's per-rule results diverge from the
    /// stored evaluation's, even though the hashes happened to match.
    PolicyEvaluationResults,
    /// The attestation signature does not verify against the embedded
    /// runner identity's public key.
    AttestationSignature,
}

/// One divergence found while replaying a session (§4.12).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayMismatch {
    /// What kind of divergence this is.
    pub kind: ReplayMismatchKind,
    /// Stable name of the specific check, e.g. `"executionPlan.selfHash"`.
    pub name: String,
    /// Human-readable detail: declared vs. recomputed, where applicable.
    pub detail: String,
}

/// The exhaustive result of replaying a session (§4.12). `deterministic_replay_passed`
/// is `true` iff `mismatches` is empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayResult {
    /// `true` iff every check passed — no mismatches at all.
    #[serde(rename = "deterministicReplayPassed")]
    pub deterministic_replay_passed: bool,
    /// Every divergence found, in check order.
    pub mismatches: Vec<ReplayMismatch>,
}

impl ReplayResult {
    fn from_mismatches(mismatches: Vec<ReplayMismatch>) -> Self {
        Self {
            deterministic_replay_passed: mismatches.is_empty(),
            mismatches,
        }
    }
}

/// Everything the replay verifier needs to re-derive a session's state,
/// already loaded into memory. The verifier consults nothing beyond this
/// struct — no filesystem, no store handle, no clock.
#[derive(Debug, Clone)]
pub struct ReplayBundle {
    /// The session's `DefinitionOfDone`.
    pub dod: DefinitionOfDone,
    /// The session's `DecisionLock`.
    pub lock: DecisionLock,
    /// The session's `ExecutionPlan`.
    pub plan: ExecutionPlan,
    /// `RepoSnapshot` the session executed against.
    pub snapshot: RepoSnapshot,
    /// Per-step `PromptCapsule`s, keyed by step id implicitly via their own
    /// `lockId`/`planHash`; order is not significant.
    pub capsules: Vec<PromptCapsule>,
    /// The derived `SymbolIndex`, if one was recorded.
    pub symbol_index: Option<SymbolIndex>,
    /// Every `StepPacket` issued during the session.
    pub step_packets: Vec<StepPacket>,
    /// Every `PatchArtifact` produced during the session.
    pub patch_artifacts: Vec<PatchArtifact>,
    /// Every `PatchApplyReport` produced during the session.
    pub patch_apply_reports: Vec<PatchApplyReport>,
    /// Every `ReviewerReport` produced during the session.
    pub reviewer_reports: Vec<ReviewerReport>,
    /// The runner's hash-chained evidence trail, in chain order.
    pub evidence_chain: Vec<RunnerEvidence>,
    /// The runner's declared identity, if recorded.
    pub runner_identity: Option<RunnerIdentity>,
    /// The runner's final attestation, if recorded.
    pub runner_attestation: Option<RunnerAttestation>,
    /// The policy set evaluated against this session.
    pub policies: Vec<Policy>,
    /// The reconstructed policy-evaluation context, built the same way the
    /// original evaluation built it (§4.10).
    pub policy_context: Value,
    /// The stored `PolicyEvaluation`, if policies were evaluated.
    pub policy_evaluation: Option<PolicyEvaluation>,
    /// Runtime configuration, supplying the regex timeout the original
    /// evaluation used.
    pub config: gk_config::KernelConfig,
    /// The session anchor, if the session reached `sealed`.
    pub session_anchor: Option<SessionAnchor>,
    /// Actor attributed to any artifact this replay recomputes fresh (the
    /// policy evaluation); never attributed to the bundle's own artifacts.
    pub replay_actor: Actor,
}

fn self_hash_mismatch<T: SelfHashing>(name: &str, artifact: &T) -> KernelResult<Option<ReplayMismatch>> {
    let actual = artifact.recompute_hash()?;
    let stored = artifact.stored_hash();
    if actual == stored {
        Ok(None)
    } else {
        Ok(Some(ReplayMismatch {
            kind: ReplayMismatchKind::SelfHash,
            name: name.to_string(),
            detail: format!("stored={stored} recomputed={actual}"),
        }))
    }
}

fn push_binding_report(mismatches: &mut Vec<ReplayMismatch>, report: &gk_binding::BindingReport) {
    for check in report.checks.iter().filter(|c| !c.passed) {
        mismatches.push(ReplayMismatch {
            kind: ReplayMismatchKind::Binding,
            name: check.name.clone(),
            detail: check.detail.clone().unwrap_or_default(),
        });
    }
}

/// Re-derives every self-hash, cross-artifact binding, policy evaluation,
/// and attestation signature from `bundle` and reports every divergence
/// found (§4.12). A pure function of `bundle` alone: it consults no
/// external state.
///
/// # Errors
/// Returns [`KernelError`] only when an artifact cannot be canonicalized
/// (a schema-level failure distinct from any replay mismatch); every
/// actual divergence is captured in the returned [`ReplayResult`] instead.
pub fn replay_session(bundle: &ReplayBundle) -> KernelResult<ReplayResult> {
    let mut mismatches = Vec::new();

    for (name, check) in [
        ("definitionOfDone.selfHash", self_hash_mismatch("definitionOfDone.selfHash", &bundle.dod)?),
        ("decisionLock.selfHash", self_hash_mismatch("decisionLock.selfHash", &bundle.lock)?),
        ("executionPlan.selfHash", self_hash_mismatch("executionPlan.selfHash", &bundle.plan)?),
        ("repoSnapshot.selfHash", self_hash_mismatch("repoSnapshot.selfHash", &bundle.snapshot)?),
    ] {
        let _ = name;
        if let Some(m) = check {
            mismatches.push(m);
        }
    }

    for capsule in &bundle.capsules {
        if let Some(m) = self_hash_mismatch("promptCapsule.selfHash", capsule)? {
            mismatches.push(m);
        }
    }
    if let Some(index) = &bundle.symbol_index
        && let Some(m) = self_hash_mismatch("symbolIndex.selfHash", index)?
    {
        mismatches.push(m);
    }
    for packet in &bundle.step_packets {
        if let Some(m) = self_hash_mismatch(&format!("stepPacket[{}].selfHash", packet.step_id), packet)? {
            mismatches.push(m);
        }
    }
    for patch in &bundle.patch_artifacts {
        if let Some(m) = self_hash_mismatch(&format!("patchArtifact[{}].selfHash", patch.step_id), patch)? {
            mismatches.push(m);
        }
    }
    for report in &bundle.patch_apply_reports {
        if let Some(m) = self_hash_mismatch("patchApplyReport.selfHash", report)? {
            mismatches.push(m);
        }
    }
    for report in &bundle.reviewer_reports {
        if let Some(m) = self_hash_mismatch(&format!("reviewerReport[{}].selfHash", report.step_id), report)? {
            mismatches.push(m);
        }
    }
    for evidence in &bundle.evidence_chain {
        if let Some(m) = self_hash_mismatch(&format!("runnerEvidence[{}].selfHash", evidence.step_id), evidence)? {
            mismatches.push(m);
        }
    }
    if let Some(identity) = &bundle.runner_identity
        && let Some(m) = self_hash_mismatch("runnerIdentity.selfHash", identity)?
    {
        mismatches.push(m);
    }
    if let Some(attestation) = &bundle.runner_attestation
        && let Some(m) = self_hash_mismatch("runnerAttestation.selfHash", attestation)?
    {
        mismatches.push(m);
    }
    for policy in &bundle.policies {
        if let Some(m) = self_hash_mismatch(&format!("policy[{}].selfHash", policy.name), policy)? {
            mismatches.push(m);
        }
    }
    if let Some(evaluation) = &bundle.policy_evaluation
        && let Some(m) = self_hash_mismatch("policyEvaluation.selfHash", evaluation)?
    {
        mismatches.push(m);
    }
    if let Some(anchor) = &bundle.session_anchor
        && let Some(m) = self_hash_mismatch("sessionAnchor.selfHash", anchor)?
    {
        mismatches.push(m);
    }

    push_binding_report(&mut mismatches, &gk_binding::verify_decision_lock_binding(&bundle.lock, &bundle.dod)?);
    push_binding_report(
        &mut mismatches,
        &gk_binding::verify_execution_plan_binding(&bundle.plan, &bundle.lock, &bundle.dod)?,
    );
    for packet in &bundle.step_packets {
        let Some(capsule) = bundle.capsules.iter().find(|c| c.hash == packet.capsule_hash) else {
            mismatches.push(ReplayMismatch {
                kind: ReplayMismatchKind::Binding,
                name: format!("stepPacket[{}].capsuleHash", packet.step_id),
                detail: "no matching PromptCapsule found in the bundle".to_string(),
            });
            continue;
        };
        push_binding_report(
            &mut mismatches,
            &gk_binding::verify_step_packet_binding(packet, &bundle.plan, capsule, &bundle.snapshot)?,
        );
    }
    for report in &bundle.patch_apply_reports {
        let Some(patch) = bundle.patch_artifacts.iter().find(|p| p.hash == report.patch_hash) else {
            mismatches.push(ReplayMismatch {
                kind: ReplayMismatchKind::Binding,
                name: "patchApplyReport.patchHash".to_string(),
                detail: "no matching PatchArtifact found in the bundle".to_string(),
            });
            continue;
        };
        push_binding_report(
            &mut mismatches,
            &gk_binding::verify_patch_apply_report_binding(report, patch, &bundle.snapshot)?,
        );
    }
    if !bundle.evidence_chain.is_empty() {
        push_binding_report(&mut mismatches, &gk_binding::verify_evidence_chain(&bundle.evidence_chain)?);
    }
    if let (Some(attestation), Some(identity), Some(tail)) =
        (&bundle.runner_attestation, &bundle.runner_identity, bundle.evidence_chain.last())
    {
        push_binding_report(
            &mut mismatches,
            &gk_binding::verify_runner_attestation_binding(attestation, &bundle.plan, identity, tail)?,
        );
        let pem = identity.public_key.as_str();
        match attestation.verify_signature(pem) {
            Ok(true) => {}
            Ok(false) => mismatches.push(ReplayMismatch {
                kind: ReplayMismatchKind::AttestationSignature,
                name: "runnerAttestation.signature".to_string(),
                detail: "signature does not verify against the embedded identity's public key".to_string(),
            }),
            Err(e) => mismatches.push(ReplayMismatch {
                kind: ReplayMismatchKind::AttestationSignature,
                name: "runnerAttestation.signature".to_string(),
                detail: format!("signature verification failed to run: {e}"),
            }),
        }
    }
    if let (Some(anchor), Some(tail)) = (&bundle.session_anchor, bundle.evidence_chain.last()) {
        push_binding_report(
            &mut mismatches,
            &gk_binding::verify_session_anchor_binding(anchor, &bundle.plan, tail)?,
        );
    }

    if let Some(stored_evaluation) = &bundle.policy_evaluation {
        let recomputed = gk_policy::evaluate_policies(
            &bundle.policies,
            &bundle.policy_context,
            &bundle.config,
            bundle.replay_actor.clone(),
        )?;
        if stored_evaluation.policy_set_hash != recomputed.policy_set_hash {
            mismatches.push(ReplayMismatch {
                kind: ReplayMismatchKind::PolicySetHash,
                name: "policyEvaluation.policySetHash".to_string(),
                detail: format!(
                    "stored={} recomputed={}",
                    stored_evaluation.policy_set_hash, recomputed.policy_set_hash
                ),
            });
        }
        let stored_eval_hash = stored_evaluation.recompute_hash()?;
        let recomputed_eval_hash = recomputed.recompute_hash()?;
        if stored_eval_hash != recomputed_eval_hash {
            mismatches.push(ReplayMismatch {
                kind: ReplayMismatchKind::PolicyEvaluationHash,
                name: "policyEvaluation.selfHash".to_string(),
                detail: format!("stored={stored_eval_hash} recomputed={recomputed_eval_hash}"),
            });
        }
        if stored_evaluation.passed != recomputed.passed || stored_evaluation.results != recomputed.results {
            mismatches.push(ReplayMismatch {
                kind: ReplayMismatchKind::PolicyEvaluationResults,
                name: "policyEvaluation.results".to_string(),
                detail: "recomputed per-rule results diverge from the stored evaluation".to_string(),
            });
        }
    }

    Ok(ReplayResult::from_mismatches(mismatches))
}

/// Raises a [`KernelError`] with code `CHAIN_VERIFICATION_FAILED` carrying
/// every mismatch if `result` did not pass; otherwise succeeds. Mirrors the
/// `require_*` helpers in [`gk_linters`](../gk_linters) for call sites that
/// want fail-fast behavior over the full [`ReplayResult`].
///
/// # Errors
/// Returns [`KernelError`] iff `result.deterministic_replay_passed` is `false`.
pub fn require_replay_passed(result: &ReplayResult) -> KernelResult<()> {
    if result.deterministic_replay_passed {
        Ok(())
    } else {
        Err(KernelError::new(
            KernelErrorCode::ChainVerificationFailed,
            format!("{} replay mismatch(es)", result.mismatches.len()),
        )
        .with_detail("mismatches", &result.mismatches))
    }
}
