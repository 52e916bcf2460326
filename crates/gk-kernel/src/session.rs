// SPDX-License-Identifier: MIT OR Apache-2.0
//! In-memory per-session cache: every artifact [`crate::Kernel`] has
//! accepted for a session, kept around so later `record_*` calls and
//! `seal_session`/`export_evidence_bundle` can reference upstream
//! artifacts without re-reading them back from the artifact store.
//!
//! Mirrors `abp-daemon`'s `AppState.receipts: HashMap<Uuid, Receipt>`
//! shape, generalized from one artifact type to the whole DAG.

use gk_artifacts::{
    ApprovalBundle, ApprovalPolicy, DecisionLock, DefinitionOfDone, ExecutionPlan, PatchApplyReport,
    PatchArtifact, Policy, PolicyEvaluation, PromptCapsule, RepoSnapshot, ReviewerReport,
    RunnerAttestation, RunnerEvidence, RunnerIdentity, SealedChangePackage, SessionAnchor,
    StepPacket, SymbolIndex,
};
use uuid::Uuid;

/// Every artifact recorded for one session so far, plus the last execution
/// gate outcome (used by [`gk_core::derive_session_status`]).
#[derive(Debug, Clone, Default)]
pub struct SessionRecord {
    /// The session this record belongs to.
    pub session_id: Option<Uuid>,
    /// The session's `DefinitionOfDone`, once recorded.
    pub dod: Option<DefinitionOfDone>,
    /// The session's `DecisionLock`, once recorded.
    pub lock: Option<DecisionLock>,
    /// The session's `ExecutionPlan`, once recorded.
    pub plan: Option<ExecutionPlan>,
    /// Every `PromptCapsule` issued for a step in this session.
    pub capsules: Vec<PromptCapsule>,
    /// The `RepoSnapshot` the session executed against, once recorded.
    pub snapshot: Option<RepoSnapshot>,
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
    /// The runner's declared identity, once recorded.
    pub runner_identity: Option<RunnerIdentity>,
    /// The runner's final attestation, once recorded.
    pub runner_attestation: Option<RunnerAttestation>,
    /// Every `Policy` evaluated against this session.
    pub policies: Vec<Policy>,
    /// The most recent `PolicyEvaluation`, once policies were evaluated.
    pub policy_evaluation: Option<PolicyEvaluation>,
    /// The session's `ApprovalPolicy`, if approval is required.
    pub approval_policy: Option<ApprovalPolicy>,
    /// The session's `ApprovalBundle`, once recorded.
    pub approval_bundle: Option<ApprovalBundle>,
    /// The terminal `SessionAnchor`, once the session reaches `sealed`.
    pub session_anchor: Option<SessionAnchor>,
    /// The terminal `SealedChangePackage`, once the session is sealed.
    pub sealed_change_package: Option<SealedChangePackage>,
    /// Whether the execution gate (C7) last evaluated `passed` for this
    /// session. Feeds `SessionStatus` derivation (§3.4); never itself
    /// persisted, only cached for the next `session_status` call.
    pub gate_passed: bool,
}

impl SessionRecord {
    /// Builds an empty record for a freshly registered session.
    #[must_use]
    pub fn new(session_id: Uuid) -> Self {
        Self { session_id: Some(session_id), ..Self::default() }
    }
}
