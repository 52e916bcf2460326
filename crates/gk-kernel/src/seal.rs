// SPDX-License-Identifier: MIT OR Apache-2.0
//! `record_session_anchor`, `seal_session`, `verify_sealed_change_package`,
//! `replay_session`, `export_evidence_bundle`: the terminal rollup of a
//! session into a `SealedChangePackage`, its independent re-verification,
//! the pure replay verifier, and the deterministic evidence bundle export
//! (§3.2, §4.12, §4.13, §4.14).

use crate::{binding_ok, self_hash_ok, Kernel};
use gk_artifacts::{SealedChangePackage, SelfHashing, SessionAnchor};
use gk_core::Actor;
use gk_error::{KernelError, KernelErrorCode, KernelResult};
use std::collections::BTreeMap;
use uuid::Uuid;

impl Kernel {
    /// Records the session's terminal `SessionAnchor` (§3.2), binding it to
    /// the recorded `ExecutionPlan`/evidence-chain tail and cross-checking
    /// every optional hash it declares (`runnerIdentityHash`,
    /// `finalAttestationHash`, `policySetHash`, `policyEvaluationHash`)
    /// against whatever this session has actually recorded for that slot.
    ///
    /// # Errors
    /// Returns [`KernelErrorCode::LockMissing`]/[`KernelErrorCode::PlanHashMissing`]
    /// if the upstream artifacts are absent, [`KernelErrorCode::SchemaInvalid`]
    /// if no `RunnerEvidence` has been recorded, propagates the artifact's
    /// own validation, or returns [`KernelErrorCode::IdMismatch`] for any
    /// declared-vs-recorded hash divergence.
    pub fn record_session_anchor(&self, session_id: Uuid, anchor: SessionAnchor) -> KernelResult<SessionAnchor> {
        anchor.validate()?;
        self_hash_ok("sessionAnchor", &anchor)?;
        if anchor.session_id != session_id {
            return Err(KernelError::new(KernelErrorCode::IdMismatch, "SessionAnchor.sessionId does not match the recording session"));
        }

        let record = self.require_session(session_id)?;
        let lock = record.lock.as_ref().ok_or_else(|| {
            KernelError::new(KernelErrorCode::LockMissing, "no DecisionLock recorded for this session")
        })?;
        if anchor.lock_id != lock.meta.id {
            return Err(KernelError::new(KernelErrorCode::IdMismatch, "sessionAnchor.lockId does not identify the recorded DecisionLock"));
        }
        let plan = record.plan.as_ref().ok_or_else(|| {
            KernelError::new(KernelErrorCode::PlanHashMissing, "no ExecutionPlan recorded for this session")
        })?;
        let tail = record.evidence_chain.last().ok_or_else(|| {
            KernelError::new(KernelErrorCode::SchemaInvalid, "no RunnerEvidence recorded for this session")
        })?;
        binding_ok(gk_binding::verify_session_anchor_binding(&anchor, plan, tail)?)?;

        if let Some(declared) = &anchor.runner_identity_hash {
            let identity = record.runner_identity.as_ref().ok_or_else(|| {
                KernelError::new(KernelErrorCode::RunnerIdentityInvalid, "sessionAnchor.runnerIdentityHash set but no RunnerIdentity recorded")
            })?;
            let check = gk_binding::check_hash_binding("sessionAnchor.runnerIdentityHash", declared, identity)?;
            if !check.passed {
                return Err(KernelError::new(KernelErrorCode::IdMismatch, "sessionAnchor.runnerIdentityHash does not match the recorded RunnerIdentity"));
            }
        }
        if let Some(declared) = &anchor.final_attestation_hash {
            let attestation = record.runner_attestation.as_ref().ok_or_else(|| {
                KernelError::new(KernelErrorCode::SchemaInvalid, "sessionAnchor.finalAttestationHash set but no RunnerAttestation recorded")
            })?;
            let check = gk_binding::check_hash_binding("sessionAnchor.finalAttestationHash", declared, attestation)?;
            if !check.passed {
                return Err(KernelError::new(KernelErrorCode::IdMismatch, "sessionAnchor.finalAttestationHash does not match the recorded RunnerAttestation"));
            }
        }
        if let Some(declared) = &anchor.policy_evaluation_hash {
            let evaluation = record.policy_evaluation.as_ref().ok_or_else(|| {
                KernelError::new(KernelErrorCode::PolicyInvalid, "sessionAnchor.policyEvaluationHash set but no PolicyEvaluation recorded")
            })?;
            let check = gk_binding::check_hash_binding("sessionAnchor.policyEvaluationHash", declared, evaluation)?;
            if !check.passed {
                return Err(KernelError::new(KernelErrorCode::IdMismatch, "sessionAnchor.policyEvaluationHash does not match the recorded PolicyEvaluation"));
            }
            if anchor.policy_set_hash.as_deref() != Some(evaluation.policy_set_hash.as_str()) {
                return Err(KernelError::new(KernelErrorCode::IdMismatch, "sessionAnchor.policySetHash does not match the recorded PolicyEvaluation's policySetHash"));
            }
        }

        self.persist_artifact(
            session_id,
            &anchor.meta.id.to_string(),
            "SessionAnchorRecorded",
            "application/json;schema=SessionAnchor",
            &anchor,
        )?;
        self.mutate_session(session_id, |record| record.session_anchor = Some(anchor.clone()))?;
        Ok(anchor)
    }

    /// Accepts an externally-built `SealedChangePackage` (e.g. read back
    /// from a session directory's `sealed-change-package.json`) into this
    /// session's cache, so a later [`Kernel::verify_sealed_change_package`]
    /// call has something to check. Unlike [`Kernel::seal_session`], this
    /// never builds a package itself and performs no cross-binding check —
    /// `verify_sealed_change_package` is exactly that check, run
    /// independently against whatever this session has recorded.
    ///
    /// # Errors
    /// Propagates the artifact's own validation or an `ID_MISMATCH` self-hash
    /// failure.
    pub fn record_sealed_change_package(&self, session_id: Uuid, scp: SealedChangePackage) -> KernelResult<SealedChangePackage> {
        scp.validate()?;
        self_hash_ok("sealedChangePackage", &scp)?;
        if scp.session_id != session_id {
            return Err(KernelError::new(KernelErrorCode::IdMismatch, "SealedChangePackage.sessionId does not match the recording session"));
        }

        self.require_session(session_id)?;
        self.persist_artifact(
            session_id,
            &scp.meta.id.to_string(),
            "SealedChangePackageRecorded",
            "application/json;schema=SealedChangePackage",
            &scp,
        )?;
        self.mutate_session(session_id, |record| record.sealed_change_package = Some(scp.clone()))?;
        Ok(scp)
    }

    fn seal_artifacts<R>(&self, session_id: Uuid, f: impl FnOnce(&gk_scp::SealArtifacts<'_>) -> KernelResult<R>) -> KernelResult<R> {
        let record = self.require_session(session_id)?;
        let dod = record.dod.as_ref().ok_or_else(|| {
            KernelError::new(KernelErrorCode::DodMissing, "no DefinitionOfDone recorded for this session")
        })?;
        let lock = record.lock.as_ref().ok_or_else(|| {
            KernelError::new(KernelErrorCode::LockMissing, "no DecisionLock recorded for this session")
        })?;
        let plan = record.plan.as_ref().ok_or_else(|| {
            KernelError::new(KernelErrorCode::PlanHashMissing, "no ExecutionPlan recorded for this session")
        })?;
        let snapshot = record.snapshot.as_ref().ok_or_else(|| {
            KernelError::new(KernelErrorCode::SchemaInvalid, "no RepoSnapshot recorded for this session")
        })?;
        let anchor = record.session_anchor.as_ref().ok_or_else(|| {
            KernelError::new(KernelErrorCode::SchemaInvalid, "no SessionAnchor recorded for this session")
        })?;

        let artifacts = gk_scp::SealArtifacts {
            dod,
            lock,
            plan,
            snapshot,
            symbol_index: record.symbol_index.as_ref(),
            step_packets: &record.step_packets,
            patch_artifacts: &record.patch_artifacts,
            reviewer_reports: &record.reviewer_reports,
            evidence_chain: &record.evidence_chain,
            runner_identity: record.runner_identity.as_ref(),
            runner_attestation: record.runner_attestation.as_ref(),
            policy_set_hash: record.policy_evaluation.as_ref().map(|e| e.policy_set_hash.clone()),
            policy_evaluation: record.policy_evaluation.as_ref(),
            approval_policy: record.approval_policy.as_ref(),
            approval_bundle: record.approval_bundle.as_ref(),
            session_anchor: anchor,
        };
        f(&artifacts)
    }

    /// Builds and records the session's terminal `SealedChangePackage`
    /// (C14, §4.14) from every artifact this session has recorded.
    ///
    /// # Errors
    /// Returns the first missing-dependency error from [`Kernel::seal_artifacts`],
    /// or propagates [`gk_scp::build_sealed_change_package`]'s own errors.
    pub fn seal_session(&self, session_id: Uuid, created_by: Actor) -> KernelResult<SealedChangePackage> {
        let scp = self.seal_artifacts(session_id, |artifacts| {
            gk_scp::build_sealed_change_package(session_id, artifacts, created_by.clone())
        })?;

        self.persist_artifact(
            session_id,
            &scp.meta.id.to_string(),
            "SealedChangePackageRecorded",
            "application/json;schema=SealedChangePackage",
            &scp,
        )?;
        self.mutate_session(session_id, |record| record.sealed_change_package = Some(scp.clone()))?;
        Ok(scp)
    }

    /// Independently re-verifies the session's recorded `SealedChangePackage`
    /// against the artifacts it claims to seal (§4.14). Every check always
    /// runs; a failure is reported in [`gk_scp::SealReport`], not raised.
    ///
    /// # Errors
    /// Returns [`KernelErrorCode::SealInvalid`] if no `SealedChangePackage`
    /// has been recorded, or propagates [`Kernel::seal_artifacts`]'s
    /// missing-dependency errors.
    pub fn verify_sealed_change_package(&self, session_id: Uuid) -> KernelResult<gk_scp::SealReport> {
        let record = self.require_session(session_id)?;
        let scp = record.sealed_change_package.as_ref().ok_or_else(|| {
            KernelError::new(KernelErrorCode::SealInvalid, "no SealedChangePackage recorded for this session")
        })?;
        self.seal_artifacts(session_id, |artifacts| gk_scp::verify_sealed_change_package(scp, artifacts))
    }

    /// Re-derives every self-hash, cross-artifact binding, policy
    /// evaluation, and attestation signature recorded for `session_id` and
    /// reports every divergence found (C12, §4.12). Builds the
    /// [`gk_replay::ReplayBundle`] entirely from this session's cached
    /// state — the replay verifier itself consults no external state.
    ///
    /// # Errors
    /// Returns [`KernelErrorCode::DodMissing`]/[`KernelErrorCode::LockMissing`]/
    /// [`KernelErrorCode::PlanHashMissing`] if the minimum artifacts a
    /// session needs to replay are absent, or propagates
    /// [`gk_replay::replay_session`]'s own errors.
    pub fn replay_session(&self, session_id: Uuid, replay_actor: Actor) -> KernelResult<gk_replay::ReplayResult> {
        let record = self.require_session(session_id)?;
        let dod = record.dod.clone().ok_or_else(|| {
            KernelError::new(KernelErrorCode::DodMissing, "no DefinitionOfDone recorded for this session")
        })?;
        let lock = record.lock.clone().ok_or_else(|| {
            KernelError::new(KernelErrorCode::LockMissing, "no DecisionLock recorded for this session")
        })?;
        let plan = record.plan.clone().ok_or_else(|| {
            KernelError::new(KernelErrorCode::PlanHashMissing, "no ExecutionPlan recorded for this session")
        })?;
        let snapshot = record.snapshot.clone().ok_or_else(|| {
            KernelError::new(KernelErrorCode::SchemaInvalid, "no RepoSnapshot recorded for this session")
        })?;
        let policy_context = self.policy_context(session_id)?;

        let bundle = gk_replay::ReplayBundle {
            dod,
            lock,
            plan,
            snapshot,
            capsules: record.capsules.clone(),
            symbol_index: record.symbol_index.clone(),
            step_packets: record.step_packets.clone(),
            patch_artifacts: record.patch_artifacts.clone(),
            patch_apply_reports: record.patch_apply_reports.clone(),
            reviewer_reports: record.reviewer_reports.clone(),
            evidence_chain: record.evidence_chain.clone(),
            runner_identity: record.runner_identity.clone(),
            runner_attestation: record.runner_attestation.clone(),
            policies: record.policies.clone(),
            policy_context,
            policy_evaluation: record.policy_evaluation.clone(),
            config: self.config.clone(),
            session_anchor: record.session_anchor.clone(),
            replay_actor,
        };
        gk_replay::replay_session(&bundle)
    }

    /// Exports `session_id`'s deterministic evidence bundle zip (C13,
    /// §4.13): the run's event log, chain-verification report, and
    /// artifact-store manifest with artifacts at-or-below
    /// `size_threshold_bytes` inlined.
    ///
    /// # Errors
    /// Returns [`KernelErrorCode::ChainVerificationFailed`] if the run's
    /// event chain does not verify, or propagates
    /// [`gk_bundle::export_bundle`]'s own errors.
    pub fn export_evidence_bundle(
        &self,
        session_id: Uuid,
        size_threshold_bytes: u64,
        run_summary: serde_json::Value,
        schemas: BTreeMap<String, serde_json::Value>,
    ) -> KernelResult<Vec<u8>> {
        let run_id = session_id.to_string();
        let events = self.event_store.load_run(&run_id)?;
        let chain = self.event_store.verify_run_chain(&run_id)?;
        let manifest = self.artifact_store.build_manifest(size_threshold_bytes);
        let fetch_artifact = |sha256: &str| self.artifact_store.get_artifact(sha256);

        let input = gk_bundle::ExportInput {
            run_summary,
            events: &events,
            chain: &chain,
            manifest: &manifest,
            fetch_artifact: &fetch_artifact,
            schemas,
        };
        gk_bundle::export_bundle(&input)
    }
}
