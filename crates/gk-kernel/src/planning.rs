// SPDX-License-Identifier: MIT OR Apache-2.0
//! `record_dod`, `record_decision_lock`, `record_execution_plan`: the
//! three artifacts a session must carry, in order, before any step may
//! run (§3.2, §4.7).
//!
//! Every `record_*` method in this crate takes `session_id` explicitly:
//! only a handful of artifact types (`DefinitionOfDone`, `RepoSnapshot`,
//! `PatchArtifact`, `RunnerEvidence`) carry their own `sessionId` field, so
//! the session a `DecisionLock`/`ExecutionPlan`/etc. belongs to cannot be
//! recovered from the artifact alone — the caller names it, and where an
//! artifact *does* carry its own `sessionId`, the Kernel additionally
//! checks the two agree.

use crate::{binding_ok, self_hash_ok, Kernel};
use gk_artifacts::{DecisionLock, DefinitionOfDone, ExecutionPlan};
use gk_error::{KernelError, KernelErrorCode, KernelResult};
use uuid::Uuid;

impl Kernel {
    /// Records a session's `DefinitionOfDone` (§3.2, §4.1).
    ///
    /// # Errors
    /// Propagates the artifact's own `validate()` error, `ID_MISMATCH` if
    /// its self-hash or `sessionId` do not match, or a store I/O failure.
    pub fn record_dod(&self, session_id: Uuid, dod: DefinitionOfDone) -> KernelResult<DefinitionOfDone> {
        dod.validate()?;
        self_hash_ok("definitionOfDone", &dod)?;
        if dod.session_id != session_id {
            return Err(KernelError::new(KernelErrorCode::IdMismatch, "DefinitionOfDone.sessionId does not match the recording session")
                .with_detail("expected", session_id.to_string())
                .with_detail("actual", dod.session_id.to_string()));
        }

        self.ensure_session(session_id)?;
        self.persist_artifact(session_id, &dod.meta.id.to_string(), "DefinitionOfDoneRecorded", "application/json;schema=DefinitionOfDone", &dod)?;
        self.mutate_session(session_id, |record| record.dod = Some(dod.clone()))?;
        Ok(dod)
    }

    /// Records a session's `DecisionLock` (§3.2, §4.1), binding it to the
    /// session's already-recorded `DefinitionOfDone`.
    ///
    /// # Errors
    /// Returns [`KernelErrorCode::DodMissing`] if no `DefinitionOfDone` has
    /// been recorded yet, propagates the artifact's own validation, or
    /// returns the cross-binding verifier's first failure.
    pub fn record_decision_lock(&self, session_id: Uuid, lock: DecisionLock) -> KernelResult<DecisionLock> {
        lock.validate()?;
        self_hash_ok("decisionLock", &lock)?;

        let record = self.require_session(session_id)?;
        let dod = record.dod.as_ref().ok_or_else(|| {
            KernelError::new(KernelErrorCode::DodMissing, "no DefinitionOfDone recorded for this session")
        })?;
        binding_ok(gk_binding::verify_decision_lock_binding(&lock, dod)?)?;

        self.persist_artifact(session_id, &lock.meta.id.to_string(), "DecisionLockRecorded", "application/json;schema=DecisionLock", &lock)?;
        self.mutate_session(session_id, |record| record.lock = Some(lock.clone()))?;
        Ok(lock)
    }

    /// Records a session's `ExecutionPlan` (§3.2, §4.1), binding it to the
    /// session's `DecisionLock`/`DefinitionOfDone` and running the C8
    /// structural linter over it.
    ///
    /// # Errors
    /// Returns [`KernelErrorCode::DodMissing`]/[`KernelErrorCode::LockMissing`]
    /// if either upstream artifact is absent, [`KernelErrorCode::LockNotApproved`]
    /// if the lock has not been approved, propagates the artifact's own
    /// validation and the C8 lint, or returns the binding verifier's first
    /// failure.
    pub fn record_execution_plan(&self, session_id: Uuid, plan: ExecutionPlan) -> KernelResult<ExecutionPlan> {
        plan.validate()?;
        self_hash_ok("executionPlan", &plan)?;

        let record = self.require_session(session_id)?;
        let dod = record.dod.as_ref().ok_or_else(|| {
            KernelError::new(KernelErrorCode::DodMissing, "no DefinitionOfDone recorded for this session")
        })?;
        let lock = record.lock.as_ref().ok_or_else(|| {
            KernelError::new(KernelErrorCode::LockMissing, "no DecisionLock recorded for this session")
        })?;
        if !lock.is_approved() {
            return Err(KernelError::new(KernelErrorCode::LockNotApproved, "DecisionLock has not been approved"));
        }

        binding_ok(gk_binding::verify_execution_plan_binding(&plan, lock, dod)?)?;
        gk_linters::require_execution_plan_lint(&plan, dod)?;

        self.persist_artifact(session_id, &plan.meta.id.to_string(), "ExecutionPlanRecorded", "application/json;schema=ExecutionPlan", &plan)?;
        self.mutate_session(session_id, |record| record.plan = Some(plan.clone()))?;
        Ok(plan)
    }

    /// Evaluates the execution gate (C7, §4.7) over the session's recorded
    /// `DefinitionOfDone`/`DecisionLock` and caches the outcome so
    /// [`Kernel::session_status`] can derive `eligible` without
    /// re-evaluating. Never raises on a failed check: the full
    /// [`gk_gate::GateReport`] is returned so a caller sees every check,
    /// per the gate's "evaluate regardless of earlier failures" contract.
    ///
    /// # Errors
    /// Returns [`KernelErrorCode::SessionNotFound`] if no artifact has ever
    /// been recorded for `session_id`.
    pub fn evaluate_execution_gate(&self, session_id: Uuid) -> KernelResult<gk_gate::GateReport> {
        let record = self.require_session(session_id)?;
        let report = gk_gate::evaluate_gate(record.dod.as_ref(), record.lock.as_ref());
        self.mutate_session(session_id, |record| record.gate_passed = report.passed)?;
        Ok(report)
    }
}
