// SPDX-License-Identifier: MIT OR Apache-2.0
//! `record_prompt_capsule`, `record_repo_snapshot`, `record_symbol_index`:
//! the per-step model-input envelope and the two repo-state artifacts
//! steps bind against (§3.2).

use crate::{self_hash_ok, Kernel};
use gk_artifacts::{PromptCapsule, RepoSnapshot, SelfHashing, SymbolIndex};
use gk_error::{KernelError, KernelErrorCode, KernelResult};
use uuid::Uuid;

impl Kernel {
    /// Records a `PromptCapsule` for a step (§3.2). Bound to the session's
    /// `DecisionLock`/`ExecutionPlan` via its own `lockId`/`planHash`
    /// fields; checked directly here rather than through `gk-binding`,
    /// since no other crate needs a `PromptCapsule`-specific verifier.
    ///
    /// # Errors
    /// Returns [`KernelErrorCode::LockMissing`] if no `DecisionLock` has
    /// been recorded, [`KernelErrorCode::PlanHashMissing`] if no
    /// `ExecutionPlan` has, or [`KernelErrorCode::IdMismatch`] if the
    /// capsule's declared `lockId`/`planHash` diverge from what this
    /// session has recorded.
    pub fn record_prompt_capsule(&self, session_id: Uuid, capsule: PromptCapsule) -> KernelResult<PromptCapsule> {
        capsule.validate()?;
        self_hash_ok("promptCapsule", &capsule)?;

        let record = self.require_session(session_id)?;
        let lock = record.lock.as_ref().ok_or_else(|| {
            KernelError::new(KernelErrorCode::LockMissing, "no DecisionLock recorded for this session")
        })?;
        let plan = record.plan.as_ref().ok_or_else(|| {
            KernelError::new(KernelErrorCode::PlanHashMissing, "no ExecutionPlan recorded for this session")
        })?;
        if capsule.lock_id != lock.meta.id {
            return Err(KernelError::new(KernelErrorCode::IdMismatch, "promptCapsule.lockId does not identify the recorded DecisionLock"));
        }
        if capsule.plan_hash != plan.stored_hash() {
            return Err(KernelError::new(KernelErrorCode::PlanHashMismatch, "promptCapsule.planHash does not match the recorded ExecutionPlan"));
        }

        self.persist_artifact(session_id, &capsule.meta.id.to_string(), "PromptCapsuleRecorded", "application/json;schema=PromptCapsule", &capsule)?;
        self.mutate_session(session_id, |record| record.capsules.push(capsule.clone()))?;
        Ok(capsule)
    }

    /// Records the `RepoSnapshot` a session executes against (§3.2).
    ///
    /// # Errors
    /// Propagates the artifact's own validation, or
    /// [`KernelErrorCode::IdMismatch`] if `snapshot.sessionId` does not
    /// match `session_id`.
    pub fn record_repo_snapshot(&self, session_id: Uuid, snapshot: RepoSnapshot) -> KernelResult<RepoSnapshot> {
        snapshot.validate()?;
        self_hash_ok("repoSnapshot", &snapshot)?;
        if snapshot.session_id != session_id {
            return Err(KernelError::new(KernelErrorCode::IdMismatch, "RepoSnapshot.sessionId does not match the recording session")
                .with_detail("expected", session_id.to_string())
                .with_detail("actual", snapshot.session_id.to_string()));
        }

        self.ensure_session(session_id)?;
        self.persist_artifact(session_id, &snapshot.meta.id.to_string(), "RepoSnapshotRecorded", "application/json;schema=RepoSnapshot", &snapshot)?;
        self.mutate_session(session_id, |record| record.snapshot = Some(snapshot.clone()))?;
        Ok(snapshot)
    }

    /// Records the `SymbolIndex` derived from the session's `RepoSnapshot`
    /// (§3.2).
    ///
    /// # Errors
    /// Returns [`KernelErrorCode::SchemaInvalid`] if no `RepoSnapshot` has
    /// been recorded yet, propagates the artifact's own validation, or
    /// [`KernelErrorCode::IdMismatch`] if `snapshotHash` diverges from the
    /// recorded snapshot's self-hash.
    pub fn record_symbol_index(&self, session_id: Uuid, index: SymbolIndex) -> KernelResult<SymbolIndex> {
        index.validate()?;
        self_hash_ok("symbolIndex", &index)?;

        let record = self.require_session(session_id)?;
        let snapshot = record.snapshot.as_ref().ok_or_else(|| {
            KernelError::new(KernelErrorCode::SchemaInvalid, "no RepoSnapshot recorded for this session")
        })?;
        let check = gk_binding::check_hash_binding("symbolIndex.snapshotHash", &index.snapshot_hash, snapshot)?;
        if !check.passed {
            return Err(KernelError::new(KernelErrorCode::IdMismatch, "symbolIndex.snapshotHash does not match the recorded RepoSnapshot")
                .with_detail("detail", check.detail.unwrap_or_default()));
        }

        self.persist_artifact(session_id, &index.meta.id.to_string(), "SymbolIndexRecorded", "application/json;schema=SymbolIndex", &index)?;
        self.mutate_session(session_id, |record| record.symbol_index = Some(index.clone()))?;
        Ok(index)
    }
}
