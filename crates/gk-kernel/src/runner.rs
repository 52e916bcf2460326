// SPDX-License-Identifier: MIT OR Apache-2.0
//! `record_runner_identity`, `record_runner_evidence`,
//! `record_runner_attestation`: the runner's identity, hash-chained
//! evidence trail, and terminal signed attestation (§3.2, §3.3, §4.10).

use crate::{binding_ok, self_hash_ok, Kernel};
use gk_artifacts::{RunnerAttestation, RunnerEvidence, RunnerIdentity};
use gk_error::{KernelError, KernelErrorCode, KernelResult};
use uuid::Uuid;

impl Kernel {
    /// Records the runner's declared identity (§3.2). A session may only
    /// record one; later calls are rejected rather than silently
    /// overwriting the identity attestations and evidence already chain
    /// against.
    ///
    /// # Errors
    /// Propagates the artifact's own validation, or
    /// [`KernelErrorCode::RunnerIdentityInvalid`] if an identity has
    /// already been recorded for this session.
    pub fn record_runner_identity(&self, session_id: Uuid, identity: RunnerIdentity) -> KernelResult<RunnerIdentity> {
        identity.validate()?;
        self_hash_ok("runnerIdentity", &identity)?;

        let record = self.require_session(session_id)?;
        if record.runner_identity.is_some() {
            return Err(KernelError::new(KernelErrorCode::RunnerIdentityInvalid, "a RunnerIdentity has already been recorded for this session"));
        }

        self.persist_artifact(session_id, &identity.meta.id.to_string(), "RunnerIdentityRecorded", "application/json;schema=RunnerIdentity", &identity)?;
        self.mutate_session(session_id, |record| record.runner_identity = Some(identity.clone()))?;
        Ok(identity)
    }

    /// Appends one link to the session's evidence chain (§3.3 "chain
    /// continuity"): verifies `evidence` chains from the current tail (or
    /// is the chain's first item) before persisting it.
    ///
    /// # Errors
    /// Returns [`KernelErrorCode::IdMismatch`] if `evidence.sessionId` does
    /// not match `session_id` or the chain-continuity check fails,
    /// otherwise propagates the artifact's own validation.
    pub fn record_runner_evidence(&self, session_id: Uuid, evidence: RunnerEvidence) -> KernelResult<RunnerEvidence> {
        evidence.validate()?;
        self_hash_ok("runnerEvidence", &evidence)?;
        if evidence.session_id != session_id {
            return Err(KernelError::new(KernelErrorCode::IdMismatch, "RunnerEvidence.sessionId does not match the recording session"));
        }

        let record = self.require_session(session_id)?;
        let mut chain = record.evidence_chain.clone();
        chain.push(evidence.clone());
        binding_ok(gk_binding::verify_evidence_chain(&chain)?)?;

        self.persist_artifact(session_id, &evidence.meta.id.to_string(), "RunnerEvidenceRecorded", "application/json;schema=RunnerEvidence", &evidence)?;
        self.mutate_session(session_id, |record| record.evidence_chain.push(evidence.clone()))?;
        Ok(evidence)
    }

    /// Records the runner's terminal signed attestation (§3.2, §4.10),
    /// binding it to the session's `ExecutionPlan`/`RunnerIdentity`/
    /// evidence chain tail and verifying its RSA-SHA256 signature against
    /// the recorded `RunnerIdentity`'s public key.
    ///
    /// # Errors
    /// Returns [`KernelErrorCode::PlanHashMissing`]/
    /// [`KernelErrorCode::RunnerIdentityInvalid`] if the upstream artifact
    /// is missing, propagates the artifact's own validation, returns the
    /// binding verifier's first failure, or
    /// [`KernelErrorCode::CryptoKeyInvalid`] if the signature does not
    /// verify against the recorded identity's public key.
    pub fn record_runner_attestation(&self, session_id: Uuid, attestation: RunnerAttestation) -> KernelResult<RunnerAttestation> {
        attestation.validate()?;
        self_hash_ok("runnerAttestation", &attestation)?;

        let record = self.require_session(session_id)?;
        let plan = record.plan.as_ref().ok_or_else(|| {
            KernelError::new(KernelErrorCode::PlanHashMissing, "no ExecutionPlan recorded for this session")
        })?;
        let identity = record.runner_identity.as_ref().ok_or_else(|| {
            KernelError::new(KernelErrorCode::RunnerIdentityInvalid, "no RunnerIdentity recorded for this session")
        })?;
        let tail = record.evidence_chain.last().ok_or_else(|| {
            KernelError::new(KernelErrorCode::SchemaInvalid, "no RunnerEvidence recorded for this session")
        })?;

        binding_ok(gk_binding::verify_runner_attestation_binding(&attestation, plan, identity, tail)?)?;
        if !attestation.verify_signature(&identity.public_key)? {
            return Err(KernelError::new(KernelErrorCode::CryptoKeyInvalid, "RunnerAttestation signature does not verify against the recorded RunnerIdentity"));
        }

        self.persist_artifact(session_id, &attestation.meta.id.to_string(), "RunnerAttestationRecorded", "application/json;schema=RunnerAttestation", &attestation)?;
        self.mutate_session(session_id, |record| record.runner_attestation = Some(attestation.clone()))?;
        Ok(attestation)
    }
}
