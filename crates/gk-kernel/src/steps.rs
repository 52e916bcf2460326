// SPDX-License-Identifier: MIT OR Apache-2.0
//! `record_step_packet`, `record_patch_artifact`, `apply_patch`,
//! `record_patch_apply_report`, `run_reviewer_pipeline`,
//! `record_reviewer_report`: the per-step loop (§3.2, §4.9, §4.11).

use crate::{binding_ok, self_hash_ok, Kernel};
use gk_artifacts::{PatchApplyReport, PatchArtifact, ReviewerReport, SelfHashing, StepPacket};
use gk_core::Actor;
use gk_error::{KernelError, KernelErrorCode, KernelResult};
use std::collections::HashMap;
use uuid::Uuid;

impl Kernel {
    /// Records a `StepPacket` (§3.2), binding it to the session's
    /// `ExecutionPlan`, the `PromptCapsule` it declares, and the recorded
    /// `RepoSnapshot`, then running the C8 structural linter over it.
    ///
    /// # Errors
    /// Returns [`KernelErrorCode::SchemaInvalid`] if the referenced
    /// `PromptCapsule` or `RepoSnapshot` has not been recorded, propagates
    /// the artifact's own validation and the C8 lint, or returns the
    /// binding verifier's first failure.
    pub fn record_step_packet(&self, session_id: Uuid, packet: StepPacket) -> KernelResult<StepPacket> {
        packet.validate()?;
        self_hash_ok("stepPacket", &packet)?;

        let record = self.require_session(session_id)?;
        let plan = record.plan.as_ref().ok_or_else(|| {
            KernelError::new(KernelErrorCode::PlanHashMissing, "no ExecutionPlan recorded for this session")
        })?;
        let snapshot = record.snapshot.as_ref().ok_or_else(|| {
            KernelError::new(KernelErrorCode::SchemaInvalid, "no RepoSnapshot recorded for this session")
        })?;
        let capsule = record
            .capsules
            .iter()
            .find(|c| c.stored_hash() == packet.capsule_hash)
            .ok_or_else(|| KernelError::new(KernelErrorCode::SchemaInvalid, "no PromptCapsule matching stepPacket.capsuleHash recorded"))?;

        binding_ok(gk_binding::verify_step_packet_binding(&packet, plan, capsule, snapshot)?)?;
        if let Some(dod) = record.dod.as_ref() {
            gk_linters::require_step_packet_lint(&packet, plan, dod)?;
        }

        self.persist_artifact(session_id, &packet.meta.id.to_string(), "StepPacketRecorded", "application/json;schema=StepPacket", &packet)?;
        self.mutate_session(session_id, |record| record.step_packets.push(packet.clone()))?;
        Ok(packet)
    }

    /// Records a `PatchArtifact` (§3.2) for a previously recorded step.
    ///
    /// # Errors
    /// Returns [`KernelErrorCode::SchemaInvalid`] if no `StepPacket` with
    /// `patch.stepId` has been recorded, [`KernelErrorCode::IdMismatch`]
    /// if `patch.sessionId` disagrees with `session_id`, or propagates the
    /// artifact's own validation.
    pub fn record_patch_artifact(&self, session_id: Uuid, patch: PatchArtifact) -> KernelResult<PatchArtifact> {
        patch.validate()?;
        self_hash_ok("patchArtifact", &patch)?;
        if patch.session_id != session_id {
            return Err(KernelError::new(KernelErrorCode::IdMismatch, "PatchArtifact.sessionId does not match the recording session"));
        }

        let record = self.require_session(session_id)?;
        if !record.step_packets.iter().any(|p| p.step_id == patch.step_id) {
            return Err(KernelError::new(KernelErrorCode::SchemaInvalid, "no StepPacket recorded for this patch's stepId")
                .with_detail("stepId", &patch.step_id));
        }

        self.persist_artifact(session_id, &patch.meta.id.to_string(), "PatchArtifactRecorded", "application/json;schema=PatchArtifact", &patch)?;
        self.mutate_session(session_id, |record| record.patch_artifacts.push(patch.clone()))?;
        Ok(patch)
    }

    /// Applies the patch recorded for `step_id` against the session's
    /// `RepoSnapshot` (§4.11), then records the resulting
    /// `PatchApplyReport`. `contents` supplies current byte content for
    /// every file named in the snapshot's `includedFiles`; `gk-patch`
    /// itself never reads the filesystem.
    ///
    /// # Errors
    /// Returns [`KernelErrorCode::SchemaInvalid`] if no matching
    /// `PatchArtifact`/`RepoSnapshot` has been recorded, or propagates
    /// [`gk_patch::apply_patch`]'s own errors.
    pub fn apply_patch(
        &self,
        session_id: Uuid,
        step_id: &str,
        contents: &HashMap<String, Vec<u8>>,
        allow_deletes: bool,
        created_by: Actor,
    ) -> KernelResult<gk_patch::ApplyOutcome> {
        let record = self.require_session(session_id)?;
        let patch = record
            .patch_artifacts
            .iter()
            .find(|p| p.step_id == step_id)
            .ok_or_else(|| KernelError::new(KernelErrorCode::SchemaInvalid, "no PatchArtifact recorded for this stepId").with_detail("stepId", step_id))?;
        let packet = record
            .step_packets
            .iter()
            .find(|p| p.step_id == step_id)
            .ok_or_else(|| KernelError::new(KernelErrorCode::SchemaInvalid, "no StepPacket recorded for this stepId").with_detail("stepId", step_id))?;
        let snapshot = record.snapshot.as_ref().ok_or_else(|| {
            KernelError::new(KernelErrorCode::SchemaInvalid, "no RepoSnapshot recorded for this session")
        })?;

        let outcome = gk_patch::apply_patch(patch, snapshot, &packet.snapshot_hash, contents, allow_deletes, created_by)?;
        self.record_patch_apply_report(session_id, outcome.report.clone())?;
        Ok(outcome)
    }

    /// Records a `PatchApplyReport` (§3.2), binding it to the
    /// `PatchArtifact`/`RepoSnapshot` it claims to apply against.
    ///
    /// # Errors
    /// Returns [`KernelErrorCode::SchemaInvalid`] if no matching
    /// `PatchArtifact` has been recorded, propagates the artifact's own
    /// validation, or returns the binding verifier's first failure.
    pub fn record_patch_apply_report(&self, session_id: Uuid, report: PatchApplyReport) -> KernelResult<PatchApplyReport> {
        report.validate()?;
        self_hash_ok("patchApplyReport", &report)?;

        let record = self.require_session(session_id)?;
        let patch = record
            .patch_artifacts
            .iter()
            .find(|p| p.stored_hash() == report.patch_hash)
            .ok_or_else(|| KernelError::new(KernelErrorCode::SchemaInvalid, "no PatchArtifact matching patchApplyReport.patchHash recorded"))?;
        let snapshot = record.snapshot.as_ref().ok_or_else(|| {
            KernelError::new(KernelErrorCode::SchemaInvalid, "no RepoSnapshot recorded for this session")
        })?;
        binding_ok(gk_binding::verify_patch_apply_report_binding(&report, patch, snapshot)?)?;

        self.persist_artifact(session_id, &report.meta.id.to_string(), "PatchApplyReportRecorded", "application/json;schema=PatchApplyReport", &report)?;
        self.mutate_session(session_id, |record| record.patch_apply_reports.push(report.clone()))?;
        Ok(report)
    }

    /// Runs the sequential reviewer pipeline (§4.9) over `step_id`'s
    /// recorded `StepPacket`/`PatchArtifact`, recording every
    /// `ReviewerReport` the pipeline produces (up to and including the
    /// first failure).
    ///
    /// # Errors
    /// Returns [`KernelErrorCode::SchemaInvalid`] if no matching
    /// `StepPacket`/`PatchArtifact` has been recorded, or propagates
    /// [`gk_reviewer::run_pipeline`]'s own errors.
    pub fn run_reviewer_pipeline(&self, session_id: Uuid, step_id: &str, created_by: &Actor) -> KernelResult<gk_reviewer::PipelineOutcome> {
        let record = self.require_session(session_id)?;
        let packet = record
            .step_packets
            .iter()
            .find(|p| p.step_id == step_id)
            .ok_or_else(|| KernelError::new(KernelErrorCode::SchemaInvalid, "no StepPacket recorded for this stepId").with_detail("stepId", step_id))?;
        let patch = record
            .patch_artifacts
            .iter()
            .find(|p| p.step_id == step_id)
            .ok_or_else(|| KernelError::new(KernelErrorCode::SchemaInvalid, "no PatchArtifact recorded for this stepId").with_detail("stepId", step_id))?;

        let outcome = gk_reviewer::run_pipeline(packet, patch, record.dod.as_ref(), created_by)?;
        for report in &outcome.reports {
            self.record_reviewer_report(session_id, report.clone())?;
        }
        Ok(outcome)
    }

    /// Records one role's `ReviewerReport` (§3.2, §4.9).
    ///
    /// # Errors
    /// Returns [`KernelErrorCode::SchemaInvalid`] if no `StepPacket` with
    /// `report.stepId` has been recorded, or propagates the artifact's own
    /// validation.
    pub fn record_reviewer_report(&self, session_id: Uuid, report: ReviewerReport) -> KernelResult<ReviewerReport> {
        report.validate()?;
        self_hash_ok("reviewerReport", &report)?;

        let record = self.require_session(session_id)?;
        if !record.step_packets.iter().any(|p| p.step_id == report.step_id) {
            return Err(KernelError::new(KernelErrorCode::SchemaInvalid, "no StepPacket recorded for this reviewer report's stepId")
                .with_detail("stepId", &report.step_id));
        }

        self.persist_artifact(session_id, &report.meta.id.to_string(), "ReviewerReportRecorded", "application/json;schema=ReviewerReport", &report)?;
        self.mutate_session(session_id, |record| record.reviewer_reports.push(report.clone()))?;
        Ok(report)
    }
}
