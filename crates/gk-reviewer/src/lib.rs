// SPDX-License-Identifier: MIT OR Apache-2.0
//! The sequential reviewer pipeline (C9, §4.9): five fixed roles — static,
//! security, qa, e2e, automation — each owning an ordered list of pure
//! rule functions. The orchestrator runs roles in the order declared by a
//! step's `reviewerSequence` and **halts on the first role that produces
//! any violation**. Unlike [`gk_binding`]/[`gk_gate`]'s exhaustive,
//! run-everything reports, this pipeline is fail-closed and
//! short-circuiting, matching `gate_policy.rs`'s `Role` vocabulary but not
//! its confidence-scored continuation: here a single failing role is
//! final.
//!
//! Every rule is a plain `fn` pointer — no closures, no shared mutable
//! state — so no rule can observe another role's outcome or approve its
//! own output.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use gk_artifacts::{DefinitionOfDone, PatchArtifact, ReviewerReport, ReviewerRole, ReviewerViolation, SelfHashing};
use gk_core::Actor;
use gk_error::{KernelError, KernelErrorCode};
use serde::{Deserialize, Serialize};

/// A pure reviewer rule: given a step's packet, its patch, and the
/// session's `DefinitionOfDone` (when recorded), returns every violation
/// it finds. An empty result means the rule passed.
pub type ReviewRule = fn(&gk_artifacts::StepPacket, &PatchArtifact, Option<&DefinitionOfDone>) -> Vec<ReviewerViolation>;

const MAX_DIFF_BYTES: usize = 64_000;

fn allowed_files_rule(packet: &gk_artifacts::StepPacket, patch: &PatchArtifact, _dod: Option<&DefinitionOfDone>) -> Vec<ReviewerViolation> {
    patch
        .files_changed
        .iter()
        .filter(|f| !packet.allowed_files.iter().any(|a| a == &f.path))
        .map(|f| ReviewerViolation {
            rule_id: "static.allowedFiles".into(),
            message: format!("patch touches '{}', which is not in allowedFiles", f.path),
        })
        .collect()
}

fn no_undeclared_imports_rule(packet: &gk_artifacts::StepPacket, patch: &PatchArtifact, _dod: Option<&DefinitionOfDone>) -> Vec<ReviewerViolation> {
    patch
        .declared_imports
        .iter()
        .filter(|import| !packet.allowed_symbols.iter().any(|s| s == *import))
        .map(|import| ReviewerViolation {
            rule_id: "static.noUndeclaredImports".into(),
            message: format!("declared import '{import}' is not in allowedSymbols"),
        })
        .collect()
}

fn forbidden_token_rule(_packet: &gk_artifacts::StepPacket, patch: &PatchArtifact, _dod: Option<&DefinitionOfDone>) -> Vec<ReviewerViolation> {
    let mut violations = Vec::new();
    for file in &patch.files_changed {
        for token in gk_linters::scan_forbidden_tokens(&file.diff) {
            violations.push(ReviewerViolation {
                rule_id: "security.forbiddenSurfaceToken".into(),
                message: format!("diff for '{}' contains forbidden token '{token}'", file.path),
            });
        }
    }
    violations
}

fn forbidden_key_rule(_packet: &gk_artifacts::StepPacket, patch: &PatchArtifact, _dod: Option<&DefinitionOfDone>) -> Vec<ReviewerViolation> {
    let mut violations = Vec::new();
    for file in &patch.files_changed {
        for key in gk_artifacts::FORBIDDEN_STEP_PACKET_KEYS {
            let needle = format!("\"{key}\"");
            if file.diff.contains(&needle) {
                violations.push(ReviewerViolation {
                    rule_id: "security.forbiddenKey".into(),
                    message: format!("diff for '{}' introduces forbidden key '{key}'", file.path),
                });
            }
        }
    }
    violations
}

fn step_identity_rule(packet: &gk_artifacts::StepPacket, patch: &PatchArtifact, _dod: Option<&DefinitionOfDone>) -> Vec<ReviewerViolation> {
    if packet.step_id == patch.step_id {
        Vec::new()
    } else {
        vec![ReviewerViolation {
            rule_id: "qa.stepIdentity".into(),
            message: format!(
                "patch stepId '{}' does not match packet stepId '{}'",
                patch.step_id, packet.step_id
            ),
        }]
    }
}

fn dod_reference_closure_rule(packet: &gk_artifacts::StepPacket, _patch: &PatchArtifact, dod: Option<&DefinitionOfDone>) -> Vec<ReviewerViolation> {
    let Some(dod) = dod else {
        return vec![ReviewerViolation {
            rule_id: "qa.dodReferenceClosure".into(),
            message: "no DefinitionOfDone recorded to check dodItemRefs against".into(),
        }];
    };
    let known: std::collections::HashSet<&str> = dod.items.iter().map(|i| i.id.as_str()).collect();
    packet
        .dod_item_refs
        .iter()
        .filter(|r| !known.contains(r.as_str()))
        .map(|r| ReviewerViolation {
            rule_id: "qa.dodReferenceClosure".into(),
            message: format!("dodItemRefs references unknown DoD item '{r}'"),
        })
        .collect()
}

fn context_traceability_rule(packet: &gk_artifacts::StepPacket, patch: &PatchArtifact, _dod: Option<&DefinitionOfDone>) -> Vec<ReviewerViolation> {
    if patch.files_changed.is_empty() {
        return vec![ReviewerViolation {
            rule_id: "e2e.contextTraceability".into(),
            message: "patch declares no file changes".into(),
        }];
    }
    let touched: std::collections::HashSet<&str> = patch.files_changed.iter().map(|f| f.path.as_str()).collect();
    let traced = packet.context.excerpts.iter().any(|e| touched.contains(e.path.as_str()));
    if traced {
        Vec::new()
    } else {
        vec![ReviewerViolation {
            rule_id: "e2e.contextTraceability".into(),
            message: "no context excerpt corresponds to any changed file".into(),
        }]
    }
}

fn diff_size_rule(_packet: &gk_artifacts::StepPacket, patch: &PatchArtifact, _dod: Option<&DefinitionOfDone>) -> Vec<ReviewerViolation> {
    patch
        .files_changed
        .iter()
        .filter(|f| f.diff.len() > MAX_DIFF_BYTES)
        .map(|f| ReviewerViolation {
            rule_id: "automation.diffSize".into(),
            message: format!("diff for '{}' exceeds {MAX_DIFF_BYTES} bytes", f.path),
        })
        .collect()
}

fn change_type_consistency_rule(_packet: &gk_artifacts::StepPacket, patch: &PatchArtifact, _dod: Option<&DefinitionOfDone>) -> Vec<ReviewerViolation> {
    patch
        .files_changed
        .iter()
        .filter(|f| f.change_type != gk_artifacts::ChangeType::Delete && f.diff.is_empty())
        .map(|f| ReviewerViolation {
            rule_id: "automation.changeTypeConsistency".into(),
            message: format!("'{}' is create/modify but carries an empty diff", f.path),
        })
        .collect()
}

fn rules_for_role(role: ReviewerRole) -> &'static [ReviewRule] {
    match role {
        ReviewerRole::Static => &[allowed_files_rule, no_undeclared_imports_rule],
        ReviewerRole::Security => &[forbidden_token_rule, forbidden_key_rule],
        ReviewerRole::Qa => &[step_identity_rule, dod_reference_closure_rule],
        ReviewerRole::E2e => &[context_traceability_rule],
        ReviewerRole::Automation => &[diff_size_rule, change_type_consistency_rule],
    }
}

fn parse_role(name: &str) -> Option<ReviewerRole> {
    match name {
        "static" => Some(ReviewerRole::Static),
        "security" => Some(ReviewerRole::Security),
        "qa" => Some(ReviewerRole::Qa),
        "e2e" => Some(ReviewerRole::E2e),
        "automation" => Some(ReviewerRole::Automation),
        _ => None,
    }
}

/// Runs every rule owned by `role` and produces its self-hashed
/// `ReviewerReport`.
///
/// # Errors
/// Propagates [`KernelError`] from self-hash stamping.
pub fn run_role(
    role: ReviewerRole,
    packet: &gk_artifacts::StepPacket,
    patch: &PatchArtifact,
    dod: Option<&DefinitionOfDone>,
    created_by: Actor,
) -> Result<ReviewerReport, KernelError> {
    let violations: Vec<ReviewerViolation> = rules_for_role(role)
        .iter()
        .flat_map(|rule| rule(packet, patch, dod))
        .collect();
    let mut report = ReviewerReport {
        meta: gk_core::ArtifactMeta::stamp(created_by),
        step_id: packet.step_id.clone(),
        reviewer_role: role,
        passed: violations.is_empty(),
        violations,
        hash: String::new(),
    };
    report.stamp_hash()?;
    Ok(report)
}

/// The outcome of running the full pipeline over a step's declared
/// `reviewerSequence` (§4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOutcome {
    /// `true` iff every role in the sequence ran and passed.
    pub passed: bool,
    /// The role whose rules first produced a violation, if any. Roles
    /// after this one never ran.
    #[serde(rename = "failedAt", default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<ReviewerRole>,
    /// Reports for every role that ran, in `reviewerSequence` order, up
    /// to and including the first failure.
    pub reports: Vec<ReviewerReport>,
}

/// Runs the reviewer pipeline for a step (§4.9): roles run in
/// `packet.reviewerSequence` order; the first role whose rules produce
/// any violation halts the pipeline. No role runs after a failure, and no
/// rule sees another role's report — rules are pure functions of
/// `(packet, patch, dod)` alone.
///
/// # Errors
/// Returns `REVIEWER_FAILED` if `reviewerSequence` names an unknown role,
/// or propagates hash-stamping errors.
pub fn run_pipeline(
    packet: &gk_artifacts::StepPacket,
    patch: &PatchArtifact,
    dod: Option<&DefinitionOfDone>,
    created_by: &Actor,
) -> Result<PipelineOutcome, KernelError> {
    let mut reports = Vec::with_capacity(packet.reviewer_sequence.len());
    let mut failed_at = None;

    for name in &packet.reviewer_sequence {
        let role = parse_role(name).ok_or_else(|| {
            KernelError::new(KernelErrorCode::ReviewerFailed, format!("unknown reviewer role '{name}'"))
        })?;
        let report = run_role(role, packet, patch, dod, created_by.clone())?;
        let passed = report.passed;
        reports.push(report);
        if !passed {
            failed_at = Some(role);
            break;
        }
    }

    Ok(PipelineOutcome { passed: failed_at.is_none(), failed_at, reports })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gk_artifacts::{ChangeType, DodItem, Excerpt, FileChange, StepContext, StepPacket, VerificationMethod};
    use gk_core::ArtifactMeta;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn actor() -> Actor {
        Actor::system("gk-reviewer-tests").unwrap()
    }

    fn dod() -> DefinitionOfDone {
        let mut dod = DefinitionOfDone {
            meta: ArtifactMeta::stamp(actor()),
            session_id: Uuid::new_v4(),
            title: "Ship feature X".into(),
            items: vec![DodItem {
                id: "i1".into(),
                description: "tests pass".into(),
                method: VerificationMethod::CommandExitCode {
                    verification_command: "pnpm test".into(),
                    expected_exit_code: 0,
                },
                not_done_conditions: vec![],
            }],
            hash: String::new(),
        };
        dod.stamp_hash().unwrap();
        dod
    }

    fn packet() -> StepPacket {
        let mut packet = StepPacket {
            meta: ArtifactMeta::stamp(actor()),
            lock_id: Uuid::new_v4(),
            plan_hash: "a".repeat(64),
            capsule_hash: "b".repeat(64),
            snapshot_hash: "c".repeat(64),
            dod_id: Uuid::new_v4(),
            step_id: "s1".into(),
            dod_item_refs: vec!["i1".into()],
            allowed_files: vec!["src/lib.rs".into()],
            allowed_symbols: vec!["helper".into()],
            required_capabilities: vec![],
            reviewer_sequence: vec!["static".into(), "security".into(), "qa".into()],
            context: StepContext {
                file_digests: BTreeMap::new(),
                excerpts: vec![Excerpt {
                    path: "src/lib.rs".into(),
                    start_line: 1,
                    end_line: 2,
                    text: "fn helper() {}".into(),
                }],
            },
            goal_reference: "Ship feature X".into(),
            hash: String::new(),
        };
        packet.stamp_hash().unwrap();
        packet
    }

    fn patch(step_id: &str) -> PatchArtifact {
        let mut patch = PatchArtifact {
            meta: ArtifactMeta::stamp(actor()),
            step_id: step_id.into(),
            session_id: Uuid::new_v4(),
            files_changed: vec![FileChange {
                path: "src/lib.rs".into(),
                change_type: ChangeType::Modify,
                diff: "@@ -1,1 +1,1 @@\n-old\n+new\n".into(),
            }],
            declared_imports: vec!["helper".into()],
            hash: String::new(),
        };
        patch.stamp_hash().unwrap();
        patch
    }

    #[test]
    fn clean_pipeline_passes_every_role() {
        let packet = packet();
        let outcome = run_pipeline(&packet, &patch("s1"), Some(&dod()), &actor()).unwrap();
        assert!(outcome.passed);
        assert_eq!(outcome.reports.len(), 3);
        assert!(outcome.failed_at.is_none());
    }

    #[test]
    fn static_role_failure_halts_before_security_runs() {
        let packet = packet();
        let mut bad_patch = patch("s1");
        bad_patch.files_changed[0].path = "src/other.rs".into();
        bad_patch.stamp_hash().unwrap();
        let outcome = run_pipeline(&packet, &bad_patch, Some(&dod()), &actor()).unwrap();
        assert!(!outcome.passed);
        assert_eq!(outcome.failed_at, Some(ReviewerRole::Static));
        assert_eq!(outcome.reports.len(), 1);
    }

    #[test]
    fn qa_role_catches_step_id_mismatch() {
        let packet = packet();
        let outcome = run_pipeline(&packet, &patch("s2"), Some(&dod()), &actor()).unwrap();
        assert!(!outcome.passed);
        assert_eq!(outcome.failed_at, Some(ReviewerRole::Qa));
        assert_eq!(outcome.reports.len(), 3);
    }

    #[test]
    fn security_role_flags_forbidden_token_in_diff() {
        let packet = packet();
        let mut bad_patch = patch("s1");
        bad_patch.files_changed[0].diff = "+ shell(\"rm -rf /\")".into();
        bad_patch.stamp_hash().unwrap();
        let outcome = run_pipeline(&packet, &bad_patch, Some(&dod()), &actor()).unwrap();
        assert!(!outcome.passed);
        assert_eq!(outcome.failed_at, Some(ReviewerRole::Security));
    }

    #[test]
    fn unknown_role_in_sequence_is_rejected() {
        let mut packet = packet();
        packet.reviewer_sequence = vec!["static".into(), "ghost".into(), "qa".into()];
        packet.stamp_hash().unwrap();
        let err = run_pipeline(&packet, &patch("s1"), Some(&dod()), &actor()).unwrap_err();
        assert_eq!(err.code(), KernelErrorCode::ReviewerFailed);
    }
}
