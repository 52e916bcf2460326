// SPDX-License-Identifier: MIT OR Apache-2.0
//! The declarative policy engine (C10, §4.10): a pure function of
//! `(policies, context) -> PolicyEvaluation`.
//!
//! Three pieces, in the same "condition → effect → aggregate" shape as
//! `abp-rule-engine`'s `RuleCondition`/`RuleEffect`/`RuleEngine` and
//! `abp-policy`'s `Decision::allow`/`deny`, generalized from glob/path
//! matching to a typed, path-addressed JSON context:
//!
//! - [`resolve_path`]: a dotted-path-with-`[idx]` resolver over the
//!   session context, own-property access only.
//! - [`evaluate_condition`]: the ten [`PolicyOperator`] type-checked
//!   comparisons, fail-closed on any type or resolution error.
//! - [`evaluate_policies`]: the enforcement aggregator — `deny`-true and
//!   `require`-false are failures; any `critical` failure fails the
//!   whole evaluation.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use gk_artifacts::{Policy, PolicyCondition, PolicyEffect, PolicyEvaluation, PolicyOperator, PolicyRuleResult, PolicySeverity, SelfHashing};
use gk_core::Actor;
use gk_error::{KernelError, KernelErrorCode};
use serde_json::Value;

/// Maximum accepted regex pattern length (§4.10).
pub const MAX_REGEX_PATTERN_LEN: usize = 200;
/// Maximum accepted regex input length (§4.10).
pub const MAX_REGEX_INPUT_LEN: usize = 1000;

/// Patterns containing any of these substrings are rejected outright:
/// none are supported by Rust's linear-time regex engine, but a caller
/// must get a clear `POLICY_OPERATOR_UNSUPPORTED` rather than a bare
/// compile error (§4.10: "patterns containing lookaround or
/// backreferences rejected").
const DISALLOWED_REGEX_FRAGMENTS: &[&str] = &["(?=", "(?!", "(?<=", "(?<!", "\\1", "\\2", "\\3", "\\4", "\\5", "\\6", "\\7", "\\8", "\\9"];

fn path_invalid(message: impl Into<String>) -> KernelError {
    KernelError::new(KernelErrorCode::PolicyFieldPathInvalid, message)
}

/// One parsed path segment: a field name, followed by zero or more
/// array indices.
struct Segment<'a> {
    name: &'a str,
    indices: Vec<usize>,
}

fn parse_path(path: &str) -> Result<Vec<Segment<'_>>, KernelError> {
    if path.is_empty() {
        return Err(path_invalid("field path must not be empty"));
    }
    path.split('.')
        .map(|raw| {
            let mut name_end = raw.len();
            let mut indices = Vec::new();
            let bytes = raw.as_bytes();
            let mut cursor = raw.len();
            while cursor > 0 && bytes[cursor - 1] == b']' {
                let open = raw[..cursor].rfind('[').ok_or_else(|| path_invalid(format!("malformed index in segment '{raw}'")))?;
                let idx: usize = raw[open + 1..cursor - 1]
                    .parse()
                    .map_err(|_| path_invalid(format!("non-numeric index in segment '{raw}'")))?;
                indices.push(idx);
                cursor = open;
                name_end = open;
            }
            indices.reverse();
            let name = &raw[..name_end];
            if name.is_empty() {
                return Err(path_invalid(format!("empty field name in segment '{raw}'")));
            }
            Ok(Segment { name, indices })
        })
        .collect()
}

/// Resolves a dotted field path (with optional `[idx]` segments) against
/// a JSON `context` object (§4.10).
///
/// Own-property access only (plain `serde_json::Map`/`Value::Array`
/// indexing — there is no prototype chain in JSON to guard against, but
/// the rule is honored literally: only object keys declared in the
/// document are ever visited). The *first* segment must name a key
/// present in `context`, or resolution fails with
/// `POLICY_FIELD_PATH_INVALID`; a missing key at any deeper level, or an
/// out-of-range array index anywhere, resolves to `Ok(None)`
/// ("undefined"), never an error.
///
/// # Errors
/// Returns `POLICY_FIELD_PATH_INVALID` if `path` is malformed or its
/// top-level key is absent from `context`.
pub fn resolve_path<'a>(context: &'a Value, path: &str) -> Result<Option<&'a Value>, KernelError> {
    let segments = parse_path(path)?;
    let Some(first) = segments.first() else {
        return Err(path_invalid("field path must have at least one segment"));
    };
    let top = context
        .as_object()
        .and_then(|obj| obj.get(first.name))
        .ok_or_else(|| path_invalid(format!("unknown top-level key '{}'", first.name)))?;

    let mut current = Some(top);
    for index in &first.indices {
        current = current.and_then(|v| v.as_array()).and_then(|arr| arr.get(*index));
    }
    for segment in &segments[1..] {
        current = current.and_then(|v| v.as_object()).and_then(|obj| obj.get(segment.name));
        for index in &segment.indices {
            current = current.and_then(|v| v.as_array()).and_then(|arr| arr.get(*index));
        }
    }
    Ok(current)
}

fn as_f64(value: &Value) -> Option<f64> {
    value.as_f64()
}

/// Compiles a policy regex under the guard described in §4.10. Rust's
/// `regex` crate already rejects catastrophic-backtracking constructs
/// (lookaround, backreferences) at compile time and guarantees
/// linear-time matching, so there is no runtime engine to preempt; the
/// wall-clock timeout from [`gk_config::KernelConfig::policy_regex_timeout_millis`]
/// is instead honored by scaling the compiled program's `size_limit` —
/// bounding compile-time work in proportion to the configured budget —
/// while the explicit length caps bound per-match work. See DESIGN.md
/// for the rationale.
fn compile_guarded_regex(pattern: &str, timeout_millis: u64) -> Result<regex::Regex, KernelError> {
    if pattern.len() > MAX_REGEX_PATTERN_LEN {
        return Err(KernelError::new(
            KernelErrorCode::PolicyOperatorUnsupported,
            format!("regex pattern exceeds {MAX_REGEX_PATTERN_LEN} characters"),
        ));
    }
    if DISALLOWED_REGEX_FRAGMENTS.iter().any(|frag| pattern.contains(frag)) {
        return Err(KernelError::new(
            KernelErrorCode::PolicyOperatorUnsupported,
            "regex pattern uses lookaround or backreferences, which are unsupported",
        ));
    }
    let size_limit = (timeout_millis.max(1) as usize).saturating_mul(10_000).min(10 << 20);
    regex::RegexBuilder::new(pattern)
        .size_limit(size_limit)
        .build()
        .map_err(|e| KernelError::new(KernelErrorCode::PolicyOperatorUnsupported, format!("invalid regex pattern: {e}")))
}

/// Evaluates one [`PolicyCondition`] against an already-resolved field
/// value (§4.10). Type preconditions are enforced here, not in
/// `gk-artifacts`; a precondition violation is a failure, never a panic.
///
/// # Errors
/// Returns `POLICY_OPERATOR_UNSUPPORTED` when the resolved value's type
/// does not match what the operator requires, or when a `matches_regex`
/// pattern/input is rejected by the regex guard.
pub fn evaluate_condition(condition: &PolicyCondition, resolved: Option<&Value>, regex_timeout_millis: u64) -> Result<bool, KernelError> {
    use PolicyOperator::{Equals, Exists, GreaterThan, In, LessThan, MatchesRegex, NotEquals, NotIn, SubsetOf, SupersetOf};

    match condition.operator {
        Exists => Ok(resolved.is_some_and(|v| !v.is_null())),
        Equals => Ok(resolved == Some(&condition.value)),
        NotEquals => Ok(resolved != Some(&condition.value)),
        In => {
            let set = condition.value.as_array().ok_or_else(|| {
                KernelError::new(KernelErrorCode::PolicyOperatorUnsupported, "'in' requires an array operand")
            })?;
            Ok(resolved.is_some_and(|v| set.contains(v)))
        }
        NotIn => {
            let set = condition.value.as_array().ok_or_else(|| {
                KernelError::new(KernelErrorCode::PolicyOperatorUnsupported, "'not_in' requires an array operand")
            })?;
            Ok(!resolved.is_some_and(|v| set.contains(v)))
        }
        SubsetOf => {
            let superset = condition.value.as_array().ok_or_else(|| {
                KernelError::new(KernelErrorCode::PolicyOperatorUnsupported, "'subset_of' requires an array operand")
            })?;
            let field = resolved.and_then(Value::as_array).ok_or_else(|| {
                KernelError::new(KernelErrorCode::PolicyOperatorUnsupported, "'subset_of' requires an array field value")
            })?;
            Ok(field.iter().all(|v| superset.contains(v)))
        }
        SupersetOf => {
            let subset = condition.value.as_array().ok_or_else(|| {
                KernelError::new(KernelErrorCode::PolicyOperatorUnsupported, "'superset_of' requires an array operand")
            })?;
            let field = resolved.and_then(Value::as_array).ok_or_else(|| {
                KernelError::new(KernelErrorCode::PolicyOperatorUnsupported, "'superset_of' requires an array field value")
            })?;
            Ok(subset.iter().all(|v| field.contains(v)))
        }
        GreaterThan => {
            let lhs = resolved.and_then(as_f64).ok_or_else(|| {
                KernelError::new(KernelErrorCode::PolicyOperatorUnsupported, "'greater_than' requires a numeric field value")
            })?;
            let rhs = as_f64(&condition.value).ok_or_else(|| {
                KernelError::new(KernelErrorCode::PolicyOperatorUnsupported, "'greater_than' requires a numeric operand")
            })?;
            Ok(lhs > rhs)
        }
        LessThan => {
            let lhs = resolved.and_then(as_f64).ok_or_else(|| {
                KernelError::new(KernelErrorCode::PolicyOperatorUnsupported, "'less_than' requires a numeric field value")
            })?;
            let rhs = as_f64(&condition.value).ok_or_else(|| {
                KernelError::new(KernelErrorCode::PolicyOperatorUnsupported, "'less_than' requires a numeric operand")
            })?;
            Ok(lhs < rhs)
        }
        MatchesRegex => {
            let pattern = condition.value.as_str().ok_or_else(|| {
                KernelError::new(KernelErrorCode::PolicyOperatorUnsupported, "'matches_regex' requires a string pattern operand")
            })?;
            let input = resolved.and_then(Value::as_str).ok_or_else(|| {
                KernelError::new(KernelErrorCode::PolicyOperatorUnsupported, "'matches_regex' requires a string field value")
            })?;
            if input.len() > MAX_REGEX_INPUT_LEN {
                return Err(KernelError::new(
                    KernelErrorCode::PolicyOperatorUnsupported,
                    format!("regex input exceeds {MAX_REGEX_INPUT_LEN} characters"),
                ));
            }
            let regex = compile_guarded_regex(pattern, regex_timeout_millis)?;
            Ok(regex.is_match(input))
        }
    }
}

/// Evaluates every rule of every policy against `context` and aggregates
/// the result (§4.10).
///
/// - `deny` whose condition is true is a failure.
/// - `require` whose condition is false is a failure.
/// - `allow` never fails; it is purely documentary.
/// - Any condition-evaluation error (bad path, type mismatch, rejected
///   regex) is treated as a failure of that rule, fail-closed, with the
///   error's message carried as the result's `reason`.
/// - `evaluation.passed` is `true` iff no `critical`-severity rule
///   failed; `warning`/`info` failures accumulate without affecting it.
///
/// # Errors
/// Propagates [`KernelError`] only from hash computation over the
/// policy set / context, never from rule evaluation itself (every rule
/// failure is captured in the returned [`PolicyEvaluation`]).
pub fn evaluate_policies(
    policies: &[Policy],
    context: &Value,
    config: &gk_config::KernelConfig,
    created_by: Actor,
) -> Result<PolicyEvaluation, KernelError> {
    let mut results = Vec::new();
    for policy in policies {
        for rule in &policy.rules {
            let outcome = resolve_path(context, &rule.condition.field)
                .and_then(|resolved| evaluate_condition(&rule.condition, resolved, config.policy_regex_timeout_millis));
            let (condition_true, error_reason) = match outcome {
                Ok(v) => (v, None),
                Err(e) => (false, Some(e.message().to_string())),
            };
            let enforcement_failed = match rule.effect {
                PolicyEffect::Allow => false,
                PolicyEffect::Deny => condition_true,
                PolicyEffect::Require => !condition_true,
            };
            let passed = error_reason.is_none() && !enforcement_failed;
            let reason = if passed {
                None
            } else {
                Some(error_reason.unwrap_or_else(|| describe_enforcement_failure(rule.effect)))
            };
            results.push(PolicyRuleResult {
                rule_id: rule.rule_id.clone(),
                passed,
                severity: rule.severity,
                effect: rule.effect,
                reason,
            });
        }
    }

    let passed = !results.iter().any(|r| !r.passed && r.severity == PolicySeverity::Critical);

    let sorted_hashes: Vec<String> = {
        let mut hashes: Vec<String> = policies.iter().map(|p| p.hash.clone()).collect();
        hashes.sort();
        hashes
    };
    let policy_set_bytes = gk_codec::canonicalize_value(&Value::Array(sorted_hashes.into_iter().map(Value::String).collect()))
        .map_err(|e| KernelError::new(KernelErrorCode::PolicyInvalid, "failed to canonicalize policy set").with_source(e))?;
    let policy_set_hash = gk_codec::sha256_hex(&policy_set_bytes);

    let context_bytes = gk_codec::canonicalize_value(context)
        .map_err(|e| KernelError::new(KernelErrorCode::PolicyInvalid, "failed to canonicalize policy context").with_source(e))?;
    let context_hash = gk_codec::sha256_hex(&context_bytes);

    let mut evaluation = PolicyEvaluation {
        meta: gk_core::ArtifactMeta::stamp(created_by),
        policy_set_hash,
        context_hash,
        results,
        passed,
        hash: String::new(),
    };
    evaluation.stamp_hash()?;
    Ok(evaluation)
}

fn describe_enforcement_failure(effect: PolicyEffect) -> String {
    match effect {
        PolicyEffect::Allow => unreachable!("allow never fails"),
        PolicyEffect::Deny => "deny condition matched".to_string(),
        PolicyEffect::Require => "require condition not satisfied".to_string(),
    }
}

/// Raises `POLICY_DENIED` (for a failed `deny` rule) or
/// `POLICY_REQUIREMENT_FAILED` (for a failed `require` rule) if
/// `evaluation` did not pass; otherwise succeeds (§4.10).
///
/// # Errors
/// Returns the first critical-severity failure's corresponding code.
pub fn enforce(evaluation: &PolicyEvaluation) -> Result<(), KernelError> {
    let Some(failure) = evaluation
        .results
        .iter()
        .find(|r| !r.passed && r.severity == PolicySeverity::Critical)
    else {
        return Ok(());
    };
    let code = match failure.effect {
        PolicyEffect::Deny => KernelErrorCode::PolicyDenied,
        PolicyEffect::Require => KernelErrorCode::PolicyRequirementFailed,
        PolicyEffect::Allow => KernelErrorCode::PolicyDenied,
    };
    Err(KernelError::new(code, format!("rule '{}' failed: {}", failure.rule_id, failure.reason.clone().unwrap_or_default()))
        .with_detail("ruleId", &failure.rule_id))
}
