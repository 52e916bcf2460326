// SPDX-License-Identifier: MIT OR Apache-2.0
//! Configuration loading, validation, and merging for the governance kernel.
//!
//! This crate provides [`KernelConfig`] — the top-level runtime settings for
//! the event store, artifact store, size ceilings, and the regex guard used
//! by the policy engine — together with helpers for loading from TOML
//! files, merging overlays, and producing advisory [`ConfigWarning`]s.
//!
//! Three layers apply in order: compiled-in defaults, an optional TOML
//! file, then environment variable overrides (`GK_EVENT_STORE_ROOT`,
//! `GK_ARTIFACT_STORE_ROOT`, `GK_LOG_LEVEL`).
#![deny(unsafe_code)]
#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// Advisory-level issues that do not prevent operation but deserve attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// A recommended optional field is missing.
    MissingOptionalField {
        /// Name of the missing field.
        field: String,
        /// Why it matters.
        hint: String,
    },
    /// The regex evaluation timeout is unusually large.
    LargeRegexTimeout {
        /// Timeout value in milliseconds.
        millis: u64,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::MissingOptionalField { field, hint } => {
                write!(f, "missing optional field '{field}': {hint}")
            }
            ConfigWarning::LargeRegexTimeout { millis } => {
                write!(f, "policy regex timeout is unusually large ({millis}ms)")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config type
// ---------------------------------------------------------------------------

/// Top-level runtime configuration for the governance kernel.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct KernelConfig {
    /// Root directory for the event store's run-scoped JSONL logs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_store_root: Option<String>,

    /// Root directory for the content-addressed artifact store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_store_root: Option<String>,

    /// Log level override (e.g. `"debug"`, `"info"`, `"warn"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Maximum serialized size, in bytes, of a `StepPacket` (§3.2/§4.5).
    pub max_packet_size_bytes: u64,

    /// Below this many bytes of total evidence, a bundle export inlines raw
    /// content instead of separate per-file entries (§4.13).
    pub bundle_inline_threshold_bytes: u64,

    /// Timeout, in milliseconds, for a single policy regex evaluation
    /// before it is treated as a guard failure (§4.10).
    pub policy_regex_timeout_millis: u64,

    /// Supported schema major version for every artifact (§3.1).
    pub schema_major: u32,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            event_store_root: None,
            artifact_store_root: None,
            log_level: Some("info".into()),
            max_packet_size_bytes: 200_000,
            bundle_inline_threshold_bytes: 1_000_000,
            policy_regex_timeout_millis: 50,
            schema_major: gk_core::SUPPORTED_SCHEMA_MAJOR,
        }
    }
}

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Recognised log levels.
const VALID_LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];

/// Threshold above which a regex timeout generates a warning.
const LARGE_REGEX_TIMEOUT_THRESHOLD_MILLIS: u64 = 1_000;

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load a [`KernelConfig`] from an optional TOML file path.
///
/// * If `path` is `Some`, reads and parses the file.
/// * If `path` is `None`, returns [`KernelConfig::default()`].
///
/// Environment variable overrides are applied on top in both cases.
pub fn load_config(path: Option<&Path>) -> Result<KernelConfig, ConfigError> {
    let mut config = match path {
        Some(p) => {
            let content = std::fs::read_to_string(p).map_err(|_| ConfigError::FileNotFound {
                path: p.display().to_string(),
            })?;
            parse_toml(&content)?
        }
        None => KernelConfig::default(),
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Parse a TOML string into a [`KernelConfig`].
///
/// Fields omitted from the input fall back to [`KernelConfig::default()`]
/// values via `#[serde(default)]` on every field with a sensible default.
pub fn parse_toml(content: &str) -> Result<KernelConfig, ConfigError> {
    let defaults = KernelConfig::default();
    let partial: PartialKernelConfig =
        toml::from_str(content).map_err(|e| ConfigError::ParseError {
            reason: e.to_string(),
        })?;
    Ok(partial.into_config(defaults))
}

/// A TOML-deserializable shape where every field is optional, layered onto
/// [`KernelConfig::default()`] by [`parse_toml`]. Keeping this separate from
/// [`KernelConfig`] lets a TOML file specify only the fields it wants to
/// override without requiring every numeric field to be repeated.
#[derive(Debug, Deserialize, Default)]
struct PartialKernelConfig {
    event_store_root: Option<String>,
    artifact_store_root: Option<String>,
    log_level: Option<String>,
    max_packet_size_bytes: Option<u64>,
    bundle_inline_threshold_bytes: Option<u64>,
    policy_regex_timeout_millis: Option<u64>,
    schema_major: Option<u32>,
}

impl PartialKernelConfig {
    fn into_config(self, defaults: KernelConfig) -> KernelConfig {
        KernelConfig {
            event_store_root: self.event_store_root.or(defaults.event_store_root),
            artifact_store_root: self.artifact_store_root.or(defaults.artifact_store_root),
            log_level: self.log_level.or(defaults.log_level),
            max_packet_size_bytes: self
                .max_packet_size_bytes
                .unwrap_or(defaults.max_packet_size_bytes),
            bundle_inline_threshold_bytes: self
                .bundle_inline_threshold_bytes
                .unwrap_or(defaults.bundle_inline_threshold_bytes),
            policy_regex_timeout_millis: self
                .policy_regex_timeout_millis
                .unwrap_or(defaults.policy_regex_timeout_millis),
            schema_major: self.schema_major.unwrap_or(defaults.schema_major),
        }
    }
}

// ---------------------------------------------------------------------------
// Env overrides
// ---------------------------------------------------------------------------

/// Apply environment variable overrides.
///
/// Recognised variables:
/// - `GK_EVENT_STORE_ROOT`
/// - `GK_ARTIFACT_STORE_ROOT`
/// - `GK_LOG_LEVEL`
pub fn apply_env_overrides(config: &mut KernelConfig) {
    if let Ok(val) = std::env::var("GK_EVENT_STORE_ROOT") {
        config.event_store_root = Some(val);
    }
    if let Ok(val) = std::env::var("GK_ARTIFACT_STORE_ROOT") {
        config.artifact_store_root = Some(val);
    }
    if let Ok(val) = std::env::var("GK_LOG_LEVEL") {
        config.log_level = Some(val);
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a parsed configuration, returning advisory warnings.
///
/// Hard errors (invalid log level, zero-valued ceilings) are returned as a
/// [`ConfigError::ValidationError`]; soft issues come back as warnings.
pub fn validate_config(config: &KernelConfig) -> Result<Vec<ConfigWarning>, ConfigError> {
    let mut errors: Vec<String> = Vec::new();
    let mut warnings: Vec<ConfigWarning> = Vec::new();

    if let Some(ref level) = config.log_level
        && !VALID_LOG_LEVELS.contains(&level.as_str())
    {
        errors.push(format!("invalid log_level '{level}'"));
    }

    if config.max_packet_size_bytes == 0 {
        errors.push("max_packet_size_bytes must be greater than zero".into());
    }
    if config.bundle_inline_threshold_bytes == 0 {
        errors.push("bundle_inline_threshold_bytes must be greater than zero".into());
    }
    if config.policy_regex_timeout_millis == 0 {
        errors.push("policy_regex_timeout_millis must be greater than zero".into());
    } else if config.policy_regex_timeout_millis > LARGE_REGEX_TIMEOUT_THRESHOLD_MILLIS {
        warnings.push(ConfigWarning::LargeRegexTimeout {
            millis: config.policy_regex_timeout_millis,
        });
    }

    if config.event_store_root.is_none() {
        warnings.push(ConfigWarning::MissingOptionalField {
            field: "event_store_root".into(),
            hint: "events will not be persisted to disk".into(),
        });
    }
    if config.artifact_store_root.is_none() {
        warnings.push(ConfigWarning::MissingOptionalField {
            field: "artifact_store_root".into(),
            hint: "artifacts will not be persisted to disk".into(),
        });
    }

    if errors.is_empty() {
        Ok(warnings)
    } else {
        Err(ConfigError::ValidationError { reasons: errors })
    }
}

// ---------------------------------------------------------------------------
// Merging
// ---------------------------------------------------------------------------

/// Merge two configurations. Values in `overlay` take precedence over
/// `base` for every `Option` field; scalar fields always take the overlay's
/// value since [`KernelConfig`] always carries one (never `Option`).
pub fn merge_configs(base: KernelConfig, overlay: KernelConfig) -> KernelConfig {
    KernelConfig {
        event_store_root: overlay.event_store_root.or(base.event_store_root),
        artifact_store_root: overlay.artifact_store_root.or(base.artifact_store_root),
        log_level: overlay.log_level.or(base.log_level),
        max_packet_size_bytes: overlay.max_packet_size_bytes,
        bundle_inline_threshold_bytes: overlay.bundle_inline_threshold_bytes,
        policy_regex_timeout_millis: overlay.policy_regex_timeout_millis,
        schema_major: overlay.schema_major,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
