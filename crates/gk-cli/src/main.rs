// SPDX-License-Identifier: MIT OR Apache-2.0
//! `kernel-verify`: the thin verifier CLI surface (A4, §4.18) wrapping
//! `verifyRunChain` (C3), the replay verifier (C12), and the sealed change
//! package builder/validator (C14) behind the exit-code contract of §6.4:
//! `0` pass, `1` usage error, `3` verification failure.
#![deny(unsafe_code)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gk_cli::session_dir;
use gk_kernel::Kernel;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Exit code for a usage error (bad arguments, unreadable file).
const EXIT_USAGE_ERROR: i32 = 1;
/// Exit code for a verification failure (report printed, still non-zero).
const EXIT_VERIFICATION_FAILED: i32 = 3;

#[derive(Parser, Debug)]
#[command(name = "kernel-verify", version, about = "Verifier CLI for the governance kernel")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging.
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Re-verify a run's hash-chained event log (C3).
    VerifyChain {
        /// The session/run UUID to verify.
        run_id: String,

        /// Root directory of the event store the run was recorded into.
        #[arg(long, env = "GK_EVENT_STORE_ROOT")]
        event_store_root: PathBuf,
    },

    /// Replay a session directory or zip, re-deriving every hash, binding,
    /// policy evaluation, and signature it claims (C12).
    Replay {
        /// Path to a session directory, or a `.zip` archive of one.
        bundle_dir_or_zip: PathBuf,
    },

    /// Build a `SealedChangePackage` from a session directory's recorded
    /// artifacts (C14).
    Seal {
        /// Path to the session directory to seal.
        session_dir: PathBuf,
    },

    /// Independently re-verify a session directory's already-recorded
    /// `sealed-change-package.json` against its claimed dependencies (C14).
    VerifySeal {
        /// Path to the session directory containing `sealed-change-package.json`.
        session_dir: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("gk_kernel=debug,gk_cli=debug")
    } else {
        EnvFilter::new("gk_kernel=info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let outcome = match cli.command {
        Commands::VerifyChain { run_id, event_store_root } => cmd_verify_chain(&run_id, &event_store_root),
        Commands::Replay { bundle_dir_or_zip } => cmd_replay(&bundle_dir_or_zip),
        Commands::Seal { session_dir } => cmd_seal(&session_dir),
        Commands::VerifySeal { session_dir } => cmd_verify_seal(&session_dir),
    };

    match outcome {
        Ok(passed) => {
            if !passed {
                std::process::exit(EXIT_VERIFICATION_FAILED);
            }
        }
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(EXIT_USAGE_ERROR);
        }
    }
}

/// Prints `report` as canonical JSON to stdout and returns whether it
/// passed, per §6.4/§7's "verifier CLI prints the canonical verification
/// report as JSON to stdout" contract.
fn print_report<T: serde::Serialize>(report: &T, passed: bool) -> Result<bool> {
    let json = gk_codec::canonicalize_to_string(report).context("canonicalize verification report")?;
    println!("{json}");
    Ok(passed)
}

fn cmd_verify_chain(run_id: &str, event_store_root: &std::path::Path) -> Result<bool> {
    let mut config = gk_config::KernelConfig::default();
    config.event_store_root = Some(event_store_root.to_string_lossy().into_owned());
    // verify-chain never touches the artifact store, but Kernel::open
    // requires a root regardless (§4's "a session with nowhere to persist
    // cannot honor the replayable contract" applies just as much to a
    // scratch store we never write to).
    let scratch = tempfile::tempdir().context("create scratch artifact store")?;
    config.artifact_store_root = Some(scratch.path().to_string_lossy().into_owned());

    let kernel = Kernel::open(config).context("open Kernel")?;
    let run_uuid = uuid::Uuid::parse_str(run_id).with_context(|| format!("'{run_id}' is not a valid UUID"))?;
    let report = kernel.verify_run_chain(run_uuid).context("verify run chain")?;
    print_report(&report, report.valid)
}

fn cmd_replay(bundle_dir_or_zip: &std::path::Path) -> Result<bool> {
    let scratch = tempfile::tempdir().context("create scratch kernel stores")?;
    let kernel = session_dir::open_scratch_kernel(scratch.path())?;
    let dir = session_dir::resolve_session_dir(bundle_dir_or_zip, scratch.path())?;
    let session_id = session_dir::load_into_kernel(&kernel, &dir)?;

    let result = kernel.replay_session(session_id, session_dir::cli_actor()).context("replay session")?;
    print_report(&result, result.deterministic_replay_passed)
}

fn cmd_seal(session_dir_path: &std::path::Path) -> Result<bool> {
    let scratch = tempfile::tempdir().context("create scratch kernel stores")?;
    let kernel = session_dir::open_scratch_kernel(scratch.path())?;
    let session_id = session_dir::load_into_kernel(&kernel, session_dir_path)?;

    let scp = kernel.seal_session(session_id, session_dir::cli_actor()).context("seal session")?;
    print_report(&scp, true)
}

fn cmd_verify_seal(session_dir_path: &std::path::Path) -> Result<bool> {
    let scratch = tempfile::tempdir().context("create scratch kernel stores")?;
    let kernel = session_dir::open_scratch_kernel(scratch.path())?;
    let session_id = session_dir::load_into_kernel(&kernel, session_dir_path)?;

    let scp: gk_artifacts::SealedChangePackage = {
        let path = session_dir_path.join("sealed-change-package.json");
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("read '{}'", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("parse '{}'", path.display()))?
    };
    kernel.record_sealed_change_package(session_id, scp).context("load SealedChangePackage")?;

    let report = kernel.verify_sealed_change_package(session_id).context("verify sealed change package")?;
    print_report(&report, report.passed)
}
