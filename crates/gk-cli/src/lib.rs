// SPDX-License-Identifier: MIT OR Apache-2.0
//! Library-level pieces of the verifier CLI (A4, §4.18), split out from
//! `main.rs` so they can be exercised without spawning the `kernel-verify`
//! binary.

pub mod session_dir;
