// Test module - relaxed lint rules
#![allow(clippy::default_trait_access)]
#![allow(clippy::indexing_slicing)]
#![allow(clippy::unreadable_literal)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::inefficient_to_string)]
#![allow(clippy::panic)]
#![allow(clippy::manual_assert)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::cast_possible_truncation)]
#![allow(missing_docs)]

//! Tests for shell completion generation.

use std::process::Command;

fn brickdrive_bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_brickdrive"))
}

#[test]
fn completions_generates_bash_output() {
    let output = brickdrive_bin()
        .args(["completions", "bash"])
        .output()
        .expect("failed to execute");

    assert!(
        output.status.success(),
        "completions bash should succeed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("_brickdrive"));
    assert!(stdout.contains("complete"));
}

#[test]
fn completions_generates_fish_output() {
    let output = brickdrive_bin()
        .args(["completions", "fish"])
        .output()
        .expect("failed to execute");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("complete -c brickdrive"));
}

#[test]
fn completions_rejects_unknown_shells() {
    let output = brickdrive_bin()
        .args(["completions", "tcsh"])
        .output()
        .expect("failed to execute");

    assert!(!output.status.success());
}
