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

//! Tests for the offline `encode` command.

use std::io::Write;
use std::process::{Command, Output, Stdio};

use serde_json::Value;

fn encode(args: &[&str], input: &str) -> Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_brickdrive"))
        .arg("encode")
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn encode");
    child
        .stdin
        .take()
        .expect("stdin piped")
        .write_all(input.as_bytes())
        .expect("failed to write request");
    child.wait_with_output().expect("failed to wait for encode")
}

const SPEED_THEN_START: &str = r#"{
    "operations": [
        {"op": "output_speed", "layer": 0, "ports": ["a"], "power": 50},
        {"op": "output_start", "layer": 0, "ports": ["a"]}
    ]
}"#;

#[test]
fn prints_the_frame_as_hex() {
    let output = encode(&[], SPEED_THEN_START);

    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), "0d000100800000a500018132a60001");
}

#[test]
fn json_output_describes_the_frame() {
    let output = encode(&["--json"], SPEED_THEN_START);

    assert!(output.status.success());
    let value: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["sequence"], 1);
    assert_eq!(value["requires_reply"], false);
    assert_eq!(value["reply_bytes"], 0);
    assert!(value["frame"].is_string());
}

#[test]
fn reply_requests_reserve_reply_space() {
    let output = encode(&["--json"], r#"{"reply_operations": [{"op": "sound_test"}]}"#);

    assert!(output.status.success());
    let value: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["requires_reply"], true);
    assert_eq!(value["reply_bytes"], 1);
}

#[test]
fn request_file_is_read_when_given() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("request.json");
    std::fs::write(&path, SPEED_THEN_START).unwrap();

    let output = encode(&["--file", path.to_str().unwrap()], "");

    assert!(output.status.success());
    assert!(!output.stdout.is_empty());
}

#[test]
fn invalid_request_exits_with_the_protocol_code() {
    let output = encode(&["--json"], r#"{"operations": [{"op": "fly"}]}"#);

    assert_eq!(output.status.code(), Some(8));
    let value: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["code"], "E_PROTOCOL");
}
