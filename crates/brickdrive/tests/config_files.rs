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

//! Loading link configuration files from disk.

use std::fs;
use std::time::Duration;

use brickdrive::{load_config, ErrorCode, LinkConfig};

#[test]
fn json_file_overrides_selected_fields() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("link.json");
    fs::write(
        &path,
        r#"{"config_version": 1, "command_pacing_ms": 5, "wait_timeout_ms": 3000}"#,
    )
    .unwrap();

    let config = load_config(&path).unwrap();
    assert_eq!(config.command_pacing_ms, 5);
    assert_eq!(config.wait_timeout(), Some(Duration::from_secs(3)));
    assert_eq!(config.reply_timeout_ms, LinkConfig::default().reply_timeout_ms);
}

#[test]
fn yaml_file_is_picked_by_extension() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["link.yaml", "link.yml"] {
        let path = dir.path().join(name);
        fs::write(&path, "telemetry: false\nrestart_delay_ms: 250\n").unwrap();

        let config = load_config(&path).unwrap();
        assert!(!config.telemetry, "{name}");
        assert_eq!(config.restart_delay(), Duration::from_millis(250));
    }
}

#[test]
fn yaml_content_in_a_json_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("link.json");
    fs::write(&path, "telemetry: false\n").unwrap();

    let err = load_config(&path).unwrap_err();
    assert_eq!(err.code(), ErrorCode::Config);
    assert!(err.to_string().contains("json"));
}

#[test]
fn out_of_range_values_fail_validation() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("link.yaml");
    fs::write(&path, "reply_timeout_ms: 120000\n").unwrap();

    let err = load_config(&path).unwrap_err();
    assert_eq!(err.code(), ErrorCode::Config);
    assert!(err.to_string().contains("reply_timeout_ms"));
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = load_config(&dir.path().join("absent.json")).unwrap_err();
    assert_eq!(err.code(), ErrorCode::Io);
}
