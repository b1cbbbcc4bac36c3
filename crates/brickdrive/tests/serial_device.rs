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

//! Serial device sessions: the reader thread of a closed session must go
//! away, so a restarted link never has two readers on one device.
//!
//! Kept in its own test binary: it counts the process's reader threads.

#![cfg(unix)]

use std::fs;
use std::path::Path;
use std::process::Command;
use std::thread;
use std::time::{Duration, Instant};

use brickdrive::{Link, LinkConfig, NoopObserver, SerialDeviceSession};

const WAIT: Duration = Duration::from_secs(5);

/// Reader threads are named `brickdrive-reader-N`; the kernel keeps the
/// first 15 bytes.
fn reader_threads() -> usize {
    fs::read_dir("/proc/self/task")
        .map(|tasks| {
            tasks
                .filter_map(Result::ok)
                .filter_map(|task| fs::read_to_string(task.path().join("comm")).ok())
                .filter(|comm| comm.trim().starts_with("brickdrive-read"))
                .count()
        })
        .unwrap_or(0)
}

fn wait_for_readers(expected: usize) {
    let deadline = Instant::now() + WAIT;
    while reader_threads() != expected {
        if Instant::now() > deadline {
            panic!(
                "expected {expected} reader threads, found {}",
                reader_threads()
            );
        }
        thread::sleep(Duration::from_millis(10));
    }
}

fn make_fifo(path: &Path) {
    let status = Command::new("mkfifo")
        .arg(path)
        .status()
        .expect("mkfifo should run");
    assert!(status.success(), "mkfifo failed");
}

#[test]
fn closed_sessions_release_their_reader() {
    if !Path::new("/proc/self/task").exists() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let device = dir.path().join("rfcomm-test");
    make_fifo(&device);

    let config = LinkConfig {
        telemetry: false,
        restart_delay_ms: 20,
        reply_timeout_ms: 100,
        ..LinkConfig::default()
    };
    let handle = Link::start(
        Box::new(SerialDeviceSession::new(&device)),
        config,
        Box::new(NoopObserver),
    )
    .expect("fifo device should open");
    wait_for_readers(1);

    handle.restart_session().unwrap();
    assert!(handle.is_connected());
    wait_for_readers(1);

    handle.disconnect();
    wait_for_readers(0);
}
