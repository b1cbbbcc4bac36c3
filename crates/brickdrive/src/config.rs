//! Link configuration.
//!
//! Loaded from JSON or YAML (picked by file extension). Every field has a
//! default, so an empty object is a valid configuration.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LinkError, LinkResult};
use crate::model::BRICK_NAME_MAX_LEN;
use crate::transport::TransportTiming;

/// Current configuration format version.
pub const CONFIG_VERSION: u32 = 1;

const MAX_PACING_MS: u64 = 1_000;
const MIN_REPLY_TIMEOUT_MS: u64 = 50;
const MAX_REPLY_TIMEOUT_MS: u64 = 60_000;

/// Tunables of one brick link.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LinkConfig {
    /// Format version; must equal [`CONFIG_VERSION`].
    pub config_version: u32,
    /// How long a fire-and-forget user command holds the link.
    pub command_pacing_ms: u64,
    /// An expected reply older than this is reported as failed.
    pub reply_timeout_ms: u64,
    /// Pause between teardown and reopen on a session restart, and between
    /// reconnect attempts.
    pub restart_delay_ms: u64,
    /// Retry interval while the stream has no write space.
    pub write_retry_ms: u64,
    /// Upper bound for blocking waits on tickets, if any.
    pub wait_timeout_ms: Option<u64>,
    /// Run the standing telemetry poll.
    pub telemetry: bool,
    /// Reopen the session on its own after the brick goes away.
    pub auto_reconnect: bool,
    /// Longest brick name asked for in name reads.
    pub brick_name_max_len: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            config_version: CONFIG_VERSION,
            command_pacing_ms: 20,
            reply_timeout_ms: 2_000,
            restart_delay_ms: 1_000,
            write_retry_ms: 10,
            wait_timeout_ms: None,
            telemetry: true,
            auto_reconnect: false,
            brick_name_max_len: BRICK_NAME_MAX_LEN,
        }
    }
}

impl LinkConfig {
    /// Transport pacing and reply deadline.
    pub fn timing(&self) -> TransportTiming {
        TransportTiming {
            command_pacing: Duration::from_millis(self.command_pacing_ms),
            reply_timeout: Duration::from_millis(self.reply_timeout_ms),
        }
    }

    /// [`LinkConfig::restart_delay_ms`] as a duration.
    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    /// [`LinkConfig::write_retry_ms`] as a duration.
    pub fn write_retry(&self) -> Duration {
        Duration::from_millis(self.write_retry_ms)
    }

    /// [`LinkConfig::wait_timeout_ms`] as a duration.
    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout_ms.map(Duration::from_millis)
    }
}

/// Read and validate a configuration file.
///
/// # Errors
/// Returns [`LinkError::Io`] when the file cannot be read and
/// [`LinkError::Config`] when it does not parse or validate.
pub fn load_config(path: &Path) -> LinkResult<LinkConfig> {
    let data = fs::read_to_string(path)
        .map_err(|err| LinkError::io(&format!("failed to read {}", path.display()), err))?;
    let is_yaml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext == "yaml" || ext == "yml");
    let config: LinkConfig = if is_yaml {
        serde_yml::from_str(&data)
            .map_err(|err| LinkError::config(format!("failed to parse yaml config: {err}")))?
    } else {
        serde_json::from_str(&data)
            .map_err(|err| LinkError::config(format!("failed to parse json config: {err}")))?
    };
    validate_config(&config)?;
    Ok(config)
}

/// Check version and bounds.
///
/// # Errors
/// Returns [`LinkError::Config`] describing the first violation.
pub fn validate_config(config: &LinkConfig) -> LinkResult<()> {
    if config.config_version != CONFIG_VERSION {
        return Err(LinkError::config(format!(
            "unsupported config_version {}, expected {CONFIG_VERSION}",
            config.config_version
        )));
    }
    if config.command_pacing_ms > MAX_PACING_MS {
        return Err(LinkError::config(format!(
            "command_pacing_ms must be at most {MAX_PACING_MS}"
        )));
    }
    if !(MIN_REPLY_TIMEOUT_MS..=MAX_REPLY_TIMEOUT_MS).contains(&config.reply_timeout_ms) {
        return Err(LinkError::config(format!(
            "reply_timeout_ms must be between {MIN_REPLY_TIMEOUT_MS} and {MAX_REPLY_TIMEOUT_MS}"
        )));
    }
    if config.write_retry_ms == 0 {
        return Err(LinkError::config("write_retry_ms must be positive"));
    }
    if config.wait_timeout_ms == Some(0) {
        return Err(LinkError::config("wait_timeout_ms must be positive when set"));
    }
    if !(1..=BRICK_NAME_MAX_LEN).contains(&config.brick_name_max_len) {
        return Err(LinkError::config(format!(
            "brick_name_max_len must be between 1 and {BRICK_NAME_MAX_LEN}"
        )));
    }
    Ok(())
}
