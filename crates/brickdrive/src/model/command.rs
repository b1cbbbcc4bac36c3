//! Framed commands and their message class.

use serde::{Deserialize, Serialize};

use super::condition::BlockCondition;

/// Message class carried in the command-type byte of every frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    /// System command (file and firmware services).
    System {
        /// Whether the brick answers.
        reply: bool,
    },
    /// Direct command (bytecode run by the VM).
    Direct {
        /// Whether the brick answers.
        reply: bool,
    },
}

impl CommandType {
    /// Wire byte.
    pub fn byte(self) -> u8 {
        match self {
            Self::System { reply: true } => 0x01,
            Self::System { reply: false } => 0x81,
            Self::Direct { reply: true } => 0x00,
            Self::Direct { reply: false } => 0x80,
        }
    }

    /// Parse a wire byte; `None` for anything but the four known classes.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::System { reply: true }),
            0x81 => Some(Self::System { reply: false }),
            0x00 => Some(Self::Direct { reply: true }),
            0x80 => Some(Self::Direct { reply: false }),
            _ => None,
        }
    }

    /// Whether the brick answers this class.
    pub fn expects_reply(self) -> bool {
        match self {
            Self::System { reply } | Self::Direct { reply } => reply,
        }
    }
}

/// A fully framed message, ready to write to the link.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Frame bytes including the length prefix.
    pub bytes: Vec<u8>,
    /// Sequence number the reply will carry.
    pub sequence: u16,
    /// Applied after dispatch; only user commands carry a meaningful one.
    pub condition: BlockCondition,
    /// The brick answers this frame.
    pub requires_reply: bool,
    /// Sent on the caller's behalf rather than by the link itself.
    pub user_initiated: bool,
    /// Framed from an empty operation list; never written, but its
    /// condition is still handed over.
    pub is_empty: bool,
}

impl Command {
    /// Frame bytes as lowercase hex.
    pub fn hex(&self) -> String {
        hex(&self.bytes)
    }
}

/// Lowercase hex rendering used by logs and the CLI.
pub fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}
