//! Sound commands.

use serde::{Deserialize, Serialize};

/// Sub-commands of the sound opcode (`0x94`).
///
/// Volumes are clamped to 0..=100 and tone frequencies to 250..=10000 Hz
/// when encoded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SoundCommand {
    /// Stop whatever is playing.
    Break,
    /// Play a tone.
    Tone {
        /// Volume, 0..=100.
        volume: u8,
        /// Pitch in Hz, 250..=10000.
        frequency: u16,
        /// Length of the tone.
        duration_ms: u16,
    },
    /// Play a sound file stored on the brick once.
    Play {
        /// Volume, 0..=100.
        volume: u8,
        /// Path of the sound file on the brick, without extension.
        name: String,
    },
    /// Play a sound file stored on the brick in a loop.
    Repeat {
        /// Volume, 0..=100.
        volume: u8,
        /// Path of the sound file on the brick, without extension.
        name: String,
    },
    /// Sound-test marker; encodes to nothing and exists for busy polling.
    Test,
}

impl SoundCommand {
    /// Sub-opcode byte, or `None` for [`SoundCommand::Test`].
    pub fn sub_opcode(&self) -> Option<u8> {
        match self {
            Self::Break => Some(0x00),
            Self::Tone { .. } => Some(0x01),
            Self::Play { .. } => Some(0x02),
            Self::Repeat { .. } => Some(0x03),
            Self::Test => None,
        }
    }
}
