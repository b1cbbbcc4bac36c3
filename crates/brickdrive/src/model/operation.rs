//! Fire-and-forget operations.

use serde::{Deserialize, Serialize};

use super::display::DrawCommand;
use super::port::{InputPort, OutputPort};
use super::sound::SoundCommand;
use super::write::WriteCommand;

/// Longest brick name the firmware accepts.
pub const BRICK_NAME_MAX_LEN: usize = 13;

/// Motor type operand for [`Operation::OutputSetType`].
///
/// These byte values are what the set-type opcode expects and differ from the
/// device type codes reported back in telemetry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotorType {
    /// Medium servo motor.
    Medium = 0x07,
    /// Large servo motor.
    Large = 0x08,
}

impl MotorType {
    /// Operand byte for the set-type opcode.
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// A fire-and-forget instruction to the brick.
///
/// Every variant encodes to a fixed opcode followed by its operands. Nothing
/// here produces a reply; see [`crate::model::ReplyOperation`] for reads.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Rename the brick. Non-alphanumeric characters are dropped and the
    /// result is cut to [`BRICK_NAME_MAX_LEN`] characters.
    SetBrickName {
        /// Requested name, before sanitizing.
        name: String,
    },
    /// Tell an output port which motor is connected.
    OutputSetType {
        /// Daisy-chain layer, 0 for the brick itself.
        layer: i32,
        /// Target port.
        port: OutputPort,
        /// Connected motor.
        motor_type: MotorType,
    },
    /// Reset the tacho counters used by timed and stepped runs.
    OutputReset {
        /// Daisy-chain layer, 0 for the brick itself.
        layer: i32,
        /// Target ports.
        ports: Vec<OutputPort>,
    },
    /// Stop the motors, braking or coasting.
    OutputStop {
        /// Daisy-chain layer, 0 for the brick itself.
        layer: i32,
        /// Target ports.
        ports: Vec<OutputPort>,
        /// Brake at the end instead of coasting.
        brake: bool,
    },
    /// Set power (clamped to -100..=100) without starting the motors.
    OutputSpeed {
        /// Daisy-chain layer, 0 for the brick itself.
        layer: i32,
        /// Target ports.
        ports: Vec<OutputPort>,
        /// Power, clamped to -100..=100.
        power: i32,
    },
    /// Start the motors at the power set with [`Operation::OutputSpeed`].
    OutputStart {
        /// Daisy-chain layer, 0 for the brick itself.
        layer: i32,
        /// Target ports.
        ports: Vec<OutputPort>,
    },
    /// Run for a number of tacho steps with ramp-up and ramp-down phases.
    OutputStepSpeed {
        /// Daisy-chain layer, 0 for the brick itself.
        layer: i32,
        /// Target ports.
        ports: Vec<OutputPort>,
        /// Power, clamped to -100..=100.
        power: i32,
        /// Length of the ramp-up phase.
        ramp_up: i32,
        /// Length of the constant-power phase.
        continue_for: i32,
        /// Length of the ramp-down phase.
        ramp_down: i32,
        /// Brake at the end instead of coasting.
        brake: bool,
    },
    /// Run for a number of milliseconds with ramp-up and ramp-down phases.
    OutputTimeSpeed {
        /// Daisy-chain layer, 0 for the brick itself.
        layer: i32,
        /// Target ports.
        ports: Vec<OutputPort>,
        /// Power, clamped to -100..=100.
        power: i32,
        /// Length of the ramp-up phase.
        ramp_up: i32,
        /// Length of the constant-power phase.
        continue_for: i32,
        /// Length of the ramp-down phase.
        ramp_down: i32,
        /// Brake at the end instead of coasting.
        brake: bool,
    },
    /// Drive two motors in sync; `turn` is clamped to -200..=200.
    OutputStepSync {
        /// Daisy-chain layer, 0 for the brick itself.
        layer: i32,
        /// Target ports.
        ports: Vec<OutputPort>,
        /// Power, clamped to -100..=100.
        power: i32,
        /// Turn ratio, clamped to -200..=200.
        turn: i32,
        /// Tacho steps to run, 0 for forever.
        tacho_count: i32,
        /// Brake at the end instead of coasting.
        brake: bool,
    },
    /// Drive two motors in sync for a number of milliseconds.
    OutputTimeSync {
        /// Daisy-chain layer, 0 for the brick itself.
        layer: i32,
        /// Target ports.
        ports: Vec<OutputPort>,
        /// Power, clamped to -100..=100.
        power: i32,
        /// Turn ratio, clamped to -200..=200.
        turn: i32,
        /// Run time in milliseconds.
        duration_ms: i32,
        /// Brake at the end instead of coasting.
        brake: bool,
    },
    /// Zero the tacho counts reported in telemetry.
    OutputClearCount {
        /// Daisy-chain layer, 0 for the brick itself.
        layer: i32,
        /// Target ports.
        ports: Vec<OutputPort>,
    },
    /// Play or stop a sound.
    Sound {
        /// The sub-command.
        command: SoundCommand,
    },
    /// Draw on the display.
    Draw {
        /// The sub-command.
        command: DrawCommand,
    },
    /// Set the status light or show a file.
    Write {
        /// The sub-command.
        command: WriteCommand,
    },
    /// Reset every input device.
    InputDeviceClearAll,
    /// Clear the change counters of one input device.
    InputDeviceClearChanges {
        /// Daisy-chain layer, 0 for the brick itself.
        layer: i32,
        /// Target port.
        port: InputPort,
    },
}

impl Operation {
    /// Leading opcode byte.
    pub fn opcode(&self) -> u8 {
        match self {
            Self::SetBrickName { .. } => 0xD4,
            Self::OutputSetType { .. } => 0xA1,
            Self::OutputReset { .. } => 0xA2,
            Self::OutputStop { .. } => 0xA3,
            Self::OutputSpeed { .. } => 0xA5,
            Self::OutputStart { .. } => 0xA6,
            Self::OutputStepSpeed { .. } => 0xAE,
            Self::OutputTimeSpeed { .. } => 0xAF,
            Self::OutputStepSync { .. } => 0xB0,
            Self::OutputTimeSync { .. } => 0xB1,
            Self::OutputClearCount { .. } => 0xB2,
            Self::Sound { .. } => 0x94,
            Self::Draw { .. } => 0x84,
            Self::Write { .. } => 0x82,
            Self::InputDeviceClearAll | Self::InputDeviceClearChanges { .. } => 0x99,
        }
    }

    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SetBrickName { .. } => "set_brick_name",
            Self::OutputSetType { .. } => "output_set_type",
            Self::OutputReset { .. } => "output_reset",
            Self::OutputStop { .. } => "output_stop",
            Self::OutputSpeed { .. } => "output_speed",
            Self::OutputStart { .. } => "output_start",
            Self::OutputStepSpeed { .. } => "output_step_speed",
            Self::OutputTimeSpeed { .. } => "output_time_speed",
            Self::OutputStepSync { .. } => "output_step_sync",
            Self::OutputTimeSync { .. } => "output_time_sync",
            Self::OutputClearCount { .. } => "output_clear_count",
            Self::Sound { .. } => "sound",
            Self::Draw { .. } => "draw",
            Self::Write { .. } => "write",
            Self::InputDeviceClearAll => "input_device_clear_all",
            Self::InputDeviceClearChanges { .. } => "input_device_clear_changes",
        }
    }
}

/// Strip a requested brick name down to what the firmware will store.
pub fn sanitize_brick_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .take(BRICK_NAME_MAX_LEN)
        .collect()
}
