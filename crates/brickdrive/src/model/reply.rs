//! Operations that read from the brick, and their decoded answers.

use serde::{Deserialize, Serialize};

use super::port::{OutputPort, Port, Telemetry};

/// An instruction whose answer the firmware writes into the reply buffer.
///
/// Each variant reserves a fixed number of reply bytes (see
/// [`ReplyOperation::bytes_to_read`]).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ReplyOperation {
    /// Read the brick name, at most `max_length` bytes.
    GetBrickName {
        /// Bytes reserved for the name.
        max_length: u8,
    },
    /// Read a port's current value in SI units.
    GetReadySi {
        /// Daisy-chain layer, 0 for the brick itself.
        layer: i32,
        /// Port input value (0..=3 or 16..=19).
        port: u8,
        /// Expected device type, 0 to keep whatever is connected.
        device_type: i32,
        /// Device mode, -1 to keep the current one.
        mode: i32,
    },
    /// Read a port's device type and mode.
    GetTypeMode {
        /// Daisy-chain layer, 0 for the brick itself.
        layer: i32,
        /// Port input value.
        port: u8,
    },
    /// Read how a port is physically connected.
    GetConnection {
        /// Daisy-chain layer, 0 for the brick itself.
        layer: i32,
        /// Port input value.
        port: u8,
    },
    /// Ask whether a sound is playing.
    SoundTest,
    /// Ask whether any of the given motors is running.
    OutputTest {
        /// Motors to check.
        ports: Vec<OutputPort>,
    },
    /// Type, mode and value of all 8 ports in one round trip.
    ReadAllPorts,
}

/// Bytes reserved for a type/mode read.
pub const TYPE_MODE_BYTES: usize = 8;
/// Bytes reserved for a ready-SI read (one `f32`).
pub const READY_SI_BYTES: usize = 4;

impl ReplyOperation {
    /// Number of reply-buffer bytes this operation consumes.
    pub fn bytes_to_read(&self) -> usize {
        match self {
            Self::GetTypeMode { .. } => TYPE_MODE_BYTES,
            Self::GetReadySi { .. } => READY_SI_BYTES,
            Self::SoundTest | Self::OutputTest { .. } | Self::GetConnection { .. } => 1,
            Self::GetBrickName { max_length } => usize::from(*max_length),
            Self::ReadAllPorts => Self::sub_operations_for_batch()
                .iter()
                .map(ReplyOperation::bytes_to_read)
                .sum(),
        }
    }

    /// The reads a [`ReplyOperation::ReadAllPorts`] expands into: per port in
    /// batch-read order, a ready-SI read followed by a type/mode read.
    pub fn sub_operations(&self) -> Vec<ReplyOperation> {
        match self {
            Self::ReadAllPorts => Self::sub_operations_for_batch(),
            _ => Vec::new(),
        }
    }

    fn sub_operations_for_batch() -> Vec<ReplyOperation> {
        Port::ALL
            .iter()
            .flat_map(|port| {
                let port = port.input_value();
                [
                    Self::GetReadySi {
                        layer: 0,
                        port,
                        device_type: 0,
                        mode: -1,
                    },
                    Self::GetTypeMode { layer: 0, port },
                ]
            })
            .collect()
    }

    /// Port input value addressed by per-port reads.
    pub fn port_input_value(&self) -> Option<u8> {
        match self {
            Self::GetTypeMode { port, .. } | Self::GetReadySi { port, .. } => Some(*port),
            _ => None,
        }
    }

    /// Opcode bytes that lead this operation's operands.
    pub fn opcode(&self) -> &'static [u8] {
        match self {
            Self::GetBrickName { .. } => &[0xD3, 0x0D],
            Self::GetReadySi { .. } => &[0x99, 0x1D],
            Self::GetTypeMode { .. } => &[0x99, 0x05],
            Self::GetConnection { .. } => &[0x99, 0x0C],
            Self::SoundTest => &[0x95],
            Self::OutputTest { .. } => &[0xA9],
            Self::ReadAllPorts => &[0x99, 0x1D],
        }
    }

    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::GetBrickName { .. } => "get_brick_name",
            Self::GetReadySi { .. } => "get_ready_si",
            Self::GetTypeMode { .. } => "get_type_mode",
            Self::GetConnection { .. } => "get_connection",
            Self::SoundTest => "sound_test",
            Self::OutputTest { .. } => "output_test",
            Self::ReadAllPorts => "read_all_ports",
        }
    }
}

/// How a port is physically connected, as reported by the firmware.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    /// Not identified yet.
    Unknown = 0x6F,
    /// Another brick, daisy-chained.
    DaisyChain = 0x75,
    /// NXT colour sensor.
    NxtColor = 0x76,
    /// NXT analog sensor.
    NxtDumb = 0x77,
    /// NXT I2C sensor.
    NxtIic = 0x78,
    /// EV3 analog sensor.
    InputDumb = 0x79,
    /// EV3 UART sensor.
    InputUart = 0x7A,
    /// Output device without a tacho.
    OutputDumb = 0x7B,
    /// Output device with its own controller.
    OutputIntelligent = 0x7C,
    /// Motor with a tacho.
    OutputTacho = 0x7D,
    /// Nothing connected.
    None = 0x7E,
    /// Connection fault.
    Error = 0x7F,
}

impl ConnectionType {
    /// Parse the firmware's connection byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0x6F => Self::Unknown,
            0x75 => Self::DaisyChain,
            0x76 => Self::NxtColor,
            0x77 => Self::NxtDumb,
            0x78 => Self::NxtIic,
            0x79 => Self::InputDumb,
            0x7A => Self::InputUart,
            0x7B => Self::OutputDumb,
            0x7C => Self::OutputIntelligent,
            0x7D => Self::OutputTacho,
            0x7E => Self::None,
            0x7F => Self::Error,
            _ => return Option::None,
        })
    }

    /// Firmware connection byte.
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// A decoded answer to one [`ReplyOperation`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ReplyOperationReply {
    /// Answer to [`ReplyOperation::GetTypeMode`].
    PortTypeMode {
        /// Device type code.
        device_type: u8,
        /// Device mode.
        mode: u8,
    },
    /// Answer to [`ReplyOperation::SoundTest`].
    SoundBusy(bool),
    /// Answer to [`ReplyOperation::GetReadySi`].
    PortValue(f32),
    /// Answer to [`ReplyOperation::ReadAllPorts`].
    PortData(Telemetry),
    /// Answer to [`ReplyOperation::OutputTest`].
    OutputPortBusy(bool),
    /// Answer to [`ReplyOperation::GetBrickName`].
    BrickName(String),
    /// Answer to [`ReplyOperation::GetConnection`].
    ConnectionType {
        /// Port input value that was asked about.
        port: u8,
        /// How it is connected.
        connection: ConnectionType,
    },
}

impl ReplyOperationReply {
    /// The busy flag of a sound or output test, if this is one.
    pub fn busy_flag(&self) -> Option<bool> {
        match self {
            Self::SoundBusy(busy) | Self::OutputPortBusy(busy) => Some(*busy),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_read_reserves_ninety_six_bytes() {
        assert_eq!(ReplyOperation::ReadAllPorts.sub_operations().len(), 16);
        assert_eq!(ReplyOperation::ReadAllPorts.bytes_to_read(), 96);
    }

    #[test]
    fn batch_sub_operations_pair_value_then_type_mode() {
        let subs = ReplyOperation::ReadAllPorts.sub_operations();
        assert!(matches!(
            subs.first(),
            Some(ReplyOperation::GetReadySi { port: 0, mode: -1, .. })
        ));
        assert!(matches!(
            subs.get(1),
            Some(ReplyOperation::GetTypeMode { port: 0, .. })
        ));
        assert!(matches!(
            subs.get(15),
            Some(ReplyOperation::GetTypeMode { port: 19, .. })
        ));
    }

    #[test]
    fn connection_type_rejects_unknown_bytes() {
        assert_eq!(ConnectionType::from_byte(0x7D), Some(ConnectionType::OutputTacho));
        assert_eq!(ConnectionType::from_byte(0x70), None);
    }
}
