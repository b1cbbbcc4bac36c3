//! Ports, device types and telemetry snapshots.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of ports covered by one batch read (4 inputs followed by 4 outputs).
pub const PORT_COUNT: usize = 8;

/// Sensor connector on the brick.
///
/// The discriminant is the raw value the firmware expects as a port operand.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputPort {
    /// Port 1.
    One = 0x00,
    /// Port 2.
    Two = 0x01,
    /// Port 3.
    Three = 0x02,
    /// Port 4.
    Four = 0x03,
}

impl InputPort {
    /// All input ports in batch-read order.
    pub const ALL: [InputPort; 4] = [Self::One, Self::Two, Self::Three, Self::Four];

    /// Raw operand value.
    pub fn raw(self) -> u8 {
        self as u8
    }

    /// Value used when addressing this port in input-device opcodes.
    pub fn input_value(self) -> u8 {
        self.raw()
    }

    /// Position of this port in a telemetry snapshot.
    pub fn batch_read_index(self) -> usize {
        usize::from(self.raw())
    }
}

/// Motor connector on the brick.
///
/// The discriminant is the bit used in output port bitmasks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputPort {
    /// Port A.
    A = 0x01,
    /// Port B.
    B = 0x02,
    /// Port C.
    C = 0x04,
    /// Port D.
    D = 0x08,
}

impl OutputPort {
    /// All output ports in batch-read order.
    pub const ALL: [OutputPort; 4] = [Self::A, Self::B, Self::C, Self::D];

    /// Raw bitmask value.
    pub fn raw(self) -> u8 {
        self as u8
    }

    /// Value used when addressing this port through input-device opcodes.
    ///
    /// Motors report their tacho readings as input devices 16..=19.
    pub fn input_value(self) -> u8 {
        match self {
            Self::A => 16,
            Self::B => 17,
            Self::C => 18,
            Self::D => 19,
        }
    }

    /// Position of this port in a telemetry snapshot.
    pub fn batch_read_index(self) -> usize {
        match self {
            Self::A => 4,
            Self::B => 5,
            Self::C => 6,
            Self::D => 7,
        }
    }

    /// OR the bitmask values of several output ports together.
    pub fn mask(ports: &[OutputPort]) -> u8 {
        ports.iter().fold(0, |mask, port| mask | port.raw())
    }
}

/// Any port on the brick.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Port {
    /// Sensor port.
    Input(InputPort),
    /// Motor port.
    Output(OutputPort),
}

impl Port {
    /// All ports in batch-read order.
    pub const ALL: [Port; PORT_COUNT] = [
        Port::Input(InputPort::One),
        Port::Input(InputPort::Two),
        Port::Input(InputPort::Three),
        Port::Input(InputPort::Four),
        Port::Output(OutputPort::A),
        Port::Output(OutputPort::B),
        Port::Output(OutputPort::C),
        Port::Output(OutputPort::D),
    ];

    /// Value used when addressing this port through input-device opcodes.
    pub fn input_value(self) -> u8 {
        match self {
            Self::Input(port) => port.input_value(),
            Self::Output(port) => port.input_value(),
        }
    }

    /// Position of this port in a telemetry snapshot.
    pub fn batch_read_index(self) -> usize {
        match self {
            Self::Input(port) => port.batch_read_index(),
            Self::Output(port) => port.batch_read_index(),
        }
    }

    /// Resolve a port from its input-device value (0..=3 or 16..=19).
    pub fn from_input_value(value: u8) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|port| port.input_value() == value)
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input(port) => write!(f, "{}", port.raw() + 1),
            Self::Output(port) => {
                let name = match port {
                    OutputPort::A => "A",
                    OutputPort::B => "B",
                    OutputPort::C => "C",
                    OutputPort::D => "D",
                };
                f.write_str(name)
            }
        }
    }
}

/// Device type codes reported by the firmware.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortType {
    /// Large servo motor.
    LargeMotor = 7,
    /// Medium servo motor.
    MediumMotor = 8,
    /// Touch sensor.
    Touch = 16,
    /// Colour/light sensor.
    Light = 29,
    /// Ultrasonic distance sensor.
    Ultrasonic = 30,
    /// Gyroscope.
    Gyro = 32,
    /// Infrared sensor.
    Infrared = 33,
    /// Nothing connected.
    Missing = 126,
}

impl PortType {
    /// Map a raw firmware type code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            7 => Some(Self::LargeMotor),
            8 => Some(Self::MediumMotor),
            16 => Some(Self::Touch),
            29 => Some(Self::Light),
            30 => Some(Self::Ultrasonic),
            32 => Some(Self::Gyro),
            33 => Some(Self::Infrared),
            126 => Some(Self::Missing),
            _ => None,
        }
    }

    /// Raw firmware type code.
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Type, mode and current value of a single port.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PortData {
    /// Position in the telemetry snapshot (0-3 inputs one..four, 4-7 outputs A..D).
    pub port_index: usize,
    /// Raw device type code.
    pub device_type: u8,
    /// Raw device mode code.
    pub mode: u8,
    /// SI value reported by the device.
    pub value: f32,
}

impl PortData {
    /// Port this reading belongs to.
    pub fn port(&self) -> Option<Port> {
        Port::ALL.get(self.port_index).copied()
    }

    /// Decoded device type, if the code is known.
    pub fn port_type(&self) -> Option<PortType> {
        PortType::from_code(self.device_type)
    }
}

/// One complete telemetry snapshot: exactly one [`PortData`] per port.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<PortData>", into = "Vec<PortData>")]
pub struct Telemetry {
    ports: Vec<PortData>,
}

impl Telemetry {
    /// Build a snapshot, rejecting anything that is not exactly 8 entries.
    pub fn new(ports: Vec<PortData>) -> Option<Self> {
        (ports.len() == PORT_COUNT).then_some(Self { ports })
    }

    /// Reading for a port.
    pub fn get(&self, port: Port) -> Option<&PortData> {
        self.ports.get(port.batch_read_index())
    }

    /// Value for a port.
    pub fn value(&self, port: Port) -> Option<f32> {
        self.get(port).map(|data| data.value)
    }

    /// All readings in batch-read order.
    pub fn ports(&self) -> &[PortData] {
        &self.ports
    }
}

impl TryFrom<Vec<PortData>> for Telemetry {
    type Error = String;

    fn try_from(ports: Vec<PortData>) -> Result<Self, Self::Error> {
        let count = ports.len();
        Self::new(ports).ok_or_else(|| format!("telemetry needs {PORT_COUNT} ports, got {count}"))
    }
}

impl From<Telemetry> for Vec<PortData> {
    fn from(telemetry: Telemetry) -> Self {
        telemetry.ports
    }
}
