//! A simulated brick that executes direct commands the way the firmware
//! does, as far as the link can observe.
//!
//! Reply-bearing commands are executed against a small port table and
//! answered with the reply buffer their global-variable operands describe.
//! Drawing commands are accepted but not interpreted.

use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use brickdrive::broker::parse_frame;
use brickdrive::codec::{decode_operand, DecodedOperand};
use brickdrive::transport::{STATUS_ERROR, STATUS_OK};
use brickdrive::{CommandType, ConnectionType, Port, PortData, PortType, ProtocolError};

/// Everything the simulated brick remembers.
#[derive(Clone, Debug)]
pub struct BrickState {
    pub name: String,
    /// Readings in batch-read order.
    pub ports: Vec<PortData>,
    pub sound_busy: bool,
    pub output_busy: bool,
    /// Last brick light pattern written.
    pub light_pattern: Option<u8>,
    /// Answer this many upcoming reply commands with the error status.
    pub fail_replies: usize,
    /// Swallow this many upcoming reply commands without answering.
    pub drop_replies: usize,
    /// Every frame received, length prefix included.
    pub frames: Vec<Vec<u8>>,
}

impl Default for BrickState {
    fn default() -> Self {
        let device = |index: usize| match index {
            0 => (PortType::Touch.code(), 0.0),
            1 => (PortType::Ultrasonic.code(), 50.0),
            4 | 5 => (PortType::LargeMotor.code(), 0.0),
            _ => (PortType::Missing.code(), 0.0),
        };
        let ports = (0..brickdrive::PORT_COUNT)
            .map(|port_index| {
                let (device_type, value) = device(port_index);
                PortData {
                    port_index,
                    device_type,
                    mode: 0,
                    value,
                }
            })
            .collect();
        Self {
            name: "EV3".to_string(),
            ports,
            sound_busy: false,
            output_busy: false,
            light_pattern: None,
            fail_replies: 0,
            drop_replies: 0,
            frames: Vec::new(),
        }
    }
}

/// Shared handle to a simulated brick.
#[derive(Clone, Debug, Default)]
pub struct SimulatedBrick {
    state: Arc<Mutex<BrickState>>,
}

impl SimulatedBrick {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, BrickState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_value(&self, port: Port, value: f32) {
        self.state().ports[port.batch_read_index()].value = value;
    }

    pub fn set_device(&self, port: Port, device_type: PortType, mode: u8) {
        let mut state = self.state();
        let data = &mut state.ports[port.batch_read_index()];
        data.device_type = device_type.code();
        data.mode = mode;
    }

    pub fn set_sound_busy(&self, busy: bool) {
        self.state().sound_busy = busy;
    }

    pub fn set_output_busy(&self, busy: bool) {
        self.state().output_busy = busy;
    }

    pub fn fail_next_replies(&self, count: usize) {
        self.state().fail_replies = count;
    }

    pub fn drop_next_replies(&self, count: usize) {
        self.state().drop_replies = count;
    }

    pub fn name(&self) -> String {
        self.state().name.clone()
    }

    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.state().frames.clone()
    }

    /// Frames without a reply, i.e. the user's fire-and-forget commands.
    pub fn command_frames(&self) -> Vec<Vec<u8>> {
        self.frames()
            .into_iter()
            .filter(|frame| {
                parse_frame(frame)
                    .is_ok_and(|parsed| parsed.command_type == CommandType::Direct { reply: false })
            })
            .collect()
    }

    /// Execute one complete frame and build the reply frame, if one is due.
    pub fn handle_frame(&self, frame: &[u8]) -> Option<Vec<u8>> {
        let mut state = self.state();
        state.frames.push(frame.to_vec());
        let parsed = match parse_frame(frame) {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::warn!(error = %err, "simulated brick got a bad frame");
                return None;
            }
        };

        let mut buffer = vec![0u8; usize::from(parsed.reply_bytes)];
        let executed = execute(&mut state, parsed.bytecode, &mut buffer);
        if !parsed.command_type.expects_reply() {
            return None;
        }
        if state.drop_replies > 0 {
            state.drop_replies -= 1;
            return None;
        }
        let status = if state.fail_replies > 0 {
            state.fail_replies -= 1;
            STATUS_ERROR
        } else if executed.is_err() {
            STATUS_ERROR
        } else {
            STATUS_OK
        };
        Some(reply_frame(parsed.sequence, status, &buffer))
    }

    /// Answer frames from `reader` on `writer` until the reader ends.
    pub fn serve(&self, mut reader: impl Read, mut writer: impl Write) -> io::Result<()> {
        loop {
            let mut header = [0u8; 2];
            match reader.read_exact(&mut header) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(err) => return Err(err),
            }
            let len = usize::from(u16::from_le_bytes(header));
            let mut frame = vec![0u8; 2 + len];
            frame[..2].copy_from_slice(&header);
            reader.read_exact(&mut frame[2..])?;
            if let Some(reply) = self.handle_frame(&frame) {
                writer.write_all(&reply)?;
                writer.flush()?;
            }
        }
    }
}

/// Build a reply frame: `[len][sequence][status][payload]`.
pub fn reply_frame(sequence: u16, status: u8, payload: &[u8]) -> Vec<u8> {
    let len = u16::try_from(3 + payload.len()).unwrap_or(u16::MAX);
    let mut frame = len.to_le_bytes().to_vec();
    frame.extend_from_slice(&sequence.to_le_bytes());
    frame.push(status);
    frame.extend_from_slice(payload);
    frame
}

struct Cursor<'a> {
    bytes: &'a [u8],
}

impl Cursor<'_> {
    fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn byte(&mut self) -> Result<u8, ProtocolError> {
        let (&head, rest) = self.bytes.split_first().ok_or_else(|| operand_error("truncated"))?;
        self.bytes = rest;
        Ok(head)
    }

    fn operand(&mut self) -> Result<DecodedOperand, ProtocolError> {
        let (operand, used) = decode_operand(self.bytes)?;
        self.bytes = &self.bytes[used..];
        Ok(operand)
    }

    fn int(&mut self) -> Result<i32, ProtocolError> {
        self.operand()?
            .constant()
            .ok_or_else(|| operand_error("expected a constant"))
    }

    fn global(&mut self) -> Result<usize, ProtocolError> {
        match self.operand()? {
            DecodedOperand::GlobalVar(index) => {
                usize::try_from(index).map_err(|_| operand_error("negative global"))
            }
            _ => Err(operand_error("expected a global variable")),
        }
    }

    fn string(&mut self) -> Result<String, ProtocolError> {
        match self.operand()? {
            DecodedOperand::Str(text) => Ok(text),
            _ => Err(operand_error("expected a string")),
        }
    }

    fn skip_ints(&mut self, count: usize) -> Result<(), ProtocolError> {
        for _ in 0..count {
            self.int()?;
        }
        Ok(())
    }
}

fn operand_error(reason: &str) -> ProtocolError {
    ProtocolError::Operand {
        reason: reason.to_string(),
    }
}

fn put(buffer: &mut [u8], offset: usize, bytes: &[u8]) -> Result<(), ProtocolError> {
    let slot = buffer
        .get_mut(offset..offset + bytes.len())
        .ok_or_else(|| operand_error("reply buffer too small"))?;
    slot.copy_from_slice(bytes);
    Ok(())
}

fn port_data(state: &BrickState, input_value: i32) -> Result<&PortData, ProtocolError> {
    u8::try_from(input_value)
        .ok()
        .and_then(Port::from_input_value)
        .map(|port| &state.ports[port.batch_read_index()])
        .ok_or_else(|| operand_error("unknown port"))
}

fn execute(state: &mut BrickState, bytecode: &[u8], buffer: &mut [u8]) -> Result<(), ProtocolError> {
    let mut cursor = Cursor { bytes: bytecode };
    while !cursor.is_empty() {
        let opcode = cursor.byte()?;
        match opcode {
            0xA1 => {
                cursor.int()?;
                cursor.byte()?;
                cursor.byte()?;
            }
            0xA2 | 0xB2 => {
                cursor.int()?;
                cursor.byte()?;
            }
            0xA3 => {
                cursor.int()?;
                cursor.byte()?;
                cursor.byte()?;
                state.output_busy = false;
            }
            0xA5 => {
                cursor.int()?;
                cursor.byte()?;
                cursor.int()?;
            }
            0xA6 => {
                cursor.int()?;
                cursor.byte()?;
                state.output_busy = true;
            }
            0xAE | 0xAF => {
                cursor.int()?;
                cursor.byte()?;
                cursor.skip_ints(4)?;
                cursor.byte()?;
                state.output_busy = true;
            }
            0xB0 | 0xB1 => {
                cursor.int()?;
                cursor.byte()?;
                cursor.skip_ints(3)?;
                cursor.byte()?;
                state.output_busy = true;
            }
            0x94 => sound(state, &mut cursor)?,
            0x95 => {
                let offset = cursor.global()?;
                put(buffer, offset, &[u8::from(state.sound_busy)])?;
            }
            0xA9 => {
                cursor.byte()?;
                cursor.byte()?;
                let offset = cursor.global()?;
                put(buffer, offset, &[u8::from(state.output_busy)])?;
            }
            0x82 => {
                cursor.byte()?;
                state.light_pattern = Some(cursor.byte()?);
            }
            0xD4 => {
                cursor.byte()?;
                state.name = cursor.string()?;
            }
            0xD3 => {
                cursor.byte()?;
                let max_length = usize::try_from(cursor.int()?).unwrap_or(0);
                let offset = cursor.global()?;
                let mut name: Vec<u8> = state.name.bytes().take(max_length).collect();
                name.resize(max_length, 0);
                put(buffer, offset, &name)?;
            }
            0x99 => input_device(state, &mut cursor, buffer)?,
            // drawing is accepted without interpretation
            0x84 => return Ok(()),
            other => return Err(operand_error(&format!("unknown opcode 0x{other:02x}"))),
        }
    }
    Ok(())
}

fn sound(state: &mut BrickState, cursor: &mut Cursor<'_>) -> Result<(), ProtocolError> {
    match cursor.byte()? {
        0x00 => state.sound_busy = false,
        0x01 => {
            cursor.skip_ints(3)?;
            state.sound_busy = true;
        }
        0x02 | 0x03 => {
            cursor.int()?;
            cursor.string()?;
            state.sound_busy = true;
        }
        other => return Err(operand_error(&format!("unknown sound command 0x{other:02x}"))),
    }
    Ok(())
}

fn input_device(
    state: &mut BrickState,
    cursor: &mut Cursor<'_>,
    buffer: &mut [u8],
) -> Result<(), ProtocolError> {
    match cursor.byte()? {
        0x0A => {
            cursor.int()?;
        }
        0x1A => {
            cursor.int()?;
            cursor.byte()?;
        }
        0x05 => {
            cursor.int()?;
            let data = port_data(state, cursor.int()?)?.clone();
            let type_offset = cursor.global()?;
            let mode_offset = cursor.global()?;
            put(buffer, type_offset, &[data.device_type])?;
            put(buffer, mode_offset, &[data.mode])?;
        }
        0x1D => {
            cursor.int()?;
            let value = port_data(state, cursor.int()?)?.value;
            cursor.skip_ints(3)?;
            let offset = cursor.global()?;
            put(buffer, offset, &value.to_le_bytes())?;
        }
        0x0C => {
            cursor.int()?;
            let data = port_data(state, cursor.int()?)?;
            let connection = if data.device_type == PortType::Missing.code() {
                ConnectionType::None
            } else {
                ConnectionType::InputUart
            };
            let offset = cursor.global()?;
            put(buffer, offset, &[connection.code()])?;
        }
        other => return Err(operand_error(&format!("unknown input device command 0x{other:02x}"))),
    }
    Ok(())
}
