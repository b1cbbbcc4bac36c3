use super::{encode_operands, Operand};
use crate::error::ProtocolError;
use crate::model::{
    ConnectionType, OutputPort, Port, PortData, ReplyOperation, ReplyOperationReply, Telemetry,
};

/// Operands for one reply operation whose answer lands at `offset` in the
/// reply buffer. A batch read lays out its sub-reads back to back from there.
pub fn reply_operands(
    operation: &ReplyOperation,
    offset: u16,
) -> Result<Vec<Operand>, ProtocolError> {
    let gv = |index: u16| Operand::GlobalVar(i32::from(index));
    let operands = match operation {
        ReplyOperation::GetTypeMode { layer, port } => vec![
            Operand::Byte(0x99),
            Operand::Byte(0x05),
            Operand::Int(*layer),
            Operand::Int(i32::from(*port)),
            gv(offset),
            gv(offset.saturating_add(1)),
        ],
        ReplyOperation::GetReadySi {
            layer,
            port,
            device_type,
            mode,
        } => vec![
            Operand::Byte(0x99),
            Operand::Byte(0x1D),
            Operand::Int(*layer),
            Operand::Int(i32::from(*port)),
            Operand::Int(*device_type),
            Operand::Int(*mode),
            Operand::Int(1),
            gv(offset),
        ],
        ReplyOperation::GetConnection { layer, port } => vec![
            Operand::Byte(0x99),
            Operand::Byte(0x0C),
            Operand::Int(*layer),
            Operand::Int(i32::from(*port)),
            gv(offset),
        ],
        ReplyOperation::OutputTest { ports } => vec![
            Operand::Byte(0xA9),
            Operand::Byte(0x00),
            Operand::Byte(OutputPort::mask(ports)),
            gv(offset),
        ],
        ReplyOperation::SoundTest => vec![Operand::Byte(0x95), gv(offset)],
        ReplyOperation::GetBrickName { max_length } => vec![
            Operand::Byte(0xD3),
            Operand::Byte(0x0D),
            Operand::Int(i32::from(*max_length)),
            gv(offset),
        ],
        ReplyOperation::ReadAllPorts => {
            let mut operands = Vec::new();
            let mut index = usize::from(offset);
            for sub in operation.sub_operations() {
                operands.extend(reply_operands(&sub, offset_u16(index)?)?);
                index += sub.bytes_to_read();
            }
            operands
        }
    };
    Ok(operands)
}

fn offset_u16(offset: usize) -> Result<u16, ProtocolError> {
    u16::try_from(offset).map_err(|_| ProtocolError::Oversized { len: offset })
}

/// Total reply-buffer bytes needed by a list of reply operations.
pub fn total_bytes_to_read(operations: &[ReplyOperation]) -> usize {
    operations.iter().map(ReplyOperation::bytes_to_read).sum()
}

/// Bytecode for several reply operations sharing one reply buffer, each at
/// the running offset left by the ones before it.
pub fn encode_reply_operations(operations: &[ReplyOperation]) -> Result<Vec<u8>, ProtocolError> {
    let mut out = Vec::new();
    let mut offset = 0usize;
    for operation in operations {
        out.extend(encode_operands(&reply_operands(
            operation,
            offset_u16(offset)?,
        )?));
        offset += operation.bytes_to_read();
    }
    offset_u16(offset)?;
    Ok(out)
}

/// Decode the answer to one reply operation from the front of `payload`.
pub fn decode_reply(
    operation: &ReplyOperation,
    payload: &[u8],
) -> Result<ReplyOperationReply, ProtocolError> {
    let expected = operation.bytes_to_read();
    let bytes = payload
        .get(..expected)
        .ok_or_else(|| ProtocolError::ShortPayload {
            operation: operation.name(),
            expected,
            actual: payload.len(),
        })?;

    let reply = match (operation, bytes) {
        (ReplyOperation::OutputTest { .. }, [flag, ..]) => {
            ReplyOperationReply::OutputPortBusy(*flag == 0x01)
        }
        (ReplyOperation::SoundTest, [flag, ..]) => ReplyOperationReply::SoundBusy(*flag == 0x01),
        (ReplyOperation::GetTypeMode { .. }, [device_type, mode, ..]) => {
            ReplyOperationReply::PortTypeMode {
                device_type: *device_type,
                mode: *mode,
            }
        }
        (ReplyOperation::GetReadySi { .. }, [b0, b1, b2, b3, ..]) => {
            let value = f32::from_le_bytes([*b0, *b1, *b2, *b3]);
            ReplyOperationReply::PortValue(if value.is_finite() { value } else { 0.0 })
        }
        (ReplyOperation::GetBrickName { .. }, name) => {
            let end = name.iter().position(|&b| b == 0x00).unwrap_or(name.len());
            let name = name.get(..end).unwrap_or_default();
            ReplyOperationReply::BrickName(String::from_utf8(name.to_vec()).unwrap_or_default())
        }
        (ReplyOperation::GetConnection { port, .. }, [byte, ..]) => {
            let connection = ConnectionType::from_byte(*byte).ok_or(
                ProtocolError::UnknownConnectionType {
                    port: *port,
                    byte: *byte,
                },
            )?;
            ReplyOperationReply::ConnectionType {
                port: *port,
                connection,
            }
        }
        (ReplyOperation::ReadAllPorts, bytes) => {
            ReplyOperationReply::PortData(decode_batch(&operation.sub_operations(), bytes)?)
        }
        (operation, _) => {
            return Err(ProtocolError::ShortPayload {
                operation: operation.name(),
                expected,
                actual: payload.len(),
            })
        }
    };
    Ok(reply)
}

/// Walk the 16 sub-replies of a batch read; each value reply is paired with
/// the type/mode reply that follows it.
fn decode_batch(subs: &[ReplyOperation], mut bytes: &[u8]) -> Result<Telemetry, ProtocolError> {
    let mut ports = Vec::with_capacity(subs.len() / 2);
    let mut last_value: Option<f32> = None;

    for sub in subs {
        let reply = decode_reply(sub, bytes)?;
        if let Some(input_value) = sub.port_input_value() {
            match reply {
                ReplyOperationReply::PortValue(value) => last_value = Some(value),
                ReplyOperationReply::PortTypeMode { device_type, mode } => {
                    if let Some(value) = last_value {
                        let port = Port::from_input_value(input_value).ok_or_else(|| {
                            ProtocolError::MalformedFrame {
                                reason: format!("batch read addressed unknown port {input_value}"),
                            }
                        })?;
                        ports.push(PortData {
                            port_index: port.batch_read_index(),
                            device_type,
                            mode,
                            value,
                        });
                    }
                }
                _ => {}
            }
        }
        bytes = bytes.get(sub.bytes_to_read()..).unwrap_or_default();
    }

    let count = ports.len();
    Telemetry::new(ports).ok_or_else(|| ProtocolError::MalformedFrame {
        reason: format!("batch read produced {count} ports"),
    })
}

/// Decode every reply in a message, consuming each operation's declared
/// byte count in order.
pub fn decode_replies(
    operations: &[ReplyOperation],
    payload: &[u8],
) -> Result<Vec<ReplyOperationReply>, ProtocolError> {
    let mut rest = payload;
    let mut replies = Vec::with_capacity(operations.len());
    for operation in operations {
        replies.push(decode_reply(operation, rest)?);
        rest = rest.get(operation.bytes_to_read()..).unwrap_or_default();
    }
    Ok(replies)
}
