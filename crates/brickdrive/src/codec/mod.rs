//! Operand encoding for direct-command bytecode.
//!
//! Operands are self-describing: the first byte says whether a short constant,
//! a long constant of 1/2/4 bytes, a string or a variable reference follows.
//! Constants and global-variable references use separate bit packings and
//! the firmware tells them apart by position, so both are kept bit-exact.
//!
//! - [`Operand`] and [`encode_operands`] produce bytes
//! - [`decode_operand`] parses one operand back

mod operation;
mod reply;

pub use operation::{encode_operation, encode_operations, operation_operands};
pub use reply::{
    decode_replies, decode_reply, encode_reply_operations, reply_operands, total_bytes_to_read,
};

use crate::error::ProtocolError;
use crate::model::{InputPort, OutputPort};

/// Tag that introduces a null-terminated string.
pub const STRING_TAG: u8 = 0x84;

const LONG_ONE_BYTE: u8 = 0x81;
const LONG_TWO_BYTES: u8 = 0x82;
const LONG_FOUR_BYTES: u8 = 0x83;
/// Variable flag (bit 6) plus global flag (bit 5).
const GLOBAL_VAR_MODIFIER: u8 = 0x60;
const GLOBAL_FLAG: u8 = 0x20;

/// One encodable operand.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operand {
    /// A raw byte, written as-is (opcodes, sub-codes, port masks).
    Byte(u8),
    /// A signed constant in the shortest LC0/LC1/LC2/LC4 form.
    Int(i32),
    /// Reference to a global variable (reply buffer offset).
    GlobalVar(i32),
    /// UTF-8 text, tagged and null-terminated.
    Str(String),
    /// A flag as a single 0/1 byte.
    Bool(bool),
    /// One output port as its raw number.
    Output(OutputPort),
    /// Output ports as a bit mask.
    Outputs(Vec<OutputPort>),
    /// One input port as its raw number.
    Input(InputPort),
    /// Input ports as a bit mask.
    Inputs(Vec<InputPort>),
}

impl Operand {
    /// Append this operand's bytes to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Self::Byte(byte) => out.push(*byte),
            Self::Int(value) => encode_int(*value, out),
            Self::GlobalVar(index) => encode_global_var(*index, out),
            Self::Str(text) => {
                out.push(STRING_TAG);
                out.extend_from_slice(text.as_bytes());
                out.push(0x00);
            }
            Self::Bool(flag) => out.push(u8::from(*flag)),
            Self::Output(port) => out.push(port.raw()),
            Self::Outputs(ports) => out.push(OutputPort::mask(ports)),
            Self::Input(port) => out.push(port.raw()),
            Self::Inputs(ports) => out.push(ports.iter().fold(0, |mask, p| mask | p.raw())),
        }
    }

    /// This operand's bytes.
    pub fn encoded(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }
}

/// Concatenate the encodings of several operands.
pub fn encode_operands(operands: &[Operand]) -> Vec<u8> {
    let mut out = Vec::new();
    for operand in operands {
        operand.encode_into(&mut out);
    }
    out
}

fn encode_int(value: i32, out: &mut Vec<u8>) {
    if value > -31 && value < 31 {
        // LC0: sign and magnitude as 6-bit two's complement.
        let [low, ..] = value.to_le_bytes();
        out.push(low & 0x3F);
    } else {
        encode_long(value, 0x00, out);
    }
}

fn encode_global_var(index: i32, out: &mut Vec<u8>) {
    if index > -31 && index < 31 {
        let [low, ..] = index.to_le_bytes();
        let sign = if index < 0 { GLOBAL_FLAG } else { 0x00 };
        out.push((low & 0x1F) | GLOBAL_VAR_MODIFIER | sign);
    } else {
        encode_long(index, GLOBAL_VAR_MODIFIER, out);
    }
}

fn encode_long(value: i32, modifier: u8, out: &mut Vec<u8>) {
    let [b0, b1, b2, b3] = value.to_le_bytes();
    if value > -127 && value < 127 {
        out.extend_from_slice(&[LONG_ONE_BYTE | modifier, b0]);
    } else if value > -32767 && value < 32767 {
        out.extend_from_slice(&[LONG_TWO_BYTES | modifier, b0, b1]);
    } else {
        out.extend_from_slice(&[LONG_FOUR_BYTES | modifier, b0, b1, b2, b3]);
    }
}

/// An operand parsed back from bytecode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecodedOperand {
    /// A constant in any of the LC forms.
    Constant(i32),
    /// A tagged string.
    Str(String),
    /// A global variable reference.
    GlobalVar(i32),
    /// A local variable reference.
    LocalVar(i32),
}

impl DecodedOperand {
    /// The constant value, if this is a constant.
    pub fn constant(&self) -> Option<i32> {
        match self {
            Self::Constant(value) => Some(*value),
            _ => None,
        }
    }
}

/// Parse one operand from the front of `bytes`.
///
/// Returns the operand and how many bytes it occupied. Raw byte operands
/// (opcodes, port masks, flags) below `0x20` read back as short constants.
pub fn decode_operand(bytes: &[u8]) -> Result<(DecodedOperand, usize), ProtocolError> {
    let (&head, rest) = bytes.split_first().ok_or_else(|| ProtocolError::Operand {
        reason: "no bytes left".to_string(),
    })?;

    if head & 0x80 == 0 {
        return Ok((decode_short(head), 1));
    }

    let is_variable = head & 0x40 != 0;
    let is_global = head & GLOBAL_FLAG != 0;
    let width = match head & 0x07 {
        0 | 4 if !is_variable => return decode_string(rest),
        1 => 1,
        2 => 2,
        3 => 4,
        _ => {
            return Err(ProtocolError::Operand {
                reason: format!("unsupported operand header 0x{head:02x}"),
            })
        }
    };
    let body = rest.get(..width).ok_or_else(|| ProtocolError::Operand {
        reason: format!("header 0x{head:02x} needs {width} bytes"),
    })?;
    let value = match *body {
        [b0] => i32::from(i8::from_le_bytes([b0])),
        [b0, b1] => i32::from(i16::from_le_bytes([b0, b1])),
        [b0, b1, b2, b3] => i32::from_le_bytes([b0, b1, b2, b3]),
        _ => {
            return Err(ProtocolError::Operand {
                reason: "bad operand width".to_string(),
            })
        }
    };
    let operand = match (is_variable, is_global) {
        (false, _) => DecodedOperand::Constant(value),
        (true, true) => DecodedOperand::GlobalVar(value),
        (true, false) => DecodedOperand::LocalVar(value),
    };
    Ok((operand, width + 1))
}

fn decode_short(head: u8) -> DecodedOperand {
    let low = i32::from(head & 0x1F);
    if head & 0x40 == 0 {
        let value = if head & 0x20 == 0 { low } else { low - 32 };
        DecodedOperand::Constant(value)
    } else if head & GLOBAL_FLAG != 0 {
        DecodedOperand::GlobalVar(low)
    } else {
        DecodedOperand::LocalVar(low)
    }
}

fn decode_string(rest: &[u8]) -> Result<(DecodedOperand, usize), ProtocolError> {
    let end = rest
        .iter()
        .position(|&b| b == 0x00)
        .ok_or_else(|| ProtocolError::Operand {
            reason: "unterminated string".to_string(),
        })?;
    let text = rest.get(..end).unwrap_or_default();
    let text = String::from_utf8(text.to_vec()).map_err(|err| ProtocolError::Operand {
        reason: format!("string is not utf-8: {err}"),
    })?;
    Ok((DecodedOperand::Str(text), end + 2))
}
