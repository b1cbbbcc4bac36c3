//! Message framing and reply correlation.
//!
//! [`MessageBroker`] numbers every outgoing message, wraps its bytecode in a
//! direct-command frame and remembers which [`ReplyOperation`]s went out under
//! which sequence number until the matching reply is read back.
//!
//! Frame layout (all multi-byte fields little-endian):
//!
//! ```text
//! [len: u16][sequence: u16][command type: u8][reply bytes: u16][bytecode ...]
//! ```
//!
//! `len` counts everything after itself. The reply-bytes header is always
//! present; it is zero for fire-and-forget messages.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::codec::{encode_operations, encode_reply_operations, total_bytes_to_read, decode_replies};
use crate::error::ProtocolError;
use crate::model::{
    hex, BlockCondition, Command, CommandType, Operation, ReplyOperation, ReplyOperationReply,
};

/// Sequence numbers handed to user commands: `1..USER_SEQUENCE_END`, wrapping
/// through zero.
pub const USER_SEQUENCE_END: u16 = 10;
/// System sequence numbers stay in `SYSTEM_SEQUENCE_FIRST..SYSTEM_SEQUENCE_END`.
pub const SYSTEM_SEQUENCE_FIRST: u16 = 11;
/// Exclusive upper bound of the system sequence range.
pub const SYSTEM_SEQUENCE_END: u16 = 255;

#[derive(Clone, Debug)]
struct PendingReply {
    operations: Vec<ReplyOperation>,
    user_initiated: bool,
}

/// Replies decoded for one sequence number.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedReply {
    /// Sequence the reply carried.
    pub sequence: u16,
    /// Whether the caller asked for it.
    pub user_initiated: bool,
    /// One reply per operation of the command.
    pub replies: Vec<ReplyOperationReply>,
}

/// Numbers, frames and correlates direct commands.
#[derive(Debug)]
pub struct MessageBroker {
    user_sequence: u16,
    system_sequence: u16,
    pending: HashMap<u16, PendingReply>,
}

impl Default for MessageBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBroker {
    /// Broker with nothing pending and both sequence ranges at their start.
    pub fn new() -> Self {
        Self {
            user_sequence: 0,
            system_sequence: SYSTEM_SEQUENCE_FIRST - 1,
            pending: HashMap::new(),
        }
    }

    fn next_sequence(&mut self, user_initiated: bool) -> u16 {
        if user_initiated {
            self.user_sequence = (self.user_sequence + 1) % USER_SEQUENCE_END;
            self.user_sequence
        } else {
            self.system_sequence =
                ((self.system_sequence + 1) % SYSTEM_SEQUENCE_END).max(SYSTEM_SEQUENCE_FIRST);
            self.system_sequence
        }
    }

    /// Frame fire-and-forget operations as a user command carrying
    /// `condition`.
    ///
    /// The brick never answers these frames, so a [`BlockCondition::Reply`]
    /// is carried as an immediate time condition instead.
    pub fn command(
        &mut self,
        operations: &[Operation],
        condition: BlockCondition,
    ) -> Result<Command, ProtocolError> {
        let condition = match condition {
            BlockCondition::Reply => {
                debug!("fire-and-forget command cannot wait for a reply, releasing on dispatch");
                BlockCondition::Time { milliseconds: 0 }
            }
            other => other,
        };
        let sequence = self.next_sequence(true);
        let bytecode = encode_operations(operations);
        let bytes = frame(sequence, CommandType::Direct { reply: false }, 0, &bytecode)?;
        debug!(
            sequence,
            condition = condition.name(),
            operations = operations.len(),
            frame = %hex(&bytes),
            "framed command"
        );
        Ok(Command {
            bytes,
            sequence,
            condition,
            requires_reply: false,
            user_initiated: true,
            is_empty: operations.is_empty(),
        })
    }

    /// Frame reply operations and remember them until their reply is read.
    ///
    /// Fails with [`ProtocolError::SequenceCollision`] when the range wrapped
    /// onto a sequence number whose reply was never consumed.
    pub fn reply_command(
        &mut self,
        operations: &[ReplyOperation],
        user_initiated: bool,
    ) -> Result<Command, ProtocolError> {
        let sequence = self.next_sequence(user_initiated);
        if self.pending.contains_key(&sequence) {
            warn!(sequence, "sequence wrapped onto an unconsumed reply");
            return Err(ProtocolError::SequenceCollision { sequence });
        }

        let bytecode = encode_reply_operations(operations)?;
        let reply_bytes = total_bytes_to_read(operations);
        let reply_bytes =
            u16::try_from(reply_bytes).map_err(|_| ProtocolError::Oversized { len: reply_bytes })?;
        let bytes = frame(
            sequence,
            CommandType::Direct { reply: true },
            reply_bytes,
            &bytecode,
        )?;

        // An empty batch is never written, so no reply will consume it.
        if !operations.is_empty() {
            self.pending.insert(
                sequence,
                PendingReply {
                    operations: operations.to_vec(),
                    user_initiated,
                },
            );
        }
        debug!(
            sequence,
            user_initiated,
            reply_bytes,
            frame = %hex(&bytes),
            "framed reply command"
        );
        Ok(Command {
            bytes,
            sequence,
            condition: BlockCondition::Reply,
            requires_reply: true,
            user_initiated,
            is_empty: operations.is_empty(),
        })
    }

    /// Decode the reply payload for `sequence`, consuming its pending entry.
    ///
    /// Returns `Ok(None)` when nothing is pending under that number (late,
    /// duplicate or unmatched frame). A payload that does not decode still
    /// consumes the entry.
    pub fn read_reply(
        &mut self,
        sequence: u16,
        payload: &[u8],
    ) -> Result<Option<DecodedReply>, ProtocolError> {
        let Some(pending) = self.pending.remove(&sequence) else {
            debug!(sequence, "no pending message for reply");
            return Ok(None);
        };
        let replies = decode_replies(&pending.operations, payload)?;
        Ok(Some(DecodedReply {
            sequence,
            user_initiated: pending.user_initiated,
            replies,
        }))
    }

    /// Whether a still-pending reply for `sequence` was asked for by the user.
    pub fn is_user_initiated(&self, sequence: u16) -> bool {
        self.pending
            .get(&sequence)
            .is_some_and(|pending| pending.user_initiated)
    }

    /// Operations still awaiting a reply under `sequence`.
    pub fn pending_operations(&self, sequence: u16) -> Option<&[ReplyOperation]> {
        self.pending
            .get(&sequence)
            .map(|pending| pending.operations.as_slice())
    }

    /// Drop a pending entry without decoding it.
    pub fn discard(&mut self, sequence: u16) -> bool {
        self.pending.remove(&sequence).is_some()
    }

    /// Drop every pending entry.
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Number of reply commands still awaiting their reply.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// Wrap bytecode in a direct-command frame.
pub fn frame(
    sequence: u16,
    command_type: CommandType,
    reply_bytes: u16,
    bytecode: &[u8],
) -> Result<Vec<u8>, ProtocolError> {
    let body_len = 2 + 1 + 2 + bytecode.len();
    let len = u16::try_from(body_len).map_err(|_| ProtocolError::Oversized { len: body_len })?;
    let mut bytes = Vec::with_capacity(2 + body_len);
    bytes.extend_from_slice(&len.to_le_bytes());
    bytes.extend_from_slice(&sequence.to_le_bytes());
    bytes.push(command_type.byte());
    bytes.extend_from_slice(&reply_bytes.to_le_bytes());
    bytes.extend_from_slice(bytecode);
    Ok(bytes)
}

/// A parsed outgoing frame, as seen by whoever receives it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedFrame<'a> {
    /// Sequence number.
    pub sequence: u16,
    /// Message class.
    pub command_type: CommandType,
    /// Reply bytes reserved in the header.
    pub reply_bytes: u16,
    /// Everything after the header.
    pub bytecode: &'a [u8],
}

/// Split a complete direct-command frame (including its length prefix).
pub fn parse_frame(bytes: &[u8]) -> Result<ParsedFrame<'_>, ProtocolError> {
    let malformed = |reason: &str| ProtocolError::MalformedFrame {
        reason: reason.to_string(),
    };
    let [l0, l1, s0, s1, kind, r0, r1, bytecode @ ..] = bytes else {
        return Err(malformed("frame shorter than its header"));
    };
    let len = usize::from(u16::from_le_bytes([*l0, *l1]));
    if len != bytes.len() - 2 {
        return Err(malformed("length prefix does not match frame size"));
    }
    let command_type =
        CommandType::from_byte(*kind).ok_or_else(|| malformed("unknown command type"))?;
    Ok(ParsedFrame {
        sequence: u16::from_le_bytes([*s0, *s1]),
        command_type,
        reply_bytes: u16::from_le_bytes([*r0, *r1]),
        bytecode,
    })
}
