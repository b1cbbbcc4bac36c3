//! Brickdrive: a direct-command protocol engine for EV3 bricks.
//!
//! The crate encodes robot operations into the brick's bytecode, frames and
//! numbers them, serializes them onto one duplex byte stream, correlates the
//! replies and turns sensor telemetry into "proceed now" signals for the
//! caller's wait conditions.
//!
//! Layers, leaves first: [`codec`] (operand and opcode encoding, reply
//! decoding), [`broker`] (framing and reply correlation), [`transport`]
//! (the single-owner stream state machine), [`scheduler`] (condition
//! evaluation) and [`link`] (the event loop that owns all of them).

#![forbid(unsafe_code)]

pub mod broker;
pub mod codec;
pub mod config;
pub mod error;
pub mod link;
pub mod model;
pub mod scheduler;
pub mod transport;

pub use crate::config::{load_config, validate_config, LinkConfig, CONFIG_VERSION};
pub use crate::error::{ErrorCode, ErrorInfo, LinkError, LinkResult, ProtocolError};
pub use crate::link::{
    BrickSession, ChannelObserver, Fulfillment, Link, LinkEvent, LinkHandle, LinkObserver,
    NoopObserver, SerialDeviceSession, SessionStreams, TcpSession, Ticket,
};
pub use crate::model::*;
