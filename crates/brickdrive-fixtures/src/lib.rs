//! Test fixtures for brickdrive integration tests.
//!
//! - [`SimulatedBrick`] - Executes direct commands against a port table and
//!   answers reply commands the way the firmware does
//! - [`SimulatedSession`] - A [`brickdrive::BrickSession`] whose far end is a
//!   simulated brick on an in-memory duplex pipe
//! - [`pipe`] - The in-memory pipe itself
//! - [`spawn_tcp_brick`] - A simulated brick listening on a local TCP port
//!
//! # Example
//!
//! ```ignore
//! use brickdrive::{Link, LinkConfig, NoopObserver};
//! use brickdrive_fixtures::{SimulatedBrick, SimulatedSession};
//!
//! let session = SimulatedSession::new(SimulatedBrick::new());
//! let link = Link::start(Box::new(session), LinkConfig::default(), Box::new(NoopObserver))?;
//! assert_eq!(link.read_brick_name()?, "EV3");
//! ```

// Test fixtures crate - relaxed lints for test utilities
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::indexing_slicing)]
#![allow(missing_docs)]

pub mod brick;
pub mod pipe;
pub mod tcp;

pub use brick::{reply_frame, BrickState, SimulatedBrick};
pub use pipe::{pipe, PipeReader, PipeWriter, SimulatedSession};
pub use tcp::{serve_listener, spawn_tcp_brick};
