//! Notifications emitted by a running link.
//!
//! # Key Types
//!
//! - [`LinkEvent`] - Everything a live view of the brick may want to show
//! - [`LinkObserver`] - Receiver trait, called on the link thread
//! - [`ChannelObserver`] - Forwards events into an `mpsc` channel

use std::sync::mpsc::Sender;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::model::{ReplyOperationReply, SessionId, Telemetry};
use crate::transport::ReplyFailure;

/// Event emitted by the link event loop.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LinkEvent {
    /// The session opened and the bootstrap reads were queued.
    Connected {
        /// Id of the new session.
        session_id: SessionId,
        /// Device path or address that was opened.
        peer: String,
    },
    /// The session closed (disconnect, restart or loss).
    Disconnected {
        /// Id of the session that ended.
        session_id: SessionId,
        /// Why it ended.
        reason: String,
    },
    /// The wait condition of a user command was met.
    ConditionFulfilled {
        /// Sequence of that command.
        sequence: u16,
    },
    /// A fresh telemetry snapshot.
    Telemetry {
        /// The snapshot.
        telemetry: Telemetry,
    },
    /// Decoded replies for a user-initiated read.
    Replies {
        /// Sequence of the read.
        sequence: u16,
        /// One reply per requested operation.
        replies: Vec<ReplyOperationReply>,
    },
    /// The brick reported its name.
    BrickName {
        /// Name as reported.
        name: String,
    },
    /// An expected reply failed.
    ReplyFailed {
        /// Sequence of the failed command.
        sequence: u16,
        /// How it failed.
        failure: ReplyFailure,
    },
}

/// Receives [`LinkEvent`]s.
pub trait LinkObserver: Send {
    /// Called on the link thread; must not block.
    fn on_event(&self, event: &LinkEvent);
}

/// Discards every event.
pub struct NoopObserver;

impl LinkObserver for NoopObserver {
    fn on_event(&self, _event: &LinkEvent) {}
}

/// Forwards events to a channel; a dropped receiver is ignored.
pub struct ChannelObserver {
    sender: Mutex<Sender<LinkEvent>>,
}

impl ChannelObserver {
    /// Observer sending into `sender`.
    pub fn new(sender: Sender<LinkEvent>) -> Self {
        Self {
            sender: Mutex::new(sender),
        }
    }
}

impl LinkObserver for ChannelObserver {
    fn on_event(&self, event: &LinkEvent) {
        if let Ok(sender) = self.sender.lock() {
            let _ = sender.send(event.clone());
        }
    }
}

/// Collects events for tests.
#[cfg(test)]
#[derive(Default)]
pub struct CollectingObserver {
    events: std::sync::Arc<Mutex<Vec<LinkEvent>>>,
}

#[cfg(test)]
impl CollectingObserver {
    pub fn events(&self) -> std::sync::Arc<Mutex<Vec<LinkEvent>>> {
        std::sync::Arc::clone(&self.events)
    }
}

#[cfg(test)]
impl LinkObserver for CollectingObserver {
    #[allow(clippy::expect_used)]
    fn on_event(&self, event: &LinkEvent) {
        self.events
            .lock()
            .expect("observer mutex poisoned")
            .push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn channel_observer_forwards_and_survives_closed_receiver() {
        let (tx, rx) = mpsc::channel();
        let observer = ChannelObserver::new(tx);
        observer.on_event(&LinkEvent::ConditionFulfilled { sequence: 3 });
        assert_eq!(rx.recv().unwrap(), LinkEvent::ConditionFulfilled { sequence: 3 });
        drop(rx);
        observer.on_event(&LinkEvent::BrickName {
            name: "EV3".to_string(),
        });
    }

    #[test]
    fn collecting_observer_keeps_order() {
        let observer = CollectingObserver::default();
        let events = observer.events();
        observer.on_event(&LinkEvent::ConditionFulfilled { sequence: 1 });
        observer.on_event(&LinkEvent::ConditionFulfilled { sequence: 2 });
        assert_eq!(events.lock().unwrap().len(), 2);
    }

    #[test]
    fn events_serialize_with_snake_case_tag() {
        let value = serde_json::to_value(LinkEvent::ReplyFailed {
            sequence: 12,
            failure: ReplyFailure::Timeout,
        })
        .unwrap();
        assert_eq!(value["event"], "reply_failed");
        assert_eq!(value["failure"], "timeout");
    }
}
