//! Single-owner transport state machine for one brick link.
//!
//! [`LinkTransport`] owns the write half of the session, serializes queued
//! [`Command`]s onto it one at a time and reassembles inbound reply frames. It
//! never spawns threads or blocks on reads: the link event loop feeds it
//! inbound bytes, write-space notifications and clock ticks, then drains the
//! [`TransportEvent`]s it produced.
//!
//! A command "holds" the link until:
//! - its reply arrives, fails or times out (reply commands), or
//! - the pacing interval after dispatch elapses (fire-and-forget user commands).
//!
//! A write that stops short keeps its offset; the rest of the frame goes out
//! once the stream has space again, never the whole frame twice.
//!
//! Reply frame layout: `[len: u16][sequence: u16][status: u8][payload ...]`.

use std::collections::VecDeque;
use std::io::{self, Write};
use std::mem;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::model::{BlockCondition, Command};

/// Reply status byte: the firmware executed the command.
pub const STATUS_OK: u8 = 0x02;
/// Reply status byte: the firmware rejected the command.
pub const STATUS_ERROR: u8 = 0x04;

/// Why an expected reply did not produce a payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyFailure {
    /// Status byte `0x04`.
    Firmware,
    /// Unknown status byte.
    Malformed,
    /// No reply within the reply timeout.
    Timeout,
}

/// Something the link loop has to act on.
#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    /// A successful reply frame for the in-flight command.
    Reply {
        /// Sequence the frame carried.
        sequence: u16,
        /// Bytes after the status byte.
        payload: Vec<u8>,
    },
    /// The in-flight command failed.
    ReplyFailed {
        /// Sequence of the failed command.
        sequence: u16,
        /// How it failed.
        failure: ReplyFailure,
    },
    /// A user command was dispatched; its condition starts now.
    ProceedAfter {
        /// Sequence of the dispatched command.
        sequence: u16,
        /// Condition it carries.
        condition: BlockCondition,
    },
    /// Writing failed for a reason other than a full buffer.
    SessionLost {
        /// The write error.
        reason: String,
    },
}

/// Timing knobs for [`LinkTransport`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransportTiming {
    /// How long a fire-and-forget user command holds the link.
    pub command_pacing: Duration,
    /// How long to wait for an expected reply.
    pub reply_timeout: Duration,
}

impl Default for TransportTiming {
    fn default() -> Self {
        Self {
            command_pacing: Duration::from_millis(20),
            reply_timeout: Duration::from_millis(2000),
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct InFlight {
    sequence: u16,
    sent_at: Instant,
}

/// Serializes commands onto one duplex byte stream.
pub struct LinkTransport {
    timing: TransportTiming,
    writer: Option<Box<dyn Write + Send>>,
    should_run: bool,
    queue: VecDeque<Command>,
    /// Command whose frame was only partly written, and how far it got.
    partial: Option<(Command, usize)>,
    executing: bool,
    waiting_for_write_space: bool,
    in_flight: Option<InFlight>,
    pacing_until: Option<Instant>,
    inbound: Vec<u8>,
    events: Vec<TransportEvent>,
}

impl std::fmt::Debug for LinkTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkTransport")
            .field("should_run", &self.should_run)
            .field("queued", &self.queue_len())
            .field("executing", &self.executing)
            .field("waiting_for_write_space", &self.waiting_for_write_space)
            .field("in_flight", &self.in_flight.map(|f| f.sequence))
            .finish_non_exhaustive()
    }
}

impl LinkTransport {
    /// Stopped transport; [`LinkTransport::attach_streams`] starts it.
    pub fn new(timing: TransportTiming) -> Self {
        Self {
            timing,
            writer: None,
            should_run: false,
            queue: VecDeque::new(),
            partial: None,
            executing: false,
            waiting_for_write_space: false,
            in_flight: None,
            pacing_until: None,
            inbound: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Take ownership of a freshly opened write stream and start running.
    pub fn attach_streams(&mut self, writer: Box<dyn Write + Send>) {
        self.reset();
        self.writer = Some(writer);
        self.should_run = true;
        info!("transport attached");
    }

    /// Whether commands are accepted and written.
    pub fn is_running(&self) -> bool {
        self.should_run && self.writer.is_some()
    }

    /// Commands not yet fully written, including a partly written one.
    pub fn queue_len(&self) -> usize {
        self.queue.len() + usize::from(self.partial.is_some())
    }

    /// Whether the link is held by a command (reply or pacing).
    pub fn is_executing(&self) -> bool {
        self.executing
    }

    /// Whether the last write hit a full buffer.
    pub fn is_waiting_for_write_space(&self) -> bool {
        self.waiting_for_write_space
    }

    /// Sequence of the reply currently expected, if any.
    pub fn expected_reply(&self) -> Option<u16> {
        self.in_flight.map(|flight| flight.sequence)
    }

    /// Queue a command and try to send it. A stopped transport drops it.
    pub fn enqueue(&mut self, command: Command, now: Instant) {
        if !self.is_running() {
            debug!(sequence = command.sequence, "transport not running, dropping command");
            return;
        }
        self.queue.push_back(command);
        self.send_next(now);
    }

    /// The write stream can take more bytes again.
    pub fn on_write_space(&mut self, now: Instant) {
        if self.waiting_for_write_space {
            self.waiting_for_write_space = false;
            self.send_next(now);
        }
    }

    fn send_next(&mut self, now: Instant) {
        while self.is_running() && !self.waiting_for_write_space && !self.executing {
            let (command, offset) = match self.partial.take() {
                Some(partial) => partial,
                None => match self.queue.pop_front() {
                    Some(command) => (command, 0),
                    None => return,
                },
            };
            if command.is_empty {
                self.dispatched(command, now);
                continue;
            }

            let mut written = offset;
            match self.write_from(&command.bytes, &mut written) {
                Ok(()) => {
                    debug!(
                        sequence = command.sequence,
                        bytes = command.bytes.len(),
                        requires_reply = command.requires_reply,
                        "wrote command"
                    );
                    self.dispatched(command, now);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    debug!(
                        sequence = command.sequence,
                        written,
                        "write would block, waiting for space"
                    );
                    self.partial = Some((command, written));
                    self.waiting_for_write_space = true;
                    return;
                }
                Err(err) => {
                    warn!(sequence = command.sequence, error = %err, "write failed, stopping transport");
                    self.partial = Some((command, written));
                    self.should_run = false;
                    self.events.push(TransportEvent::SessionLost {
                        reason: err.to_string(),
                    });
                    return;
                }
            }
        }
    }

    /// Write `bytes[*written..]`, advancing `written` as the stream accepts
    /// bytes, then flush.
    fn write_from(&mut self, bytes: &[u8], written: &mut usize) -> io::Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;
        while let Some(rest) = bytes.get(*written..).filter(|rest| !rest.is_empty()) {
            match writer.write(rest) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(count) => *written += count,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err),
            }
        }
        writer.flush()
    }

    fn dispatched(&mut self, command: Command, now: Instant) {
        self.executing = true;
        let Command {
            sequence,
            condition,
            requires_reply,
            user_initiated,
            is_empty,
            ..
        } = command;

        if requires_reply && !is_empty {
            self.in_flight = Some(InFlight {
                sequence,
                sent_at: now,
            });
        }
        if user_initiated {
            self.events
                .push(TransportEvent::ProceedAfter { sequence, condition });
        }

        if self.in_flight.is_none() {
            if user_initiated {
                self.pacing_until = Some(now + self.timing.command_pacing);
            } else {
                self.executing = false;
            }
        }
    }

    /// Feed bytes read from the session.
    pub fn on_inbound(&mut self, bytes: &[u8], now: Instant) {
        self.inbound.extend_from_slice(bytes);
        while let Some(frame) = self.take_frame() {
            self.handle_frame(&frame);
        }
        self.send_next(now);
    }

    fn take_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            let &[l0, l1, ..] = self.inbound.as_slice() else {
                return None;
            };
            let len = usize::from(u16::from_le_bytes([l0, l1]));
            if len == 0 {
                warn!("zero-length reply frame, skipping header");
                self.inbound.drain(..2);
                continue;
            }
            if self.inbound.len() < 2 + len {
                return None;
            }
            let frame: Vec<u8> = self.inbound.drain(..2 + len).skip(2).collect();
            return Some(frame);
        }
    }

    fn handle_frame(&mut self, frame: &[u8]) {
        let [s0, s1, status, payload @ ..] = frame else {
            warn!(len = frame.len(), "reply frame too short, discarding");
            return;
        };
        let sequence = u16::from_le_bytes([*s0, *s1]);

        let Some(flight) = self.in_flight else {
            warn!(sequence, "reply while no reply is expected, discarding");
            return;
        };
        if flight.sequence != sequence {
            warn!(
                sequence,
                expected = flight.sequence,
                "unexpected reply sequence, discarding"
            );
            return;
        }

        self.in_flight = None;
        self.executing = false;
        match *status {
            STATUS_OK => {
                debug!(sequence, payload = payload.len(), "reply received");
                self.events.push(TransportEvent::Reply {
                    sequence,
                    payload: payload.to_vec(),
                });
            }
            STATUS_ERROR => {
                warn!(sequence, "brick reported an error");
                self.events.push(TransportEvent::ReplyFailed {
                    sequence,
                    failure: ReplyFailure::Firmware,
                });
            }
            other => {
                warn!(sequence, status = other, "malformed reply status");
                self.events.push(TransportEvent::ReplyFailed {
                    sequence,
                    failure: ReplyFailure::Malformed,
                });
            }
        }
    }

    /// Release pacing holds and expire overdue replies.
    pub fn poll(&mut self, now: Instant) {
        if self.pacing_until.is_some_and(|until| until <= now) {
            self.pacing_until = None;
            self.executing = false;
        }
        if let Some(flight) = self.in_flight {
            if now.duration_since(flight.sent_at) >= self.timing.reply_timeout {
                warn!(
                    sequence = flight.sequence,
                    buffered = self.inbound.len(),
                    "reply timed out, dropping buffered bytes"
                );
                self.in_flight = None;
                self.inbound.clear();
                self.executing = false;
                self.events.push(TransportEvent::ReplyFailed {
                    sequence: flight.sequence,
                    failure: ReplyFailure::Timeout,
                });
            }
        }
        self.send_next(now);
    }

    /// Earliest instant at which [`LinkTransport::poll`] has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        let reply_deadline = self
            .in_flight
            .map(|flight| flight.sent_at + self.timing.reply_timeout);
        match (self.pacing_until, reply_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Stop, close the write stream and drop everything queued. Returns the
    /// number of commands that were never sent.
    pub fn kill_session(&mut self) -> usize {
        let dropped = self.queue_len();
        if self.should_run || self.writer.is_some() {
            info!(dropped, "killing transport session");
        }
        self.reset();
        dropped
    }

    fn reset(&mut self) {
        self.should_run = false;
        self.writer = None;
        self.queue.clear();
        self.partial = None;
        self.executing = false;
        self.waiting_for_write_space = false;
        self.in_flight = None;
        self.pacing_until = None;
        self.inbound.clear();
    }

    /// Drain the events produced since the last call.
    pub fn take_events(&mut self) -> Vec<TransportEvent> {
        mem::take(&mut self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedWriter {
        written: Arc<Mutex<Vec<Vec<u8>>>>,
        block: Arc<Mutex<bool>>,
    }

    impl Write for SharedWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if *self.block.lock().unwrap() {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            self.written.lock().unwrap().push(buf.to_vec());
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn command(sequence: u16, requires_reply: bool, user_initiated: bool) -> Command {
        Command {
            bytes: vec![0x05, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00],
            sequence,
            condition: BlockCondition::Time { milliseconds: 0 },
            requires_reply,
            user_initiated,
            is_empty: false,
        }
    }

    fn reply_frame(sequence: u16, status: u8, payload: &[u8]) -> Vec<u8> {
        let len = u16::try_from(3 + payload.len()).unwrap();
        let mut frame = len.to_le_bytes().to_vec();
        frame.extend_from_slice(&sequence.to_le_bytes());
        frame.push(status);
        frame.extend_from_slice(payload);
        frame
    }

    fn attached() -> (LinkTransport, SharedWriter) {
        let writer = SharedWriter::default();
        let mut transport = LinkTransport::new(TransportTiming::default());
        transport.attach_streams(Box::new(writer.clone()));
        (transport, writer)
    }

    #[test]
    fn reply_commands_hold_the_link_until_reply() {
        let (mut transport, writer) = attached();
        let now = Instant::now();
        transport.enqueue(command(11, true, false), now);
        transport.enqueue(command(12, true, false), now);
        assert_eq!(writer.written.lock().unwrap().len(), 1);
        assert_eq!(transport.expected_reply(), Some(11));

        transport.on_inbound(&reply_frame(11, STATUS_OK, &[0xAA]), now);
        assert_eq!(
            transport.take_events(),
            vec![TransportEvent::Reply {
                sequence: 11,
                payload: vec![0xAA]
            }]
        );
        assert_eq!(writer.written.lock().unwrap().len(), 2);
        assert_eq!(transport.expected_reply(), Some(12));
    }

    #[test]
    fn partial_frames_wait_for_the_rest() {
        let (mut transport, _writer) = attached();
        let now = Instant::now();
        transport.enqueue(command(11, true, false), now);
        let frame = reply_frame(11, STATUS_OK, &[1, 2, 3]);
        let (head, tail) = frame.split_at(4);
        transport.on_inbound(head, now);
        assert!(transport.take_events().is_empty());
        transport.on_inbound(tail, now);
        assert_eq!(transport.take_events().len(), 1);
    }

    #[test]
    fn mismatched_sequence_is_discarded() {
        let (mut transport, _writer) = attached();
        let now = Instant::now();
        transport.enqueue(command(11, true, false), now);
        transport.on_inbound(&reply_frame(40, STATUS_OK, &[]), now);
        assert!(transport.take_events().is_empty());
        assert_eq!(transport.expected_reply(), Some(11));
    }

    #[test]
    fn firmware_error_reports_failure_and_moves_on() {
        let (mut transport, writer) = attached();
        let now = Instant::now();
        transport.enqueue(command(11, true, false), now);
        transport.enqueue(command(12, true, false), now);
        transport.on_inbound(&reply_frame(11, STATUS_ERROR, &[]), now);
        assert_eq!(
            transport.take_events(),
            vec![TransportEvent::ReplyFailed {
                sequence: 11,
                failure: ReplyFailure::Firmware
            }]
        );
        assert_eq!(writer.written.lock().unwrap().len(), 2);
    }

    #[test]
    fn user_commands_hand_over_condition_then_pace() {
        let (mut transport, writer) = attached();
        let now = Instant::now();
        transport.enqueue(command(1, false, true), now);
        transport.enqueue(command(2, false, true), now);
        let events = transport.take_events();
        assert!(matches!(
            events.as_slice(),
            [TransportEvent::ProceedAfter { sequence: 1, .. }]
        ));
        assert_eq!(writer.written.lock().unwrap().len(), 1);

        transport.poll(now + Duration::from_millis(5));
        assert_eq!(writer.written.lock().unwrap().len(), 1);
        transport.poll(now + Duration::from_millis(20));
        assert_eq!(writer.written.lock().unwrap().len(), 2);
    }

    #[test]
    fn empty_commands_skip_the_write_but_keep_the_condition() {
        let (mut transport, writer) = attached();
        let mut empty = command(3, false, true);
        empty.is_empty = true;
        transport.enqueue(empty, Instant::now());
        assert!(writer.written.lock().unwrap().is_empty());
        assert!(matches!(
            transport.take_events().as_slice(),
            [TransportEvent::ProceedAfter { sequence: 3, .. }]
        ));
    }

    #[test]
    fn would_block_requeues_at_front() {
        let (mut transport, writer) = attached();
        *writer.block.lock().unwrap() = true;
        let now = Instant::now();
        transport.enqueue(command(11, true, false), now);
        assert!(transport.is_waiting_for_write_space());
        assert_eq!(transport.queue_len(), 1);

        *writer.block.lock().unwrap() = false;
        transport.on_write_space(now);
        assert_eq!(writer.written.lock().unwrap().len(), 1);
        assert_eq!(transport.queue_len(), 0);
    }

    #[test]
    fn overdue_reply_times_out() {
        let (mut transport, _writer) = attached();
        let now = Instant::now();
        transport.enqueue(command(11, true, false), now);
        assert_eq!(
            transport.next_deadline(),
            Some(now + Duration::from_millis(2000))
        );
        transport.poll(now + Duration::from_millis(2000));
        assert_eq!(
            transport.take_events(),
            vec![TransportEvent::ReplyFailed {
                sequence: 11,
                failure: ReplyFailure::Timeout
            }]
        );
        assert!(!transport.is_executing());
    }

    /// Accepts `budget` more bytes, then reports a full buffer.
    #[derive(Clone, Default)]
    struct ShortWriter {
        wire: Arc<Mutex<Vec<u8>>>,
        budget: Arc<Mutex<usize>>,
    }

    impl Write for ShortWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let mut budget = self.budget.lock().unwrap();
            if *budget == 0 {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            let count = buf.len().min(*budget);
            *budget -= count;
            self.wire.lock().unwrap().extend_from_slice(&buf[..count]);
            Ok(count)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn short_write_resumes_where_it_stopped() {
        let writer = ShortWriter::default();
        *writer.budget.lock().unwrap() = 3;
        let mut transport = LinkTransport::new(TransportTiming::default());
        transport.attach_streams(Box::new(writer.clone()));
        let now = Instant::now();
        let sent = command(11, true, false);

        transport.enqueue(sent.clone(), now);
        assert!(transport.is_waiting_for_write_space());
        assert_eq!(transport.queue_len(), 1);
        assert_eq!(transport.expected_reply(), None);
        assert_eq!(writer.wire.lock().unwrap().as_slice(), &sent.bytes[..3]);

        *writer.budget.lock().unwrap() = 100;
        transport.on_write_space(now);
        assert_eq!(*writer.wire.lock().unwrap(), sent.bytes);
        assert_eq!(transport.queue_len(), 0);
        assert_eq!(transport.expected_reply(), Some(11));
    }

    #[test]
    fn reply_timeout_drops_a_stuck_partial_frame() {
        let (mut transport, _writer) = attached();
        let now = Instant::now();
        transport.enqueue(command(11, true, false), now);
        // Length header claiming 65535 bytes that never arrive.
        transport.on_inbound(&[0xFF, 0xFF, 0x0B, 0x00], now);
        assert!(transport.take_events().is_empty());

        transport.poll(now + Duration::from_millis(2000));
        assert_eq!(
            transport.take_events(),
            vec![TransportEvent::ReplyFailed {
                sequence: 11,
                failure: ReplyFailure::Timeout
            }]
        );

        let later = now + Duration::from_millis(2001);
        transport.enqueue(command(12, true, false), later);
        transport.on_inbound(&reply_frame(12, STATUS_OK, &[0x01]), later);
        assert_eq!(
            transport.take_events(),
            vec![TransportEvent::Reply {
                sequence: 12,
                payload: vec![0x01]
            }]
        );
    }

    #[test]
    fn kill_is_idempotent_and_stops_enqueue() {
        let (mut transport, writer) = attached();
        let now = Instant::now();
        transport.enqueue(command(11, true, false), now);
        transport.enqueue(command(12, true, false), now);
        assert_eq!(transport.kill_session(), 1);
        assert_eq!(transport.kill_session(), 0);
        transport.enqueue(command(13, true, false), now);
        assert_eq!(transport.queue_len(), 0);
        assert_eq!(writer.written.lock().unwrap().len(), 1);
    }
}
