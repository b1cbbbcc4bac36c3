//! The link event loop: one brick session, serialized.
//!
//! [`Link::start`] opens a [`BrickSession`] on a dedicated thread and returns
//! a [`LinkHandle`]. The thread owns the [`MessageBroker`], the
//! [`LinkTransport`] and the [`ConditionScheduler`]; callers only ever talk
//! to it through a channel, so framing, dispatch and condition evaluation
//! never race.
//!
//! # Key Types
//!
//! - [`LinkHandle`] - Clonable caller-facing handle
//! - [`Ticket`] - Rendezvous for one submission
//! - [`LinkEvent`] / [`LinkObserver`] - Notifications for live views
//! - [`BrickSession`] - Opens the duplex byte stream
//!
//! # Telemetry loop
//!
//! After connecting, the loop reads all ports once and, while telemetry is
//! enabled, issues the next batch read as soon as the previous one is
//! answered. A busy test is appended to the poll while an `output_busy` or
//! `sound_not_busy` condition is active. With telemetry disabled, polls still
//! run while the active condition depends on them.

mod observer;
mod session;

use std::collections::HashMap;
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, info_span, warn, Span};

use crate::broker::{DecodedReply, MessageBroker};
use crate::config::{validate_config, LinkConfig};
use crate::error::{LinkError, LinkResult, ProtocolError};
use crate::model::{
    sanitize_brick_name, BlockCondition, Operation, ReplyOperation, ReplyOperationReply,
    SessionId, Telemetry,
};
use crate::scheduler::{ConditionScheduler, SchedulerEvent};
use crate::transport::{LinkTransport, ReplyFailure, TransportEvent};

pub use crate::scheduler::Fulfillment;
pub use observer::{ChannelObserver, LinkEvent, LinkObserver, NoopObserver};
pub use session::{BrickSession, SerialDeviceSession, SessionStreams, TcpSession};

#[cfg(test)]
pub(crate) use observer::CollectingObserver;

const IDLE_WAIT: Duration = Duration::from_millis(250);
const READ_CHUNK: usize = 1024;

type Resolver = SyncSender<LinkResult<Fulfillment>>;

enum LinkRequest {
    Submit {
        operations: Vec<Operation>,
        condition: BlockCondition,
        resolver: Resolver,
    },
    SubmitReplies {
        operations: Vec<ReplyOperation>,
        resolver: Resolver,
    },
    ReadBrickName {
        resolver: Resolver,
    },
    Restart {
        done: SyncSender<LinkResult<()>>,
    },
    Disconnect {
        done: SyncSender<()>,
    },
    Shutdown,
    Inbound {
        generation: u64,
        bytes: Vec<u8>,
    },
    ReaderClosed {
        generation: u64,
        reason: String,
    },
}

#[derive(Default)]
struct Shared {
    connected: AtomicBool,
    telemetry: Mutex<Option<Telemetry>>,
    brick_name: Mutex<Option<String>>,
    session_id: Mutex<Option<SessionId>>,
}

impl Shared {
    fn set<T>(slot: &Mutex<Option<T>>, value: Option<T>) {
        if let Ok(mut guard) = slot.lock() {
            *guard = value;
        }
    }

    fn get<T: Clone>(slot: &Mutex<Option<T>>) -> Option<T> {
        slot.lock().ok().and_then(|guard| guard.clone())
    }
}

/// Entry point for starting a link.
pub struct Link;

impl Link {
    /// Open `session` on a new link thread and bootstrap it.
    ///
    /// Blocks until the session is open, then returns while the bootstrap
    /// reads are still in flight.
    ///
    /// # Errors
    /// [`LinkError::Config`] for an invalid configuration and
    /// [`LinkError::Io`] when the session cannot be opened.
    pub fn start(
        session: Box<dyn BrickSession>,
        config: LinkConfig,
        observer: Box<dyn LinkObserver>,
    ) -> LinkResult<LinkHandle> {
        validate_config(&config)?;
        let (sender, receiver) = mpsc::channel();
        let shared = Arc::new(Shared::default());
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);

        let mut event_loop = LinkLoop::new(
            session,
            config.clone(),
            observer,
            sender.clone(),
            Arc::clone(&shared),
        );
        let thread = thread::Builder::new()
            .name("brickdrive-link".to_string())
            .spawn(move || {
                let opened = event_loop.connect(true);
                let ok = opened.is_ok();
                let _ = ready_tx.send(opened);
                if ok {
                    event_loop.run(&receiver);
                }
            })
            .map_err(|err| LinkError::io("failed to spawn link thread", err))?;

        let opened = ready_rx.recv().unwrap_or(Err(LinkError::SessionClosed));
        if let Err(err) = opened {
            let _ = thread.join();
            return Err(err);
        }

        Ok(LinkHandle {
            inner: Arc::new(HandleInner {
                sender,
                shared,
                config,
                thread: Mutex::new(Some(thread)),
            }),
        })
    }
}

struct HandleInner {
    sender: Sender<LinkRequest>,
    shared: Arc<Shared>,
    config: LinkConfig,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        let _ = self.sender.send(LinkRequest::Shutdown);
    }
}

/// Caller-facing side of a running link.
#[derive(Clone)]
pub struct LinkHandle {
    inner: Arc<HandleInner>,
}

impl std::fmt::Debug for LinkHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkHandle")
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl LinkHandle {
    fn ticket(&self, build: impl FnOnce(Resolver) -> LinkRequest) -> Ticket {
        let (resolver, receiver) = mpsc::sync_channel(1);
        if self.inner.sender.send(build(resolver)).is_err() {
            debug!("link thread gone, ticket resolves as closed");
        }
        Ticket {
            receiver,
            default_timeout: self.inner.config.wait_timeout(),
        }
    }

    /// Queue fire-and-forget operations; the ticket resolves when
    /// `condition` is met.
    pub fn submit(&self, operations: Vec<Operation>, condition: BlockCondition) -> Ticket {
        self.ticket(|resolver| LinkRequest::Submit {
            operations,
            condition,
            resolver,
        })
    }

    /// [`LinkHandle::submit`] and wait.
    pub fn run(
        &self,
        operations: Vec<Operation>,
        condition: BlockCondition,
    ) -> LinkResult<Fulfillment> {
        self.submit(operations, condition).wait()
    }

    /// Queue reply operations as a user read; the ticket resolves with the
    /// decoded replies.
    pub fn submit_replies(&self, operations: Vec<ReplyOperation>) -> Ticket {
        self.ticket(|resolver| LinkRequest::SubmitReplies {
            operations,
            resolver,
        })
    }

    /// [`LinkHandle::submit_replies`] and wait for the replies.
    pub fn run_replies(
        &self,
        operations: Vec<ReplyOperation>,
    ) -> LinkResult<Vec<ReplyOperationReply>> {
        Ok(self.submit_replies(operations).wait()?.replies)
    }

    /// Ask the brick for its name.
    pub fn read_brick_name(&self) -> LinkResult<String> {
        let fulfillment = self
            .ticket(|resolver| LinkRequest::ReadBrickName { resolver })
            .wait()?;
        fulfillment
            .replies
            .into_iter()
            .find_map(|reply| match reply {
                ReplyOperationReply::BrickName(name) => Some(name),
                _ => None,
            })
            .ok_or_else(|| {
                ProtocolError::MalformedFrame {
                    reason: "reply carried no brick name".to_string(),
                }
                .into()
            })
    }

    /// Rename the brick. Non-alphanumeric characters are dropped and the
    /// name is cut to the configured maximum length.
    ///
    /// # Errors
    /// [`ProtocolError::Operand`] when nothing of the name survives.
    pub fn write_brick_name(&self, name: &str) -> LinkResult<Ticket> {
        let name: String = sanitize_brick_name(name)
            .chars()
            .take(self.inner.config.brick_name_max_len)
            .collect();
        if name.is_empty() {
            return Err(ProtocolError::Operand {
                reason: "brick name has no alphanumeric characters".to_string(),
            }
            .into());
        }
        Ok(self.submit(
            vec![Operation::SetBrickName { name }],
            BlockCondition::Time { milliseconds: 1 },
        ))
    }

    /// Most recent telemetry snapshot of the current session.
    pub fn latest_telemetry(&self) -> Option<Telemetry> {
        Shared::get(&self.inner.shared.telemetry)
    }

    /// Last brick name the brick reported.
    pub fn brick_name(&self) -> Option<String> {
        Shared::get(&self.inner.shared.brick_name)
    }

    /// Id of the open session.
    pub fn session_id(&self) -> Option<SessionId> {
        Shared::get(&self.inner.shared.session_id)
    }

    /// Whether a session is open.
    pub fn is_connected(&self) -> bool {
        self.inner.shared.connected.load(Ordering::SeqCst)
    }

    /// Tear the session down, wait the restart delay, reopen it and resume
    /// telemetry. Blocks until the session is open again.
    pub fn restart_session(&self) -> LinkResult<()> {
        let (done, receiver) = mpsc::sync_channel(1);
        self.inner
            .sender
            .send(LinkRequest::Restart { done })
            .map_err(|_| LinkError::SessionClosed)?;
        receiver.recv().map_err(|_| LinkError::SessionClosed)?
    }

    /// Close the session and stop the link thread.
    pub fn disconnect(&self) {
        let (done, receiver) = mpsc::sync_channel(1);
        if self
            .inner
            .sender
            .send(LinkRequest::Disconnect { done })
            .is_ok()
        {
            let _ = receiver.recv();
        }
        let thread = self
            .inner
            .thread
            .lock()
            .ok()
            .and_then(|mut guard| guard.take());
        if let Some(thread) = thread {
            if thread.join().is_err() {
                warn!("link thread panicked");
            }
        }
    }
}

/// Rendezvous for one submission.
#[derive(Debug)]
pub struct Ticket {
    receiver: Receiver<LinkResult<Fulfillment>>,
    default_timeout: Option<Duration>,
}

impl Ticket {
    /// Block until the submission resolves, bounded by the configured wait
    /// timeout if there is one.
    pub fn wait(self) -> LinkResult<Fulfillment> {
        match self.default_timeout {
            Some(timeout) => self.wait_timeout(timeout),
            None => self.receiver.recv().map_err(|_| LinkError::SessionClosed)?,
        }
    }

    /// Block for at most `timeout`.
    pub fn wait_timeout(self, timeout: Duration) -> LinkResult<Fulfillment> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(LinkError::Timeout {
                ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
            Err(RecvTimeoutError::Disconnected) => Err(LinkError::SessionClosed),
        }
    }

    /// The result, if the submission already resolved.
    pub fn try_result(&self) -> Option<LinkResult<Fulfillment>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(mpsc::TryRecvError::Empty) => None,
            Err(mpsc::TryRecvError::Disconnected) => Some(Err(LinkError::SessionClosed)),
        }
    }
}

struct LinkLoop {
    session: Box<dyn BrickSession>,
    config: LinkConfig,
    observer: Box<dyn LinkObserver>,
    sender: Sender<LinkRequest>,
    shared: Arc<Shared>,
    broker: MessageBroker,
    transport: LinkTransport,
    scheduler: ConditionScheduler,
    waiters: HashMap<u16, Resolver>,
    generation: u64,
    session_id: Option<SessionId>,
    span: Span,
    connected: bool,
    running: bool,
    poll_sequence: Option<u16>,
    write_retry_at: Option<Instant>,
    reopen_at: Option<Instant>,
    restart_waiters: Vec<SyncSender<LinkResult<()>>>,
}

impl LinkLoop {
    fn new(
        session: Box<dyn BrickSession>,
        config: LinkConfig,
        observer: Box<dyn LinkObserver>,
        sender: Sender<LinkRequest>,
        shared: Arc<Shared>,
    ) -> Self {
        let transport = LinkTransport::new(config.timing());
        Self {
            session,
            config,
            observer,
            sender,
            shared,
            broker: MessageBroker::new(),
            transport,
            scheduler: ConditionScheduler::new(),
            waiters: HashMap::new(),
            generation: 0,
            session_id: None,
            span: Span::none(),
            connected: false,
            running: true,
            poll_sequence: None,
            write_retry_at: None,
            reopen_at: None,
            restart_waiters: Vec::new(),
        }
    }

    fn run(&mut self, receiver: &Receiver<LinkRequest>) {
        while self.running {
            let now = Instant::now();
            let wait = self
                .next_deadline()
                .map_or(IDLE_WAIT, |deadline| deadline.saturating_duration_since(now));
            match receiver.recv_timeout(wait) {
                Ok(request) => {
                    let span = self.span.clone();
                    let _entered = span.enter();
                    self.handle_request(request);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            let span = self.span.clone();
            let _entered = span.enter();
            self.tick(Instant::now());
        }
        self.teardown("link stopped");
        debug!("link loop finished");
    }

    fn next_deadline(&self) -> Option<Instant> {
        [
            self.transport.next_deadline(),
            self.scheduler.next_deadline(),
            self.write_retry_at,
            self.reopen_at,
        ]
        .into_iter()
        .flatten()
        .min()
    }

    fn tick(&mut self, now: Instant) {
        if self.reopen_at.is_some_and(|at| at <= now) {
            self.reopen_at = None;
            self.reopen();
        }
        if self.write_retry_at.is_some_and(|at| at <= now) {
            self.write_retry_at = None;
            self.transport.on_write_space(now);
        }
        self.transport.poll(now);
        let events = self.scheduler.poll_deadline(now);
        self.apply_scheduler_events(events);
        self.drain_transport(now);
    }

    fn handle_request(&mut self, request: LinkRequest) {
        let now = Instant::now();
        match request {
            LinkRequest::Submit {
                operations,
                condition,
                resolver,
            } => self.submit(&operations, condition, resolver, now),
            LinkRequest::SubmitReplies {
                operations,
                resolver,
            } => self.submit_replies(&operations, true, resolver, now),
            LinkRequest::ReadBrickName { resolver } => {
                let max_length = u8::try_from(self.config.brick_name_max_len).unwrap_or(u8::MAX);
                self.submit_replies(
                    &[ReplyOperation::GetBrickName { max_length }],
                    false,
                    resolver,
                    now,
                );
            }
            LinkRequest::Restart { done } => {
                self.teardown("session restart");
                self.restart_waiters.push(done);
                self.reopen_at = Some(now + self.config.restart_delay());
                info!(delay_ms = self.config.restart_delay_ms, "session restart scheduled");
            }
            LinkRequest::Disconnect { done } => {
                self.teardown("disconnect requested");
                self.running = false;
                let _ = done.send(());
            }
            LinkRequest::Shutdown => self.running = false,
            LinkRequest::Inbound { generation, bytes } => {
                if generation == self.generation && self.connected {
                    self.transport.on_inbound(&bytes, now);
                }
            }
            LinkRequest::ReaderClosed { generation, reason } => {
                if generation == self.generation && self.connected {
                    warn!(%reason, "session stream closed");
                    self.lose_session(&reason, now);
                }
            }
        }
        self.drain_transport(now);
    }

    fn submit(
        &mut self,
        operations: &[Operation],
        condition: BlockCondition,
        resolver: Resolver,
        now: Instant,
    ) {
        if !self.connected {
            let _ = resolver.send(Err(LinkError::NotConnected));
            return;
        }
        if self.scheduler.latest_telemetry().is_none() {
            self.issue_poll(now);
        }
        match self.broker.command(operations, condition) {
            Ok(command) => {
                self.register_waiter(command.sequence, resolver);
                self.transport.enqueue(command, now);
            }
            Err(err) => {
                let _ = resolver.send(Err(err.into()));
            }
        }
    }

    fn submit_replies(
        &mut self,
        operations: &[ReplyOperation],
        user_initiated: bool,
        resolver: Resolver,
        now: Instant,
    ) {
        if !self.connected {
            let _ = resolver.send(Err(LinkError::NotConnected));
            return;
        }
        if operations.is_empty() {
            debug!("empty reply batch, nothing to send");
            let _ = resolver.send(Ok(Fulfillment::default()));
            return;
        }
        match self.broker.reply_command(operations, user_initiated) {
            Ok(command) => {
                self.register_waiter(command.sequence, resolver);
                self.transport.enqueue(command, now);
            }
            Err(err) => {
                let _ = resolver.send(Err(err.into()));
            }
        }
    }

    fn register_waiter(&mut self, sequence: u16, resolver: Resolver) {
        if self.waiters.insert(sequence, resolver).is_some() {
            warn!(sequence, "sequence reused while a caller was still waiting");
        }
    }

    fn resolve(&mut self, sequence: u16, result: LinkResult<Fulfillment>) {
        if let Some(resolver) = self.waiters.remove(&sequence) {
            let _ = resolver.send(result);
        }
    }

    fn issue_poll(&mut self, now: Instant) {
        if self.poll_sequence.is_some() || !self.connected {
            return;
        }
        let mut operations = vec![ReplyOperation::ReadAllPorts];
        operations.extend(self.scheduler.busy_check());
        match self.broker.reply_command(&operations, false) {
            Ok(command) => {
                self.poll_sequence = Some(command.sequence);
                self.transport.enqueue(command, now);
            }
            Err(err) => warn!(error = %err, "could not frame telemetry poll"),
        }
    }

    fn wants_poll(&self) -> bool {
        self.config.telemetry
            || self
                .scheduler
                .active_condition()
                .is_some_and(BlockCondition::needs_telemetry)
    }

    fn drain_transport(&mut self, now: Instant) {
        loop {
            let events = self.transport.take_events();
            if events.is_empty() {
                break;
            }
            for event in events {
                self.handle_transport_event(event, now);
            }
        }
        if self.transport.is_waiting_for_write_space() && self.write_retry_at.is_none() {
            self.write_retry_at = Some(now + self.config.write_retry());
        }
    }

    fn handle_transport_event(&mut self, event: TransportEvent, now: Instant) {
        match event {
            TransportEvent::Reply { sequence, payload } => {
                let user_initiated = self.broker.is_user_initiated(sequence);
                match self.broker.read_reply(sequence, &payload) {
                    Ok(Some(decoded)) => self.on_decoded(decoded, now),
                    Ok(None) => debug!(sequence, "reply without pending message ignored"),
                    Err(err) => {
                        warn!(sequence, error = %err, "reply did not decode");
                        self.on_failed(sequence, user_initiated, err.into(), now);
                    }
                }
            }
            TransportEvent::ReplyFailed { sequence, failure } => {
                let user_initiated = self.broker.is_user_initiated(sequence);
                self.broker.discard(sequence);
                self.observer
                    .on_event(&LinkEvent::ReplyFailed { sequence, failure });
                let error = match failure {
                    ReplyFailure::Firmware => LinkError::Firmware { sequence },
                    ReplyFailure::Malformed => ProtocolError::MalformedFrame {
                        reason: format!("unrecognized reply status for sequence {sequence}"),
                    }
                    .into(),
                    ReplyFailure::Timeout => LinkError::Timeout {
                        ms: self.config.reply_timeout_ms,
                    },
                };
                self.on_failed(sequence, user_initiated, error, now);
            }
            TransportEvent::ProceedAfter {
                sequence,
                condition,
            } => {
                let events = self.scheduler.activate(condition, sequence, now);
                self.apply_scheduler_events(events);
                if self.wants_poll() {
                    self.issue_poll(now);
                }
            }
            TransportEvent::SessionLost { reason } => {
                warn!(%reason, "session lost");
                self.lose_session(&reason, now);
            }
        }
    }

    fn on_decoded(&mut self, decoded: DecodedReply, now: Instant) {
        let DecodedReply {
            sequence,
            user_initiated,
            replies,
        } = decoded;

        for reply in &replies {
            if let ReplyOperationReply::BrickName(name) = reply {
                info!(%name, "brick name");
                Shared::set(&self.shared.brick_name, Some(name.clone()));
                self.observer
                    .on_event(&LinkEvent::BrickName { name: name.clone() });
            }
        }

        if user_initiated {
            self.observer.on_event(&LinkEvent::Replies {
                sequence,
                replies: replies.clone(),
            });
            match self.scheduler.on_user_reply(sequence, replies.clone()) {
                Some(fulfillment) => self.fulfilled(fulfillment),
                None => self.resolve(
                    sequence,
                    Ok(Fulfillment {
                        sequence,
                        replies,
                        telemetry: None,
                    }),
                ),
            }
            return;
        }

        let telemetry = replies.iter().find_map(|reply| match reply {
            ReplyOperationReply::PortData(telemetry) => Some(telemetry.clone()),
            _ => None,
        });
        let busy = replies.iter().find_map(ReplyOperationReply::busy_flag);
        if let Some(telemetry) = telemetry {
            Shared::set(&self.shared.telemetry, Some(telemetry.clone()));
            self.observer.on_event(&LinkEvent::Telemetry {
                telemetry: telemetry.clone(),
            });
            if let Some(fulfillment) = self.scheduler.on_telemetry(telemetry, busy) {
                self.fulfilled(fulfillment);
            }
        }

        if self.poll_sequence == Some(sequence) {
            self.poll_sequence = None;
            if self.wants_poll() {
                self.issue_poll(now);
            }
        } else {
            self.resolve(
                sequence,
                Ok(Fulfillment {
                    sequence,
                    replies,
                    telemetry: None,
                }),
            );
        }
    }

    fn on_failed(&mut self, sequence: u16, user_initiated: bool, error: LinkError, now: Instant) {
        if user_initiated {
            self.scheduler.on_user_reply_failed(sequence);
        }
        self.resolve(sequence, Err(error));
        if self.poll_sequence == Some(sequence) {
            self.poll_sequence = None;
            debug!(sequence, "telemetry poll failed, re-issuing");
            self.issue_poll(now);
        }
    }

    fn fulfilled(&mut self, fulfillment: Fulfillment) {
        let sequence = fulfillment.sequence;
        self.observer
            .on_event(&LinkEvent::ConditionFulfilled { sequence });
        self.resolve(sequence, Ok(fulfillment));
    }

    fn apply_scheduler_events(&mut self, events: Vec<SchedulerEvent>) {
        for event in events {
            match event {
                SchedulerEvent::Fulfilled(fulfillment) => self.fulfilled(fulfillment),
                SchedulerEvent::Superseded { sequence } => {
                    self.resolve(sequence, Err(LinkError::Superseded));
                }
            }
        }
    }

    /// Open the session, start its reader and queue the bootstrap reads.
    fn connect(&mut self, read_brick_name: bool) -> LinkResult<()> {
        let peer = self.session.describe();
        let streams = self
            .session
            .open()
            .map_err(|err| LinkError::io(&format!("failed to open {peer}"), err))?;

        self.generation += 1;
        if let Err(err) = spawn_reader(self.generation, streams.reader, self.sender.clone()) {
            self.session.close();
            return Err(LinkError::io("failed to spawn session reader", err));
        }

        let session_id = SessionId::new();
        self.span = info_span!("brick_session", session = %session_id.short());
        let span = self.span.clone();
        let _entered = span.enter();
        info!(%peer, "brick session opened");

        self.transport.attach_streams(streams.writer);
        self.broker.clear();
        self.scheduler.clear();
        self.poll_sequence = None;
        self.connected = true;
        self.session_id = Some(session_id);
        self.shared.connected.store(true, Ordering::SeqCst);
        Shared::set(&self.shared.session_id, Some(session_id));

        let now = Instant::now();
        self.issue_poll(now);
        if read_brick_name {
            let max_length = u8::try_from(self.config.brick_name_max_len).unwrap_or(u8::MAX);
            match self
                .broker
                .reply_command(&[ReplyOperation::GetBrickName { max_length }], false)
            {
                Ok(command) => self.transport.enqueue(command, now),
                Err(err) => warn!(error = %err, "could not frame brick name read"),
            }
        }
        self.observer
            .on_event(&LinkEvent::Connected { session_id, peer });
        self.drain_transport(now);
        Ok(())
    }

    fn reopen(&mut self) {
        let result = self.connect(false);
        if let Err(err) = &result {
            warn!(error = %err, "session restart failed");
            if self.config.auto_reconnect && self.running {
                self.schedule_reconnect(Instant::now());
            }
        }
        for done in self.restart_waiters.drain(..) {
            let _ = done.send(result.clone());
        }
    }

    /// Teardown after the brick went away on its own.
    fn lose_session(&mut self, reason: &str, now: Instant) {
        let was_connected = self.connected;
        self.teardown(reason);
        if was_connected && self.config.auto_reconnect && self.running {
            self.schedule_reconnect(now);
        }
    }

    fn schedule_reconnect(&mut self, now: Instant) {
        self.reopen_at = Some(now + self.config.restart_delay());
        info!(delay_ms = self.config.restart_delay_ms, "reconnect scheduled");
    }

    /// Kill the transport, close the session and fail every waiter.
    fn teardown(&mut self, reason: &str) {
        let dropped = self.transport.kill_session();
        if !self.connected {
            return;
        }
        self.session.close();
        self.connected = false;
        self.shared.connected.store(false, Ordering::SeqCst);
        Shared::set(&self.shared.telemetry, None);
        Shared::set(&self.shared.session_id, None);
        self.broker.clear();
        self.scheduler.clear();
        self.poll_sequence = None;
        self.write_retry_at = None;
        for (_, resolver) in self.waiters.drain() {
            let _ = resolver.send(Err(LinkError::SessionClosed));
        }
        info!(dropped, reason, "brick session closed");
        if let Some(session_id) = self.session_id.take() {
            self.observer.on_event(&LinkEvent::Disconnected {
                session_id,
                reason: reason.to_string(),
            });
        }
    }
}

fn spawn_reader(
    generation: u64,
    mut reader: Box<dyn Read + Send>,
    sender: Sender<LinkRequest>,
) -> io::Result<()> {
    thread::Builder::new()
        .name(format!("brickdrive-reader-{generation}"))
        .spawn(move || {
            let mut buf = [0u8; READ_CHUNK];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => {
                        let _ = sender.send(LinkRequest::ReaderClosed {
                            generation,
                            reason: "end of stream".to_string(),
                        });
                        return;
                    }
                    Ok(count) => {
                        let bytes = buf.get(..count).map(<[u8]>::to_vec).unwrap_or_default();
                        if sender
                            .send(LinkRequest::Inbound { generation, bytes })
                            .is_err()
                        {
                            return;
                        }
                    }
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(5));
                    }
                    Err(err) => {
                        let _ = sender.send(LinkRequest::ReaderClosed {
                            generation,
                            reason: err.to_string(),
                        });
                        return;
                    }
                }
            }
        })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    struct FailingSession;

    impl BrickSession for FailingSession {
        fn open(&mut self) -> io::Result<SessionStreams> {
            Err(io::ErrorKind::NotFound.into())
        }

        fn describe(&self) -> String {
            "nowhere".to_string()
        }
    }

    #[test]
    fn start_reports_open_failure_as_io() {
        let err = Link::start(
            Box::new(FailingSession),
            LinkConfig::default(),
            Box::new(NoopObserver),
        )
        .unwrap_err();
        assert!(matches!(err, LinkError::Io { .. }));
    }

    #[test]
    fn start_rejects_invalid_config() {
        let config = LinkConfig {
            config_version: 9,
            ..LinkConfig::default()
        };
        let err = Link::start(Box::new(FailingSession), config, Box::new(NoopObserver))
            .unwrap_err();
        assert!(matches!(err, LinkError::Config { .. }));
    }

    #[test]
    fn ticket_times_out_and_reports_closed() {
        let (tx, rx) = mpsc::sync_channel::<LinkResult<Fulfillment>>(1);
        let ticket = Ticket {
            receiver: rx,
            default_timeout: None,
        };
        assert!(ticket.try_result().is_none());
        let err = ticket.wait_timeout(Duration::from_millis(5)).unwrap_err();
        assert!(matches!(err, LinkError::Timeout { ms: 5 }));
        drop(tx);

        let (tx, rx) = mpsc::sync_channel::<LinkResult<Fulfillment>>(1);
        drop(tx);
        let ticket = Ticket {
            receiver: rx,
            default_timeout: None,
        };
        assert!(matches!(ticket.wait(), Err(LinkError::SessionClosed)));
    }

    #[test]
    fn peer_hangup_closes_session_and_fails_waiters() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let observer = CollectingObserver::default();
        let events = observer.events();

        let handle = Link::start(
            Box::new(TcpSession::new(addr)),
            LinkConfig::default(),
            Box::new(observer),
        )
        .unwrap();
        let (peer, _) = listener.accept().unwrap();
        assert!(handle.is_connected());
        assert!(handle.session_id().is_some());

        let ticket = handle.submit_replies(vec![ReplyOperation::SoundTest]);
        drop(peer);

        assert!(matches!(ticket.wait(), Err(LinkError::SessionClosed)));
        let deadline = Instant::now() + Duration::from_secs(2);
        while handle.is_connected() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!handle.is_connected());
        assert!(matches!(
            handle.run(Vec::new(), BlockCondition::Time { milliseconds: 0 }),
            Err(LinkError::NotConnected)
        ));
        handle.disconnect();

        let events = events.lock().unwrap();
        assert!(matches!(events.first(), Some(LinkEvent::Connected { .. })));
        assert!(events
            .iter()
            .any(|event| matches!(event, LinkEvent::Disconnected { .. })));
    }
}
