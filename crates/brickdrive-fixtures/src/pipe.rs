//! In-memory byte pipes and a [`BrickSession`] backed by a simulated brick.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use brickdrive::{BrickSession, SessionStreams};

use crate::brick::SimulatedBrick;

/// Write half of an in-memory pipe.
pub struct PipeWriter {
    tx: Sender<Vec<u8>>,
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Read half of an in-memory pipe. Reads block until data arrives and return
/// `Ok(0)` once every writer is gone.
pub struct PipeReader {
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            match self.rx.recv() {
                Ok(chunk) => self.pending = chunk,
                Err(_) => return Ok(0),
            }
        }
        let count = buf.len().min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }
}

/// A connected writer/reader pair.
pub fn pipe() -> (PipeWriter, PipeReader) {
    let (tx, rx) = mpsc::channel();
    (
        PipeWriter { tx },
        PipeReader {
            rx,
            pending: Vec::new(),
        },
    )
}

/// Writer that goes through a shared slot, so the session can cut the
/// brick-to-host direction from outside.
struct SlotWriter(Arc<Mutex<Option<PipeWriter>>>);

impl Write for SlotWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.0.lock().unwrap_or_else(PoisonError::into_inner).as_mut() {
            Some(writer) => writer.write(buf),
            None => Err(io::ErrorKind::BrokenPipe.into()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Session whose far end is a [`SimulatedBrick`] served on its own thread.
///
/// Clones share the brick and the control state, so a test can keep one
/// clone to hang up or count reopenings after handing another to the link.
#[derive(Clone)]
pub struct SimulatedSession {
    brick: SimulatedBrick,
    to_host: Arc<Mutex<Option<PipeWriter>>>,
    opens: Arc<AtomicUsize>,
    fail_open: Arc<AtomicBool>,
}

impl SimulatedSession {
    pub fn new(brick: SimulatedBrick) -> Self {
        Self {
            brick,
            to_host: Arc::new(Mutex::new(None)),
            opens: Arc::new(AtomicUsize::new(0)),
            fail_open: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn brick(&self) -> &SimulatedBrick {
        &self.brick
    }

    /// How many times the session was opened.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Make the next opens fail (or succeed again).
    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Drop the brick-to-host stream, as if the radio link went away.
    pub fn hang_up(&self) {
        self.to_host.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

impl BrickSession for SimulatedSession {
    fn open(&mut self) -> io::Result<SessionStreams> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "simulated brick refused the connection",
            ));
        }
        let (host_writer, brick_reader) = pipe();
        let (brick_writer, host_reader) = pipe();
        *self.to_host.lock().unwrap_or_else(PoisonError::into_inner) = Some(brick_writer);
        self.opens.fetch_add(1, Ordering::SeqCst);

        let brick = self.brick.clone();
        let writer = SlotWriter(Arc::clone(&self.to_host));
        thread::spawn(move || {
            if let Err(err) = brick.serve(brick_reader, writer) {
                tracing::debug!(error = %err, "simulated brick stopped");
            }
        });

        Ok(SessionStreams {
            reader: Box::new(host_reader),
            writer: Box::new(host_writer),
        })
    }

    fn close(&mut self) {
        self.hang_up();
    }

    fn describe(&self) -> String {
        "simulated-brick".to_string()
    }
}
