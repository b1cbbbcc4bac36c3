//! Byte-stream sessions to a brick.
//!
//! A [`BrickSession`] knows how to open the duplex stream to one already
//! selected brick. Discovery and pairing happen elsewhere; the link only asks
//! for streams and closes them again.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[cfg(unix)]
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use tracing::{debug, info};

/// Both halves of an opened session.
pub struct SessionStreams {
    /// Brick-to-host bytes, read on a dedicated thread.
    pub reader: Box<dyn Read + Send>,
    /// Host-to-brick bytes, written by the link thread.
    pub writer: Box<dyn Write + Send>,
}

impl std::fmt::Debug for SessionStreams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStreams").finish_non_exhaustive()
    }
}

/// Opens and closes the duplex byte stream to one brick.
///
/// `open` may be called again after `close` (session restart). `close` must
/// make a blocked reader return if the stream supports it.
pub trait BrickSession: Send {
    /// Open the streams.
    ///
    /// # Errors
    /// Returns the underlying I/O error when the endpoint cannot be opened.
    fn open(&mut self) -> io::Result<SessionStreams>;

    /// Release the streams opened last.
    fn close(&mut self) {}

    /// Human-readable endpoint, reported as the connection peer.
    fn describe(&self) -> String;
}

/// A paired serial device node, e.g. `/dev/rfcomm0`.
///
/// The device is switched to nonblocking mode so that [`BrickSession::close`]
/// can release the reader: a closed session's reader reports end of stream
/// on its next read instead of waiting for bytes that may never come.
#[derive(Debug)]
pub struct SerialDeviceSession {
    path: PathBuf,
    stop: Option<Arc<AtomicBool>>,
}

impl SerialDeviceSession {
    /// Session for the device node at `path`. Nothing is opened yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            stop: None,
        }
    }
}

impl BrickSession for SerialDeviceSession {
    fn open(&mut self) -> io::Result<SessionStreams> {
        self.close();
        let file: File = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)?;
        set_nonblocking(&file)?;
        let stop = Arc::new(AtomicBool::new(false));
        let reader = SerialReader {
            file: file.try_clone()?,
            stop: Arc::clone(&stop),
        };
        self.stop = Some(stop);
        info!(path = %self.path.display(), "opened serial device");
        Ok(SessionStreams {
            reader: Box::new(reader),
            writer: Box::new(file),
        })
    }

    fn close(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop.store(true, Ordering::SeqCst);
            debug!(path = %self.path.display(), "serial device released");
        }
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Read half of a serial device. Once stopped, every read is end of stream
/// and the descriptor is dropped with the reader.
struct SerialReader {
    file: File,
    stop: Arc<AtomicBool>,
}

impl Read for SerialReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.stop.load(Ordering::SeqCst) {
            return Ok(0);
        }
        self.file.read(buf)
    }
}

#[cfg(unix)]
fn set_nonblocking(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let fd = file.as_raw_fd();
    let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_nonblocking(_file: &File) -> io::Result<()> {
    Ok(())
}

/// A brick (or simulator) reachable over TCP.
#[derive(Debug)]
pub struct TcpSession {
    addr: String,
    stream: Option<TcpStream>,
}

impl TcpSession {
    /// Session for `addr` (`host:port`). Nothing is connected yet.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            stream: None,
        }
    }
}

impl BrickSession for TcpSession {
    fn open(&mut self) -> io::Result<SessionStreams> {
        let stream = TcpStream::connect(&self.addr)?;
        stream.set_nodelay(true)?;
        let reader = stream.try_clone()?;
        let writer = stream.try_clone()?;
        self.stream = Some(stream);
        info!(addr = %self.addr, "connected over tcp");
        Ok(SessionStreams {
            reader: Box::new(reader),
            writer: Box::new(writer),
        })
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(err) = stream.shutdown(Shutdown::Both) {
                debug!(error = %err, "tcp shutdown failed");
            }
        }
    }

    fn describe(&self) -> String {
        format!("tcp://{}", self.addr)
    }
}
