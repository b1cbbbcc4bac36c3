//! Serving a [`SimulatedBrick`] over TCP, one connection at a time.

use std::io;
use std::net::{SocketAddr, TcpListener};
use std::thread;

use crate::brick::SimulatedBrick;

/// Accept connections on `listener` forever, answering each with `brick`
/// until the peer closes it.
pub fn serve_listener(listener: &TcpListener, brick: &SimulatedBrick) -> io::Result<()> {
    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(err) => {
                tracing::warn!(error = %err, "simulated brick accept failed");
                continue;
            }
        };
        let reader = stream.try_clone()?;
        if let Err(err) = brick.serve(reader, stream) {
            tracing::debug!(error = %err, "simulated brick connection ended");
        }
    }
    Ok(())
}

/// Bind an ephemeral local port and serve `brick` on a background thread.
pub fn spawn_tcp_brick(brick: SimulatedBrick) -> io::Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    thread::spawn(move || {
        if let Err(err) = serve_listener(&listener, &brick) {
            tracing::warn!(error = %err, "simulated brick listener stopped");
        }
    });
    Ok(addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpStream;

    use brickdrive::broker::MessageBroker;
    use brickdrive::ReplyOperation;

    #[test]
    fn answers_reply_commands_over_tcp() {
        let addr = spawn_tcp_brick(SimulatedBrick::new()).unwrap();
        let mut stream = TcpStream::connect(addr).unwrap();

        let mut broker = MessageBroker::new();
        let command = broker
            .reply_command(&[ReplyOperation::SoundTest], true)
            .unwrap();
        stream.write_all(&command.bytes).unwrap();

        let mut reply = [0u8; 6];
        stream.read_exact(&mut reply).unwrap();
        assert_eq!(reply, [0x04, 0x00, 0x01, 0x00, 0x02, 0x00]);
    }
}
