//! Simulated brick served over TCP, for trying the CLI without hardware.
//!
//! Usage: `brickdrive-sim [ADDR]` (default `127.0.0.1:0`). Prints the bound
//! address on the first line of stdout, then serves one connection at a time.

#![allow(clippy::print_stdout)] // The bound address goes to stdout

use std::io::{self, Write};
use std::net::TcpListener;

use brickdrive_fixtures::{serve_listener, SimulatedBrick};

fn main() -> io::Result<()> {
    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:0".to_string());
    let listener = TcpListener::bind(&addr)?;
    println!("{}", listener.local_addr()?);
    io::stdout().flush()?;

    serve_listener(&listener, &SimulatedBrick::new())
}
