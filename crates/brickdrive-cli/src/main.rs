//! Brickdrive CLI: drive an EV3 brick over its direct-command link.
//!
//! Offline frame encoding, an NDJSON driver loop, telemetry monitoring and
//! brick-name access against a paired serial device or a TCP bridge.

// CLI-specific lint allowances (CLI binary, not library)
#![allow(missing_docs)]
#![allow(clippy::print_stdout)] // CLI must print to stdout
#![allow(clippy::print_stderr)] // CLI must print to stderr
#![allow(clippy::exit)] // CLI uses exit codes

use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use brickdrive::broker::{parse_frame, MessageBroker};
use brickdrive::{
    load_config, BlockCondition, BrickSession, ChannelObserver, Command, Link, LinkConfig,
    LinkError, LinkEvent, LinkHandle, LinkObserver, LinkResult, NoopObserver, Operation,
    ReplyOperation, SerialDeviceSession, TcpSession,
};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use miette::{IntoDiagnostic, Result};
use serde::Deserialize;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

mod driver;
mod progress;

/// Environment variable holding the log filter.
const LOG_ENV: &str = "BRICKDRIVE_LOG";

/// Color output mode
#[derive(Copy, Clone, Debug, Default, ValueEnum)]
enum ColorMode {
    /// Auto-detect based on terminal and `NO_COLOR` env
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

#[derive(Debug, Parser)]
#[command(
    name = "brickdrive",
    version,
    about = "Drive an EV3 brick over its direct-command link"
)]
struct Cli {
    /// Control color output
    #[arg(long, value_enum, default_value = "auto", global = true)]
    color: ColorMode,

    /// Log link activity to stderr
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Where the brick is and how to talk to it.
#[derive(Debug, Args)]
struct Endpoint {
    #[arg(
        long,
        conflicts_with = "tcp",
        required_unless_present = "tcp",
        help = "Serial device of a paired brick (e.g. /dev/rfcomm0)"
    )]
    device: Option<PathBuf>,
    #[arg(long, help = "Address of a TCP bridge to the brick (host:port)")]
    tcp: Option<String>,
    #[arg(long, help = "Link configuration file (JSON or YAML)")]
    config: Option<PathBuf>,
}

impl Endpoint {
    fn session(&self) -> LinkResult<Box<dyn BrickSession>> {
        match (&self.device, &self.tcp) {
            (Some(path), _) => Ok(Box::new(SerialDeviceSession::new(path.clone()))),
            (None, Some(addr)) => Ok(Box::new(TcpSession::new(addr.clone()))),
            (None, None) => Err(LinkError::config("either --device or --tcp is required")),
        }
    }

    fn load_config(&self) -> LinkResult<LinkConfig> {
        match &self.config {
            Some(path) => load_config(path),
            None => Ok(LinkConfig::default()),
        }
    }

    fn describe(&self) -> String {
        match (&self.device, &self.tcp) {
            (Some(path), _) => path.display().to_string(),
            (None, Some(addr)) => format!("tcp://{addr}"),
            (None, None) => "nowhere".to_string(),
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Frame a JSON request into direct-command bytes without a brick
    Encode {
        #[arg(long, help = "Read the request from this file instead of stdin")]
        file: Option<PathBuf>,
        #[arg(long, help = "Print the frame as a JSON object")]
        json: bool,
    },
    /// Serve NDJSON requests from stdin against a live brick
    Driver {
        #[command(flatten)]
        endpoint: Endpoint,
    },
    /// Print telemetry snapshots as JSON lines
    Monitor {
        #[command(flatten)]
        endpoint: Endpoint,
        #[arg(long, help = "Stop after this many snapshots")]
        count: Option<usize>,
    },
    /// Read or change the brick name
    Name {
        #[command(flatten)]
        endpoint: Endpoint,
        #[arg(long, help = "Rename the brick before reading the name back")]
        set: Option<String>,
        #[arg(long, help = "Print the name as a JSON object")]
        json: bool,
    },
    /// Generate shell completions for bash, zsh, or fish
    Completions {
        #[arg(value_enum, help = "Shell to generate completions for")]
        shell: Shell,
    },
}

/// Configure color output based on CLI flag and environment
fn configure_colors(mode: ColorMode) -> bool {
    let use_color = match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => {
            if std::env::var("NO_COLOR").is_ok() {
                false
            } else {
                // Diagnostics and logs both go to stderr
                supports_color::on(supports_color::Stream::Stderr).is_some()
            }
        }
    };

    miette::set_hook(Box::new(move |_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .color(use_color)
                .unicode(use_color)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set
    use_color
}

fn init_logging(verbose: bool, use_color: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(io::stderr)
                .with_ansi(use_color)
                .with_target(false),
        )
        .with(filter)
        .try_init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let use_color = configure_colors(cli.color);
    init_logging(cli.verbose, use_color);
    match cli.command {
        Commands::Encode { file, json } => cmd_encode(file, json),
        Commands::Driver { endpoint } => cmd_driver(&endpoint),
        Commands::Monitor { endpoint, count } => cmd_monitor(&endpoint, count),
        Commands::Name {
            endpoint,
            set,
            json,
        } => cmd_name(&endpoint, set.as_deref(), json),
        Commands::Completions { shell } => cmd_completions(shell),
    }
}

// =============================================================================
// Command Handlers
// =============================================================================

fn default_condition() -> BlockCondition {
    BlockCondition::Time { milliseconds: 0 }
}

/// Request accepted by `encode`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EncodeRequest {
    Operations(OperationsRequest),
    Replies(RepliesRequest),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct OperationsRequest {
    operations: Vec<Operation>,
    #[serde(default = "default_condition")]
    condition: BlockCondition,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RepliesRequest {
    reply_operations: Vec<ReplyOperation>,
}

fn encode_request(text: &str) -> LinkResult<Command> {
    let request: EncodeRequest = serde_json::from_str(text).map_err(|err| {
        LinkError::from(brickdrive::ProtocolError::Operand {
            reason: format!("invalid encode request: {err}"),
        })
    })?;
    let mut broker = MessageBroker::new();
    let command = match request {
        EncodeRequest::Operations(request) => {
            broker.command(&request.operations, request.condition)?
        }
        EncodeRequest::Replies(request) => broker.reply_command(&request.reply_operations, true)?,
    };
    Ok(command)
}

/// Handle the encode command.
fn cmd_encode(file: Option<PathBuf>, json: bool) -> Result<()> {
    let text = match file {
        Some(path) => fs::read_to_string(&path).into_diagnostic()?,
        None => {
            let mut text = String::new();
            io::stdin().read_to_string(&mut text).into_diagnostic()?;
            text
        }
    };
    let command = match encode_request(&text) {
        Ok(command) => command,
        Err(err) => return emit_error(json, &err),
    };

    if json {
        let reply_bytes = parse_frame(&command.bytes)
            .map(|parsed| parsed.reply_bytes)
            .into_diagnostic()?;
        let payload = serde_json::json!({
            "sequence": command.sequence,
            "requires_reply": command.requires_reply,
            "reply_bytes": reply_bytes,
            "frame": command.hex(),
        });
        println!("{payload}");
    } else {
        println!("{}", command.hex());
    }
    Ok(())
}

/// Open the link, with a spinner while the session comes up.
fn connect(
    endpoint: &Endpoint,
    config: LinkConfig,
    observer: Box<dyn LinkObserver>,
) -> LinkResult<LinkHandle> {
    let session = endpoint.session()?;
    let spinner = progress::ConnectSpinner::start(&endpoint.describe());
    let result = Link::start(session, config, observer);
    spinner.finish();
    result
}

/// Handle the driver command.
fn cmd_driver(endpoint: &Endpoint) -> Result<()> {
    let handle = match endpoint
        .load_config()
        .and_then(|config| connect(endpoint, config, Box::new(NoopObserver)))
    {
        Ok(handle) => handle,
        Err(err) => return emit_error(true, &err),
    };
    let stdin = io::stdin();
    let stdout = io::stdout();
    let result = driver::run_driver(&handle, stdin.lock(), stdout.lock());
    handle.disconnect();
    result
}

/// Handle the monitor command.
fn cmd_monitor(endpoint: &Endpoint, count: Option<usize>) -> Result<()> {
    let (sender, events) = mpsc::channel();
    let handle = match endpoint.load_config().and_then(|mut config| {
        config.telemetry = true;
        connect(endpoint, config, Box::new(ChannelObserver::new(sender)))
    }) {
        Ok(handle) => handle,
        Err(err) => return emit_error(true, &err),
    };

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst)).into_diagnostic()?;

    let mut stdout = io::stdout();
    let mut printed = 0usize;
    while running.load(Ordering::SeqCst) && count.map_or(true, |count| printed < count) {
        match events.recv_timeout(Duration::from_millis(100)) {
            Ok(LinkEvent::Telemetry { telemetry }) => {
                let payload = serde_json::to_string(&telemetry).into_diagnostic()?;
                writeln!(stdout, "{payload}").into_diagnostic()?;
                stdout.flush().into_diagnostic()?;
                printed += 1;
            }
            Ok(LinkEvent::Disconnected { reason, .. }) => {
                tracing::warn!(%reason, "brick session closed");
                return emit_error(true, &LinkError::SessionClosed);
            }
            Ok(_) | Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    handle.disconnect();
    Ok(())
}

/// Handle the name command.
fn cmd_name(endpoint: &Endpoint, set: Option<&str>, json: bool) -> Result<()> {
    let result = endpoint
        .load_config()
        .and_then(|config| connect(endpoint, config, Box::new(NoopObserver)))
        .and_then(|handle| {
            let name = rename_and_read(&handle, set);
            handle.disconnect();
            name
        });
    match result {
        Ok(name) if json => {
            println!("{}", serde_json::json!({ "name": name }));
            Ok(())
        }
        Ok(name) => {
            println!("{name}");
            Ok(())
        }
        Err(err) => emit_error(json, &err),
    }
}

fn rename_and_read(handle: &LinkHandle, set: Option<&str>) -> LinkResult<String> {
    if let Some(name) = set {
        handle.write_brick_name(name)?.wait()?;
    }
    handle.read_brick_name()
}

/// Handle the completions command.
#[allow(clippy::unnecessary_wraps)] // Consistent with other command handlers
fn cmd_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut io::stdout());
    Ok(())
}

fn emit_error(json: bool, err: &LinkError) -> Result<()> {
    if json {
        let payload = serde_json::to_string(&err.to_error_info()).into_diagnostic()?;
        println!("{payload}");
    } else {
        eprintln!("error: {err}");
    }
    std::process::exit(exit_code_for_error(err));
}

fn exit_code_for_error(err: &LinkError) -> i32 {
    err.code().exit_code()
}
