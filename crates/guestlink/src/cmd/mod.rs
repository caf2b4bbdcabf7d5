use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use guestlink_frame::{EntityKind, StdStream};
use guestlink_transport::DEFAULT_PROTOCOL;

use crate::exit::{io_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod keys;
pub mod send;
pub mod serve;
pub mod stdio;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Accept upgrade connections and echo every chunk back.
    Serve(ServeArgs),
    /// Dial a reconnecting channel and send one payload.
    Send(SendArgs),
    /// Print the session keys of an entity.
    Keys(KeysArgs),
    /// Wrap stdin in stdio chunk headers.
    Frame(FrameArgs),
    /// Strip stdio chunk headers, routing payloads to stdout or stderr.
    Unframe(UnframeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => block_on(serve::run(args)),
        Command::Send(args) => block_on(send::run(args, format)),
        Command::Keys(args) => keys::run(args, format),
        Command::Frame(args) => stdio::frame(args),
        Command::Unframe(args) => stdio::unframe(args),
        Command::Version(args) => version::run(args),
    }
}

fn block_on<F>(future: F) -> CliResult<i32>
where
    F: Future<Output = CliResult<i32>>,
{
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| io_error("runtime setup failed", err))?;
    runtime.block_on(future)
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to listen on: `host:port` or `unix:///path/to/socket`.
    pub addr: String,
    /// `Upgrade:` protocol token to accept.
    #[arg(long, env = "GUESTLINK_PROTOCOL", default_value = DEFAULT_PROTOCOL)]
    pub protocol: String,
    /// Hold each chunk this long before echoing it (e.g. 150ms).
    #[arg(long)]
    pub delay: Option<String>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Upgrade URLs to dial (`http://`, `ws://` or `unix://`).
    #[arg(required = true, env = "GUESTLINK_URL", value_delimiter = ',')]
    pub urls: Vec<String>,
    /// `Upgrade:` protocol token.
    #[arg(long, env = "GUESTLINK_PROTOCOL", default_value = DEFAULT_PROTOCOL)]
    pub protocol: String,
    /// Raw string payload.
    #[arg(long, conflicts_with = "file")]
    pub data: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with = "data")]
    pub file: Option<PathBuf>,
    /// Wait for one reply chunk and print it.
    #[arg(long)]
    pub wait: bool,
    /// Maximum time to wait for the reply when --wait is set (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub wait_timeout: String,
    /// Give up if no endpoint accepts within this time.
    #[arg(long, default_value = "30s")]
    pub connect_timeout: String,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    Container,
    Exec,
}

impl From<KindArg> for EntityKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Container => EntityKind::Container,
            KindArg::Exec => EntityKind::Exec,
        }
    }
}

#[derive(Args, Debug)]
pub struct KeysArgs {
    /// Entity kind. Both kinds are listed when omitted.
    #[arg(long, value_enum)]
    pub kind: Option<KindArg>,
    /// Entity index (0-254).
    #[arg(long, default_value = "0")]
    pub index: u32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum StreamArg {
    Stdin,
    Stdout,
    Stderr,
}

impl From<StreamArg> for StdStream {
    fn from(stream: StreamArg) -> Self {
        match stream {
            StreamArg::Stdin => StdStream::Stdin,
            StreamArg::Stdout => StdStream::Stdout,
            StreamArg::Stderr => StdStream::Stderr,
        }
    }
}

#[derive(Args, Debug)]
pub struct FrameArgs {
    /// Stream type written into each header.
    #[arg(long, value_enum, default_value = "stdout")]
    pub stream: StreamArg,
}

#[derive(Args, Debug)]
pub struct UnframeArgs {
    /// Treat input as a TTY stream: copy it through unchanged.
    #[arg(long)]
    pub tty: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = match input.strip_suffix("ms") {
        Some(num) => (num, true),
        None => (input.strip_suffix('s').unwrap_or(input), false),
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
