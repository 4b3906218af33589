use clap::{Args, Subcommand};
use std::path::PathBuf;

use ctlsock_channel::DEFAULT_SOCKET_PATH;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod probe;
pub mod send;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Bind the control socket and echo received packets.
    Serve(ServeArgs),
    /// Send a single framed packet.
    Send(SendArgs),
    /// Probe whether a server is reachable at the socket path.
    Probe(ProbeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Probe(args) => probe::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Socket path to bind.
    #[arg(default_value = DEFAULT_SOCKET_PATH)]
    pub path: PathBuf,
    /// Exit after the first peer disconnects.
    #[arg(long)]
    pub once: bool,
    /// Receive buffer size in bytes.
    #[arg(long, default_value = "65536")]
    pub buffer_size: usize,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Socket path to connect to.
    #[arg(default_value = DEFAULT_SOCKET_PATH)]
    pub path: PathBuf,
    /// Payload string.
    #[arg(long, conflicts_with = "file")]
    pub data: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with = "data")]
    pub file: Option<PathBuf>,
    /// Wait for one reply and print it.
    #[arg(long)]
    pub wait: bool,
}

#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// Socket path to probe.
    #[arg(default_value = DEFAULT_SOCKET_PATH)]
    pub path: PathBuf,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
