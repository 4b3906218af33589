//! Control-socket channel library and operator CLI.
//!
//! ctlsock carries length-prefixed command packets between a privileged
//! daemon and its command-line client over a named local socket, one
//! connection at a time.
//!
//! # Crate Structure
//!
//! - [`channel`] — The single-connection channel: listen/connect
//!   lifecycle, framed server reads, symmetric send/receive.
//!
//! The `ctlsock` binary (behind the `cli` feature) layers `serve`,
//! `send`, `probe`, and `version` subcommands on top of the channel,
//! treating every payload as opaque bytes.

/// Re-export channel types.
pub mod channel {
    pub use ctlsock_channel::*;
}
