//! Single-connection control-socket channel.
//!
//! A daemon binds a listening endpoint at a well-known filesystem path; a
//! CLI client connects to the same path. Both sides then exchange
//! length-prefixed command packets over the one active connection. The
//! server-side read path validates framing before handing a packet to the
//! consumer; payload interpretation is entirely the consumer's business.
//!
//! The protocol is deliberately single-connection: at most one peer is
//! served at a time, and after a disconnect the next server read
//! transparently waits for a fresh connection.

pub mod error;
pub mod packet;

#[cfg(unix)]
pub mod channel;

pub use error::{ChannelError, Result};
pub use packet::{encode_packet, Packet, HEADER_SIZE, MAX_PACKET_SIZE};

#[cfg(unix)]
pub use channel::{Channel, DEFAULT_SOCKET_PATH};
