use std::path::PathBuf;

/// Errors that can occur in channel operations.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Operation attempted before the relevant endpoint was initialized.
    #[error("endpoint not initialized")]
    NotConnected,

    /// The peer closed its end of the connection (zero-byte read).
    ///
    /// The channel resets to the peer-unset state; the next accept-capable
    /// read waits for a fresh connection.
    #[error("peer disconnected")]
    Disconnected,

    /// Received fewer bytes than a packet header requires.
    #[error("short packet ({received} bytes, need at least 4 for header)")]
    ShortPacket { received: usize },

    /// The declared packet length disagrees with the received byte count.
    #[error("packet length mismatch (declared {declared}, received {received})")]
    LengthMismatch { declared: u32, received: usize },

    /// The payload would overflow the u32 length prefix.
    #[error("packet too large ({size} bytes, max {max})")]
    PacketTooLarge { size: usize, max: usize },

    /// Failed to bind the listening endpoint.
    #[error("failed to bind to {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to connect to the well-known path.
    #[error("failed to connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// An I/O error occurred on the connected stream.
    #[error("channel I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A write transmitted fewer bytes than requested.
    ///
    /// Short writes are total failures; the channel never retries or
    /// resumes a partial transmission.
    #[error("short write ({written} of {expected} bytes)")]
    ShortWrite { written: usize, expected: usize },

    /// The socket path is too long for the platform.
    #[error("socket path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },
}

impl ChannelError {
    /// True for malformed-frame outcomes where the connection stays open
    /// and the caller is expected to retry the read.
    pub fn is_retry(&self) -> bool {
        matches!(
            self,
            ChannelError::ShortPacket { .. } | ChannelError::LengthMismatch { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ChannelError>;
