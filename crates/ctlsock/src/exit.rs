use std::fmt;
use std::io;

use ctlsock_channel::ChannelError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn channel_error(context: &str, err: ChannelError) -> CliError {
    match err {
        ChannelError::Bind { source, .. }
        | ChannelError::Connect { source, .. }
        | ChannelError::Accept(source)
        | ChannelError::Io(source) => io_error(context, source),
        ChannelError::ShortPacket { .. }
        | ChannelError::LengthMismatch { .. }
        | ChannelError::PacketTooLarge { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        ChannelError::Disconnected | ChannelError::ShortWrite { .. } => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        ChannelError::PathTooLong { .. } => CliError::new(USAGE, format!("{context}: {err}")),
        ChannelError::NotConnected => CliError::new(INTERNAL, format!("{context}: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_denied_maps_to_50() {
        let err = channel_error(
            "connect failed",
            ChannelError::Connect {
                path: "/var/run/ctlsock.sock".into(),
                source: io::Error::from(io::ErrorKind::PermissionDenied),
            },
        );
        assert_eq!(err.code, PERMISSION_DENIED);
    }

    #[test]
    fn malformed_frames_map_to_data_invalid() {
        let err = channel_error(
            "read failed",
            ChannelError::LengthMismatch {
                declared: 9,
                received: 5,
            },
        );
        assert_eq!(err.code, DATA_INVALID);
    }

    #[test]
    fn disconnect_maps_to_failure() {
        let err = channel_error("read failed", ChannelError::Disconnected);
        assert_eq!(err.code, FAILURE);
    }

    #[test]
    fn short_write_maps_to_failure_with_byte_counts() {
        let err = channel_error(
            "send failed",
            ChannelError::ShortWrite {
                written: 3,
                expected: 12,
            },
        );
        assert_eq!(err.code, FAILURE);
        assert!(err.message.contains("3 of 12 bytes"));
    }
}
