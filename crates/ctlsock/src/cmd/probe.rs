use std::io::ErrorKind;

use ctlsock_channel::{Channel, ChannelError};
use serde::Serialize;

use crate::cmd::ProbeArgs;
use crate::exit::{CliResult, FAILURE, PERMISSION_DENIED, SUCCESS};
use crate::output::OutputFormat;

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
enum ProbeStatus {
    /// Connected successfully; a server is accepting connections.
    Listening,
    /// Socket path absent; the server is not running.
    NotRunning,
    /// Stale socket present but nothing accepting on it.
    NotListening,
    /// Socket present but this user may not connect to it.
    PermissionDenied,
    /// Any other connect failure.
    Unreachable,
}

#[derive(Debug, Serialize)]
struct ProbeOutput {
    schema_id: &'static str,
    path: String,
    status: ProbeStatus,
    detail: String,
}

pub fn run(args: ProbeArgs, format: OutputFormat) -> CliResult<i32> {
    let mut channel = Channel::with_path(&args.path);

    let (status, detail) = match channel.connect() {
        Ok(()) => (ProbeStatus::Listening, "server accepted the connection".to_string()),
        Err(err) => classify(&err),
    };
    channel.shutdown();

    let output = ProbeOutput {
        schema_id: "https://schemas.ctlsock.dev/cli/v1/probe-report.schema.json",
        path: args.path.display().to_string(),
        status,
        detail,
    };
    print_probe(&output, format);

    Ok(match status {
        ProbeStatus::Listening => SUCCESS,
        ProbeStatus::PermissionDenied => PERMISSION_DENIED,
        _ => FAILURE,
    })
}

fn classify(err: &ChannelError) -> (ProbeStatus, String) {
    let status = match err {
        ChannelError::Connect { source, .. } => match source.kind() {
            ErrorKind::NotFound => ProbeStatus::NotRunning,
            ErrorKind::ConnectionRefused => ProbeStatus::NotListening,
            ErrorKind::PermissionDenied => ProbeStatus::PermissionDenied,
            _ => ProbeStatus::Unreachable,
        },
        _ => ProbeStatus::Unreachable,
    };
    (status, err.to_string())
}

fn print_probe(output: &ProbeOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(output).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("{}: {} ({})", output.path, status_text(output.status), output.detail);
        }
        OutputFormat::Raw => {
            println!("{}", status_text(output.status));
        }
    }
}

fn status_text(status: ProbeStatus) -> &'static str {
    match status {
        ProbeStatus::Listening => "listening",
        ProbeStatus::NotRunning => "not-running",
        ProbeStatus::NotListening => "not-listening",
        ProbeStatus::PermissionDenied => "permission-denied",
        ProbeStatus::Unreachable => "unreachable",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_path_classifies_as_not_running() {
        let err = ChannelError::Connect {
            path: "/tmp/absent.sock".into(),
            source: std::io::Error::from(ErrorKind::NotFound),
        };
        let (status, _) = classify(&err);
        assert!(matches!(status, ProbeStatus::NotRunning));
    }

    #[test]
    fn refused_classifies_as_not_listening() {
        let err = ChannelError::Connect {
            path: "/tmp/stale.sock".into(),
            source: std::io::Error::from(ErrorKind::ConnectionRefused),
        };
        let (status, _) = classify(&err);
        assert!(matches!(status, ProbeStatus::NotListening));
    }

    #[test]
    fn eacces_classifies_as_permission_denied() {
        let err = ChannelError::Connect {
            path: "/var/run/ctlsock.sock".into(),
            source: std::io::Error::from(ErrorKind::PermissionDenied),
        };
        let (status, _) = classify(&err);
        assert!(matches!(status, ProbeStatus::PermissionDenied));
    }
}
