use std::fs;

use bytes::BytesMut;
use ctlsock_channel::{encode_packet, Channel, Packet};

use crate::cmd::SendArgs;
use crate::exit::{channel_error, CliError, CliResult, FAILURE, SUCCESS};
use crate::output::{print_raw, OutputFormat};

pub fn run(args: SendArgs, _format: OutputFormat) -> CliResult<i32> {
    let payload = resolve_payload(&args)?;

    let mut channel = Channel::with_path(&args.path);
    channel
        .connect()
        .map_err(|err| channel_error("connect failed", err))?;

    let mut wire = BytesMut::new();
    encode_packet(&payload, &mut wire).map_err(|err| channel_error("framing failed", err))?;
    channel
        .send(&wire)
        .map_err(|err| channel_error("send failed", err))?;

    if args.wait {
        let mut reply = vec![0u8; 64 * 1024];
        let received = channel
            .receive(&mut reply)
            .map_err(|err| channel_error("receive failed", err))?;
        if received == 0 {
            return Err(CliError::new(
                FAILURE,
                "server closed the connection without replying",
            ));
        }
        // Servers conventionally frame their replies; fall back to the
        // raw bytes when they don't.
        match Packet::from_wire(&reply[..received]) {
            Ok(packet) => print_raw(packet.payload()),
            Err(_) => print_raw(&reply[..received]),
        }
    }

    Ok(SUCCESS)
}

fn resolve_payload(args: &SendArgs) -> CliResult<Vec<u8>> {
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(path) = &args.file {
        return fs::read(path).map_err(|err| {
            crate::exit::io_error(&format!("failed reading {}", path.display()), err)
        });
    }
    Ok(Vec::new())
}
