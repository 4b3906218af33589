use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use ctlsock_channel::{encode_packet, Channel, ChannelError, HEADER_SIZE};
use tracing::warn;

use crate::cmd::ServeArgs;
use crate::exit::{channel_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_packet, OutputFormat};

pub fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    // A buffer smaller than a packet header can only ever produce
    // short reads, which the loop would misread as disconnects.
    if args.buffer_size < HEADER_SIZE {
        return Err(CliError::new(
            USAGE,
            format!("--buffer-size must be at least {HEADER_SIZE} bytes"),
        ));
    }

    let mut channel = Channel::with_path(&args.path);
    channel
        .listen()
        .map_err(|err| channel_error("bind failed", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut buf = vec![0u8; args.buffer_size];

    while running.load(Ordering::SeqCst) {
        let reply = match channel.read_command(&mut buf) {
            Ok(packet) => {
                print_packet(&packet, format);
                let mut reply = BytesMut::new();
                encode_packet(packet.payload(), &mut reply)
                    .map_err(|err| channel_error("reply framing failed", err))?;
                reply
            }
            Err(ChannelError::Disconnected) => {
                if args.once {
                    break;
                }
                continue;
            }
            Err(err) if err.is_retry() => {
                warn!(%err, "ignoring malformed packet");
                continue;
            }
            Err(err) => {
                channel.shutdown();
                return Err(channel_error("read failed", err));
            }
        };

        if let Err(err) = channel.send(&reply) {
            // The peer may vanish between read and reply; keep serving.
            warn!(%err, "echo reply failed");
        }
    }

    channel.shutdown();
    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })
}
