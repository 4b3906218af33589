//! One-shot client — connect, send one framed command, print the reply.
//!
//! Run with:
//!   cargo run --example one-shot-client -- /tmp/ctlsock-ack-<pid>/ctl.sock

use bytes::BytesMut;
use ctlsock::channel::{encode_packet, Channel, DEFAULT_SOCKET_PATH};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_SOCKET_PATH.to_string());

    let mut channel = Channel::with_path(&path);
    channel.connect()?;

    let mut wire = BytesMut::new();
    encode_packet(b"status", &mut wire)?;
    channel.send(&wire)?;

    let mut reply = [0u8; 4096];
    let received = channel.receive(&mut reply)?;
    if received == 0 {
        eprintln!("server closed the connection without replying");
    } else {
        println!("{}", String::from_utf8_lossy(&reply[..received]));
    }

    Ok(())
}
