//! Minimal ack server — serves one client at a time and acknowledges
//! every valid packet.
//!
//! Run with:
//!   cargo run --example ack-server
//!
//! In another terminal:
//!   cargo run --features cli -- send /tmp/ctlsock-ack-<pid>/ctl.sock \
//!     --data hello --wait

use std::fs;

use ctlsock::channel::{Channel, ChannelError};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let sock_dir = std::env::temp_dir().join(format!("ctlsock-ack-{}", std::process::id()));
    fs::create_dir_all(&sock_dir)?;
    let sock_path = sock_dir.join("ctl.sock");

    let mut channel = Channel::with_path(&sock_path);
    channel.listen()?;
    eprintln!("Listening on {}", sock_path.display());

    let mut buf = vec![0u8; 64 * 1024];
    loop {
        match channel.read_command(&mut buf) {
            Ok(packet) => {
                eprintln!(
                    "Received packet: {} bytes total, {} payload",
                    packet.total_len(),
                    packet.payload().len()
                );
                channel.send(b"ACK\n")?;
            }
            Err(ChannelError::Disconnected) => {
                eprintln!("Peer disconnected; waiting for the next one");
            }
            Err(err) if err.is_retry() => {
                eprintln!("Malformed packet ignored: {err}");
            }
            Err(err) => {
                channel.shutdown();
                return Err(err.into());
            }
        }
    }
}
