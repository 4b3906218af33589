use std::io::{Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{ChannelError, Result};
use crate::packet::{Packet, HEADER_SIZE};

/// Production rendezvous point shared by the daemon and client builds.
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/ctlsock.sock";

/// One control-socket channel: a listening endpoint and at most one
/// connected peer.
///
/// The server side calls [`Channel::listen`] once, then loops on
/// [`Channel::read_command`], which accepts a connection when none is
/// active and validates each received packet's framing. The client side
/// calls [`Channel::connect`] and then uses [`Channel::send`] and
/// [`Channel::receive`] directly. Either side tears down with
/// [`Channel::shutdown`] (also run on drop).
///
/// All operations block; a multi-threaded host must serialize access to a
/// `Channel` externally, e.g. by giving one thread ownership of it.
pub struct Channel {
    path: PathBuf,
    listener: Option<UnixListener>,
    peer: Option<UnixStream>,
    created_inode: Option<(u64, u64)>,
}

impl Channel {
    /// Permission mode applied to the bound socket path. Filesystem
    /// permissions are the protocol's only access control.
    pub const SOCKET_MODE: u32 = 0o600;

    /// The protocol serves one peer at a time; one pending connection may
    /// queue behind it.
    const BACKLOG: i32 = 1;

    /// Maximum socket path length.
    /// Unix `sockaddr_un.sun_path` is typically 108 bytes on Linux, 104 on macOS.
    #[cfg(target_os = "linux")]
    const MAX_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    const MAX_PATH_LEN: usize = 104;

    /// Channel rendezvousing at [`DEFAULT_SOCKET_PATH`].
    pub fn new() -> Self {
        Self::with_path(DEFAULT_SOCKET_PATH)
    }

    /// Channel rendezvousing at an explicit path (tests, parallel
    /// deployments).
    pub fn with_path(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            listener: None,
            peer: None,
            created_inode: None,
        }
    }

    /// The rendezvous path this channel uses.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bind the listening endpoint at the channel's path.
    ///
    /// Idempotent re-initialization: a prior listening endpoint is closed
    /// before the new one is created. A stale socket file left by a
    /// crashed server is removed before binding; an existing non-socket
    /// file at the path is never removed and fails the bind instead. The
    /// bound path is restricted to mode 0600 and marked listening with a
    /// backlog of one.
    ///
    /// On any failure the partially-created endpoint is released (socket
    /// closed, path unlinked) and the underlying OS error is carried in
    /// the returned [`ChannelError::Bind`], so callers can distinguish
    /// permission errors from stale-path conflicts.
    pub fn listen(&mut self) -> Result<()> {
        // Close any prior listening endpoint first.
        self.listener = None;
        self.created_inode = None;

        let path = self.path.clone();

        let path_bytes = path.as_os_str().len();
        if path_bytes >= Self::MAX_PATH_LEN {
            return Err(ChannelError::PathTooLong {
                path,
                len: path_bytes,
                max: Self::MAX_PATH_LEN,
            });
        }

        // Remove a stale socket if present, but never remove non-socket files.
        if path.exists() {
            let metadata = std::fs::symlink_metadata(&path).map_err(|e| ChannelError::Bind {
                path: path.clone(),
                source: e,
            })?;
            if metadata.file_type().is_socket() {
                debug!(?path, "removing stale socket");
                std::fs::remove_file(&path).map_err(|e| ChannelError::Bind {
                    path: path.clone(),
                    source: e,
                })?;
            } else {
                return Err(ChannelError::Bind {
                    path: path.clone(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::AlreadyExists,
                        "existing path is not a unix socket",
                    ),
                });
            }
        }

        let listener = UnixListener::bind(&path).map_err(|e| ChannelError::Bind {
            path: path.clone(),
            source: e,
        })?;

        match Self::finish_bind(&path, &listener) {
            Ok(inode) => {
                info!(?path, "listening on control socket");
                self.created_inode = Some(inode);
                self.listener = Some(listener);
                Ok(())
            }
            Err(err) => {
                drop(listener);
                let _ = std::fs::remove_file(&path);
                Err(err)
            }
        }
    }

    /// Permission hardening and backlog adjustment after a successful bind.
    /// Returns the (dev, ino) identity of the created socket file.
    fn finish_bind(path: &Path, listener: &UnixListener) -> Result<(u64, u64)> {
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(Self::SOCKET_MODE))
            .map_err(|e| ChannelError::Bind {
                path: path.to_path_buf(),
                source: e,
            })?;

        // std binds with its own default backlog; re-issue listen(2) with
        // the protocol's backlog of one.
        // SAFETY: the descriptor is an open listening socket owned by
        // `listener` for the duration of this call.
        let rc = unsafe { libc::listen(listener.as_raw_fd(), Self::BACKLOG) };
        if rc != 0 {
            return Err(ChannelError::Bind {
                path: path.to_path_buf(),
                source: std::io::Error::last_os_error(),
            });
        }

        let metadata = std::fs::symlink_metadata(path).map_err(|e| ChannelError::Bind {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok((metadata.dev(), metadata.ino()))
    }

    /// Connect the peer endpoint to the channel's path (client side).
    ///
    /// Idempotent re-initialization: a prior peer endpoint is closed
    /// before the new connection is made. On failure the underlying OS
    /// error is carried in [`ChannelError::Connect`]; the expected kinds
    /// are `NotFound` (server not running), `ConnectionRefused` (stale
    /// socket, server not listening), and `PermissionDenied`.
    pub fn connect(&mut self) -> Result<()> {
        // Close any prior peer endpoint first.
        self.peer = None;

        let stream = UnixStream::connect(&self.path).map_err(|e| ChannelError::Connect {
            path: self.path.clone(),
            source: e,
        })?;
        debug!(path = ?self.path, "connected to control socket");
        self.peer = Some(stream);
        Ok(())
    }

    /// Read one command packet from the client (server side; blocking,
    /// reconnect-aware).
    ///
    /// If no peer is active, blocks accepting exactly one incoming
    /// connection first. Then performs a single receive into `buf` and
    /// validates the framing:
    ///
    /// - zero bytes: the peer disconnected; the peer endpoint is dropped
    ///   and the call fails with [`ChannelError::Disconnected`] — the next
    ///   call waits for a fresh connection;
    /// - declared length equals the byte count: returns the [`Packet`];
    /// - anything else: fails with a retry condition
    ///   ([`ChannelError::is_retry`]) and leaves the connection open.
    ///
    /// One receive corresponds to one framed write from the peer; no
    /// reassembly happens across calls. Known gap, kept from the observed
    /// protocol: bytes beyond a malformed frame are not drained, so a
    /// misbehaving peer can desynchronize subsequent reads.
    pub fn read_command<'a>(&mut self, buf: &'a mut [u8]) -> Result<Packet<'a>> {
        let Some(listener) = self.listener.as_ref() else {
            return Err(ChannelError::NotConnected);
        };

        // Wait for a connection if none is active.
        if self.peer.is_none() {
            let (stream, _addr) = listener.accept().map_err(ChannelError::Accept)?;
            debug!("accepted connection");
            self.peer = Some(stream);
        }

        let Some(peer) = self.peer.as_mut() else {
            return Err(ChannelError::NotConnected);
        };

        let received = peer.read(buf)?;
        if received == 0 {
            debug!("peer disconnected");
            self.peer = None;
            return Err(ChannelError::Disconnected);
        }

        if received < HEADER_SIZE {
            return Err(ChannelError::ShortPacket { received });
        }
        Packet::from_wire(&buf[..received])
    }

    /// Send bytes to the peer.
    ///
    /// Succeeds only if the whole range is written in one call; a short
    /// write is reported as [`ChannelError::ShortWrite`] with no retry.
    /// Returns the full byte count on success.
    pub fn send(&mut self, bytes: &[u8]) -> Result<usize> {
        let Some(peer) = self.peer.as_mut() else {
            return Err(ChannelError::NotConnected);
        };

        let written = peer.write(bytes)?;
        if written != bytes.len() {
            return Err(ChannelError::ShortWrite {
                written,
                expected: bytes.len(),
            });
        }
        Ok(written)
    }

    /// Receive bytes from the peer, up to `buf`'s capacity.
    ///
    /// A single blocking read with no framing validation; framing belongs
    /// to the server's [`Channel::read_command`] path because only the
    /// server interprets inbound commands. May return zero on peer
    /// disconnect.
    pub fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        let Some(peer) = self.peer.as_mut() else {
            return Err(ChannelError::NotConnected);
        };
        Ok(peer.read(buf)?)
    }

    /// Tear down both endpoints. Idempotent, best-effort; safe to call in
    /// any state.
    ///
    /// Closes the listening endpoint if set and removes the socket path
    /// (only while it still names the file this channel created), then
    /// closes the peer endpoint if set.
    pub fn shutdown(&mut self) {
        if self.listener.take().is_some() {
            if let Some((expected_dev, expected_ino)) = self.created_inode.take() {
                if let Ok(metadata) = std::fs::symlink_metadata(&self.path) {
                    if metadata.file_type().is_socket()
                        && metadata.dev() == expected_dev
                        && metadata.ino() == expected_ino
                    {
                        debug!(path = ?self.path, "removing control socket");
                        let _ = std::fs::remove_file(&self.path);
                    } else {
                        debug!(
                            path = ?self.path,
                            "socket path identity changed; skipping cleanup"
                        );
                    }
                }
            }
        }
        self.created_inode = None;
        self.peer = None;
    }
}

impl Default for Channel {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("path", &self.path)
            .field("listening", &self.listener.is_some())
            .field("peer", &self.peer.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::encode_packet;

    use bytes::BytesMut;
    use std::path::PathBuf;

    fn unique_temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "ctlsock-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
        dir
    }

    fn framed(payload: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        encode_packet(payload, &mut buf).expect("payload should frame");
        buf
    }

    #[test]
    fn listen_creates_socket_with_restrictive_mode() {
        let dir = unique_temp_dir("listen-mode");
        let sock = dir.join("ctl.sock");

        let mut server = Channel::with_path(&sock);
        server.listen().unwrap();
        assert!(sock.exists());

        let mode = std::fs::metadata(&sock).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);

        server.shutdown();
        assert!(!sock.exists(), "shutdown should remove the socket path");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn listen_twice_rebinds_cleanly() {
        let dir = unique_temp_dir("listen-twice");
        let sock = dir.join("ctl.sock");

        let mut server = Channel::with_path(&sock);
        server.listen().unwrap();
        server.listen().unwrap();
        assert!(sock.exists());

        // The rebound endpoint must still serve a client.
        let sock_clone = sock.clone();
        let handle = std::thread::spawn(move || {
            let mut client = Channel::with_path(&sock_clone);
            client.connect().unwrap();
            client.send(&framed(b"rebound")).unwrap();
        });

        let mut buf = [0u8; 128];
        let packet = server.read_command(&mut buf).unwrap();
        assert_eq!(packet.payload(), b"rebound");

        handle.join().unwrap();
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn listen_rejects_existing_non_socket_file() {
        let dir = unique_temp_dir("listen-file");
        let sock = dir.join("not-a-socket.sock");
        std::fs::write(&sock, b"regular-file").unwrap();

        let mut server = Channel::with_path(&sock);
        let result = server.listen();
        assert!(matches!(result, Err(ChannelError::Bind { .. })));
        assert!(sock.exists(), "non-socket file must not be removed");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn listen_rejects_overlong_path() {
        let long_path = std::env::temp_dir().join("a".repeat(200)).join("ctl.sock");
        let mut server = Channel::with_path(&long_path);
        assert!(matches!(
            server.listen(),
            Err(ChannelError::PathTooLong { .. })
        ));
    }

    #[test]
    fn unset_endpoints_fail_with_not_connected() {
        let dir = unique_temp_dir("precond");
        let mut chan = Channel::with_path(dir.join("ctl.sock"));

        let mut buf = [0u8; 64];
        assert!(matches!(
            chan.read_command(&mut buf),
            Err(ChannelError::NotConnected)
        ));
        assert!(matches!(
            chan.send(b"anything"),
            Err(ChannelError::NotConnected)
        ));
        assert!(matches!(
            chan.receive(&mut buf),
            Err(ChannelError::NotConnected)
        ));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn end_to_end_command_and_ack() {
        let dir = unique_temp_dir("e2e");
        let sock = dir.join("ctl.sock");

        let mut server = Channel::with_path(&sock);
        server.listen().unwrap();

        let sock_clone = sock.clone();
        let handle = std::thread::spawn(move || {
            let mut client = Channel::with_path(&sock_clone);
            client.connect().unwrap();

            // 8-byte payload => declared total of 12.
            let wire = framed(b"8bytes!!");
            assert_eq!(wire.len(), 12);
            assert_eq!(client.send(&wire).unwrap(), 12);

            let mut ack = [0u8; 16];
            let n = client.receive(&mut ack).unwrap();
            assert_eq!(&ack[..n], b"OKAY");
        });

        let mut buf = [0u8; 256];
        let packet = server.read_command(&mut buf).unwrap();
        assert_eq!(packet.total_len(), 12);
        assert_eq!(packet.payload(), b"8bytes!!");

        assert_eq!(server.send(b"OKAY").unwrap(), 4);

        handle.join().unwrap();
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn malformed_frames_leave_connection_usable() {
        let dir = unique_temp_dir("malformed");
        let sock = dir.join("ctl.sock");

        let mut server = Channel::with_path(&sock);
        server.listen().unwrap();

        // Lockstep with one ack byte per attempt so stream writes never
        // coalesce into a single receive.
        let sock_clone = sock.clone();
        let handle = std::thread::spawn(move || {
            let mut client = Channel::with_path(&sock_clone);
            client.connect().unwrap();
            let mut ack = [0u8; 1];

            // Too short for a header.
            client.send(&[0xFF]).unwrap();
            assert_eq!(client.receive(&mut ack).unwrap(), 1);

            // Declared length disagrees with the actual byte count.
            let mut lying = Vec::from(99u32.to_le_bytes());
            lying.extend_from_slice(b"sixbyt");
            client.send(&lying).unwrap();
            assert_eq!(client.receive(&mut ack).unwrap(), 1);

            client.send(&framed(b"legit")).unwrap();
        });

        let mut buf = [0u8; 256];

        let err = server.read_command(&mut buf).unwrap_err();
        assert!(matches!(err, ChannelError::ShortPacket { received: 1 }));
        assert!(err.is_retry());
        server.send(b"+").unwrap();

        let err = server.read_command(&mut buf).unwrap_err();
        assert!(matches!(
            err,
            ChannelError::LengthMismatch {
                declared: 99,
                received: 10
            }
        ));
        assert!(err.is_retry());
        server.send(b"+").unwrap();

        let packet = server.read_command(&mut buf).unwrap();
        assert_eq!(packet.payload(), b"legit");

        handle.join().unwrap();
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn disconnect_then_reconnect_serves_next_client() {
        let dir = unique_temp_dir("reconnect");
        let sock = dir.join("ctl.sock");

        let mut server = Channel::with_path(&sock);
        server.listen().unwrap();

        let sock_clone = sock.clone();
        let first = std::thread::spawn(move || {
            let mut client = Channel::with_path(&sock_clone);
            client.connect().unwrap();
            client.send(&framed(b"first")).unwrap();
        });

        let mut buf = [0u8; 256];
        let packet = server.read_command(&mut buf).unwrap();
        assert_eq!(packet.payload(), b"first");

        first.join().unwrap();

        // First client's channel dropped; the read observes the close.
        assert!(matches!(
            server.read_command(&mut buf),
            Err(ChannelError::Disconnected)
        ));

        let sock_clone = sock.clone();
        let second = std::thread::spawn(move || {
            let mut client = Channel::with_path(&sock_clone);
            client.connect().unwrap();
            client.send(&framed(b"second")).unwrap();
        });

        // The next read transparently accepts the new connection.
        let packet = server.read_command(&mut buf).unwrap();
        assert_eq!(packet.payload(), b"second");

        second.join().unwrap();
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn connect_twice_uses_fresh_stream() {
        let dir = unique_temp_dir("connect-twice");
        let sock = dir.join("ctl.sock");

        let mut server = Channel::with_path(&sock);
        server.listen().unwrap();

        let sock_clone = sock.clone();
        let handle = std::thread::spawn(move || {
            let mut client = Channel::with_path(&sock_clone);
            client.connect().unwrap();
            // Re-initialization closes the first stream before connecting.
            client.connect().unwrap();
            client.send(&framed(b"again")).unwrap();
        });

        // The first accepted connection surfaces as an immediate
        // disconnect; the packet arrives on the second.
        let mut buf = [0u8; 256];
        loop {
            match server.read_command(&mut buf) {
                Ok(packet) => {
                    assert_eq!(packet.payload(), b"again");
                    break;
                }
                Err(ChannelError::Disconnected) => continue,
                Err(err) => panic!("unexpected channel error: {err}"),
            }
        }

        handle.join().unwrap();
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn shutdown_is_idempotent_and_safe_when_unset() {
        let dir = unique_temp_dir("shutdown");
        let sock = dir.join("ctl.sock");

        let mut chan = Channel::with_path(&sock);
        chan.shutdown();
        chan.shutdown();

        chan.listen().unwrap();
        assert!(sock.exists());
        chan.shutdown();
        assert!(!sock.exists());
        chan.shutdown();

        // Endpoints are back to the unset state.
        assert!(matches!(chan.send(b"x"), Err(ChannelError::NotConnected)));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn shutdown_skips_replaced_path() {
        let dir = unique_temp_dir("shutdown-race");
        let sock = dir.join("ctl.sock");

        let mut server = Channel::with_path(&sock);
        server.listen().unwrap();

        // Replace the path while the listener is alive.
        std::fs::remove_file(&sock).unwrap();
        std::fs::write(&sock, b"replacement-file").unwrap();

        server.shutdown();
        assert!(
            sock.exists(),
            "shutdown must not remove a path whose inode identity changed"
        );

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn send_returns_full_length() {
        let dir = unique_temp_dir("send-full");
        let sock = dir.join("ctl.sock");

        let mut server = Channel::with_path(&sock);
        server.listen().unwrap();

        let sock_clone = sock.clone();
        let handle = std::thread::spawn(move || {
            let mut client = Channel::with_path(&sock_clone);
            client.connect().unwrap();
            let wire = framed(&[0xA5; 1024]);
            assert_eq!(client.send(&wire).unwrap(), wire.len());
        });

        let mut buf = [0u8; 2048];
        let packet = server.read_command(&mut buf).unwrap();
        assert_eq!(packet.payload().len(), 1024);

        handle.join().unwrap();
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn connect_to_missing_path_reports_not_found() {
        let dir = unique_temp_dir("connect-missing");
        let mut client = Channel::with_path(dir.join("absent.sock"));

        match client.connect() {
            Err(ChannelError::Connect { source, .. }) => {
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("expected Connect error, got {other:?}"),
        }

        let _ = std::fs::remove_dir_all(&dir);
    }
}
