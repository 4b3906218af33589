use bytes::{BufMut, BytesMut};

use crate::error::{ChannelError, Result};

/// Packet header: total length (4 bytes, LE), counting the header itself.
pub const HEADER_SIZE: usize = 4;

/// Maximum total packet size representable in the length prefix.
pub const MAX_PACKET_SIZE: usize = u32::MAX as usize;

/// A validated view over one received command packet.
///
/// Wire format:
/// ```text
/// ┌────────────────┬──────────────────────┐
/// │ Length (4B LE) │ Payload              │
/// │ total bytes,   │ (Length - 4 bytes)   │
/// │ incl. header   │                      │
/// └────────────────┴──────────────────────┘
/// ```
///
/// A `Packet` exists only for byte ranges whose declared length exactly
/// equals their actual length; construction via [`Packet::from_wire`] is
/// the sole acceptance check the transport performs.
#[derive(Debug, Clone, Copy)]
pub struct Packet<'a> {
    bytes: &'a [u8],
}

impl<'a> Packet<'a> {
    /// Validate a received byte range as one complete packet.
    ///
    /// Returns `ShortPacket` if the range cannot hold a header, and
    /// `LengthMismatch` if the declared length disagrees with the range
    /// length. Both are retry conditions — see [`ChannelError::is_retry`].
    pub fn from_wire(bytes: &'a [u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(ChannelError::ShortPacket {
                received: bytes.len(),
            });
        }

        let declared = u32::from_le_bytes(bytes[0..HEADER_SIZE].try_into().unwrap());
        if declared as usize != bytes.len() {
            return Err(ChannelError::LengthMismatch {
                declared,
                received: bytes.len(),
            });
        }

        Ok(Self { bytes })
    }

    /// The declared total length, as carried in the header.
    pub fn total_len(&self) -> u32 {
        u32::from_le_bytes(self.bytes[0..HEADER_SIZE].try_into().unwrap())
    }

    /// The payload bytes following the header.
    pub fn payload(&self) -> &'a [u8] {
        &self.bytes[HEADER_SIZE..]
    }

    /// The complete wire form, header included.
    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }
}

/// Encode a payload into the wire format, appending to `dst`.
pub fn encode_packet(payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    let total = HEADER_SIZE + payload.len();
    if total > MAX_PACKET_SIZE {
        return Err(ChannelError::PacketTooLarge {
            size: total,
            max: MAX_PACKET_SIZE,
        });
    }
    dst.reserve(total);
    dst.put_u32_le(total as u32);
    dst.put_slice(payload);
    Ok(())
}
