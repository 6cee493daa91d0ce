//! Binary frame format for the GT06 wire protocol.
//!
//! Frame layout:
//!
//! ```text
//! +-------+--------+----------+-----------+--------+----------+-------+
//! | start | length | protocol | payload   | serial | checksum | stop  |
//! | 78 78 | 1 byte | 1 byte   | 0..252 B  | 2 B BE | 1 or 2 B | 0D 0A |
//! +-------+--------+----------+-----------+--------+----------+-------+
//! ```
//!
//! `length` counts the protocol, payload and serial bytes. The checksum
//! covers the span from the length byte through the serial field inclusive;
//! its width depends on the dialect (XOR fold or CRC16/X25). The two
//! dialects are not interoperable, so one [`ChecksumKind`] is fixed per
//! connection and shared by builder and parser.

use crate::codec::{crc16_x25, xor_checksum};
use crate::error::ProtocolError;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Start-of-frame marker.
pub const START_MARKER: [u8; 2] = [0x78, 0x78];

/// End-of-frame marker.
pub const STOP_MARKER: [u8; 2] = [0x0D, 0x0A];

/// Maximum payload bytes in one frame: the length byte counts protocol (1)
/// + payload + serial (2), so the payload tops out at 255 - 3.
pub const MAX_PAYLOAD_SIZE: usize = u8::MAX as usize - 3;

/// GT06 protocol numbers used by the Traccar-compatible dialect.
pub mod protocol {
    pub const LOGIN: u8 = 0x01;
    pub const LOCATION: u8 = 0x12;
    pub const HEARTBEAT: u8 = 0x13;
    pub const STRING: u8 = 0x15;
    pub const ALARM: u8 = 0x16;
    pub const COMMAND_RESPONSE: u8 = 0x21;
    pub const LOCATION_LBS_EXTENDED: u8 = 0x22;
    pub const TIME_REQUEST: u8 = 0x32;
    pub const COMMAND: u8 = 0x80;
    pub const INFO: u8 = 0x98;
}

/// Checksum dialect for a GT06 connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecksumKind {
    /// Single-byte XOR fold. The common low-cost tracker dialect.
    #[default]
    Xor,
    /// Two-byte CRC16/X25, big-endian on the wire.
    Crc16X25,
}

impl ChecksumKind {
    /// Width of the checksum field in bytes.
    pub fn width(self) -> usize {
        match self {
            ChecksumKind::Xor => 1,
            ChecksumKind::Crc16X25 => 2,
        }
    }

    /// Checks the stored checksum bytes against a recomputation over `span`.
    pub fn verify(self, span: &[u8], stored: &[u8]) -> bool {
        match self {
            ChecksumKind::Xor => stored.len() == 1 && stored[0] == xor_checksum(span),
            ChecksumKind::Crc16X25 => {
                stored.len() == 2
                    && u16::from_be_bytes([stored[0], stored[1]]) == crc16_x25(span)
            }
        }
    }
}

/// Assembles a complete wire frame around `payload`.
pub fn encode_frame(
    protocol: u8,
    payload: &[u8],
    serial: u16,
    checksum: ChecksumKind,
) -> Result<BytesMut, ProtocolError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD_SIZE,
        });
    }

    let length = (payload.len() + 3) as u8;
    let mut buf = BytesMut::with_capacity(2 + 1 + length as usize + checksum.width() + 2);

    buf.put_slice(&START_MARKER);
    buf.put_u8(length);
    buf.put_u8(protocol);
    buf.put_slice(payload);
    buf.put_u16(serial);

    // Checksum span: length byte through serial inclusive.
    match checksum {
        ChecksumKind::Xor => {
            let c = xor_checksum(&buf[2..]);
            buf.put_u8(c);
        }
        ChecksumKind::Crc16X25 => {
            let c = crc16_x25(&buf[2..]);
            buf.put_u16(c);
        }
    }

    buf.put_slice(&STOP_MARKER);
    Ok(buf)
}

/// A parsed inbound frame.
#[derive(Debug, Clone)]
pub struct ServerPacket {
    /// GT06 protocol number.
    pub protocol: u8,
    /// Payload bytes between the protocol number and the serial field.
    pub payload: Bytes,
    /// Frame serial number.
    pub serial: u16,
    /// Whether the embedded checksum matched a recomputation. Mismatching
    /// packets are still delivered; the session decides the policy.
    pub checksum_valid: bool,
    /// The complete frame as received, markers included.
    pub raw: Bytes,
}
