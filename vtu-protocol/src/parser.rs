//! Resumable parser for the inbound GT06 byte stream.
//!
//! TCP delivers no message boundaries, so the parser owns a receive buffer
//! that persists across reads: bytes are appended with [`PacketParser::extend`]
//! and complete frames drained with [`PacketParser::next_packet`]. Malformed
//! data never errors out; the parser logs and resynchronizes on the next
//! start marker.

use crate::frame::{ChecksumKind, ServerPacket, START_MARKER, STOP_MARKER};
use bytes::{Buf, Bytes, BytesMut};
use tracing::{trace, warn};

/// Bytes scanned for a start marker before leading garbage is dropped.
const SCAN_BOUND: usize = 512;

/// Incremental frame extractor over one connection's byte stream.
pub struct PacketParser {
    buffer: BytesMut,
    checksum: ChecksumKind,
}

impl PacketParser {
    pub fn new(checksum: ChecksumKind) -> Self {
        Self {
            buffer: BytesMut::with_capacity(2048),
            checksum,
        }
    }

    /// Appends newly received bytes to the receive buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drops all buffered bytes, e.g. when the connection is torn down.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Attempts to extract the next complete frame from the buffer.
    ///
    /// Returns `None` when no complete frame is buffered yet; already
    /// received partial data stays put for the next call. Frames whose
    /// checksum does not verify are still returned, flagged through
    /// [`ServerPacket::checksum_valid`].
    pub fn next_packet(&mut self) -> Option<ServerPacket> {
        loop {
            let start = match find_marker(&self.buffer) {
                Some(pos) => pos,
                None => {
                    // Keep the last byte: it may be the first half of a
                    // marker split across reads.
                    if self.buffer.len() > SCAN_BOUND {
                        let dropped = self.buffer.len() - 1;
                        warn!(dropped, "no start marker in receive buffer, dropping leading bytes");
                        self.buffer.advance(dropped);
                    }
                    return None;
                }
            };

            if start > 0 {
                warn!(skipped = start, "skipping bytes before start marker");
                self.buffer.advance(start);
            }

            // Marker is now at offset 0. Wait for the length byte.
            if self.buffer.len() < 3 {
                return None;
            }
            let length = self.buffer[2] as usize;
            if length < 3 {
                // Too short to hold protocol + serial; spurious marker.
                warn!(length, "frame length below minimum, resynchronizing");
                self.buffer.advance(1);
                continue;
            }

            let frame_len = 2 + 1 + length + self.checksum.width() + 2;
            if self.buffer.len() < frame_len {
                trace!(
                    have = self.buffer.len(),
                    need = frame_len,
                    "incomplete frame, waiting for more data"
                );
                return None;
            }

            if self.buffer[frame_len - 2..frame_len] != STOP_MARKER {
                warn!("bad stop marker, resynchronizing");
                self.buffer.advance(1);
                continue;
            }

            let raw = self.buffer.split_to(frame_len).freeze();
            return Some(self.unpack(raw, length));
        }
    }

    fn unpack(&self, raw: Bytes, length: usize) -> ServerPacket {
        let span = &raw[2..3 + length];
        let stored = &raw[3 + length..3 + length + self.checksum.width()];
        let checksum_valid = self.checksum.verify(span, stored);
        if !checksum_valid {
            warn!(protocol = raw[3], "checksum mismatch on inbound frame");
        }

        ServerPacket {
            protocol: raw[3],
            payload: raw.slice(4..1 + length),
            serial: u16::from_be_bytes([raw[1 + length], raw[2 + length]]),
            checksum_valid,
            raw,
        }
    }
}

fn find_marker(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == START_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::PacketBuilder;
    use crate::frame::{encode_frame, protocol};

    fn command_frame(text: &str, serial: u16) -> BytesMut {
        encode_frame(protocol::COMMAND, text.as_bytes(), serial, ChecksumKind::Xor).unwrap()
    }

    #[test]
    fn test_frame_split_across_chunks() {
        let frame = command_frame("Relay,1#", 0x0042);
        let mut parser = PacketParser::new(ChecksumKind::Xor);

        parser.extend(&frame[..5]);
        assert!(parser.next_packet().is_none());
        assert_eq!(parser.buffered(), 5);

        parser.extend(&frame[5..]);
        let packet = parser.next_packet().expect("frame completed");
        assert_eq!(packet.protocol, protocol::COMMAND);
        assert_eq!(packet.payload.as_ref(), b"Relay,1#");
        assert_eq!(packet.serial, 0x0042);
        assert!(packet.checksum_valid);
        assert_eq!(parser.buffered(), 0);
    }

    #[test]
    fn test_two_frames_one_chunk() {
        let mut data = command_frame("first", 1);
        data.extend_from_slice(&command_frame("second", 2));

        let mut parser = PacketParser::new(ChecksumKind::Xor);
        parser.extend(&data);

        let p1 = parser.next_packet().unwrap();
        assert_eq!(p1.payload.as_ref(), b"first");
        assert_eq!(p1.serial, 1);

        let p2 = parser.next_packet().unwrap();
        assert_eq!(p2.payload.as_ref(), b"second");
        assert_eq!(p2.serial, 2);

        assert!(parser.next_packet().is_none());
    }

    #[test]
    fn test_garbage_before_marker_skipped() {
        let mut data = BytesMut::from(&[0xDE, 0xAD, 0xBE, 0xEF][..]);
        data.extend_from_slice(&command_frame("ok", 7));

        let mut parser = PacketParser::new(ChecksumKind::Xor);
        parser.extend(&data);

        let packet = parser.next_packet().unwrap();
        assert_eq!(packet.payload.as_ref(), b"ok");
    }

    #[test]
    fn test_corrupt_checksum_still_delivered() {
        let mut frame = command_frame("Relay,0#", 3);
        let checksum_at = frame.len() - 3;
        frame[checksum_at] ^= 0xFF;

        let mut parser = PacketParser::new(ChecksumKind::Xor);
        parser.extend(&frame);

        let packet = parser.next_packet().expect("delivered despite checksum");
        assert!(!packet.checksum_valid);
        assert_eq!(packet.payload.as_ref(), b"Relay,0#");
    }

    #[test]
    fn test_bad_stop_marker_resyncs_to_next_frame() {
        let mut broken = command_frame("broken", 1);
        let last = broken.len() - 1;
        broken[last] = 0x00;
        broken.extend_from_slice(&command_frame("good", 2));

        let mut parser = PacketParser::new(ChecksumKind::Xor);
        parser.extend(&broken);

        let packet = parser.next_packet().expect("recovered frame");
        assert_eq!(packet.payload.as_ref(), b"good");
        assert_eq!(packet.serial, 2);
    }

    #[test]
    fn test_empty_payload_frame() {
        let frame = encode_frame(protocol::COMMAND, &[], 9, ChecksumKind::Xor).unwrap();
        let mut parser = PacketParser::new(ChecksumKind::Xor);
        parser.extend(&frame);

        let packet = parser.next_packet().unwrap();
        assert_eq!(packet.protocol, protocol::COMMAND);
        assert!(packet.payload.is_empty());
        assert_eq!(packet.serial, 9);
        assert!(packet.checksum_valid);
    }

    #[test]
    fn test_markerless_garbage_trimmed_to_last_byte() {
        let mut parser = PacketParser::new(ChecksumKind::Xor);
        parser.extend(&vec![0x11u8; SCAN_BOUND + 40]);
        assert!(parser.next_packet().is_none());
        assert_eq!(parser.buffered(), 1);
    }

    #[test]
    fn test_split_marker_survives_trim() {
        let mut parser = PacketParser::new(ChecksumKind::Xor);
        let mut garbage = vec![0x00u8; SCAN_BOUND + 10];
        garbage.push(0x78);
        parser.extend(&garbage);
        assert!(parser.next_packet().is_none());

        // The second marker byte and the rest of the frame arrive later.
        let frame = command_frame("late", 5);
        parser.extend(&frame[1..]);
        let packet = parser.next_packet().expect("marker reassembled");
        assert_eq!(packet.payload.as_ref(), b"late");
    }

    #[test]
    fn test_crc16_frame_roundtrip() {
        let frame =
            encode_frame(protocol::COMMAND, b"Relay,1#", 11, ChecksumKind::Crc16X25).unwrap();
        let mut parser = PacketParser::new(ChecksumKind::Crc16X25);
        parser.extend(&frame);

        let packet = parser.next_packet().unwrap();
        assert!(packet.checksum_valid);
        assert_eq!(packet.serial, 11);
    }

    #[test]
    fn test_raw_preserves_entire_frame() {
        let frame = command_frame("raw", 4);
        let mut parser = PacketParser::new(ChecksumKind::Xor);
        parser.extend(&frame);
        let packet = parser.next_packet().unwrap();
        assert_eq!(packet.raw.as_ref(), frame.as_ref());
    }

    #[test]
    fn test_clear_drops_partial_data() {
        let frame = command_frame("partial", 1);
        let mut parser = PacketParser::new(ChecksumKind::Xor);
        parser.extend(&frame[..6]);
        parser.clear();
        assert_eq!(parser.buffered(), 0);

        // A fresh complete frame parses normally afterwards.
        parser.extend(&command_frame("fresh", 2));
        assert_eq!(parser.next_packet().unwrap().payload.as_ref(), b"fresh");
    }

    #[test]
    fn test_login_frame_from_builder_parses() {
        let mut builder = PacketBuilder::new(ChecksumKind::Xor);
        let frame = builder.login("357152040915004").unwrap();

        let mut parser = PacketParser::new(ChecksumKind::Xor);
        parser.extend(&frame);
        let packet = parser.next_packet().unwrap();
        assert_eq!(packet.protocol, protocol::LOGIN);
        assert_eq!(packet.payload.len(), 8);
    }
}
