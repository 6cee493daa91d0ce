//! Outbound packet construction.
//!
//! [`PacketBuilder`] owns the frame serial counter and the checksum dialect
//! for one connection. Every build embeds the current serial and advances
//! the counter, except [`PacketBuilder::command_ack`], which echoes the
//! serial of the command being acknowledged.

use crate::codec::{coordinate_to_fixed, encode_datetime, imei_to_bcd};
use crate::error::ProtocolError;
use crate::frame::{encode_frame, protocol, ChecksumKind, MAX_PAYLOAD_SIZE};
use crate::message::{AlarmType, DeviceStatus, LocationFix};
use bytes::{BufMut, BytesMut};

/// Frame serial counter: lives in 1..=0xFFFF and never emits 0.
#[derive(Debug)]
pub struct SerialCounter(u16);

impl SerialCounter {
    pub fn new() -> Self {
        Self(1)
    }

    /// The serial the next frame will carry.
    pub fn current(&self) -> u16 {
        self.0
    }

    /// Returns the current value and advances, wrapping 0xFFFF to 1.
    pub fn next(&mut self) -> u16 {
        let value = self.0;
        self.0 = if self.0 == u16::MAX { 1 } else { self.0 + 1 };
        value
    }
}

impl Default for SerialCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds ready-to-transmit GT06 frames.
pub struct PacketBuilder {
    serial: SerialCounter,
    checksum: ChecksumKind,
}

impl PacketBuilder {
    pub fn new(checksum: ChecksumKind) -> Self {
        Self {
            serial: SerialCounter::new(),
            checksum,
        }
    }

    /// The serial the next built frame will carry.
    pub fn next_serial(&self) -> u16 {
        self.serial.current()
    }

    /// Login frame (0x01): payload is the 8-byte BCD IMEI.
    pub fn login(&mut self, imei: &str) -> Result<BytesMut, ProtocolError> {
        let bcd = imei_to_bcd(imei)?;
        let serial = self.serial.next();
        encode_frame(protocol::LOGIN, &bcd, serial, self.checksum)
    }

    /// Heartbeat frame (0x13): status byte, voltage level, GSM signal and
    /// the two alarm bytes (code + language marker).
    pub fn heartbeat(&mut self, status: &DeviceStatus) -> Result<BytesMut, ProtocolError> {
        let mut payload = BytesMut::with_capacity(5);
        payload.put_u8(status.status_byte());
        payload.put_u8(status.voltage_level.min(6));
        payload.put_u8(status.gsm_signal.min(4));
        payload.put_u8(status.alarm.code());
        payload.put_u8(0x01);

        let serial = self.serial.next();
        encode_frame(protocol::HEARTBEAT, &payload, serial, self.checksum)
    }

    /// Location frame (0x12): timestamp, satellites, coordinates, speed and
    /// the course/status word.
    pub fn location(&mut self, fix: &LocationFix) -> Result<BytesMut, ProtocolError> {
        let mut payload = BytesMut::with_capacity(18);
        put_geo_fields(&mut payload, fix);
        payload.put_u16(course_status(fix));

        let serial = self.serial.next();
        encode_frame(protocol::LOCATION, &payload, serial, self.checksum)
    }

    /// Alarm frame (0x16): the location fields, four reserved bytes, the
    /// course/status word and the alarm code.
    pub fn alarm(&mut self, alarm: AlarmType, fix: &LocationFix) -> Result<BytesMut, ProtocolError> {
        let mut payload = BytesMut::with_capacity(23);
        put_geo_fields(&mut payload, fix);
        payload.put_slice(&[0u8; 4]);
        payload.put_u16(course_status(fix));
        payload.put_u8(alarm.code());

        let serial = self.serial.next();
        encode_frame(protocol::ALARM, &payload, serial, self.checksum)
    }

    /// Command acknowledgement (0x80): empty payload, serial echoed from
    /// the inbound command frame. Does not advance the counter.
    pub fn command_ack(&self, serial: u16) -> Result<BytesMut, ProtocolError> {
        encode_frame(protocol::COMMAND, &[], serial, self.checksum)
    }

    /// Freeform command response (0x21): ASCII text reporting the outcome
    /// of a server command back upstream.
    pub fn command_response(&mut self, text: &str) -> Result<BytesMut, ProtocolError> {
        if text.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: text.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let serial = self.serial.next();
        encode_frame(protocol::COMMAND_RESPONSE, text.as_bytes(), serial, self.checksum)
    }
}

fn put_geo_fields(payload: &mut BytesMut, fix: &LocationFix) {
    payload.put_slice(&encode_datetime(fix.timestamp));
    payload.put_u8(fix.satellites);
    payload.put_u32(coordinate_to_fixed(fix.latitude));
    payload.put_u32(coordinate_to_fixed(fix.longitude));
    payload.put_u8(fix.speed_kmh.round().clamp(0.0, 255.0) as u8);
}

/// Course/status word: bits 0..=9 course in degrees, bit 10 latitude is
/// negative, bit 11 longitude is negative, bit 12 fix is valid.
fn course_status(fix: &LocationFix) -> u16 {
    let course = fix.course_deg.rem_euclid(360.0).round() as u16;
    let mut word = course & 0x03FF;
    if fix.latitude < 0.0 {
        word |= 1 << 10;
    }
    if fix.longitude < 0.0 {
        word |= 1 << 11;
    }
    if fix.valid {
        word |= 1 << 12;
    }
    word
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::PacketParser;
    use chrono::{TimeZone, Utc};

    const IMEI: &str = "357152040915004";

    fn test_fix() -> LocationFix {
        LocationFix {
            latitude: -23.55052,
            longitude: -46.633308,
            speed_kmh: 57.3,
            course_deg: 123.0,
            accuracy_m: Some(4.5),
            satellites: 9,
            timestamp: Utc.with_ymd_and_hms(2024, 6, 15, 10, 30, 45).unwrap(),
            valid: true,
        }
    }

    fn parse_one(frame: &[u8]) -> crate::frame::ServerPacket {
        let mut parser = PacketParser::new(ChecksumKind::Xor);
        parser.extend(frame);
        let packet = parser.next_packet().expect("complete frame");
        assert_eq!(parser.buffered(), 0);
        packet
    }

    #[test]
    fn test_login_roundtrip() {
        let mut builder = PacketBuilder::new(ChecksumKind::Xor);
        let frame = builder.login(IMEI).unwrap();

        let packet = parse_one(&frame);
        assert_eq!(packet.protocol, protocol::LOGIN);
        assert_eq!(packet.payload.as_ref(), &imei_to_bcd(IMEI).unwrap());
        assert_eq!(packet.serial, 1);
        assert!(packet.checksum_valid);
    }

    #[test]
    fn test_login_rejects_bad_imei() {
        let mut builder = PacketBuilder::new(ChecksumKind::Xor);
        assert!(builder.login("not-an-imei").is_err());
        // A failed build must not burn a serial.
        assert_eq!(builder.next_serial(), 1);
    }

    #[test]
    fn test_heartbeat_payload() {
        let mut builder = PacketBuilder::new(ChecksumKind::Xor);
        let status = DeviceStatus {
            acc_on: true,
            gps_positioned: true,
            voltage_level: 5,
            gsm_signal: 3,
            alarm: AlarmType::Normal,
        };
        let frame = builder.heartbeat(&status).unwrap();

        let packet = parse_one(&frame);
        assert_eq!(packet.protocol, protocol::HEARTBEAT);
        assert_eq!(packet.payload.as_ref(), &[0b0100_0011, 5, 3, 0x00, 0x01]);
        assert!(packet.checksum_valid);
    }

    #[test]
    fn test_heartbeat_clamps_levels() {
        let mut builder = PacketBuilder::new(ChecksumKind::Xor);
        let status = DeviceStatus {
            voltage_level: 200,
            gsm_signal: 99,
            ..DeviceStatus::default()
        };
        let frame = builder.heartbeat(&status).unwrap();
        let packet = parse_one(&frame);
        assert_eq!(packet.payload[1], 6);
        assert_eq!(packet.payload[2], 4);
    }

    #[test]
    fn test_location_payload_layout() {
        let mut builder = PacketBuilder::new(ChecksumKind::Xor);
        let fix = test_fix();
        let frame = builder.location(&fix).unwrap();

        let packet = parse_one(&frame);
        assert_eq!(packet.protocol, protocol::LOCATION);
        let p = packet.payload.as_ref();
        assert_eq!(p.len(), 18);
        assert_eq!(&p[0..6], &[24, 6, 15, 10, 30, 45]);
        assert_eq!(p[6], 9);
        assert_eq!(
            u32::from_be_bytes([p[7], p[8], p[9], p[10]]),
            coordinate_to_fixed(fix.latitude)
        );
        assert_eq!(
            u32::from_be_bytes([p[11], p[12], p[13], p[14]]),
            coordinate_to_fixed(fix.longitude)
        );
        assert_eq!(p[15], 57);

        let word = u16::from_be_bytes([p[16], p[17]]);
        assert_eq!(word & 0x03FF, 123);
        assert_ne!(word & (1 << 10), 0, "latitude south flag");
        assert_ne!(word & (1 << 11), 0, "longitude west flag");
        assert_ne!(word & (1 << 12), 0, "gps valid flag");
    }

    #[test]
    fn test_location_northern_hemisphere_flags_clear() {
        let mut builder = PacketBuilder::new(ChecksumKind::Xor);
        let fix = LocationFix {
            latitude: 52.52,
            longitude: 13.405,
            ..test_fix()
        };
        let frame = builder.location(&fix).unwrap();
        let packet = parse_one(&frame);
        let p = packet.payload.as_ref();
        let word = u16::from_be_bytes([p[16], p[17]]);
        assert_eq!(word & (1 << 10), 0);
        assert_eq!(word & (1 << 11), 0);
    }

    #[test]
    fn test_location_speed_clamped() {
        let mut builder = PacketBuilder::new(ChecksumKind::Xor);
        let fix = LocationFix {
            speed_kmh: 300.0,
            ..test_fix()
        };
        let frame = builder.location(&fix).unwrap();
        let packet = parse_one(&frame);
        assert_eq!(packet.payload[15], 255);
    }

    #[test]
    fn test_alarm_payload_layout() {
        let mut builder = PacketBuilder::new(ChecksumKind::Xor);
        let fix = test_fix();
        let frame = builder.alarm(AlarmType::Sos, &fix).unwrap();

        let packet = parse_one(&frame);
        assert_eq!(packet.protocol, protocol::ALARM);
        let p = packet.payload.as_ref();
        assert_eq!(p.len(), 23);
        assert_eq!(&p[16..20], &[0, 0, 0, 0]);
        assert_eq!(p[22], AlarmType::Sos.code());
        assert!(packet.checksum_valid);
    }

    #[test]
    fn test_command_ack_echoes_serial() {
        let mut builder = PacketBuilder::new(ChecksumKind::Xor);
        builder.login(IMEI).unwrap();
        assert_eq!(builder.next_serial(), 2);

        let frame = builder.command_ack(0x4321).unwrap();
        let packet = parse_one(&frame);
        assert_eq!(packet.protocol, protocol::COMMAND);
        assert!(packet.payload.is_empty());
        assert_eq!(packet.serial, 0x4321);
        // The ack must not consume a serial of our own.
        assert_eq!(builder.next_serial(), 2);
    }

    #[test]
    fn test_command_response_roundtrip() {
        let mut builder = PacketBuilder::new(ChecksumKind::Xor);
        let frame = builder.command_response("RELAY,1# OK").unwrap();
        let packet = parse_one(&frame);
        assert_eq!(packet.protocol, protocol::COMMAND_RESPONSE);
        assert_eq!(packet.payload.as_ref(), b"RELAY,1# OK");
    }

    #[test]
    fn test_command_response_too_large() {
        let mut builder = PacketBuilder::new(ChecksumKind::Xor);
        let text = "x".repeat(MAX_PAYLOAD_SIZE + 1);
        assert!(builder.command_response(&text).is_err());
        assert_eq!(builder.next_serial(), 1);
    }

    #[test]
    fn test_serial_increments_per_build() {
        let mut builder = PacketBuilder::new(ChecksumKind::Xor);
        let f1 = builder.login(IMEI).unwrap();
        let f2 = builder.heartbeat(&DeviceStatus::default()).unwrap();
        let f3 = builder.location(&test_fix()).unwrap();

        assert_eq!(parse_one(&f1).serial, 1);
        assert_eq!(parse_one(&f2).serial, 2);
        assert_eq!(parse_one(&f3).serial, 3);
    }

    #[test]
    fn test_serial_wraps_skipping_zero() {
        let mut counter = SerialCounter::new();
        for _ in 0..0xFFFE {
            counter.next();
        }
        assert_eq!(counter.next(), 0xFFFF);
        // The 0x10000th value is 1 again, never 0.
        assert_eq!(counter.next(), 1);
        assert_eq!(counter.next(), 2);
    }

    #[test]
    fn test_all_builders_verify_under_crc16() {
        let mut builder = PacketBuilder::new(ChecksumKind::Crc16X25);
        let mut parser = PacketParser::new(ChecksumKind::Crc16X25);

        parser.extend(&builder.login(IMEI).unwrap());
        parser.extend(&builder.heartbeat(&DeviceStatus::default()).unwrap());
        parser.extend(&builder.location(&test_fix()).unwrap());
        parser.extend(&builder.alarm(AlarmType::PowerCut, &test_fix()).unwrap());
        parser.extend(&builder.command_ack(9).unwrap());

        for _ in 0..5 {
            let packet = parser.next_packet().expect("complete frame");
            assert!(packet.checksum_valid);
        }
        assert!(parser.next_packet().is_none());
    }
}
