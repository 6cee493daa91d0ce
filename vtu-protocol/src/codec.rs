//! Field-level encoding primitives for the GT06 wire format.
//!
//! These are the leaf routines everything else is built from: BCD packing
//! for the IMEI, the two checksum algorithms used by GT06 dialects, the
//! fixed-point coordinate scaling, and the 6-byte timestamp encoding.

use crate::error::ProtocolError;
use chrono::{DateTime, Datelike, Timelike, Utc};
use crc::{Crc, CRC_16_IBM_SDLC};

/// CRC16/X25: polynomial 0x8408 bit-reflected, init 0xFFFF, final XOR
/// 0xFFFF. `CRC_16_IBM_SDLC` is this exact algorithm.
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_SDLC);

/// Packs a 15-digit IMEI into 8 BCD bytes.
///
/// The IMEI is left-padded with one '0' digit to 16 digits, then packed two
/// decimal digits per byte, first digit in the high nibble.
pub fn imei_to_bcd(imei: &str) -> Result<[u8; 8], ProtocolError> {
    let digits = imei.as_bytes();
    if digits.len() != 15 || !digits.iter().all(|b| b.is_ascii_digit()) {
        return Err(ProtocolError::InvalidImei(imei.to_string()));
    }

    let mut out = [0u8; 8];
    // out[0] high nibble stays 0 (the pad digit).
    out[0] = digits[0] - b'0';
    for (i, pair) in digits[1..].chunks_exact(2).enumerate() {
        out[i + 1] = ((pair[0] - b'0') << 4) | (pair[1] - b'0');
    }
    Ok(out)
}

/// XOR-fold checksum over a byte span.
pub fn xor_checksum(data: &[u8]) -> u8 {
    data.iter().fold(0, |acc, b| acc ^ b)
}

/// CRC16/X25 over a byte span.
pub fn crc16_x25(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}

/// Scales a coordinate to the GT06 fixed-point representation:
/// `round(|degrees| * 60 * 30000)`. The sign is not part of this field; it
/// travels in the course/status word.
pub fn coordinate_to_fixed(degrees: f64) -> u32 {
    (degrees.abs() * 60.0 * 30000.0).round() as u32
}

/// Encodes a UTC timestamp as the 6 raw binary bytes GT06 uses:
/// year offset from 2000, then month, day, hour, minute, second.
pub fn encode_datetime(ts: DateTime<Utc>) -> [u8; 6] {
    [
        (ts.year() - 2000).clamp(0, 255) as u8,
        ts.month() as u8,
        ts.day() as u8,
        ts.hour() as u8,
        ts.minute() as u8,
        ts.second() as u8,
    ]
}
