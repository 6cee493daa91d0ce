//! Protocol error types.

use thiserror::Error;

/// Errors that can occur while constructing outbound frames.
///
/// Inbound parsing never errors: malformed data is resynchronized past and
/// checksum failures are carried inside the parsed packet (see
/// [`crate::parser::PacketParser`]).
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid IMEI {0:?}: must be exactly 15 ASCII digits")]
    InvalidImei(String),

    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_imei_display() {
        let err = ProtocolError::InvalidImei("12345".to_string());
        let msg = err.to_string();
        assert!(msg.contains("12345"));
        assert!(msg.contains("15 ASCII digits"));
    }

    #[test]
    fn test_payload_too_large_display() {
        let err = ProtocolError::PayloadTooLarge { size: 300, max: 252 };
        let msg = err.to_string();
        assert!(msg.contains("300"));
        assert!(msg.contains("252"));
    }
}
