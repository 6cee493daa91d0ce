//! Relay dispatch error types.

use thiserror::Error;

/// Errors from the relay transport.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("relay connect timeout")]
    Timeout,

    #[error("not connected to relay")]
    NotConnected,

    #[error("invalid relay target {0:?}")]
    InvalidTarget(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(RelayError::Timeout.to_string(), "relay connect timeout");
        assert_eq!(RelayError::NotConnected.to_string(), "not connected to relay");
        assert!(RelayError::InvalidTarget("bogus".into())
            .to_string()
            .contains("bogus"));
    }
}
