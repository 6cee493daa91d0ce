//! Session traffic counters.

use std::time::{Duration, Instant};

use vtu_protocol::protocol;

/// Counters for one tracker session.
///
/// Reset on every successful connect and again on user disconnect, so the
/// numbers always describe the current (or just-ended) connection.
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub heartbeats_sent: u64,
    pub locations_sent: u64,
    pub alarms_sent: u64,
    pub commands_received: u64,
    pub checksum_failures: u64,
    pub connected_since: Option<Instant>,
    pub last_activity: Option<Instant>,
}

impl SessionStats {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub(crate) fn mark_connected(&mut self) {
        self.reset();
        let now = Instant::now();
        self.connected_since = Some(now);
        self.last_activity = Some(now);
    }

    pub(crate) fn note_sent(&mut self, proto: u8) {
        self.packets_sent += 1;
        match proto {
            protocol::HEARTBEAT => self.heartbeats_sent += 1,
            protocol::LOCATION => self.locations_sent += 1,
            protocol::ALARM => self.alarms_sent += 1,
            _ => {}
        }
        self.last_activity = Some(Instant::now());
    }

    pub(crate) fn note_received(&mut self, checksum_valid: bool) {
        self.packets_received += 1;
        if !checksum_valid {
            self.checksum_failures += 1;
        }
        self.last_activity = Some(Instant::now());
    }

    pub(crate) fn note_command(&mut self) {
        self.commands_received += 1;
    }

    /// Time since the connection was established, if one is up.
    pub fn uptime(&self) -> Option<Duration> {
        self.connected_since.map(|t| t.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_sent_classifies_by_protocol() {
        let mut stats = SessionStats::default();
        stats.note_sent(protocol::LOGIN);
        stats.note_sent(protocol::HEARTBEAT);
        stats.note_sent(protocol::HEARTBEAT);
        stats.note_sent(protocol::LOCATION);
        stats.note_sent(protocol::ALARM);

        assert_eq!(stats.packets_sent, 5);
        assert_eq!(stats.heartbeats_sent, 2);
        assert_eq!(stats.locations_sent, 1);
        assert_eq!(stats.alarms_sent, 1);
        assert!(stats.last_activity.is_some());
    }

    #[test]
    fn test_note_received_counts_checksum_failures() {
        let mut stats = SessionStats::default();
        stats.note_received(true);
        stats.note_received(false);
        stats.note_received(true);

        assert_eq!(stats.packets_received, 3);
        assert_eq!(stats.checksum_failures, 1);
    }

    #[test]
    fn test_mark_connected_resets_counters() {
        let mut stats = SessionStats::default();
        stats.note_sent(protocol::HEARTBEAT);
        stats.note_command();
        stats.mark_connected();

        assert_eq!(stats.packets_sent, 0);
        assert_eq!(stats.commands_received, 0);
        assert!(stats.connected_since.is_some());
        assert!(stats.uptime().is_some());
    }

    #[test]
    fn test_reset_clears_connection_marker() {
        let mut stats = SessionStats::default();
        stats.mark_connected();
        stats.reset();
        assert!(stats.connected_since.is_none());
        assert!(stats.uptime().is_none());
    }
}
