//! Session lifecycle states and the observable event stream.
//!
//! The session publishes [`SessionEvent`]s on a broadcast channel so that
//! embedders can watch traffic and state transitions without being wired
//! into the connection loop. Events are fire-and-forget: a slow subscriber
//! is lagged, never blocks the session.

use serde::Serialize;
use tokio::sync::broadcast;
use vtu_protocol::{AlarmType, CommandKind};

/// Lifecycle states of a tracker session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No connection, and no attempt in flight.
    Disconnected,
    /// TCP dial in progress.
    Connecting,
    /// Socket established, login not yet sent.
    Connected,
    /// Login sent, waiting for the server acknowledgement.
    LoggingIn,
    /// Login acknowledged. Heartbeat and location reporting are active.
    Online,
    /// Last connection attempt failed. A retry is scheduled.
    Error,
}

/// Events published by the session as it runs.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    PacketSent {
        protocol: u8,
        bytes: usize,
    },
    PacketReceived {
        protocol: u8,
        serial: u16,
        checksum_valid: bool,
    },
    ChecksumMismatch {
        protocol: u8,
        serial: u16,
    },
    CommandReceived {
        kind: CommandKind,
        raw_text: String,
        serial: u16,
    },
    /// A relay dispatch finished, successfully or not.
    RelayDispatched {
        command: String,
        delivered: bool,
    },
    /// A relay command was dropped after exhausting delivery attempts.
    CommandLost {
        command: String,
    },
    AlarmRaised {
        alarm: AlarmType,
    },
    ReconnectScheduled {
        attempt: u32,
        delay_secs: u64,
    },
}

pub(crate) struct EventPublisher {
    sender: broadcast::Sender<SessionEvent>,
}

impl EventPublisher {
    pub(crate) fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Publishes an event. Send errors mean no subscriber is listening,
    /// which is not a failure.
    pub(crate) fn publish(&self, event: SessionEvent) {
        let _ = self.sender.send(event);
    }
}
