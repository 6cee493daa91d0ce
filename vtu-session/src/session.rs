//! The tracker session state machine.
//!
//! A [`TrackerSession`] owns one logical device identity and drives its
//! whole lifetime against the fleet server: dial, login, periodic
//! heartbeat and location reporting, inbound command dispatch to the relay
//! controller, and reconnection with capped exponential backoff.
//!
//! All outbound frames are written from the connection task, so frame
//! bytes never interleave on the socket. Relay dispatch runs on its own
//! task and reports back through a channel; the socket read loop is never
//! blocked by a slow relay.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};
use vtu_protocol::{
    interpret, protocol, AlarmType, ChecksumKind, DeviceStatus, LocationFix, PacketBuilder,
    PacketParser, ServerPacket, DEFAULT_PORT,
};
use vtu_relay::RelayDispatcher;

use crate::error::SessionError;
use crate::events::{EventPublisher, SessionEvent, SessionState};
use crate::location::LocationReceiver;
use crate::stats::SessionStats;

/// Socket read buffer size.
const READ_BUFFER_SIZE: usize = 8192;

/// Capacity of the event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Longest command snippet echoed in a 0x21 response, in bytes.
const RESPONSE_SNIPPET_LEN: usize = 64;

/// Runtime session settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Server hostname or IP address.
    pub server_addr: String,
    /// Server TCP port.
    pub server_port: u16,
    /// 15-digit device IMEI sent in the login frame.
    pub imei: String,
    /// Interval between heartbeat frames while online.
    pub heartbeat_interval: Duration,
    /// Interval between location frames while online.
    pub location_interval: Duration,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Checksum algorithm for both directions.
    pub checksum: ChecksumKind,
    /// Reconnect backoff.
    pub reconnect: ReconnectPolicy,
}

impl SessionConfig {
    pub fn new(server_addr: impl Into<String>, imei: impl Into<String>) -> Self {
        Self {
            server_addr: server_addr.into(),
            server_port: DEFAULT_PORT,
            imei: imei.into(),
            heartbeat_interval: Duration::from_secs(30),
            location_interval: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(15),
            checksum: ChecksumKind::Xor,
            reconnect: ReconnectPolicy::default(),
        }
    }

    pub fn with_server_port(mut self, port: u16) -> Self {
        self.server_port = port;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_location_interval(mut self, interval: Duration) -> Self {
        self.location_interval = interval;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_checksum(mut self, checksum: ChecksumKind) -> Self {
        self.checksum = checksum;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    fn validate(&self) -> Result<(), SessionError> {
        if self.server_addr.trim().is_empty() {
            return Err(SessionError::InvalidConfig(
                "server address must not be empty".to_string(),
            ));
        }
        if self.imei.len() != 15 || !self.imei.bytes().all(|b| b.is_ascii_digit()) {
            return Err(SessionError::InvalidConfig(format!(
                "IMEI must be exactly 15 digits, got {:?}",
                self.imei
            )));
        }
        if self.heartbeat_interval.is_zero() || self.location_interval.is_zero() {
            return Err(SessionError::InvalidConfig(
                "reporting intervals must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Reconnect backoff: the delay doubles per consecutive failed attempt,
/// capped at `max_delay`. A connection that was actually established
/// resets the progression.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.initial_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }
}

enum Control {
    Disconnect,
    TriggerAlarm(AlarmType),
}

/// Result of one relay dispatch, reported back to the connection task.
struct RelayOutcome {
    command: String,
    delivered: bool,
}

/// How one connection lifetime ended.
enum ConnectionOutcome {
    /// `disconnect()` was called. The session is finished.
    UserDisconnect,
    /// The dial failed or timed out.
    ConnectFailed,
    /// An established connection was lost (EOF or I/O error).
    Lost,
}

/// A software GT06 tracker: one device identity, one server connection.
pub struct TrackerSession {
    config: SessionConfig,
    relay: RelayDispatcher,
    location_rx: LocationReceiver,
    state_tx: watch::Sender<SessionState>,
    events: EventPublisher,
    stats: Arc<Mutex<SessionStats>>,
    control_tx: mpsc::UnboundedSender<Control>,
    control_rx: Mutex<Option<mpsc::UnboundedReceiver<Control>>>,
}

impl TrackerSession {
    /// Creates a session. Fails synchronously if the configuration is
    /// unusable; network problems are handled later by the reconnect loop.
    pub fn new(
        config: SessionConfig,
        relay: RelayDispatcher,
        location_rx: LocationReceiver,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        Ok(Self {
            config,
            relay,
            location_rx,
            state_tx,
            events: EventPublisher::new(EVENT_CHANNEL_CAPACITY),
            stats: Arc::new(Mutex::new(SessionStats::default())),
            control_tx,
            control_rx: Mutex::new(Some(control_rx)),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Subscribes to the session event stream.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Watch handle for state transitions.
    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub fn current_state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// Snapshot of the traffic counters.
    pub fn stats(&self) -> SessionStats {
        self.stats.lock().clone()
    }

    /// Ends the session. `run` returns once the socket is closed; the
    /// session cannot be restarted afterwards.
    pub fn disconnect(&self) {
        let _ = self.control_tx.send(Control::Disconnect);
    }

    /// Sends an alarm frame with the current position. A no-op unless the
    /// session is online.
    pub fn trigger_alarm(&self, alarm: AlarmType) {
        let _ = self.control_tx.send(Control::TriggerAlarm(alarm));
    }

    /// Drives the session until [`disconnect`](Self::disconnect) is
    /// called. Connections are re-established with capped exponential
    /// backoff; connection failures never surface as errors here.
    pub async fn run(&self) -> Result<(), SessionError> {
        let state = self.current_state();
        if !matches!(state, SessionState::Disconnected | SessionState::Error) {
            warn!(state = ?state, "session already running, ignoring");
            return Ok(());
        }
        let mut control_rx = self.control_rx.lock().take().ok_or(SessionError::Closed)?;

        // The serial counter spans reconnects within one run.
        let mut builder = PacketBuilder::new(self.config.checksum);
        let mut attempt: u32 = 0;

        info!(
            imei = %self.config.imei,
            server = %self.config.server_addr,
            port = self.config.server_port,
            "tracker session starting"
        );

        loop {
            self.set_state(SessionState::Connecting);
            let outcome = self.run_connection(&mut builder, &mut control_rx).await?;

            match outcome {
                ConnectionOutcome::UserDisconnect => {
                    self.finish();
                    return Ok(());
                }
                ConnectionOutcome::ConnectFailed => {
                    self.set_state(SessionState::Error);
                    attempt += 1;
                }
                ConnectionOutcome::Lost => {
                    self.set_state(SessionState::Disconnected);
                    attempt = 1;
                }
            }

            let delay = self.config.reconnect.delay_for(attempt);
            self.events.publish(SessionEvent::ReconnectScheduled {
                attempt,
                delay_secs: delay.as_secs(),
            });
            info!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "reconnecting after delay"
            );

            let sleep = tokio::time::sleep(delay);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    _ = &mut sleep => break,
                    Some(control) = control_rx.recv() => match control {
                        Control::Disconnect => {
                            self.finish();
                            return Ok(());
                        }
                        Control::TriggerAlarm(alarm) => {
                            debug!(alarm = ?alarm, "not online, alarm ignored");
                        }
                    },
                }
            }
        }
    }

    /// One connection lifetime: dial, login, report, until the peer or
    /// the user ends it.
    async fn run_connection(
        &self,
        builder: &mut PacketBuilder,
        control_rx: &mut mpsc::UnboundedReceiver<Control>,
    ) -> Result<ConnectionOutcome, SessionError> {
        let addr = format!("{}:{}", self.config.server_addr, self.config.server_port);
        debug!(addr = %addr, "connecting");

        let dial = tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(&addr));
        tokio::pin!(dial);
        let mut stream = loop {
            tokio::select! {
                result = &mut dial => match result {
                    Ok(Ok(stream)) => break stream,
                    Ok(Err(e)) => {
                        warn!(addr = %addr, error = %e, "connect failed");
                        return Ok(ConnectionOutcome::ConnectFailed);
                    }
                    Err(_) => {
                        warn!(
                            addr = %addr,
                            timeout_secs = self.config.connect_timeout.as_secs(),
                            "connect timed out"
                        );
                        return Ok(ConnectionOutcome::ConnectFailed);
                    }
                },
                Some(control) = control_rx.recv() => match control {
                    Control::Disconnect => return Ok(ConnectionOutcome::UserDisconnect),
                    Control::TriggerAlarm(alarm) => {
                        debug!(alarm = ?alarm, "not online, alarm ignored");
                    }
                },
            }
        };
        stream.set_nodelay(true).ok();

        info!(addr = %addr, "connected");
        self.set_state(SessionState::Connected);
        self.stats.lock().mark_connected();

        let mut parser = PacketParser::new(self.config.checksum);
        let mut online = false;

        let frame = builder.login(&self.config.imei)?;
        if self
            .send_frame(&mut stream, &frame, protocol::LOGIN)
            .await
            .is_err()
        {
            return Ok(ConnectionOutcome::Lost);
        }
        self.set_state(SessionState::LoggingIn);

        // Both tickers exist from the start but their fires are ignored
        // until the login is acknowledged; they are reset at that point so
        // the periods run from the online transition.
        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut location_tick = tokio::time::interval(self.config.location_interval);
        location_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let (relay_tx, mut relay_rx) = mpsc::unbounded_channel::<RelayOutcome>();
        let mut read_buf = [0u8; READ_BUFFER_SIZE];

        loop {
            tokio::select! {
                biased;

                Some(control) = control_rx.recv() => match control {
                    Control::Disconnect => {
                        stream.shutdown().await.ok();
                        return Ok(ConnectionOutcome::UserDisconnect);
                    }
                    Control::TriggerAlarm(alarm) => {
                        if !online {
                            debug!(alarm = ?alarm, "not online, alarm ignored");
                        } else if let Some(fix) = self.reportable_fix() {
                            let frame = builder.alarm(alarm, &fix)?;
                            if self
                                .send_frame(&mut stream, &frame, protocol::ALARM)
                                .await
                                .is_err()
                            {
                                return Ok(ConnectionOutcome::Lost);
                            }
                            info!(alarm = ?alarm, "alarm sent");
                            self.events.publish(SessionEvent::AlarmRaised { alarm });
                        } else {
                            warn!(alarm = ?alarm, "no usable fix, alarm not sent");
                        }
                    }
                },

                Some(outcome) = relay_rx.recv() => {
                    self.events.publish(SessionEvent::RelayDispatched {
                        command: outcome.command.clone(),
                        delivered: outcome.delivered,
                    });
                    if !outcome.delivered {
                        warn!(command = %outcome.command, "relay command lost");
                        self.events.publish(SessionEvent::CommandLost {
                            command: outcome.command.clone(),
                        });
                    }
                    let text = response_text(&outcome.command, outcome.delivered);
                    // A response that cannot be framed is dropped, never
                    // fatal; the peer must not be able to end the session.
                    match builder.command_response(&text) {
                        Ok(frame) => {
                            if self
                                .send_frame(&mut stream, &frame, protocol::COMMAND_RESPONSE)
                                .await
                                .is_err()
                            {
                                return Ok(ConnectionOutcome::Lost);
                            }
                        }
                        Err(e) => warn!(error = %e, "command response dropped"),
                    }
                }

                result = stream.read(&mut read_buf) => match result {
                    Ok(0) => {
                        info!("server closed the connection");
                        return Ok(ConnectionOutcome::Lost);
                    }
                    Ok(n) => {
                        trace!(bytes = n, "received");
                        parser.extend(&read_buf[..n]);
                    }
                    Err(e) => {
                        warn!(error = %e, "read failed");
                        return Ok(ConnectionOutcome::Lost);
                    }
                },

                _ = heartbeat.tick() => {
                    if online {
                        let status = self.device_status();
                        let frame = builder.heartbeat(&status)?;
                        if self
                            .send_frame(&mut stream, &frame, protocol::HEARTBEAT)
                            .await
                            .is_err()
                        {
                            return Ok(ConnectionOutcome::Lost);
                        }
                    }
                }

                _ = location_tick.tick() => {
                    if online {
                        if let Some(fix) = self.reportable_fix() {
                            let frame = builder.location(&fix)?;
                            if self
                                .send_frame(&mut stream, &frame, protocol::LOCATION)
                                .await
                                .is_err()
                            {
                                return Ok(ConnectionOutcome::Lost);
                            }
                        } else {
                            debug!("no usable fix, skipping location report");
                        }
                    }
                }
            }

            // Drain every complete frame buffered so far.
            while let Some(packet) = parser.next_packet() {
                self.note_packet(&packet);

                match packet.protocol {
                    protocol::LOGIN => {
                        if online {
                            debug!("duplicate login acknowledgement");
                            continue;
                        }
                        online = true;
                        self.set_state(SessionState::Online);
                        info!(serial = packet.serial, "login acknowledged, session online");
                        heartbeat.reset();
                        location_tick.reset();
                        // First report goes out right away.
                        if let Some(fix) = self.reportable_fix() {
                            let frame = builder.location(&fix)?;
                            if self
                                .send_frame(&mut stream, &frame, protocol::LOCATION)
                                .await
                                .is_err()
                            {
                                return Ok(ConnectionOutcome::Lost);
                            }
                        }
                    }
                    protocol::COMMAND => {
                        let command = interpret(&packet.payload, packet.serial);
                        info!(
                            kind = ?command.kind,
                            text = %command.raw_text,
                            serial = command.serial,
                            "server command"
                        );
                        self.stats.lock().note_command();
                        self.events.publish(SessionEvent::CommandReceived {
                            kind: command.kind,
                            raw_text: command.raw_text.clone(),
                            serial: command.serial,
                        });

                        // Acknowledge first, echoing the server serial,
                        // even for commands we cannot interpret.
                        let ack = builder.command_ack(command.serial)?;
                        if self
                            .send_frame(&mut stream, &ack, protocol::COMMAND)
                            .await
                            .is_err()
                        {
                            return Ok(ConnectionOutcome::Lost);
                        }

                        // Dispatch off the read path; the outcome comes
                        // back through relay_rx for the 0x21 response.
                        let relay = self.relay.clone();
                        let results = relay_tx.clone();
                        let text = command.relay_text().to_string();
                        tokio::spawn(async move {
                            let delivered = relay.dispatch(&text).await;
                            let _ = results.send(RelayOutcome {
                                command: text,
                                delivered,
                            });
                        });
                    }
                    protocol::HEARTBEAT => {
                        trace!(serial = packet.serial, "heartbeat acknowledged");
                    }
                    other => {
                        debug!(
                            serial = packet.serial,
                            "unhandled server frame, protocol {other:#04x}"
                        );
                    }
                }
            }
        }
    }

    async fn send_frame(
        &self,
        stream: &mut TcpStream,
        frame: &[u8],
        proto: u8,
    ) -> std::io::Result<()> {
        if let Err(e) = stream.write_all(frame).await {
            warn!(error = %e, "write failed, protocol {proto:#04x}");
            return Err(e);
        }
        trace!(
            bytes = frame.len(),
            "sent protocol {:#04x}: {}",
            proto,
            hex::encode(frame)
        );
        self.stats.lock().note_sent(proto);
        self.events.publish(SessionEvent::PacketSent {
            protocol: proto,
            bytes: frame.len(),
        });
        Ok(())
    }

    fn note_packet(&self, packet: &ServerPacket) {
        self.stats.lock().note_received(packet.checksum_valid);
        trace!(
            serial = packet.serial,
            "received protocol {:#04x}: {}",
            packet.protocol,
            hex::encode(&packet.raw)
        );
        self.events.publish(SessionEvent::PacketReceived {
            protocol: packet.protocol,
            serial: packet.serial,
            checksum_valid: packet.checksum_valid,
        });
        if !packet.checksum_valid {
            self.events.publish(SessionEvent::ChecksumMismatch {
                protocol: packet.protocol,
                serial: packet.serial,
            });
        }
    }

    /// Latest fix from the feed, if it is worth reporting.
    fn reportable_fix(&self) -> Option<LocationFix> {
        let fix = self.location_rx.borrow().clone();
        fix.filter(LocationFix::is_reportable)
    }

    fn device_status(&self) -> DeviceStatus {
        DeviceStatus {
            acc_on: true,
            gps_positioned: self.reportable_fix().is_some(),
            ..DeviceStatus::default()
        }
    }

    fn set_state(&self, to: SessionState) {
        let from = self.state_tx.send_replace(to);
        if from != to {
            debug!(from = ?from, to = ?to, "session state changed");
            self.events.publish(SessionEvent::StateChanged { from, to });
        }
    }

    fn finish(&self) {
        self.set_state(SessionState::Disconnected);
        self.stats.lock().reset();
        info!("session stopped");
    }
}

/// Builds the 0x21 response body. The command snippet is truncated by
/// bytes on a char boundary, so the response always fits a frame payload
/// whatever the server sent.
fn response_text(command: &str, delivered: bool) -> String {
    let mut cut = command.len().min(RESPONSE_SNIPPET_LEN);
    while !command.is_char_boundary(cut) {
        cut -= 1;
    }
    let verdict = if delivered { "OK" } else { "FAILED" };
    format!("{} {verdict}", &command[..cut])
}
