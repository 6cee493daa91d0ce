//! Relay command dispatch with bounded retry.

use crate::error::RelayError;
use crate::stream::{RelayStream, RelayTarget};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Attempts per dispatched command: the initial send plus one
/// reconnect-and-resend.
pub const MAX_DISPATCH_ATTEMPTS: u32 = 2;

/// Relay transport configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Relay bridge endpoint.
    pub target: RelayTarget,
    /// Dial timeout.
    pub connect_timeout: Duration,
    /// Fixed delay between dispatch attempts.
    pub retry_delay: Duration,
}

impl RelayConfig {
    pub fn new(target: RelayTarget) -> Self {
        Self {
            target,
            connect_timeout: Duration::from_secs(5),
            retry_delay: Duration::from_millis(500),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

struct Inner {
    config: RelayConfig,
    stream: Mutex<Option<RelayStream>>,
    connected: AtomicBool,
}

/// Handle to the relay controller.
///
/// Cheap to clone; all clones share one transport connection. Commands are
/// line-terminated text, the framing the relay firmware reads.
#[derive(Clone)]
pub struct RelayDispatcher {
    inner: Arc<Inner>,
}

impl RelayDispatcher {
    /// Creates a dispatcher (not yet connected; the first send dials).
    pub fn new(config: RelayConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                stream: Mutex::new(None),
                connected: AtomicBool::new(false),
            }),
        }
    }

    /// Whether the transport is currently established.
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Dials the relay bridge.
    pub async fn connect(&self) -> Result<(), RelayError> {
        let stream = tokio::time::timeout(
            self.inner.config.connect_timeout,
            RelayStream::connect(&self.inner.config.target),
        )
        .await
        .map_err(|_| RelayError::Timeout)??;

        let transport = if stream.is_unix() { " (unix)" } else { "" };
        *self.inner.stream.lock().await = Some(stream);
        self.inner.connected.store(true, Ordering::SeqCst);
        debug!("relay connected: {}{}", self.inner.config.target, transport);
        Ok(())
    }

    /// Closes the transport.
    pub async fn disconnect(&self) {
        let mut guard = self.inner.stream.lock().await;
        if let Some(mut stream) = guard.take() {
            stream.shutdown().await.ok();
        }
        self.inner.connected.store(false, Ordering::SeqCst);
    }

    /// Sends one command line, dialing first if needed. Single attempt.
    pub async fn send(&self, text: &str) -> bool {
        match self.try_send(text).await {
            Ok(()) => {
                debug!(command = text, "relay command sent");
                true
            }
            Err(e) => {
                warn!(command = text, error = %e, "relay send failed");
                false
            }
        }
    }

    /// Sends a command with the bounded retry policy: on failure the
    /// transport is torn down, re-dialed after a fixed delay and the
    /// command resent once. Returns whether the command reached the relay.
    pub async fn dispatch(&self, text: &str) -> bool {
        for attempt in 1..=MAX_DISPATCH_ATTEMPTS {
            if self.send(text).await {
                if attempt > 1 {
                    debug!(command = text, attempt, "relay command delivered after retry");
                }
                return true;
            }
            if attempt < MAX_DISPATCH_ATTEMPTS {
                self.disconnect().await;
                tokio::time::sleep(self.inner.config.retry_delay).await;
            }
        }
        warn!(
            command = text,
            "relay dispatch failed after {} attempts", MAX_DISPATCH_ATTEMPTS
        );
        false
    }

    async fn try_send(&self, text: &str) -> Result<(), RelayError> {
        if !self.is_connected() {
            self.connect().await?;
        }

        let mut guard = self.inner.stream.lock().await;
        let stream = guard.as_mut().ok_or(RelayError::NotConnected)?;

        let mut line = Vec::with_capacity(text.len() + 1);
        line.extend_from_slice(text.as_bytes());
        line.push(b'\n');

        if let Err(e) = write_line(stream, &line).await {
            // The stream is broken; drop it so the next attempt re-dials.
            guard.take();
            self.inner.connected.store(false, Ordering::SeqCst);
            return Err(e.into());
        }
        Ok(())
    }
}

async fn write_line(stream: &mut RelayStream, line: &[u8]) -> std::io::Result<()> {
    stream.write_all(line).await?;
    stream.flush().await
}
