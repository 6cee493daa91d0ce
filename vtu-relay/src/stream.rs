//! Relay transport abstraction.
//!
//! The relay microcontroller is attached over a serial line that the host
//! bridges to a socket (socat or similar), so the dispatcher only ever sees
//! a TCP or Unix-domain stream.

use crate::error::RelayError;
use pin_project_lite::pin_project;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpStream, UnixStream};

/// Where the relay bridge listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayTarget {
    /// `host:port` TCP endpoint.
    Tcp(String),
    /// Unix-domain socket path.
    Unix(PathBuf),
}

impl RelayTarget {
    /// Parses a target string: `unix:/path/to.sock` selects a Unix socket,
    /// anything with a `host:port` shape selects TCP.
    pub fn parse(s: &str) -> Result<Self, RelayError> {
        if let Some(path) = s.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(RelayError::InvalidTarget(s.to_string()));
            }
            return Ok(RelayTarget::Unix(PathBuf::from(path)));
        }
        let addr = s.strip_prefix("tcp://").unwrap_or(s);
        match addr.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                Ok(RelayTarget::Tcp(addr.to_string()))
            }
            _ => Err(RelayError::InvalidTarget(s.to_string())),
        }
    }
}

impl std::fmt::Display for RelayTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelayTarget::Tcp(addr) => write!(f, "tcp://{addr}"),
            RelayTarget::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

pin_project! {
    /// A relay stream over either transport.
    #[project = RelayStreamProj]
    pub enum RelayStream {
        Tcp { #[pin] stream: TcpStream },
        Unix { #[pin] stream: UnixStream },
    }
}

impl RelayStream {
    /// Dials the given target.
    pub async fn connect(target: &RelayTarget) -> io::Result<Self> {
        match target {
            RelayTarget::Tcp(addr) => {
                let stream = TcpStream::connect(addr.as_str()).await?;
                stream.set_nodelay(true).ok();
                Ok(RelayStream::Tcp { stream })
            }
            RelayTarget::Unix(path) => {
                let stream = UnixStream::connect(path).await?;
                Ok(RelayStream::Unix { stream })
            }
        }
    }

    /// Returns whether this stream runs over a Unix socket.
    pub fn is_unix(&self) -> bool {
        matches!(self, RelayStream::Unix { .. })
    }
}

impl AsyncRead for RelayStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.project() {
            RelayStreamProj::Tcp { stream } => stream.poll_read(cx, buf),
            RelayStreamProj::Unix { stream } => stream.poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for RelayStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.project() {
            RelayStreamProj::Tcp { stream } => stream.poll_write(cx, buf),
            RelayStreamProj::Unix { stream } => stream.poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            RelayStreamProj::Tcp { stream } => stream.poll_flush(cx),
            RelayStreamProj::Unix { stream } => stream.poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            RelayStreamProj::Tcp { stream } => stream.poll_shutdown(cx),
            RelayStreamProj::Unix { stream } => stream.poll_shutdown(cx),
        }
    }
}
