//! # vtu-protocol
//!
//! Client-side implementation of the GT06/Concox wire protocol as decoded
//! by Traccar-compatible servers.
//!
//! This crate provides:
//! - Binary framing with start/stop markers and XOR or CRC16/X25 checksums
//! - Outbound packet builders (login, heartbeat, location, alarm, acks)
//! - A resumable parser for the inbound byte stream
//! - Interpretation of remote relay commands

pub mod builder;
pub mod codec;
pub mod command;
pub mod error;
pub mod frame;
pub mod message;
pub mod parser;

pub use builder::{PacketBuilder, SerialCounter};
pub use command::{interpret, Command, CommandKind};
pub use error::ProtocolError;
pub use frame::{
    encode_frame, protocol, ChecksumKind, ServerPacket, MAX_PAYLOAD_SIZE, START_MARKER,
    STOP_MARKER,
};
pub use message::{AlarmType, DeviceStatus, LocationFix};
pub use parser::PacketParser;

/// Default TCP port Traccar listens on for the GT06 protocol.
pub const DEFAULT_PORT: u16 = 5023;
