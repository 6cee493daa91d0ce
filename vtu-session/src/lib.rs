//! # vtu-session
//!
//! The tracker session layer: one [`TrackerSession`] impersonates one
//! GT06 device against a Traccar-compatible server. It owns the TCP
//! connection, the login handshake, heartbeat and location cadence,
//! inbound command dispatch to the relay controller and the reconnect
//! policy.
//!
//! Positions come in through a watch channel (see [`location`]); state
//! transitions and traffic are observable through a watch handle and a
//! broadcast event stream.

pub mod config;
pub mod error;
pub mod events;
pub mod location;
pub mod session;
pub mod stats;

pub use config::{Config, ConfigError};
pub use error::SessionError;
pub use events::{SessionEvent, SessionState};
pub use location::{
    location_channel, FixedPosition, LocationReceiver, LocationSender, RoutePlayer,
};
pub use session::{ReconnectPolicy, SessionConfig, TrackerSession};
pub use stats::SessionStats;
