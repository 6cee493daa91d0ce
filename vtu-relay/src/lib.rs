//! # vtu-relay
//!
//! Dispatch path from the tracker session to the physically attached relay
//! controller. The controller sits behind a socket-bridged serial line;
//! this crate owns that transport and the bounded retry policy for
//! forwarding engine-lock commands to it.

pub mod dispatcher;
pub mod error;
pub mod stream;

pub use dispatcher::{RelayConfig, RelayDispatcher, MAX_DISPATCH_ATTEMPTS};
pub use error::RelayError;
pub use stream::{RelayStream, RelayTarget};
