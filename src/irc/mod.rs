//! IRC protocol layer: wire format, command routing, and the live connection.

pub mod commands;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod message;
pub mod signal;

pub use connection::{connect, Connection, Connector, Outbound};
pub use error::{ConnectError, DispatchError, SendError};
pub use message::{Message, ParseError};
pub use signal::ClosedSignal;
