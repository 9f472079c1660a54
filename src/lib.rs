//! Single-connection IRC client core.
//!
//! Connects to one server, registers, and hands back a [`irc::Connection`]
//! whose inbound traffic is routed per command and whose keep-alive pings are
//! answered automatically.

pub mod config;
pub mod irc;
pub mod logging;
