//! Protocol command names and the outbound lines this client composes itself.

use super::message::Message;

pub const CMD_NICK: &str = "NICK";
pub const CMD_USER: &str = "USER";
pub const CMD_PING: &str = "PING";
pub const CMD_PONG: &str = "PONG";
pub const CMD_QUIT: &str = "QUIT";

/// `RPL_WELCOME`, sent once registration has been accepted.
pub const RPL_WELCOME: &str = "001";

/// Registration lines, in the order the server expects them.
/// The realname is always sent as a trailing parameter.
pub fn registration(nick: &str) -> [String; 2] {
    [
        format!("{CMD_NICK} {nick}"),
        format!("{CMD_USER} {nick} 0 * :{nick}"),
    ]
}

/// Reply to a keep-alive `PING`, echoing its token.
pub fn pong(token: &str) -> Message {
    Message::new(CMD_PONG, [token])
}

pub fn quit(reason: Option<&str>) -> Message {
    match reason {
        Some(reason) => Message::new(CMD_QUIT, [reason]),
        None => Message::new(CMD_QUIT, Vec::<String>::new()),
    }
}

/// Canonical dispatch key for a command: commands are case-insensitive.
pub fn normalize(command: &str) -> String {
    command.to_ascii_uppercase()
}
