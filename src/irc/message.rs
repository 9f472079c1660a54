//! IRC wire-line parsing and serialization.
//!
//! Inbound lines follow
//!   [`:`prefix SP] command [SP middle]* [SP `:`trailing]
//! with at most 14 middle parameters before the optional trailing one.
//! Every line on the wire ends with CR-LF, in both directions.

use std::fmt;
use std::str::FromStr;

/// Line terminator used on the wire, inbound and outbound.
pub const LINE_TERMINATOR: &str = "\r\n";

/// Maximum number of parameters a message may carry.
pub const MAX_PARAMS: usize = 15;

/// Longest inbound line accepted, terminator included.
pub const MAX_LINE_LENGTH: usize = 8191;

const MAX_MIDDLE_PARAMS: usize = MAX_PARAMS - 1;

/// A parsed IRC message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    /// Origin of the message (`server.name` or `nick!user@host`).
    pub prefix: Option<String>,
    /// Command name or three-digit numeric reply.
    pub command: String,
    /// Parameters. Only the last one may contain spaces.
    pub params: Vec<String>,
}

/// Reasons a single inbound line cannot be turned into a [`Message`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("line is not terminated by CRLF")]
    Unterminated,
    #[error("line exceeds maximum length ({MAX_LINE_LENGTH} bytes)")]
    TooLong,
    #[error("empty message")]
    Empty,
    #[error("missing command")]
    MissingCommand,
}

impl Message {
    pub fn new<I, S>(command: impl Into<String>, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefix: None,
            command: command.into(),
            params: params.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse one wire line. The line must end with `\r\n`.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        if line.len() > MAX_LINE_LENGTH {
            return Err(ParseError::TooLong);
        }
        let body = line
            .strip_suffix(LINE_TERMINATOR)
            .ok_or(ParseError::Unterminated)?;
        Self::parse_body(body)
    }

    fn parse_body(body: &str) -> Result<Self, ParseError> {
        if body.is_empty() {
            return Err(ParseError::Empty);
        }

        let tokens: Vec<&str> = body.split(' ').collect();
        let mut rest = tokens.as_slice();

        let mut prefix = None;
        if let Some((first, tail)) = rest.split_first() {
            if let Some(p) = first.strip_prefix(':') {
                prefix = Some(p.to_owned());
                rest = tail;
            }
        }

        let (command, tail) = rest.split_first().ok_or(ParseError::MissingCommand)?;
        if command.is_empty() {
            return Err(ParseError::MissingCommand);
        }
        rest = tail;

        let mut params = Vec::new();
        while let Some((token, tail)) = rest.split_first() {
            if params.len() == MAX_MIDDLE_PARAMS || token.starts_with(':') {
                break;
            }
            rest = tail;
            // Runs of spaces between middles leave empty tokens behind.
            if !token.is_empty() {
                params.push((*token).to_owned());
            }
        }

        // Whatever is left is one final parameter, spacing preserved.
        if let Some((first, tail)) = rest.split_first() {
            let head = match first.strip_prefix(':') {
                Some(stripped) => Some(stripped),
                None if rest.iter().all(|t| t.is_empty()) => None,
                None => Some(*first),
            };
            if let Some(head) = head {
                let mut trailing = head.to_owned();
                for token in tail {
                    trailing.push(' ');
                    trailing.push_str(token);
                }
                params.push(trailing);
            }
        }

        Ok(Message {
            prefix,
            command: (*command).to_owned(),
            params,
        })
    }

    /// Serialize to the wire form, without the terminator.
    ///
    /// The last parameter is written with a leading `:` only when the
    /// grammar needs one: it is empty, contains a space, or starts with `:`.
    pub fn to_wire(&self) -> String {
        let mut out = String::new();

        if let Some(prefix) = &self.prefix {
            out.push(':');
            out.push_str(prefix);
            out.push(' ');
        }

        out.push_str(&self.command);

        if let Some((last, middles)) = self.params.split_last() {
            for param in middles {
                out.push(' ');
                out.push_str(param);
            }
            out.push(' ');
            if needs_trailing_marker(last) {
                out.push(':');
            }
            out.push_str(last);
        }

        out
    }

    /// Parameter at `index`, if present.
    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }
}

fn needs_trailing_marker(param: &str) -> bool {
    param.is_empty() || param.contains(' ') || param.starts_with(':')
}

/// Terminate an outbound line for the wire.
pub fn frame(line: &str) -> String {
    let mut framed = String::with_capacity(line.len() + LINE_TERMINATOR.len());
    framed.push_str(line);
    framed.push_str(LINE_TERMINATOR);
    framed
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire())
    }
}

impl FromStr for Message {
    type Err = ParseError;

    /// Lenient entry point: the terminator is optional.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_body(s.strip_suffix(LINE_TERMINATOR).unwrap_or(s))
    }
}
