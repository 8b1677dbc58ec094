//! Protocol commands and wire field names.
//!
//! Every packet travels on a channel named after its command. The body is a
//! flat map; the keys below are shared by every implementation of the
//! protocol and must not change.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Logical message kind, selecting the channel and the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Command {
    /// Action invocation.
    Req,
    /// Action result, correlated to a prior `Req` by `id`.
    Res,
    /// Liveness and load signal.
    Heartbeat,
    /// "Who are you" probe.
    Discover,
    /// Node self-description.
    Info,
    /// Latency probe.
    Ping,
    /// Latency reply.
    Pong,
    /// Graceful node departure.
    Disconnect,
    /// Broadcast or group event.
    Event,
}

impl Command {
    pub const ALL: [Command; 9] = [
        Command::Req,
        Command::Res,
        Command::Heartbeat,
        Command::Discover,
        Command::Info,
        Command::Ping,
        Command::Pong,
        Command::Disconnect,
        Command::Event,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Req => "REQ",
            Command::Res => "RES",
            Command::Heartbeat => "HEARTBEAT",
            Command::Discover => "DISCOVER",
            Command::Info => "INFO",
            Command::Ping => "PING",
            Command::Pong => "PONG",
            Command::Disconnect => "DISCONNECT",
            Command::Event => "EVENT",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Command::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| UnknownCommand(s.to_string()))
    }
}

/// A command name that is not part of the protocol.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown command: {0}")]
pub struct UnknownCommand(pub String);

/// Body keys.
pub mod fields {
    pub const SENDER: &str = "sender";
    pub const ID: &str = "id";
    pub const ACTION: &str = "action";
    pub const PARAMS: &str = "params";
    pub const META: &str = "meta";
    pub const SUCCESS: &str = "success";
    pub const DATA: &str = "data";
    pub const ERROR: &str = "error";
    pub const CPU: &str = "cpu";
    pub const CPU_SEQ: &str = "cpuSeq";
    pub const TIME: &str = "time";
    pub const ARRIVED: &str = "arrived";
    pub const EVENT: &str = "event";
    pub const GROUPS: &str = "groups";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_parse_back() {
        for command in Command::ALL {
            assert_eq!(command.as_str().parse::<Command>(), Ok(command));
        }
        assert!("req".parse::<Command>().is_err());
    }

    #[test]
    fn serde_uses_wire_names() {
        assert_eq!(
            serde_json::to_string(&Command::Heartbeat).unwrap(),
            "\"HEARTBEAT\""
        );
        let parsed: Command = serde_json::from_str("\"DISCONNECT\"").unwrap();
        assert_eq!(parsed, Command::Disconnect);
    }
}
