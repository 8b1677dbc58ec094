//! Decoding of received packets into one typed value per command.

use transit_core::{CallContext, Command, Payload, Serializer, fields};

/// A received packet, decoded according to the channel it arrived on.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Request(CallContext),
    Response {
        id: String,
        sender: String,
        success: bool,
        data: Payload,
        error: Payload,
    },
    /// HEARTBEAT, INFO and DISCONNECT, handed to the registry as-is.
    Registry {
        command: Command,
        sender: String,
        message: Payload,
    },
    Discover {
        sender: String,
    },
    Ping {
        sender: String,
        time: i64,
    },
    Pong {
        sender: String,
        time: i64,
        arrived: i64,
    },
    Event {
        sender: String,
        event: String,
        data: Payload,
        groups: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedPacket {
    #[error("{command} packet without {field}")]
    MissingField {
        command: Command,
        field: &'static str,
    },
}

impl Incoming {
    pub fn decode(
        command: Command,
        message: Payload,
        serializer: &dyn Serializer,
    ) -> Result<Self, MalformedPacket> {
        let required = |field: &'static str| {
            let value = message.get(field).string();
            if value.is_empty() {
                Err(MalformedPacket::MissingField { command, field })
            } else {
                Ok(value)
            }
        };
        let sender = required(fields::SENDER)?;

        let incoming = match command {
            Command::Req => {
                let context = CallContext::from_payload(serializer, &message).ok_or(
                    MalformedPacket::MissingField {
                        command,
                        field: "id or action",
                    },
                )?;
                Incoming::Request(context)
            }
            Command::Res => Incoming::Response {
                id: required(fields::ID)?,
                sender,
                success: message.get(fields::SUCCESS).bool(),
                data: message.get(fields::DATA),
                error: message.get(fields::ERROR),
            },
            Command::Heartbeat | Command::Info | Command::Disconnect => Incoming::Registry {
                command,
                sender,
                message,
            },
            Command::Discover => Incoming::Discover { sender },
            Command::Ping => Incoming::Ping {
                sender,
                time: message.get(fields::TIME).int64(),
            },
            Command::Pong => Incoming::Pong {
                sender,
                time: message.get(fields::TIME).int64(),
                arrived: message.get(fields::ARRIVED).int64(),
            },
            Command::Event => Incoming::Event {
                sender,
                event: required(fields::EVENT)?,
                data: message.get(fields::DATA),
                groups: message.get(fields::GROUPS).string_array().unwrap_or_default(),
            },
        };
        Ok(incoming)
    }

    pub fn sender(&self) -> &str {
        match self {
            Incoming::Request(context) => context.sender.as_deref().unwrap_or_default(),
            Incoming::Response { sender, .. }
            | Incoming::Registry { sender, .. }
            | Incoming::Discover { sender }
            | Incoming::Ping { sender, .. }
            | Incoming::Pong { sender, .. }
            | Incoming::Event { sender, .. } => sender,
        }
    }
}
