use serde::Serialize;
use std::fmt;

/// Wire names for distributed-trace transport types, indexed by code.
pub const TRANSPORT_TYPE_NAMES: [&str; 9] = [
    "Unknown", "HTTP", "HTTPS", "Kafka", "JMS", "IronMQ", "AMQP", "Queue", "Other",
];

/// How an inbound distributed-trace payload arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[repr(i32)]
pub enum TransportType {
    #[default]
    Unknown = 0,
    Http = 1,
    Https = 2,
    Kafka = 3,
    Jms = 4,
    IronMq = 5,
    Amqp = 6,
    Queue = 7,
    Other = 8,
}

impl TransportType {
    /// Wire name of this transport type.
    pub fn as_str(self) -> &'static str {
        sanitize_transport_code(self as i32)
    }

    /// Maps a raw code to its variant; unmapped codes become `Unknown`.
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => Self::Http,
            2 => Self::Https,
            3 => Self::Kafka,
            4 => Self::Jms,
            5 => Self::IronMq,
            6 => Self::Amqp,
            7 => Self::Queue,
            8 => Self::Other,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire name for a raw transport code; anything outside the table is `"Unknown"`.
pub fn sanitize_transport_code(code: i32) -> &'static str {
    usize::try_from(code)
        .ok()
        .and_then(|index| TRANSPORT_TYPE_NAMES.get(index))
        .copied()
        .unwrap_or(TRANSPORT_TYPE_NAMES[0])
}
