use std::fmt;

use serde::{Deserialize, Serialize};

use super::protocol::{MessageFlags, MessageKind, MAX_MESSAGE_SIZE};

/// Transport-assigned connection handle. Zero means "no connection".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(u32);

impl ConnectionId {
    pub fn new(raw: u32) -> Option<Self> {
        (raw != 0).then_some(Self(raw))
    }

    pub fn to_raw(self) -> u32 {
        self.0
    }

    pub fn raw_or_zero(id: Option<ConnectionId>) -> u32 {
        id.map_or(0, ConnectionId::to_raw)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "connection {}", self.0)
    }
}

/// Anything that accepts outgoing messages. Fire-and-forget.
pub trait MessageSink {
    fn send_message(&mut self, kind: MessageKind, payload: &[u8], flags: MessageFlags);
}

/// Transport-side endpoint of one peer.
pub trait Connection: MessageSink + Send {
    fn id(&self) -> ConnectionId;

    /// Monotonic local clock used for round-trip measurements.
    fn local_time_ms(&self) -> u64;

    fn max_message_size(&self) -> usize {
        MAX_MESSAGE_SIZE
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub kind: MessageKind,
    pub payload: Vec<u8>,
    pub flags: MessageFlags,
}

impl MessageSink for Vec<OutgoingMessage> {
    fn send_message(&mut self, kind: MessageKind, payload: &[u8], flags: MessageFlags) {
        self.push(OutgoingMessage {
            kind,
            payload: payload.to_vec(),
            flags,
        });
    }
}
