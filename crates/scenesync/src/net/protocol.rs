use bitflags::bitflags;
use rkyv::util::AlignedVec;
use rkyv::{rancor, Archive, Deserialize, Serialize};

use crate::replication::ReplicationSettings;

pub const MAX_PACKET_SIZE: usize = 1200;
/// Largest single message the transport accepts; bigger payloads are chunked.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MessageFlags: u8 {
        const RELIABLE = 1 << 0;
        const ORDERED = 1 << 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    Configure = 1,
    SceneClock,
    Synchronized,
    Ping,
    Pong,
    RemoveObjects,
    AddObjects,
    AddObjectsIncomplete,
    UpdateObjectsReliable,
    UpdateObjectsReliableIncomplete,
    UpdateObjectsUnreliable,
    ObjectsFeedbackUnreliable,
}

impl MessageKind {
    pub fn delivery(self) -> MessageFlags {
        match self {
            MessageKind::Configure | MessageKind::Synchronized => MessageFlags::RELIABLE,
            MessageKind::RemoveObjects
            | MessageKind::AddObjects
            | MessageKind::AddObjectsIncomplete
            | MessageKind::UpdateObjectsReliable
            | MessageKind::UpdateObjectsReliableIncomplete => {
                MessageFlags::RELIABLE | MessageFlags::ORDERED
            }
            MessageKind::SceneClock
            | MessageKind::Ping
            | MessageKind::Pong
            | MessageKind::UpdateObjectsUnreliable
            | MessageKind::ObjectsFeedbackUnreliable => MessageFlags::empty(),
        }
    }

    /// Kind that tags every chunk but the last of a split message.
    pub fn incomplete(self) -> Option<MessageKind> {
        match self {
            MessageKind::AddObjects => Some(MessageKind::AddObjectsIncomplete),
            MessageKind::UpdateObjectsReliable => Some(MessageKind::UpdateObjectsReliableIncomplete),
            _ => None,
        }
    }

    pub fn is_control(self) -> bool {
        matches!(
            self,
            MessageKind::Configure
                | MessageKind::SceneClock
                | MessageKind::Synchronized
                | MessageKind::Ping
                | MessageKind::Pong
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("serialization failed: {0}")]
    Serialize(rancor::Error),
    #[error("deserialization failed: {0}")]
    Deserialize(rancor::Error),
    #[error("{actual:?} payload delivered as {expected:?}")]
    KindMismatch {
        expected: MessageKind,
        actual: MessageKind,
    },
}

/// Handshake and clock traffic. Archived with rkyv.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum ControlMessage {
    Configure {
        magic: u32,
        connection_id: u32,
        settings: ReplicationSettings,
    },
    SceneClock {
        frame: i64,
        timestamp_ms: u64,
        ping_ms: u32,
        input_delay: u32,
    },
    Synchronized {
        magic: u32,
    },
    Ping {
        magic: u32,
        timestamp_ms: u64,
    },
    Pong {
        magic: u32,
        timestamp_ms: u64,
    },
}

impl ControlMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            ControlMessage::Configure { .. } => MessageKind::Configure,
            ControlMessage::SceneClock { .. } => MessageKind::SceneClock,
            ControlMessage::Synchronized { .. } => MessageKind::Synchronized,
            ControlMessage::Ping { .. } => MessageKind::Ping,
            ControlMessage::Pong { .. } => MessageKind::Pong,
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>, ControlError> {
        rkyv::to_bytes::<rancor::Error>(self)
            .map(|aligned| aligned.into_vec())
            .map_err(ControlError::Serialize)
    }

    /// Decodes `data` and checks it really is a message of `kind`.
    pub fn deserialize(kind: MessageKind, data: &[u8]) -> Result<Self, ControlError> {
        // Transport buffers carry no alignment guarantee.
        let mut aligned = AlignedVec::<16>::with_capacity(data.len());
        aligned.extend_from_slice(data);
        let message = rkyv::from_bytes::<Self, rancor::Error>(&aligned)
            .map_err(ControlError::Deserialize)?;
        if message.kind() != kind {
            return Err(ControlError::KindMismatch {
                expected: kind,
                actual: message.kind(),
            });
        }
        Ok(message)
    }
}
