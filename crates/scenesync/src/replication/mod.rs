mod clock;
mod replica;
mod replication_state;
mod replicator;
mod settings;
mod shared_state;
mod sync_state;

use crate::net::{CodecError, ConnectionId, ControlError, FramingError, MessageKind};
use crate::objects::{ObjectError, RegistryError};

pub use clock::ObserverClock;
pub use replica::Replica;
pub use replication_state::ReplicationState;
pub use replicator::Replicator;
pub use settings::{ObserverSettings, ReplicationSettings};
pub use shared_state::SharedReplicationState;
pub use sync_state::SynchronizationState;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Control(#[from] ControlError),
    #[error(transparent)]
    Framing(#[from] FramingError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Object(#[from] ObjectError),
    #[error("{kind:?} is not expected {context}")]
    UnexpectedMessage {
        kind: MessageKind,
        context: &'static str,
    },
    #[error("handshake magic {actual:#010x} does not match {expected:#010x}")]
    StaleMagic { expected: u32, actual: u32 },
    #[error("{0} is not synchronized")]
    NotSynchronized(ConnectionId),
    #[error("{0} is not registered")]
    UnknownConnection(ConnectionId),
}
