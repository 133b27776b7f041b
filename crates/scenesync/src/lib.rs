pub mod net;
pub mod objects;
pub mod replication;
pub mod time;

pub use net::{
    ByteReader, ByteWriter, CodecError, Connection, ConnectionId, ControlError, ControlMessage,
    FramingError, InboundMessage, InboundQueue, Link, LinkConnection, LinkSimulation, LinkStats,
    MessageBatcher, MessageFlags, MessageKind, MessageReassembler, MessageSink, OutgoingMessage,
    MAX_MESSAGE_SIZE, MAX_PACKET_SIZE,
};
pub use objects::{
    DeltaMask, Interpolate, NetworkObject, ObjectError, ObjectFactory, ObjectId, ObjectMode,
    ObjectRegistry, RegistryError, RegistryEvent, Relevance, ReplicatedObject, Scene,
    TransformObject, TypeTag, ValueTrace,
};
pub use replication::{
    ObserverClock, ObserverSettings, ProtocolError, Replica, ReplicationSettings,
    ReplicationState, Replicator, SharedReplicationState, SynchronizationState,
};
pub use time::{
    frame_delta, InputStats, NetworkFrame, NetworkTime, SoftTime, SoftTimeSettings, SoftTimeStep,
    StabilizedMaxFilter, TickSynchronizer, TrimmedMeanFilter,
};
