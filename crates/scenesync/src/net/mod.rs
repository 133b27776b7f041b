mod codec;
mod connection;
mod framing;
mod inbound;
mod link;
mod protocol;

pub use codec::{ByteReader, ByteWriter, CodecError};
pub use connection::{Connection, ConnectionId, MessageSink, OutgoingMessage};
pub use framing::{
    send_bounded_message, send_large_message, split_message, FramingError, MessageBatcher,
    MessageReassembler,
};
pub use inbound::{InboundMessage, InboundQueue};
pub(crate) use link::random_u64;
pub use link::{Link, LinkConnection, LinkSimulation, LinkStats};
pub use protocol::{
    ControlError, ControlMessage, MessageFlags, MessageKind, MAX_MESSAGE_SIZE, MAX_PACKET_SIZE,
};
