//! Wire messages, their binary codec, and frame delivery between nodes.

pub mod codec;
mod dispatcher;
mod error;
mod message;
mod transport;

pub use self::codec::{
    decode_message, encode_message, BooleanType, DecodeSlot, MessageHeader, WireMessage,
    SCHEMA_ID, SCHEMA_VERSION,
};
pub use self::dispatcher::{route_inbound, spawn_inbound, RpcDispatcher};
pub use self::error::{CodecError, NetworkError};
pub use self::message::{AppendEntries, AppendEntriesResponse, RaftMessage, RequestVote, VoteResponse};
pub use self::transport::{LocalNetwork, LocalTransport, Transport};
