use bytes::Bytes;
use log::{debug, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::codec::{decode_message, encode_message};
use super::error::{CodecError, NetworkError};
use super::message::RaftMessage;
use super::transport::Transport;
use crate::raft::{NodeId, PeerRegistry, RaftHandle};

/// Decodes an inbound frame. Malformed frames are logged and returned as
/// errors; the caller drops them.
pub fn route_inbound(frame: &[u8]) -> Result<RaftMessage, CodecError> {
    decode_message(frame).inspect_err(|e| {
        warn!("Dropping inbound frame of {} bytes: {e}", frame.len());
    })
}

/// Forwards every frame arriving on `inbox` to the node behind `handle` until
/// either side goes away.
pub fn spawn_inbound(handle: RaftHandle, mut inbox: mpsc::UnboundedReceiver<Bytes>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = inbox.recv().await {
            match handle.deliver_frame(&frame).await {
                Ok(()) | Err(NetworkError::Codec(_)) => {}
                Err(e) => {
                    debug!("Inbound pump for node {} stopping: {e}", handle.id());
                    break;
                }
            }
        }
    })
}

/// Outbound half of the wire: encodes messages and hands them to the
/// transport. Keeps no buffers between calls.
pub struct RpcDispatcher<T> {
    transport: T,
    peers: PeerRegistry,
}

impl<T: Transport> RpcDispatcher<T> {
    pub fn new(transport: T, peers: PeerRegistry) -> Self {
        Self { transport, peers }
    }

    pub fn send(&self, to: NodeId, message: &RaftMessage) -> Result<(), NetworkError> {
        if to == self.peers.self_id() || !self.peers.contains(to) {
            return Err(NetworkError::UnknownPeer(to));
        }

        debug!("Sending {} to peer {to}: {message:?}", message.kind());
        let frame = encode_message(message);
        self.transport.send(to, frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::message::VoteResponse;
    use crate::network::transport::LocalNetwork;

    #[test]
    fn encodes_outbound_and_decodes_inbound() {
        let network = LocalNetwork::new();
        let (t1, _rx1) = network.register(1);
        let (_t2, mut rx2) = network.register(2);
        let dispatcher = RpcDispatcher::new(t1, PeerRegistry::new(1, [1, 2]));

        let msg: RaftMessage = VoteResponse {
            id: 1,
            term: 4,
            granted: true,
        }
        .into();
        dispatcher.send(2, &msg).expect("send");

        let frame = rx2.try_recv().expect("frame delivered");
        assert_eq!(route_inbound(&frame).unwrap(), msg);
    }

    #[test]
    fn refuses_to_send_to_non_members_or_self() {
        let network = LocalNetwork::new();
        let (t1, _rx1) = network.register(1);
        let dispatcher = RpcDispatcher::new(t1, PeerRegistry::new(1, [1, 2]));
        let msg: RaftMessage = VoteResponse {
            id: 1,
            term: 1,
            granted: false,
        }
        .into();

        assert!(matches!(
            dispatcher.send(3, &msg),
            Err(NetworkError::UnknownPeer(3))
        ));
        assert!(matches!(
            dispatcher.send(1, &msg),
            Err(NetworkError::UnknownPeer(1))
        ));
    }

    #[test]
    fn malformed_inbound_frame_is_an_error() {
        assert!(matches!(
            route_inbound(&[1, 2, 3]),
            Err(CodecError::Truncated { .. })
        ));
    }
}
