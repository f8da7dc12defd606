use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use log::debug;
use tokio::sync::mpsc;

use super::error::NetworkError;
use crate::raft::NodeId;

/// Point-to-point delivery of encoded frames.
///
/// Implementations must not block: the consensus runtime calls `send` from its
/// event loop.
pub trait Transport: Send + Sync + 'static {
    fn send(&self, to: NodeId, frame: Bytes) -> Result<(), NetworkError>;
}

#[derive(Default)]
struct NetworkState {
    inboxes: HashMap<NodeId, mpsc::UnboundedSender<Bytes>>,
    isolated: HashSet<NodeId>,
}

/// In-process network connecting nodes through unbounded channels.
///
/// Isolating a node drops every frame to or from it, which is how tests and
/// the demo cluster model a partition.
#[derive(Clone, Default)]
pub struct LocalNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers `id` and returns its sending half plus its inbox.
    pub fn register(&self, id: NodeId) -> (LocalTransport, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state().inboxes.insert(id, tx);
        let transport = LocalTransport {
            from: id,
            network: self.clone(),
        };
        (transport, rx)
    }

    pub fn isolate(&self, id: NodeId) {
        self.state().isolated.insert(id);
    }

    pub fn heal(&self, id: NodeId) {
        self.state().isolated.remove(&id);
    }

    pub fn is_isolated(&self, id: NodeId) -> bool {
        self.state().isolated.contains(&id)
    }
}

#[derive(Clone)]
pub struct LocalTransport {
    from: NodeId,
    network: LocalNetwork,
}

impl Transport for LocalTransport {
    fn send(&self, to: NodeId, frame: Bytes) -> Result<(), NetworkError> {
        let state = self.network.state();

        if state.isolated.contains(&self.from) || state.isolated.contains(&to) {
            debug!("Dropping frame {} -> {to}: partitioned", self.from);
            return Ok(());
        }

        let inbox = state.inboxes.get(&to).ok_or(NetworkError::UnknownPeer(to))?;
        inbox.send(frame).map_err(|_| NetworkError::Unreachable(to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivers_frames_between_registered_nodes() {
        let network = LocalNetwork::new();
        let (t1, _rx1) = network.register(1);
        let (_t2, mut rx2) = network.register(2);

        t1.send(2, Bytes::from_static(b"abc")).expect("send");
        assert_eq!(rx2.try_recv().unwrap(), Bytes::from_static(b"abc"));
    }

    #[test]
    fn isolated_nodes_neither_send_nor_receive() {
        let network = LocalNetwork::new();
        let (t1, mut rx1) = network.register(1);
        let (t2, mut rx2) = network.register(2);

        network.isolate(2);
        assert!(network.is_isolated(2));
        t1.send(2, Bytes::from_static(b"x")).expect("dropped silently");
        t2.send(1, Bytes::from_static(b"y")).expect("dropped silently");
        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_err());

        network.heal(2);
        t2.send(1, Bytes::from_static(b"z")).expect("send");
        assert_eq!(rx1.try_recv().unwrap(), Bytes::from_static(b"z"));
    }

    #[test]
    fn unknown_and_closed_peers_are_errors() {
        let network = LocalNetwork::new();
        let (t1, _rx1) = network.register(1);
        assert!(matches!(
            t1.send(9, Bytes::new()),
            Err(NetworkError::UnknownPeer(9))
        ));

        let (_t2, rx2) = network.register(2);
        drop(rx2);
        assert!(matches!(
            t1.send(2, Bytes::new()),
            Err(NetworkError::Unreachable(2))
        ));
    }
}
