use async_trait::async_trait;

use crate::message::Message;

/// Re-exported so callers above this crate never need a direct `libp2p`
/// dependency just to name a peer.
pub type PeerId = libp2p::PeerId;

/// The gossip overlay's interface as the engine sees it. Peer discovery,
/// framing, and message dispatch live entirely behind these three
/// methods; the engine never reaches past them.
#[async_trait]
pub trait PeerNetwork: Send + Sync {
    /// Sends `msg` to every known peer.
    async fn broadcast(&self, msg: Message);

    /// Sends `msg` to exactly one peer.
    async fn send(&self, peer: PeerId, msg: Message);

    /// The current peer set, snapshotted at call time.
    async fn peers(&self) -> Vec<PeerId>;
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    use std::sync::Mutex;

    use super::*;

    /// An in-memory `PeerNetwork` recording every send/broadcast, used by
    /// the engine crate's protocol-handler and scheduler tests instead of
    /// standing up a real `libp2p` swarm.
    #[derive(Default)]
    pub struct RecordingNetwork {
        pub broadcasts: Mutex<Vec<Message>>,
        pub sends: Mutex<Vec<(PeerId, Message)>>,
        pub known_peers: Mutex<Vec<PeerId>>,
    }

    impl RecordingNetwork {
        pub fn with_peers(peers: Vec<PeerId>) -> Self {
            RecordingNetwork {
                broadcasts: Mutex::new(Vec::new()),
                sends: Mutex::new(Vec::new()),
                known_peers: Mutex::new(peers),
            }
        }

        pub fn broadcast_count(&self) -> usize {
            self.broadcasts.lock().unwrap().len()
        }

        pub fn sent_to(&self, peer: &PeerId) -> Vec<Message> {
            self.sends
                .lock()
                .unwrap()
                .iter()
                .filter(|(p, _)| p == peer)
                .map(|(_, m)| m.clone())
                .collect()
        }
    }

    #[async_trait]
    impl PeerNetwork for RecordingNetwork {
        async fn broadcast(&self, msg: Message) {
            self.broadcasts.lock().unwrap().push(msg);
        }

        async fn send(&self, peer: PeerId, msg: Message) {
            self.sends.lock().unwrap().push((peer, msg));
        }

        async fn peers(&self) -> Vec<PeerId> {
            self.known_peers.lock().unwrap().clone()
        }
    }
}
