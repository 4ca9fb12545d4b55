//! The gossip-overlay collaborator: wire message types, the
//! `PeerNetwork` trait the engine calls `broadcast`/`send`/`peers` on, and
//! one concrete `libp2p` implementation of it.

pub mod message;
pub mod peer;
pub mod swarm;

pub use message::Message;
pub use peer::{PeerId, PeerNetwork};
pub use swarm::{InboundEvent, NetworkError, SwarmNetwork};

/// Re-exported so callers above this crate never need a direct `libp2p`
/// dependency just to name a dial target.
pub type Multiaddr = libp2p::Multiaddr;
