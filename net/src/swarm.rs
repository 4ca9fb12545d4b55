//! The one concrete `PeerNetwork`: a `libp2p` swarm combining gossipsub
//! (for `broadcast`) with request-response (for `send`) behind one
//! composed `NetworkBehaviour`, for this subsystem's six message kinds.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use libp2p::{
    gossipsub::{self, IdentTopic, MessageAuthenticity, ValidationMode},
    identify, identity,
    request_response::{self, ProtocolSupport},
    swarm::{NetworkBehaviour, SwarmEvent},
    tcp, noise, yamux, PeerId, StreamProtocol, Swarm, Transport,
};
use tokio::sync::mpsc;

use crate::message::Message;
use crate::peer::PeerNetwork;

#[derive(thiserror::Error, Debug)]
pub enum NetworkError {
    #[error("gossipsub config error: {0}")]
    GossipsubConfig(String),
    #[error("gossipsub init error: {0}")]
    GossipsubInit(String),
    #[error("transport/noise error: {0}")]
    Transport(String),
    #[error("multiaddr parse error: {0}")]
    Multiaddr(#[from] libp2p::multiaddr::Error),
    #[error("listen error: {0}")]
    Listen(#[from] libp2p::TransportError<std::io::Error>),
}

pub type Codec = request_response::cbor::codec::Codec<Message, ()>;

#[derive(NetworkBehaviour)]
pub struct ReplicationBehaviour {
    pub gossipsub: gossipsub::Behaviour,
    pub identify: identify::Behaviour,
    pub request_response: request_response::Behaviour<Codec>,
}

/// Events surfaced to the engine's protocol handler once a message has
/// been decoded off the wire.
#[derive(Debug)]
pub enum InboundEvent {
    Message { from: PeerId, message: Message },
    PeerConnected(PeerId),
    PeerDisconnected(PeerId),
}

/// Commands the engine sends to drive outbound traffic; processed on the
/// swarm's own task, since the `Swarm` itself is driven from a single
/// spawned task rather than shared across threads.
enum Command {
    Broadcast(Message),
    Send(PeerId, Message),
    Dial(libp2p::Multiaddr),
}

const PROTOCOL: StreamProtocol = StreamProtocol::new("/storagesync/1.0.0");
const TOPIC_NAME: &str = "storagesync/replication";

pub struct SwarmNetwork {
    cmd_tx: mpsc::UnboundedSender<Command>,
    peers: std::sync::Arc<tokio::sync::Mutex<HashSet<PeerId>>>,
}

impl SwarmNetwork {
    /// Builds the swarm, spawns its drive loop, and returns the handle
    /// plus a stream of decoded inbound events for the engine to consume.
    pub fn spawn(
        listen_addr: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<InboundEvent>), NetworkError> {
        let local_key = identity::Keypair::generate_ed25519();
        let local_peer_id = PeerId::from(local_key.public());

        let gossipsub_config = gossipsub::ConfigBuilder::default()
            .heartbeat_interval(Duration::from_secs(1))
            .validation_mode(ValidationMode::Strict)
            .message_id_fn(|message| {
                let hash = storagesync_core::digest(&message.data);
                gossipsub::MessageId::from(hash.as_bytes().to_vec())
            })
            .build()
            .map_err(|e| NetworkError::GossipsubConfig(e.to_string()))?;

        let gossipsub = gossipsub::Behaviour::new(
            MessageAuthenticity::Signed(local_key.clone()),
            gossipsub_config,
        )
        .map_err(|e| NetworkError::GossipsubInit(e.to_string()))?;

        let identify = identify::Behaviour::new(identify::Config::new(
            "/storagesync/1.0.0".to_string(),
            local_key.public(),
        ));

        let request_response = request_response::Behaviour::new(
            [(PROTOCOL, ProtocolSupport::Full)],
            request_response::Config::default(),
        );

        let behaviour = ReplicationBehaviour {
            gossipsub,
            identify,
            request_response,
        };

        let transport = tcp::tokio::Transport::default()
            .upgrade(libp2p::core::upgrade::Version::V1)
            .authenticate(noise::Config::new(&local_key).map_err(|e| NetworkError::Transport(e.to_string()))?)
            .multiplex(yamux::Config::default())
            .boxed();

        let mut swarm = Swarm::new(
            transport,
            behaviour,
            local_peer_id,
            libp2p::swarm::Config::with_tokio_executor(),
        );

        let topic = IdentTopic::new(TOPIC_NAME);
        swarm
            .behaviour_mut()
            .gossipsub
            .subscribe(&topic)
            .map_err(|e| NetworkError::GossipsubInit(e.to_string()))?;

        let listen_multiaddr: libp2p::Multiaddr = listen_addr.parse()?;
        swarm.listen_on(listen_multiaddr)?;

        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<Command>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<InboundEvent>();
        let peers = std::sync::Arc::new(tokio::sync::Mutex::new(HashSet::new()));
        let peers_for_task = peers.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = swarm.select_next_some() => {
                        handle_swarm_event(&mut swarm, event, &topic, &peers_for_task, &event_tx).await;
                    }
                    Some(cmd) = cmd_rx.recv() => {
                        match cmd {
                            Command::Broadcast(msg) => {
                                if let Ok(bytes) = storagesync_core::encode(&msg) {
                                    if let Err(e) = swarm.behaviour_mut().gossipsub.publish(topic.clone(), bytes) {
                                        tracing::debug!(error = %e, "broadcast publish failed, no subscribed peers yet");
                                    }
                                }
                            }
                            Command::Send(peer, msg) => {
                                swarm.behaviour_mut().request_response.send_request(&peer, msg);
                            }
                            Command::Dial(addr) => {
                                if let Err(e) = swarm.dial(addr.clone()) {
                                    tracing::warn!(addr = %addr, error = %e, "dial failed");
                                }
                            }
                        }
                    }
                }
            }
        });

        Ok((SwarmNetwork { cmd_tx, peers }, event_rx))
    }

    /// Dials a bootstrap peer by multiaddr. Fire-and-forget: connection
    /// outcome surfaces later as a `SwarmEvent::ConnectionEstablished` (or
    /// is logged and dropped on failure) rather than being awaited here,
    /// matching every other `Command` on this channel.
    pub fn dial(&self, addr: libp2p::Multiaddr) {
        let _ = self.cmd_tx.send(Command::Dial(addr));
    }
}

async fn handle_swarm_event(
    swarm: &mut Swarm<ReplicationBehaviour>,
    event: SwarmEvent<ReplicationBehaviourEvent>,
    topic: &IdentTopic,
    peers: &std::sync::Arc<tokio::sync::Mutex<HashSet<PeerId>>>,
    event_tx: &mpsc::UnboundedSender<InboundEvent>,
) {
    match event {
        SwarmEvent::Behaviour(ReplicationBehaviourEvent::Gossipsub(gossipsub::Event::Message {
            propagation_source,
            message,
            ..
        })) => {
            if let Ok(msg) = storagesync_core::decode::<Message>(&message.data) {
                let _ = event_tx.send(InboundEvent::Message {
                    from: propagation_source,
                    message: msg,
                });
            } else {
                tracing::debug!("dropping malformed gossipsub message");
            }
        }
        SwarmEvent::Behaviour(ReplicationBehaviourEvent::RequestResponse(
            request_response::Event::Message { peer, message, .. },
        )) => match message {
            request_response::Message::Request { request, channel, .. } => {
                let _ = event_tx.send(InboundEvent::Message {
                    from: peer,
                    message: request,
                });
                let _ = swarm
                    .behaviour_mut()
                    .request_response
                    .send_response(channel, ());
            }
            request_response::Message::Response { .. } => {}
        },
        SwarmEvent::Behaviour(ReplicationBehaviourEvent::Identify(identify::Event::Received {
            peer_id,
            ..
        })) => {
            swarm.behaviour_mut().gossipsub.add_explicit_peer(&peer_id);
        }
        SwarmEvent::ConnectionEstablished { peer_id, .. } => {
            peers.lock().await.insert(peer_id);
            let _ = event_tx.send(InboundEvent::PeerConnected(peer_id));
        }
        SwarmEvent::ConnectionClosed { peer_id, .. } => {
            peers.lock().await.remove(&peer_id);
            let _ = event_tx.send(InboundEvent::PeerDisconnected(peer_id));
        }
        _ => {}
    }
    let _ = topic;
}

#[async_trait]
impl PeerNetwork for SwarmNetwork {
    async fn broadcast(&self, msg: Message) {
        let _ = self.cmd_tx.send(Command::Broadcast(msg));
    }

    async fn send(&self, peer: PeerId, msg: Message) {
        let _ = self.cmd_tx.send(Command::Send(peer, msg));
    }

    async fn peers(&self) -> Vec<PeerId> {
        self.peers.lock().await.iter().copied().collect()
    }
}
