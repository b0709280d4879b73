//! In-process transport connecting producer nodes

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use cosign_consensus::network::network_error;
use cosign_consensus::{PeerEvent, PeerId, PendingSend, Sender};
use cosign_state::Block;
use parking_lot::RwLock;
use tokio::sync::oneshot;
use tracing::debug;

use crate::errors::{NodeError, NodeResult};
use crate::node::ProducerNode;

struct Endpoint {
    node: Weak<ProducerNode>,
    online: bool,
}

/// Hub delivering consensus messages and sealed blocks between nodes
#[derive(Default)]
pub struct LocalNetwork {
    endpoints: RwLock<HashMap<PeerId, Endpoint>>,
}

impl LocalNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a node; it starts offline
    pub fn register(&self, node: &Arc<ProducerNode>) {
        self.endpoints.write().insert(
            node.id().clone(),
            Endpoint {
                node: Arc::downgrade(node),
                online: false,
            },
        );
    }

    pub fn sender(self: &Arc<Self>, from: PeerId) -> Arc<dyn Sender> {
        Arc::new(LocalSender {
            from,
            network: Arc::downgrade(self),
        })
    }

    pub fn is_online(&self, peer: &PeerId) -> bool {
        self.endpoints.read().get(peer).map(|e| e.online).unwrap_or(false)
    }

    /// Bring a node up or down and notify both sides of every link it gains
    /// or loses
    pub fn set_online(&self, peer: &PeerId, online: bool) -> NodeResult<()> {
        let mut notifications = Vec::new();
        {
            let mut endpoints = self.endpoints.write();
            let endpoint = endpoints
                .get_mut(peer)
                .ok_or_else(|| NodeError::UnknownPeer(peer.to_string()))?;
            if endpoint.online == online {
                return Ok(());
            }
            endpoint.online = online;
            let me = endpoint.node.clone();

            for (other, endpoint) in endpoints.iter() {
                if other == peer || !endpoint.online {
                    continue;
                }
                let (to_other, to_me) = if online {
                    (PeerEvent::Connected(peer.clone()), PeerEvent::Connected(other.clone()))
                } else {
                    (PeerEvent::Disconnected(peer.clone()), PeerEvent::Disconnected(other.clone()))
                };
                notifications.push((endpoint.node.clone(), to_other));
                notifications.push((me.clone(), to_me));
            }
        }

        for (node, event) in notifications {
            if let Some(node) = node.upgrade() {
                node.engine().apply_peer_event(event);
            }
        }
        debug!(peer = %peer, online, "peer liveness changed");
        Ok(())
    }

    pub fn connect_all(&self) -> NodeResult<()> {
        let peers: Vec<PeerId> = self.endpoints.read().keys().cloned().collect();
        for peer in peers {
            self.set_online(&peer, true)?;
        }
        Ok(())
    }

    fn online_node(&self, peer: &PeerId) -> Option<Arc<ProducerNode>> {
        self.endpoints
            .read()
            .get(peer)
            .filter(|e| e.online)
            .and_then(|e| e.node.upgrade())
    }

    /// Hand a sealed block to every other online node
    pub fn broadcast_block(&self, from: &PeerId, block: &Block) {
        let peers: Vec<PeerId> = self
            .endpoints
            .read()
            .iter()
            .filter(|(peer, e)| *peer != from && e.online)
            .map(|(peer, _)| peer.clone())
            .collect();

        for peer in peers {
            if let Some(node) = self.online_node(&peer) {
                if let Err(e) = node.receive_block(block) {
                    debug!(peer = %peer, height = block.height(), error = %e, "broadcast block not imported");
                }
            }
        }
    }

    fn deliver(&self, from: &PeerId, to: &PeerId, code: u64, payload: &[u8]) -> NodeResult<()> {
        if !self.is_online(from) {
            return Err(NodeError::UnknownPeer(format!("{from} is offline")));
        }
        let node = self
            .online_node(to)
            .ok_or_else(|| NodeError::UnknownPeer(format!("{to} is unreachable")))?;
        node.engine().receive_msg(from, code, payload)?;
        Ok(())
    }
}

/// Outbound half handed to a node's consensus engine
struct LocalSender {
    from: PeerId,
    network: Weak<LocalNetwork>,
}

impl Sender for LocalSender {
    fn send_async(&self, peer: &PeerId, code: u64, payload: Vec<u8>) -> PendingSend {
        let (tx, rx) = oneshot::channel();
        let result = match self.network.upgrade() {
            Some(network) => network
                .deliver(&self.from, peer, code, &payload)
                .map_err(|e| network_error(e.to_string())),
            None => Err(network_error("network shut down")),
        };
        let _ = tx.send(result);
        rx
    }
}
