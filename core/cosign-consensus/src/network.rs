//! Transport seam: outbound sending, peer liveness and inbound queues

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::debug;

use crate::errors::ConsensusError;
use crate::message::ConsensusMessage;
use crate::types::PeerId;
use crate::ConsensusResult;

/// Outcome of an asynchronous send
pub type PendingSend = oneshot::Receiver<ConsensusResult<()>>;

/// Outbound half of the peer layer
pub trait Sender: Send + Sync {
    fn send_async(&self, peer: &PeerId, code: u64, payload: Vec<u8>) -> PendingSend;
}

/// Liveness notification from the peer layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    Connected(PeerId),
    Disconnected(PeerId),
}

/// Decoded message together with the peer it came from
#[derive(Debug, Clone)]
pub struct Inbound {
    pub peer: PeerId,
    pub message: ConsensusMessage,
}

/// Bounded role queue; the receiver is shared by successive role instances.
///
/// Messages that arrive ahead of the round being run are parked in a side
/// buffer and replayed to the next role instance.
#[derive(Clone)]
pub struct MessageQueue {
    tx: mpsc::Sender<Inbound>,
    rx: Arc<Mutex<mpsc::Receiver<Inbound>>>,
    deferred: Arc<SyncMutex<VecDeque<Inbound>>>,
    capacity: usize,
}

impl MessageQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            deferred: Arc::new(SyncMutex::new(VecDeque::new())),
            capacity,
        }
    }

    /// Enqueue without blocking; false when full
    pub fn offer(&self, inbound: Inbound) -> bool {
        self.tx.try_send(inbound).is_ok()
    }

    pub(crate) fn receiver(&self) -> Arc<Mutex<mpsc::Receiver<Inbound>>> {
        self.rx.clone()
    }

    /// Park a message for a later round; the oldest is evicted when full
    pub(crate) fn defer(&self, inbound: Inbound) {
        let mut deferred = self.deferred.lock();
        if deferred.len() >= self.capacity {
            deferred.pop_front();
        }
        deferred.push_back(inbound);
    }

    pub(crate) fn take_deferred(&self) -> Vec<Inbound> {
        self.deferred.lock().drain(..).collect()
    }

    /// Drop everything queued so far; only valid while no role instance is
    /// reading. Returns how many messages were dropped.
    pub(crate) fn discard_pending(&self) -> usize {
        let mut dropped = self.deferred.lock().drain(..).count();
        if let Ok(mut rx) = self.rx.try_lock() {
            while rx.try_recv().is_ok() {
                dropped += 1;
            }
        }
        dropped
    }
}

/// Encode and hand a message to the transport; failures are only logged
pub(crate) fn send_message(sender: &Arc<dyn Sender>, peer: &PeerId, message: &ConsensusMessage) {
    let payload = match message.encode() {
        Ok(payload) => payload,
        Err(e) => {
            debug!(peer = %peer, error = %e, "failed to encode consensus message");
            return;
        }
    };

    let pending = sender.send_async(peer, message.code(), payload);
    let peer = peer.clone();
    tokio::spawn(async move {
        match pending.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(peer = %peer, error = %e, "send failed"),
            Err(_) => debug!(peer = %peer, "send dropped"),
        }
    });
}

/// Wrap a transport error for a [`PendingSend`]
pub fn network_error(reason: impl Into<String>) -> ConsensusError {
    ConsensusError::Network(reason.into())
}
