// rust/w2v-core/src/transport/local.rs

//! In-process transport over crossbeam channels.

use std::sync::Arc;

use crossbeam::channel::{unbounded, Receiver, Sender};
use dashmap::DashMap;

use super::Transport;
use crate::error::{Result, TrainerError};
use crate::protocol::{Envelope, Target};

/// Routing table connecting every shard inbox and every registered client.
pub struct LocalNetwork {
    shards: Vec<Sender<Envelope>>,
    clients: DashMap<u64, Sender<Envelope>>,
}

impl LocalNetwork {
    /// Creates a network with `shard_count` inboxes and returns their
    /// receiving ends, indexed by shard.
    pub fn new(shard_count: u16) -> (Arc<Self>, Vec<Receiver<Envelope>>) {
        let (shards, inboxes): (Vec<_>, Vec<_>) =
            (0..shard_count).map(|_| unbounded()).unzip();

        let network = Arc::new(Self {
            shards,
            clients: DashMap::new(),
        });
        (network, inboxes)
    }

    pub fn shard_count(&self) -> u16 {
        self.shards.len() as u16
    }

    /// Registers a client inbox for envelopes targeted at `originator_id`.
    pub fn register_client(&self, originator_id: u64) -> Receiver<Envelope> {
        let (tx, rx) = unbounded();
        self.clients.insert(originator_id, tx);
        rx
    }

    pub fn deregister_client(&self, originator_id: u64) {
        self.clients.remove(&originator_id);
    }

    /// Routes an envelope according to its target.
    ///
    /// # Errors
    ///
    /// Returns an error if the target shard or client does not exist or has
    /// hung up.
    pub fn deliver(&self, envelope: Envelope) -> Result<()> {
        match envelope.target {
            Target::Broadcast => {
                for (index, shard) in self.shards.iter().enumerate() {
                    shard.send(envelope.clone()).map_err(|_| {
                        TrainerError::transport(format!("shard {} disconnected", index))
                    })?;
                }
                Ok(())
            }
            Target::Shard(index) => {
                let shard = self.shards.get(index as usize).ok_or_else(|| {
                    TrainerError::transport(format!(
                        "shard {} out of range (total shards: {})",
                        index,
                        self.shards.len()
                    ))
                })?;
                shard
                    .send(envelope)
                    .map_err(|_| TrainerError::transport(format!("shard {} disconnected", index)))
            }
            Target::Originator => {
                let originator_id = envelope.originator_id;
                let client = self
                    .clients
                    .get(&originator_id)
                    .map(|entry| entry.value().clone())
                    .ok_or_else(|| {
                        TrainerError::transport(format!("unknown originator {}", originator_id))
                    })?;
                client.send(envelope).map_err(|_| {
                    TrainerError::transport(format!("originator {} disconnected", originator_id))
                })
            }
        }
    }
}

/// A shard's handle on a [`LocalNetwork`].
#[derive(Clone)]
pub struct LocalTransport {
    network: Arc<LocalNetwork>,
    shard_index: u16,
}

impl LocalTransport {
    pub fn new(network: Arc<LocalNetwork>, shard_index: u16) -> Self {
        Self {
            network,
            shard_index,
        }
    }
}

impl Transport for LocalTransport {
    fn send_message(&self, envelope: Envelope) -> Result<()> {
        self.network.deliver(envelope)
    }

    fn shard_index(&self) -> u16 {
        self.shard_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{FrameComplete, Message};

    fn frame_complete(target: Target, originator_id: u64) -> Envelope {
        Envelope::new(
            target,
            originator_id,
            Message::FrameComplete(FrameComplete { frame_id: 1 }),
        )
    }

    #[test]
    fn test_broadcast_reaches_every_shard() {
        let (network, inboxes) = LocalNetwork::new(3);
        let transport = LocalTransport::new(network, 1);

        transport.send_message(frame_complete(Target::Broadcast, 5)).unwrap();

        for inbox in &inboxes {
            assert_eq!(inbox.try_iter().count(), 1);
        }
        assert_eq!(transport.shard_index(), 1);
    }

    #[test]
    fn test_direct_shard_delivery() {
        let (network, inboxes) = LocalNetwork::new(2);

        network.deliver(frame_complete(Target::Shard(1), 5)).unwrap();

        assert_eq!(inboxes[0].try_iter().count(), 0);
        assert_eq!(inboxes[1].try_iter().count(), 1);
        assert!(network.deliver(frame_complete(Target::Shard(2), 5)).is_err());
    }

    #[test]
    fn test_originator_delivery() {
        let (network, _inboxes) = LocalNetwork::new(1);
        let client = network.register_client(77);

        network.deliver(frame_complete(Target::Originator, 77)).unwrap();
        assert_eq!(client.try_recv().unwrap().originator_id, 77);

        assert!(network.deliver(frame_complete(Target::Originator, 78)).is_err());

        network.deregister_client(77);
        assert!(network.deliver(frame_complete(Target::Originator, 77)).is_err());
    }
}
