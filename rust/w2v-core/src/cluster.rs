// rust/w2v-core/src/cluster.rs

//! In-process shard cluster.
//!
//! Every shard gets its own column partition, its own inbox on a shared
//! [`LocalNetwork`] and a small pool of worker threads draining that inbox.
//! Clients talk to the cluster through [`LocalClient`].

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, select, Receiver, Sender};

use crate::config::W2vConfig;
use crate::error::{Result, TrainerError};
use crate::node::ShardNode;
use crate::protocol::{CbowRequest, Envelope, Message, Target, TrainingFrame};
use crate::storage::{partition_columns, InMemoryStorage, WordVectorStorage};
use crate::transport::{LocalNetwork, LocalTransport};

/// A running set of shards connected by an in-process network.
pub struct LocalCluster {
    network: Arc<LocalNetwork>,
    nodes: Vec<Arc<ShardNode>>,
    shutdown: Option<Sender<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl LocalCluster {
    /// Starts a cluster with randomly initialised in-memory partitions.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or a worker thread
    /// cannot be spawned.
    pub fn start(config: &W2vConfig) -> Result<Self> {
        let model = config.model.clone();
        let training = config.training.clone();
        let shard_count = config.cluster.shard_count;

        Self::start_with_storage(config, move |shard_index| {
            let columns = partition_columns(model.vector_length, shard_count, shard_index);
            Arc::new(InMemoryStorage::for_partition(
                model.vocab_size,
                columns.len(),
                training.exp_table_size,
                training.max_exp,
                model.seed.wrapping_add(shard_index as u64),
            )) as Arc<dyn WordVectorStorage>
        })
    }

    /// Starts a cluster whose shard storage is built by `storage`, called
    /// once per shard index.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or a worker thread
    /// cannot be spawned.
    pub fn start_with_storage<F>(config: &W2vConfig, mut storage: F) -> Result<Self>
    where
        F: FnMut(u16) -> Arc<dyn WordVectorStorage>,
    {
        config.validate()?;

        let shard_count = config.cluster.shard_count;
        let (network, inboxes) = LocalNetwork::new(shard_count);
        let (shutdown, shutdown_rx) = bounded::<()>(0);

        let mut cluster = Self {
            network: network.clone(),
            nodes: Vec::with_capacity(shard_count as usize),
            shutdown: Some(shutdown),
            workers: Vec::new(),
        };

        for (shard_index, inbox) in (0..shard_count).zip(inboxes) {
            let transport = Arc::new(LocalTransport::new(network.clone(), shard_index));
            let node = Arc::new(ShardNode::new(
                shard_count,
                transport,
                storage(shard_index),
                config,
            ));

            for worker in 0..config.cluster.workers_per_shard {
                let handle = spawn_worker(node.clone(), inbox.clone(), shutdown_rx.clone(), worker)?;
                cluster.workers.push(handle);
            }
            cluster.nodes.push(node);
        }

        tracing::info!(
            "Started local cluster: {} shards, {} workers each, vector length {}",
            shard_count,
            config.cluster.workers_per_shard,
            config.model.vector_length
        );
        Ok(cluster)
    }

    pub fn shard_count(&self) -> u16 {
        self.network.shard_count()
    }

    pub fn nodes(&self) -> &[Arc<ShardNode>] {
        &self.nodes
    }

    /// Connects a client under `originator_id`.
    pub fn client(&self, originator_id: u64) -> LocalClient {
        LocalClient {
            originator_id,
            inbox: self.network.register_client(originator_id),
            network: self.network.clone(),
        }
    }

    /// Requests in flight across every shard.
    pub fn live_chains(&self) -> usize {
        self.nodes.iter().map(|node| node.live_chains()).sum()
    }

    /// Runs dead-request eviction on every shard.
    pub fn evict_stale(&self, max_age: Duration) -> usize {
        self.nodes.iter().map(|node| node.evict_stale(max_age)).sum()
    }

    /// Stops every worker and waits for them to exit.
    pub fn shutdown(&mut self) {
        // Dropping the sender wakes every worker's select.
        if self.shutdown.take().is_none() {
            return;
        }
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::error!("Shard worker panicked");
            }
        }
        tracing::info!("Local cluster stopped");
    }
}

impl Drop for LocalCluster {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Spawns a tokio task that runs dead-request eviction on `cluster` every
/// `interval`, dropping entries older than `max_age`.
pub fn spawn_eviction(
    cluster: Arc<LocalCluster>,
    interval: Duration,
    max_age: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(interval);
        loop {
            interval.tick().await;
            let evicted = cluster.evict_stale(max_age);
            if evicted > 0 {
                tracing::warn!("Evicted {} stale entries", evicted);
            }
        }
    })
}

fn spawn_worker(
    node: Arc<ShardNode>,
    inbox: Receiver<Envelope>,
    shutdown: Receiver<()>,
    worker: usize,
) -> Result<JoinHandle<()>> {
    let shard_index = node.shard_index();
    thread::Builder::new()
        .name(format!("shard-{}-worker-{}", shard_index, worker))
        .spawn(move || loop {
            select! {
                recv(inbox) -> envelope => match envelope {
                    Ok(envelope) => {
                        let kind = envelope.message.kind();
                        if let Err(e) = node.handle(envelope) {
                            tracing::error!("sI_{} failed to handle {}: {}", shard_index, kind, e);
                        }
                    }
                    Err(_) => break,
                },
                recv(shutdown) -> _ => break,
            }
        })
        .map_err(|e| TrainerError::transport(format!("failed to spawn shard worker: {}", e)))
}

/// Client handle submitting work to a [`LocalCluster`].
pub struct LocalClient {
    originator_id: u64,
    network: Arc<LocalNetwork>,
    inbox: Receiver<Envelope>,
}

impl LocalClient {
    pub fn originator_id(&self) -> u64 {
        self.originator_id
    }

    /// Sends a frame to the shard that will track it.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame belongs to another client or the shard
    /// is gone.
    pub fn submit_frame(&self, frame: TrainingFrame) -> Result<()> {
        if frame.originator_id != self.originator_id {
            return Err(TrainerError::protocol(format!(
                "client {} cannot submit frame of originator {}",
                self.originator_id, frame.originator_id
            )));
        }
        let shard = (frame.frame_id % self.network.shard_count() as u64) as u16;
        self.network.deliver(Envelope::new(
            Target::Shard(shard),
            self.originator_id,
            Message::Frame(frame),
        ))
    }

    /// Sends a single request, outside any frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the shard is gone.
    pub fn submit_request(&self, request: CbowRequest) -> Result<()> {
        let shard = (request.task_id % self.network.shard_count() as u64) as u16;
        self.network.deliver(Envelope::new(
            Target::Shard(shard),
            self.originator_id,
            Message::CbowRequest(request),
        ))
    }

    /// Blocks until a frame completion arrives and returns its frame id.
    ///
    /// # Errors
    ///
    /// Returns an error if nothing completes within `timeout`.
    pub fn wait_frame_complete(&self, timeout: Duration) -> Result<u64> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.inbox.recv_timeout(remaining) {
                Ok(Envelope {
                    message: Message::FrameComplete(complete),
                    ..
                }) => return Ok(complete.frame_id),
                Ok(other) => {
                    tracing::debug!(
                        "Client {} ignoring {}",
                        self.originator_id,
                        other.message.kind()
                    );
                }
                Err(_) => {
                    return Err(TrainerError::transport(format!(
                        "client {} timed out waiting for frame completion",
                        self.originator_id
                    )))
                }
            }
        }
    }
}

impl Drop for LocalClient {
    fn drop(&mut self) {
        self.network.deregister_client(self.originator_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ArrayKey, Sigmoid};

    fn config(shards: u16, vector_length: usize) -> W2vConfig {
        let mut config = W2vConfig::default();
        config.cluster.shard_count = shards;
        config.cluster.workers_per_shard = 2;
        config.model.vocab_size = 16;
        config.model.vector_length = vector_length;
        config
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    fn snapshot(cluster: &LocalCluster, key: ArrayKey, row: usize) -> Vec<Vec<f32>> {
        cluster
            .nodes()
            .iter()
            .map(|node| {
                let array = node.storage().get_array(key).unwrap();
                let values = array.read().row(row).unwrap().to_vec();
                values
            })
            .collect()
    }

    fn request(task_id: u64) -> CbowRequest {
        CbowRequest {
            originator_id: 1,
            task_id,
            frame_id: 1,
            syn0_rows: vec![1, 2],
            syn1_rows: vec![3],
            codes: vec![0],
            w1: 5,
            negative_rows: vec![],
            alpha: 0.025,
        }
    }

    #[test]
    fn test_two_shard_update_matches_single_machine_math() {
        let cluster = LocalCluster::start(&config(2, 6)).unwrap();
        let client = cluster.client(1);

        let row1 = snapshot(&cluster, ArrayKey::Syn0, 1);
        let row2 = snapshot(&cluster, ArrayKey::Syn0, 2);

        client
            .submit_frame(TrainingFrame {
                frame_id: 1,
                originator_id: 1,
                requests: vec![request(10)],
            })
            .unwrap();
        assert_eq!(client.wait_frame_complete(Duration::from_secs(5)).unwrap(), 1);
        assert!(wait_until(|| cluster.live_chains() == 0));

        // syn1 starts at zero, so the full dot is 0 on every shard
        let sigma = {
            let table = cluster.nodes()[0]
                .storage()
                .get_array(ArrayKey::ExpTable)
                .unwrap();
            let sigma = Sigmoid::new(table.read().as_slice(), 6.0).lookup(0.0).unwrap();
            sigma
        };
        let g = (1.0 - sigma) * 0.025;

        let syn1 = snapshot(&cluster, ArrayKey::Syn1, 3);
        for shard in 0..2 {
            assert_eq!(syn1[shard].len(), 3);
            for c in 0..3 {
                let neu1 = (row1[shard][c] + row2[shard][c]) / 2.0;
                assert!((syn1[shard][c] - g * neu1).abs() < 1e-6);
            }
        }

        // neu1e came from the zero syn1 row, so the context rows are unchanged
        assert_eq!(snapshot(&cluster, ArrayKey::Syn0, 1), row1);
    }

    #[test]
    fn test_frame_completes_without_leaking_state() {
        let cluster = LocalCluster::start(&config(3, 10)).unwrap();
        let client = cluster.client(1);

        let requests = (0..20)
            .map(|task| {
                let mut req = request(task);
                req.negative_rows = vec![7, 8, 5];
                req
            })
            .collect();
        client
            .submit_frame(TrainingFrame {
                frame_id: 1,
                originator_id: 1,
                requests,
            })
            .unwrap();

        assert_eq!(client.wait_frame_complete(Duration::from_secs(5)).unwrap(), 1);
        assert!(wait_until(|| cluster.live_chains() == 0));
        for node in cluster.nodes() {
            assert_eq!(node.pending_aggregations(), 0);
            assert_eq!(node.tracker().tracked_frames(), 0);
        }

        // nothing more arrives for this frame
        assert!(client.wait_frame_complete(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_single_requests_outside_frames() {
        let cluster = LocalCluster::start(&config(2, 4)).unwrap();
        let client = cluster.client(1);

        for task in 0..10 {
            client.submit_request(request(task)).unwrap();
        }
        assert!(wait_until(|| cluster.nodes().iter().all(|n| n.rounds() == 10)));
        assert_eq!(cluster.live_chains(), 0);
        assert!(cluster.nodes().iter().all(|n| n.pending_aggregations() == 0));
    }

    #[test]
    fn test_client_rejects_foreign_frame() {
        let cluster = LocalCluster::start(&config(1, 4)).unwrap();
        let client = cluster.client(1);

        let result = client.submit_frame(TrainingFrame {
            frame_id: 1,
            originator_id: 2,
            requests: vec![],
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = config(2, 4);
        config.cluster.shard_count = 0;
        assert!(LocalCluster::start(&config).is_err());
    }

    #[tokio::test]
    async fn test_eviction_task_clears_abandoned_requests() {
        let cluster = Arc::new(LocalCluster::start(&config(2, 4)).unwrap());

        // only shard 0 ever sees the fan-out, so shard 1 never contributes
        let message = crate::protocol::DistributedCbowDot::from_request(&request(1));
        cluster.nodes()[0]
            .handle(Envelope::new(
                Target::Broadcast,
                1,
                Message::DistributedCbowDot(message),
            ))
            .unwrap();
        assert_eq!(cluster.live_chains(), 1);

        let sweeper = spawn_eviction(
            cluster.clone(),
            Duration::from_millis(10),
            Duration::from_millis(1),
        );

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let pending: usize = cluster.nodes().iter().map(|n| n.pending_aggregations()).sum();
            if cluster.live_chains() == 0 && pending == 0 {
                break;
            }
            assert!(Instant::now() < deadline, "stale state was never evicted");
        }
        sweeper.abort();
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let mut cluster = LocalCluster::start(&config(2, 4)).unwrap();
        cluster.shutdown();
        cluster.shutdown();
        assert_eq!(cluster.shard_count(), 2);
    }
}
