// rust/w2v-core/src/node.rs

//! A single parameter shard.
//!
//! [`ShardNode`] owns one column partition of the embedding tables and
//! dispatches every inbound envelope to the matching training driver. It is
//! transport-agnostic: whoever drains the shard's inbox calls
//! [`ShardNode::handle`], possibly from several threads at once.

use std::sync::Arc;
use std::time::Duration;

use crate::aggregation::AggregationCollector;
use crate::completion::FrameTracker;
use crate::config::W2vConfig;
use crate::error::Result;
use crate::metrics::RoundCounter;
use crate::protocol::{
    DistributedCbowDot, DotContribution, Envelope, FrameComplete, Message, Target, TrainingFrame,
};
use crate::storage::WordVectorStorage;
use crate::training::{partial_dots, CbowTrainer, DriverRegistry, TrainerKind, TrainingRequest};
use crate::transport::Transport;

pub struct ShardNode {
    shard_index: u16,
    shard_count: u16,
    transport: Arc<dyn Transport>,
    storage: Arc<dyn WordVectorStorage>,
    tracker: Arc<FrameTracker>,
    collector: AggregationCollector,
    drivers: DriverRegistry,
    rounds: Arc<RoundCounter>,
}

impl ShardNode {
    /// Creates a shard with the CBOW driver registered.
    pub fn new(
        shard_count: u16,
        transport: Arc<dyn Transport>,
        storage: Arc<dyn WordVectorStorage>,
        config: &W2vConfig,
    ) -> Self {
        let tracker = Arc::new(FrameTracker::new());
        let rounds = Arc::new(RoundCounter::new(config.driver.progress_log_interval));

        let cbow = CbowTrainer::new(transport.clone(), storage.clone(), tracker.clone())
            .with_max_exp(config.training.max_exp)
            .with_round_counter(rounds.clone());

        let mut drivers = DriverRegistry::new();
        drivers.register(Arc::new(cbow));

        Self {
            shard_index: transport.shard_index(),
            shard_count,
            transport,
            storage,
            tracker,
            collector: AggregationCollector::new(),
            drivers,
            rounds,
        }
    }

    pub fn shard_index(&self) -> u16 {
        self.shard_index
    }

    pub fn storage(&self) -> &Arc<dyn WordVectorStorage> {
        &self.storage
    }

    pub fn drivers(&self) -> &DriverRegistry {
        &self.drivers
    }

    pub fn tracker(&self) -> &FrameTracker {
        &self.tracker
    }

    /// Requests in flight across every driver.
    pub fn live_chains(&self) -> usize {
        self.drivers.drivers().map(|d| d.live_chains()).sum()
    }

    /// Training rounds finished on this shard, across every driver.
    pub fn rounds(&self) -> u64 {
        self.rounds.get()
    }

    pub fn pending_aggregations(&self) -> usize {
        self.collector.pending()
    }

    /// Processes one inbound envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if the message is malformed, references state this
    /// shard does not hold, or an outbound send fails.
    pub fn handle(&self, envelope: Envelope) -> Result<()> {
        tracing::trace!(
            "sI_{} received {} from originator {}",
            self.shard_index,
            envelope.message.kind(),
            envelope.originator_id
        );

        match envelope.message {
            Message::Frame(frame) => self.handle_frame(frame),
            Message::CbowRequest(request) => self.start(request.into()),
            Message::DistributedCbowDot(message) => self.handle_dot_request(message),
            Message::DotContribution(contribution) => self.handle_contribution(contribution),
            Message::FrameComplete(complete) => {
                tracing::debug!(
                    "sI_{} ignoring completion of frame {} addressed to a client",
                    self.shard_index,
                    complete.frame_id
                );
                Ok(())
            }
        }
    }

    fn handle_frame(&self, frame: TrainingFrame) -> Result<()> {
        // Reject the whole frame up front; a half-started frame never completes.
        for request in &frame.requests {
            request.validate()?;
        }

        if frame.requests.is_empty() {
            tracing::debug!(
                "sI_{} frame {} is empty, completing immediately",
                self.shard_index,
                frame.descriptor()
            );
            return self.transport.send_message(Envelope::new(
                Target::Originator,
                frame.originator_id,
                Message::FrameComplete(FrameComplete {
                    frame_id: frame.frame_id,
                }),
            ));
        }

        let descriptor = frame.descriptor();
        self.tracker.track_frame(&frame);

        for request in frame.requests {
            if let Err(e) = self.start(request.into()) {
                // The frame can no longer finish; tasks already started
                // still train but their notifications are dropped.
                self.tracker.untrack(descriptor);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Starts one request on the driver registered for its kind.
    fn start(&self, request: TrainingRequest) -> Result<()> {
        let descriptor = request.descriptor();
        self.drivers
            .driver(request.kind())?
            .start_training(request)
            .map_err(|e| {
                tracing::warn!(
                    "sI_{} failed to start {}: {}",
                    self.shard_index,
                    descriptor,
                    e
                );
                e
            })
    }

    fn handle_dot_request(&self, message: DistributedCbowDot) -> Result<()> {
        message.validate()?;

        self.drivers
            .driver(TrainerKind::Cbow)?
            .pick_training(message.to_request().into())?;

        let partial = partial_dots(self.storage.as_ref(), &message)?;

        self.transport.send_message(Envelope::new(
            Target::Broadcast,
            message.originator_id,
            Message::DotContribution(DotContribution {
                originator_id: message.originator_id,
                task_id: message.task_id,
                shard_index: self.shard_index,
                expected_shards: self.shard_count,
                partial,
            }),
        ))
    }

    fn handle_contribution(&self, contribution: DotContribution) -> Result<()> {
        match self.collector.add(&contribution)? {
            Some(aggregation) => self
                .drivers
                .driver(TrainerKind::Cbow)?
                .aggregation_finished(aggregation),
            None => Ok(()),
        }
    }

    /// Drops chains, partial merges and tracked frames older than
    /// `max_age`. Returns the number of entries removed.
    pub fn evict_stale(&self, max_age: Duration) -> usize {
        let chains: usize = self
            .drivers
            .drivers()
            .map(|driver| driver.evict_stale(max_age).len())
            .sum();

        let merges = self.collector.evict_stale(max_age);
        for descriptor in &merges {
            tracing::warn!(
                "sI_{} dropped incomplete aggregation {}",
                self.shard_index,
                descriptor
            );
        }

        let frames = self.tracker.evict_stale(max_age);
        for descriptor in &frames {
            tracing::warn!(
                "sI_{} dropped unfinished frame {}",
                self.shard_index,
                descriptor
            );
        }

        chains + merges.len() + frames.len()
    }
}
