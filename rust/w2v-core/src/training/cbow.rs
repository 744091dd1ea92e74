// rust/w2v-core/src/training/cbow.rs

//! CBOW training driver.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::chain::CbowChain;
use super::kernel::{propagate_input_error, GradientKernel};
use super::{TrainerKind, TrainingDriver, TrainingRequest};
use crate::aggregation::Aggregation;
use crate::completion::FrameCompletionHandler;
use crate::descriptor::RequestDescriptor;
use crate::error::{Result, TrainerError};
use crate::metrics::RoundCounter;
use crate::protocol::{CbowRequest, DistributedCbowDot, Envelope, FrameComplete, Message, Target};
use crate::storage::{ArrayKey, Sigmoid, WordVectorStorage};
use crate::transport::Transport;

const DEFAULT_MAX_EXP: f32 = 6.0;

/// Drives CBOW requests through fan-out, aggregation and update on one shard.
pub struct CbowTrainer {
    transport: Arc<dyn Transport>,
    storage: Arc<dyn WordVectorStorage>,
    completion: Arc<dyn FrameCompletionHandler>,
    chains: DashMap<RequestDescriptor, CbowChain>,
    rounds: Arc<RoundCounter>,
    max_exp: f32,
}

/// Removes a chain when dropped, whichever way `finish_training` exits.
struct ChainGuard<'a> {
    chains: &'a DashMap<RequestDescriptor, CbowChain>,
    descriptor: RequestDescriptor,
}

impl Drop for ChainGuard<'_> {
    fn drop(&mut self) {
        self.chains.remove(&self.descriptor);
    }
}

impl CbowTrainer {
    pub fn new(
        transport: Arc<dyn Transport>,
        storage: Arc<dyn WordVectorStorage>,
        completion: Arc<dyn FrameCompletionHandler>,
    ) -> Self {
        Self {
            transport,
            storage,
            completion,
            chains: DashMap::new(),
            rounds: Arc::new(RoundCounter::default()),
            max_exp: DEFAULT_MAX_EXP,
        }
    }

    /// Domain of the shared sigmoid table.
    #[must_use]
    pub fn with_max_exp(mut self, max_exp: f32) -> Self {
        self.max_exp = max_exp;
        self
    }

    #[must_use]
    pub fn with_round_counter(mut self, rounds: Arc<RoundCounter>) -> Self {
        self.rounds = rounds;
        self
    }

    pub fn rounds(&self) -> u64 {
        self.rounds.get()
    }

    pub fn has_chain(&self, descriptor: RequestDescriptor) -> bool {
        self.chains.contains_key(&descriptor)
    }

    fn shard_index(&self) -> u16 {
        self.transport.shard_index()
    }

    fn cbow_request(request: TrainingRequest) -> CbowRequest {
        let TrainingRequest::Cbow(request) = request;
        request
    }

    /// Runs the gradient kernel for a chain whose dot products arrived.
    fn apply_update(&self, chain: &CbowChain) -> Result<()> {
        let request = chain.request();
        let aggregation = chain.aggregation().ok_or_else(|| {
            TrainerError::aggregation_missing(chain.originator_id(), chain.task_id(), self.shard_index())
        })?;

        let dots = aggregation.accumulated_result();
        if dots.len() != request.expected_dots() {
            return Err(TrainerError::protocol(format!(
                "task {} expects {} dot products, aggregation holds {}",
                request.task_id,
                request.expected_dots(),
                dots.len()
            )));
        }

        let exp_table = self.storage.get_array(ArrayKey::ExpTable)?;
        let syn0 = self.storage.get_array(ArrayKey::Syn0)?;
        let syn1 = self.storage.get_array(ArrayKey::Syn1)?;
        let syn1_neg = self.storage.get_array(ArrayKey::Syn1Negative)?;

        let neu1 = syn0.read().mean_of_rows(ArrayKey::Syn0, &request.syn0_rows)?;

        let neu1e = {
            let table = exp_table.read();
            let mut kernel = GradientKernel::new(
                &neu1,
                Sigmoid::new(table.as_slice(), self.max_exp),
                request.alpha as f32,
            );

            let (hs_dots, ns_dots) = dots.split_at(request.codes.len());
            if request.use_hs() {
                kernel.hierarchical_softmax(
                    hs_dots,
                    &request.codes,
                    &request.syn1_rows,
                    &mut syn1.write(),
                )?;
            }
            if request.neg_samples() > 0 {
                kernel.negative_sampling(
                    ns_dots,
                    request.w1,
                    &request.negative_rows,
                    &mut syn1_neg.write(),
                )?;
            }
            kernel.into_error()
        };

        propagate_input_error(&mut syn0.write(), &request.syn0_rows, &neu1e)?;
        Ok(())
    }

    /// Reports the task to the frame tracker and notifies the frame
    /// originator if this was the frame's last task.
    fn resolve_frame(&self, chain: &CbowChain) -> Result<()> {
        let frame = chain.frame_descriptor();

        if !self.completion.is_tracking_frame(frame) {
            tracing::info!(
                "sI_{} isn't tracking this frame: Originator: {}, frameId: {}, taskId: {}",
                self.shard_index(),
                chain.originator_id(),
                chain.frame_id(),
                chain.task_id()
            );
            return Ok(());
        }

        self.completion
            .notify_frame(chain.originator_id(), chain.frame_id(), chain.task_id());

        if !self.completion.is_completed(frame) {
            return Ok(());
        }

        match self.completion.get_completed_frame_info(frame) {
            Some(info) => {
                tracing::debug!(
                    "sI_{} frame {} complete, notifying originator {}",
                    self.shard_index(),
                    frame,
                    info.frame_originator_id
                );
                self.transport.send_message(Envelope::new(
                    Target::Originator,
                    info.frame_originator_id,
                    Message::FrameComplete(FrameComplete {
                        frame_id: chain.frame_id(),
                    }),
                ))
            }
            None => {
                tracing::warn!(
                    "sI_{} frame double spending detected: Originator: {}, frameId: {}, taskId: {}",
                    self.shard_index(),
                    chain.originator_id(),
                    chain.frame_id(),
                    chain.task_id()
                );
                Ok(())
            }
        }
    }
}

impl TrainingDriver for CbowTrainer {
    fn kind(&self) -> TrainerKind {
        TrainerKind::Cbow
    }

    fn start_training(&self, request: TrainingRequest) -> Result<()> {
        let request = Self::cbow_request(request);
        request.validate()?;
        let descriptor = request.descriptor();

        let message = DistributedCbowDot::from_request(&request);
        match self.chains.entry(descriptor) {
            Entry::Occupied(_) => {
                tracing::warn!(
                    "sI_{} ignoring repeated start for {}",
                    self.shard_index(),
                    descriptor
                );
                return Ok(());
            }
            Entry::Vacant(entry) => {
                entry.insert(CbowChain::new(request));
            }
        }

        let envelope = Envelope::new(
            Target::Broadcast,
            descriptor.originator_id,
            Message::DistributedCbowDot(message),
        );
        if let Err(e) = self.transport.send_message(envelope) {
            // Nobody will ever aggregate this request.
            self.chains.remove(&descriptor);
            return Err(e);
        }
        Ok(())
    }

    fn pick_training(&self, request: TrainingRequest) -> Result<()> {
        let request = Self::cbow_request(request);
        request.validate()?;

        self.chains
            .entry(request.descriptor())
            .or_insert_with(|| CbowChain::new(request));
        Ok(())
    }

    fn aggregation_finished(&self, aggregation: Arc<dyn Aggregation>) -> Result<()> {
        let descriptor = aggregation.descriptor();

        {
            let mut chain = self.chains.get_mut(&descriptor).ok_or_else(|| {
                TrainerError::chain_not_found(
                    descriptor.originator_id,
                    descriptor.task_id,
                    self.shard_index(),
                )
            })?;
            chain.attach(aggregation)?;
        }

        self.finish_training(descriptor.originator_id, descriptor.task_id)
    }

    fn finish_training(&self, originator_id: u64, task_id: u64) -> Result<()> {
        let descriptor = RequestDescriptor::new(originator_id, task_id);
        let chain = self
            .chains
            .get(&descriptor)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TrainerError::chain_not_found(originator_id, task_id, self.shard_index()))?;
        let _guard = ChainGuard {
            chains: &self.chains,
            descriptor,
        };

        let update = self.apply_update(&chain);
        if let Err(e) = &update {
            tracing::error!(
                "sI_{} update failed for {}: {}",
                self.shard_index(),
                descriptor,
                e
            );
        }

        // The frame must still learn about the task, or its client waits forever.
        let frame = self.resolve_frame(&chain);

        self.rounds.increment();

        update.and(frame)
    }

    fn live_chains(&self) -> usize {
        self.chains.len()
    }

    fn evict_stale(&self, max_age: Duration) -> Vec<RequestDescriptor> {
        let mut evicted = Vec::new();
        self.chains.retain(|descriptor, chain| {
            let keep = chain.age() <= max_age;
            if !keep {
                evicted.push(*descriptor);
            }
            keep
        });

        for descriptor in &evicted {
            tracing::warn!(
                "sI_{} evicted stale chain {} after {:?}",
                self.shard_index(),
                descriptor,
                max_age
            );
        }
        evicted
    }
}
