// rust/w2v-core/src/training/chain.rs

//! Per-request, per-shard in-flight state.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::aggregation::Aggregation;
use crate::descriptor::RequestDescriptor;
use crate::error::{Result, TrainerError};
use crate::protocol::CbowRequest;

/// Binds a request to its merged dot products once they arrive.
///
/// Cloning is cheap: the request and aggregation are shared.
#[derive(Debug, Clone)]
pub struct CbowChain {
    request: Arc<CbowRequest>,
    aggregation: Option<Arc<dyn Aggregation>>,
    created_at: Instant,
}

impl CbowChain {
    pub fn new(request: CbowRequest) -> Self {
        Self {
            request: Arc::new(request),
            aggregation: None,
            created_at: Instant::now(),
        }
    }

    pub fn request(&self) -> &CbowRequest {
        &self.request
    }

    pub fn originator_id(&self) -> u64 {
        self.request.originator_id
    }

    pub fn task_id(&self) -> u64 {
        self.request.task_id
    }

    pub fn frame_id(&self) -> u64 {
        self.request.frame_id
    }

    pub fn descriptor(&self) -> RequestDescriptor {
        self.request.descriptor()
    }

    /// Descriptor of the frame this request belongs to.
    pub fn frame_descriptor(&self) -> RequestDescriptor {
        RequestDescriptor::new(self.originator_id(), self.frame_id())
    }

    pub fn aggregation(&self) -> Option<&Arc<dyn Aggregation>> {
        self.aggregation.as_ref()
    }

    /// Attaches the merged result. A chain accepts exactly one aggregation.
    ///
    /// # Errors
    ///
    /// Returns an error if the aggregation belongs to another request, is
    /// not ready yet, or a result was already attached.
    pub fn attach(&mut self, aggregation: Arc<dyn Aggregation>) -> Result<()> {
        if aggregation.descriptor() != self.descriptor() {
            return Err(TrainerError::protocol(format!(
                "aggregation for {} attached to chain {}",
                aggregation.descriptor(),
                self.descriptor()
            )));
        }
        if !aggregation.is_ready() {
            return Err(TrainerError::protocol(format!(
                "aggregation for {} is not ready",
                self.descriptor()
            )));
        }
        if self.aggregation.is_some() {
            return Err(TrainerError::protocol(format!(
                "chain {} already holds an aggregation",
                self.descriptor()
            )));
        }
        self.aggregation = Some(aggregation);
        Ok(())
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}
