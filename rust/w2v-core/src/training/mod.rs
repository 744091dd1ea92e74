// rust/w2v-core/src/training/mod.rs

//! Distributed training drivers.
//!
//! A driver owns the shard-local lifecycle of every request of its kind:
//!
//! ```text
//! UNSEEN ─start_training──▶ STARTED ─┐
//!        └pick_training───▶ PICKED  ─┴─aggregation_finished──▶ AGGREGATED ─finish_training──▶ FINISHED
//! ```
//!
//! Drivers are looked up by [`TrainerKind`] through a [`DriverRegistry`], so
//! a shard can host several training algorithms side by side.

mod cbow;
mod chain;
mod kernel;
mod partial;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::aggregation::Aggregation;
use crate::descriptor::RequestDescriptor;
use crate::error::{Result, TrainerError};
use crate::protocol::CbowRequest;

pub use cbow::CbowTrainer;
pub use chain::CbowChain;
pub use kernel::{propagate_input_error, GradientKernel};
pub use partial::partial_dots;

/// Tag selecting the driver responsible for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrainerKind {
    Cbow,
}

impl fmt::Display for TrainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cbow => write!(f, "cbow"),
        }
    }
}

/// A training request of any supported kind.
#[derive(Debug, Clone, PartialEq)]
pub enum TrainingRequest {
    Cbow(CbowRequest),
}

impl TrainingRequest {
    pub fn kind(&self) -> TrainerKind {
        match self {
            Self::Cbow(_) => TrainerKind::Cbow,
        }
    }

    pub fn descriptor(&self) -> RequestDescriptor {
        match self {
            Self::Cbow(request) => request.descriptor(),
        }
    }
}

impl From<CbowRequest> for TrainingRequest {
    fn from(request: CbowRequest) -> Self {
        Self::Cbow(request)
    }
}

/// Capability set every training driver implements.
pub trait TrainingDriver: Send + Sync {
    fn kind(&self) -> TrainerKind;

    /// Starts a request on its initiating shard and broadcasts the fan-out.
    fn start_training(&self, request: TrainingRequest) -> Result<()>;

    /// Ensures local bookkeeping exists for a request started elsewhere.
    fn pick_training(&self, request: TrainingRequest) -> Result<()>;

    /// Attaches a merged aggregation and finishes the request.
    fn aggregation_finished(&self, aggregation: Arc<dyn Aggregation>) -> Result<()>;

    /// Applies the update, resolves frame completion and drops the chain.
    fn finish_training(&self, originator_id: u64, task_id: u64) -> Result<()>;

    /// Number of requests currently in flight on this shard.
    fn live_chains(&self) -> usize;

    /// Drops requests that have been in flight longer than `max_age`.
    fn evict_stale(&self, max_age: Duration) -> Vec<RequestDescriptor>;
}

/// Dispatch table from request kind to driver.
#[derive(Default)]
pub struct DriverRegistry {
    drivers: HashMap<TrainerKind, Arc<dyn TrainingDriver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `driver` under its own kind, replacing any previous one.
    pub fn register(&mut self, driver: Arc<dyn TrainingDriver>) {
        self.drivers.insert(driver.kind(), driver);
    }

    /// # Errors
    ///
    /// Returns an error if no driver handles `kind`.
    pub fn driver(&self, kind: TrainerKind) -> Result<&Arc<dyn TrainingDriver>> {
        self.drivers
            .get(&kind)
            .ok_or_else(|| TrainerError::unsupported_request(kind.to_string()))
    }

    pub fn drivers(&self) -> impl Iterator<Item = &Arc<dyn TrainingDriver>> {
        self.drivers.values()
    }
}
