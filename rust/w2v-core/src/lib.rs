// rust/w2v-core/src/lib.rs

//! Distributed CBOW word2vec - Shard Coordination Library
//!
//! This crate provides the shard-local side of column-partitioned word2vec
//! training: partial dot products, cluster-wide aggregation, the gradient
//! update, frame completion and the driver lifecycle that ties them together.

pub mod config;
pub mod descriptor;
pub mod error;
pub mod protocol;

// Re-export commonly used types for convenience
pub use config::W2vConfig;
pub use descriptor::RequestDescriptor;
pub use error::{Result, TrainerError};
pub use protocol::{
    CbowRequest, DistributedCbowDot, DotContribution, Envelope, FrameComplete, Message, Target,
    TrainingFrame,
};

pub mod storage;
pub use storage::{ArrayKey, InMemoryStorage, Matrix, SharedMatrix, WordVectorStorage};

pub mod aggregation;
pub use aggregation::{Aggregation, AggregationCollector, DotAggregation};

pub mod completion;
pub use completion::{FrameCompletionHandler, FrameDescriptor, FrameTracker};

pub mod metrics;
pub use metrics::RoundCounter;

pub mod training;
pub use training::{CbowTrainer, DriverRegistry, TrainerKind, TrainingDriver, TrainingRequest};

pub mod transport;
pub use transport::{LocalNetwork, LocalTransport, Transport};

pub mod node;
pub use node::ShardNode;

pub mod cluster;
pub use cluster::{spawn_eviction, LocalClient, LocalCluster};
