// rust/w2v-core/src/error.rs

use thiserror::Error;

use crate::storage::ArrayKey;

#[derive(Error, Debug)]
pub enum TrainerError {

    /// The fan-out/merge protocol delivered work for a request this shard
    /// has no chain for.
    #[error(
        "sI_{shard_index} unable to find chain for originatorId: [{originator_id}]; taskId: [{task_id}]"
    )]
    ChainNotFound {
        originator_id: u64,
        task_id: u64,
        shard_index: u16,
    },

    #[error("sI_{shard_index} chain for originatorId: [{originator_id}]; taskId: [{task_id}] has no aggregation attached")]
    AggregationMissing {
        originator_id: u64,
        task_id: u64,
        shard_index: u16,
    },

    #[error("Protocol error: {message}")]
    Protocol {
        message: String,
    },

    #[error("Storage error on {key:?}: {message}")]
    Storage {
        key: ArrayKey,
        message: String,
    },

    #[error("Transport error: {message}")]
    Transport {
        message: String,
    },

    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("No driver registered for request kind '{kind}'")]
    UnsupportedRequest {
        kind: String,
    },
}

pub type Result<T> = std::result::Result<T, TrainerError>;

// Convenience constructors
impl TrainerError {

    pub fn chain_not_found(originator_id: u64, task_id: u64, shard_index: u16) -> Self {
        Self::ChainNotFound {
            originator_id,
            task_id,
            shard_index,
        }
    }

    pub fn aggregation_missing(originator_id: u64, task_id: u64, shard_index: u16) -> Self {
        Self::AggregationMissing {
            originator_id,
            task_id,
            shard_index,
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn storage(key: ArrayKey, message: impl Into<String>) -> Self {
        Self::Storage {
            key,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn unsupported_request(kind: impl Into<String>) -> Self {
        Self::UnsupportedRequest { kind: kind.into() }
    }

    /// Returns true for errors that mean the distributed protocol itself is
    /// broken rather than a single message being malformed.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::ChainNotFound { .. } | Self::AggregationMissing { .. }
        )
    }
}
