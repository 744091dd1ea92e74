// rust/w2v-core/src/transport/mod.rs

//! Message transport between shards and clients.
//!
//! Training drivers only ever send; receiving and dispatching is the job of
//! the shard node that owns the inbox.

mod local;

use crate::error::Result;
use crate::protocol::Envelope;

pub use local::{LocalNetwork, LocalTransport};

/// Outbound side of a shard's connection to the cluster.
pub trait Transport: Send + Sync {
    /// Delivers an envelope to its target shard, to every shard, or to the
    /// client that originated it.
    ///
    /// # Errors
    ///
    /// Returns an error if the target is unknown or disconnected.
    fn send_message(&self, envelope: Envelope) -> Result<()>;

    /// Index of the local shard, used in diagnostics.
    fn shard_index(&self) -> u16;
}

#[cfg(test)]
pub(crate) mod testing {
    use parking_lot::Mutex;

    use super::*;

    /// Transport that records every envelope instead of delivering it.
    #[derive(Default)]
    pub(crate) struct RecordingTransport {
        pub shard_index: u16,
        pub sent: Mutex<Vec<Envelope>>,
    }

    impl RecordingTransport {
        pub fn new(shard_index: u16) -> Self {
            Self {
                shard_index,
                sent: Mutex::new(Vec::new()),
            }
        }

        pub fn sent(&self) -> Vec<Envelope> {
            self.sent.lock().clone()
        }
    }

    impl Transport for RecordingTransport {
        fn send_message(&self, envelope: Envelope) -> Result<()> {
            self.sent.lock().push(envelope);
            Ok(())
        }

        fn shard_index(&self) -> u16 {
            self.shard_index
        }
    }
}
