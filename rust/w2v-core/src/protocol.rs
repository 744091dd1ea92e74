// rust/w2v-core/src/protocol.rs

//! Messages exchanged between clients and parameter shards.
//!
//! Wire encoding belongs to the transport; these types only carry the
//! semantic fields. Every message travels inside an [`Envelope`] that names
//! its target and the id of the request originator.

use serde::{Deserialize, Serialize};

use crate::descriptor::RequestDescriptor;
use crate::error::{Result, TrainerError};

/// Where an envelope should be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Target {
    /// Every shard in the cluster, including the sender.
    Broadcast,
    /// A single shard by index.
    Shard(u16),
    /// The client identified by the envelope's originator id.
    Originator,
}

/// A routed message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub target: Target,
    pub originator_id: u64,
    pub message: Message,
}

impl Envelope {
    pub fn new(target: Target, originator_id: u64, message: Message) -> Self {
        Self {
            target,
            originator_id,
            message,
        }
    }
}

/// All message kinds understood by a shard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    /// A batch of requests submitted atomically by one client.
    Frame(TrainingFrame),
    /// A single request handed directly to the initiating shard.
    CbowRequest(CbowRequest),
    /// Initiator fan-out asking every shard for its partial dot products.
    DistributedCbowDot(DistributedCbowDot),
    /// One shard's partial dot products for a request.
    DotContribution(DotContribution),
    /// Sent to a frame originator once every task of the frame finished.
    FrameComplete(FrameComplete),
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Frame(_) => "Frame",
            Self::CbowRequest(_) => "CbowRequest",
            Self::DistributedCbowDot(_) => "DistributedCbowDot",
            Self::DotContribution(_) => "DotContribution",
            Self::FrameComplete(_) => "FrameComplete",
        }
    }
}

/// One CBOW training step: predict `w1` from the averaged `syn0_rows`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CbowRequest {
    pub originator_id: u64,
    pub task_id: u64,
    pub frame_id: u64,
    /// Context word rows in syn0.
    pub syn0_rows: Vec<u32>,
    /// Huffman tree inner-node rows in syn1, one per code position.
    pub syn1_rows: Vec<u32>,
    /// Huffman code path of `w1`. Empty disables hierarchical softmax.
    pub codes: Vec<u8>,
    /// Target word.
    pub w1: u32,
    /// Rows of syn1neg sampled as negatives. Empty disables negative sampling.
    pub negative_rows: Vec<u32>,
    pub alpha: f64,
}

impl CbowRequest {
    pub fn descriptor(&self) -> RequestDescriptor {
        RequestDescriptor::new(self.originator_id, self.task_id)
    }

    pub fn use_hs(&self) -> bool {
        !self.codes.is_empty()
    }

    pub fn neg_samples(&self) -> usize {
        self.negative_rows.len()
    }

    /// Number of dot products the aggregation must deliver for this request:
    /// one per code position, plus target and negatives when sampling.
    pub fn expected_dots(&self) -> usize {
        let ns = if self.neg_samples() > 0 {
            self.neg_samples() + 1
        } else {
            0
        };
        self.codes.len() + ns
    }

    /// Checks structural consistency before any shard state is touched.
    pub fn validate(&self) -> Result<()> {
        if self.syn0_rows.is_empty() {
            return Err(TrainerError::protocol(format!(
                "task {} carries no context rows",
                self.task_id
            )));
        }
        if self.codes.len() != self.syn1_rows.len() {
            return Err(TrainerError::protocol(format!(
                "task {} has {} codes but {} syn1 rows",
                self.task_id,
                self.codes.len(),
                self.syn1_rows.len()
            )));
        }
        if let Some(code) = self.codes.iter().find(|&&c| c > 1) {
            return Err(TrainerError::protocol(format!(
                "task {} has non-binary code {}",
                self.task_id, code
            )));
        }
        if self.expected_dots() == 0 {
            return Err(TrainerError::protocol(format!(
                "task {} enables neither hierarchical softmax nor negative sampling",
                self.task_id
            )));
        }
        if self.neg_samples() > u16::MAX as usize {
            return Err(TrainerError::protocol(format!(
                "task {} requests {} negative samples",
                self.task_id,
                self.neg_samples()
            )));
        }
        if !(self.alpha.is_finite() && self.alpha > 0.0) {
            return Err(TrainerError::protocol(format!(
                "task {} has invalid learning rate {}",
                self.task_id, self.alpha
            )));
        }
        Ok(())
    }
}

/// Requests submitted together and completed as a unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingFrame {
    pub frame_id: u64,
    pub originator_id: u64,
    pub requests: Vec<CbowRequest>,
}

impl TrainingFrame {
    pub fn descriptor(&self) -> RequestDescriptor {
        RequestDescriptor::new(self.originator_id, self.frame_id)
    }
}

/// Broadcast from the initiating shard to every shard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributedCbowDot {
    pub originator_id: u64,
    pub task_id: u64,
    pub frame_id: u64,
    pub syn0_rows: Vec<u32>,
    pub syn1_rows: Vec<u32>,
    pub w1: u32,
    pub codes: Vec<u8>,
    pub use_hs: bool,
    pub neg_samples: u16,
    pub negative_rows: Vec<u32>,
    pub alpha: f64,
}

impl DistributedCbowDot {
    pub fn from_request(request: &CbowRequest) -> Self {
        Self {
            originator_id: request.originator_id,
            task_id: request.task_id,
            frame_id: request.frame_id,
            syn0_rows: request.syn0_rows.clone(),
            syn1_rows: request.syn1_rows.clone(),
            w1: request.w1,
            codes: request.codes.clone(),
            use_hs: request.use_hs(),
            neg_samples: request.neg_samples() as u16,
            negative_rows: request.negative_rows.clone(),
            alpha: request.alpha,
        }
    }

    /// Rebuilds the request a participant shard needs for its own chain.
    pub fn to_request(&self) -> CbowRequest {
        CbowRequest {
            originator_id: self.originator_id,
            task_id: self.task_id,
            frame_id: self.frame_id,
            syn0_rows: self.syn0_rows.clone(),
            syn1_rows: self.syn1_rows.clone(),
            codes: self.codes.clone(),
            w1: self.w1,
            negative_rows: self.negative_rows.clone(),
            alpha: self.alpha,
        }
    }

    pub fn descriptor(&self) -> RequestDescriptor {
        RequestDescriptor::new(self.originator_id, self.task_id)
    }

    /// Checks the derived flags against the row lists they summarize, then
    /// validates the carried request.
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the message is internally inconsistent.
    pub fn validate(&self) -> Result<()> {
        if self.use_hs == self.codes.is_empty() {
            return Err(TrainerError::protocol(format!(
                "task {} has use_hs {} with {} codes",
                self.task_id,
                self.use_hs,
                self.codes.len()
            )));
        }
        if self.neg_samples as usize != self.negative_rows.len() {
            return Err(TrainerError::protocol(format!(
                "task {} announces {} negative samples but carries {} rows",
                self.task_id,
                self.neg_samples,
                self.negative_rows.len()
            )));
        }
        self.to_request().validate()
    }
}

/// Partial dot products computed on one shard's column partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DotContribution {
    pub originator_id: u64,
    pub task_id: u64,
    pub shard_index: u16,
    /// Number of shards whose contributions make the aggregation ready.
    pub expected_shards: u16,
    pub partial: Vec<f32>,
}

impl DotContribution {
    pub fn descriptor(&self) -> RequestDescriptor {
        RequestDescriptor::new(self.originator_id, self.task_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameComplete {
    pub frame_id: u64,
}
