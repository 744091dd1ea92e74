// rust/w2v-core/src/completion.rs

//! Frame completion tracking.
//!
//! A frame is a batch of tasks submitted together by one client. Exactly one
//! shard tracks a given frame; it records each finished task and, once all
//! of them are done, exactly one caller gets to retrieve the frame metadata
//! and notify the frame originator.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::descriptor::RequestDescriptor;
use crate::protocol::TrainingFrame;

/// Metadata of a frame being tracked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameDescriptor {
    pub frame_originator_id: u64,
    tasks: HashMap<u64, bool>,
    created_at: Instant,
}

impl FrameDescriptor {
    pub fn new(frame_originator_id: u64) -> Self {
        Self {
            frame_originator_id,
            tasks: HashMap::new(),
            created_at: Instant::now(),
        }
    }

    pub fn add_task(&mut self, task_id: u64) {
        self.tasks.entry(task_id).or_insert(false);
    }

    /// Marks a task finished. Returns false for tasks this frame never held.
    pub fn finish_task(&mut self, task_id: u64) -> bool {
        match self.tasks.get_mut(&task_id) {
            Some(done) => {
                *done = true;
                true
            }
            None => false,
        }
    }

    pub fn expected_tasks(&self) -> usize {
        self.tasks.len()
    }

    pub fn completed_tasks(&self) -> usize {
        self.tasks.values().filter(|done| **done).count()
    }

    pub fn is_finished(&self) -> bool {
        !self.tasks.is_empty() && self.completed_tasks() == self.tasks.len()
    }
}

/// Frame bookkeeping consumed by the training drivers.
///
/// The check-then-act sequence `is_tracking_frame` → `notify_frame` →
/// `is_completed` → `get_completed_frame_info` is not atomic as a whole;
/// implementations must make the last step atomic so that at most one
/// caller observes the completed metadata.
pub trait FrameCompletionHandler: Send + Sync {
    fn is_tracking_frame(&self, descriptor: RequestDescriptor) -> bool;

    /// Records completion of one task of the frame `(originator_id, frame_id)`.
    fn notify_frame(&self, originator_id: u64, frame_id: u64, task_id: u64);

    fn is_completed(&self, descriptor: RequestDescriptor) -> bool;

    /// Removes and returns a completed frame's metadata. Returns `None` if
    /// the frame is unknown, unfinished, or already consumed by another
    /// caller.
    fn get_completed_frame_info(&self, descriptor: RequestDescriptor) -> Option<FrameDescriptor>;
}

/// Concurrent [`FrameCompletionHandler`] backed by a sharded map.
#[derive(Debug, Default)]
pub struct FrameTracker {
    frames: DashMap<RequestDescriptor, FrameDescriptor>,
}

impl FrameTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one task of a frame, creating the frame on first use.
    pub fn add_hook(&self, originator_id: u64, frame_id: u64, task_id: u64) {
        self.frames
            .entry(RequestDescriptor::new(originator_id, frame_id))
            .or_insert_with(|| FrameDescriptor::new(originator_id))
            .add_task(task_id);
    }

    /// Registers every task of `frame` before any of them is started.
    pub fn track_frame(&self, frame: &TrainingFrame) {
        let mut entry = self
            .frames
            .entry(frame.descriptor())
            .or_insert_with(|| FrameDescriptor::new(frame.originator_id));
        for request in &frame.requests {
            entry.add_task(request.task_id);
        }
    }

    /// Stops tracking a frame regardless of its progress.
    pub fn untrack(&self, descriptor: RequestDescriptor) -> bool {
        self.frames.remove(&descriptor).is_some()
    }

    /// Number of frames not yet consumed.
    pub fn tracked_frames(&self) -> usize {
        self.frames.len()
    }

    /// Drops frames tracked for longer than `max_age` and returns them.
    ///
    /// A frame whose tasks were evicted from their chains can never finish,
    /// so it has to be aged out here as well.
    pub fn evict_stale(&self, max_age: Duration) -> Vec<RequestDescriptor> {
        let mut evicted = Vec::new();
        self.frames.retain(|descriptor, frame| {
            let keep = frame.created_at.elapsed() <= max_age;
            if !keep {
                evicted.push(*descriptor);
            }
            keep
        });
        evicted
    }
}

impl FrameCompletionHandler for FrameTracker {
    fn is_tracking_frame(&self, descriptor: RequestDescriptor) -> bool {
        self.frames.contains_key(&descriptor)
    }

    fn notify_frame(&self, originator_id: u64, frame_id: u64, task_id: u64) {
        let descriptor = RequestDescriptor::new(originator_id, frame_id);
        match self.frames.get_mut(&descriptor) {
            Some(mut frame) => {
                if !frame.finish_task(task_id) {
                    tracing::debug!("Frame {} has no task {}", descriptor, task_id);
                }
            }
            None => tracing::debug!("Frame {} is not tracked here", descriptor),
        }
    }

    fn is_completed(&self, descriptor: RequestDescriptor) -> bool {
        self.frames
            .get(&descriptor)
            .map(|frame| frame.is_finished())
            .unwrap_or(false)
    }

    fn get_completed_frame_info(&self, descriptor: RequestDescriptor) -> Option<FrameDescriptor> {
        self.frames
            .remove_if(&descriptor, |_, frame| frame.is_finished())
            .map(|(_, frame)| frame)
    }
}
