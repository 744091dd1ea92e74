// rust/w2v-core/src/descriptor.rs

//! Cluster-wide identity of a distributed training request.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Composite `(originator, task)` key naming one distributed request.
///
/// The same type keys frames, using the frame id in place of the task id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestDescriptor {
    pub originator_id: u64,
    pub task_id: u64,
}

impl RequestDescriptor {
    pub fn new(originator_id: u64, task_id: u64) -> Self {
        Self {
            originator_id,
            task_id,
        }
    }
}

impl fmt::Display for RequestDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.originator_id, self.task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_equality_uses_both_fields() {
        let a = RequestDescriptor::new(1, 7);
        assert_eq!(a, RequestDescriptor::new(1, 7));
        assert_ne!(a, RequestDescriptor::new(2, 7));
        assert_ne!(a, RequestDescriptor::new(1, 8));
    }

    #[test]
    fn test_swapped_fields_hash_apart() {
        let mut set = HashSet::new();
        set.insert(RequestDescriptor::new(3, 5));
        set.insert(RequestDescriptor::new(5, 3));
        set.insert(RequestDescriptor::new(3, 5));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_display() {
        assert_eq!(RequestDescriptor::new(12, 99).to_string(), "12/99");
    }
}
