//! Buffer for remote candidates that arrive before the remote description.

use crate::types::IceCandidate;
use std::collections::VecDeque;

/// FIFO of candidates waiting for their session's remote description.
///
/// Candidates are handed out exactly once, in arrival order, by
/// [`CandidateBuffer::drain_into`].
#[derive(Debug, Default, Clone)]
pub struct CandidateBuffer {
    queue: VecDeque<IceCandidate>,
}

impl CandidateBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, candidate: IceCandidate) {
        self.queue.push_back(candidate);
    }

    /// Calls `apply` once per buffered candidate in insertion order and leaves
    /// the buffer empty. Returns how many candidates were handed out.
    pub fn drain_into<F>(&mut self, mut apply: F) -> usize
    where
        F: FnMut(IceCandidate),
    {
        let drained = std::mem::take(&mut self.queue);
        let count = drained.len();
        for candidate in drained {
            apply(candidate);
        }
        count
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
