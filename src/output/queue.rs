use std::collections::VecDeque;

use crate::capture::FrameBuffer;

/// Pending and ready FIFOs of one line.
///
/// Storage is reserved up front so the interrupt handlers can move buffers
/// around without allocating.
#[derive(Debug, Default)]
pub struct BufferQueues {
    pending: VecDeque<FrameBuffer>,
    ready: VecDeque<FrameBuffer>,
    /// Empty deque swapped in for `ready` while a completion batch is out
    spare: VecDeque<FrameBuffer>,
}

impl BufferQueues {
    pub fn with_capacity(depth: usize) -> Self {
        Self {
            pending: VecDeque::with_capacity(depth),
            ready: VecDeque::with_capacity(depth),
            spare: VecDeque::with_capacity(depth),
        }
    }

    pub fn add_pending(&mut self, buf: FrameBuffer) {
        self.pending.push_back(buf);
    }

    pub fn take_pending(&mut self) -> Option<FrameBuffer> {
        self.pending.pop_front()
    }

    pub fn add_ready(&mut self, buf: FrameBuffer) {
        self.ready.push_back(buf);
    }

    /// Detach everything in `ready`, oldest first.
    pub fn take_ready_batch(&mut self) -> VecDeque<FrameBuffer> {
        let spare = std::mem::take(&mut self.spare);
        std::mem::replace(&mut self.ready, spare)
    }

    /// Hand back a drained batch deque so its storage is reused.
    pub fn recycle(&mut self, batch: VecDeque<FrameBuffer>) {
        debug_assert!(batch.is_empty());
        if batch.capacity() > self.spare.capacity() {
            self.spare = batch;
        }
    }

    /// Remove every queued buffer, pending first then ready.
    pub fn drain_all(&mut self) -> impl Iterator<Item = FrameBuffer> + '_ {
        self.pending.drain(..).chain(self.ready.drain(..))
    }

    pub fn pending(&self) -> &VecDeque<FrameBuffer> {
        &self.pending
    }

    pub fn ready(&self) -> &VecDeque<FrameBuffer> {
        &self.ready
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.ready.is_empty()
    }
}
