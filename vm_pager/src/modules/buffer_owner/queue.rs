use core::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use super::BufferOwner;
use crate::pbuf_pool::BufferId;

#[derive(Default)]
struct Queues {
    clean: Vec<BufferId>,
    dirty: Vec<BufferId>,
}

/// Owner that keeps a clean and a dirty queue of buffers
/// and counts the pool buffers currently paging for it
#[derive(Default)]
pub struct BufferQueueOwner {
    queues: Mutex<Queues>,
    in_flight: AtomicUsize,
}

impl BufferQueueOwner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn link_clean(&self, id: BufferId) {
        self.queues.lock().clean.push(id);
    }

    pub fn link_dirty(&self, id: BufferId) {
        self.queues.lock().dirty.push(id);
    }

    /// Removes `id` from both queues, returns `true` if it was linked
    pub fn unlink(&self, id: BufferId) -> bool {
        let mut queues = self.queues.lock();
        let before = queues.clean.len() + queues.dirty.len();
        queues.clean.retain(|b| *b != id);
        queues.dirty.retain(|b| *b != id);

        before != queues.clean.len() + queues.dirty.len()
    }

    /// Number of pool buffers currently bound to this owner
    pub fn paging_in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }
}

impl BufferOwner for BufferQueueOwner {
    fn contains_buffer(&self, id: BufferId) -> bool {
        let queues = self.queues.lock();
        queues.clean.contains(&id) || queues.dirty.contains(&id)
    }

    fn paging_started(&self, _id: BufferId) {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
    }

    fn paging_finished(&self, _id: BufferId) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}
