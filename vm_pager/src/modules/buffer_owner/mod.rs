mod queue;

pub use queue::BufferQueueOwner;

use crate::pbuf_pool::BufferId;

/// A vnode-like object that pool buffers get attached to while they page for it.
///
/// The pool never takes a reference on the owner, it only remembers the attachment.
pub trait BufferOwner: Send + Sync {
    /// Checks if `id` is linked into one of the owner's own buffer queues
    fn contains_buffer(&self, id: BufferId) -> bool;

    /// `id` was attached and is now paging for this owner
    fn paging_started(&self, _id: BufferId) {}

    /// `id` was detached again
    fn paging_finished(&self, _id: BufferId) {}
}
