use std::sync::{Arc, Weak};

use log::{error, trace};

use super::pbuf::{BoundPbuf, Pbuf};
use crate::modules::buffer_owner::BufferOwner;

impl<'p> Pbuf<'p> {
    /// Attaches this buffer to `owner` for one paging transfer.
    ///
    /// The owner is not referenced, only remembered. Panics if the buffer is already bound.
    pub fn bind<O: BufferOwner + 'static>(&mut self, owner: &Arc<O>) {
        if self.header.owner.is_some() {
            error!("pbuf {}: bind while already bound", self.id());
            panic!("pbuf {}: already bound to an owner", self.id());
        }

        let weak: Weak<O> = Arc::downgrade(owner);
        self.header.owner = Some(weak as Weak<dyn BufferOwner>);
        self.header.paging = true;
        owner.paging_started(self.id());

        trace!("pbuf {}: bound", self.id());
    }

    /// Detaches this buffer from its owner.
    ///
    /// Panics if the buffer is not bound or if the owner still has it
    /// linked into its own buffer queues.
    pub fn unbind(&mut self) {
        let owner = match self.header.owner.as_ref() {
            Some(owner) => owner.upgrade(),
            None => {
                error!("pbuf {}: unbind while not bound", self.id());
                panic!("pbuf {}: not bound to an owner", self.id());
            }
        };

        if let Some(owner) = owner.as_ref() {
            if owner.contains_buffer(self.id()) {
                error!("pbuf {}: unbind while linked into the owner", self.id());
                panic!("pbuf {}: still linked into its owner's buffer queue", self.id());
            }
        }

        self.header.owner = None;
        self.header.paging = false;

        if let Some(owner) = owner {
            owner.paging_finished(self.id());
        }

        trace!("pbuf {}: unbound", self.id());
    }

    /// Type checked version of `bind`
    pub fn into_bound<O: BufferOwner + 'static>(mut self, owner: &Arc<O>) -> BoundPbuf<'p> {
        self.bind(owner);
        BoundPbuf { buf: self }
    }
}

impl<'p> BoundPbuf<'p> {
    /// Type checked version of `unbind`
    pub fn unbind(mut self) -> Pbuf<'p> {
        self.buf.unbind();
        self.buf
    }
}
