/*
 *  Copyright (C) 2025  Markus Elias Gerber
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  You should have received a copy of the GNU General Public License
 *  along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

mod dead;
mod variant;

pub use dead::DeadPagerModule;
pub use variant::{Variant, VARIANT_COUNT};

use std::sync::Arc;

use crate::backed_object::{BackedObject, Handle, LockedObject, ObjectRef};

/// Index of a page inside a backed object
pub type PageIndex = u64;

/// Outcome of a pager operation, per page or per call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagerStatus {
    /// Transfer completed
    Ok,
    /// The request itself was malformed
    Bad,
    /// Hard failure, the request can never succeed
    Fail,
    /// Transfer was started and will complete later
    Pend,
    /// I/O error while transferring
    Error,
    /// Transient failure, nothing was lost and the caller may try again
    Again,
}

impl PagerStatus {
    #[inline]
    pub fn is_ok(&self) -> bool {
        *self == PagerStatus::Ok
    }
}

/// Result of asking a pager whether it holds a page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageResidency {
    Present,
    NotPresent,
}

/// Access rights requested for a new backed object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Protection {
    pub read: bool,
    pub write: bool,
    pub execute: bool,
}

impl Protection {
    pub const NONE: Protection = Protection {
        read: false,
        write: false,
        execute: false,
    };
    pub const READ: Protection = Protection {
        read: true,
        write: false,
        execute: false,
    };
    pub const READ_WRITE: Protection = Protection {
        read: true,
        write: true,
        execute: false,
    };
    pub const ALL: Protection = Protection {
        read: true,
        write: true,
        execute: true,
    };
}

/// Modifiers of a pageout request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PutFlags {
    /// wait for the write to reach the backing store
    pub sync: bool,
    /// pages are invalidated once written
    pub invalidate: bool,
    /// pageout is done to reclaim memory
    pub reclaim: bool,
}

impl PutFlags {
    pub const ASYNC: PutFlags = PutFlags {
        sync: false,
        invalidate: false,
        reclaim: false,
    };
    pub const SYNC: PutFlags = PutFlags {
        sync: true,
        invalidate: false,
        reclaim: false,
    };
}

/// One page of a paging request.
///
/// For page-ins `data` is the destination frame, for pageouts it is the source.
pub struct PageRequest<'a> {
    pub pindex: PageIndex,
    pub data: &'a mut [u8],
    pub status: PagerStatus,
}

impl<'a> PageRequest<'a> {
    pub fn new(pindex: PageIndex, data: &'a mut [u8]) -> Self {
        Self {
            pindex,
            data,
            status: PagerStatus::Pend,
        }
    }
}

/// Completion callback of an asynchronous page-in
pub type PageInDone = Box<dyn FnOnce(PagerStatus) + Send + 'static>;

/// The operations every backing store strategy provides.
///
/// One instance is registered per `Variant` and is never replaced afterwards,
/// so implementations keep their mutable state behind interior mutability.
pub trait PagerOps: Send + Sync {
    /// Called once when the registry is initialized
    fn init(&self) -> Result<(), ()> {
        Ok(())
    }

    /// Creates (or finds) the backed object for `handle`
    fn alloc(
        &self,
        handle: Handle,
        size: u64,
        protection: Protection,
        offset: u64,
    ) -> Option<ObjectRef>;

    /// Releases all pager resources of `object`.
    ///
    /// The object is exclusively locked for the duration of this call.
    fn dealloc(&self, object: &mut LockedObject<'_>);

    /// Reads `pages` from the backing store, setting the status of every page.
    ///
    /// Returns the status of the whole request.
    fn get_pages(&self, object: &BackedObject, pages: &mut [PageRequest<'_>]) -> PagerStatus;

    /// Starts reading `pages` and calls `done` once the request finished.
    ///
    /// Strategies without real asynchronous I/O get the synchronous read followed by `done`.
    fn get_pages_async(
        &self,
        object: &BackedObject,
        pages: &mut [PageRequest<'_>],
        done: PageInDone,
    ) -> PagerStatus {
        let status = self.get_pages(object, pages);
        done(status);
        status
    }

    /// Writes `pages` back, the outcome is stored in the status of every page
    fn put_pages(&self, object: &BackedObject, pages: &mut [PageRequest<'_>], flags: PutFlags);

    /// Checks if the backing store holds `pindex`.
    ///
    /// If present, `before`/`after` receive the number of contiguous pages that
    /// are also present directly before/after `pindex`.
    fn has_page(
        &self,
        object: &BackedObject,
        pindex: PageIndex,
        before: Option<&mut u64>,
        after: Option<&mut u64>,
    ) -> PageResidency;

    /// Tells the pager that the resident copy of `pindex` no longer needs its stored copy
    fn page_unswapped(&self, _object: &BackedObject, _pindex: PageIndex) {}
}

/// Lets the creator of a pager keep a handle to it after registration
impl<P: PagerOps + ?Sized> PagerOps for Arc<P> {
    fn init(&self) -> Result<(), ()> {
        (**self).init()
    }

    fn alloc(
        &self,
        handle: Handle,
        size: u64,
        protection: Protection,
        offset: u64,
    ) -> Option<ObjectRef> {
        (**self).alloc(handle, size, protection, offset)
    }

    fn dealloc(&self, object: &mut LockedObject<'_>) {
        (**self).dealloc(object)
    }

    fn get_pages(&self, object: &BackedObject, pages: &mut [PageRequest<'_>]) -> PagerStatus {
        (**self).get_pages(object, pages)
    }

    fn get_pages_async(
        &self,
        object: &BackedObject,
        pages: &mut [PageRequest<'_>],
        done: PageInDone,
    ) -> PagerStatus {
        (**self).get_pages_async(object, pages, done)
    }

    fn put_pages(&self, object: &BackedObject, pages: &mut [PageRequest<'_>], flags: PutFlags) {
        (**self).put_pages(object, pages, flags)
    }

    fn has_page(
        &self,
        object: &BackedObject,
        pindex: PageIndex,
        before: Option<&mut u64>,
        after: Option<&mut u64>,
    ) -> PageResidency {
        (**self).has_page(object, pindex, before, after)
    }

    fn page_unswapped(&self, object: &BackedObject, pindex: PageIndex) {
        (**self).page_unswapped(object, pindex)
    }
}
