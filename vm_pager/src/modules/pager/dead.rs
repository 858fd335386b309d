use super::{PageIndex, PageRequest, PageResidency, PagerOps, PagerStatus, Protection, PutFlags};
use crate::backed_object::{BackedObject, Handle, LockedObject, ObjectRef};

/// Pager of objects whose backing store is permanently gone.
///
/// Every operation is total: nothing can be allocated, reads fail hard and
/// writes are bounced back with `Again` so that a pageout caller can retry elsewhere.
pub struct DeadPagerModule;

impl PagerOps for DeadPagerModule {
    fn alloc(
        &self,
        _handle: Handle,
        _size: u64,
        _protection: Protection,
        _offset: u64,
    ) -> Option<ObjectRef> {
        None
    }

    fn dealloc(&self, _object: &mut LockedObject<'_>) {}

    fn get_pages(&self, _object: &BackedObject, pages: &mut [PageRequest<'_>]) -> PagerStatus {
        for page in pages.iter_mut() {
            page.status = PagerStatus::Fail;
        }

        PagerStatus::Fail
    }

    fn put_pages(&self, _object: &BackedObject, pages: &mut [PageRequest<'_>], _flags: PutFlags) {
        for page in pages.iter_mut() {
            page.status = PagerStatus::Again;
        }
    }

    fn has_page(
        &self,
        _object: &BackedObject,
        _pindex: PageIndex,
        before: Option<&mut u64>,
        after: Option<&mut u64>,
    ) -> PageResidency {
        if let Some(before) = before {
            *before = 0;
        }
        if let Some(after) = after {
            *after = 0;
        }

        PageResidency::NotPresent
    }
}
