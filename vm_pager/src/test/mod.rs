use core::sync::atomic::{AtomicUsize, Ordering};
use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;

use crate::{
    lookup,
    modules::{
        buffer_owner::BufferQueueOwner,
        pager::{
            PageIndex, PageRequest, PageResidency, PagerOps, PagerStatus, Protection, PutFlags,
            Variant,
        },
    },
    BackedObject, Handle, LockedObject, ObjectRef, PbufConfig, PbufPool, Quota,
};


pub(crate) fn init_test_logging() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Trace)
        .try_init();
}

pub(crate) fn get_test_pool(buffer_count: usize) -> Arc<PbufPool> {
    Arc::new(
        PbufPool::new(PbufConfig {
            buffer_count,
            max_transfer_size: 4096,
            pin_memory: false,
        })
        .unwrap(),
    )
}

/// Pager that keeps its "backing store" in a map and moves every page
/// through a pool buffer bound to its owner, like a real device transfer would
pub(crate) struct PooledMapPager {
    pool: Arc<PbufPool>,
    quota: Quota,
    owner: Arc<BufferQueueOwner>,
    objects: Mutex<Vec<ObjectRef>>,
    store: Mutex<HashMap<(Handle, PageIndex), Vec<u8>>>,
    pub(crate) inits: AtomicUsize,
    pub(crate) transfers: AtomicUsize,
}

impl PooledMapPager {
    pub(crate) fn new(pool: Arc<PbufPool>, quota: Quota) -> Self {
        Self {
            pool,
            quota,
            owner: Arc::new(BufferQueueOwner::new()),
            objects: Mutex::new(Vec::new()),
            store: Mutex::new(HashMap::new()),
            inits: AtomicUsize::new(0),
            transfers: AtomicUsize::new(0),
        }
    }

    pub(crate) fn owner(&self) -> &Arc<BufferQueueOwner> {
        &self.owner
    }

    pub(crate) fn quota(&self) -> &Quota {
        &self.quota
    }

    pub(crate) fn live_object_count(&self) -> usize {
        self.objects.lock().iter().filter(|o| !o.is_dead()).count()
    }

    fn stored(&self, handle: Handle, pindex: PageIndex) -> bool {
        self.store.lock().contains_key(&(handle, pindex))
    }
}

impl PagerOps for PooledMapPager {
    fn init(&self) -> Result<(), ()> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn alloc(
        &self,
        handle: Handle,
        size: u64,
        _protection: Protection,
        _offset: u64,
    ) -> Option<ObjectRef> {
        // lock order: object list first, then the object
        let mut objects = self.objects.lock();
        if let Some(object) = lookup(objects.iter(), handle) {
            return Some(object);
        }
        objects.retain(|o| !o.is_dead());

        let object = BackedObject::new(Variant::Swap, handle, size);
        objects.push(object.clone());
        Some(object)
    }

    fn dealloc(&self, object: &mut LockedObject<'_>) {
        // the object is already dead, `alloc` drops it from the list later on
        let handle = object.handle();
        self.store.lock().retain(|(h, _), _| *h != handle);
    }

    fn get_pages(&self, object: &BackedObject, pages: &mut [PageRequest<'_>]) -> PagerStatus {
        let mut result = PagerStatus::Ok;

        for page in pages.iter_mut() {
            let source = self.store.lock().get(&(object.handle(), page.pindex)).cloned();
            let source = match source {
                Some(source) => source,
                None => {
                    page.status = PagerStatus::Fail;
                    result = PagerStatus::Fail;
                    continue;
                }
            };

            let mut bound = self.pool.lease(Some(&self.quota)).into_bound(&self.owner);
            let len = source.len().min(bound.capacity()).min(page.data.len());
            bound.data_mut()[..len].copy_from_slice(&source[..len]);
            bound.set_transfer_len(len);
            let buf = bound.unbind();

            page.data[..len].copy_from_slice(buf.transfer_data());
            page.status = PagerStatus::Ok;
            self.pool.release(buf, Some(&self.quota));
            self.transfers.fetch_add(1, Ordering::SeqCst);
        }

        result
    }

    fn put_pages(&self, object: &BackedObject, pages: &mut [PageRequest<'_>], _flags: PutFlags) {
        for page in pages.iter_mut() {
            let mut buf = self.pool.lease(Some(&self.quota));
            buf.bind(&self.owner);

            let len = page.data.len().min(buf.capacity());
            buf.data_mut()[..len].copy_from_slice(&page.data[..len]);
            buf.set_transfer_len(len);
            self.store
                .lock()
                .insert((object.handle(), page.pindex), buf.transfer_data().to_vec());

            buf.unbind();
            self.pool.release(buf, Some(&self.quota));
            page.status = PagerStatus::Ok;
            self.transfers.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn has_page(
        &self,
        object: &BackedObject,
        pindex: PageIndex,
        before: Option<&mut u64>,
        after: Option<&mut u64>,
    ) -> PageResidency {
        let handle = object.handle();
        if !self.stored(handle, pindex) {
            return PageResidency::NotPresent;
        }

        if let Some(before) = before {
            let mut count = 0;
            while count < pindex && self.stored(handle, pindex - count - 1) {
                count += 1;
            }
            *before = count;
        }

        if let Some(after) = after {
            let mut count = 0;
            while pindex + count + 1 < object.size() && self.stored(handle, pindex + count + 1) {
                count += 1;
            }
            *after = count;
        }

        PageResidency::Present
    }

    fn page_unswapped(&self, object: &BackedObject, pindex: PageIndex) {
        self.store.lock().remove(&(object.handle(), pindex));
    }
}
