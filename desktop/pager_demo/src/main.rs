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

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    thread,
    time::Instant,
};

use env_logger::{Builder, Env};
use log::{info, warn};
use vm_pager::{
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

const PAGE_SIZE: usize = 4096;
const THREADS: usize = 8;
const PAGES_PER_THREAD: u64 = 32;

/// Swap-like pager that keeps its pages in memory and copies them
/// through pool buffers, one buffer per page
struct MemorySwapPager {
    pool: Arc<PbufPool>,
    quota: Quota,
    owner: Arc<BufferQueueOwner>,
    objects: Mutex<Vec<ObjectRef>>,
    slots: Mutex<HashMap<(Handle, PageIndex), Box<[u8]>>>,
}

impl PagerOps for MemorySwapPager {
    fn alloc(
        &self,
        handle: Handle,
        size: u64,
        _protection: Protection,
        _offset: u64,
    ) -> Option<ObjectRef> {
        let mut objects = self.objects.lock().ok()?;
        if let Some(object) = lookup(objects.iter(), handle) {
            return Some(object);
        }

        let object = BackedObject::new(Variant::Swap, handle, size);
        objects.push(object.clone());
        Some(object)
    }

    fn dealloc(&self, object: &mut LockedObject<'_>) {
        let handle = object.handle();
        if let Ok(mut slots) = self.slots.lock() {
            slots.retain(|(h, _), _| *h != handle);
        }
    }

    fn get_pages(&self, object: &BackedObject, pages: &mut [PageRequest<'_>]) -> PagerStatus {
        let mut result = PagerStatus::Ok;

        for page in pages.iter_mut() {
            let mut buf = self.pool.lease(Some(&self.quota));
            buf.bind(&self.owner);

            let found = match self.slots.lock() {
                Ok(slots) => match slots.get(&(object.handle(), page.pindex)) {
                    Some(data) => {
                        buf.data_mut()[..data.len()].copy_from_slice(data);
                        buf.set_transfer_len(data.len());
                        true
                    }
                    None => false,
                },
                Err(_) => false,
            };

            buf.unbind();

            if found {
                let len = buf.transfer_len().min(page.data.len());
                page.data[..len].copy_from_slice(&buf.transfer_data()[..len]);
                page.status = PagerStatus::Ok;
            } else {
                page.status = PagerStatus::Fail;
                result = PagerStatus::Fail;
            }

            self.pool.release(buf, Some(&self.quota));
        }

        result
    }

    fn put_pages(&self, object: &BackedObject, pages: &mut [PageRequest<'_>], _flags: PutFlags) {
        for page in pages.iter_mut() {
            let mut buf = match self.pool.try_lease(&self.quota) {
                Some(buf) => buf,
                None => {
                    // pageout must not sleep on the pool, the caller retries later
                    page.status = PagerStatus::Again;
                    continue;
                }
            };
            buf.bind(&self.owner);

            let len = page.data.len().min(buf.capacity());
            buf.data_mut()[..len].copy_from_slice(&page.data[..len]);
            buf.set_transfer_len(len);

            page.status = match self.slots.lock() {
                Ok(mut slots) => {
                    slots.insert((object.handle(), page.pindex), buf.transfer_data().into());
                    PagerStatus::Ok
                }
                Err(_) => PagerStatus::Error,
            };

            buf.unbind();
            self.pool.release(buf, Some(&self.quota));
        }
    }

    fn has_page(
        &self,
        object: &BackedObject,
        pindex: PageIndex,
        before: Option<&mut u64>,
        after: Option<&mut u64>,
    ) -> PageResidency {
        if let Some(before) = before {
            *before = 0;
        }
        if let Some(after) = after {
            *after = 0;
        }

        match self.slots.lock() {
            Ok(slots) if slots.contains_key(&(object.handle(), pindex)) => PageResidency::Present,
            _ => PageResidency::NotPresent,
        }
    }
}

fn main() {
    Builder::from_env(Env::default())
        .filter_level(log::LevelFilter::Info)
        .format_module_path(false)
        .init();

    let pool = match PbufPool::new(PbufConfig {
        buffer_count: 4,
        max_transfer_size: PAGE_SIZE,
        ..PbufConfig::default()
    }) {
        Ok(pool) => Arc::new(pool),
        Err(()) => {
            log::error!("could not create pbuf pool");
            return;
        }
    };

    let quota = pool.subsystem_quota("swap");
    let pager = Arc::new(MemorySwapPager {
        pool: pool.clone(),
        quota,
        owner: Arc::new(BufferQueueOwner::new()),
        objects: Mutex::new(Vec::new()),
        slots: Mutex::new(HashMap::new()),
    });

    let registry = vm_pager::PagerRegistry::builder()
        .register(Variant::Swap, pager.clone())
        .build();
    registry.init_all();

    let object = match registry.allocate(
        Variant::Swap,
        Handle::new(0xdead_0000),
        THREADS as u64 * PAGES_PER_THREAD,
        Protection::READ_WRITE,
        0,
    ) {
        Some(object) => object,
        None => {
            log::error!("swap pager refused to allocate");
            return;
        }
    };

    let start = Instant::now();
    let retries = Mutex::new(0usize);

    thread::scope(|s| {
        for t in 0..THREADS {
            let registry = &registry;
            let object = &object;
            let retries = &retries;
            s.spawn(move || {
                let first = t as u64 * PAGES_PER_THREAD;
                for pindex in first..first + PAGES_PER_THREAD {
                    let mut frame = vec![(pindex % 251) as u8; PAGE_SIZE];

                    loop {
                        let mut out = [PageRequest::new(pindex, &mut frame)];
                        registry.put_pages(object, &mut out, PutFlags::SYNC);
                        if out[0].status != PagerStatus::Again {
                            break;
                        }
                        if let Ok(mut retries) = retries.lock() {
                            *retries += 1;
                        }
                        thread::yield_now();
                    }

                    let mut frame = vec![0u8; PAGE_SIZE];
                    let mut pages = [PageRequest::new(pindex, &mut frame)];
                    let status = registry.get_pages(object, &mut pages);
                    drop(pages);

                    if status != PagerStatus::Ok || frame.iter().any(|b| *b != (pindex % 251) as u8)
                    {
                        warn!("page {} came back damaged ({:?})", pindex, status);
                    }
                }
            });
        }
    });

    info!(
        "paged {} pages out and in with {} threads in {:?} ({} pageout retries)",
        THREADS as u64 * PAGES_PER_THREAD,
        THREADS,
        start.elapsed(),
        retries.lock().map(|r| *r).unwrap_or(0)
    );
    info!(
        "pool: {} of {} buffers free, quota left: {:?}",
        pool.free_count(),
        pool.buffer_count(),
        pager.quota.available()
    );

    // the backing store goes away, the object keeps answering
    object.lock().retire_pager();
    let mut frame = vec![0u8; PAGE_SIZE];
    let mut pages = [PageRequest::new(0, &mut frame)];
    info!(
        "retired object: get_pages -> {:?}, has_page -> {:?}",
        registry.get_pages(&object, &mut pages),
        registry.has_page(&object, 0, None, None)
    );

    registry.release_object(object);
}
