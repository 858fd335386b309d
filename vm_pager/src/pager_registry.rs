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

use core::array;

use log::{debug, error, info, trace};
use try_lock::TryLock;

use crate::{
    backed_object::{BackedObject, Handle, LockedObject, ObjectRef},
    modules::pager::{
        DeadPagerModule, PageInDone, PageIndex, PageRequest, PageResidency, PagerOps,
        PagerStatus, Protection, PutFlags, Variant, VARIANT_COUNT,
    },
};

static DEAD_PAGER: DeadPagerModule = DeadPagerModule;

/// Fixed table of pager vtables, one per registered variant.
///
/// Dispatch through the registry is total: objects whose variant has no vtable
/// (or that were retired) are served by the dead pager.
pub struct PagerRegistry {
    pagers: [Option<Box<dyn PagerOps>>; VARIANT_COUNT],

    /// registration order, `init_all` follows it
    order: Vec<Variant>,

    /// `true` once every pager was initialized
    initialized: TryLock<bool>,
}

pub struct PagerRegistryBuilder {
    pagers: [Option<Box<dyn PagerOps>>; VARIANT_COUNT],
    order: Vec<Variant>,
}

impl PagerRegistryBuilder {
    fn new() -> Self {
        let mut pagers: [Option<Box<dyn PagerOps>>; VARIANT_COUNT] = array::from_fn(|_| None);
        pagers[Variant::Dead.index()] = Some(Box::new(DeadPagerModule));

        Self {
            pagers,
            order: vec![Variant::Dead],
        }
    }

    /// Registers `ops` as the pager of `variant`.
    ///
    /// Panics if `variant` already has a pager, the dead pager is always registered.
    pub fn register<P: PagerOps + 'static>(mut self, variant: Variant, ops: P) -> Self {
        let slot = &mut self.pagers[variant.index()];
        assert!(slot.is_none(), "{} pager registered twice", variant);

        *slot = Some(Box::new(ops));
        self.order.push(variant);
        self
    }

    pub fn build(self) -> PagerRegistry {
        PagerRegistry {
            pagers: self.pagers,
            order: self.order,
            initialized: TryLock::new(false),
        }
    }
}

impl PagerRegistry {
    pub fn builder() -> PagerRegistryBuilder {
        PagerRegistryBuilder::new()
    }

    /// Calls `init` of every registered pager once, in registration order.
    ///
    /// A pager that fails to initialize leaves the paging layer unusable, so this panics.
    /// Calling this a second time does nothing.
    pub fn init_all(&self) {
        let mut initialized = match self.initialized.try_lock() {
            Some(guard) => guard,
            None => panic!("pager registry initialized from two threads at once"),
        };

        if *initialized {
            debug!("pagers already initialized");
            return;
        }

        for variant in self.order.iter() {
            let ops = self.ops(*variant);
            if ops.init().is_err() {
                error!("{} pager failed to initialize", variant);
                panic!("{} pager failed to initialize", variant);
            }
            trace!("{} pager initialized", variant);
        }

        *initialized = true;
        info!("initialized {} pagers", self.order.len());
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.try_lock().map(|v| *v).unwrap_or(false)
    }

    #[inline]
    pub fn is_registered(&self, variant: Variant) -> bool {
        self.pagers[variant.index()].is_some()
    }

    /// Returns the vtable serving `variant`
    pub fn ops(&self, variant: Variant) -> &dyn PagerOps {
        match self.pagers[variant.index()].as_deref() {
            Some(ops) => ops,
            None => {
                debug!("no {} pager registered, using dead pager", variant);
                &DEAD_PAGER
            }
        }
    }

    /// Creates a backed object through the pager of `variant`.
    ///
    /// Returns `None` if `variant` has no registered pager or the pager refuses.
    pub fn allocate(
        &self,
        variant: Variant,
        handle: Handle,
        size: u64,
        protection: Protection,
        offset: u64,
    ) -> Option<ObjectRef> {
        let ops = match self.pagers[variant.index()].as_deref() {
            Some(ops) => ops,
            None => {
                debug!("allocate: no {} pager registered", variant);
                return None;
            }
        };

        let object = ops.alloc(handle, size, protection, offset)?;
        debug_assert_eq!(
            object.variant(),
            variant,
            "{} pager allocated an object of another variant",
            variant
        );

        trace!(
            "allocate: {} object {:#x} with {} pages",
            variant,
            handle.raw(),
            size
        );
        Some(object)
    }

    /// Same as `allocate`, but takes a numeric variant tag from an untrusted source
    pub fn allocate_raw(
        &self,
        tag: u32,
        handle: Handle,
        size: u64,
        protection: Protection,
        offset: u64,
    ) -> Option<ObjectRef> {
        match Variant::from_raw(tag) {
            Some(variant) => self.allocate(variant, handle, size, protection, offset),
            None => {
                debug!("allocate: unknown pager tag {}", tag);
                None
            }
        }
    }

    /// Releases the pager resources of `object`, which is locked exclusively by the caller
    pub fn deallocate(&self, object: &mut LockedObject<'_>) {
        let variant = object.variant();
        trace!(
            "deallocate: {} object {:#x}",
            variant,
            object.object().handle().raw()
        );
        self.ops(variant).dealloc(object);
    }

    /// Drops one reference of `object`.
    ///
    /// The last reference marks the object dead and deallocates it.
    pub fn release_object(&self, object: ObjectRef) {
        let mut locked = object.lock();
        if locked.release_reference() {
            locked.set_dead();
            self.deallocate(&mut locked);
        }
    }

    pub fn get_pages(&self, object: &BackedObject, pages: &mut [PageRequest<'_>]) -> PagerStatus {
        if pages.is_empty() {
            return PagerStatus::Bad;
        }

        self.ops(object.variant()).get_pages(object, pages)
    }

    pub fn get_pages_async(
        &self,
        object: &BackedObject,
        pages: &mut [PageRequest<'_>],
        done: PageInDone,
    ) -> PagerStatus {
        if pages.is_empty() {
            return PagerStatus::Bad;
        }

        self.ops(object.variant()).get_pages_async(object, pages, done)
    }

    /// Writes `pages` back. An empty request is rejected with `Bad`
    pub fn put_pages(
        &self,
        object: &BackedObject,
        pages: &mut [PageRequest<'_>],
        flags: PutFlags,
    ) -> PagerStatus {
        if pages.is_empty() {
            return PagerStatus::Bad;
        }

        self.ops(object.variant()).put_pages(object, pages, flags);
        PagerStatus::Ok
    }

    pub fn has_page(
        &self,
        object: &BackedObject,
        pindex: PageIndex,
        before: Option<&mut u64>,
        after: Option<&mut u64>,
    ) -> PageResidency {
        self.ops(object.variant()).has_page(object, pindex, before, after)
    }

    pub fn page_unswapped(&self, object: &BackedObject, pindex: PageIndex) {
        self.ops(object.variant()).page_unswapped(object, pindex)
    }
}
