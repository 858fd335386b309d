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

use core::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use log::trace;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::modules::pager::Variant;

/// Opaque identity token supplied by whoever creates a backed object.
///
/// It is only ever compared, never interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(usize);

impl Handle {
    pub const fn new(raw: usize) -> Self {
        Handle(raw)
    }

    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Handle(ptr as usize)
    }

    pub const fn raw(&self) -> usize {
        self.0
    }
}

/// Shared reference to a backed object
pub type ObjectRef = Arc<BackedObject>;

/// One unit of pageable backing store.
///
/// `variant` and `dead` only change while the object lock is held exclusively,
/// but they can be read at any time. None of the accessors of this type take the
/// object lock, so they are safe to call while a `LockedObject` is alive.
pub struct BackedObject {
    handle: Handle,

    /// size in pages
    size: u64,

    /// logical references held by users of this object
    ref_count: AtomicUsize,

    variant: AtomicU8,
    dead: AtomicBool,

    /// serializes the dead check of lookups against the last release
    lock: RwLock<()>,
}

impl BackedObject {
    /// Creates a new object holding one reference
    pub fn new(variant: Variant, handle: Handle, size: u64) -> ObjectRef {
        Arc::new(BackedObject {
            handle,
            size,
            ref_count: AtomicUsize::new(1),
            variant: AtomicU8::new(variant as u8),
            dead: AtomicBool::new(false),
            lock: RwLock::new(()),
        })
    }

    #[inline]
    pub fn handle(&self) -> Handle {
        self.handle
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn variant(&self) -> Variant {
        // only ever stored from a `Variant`
        Variant::from_raw(self.variant.load(Ordering::Acquire) as u32)
            .unwrap_or(Variant::Dead)
    }

    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }

    pub fn ref_count(&self) -> usize {
        self.ref_count.load(Ordering::Acquire)
    }

    /// Adds one reference on behalf of a caller that already holds one.
    ///
    /// New references to objects found in a list are taken with `lookup` instead.
    pub fn reference(&self) {
        let prev = self.ref_count.fetch_add(1, Ordering::AcqRel);
        debug_assert!(
            prev > 0,
            "object {:#x}: referenced after its last release",
            self.handle.0
        );
        trace!("object {:#x}: ref_count {} -> {}", self.handle.0, prev, prev + 1);
    }

    /// Adds one reference, the caller holds the object lock (shared or exclusive)
    pub(crate) fn reference_locked(&self) {
        let prev = self.ref_count.fetch_add(1, Ordering::AcqRel);
        trace!("object {:#x}: ref_count {} -> {}", self.handle.0, prev, prev + 1);
    }

    /// Takes the exclusive object lock
    pub fn lock(&self) -> LockedObject<'_> {
        LockedObject {
            object: self,
            _guard: self.lock.write(),
        }
    }

    /// Takes the object lock shared, for the dead check and increment of `lookup`
    pub(crate) fn read_lock(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read()
    }
}

impl core::fmt::Debug for BackedObject {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BackedObject")
            .field("handle", &self.handle)
            .field("size", &self.size)
            .field("variant", &self.variant())
            .field("dead", &self.is_dead())
            .field("ref_count", &self.ref_count())
            .finish()
    }
}

/// A backed object whose lock is held exclusively
pub struct LockedObject<'a> {
    object: &'a BackedObject,
    _guard: RwLockWriteGuard<'a, ()>,
}

impl<'a> LockedObject<'a> {
    /// The locked object. Taking its lock again deadlocks, its accessors don't lock.
    #[inline]
    pub fn object(&self) -> &'a BackedObject {
        self.object
    }

    #[inline]
    pub fn handle(&self) -> Handle {
        self.object.handle
    }

    #[inline]
    pub fn variant(&self) -> Variant {
        self.object.variant()
    }

    #[inline]
    pub fn is_dead(&self) -> bool {
        self.object.is_dead()
    }

    /// Marks the object as dead, lookups will skip it from now on
    pub fn set_dead(&mut self) {
        self.object.dead.store(true, Ordering::Release);
    }

    /// Detaches the object from its backing store for good.
    ///
    /// All further paging operations are served by the dead pager.
    pub fn retire_pager(&mut self) {
        trace!(
            "object {:#x}: retiring {} pager",
            self.object.handle.0,
            self.variant()
        );
        self.object
            .variant
            .store(Variant::Dead as u8, Ordering::Release);
        self.set_dead();
    }

    pub fn reference(&mut self) {
        self.object.reference_locked();
    }

    /// Drops one reference, returns `true` if it was the last one
    pub fn release_reference(&mut self) -> bool {
        let prev = self.object.ref_count.fetch_sub(1, Ordering::AcqRel);
        assert!(
            prev > 0,
            "object {:#x}: reference released more often than taken",
            self.object.handle.0
        );
        trace!(
            "object {:#x}: ref_count {} -> {}",
            self.object.handle.0,
            prev,
            prev - 1
        );

        prev == 1
    }
}
