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

mod binder;
mod pbuf;
mod quota;

#[cfg(test)]
pub(crate) mod test;

pub use pbuf::{BoundPbuf, BufferId, Credential, Pbuf};
pub use quota::{Quota, QuotaCounter};

use core::ptr;

use log::{debug, error, info, trace, warn};
use parking_lot::{Condvar, Mutex};

use crate::{
    util::{ceil_div, get_page_size, mmap_arena::MMapArena, round_up},
    PbufConfig,
};
use pbuf::PbufHeader;

struct PoolState {
    /// free slots, the last element is the front of the list
    free: Vec<PbufHeader>,

    /// threads sleeping until the free list is non-empty
    waiters: usize,
}

/// Fixed size pool of transfer buffers shared by all pagers.
///
/// Every slot owns a `slot_size` window of one memory arena that is mapped
/// when the pool is created and never resized.
pub struct PbufPool {
    arena: MMapArena,
    slot_size: usize,
    buffer_count: usize,

    /// free list and quota counters
    state: Mutex<PoolState>,

    /// signalled once per released buffer
    free_wait: Condvar,
}

impl PbufPool {
    pub fn new(config: PbufConfig) -> Result<Self, ()> {
        if config.buffer_count == 0 || config.max_transfer_size == 0 {
            error!(
                "invalid pbuf config: {} buffers of {} bytes",
                config.buffer_count, config.max_transfer_size
            );
            return Err(());
        }

        let slot_size = match round_up(config.max_transfer_size, get_page_size()) {
            Some(size) => size,
            None => {
                error!("pbuf slot size {} overflows", config.max_transfer_size);
                return Err(());
            }
        };

        let arena_size = match slot_size.checked_mul(config.buffer_count) {
            Some(size) => size,
            None => {
                error!(
                    "pbuf arena of {} x {} bytes overflows",
                    config.buffer_count, slot_size
                );
                return Err(());
            }
        };

        let arena = MMapArena::new(arena_size, config.pin_memory)?;

        let mut free = Vec::with_capacity(config.buffer_count);
        // push in reverse, so that slot 0 is at the front
        for index in (0..config.buffer_count).rev() {
            free.push(PbufHeader::new(index));
        }

        info!(
            "created pbuf pool with {} buffers of {} bytes (arena {} bytes, pinned: {})",
            config.buffer_count,
            slot_size,
            arena.size(),
            arena.is_pinned()
        );

        Ok(Self {
            arena,
            slot_size,
            buffer_count: config.buffer_count,
            state: Mutex::new(PoolState { free, waiters: 0 }),
            free_wait: Condvar::new(),
        })
    }

    #[inline]
    pub fn buffer_count(&self) -> usize {
        self.buffer_count
    }

    #[inline]
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    pub fn free_count(&self) -> usize {
        self.state.lock().free.len()
    }

    /// Number of threads currently sleeping for a free buffer
    pub fn waiting(&self) -> usize {
        self.state.lock().waiters
    }

    /// A limited quota of half the pool for one subsystem
    pub fn subsystem_quota(&self, name: &'static str) -> Quota {
        Quota::limited(name, ceil_div(self.buffer_count, 2))
    }

    /// Leases a buffer, blocking until `quota` and the pool both allow it.
    ///
    /// There is no timeout, build one from `try_lease` if needed.
    pub fn lease(&self, quota: Option<&Quota>) -> Pbuf<'_> {
        let mut state = self.state.lock();

        let counter = match quota {
            Some(Quota::Limited(counter)) => Some(counter),
            _ => None,
        };

        if let Some(counter) = counter {
            while counter.available() == 0 {
                debug!("pbuf lease: waiting for quota {}", counter.name());
                counter.set_waiting(true);
                counter.wait.wait(&mut state);
                counter.set_waiting(false);
            }
            counter.take();

            // more units than the one we took may have been given back
            // before we were scheduled, pass the wakeup on
            if counter.available() > 0 {
                counter.wait.notify_one();
            }
        }

        let header = loop {
            if let Some(header) = state.free.pop() {
                break header;
            }

            debug!("pbuf lease: pool exhausted, waiting");
            state.waiters += 1;
            self.free_wait.wait(&mut state);
            state.waiters -= 1;
        };
        drop(state);

        trace!("pbuf {}: leased", header.id());
        Pbuf::new(self, header, counter.cloned())
    }

    /// Leases a buffer without blocking.
    ///
    /// Fails without any state change if `quota` is used up or the pool is empty.
    pub fn try_lease(&self, quota: &Quota) -> Option<Pbuf<'_>> {
        let mut state = self.state.lock();

        let counter = match quota {
            Quota::Limited(counter) if counter.available() == 0 => return None,
            Quota::Limited(counter) => Some(counter),
            Quota::Unlimited => None,
        };

        let header = state.free.pop()?;
        if let Some(counter) = counter {
            counter.take();
        }
        drop(state);

        trace!("pbuf {}: leased without waiting", header.id());
        Some(Pbuf::new(self, header, counter.cloned()))
    }

    /// Returns `buf` to the pool and gives its unit back to `quota`.
    ///
    /// Panics if `buf` is still bound or belongs to another pool.
    pub fn release(&self, buf: Pbuf<'_>, quota: Option<&Quota>) {
        if !ptr::eq(buf.pool, self) {
            error!("pbuf {}: released into a foreign pool", buf.id());
            panic!("pbuf {} released into a foreign pool", buf.id());
        }

        if buf.is_bound() {
            error!("pbuf {}: released while bound", buf.id());
            panic!("pbuf {} released while still bound to its owner", buf.id());
        }

        let mut header = buf.into_header();
        let leased_with = header.quota.take();

        let counter = match quota {
            Some(Quota::Limited(counter)) => Some(&**counter),
            _ => None,
        };
        let same_quota = match (counter, leased_with.as_deref()) {
            (Some(a), Some(b)) => ptr::eq(a, b),
            (None, None) => true,
            _ => false,
        };
        if !same_quota {
            warn!(
                "pbuf {}: released with quota {}, leased with {}",
                header.id(),
                counter.map(|c| c.name()).unwrap_or("none"),
                leased_with.as_deref().map(|c| c.name()).unwrap_or("none")
            );
        }

        // credentials are released outside of the pool lock
        header.clean();

        trace!("pbuf {}: released", header.id());
        self.push_free(header, counter);
    }

    fn push_free(&self, header: PbufHeader, quota: Option<&QuotaCounter>) {
        let mut state = self.state.lock();
        state.free.push(header);

        if let Some(counter) = quota {
            if counter.give() == 0 {
                counter.wait.notify_one();
            }
        }

        drop(state);
        self.free_wait.notify_one();
    }

    #[inline]
    fn slot_ptr(&self, id: BufferId) -> *mut u8 {
        debug_assert!(id.index() < self.buffer_count);
        unsafe { self.arena.base_ptr().add(id.index() * self.slot_size) }
    }
}

impl core::fmt::Debug for PbufPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PbufPool")
            .field("buffer_count", &self.buffer_count)
            .field("slot_size", &self.slot_size)
            .field("free", &self.free_count())
            .finish()
    }
}
