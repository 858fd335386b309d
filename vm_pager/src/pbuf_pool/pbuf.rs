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

use core::{mem::ManuallyDrop, ops::Deref, slice};
use std::sync::{Arc, Weak};

use log::warn;

use super::{PbufPool, QuotaCounter};
use crate::modules::buffer_owner::BufferOwner;

/// Identity of a pool slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(usize);

impl BufferId {
    pub(crate) const fn from_index(index: usize) -> Self {
        BufferId(index)
    }

    #[inline]
    pub const fn index(&self) -> usize {
        self.0
    }
}

impl core::fmt::Display for BufferId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug)]
struct CredentialInner {
    uid: u32,
    gid: u32,
}

/// Reference counted credential a transfer is performed with.
///
/// Dropping the last clone releases it.
#[derive(Debug, Clone)]
pub struct Credential(Arc<CredentialInner>);

impl Credential {
    pub fn new(uid: u32, gid: u32) -> Self {
        Credential(Arc::new(CredentialInner { uid, gid }))
    }

    #[inline]
    pub fn uid(&self) -> u32 {
        self.0.uid
    }

    #[inline]
    pub fn gid(&self) -> u32 {
        self.0.gid
    }

    /// Number of holders of this credential
    pub fn holders(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

/// Header of one pool slot, travels between the free list and its current leaser
pub(super) struct PbufHeader {
    id: BufferId,
    pub(super) owner: Option<Weak<dyn BufferOwner>>,
    pub(super) paging: bool,
    read_cred: Option<Credential>,
    write_cred: Option<Credential>,
    transfer_len: usize,

    /// limited quota the current lease took a unit from
    pub(super) quota: Option<Arc<QuotaCounter>>,
}

impl PbufHeader {
    pub(super) fn new(index: usize) -> Self {
        Self {
            id: BufferId::from_index(index),
            owner: None,
            paging: false,
            read_cred: None,
            write_cred: None,
            transfer_len: 0,
            quota: None,
        }
    }

    #[inline]
    pub(super) fn id(&self) -> BufferId {
        self.id
    }

    #[inline]
    pub(super) fn is_bound(&self) -> bool {
        debug_assert_eq!(
            self.owner.is_some(),
            self.paging,
            "pbuf {}: owner and paging flag out of sync",
            self.id
        );
        self.owner.is_some()
    }

    /// Drops credentials and transfer state, the owner has to be detached already
    pub(super) fn clean(&mut self) {
        debug_assert!(self.owner.is_none());
        self.read_cred = None;
        self.write_cred = None;
        self.paging = false;
        self.transfer_len = 0;
    }
}

/// A leased pool buffer.
///
/// The leaser owns the slot and its memory exclusively until it hands it
/// back with `PbufPool::release`.
#[must_use = "leased buffers have to be released back to their pool"]
pub struct Pbuf<'p> {
    pub(super) pool: &'p PbufPool,
    pub(super) header: ManuallyDrop<PbufHeader>,
}

impl<'p> Pbuf<'p> {
    pub(super) fn new(
        pool: &'p PbufPool,
        mut header: PbufHeader,
        quota: Option<Arc<QuotaCounter>>,
    ) -> Self {
        header.clean();
        header.quota = quota;
        Self {
            pool,
            header: ManuallyDrop::new(header),
        }
    }

    #[inline]
    pub fn id(&self) -> BufferId {
        self.header.id()
    }

    /// Size of the slot in bytes
    #[inline]
    pub fn capacity(&self) -> usize {
        self.pool.slot_size()
    }

    /// The whole slot
    pub fn data(&self) -> &[u8] {
        // the slot belongs to this lease only
        unsafe { slice::from_raw_parts(self.pool.slot_ptr(self.id()), self.capacity()) }
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        // the slot belongs to this lease only
        unsafe { slice::from_raw_parts_mut(self.pool.slot_ptr(self.id()), self.capacity()) }
    }

    /// Bytes of the slot that hold transfer data
    #[inline]
    pub fn transfer_len(&self) -> usize {
        self.header.transfer_len
    }

    pub fn set_transfer_len(&mut self, len: usize) {
        assert!(
            len <= self.capacity(),
            "pbuf {}: transfer of {} bytes exceeds slot size {}",
            self.id(),
            len,
            self.capacity()
        );
        self.header.transfer_len = len;
    }

    /// The valid part of the slot
    pub fn transfer_data(&self) -> &[u8] {
        &self.data()[..self.transfer_len()]
    }

    pub fn set_credentials(&mut self, read: Option<Credential>, write: Option<Credential>) {
        self.header.read_cred = read;
        self.header.write_cred = write;
    }

    pub fn read_credential(&self) -> Option<&Credential> {
        self.header.read_cred.as_ref()
    }

    pub fn write_credential(&self) -> Option<&Credential> {
        self.header.write_cred.as_ref()
    }

    #[inline]
    pub fn is_bound(&self) -> bool {
        self.header.is_bound()
    }

    #[inline]
    pub fn is_paging(&self) -> bool {
        self.header.paging
    }

    /// The owner this buffer is attached to, if it still exists
    pub fn owner(&self) -> Option<Arc<dyn BufferOwner>> {
        self.header.owner.as_ref().and_then(|o| o.upgrade())
    }

    /// Hands the header back without running the drop safety net
    pub(super) fn into_header(self) -> PbufHeader {
        let mut this = ManuallyDrop::new(self);
        unsafe { ManuallyDrop::take(&mut this.header) }
    }
}

impl Drop for Pbuf<'_> {
    fn drop(&mut self) {
        let mut header = unsafe { ManuallyDrop::take(&mut self.header) };

        let quota = header.quota.take();

        if !std::thread::panicking() {
            match quota.as_deref() {
                Some(counter) => warn!(
                    "pbuf {} dropped without release, giving its unit back to quota {}",
                    header.id(),
                    counter.name()
                ),
                None => warn!("pbuf {} dropped without release", header.id()),
            }
        }

        header.owner = None;
        header.clean();
        self.pool.push_free(header, quota.as_deref());
    }
}

impl core::fmt::Debug for Pbuf<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Pbuf")
            .field("id", &self.id())
            .field("bound", &self.header.owner.is_some())
            .field("paging", &self.header.paging)
            .field("transfer_len", &self.header.transfer_len)
            .finish()
    }
}

/// A leased buffer that is attached to an owner.
///
/// It can not be released before `unbind` turns it back into a `Pbuf`.
#[must_use = "bound buffers have to be unbound and released"]
pub struct BoundPbuf<'p> {
    pub(super) buf: Pbuf<'p>,
}

impl<'p> BoundPbuf<'p> {
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.buf.data_mut()
    }

    pub fn set_transfer_len(&mut self, len: usize) {
        self.buf.set_transfer_len(len)
    }
}

impl<'p> Deref for BoundPbuf<'p> {
    type Target = Pbuf<'p>;

    fn deref(&self) -> &Self::Target {
        &self.buf
    }
}

impl core::fmt::Debug for BoundPbuf<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("BoundPbuf").field(&self.buf).finish()
    }
}
