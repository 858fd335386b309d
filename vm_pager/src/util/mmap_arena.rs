use core::ptr::{null_mut, NonNull};

use libc::{
    c_void, mlock, mmap, munlock, munmap, MAP_ANONYMOUS, MAP_FAILED, MAP_PRIVATE, PROT_READ,
    PROT_WRITE,
};
use log::{error, warn};

use super::{get_page_size, round_up};

/// One anonymous mapping that backs all transfer slots of a pool.
///
/// The window is mapped once and never grown, moved or remapped until it is dropped.
pub(crate) struct MMapArena {
    base_ptr: NonNull<u8>,
    size: usize,
    pinned: bool,
}

// The arena itself only hands out raw pointers; callers make sure that
// every slot is accessed by at most one owner at a time.
unsafe impl Send for MMapArena {}
unsafe impl Sync for MMapArena {}

impl MMapArena {
    /// Maps at least `min_size` bytes (rounded up to whole pages).
    ///
    /// If `pin` is set, the window is locked into memory. Failing to lock is not fatal,
    /// as unprivileged processes commonly have a small `RLIMIT_MEMLOCK`.
    pub(crate) fn new(min_size: usize, pin: bool) -> Result<Self, ()> {
        if min_size == 0 {
            error!("refusing to map an empty arena");
            return Err(());
        }

        let mmap_size = match round_up(min_size, get_page_size()) {
            Some(size) => size,
            None => {
                error!("arena size {} overflows when rounded to pages", min_size);
                return Err(());
            }
        };

        let ptr = unsafe {
            mmap(
                null_mut(),
                mmap_size,
                PROT_READ | PROT_WRITE,
                MAP_PRIVATE | MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if ptr == MAP_FAILED {
            error!("could not map arena of {} bytes", mmap_size);
            return Err(());
        }

        let base_ptr = NonNull::new(ptr as *mut u8).ok_or(())?;

        let pinned = if pin {
            let code = unsafe { mlock(ptr, mmap_size) };
            if code != 0 {
                warn!(
                    "could not pin arena of {} bytes, continuing with pageable memory",
                    mmap_size
                );
            }
            code == 0
        } else {
            false
        };

        Ok(Self {
            base_ptr,
            size: mmap_size,
            pinned,
        })
    }

    #[inline]
    pub(crate) fn base_ptr(&self) -> *mut u8 {
        self.base_ptr.as_ptr()
    }

    #[inline]
    pub(crate) fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub(crate) fn is_pinned(&self) -> bool {
        self.pinned
    }
}

impl Drop for MMapArena {
    fn drop(&mut self) {
        let ptr = self.base_ptr.as_ptr() as *mut c_void;

        if self.pinned {
            unsafe { munlock(ptr, self.size) };
        }

        let code = unsafe { munmap(ptr, self.size) };

        if code != 0 {
            error!("could not unmap arena of {} bytes", self.size);
        }
    }
}
