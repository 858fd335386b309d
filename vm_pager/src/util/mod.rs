pub(crate) mod mmap_arena;

pub(crate) fn get_page_size() -> usize {
    use libc::{sysconf, _SC_PAGE_SIZE};

    let size = unsafe { sysconf(_SC_PAGE_SIZE) };
    if size <= 0 {
        // sysconf should not fail for _SC_PAGE_SIZE, but fall back to the common size
        4096
    } else {
        size as usize
    }
}

/// efficient way to calculate: ceil(x / y)
pub(crate) fn ceil_div(x: usize, y: usize) -> usize {
    (x + y - 1) / y
}

/// Rounds `x` up to the next multiple of `y`, `None` on overflow
pub(crate) fn round_up(x: usize, y: usize) -> Option<usize> {
    x.checked_add(y - 1).map(|v| (v / y) * y)
}
