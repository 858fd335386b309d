use std::sync::Arc;

use log::trace;

use crate::backed_object::{Handle, ObjectRef};

/// Finds the first live object of `list` that was created for `handle`.
///
/// `list` belongs to the caller, who also keeps it locked while searching.
/// On a hit the object's reference count is incremented under the object's own lock
/// and a new reference is returned. Dead objects are skipped even if the handle matches.
pub fn lookup<'a, I>(list: I, handle: Handle) -> Option<ObjectRef>
where
    I: IntoIterator<Item = &'a ObjectRef>,
{
    for object in list {
        if object.handle() != handle {
            continue;
        }

        let guard = object.read_lock();
        if object.is_dead() {
            trace!("lookup {:#x}: skipping dead object", handle.raw());
            continue;
        }

        object.reference_locked();
        drop(guard);

        return Some(Arc::clone(object));
    }

    None
}
