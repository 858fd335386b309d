mod backed_object;
mod object_lookup;
mod pager_registry;
mod pbuf_config;
mod pbuf_pool;
mod util;

#[cfg(test)]
mod test;

pub use backed_object::{BackedObject, Handle, LockedObject, ObjectRef};
pub use object_lookup::lookup;
pub use pager_registry::{PagerRegistry, PagerRegistryBuilder};
pub use pbuf_config::PbufConfig;
pub use pbuf_pool::{BoundPbuf, BufferId, Credential, Pbuf, PbufPool, Quota, QuotaCounter};
pub mod modules;
