pub mod buffer_owner;
pub mod pager;
