#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Sizing of a `PbufPool`
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PbufConfig {
    /// number of transfer buffers, fixed for the lifetime of the pool
    pub buffer_count: usize,

    /// largest single transfer in bytes, rounded up to whole pages per slot
    pub max_transfer_size: usize,

    /// lock the buffer memory into RAM (best effort)
    pub pin_memory: bool,
}

impl Default for PbufConfig {
    fn default() -> Self {
        Self {
            buffer_count: 256,
            max_transfer_size: 128 * 1024,
            pin_memory: true,
        }
    }
}
