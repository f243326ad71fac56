//! Service configuration.

/// Default per-subscriber buffer before a slow subscriber is dropped.
pub const DEFAULT_BUFFER_SIZE: usize = 256;

/// Configuration shared by the stores of one sync service.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Max buffered emissions per stream subscriber.
    /// Default: 256
    pub buffer_size: usize,

    /// Suppress value emissions equal to the previous value.
    /// Default: true
    pub distinct_values: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            distinct_values: true,
        }
    }
}
