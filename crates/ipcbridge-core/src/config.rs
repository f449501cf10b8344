/// Capacity of the buffer allocated for a new subscriber.
pub const DEFAULT_BUFFER_CAPACITY: usize = 1024;

/// Name the dispatch callback is registered under with the transport.
pub const DEFAULT_CALLBACK_NAME: &str = "jni_ipc_callback_bridge";

/// Tuning for a [`Bridge`](crate::Bridge).
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Capacity of each subscriber's first buffer.
    pub initial_buffer_capacity: usize,
    /// Upper bound for buffer growth. Larger messages are truncated to it.
    /// `None` lets buffers grow to any message size.
    pub max_buffer_capacity: Option<usize>,
    pub callback_name: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            initial_buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            max_buffer_capacity: None,
            callback_name: DEFAULT_CALLBACK_NAME.to_string(),
        }
    }
}

impl BridgeConfig {
    pub fn with_initial_buffer_capacity(mut self, capacity: usize) -> Self {
        self.initial_buffer_capacity = capacity;
        self
    }

    pub fn with_max_buffer_capacity(mut self, max: usize) -> Self {
        self.max_buffer_capacity = Some(max);
        self
    }

    pub fn with_callback_name(mut self, name: impl Into<String>) -> Self {
        self.callback_name = name.into();
        self
    }
}
