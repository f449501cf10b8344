/// Failures reported by a [`ManagedRuntime`](crate::ManagedRuntime).
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The calling thread could not be attached.
    #[error("thread attach failed: {0}")]
    AttachFailed(String),

    /// The subscriber does not expose the receive method.
    #[error("receiver method {0} not found")]
    MissingReceiver(String),

    /// A managed array could not be allocated.
    #[error("cannot allocate {size}-byte array: {reason}")]
    AllocationFailed { size: usize, reason: String },

    /// Copying into a managed array failed.
    #[error("array write failed: {0}")]
    WriteFailed(String),

    /// The receive method raised instead of returning.
    #[error("receiver raised: {0}")]
    Invocation(String),
}

/// Errors surfaced by [`Bridge`](crate::Bridge) operations.
///
/// Dispatch never propagates these; they are logged per subscriber.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// `register` was called before a runtime was captured with `init`.
    #[error("bridge not initialized")]
    NotInitialized,

    #[error("cannot attach thread: {0}")]
    AttachFailed(#[source] RuntimeError),

    #[error("cannot resolve receive method: {0}")]
    MethodResolution(#[source] RuntimeError),

    #[error("cannot allocate {size}-byte subscriber buffer: {source}")]
    BufferAllocation {
        size: usize,
        #[source]
        source: RuntimeError,
    },

    #[error("cannot fill subscriber buffer: {0}")]
    BufferWrite(#[source] RuntimeError),

    #[error("subscriber fault: {0}")]
    SubscriberFault(#[source] RuntimeError),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
