use std::time::Duration;

/// Failure kinds that callers may want to tell apart. Public operations return
///  `anyhow::Result`, and these are the root causes that can be recovered with
///  `anyhow::Error::downcast_ref::<XPlaneError>()`.
///
/// Socket-level failures are not wrapped here: they surface as the underlying `std::io::Error`.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum XPlaneError {
    /// The call received input that can never be valid (empty path, zero buffer size etc.).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An unsubscribe named a path that is not registered.
    #[error("no subscription for dataref {0:?}")]
    NoSuchSubscription(String),

    /// A value response referenced an id that is not (or no longer) registered.
    #[error("received value for unknown dataref id {0}")]
    UnknownDataRef(i32),

    /// A character slot reported a position outside of its string's buffer.
    #[error("character position {position} is out of range for buffer size {buffer_size}")]
    CharacterPositionOutOfRange { position: usize, buffer_size: usize },

    /// A frame had a recognized tag but an impossible length.
    #[error("malformed {tag} frame: {reason}")]
    MalformedFrame { tag: &'static str, reason: String },

    #[error("the connector is not running")]
    NotRunning,

    #[error("the connector is already running")]
    AlreadyRunning,

    /// The background loops did not terminate in time. This is not retryable: the loops
    ///  are still holding on to the socket.
    #[error("background tasks did not terminate within {0:?}")]
    ShutdownTimeout(Duration),
}

impl XPlaneError {
    pub fn invalid_argument(msg: impl Into<String>) -> XPlaneError {
        XPlaneError::InvalidArgument(msg.into())
    }
}
