use crate::types::Id;

/// Errors surfaced by the session core to its caller.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The connection is not `Open`; nothing was written to the wire.
    #[error("not connected")]
    NotConnected,

    #[error("unknown conversation: {0}")]
    UnknownConversation(Id),

    /// The connection manager task has stopped.
    #[error("connection manager is gone")]
    ConnectionGone,

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errors reported by the REST collaborators (auth guard, directory and
/// history fetch).
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("server is unavailable")]
    Unavailable,

    #[error("session is not authenticated")]
    Unauthorized,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Why a connection attempt failed before the handshake completed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectError {
    #[error("server is unavailable")]
    Unavailable,

    #[error("handshake failed: {0}")]
    Handshake(String),
}
