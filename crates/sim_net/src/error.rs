//! Network-layer error types.

/// Errors that can occur during network operations.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// Failed to encode a message to MessagePack.
    #[error("failed to encode message: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// Failed to decode a message from MessagePack.
    #[error("failed to decode message: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// NATS subscription error.
    #[error("NATS subscribe error: {0}")]
    Subscribe(#[from] async_nats::SubscribeError),

    /// NATS publish error.
    #[error("NATS publish error: {0}")]
    Publish(#[from] async_nats::PublishError),

    /// NATS connection error.
    #[error("NATS connection error: {0}")]
    Connect(#[from] async_nats::ConnectError),

    /// Runtime construction or other I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A receive deadline elapsed.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// The peer went away (channel or subscription closed).
    #[error("link closed while waiting for {0}")]
    Closed(&'static str),
}
