use async_trait::async_trait;
use serde_json::Value;

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors from the realtime transport
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    #[error("Subscribe failed: {0}")]
    SubscribeFailed(String),

    #[error("Connection lost")]
    Disconnected,

    #[error("Timed out waiting for server reply")]
    Timeout,
}

/// Wire-level realtime connection to the donation platform.
///
/// The listener drives this through a fixed sequence: `connect`, then one
/// `subscribe` per channel, then `next_publication` until it returns `None`.
#[async_trait]
pub trait RealtimeTransport: Send {
    /// Open the connection and authenticate with the session token.
    /// Returns the server-assigned client id.
    async fn connect(&mut self, url: &str, session_token: &str) -> TransportResult<String>;

    /// Subscribe to one channel with its per-channel token
    async fn subscribe(&mut self, channel: &str, token: &str) -> TransportResult<()>;

    /// Next publication as `(channel, payload)`. Pings and presence frames
    /// are handled internally; `None` means the connection is gone.
    async fn next_publication(&mut self) -> Option<(String, Value)>;

    /// Close the connection. Safe to call in any state.
    async fn disconnect(&mut self);
}
