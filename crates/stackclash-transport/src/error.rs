use std::io;

/// Why a transport operation failed.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection is gone, locally or at the peer.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    #[error("cannot listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    /// Dialing the server failed. The client retries these with backoff.
    #[error("connect failed: {0}")]
    ConnectFailed(#[source] io::Error),

    /// Outgoing frames carry JSON text.
    #[error("frame is not UTF-8 text: {0}")]
    NotText(#[from] std::string::FromUtf8Error),

    #[cfg(feature = "websocket")]
    #[error("websocket: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The transport was shut down.
    #[error("transport shut down")]
    Shutdown,
}
