use thiserror::Error;

/// Errors raised inside the chat server.
///
/// None of these are fatal to the process. A handler that returns one has
/// its originating connection torn down.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("failed to access {target}: {source}")]
    Io {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Config(#[source] serde_json::Error),

    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("client {0} is not connected")]
    UnknownClient(u64),
}
