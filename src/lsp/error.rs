//! Errors surfaced by the language client

use std::path::PathBuf;

use super::client::ClientState;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Failed to spawn language server '{}': {source}", command.display())]
    Spawn {
        command: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O error on language server transport: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to serialize/deserialize: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Server rejected initialize request ({code}): {message}")]
    Handshake { code: i32, message: String },
    #[error("LSP error {code}: {message}")]
    Protocol { code: i32, message: String },
    #[error("Connection to language server closed")]
    TransportClosed,
    #[error("Operation not valid while client is {0:?}")]
    InvalidState(ClientState),
    #[error("A language client is already active for this extension")]
    AlreadyActive,
}
