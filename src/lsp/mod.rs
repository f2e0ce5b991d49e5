//! LSP (Language Server Protocol) client module
//!
//! Provides the client half of an LSP connection:
//! - Spawning the server process and framing messages over its stdio
//! - The initialize / shutdown handshakes
//! - Document synchronization for documents matching a selector
//! - Diagnostics (pushed and pulled)
//! - Routing server log messages to an output channel

mod client;
mod completion;
mod error;
mod message;
mod output;
mod process;
mod protocol;
mod types;

pub use client::{ClientOptions, ClientState, LanguageClient};
pub use completion::{Completer, Completion};
pub use error::ClientError;
pub use output::OutputChannel;
pub use process::read_message;
pub use protocol::{LspMessage, ResponseError};
pub use types::{
    detect_language, path_to_uri, uri_scheme, Capabilities, Diagnostic, DiagnosticSeverity,
    DocumentFilter, Executable, Position, Range, ServerOptions, TextDocument, Trace,
    TransportKind,
};
