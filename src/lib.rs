//! Editor-side language client for the Lustre language server.
//!
//! The crate is split in two layers:
//! - [`lsp`]: a small language client that spawns a server process, speaks
//!   the LSP base protocol over its stdio and keeps documents in sync.
//! - [`extension`]: the activation lifecycle that resolves the bundled
//!   `lustrels` executable and owns the single client of an activation.

pub mod extension;
pub mod logging;
pub mod lsp;

pub use extension::{activate, deactivate, ExtensionContext, ExtensionMode, Platform, Settings};
pub use lsp::{ClientError, ClientState, Completion, LanguageClient, OutputChannel};
