//! Extension lifecycle
//!
//! `activate` resolves the bundled `lustrels` executable, builds the client
//! for Lustre documents and starts it without waiting for the server.
//! `deactivate` stops that client, if there is one.
//!
//! Expected layout of an installed extension:
//! ```text
//! <extension root>/
//!   server/
//!     lustrels          # Linux and other unix-likes
//!     lustrels.exe      # Windows
//!     lustrels.darwin   # macOS
//! ```

mod platform;
mod settings;

pub use platform::{Platform, SERVER_BASE_NAME};
pub use settings::{settings_path, Settings};

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::lsp::{
    ClientError, ClientOptions, Completion, DocumentFilter, Executable, LanguageClient,
    OutputChannel, ServerOptions,
};

/// Client identifier, also the prefix of its settings
pub const CLIENT_ID: &str = "lustreLsp";
/// Display name of the client and its output channel
pub const CLIENT_NAME: &str = "Lustre Language Server";
/// Language id the client binds to
pub const LANGUAGE_ID: &str = "lustre";
/// Subdirectory of the extension root holding the server binaries
pub const SERVER_DIR: &str = "server";

/// How the host runs the extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtensionMode {
    #[default]
    Production,
    /// Launches the `debug` variant of the server options
    Development,
}

/// Everything the host hands to `activate` / `deactivate`
pub struct ExtensionContext {
    extension_path: PathBuf,
    platform: String,
    mode: ExtensionMode,
    workspace_folder: Option<PathBuf>,
    settings: Settings,
    output_channels: Vec<OutputChannel>,
    /// The one client of this activation
    client: Option<LanguageClient>,
}

impl ExtensionContext {
    pub fn new(extension_path: impl Into<PathBuf>) -> Self {
        Self {
            extension_path: extension_path.into(),
            platform: std::env::consts::OS.to_string(),
            mode: ExtensionMode::default(),
            workspace_folder: None,
            settings: Settings::default(),
            output_channels: Vec::new(),
            client: None,
        }
    }

    /// Override the ambient platform identifier
    pub fn with_platform(mut self, platform: &str) -> Self {
        self.platform = platform.to_string();
        self
    }

    pub fn with_mode(mut self, mode: ExtensionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_workspace_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.workspace_folder = Some(folder.into());
        self
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Resolve a path relative to the extension root
    pub fn as_absolute_path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.extension_path.join(relative)
    }

    pub fn platform(&self) -> Platform {
        Platform::from_identifier(&self.platform)
    }

    pub fn mode(&self) -> ExtensionMode {
        self.mode
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Create a named output channel that the host will display
    pub fn create_output_channel(&mut self, name: &str) -> OutputChannel {
        let channel = OutputChannel::new(name);
        self.output_channels.push(channel.clone());
        channel
    }

    pub fn output_channels(&self) -> &[OutputChannel] {
        &self.output_channels
    }

    /// The active client, if `activate` ran and `deactivate` did not
    pub fn client(&self) -> Option<&LanguageClient> {
        self.client.as_ref()
    }
}

/// Absolute path of the server binary for the context's platform
pub fn server_path(context: &ExtensionContext) -> PathBuf {
    let executable = context.platform().server_executable_name();
    context.as_absolute_path(Path::new(SERVER_DIR).join(executable))
}

/// Run and debug both launch the same binary over stdio
pub fn server_options(server_path: &Path) -> ServerOptions {
    ServerOptions::single(Executable::new(server_path))
}

/// Lustre files on disk, reported through a dedicated output channel
pub fn client_options(context: &mut ExtensionContext) -> ClientOptions {
    let output_channel = context.create_output_channel(CLIENT_NAME);
    ClientOptions::new(vec![DocumentFilter::new("file", LANGUAGE_ID)], output_channel)
        .with_workspace_folder(context.workspace_folder.clone())
        .with_trace(context.settings.trace)
}

/// Build the client and start it.
///
/// Returns as soon as the start request is issued; the completion reports
/// whether the server came up. Spawn and handshake failures arrive there.
pub fn activate(context: &mut ExtensionContext) -> Completion<Result<(), ClientError>> {
    if context.client.is_some() {
        warn!("activate called while a client is already active");
        return Completion::ready(Err(ClientError::AlreadyActive));
    }

    let server_path = server_path(context);
    info!(
        platform = %context.platform(),
        server = %server_path.display(),
        "Activating Lustre extension"
    );

    let server_options = server_options(&server_path);
    let client_options = client_options(context);
    let client = LanguageClient::new(CLIENT_ID, CLIENT_NAME, server_options, client_options)
        .with_debug(context.mode == ExtensionMode::Development);

    let client = context.client.insert(client);
    client.start()
}

/// Stop the client, if any.
///
/// `None` means there was nothing to stop. The slot is emptied either way,
/// so a second call is always a no-op.
pub fn deactivate(context: &mut ExtensionContext) -> Option<Completion<Result<(), ClientError>>> {
    let client = context.client.take()?;
    info!("Deactivating Lustre extension");
    Some(client.stop())
}
