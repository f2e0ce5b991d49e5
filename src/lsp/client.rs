//! High-level LSP client API
//!
//! A [`LanguageClient`] owns one server process. `start` spawns it and runs
//! the initialize handshake on a connection thread; `stop` runs the
//! shutdown/exit sequence and reaps the process. Both hand back a
//! [`Completion`] instead of blocking the caller.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;

use serde_json::Value;
use tracing::{debug, info, warn};

use super::completion::{Completer, Completion};
use super::error::ClientError;
use super::message::MessageHandler;
use super::output::OutputChannel;
use super::process::{MessageReader, ServerProcess};
use super::protocol::{self, LspMessage};
use super::types::{
    path_to_uri, Capabilities, Diagnostic, DocumentFilter, Executable, ServerOptions,
    TextDocument, Trace,
};

/// Name reported to servers in `clientInfo`
const CLIENT_INFO_NAME: &str = env!("CARGO_PKG_NAME");

/// Lifecycle of a client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Constructed, no process yet
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Which documents a client applies to, and where it reports
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub document_selector: Vec<DocumentFilter>,
    pub output_channel: OutputChannel,
    pub workspace_folder: Option<PathBuf>,
    pub trace: Trace,
}

impl ClientOptions {
    pub fn new(document_selector: Vec<DocumentFilter>, output_channel: OutputChannel) -> Self {
        Self {
            document_selector,
            output_channel,
            workspace_folder: None,
            trace: Trace::Off,
        }
    }

    pub fn with_workspace_folder(mut self, folder: Option<PathBuf>) -> Self {
        self.workspace_folder = folder;
        self
    }

    pub fn with_trace(mut self, trace: Trace) -> Self {
        self.trace = trace;
        self
    }

    /// True if any filter of the selector matches the document
    pub fn matches(&self, document: &TextDocument) -> bool {
        self.document_selector.iter().any(|f| f.matches(document))
    }
}

/// Document state tracked by the client
#[derive(Debug)]
struct DocumentInfo {
    version: i32,
}

struct Inner {
    state: ClientState,
    process: Option<ServerProcess>,
    capabilities: Capabilities,
    documents: HashMap<String, DocumentInfo>,
    /// didOpen notifications for documents opened before the handshake finished
    pending_opens: Vec<TextDocument>,
}

/// State shared between the client handle and its background threads
struct Shared {
    inner: Mutex<Inner>,
    state_changed: Condvar,
    handler: Mutex<MessageHandler>,
    diagnostics: Arc<Mutex<HashMap<String, Vec<Diagnostic>>>>,
    output: OutputChannel,
    trace: Trace,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn set_state(&self, inner: &mut Inner, state: ClientState) {
        debug!(from = ?inner.state, to = ?state, "client state");
        inner.state = state;
        self.state_changed.notify_all();
    }

    /// Write a message to the server, tracing it if enabled
    fn send(&self, inner: &mut Inner, message: &LspMessage) -> Result<(), ClientError> {
        self.trace_message("Sending", message);
        inner
            .process
            .as_mut()
            .ok_or(ClientError::TransportClosed)?
            .send(message)
    }

    fn trace_message(&self, direction: &str, message: &LspMessage) {
        if self.trace == Trace::Off {
            return;
        }
        let what = match message {
            LspMessage::Request { id, method, .. } => format!("request '{} - ({})'", method, id),
            LspMessage::Notification { method, .. } => format!("notification '{}'", method),
            LspMessage::Response { id, .. } => format!("response ({})", id),
        };
        self.output.append_line(format!("[Trace] {} {}", direction, what));
        if self.trace == Trace::Verbose {
            self.output.append_line(message.to_json().to_string());
        }
    }

    /// Route one incoming message and send back any reply
    fn dispatch(&self, message: LspMessage) {
        self.trace_message("Received", &message);
        let reply = lock(&self.handler).handle_message(message);
        if let Some(reply) = reply {
            let mut inner = lock(&self.inner);
            if let Err(e) = self.send(&mut inner, &reply) {
                debug!("Failed to answer server request: {}", e);
            }
        }
    }

    fn flush_pending_opens(&self, inner: &mut Inner) -> Result<(), ClientError> {
        for document in std::mem::take(&mut inner.pending_opens) {
            let notification = protocol::create_did_open_notification(&document);
            self.send(inner, &notification)?;
        }
        Ok(())
    }
}

/// High-level LSP client for one server process
pub struct LanguageClient {
    id: String,
    name: String,
    server_options: ServerOptions,
    client_options: ClientOptions,
    debug: bool,
    /// Set by `stop`, which takes over teardown from `Drop`
    stop_requested: bool,
    shared: Arc<Shared>,
}

impl LanguageClient {
    /// Create a new, inert LSP client
    pub fn new(
        id: &str,
        name: &str,
        server_options: ServerOptions,
        client_options: ClientOptions,
    ) -> Self {
        let output = client_options.output_channel.clone();
        let diagnostics = Arc::new(Mutex::new(HashMap::new()));
        let diag_clone = Arc::clone(&diagnostics);

        let mut handler = MessageHandler::new(output.clone());
        handler.set_diagnostics_callback(Box::new(move |uri, diags| {
            lock(&diag_clone).insert(uri, diags);
        }));

        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                state: ClientState::Created,
                process: None,
                capabilities: Capabilities::default(),
                documents: HashMap::new(),
                pending_opens: Vec::new(),
            }),
            state_changed: Condvar::new(),
            handler: Mutex::new(handler),
            diagnostics,
            output,
            trace: client_options.trace,
        });

        Self {
            id: id.to_string(),
            name: name.to_string(),
            server_options,
            client_options,
            debug: false,
            stop_requested: false,
            shared,
        }
    }

    /// Launch the `debug` variant of the server options instead of `run`
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn server_options(&self) -> &ServerOptions {
        &self.server_options
    }

    pub fn client_options(&self) -> &ClientOptions {
        &self.client_options
    }

    pub fn output_channel(&self) -> &OutputChannel {
        &self.shared.output
    }

    pub fn state(&self) -> ClientState {
        lock(&self.shared.inner).state
    }

    pub fn is_running(&self) -> bool {
        self.state() == ClientState::Running
    }

    /// Capabilities announced by the server (default until running)
    pub fn capabilities(&self) -> Capabilities {
        lock(&self.shared.inner).capabilities.clone()
    }

    /// Process id of the server, while one is attached
    pub fn pid(&self) -> Option<u32> {
        lock(&self.shared.inner).process.as_ref().map(|p| p.pid())
    }

    /// Start the server.
    ///
    /// Returns immediately; the completion resolves once the initialize
    /// handshake succeeded or failed. A client can be started only once.
    pub fn start(&self) -> Completion<Result<(), ClientError>> {
        {
            let mut inner = lock(&self.shared.inner);
            if inner.state != ClientState::Created {
                return Completion::ready(Err(ClientError::InvalidState(inner.state)));
            }
            self.shared.set_state(&mut inner, ClientState::Starting);
        }

        let executable = self.server_options.select(self.debug).clone();
        let root = self.client_options.workspace_folder.clone();
        let shared = Arc::clone(&self.shared);
        let (completer, completion) = Completion::pending();

        info!(
            client = %self.id,
            command = %executable.command.display(),
            debug = self.debug,
            "Starting language client"
        );

        let spawned = thread::Builder::new()
            .name(format!("{}-connection", self.id))
            .spawn(move || run_connection(shared, executable, root, completer));

        if let Err(e) = spawned {
            let mut inner = lock(&self.shared.inner);
            self.shared.set_state(&mut inner, ClientState::Stopped);
            return Completion::ready(Err(ClientError::Io(e)));
        }

        completion
    }

    /// Stop the server and release the client.
    ///
    /// Runs shutdown/exit and waits for the process on a background thread.
    /// A client that never started (or failed to) completes immediately.
    pub fn stop(mut self) -> Completion<Result<(), ClientError>> {
        self.stop_requested = true;
        {
            let mut inner = lock(&self.shared.inner);
            match inner.state {
                ClientState::Starting | ClientState::Running => {}
                ClientState::Created => {
                    self.shared.set_state(&mut inner, ClientState::Stopped);
                    return Completion::ready(Ok(()));
                }
                ClientState::Stopping | ClientState::Stopped => {
                    return Completion::ready(Ok(()));
                }
            }
        }

        info!(client = %self.id, "Stopping language client");
        let shared = Arc::clone(&self.shared);
        let (completer, completion) = Completion::pending();

        let spawned = thread::Builder::new()
            .name(format!("{}-shutdown", self.id))
            .spawn(move || completer.complete(shutdown(&shared)));

        match spawned {
            Ok(_) => completion,
            Err(e) => {
                // Fall back to tearing down in place
                self.stop_requested = false;
                Completion::ready(Err(ClientError::Io(e)))
            }
        }
    }

    /// Notify the server that a document was opened.
    ///
    /// Returns `Ok(false)` for documents outside the selector.
    pub fn did_open(&self, document: TextDocument) -> Result<bool, ClientError> {
        if !self.client_options.matches(&document) {
            return Ok(false);
        }

        let mut inner = lock(&self.shared.inner);
        match inner.state {
            ClientState::Stopping | ClientState::Stopped => {
                return Err(ClientError::InvalidState(inner.state))
            }
            _ => {}
        }

        if inner.documents.contains_key(&document.uri) {
            // Already tracked: the first didOpen stands
            return Ok(true);
        }

        inner.documents.insert(
            document.uri.clone(),
            DocumentInfo {
                version: document.version,
            },
        );

        if inner.state == ClientState::Running {
            let notification = protocol::create_did_open_notification(&document);
            self.shared.send(&mut inner, &notification)?;
        } else {
            inner.pending_opens.push(document);
        }
        Ok(true)
    }

    /// Notify the server of new document contents (full sync)
    pub fn did_change(&self, uri: &str, text: &str) -> Result<bool, ClientError> {
        let mut inner = lock(&self.shared.inner);
        let state = inner.state;

        let version = match inner.documents.get_mut(uri) {
            Some(doc) => {
                doc.version += 1;
                doc.version
            }
            None => return Ok(false), // Document not tracked
        };

        match state {
            ClientState::Running => {
                let notification = protocol::create_did_change_notification(uri, version, text);
                self.shared.send(&mut inner, &notification)?;
            }
            ClientState::Created | ClientState::Starting => {
                // Still queued: fold the change into the pending didOpen
                if let Some(pending) = inner.pending_opens.iter_mut().find(|d| d.uri == uri) {
                    pending.version = version;
                    pending.text = text.to_string();
                }
            }
            ClientState::Stopping | ClientState::Stopped => {
                return Err(ClientError::InvalidState(state))
            }
        }
        Ok(true)
    }

    /// Notify the server that a document was closed
    pub fn did_close(&self, uri: &str) -> Result<bool, ClientError> {
        let mut inner = lock(&self.shared.inner);
        if inner.documents.remove(uri).is_none() {
            return Ok(false);
        }

        if inner.state == ClientState::Running {
            let notification = protocol::create_did_close_notification(uri);
            self.shared.send(&mut inner, &notification)?;
        } else {
            inner.pending_opens.retain(|d| d.uri != uri);
        }
        drop(inner);

        // Clear diagnostics for this file
        lock(&self.shared.diagnostics).remove(uri);
        Ok(true)
    }

    /// Convenience for hosts working with paths
    pub fn did_open_path(&self, path: &Path, text: &str) -> Result<bool, ClientError> {
        match TextDocument::from_path(path, text) {
            Some(document) => self.did_open(document),
            None => Ok(false),
        }
    }

    /// Request diagnostics for a document (`textDocument/diagnostic`).
    ///
    /// The result is also stored, so [`LanguageClient::diagnostics`] sees it.
    pub fn pull_diagnostics(&self, uri: &str) -> Completion<Result<Vec<Diagnostic>, ClientError>> {
        let mut inner = lock(&self.shared.inner);
        if inner.state != ClientState::Running {
            return Completion::ready(Err(ClientError::InvalidState(inner.state)));
        }

        let id = protocol::next_request_id();
        let (completer, completion) = Completion::pending();
        let store = Arc::clone(&self.shared.diagnostics);
        let key = uri.to_string();

        lock(&self.shared.handler).register_callback(
            id,
            Box::new(move |_, result| {
                let response = match result {
                    Ok(value) => {
                        let mut store = lock(&store);
                        if let Some(items) = protocol::parse_diagnostic_report(&value) {
                            store.insert(key.clone(), items);
                        }
                        Ok(store.get(&key).cloned().unwrap_or_default())
                    }
                    Err(e) => Err(ClientError::Protocol {
                        code: e.code,
                        message: e.message,
                    }),
                };
                completer.complete(response);
            }),
        );

        let request = protocol::create_document_diagnostic_request(id, uri);
        if let Err(e) = self.shared.send(&mut inner, &request) {
            lock(&self.shared.handler).cancel_callback(id);
            return Completion::ready(Err(e));
        }
        completion
    }

    /// Latest diagnostics for a document
    pub fn diagnostics(&self, uri: &str) -> Vec<Diagnostic> {
        lock(&self.shared.diagnostics)
            .get(uri)
            .cloned()
            .unwrap_or_default()
    }

    /// All diagnostics, keyed by URI
    pub fn all_diagnostics(&self) -> HashMap<String, Vec<Diagnostic>> {
        lock(&self.shared.diagnostics).clone()
    }

    /// Documents currently tracked as open
    pub fn open_documents(&self) -> Vec<String> {
        lock(&self.shared.inner).documents.keys().cloned().collect()
    }
}

impl Drop for LanguageClient {
    fn drop(&mut self) {
        if self.stop_requested {
            return;
        }
        let mut inner = lock(&self.shared.inner);
        if let Some(mut process) = inner.process.take() {
            warn!(client = %self.id, "Language client dropped without stop; killing server");
            process.kill();
        }
        if inner.state != ClientState::Stopped {
            self.shared.set_state(&mut inner, ClientState::Stopped);
        }
    }
}

/// Body of the connection thread: handshake, then pump messages until the
/// transport closes
fn run_connection(
    shared: Arc<Shared>,
    executable: Executable,
    root: Option<PathBuf>,
    completer: Completer<Result<(), ClientError>>,
) {
    let reader = match handshake(&shared, &executable, root.as_deref()) {
        Ok(reader) => {
            info!("Language server initialized");
            completer.complete(Ok(()));
            reader
        }
        Err(err) => {
            warn!("Starting language client failed: {}", err);
            shared
                .output
                .append_line(format!("Starting client failed: {}", err));
            lock(&shared.handler).close();
            let mut inner = lock(&shared.inner);
            if let Some(mut process) = inner.process.take() {
                process.kill();
            }
            inner.pending_opens.clear();
            shared.set_state(&mut inner, ClientState::Stopped);
            drop(inner);
            completer.complete(Err(err));
            return;
        }
    };

    while let Some(body) = reader.recv() {
        match LspMessage::parse(&body) {
            Some(message) => shared.dispatch(message),
            None => debug!("Ignoring malformed message from server"),
        }
    }

    lock(&shared.handler).close();
    let inner = lock(&shared.inner);
    if inner.state == ClientState::Running {
        warn!("Language server closed the connection");
        shared
            .output
            .append_line("Connection to server got closed.");
    }
}

/// Spawn the server and run initialize / initialized
fn handshake(
    shared: &Shared,
    executable: &Executable,
    root: Option<&Path>,
) -> Result<MessageReader, ClientError> {
    let (process, reader) = ServerProcess::spawn(executable, root, &shared.output)?;

    let id = protocol::next_request_id();
    let root_uri = root.map(path_to_uri);
    let request = protocol::create_initialize_request(id, root_uri.as_deref(), CLIENT_INFO_NAME);

    {
        let mut inner = lock(&shared.inner);
        if inner.state != ClientState::Starting {
            // Dropped while spawning; `process` is killed on drop
            return Err(ClientError::InvalidState(inner.state));
        }
        inner.process = Some(process);
        shared.send(&mut inner, &request)?;
    }

    loop {
        let body = reader.recv().ok_or(ClientError::TransportClosed)?;
        let message = match LspMessage::parse(&body) {
            Some(message) => message,
            None => continue,
        };

        if !matches!(message, LspMessage::Response { id: response_id, .. } if response_id == id) {
            // Servers may log or ask for configuration before answering
            shared.dispatch(message);
            continue;
        }

        shared.trace_message("Received", &message);
        let (result, error) = match message {
            LspMessage::Response { result, error, .. } => (result, error),
            _ => continue,
        };
        if let Some(error) = error {
            return Err(ClientError::Handshake {
                code: error.code,
                message: error.message,
            });
        }

        let capabilities = protocol::parse_capabilities(&result.unwrap_or(Value::Null));
        let mut inner = lock(&shared.inner);
        if inner.state != ClientState::Starting {
            return Err(ClientError::InvalidState(inner.state));
        }
        inner.capabilities = capabilities;
        shared.send(&mut inner, &protocol::create_initialized_notification())?;
        shared.flush_pending_opens(&mut inner)?;
        shared.set_state(&mut inner, ClientState::Running);
        return Ok(reader);
    }
}

/// Body of the shutdown thread
fn shutdown(shared: &Shared) -> Result<(), ClientError> {
    let mut inner = lock(&shared.inner);
    while inner.state == ClientState::Starting {
        inner = shared
            .state_changed
            .wait(inner)
            .unwrap_or_else(PoisonError::into_inner);
    }
    if inner.state != ClientState::Running {
        // Start failed; nothing left to tear down
        return Ok(());
    }
    shared.set_state(&mut inner, ClientState::Stopping);

    let (tx, rx) = mpsc::channel();
    let id = protocol::next_request_id();
    lock(&shared.handler).register_callback(
        id,
        Box::new(move |_, result| {
            let _ = tx.send(result);
        }),
    );

    let sent = shared
        .send(&mut inner, &protocol::create_shutdown_request(id))
        .is_ok();
    if !sent {
        lock(&shared.handler).cancel_callback(id);
    }
    drop(inner);

    if sent {
        match rx.recv() {
            Ok(Ok(_)) => debug!("Server acknowledged shutdown"),
            Ok(Err(e)) => warn!("Server rejected shutdown: {}", e.message),
            Err(_) => debug!("Connection closed before shutdown response"),
        }
    }

    let process = {
        let mut inner = lock(&shared.inner);
        if inner.process.is_some() {
            if let Err(e) = shared.send(&mut inner, &protocol::create_exit_notification()) {
                debug!("Failed to send exit: {}", e);
            }
        }
        inner.process.take()
    };

    let result = match process {
        Some(mut process) => match process.wait() {
            Ok(status) => {
                info!(%status, "Language server exited");
                Ok(())
            }
            Err(e) => Err(ClientError::Io(e)),
        },
        None => Ok(()),
    };

    let mut inner = lock(&shared.inner);
    inner.documents.clear();
    inner.pending_opens.clear();
    shared.set_state(&mut inner, ClientState::Stopped);
    drop(inner);
    lock(&shared.diagnostics).clear();

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(command: &str) -> LanguageClient {
        let output = OutputChannel::new("Lustre Language Server");
        LanguageClient::new(
            "lustreLsp",
            "Lustre Language Server",
            ServerOptions::single(Executable::new(command)),
            ClientOptions::new(vec![DocumentFilter::new("file", "lustre")], output),
        )
    }

    #[test]
    fn test_new_client_is_inert() {
        let client = client("/nonexistent/lustrels");
        assert_eq!(client.state(), ClientState::Created);
        assert_eq!(client.pid(), None);
        assert_eq!(client.capabilities(), Capabilities::default());
    }

    #[test]
    fn test_stop_without_start_completes_immediately() {
        let client = client("/nonexistent/lustrels");
        let mut stopping = client.stop();
        assert!(stopping.is_ready());
        assert!(matches!(stopping.wait(), Some(Ok(()))));
    }

    #[test]
    fn test_start_failure_is_reported_through_completion() {
        let client = client("/nonexistent/server/lustrels");
        let result = client.start().wait().expect("start completion dropped");
        assert!(matches!(result, Err(ClientError::Spawn { .. })));
        assert_eq!(client.state(), ClientState::Stopped);
        assert!(client
            .output_channel()
            .contains("Starting client failed"));

        // No restart out of Stopped
        let again = client.start().wait().unwrap();
        assert!(matches!(
            again,
            Err(ClientError::InvalidState(ClientState::Stopped))
        ));

        assert!(matches!(client.stop().wait(), Some(Ok(()))));
    }

    #[test]
    fn test_did_open_respects_selector() {
        let client = client("/nonexistent/lustrels");
        let other = TextDocument::new("file:///a/main.rs", "rust", "fn main() {}");
        assert!(!client.did_open(other).unwrap());

        let untitled = TextDocument::new("untitled:Untitled-1", "lustre", "");
        assert!(!client.did_open(untitled).unwrap());

        let lustre = TextDocument::new("file:///a/counter.lus", "lustre", "node n() returns ();");
        assert!(client.did_open(lustre).unwrap());
        assert_eq!(client.open_documents(), vec!["file:///a/counter.lus".to_string()]);
    }

    #[test]
    fn test_changes_before_start_fold_into_pending_open() {
        let client = client("/nonexistent/lustrels");
        let doc = TextDocument::new("file:///a/counter.lus", "lustre", "v1");
        assert!(client.did_open(doc).unwrap());
        assert!(client.did_change("file:///a/counter.lus", "v2").unwrap());
        assert!(!client.did_change("file:///a/other.lus", "x").unwrap());

        let inner = lock(&client.shared.inner);
        assert_eq!(inner.pending_opens.len(), 1);
        assert_eq!(inner.pending_opens[0].text, "v2");
        assert_eq!(inner.pending_opens[0].version, 2);
    }

    #[test]
    fn test_did_close_drops_pending_open() {
        let client = client("/nonexistent/lustrels");
        let doc = TextDocument::new("file:///a/counter.lus", "lustre", "v1");
        client.did_open(doc).unwrap();
        assert!(client.did_close("file:///a/counter.lus").unwrap());
        assert!(!client.did_close("file:///a/counter.lus").unwrap());
        assert!(lock(&client.shared.inner).pending_opens.is_empty());
        assert!(client.open_documents().is_empty());
    }

    #[test]
    fn test_failed_pull_send_leaves_no_callback() {
        let client = client("/nonexistent/lustrels");
        // Running, but the transport is already gone
        {
            let mut inner = lock(&client.shared.inner);
            client.shared.set_state(&mut inner, ClientState::Running);
        }

        let result = client.pull_diagnostics("file:///a.lus").wait().unwrap();
        assert!(matches!(result, Err(ClientError::TransportClosed)));
        assert!(!lock(&client.shared.handler).has_pending());
    }

    #[test]
    fn test_pull_diagnostics_requires_running() {
        let client = client("/nonexistent/lustrels");
        let result = client.pull_diagnostics("file:///a.lus").wait().unwrap();
        assert!(matches!(
            result,
            Err(ClientError::InvalidState(ClientState::Created))
        ));
    }
}
