//! LSP message handling and callback management
//!
//! Handles routing of LSP responses to appropriate callbacks, server
//! notifications to the diagnostics store and output channel, and answers
//! the requests a server may send to its client.

use serde_json::Value;
use std::collections::HashMap;

use super::output::OutputChannel;
use super::protocol::{self, LspMessage, ResponseError, METHOD_NOT_FOUND};
use super::types::Diagnostic;

/// Result type for LSP responses
pub type LspResult<T> = Result<T, ResponseError>;

/// Callback for LSP responses
pub type ResponseCallback = Box<dyn FnOnce(i64, LspResult<Value>) + Send>;

/// Callback for diagnostics notifications
pub type DiagnosticsCallback = Box<dyn Fn(String, Vec<Diagnostic>) + Send>;

/// Tracks pending requests and their callbacks
pub struct MessageHandler {
    /// Pending request callbacks indexed by request ID
    pending: HashMap<i64, ResponseCallback>,
    /// Callback for diagnostics notifications
    diagnostics_callback: Option<DiagnosticsCallback>,
    /// Destination for window/logMessage and window/showMessage
    output: OutputChannel,
    /// Set once the transport is gone; no response can arrive after that
    closed: bool,
}

impl MessageHandler {
    pub fn new(output: OutputChannel) -> Self {
        Self {
            pending: HashMap::new(),
            diagnostics_callback: None,
            output,
            closed: false,
        }
    }

    /// Register a callback for a request.
    ///
    /// After [`MessageHandler::close`] the callback is dropped right away, so
    /// anything waiting on it sees a disconnect instead of hanging.
    pub fn register_callback(&mut self, id: i64, callback: ResponseCallback) {
        if self.closed {
            return;
        }
        self.pending.insert(id, callback);
    }

    /// Forget a callback whose request never reached the server.
    ///
    /// Dropping it releases anyone waiting on the response.
    pub fn cancel_callback(&mut self, id: i64) -> bool {
        self.pending.remove(&id).is_some()
    }

    /// Set the diagnostics callback
    pub fn set_diagnostics_callback(&mut self, callback: DiagnosticsCallback) {
        self.diagnostics_callback = Some(callback);
    }

    /// Handle an incoming message, returning the reply to send if any
    pub fn handle_message(&mut self, message: LspMessage) -> Option<LspMessage> {
        match message {
            LspMessage::Response { id, result, error } => {
                self.handle_response(id, result, error);
                None
            }
            LspMessage::Notification { method, params } => {
                self.handle_notification(&method, params);
                None
            }
            LspMessage::Request { id, method, params } => {
                // Handle server-to-client requests
                Some(self.handle_server_request(id, &method, params))
            }
        }
    }

    /// Handle a response message
    fn handle_response(&mut self, id: i64, result: Option<Value>, error: Option<ResponseError>) {
        if let Some(callback) = self.pending.remove(&id) {
            let response = if let Some(err) = error {
                Err(err)
            } else {
                Ok(result.unwrap_or(Value::Null))
            };
            callback(id, response);
        } else {
            tracing::debug!(id, "response for unknown request");
        }
    }

    /// Handle a notification message
    fn handle_notification(&mut self, method: &str, params: Option<Value>) {
        match method {
            "textDocument/publishDiagnostics" => {
                if let (Some(params), Some(callback)) = (params, &self.diagnostics_callback) {
                    let (uri, diagnostics) = protocol::parse_diagnostics(&params);
                    callback(uri, diagnostics);
                }
            }
            "window/logMessage" | "window/showMessage" => {
                if let Some(params) = params {
                    let message = params.get("message").and_then(|m| m.as_str()).unwrap_or("");
                    let label = match params.get("type").and_then(|t| t.as_u64()) {
                        Some(1) => "Error",
                        Some(2) => "Warn",
                        Some(3) => "Info",
                        _ => "Log",
                    };
                    self.output.append_line(format!("[{}] {}", label, message));
                }
            }
            _ => {
                tracing::trace!(method, "ignoring notification");
            }
        }
    }

    /// Handle a server-to-client request
    fn handle_server_request(&mut self, id: i64, method: &str, params: Option<Value>) -> LspMessage {
        match method {
            "workspace/configuration" => {
                // No client-side settings are exposed to the server
                let items = params
                    .as_ref()
                    .and_then(|p| p.get("items"))
                    .and_then(|items| items.as_array())
                    .map_or(0, |items| items.len());
                LspMessage::Response {
                    id,
                    result: Some(Value::Array(vec![Value::Null; items])),
                    error: None,
                }
            }
            "client/registerCapability"
            | "client/unregisterCapability"
            | "window/workDoneProgress/create" => LspMessage::Response {
                id,
                result: Some(Value::Null),
                error: None,
            },
            _ => LspMessage::Response {
                id,
                result: None,
                error: Some(ResponseError {
                    code: METHOD_NOT_FOUND,
                    message: format!("Method not found: {}", method),
                    data: None,
                }),
            },
        }
    }

    /// Mark the transport as closed and drop every pending callback
    pub fn close(&mut self) {
        self.closed = true;
        self.pending.clear();
    }

    /// Check if there are pending requests
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::mpsc;
    use std::sync::{Arc, Mutex};

    fn handler() -> (MessageHandler, OutputChannel) {
        let output = OutputChannel::new("test");
        (MessageHandler::new(output.clone()), output)
    }

    #[test]
    fn test_response_routed_to_callback() {
        let (mut handler, _) = handler();
        let (tx, rx) = mpsc::channel();
        handler.register_callback(
            5,
            Box::new(move |id, result| {
                let _ = tx.send((id, result));
            }),
        );
        assert!(handler.has_pending());

        let reply = handler.handle_message(LspMessage::Response {
            id: 5,
            result: Some(json!({ "ok": true })),
            error: None,
        });
        assert!(reply.is_none());
        let (id, result) = rx.recv().unwrap();
        assert_eq!(id, 5);
        assert_eq!(result.unwrap()["ok"], true);
        assert!(!handler.has_pending());
    }

    #[test]
    fn test_log_message_goes_to_output() {
        let (mut handler, output) = handler();
        handler.handle_message(LspMessage::Notification {
            method: "window/logMessage".to_string(),
            params: Some(json!({ "type": 3, "message": "Lustre Server Initialized!" })),
        });
        assert_eq!(output.lines(), vec!["[Info] Lustre Server Initialized!".to_string()]);
    }

    #[test]
    fn test_publish_diagnostics_callback() {
        let (mut handler, _) = handler();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        handler.set_diagnostics_callback(Box::new(move |uri, diags| {
            sink.lock().unwrap().push((uri, diags.len()));
        }));

        handler.handle_message(LspMessage::Notification {
            method: "textDocument/publishDiagnostics".to_string(),
            params: Some(json!({ "uri": "file:///a.lus", "diagnostics": [] })),
        });
        assert_eq!(*seen.lock().unwrap(), vec![("file:///a.lus".to_string(), 0)]);
    }

    #[test]
    fn test_server_requests() {
        let (mut handler, _) = handler();

        let reply = handler.handle_message(LspMessage::Request {
            id: 1,
            method: "workspace/configuration".to_string(),
            params: Some(json!({ "items": [{ "section": "lustre" }, { "section": "files" }] })),
        });
        assert_eq!(
            reply,
            Some(LspMessage::Response {
                id: 1,
                result: Some(json!([null, null])),
                error: None,
            })
        );

        let reply = handler
            .handle_message(LspMessage::Request {
                id: 2,
                method: "window/workDoneProgress/create".to_string(),
                params: None,
            })
            .unwrap();
        assert_eq!(reply.to_json()["result"], Value::Null);

        let reply = handler.handle_message(LspMessage::Request {
            id: 3,
            method: "workspace/applyEdit".to_string(),
            params: None,
        });
        match reply {
            Some(LspMessage::Response { id, error: Some(error), .. }) => {
                assert_eq!(id, 3);
                assert_eq!(error.code, METHOD_NOT_FOUND);
            }
            other => panic!("expected error response, got {:?}", other),
        }
    }

    #[test]
    fn test_cancel_callback() {
        let (mut handler, _) = handler();
        let (tx, rx) = mpsc::channel::<LspResult<Value>>();
        handler.register_callback(7, Box::new(move |_, r| drop(tx.send(r))));

        assert!(handler.cancel_callback(7));
        assert!(!handler.cancel_callback(7));
        assert!(!handler.has_pending());
        assert!(rx.recv().is_err());

        // A late response for the cancelled id is ignored
        let reply = handler.handle_message(LspMessage::Response {
            id: 7,
            result: Some(Value::Null),
            error: None,
        });
        assert!(reply.is_none());
    }

    #[test]
    fn test_close_drops_callbacks() {
        let (mut handler, _) = handler();
        let (tx, rx) = mpsc::channel::<LspResult<Value>>();
        let early = tx.clone();
        handler.register_callback(1, Box::new(move |_, r| drop(early.send(r))));
        handler.close();
        handler.register_callback(2, Box::new(move |_, r| drop(tx.send(r))));

        assert!(!handler.has_pending());
        // Both senders are gone, so a waiter is released instead of blocking
        assert!(rx.recv().is_err());
    }
}
