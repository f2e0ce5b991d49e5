//! LSP JSON-RPC protocol implementation
//!
//! Handles message creation, serialization, and parsing for the Language Server Protocol.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicI64, Ordering};

use super::types::{Capabilities, Diagnostic, DiagnosticSeverity, Position, Range, TextDocument};

/// Global request ID counter
static NEXT_REQUEST_ID: AtomicI64 = AtomicI64::new(1);

/// Get the next unique request ID
pub fn next_request_id() -> i64 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::SeqCst)
}

/// JSON-RPC "method not found"
pub const METHOD_NOT_FOUND: i32 = -32601;

/// LSP message types
#[derive(Debug, Clone, PartialEq)]
pub enum LspMessage {
    Request {
        id: i64,
        method: String,
        params: Option<Value>,
    },
    Response {
        id: i64,
        result: Option<Value>,
        error: Option<ResponseError>,
    },
    Notification {
        method: String,
        params: Option<Value>,
    },
}

/// LSP response error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl LspMessage {
    pub fn method(&self) -> Option<&str> {
        match self {
            LspMessage::Request { method, .. } | LspMessage::Notification { method, .. } => {
                Some(method)
            }
            LspMessage::Response { .. } => None,
        }
    }

    /// The JSON-RPC body of the message
    pub fn to_json(&self) -> Value {
        match self {
            LspMessage::Request { id, method, params } => {
                let mut obj = json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "method": method,
                });
                if let Some(p) = params {
                    obj["params"] = p.clone();
                }
                obj
            }
            LspMessage::Response { id, result, error } => {
                let mut obj = json!({
                    "jsonrpc": "2.0",
                    "id": id,
                });
                if let Some(e) = error {
                    obj["error"] = serde_json::to_value(e).unwrap_or(Value::Null);
                } else {
                    // A successful response always carries `result`, even if null
                    obj["result"] = result.clone().unwrap_or(Value::Null);
                }
                obj
            }
            LspMessage::Notification { method, params } => {
                let mut obj = json!({
                    "jsonrpc": "2.0",
                    "method": method,
                });
                if let Some(p) = params {
                    obj["params"] = p.clone();
                }
                obj
            }
        }
    }

    /// Serialize message to JSON-RPC format with Content-Length header
    pub fn encode(&self) -> String {
        let content = self.to_json().to_string();
        format!("Content-Length: {}\r\n\r\n{}", content.len(), content)
    }

    /// Parse a JSON-RPC message from JSON value
    pub fn from_json(value: Value) -> Option<Self> {
        let obj = value.as_object()?;

        // Check for response (has id and result/error)
        if let Some(id) = obj.get("id").and_then(|v| v.as_i64()) {
            if obj.contains_key("method") {
                // Request
                let method = obj.get("method")?.as_str()?.to_string();
                let params = obj.get("params").cloned();
                Some(LspMessage::Request { id, method, params })
            } else {
                // Response
                let result = obj.get("result").cloned();
                let error = obj
                    .get("error")
                    .and_then(|e| serde_json::from_value(e.clone()).ok());
                Some(LspMessage::Response { id, result, error })
            }
        } else if let Some(method) = obj.get("method").and_then(|v| v.as_str()) {
            // Notification (no id)
            let params = obj.get("params").cloned();
            Some(LspMessage::Notification {
                method: method.to_string(),
                params,
            })
        } else {
            None
        }
    }

    /// Parse a message body as read off the transport
    pub fn parse(body: &str) -> Option<Self> {
        serde_json::from_str::<Value>(body)
            .ok()
            .and_then(Self::from_json)
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Create initialize request
pub fn create_initialize_request(id: i64, root_uri: Option<&str>, client_name: &str) -> LspMessage {
    let capabilities = json!({
        "textDocument": {
            "synchronization": {
                "dynamicRegistration": false,
                "didSave": false,
                "willSave": false,
                "willSaveWaitUntil": false
            },
            "publishDiagnostics": {
                "relatedInformation": true,
                "versionSupport": true
            },
            "diagnostic": {
                "dynamicRegistration": false,
                "relatedDocumentSupport": false
            }
        },
        "window": {
            "workDoneProgress": true
        },
        "workspace": {
            "configuration": true,
            "workspaceFolders": root_uri.is_some()
        }
    });

    let mut params = json!({
        "processId": std::process::id(),
        "clientInfo": {
            "name": client_name,
            "version": env!("CARGO_PKG_VERSION")
        },
        "rootUri": root_uri,
        "capabilities": capabilities,
        "trace": "off",
    });

    if let Some(uri) = root_uri {
        params["workspaceFolders"] = json!([{
            "uri": uri,
            "name": uri.trim_end_matches('/').rsplit('/').next().unwrap_or(uri)
        }]);
    }

    LspMessage::Request {
        id,
        method: "initialize".to_string(),
        params: Some(params),
    }
}

/// Create initialized notification (sent after initialize response)
pub fn create_initialized_notification() -> LspMessage {
    LspMessage::Notification {
        method: "initialized".to_string(),
        params: Some(json!({})),
    }
}

/// Create shutdown request
pub fn create_shutdown_request(id: i64) -> LspMessage {
    LspMessage::Request {
        id,
        method: "shutdown".to_string(),
        params: None,
    }
}

/// Create exit notification
pub fn create_exit_notification() -> LspMessage {
    LspMessage::Notification {
        method: "exit".to_string(),
        params: None,
    }
}

// ============================================================================
// Document Synchronization
// ============================================================================

/// Create textDocument/didOpen notification
pub fn create_did_open_notification(document: &TextDocument) -> LspMessage {
    LspMessage::Notification {
        method: "textDocument/didOpen".to_string(),
        params: Some(json!({
            "textDocument": {
                "uri": document.uri,
                "languageId": document.language_id,
                "version": document.version,
                "text": document.text
            }
        })),
    }
}

/// Create textDocument/didChange notification (full sync)
pub fn create_did_change_notification(uri: &str, version: i32, text: &str) -> LspMessage {
    LspMessage::Notification {
        method: "textDocument/didChange".to_string(),
        params: Some(json!({
            "textDocument": {
                "uri": uri,
                "version": version
            },
            "contentChanges": [{
                "text": text
            }]
        })),
    }
}

/// Create textDocument/didClose notification
pub fn create_did_close_notification(uri: &str) -> LspMessage {
    LspMessage::Notification {
        method: "textDocument/didClose".to_string(),
        params: Some(json!({
            "textDocument": {
                "uri": uri
            }
        })),
    }
}

/// Create textDocument/diagnostic request (pull diagnostics)
pub fn create_document_diagnostic_request(id: i64, uri: &str) -> LspMessage {
    LspMessage::Request {
        id,
        method: "textDocument/diagnostic".to_string(),
        params: Some(json!({
            "textDocument": { "uri": uri }
        })),
    }
}

// ============================================================================
// Response Parsing
// ============================================================================

/// Parse server capabilities from an initialize result
pub fn parse_capabilities(result: &Value) -> Capabilities {
    let caps = result.get("capabilities").unwrap_or(result);
    let provided = |key: &str| {
        caps.get(key)
            .map_or(false, |v| !v.is_null() && v != &Value::Bool(false))
    };

    let text_document_sync = match caps.get("textDocumentSync") {
        Some(Value::Number(kind)) => kind.as_u64().unwrap_or(0) as u8,
        Some(Value::Object(options)) => options
            .get("change")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u8,
        _ => 0,
    };

    Capabilities {
        text_document_sync,
        formatting: provided("documentFormattingProvider"),
        document_highlight: provided("documentHighlightProvider"),
        diagnostic_provider: provided("diagnosticProvider"),
        semantic_tokens: provided("semanticTokensProvider"),
        inlay_hints: provided("inlayHintProvider"),
    }
}

/// Parse Position from JSON
pub fn parse_position(value: &Value) -> Option<Position> {
    Some(Position {
        line: value.get("line")?.as_u64()? as u32,
        character: value.get("character")?.as_u64()? as u32,
    })
}

/// Parse Range from JSON
pub fn parse_range(value: &Value) -> Option<Range> {
    Some(Range {
        start: parse_position(value.get("start")?)?,
        end: parse_position(value.get("end")?)?,
    })
}

/// Parse a list of diagnostics, skipping malformed entries
pub fn parse_diagnostic_list(items: &Value) -> Vec<Diagnostic> {
    items
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|d| {
                    Some(Diagnostic {
                        range: parse_range(d.get("range")?)?,
                        severity: d
                            .get("severity")
                            .and_then(|v| v.as_u64())
                            .and_then(|s| DiagnosticSeverity::from_u32(s as u32)),
                        code: d.get("code").and_then(|v| {
                            if let Some(s) = v.as_str() {
                                Some(s.to_string())
                            } else {
                                v.as_i64().map(|n| n.to_string())
                            }
                        }),
                        source: d.get("source").and_then(|v| v.as_str()).map(String::from),
                        message: d.get("message")?.as_str()?.to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Parse textDocument/publishDiagnostics params
pub fn parse_diagnostics(params: &Value) -> (String, Vec<Diagnostic>) {
    let uri = params
        .get("uri")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let diagnostics = params
        .get("diagnostics")
        .map(parse_diagnostic_list)
        .unwrap_or_default();

    (uri, diagnostics)
}

/// Parse a textDocument/diagnostic report.
///
/// Returns `None` for an "unchanged" report, which keeps the previous result.
pub fn parse_diagnostic_report(result: &Value) -> Option<Vec<Diagnostic>> {
    match result.get("kind").and_then(|v| v.as_str()) {
        Some("unchanged") => None,
        _ => Some(
            result
                .get("items")
                .map(parse_diagnostic_list)
                .unwrap_or_default(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_measures_bytes() {
        let message = LspMessage::Notification {
            method: "window/logMessage".to_string(),
            params: Some(json!({ "message": "é" })),
        };
        let encoded = message.encode();
        let (header, body) = encoded.split_once("\r\n\r\n").unwrap();
        assert_eq!(header, format!("Content-Length: {}", body.len()));
        assert!(body.len() > body.chars().count());
    }

    #[test]
    fn test_from_json_variants() {
        let request = LspMessage::parse(
            r#"{"jsonrpc":"2.0","id":4,"method":"workspace/configuration","params":{}}"#,
        )
        .unwrap();
        assert_eq!(request.method(), Some("workspace/configuration"));
        assert!(matches!(request, LspMessage::Request { id: 4, .. }));

        let response = LspMessage::parse(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32600,"message":"bad"}}"#,
        )
        .unwrap();
        match response {
            LspMessage::Response { id, error, .. } => {
                assert_eq!(id, 1);
                assert_eq!(error.unwrap().code, -32600);
            }
            other => panic!("expected response, got {:?}", other),
        }

        let notification =
            LspMessage::parse(r#"{"jsonrpc":"2.0","method":"initialized","params":{}}"#).unwrap();
        assert!(matches!(notification, LspMessage::Notification { .. }));

        assert!(LspMessage::parse(r#"{"jsonrpc":"2.0"}"#).is_none());
        assert!(LspMessage::parse("not json").is_none());
    }

    #[test]
    fn test_null_result_is_serialized() {
        let response = LspMessage::Response {
            id: 9,
            result: None,
            error: None,
        };
        let json = response.to_json();
        assert!(json.get("result").is_some());
        assert!(json["result"].is_null());
    }

    #[test]
    fn test_initialize_request_without_root() {
        let request = create_initialize_request(1, None, "lustre-client");
        let params = match request {
            LspMessage::Request { params, .. } => params.unwrap(),
            other => panic!("expected request, got {:?}", other),
        };
        assert!(params["rootUri"].is_null());
        assert!(params.get("workspaceFolders").is_none());
        assert_eq!(params["clientInfo"]["name"], "lustre-client");
    }

    #[test]
    fn test_initialize_request_with_root() {
        let request = create_initialize_request(1, Some("file:///work/cruise"), "lustre-client");
        let json = request.to_json();
        assert_eq!(json["params"]["rootUri"], "file:///work/cruise");
        assert_eq!(json["params"]["workspaceFolders"][0]["name"], "cruise");
    }

    #[test]
    fn test_parse_capabilities_of_lustre_server() {
        let result = json!({
            "capabilities": {
                "documentFormattingProvider": true,
                "textDocumentSync": 1,
                "documentHighlightProvider": { "workDoneProgress": true },
                "diagnosticProvider": {
                    "interFileDependencies": false,
                    "workspaceDiagnostics": false
                },
                "semanticTokensProvider": { "full": true },
                "inlayHintProvider": true
            }
        });
        let caps = parse_capabilities(&result);
        assert_eq!(caps.text_document_sync, 1);
        assert!(caps.formatting);
        assert!(caps.document_highlight);
        assert!(caps.diagnostic_provider);
        assert!(caps.semantic_tokens);
        assert!(caps.inlay_hints);

        let caps = parse_capabilities(&json!({ "capabilities": { "inlayHintProvider": false } }));
        assert_eq!(caps, Capabilities::default());
    }

    #[test]
    fn test_parse_diagnostics() {
        let params = json!({
            "uri": "file:///a.lus",
            "diagnostics": [
                {
                    "range": { "start": { "line": 1, "character": 2 }, "end": { "line": 1, "character": 5 } },
                    "severity": 1,
                    "code": 12,
                    "source": "lustrels",
                    "message": "unknown identifier"
                },
                { "message": "no range, skipped" }
            ]
        });
        let (uri, diagnostics) = parse_diagnostics(&params);
        assert_eq!(uri, "file:///a.lus");
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].severity, Some(DiagnosticSeverity::Error));
        assert_eq!(diagnostics[0].code.as_deref(), Some("12"));
        assert_eq!(diagnostics[0].range.start, Position::new(1, 2));
    }

    #[test]
    fn test_parse_diagnostic_report() {
        assert_eq!(
            parse_diagnostic_report(&json!({ "kind": "unchanged", "resultId": "1" })),
            None
        );
        let full = parse_diagnostic_report(&json!({ "kind": "full", "items": [] })).unwrap();
        assert!(full.is_empty());
    }
}
