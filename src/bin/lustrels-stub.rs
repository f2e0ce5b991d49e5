// Minimal stdio language server standing in for lustrels
// Run with: cargo run --bin lustrels-stub -- [--exit-immediately] [--reject-initialize]
//
// Reports an error diagnostic for every line containing `error`, both pushed
// (publishDiagnostics) and pulled (textDocument/diagnostic).

use anyhow::Result;
use clap::Parser;
use lustre_client::lsp::{read_message, LspMessage, ResponseError};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::{self, Write};

#[derive(Parser)]
#[command(name = "lustrels-stub")]
#[command(about = "Minimal stdio language server for exercising the Lustre client", long_about = None)]
struct Cli {
    /// Exit with status 3 before reading any message
    #[arg(long)]
    exit_immediately: bool,

    /// Answer `initialize` with an error
    #[arg(long)]
    reject_initialize: bool,
}

struct Stub {
    documents: HashMap<String, String>,
    reject_initialize: bool,
    shutdown_requested: bool,
    exit_code: Option<i32>,
}

impl Stub {
    fn handle(&mut self, message: LspMessage) -> Vec<LspMessage> {
        match message {
            LspMessage::Request { id, method, params } => {
                vec![self.handle_request(id, &method, params.unwrap_or(Value::Null))]
            }
            LspMessage::Notification { method, params } => {
                self.handle_notification(&method, params.unwrap_or(Value::Null))
            }
            // Answers to our own requests
            LspMessage::Response { .. } => Vec::new(),
        }
    }

    fn handle_request(&mut self, id: i64, method: &str, params: Value) -> LspMessage {
        let result = match method {
            "initialize" if self.reject_initialize => {
                return error_response(id, -32603, "initialization rejected");
            }
            "initialize" => json!({
                "capabilities": {
                    "textDocumentSync": 1,
                    "diagnosticProvider": {
                        "interFileDependencies": false,
                        "workspaceDiagnostics": false
                    }
                },
                "serverInfo": { "name": "lustrels-stub", "version": env!("CARGO_PKG_VERSION") }
            }),
            "shutdown" => {
                self.shutdown_requested = true;
                Value::Null
            }
            "textDocument/diagnostic" => {
                let text = params["textDocument"]["uri"]
                    .as_str()
                    .and_then(|uri| self.documents.get(uri))
                    .map(String::as_str)
                    .unwrap_or("");
                json!({ "kind": "full", "items": diagnostics_for(text) })
            }
            _ => return error_response(id, -32601, &format!("Method not found: {}", method)),
        };

        LspMessage::Response {
            id,
            result: Some(result),
            error: None,
        }
    }

    fn handle_notification(&mut self, method: &str, params: Value) -> Vec<LspMessage> {
        match method {
            "initialized" => vec![
                notification(
                    "window/logMessage",
                    json!({ "type": 3, "message": "Lustre Server Initialized!" }),
                ),
                LspMessage::Request {
                    id: 1,
                    method: "workspace/configuration".to_string(),
                    params: Some(json!({ "items": [{ "section": "lustreLsp" }] })),
                },
            ],
            "textDocument/didOpen" => {
                let document = &params["textDocument"];
                let uri = document["uri"].as_str().unwrap_or_default().to_string();
                let text = document["text"].as_str().unwrap_or_default().to_string();
                self.documents.insert(uri.clone(), text);
                vec![self.publish(&uri)]
            }
            "textDocument/didChange" => {
                let uri = params["textDocument"]["uri"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string();
                if let Some(text) = params["contentChanges"][0]["text"].as_str() {
                    self.documents.insert(uri.clone(), text.to_string());
                }
                vec![self.publish(&uri)]
            }
            "textDocument/didClose" => {
                let uri = params["textDocument"]["uri"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string();
                self.documents.remove(&uri);
                vec![self.publish(&uri)]
            }
            "exit" => {
                self.exit_code = Some(if self.shutdown_requested { 0 } else { 1 });
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn publish(&self, uri: &str) -> LspMessage {
        let text = self.documents.get(uri).map(String::as_str).unwrap_or("");
        notification(
            "textDocument/publishDiagnostics",
            json!({ "uri": uri, "diagnostics": diagnostics_for(text) }),
        )
    }
}

fn notification(method: &str, params: Value) -> LspMessage {
    LspMessage::Notification {
        method: method.to_string(),
        params: Some(params),
    }
}

fn error_response(id: i64, code: i32, message: &str) -> LspMessage {
    LspMessage::Response {
        id,
        result: None,
        error: Some(ResponseError {
            code,
            message: message.to_string(),
            data: None,
        }),
    }
}

fn diagnostics_for(text: &str) -> Vec<Value> {
    text.lines()
        .enumerate()
        .filter_map(|(line, content)| {
            let column = content.find("error")?;
            Some(json!({
                "range": {
                    "start": { "line": line, "character": column },
                    "end": { "line": line, "character": column + "error".len() }
                },
                "severity": 1,
                "source": "lustrels-stub",
                "message": "found `error`"
            }))
        })
        .collect()
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.exit_immediately {
        std::process::exit(3);
    }

    eprintln!("lustrels-stub: started (pid {})", std::process::id());

    let mut stub = Stub {
        documents: HashMap::new(),
        reject_initialize: cli.reject_initialize,
        shutdown_requested: false,
        exit_code: None,
    };

    let mut input = io::stdin().lock();
    let mut output = io::stdout().lock();

    while let Some(body) = read_message(&mut input)? {
        let message = match LspMessage::parse(&body) {
            Some(message) => message,
            None => continue,
        };
        for reply in stub.handle(message) {
            output.write_all(reply.encode().as_bytes())?;
        }
        output.flush()?;

        if let Some(code) = stub.exit_code {
            eprintln!("lustrels-stub: exiting with {}", code);
            std::process::exit(code);
        }
    }

    // Stdin closed without an exit notification
    std::process::exit(1);
}
