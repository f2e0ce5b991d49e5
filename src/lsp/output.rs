//! Named output channel
//!
//! The host displays the channel; the client fills it with server log
//! messages, server stderr and (optionally) protocol traces.

use std::sync::{Arc, Mutex};

#[derive(Debug)]
struct ChannelInner {
    name: String,
    lines: Mutex<Vec<String>>,
}

/// A named, append-only log surface shared between the host and a client
#[derive(Debug, Clone)]
pub struct OutputChannel {
    inner: Arc<ChannelInner>,
}

impl OutputChannel {
    pub fn new(name: &str) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                name: name.to_string(),
                lines: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Append one line to the channel
    pub fn append_line(&self, line: impl Into<String>) {
        let line = line.into();
        tracing::info!(target: "lustre_client::output", channel = %self.inner.name, "{}", line);
        if let Ok(mut lines) = self.inner.lines.lock() {
            lines.push(line);
        }
    }

    /// Snapshot of everything written so far
    pub fn lines(&self) -> Vec<String> {
        self.inner
            .lines
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.inner
            .lines
            .lock()
            .map(|lines| lines.iter().any(|line| line.contains(needle)))
            .unwrap_or(false)
    }

    pub fn clear(&self) {
        if let Ok(mut lines) = self.inner.lines.lock() {
            lines.clear();
        }
    }
}
