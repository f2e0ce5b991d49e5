//! LSP server process management
//!
//! Handles spawning the language server and moving framed messages over its
//! standard input and output.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::Path;
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use super::error::ClientError;
use super::output::OutputChannel;
use super::protocol::LspMessage;
use super::types::{Executable, TransportKind};

const CONTENT_LENGTH: &str = "content-length:";

/// Largest message body accepted from a server
pub const MAX_CONTENT_LENGTH: usize = 64 * 1024 * 1024;

/// A running language server process
pub struct ServerProcess {
    child: Child,
    stdin: Option<ChildStdin>,
}

/// Receiving half of the stdio transport
pub struct MessageReader {
    message_rx: Receiver<String>,
}

impl MessageReader {
    /// Block until the next complete message body arrives.
    ///
    /// Returns `None` once the server closed its stdout.
    pub fn recv(&self) -> Option<String> {
        self.message_rx.recv().ok()
    }
}

impl ServerProcess {
    /// Spawn a new language server process
    pub fn spawn(
        executable: &Executable,
        cwd: Option<&Path>,
        output: &OutputChannel,
    ) -> Result<(Self, MessageReader), ClientError> {
        match executable.transport {
            TransportKind::Stdio => {}
        }

        let mut cmd = Command::new(&executable.command);
        cmd.args(&executable.args);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ClientError::Spawn {
                command: executable.command.clone(),
                source,
            })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (stdout, stderr) = match (stdout, stderr) {
            (Some(stdout), Some(stderr)) => (stdout, stderr),
            _ => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ClientError::TransportClosed);
            }
        };

        tracing::debug!(pid = child.id(), command = %executable.command.display(), "spawned language server");

        let (tx, rx) = mpsc::channel();
        spawn_reader_thread(stdout, tx)?;
        spawn_stderr_thread(stderr, output.clone())?;

        Ok((
            Self { child, stdin },
            MessageReader { message_rx: rx },
        ))
    }

    /// Send a message to the server
    pub fn send(&mut self, message: &LspMessage) -> Result<(), ClientError> {
        let stdin = self.stdin.as_mut().ok_or(ClientError::TransportClosed)?;
        stdin.write_all(message.encode().as_bytes())?;
        stdin.flush()?;
        Ok(())
    }

    /// Close our end of the server's stdin
    pub fn close_stdin(&mut self) {
        self.stdin.take();
    }

    /// Wait for the server to exit
    pub fn wait(&mut self) -> io::Result<ExitStatus> {
        self.close_stdin();
        self.child.wait()
    }

    /// Check if the process is still running
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Kill the server process
    pub fn kill(&mut self) {
        self.close_stdin();
        let _ = self.child.kill();
        let _ = self.child.wait();
    }

    /// Get the process ID
    pub fn pid(&self) -> u32 {
        self.child.id()
    }
}

impl Drop for ServerProcess {
    fn drop(&mut self) {
        if self.is_running() {
            self.kill();
        }
    }
}

/// Read one `Content-Length` framed message body.
///
/// Returns `Ok(None)` on a clean end of stream.
pub fn read_message<R: BufRead>(reader: &mut R) -> io::Result<Option<String>> {
    let mut content_length: Option<usize> = None;
    let mut header = String::new();

    loop {
        header.clear();
        if reader.read_line(&mut header)? == 0 {
            return Ok(None);
        }

        let line = header.trim_end();
        if line.is_empty() {
            if content_length.is_some() {
                break;
            }
            // Stray blank line between messages
            continue;
        }

        if line.to_ascii_lowercase().starts_with(CONTENT_LENGTH) {
            let value = line[CONTENT_LENGTH.len()..].trim();
            content_length = Some(value.parse().map_err(|_| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("Invalid Content-Length: {}", value),
                )
            })?);
        }
    }

    let content_length = content_length.unwrap_or_default();
    if content_length > MAX_CONTENT_LENGTH {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "Content-Length {} exceeds the {} byte limit",
                content_length, MAX_CONTENT_LENGTH
            ),
        ));
    }
    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body)?;

    String::from_utf8(body)
        .map(Some)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Spawn a thread that decodes framed messages from the server's stdout
fn spawn_reader_thread(stdout: ChildStdout, tx: Sender<String>) -> io::Result<()> {
    thread::Builder::new()
        .name("lsp-stdout".to_string())
        .spawn(move || {
            let mut reader = BufReader::new(stdout);
            loop {
                match read_message(&mut reader) {
                    Ok(Some(body)) => {
                        if tx.send(body).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        tracing::warn!("Closing language server transport: {}", e);
                        break;
                    }
                }
            }
        })?;
    Ok(())
}

/// Spawn a thread that forwards the server's stderr to the output channel
fn spawn_stderr_thread(stderr: ChildStderr, output: OutputChannel) -> io::Result<()> {
    thread::Builder::new()
        .name("lsp-stderr".to_string())
        .spawn(move || {
            let mut reader = BufReader::new(stderr);
            let mut buffer = Vec::new();
            loop {
                buffer.clear();
                match reader.read_until(b'\n', &mut buffer) {
                    Ok(0) => break,
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&buffer);
                        output.append_line(line.trim_end());
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
        })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::path::PathBuf;

    #[test]
    fn test_read_message_sequence() {
        let first = r#"{"jsonrpc":"2.0","method":"initialized"}"#;
        let second = r#"{"jsonrpc":"2.0","id":1,"result":null}"#;
        let stream = format!(
            "Content-Length: {}\r\n\r\n{}Content-Length: {}\r\nContent-Type: application/vscode-jsonrpc; charset=utf-8\r\n\r\n{}",
            first.len(),
            first,
            second.len(),
            second
        );
        let mut reader = Cursor::new(stream.into_bytes());

        assert_eq!(read_message(&mut reader).unwrap().as_deref(), Some(first));
        assert_eq!(read_message(&mut reader).unwrap().as_deref(), Some(second));
        assert_eq!(read_message(&mut reader).unwrap(), None);
    }

    #[test]
    fn test_read_message_counts_bytes() {
        let body = r#"{"message":"ça marche"}"#;
        let stream = format!("content-length: {}\r\n\r\n{}", body.len(), body);
        let mut reader = Cursor::new(stream.into_bytes());
        assert_eq!(read_message(&mut reader).unwrap().as_deref(), Some(body));
    }

    #[test]
    fn test_read_message_rejects_bad_length() {
        let mut reader = Cursor::new(b"Content-Length: lots\r\n\r\n{}".to_vec());
        let err = read_message(&mut reader).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_read_message_rejects_oversized_length() {
        let mut reader = Cursor::new(b"Content-Length: 4398046511104\r\n\r\n{}".to_vec());
        let err = read_message(&mut reader).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        let over_limit = format!("Content-Length: {}\r\n\r\n{{}}", MAX_CONTENT_LENGTH + 1);
        let err = read_message(&mut Cursor::new(over_limit.into_bytes())).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_read_message_truncated_body() {
        let mut reader = Cursor::new(b"Content-Length: 40\r\n\r\n{}".to_vec());
        assert!(read_message(&mut reader).is_err());
    }

    #[test]
    fn test_spawn_missing_executable() {
        let executable = Executable::new(PathBuf::from("/nonexistent/server/lustrels"));
        let output = OutputChannel::new("test");
        match ServerProcess::spawn(&executable, None, &output) {
            Err(ClientError::Spawn { command, .. }) => {
                assert_eq!(command, PathBuf::from("/nonexistent/server/lustrels"));
            }
            Err(other) => panic!("expected spawn error, got {}", other),
            Ok(_) => panic!("spawning a missing executable succeeded"),
        }
    }
}
