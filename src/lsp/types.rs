//! LSP type definitions
//!
//! Core types used throughout the LSP client implementation: document
//! positions and diagnostics, server capabilities, how to launch a server
//! and which documents a client applies to.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Position in a document (0-based line and character)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    pub fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

/// Range in a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }
}

/// Diagnostic severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticSeverity {
    Error = 1,
    Warning = 2,
    Information = 3,
    Hint = 4,
}

impl DiagnosticSeverity {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::Error),
            2 => Some(Self::Warning),
            3 => Some(Self::Information),
            4 => Some(Self::Hint),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Information => "info",
            Self::Hint => "hint",
        }
    }
}

/// A diagnostic message from the language server
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub range: Range,
    pub severity: Option<DiagnosticSeverity>,
    pub code: Option<String>,
    pub source: Option<String>,
    pub message: String,
}

/// Server capabilities relevant to this client
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// `textDocumentSync` kind: 0 none, 1 full, 2 incremental
    pub text_document_sync: u8,
    pub formatting: bool,
    pub document_highlight: bool,
    /// Server answers `textDocument/diagnostic` (pull model)
    pub diagnostic_provider: bool,
    pub semantic_tokens: bool,
    pub inlay_hints: bool,
}

impl Capabilities {
    /// Names of the announced features, in a fixed order
    pub fn features(&self) -> Vec<&'static str> {
        let mut features = Vec::new();
        match self.text_document_sync {
            1 => features.push("full sync"),
            2 => features.push("incremental sync"),
            _ => {}
        }
        let flags = [
            (self.diagnostic_provider, "pull diagnostics"),
            (self.formatting, "formatting"),
            (self.document_highlight, "document highlight"),
            (self.semantic_tokens, "semantic tokens"),
            (self.inlay_hints, "inlay hints"),
        ];
        features.extend(flags.into_iter().filter_map(|(on, name)| on.then_some(name)));
        features
    }
}

/// Protocol trace level (`<client id>.trace.server`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trace {
    #[default]
    Off,
    Messages,
    Verbose,
}

impl FromStr for Trace {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "messages" => Ok(Self::Messages),
            "verbose" => Ok(Self::Verbose),
            other => Err(format!(
                "unknown trace level '{}' (expected off, messages or verbose)",
                other
            )),
        }
    }
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Off => "off",
            Self::Messages => "messages",
            Self::Verbose => "verbose",
        })
    }
}

/// Channel carrying protocol traffic between client and server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportKind {
    /// LSP framing over the child's standard input and output
    #[default]
    Stdio,
}

/// How to launch one server process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Executable {
    pub command: PathBuf,
    pub args: Vec<String>,
    pub transport: TransportKind,
}

impl Executable {
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            transport: TransportKind::Stdio,
        }
    }

    pub fn with_args(mut self, args: Vec<&str>) -> Self {
        self.args = args.into_iter().map(String::from).collect();
        self
    }
}

/// Launch configuration: one variant for normal runs, one for debugging
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerOptions {
    pub run: Executable,
    pub debug: Executable,
}

impl ServerOptions {
    /// Same executable for both variants
    pub fn single(executable: Executable) -> Self {
        Self {
            run: executable.clone(),
            debug: executable,
        }
    }

    pub fn select(&self, debug: bool) -> &Executable {
        if debug {
            &self.debug
        } else {
            &self.run
        }
    }
}

/// An open editor document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextDocument {
    pub uri: String,
    pub language_id: String,
    pub version: i32,
    pub text: String,
}

impl TextDocument {
    pub fn new(uri: &str, language_id: &str, text: &str) -> Self {
        Self {
            uri: uri.to_string(),
            language_id: language_id.to_string(),
            version: 1,
            text: text.to_string(),
        }
    }

    /// A `file:` document whose language is detected from the extension
    pub fn from_path(path: &Path, text: &str) -> Option<Self> {
        let language_id = detect_language(path)?;
        Some(Self::new(&path_to_uri(path), language_id, text))
    }
}

/// One entry of a document selector. Every field that is set must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentFilter {
    pub scheme: Option<String>,
    pub language: Option<String>,
}

impl DocumentFilter {
    /// Filter on URI scheme and language id
    pub fn new(scheme: &str, language: &str) -> Self {
        Self {
            scheme: Some(scheme.to_string()),
            language: Some(language.to_string()),
        }
    }

    pub fn matches(&self, document: &TextDocument) -> bool {
        if let Some(scheme) = &self.scheme {
            if uri_scheme(&document.uri) != Some(scheme.as_str()) {
                return false;
            }
        }
        if let Some(language) = &self.language {
            if &document.language_id != language {
                return false;
            }
        }
        true
    }
}

/// Language ID detection from file extension
pub fn detect_language(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?;
    match ext.to_lowercase().as_str() {
        "lus" => Some("lustre"),
        _ => None,
    }
}

/// Convert file path to LSP URI
pub fn path_to_uri(path: &Path) -> String {
    let path = path.to_string_lossy().replace('\\', "/");
    if path.starts_with('/') {
        format!("file://{}", path)
    } else {
        format!("file:///{}", path)
    }
}

/// The scheme part of a URI (`file`, `untitled`, ...)
pub fn uri_scheme(uri: &str) -> Option<&str> {
    let (scheme, _) = uri.split_once(':')?;
    if scheme.is_empty()
        || !scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
    {
        return None;
    }
    Some(scheme)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lustre_doc(uri: &str) -> TextDocument {
        TextDocument::new(uri, "lustre", "node main() returns (); let tel")
    }

    #[test]
    fn test_filter_matches_scheme_and_language() {
        let filter = DocumentFilter::new("file", "lustre");
        assert!(filter.matches(&lustre_doc("file:///work/counter.lus")));
        assert!(!filter.matches(&lustre_doc("untitled:Untitled-1")));
        assert!(!filter.matches(&TextDocument::new(
            "file:///work/main.rs",
            "rust",
            ""
        )));
    }

    #[test]
    fn test_filter_unset_fields_match_anything() {
        let any_lustre = DocumentFilter {
            scheme: None,
            language: Some("lustre".to_string()),
        };
        assert!(any_lustre.matches(&lustre_doc("untitled:Untitled-1")));
        assert!(any_lustre.matches(&lustre_doc("file:///work/counter.lus")));
        assert!(!any_lustre.matches(&TextDocument::new("file:///work/main.c", "c", "")));

        assert!(DocumentFilter::default().matches(&TextDocument::new("untitled:x", "c", "")));
    }

    #[test]
    fn test_capability_features() {
        assert!(Capabilities::default().features().is_empty());

        let caps = Capabilities {
            text_document_sync: 1,
            formatting: true,
            document_highlight: true,
            diagnostic_provider: true,
            semantic_tokens: true,
            inlay_hints: true,
        };
        assert_eq!(
            caps.features(),
            vec![
                "full sync",
                "pull diagnostics",
                "formatting",
                "document highlight",
                "semantic tokens",
                "inlay hints"
            ]
        );

        let incremental = Capabilities {
            text_document_sync: 2,
            ..Capabilities::default()
        };
        assert_eq!(incremental.features(), vec!["incremental sync"]);
    }

    #[test]
    fn test_detect_language() {
        assert_eq!(detect_language(Path::new("/a/counter.lus")), Some("lustre"));
        assert_eq!(detect_language(Path::new("/a/COUNTER.LUS")), Some("lustre"));
        assert_eq!(detect_language(Path::new("/a/main.rs")), None);
        assert_eq!(detect_language(Path::new("/a/Makefile")), None);
    }

    #[test]
    fn test_uri_conversions() {
        assert_eq!(path_to_uri(Path::new("/a/b.lus")), "file:///a/b.lus");
        assert_eq!(path_to_uri(Path::new("C:\\a\\b.lus")), "file:///C:/a/b.lus");
        assert_eq!(uri_scheme("file:///a"), Some("file"));
        assert_eq!(uri_scheme("untitled:x"), Some("untitled"));
        assert_eq!(uri_scheme("no scheme"), None);
    }

    #[test]
    fn test_server_options_select() {
        let options = ServerOptions {
            run: Executable::new("/ext/server/lustrels"),
            debug: Executable::new("/ext/server/lustrels").with_args(vec!["--verbose"]),
        };
        assert!(options.select(false).args.is_empty());
        assert_eq!(options.select(true).args, vec!["--verbose".to_string()]);
    }

    #[test]
    fn test_trace_parse() {
        assert_eq!("Verbose".parse::<Trace>(), Ok(Trace::Verbose));
        assert_eq!("off".parse::<Trace>(), Ok(Trace::Off));
        assert!("loud".parse::<Trace>().is_err());
        assert_eq!(Trace::Messages.to_string(), "messages");
    }
}
