//! Server executable resolution per platform

use std::fmt;

/// Base name of the bundled language server
pub const SERVER_BASE_NAME: &str = "lustrels";

/// Host operating system, as far as executable naming is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    MacOs,
    /// Linux and every other unix-like system
    Other,
}

impl Platform {
    /// Parse a host platform identifier.
    ///
    /// Accepts both editor-style (`win32`, `darwin`) and Rust-style
    /// (`windows`, `macos`) names. Anything unrecognized is treated as a
    /// POSIX-like system rather than rejected.
    pub fn from_identifier(id: &str) -> Self {
        match id {
            "win32" | "windows" => Platform::Windows,
            "darwin" | "macos" => Platform::MacOs,
            _ => Platform::Other,
        }
    }

    /// The platform this process runs on
    pub fn current() -> Self {
        Self::from_identifier(std::env::consts::OS)
    }

    /// File name of the server binary shipped for this platform
    pub fn server_executable_name(&self) -> String {
        match self {
            Platform::Windows => format!("{}.exe", SERVER_BASE_NAME),
            Platform::MacOs => format!("{}.darwin", SERVER_BASE_NAME),
            Platform::Other => SERVER_BASE_NAME.to_string(),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Platform::Windows => "windows",
            Platform::MacOs => "macos",
            Platform::Other => "other",
        })
    }
}
