//! Error taxonomy for the bridge.
//!
//! Only configuration and repository-level git failures may take the process
//! down; everything else is logged and isolated to the path or connection it
//! happened on.

use anyhow::Error;

/// Categorized error types for better handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed or missing interface declarations (fatal)
    Config,

    /// Repository-level git failures: not a repo, unknown branch (fatal)
    Git,

    /// Disk read/write failures (logged, session continues)
    Io,

    /// Peer connection failures (logged, no reconnection)
    Transport,

    /// Operation attempted without the matching permission (logged, skipped)
    Permission,

    /// Unknown errors
    Unknown,
}

impl ErrorCategory {
    /// Whether this category should terminate the process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ErrorCategory::Config | ErrorCategory::Git)
    }
}

/// Categorize an error by its message, falling back to the concrete error
/// type at the root of the chain.
pub fn categorize_error(error: &Error) -> ErrorCategory {
    let message = error.to_string().to_lowercase();

    if message.contains("config") || message.contains("interface") {
        ErrorCategory::Config
    } else if message.contains("repository") || message.contains("branch") || message.contains("git")
    {
        ErrorCategory::Git
    } else if message.contains("permission") {
        ErrorCategory::Permission
    } else if message.contains("connection")
        || message.contains("websocket")
        || message.contains("signaling")
    {
        ErrorCategory::Transport
    } else if error.downcast_ref::<git2::Error>().is_some() {
        ErrorCategory::Git
    } else if error.downcast_ref::<serde_json::Error>().is_some() {
        ErrorCategory::Config
    } else if error
        .downcast_ref::<tokio_tungstenite::tungstenite::Error>()
        .is_some()
    {
        ErrorCategory::Transport
    } else if error.downcast_ref::<std::io::Error>().is_some() {
        ErrorCategory::Io
    } else {
        ErrorCategory::Unknown
    }
}
