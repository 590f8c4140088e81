//! FTP-specific error type.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Categorised FTP error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FtpError {
    pub kind: FtpErrorKind,
    pub message: String,
    /// FTP reply code that triggered the error, if any.
    pub code: Option<u16>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FtpErrorKind {
    /// Line is not shaped like `DDD<sp>` or `DDD-<sp>`.
    InvalidReply,
    /// Three digits were present but outside 1..=699.
    CodeOutOfRange,
    /// PWD reply without a quoted path.
    MalformedPath,
    /// A directory listing line could not be decomposed.
    ListingParse,
    /// Empty command argument or bad configuration value.
    InvalidArgument,
    /// Transport operation issued in the wrong socket state.
    InvalidState,
    /// Host name could not be resolved to any usable address.
    ResolveFailed,
    /// TLS configuration or handshake failure.
    TlsFailed,
    /// Watchdog fired before the guarded operation completed.
    Timeout,
    /// Peer closed the connection, or the session task is gone.
    Disconnected,
    /// Any other socket I/O failure.
    IoError,
}

pub type FtpResult<T> = Result<T, FtpError>;

// ── Construction helpers ─────────────────────────────────────────────

impl FtpError {
    pub fn new(kind: FtpErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: u16) -> Self {
        self.code = Some(code);
        self
    }

    pub fn invalid_reply(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::InvalidReply, msg)
    }

    pub fn code_out_of_range(code: u16) -> Self {
        Self::new(
            FtpErrorKind::CodeOutOfRange,
            "Server reply code out of range.",
        )
        .with_code(code)
    }

    pub fn malformed_path(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::MalformedPath, msg)
    }

    pub fn listing_parse(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::ListingParse, msg)
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::InvalidArgument, msg)
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::InvalidState, msg)
    }

    pub fn resolve_failed(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::ResolveFailed, msg)
    }

    pub fn tls_failed(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::TlsFailed, msg)
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::Timeout, msg)
    }

    pub fn disconnected(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::Disconnected, msg)
    }

    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::IoError, msg)
    }
}

impl fmt::Display for FtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(code) = self.code {
            write!(f, "[FTP {:?} {}] {}", self.kind, code, self.message)
        } else {
            write!(f, "[FTP {:?}] {}", self.kind, self.message)
        }
    }
}

impl std::error::Error for FtpError {}

impl From<std::io::Error> for FtpError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::TimedOut => Self::timeout(format!("I/O timeout: {}", e)),
            std::io::ErrorKind::UnexpectedEof | std::io::ErrorKind::ConnectionReset => {
                Self::disconnected(e.to_string())
            }
            _ => Self::io_error(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for FtpError {
    fn from(e: serde_json::Error) -> Self {
        Self::invalid_argument(format!("Invalid connection config: {}", e))
    }
}
