//! Shared types for the FTP crate.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::ftp::error::{FtpError, FtpResult};

// ─── Connection ──────────────────────────────────────────────────────

/// Address family the resolver is restricted to. Candidates of the other
/// family are never tried within one connect attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

impl Default for AddressFamily {
    fn default() -> Self {
        Self::Ipv4
    }
}

/// Configuration for a single FTP control connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FtpConnectionConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub address_family: AddressFamily,
    pub username: String,
    pub password: String,
    /// Upgrade the control channel with `AUTH TLS` before logging in.
    #[serde(default = "default_true")]
    pub auth_tls: bool,
    /// Accept self-signed / untrusted certificates.
    #[serde(default)]
    pub accept_invalid_certs: bool,
    /// Watchdog period for resolve, connect and write, in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_sec: u64,
    /// Remote directory to CWD into after login.
    #[serde(default)]
    pub initial_directory: Option<String>,
    /// Request a `STAT -l` listing once logged in.
    #[serde(default = "default_true")]
    pub list_after_login: bool,
    /// Abort the whole listing on the first unparseable line.
    #[serde(default = "default_true")]
    pub strict_listing: bool,
    /// Friendly label shown in the UI.
    #[serde(default)]
    pub label: Option<String>,
}

fn default_port() -> u16 {
    21
}
fn default_timeout() -> u64 {
    15
}
fn default_true() -> bool {
    true
}

impl Default for FtpConnectionConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            address_family: AddressFamily::Ipv4,
            username: "anonymous".into(),
            password: "anonymous@".into(),
            auth_tls: true,
            accept_invalid_certs: false,
            timeout_sec: default_timeout(),
            initial_directory: None,
            list_after_login: true,
            strict_listing: true,
            label: None,
        }
    }
}

impl FtpConnectionConfig {
    pub fn validate(&self) -> FtpResult<()> {
        if self.host.trim().is_empty() {
            return Err(FtpError::invalid_argument("Empty host."));
        }
        if self.port == 0 {
            return Err(FtpError::invalid_argument("Port must be non-zero."));
        }
        if self.username.is_empty() {
            return Err(FtpError::invalid_argument("Empty username."));
        }
        if self.password.is_empty() {
            return Err(FtpError::invalid_argument("Empty password."));
        }
        Ok(())
    }

    pub fn from_json_str(json: &str) -> FtpResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> FtpResult<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            FtpError::invalid_argument(format!(
                "Cannot read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_json_str(&text)
    }

    /// Label if set, otherwise `user@host:port`.
    pub fn display_name(&self) -> String {
        match &self.label {
            Some(label) if !label.is_empty() => label.clone(),
            _ => format!("{}@{}:{}", self.username, self.host, self.port),
        }
    }
}

// ─── Directory Listing ───────────────────────────────────────────────

/// Type of a remote filesystem entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FileKind {
    File,
    Directory,
    Link,
    /// Block/char devices, pipes, sockets and anything unrecognised.
    Other,
}

/// One entry of a `STAT -l` listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
    /// Display name; for links the `-> target` part is stripped.
    pub name: String,
    pub kind: FileKind,
    pub size: u64,
    pub modified: NaiveDateTime,
}

impl RemoteFile {
    /// Directories and links are both traversable from the UI's point of view.
    pub fn is_directory(&self) -> bool {
        matches!(self.kind, FileKind::Directory | FileKind::Link)
    }

    pub fn is_link(&self) -> bool {
        self.kind == FileKind::Link
    }

    pub fn is_file(&self) -> bool {
        self.kind == FileKind::File
    }

    /// Text after the last `.`, unless the name starts with it (`.profile`).
    pub fn extension(&self) -> Option<&str> {
        match self.name.rfind('.') {
            Some(0) | None => None,
            Some(i) => Some(&self.name[i + 1..]),
        }
    }
}

// ─── Session ─────────────────────────────────────────────────────────

/// Protocol progress of one control connection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    NotConnected,
    AwaitingWelcome,
    AwaitingAuthTlsReply,
    AwaitingHandshake,
    AwaitingPbszReply,
    AwaitingUserReply,
    AwaitingPassReply,
    LoggedIn,
    AwaitingCwdReply,
    AwaitingPwdReply,
    AwaitingStatLReply,
}

impl SessionState {
    /// `true` while a reply (or handshake) is expected.
    pub fn is_awaiting(self) -> bool {
        !matches!(self, Self::NotConnected | Self::LoggedIn)
    }
}

/// Requests a collaborator sends to a running session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    Connect,
    ChangeDirectory(String),
    ListDirectory,
    /// Close the control connection; takes effect immediately.
    Disconnect,
}

/// Notifications a session produces.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum SessionEvent {
    /// One line for the session log.
    Log(String),
    /// Control connection established (before the welcome message).
    Connected,
    /// Logged in and ready for navigation commands.
    Idle,
    /// Non-fatal problem; the session keeps its state.
    Error(String),
    /// The session was torn down and is not connected any more.
    FatalError(String),
    DirectoryChanged(String),
    DirectoryListing(Vec<RemoteFile>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::io::Write;

    fn file(name: &str, kind: FileKind) -> RemoteFile {
        RemoteFile {
            name: name.into(),
            kind,
            size: 0,
            modified: NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
        }
    }

    #[test]
    fn config_defaults_from_minimal_json() {
        let cfg = FtpConnectionConfig::from_json_str(
            r#"{"host":"ftp.example.org","username":"bob","password":"secret"}"#,
        )
        .unwrap();
        assert_eq!(cfg.port, 21);
        assert_eq!(cfg.address_family, AddressFamily::Ipv4);
        assert!(cfg.auth_tls);
        assert!(!cfg.accept_invalid_certs);
        assert_eq!(cfg.timeout_sec, 15);
        assert!(cfg.list_after_login);
        assert!(cfg.strict_listing);
        assert_eq!(cfg.initial_directory, None);
        assert_eq!(cfg.display_name(), "bob@ftp.example.org:21");
    }

    #[test]
    fn config_camel_case_fields() {
        let cfg = FtpConnectionConfig::from_json_str(
            r#"{"host":"::1","port":2121,"addressFamily":"ipv6","username":"u",
                "password":"p","authTls":false,"initialDirectory":"/pub",
                "listAfterLogin":false,"label":"Local"}"#,
        )
        .unwrap();
        assert_eq!(cfg.port, 2121);
        assert_eq!(cfg.address_family, AddressFamily::Ipv6);
        assert!(!cfg.auth_tls);
        assert_eq!(cfg.initial_directory.as_deref(), Some("/pub"));
        assert!(!cfg.list_after_login);
        assert_eq!(cfg.display_name(), "Local");
    }

    #[test]
    fn config_validation() {
        let ok = FtpConnectionConfig {
            host: "h".into(),
            ..Default::default()
        };
        assert!(ok.validate().is_ok());
        assert!(FtpConnectionConfig::default().validate().is_err());
        let bad = FtpConnectionConfig {
            port: 0,
            ..ok.clone()
        };
        assert!(bad.validate().is_err());
        let bad = FtpConnectionConfig {
            password: String::new(),
            ..ok
        };
        assert_eq!(bad.validate().unwrap_err().message, "Empty password.");
        assert!(FtpConnectionConfig::from_json_str("{not json").is_err());
    }

    #[test]
    fn config_from_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(
            f,
            r#"{{"host":"localhost","username":"a","password":"b","timeoutSec":3}}"#
        )
        .unwrap();
        let cfg = FtpConnectionConfig::from_json_file(f.path()).unwrap();
        assert_eq!(cfg.timeout_sec, 3);

        let missing = f.path().with_extension("missing");
        assert!(FtpConnectionConfig::from_json_file(missing).is_err());
    }

    #[test]
    fn remote_file_helpers() {
        assert!(file("bin", FileKind::Link).is_directory());
        assert!(file("etc", FileKind::Directory).is_directory());
        assert!(!file("a.txt", FileKind::File).is_directory());
        assert_eq!(file("a.tar.gz", FileKind::File).extension(), Some("gz"));
        assert_eq!(file(".profile", FileKind::File).extension(), None);
        assert_eq!(file("README", FileKind::File).extension(), None);
        assert_eq!(file("trailing.", FileKind::File).extension(), Some(""));
    }

    #[test]
    fn state_predicates() {
        assert!(!SessionState::NotConnected.is_awaiting());
        assert!(!SessionState::LoggedIn.is_awaiting());
        assert!(SessionState::AwaitingHandshake.is_awaiting());
    }

    #[test]
    fn events_serialize_tagged() {
        let json = serde_json::to_string(&SessionEvent::DirectoryChanged("/pub".into())).unwrap();
        assert_eq!(json, r#"{"type":"directoryChanged","data":"/pub"}"#);
    }
}
