//! FTP control-channel commands (RFC 959 §4.1, RFC 2228 / 4217).
//!
//! Commands taking an argument refuse an empty one or one with a line
//! break, so nothing malformed ever reaches the wire. `Display` renders
//! the wire text without CRLF; the transport adds the terminator.

use std::fmt;

use crate::ftp::error::{FtpError, FtpResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FtpCommand {
    AuthTls,
    Pbsz0,
    User(String),
    Pass(String),
    Cwd(String),
    Pwd,
    StatL,
    Dele(String),
    Mkd(String),
    Site(String),
    Feat,
    Pasv,
}

impl FtpCommand {
    pub fn auth_tls() -> Self {
        Self::AuthTls
    }

    pub fn pbsz0() -> Self {
        Self::Pbsz0
    }

    pub fn user(name: &str) -> FtpResult<Self> {
        Ok(Self::User(checked_arg(name, "Empty username.")?))
    }

    pub fn pass(password: &str) -> FtpResult<Self> {
        Ok(Self::Pass(checked_arg(password, "Empty password.")?))
    }

    pub fn cwd(path: &str) -> FtpResult<Self> {
        Ok(Self::Cwd(checked_arg(path, "Empty path.")?))
    }

    pub fn pwd() -> Self {
        Self::Pwd
    }

    pub fn stat_l() -> Self {
        Self::StatL
    }

    pub fn dele(path: &str) -> FtpResult<Self> {
        Ok(Self::Dele(checked_arg(path, "Empty path.")?))
    }

    pub fn mkd(path: &str) -> FtpResult<Self> {
        Ok(Self::Mkd(checked_arg(path, "Empty path.")?))
    }

    pub fn site(command: &str) -> FtpResult<Self> {
        Ok(Self::Site(checked_arg(command, "Empty command.")?))
    }

    pub fn feat() -> Self {
        Self::Feat
    }

    pub fn pasv() -> Self {
        Self::Pasv
    }

    /// Form suitable for logs: identical to the wire text except that the
    /// password is masked.
    pub fn masked(&self) -> String {
        match self {
            Self::Pass(_) => "PASS ****".to_string(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for FtpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AuthTls => f.write_str("AUTH TLS"),
            Self::Pbsz0 => f.write_str("PBSZ 0"),
            Self::User(name) => write!(f, "USER {}", name),
            Self::Pass(password) => write!(f, "PASS {}", password),
            Self::Cwd(path) => write!(f, "CWD {}", path),
            Self::Pwd => f.write_str("PWD"),
            Self::StatL => f.write_str("STAT -l"),
            Self::Dele(path) => write!(f, "DELE {}", path),
            Self::Mkd(path) => write!(f, "MKD {}", path),
            Self::Site(cmd) => write!(f, "SITE {}", cmd),
            Self::Feat => f.write_str("FEAT"),
            Self::Pasv => f.write_str("PASV"),
        }
    }
}

/// Non-empty and on one line: a CR or LF would put a second command on
/// the wire.
fn checked_arg(arg: &str, msg: &str) -> FtpResult<String> {
    if arg.is_empty() {
        Err(FtpError::invalid_argument(msg))
    } else if arg.contains(['\r', '\n']) {
        Err(FtpError::invalid_argument("Line break in command argument."))
    } else {
        Ok(arg.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ftp::error::FtpErrorKind;

    #[test]
    fn wire_text() {
        assert_eq!(FtpCommand::auth_tls().to_string(), "AUTH TLS");
        assert_eq!(FtpCommand::pbsz0().to_string(), "PBSZ 0");
        assert_eq!(FtpCommand::user("bob").unwrap().to_string(), "USER bob");
        assert_eq!(FtpCommand::pass("pw").unwrap().to_string(), "PASS pw");
        assert_eq!(FtpCommand::cwd("/my dir").unwrap().to_string(), "CWD /my dir");
        assert_eq!(FtpCommand::pwd().to_string(), "PWD");
        assert_eq!(FtpCommand::stat_l().to_string(), "STAT -l");
        assert_eq!(FtpCommand::dele("a.txt").unwrap().to_string(), "DELE a.txt");
        assert_eq!(FtpCommand::mkd("new").unwrap().to_string(), "MKD new");
        assert_eq!(
            FtpCommand::site("CHMOD 644 a").unwrap().to_string(),
            "SITE CHMOD 644 a"
        );
        assert_eq!(FtpCommand::feat().to_string(), "FEAT");
        assert_eq!(FtpCommand::pasv().to_string(), "PASV");
    }

    #[test]
    fn empty_arguments_rejected() {
        for err in [
            FtpCommand::user("").unwrap_err(),
            FtpCommand::pass("").unwrap_err(),
            FtpCommand::cwd("").unwrap_err(),
            FtpCommand::dele("").unwrap_err(),
            FtpCommand::mkd("").unwrap_err(),
            FtpCommand::site("").unwrap_err(),
        ] {
            assert_eq!(err.kind, FtpErrorKind::InvalidArgument);
        }
        assert_eq!(FtpCommand::cwd("").unwrap_err().message, "Empty path.");
    }

    #[test]
    fn line_breaks_rejected() {
        for err in [
            FtpCommand::cwd("x\r\nDELE y").unwrap_err(),
            FtpCommand::user("bob\n").unwrap_err(),
            FtpCommand::pass("pw\rPWD").unwrap_err(),
            FtpCommand::site("CHMOD 644 a\nQUIT").unwrap_err(),
        ] {
            assert_eq!(err.kind, FtpErrorKind::InvalidArgument);
            assert_eq!(err.message, "Line break in command argument.");
        }
    }

    #[test]
    fn password_is_masked() {
        let pass = FtpCommand::pass("hunter2").unwrap();
        assert_eq!(pass.masked(), "PASS ****");
        assert_eq!(FtpCommand::user("u").unwrap().masked(), "USER u");
    }
}
