//! # ftpc-ftp: FTP control connection
//!
//! - **RFC 959**: command/reply dialogue over the control connection
//! - **RFC 2228 / 4217**: explicit FTPS via `AUTH TLS` + `PBSZ 0`
//!
//! Architecture:
//! - `types`: config, listing records, session state, commands and events
//! - `error`: FTP-specific error type
//! - `reply`: single-line reply interpretation
//! - `commands`: validated control-channel commands
//! - `parser`: `STAT -l` listing parser
//! - `tls`: rustls connector for the control channel upgrade
//! - `transport`: resolve/failover, connect, TLS, line framing, watchdog
//! - `session`: login/navigation state machine and its task handle

pub mod types;
pub mod error;
pub mod reply;
pub mod commands;
pub mod parser;
pub mod tls;
pub mod transport;
pub mod session;

// Re-exports for lib.rs consumers
pub use types::*;
pub use error::{FtpError, FtpErrorKind, FtpResult};
pub use reply::Reply;
pub use commands::FtpCommand;
pub use session::{Session, SessionHandle};
pub use transport::{Resolver, StaticResolver, SystemResolver};
