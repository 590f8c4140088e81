//! # ftpc: FTP control connection
//!
//! Transport-and-protocol core of an FTP client:
//!
//! - **Transport**: DNS resolution with endpoint failover, TCP connect,
//!   explicit TLS upgrade, CRLF line framing and a write/connect watchdog
//! - **Reply parsing**: one server line at a time, multi-line aware
//! - **Session**: login/navigation state machine driven by transport events
//! - **Listing parser**: `STAT -l` output into structured file records
//!
//! No data connection is ever opened; directory listings travel over the
//! control connection.

pub mod ftp;
