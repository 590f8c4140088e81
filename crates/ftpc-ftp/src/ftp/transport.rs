//! Control-connection transport.
//!
//! Owns the socket (plain or TLS), resolves the host into an ordered list
//! of candidate endpoints and fails over between them, frames CRLF lines in
//! both directions and guards resolve, connect and write with a watchdog.
//! It knows nothing about FTP semantics.
//!
//! Requests (`connect`, `handshake`, `send_line`, `read_line`) are queued
//! and run one at a time through [`Transport::execute`]; the outcome comes
//! back as a [`TransportEvent`] which [`dispatch`] hands to the owner's
//! [`TransportHandler`]. Dropping an `execute` future cancels the operation
//! without reporting anything.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::tls;
use crate::ftp::types::AddressFamily;

const READ_CHUNK: usize = 4096;
/// Longest accepted line, terminator excluded.
const MAX_LINE: usize = 64 * 1024;

// ── Name resolution ─────────────────────────────────────────────────────────

/// Turns a host name into socket addresses, in preference order.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, host: &str, port: u16) -> FtpResult<Vec<SocketAddr>>;
}

/// Resolver backed by the operating system (`getaddrinfo`).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

#[async_trait]
impl Resolver for SystemResolver {
    async fn resolve(&self, host: &str, port: u16) -> FtpResult<Vec<SocketAddr>> {
        let addrs = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| FtpError::resolve_failed(format!("Could not resolve {}: {}", host, e)))?;
        Ok(addrs.collect())
    }
}

/// Resolver returning a fixed candidate list regardless of the host.
#[derive(Debug, Clone)]
pub struct StaticResolver(pub Vec<SocketAddr>);

#[async_trait]
impl Resolver for StaticResolver {
    async fn resolve(&self, _host: &str, _port: u16) -> FtpResult<Vec<SocketAddr>> {
        Ok(self.0.clone())
    }
}

// ── Events ──────────────────────────────────────────────────────────────────

/// Outcome of one transport operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    HandshakeDone,
    Written,
    /// One received line, trailing whitespace removed.
    Line(String),
    /// Connecting to one candidate failed. When `exhausted` no candidate
    /// remains and the connect attempt as a whole has failed.
    EndpointFailed { message: String, exhausted: bool },
    Error { message: String, fatal: bool },
}

/// Callbacks the transport owner implements.
pub trait TransportHandler {
    fn handle_connected(&mut self);
    fn handle_handshake_done(&mut self);
    fn handle_line(&mut self, line: String);
    fn handle_transport_error(&mut self, message: String, fatal: bool);
}

/// Route an event to the matching handler callback.
pub fn dispatch<H: TransportHandler + ?Sized>(handler: &mut H, event: TransportEvent) {
    match event {
        TransportEvent::Connected => handler.handle_connected(),
        TransportEvent::HandshakeDone => handler.handle_handshake_done(),
        TransportEvent::Written => {}
        TransportEvent::Line(line) => handler.handle_line(line),
        TransportEvent::EndpointFailed { message, exhausted } => {
            handler.handle_transport_error(message, false);
            if exhausted {
                handler.handle_transport_error("Connection failed.".to_string(), true);
            }
        }
        TransportEvent::Error { message, fatal } => handler.handle_transport_error(message, fatal),
    }
}

// ── Stream ──────────────────────────────────────────────────────────────────

/// Plain TCP, or TCP upgraded in place after `AUTH TLS`.
pub enum ControlStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl ControlStream {
    async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            ControlStream::Plain(s) => s.read(buf).await,
            ControlStream::Tls(s) => s.read(buf).await,
        }
    }

    async fn write_all(&mut self, data: &[u8]) -> std::io::Result<()> {
        match self {
            ControlStream::Plain(s) => {
                s.write_all(data).await?;
                s.flush().await
            }
            ControlStream::Tls(s) => {
                s.write_all(data).await?;
                s.flush().await
            }
        }
    }
}

/// Queued transport operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Resolve,
    Connect,
    Handshake,
    WriteLine(String),
    ReadLine,
}

// ── Transport ───────────────────────────────────────────────────────────────

pub struct Transport {
    id: String,
    resolver: Arc<dyn Resolver>,
    timeout: Duration,
    accept_invalid_certs: bool,
    host: String,
    port: u16,
    family: AddressFamily,
    stream: Option<ControlStream>,
    encrypted: bool,
    candidates: VecDeque<SocketAddr>,
    pending: VecDeque<Operation>,
    read_buf: Vec<u8>,
}

impl Transport {
    pub fn new(
        id: impl Into<String>,
        resolver: Arc<dyn Resolver>,
        timeout: Duration,
        accept_invalid_certs: bool,
    ) -> Self {
        Self {
            id: id.into(),
            resolver,
            timeout,
            accept_invalid_certs,
            host: String::new(),
            port: 0,
            family: AddressFamily::Ipv4,
            stream: None,
            encrypted: false,
            candidates: VecDeque::new(),
            pending: VecDeque::new(),
            read_buf: Vec::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Next queued operation, to be passed to [`execute`](Self::execute).
    pub fn next_operation(&mut self) -> Option<Operation> {
        self.pending.pop_front()
    }

    /// Start a fresh connection. Any previous socket is closed first.
    pub fn connect(&mut self, host: &str, port: u16, family: AddressFamily) {
        self.disconnect();
        self.host = host.to_string();
        self.port = port;
        self.family = family;
        self.encrypted = false;
        self.pending.push_back(Operation::Resolve);
    }

    /// Upgrade the open socket to TLS.
    pub fn handshake(&mut self) -> FtpResult<()> {
        self.require_open()?;
        if self.encrypted {
            return Err(FtpError::invalid_state("Control stream is already encrypted."));
        }
        self.pending.push_back(Operation::Handshake);
        Ok(())
    }

    /// Write `text` followed by CRLF.
    pub fn send_line(&mut self, text: impl Into<String>) -> FtpResult<()> {
        self.require_open()?;
        self.pending.push_back(Operation::WriteLine(text.into()));
        Ok(())
    }

    /// Receive exactly one line.
    pub fn read_line(&mut self) -> FtpResult<()> {
        self.require_open()?;
        self.pending.push_back(Operation::ReadLine);
        Ok(())
    }

    /// Close the socket and forget everything queued.
    pub fn disconnect(&mut self) {
        if self.stream.is_some() {
            log::debug!("[ftp:{}] closing control stream", self.id);
        }
        self.stream = None;
        self.pending.clear();
        self.candidates.clear();
        self.read_buf.clear();
    }

    /// Run one operation. `None` means the operation finished without
    /// anything to report (a resolve that queued its first connect).
    pub async fn execute(&mut self, op: Operation) -> Option<TransportEvent> {
        match op {
            Operation::Resolve => self.do_resolve().await,
            Operation::Connect => Some(self.do_connect().await),
            Operation::Handshake => Some(self.do_handshake().await),
            Operation::WriteLine(text) => Some(self.do_write(&text).await),
            Operation::ReadLine => Some(self.do_read().await),
        }
    }

    async fn do_resolve(&mut self) -> Option<TransportEvent> {
        let lookup = self.resolver.resolve(&self.host, self.port);
        let addrs = match timeout(self.timeout, lookup).await {
            Err(_) => return Some(self.timed_out()),
            Ok(Err(e)) => return Some(self.fatal(e.message)),
            Ok(Ok(addrs)) => addrs,
        };

        let family = self.family;
        self.candidates = addrs
            .into_iter()
            .filter(|a| match family {
                AddressFamily::Ipv4 => a.is_ipv4(),
                AddressFamily::Ipv6 => a.is_ipv6(),
            })
            .collect();
        if self.candidates.is_empty() {
            let msg = format!("No {:?} address found for {}.", self.family, self.host);
            return Some(self.fatal(msg));
        }

        log::info!(
            "[ftp:{}] {} resolved to {} candidate(s)",
            self.id,
            self.host,
            self.candidates.len()
        );
        self.pending.push_front(Operation::Connect);
        None
    }

    async fn do_connect(&mut self) -> TransportEvent {
        let Some(addr) = self.candidates.pop_front() else {
            return self.fatal("Connection failed.");
        };
        log::info!("[ftp:{}] connecting to {}", self.id, addr);

        match timeout(self.timeout, TcpStream::connect(addr)).await {
            Err(_) => self.timed_out(),
            Ok(Ok(tcp)) => {
                let _ = tcp.set_nodelay(true);
                self.stream = Some(ControlStream::Plain(tcp));
                self.candidates.clear();
                log::info!("[ftp:{}] TCP connected to {}", self.id, addr);
                TransportEvent::Connected
            }
            Ok(Err(e)) => {
                let exhausted = self.candidates.is_empty();
                log::warn!("[ftp:{}] connect to {} failed: {}", self.id, addr, e);
                if !exhausted {
                    self.pending.push_front(Operation::Connect);
                }
                TransportEvent::EndpointFailed {
                    message: format!("{}: {}", addr, e),
                    exhausted,
                }
            }
        }
    }

    async fn do_handshake(&mut self) -> TransportEvent {
        let tcp = match self.stream.take() {
            Some(ControlStream::Plain(tcp)) => tcp,
            Some(tls @ ControlStream::Tls(_)) => {
                self.stream = Some(tls);
                return self.fatal("Control stream is already encrypted.");
            }
            None => return self.fatal("Socket is not open."),
        };

        let setup = tls::build_tls_connector(self.accept_invalid_certs)
            .and_then(|c| tls::server_name(&self.host).map(|n| (c, n)));
        let (connector, name) = match setup {
            Ok(v) => v,
            Err(e) => return self.fatal(e.message),
        };

        match connector.connect(name, tcp).await {
            Ok(stream) => {
                self.stream = Some(ControlStream::Tls(Box::new(stream)));
                self.encrypted = true;
                log::info!("[ftp:{}] TLS handshake complete", self.id);
                TransportEvent::HandshakeDone
            }
            Err(e) => self.fatal(format!("TLS handshake failed: {}", e)),
        }
    }

    async fn do_write(&mut self, text: &str) -> TransportEvent {
        let Some(stream) = self.stream.as_mut() else {
            return self.fatal("Socket is not open.");
        };
        let mut data = Vec::with_capacity(text.len() + 2);
        data.extend_from_slice(text.as_bytes());
        data.extend_from_slice(b"\r\n");

        match timeout(self.timeout, stream.write_all(&data)).await {
            Err(_) => self.timed_out(),
            Ok(Err(e)) => self.fatal(e.to_string()),
            Ok(Ok(())) => {
                log::trace!("[ftp:{}] wrote {} bytes", self.id, data.len());
                TransportEvent::Written
            }
        }
    }

    /// Not guarded by the watchdog: a long listing must not time out.
    /// A line longer than [`MAX_LINE`] is fatal instead.
    async fn do_read(&mut self) -> TransportEvent {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(line) = take_line(&mut self.read_buf) {
                log::trace!("[ftp:{}] <<< {}", self.id, line);
                return TransportEvent::Line(line);
            }
            if self.read_buf.len() > MAX_LINE {
                log::warn!(
                    "[ftp:{}] no line terminator in {} bytes",
                    self.id,
                    self.read_buf.len()
                );
                return self.fatal(format!("Line exceeds {} bytes.", MAX_LINE));
            }
            let Some(stream) = self.stream.as_mut() else {
                return self.fatal("Socket is not open.");
            };
            match stream.read(&mut chunk).await {
                Ok(0) => return self.fatal("Connection closed by server."),
                Ok(n) => self.read_buf.extend_from_slice(&chunk[..n]),
                Err(e) => return self.fatal(e.to_string()),
            }
        }
    }

    fn require_open(&self) -> FtpResult<()> {
        if self.stream.is_some() {
            Ok(())
        } else {
            Err(FtpError::invalid_state("Socket is not open."))
        }
    }

    fn fatal(&mut self, message: impl Into<String>) -> TransportEvent {
        self.disconnect();
        TransportEvent::Error {
            message: message.into(),
            fatal: true,
        }
    }

    fn timed_out(&mut self) -> TransportEvent {
        log::warn!("[ftp:{}] watchdog expired after {:?}", self.id, self.timeout);
        self.fatal("Control stream timed out.")
    }
}

/// Remove the first `\n`-terminated line from `buf`.
fn take_line(buf: &mut Vec<u8>) -> Option<String> {
    let pos = buf.iter().position(|&b| b == b'\n')?;
    let raw: Vec<u8> = buf.drain(..=pos).collect();
    Some(String::from_utf8_lossy(&raw).trim_end().to_string())
}
