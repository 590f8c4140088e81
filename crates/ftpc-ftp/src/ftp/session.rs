//! FTP session: login and navigation state machine on top of [`Transport`].
//!
//! A session runs as its own tokio task. Collaborators talk to it through a
//! [`SessionHandle`]: commands go in over one channel, [`SessionEvent`]s
//! come out over another. Inside the task exactly one transport operation
//! is in flight at any time.
//!
//! Login: welcome → [`AUTH TLS` → handshake → `PBSZ 0`] → `USER` → `PASS`.
//! From logged-in, `CWD` is followed by `PWD` to learn the canonical path,
//! and `STAT -l` collects a listing over the control connection.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::ftp::commands::FtpCommand;
use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::parser;
use crate::ftp::reply::Reply;
use crate::ftp::transport::{
    dispatch, Operation, Resolver, SystemResolver, Transport, TransportEvent, TransportHandler,
};
use crate::ftp::types::*;

/// Reply to `USER` meaning no password is needed.
const USER_LOGGED_IN: u16 = 230;

pub struct Session {
    id: String,
    config: FtpConnectionConfig,
    state: SessionState,
    /// Set between `Connect` and the TCP connection being established.
    connecting: bool,
    transport: Transport,
    listing: Vec<String>,
    events: mpsc::UnboundedSender<SessionEvent>,
    /// Navigation requests received while another sequence was running.
    deferred: VecDeque<SessionCommand>,
}

enum Interrupt {
    Finished(Option<TransportEvent>),
    Command(SessionCommand),
    Closed,
}

impl Session {
    pub fn new(
        config: FtpConnectionConfig,
        resolver: Arc<dyn Resolver>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let id = Uuid::new_v4().to_string();
        let transport = Transport::new(
            id.clone(),
            resolver,
            Duration::from_secs(config.timeout_sec),
            config.accept_invalid_certs,
        );
        log::debug!(
            "[ftp:{}] new session for ftp://{}@{}:{} (family={:?}, auth_tls={})",
            id,
            config.username,
            config.host,
            config.port,
            config.address_family,
            config.auth_tls
        );
        Self {
            id,
            config,
            state: SessionState::NotConnected,
            connecting: false,
            transport,
            listing: Vec::new(),
            events,
            deferred: VecDeque::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the session until the command channel closes.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<SessionCommand>) {
        loop {
            if self.state == SessionState::LoggedIn && !self.transport.has_pending() {
                if let Some(cmd) = self.deferred.pop_front() {
                    self.handle_command(cmd);
                    continue;
                }
            }

            // While idle keep a read outstanding so server farewells and
            // disconnects are noticed; any command may interrupt it.
            let (op, idle_watch) = match self.transport.next_operation() {
                Some(op) => (op, false),
                None if self.state == SessionState::LoggedIn && self.transport.is_open() => {
                    (Operation::ReadLine, true)
                }
                None => match commands.recv().await {
                    Some(cmd) => {
                        self.handle_command(cmd);
                        continue;
                    }
                    None => break,
                },
            };

            let outcome = {
                let exec = self.transport.execute(op);
                tokio::pin!(exec);
                loop {
                    tokio::select! {
                        ev = &mut exec => break Interrupt::Finished(ev),
                        cmd = commands.recv() => match cmd {
                            None => break Interrupt::Closed,
                            Some(cmd @ (SessionCommand::Disconnect | SessionCommand::Connect)) => {
                                break Interrupt::Command(cmd)
                            }
                            Some(cmd) if idle_watch => break Interrupt::Command(cmd),
                            Some(cmd) => self.deferred.push_back(cmd),
                        },
                    }
                }
            };

            match outcome {
                Interrupt::Finished(Some(ev)) => dispatch(&mut self, ev),
                Interrupt::Finished(None) => {}
                Interrupt::Command(cmd) => self.handle_command(cmd),
                Interrupt::Closed => break,
            }
        }

        self.transport.disconnect();
        log::debug!("[ftp:{}] session task finished", self.id);
    }

    // ── Commands ──────────────────────────────────────────────────────

    fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Connect => self.begin_connect(),
            SessionCommand::Disconnect => self.close(),
            SessionCommand::ChangeDirectory(_) | SessionCommand::ListDirectory => {
                if self.state == SessionState::LoggedIn {
                    match cmd {
                        SessionCommand::ChangeDirectory(path) => self.begin_change_directory(&path),
                        _ => self.begin_list_directory(),
                    }
                } else if self.state.is_awaiting() || self.connecting {
                    self.deferred.push_back(cmd);
                } else {
                    self.emit(SessionEvent::Error("Not logged in.".to_string()));
                }
            }
        }
    }

    fn begin_connect(&mut self) {
        log::info!(
            "[ftp:{}] connecting to {}:{}",
            self.id,
            self.config.host,
            self.config.port
        );
        self.log_line("Connecting...");
        self.state = SessionState::NotConnected;
        self.listing.clear();
        self.connecting = true;
        let (host, port, family) = (
            self.config.host.clone(),
            self.config.port,
            self.config.address_family,
        );
        self.transport.connect(&host, port, family);
    }

    fn begin_change_directory(&mut self, path: &str) {
        match FtpCommand::cwd(path) {
            Ok(cmd) => {
                self.send_command(cmd);
                self.state = SessionState::AwaitingCwdReply;
            }
            Err(e) => self.emit(SessionEvent::Error(e.message)),
        }
    }

    fn begin_list_directory(&mut self) {
        self.listing.clear();
        self.send_command(FtpCommand::stat_l());
        self.state = SessionState::AwaitingStatLReply;
    }

    /// Explicit disconnect: nothing is reported for the aborted operation.
    fn close(&mut self) {
        log::info!("[ftp:{}] disconnecting", self.id);
        self.reset();
    }

    // ── Reply handlers ────────────────────────────────────────────────

    /// Log the line and decide whether it completes a positive reply.
    /// Continuations request the next line; malformed and negative replies
    /// end the session.
    fn accept_reply(&mut self, line: &str) -> Option<u16> {
        self.log_line(line);
        let reply = Reply::new(line);
        if !reply.is_valid_format() {
            self.fail("Invalid reply received.");
            return None;
        }
        if !reply.is_end_of_reply() {
            self.read_next();
            return None;
        }
        match reply.is_negative() {
            Ok(false) => {}
            Ok(true) | Err(_) => {
                self.fail(line);
                return None;
            }
        }
        match reply.code() {
            Ok(code) => Some(code),
            Err(e) => {
                self.fail(e.message);
                None
            }
        }
    }

    fn handle_welcome(&mut self, line: &str) {
        if self.accept_reply(line).is_none() {
            return;
        }
        if self.config.auth_tls {
            self.send_command(FtpCommand::auth_tls());
            self.state = SessionState::AwaitingAuthTlsReply;
        } else {
            self.send_user();
        }
    }

    fn handle_auth_tls_reply(&mut self, line: &str) {
        if self.accept_reply(line).is_none() {
            return;
        }
        match self.transport.handshake() {
            Ok(()) => self.state = SessionState::AwaitingHandshake,
            Err(e) => self.fail(e.message),
        }
    }

    fn handle_pbsz_reply(&mut self, line: &str) {
        if self.accept_reply(line).is_some() {
            self.send_user();
        }
    }

    fn handle_user_reply(&mut self, line: &str) {
        match self.accept_reply(line) {
            Some(USER_LOGGED_IN) => self.logged_in(),
            Some(_) => match FtpCommand::pass(&self.config.password) {
                Ok(cmd) => {
                    self.send_command(cmd);
                    self.state = SessionState::AwaitingPassReply;
                }
                Err(e) => self.fail(e.message),
            },
            None => {}
        }
    }

    fn handle_pass_reply(&mut self, line: &str) {
        if self.accept_reply(line).is_some() {
            self.logged_in();
        }
    }

    fn handle_cwd_reply(&mut self, line: &str) {
        if self.accept_reply(line).is_none() {
            return;
        }
        self.send_command(FtpCommand::pwd());
        self.state = SessionState::AwaitingPwdReply;
    }

    fn handle_pwd_reply(&mut self, line: &str) {
        if self.accept_reply(line).is_none() {
            return;
        }
        match Reply::new(line).quoted_path() {
            Ok(path) => {
                log::info!("[ftp:{}] changed directory to {}", self.id, path);
                self.state = SessionState::LoggedIn;
                self.emit(SessionEvent::DirectoryChanged(path.to_string()));
            }
            Err(e) => self.fail(e.message),
        }
    }

    fn handle_stat_l_reply(&mut self, line: String) {
        // Anything not shaped like a reply is a listing entry.
        if !Reply::new(&line).is_valid_format() {
            if self.listing.is_empty() {
                self.log_line("(directory list was here)");
            }
            self.listing.push(line);
            self.read_next();
            return;
        }
        if self.accept_reply(&line).is_none() {
            return;
        }

        self.state = SessionState::LoggedIn;
        let lines = std::mem::take(&mut self.listing);
        match parser::parse_listing(&lines, self.config.strict_listing) {
            Ok(files) => {
                log::info!("[ftp:{}] received {} directory entries", self.id, files.len());
                self.emit(SessionEvent::DirectoryListing(files));
            }
            Err(e) => {
                log::warn!("[ftp:{}] {}", self.id, e.message);
                self.log_line(&e.message);
                self.emit(SessionEvent::Error(e.message));
            }
        }
    }

    /// A line nobody asked for, typically an idle-timeout farewell.
    fn handle_unexpected(&mut self, line: &str) {
        log::info!("[ftp:{}] unexpected message from server", self.id);
        self.log_line(line);
        if !Reply::new(line).is_valid_format() {
            self.emit(SessionEvent::Error("Invalid reply received.".to_string()));
        }
    }

    // ── Helpers ───────────────────────────────────────────────────────

    fn send_user(&mut self) {
        match FtpCommand::user(&self.config.username) {
            Ok(cmd) => {
                self.send_command(cmd);
                self.state = SessionState::AwaitingUserReply;
            }
            Err(e) => self.fail(e.message),
        }
    }

    fn logged_in(&mut self) {
        log::info!("[ftp:{}] logged in as {}", self.id, self.config.username);
        self.state = SessionState::LoggedIn;
        self.emit(SessionEvent::Idle);

        if self.config.list_after_login {
            self.deferred.push_front(SessionCommand::ListDirectory);
        }
        if let Some(dir) = self.config.initial_directory.clone() {
            self.deferred.push_front(SessionCommand::ChangeDirectory(dir));
        }
    }

    /// Queue the command and a read for its reply.
    fn send_command(&mut self, cmd: FtpCommand) {
        let shown = cmd.masked();
        log::trace!("[ftp:{}] >>> {}", self.id, shown);
        self.log_line(&format!(">>> {}", shown));
        let queued = self
            .transport
            .send_line(cmd.to_string())
            .and_then(|()| self.transport.read_line());
        if let Err(e) = queued {
            self.fail(e.message);
        }
    }

    fn read_next(&mut self) {
        if let Err(e) = self.transport.read_line() {
            self.fail(e.message);
        }
    }

    /// Tear the session down and report why.
    fn fail(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::warn!("[ftp:{}] fatal: {}", self.id, message);
        self.reset();
        self.emit(SessionEvent::FatalError(message));
    }

    fn reset(&mut self) {
        self.transport.disconnect();
        self.state = SessionState::NotConnected;
        self.connecting = false;
        self.listing.clear();
        self.deferred.clear();
    }

    fn log_line(&self, line: &str) {
        self.emit(SessionEvent::Log(line.to_string()));
    }

    fn emit(&self, event: SessionEvent) {
        // The collaborator may have dropped its receiver; nothing to do then.
        let _ = self.events.send(event);
    }
}

impl TransportHandler for Session {
    fn handle_connected(&mut self) {
        self.connecting = false;
        self.log_line("Connected.");
        self.emit(SessionEvent::Connected);
        self.state = SessionState::AwaitingWelcome;
        self.read_next();
    }

    fn handle_handshake_done(&mut self) {
        self.log_line("TLS handshake complete.");
        self.send_command(FtpCommand::pbsz0());
        self.state = SessionState::AwaitingPbszReply;
    }

    fn handle_line(&mut self, line: String) {
        match self.state {
            SessionState::AwaitingWelcome => self.handle_welcome(&line),
            SessionState::AwaitingAuthTlsReply => self.handle_auth_tls_reply(&line),
            SessionState::AwaitingPbszReply => self.handle_pbsz_reply(&line),
            SessionState::AwaitingUserReply => self.handle_user_reply(&line),
            SessionState::AwaitingPassReply => self.handle_pass_reply(&line),
            SessionState::AwaitingCwdReply => self.handle_cwd_reply(&line),
            SessionState::AwaitingPwdReply => self.handle_pwd_reply(&line),
            SessionState::AwaitingStatLReply => self.handle_stat_l_reply(line),
            SessionState::NotConnected
            | SessionState::LoggedIn
            | SessionState::AwaitingHandshake => self.handle_unexpected(&line),
        }
    }

    fn handle_transport_error(&mut self, message: String, fatal: bool) {
        let logged = format!("Connection error: {}", message);
        self.log_line(&logged);
        if fatal {
            self.fail(message);
        } else {
            self.emit(SessionEvent::Error(logged));
        }
    }
}

// ── Handle ──────────────────────────────────────────────────────────────────

/// A handle to a running session task.
pub struct SessionHandle {
    /// Unique session id, also used as the log prefix.
    pub id: String,
    cmd_tx: mpsc::UnboundedSender<SessionCommand>,
    event_rx: mpsc::UnboundedReceiver<SessionEvent>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Spawn a session using the system resolver. Must be called from
    /// within a tokio runtime.
    pub fn spawn(config: FtpConnectionConfig) -> FtpResult<Self> {
        Self::spawn_with_resolver(config, Arc::new(SystemResolver))
    }

    pub fn spawn_with_resolver(
        config: FtpConnectionConfig,
        resolver: Arc<dyn Resolver>,
    ) -> FtpResult<Self> {
        config.validate()?;
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let session = Session::new(config, resolver, event_tx);
        let id = session.id().to_string();
        let task = tokio::spawn(session.run(cmd_rx));
        Ok(Self {
            id,
            cmd_tx,
            event_rx,
            task,
        })
    }

    pub fn connect(&self) -> FtpResult<()> {
        self.send(SessionCommand::Connect)
    }

    pub fn change_directory(&self, path: impl Into<String>) -> FtpResult<()> {
        self.send(SessionCommand::ChangeDirectory(path.into()))
    }

    pub fn list_directory(&self) -> FtpResult<()> {
        self.send(SessionCommand::ListDirectory)
    }

    pub fn disconnect(&self) -> FtpResult<()> {
        self.send(SessionCommand::Disconnect)
    }

    /// Next event, or `None` once the session task has ended.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.event_rx.recv().await
    }

    /// Close the command channel and wait for the task to finish.
    pub async fn shutdown(self) {
        drop(self.cmd_tx);
        if let Err(e) = self.task.await {
            log::warn!("[ftp:{}] session task failed: {}", self.id, e);
        }
    }

    fn send(&self, cmd: SessionCommand) -> FtpResult<()> {
        self.cmd_tx
            .send(cmd)
            .map_err(|_| FtpError::disconnected("Session task has stopped."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ftp::transport::StaticResolver;

    fn session() -> (Session, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let config = FtpConnectionConfig {
            host: "localhost".into(),
            ..Default::default()
        };
        (
            Session::new(config, Arc::new(StaticResolver(vec![])), tx),
            rx,
        )
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[test]
    fn navigation_requires_login() {
        let (mut s, mut rx) = session();
        s.handle_command(SessionCommand::ListDirectory);
        s.handle_command(SessionCommand::ChangeDirectory("/".into()));
        assert_eq!(
            drain(&mut rx),
            vec![
                SessionEvent::Error("Not logged in.".into()),
                SessionEvent::Error("Not logged in.".into()),
            ]
        );
        assert!(s.deferred.is_empty());
    }

    #[test]
    fn navigation_deferred_while_logging_in() {
        let (mut s, mut rx) = session();
        s.state = SessionState::AwaitingPassReply;
        s.handle_command(SessionCommand::ChangeDirectory("/pub".into()));
        s.handle_command(SessionCommand::ListDirectory);
        assert!(drain(&mut rx).is_empty());
        assert_eq!(s.deferred.len(), 2);
    }

    #[test]
    fn unexpected_lines_are_logged() {
        let (mut s, mut rx) = session();
        s.state = SessionState::LoggedIn;
        s.handle_line("421 Idle timeout.".into());
        s.handle_line("garbage".into());
        assert_eq!(
            drain(&mut rx),
            vec![
                SessionEvent::Log("421 Idle timeout.".into()),
                SessionEvent::Log("garbage".into()),
                SessionEvent::Error("Invalid reply received.".into()),
            ]
        );
        assert_eq!(s.state(), SessionState::LoggedIn);
    }

    #[test]
    fn pwd_reply_changes_directory() {
        let (mut s, mut rx) = session();
        s.state = SessionState::AwaitingPwdReply;
        s.handle_line("257 \"/home/ftp\" is current directory.".into());
        assert_eq!(s.state(), SessionState::LoggedIn);
        assert_eq!(
            drain(&mut rx).last(),
            Some(&SessionEvent::DirectoryChanged("/home/ftp".into()))
        );
    }

    #[test]
    fn malformed_pwd_is_fatal() {
        let (mut s, mut rx) = session();
        s.state = SessionState::AwaitingPwdReply;
        s.handle_line("257 /home/ftp".into());
        assert_eq!(s.state(), SessionState::NotConnected);
        assert_eq!(
            drain(&mut rx).last(),
            Some(&SessionEvent::FatalError(
                "Invalid path format in PWD reply.".into()
            ))
        );
    }

    #[test]
    fn negative_reply_is_fatal() {
        let (mut s, mut rx) = session();
        s.state = SessionState::AwaitingCwdReply;
        s.handle_line("550 No such directory.".into());
        assert_eq!(s.state(), SessionState::NotConnected);
        assert_eq!(
            drain(&mut rx),
            vec![
                SessionEvent::Log("550 No such directory.".into()),
                SessionEvent::FatalError("550 No such directory.".into()),
            ]
        );
    }

    #[test]
    fn listing_completes_on_final_reply() {
        let (mut s, mut rx) = session();
        s.state = SessionState::AwaitingStatLReply;
        s.listing = vec![
            "total 4".into(),
            "-rw-r--r-- 1 0 0 5 Jan 1 2020 a.txt".into(),
        ];
        s.handle_line("213 End of status".into());
        assert_eq!(s.state(), SessionState::LoggedIn);
        assert!(s.listing.is_empty());
        match drain(&mut rx).last() {
            Some(SessionEvent::DirectoryListing(files)) => {
                assert_eq!(files.len(), 1);
                assert_eq!(files[0].name, "a.txt");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn bad_listing_is_not_fatal() {
        let (mut s, mut rx) = session();
        s.state = SessionState::AwaitingStatLReply;
        s.listing = vec!["Permission denied".into()];
        s.handle_line("213 End of status".into());
        assert_eq!(s.state(), SessionState::LoggedIn);
        let events = drain(&mut rx);
        assert!(matches!(events.last(), Some(SessionEvent::Error(m)) if m.contains("Permission denied")));
        assert!(!events.iter().any(|e| matches!(e, SessionEvent::FatalError(_))));
    }

    #[test]
    fn connect_failure_reporting() {
        let (mut s, mut rx) = session();
        dispatch(
            &mut s,
            TransportEvent::EndpointFailed {
                message: "127.0.0.1:21: refused".into(),
                exhausted: true,
            },
        );
        assert_eq!(
            drain(&mut rx),
            vec![
                SessionEvent::Log("Connection error: 127.0.0.1:21: refused".into()),
                SessionEvent::Error("Connection error: 127.0.0.1:21: refused".into()),
                SessionEvent::Log("Connection error: Connection failed.".into()),
                SessionEvent::FatalError("Connection failed.".into()),
            ]
        );
    }
}
