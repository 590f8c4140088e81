//! `ftpc`: console driver for one FTP session.
//!
//! Loads a saved connection (JSON), logs in, optionally changes directory,
//! lists it and prints every session event as it arrives.

use std::process::ExitCode;

use clap::{Arg, ArgAction, Command};
use ftpc_ftp::ftp::{FileKind, FtpConnectionConfig, RemoteFile, SessionEvent, SessionHandle};

/// Initialize the tracing subscriber. `RUST_LOG` overrides the default
/// `info` level; the library's `log` records are bridged in.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn cli() -> Command {
    Command::new("ftpc")
        .about("Log in to an FTP server and list a directory over the control connection")
        .arg(
            Arg::new("config")
                .help("Connection file (JSON)")
                .required(true),
        )
        .arg(
            Arg::new("cd")
                .long("cd")
                .value_name("PATH")
                .help("Change to PATH after login"),
        )
        .arg(
            Arg::new("no-list")
                .long("no-list")
                .action(ArgAction::SetTrue)
                .help("Do not list the directory after login"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .action(ArgAction::SetTrue)
                .help("Print events as JSON lines"),
        )
}

fn kind_name(kind: FileKind) -> &'static str {
    match kind {
        FileKind::File => "file",
        FileKind::Directory => "dir",
        FileKind::Link => "link",
        FileKind::Other => "other",
    }
}

fn print_listing(files: &[RemoteFile]) {
    for f in files {
        println!(
            "{}: {}, {} bytes, {}",
            f.name,
            kind_name(f.kind),
            f.size,
            f.modified.format("%Y-%b-%d %H:%M:%S")
        );
    }
}

fn print_event(event: &SessionEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(e) => log::warn!("cannot encode event: {}", e),
        }
        return;
    }
    match event {
        SessionEvent::Log(line) => println!("Session: {}", line),
        SessionEvent::Error(msg) => println!("Error: {}", msg),
        SessionEvent::FatalError(msg) => println!("Fatal error: {}", msg),
        SessionEvent::DirectoryChanged(path) => println!("Directory: {}", path),
        SessionEvent::DirectoryListing(files) => print_listing(files),
        SessionEvent::Connected | SessionEvent::Idle => {}
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let matches = cli().get_matches();

    let Some(path) = matches.get_one::<String>("config") else {
        return ExitCode::FAILURE;
    };
    let mut config = match FtpConnectionConfig::from_json_file(path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(dir) = matches.get_one::<String>("cd") {
        config.initial_directory = Some(dir.clone());
    }
    if matches.get_flag("no-list") {
        config.list_after_login = false;
    }
    let json = matches.get_flag("json");
    let wants_listing = config.list_after_login;
    let wants_cd = config.initial_directory.is_some();

    log::info!("session for {}", config.display_name());
    let mut session = match SessionHandle::spawn(config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = session.connect() {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }

    let mut status = ExitCode::SUCCESS;
    let mut logged_in = false;
    while let Some(event) = session.next_event().await {
        print_event(&event, json);
        let done = match &event {
            SessionEvent::FatalError(_) => {
                status = ExitCode::FAILURE;
                true
            }
            SessionEvent::DirectoryListing(_) => true,
            SessionEvent::DirectoryChanged(_) => !wants_listing,
            SessionEvent::Idle => {
                logged_in = true;
                !wants_listing && !wants_cd
            }
            // After login an error means the requested step failed.
            SessionEvent::Error(_) if logged_in => {
                status = ExitCode::FAILURE;
                true
            }
            _ => false,
        };
        if done {
            break;
        }
    }

    let _ = session.disconnect();
    session.shutdown().await;
    status
}
