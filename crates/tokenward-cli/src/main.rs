//! tokenward - command-line front end for a tokenward session.
//!
//! Logs in against the configured authority, keeps the credential pair in
//! the configured store, and prints the current token or user on demand.
//! Expired access tokens are refreshed transparently.

use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tokenward_core::utils::format_expiry;
use tokenward_core::{ApiClient, Config, SessionError, SessionManager, SessionState};

// ============================================================================
// Constants
// ============================================================================

/// Log file name prefix in the cache directory (rotated daily)
const LOG_FILE_PREFIX: &str = "tokenward.log";

const USAGE: &str = "\
Usage: tokenward [--base-url URL] <command>

Commands:
  login [USERNAME]   Log in (password from TOKENWARD_PASSWORD or prompt)
  logout             End the session and delete stored credentials
  token              Print the current access token, refreshing if needed
  whoami             Print the current user
  status             Show session state and token expiry
  help               Show this message

Environment:
  TOKENWARD_BASE_URL, TOKENWARD_USERNAME, TOKENWARD_PASSWORD, RUST_LOG";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Login(Option<String>),
    Logout,
    Token,
    Whoami,
    Status,
    Help,
}

#[derive(Debug, Default, PartialEq, Eq)]
struct Options {
    base_url: Option<String>,
}

fn parse_args(args: &[String]) -> Result<(Options, Command)> {
    let mut options = Options::default();
    let mut rest = args.iter();
    let mut positional = Vec::new();

    while let Some(arg) = rest.next() {
        match arg.as_str() {
            "--base-url" => {
                let url = rest
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--base-url needs a value"))?;
                options.base_url = Some(url.clone());
            }
            "-h" | "--help" => return Ok((options, Command::Help)),
            flag if flag.starts_with('-') => anyhow::bail!("Unknown option: {}", flag),
            _ => positional.push(arg.as_str()),
        }
    }

    let command = match positional.as_slice() {
        [] | ["help"] => Command::Help,
        ["login"] => Command::Login(None),
        ["login", username] => Command::Login(Some((*username).to_string())),
        ["logout"] => Command::Logout,
        ["token"] => Command::Token,
        ["whoami"] => Command::Whoami,
        ["status"] => Command::Status,
        [other, ..] => anyhow::bail!("Unknown command: {}", other),
    };
    Ok((options, command))
}

/// Initialize the tracing subscriber for logging
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (options, command) = match parse_args(&args) {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("Error: {}\n\n{}", e, USAGE);
            std::process::exit(2);
        }
    };
    if command == Command::Help {
        println!("{}", USAGE);
        return Ok(());
    }

    let (mut config, config_error) = match Config::load() {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };

    let log_dir = config.cache_dir().ok();
    if let Some(ref dir) = log_dir {
        let _ = std::fs::create_dir_all(dir);
    }
    let _log_guard = init_tracing(log_dir.as_deref());
    if let Some(e) = config_error {
        warn!(error = %e, "Failed to load config, using defaults");
    }

    if let Some(url) = options.base_url.or_else(|| std::env::var("TOKENWARD_BASE_URL").ok()) {
        config.base_url = Some(url);
    }
    debug!(base_url = config.base_url(), store = ?config.store, "Config loaded");

    let api = ApiClient::with_timeout(config.base_url(), config.request_timeout())?;
    let store = config.open_store().context("Failed to open credential store")?;
    let session = SessionManager::new(Arc::new(api), store);

    let observer = session.clone();
    let _subscription = session.subscribe(move || {
        info!(state = observer.state().label(), "Session changed");
    });

    let ok = match command {
        Command::Login(username) => login(&session, &mut config, username).await?,
        Command::Logout => {
            session.logout();
            println!("Logged out");
            true
        }
        Command::Token => print_token(&session).await?,
        Command::Whoami => whoami(&session).await,
        Command::Status => status(&session).await?,
        Command::Help => true,
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

async fn login(session: &SessionManager, config: &mut Config, username: Option<String>) -> Result<bool> {
    let username = match username
        .or_else(|| std::env::var("TOKENWARD_USERNAME").ok())
        .or_else(|| config.last_username.clone())
    {
        Some(username) => username,
        None => prompt("Username: ")?,
    };
    let password = match std::env::var("TOKENWARD_PASSWORD") {
        Ok(password) => password,
        Err(_) => rpassword::prompt_password("Password: ").context("Failed to read password")?,
    };

    match session.try_login(&username, &password).await {
        Ok(()) => {
            config.last_username = Some(username.clone());
            if let Err(e) = config.save() {
                warn!(error = %e, "Failed to save config");
            }
            println!("Logged in as {}", username);
            Ok(true)
        }
        Err(SessionError::Unauthorized) => {
            eprintln!("Login failed: invalid username or password");
            Ok(false)
        }
        Err(e) => {
            eprintln!("Login failed: {}", e);
            Ok(false)
        }
    }
}

async fn print_token(session: &SessionManager) -> Result<bool> {
    match session.try_token().await? {
        Some(token) => {
            println!("{}", token.as_str());
            Ok(true)
        }
        None => {
            eprintln!("Not logged in");
            Ok(false)
        }
    }
}

async fn whoami(session: &SessionManager) -> bool {
    match session.user().await {
        Some(user) => {
            println!("{} ({}, id {})", user.display_name(), user.username, user.id);
            true
        }
        None => {
            eprintln!("Not logged in");
            false
        }
    }
}

async fn status(session: &SessionManager) -> Result<bool> {
    // Resolve first so the state reflects storage and any refresh.
    let resolved = session.try_token().await;

    match session.state() {
        SessionState::Present(token) => {
            let claims = token.claims()?;
            println!("Session:  logged in");
            println!("Subject:  {}", claims.sub.as_deref().unwrap_or("-"));
            if let Some(username) = claims.username.as_deref() {
                println!("Username: {}", username);
            }
            println!("Expires:  {}", format_expiry(claims.expires_at(), Utc::now()));
            Ok(true)
        }
        state => {
            println!("Session:  {}", state.label());
            if let Err(e) = resolved {
                println!("Error:    {}", e);
            }
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_args(&args(&[])).unwrap().1, Command::Help);
        assert_eq!(parse_args(&args(&["token"])).unwrap().1, Command::Token);
        assert_eq!(
            parse_args(&args(&["login", "ada"])).unwrap().1,
            Command::Login(Some("ada".to_string()))
        );
        assert_eq!(parse_args(&args(&["login"])).unwrap().1, Command::Login(None));
    }

    #[test]
    fn test_parse_base_url() {
        let (options, command) =
            parse_args(&args(&["--base-url", "http://auth.local", "status"])).unwrap();
        assert_eq!(options.base_url.as_deref(), Some("http://auth.local"));
        assert_eq!(command, Command::Status);
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_args(&args(&["--base-url"])).is_err());
        assert!(parse_args(&args(&["--verbose", "token"])).is_err());
        assert!(parse_args(&args(&["frobnicate"])).is_err());
        assert!(parse_args(&args(&["logout", "extra"])).is_err());
    }
}
