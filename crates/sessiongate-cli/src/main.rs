//! sessiongate - command-line front end for the session gate.
//!
//! Logs in against the auth backend, reports whether the stored session
//! would be let through a protected view, and calls one protected endpoint.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{bail, Result};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sessiongate_core::auth::LoginError;
use sessiongate_core::{ApiClient, Config, Guarded, Session, SessionGate, SessionState};

const USAGE: &str = "Usage: sessiongate <command>

Commands:
  login [--remember] [USERNAME]   Log in and store the issued tokens
  logout                          Remove stored tokens
  status                          Check whether the stored session is valid
  whoami                          Show the logged-in user (protected call)";

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

enum Command {
    Login { username: Option<String>, remember: bool },
    Logout,
    Status,
    Whoami,
}

fn parse_args(args: &[String]) -> Result<Command> {
    let Some((command, rest)) = args.split_first() else {
        bail!("{}", USAGE);
    };
    match command.as_str() {
        "login" => {
            let mut username = None;
            let mut remember = false;
            for arg in rest {
                match arg.as_str() {
                    "--remember" => remember = true,
                    flag if flag.starts_with("--") => bail!("Unknown flag {}\n\n{}", flag, USAGE),
                    name if username.is_none() => username = Some(name.to_string()),
                    extra => bail!("Unexpected argument {}\n\n{}", extra, USAGE),
                }
            }
            Ok(Command::Login { username, remember })
        }
        "logout" => Ok(Command::Logout),
        "status" => Ok(Command::Status),
        "whoami" => Ok(Command::Whoami),
        "-h" | "--help" | "help" => {
            println!("{}", USAGE);
            std::process::exit(0);
        }
        other => bail!("Unknown command {}\n\n{}", other, USAGE),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = parse_args(&args)?;

    let mut config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "Failed to load config, using defaults");
            Config::default()
        }
    };
    info!(api = %config.api_base_url, storage = ?config.storage, "Config loaded");

    let store = config.open_store()?;
    let api = ApiClient::from_config(&config, Arc::clone(&store))?;
    let session = Session::new(Arc::clone(&store));
    let gate = SessionGate::from_config(&config, Arc::clone(&store), Arc::new(api.clone()));

    match command {
        Command::Login { username, remember } => {
            let username = match username
                .or_else(|| std::env::var("SESSIONGATE_USERNAME").ok())
                .or_else(|| config.last_username.clone())
            {
                Some(name) => name,
                None => prompt("Username or email: ")?,
            };
            let password = match std::env::var("SESSIONGATE_PASSWORD") {
                Ok(p) if !p.is_empty() => p,
                _ => rpassword::prompt_password("Password: ")?,
            };

            match session.login(&api, &username, &password, remember).await {
                Ok(()) => {
                    config.last_username = Some(username.clone());
                    if let Err(e) = config.save() {
                        warn!(error = %e, "Failed to save config");
                    }
                    println!("Logged in as {}", username);
                }
                Err(LoginError::Rejected(message)) => bail!("{}", message),
                Err(e) => return Err(e.into()),
            }
        }
        Command::Logout => {
            session.logout()?;
            println!("Logged out");
        }
        Command::Status => match gate.check().await {
            SessionState::Authorized => {
                let who = session.username()?.unwrap_or_else(|| "unknown user".to_string());
                match session.credential()? {
                    Some(Ok(cred)) => {
                        println!("Authorized as {} ({}m until expiry)", who, cred.minutes_until_expiry())
                    }
                    _ => println!("Authorized as {}", who),
                }
            }
            SessionState::Unauthorized(reason) => {
                println!("Unauthorized: {} -> redirect to {}", reason, gate.login_path());
            }
            SessionState::Unknown => println!("Session state unknown"),
        },
        Command::Whoami => match gate.guard(|| api.current_user()).await {
            Guarded::Render(fetch) => {
                let profile = fetch.await?;
                match profile.email {
                    Some(email) => println!("{} <{}> (id {})", profile.username, email, profile.id),
                    None => println!("{} (id {})", profile.username, profile.id),
                }
            }
            Guarded::Redirect { location, reason } => {
                info!(%reason, expired = reason.is_expired_session(), "Protected call denied");
                println!("Not logged in -> redirect to {}", location);
            }
        },
    }

    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    let value = line.trim().to_string();
    if value.is_empty() {
        bail!("No username given");
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_login_flags() {
        match parse_args(&args(&["login", "--remember", "alice"])).unwrap() {
            Command::Login { username, remember } => {
                assert_eq!(username.as_deref(), Some("alice"));
                assert!(remember);
            }
            _ => panic!("expected login"),
        }
        match parse_args(&args(&["login"])).unwrap() {
            Command::Login { username, remember } => {
                assert_eq!(username, None);
                assert!(!remember);
            }
            _ => panic!("expected login"),
        }
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(parse_args(&[]).is_err());
        assert!(parse_args(&args(&["frobnicate"])).is_err());
        assert!(parse_args(&args(&["login", "--forever"])).is_err());
        assert!(parse_args(&args(&["login", "a", "b"])).is_err());
        assert!(matches!(parse_args(&args(&["status"])).unwrap(), Command::Status));
    }
}
