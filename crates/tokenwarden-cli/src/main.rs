//! tokenwarden - command-line front end for a tokenwarden session.
//!
//! Logs in, shows token lifetimes, makes authenticated calls and checks
//! route access against the configured route table. Redirects raised by
//! the session (expired or rejected credentials) are printed to stderr.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokenwarden_core::utils::{format_expiry, format_optional, format_remaining, format_roles};
use tokenwarden_core::{
    landing_route, ApiError, AuthClient, ChannelNavigator, Config, GuardDecision, SessionContext,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// ============================================================================
// Constants
// ============================================================================

/// Log file name prefix when logging to a file
const LOG_FILE_PREFIX: &str = "tokenwarden.log";

const USAGE: &str = "\
Usage: tokenwarden [--log-file] <command>

Commands:
  login [username]   Log in and store the session
  logout             Clear the stored session
  status             Show access and renewal token lifetimes
  whoami             Show the current user and roles
  get <path>         Authenticated GET, prints the JSON response
  guard <path>       Show whether the route would render or redirect";

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr, or to a daily log file in the cache directory when
/// `log_dir` is set. The returned guard must live until exit.
fn init_tracing(log_dir: Option<std::path::PathBuf>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .with(filter)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(io::stderr))
                .with(filter)
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let log_to_file = match args.iter().position(|a| a == "--log-file") {
        Some(index) => {
            args.remove(index);
            true
        }
        None => false,
    };

    let mut config = Config::load()?;
    let log_dir = if log_to_file {
        Some(config.cache_dir()?)
    } else {
        None
    };
    let _log_guard = init_tracing(log_dir);
    info!(base_url = %config.base_url, store = ?config.store, "tokenwarden starting");

    let Some(command) = args.first().cloned() else {
        eprintln!("{}", USAGE);
        return Ok(());
    };

    let session = Arc::new(SessionContext::new(config.open_store()?));
    let (navigator, mut redirects) = ChannelNavigator::new();
    let client = AuthClient::new(config.clone(), session, Arc::new(navigator))?;

    let result = match command.as_str() {
        "login" => login(&client, &mut config, args.get(1).cloned()).await,
        "logout" => logout(&client),
        "status" => {
            status(&client);
            Ok(())
        }
        "whoami" => {
            whoami(&client);
            Ok(())
        }
        "get" => match args.get(1) {
            Some(path) => get(&client, path).await,
            None => Err(anyhow::anyhow!("get requires a path\n\n{}", USAGE)),
        },
        "guard" => match args.get(1) {
            Some(path) => guard(&client, path).await,
            None => Err(anyhow::anyhow!("guard requires a path\n\n{}", USAGE)),
        },
        "help" | "--help" | "-h" => {
            eprintln!("{}", USAGE);
            Ok(())
        }
        other => Err(anyhow::anyhow!("Unknown command: {}\n\n{}", other, USAGE)),
    };

    report_redirects(&mut redirects);
    if let Err(e) = &result {
        if needs_login(e) {
            eprintln!("Run `tokenwarden login` to sign in again.");
        }
    }
    result
}

fn needs_login(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<ApiError>()
        .is_some_and(ApiError::requires_login)
}

fn prompt_username(default: Option<&str>) -> Result<String> {
    match default {
        Some(name) => print!("Username [{}]: ", name),
        None => print!("Username: "),
    }
    io::stdout().flush()?;

    let mut username = String::new();
    io::stdin().read_line(&mut username)?;
    let username = username.trim();
    if username.is_empty() {
        default
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("Username required"))
    } else {
        Ok(username.to_string())
    }
}

async fn login(client: &AuthClient, config: &mut Config, username: Option<String>) -> Result<()> {
    let username = match username {
        Some(username) => username,
        None => prompt_username(config.last_username.as_deref())?,
    };
    let password = rpassword::prompt_password("Password: ")?;
    if password.is_empty() {
        return Err(anyhow::anyhow!("Username and password required"));
    }

    let record = client
        .login(&username, &password)
        .await
        .context("Login failed! Please check credentials or server")?;

    config.last_username = Some(username);
    if let Err(e) = config.save() {
        tracing::warn!(error = %e, "Failed to save config");
    }

    println!("Logged in as {} ({})", record.username, format_roles(&record.roles));
    println!("Landing route: {}", landing_route(&record.roles));
    Ok(())
}

fn logout(client: &AuthClient) -> Result<()> {
    client.logout()?;
    println!("You have been logged out.");
    Ok(())
}

fn status(client: &AuthClient) {
    let info = client.session().token_info();
    if info.is_empty() {
        println!("No tokens found or tokens are invalid.");
        return;
    }

    println!(
        "Access token expires at:  {}",
        format_expiry(info.access_expires_at, "not found or invalid")
    );
    if info.access_expires_at.is_some() {
        println!("Remaining:                {}", format_remaining(info.access_remaining));
    }
    println!(
        "Renewal token expires at: {}",
        format_expiry(info.refresh_expires_at, "not found or invalid")
    );
    if info.refresh_expires_at.is_some() {
        println!("Remaining:                {}", format_remaining(info.refresh_remaining));
    }
}

fn whoami(client: &AuthClient) {
    let state = client.session().state();
    println!("User:  {}", format_optional(&state.username, "(not logged in)"));
    println!("Roles: {}", format_roles(&state.roles));
}

async fn get(client: &AuthClient, path: &str) -> Result<()> {
    let body: serde_json::Value = client.get_json(path).await?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

async fn guard(client: &AuthClient, path: &str) -> Result<()> {
    match client.route_guard().check_path(path).await {
        GuardDecision::Render => println!("{}: render", path),
        GuardDecision::Redirect(target) => println!("{}: redirect to {}", path, target),
    }
    Ok(())
}

fn report_redirects(redirects: &mut UnboundedReceiver<String>) {
    while let Ok(route) = redirects.try_recv() {
        eprintln!("Session ended, redirected to {}", route);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_needs_login_for_session_errors_only() {
        assert!(needs_login(&anyhow::Error::new(ApiError::SessionExpired)));
        assert!(needs_login(&anyhow::Error::new(ApiError::Unauthorized)));
        assert!(!needs_login(&anyhow::Error::new(ApiError::RateLimited)));
        assert!(!needs_login(&anyhow::anyhow!("Unknown command")));
    }
}
