//! Studiobook CLI - command-line client for the studio booking service
//!
//! This binary provides:
//! - Login, signup and email verification
//! - Profile, studio search, reservations and the community feed
//! - Transparent token refresh, with a notice when the session expires

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use studiobook_core::api::{self, SignupRequest};
use studiobook_core::{auth, ApiClient, SessionEvent};
use tokio::sync::broadcast::{self, error::TryRecvError};

#[derive(Parser)]
#[command(name = "studiobook")]
#[command(author = "Studiobook Team")]
#[command(version)]
#[command(about = "Book practice rooms and studios from the command line")]
#[command(long_about = "
Studiobook CLI talks to the studiobook service: search studios, manage
reservations and browse the community feed.

Quick start:
  1. Sign in:             studiobook login you@example.com
  2. Find a room:         studiobook studios --keyword drum
  3. See your bookings:   studiobook reservations

Sessions are renewed automatically. If renewal is impossible the local
session is cleared and you are asked to log in again.
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for scripting
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in with email and password
    #[command(alias = "signin")]
    Login {
        email: String,
        #[arg(long, env = "STUDIOBOOK_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Create an account
    Signup {
        email: String,
        #[arg(long)]
        nickname: String,
        #[arg(long, env = "STUDIOBOOK_PASSWORD", hide_env_values = true)]
        password: String,
        /// Identifier of an agreed term (repeatable)
        #[arg(long = "agree")]
        agreed_terms: Vec<u64>,
    },

    /// Send a verification code, or confirm one with --code
    VerifyEmail {
        email: String,
        #[arg(long)]
        code: Option<String>,
    },

    /// List the terms presented at signup
    Terms,

    /// Sign out and clear the local session
    #[command(alias = "signout")]
    Logout,

    /// Show session status
    Status,

    /// Fetch your profile
    Profile,

    /// Search studios
    Studios {
        #[arg(short, long)]
        keyword: Option<String>,
    },

    /// List your reservations
    Reservations,

    /// Browse the community feed
    Posts {
        #[arg(short, long, default_value = "0")]
        page: u32,
    },

    /// Like a community post
    Like { post_id: u64 },

    /// Show configuration paths and settings
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("studiobook={},studiobook_core={}", log_level, log_level).into()
            }),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Config = cli.command {
        return cmd_config(&cli);
    }

    let client = ApiClient::from_default_storage()?;
    let mut events = client.subscribe();

    let result = run(&cli, &client).await;

    // Forced logout may have happened during the command
    report_session_events(&cli, &mut events);

    result
}

async fn run(cli: &Cli, client: &ApiClient) -> Result<()> {
    match &cli.command {
        Commands::Login { email, password } => cmd_login(cli, client, email, password).await,
        Commands::Signup {
            email,
            nickname,
            password,
            agreed_terms,
        } => {
            let request = SignupRequest {
                email: email.clone(),
                password: password.clone(),
                nickname: nickname.clone(),
                agreed_terms: agreed_terms.clone(),
            };
            client.signup(&request).await?;
            print_message(cli, "signed_up", &format!("Account created for {}", email));
            Ok(())
        }
        Commands::VerifyEmail { email, code } => {
            match code {
                Some(code) => {
                    client.verify_email(email, code).await?;
                    print_message(cli, "verified", &format!("{} verified", email));
                }
                None => {
                    client.send_verification_email(email).await?;
                    print_message(cli, "code_sent", &format!("Verification code sent to {}", email));
                }
            }
            Ok(())
        }
        Commands::Terms => print_value(cli, &client.terms().await?),
        Commands::Logout => cmd_logout(cli, client).await,
        Commands::Status => cmd_status(cli, client),
        Commands::Profile => require_login(cli, client, client.profile()).await,
        Commands::Studios { keyword } => {
            require_login(cli, client, client.search_studios(keyword.as_deref())).await
        }
        Commands::Reservations => require_login(cli, client, client.reservations()).await,
        Commands::Posts { page } => require_login(cli, client, client.community_posts(*page)).await,
        Commands::Like { post_id } => require_login(cli, client, client.like_post(*post_id)).await,
        Commands::Config => cmd_config(cli),
    }
}

async fn require_login<F>(cli: &Cli, client: &ApiClient, call: F) -> Result<()>
where
    F: std::future::Future<Output = studiobook_core::SessionResult<Value>>,
{
    ensure_logged_in(cli, client)?;
    let value = call.await?;
    print_value(cli, &value)
}

fn ensure_logged_in(cli: &Cli, client: &ApiClient) -> Result<()> {
    if client.is_authenticated() {
        return Ok(());
    }
    if let OutputFormat::Json = cli.format {
        println!("{}", json!({ "status": "not_authenticated" }));
    }
    anyhow::bail!("Not logged in. Run 'studiobook login <email>' first.")
}

async fn cmd_login(cli: &Cli, client: &ApiClient, email: &str, password: &str) -> Result<()> {
    client.login(email, password).await?;

    // Warm the profile cache so `status` can show who is signed in
    let name = match client.profile().await {
        Ok(_) => client
            .cached_profile()
            .and_then(|p| p.display_name().map(str::to_string)),
        Err(e) => {
            tracing::warn!("Logged in but could not fetch profile: {}", e);
            None
        }
    };

    match cli.format {
        OutputFormat::Text => {
            println!("Logged in as {}", name.as_deref().unwrap_or(email));
        }
        OutputFormat::Json => {
            println!(
                "{}",
                json!({
                    "status": "logged_in",
                    "email": email,
                    "display_name": name,
                })
            );
        }
    }
    Ok(())
}

async fn cmd_logout(cli: &Cli, client: &ApiClient) -> Result<()> {
    if !client.is_authenticated() {
        print_message(cli, "not_authenticated", "Not logged in.");
        return Ok(());
    }
    client.logout().await?;
    print_message(cli, "logged_out", "Logged out.");
    Ok(())
}

fn cmd_status(cli: &Cli, client: &ApiClient) -> Result<()> {
    let authenticated = client.is_authenticated();
    let profile = client.cached_profile();

    match cli.format {
        OutputFormat::Text => {
            if authenticated {
                println!("Status:  Logged in");
                if let Some(profile) = &profile {
                    println!("User:    {}", profile.display_name().unwrap_or("-"));
                    println!("Cached:  {}", profile.cached_at.to_rfc3339());
                }
            } else {
                println!("Status:  Not logged in");
            }
            println!("API:     {}", client.base_url());
            println!("Storage: {}", auth::get_credential_storage_info());
        }
        OutputFormat::Json => {
            println!(
                "{}",
                json!({
                    "authenticated": authenticated,
                    "display_name": profile.as_ref().and_then(|p| p.display_name()),
                    "api_url": client.base_url(),
                    "storage_info": auth::get_credential_storage_info(),
                })
            );
        }
    }
    Ok(())
}

fn cmd_config(cli: &Cli) -> Result<()> {
    let config = api::load_api_config();
    let config_path = api::config::get_config_file_path_string();

    match cli.format {
        OutputFormat::Text => {
            println!("Configuration");
            println!("=============");
            println!();
            println!("Config file:      {}", config_path);
            println!("API endpoint:     {} (from {})", config.api_url, config.source);
            println!("Request timeout:  {}s", config.timeout.as_secs());
            println!("Credential store: {}", auth::get_credential_storage_info());
            println!();
            println!("Environment variables:");
            println!("  {} - Override API endpoint", api::config::ENV_API_URL);
            println!("  STUDIOBOOK_PASSWORD - Password for login/signup");
            println!();
            println!("Example config.toml:");
            println!();
            println!("{}", api::config::generate_example_config());
        }
        OutputFormat::Json => {
            println!(
                "{}",
                json!({
                    "config_file": config_path,
                    "api_url": config.api_url,
                    "api_source": config.source.to_string(),
                    "timeout_secs": config.timeout.as_secs(),
                    "credential_storage": auth::get_credential_storage_info(),
                })
            );
        }
    }
    Ok(())
}

fn report_session_events(cli: &Cli, events: &mut broadcast::Receiver<SessionEvent>) {
    loop {
        match events.try_recv() {
            Ok(SessionEvent::Unauthorized) => match cli.format {
                OutputFormat::Text => eprintln!("Session expired. Please log in again."),
                OutputFormat::Json => {
                    eprintln!("{}", json!({ "event": SessionEvent::Unauthorized.name() }))
                }
            },
            Ok(SessionEvent::SignedOut) => {}
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }
}

fn print_message(cli: &Cli, status: &str, message: &str) {
    match cli.format {
        OutputFormat::Text => println!("{}", message),
        OutputFormat::Json => println!("{}", json!({ "status": status })),
    }
}

fn print_value(cli: &Cli, value: &Value) -> Result<()> {
    match cli.format {
        OutputFormat::Text => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Json => println!("{}", value),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_signup_with_repeated_terms() {
        let cli = Cli::try_parse_from([
            "studiobook", "signup", "kim@example.com", "--nickname", "kim", "--password", "pw",
            "--agree", "1", "--agree", "3",
        ])
        .unwrap();
        match cli.command {
            Commands::Signup {
                nickname,
                agreed_terms,
                ..
            } => {
                assert_eq!(nickname, "kim");
                assert_eq!(agreed_terms, vec![1, 3]);
            }
            _ => panic!("expected signup"),
        }
    }

    #[test]
    fn authenticated_commands_fail_without_session() {
        use std::sync::Arc;
        use studiobook_core::auth::{MemoryCredentialStore, MemoryProfileCache};
        use studiobook_core::ApiConfig;

        let client = ApiClient::new(
            &ApiConfig::new("http://127.0.0.1:9"),
            Arc::new(MemoryCredentialStore::new()),
            Arc::new(MemoryProfileCache::new()),
        )
        .unwrap();
        let cli = Cli::try_parse_from(["studiobook", "reservations", "--format", "json"]).unwrap();

        let err = ensure_logged_in(&cli, &client).unwrap_err();
        assert!(err.to_string().starts_with("Not logged in"));
    }

    #[test]
    fn format_flag_is_global() {
        let cli = Cli::try_parse_from(["studiobook", "posts", "--page", "2", "--format", "json"])
            .unwrap();
        assert!(matches!(cli.format, OutputFormat::Json));
        assert!(matches!(cli.command, Commands::Posts { page: 2 }));
    }
}
