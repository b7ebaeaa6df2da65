use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use glooo::config::{self, FileConfig, GloooConfig, Profile, ServerConfig};
use glooo::{HttpApi, WsConnector, console};
use glooo_session::{AuthGuard, ChatApi, ConnectionManager, SessionController, StartOutcome};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "glooo")]
#[command(about = "Terminal client for Glooo chat")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Custom data directory (defaults to ~/.glooo)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Configuration preset (overrides `profile` in config.toml)
    #[arg(long, global = true, value_enum)]
    profile: Option<Profile>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List conversations and exit
    Chats(ChatsArgs),
}

#[derive(Parser)]
struct ChatsArgs {
    /// Output as JSON
    #[arg(long)]
    json: bool,
}

const NOT_SIGNED_IN: &str =
    "Not signed in. Set [session] token in config.toml or GLOOO_SESSION__TOKEN.";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = GloooConfig::new(cli.data_dir.clone())?;
    init_logging(&config, cli.debug)?;

    let fc: FileConfig = config::load_config(&config.data_dir, cli.profile.as_ref())
        .extract()
        .with_context(|| {
            format!(
                "Failed to load configuration from {}",
                config.config_toml_path().display()
            )
        })?;
    let server = ServerConfig::from_file(&fc.server);
    info!(base_url = %server.base_url, ws_url = %server.ws_url, "starting glooo");

    let api = HttpApi::new(server.base_url.clone(), fc.session.token.clone());

    match cli.command {
        Some(Commands::Chats(args)) => chats_command(&api, args.json).await,
        None => chat_command(api, &server, &fc).await,
    }
}

/// Log to `<data_dir>/logs/glooo.log`; stdout belongs to the console.
fn init_logging(config: &GloooConfig, debug: bool) -> Result<()> {
    let default_directive = if debug {
        "glooo=debug,glooo_session=debug,info"
    } else {
        "glooo=info,glooo_session=info,warn"
    };
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(config.log_path())
        .with_context(|| format!("Failed to open log file: {:?}", config.log_path()))?;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(log_file)),
        )
        .with(env_filter)
        .init();
    Ok(())
}

async fn chats_command(api: &HttpApi, json: bool) -> Result<()> {
    let status = api.check_session().await?;
    if !status.authenticated {
        anyhow::bail!(NOT_SIGNED_IN);
    }
    let conversations = api.conversations().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&conversations)?);
    } else if conversations.is_empty() {
        println!("No conversations.");
    } else {
        println!("{:<4} {:<20} {:<16} {}", "#", "NAME", "USERNAME", "LAST MESSAGE");
        println!("{}", "-".repeat(72));
        for (i, c) in conversations.iter().enumerate() {
            println!(
                "{:<4} {:<20} {:<16} {}",
                i + 1,
                c.counterpart.name,
                c.counterpart.username,
                c.preview()
            );
        }
        println!("\n{} conversation(s)", conversations.len());
    }
    Ok(())
}

async fn chat_command(api: HttpApi, server: &ServerConfig, fc: &FileConfig) -> Result<()> {
    let connector = Arc::new(WsConnector::new(
        server.ws_url.clone(),
        fc.session.token.clone(),
    ));
    let (handle, events) = ConnectionManager::spawn(connector, config::retry_policy(&fc.connection));

    let guard = api.clone();
    match SessionController::start(&guard, api, handle, events).await? {
        StartOutcome::Redirect => anyhow::bail!(NOT_SIGNED_IN),
        StartOutcome::Ready {
            mut session,
            directory_error,
        } => {
            if let Some(e) = directory_error {
                eprintln!("Could not load conversations: {e}");
            }
            console::run(&mut *session).await
        }
    }
}
