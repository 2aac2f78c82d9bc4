mod ui;

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

use lina_envoy::client::ApiClient;
use lina_envoy::config::Config;
use lina_envoy::logging;
use lina_envoy::offline_queue::OfflineQueue;
use lina_envoy::session::SessionHandle;

#[derive(Parser)]
#[command(name = "envoy", about = "Terminal client for HeyLina", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Create an account
    Signup {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: Option<String>,
    },
    /// Sign in to an existing account
    Signin {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: Option<String>,
    },
    /// Forget the stored session
    Signout,
    /// Start interactive chat (default)
    Chat,
    /// Send a single message
    Send {
        #[arg(required = true)]
        message: Vec<String>,
    },
    /// Show recent messages
    History {
        #[arg(long, default_value_t = 20)]
        limit: u32,
        #[arg(long, default_value_t = 0)]
        offset: u32,
    },
    /// List messages waiting to be sent
    Queue,
    /// Send queued messages now
    Flush,
    /// Show or change configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Show,
    SetServer { url: String },
}

fn read_password(password: Option<String>) -> Result<String> {
    match password {
        Some(p) => Ok(p),
        None => Ok(rpassword::prompt_password("Password: ")?),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_logging("warn");
    let cli = Cli::parse();

    let mut config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            return Err(e);
        }
    };

    let session = SessionHandle::load(config.session_path())?;
    let client = ApiClient::new(config.server_url.clone(), session);
    let queue = Arc::new(OfflineQueue::open(config.queue_path())?);

    match cli.command.unwrap_or(Command::Chat) {
        Command::Signup { email, password } => {
            let password = read_password(password)?;
            match client.sign_up(&email, &password).await {
                Ok(s) => println!("Welcome to HeyLina, {}!", s.email),
                Err(e) => eprintln!("⚠ {}", e.friendly_message()),
            }
        }
        Command::Signin { email, password } => {
            let password = read_password(password)?;
            match client.sign_in(&email, &password).await {
                Ok(s) => println!("Signed in as {}", s.email),
                Err(e) => eprintln!("⚠ {}", e.friendly_message()),
            }
        }
        Command::Signout => {
            client.sign_out().await?;
            println!("Signed out.");
        }
        Command::Chat => {
            if client.session().get().await.is_none() {
                println!("Please sign in first: envoy signin --email you@example.com");
                return Ok(());
            }
            ui::interactive_chat(&config, client, queue).await?;
        }
        Command::Send { message } => {
            ui::single_message(&config, client, queue, message.join(" ")).await?;
        }
        Command::History { limit, offset } => {
            ui::show_history(&client, limit, offset).await?;
        }
        Command::Queue => ui::show_queue(&queue),
        Command::Flush => ui::flush_queue(&config, client, queue).await?,
        Command::Config { action } => match action.unwrap_or(ConfigAction::Show) {
            ConfigAction::Show => {
                println!("Current config ({}):", config.dir().display());
                println!("  Server URL: {}", config.server_url);
                println!("  Max retries: {}", config.max_retries);
                println!("  Backoff: {}ms base, {}ms cap", config.base_delay_ms, config.max_delay_ms);
                println!("  Attempt timeout: {}s", config.attempt_timeout_secs);
                match client.session().get().await {
                    Some(s) => println!("  Signed in as: {}", s.email),
                    None => println!("  Signed in as: (nobody)"),
                }
            }
            ConfigAction::SetServer { url } => {
                config.set_server_url(&url)?;
                println!("Server URL updated to: {}", config.server_url);
            }
        },
    }

    Ok(())
}
