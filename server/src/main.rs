use clap::Parser;
use log::{info, warn};
use server::commands::CommandRegistry;
use server::config::Config;
use server::dispatch::{ChatState, Dispatcher};
use server::error::ChatError;
use server::moderation::ModerationPolicy;
use server::network::Server;
use server::police::Police;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the JSON config file
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Addresses to block at startup, one per line
    #[arg(short, long, default_value = "jail.txt")]
    jail: PathBuf,

    /// Overrides the host from the config file
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Overrides the port from the config file
    #[arg(short, long)]
    port: Option<u16>,
}

/// Loads config and jail, then runs the server until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let mut config = match Config::load(&args.config) {
        Ok(config) => {
            info!("Loaded config '{}'", args.config.display());
            config
        }
        Err(ChatError::Io { target, source }) => {
            warn!("Could not read {} ({}), using defaults", target, source);
            Config::default()
        }
        Err(e) => return Err(e.into()),
    };
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    let mut police = Police::default();
    police.load_jail(&args.jail)?;

    let state = ChatState::new(police, ModerationPolicy::new(&config));
    let dispatcher = Dispatcher::new(CommandRegistry::new(), state);
    let server = Server::new(&config, dispatcher).await?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
