//! ChatBridge - chat backend with streaming AI replies
//!
#![doc = "ChatBridge - chat backend with streaming AI replies"]
#![doc = "Main entry point for the ChatBridge server and operator commands."]

use anyhow::Result;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use chatbridge::cli::{Cli, Commands, ModelCommand, TokenCommand};
use chatbridge::commands;
use chatbridge::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Logging format comes from the config file, so peek at it before tracing is up
    let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
    let json_logs = std::fs::read_to_string(config_path)
        .ok()
        .and_then(|contents| serde_yaml::from_str::<Config>(&contents).ok())
        .map(|config| config.logging.json)
        .unwrap_or(false);
    init_tracing(cli.verbose, json_logs);

    // Load configuration
    let config = Config::load(config_path, &cli)?;

    // Validate configuration
    config.validate()?;

    // Execute command
    match cli.command {
        Commands::Serve { .. } => {
            tracing::info!("Starting API server on {}", config.server.bind);
            commands::serve::run_serve(config).await?;
            Ok(())
        }
        Commands::Models { command } => match command {
            ModelCommand::List { json } => {
                commands::models::list_models(&config, json).await?;
                Ok(())
            }
        },
        Commands::Token { command } => match command {
            TokenCommand::Issue { user } => {
                commands::token::issue_token(&config, user)?;
                Ok(())
            }
        },
    }
}

/// Initialize tracing subscriber with environment filter
fn init_tracing(verbose: bool, json: bool) {
    let default_level = if verbose {
        "chatbridge=debug"
    } else {
        "chatbridge=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
