//! Command-line interface definition for ChatBridge
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands for serving the API, inspecting models, and
//! issuing access tokens.

use clap::{Parser, Subcommand};

/// ChatBridge - chat backend that streams AI provider replies
#[derive(Parser, Debug, Clone)]
#[command(name = "chatbridge")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Override the database file location
    #[arg(long, env = "CHATBRIDGE_DB")]
    pub storage_path: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for ChatBridge
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the HTTP API
    Serve {
        /// Socket address to bind (overrides `server.bind`)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Inspect configured AI models
    Models {
        /// Model subcommand
        #[command(subcommand)]
        command: ModelCommand,
    },

    /// Manage access tokens
    Token {
        /// Token subcommand
        #[command(subcommand)]
        command: TokenCommand,
    },
}

/// Model subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ModelCommand {
    /// List enabled models
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Token subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum TokenCommand {
    /// Issue an access token for a user id
    Issue {
        /// User id written into the token subject
        #[arg(short, long)]
        user: i64,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_serve_with_bind() {
        let cli = Cli::try_parse_from(["chatbridge", "serve", "--bind", "0.0.0.0:9000"]).unwrap();
        match cli.command {
            Commands::Serve { bind } => assert_eq!(bind.as_deref(), Some("0.0.0.0:9000")),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_models_list_json() {
        let cli = Cli::try_parse_from(["chatbridge", "models", "list", "--json"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Models {
                command: ModelCommand::List { json: true }
            }
        ));
    }

    #[test]
    fn test_parse_token_issue() {
        let cli =
            Cli::try_parse_from(["chatbridge", "-v", "token", "issue", "--user", "42"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(
            cli.command,
            Commands::Token {
                command: TokenCommand::Issue { user: 42 }
            }
        ));
    }

    #[test]
    fn test_default_config_path() {
        let cli = Cli::try_parse_from(["chatbridge", "serve"]).unwrap();
        assert_eq!(cli.config.as_deref(), Some("config/config.yaml"));
    }
}
