//! ChatBridge - chat backend library
//!
//! This library persists chat sessions and proxies conversational turns to
//! pluggable AI providers, streaming answers back to clients over SSE.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `providers`: AI provider abstraction, Zhipu and Coze clients, and the provider factory
//! - `registry`: Model lookup and default selection
//! - `usage`: Per-invocation token and latency accounting
//! - `chat`: The turn orchestrator and its event vocabulary
//! - `storage`: SQLite persistence for sessions, messages, models, and usage
//! - `auth`: Access-token issue and verification
//! - `server`: axum routes and the SSE transport
//! - `config`, `cli`, `commands`, `error`: configuration, command line, and error types
//!
//! # Example
//!
//! ```no_run
//! use chatbridge::cli::Cli;
//! use chatbridge::Config;
//! use clap::Parser;
//!
//! fn main() -> anyhow::Result<()> {
//!     let cli = Cli::parse_from(["chatbridge", "serve"]);
//!     let config = Config::load("config/config.yaml", &cli)?;
//!     config.validate()?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod chat;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod providers;
pub mod registry;
pub mod server;
pub mod storage;
pub mod usage;

// Re-export commonly used types
pub use chat::{ChatService, TurnEvent, TurnOutcome};
pub use config::Config;
pub use error::{ChatError, Result};
pub use registry::ModelRegistry;
