//! OpsLoop CLI, the main entry point.
//!
//! Commands:
//! - `ask`     Run one query through a reasoning loop and print the answer
//! - `serve`   Start the HTTP gateway
//! - `tools`   List the tools the model can call
//! - `config`  Show, initialize or validate configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use opsloop_config::LoggingConfig;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(
    name = "opsloop",
    about = "OpsLoop: supervised reasoning loops for operations questions",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ~/.opsloop/config.toml)
    #[arg(short, long, global = true, env = "OPSLOOP_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask one question and wait for the answer
    Ask {
        /// The question, e.g. "is production healthy?"
        query: String,

        /// Maximum think phases for this request
        #[arg(long)]
        max_steps: Option<u32>,

        /// Deadline in seconds for this request
        #[arg(long)]
        deadline_secs: Option<u64>,

        /// Use the built-in scripted operator instead of the model endpoint
        #[arg(long)]
        offline: bool,

        /// Print the full outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Start the HTTP gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,

        /// Override the bind address
        #[arg(long)]
        host: Option<String>,

        /// Use the built-in scripted operator instead of the model endpoint
        #[arg(long)]
        offline: bool,
    },

    /// List the tools available to the model
    Tools,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration (API key redacted)
    Show,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Check the config file for errors
    Validate,
    /// Print the config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(commands::default_config_path);

    // `config init` and `config path` must work without a loadable config.
    if let Commands::Config { action } = &cli.command {
        match action {
            ConfigAction::Init { force } => return commands::config_cmd::init(&config_path, *force),
            ConfigAction::Path => return commands::config_cmd::path(&config_path),
            ConfigAction::Show | ConfigAction::Validate => {}
        }
    }

    let config = commands::load_config(&config_path)?;
    init_tracing(&config.logging, cli.verbose);

    match cli.command {
        Commands::Ask {
            query,
            max_steps,
            deadline_secs,
            offline,
            json,
        } => {
            let request = commands::ask::AskRequest {
                query,
                max_steps,
                deadline_secs,
                offline,
                json,
            };
            commands::ask::run(config, request).await?
        }
        Commands::Serve {
            port,
            host,
            offline,
        } => commands::serve::run(config, port, host, offline).await?,
        Commands::Tools => commands::tools::run(&config)?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show(&config)?,
            ConfigAction::Validate => commands::config_cmd::validate(&config, &config_path),
            ConfigAction::Init { .. } | ConfigAction::Path => {}
        },
    }

    Ok(())
}

/// `RUST_LOG` wins; otherwise `--verbose` means debug and the configured
/// level applies.
fn init_tracing(logging: &LoggingConfig, verbose: bool) {
    let fallback = if verbose { "debug" } else { logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::try_new(fallback).unwrap_or_else(|_| EnvFilter::new("info")));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}
