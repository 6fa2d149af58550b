//! ddpsync CLI
//!
//! Command-line client for DDP publish/subscribe servers.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ddpsync_core::Config;

mod commands;
mod output;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "ddpsync")]
#[command(about = "ddpsync - DDP publish/subscribe client")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Server address (overrides configuration)
    #[arg(long, global = true)]
    server: Option<String>,

    /// Path to the configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show connection and login status
    Status,
    /// Log in and store the resume token
    Login {
        /// Username or email address
        user: String,
        /// Password; prompted for on stdin if not given (the prompt echoes input)
        #[arg(short, long)]
        password: Option<String>,
    },
    /// Forget the stored login
    Logout,
    /// Call a server method
    Call {
        /// Method name
        method: String,
        /// Parameters as JSON (an array is spread into positional parameters)
        params: Option<String>,
    },
    /// Subscribe to a publication and print changes
    Watch {
        /// Publication name
        name: String,
        /// Parameters as JSON (an array is spread into positional parameters)
        params: Option<String>,
    },
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (server_url, data_dir, resume_on_connect)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    // Config commands work on the file, not on a live session
    if let Commands::Config { command } = &cli.command {
        return handle_config_command(command.clone(), cli.config.as_ref(), &output);
    }

    let mut config = Config::load_with_cli_override(cli.config.as_ref())
        .context("Failed to load configuration")?;
    if let Some(server) = cli.server {
        config.server_url = server;
    }

    match cli.command {
        Commands::Status => commands::status::show(&config, &output).await,
        Commands::Login { user, password } => {
            commands::login::login(&config, user, password, &output).await
        }
        Commands::Logout => commands::logout::logout(&config, &output),
        Commands::Call { method, params } => {
            commands::call::call(&config, method, params, &output).await
        }
        Commands::Watch { name, params } => {
            commands::watch::watch(&config, name, params, &output).await
        }
        Commands::Config { .. } => unreachable!(), // Handled above
    }
}

fn handle_config_command(
    command: Option<ConfigCommands>,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    match command {
        Some(ConfigCommands::Show) | None => commands::config::show(config_path, output),
        Some(ConfigCommands::Set { key, value }) => {
            commands::config::set(key, value, config_path, output)
        }
    }
}

/// Log to stderr; RUST_LOG takes precedence over `--verbose`
fn init_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "warn" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "ddpsync_core={},ddpsync_cli={}",
            log_level, log_level
        ))
    });

    // Ignore error if already initialized
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
