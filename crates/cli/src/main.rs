//! Weaver CLI: a small host around the agent execution core.
//!
//! Commands:
//! - `run`      : Send a message and stream the agent's events
//! - `confirm`  : Approve or reject a paused tool call
//! - `cancel`   : Fail a session and drop its pending action
//! - `plan`     : Show or confirm a session's plan
//! - `sessions` : List, inspect or delete stored sessions
//! - `personas` : Show the persona catalog
//! - `skills`   : Show the skill catalog
//! - `config`   : Show or initialize the configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "weaver",
    about = "Weaver — phase-aware agent for building workspace apps",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Use this config file instead of ~/.weaver/config.toml
    #[arg(long, global = true, env = "WEAVER_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a message to the agent and stream its events
    Run {
        /// The user message
        #[arg(short, long)]
        message: String,

        /// Session to continue (a new id is generated when omitted)
        #[arg(short, long)]
        session: Option<String>,

        #[arg(short, long, default_value = "default")]
        workspace: String,

        #[arg(short, long, default_value = "local")]
        user: String,

        /// Persona for a new session
        #[arg(short, long)]
        persona: Option<String>,

        /// Approve every confirmation request without prompting
        #[arg(long)]
        auto_approve: bool,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Approve or reject a pending action
    Confirm {
        session: String,
        action: String,

        /// Reject instead of approving
        #[arg(long)]
        reject: bool,
    },

    /// Cancel a session
    Cancel { session: String },

    /// Review or approve a session's plan
    Plan {
        #[command(subcommand)]
        command: PlanCommands,
    },

    /// Manage stored sessions
    Sessions {
        #[command(subcommand)]
        command: SessionCommands,
    },

    /// List personas
    Personas {
        /// Only show personas in this category
        #[arg(short, long)]
        category: Option<String>,
    },

    /// List skills
    Skills,

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum SessionCommands {
    /// List sessions of a workspace, most recent first
    List {
        #[arg(short, long, default_value = "default")]
        workspace: String,
    },
    /// Show one session
    Show {
        id: String,
        /// Print the full snapshot as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a session
    Delete { id: String },
}

#[derive(Subcommand)]
enum PlanCommands {
    /// Print the plan and its step progress
    Show { session: String },
    /// Confirm a draft plan so the next run executes it
    Confirm { session: String },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Write a default config file
    Init,
    /// Print the config file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout carries only the event stream
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if cli.log_json {
        builder.json().init();
    } else {
        builder.init();
    }

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Run {
            message,
            session,
            workspace,
            user,
            persona,
            auto_approve,
            json,
        } => {
            let opts = commands::run::RunOptions {
                message,
                session,
                workspace,
                user,
                persona,
                auto_approve,
                json,
            };
            commands::run::run(config_path, opts).await?
        }
        Commands::Confirm {
            session,
            action,
            reject,
        } => commands::confirm::confirm(config_path, &session, &action, !reject).await?,
        Commands::Cancel { session } => commands::confirm::cancel(config_path, &session).await?,
        Commands::Plan { command } => match command {
            PlanCommands::Show { session } => commands::plan::show(config_path, &session).await?,
            PlanCommands::Confirm { session } => {
                commands::plan::confirm(config_path, &session).await?
            }
        },
        Commands::Sessions { command } => match command {
            SessionCommands::List { workspace } => {
                commands::sessions::list(config_path, &workspace).await?
            }
            SessionCommands::Show { id, json } => {
                commands::sessions::show(config_path, &id, json).await?
            }
            SessionCommands::Delete { id } => commands::sessions::delete(config_path, &id).await?,
        },
        Commands::Personas { category } => {
            commands::catalog::personas(category.as_deref()).await?
        }
        Commands::Skills => commands::catalog::skills().await?,
        Commands::Config { command } => match command {
            ConfigCommands::Show => commands::config_cmd::show(config_path).await?,
            ConfigCommands::Init => commands::config_cmd::init(config_path).await?,
            ConfigCommands::Path => commands::config_cmd::path(config_path).await?,
        },
    }

    Ok(())
}
