//! rTalk command-line client.

mod commands;
mod config;
mod handlers;
mod output;
mod session;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::message;
use rust_i18n::t;

rust_i18n::i18n!("src/locales", fallback = "en");

/// Live two-party conversations from the terminal
#[derive(Parser)]
#[command(name = "rtalk")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "plain")]
    format: output::OutputFormat,

    /// Show verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Language for output (en, fr)
    #[arg(short, long, global = true, default_value = "en", env = "RTALK_LANG")]
    lang: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the signed-in user
    Identity {
        #[command(subcommand)]
        action: IdentityAction,
    },

    /// Message operations
    #[command(alias = "m")]
    Message {
        #[command(subcommand)]
        action: message::MessageAction,
    },

    /// Show current configuration
    Config,
}

#[derive(Subcommand)]
enum IdentityAction {
    /// Sign in as a user ID
    Set {
        /// User ID
        uid: String,
    },
    /// Sign out
    Clear,
    /// Show the signed-in user
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    rust_i18n::set_locale(&cli.lang);

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let command = cli
        .command
        .ok_or_else(|| anyhow::anyhow!("{}", t!("no_command")))?;

    match command {
        Commands::Identity { action } => handle_identity(action),
        Commands::Message { action } => message::handle(action, cli.format, cli.verbose).await,
        Commands::Config => {
            let cfg = config::load_config()?;
            println!(
                "{}",
                t!("config_file", path = config::config_path()?.display())
            );
            match &cfg.identity {
                Some(identity) => println!("{}", t!("identity_set", uid = &identity.uid)),
                None => println!("{}", t!("identity_none")),
            }
            match &cfg.backend {
                config::BackendConfig::Local { data_file } => {
                    let path = match data_file {
                        Some(path) => path.clone(),
                        None => session::default_data_path()?,
                    };
                    println!("{}", t!("backend_local"));
                    println!("{}", t!("data_file", path = path.display()));
                }
                config::BackendConfig::Rest { url, .. } => {
                    println!("{}", t!("backend_rest", url = url));
                }
            }
            Ok(())
        }
    }
}

fn handle_identity(action: IdentityAction) -> Result<()> {
    match action {
        IdentityAction::Set { uid } => {
            let uid = uid.trim().to_owned();
            if uid.is_empty() {
                anyhow::bail!("{}", t!("identity_required"));
            }
            let mut cfg = config::load_config()?;
            cfg.identity = Some(config::IdentityConfig { uid: uid.clone() });
            config::save_config(&cfg)?;
            println!("{}", t!("identity_set", uid = &uid));
            Ok(())
        }
        IdentityAction::Clear => {
            let mut cfg = config::load_config()?;
            cfg.identity = None;
            config::save_config(&cfg)?;
            println!("{}", t!("identity_cleared"));
            Ok(())
        }
        IdentityAction::Show => {
            let cfg = config::load_config()?;
            if let Some(identity) = &cfg.identity {
                println!("{}", t!("identity_set", uid = &identity.uid));
            } else {
                println!("{}", t!("identity_none"));
            }
            Ok(())
        }
    }
}
