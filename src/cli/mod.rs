pub mod karma;

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use karma::{process_karma_command, KarmaCommand};
use tracing::{info, level_filters::LevelFilter};

use crate::{
    daemon::{
        args::{ConnectionArgs, DaemonArgs},
        start_daemon, CREDENTIALS_FILE,
    },
    sync::credentials::{CredentialStore, FileCredentialStore, TOKEN_KEY},
    utils::logging::{enable_logging, CLI_PREFIX, DAEMON_PREFIX},
};

#[derive(Parser, Debug)]
#[command(name = "Habitforge", version, long_about = None)]
#[command(about = "Background engine that tracks browsing habits and syncs them", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    commands: Commands,
    #[arg(long, help = "Enable logging")]
    log: bool,
}

#[derive(Subcommand, Debug)]
#[command(version, about, long_about = None)]
enum Commands {
    #[command(
        about = "Run the engine over stdio. The browser starts this as its native messaging host"
    )]
    Serve {
        #[command(flatten)]
        daemon: DaemonArgs,
    },
    #[command(about = "Display the karma summary computed by the service")]
    Karma {
        #[command(flatten)]
        command: KarmaCommand,
    },
    #[command(about = "Store the token used to authenticate uploads")]
    Login {
        token: String,
        #[command(flatten)]
        connection: ConnectionArgs,
    },
    #[command(about = "Forget the stored token. Uploads are skipped until the next login")]
    Logout {
        #[command(flatten)]
        connection: ConnectionArgs,
    },
}

pub async fn run_cli(args: Args) -> Result<()> {
    match args.commands {
        Commands::Serve { daemon } => {
            let config = daemon.config()?;
            enable_logging(DAEMON_PREFIX, &config.dir, daemon.log, daemon.log_console)?;
            start_daemon(config).await
        }
        Commands::Karma { command } => {
            enable_cli_logging(args.log, command.connection())?;
            process_karma_command(command).await
        }
        Commands::Login { token, connection } => {
            let dir = enable_cli_logging(args.log, &connection)?;
            store_token(&dir, &token).await?;
            println!("Token saved");
            Ok(())
        }
        Commands::Logout { connection } => {
            let dir = enable_cli_logging(args.log, &connection)?;
            clear_token(&dir).await?;
            println!("Token removed");
            Ok(())
        }
    }
}

fn enable_cli_logging(log: bool, connection: &ConnectionArgs) -> Result<PathBuf> {
    let dir = connection.app_dir()?;
    let logging_level = if log { Some(LevelFilter::TRACE) } else { None };
    enable_logging(CLI_PREFIX, &dir, logging_level, log)?;
    Ok(dir)
}

async fn store_token(dir: &Path, token: &str) -> Result<()> {
    let token = token.trim();
    if token.is_empty() {
        bail!("Token can't be empty");
    }
    FileCredentialStore::new(dir.join(CREDENTIALS_FILE))
        .set(TOKEN_KEY, token)
        .await?;
    info!("Stored a new token");
    Ok(())
}

async fn clear_token(dir: &Path) -> Result<()> {
    FileCredentialStore::new(dir.join(CREDENTIALS_FILE))
        .remove(TOKEN_KEY)
        .await?;
    info!("Removed the stored token");
    Ok(())
}
