use std::{fmt::Write, time::Duration};

use anyhow::{anyhow, Result};
use clap::Parser;

use crate::{
    daemon::{args::ConnectionArgs, create_sync_client},
    sync::karma::KarmaSummary,
};

#[derive(Debug, Parser)]
pub struct KarmaCommand {
    #[command(flatten)]
    connection: ConnectionArgs,
}

impl KarmaCommand {
    pub fn connection(&self) -> &ConnectionArgs {
        &self.connection
    }
}

pub async fn process_karma_command(command: KarmaCommand) -> Result<()> {
    let connection = command.connection;
    let sync = create_sync_client(
        &connection.app_dir()?,
        &connection.endpoint,
        Duration::from_secs(connection.request_timeout_s.max(1)),
    )?;

    let summary = sync.fetch_remote_score_summary().await.ok_or_else(|| {
        anyhow!("No karma data available. Log in first or check the connection to the service")
    })?;
    print!("{}", render_karma(&summary));
    Ok(())
}

fn render_karma(summary: &KarmaSummary) -> String {
    let score = summary.score_value();
    let level = summary.score_level();
    let mut output = String::new();
    // writing into a String can't fail
    let _ = writeln!(output, "Score:  {}", summary.score);
    let _ = writeln!(output, "Level:  {}", summary.level);
    let _ = writeln!(output, "Streak: {} days", summary.streak);
    match level.next() {
        Some(next) => {
            let _ = writeln!(
                output,
                "{} to {next} ({} points left)",
                level.progress(score),
                (next.threshold() as f64 - score).ceil()
            );
        }
        None => {
            let _ = writeln!(output, "Top level reached");
        }
    }
    output
}
