use std::{path::PathBuf, time::Duration};

use anyhow::Result;
use clap::Parser;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::utils::dir::{create_application_default_path, ensure_dir};

use super::{
    DaemonConfig, DEFAULT_ENDPOINT, DEFAULT_IDLE_DETECTION_INTERVAL, DEFAULT_REQUEST_TIMEOUT,
    DEFAULT_SYNC_INTERVAL,
};

/// Options shared by every command that talks to the remote service.
#[derive(Parser, Debug, Clone)]
pub struct ConnectionArgs {
    #[arg(
        long,
        help = "Application directory. By default tries to save into $XDG_STATE_HOME or $HOME/.local/state"
    )]
    pub dir: Option<PathBuf>,
    #[arg(long, default_value = DEFAULT_ENDPOINT, help = "Base url of the habit service")]
    pub endpoint: Url,
    #[arg(long = "request-timeout", default_value_t = DEFAULT_REQUEST_TIMEOUT.as_secs(), help = "Seconds before a request to the service is abandoned")]
    pub request_timeout_s: u64,
}

impl ConnectionArgs {
    pub fn app_dir(&self) -> Result<PathBuf> {
        match &self.dir {
            Some(dir) => ensure_dir(dir.clone()),
            None => create_application_default_path(),
        }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct DaemonArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,
    #[arg(long = "sync-interval", default_value_t = DEFAULT_SYNC_INTERVAL.as_secs(), help = "Seconds between automatic uploads")]
    pub sync_interval_s: u64,
    #[arg(long = "idle-detection", default_value_t = DEFAULT_IDLE_DETECTION_INTERVAL.as_secs(), help = "Seconds without input before the browser reports the user idle")]
    pub idle_detection_s: u64,
    /// This option is for debugging purposes only. Output goes to stderr.
    #[arg(long = "log-console")]
    pub log_console: bool,
    #[arg(long = "log-filter")]
    pub log: Option<LevelFilter>,
}

impl DaemonArgs {
    pub fn config(&self) -> Result<DaemonConfig> {
        Ok(DaemonConfig {
            dir: self.connection.app_dir()?,
            endpoint: self.connection.endpoint.clone(),
            sync_interval: Duration::from_secs(self.sync_interval_s.max(1)),
            // Browsers refuse idle detection intervals below 15 seconds.
            idle_detection_interval: Duration::from_secs(self.idle_detection_s.max(15)),
            request_timeout: Duration::from_secs(self.connection.request_timeout_s.max(1)),
        })
    }
}
