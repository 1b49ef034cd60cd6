use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use adapter::EventAdapter;
use anyhow::Result;
use events::HostEvent;
use host::{read_host_messages, write_host_messages, OutboundMessage};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use url::Url;

use crate::{
    sync::{credentials::FileCredentialStore, SyncClient},
    tracker::SessionTracker,
    utils::clock::{Clock, DefaultClock},
};

pub mod adapter;
pub mod args;
pub mod events;
pub mod host;
pub mod shutdown;

pub const DEFAULT_ENDPOINT: &str = "https://fca1c54b-5da5-4930-b1fd-0068a195564d.Gen_xCodersproject.com";
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_IDLE_DETECTION_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const CREDENTIALS_FILE: &str = "storage.json";

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub dir: PathBuf,
    pub endpoint: Url,
    pub sync_interval: Duration,
    pub idle_detection_interval: Duration,
    pub request_timeout: Duration,
}

pub fn create_sync_client(
    dir: &Path,
    endpoint: &Url,
    request_timeout: Duration,
) -> Result<SyncClient> {
    let credentials = Arc::new(FileCredentialStore::new(dir.join(CREDENTIALS_FILE)));
    SyncClient::new(endpoint, request_timeout, credentials)
}

/// Represents the starting point for the daemon. The browser shim talks to it over stdio.
pub async fn start_daemon(config: DaemonConfig) -> Result<()> {
    let sync = create_sync_client(&config.dir, &config.endpoint, config.request_timeout)?;
    let tracker = SessionTracker::new(Box::new(DefaultClock));
    info!("Starting tracker, syncing to {}", config.endpoint);
    serve(
        tokio::io::stdin(),
        tokio::io::stdout(),
        tracker,
        sync,
        &config,
        DefaultClock,
    )
    .await
}

/// Wires the host protocol to the adapter and runs everything until the host disconnects or the
/// process is interrupted.
pub async fn serve(
    input: impl AsyncRead + Unpin,
    output: impl AsyncWrite + Unpin,
    tracker: SessionTracker,
    sync: SyncClient,
    config: &DaemonConfig,
    clock: impl Clock,
) -> Result<()> {
    let (event_sender, event_receiver) = mpsc::channel::<HostEvent>(CHANNEL_CAPACITY);
    let (output_sender, output_receiver) = mpsc::channel::<OutboundMessage>(CHANNEL_CAPACITY);

    output_sender
        .send(OutboundMessage::SetIdleDetectionInterval {
            seconds: config.idle_detection_interval.as_secs(),
        })
        .await?;
    output_sender.send(OutboundMessage::QueryActiveTab).await?;

    let shutdown_token = CancellationToken::new();

    let adapter = EventAdapter::new(
        event_receiver,
        tracker,
        sync,
        shutdown_token.clone(),
        config.sync_interval,
        Box::new(clock),
    );

    let reader = async {
        let result = read_host_messages(
            input,
            event_sender,
            output_sender,
            shutdown_token.clone(),
        )
        .await;
        shutdown_token.cancel();
        result
    };

    let (_, reading_result, writing_result, adapter_result) = tokio::join!(
        shutdown::detect_shutdown(shutdown_token.clone()),
        reader,
        write_host_messages(output, output_receiver),
        adapter.run(),
    );

    if let Err(reading_result) = reading_result {
        error!("Host reader got an error {:?}", reading_result);
    }

    if let Err(writing_result) = writing_result {
        error!("Host writer got an error {:?}", writing_result);
    }

    if let Err(adapter_result) = adapter_result {
        error!("Event adapter got an error {:?}", adapter_result);
    }

    Ok(())
}
