//! Talks to the remote service. Every call starts by reading the stored credential; without one
//! the client stays offline and reports that as a regular outcome.

pub mod credentials;
pub mod karma;

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use credentials::{CredentialStore, TOKEN_KEY};
use karma::KarmaSummary;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
    tracker::{snapshot::SessionSnapshot, Checkpoint, SessionTracker},
    utils::time::format_ms,
};

pub const SYNC_PATH: &str = "/api/extension/sync";
pub const KARMA_PATH: &str = "/api/extension/karma";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The server accepted the snapshot.
    Synced,
    /// No credential is stored, nothing was sent.
    Skipped,
    /// The upload didn't go through. Tracker state must be left as is.
    Failed { reason: String },
}

impl SyncOutcome {
    /// Drops the uploaded part of the window if, and only if, the upload was accepted.
    pub fn apply_to(&self, tracker: &mut SessionTracker, uploaded: &Checkpoint) {
        if matches!(self, SyncOutcome::Synced) {
            tracker.commit(uploaded);
        }
    }
}

/// Reply to a `syncNow` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncResponse {
    pub success: bool,
    pub status: &'static str,
}

impl From<&SyncOutcome> for SyncResponse {
    fn from(value: &SyncOutcome) -> Self {
        match value {
            SyncOutcome::Synced => SyncResponse {
                success: true,
                status: "synced",
            },
            SyncOutcome::Skipped => SyncResponse {
                success: false,
                status: "skipped",
            },
            SyncOutcome::Failed { .. } => SyncResponse {
                success: false,
                status: "failed",
            },
        }
    }
}

/// Cheap to clone, so uploads can run on their own task while the tracker keeps going.
#[derive(Clone)]
pub struct SyncClient {
    http: reqwest::Client,
    sync_url: Url,
    karma_url: Url,
    credentials: Arc<dyn CredentialStore>,
}

impl SyncClient {
    pub fn new(
        endpoint: &Url,
        request_timeout: Duration,
        credentials: Arc<dyn CredentialStore>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            http,
            sync_url: endpoint.join(SYNC_PATH)?,
            karma_url: endpoint.join(KARMA_PATH)?,
            credentials,
        })
    }

    /// Snapshot, upload and, on success, start the next window. Holds the tracker for the whole
    /// round trip, so the event loop uses [SyncClient::upload] and [SyncOutcome::apply_to]
    /// separately instead.
    pub async fn sync_now(&self, tracker: &mut SessionTracker) -> SyncOutcome {
        let checkpoint = tracker.checkpoint();
        let outcome = self.upload(&checkpoint.snapshot).await;
        outcome.apply_to(tracker, &checkpoint);
        outcome
    }

    pub async fn upload(&self, snapshot: &SessionSnapshot) -> SyncOutcome {
        let token = match self.token().await {
            Ok(Some(token)) => token,
            Ok(None) => {
                info!("No auth token found, skipping sync");
                return SyncOutcome::Skipped;
            }
            Err(e) => {
                error!("Couldn't read credentials {e:?}");
                return SyncOutcome::Failed {
                    reason: format!("credential store: {e}"),
                };
            }
        };

        info!(
            "Uploading {} of activity across {} sites",
            format_ms(snapshot.session_duration_ms),
            snapshot.top_sites.len()
        );
        debug!("Uploading snapshot {:?}", snapshot);
        let response = self
            .http
            .post(self.sync_url.clone())
            .bearer_auth(token)
            .json(snapshot)
            .send()
            .await;

        match response {
            Ok(response) if response.status().is_success() => {
                info!("Successfully synced with web app");
                SyncOutcome::Synced
            }
            Ok(response) => {
                let status = response.status();
                warn!("Sync rejected with {status}");
                SyncOutcome::Failed {
                    reason: format!("server responded with {status}"),
                }
            }
            Err(e) => {
                error!("Failed to sync with web app {e:?}");
                SyncOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Never fails: anything that goes wrong is logged and reported as no data.
    pub async fn fetch_remote_score_summary(&self) -> Option<KarmaSummary> {
        let token = match self.token().await {
            Ok(Some(token)) => token,
            Ok(None) => return None,
            Err(e) => {
                error!("Couldn't read credentials {e:?}");
                return None;
            }
        };

        let response = self
            .http
            .get(self.karma_url.clone())
            .bearer_auth(token)
            .send()
            .await
            .inspect_err(|e| error!("Failed to get karma data {e:?}"))
            .ok()?;

        if !response.status().is_success() {
            warn!("Karma request rejected with {}", response.status());
            return None;
        }

        response
            .json::<KarmaSummary>()
            .await
            .inspect_err(|e| error!("Karma payload couldn't be parsed {e:?}"))
            .ok()
    }

    async fn token(&self) -> Result<Option<String>> {
        Ok(self
            .credentials
            .get(TOKEN_KEY)
            .await?
            .filter(|token| !token.is_empty()))
    }
}
