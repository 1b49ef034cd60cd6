use std::time::Duration;

use anyhow::Result;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::{
    sync::{SyncClient, SyncOutcome, SyncResponse},
    tracker::{Checkpoint, SessionTracker},
    utils::clock::Clock,
};

use super::events::{HostEvent, Request};

/// Upload that is currently on the wire, plus everyone waiting for its result.
struct PendingSync {
    handle: JoinHandle<SyncOutcome>,
    checkpoint: Checkpoint,
    waiters: Vec<oneshot::Sender<SyncResponse>>,
}

/// Owns the tracker and turns host events into tracker calls. Every mutation of session state
/// happens inside [EventAdapter::run], network calls run on separate tasks and report back.
pub struct EventAdapter {
    events: mpsc::Receiver<HostEvent>,
    tracker: SessionTracker,
    sync: SyncClient,
    shutdown: CancellationToken,
    sync_interval: Duration,
    time_provider: Box<dyn Clock>,
}

impl EventAdapter {
    pub fn new(
        events: mpsc::Receiver<HostEvent>,
        tracker: SessionTracker,
        sync: SyncClient,
        shutdown: CancellationToken,
        sync_interval: Duration,
        time_provider: Box<dyn Clock>,
    ) -> Self {
        Self {
            events,
            tracker,
            sync,
            shutdown,
            sync_interval,
            time_provider,
        }
    }

    /// Executes the adapter event loop until shutdown or until the host goes away.
    pub async fn run(mut self) -> Result<()> {
        let mut pending: Option<PendingSync> = None;
        let mut sync_point = self.time_provider.instant() + self.sync_interval;
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    if pending.is_some() {
                        warn!("Shutting down with a sync in flight, its result will be dropped");
                    }
                    return Ok(())
                }
                event = self.events.recv() => match event {
                    Some(event) => self.handle_event(event, &mut pending),
                    None => {
                        info!("Host event stream closed");
                        return Ok(())
                    }
                },
                _ = self.time_provider.sleep_until(sync_point) => {
                    sync_point += self.sync_interval;
                    if pending.is_some() {
                        debug!("Periodic sync skipped, previous one is still running");
                    } else {
                        self.start_sync(&mut pending, None);
                    }
                }
                outcome = wait_for_sync(&mut pending) => {
                    self.finish_sync(outcome, &mut pending);
                }
            }
        }
    }

    fn handle_event(&mut self, event: HostEvent, pending: &mut Option<PendingSync>) {
        match event {
            HostEvent::InitialTab { url: Some(url) } => self.tracker.track_initial_tab(&url),
            HostEvent::InitialTab { url: None } => debug!("Host reported no active tab"),
            HostEvent::TabActivated { tab_id, url } => self.switch_to(tab_id, url),
            HostEvent::TabUpdated {
                tab_id,
                complete,
                active,
                url,
            } => {
                if complete && active {
                    self.switch_to(tab_id, url);
                } else {
                    trace!("Ignoring update of tab {tab_id}");
                }
            }
            HostEvent::IdleStateChanged(state) => self.tracker.on_idle_state_changed(state),
            HostEvent::PageActivity(activity) => trace!("Page activity {activity:?}"),
            HostEvent::Request(request) => self.handle_request(request, pending),
        }
    }

    fn switch_to(&mut self, tab_id: u32, url: Option<String>) {
        match url {
            Some(url) => self.tracker.on_tab_switch(&url),
            None => warn!("Couldn't resolve tab {tab_id}, keeping previous tab tracked"),
        }
    }

    fn handle_request(&mut self, request: Request, pending: &mut Option<PendingSync>) {
        match request {
            Request::GetSessionData(reply) => {
                if reply.send(self.tracker.snapshot()).is_err() {
                    debug!("Session data requester went away");
                }
            }
            Request::GetKarmaData(reply) => {
                let sync = self.sync.clone();
                tokio::spawn(async move {
                    let summary = sync.fetch_remote_score_summary().await;
                    if reply.send(summary).is_err() {
                        debug!("Karma requester went away");
                    }
                });
            }
            Request::SyncNow(reply) => self.start_sync(pending, Some(reply)),
        }
    }

    /// Starts an upload of the current snapshot. While one is already running, the caller joins
    /// it instead, so two resets can never race.
    fn start_sync(
        &mut self,
        pending: &mut Option<PendingSync>,
        waiter: Option<oneshot::Sender<SyncResponse>>,
    ) {
        if let Some(current) = pending.as_mut() {
            debug!("Joining sync already in flight");
            current.waiters.extend(waiter);
            return;
        }

        let checkpoint = self.tracker.checkpoint();
        let snapshot = checkpoint.snapshot.clone();
        let sync = self.sync.clone();
        let handle = tokio::spawn(async move { sync.upload(&snapshot).await });
        *pending = Some(PendingSync {
            handle,
            checkpoint,
            waiters: waiter.into_iter().collect(),
        });
    }

    /// Events handled while the upload was running stay in the next window.
    fn finish_sync(&mut self, outcome: SyncOutcome, pending: &mut Option<PendingSync>) {
        let Some(PendingSync {
            checkpoint,
            waiters,
            ..
        }) = pending.take()
        else {
            return;
        };
        match &outcome {
            SyncOutcome::Failed { reason } => warn!("Sync failed, keeping session data: {reason}"),
            other => debug!("Sync finished {other:?}"),
        }
        outcome.apply_to(&mut self.tracker, &checkpoint);

        let response = SyncResponse::from(&outcome);
        for waiter in waiters {
            if waiter.send(response.clone()).is_err() {
                debug!("Sync requester went away");
            }
        }
    }
}

/// Resolves once the running upload is done. Never resolves when nothing is running.
async fn wait_for_sync(pending: &mut Option<PendingSync>) -> SyncOutcome {
    match pending.as_mut() {
        Some(current) => (&mut current.handle).await.unwrap_or_else(|e| {
            error!("Sync task failed {e:?}");
            SyncOutcome::Failed {
                reason: e.to_string(),
            }
        }),
        None => std::future::pending().await,
    }
}
