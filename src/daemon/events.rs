use tokio::sync::oneshot;

use crate::{
    sync::{karma::KarmaSummary, SyncResponse},
    tracker::{snapshot::SessionSnapshot, IdleState},
};

/// Everything the host can tell the engine. Produced by [super::host] out of protocol messages.
#[derive(Debug)]
pub enum HostEvent {
    /// Reply to the startup active tab query.
    InitialTab { url: Option<String> },
    /// `url` is missing when the host failed to look the tab up.
    TabActivated { tab_id: u32, url: Option<String> },
    TabUpdated {
        tab_id: u32,
        complete: bool,
        active: bool,
        url: Option<String>,
    },
    IdleStateChanged(IdleState),
    /// Signals from the page level activity detector. They are informational only, presence is
    /// decided by [HostEvent::IdleStateChanged].
    PageActivity(PageActivity),
    Request(Request),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageActivity {
    Inactive,
    Update { last_activity_ms: i64 },
}

/// Requests from the UI. Each carries the channel its answer goes back through.
#[derive(Debug)]
pub enum Request {
    GetSessionData(oneshot::Sender<SessionSnapshot>),
    GetKarmaData(oneshot::Sender<Option<KarmaSummary>>),
    SyncNow(oneshot::Sender<SyncResponse>),
}
