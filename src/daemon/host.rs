//! Line delimited json protocol spoken with the browser side shim. Each line on the input is one
//! [InboundMessage], each line written to the output is one [OutboundMessage].

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    sync::{mpsc, oneshot},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::tracker::IdleState;

use super::events::{HostEvent, PageActivity, Request};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum InboundMessage {
    InitialTab {
        url: Option<String>,
    },
    TabActivated {
        tab_id: u32,
        url: Option<String>,
    },
    TabUpdated {
        tab_id: u32,
        status: Option<String>,
        #[serde(default)]
        active: bool,
        url: Option<String>,
    },
    IdleStateChanged {
        state: IdleState,
    },
    UserInactive,
    ActivityUpdate {
        last_activity: i64,
    },
    Request {
        id: u64,
        action: Action,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    GetSessionData,
    GetKarmaData,
    SyncNow,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OutboundMessage {
    SetIdleDetectionInterval { seconds: u64 },
    QueryActiveTab,
    Response { id: u64, data: Value },
}

/// Reads host messages until the input ends or shutdown is requested. Plain signals are forwarded
/// to the adapter, requests get a reply task that writes the answer back once it's ready.
pub async fn read_host_messages(
    input: impl AsyncRead + Unpin,
    events: mpsc::Sender<HostEvent>,
    output: mpsc::Sender<OutboundMessage>,
    shutdown: CancellationToken,
) -> Result<()> {
    let mut reader = BufReader::new(input);
    let mut buffer = Vec::new();
    loop {
        buffer.clear();
        let read = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            read = reader.read_until(b'\n', &mut buffer) => read?,
        };
        if read == 0 {
            debug!("Host closed its side of the pipe");
            return Ok(());
        }

        let line = match std::str::from_utf8(&buffer) {
            Ok(line) => line.trim(),
            Err(e) => {
                warn!("Found host message that isn't utf-8 {e}");
                continue;
            }
        };
        if line.is_empty() {
            continue;
        }

        let message = match serde_json::from_str::<InboundMessage>(line) {
            Ok(message) => message,
            Err(e) => {
                // ignore illegal values, the host may speak a newer protocol
                warn!("Found illegal host message {line}: {e}");
                continue;
            }
        };
        trace!("Received {message:?}");

        let event = into_event(message, &output);
        if events.send(event).await.is_err() {
            debug!("Adapter stopped, no longer reading host messages");
            return Ok(());
        }
    }
}

fn into_event(message: InboundMessage, output: &mpsc::Sender<OutboundMessage>) -> HostEvent {
    match message {
        InboundMessage::InitialTab { url } => HostEvent::InitialTab { url },
        InboundMessage::TabActivated { tab_id, url } => HostEvent::TabActivated { tab_id, url },
        InboundMessage::TabUpdated {
            tab_id,
            status,
            active,
            url,
        } => HostEvent::TabUpdated {
            tab_id,
            complete: status.as_deref() == Some("complete"),
            active,
            url,
        },
        InboundMessage::IdleStateChanged { state } => HostEvent::IdleStateChanged(state),
        InboundMessage::UserInactive => HostEvent::PageActivity(PageActivity::Inactive),
        InboundMessage::ActivityUpdate { last_activity } => {
            HostEvent::PageActivity(PageActivity::Update {
                last_activity_ms: last_activity,
            })
        }
        InboundMessage::Request { id, action } => {
            HostEvent::Request(request_with_reply(id, action, output.clone()))
        }
    }
}

fn request_with_reply(id: u64, action: Action, output: mpsc::Sender<OutboundMessage>) -> Request {
    match action {
        Action::GetSessionData => {
            let (tx, rx) = oneshot::channel();
            spawn_reply(id, rx, output);
            Request::GetSessionData(tx)
        }
        Action::GetKarmaData => {
            let (tx, rx) = oneshot::channel();
            spawn_reply(id, rx, output);
            Request::GetKarmaData(tx)
        }
        Action::SyncNow => {
            let (tx, rx) = oneshot::channel();
            spawn_reply(id, rx, output);
            Request::SyncNow(tx)
        }
    }
}

fn spawn_reply<T: Serialize + Send + 'static>(
    id: u64,
    reply: oneshot::Receiver<T>,
    output: mpsc::Sender<OutboundMessage>,
) {
    tokio::spawn(async move {
        let Ok(value) = reply.await else {
            debug!("Request {id} was dropped without an answer");
            return;
        };
        let data = match serde_json::to_value(value) {
            Ok(data) => data,
            Err(e) => {
                error!("Couldn't serialize answer to request {id} {e:?}");
                return;
            }
        };
        if output.send(OutboundMessage::Response { id, data }).await.is_err() {
            debug!("Output closed before answering request {id}");
        }
    });
}

/// Writes outbound messages until every sender is gone.
pub async fn write_host_messages(
    mut output: impl AsyncWrite + Unpin,
    mut messages: mpsc::Receiver<OutboundMessage>,
) -> Result<()> {
    while let Some(message) = messages.recv().await {
        let mut buffer = serde_json::to_vec(&message)?;
        buffer.push(b'\n');
        output.write_all(&buffer).await?;
        output.flush().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use anyhow::{anyhow, Result};
    use chrono::Utc;
    use serde_json::json;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use crate::{
        daemon::events::{HostEvent, PageActivity, Request},
        tracker::{snapshot::SessionSnapshot, IdleState},
    };

    use super::{read_host_messages, write_host_messages, OutboundMessage};

    const INPUT: &str = r#"{"type":"initialTab","url":"https://start.io/"}
{"type":"tabActivated","tabId":4,"url":"https://example.com/"}
this is not json

{"type":"tabActivated","tabId":5}
{"type":"tabUpdated","tabId":4,"status":"loading","active":true,"url":"https://example.com/"}
{"type":"idleStateChanged","state":"locked"}
{"type":"userInactive"}
{"type":"activityUpdate","lastActivity":1530662400000}
{"type":"somethingNew"}
"#;

    #[tokio::test]
    async fn decodes_host_signals() -> Result<()> {
        let (events_tx, mut events_rx) = mpsc::channel(32);
        let (output_tx, _output_rx) = mpsc::channel(32);

        read_host_messages(
            INPUT.as_bytes(),
            events_tx,
            output_tx,
            CancellationToken::new(),
        )
        .await?;

        let mut events = vec![];
        while let Some(event) = events_rx.recv().await {
            events.push(event);
        }

        assert_eq!(events.len(), 7);
        assert!(matches!(
            &events[0],
            HostEvent::InitialTab { url: Some(url) } if url == "https://start.io/"
        ));
        assert!(matches!(
            &events[1],
            HostEvent::TabActivated { tab_id: 4, url: Some(url) } if url == "https://example.com/"
        ));
        assert!(matches!(
            &events[2],
            HostEvent::TabActivated { tab_id: 5, url: None }
        ));
        assert!(matches!(
            &events[3],
            HostEvent::TabUpdated {
                complete: false,
                active: true,
                ..
            }
        ));
        assert!(matches!(
            &events[4],
            HostEvent::IdleStateChanged(IdleState::Locked)
        ));
        assert!(matches!(
            &events[5],
            HostEvent::PageActivity(PageActivity::Inactive)
        ));
        assert!(matches!(
            &events[6],
            HostEvent::PageActivity(PageActivity::Update {
                last_activity_ms: 1_530_662_400_000
            })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn skips_lines_that_are_not_utf8() -> Result<()> {
        let (events_tx, mut events_rx) = mpsc::channel(8);
        let (output_tx, _output_rx) = mpsc::channel(8);
        let input: &[u8] = b"{\"type\":\"tabActivated\",\"tabId\":1,\"url\":\"https://a.com/\"}\n\xff\xfe garbage\n{\"type\":\"tabActivated\",\"tabId\":2,\"url\":\"https://b.com/\"}\n";

        read_host_messages(input, events_tx, output_tx, CancellationToken::new()).await?;

        let mut tab_ids = vec![];
        while let Some(event) = events_rx.recv().await {
            if let HostEvent::TabActivated { tab_id, .. } = event {
                tab_ids.push(tab_id);
            }
        }
        assert_eq!(tab_ids, vec![1, 2]);
        Ok(())
    }

    #[tokio::test]
    async fn answers_requests_through_output() -> Result<()> {
        let (events_tx, mut events_rx) = mpsc::channel(4);
        let (output_tx, mut output_rx) = mpsc::channel(4);

        read_host_messages(
            r#"{"type":"request","id":9,"action":"getSessionData"}"#.as_bytes(),
            events_tx,
            output_tx,
            CancellationToken::new(),
        )
        .await?;

        let Some(HostEvent::Request(Request::GetSessionData(reply))) = events_rx.recv().await
        else {
            return Err(anyhow!("expected a session data request"));
        };
        let snapshot = SessionSnapshot {
            session_duration_ms: 10,
            tab_switches: 1,
            active_time_ms: 10,
            idle_time_ms: 0,
            top_sites: vec![],
            timestamp: Utc::now(),
        };
        reply
            .send(snapshot.clone())
            .map_err(|_| anyhow!("reply channel closed"))?;

        let Some(OutboundMessage::Response { id, data }) = output_rx.recv().await else {
            return Err(anyhow!("expected a response"));
        };
        assert_eq!(id, 9);
        assert_eq!(data["tabSwitches"], json!(1));
        assert_eq!(data["topSites"], json!([]));
        Ok(())
    }

    #[tokio::test]
    async fn writes_one_message_per_line() -> Result<()> {
        let (tx, rx) = mpsc::channel(4);
        tx.send(OutboundMessage::SetIdleDetectionInterval { seconds: 30 })
            .await?;
        tx.send(OutboundMessage::QueryActiveTab).await?;
        tx.send(OutboundMessage::Response {
            id: 3,
            data: json!({ "success": true }),
        })
        .await?;
        drop(tx);

        let mut buffer = Vec::new();
        write_host_messages(&mut buffer, rx).await?;

        let written = String::from_utf8(buffer)?;
        let lines = written.lines().collect::<Vec<_>>();
        assert_eq!(
            lines,
            vec![
                r#"{"type":"setIdleDetectionInterval","seconds":30}"#,
                r#"{"type":"queryActiveTab"}"#,
                r#"{"type":"response","id":3,"data":{"success":true}}"#,
            ]
        );
        Ok(())
    }
}
