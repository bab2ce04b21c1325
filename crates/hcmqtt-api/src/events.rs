//! Typed appliance event stream.
//!
//! [`EventStream`] owns a background reader task that pulls response
//! chunks, feeds them through the [`SseParser`], maps each frame to an
//! [`ApplianceEvent`] and pushes it into a channel. The stream side is a
//! plain [`Stream`] over that channel. Dropping the stream cancels the
//! reader and with it the HTTP connection.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_core::Stream;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::Error;
use crate::models::{deserialize_timestamp, normalize_value, short_key};
use crate::sse::{SseFrame, SseParser};

const EVENT_CHANNEL_CAPACITY: usize = 256;

// ── ApplianceEvent ───────────────────────────────────────────────────

/// One event from the stream, tagged with the appliance it concerns.
/// `appliance_id` is empty for keep-alives.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplianceEvent {
    pub appliance_id: String,
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    KeepAlive,
    Status(Vec<EventItem>),
    Event(Vec<EventItem>),
    Notify(Vec<EventItem>),
    Connected,
    Disconnected,
    Paired,
    Depaired,
    /// A frame that maps to no appliance event (no id, unknown name or an
    /// undecodable payload). Carries nothing but proof of a live stream.
    Unrecognized,
}

impl EventKind {
    pub fn is_keep_alive(&self) -> bool {
        matches!(self, Self::KeepAlive)
    }
}

/// A single field-level delta. `key` and string values are normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct EventItem {
    pub key: String,
    pub uri: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub value: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ItemsPayload {
    items: Vec<RawItem>,
}

#[derive(Debug, Deserialize)]
struct RawItem {
    key: String,
    #[serde(default)]
    uri: Option<String>,
    #[serde(deserialize_with = "deserialize_timestamp")]
    timestamp: DateTime<Utc>,
    #[serde(default)]
    value: Option<Value>,
}

impl From<RawItem> for EventItem {
    fn from(raw: RawItem) -> Self {
        Self {
            key: short_key(&raw.key),
            uri: raw.uri,
            timestamp: raw.timestamp,
            value: raw.value.map(normalize_value),
        }
    }
}

impl ApplianceEvent {
    /// Map a raw frame to a typed event.
    ///
    /// `Ok(None)` means the frame is not an appliance event (no id, unknown
    /// name). `Err` means the items payload did not decode.
    pub fn from_frame(frame: &SseFrame) -> Result<Option<Self>, serde_json::Error> {
        if frame.event.as_deref() == Some("KEEP-ALIVE") {
            return Ok(Some(Self {
                appliance_id: String::new(),
                kind: EventKind::KeepAlive,
            }));
        }

        let (Some(id), Some(event)) = (frame.id.as_deref(), frame.event.as_deref()) else {
            return Ok(None);
        };

        let kind = match event {
            "STATUS" => EventKind::Status(decode_items(frame)?),
            "EVENT" => EventKind::Event(decode_items(frame)?),
            "NOTIFY" => EventKind::Notify(decode_items(frame)?),
            "CONNECTED" => EventKind::Connected,
            "DISCONNECTED" => EventKind::Disconnected,
            "PAIRED" => EventKind::Paired,
            "DEPAIRED" => EventKind::Depaired,
            _ => return Ok(None),
        };

        Ok(Some(Self {
            appliance_id: id.to_owned(),
            kind,
        }))
    }

    fn unrecognized(frame: &SseFrame) -> Self {
        Self {
            appliance_id: frame.id.clone().unwrap_or_default(),
            kind: EventKind::Unrecognized,
        }
    }
}

fn decode_items(frame: &SseFrame) -> Result<Vec<EventItem>, serde_json::Error> {
    let payload: ItemsPayload = serde_json::from_str(frame.data.as_deref().unwrap_or_default())?;
    Ok(payload.items.into_iter().map(EventItem::from).collect())
}

// ── EventStream ──────────────────────────────────────────────────────

/// Live appliance events. Yields `Err` once if the connection fails or goes
/// idle, then ends. Ends without an error when the server closes cleanly.
pub struct EventStream {
    rx: mpsc::Receiver<Result<ApplianceEvent, Error>>,
    cancel: CancellationToken,
}

impl EventStream {
    /// Start reading an already-opened `text/event-stream` response.
    pub(crate) fn spawn(response: reqwest::Response, idle_timeout: Duration) -> Self {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        tokio::spawn(read_events(response, tx, cancel.clone(), idle_timeout));
        Self { rx, cancel }
    }

    /// Stop the reader and close the connection.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl Stream for EventStream {
    type Item = Result<ApplianceEvent, Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

async fn read_events(
    mut response: reqwest::Response,
    tx: mpsc::Sender<Result<ApplianceEvent, Error>>,
    cancel: CancellationToken,
    idle_timeout: Duration,
) {
    let mut parser = SseParser::new();

    loop {
        let chunk = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("event stream cancelled");
                return;
            }
            chunk = tokio::time::timeout(idle_timeout, response.chunk()) => chunk,
        };

        let bytes = match chunk {
            Ok(Ok(Some(bytes))) => bytes,
            Ok(Ok(None)) => {
                debug!("event stream closed by server");
                return;
            }
            Ok(Err(e)) => {
                parser.reset();
                let _ = tx.send(Err(Error::Connection(e))).await;
                return;
            }
            Err(_) => {
                parser.reset();
                let _ = tx
                    .send(Err(Error::IdleTimeout {
                        timeout_secs: idle_timeout.as_secs(),
                    }))
                    .await;
                return;
            }
        };

        for frame in parser.feed(&bytes) {
            let event = match ApplianceEvent::from_frame(&frame) {
                Ok(Some(event)) => event,
                Ok(None) => {
                    trace!(?frame, "ignoring frame");
                    ApplianceEvent::unrecognized(&frame)
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        id = frame.id.as_deref().unwrap_or_default(),
                        event = frame.event.as_deref().unwrap_or_default(),
                        data = frame.data.as_deref().unwrap_or_default(),
                        "failed to decode event items"
                    );
                    ApplianceEvent::unrecognized(&frame)
                }
            };
            if tx.send(Ok(event)).await.is_err() {
                return;
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
