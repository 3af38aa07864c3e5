//! Periodic-pull fallback
//!
//! The first pull doubles as the connection probe. After it succeeds a
//! recurring pull carries the `since` cursor and delivers only newer items.
//! A `connection_id` in any response replaces the one stamped on uplinks.

use super::{
    derive_send_url, post_uplink, AdapterEvent, ChannelStatus, ConnectionIdCell, OpenRequest,
    OpenedTransport, StatusCell, TransportAdapter, TransportKind,
};
use crate::error::TransportError;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

#[derive(Debug, Default, Deserialize)]
struct PollResponse {
    #[serde(default)]
    notifications: Vec<Value>,
    #[serde(default)]
    connection_id: Option<String>,
}

pub struct PollAdapter {
    http: reqwest::Client,
    send_url: String,
    status: StatusCell,
    connection_id: ConnectionIdCell,
    poller: JoinHandle<()>,
}

pub async fn open(http: reqwest::Client, request: &OpenRequest) -> Result<OpenedTransport, TransportError> {
    let mut cursor = request.last_message_id;
    let initial = fetch(&http, &request.url, cursor)
        .await
        .map_err(|e| match e {
            TransportError::Http { .. } => e,
            other => TransportError::Connect(other.to_string()),
        })?;
    debug!(url = %request.url, "poll probe succeeded");

    let status = StatusCell::new(ChannelStatus::Open);
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let connection_id = ConnectionIdCell::default();
    if let Some(id) = initial.connection_id {
        connection_id.set(id);
    }
    let (fresh, next) = select_new(initial.notifications, cursor);
    cursor = next;
    for item in fresh {
        let _ = events_tx.send(AdapterEvent::Message(item.to_string()));
    }

    let poller = tokio::spawn(poll_loop(
        http.clone(),
        request.url.clone(),
        cursor,
        request.poll_interval,
        FailureTracker::new(request.max_consecutive_poll_failures),
        status.clone(),
        connection_id.clone(),
        events_tx,
    ));

    let send_url = request
        .send_url
        .clone()
        .unwrap_or_else(|| derive_send_url(&request.url));

    Ok(OpenedTransport {
        adapter: Box::new(PollAdapter {
            http,
            send_url,
            status,
            connection_id,
            poller,
        }),
        events: events_rx,
    })
}

async fn poll_loop(
    http: reqwest::Client,
    url: String,
    mut cursor: Option<i64>,
    period: Duration,
    mut failures: FailureTracker,
    status: StatusCell,
    connection_id: ConnectionIdCell,
    events: mpsc::UnboundedSender<AdapterEvent>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if status.get() != ChannelStatus::Open {
            return;
        }

        match fetch(&http, &url, cursor).await {
            Ok(response) => {
                failures.record_success();
                if let Some(id) = response.connection_id {
                    connection_id.set(id);
                }
                let (fresh, next) = select_new(response.notifications, cursor);
                cursor = next;
                for item in fresh {
                    let _ = events.send(AdapterEvent::Message(item.to_string()));
                }
            }
            Err(e) => {
                if failures.record_failure() {
                    warn!(
                        error = %e,
                        failures = failures.consecutive,
                        "poll failure threshold reached"
                    );
                    if status.close() {
                        let _ = events.send(AdapterEvent::Closed(Some(e)));
                    }
                    return;
                }
                debug!(error = %e, failures = failures.consecutive, "poll failed");
                let _ = events.send(AdapterEvent::Error(e));
            }
        }
    }
}

async fn fetch(http: &reqwest::Client, url: &str, since: Option<i64>) -> Result<PollResponse, TransportError> {
    let response = http.get(build_poll_url(url, since)).send().await?;
    if !response.status().is_success() {
        return Err(TransportError::Http {
            status: response.status().as_u16(),
        });
    }
    response
        .json()
        .await
        .map_err(|e| TransportError::Protocol(e.to_string()))
}

pub(crate) fn build_poll_url(url: &str, since: Option<i64>) -> String {
    match since {
        Some(id) if url.contains('?') => format!("{url}&since={id}"),
        Some(id) => format!("{url}?since={id}"),
        None => url.to_string(),
    }
}

/// Keep items whose integer `id` is above the cursor; returns them with the
/// advanced cursor. Items without an integer `id` are skipped.
pub(crate) fn select_new(items: Vec<Value>, cursor: Option<i64>) -> (Vec<Value>, Option<i64>) {
    let mut next = cursor;
    let fresh = items
        .into_iter()
        .filter(|item| {
            let Some(id) = item.get("id").and_then(Value::as_i64) else {
                return false;
            };
            if cursor.is_some_and(|c| id <= c) {
                return false;
            }
            next = Some(next.map_or(id, |n| n.max(id)));
            true
        })
        .collect();
    (fresh, next)
}

#[derive(Debug)]
pub(crate) struct FailureTracker {
    consecutive: u32,
    threshold: u32,
}

impl FailureTracker {
    pub(crate) fn new(threshold: u32) -> Self {
        Self {
            consecutive: 0,
            threshold: threshold.max(1),
        }
    }

    /// Returns true once the threshold is reached
    pub(crate) fn record_failure(&mut self) -> bool {
        self.consecutive += 1;
        self.consecutive >= self.threshold
    }

    pub(crate) fn record_success(&mut self) {
        self.consecutive = 0;
    }
}

#[async_trait]
impl TransportAdapter for PollAdapter {
    fn kind(&self) -> TransportKind {
        TransportKind::Poll
    }

    fn status(&self) -> ChannelStatus {
        self.status.get()
    }

    async fn send(&self, payload: String) -> Result<(), TransportError> {
        if self.status.get() != ChannelStatus::Open {
            return Err(TransportError::Send("poll transport is not open".into()));
        }
        let connection_id = self.connection_id.get();
        post_uplink(&self.http, &self.send_url, connection_id.as_deref(), payload).await
    }

    fn connection_id(&self) -> Option<String> {
        self.connection_id.get()
    }

    async fn close(&self) {
        if self.status.close() {
            self.poller.abort();
        }
    }
}

impl Drop for PollAdapter {
    fn drop(&mut self) {
        self.poller.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_build_poll_url() {
        assert_eq!(build_poll_url("http://h/poll", None), "http://h/poll");
        assert_eq!(build_poll_url("http://h/poll", Some(7)), "http://h/poll?since=7");
        assert_eq!(
            build_poll_url("http://h/poll?user=3", Some(7)),
            "http://h/poll?user=3&since=7"
        );
    }

    #[test]
    fn test_select_new_filters_by_cursor() {
        let items = vec![json!({"id": 3}), json!({"id": 5}), json!({"id": 6, "type": "notification"})];
        let (fresh, cursor) = select_new(items, Some(4));

        assert_eq!(fresh.len(), 2);
        assert_eq!(fresh[0]["id"], 5);
        assert_eq!(cursor, Some(6));
    }

    #[test]
    fn test_select_new_without_cursor_takes_everything_with_an_id() {
        let items = vec![json!({"id": 1}), json!({"body": "no id"}), json!({"id": "x"}), json!({"id": 2})];
        let (fresh, cursor) = select_new(items, None);

        assert_eq!(fresh.len(), 2);
        assert_eq!(cursor, Some(2));
    }

    #[test]
    fn test_select_new_keeps_cursor_when_nothing_is_new() {
        let (fresh, cursor) = select_new(vec![json!({"id": 2})], Some(9));
        assert!(fresh.is_empty());
        assert_eq!(cursor, Some(9));
    }

    #[test]
    fn test_failure_tracker_threshold_and_reset() {
        let mut tracker = FailureTracker::new(3);
        assert!(!tracker.record_failure());
        assert!(!tracker.record_failure());
        tracker.record_success();
        assert!(!tracker.record_failure());
        assert!(!tracker.record_failure());
        assert!(tracker.record_failure());
    }

    #[test]
    fn test_poll_response_tolerates_missing_array() {
        let body: PollResponse = serde_json::from_str("{}").unwrap();
        assert!(body.notifications.is_empty());
        assert!(body.connection_id.is_none());

        let body: PollResponse =
            serde_json::from_str(r#"{"connection_id":"p-1","notifications":[{"id":1}]}"#).unwrap();
        assert_eq!(body.connection_id.as_deref(), Some("p-1"));
        assert_eq!(body.notifications.len(), 1);
    }
}
