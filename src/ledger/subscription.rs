//! WebSocket event subscriptions
//!
//! Each subscription is its own connection yielding decoded events of one
//! class. The stream ends when the server closes it; callers restart from
//! the last block they saw.

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, info, trace, warn};

use super::{BlockNumber, EventFilter, EventKind, EventStream};
use crate::error::{Result, SyncError};
use crate::parser::ParsedMessage;

/// Opens event subscriptions against the gateway's stream endpoint
#[derive(Debug, Clone)]
pub struct WsEventSource {
    endpoint: String,
}

impl WsEventSource {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }

    /// Subscription URL for one event class
    pub fn url(&self, kind: EventKind, from_block: BlockNumber, filter: &EventFilter) -> String {
        let mut url = format!(
            "{}/events?kind={}&fromBlock={}",
            self.endpoint,
            kind.log_name(),
            from_block
        );
        if let Some(owner) = &filter.owner {
            url.push_str("&owner=");
            url.push_str(owner);
        }
        url
    }

    /// Connect and return the decoded event stream
    pub async fn open(
        &self,
        kind: EventKind,
        from_block: BlockNumber,
        filter: &EventFilter,
    ) -> Result<EventStream> {
        let url = self.url(kind, from_block, filter);
        info!(url = %url, kind = %kind, "Subscribing to ledger events");

        let (ws_stream, response) = connect_async(&url).await.map_err(|e| {
            SyncError::SubscriptionFailed(format!("Failed to connect: {}", e))
        })?;
        debug!(status = ?response.status(), kind = %kind, "Event stream connected");

        let stream = futures_util::stream::unfold(Some(ws_stream), move |state| async move {
            let mut ws = state?;
            loop {
                let text = match ws.next().await {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Binary(data))) => String::from_utf8_lossy(&data).to_string(),
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws.send(Message::Pong(data)).await;
                        continue;
                    }
                    Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => continue,
                    Some(Ok(Message::Close(frame))) => {
                        warn!(frame = ?frame, kind = %kind, "Event stream closed by server");
                        return None;
                    }
                    Some(Err(e)) => {
                        return Some((Err(SyncError::SubscriptionFailed(e.to_string())), None));
                    }
                    None => return None,
                };

                match ParsedMessage::parse(&text) {
                    Ok(ParsedMessage::Event(event)) if event.kind() == kind => {
                        return Some((Ok(event), Some(ws)));
                    }
                    Ok(ParsedMessage::Event(event)) => {
                        trace!(expected = %kind, got = %event.kind(), "Skipping event of other class");
                    }
                    Ok(ParsedMessage::Unknown(msg)) => {
                        trace!(msg = %msg, "Unknown stream message");
                    }
                    Err(e) => return Some((Err(SyncError::from(e)), Some(ws))),
                }
            }
        });

        Ok(Box::pin(stream))
    }
}
