//! Push confirmation: `claimSuccess` events delivered by the server.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::Client;
use tokio::sync::broadcast;

use crate::error::{ApiError, TransportError};
use crate::transport::{ConfirmationEvent, ConfirmationTransport, Watch};
use crate::types::{ClaimKey, ClaimSuccessEvent};

pub const CLAIM_SUCCESS_EVENT: &str = "claimSuccess";

pub type PushStream = BoxStream<'static, Result<ClaimSuccessEvent, TransportError>>;

/// A source of server-pushed claim events. Every subscription sees every
/// event; filtering by claim happens in [`PushTransport`].
#[async_trait]
pub trait PushChannel: Send + Sync {
    async fn subscribe(&self) -> Result<PushStream, TransportError>;
}

/// In-process hub. Hosts that already hold a socket connection publish into
/// it; tests use it directly.
pub struct BroadcastChannel {
    sender: broadcast::Sender<ClaimSuccessEvent>,
}

impl BroadcastChannel {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Returns the number of subscribers that will see the event.
    pub fn publish(&self, event: ClaimSuccessEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl PushChannel for BroadcastChannel {
    async fn subscribe(&self) -> Result<PushStream, TransportError> {
        let receiver = self.sender.subscribe();
        let stream = stream::unfold(Some(receiver), |receiver| async move {
            let mut receiver = receiver?;
            loop {
                match receiver.recv().await {
                    Ok(event) => return Some((Ok(event), Some(receiver))),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Push subscriber lagged, {} events skipped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Some((Err(TransportError::ChannelClosed), None));
                    }
                }
            }
        });
        Ok(stream.boxed())
    }
}

/// Reads `claimSuccess` events from a Server-Sent-Events endpoint.
pub struct SseChannel {
    client: Client,
    url: String,
}

impl SseChannel {
    pub fn new(url: impl Into<String>) -> Self {
        Self { client: Client::new(), url: url.into() }
    }
}

struct SseState {
    body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    parser: SseParser,
    pending: VecDeque<ClaimSuccessEvent>,
}

#[async_trait]
impl PushChannel for SseChannel {
    async fn subscribe(&self) -> Result<PushStream, TransportError> {
        let response = self.client
            .get(&self.url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| TransportError::Subscribe(e.to_string()))?;
        if !response.status().is_success() {
            return Err(TransportError::Subscribe(format!("{} returned {}", self.url, response.status())));
        }
        tracing::info!("Subscribed to push channel {}", self.url);

        let state = SseState {
            body: response.bytes_stream().map(|chunk| chunk.map(|b| b.to_vec())).boxed(),
            parser: SseParser::default(),
            pending: VecDeque::new(),
        };
        let stream = stream::unfold(Some(state), |state| async move {
            let mut state = state?;
            loop {
                if let Some(event) = state.pending.pop_front() {
                    return Some((Ok(event), Some(state)));
                }
                match state.body.next().await {
                    Some(Ok(chunk)) => state.pending.extend(state.parser.feed(&chunk)),
                    Some(Err(e)) => return Some((Err(TransportError::Api(ApiError::Network(e))), None)),
                    None => return Some((Err(TransportError::ChannelClosed), None)),
                }
            }
        });
        Ok(stream.boxed())
    }
}

/// Most bytes an unfinished line plus unfinished event may hold.
pub const MAX_PENDING_BYTES: usize = 64 * 1024;

/// Incremental parser for `text/event-stream` bodies.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    /// Feeds a chunk and returns the complete `claimSuccess` events it finished.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<ClaimSuccessEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    events.push(event);
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                _ => {}
            }
        }

        let pending = self.buffer.len() + self.data.iter().map(String::len).sum::<usize>();
        if pending > MAX_PENDING_BYTES {
            tracing::warn!("Discarding {} bytes of an oversized event stream frame", pending);
            self.buffer.clear();
            self.event = None;
            self.data.clear();
        }
        events
    }

    fn dispatch(&mut self) -> Option<ClaimSuccessEvent> {
        let event = self.event.take();
        let data = std::mem::take(&mut self.data);
        if event.as_deref() != Some(CLAIM_SUCCESS_EVENT) || data.is_empty() {
            return None;
        }
        match serde_json::from_str(&data.join("\n")) {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::warn!("Ignoring malformed {} event: {}", CLAIM_SUCCESS_EVENT, e);
                None
            }
        }
    }
}

/// Confirms a claim when a matching `claimSuccess` event arrives.
pub struct PushTransport {
    channel: Arc<dyn PushChannel>,
}

impl PushTransport {
    pub fn new(channel: Arc<dyn PushChannel>) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl ConfirmationTransport for PushTransport {
    async fn watch(&self, key: &ClaimKey) -> Result<Watch, TransportError> {
        let events = self.channel.subscribe().await?;
        let wanted = key.clone();
        let stream = events.filter_map(move |item| {
            let forwarded = match item {
                Ok(event) if wanted.matches(&event.terminal_id, &event.pos_no) => Some(Ok(
                    ConfirmationEvent::confirmed(wanted.clone(), Some(event.message), event.receipt),
                )),
                Ok(event) => {
                    tracing::debug!(
                        "Ignoring {} for terminal {} / SI {}",
                        CLAIM_SUCCESS_EVENT, event.terminal_id, event.pos_no
                    );
                    None
                }
                Err(e) => Some(Err(e)),
            };
            futures::future::ready(forwarded)
        });
        Ok(Watch::new(key.clone(), stream.boxed()))
    }

    fn name(&self) -> &'static str {
        "push"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(terminal: &str, pos_no: &str) -> ClaimSuccessEvent {
        ClaimSuccessEvent {
            terminal_id: terminal.into(),
            pos_no: pos_no.into(),
            message: format!("credited {}", pos_no),
            receipt: None,
        }
    }

    #[test]
    fn parser_handles_split_chunks_and_other_events() {
        let mut parser = SseParser::default();
        assert!(parser.feed(b": keep-alive\n\nevent: ping\ndata: {}\n\nevent: claimSu").is_empty());
        let events = parser.feed(b"ccess\r\ndata: {\"terminalId\":\"3\",\"posNo\":\"INV-1\",\"message\":\"ok\"}\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].pos_no, "INV-1");
        assert_eq!(events[0].message, "ok");
    }

    #[test]
    fn parser_skips_malformed_payloads() {
        let mut parser = SseParser::default();
        assert!(parser.feed(b"event: claimSuccess\ndata: {not json}\n\n").is_empty());
    }

    #[test]
    fn parser_drops_oversized_frames_and_recovers() {
        let mut parser = SseParser::default();
        assert!(parser.feed(&vec![b'x'; 70 * 1024]).is_empty());
        assert!(parser.buffer.is_empty());

        let long_data = format!("event: claimSuccess\ndata: {}\n", "y".repeat(MAX_PENDING_BYTES));
        assert!(parser.feed(long_data.as_bytes()).is_empty());
        assert!(parser.data.is_empty() && parser.event.is_none());

        let events = parser.feed(b"\nevent: claimSuccess\ndata: {\"terminalId\":\"3\",\"posNo\":\"INV-9\",\"message\":\"ok\"}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].pos_no, "INV-9");
    }

    #[tokio::test]
    async fn push_watch_forwards_only_matching_key() {
        let channel = Arc::new(BroadcastChannel::new(16));
        let transport = PushTransport::new(channel.clone());
        let key = ClaimKey { terminal_id: "3".into(), pos_no: "INV-1".into() };
        let mut watch = transport.watch(&key).await.unwrap();

        channel.publish(event("4", "INV-1"));
        channel.publish(event("3", "INV-2"));
        channel.publish(event("3", "INV-1"));

        let confirmed = watch.next().await.unwrap().unwrap();
        assert_eq!(confirmed.key, key);
        assert_eq!(confirmed.message, "credited INV-1");
        assert!(watch.next().await.is_none());
    }

    #[tokio::test]
    async fn stopping_the_watch_unsubscribes() {
        let channel = Arc::new(BroadcastChannel::new(16));
        let transport = PushTransport::new(channel.clone());
        let key = ClaimKey { terminal_id: "1".into(), pos_no: "A".into() };

        let mut watch = transport.watch(&key).await.unwrap();
        assert_eq!(channel.subscriber_count(), 1);
        watch.stop();
        assert_eq!(channel.subscriber_count(), 0);
        assert_eq!(channel.publish(event("1", "A")), 0);
    }
}
