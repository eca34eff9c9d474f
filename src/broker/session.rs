//! Per-connection STOMP session.
//!
//! # Destinations
//! ```text
//! SEND /pub/queue/<channel>  → bus request; reply to this session's /queue/<channel> subscriptions
//! SEND /pub/<channel>        → bus request; reply broadcast on /topic/<channel>
//! SEND /topic/<name>         → broadcast to /topic/<name> subscribers
//! ```
//! Prefixes come from the endpoint configuration. The session is transport
//! agnostic: frames in through [`Session::on_frame`], frames out through the
//! outbound channel it was built with.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::broker::frame::{Command, Frame};
use crate::bus::{ChannelResponse, MessageBus, ServiceRequest};
use crate::bus::message::body_to_value;
use crate::config::EndpointConfig;
use crate::net::ConnectionId;
use crate::routing::matcher::PrefixMatcher;

pub const STOMP_VERSION: &str = "1.2";

#[derive(Debug, Clone)]
struct Subscriber {
    session: ConnectionId,
    id: String,
    tx: mpsc::UnboundedSender<Frame>,
}

/// Destination → subscribers, shared by all sessions of one broker.
#[derive(Debug, Default)]
pub struct Subscriptions {
    by_destination: DashMap<String, Vec<Subscriber>>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    fn subscribe(&self, destination: &str, subscriber: Subscriber) {
        self.by_destination
            .entry(destination.to_string())
            .or_default()
            .push(subscriber);
    }

    fn unsubscribe(&self, session: ConnectionId, id: &str) -> bool {
        let mut removed = false;
        self.by_destination.retain(|_, subs| {
            let before = subs.len();
            subs.retain(|s| !(s.session == session && s.id == id));
            removed |= subs.len() != before;
            !subs.is_empty()
        });
        removed
    }

    fn remove_session(&self, session: ConnectionId) {
        self.by_destination.retain(|_, subs| {
            subs.retain(|s| s.session != session);
            !subs.is_empty()
        });
    }

    pub fn subscriber_count(&self, destination: &str) -> usize {
        self.by_destination
            .get(destination)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }

    /// Send a MESSAGE to every subscriber of `destination` (or only those of
    /// `only`). Returns the number of frames queued.
    fn deliver(
        &self,
        destination: &str,
        only: Option<ConnectionId>,
        headers: &[(String, String)],
        body: &[u8],
    ) -> usize {
        // Snapshot so no shard lock is held while sending.
        let subscribers: Vec<Subscriber> = match self.by_destination.get(destination) {
            Some(subs) => subs
                .iter()
                .filter(|s| only.map_or(true, |session| s.session == session))
                .cloned()
                .collect(),
            None => return 0,
        };

        let message_id = Uuid::new_v4().to_string();
        subscribers
            .into_iter()
            .filter(|s| {
                let mut frame = Frame::new(Command::Message)
                    .header("destination", destination)
                    .header("subscription", s.id.clone())
                    .header("message-id", message_id.clone());
                frame.headers.extend(headers.iter().cloned());
                s.tx.send(frame.body(body.to_vec())).is_ok()
            })
            .count()
    }
}

/// State shared by every session of one broker.
pub struct BrokerShared {
    pub bus: Arc<MessageBus>,
    pub config: EndpointConfig,
    pub subscriptions: Subscriptions,
    pub request_timeout: Duration,
}

impl BrokerShared {
    pub fn new(bus: Arc<MessageBus>, config: EndpointConfig, request_timeout: Duration) -> Self {
        Self {
            bus,
            config,
            subscriptions: Subscriptions::new(),
            request_timeout,
        }
    }
}

/// What the transport should do after a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

enum Target {
    /// Reply only to this session on the user queue.
    Queue(String),
    /// Reply broadcast on the topic.
    Topic(String),
    /// Plain broadcast.
    Publish,
}

pub struct Session {
    id: ConnectionId,
    shared: Arc<BrokerShared>,
    outbound: mpsc::UnboundedSender<Frame>,
    connected: bool,
    heartbeat: Option<Duration>,
}

impl Session {
    pub fn new(
        id: ConnectionId,
        shared: Arc<BrokerShared>,
        outbound: mpsc::UnboundedSender<Frame>,
    ) -> Self {
        Self {
            id,
            shared,
            outbound,
            connected: false,
            heartbeat: None,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Interval at which the server should send heart-beats, once connected.
    pub fn heartbeat(&self) -> Option<Duration> {
        self.heartbeat
    }

    /// Handle raw frame bytes from the transport.
    pub fn on_bytes(&mut self, raw: &[u8]) -> Flow {
        if raw.iter().all(|b| *b == b'\n' || *b == b'\r') {
            // Client heart-beat.
            return Flow::Continue;
        }
        match Frame::parse(raw) {
            Ok(frame) => self.on_frame(frame),
            Err(e) => self.fail(e),
        }
    }

    pub fn on_frame(&mut self, frame: Frame) -> Flow {
        tracing::trace!(session = %self.id, command = %frame.command, "Frame received");

        match frame.command {
            Command::Connect | Command::Stomp => return self.connect(&frame),
            _ if !self.connected => return self.fail("not connected"),
            _ => {}
        }

        let flow = match frame.command {
            Command::Subscribe => self.subscribe(&frame),
            Command::Unsubscribe => self.unsubscribe(&frame),
            Command::Send => self.send(&frame),
            Command::Disconnect => {
                self.receipt(&frame);
                return Flow::Close;
            }
            Command::Ack | Command::Nack | Command::Begin | Command::Commit | Command::Abort => {
                Flow::Continue
            }
            other => return self.fail(format_args!("{} is a server frame", other)),
        };

        if flow == Flow::Continue {
            self.receipt(&frame);
        }
        flow
    }

    fn connect(&mut self, frame: &Frame) -> Flow {
        if self.connected {
            return self.fail("already connected");
        }
        if let Some(versions) = frame.get("accept-version") {
            if !versions.split(',').any(|v| v.trim() == STOMP_VERSION) {
                return self.fail(format_args!("supported protocol version is {}", STOMP_VERSION));
            }
        }

        let server_ms = self.shared.config.heartbeat_ms;
        self.heartbeat = negotiate_heartbeat(frame.get("heart-beat"), server_ms);
        self.connected = true;

        self.push(
            Frame::new(Command::Connected)
                .header("version", STOMP_VERSION)
                .header("heart-beat", format!("{},{}", server_ms, server_ms))
                .header("server", concat!("switchyard/", env!("CARGO_PKG_VERSION")))
                .header("session", self.id.to_string()),
        );
        tracing::debug!(session = %self.id, heartbeat = ?self.heartbeat, "Broker session connected");
        Flow::Continue
    }

    fn subscribe(&mut self, frame: &Frame) -> Flow {
        let (Some(destination), Some(id)) = (frame.get("destination"), frame.get("id")) else {
            return self.fail("SUBSCRIBE requires destination and id");
        };
        self.shared.subscriptions.subscribe(
            destination,
            Subscriber {
                session: self.id,
                id: id.to_string(),
                tx: self.outbound.clone(),
            },
        );
        tracing::debug!(session = %self.id, destination, subscription = id, "Subscribed");
        Flow::Continue
    }

    fn unsubscribe(&mut self, frame: &Frame) -> Flow {
        let Some(id) = frame.get("id") else {
            return self.fail("UNSUBSCRIBE requires id");
        };
        if !self.shared.subscriptions.unsubscribe(self.id, id) {
            tracing::debug!(session = %self.id, subscription = id, "Unknown subscription");
        }
        Flow::Continue
    }

    fn send(&mut self, frame: &Frame) -> Flow {
        let Some(destination) = frame.get("destination") else {
            return self.fail("SEND requires destination");
        };

        let target = match self.classify(destination) {
            Some(target) => target,
            None => return self.fail(format_args!("unknown destination {}", destination)),
        };

        match target {
            Target::Publish => {
                let headers = passthrough_headers(frame);
                self.shared
                    .subscriptions
                    .deliver(destination, None, &headers, &frame.body);
            }
            Target::Queue(channel) => {
                let reply_to = join(&self.shared.config.user_queue_prefix, &channel);
                self.request(channel, reply_to, Some(self.id), frame);
            }
            Target::Topic(channel) => {
                let reply_to = join(&self.shared.config.topic_prefix, &channel);
                self.request(channel, reply_to, None, frame);
            }
        }
        Flow::Continue
    }

    fn classify(&self, destination: &str) -> Option<Target> {
        let config = &self.shared.config;
        let channel_under = |prefix: &str| -> Option<String> {
            let matcher = PrefixMatcher::new(prefix);
            if !matcher.matches(destination) {
                return None;
            }
            let rest = matcher.strip(destination).trim_matches('/');
            (!rest.is_empty()).then(|| rest.to_string())
        };

        // The queue prefix nests under the request prefix, so test it first.
        if let Some(channel) = channel_under(&config.app_request_queue_prefix) {
            return Some(Target::Queue(channel));
        }
        if let Some(channel) = channel_under(&config.app_request_prefix) {
            return Some(Target::Topic(channel));
        }
        channel_under(&config.topic_prefix).map(|_| Target::Publish)
    }

    fn request(&self, channel: String, reply_to: String, only: Option<ConnectionId>, frame: &Frame) {
        let mut request = ServiceRequest::new(channel.clone(), body_to_value(&frame.body));
        request.uri = frame.get("destination").unwrap_or_default().to_string();
        request.headers = frame
            .headers
            .iter()
            .cloned()
            .collect::<HashMap<String, String>>();
        let request_id = request.id;

        let shared = self.shared.clone();
        let session = self.id;
        let outbound = self.outbound.clone();
        tokio::spawn(async move {
            let reply = match shared.bus.request(&channel, request).await {
                Ok(pending) => pending.wait(shared.request_timeout).await,
                Err(e) => Err(e),
            };

            let (status, body) = match reply {
                Ok(response) => encode_reply(response),
                Err(e) => {
                    tracing::warn!(session = %session, channel = %channel, request_id = %request_id, error = %e, "Broker request failed");
                    let _ = outbound.send(Frame::error(e.to_string()).header("request-id", request_id.to_string()));
                    return;
                }
            };

            let headers = vec![
                ("content-type".to_string(), "application/json".to_string()),
                ("request-id".to_string(), request_id.to_string()),
                ("status".to_string(), status.to_string()),
            ];
            let delivered = shared.subscriptions.deliver(&reply_to, only, &headers, &body);
            if delivered == 0 {
                tracing::debug!(session = %session, destination = %reply_to, "Reply had no subscribers");
            }
        });
    }

    fn receipt(&self, frame: &Frame) {
        if let Some(receipt) = frame.get("receipt") {
            self.push(Frame::new(Command::Receipt).header("receipt-id", receipt));
        }
    }

    fn fail(&mut self, reason: impl std::fmt::Display) -> Flow {
        tracing::debug!(session = %self.id, reason = %reason, "Broker session error");
        self.push(Frame::error(reason.to_string()));
        Flow::Close
    }

    fn push(&self, frame: Frame) {
        let _ = self.outbound.send(frame);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shared.subscriptions.remove_session(self.id);
    }
}

fn encode_reply(response: ChannelResponse) -> (u16, Vec<u8>) {
    let (status, value) = match (response.message, response.error) {
        (_, Some(error)) => (
            error.status().as_u16(),
            serde_json::json!({ "error": error.message }),
        ),
        (Some(message), None) => (message.status, message.payload),
        (None, None) => (204, serde_json::Value::Null),
    };
    (status, serde_json::to_vec(&value).unwrap_or_default())
}

fn passthrough_headers(frame: &Frame) -> Vec<(String, String)> {
    frame
        .headers
        .iter()
        .filter(|(name, _)| !matches!(name.as_str(), "destination" | "receipt" | "content-length"))
        .cloned()
        .collect()
}

fn join(prefix: &str, channel: &str) -> String {
    format!("{}/{}", prefix.trim_end_matches('/'), channel)
}

/// Server send interval: the larger of both sides' wishes, off when either is 0.
fn negotiate_heartbeat(client: Option<&str>, server_ms: u64) -> Option<Duration> {
    let wants = client
        .and_then(|hb| hb.split_once(','))
        .and_then(|(_, cy)| cy.trim().parse::<u64>().ok())
        .unwrap_or(0);
    if wants == 0 || server_ms == 0 {
        return None;
    }
    Some(Duration::from_millis(wants.max(server_ms)))
}
