//! In-process message bus.
//!
//! Each registered channel owns a worker task that receives request
//! envelopes and runs the channel's service once per request. Callers get a
//! [`PendingReply`] back; dropping it (for example on timeout) cancels the
//! in-progress service call and releases the pending slot.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::bus::message::{ChannelResponse, ServiceRequest};
use crate::bus::service::FabricService;

/// Per-channel request queue depth.
const CHANNEL_CAPACITY: usize = 1024;

/// Errors from bus operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    /// Nobody listens on the channel.
    #[error("channel {0} does not exist")]
    ChannelNotFound(String),

    /// A service already listens on the channel.
    #[error("channel {0} already has a service")]
    DuplicateChannel(String),

    /// The channel was closed while the request was queued.
    #[error("channel {0} is closed")]
    Closed(String),

    /// No reply within the deadline.
    #[error("no reply within {0:?}")]
    Timeout(Duration),

    /// The service dropped the request without replying (panic or cancel).
    #[error("service dropped the request without replying")]
    Dropped,
}

struct Envelope {
    request: ServiceRequest,
    reply: oneshot::Sender<ChannelResponse>,
}

struct ChannelHandle {
    tx: mpsc::Sender<Envelope>,
    service: Arc<dyn FabricService>,
    worker: JoinHandle<()>,
}

/// Channel registry and request/response transport.
pub struct MessageBus {
    channels: DashMap<String, ChannelHandle>,
    pending: Arc<AtomicUsize>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Open `channel` and bind `service` to it.
    ///
    /// Must be called from within a Tokio runtime (the worker is spawned).
    pub fn register(
        &self,
        channel: &str,
        service: Arc<dyn FabricService>,
    ) -> Result<(), BusError> {
        match self.channels.entry(channel.to_string()) {
            Entry::Occupied(_) => Err(BusError::DuplicateChannel(channel.to_string())),
            Entry::Vacant(slot) => {
                let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
                let worker = tokio::spawn(run_channel(channel.to_string(), service.clone(), rx));
                slot.insert(ChannelHandle {
                    tx,
                    service,
                    worker,
                });
                tracing::debug!(channel = %channel, "Bus channel opened");
                Ok(())
            }
        }
    }

    pub fn has_channel(&self, channel: &str) -> bool {
        self.channels.contains_key(channel)
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.key().clone()).collect()
    }

    /// Services currently bound to channels.
    pub fn services(&self) -> Vec<Arc<dyn FabricService>> {
        self.channels.iter().map(|c| c.service.clone()).collect()
    }

    /// Queue a request on `channel`.
    pub async fn request(
        &self,
        channel: &str,
        request: ServiceRequest,
    ) -> Result<PendingReply, BusError> {
        // Clone the sender so no map shard lock is held across the await.
        let tx = self
            .channels
            .get(channel)
            .map(|c| c.tx.clone())
            .ok_or_else(|| BusError::ChannelNotFound(channel.to_string()))?;

        let guard = PendingGuard::new(self.pending.clone());
        let (reply, rx) = oneshot::channel();
        tx.send(Envelope { request, reply })
            .await
            .map_err(|_| BusError::Closed(channel.to_string()))?;

        Ok(PendingReply { rx, _guard: guard })
    }

    /// Requests awaiting a reply right now.
    pub fn pending_requests(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Close one channel; queued requests see [`BusError::Dropped`].
    pub fn close_channel(&self, channel: &str) -> bool {
        match self.channels.remove(channel) {
            Some((_, handle)) => {
                handle.worker.abort();
                tracing::debug!(channel = %channel, "Bus channel closed");
                true
            }
            None => false,
        }
    }

    /// Close every channel.
    pub fn close(&self) {
        for channel in self.channel_names() {
            self.close_channel(&channel);
        }
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_channel(
    channel: String,
    service: Arc<dyn FabricService>,
    mut rx: mpsc::Receiver<Envelope>,
) {
    while let Some(Envelope { request, mut reply }) = rx.recv().await {
        let service = service.clone();
        let channel = channel.clone();
        tokio::spawn(async move {
            let request_id = request.id;
            let outcome = tokio::select! {
                result = service.handle_request(request) => Some(result),
                _ = reply.closed() => None,
            };

            match outcome {
                Some(result) => {
                    let _ = reply.send(ChannelResponse::from_result(result));
                }
                None => {
                    tracing::debug!(
                        channel = %channel,
                        request_id = %request_id,
                        "Requester went away, service call cancelled"
                    );
                }
            }
        });
    }
}

/// Decrements the pending counter when the reply is consumed or abandoned.
struct PendingGuard(Arc<AtomicUsize>);

impl PendingGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A reply that has not arrived yet.
pub struct PendingReply {
    rx: oneshot::Receiver<ChannelResponse>,
    _guard: PendingGuard,
}

impl PendingReply {
    /// Wait up to `timeout`. On timeout the receiver is dropped, which
    /// cancels the service call.
    pub async fn wait(self, timeout: Duration) -> Result<ChannelResponse, BusError> {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(BusError::Dropped),
            Err(_) => Err(BusError::Timeout(timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::message::{ServiceError, ServiceResponse};
    use crate::bus::service::service_fn;
    use axum::http::StatusCode;
    use serde_json::{json, Value};
    use std::sync::atomic::AtomicBool;

    fn echo() -> Arc<dyn FabricService> {
        service_fn(|req: ServiceRequest| async move {
            let payload = req.body.clone();
            Ok(ServiceResponse::ok(&req, payload))
        })
    }

    #[tokio::test]
    async fn request_reply_round_trip() {
        let bus = MessageBus::new();
        bus.register("echo", echo()).unwrap();

        let reply = bus
            .request("echo", ServiceRequest::new("echo", json!({"n": 1})))
            .await
            .unwrap()
            .wait(Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(reply.message.unwrap().payload, json!({"n": 1}));
        assert_eq!(bus.pending_requests(), 0);
    }

    #[tokio::test]
    async fn duplicate_channel_keeps_first_service() {
        let bus = MessageBus::new();
        bus.register("echo", echo()).unwrap();

        let failing = service_fn(|_req: ServiceRequest| async {
            Err(ServiceError::new(StatusCode::BAD_REQUEST, "second"))
        });
        assert_eq!(
            bus.register("echo", failing).unwrap_err(),
            BusError::DuplicateChannel("echo".into())
        );

        let reply = bus
            .request("echo", ServiceRequest::new("echo", json!("still first")))
            .await
            .unwrap()
            .wait(Duration::from_secs(1))
            .await
            .unwrap();
        assert!(reply.error.is_none());
    }

    #[tokio::test]
    async fn unknown_channel() {
        let bus = MessageBus::new();
        let err = bus
            .request("missing", ServiceRequest::new("missing", Value::Null))
            .await
            .err()
            .unwrap();
        assert_eq!(err, BusError::ChannelNotFound("missing".into()));
    }

    #[tokio::test]
    async fn timeout_cancels_service_and_releases_pending() {
        let bus = MessageBus::new();
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        bus.register(
            "silent",
            service_fn(move |req: ServiceRequest| {
                let flag = flag.clone();
                async move {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    flag.store(true, Ordering::SeqCst);
                    Ok(ServiceResponse::ok(&req, Value::Null))
                }
            }),
        )
        .unwrap();

        for _ in 0..5 {
            let pending = bus
                .request("silent", ServiceRequest::new("silent", Value::Null))
                .await
                .unwrap();
            let err = pending.wait(Duration::from_millis(20)).await.unwrap_err();
            assert_eq!(err, BusError::Timeout(Duration::from_millis(20)));
        }

        assert_eq!(bus.pending_requests(), 0);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn panicking_service_is_dropped_reply() {
        let bus = MessageBus::new();
        bus.register(
            "boom",
            service_fn(|req: ServiceRequest| async move {
                if req.body.is_null() {
                    panic!("service exploded");
                }
                Err(ServiceError::new(StatusCode::INTERNAL_SERVER_ERROR, ""))
            }),
        )
        .unwrap();

        let err = bus
            .request("boom", ServiceRequest::new("boom", Value::Null))
            .await
            .unwrap()
            .wait(Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err, BusError::Dropped);
    }

    #[tokio::test]
    async fn close_removes_channels() {
        let bus = MessageBus::new();
        bus.register("a", echo()).unwrap();
        bus.register("b", echo()).unwrap();
        assert_eq!(bus.services().len(), 2);

        bus.close();
        assert!(!bus.has_channel("a"));
        assert!(bus.channel_names().is_empty());
    }
}
