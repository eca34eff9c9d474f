//! Default broker acceptor: STOMP over WebSocket on the HTTP listener.
//!
//! # Responsibilities
//! - Upgrade requests at the fabric endpoint to WebSocket sessions
//! - Pump frames between the socket and the [`Session`]
//! - Send heart-beats at the negotiated interval
//! - Close every session (bounded) when the acceptor closes
//!
//! # Data Flow
//! ```text
//! Client ←── STOMP text frames ──→ run_session ←── Session (protocol) ──→ MessageBus
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{FromRequestParts, Request};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, Interval};

use crate::broker::acceptor::{BrokerAcceptor, ConnectError};
use crate::broker::frame::Frame;
use crate::broker::session::{BrokerShared, Flow, Session};
use crate::bus::MessageBus;
use crate::config::EndpointConfig;
use crate::lifecycle::{Shutdown, ShutdownSignal};
use crate::net::{ConnectionGuard, ConnectionTracker};
use crate::routing::RouteHandler;

/// STOMP subprotocols offered during the upgrade.
const STOMP_PROTOCOLS: [&str; 3] = ["v12.stomp", "v11.stomp", "v10.stomp"];

/// How long `close` waits for sessions to wind down.
const SESSION_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

struct BrokerInner {
    bus: Arc<MessageBus>,
    request_timeout: Duration,
    shared: ArcSwapOption<BrokerShared>,
    listening: AtomicBool,
    shutdown: Shutdown,
    sessions: ConnectionTracker,
}

#[derive(Clone)]
pub struct WebSocketBroker {
    inner: Arc<BrokerInner>,
}

impl WebSocketBroker {
    /// `request_timeout` bounds every bus request issued by a SEND frame.
    pub fn new(bus: Arc<MessageBus>, request_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                bus,
                request_timeout,
                shared: ArcSwapOption::empty(),
                listening: AtomicBool::new(false),
                shutdown: Shutdown::new(),
                sessions: ConnectionTracker::new(),
            }),
        }
    }

    /// Open sessions right now.
    pub fn session_count(&self) -> u64 {
        self.inner.sessions.active_count()
    }
}

impl BrokerAcceptor for WebSocketBroker {
    fn listen(&self, config: &EndpointConfig) -> BoxFuture<'_, Result<(), ConnectError>> {
        let config = config.clone();
        Box::pin(async move {
            for (name, prefix) in [
                ("topic_prefix", &config.topic_prefix),
                ("user_queue_prefix", &config.user_queue_prefix),
                ("app_request_prefix", &config.app_request_prefix),
                ("app_request_queue_prefix", &config.app_request_queue_prefix),
            ] {
                if !prefix.starts_with('/') {
                    return Err(ConnectError::InvalidConfig(format!(
                        "{} must start with '/', got {:?}",
                        name, prefix
                    )));
                }
            }

            if self.inner.listening.swap(true, Ordering::AcqRel) {
                return Err(ConnectError::AlreadyListening);
            }
            self.inner.shared.store(Some(Arc::new(BrokerShared::new(
                self.inner.bus.clone(),
                config,
                self.inner.request_timeout,
            ))));
            tracing::info!("WebSocket broker accepting sessions");
            Ok(())
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if !self.inner.listening.swap(false, Ordering::AcqRel) {
                return;
            }
            self.inner.shutdown.trigger();

            let open = self.inner.sessions.active_count();
            if !self.inner.sessions.wait_idle(SESSION_CLOSE_TIMEOUT).await {
                tracing::warn!(
                    remaining = self.inner.sessions.active_count(),
                    "Broker sessions did not close in time"
                );
            }
            self.inner.shared.store(None);
            tracing::info!(sessions_closed = open, "WebSocket broker closed");
        })
    }

    fn is_listening(&self) -> bool {
        self.inner.listening.load(Ordering::Acquire)
    }

    fn connection_handler(&self) -> Option<RouteHandler> {
        let inner = self.inner.clone();
        Some(RouteHandler::new(move |request: Request| {
            let inner = inner.clone();
            async move {
                let shared = match inner.shared.load_full() {
                    Some(shared) if inner.listening.load(Ordering::Acquire) => shared,
                    _ => return StatusCode::SERVICE_UNAVAILABLE.into_response(),
                };

                let (mut parts, _body) = request.into_parts();
                let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
                    Ok(upgrade) => upgrade,
                    Err(rejection) => return rejection.into_response(),
                };

                let guard = inner.sessions.track();
                let shutdown = inner.shutdown.subscribe();
                upgrade
                    .protocols(STOMP_PROTOCOLS)
                    .on_upgrade(move |socket| run_session(socket, shared, guard, shutdown))
                    .into_response()
            }
        }))
    }
}

async fn run_session(
    socket: WebSocket,
    shared: Arc<BrokerShared>,
    guard: ConnectionGuard,
    mut shutdown: ShutdownSignal,
) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Frame>();
    let mut session = Session::new(guard.id(), shared, tx);
    let mut heartbeat: Option<Interval> = None;

    tracing::debug!(session = %guard.id(), "Broker session opened");

    loop {
        tokio::select! {
            incoming = stream.next() => {
                let flow = match incoming {
                    Some(Ok(Message::Text(text))) => session.on_bytes(text.as_str().as_bytes()),
                    Some(Ok(Message::Binary(bytes))) => session.on_bytes(&bytes),
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => Flow::Continue,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(session = %guard.id(), error = %e, "Broker socket error");
                        break;
                    }
                };

                if heartbeat.is_none() {
                    heartbeat = session
                        .heartbeat()
                        .map(|every| interval_at(Instant::now() + every, every));
                }

                if flow == Flow::Close {
                    while let Ok(frame) = rx.try_recv() {
                        if sink.send(encode(&frame)).await.is_err() {
                            break;
                        }
                    }
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            }
            Some(frame) = rx.recv() => {
                if sink.send(encode(&frame)).await.is_err() {
                    break;
                }
            }
            _ = tick(&mut heartbeat) => {
                if sink.send(Message::Text("\n".into())).await.is_err() {
                    break;
                }
            }
            _ = shutdown.recv() => {
                let _ = sink.send(encode(&Frame::error("server shutting down"))).await;
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }

    tracing::debug!(session = %guard.id(), "Broker session closed");
    drop(session);
    drop(guard);
}

fn encode(frame: &Frame) -> Message {
    Message::Text(String::from_utf8_lossy(&frame.encode()).into_owned().into())
}

async fn tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
