//! One persistent event session with the client.
//!
//! An [`EventConnection`] owns the socket for a session plus the HTTPS
//! [`Requester`] bound to the same origin. Subscriptions and lifecycle hooks
//! are registered before [`EventConnection::run`], which then becomes the
//! session's single dispatch context: callbacks for one event complete before
//! the next frame is read, and callbacks never run concurrently with each
//! other.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::prelude::{Engine as _, BASE64_STANDARD};
use futures::future::BoxFuture;
use futures::{FutureExt, SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::api::{LcuApi, Requester};
use super::event::{decode_frame, subscribe_frame, EventKinds, LcuEvent, Topic};
use super::lockfile::{SessionCredential, LCU_USERNAME};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Upper bound on a single callback, including any requests it awaits.
const DISPATCH_TIMEOUT: Duration = Duration::from_secs(10);
/// How long a local stop waits for the close handshake.
const STOP_GRACE: Duration = Duration::from_secs(1);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Per-topic event callback. Receives the session's requester and the event.
pub type EventCallback =
    Arc<dyn Fn(Arc<dyn Requester>, LcuEvent) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Fired once when the session becomes ready or once when it ends.
pub type LifecycleCallback = Box<dyn FnOnce(Arc<dyn Requester>) -> BoxFuture<'static, ()> + Send>;

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("TLS setup failed: {0}")]
    Tls(#[from] native_tls::Error),
    #[error("HTTP client setup failed: {0}")]
    Client(#[from] reqwest::Error),
    #[error("invalid auth header: {0}")]
    Header(#[from] tokio_tungstenite::tungstenite::http::header::InvalidHeaderValue),
    #[error("websocket handshake failed: {0}")]
    Handshake(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Why [`EventConnection::run`] returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The stop token was cancelled locally.
    Stopped,
    /// The peer closed the socket.
    PeerClosed,
    /// Reading from the socket failed.
    Failed(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Stopped => f.write_str("stopped"),
            CloseReason::PeerClosed => f.write_str("peer closed"),
            CloseReason::Failed(error) => write!(f, "failed: {error}"),
        }
    }
}

/// Source of raw text frames for a session.
#[async_trait]
pub trait EventTransport: Send {
    /// Next text frame; `None` once the peer has closed.
    async fn next_frame(&mut self) -> Option<Result<String, ConnectionError>>;

    /// Starts a graceful close.
    async fn close(&mut self);
}

/// The real transport: a TLS WebSocket to the client.
pub struct WsTransport {
    stream: WsStream,
}

#[async_trait]
impl EventTransport for WsTransport {
    async fn next_frame(&mut self) -> Option<Result<String, ConnectionError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                Ok(Message::Close(_)) => return None,
                Ok(_) => continue,
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}

struct Subscription {
    topic: Topic,
    kinds: EventKinds,
    callback: EventCallback,
}

pub struct EventConnection {
    transport: Box<dyn EventTransport>,
    requester: Arc<dyn Requester>,
    subscriptions: Vec<Subscription>,
    ready: Vec<LifecycleCallback>,
    close: Vec<LifecycleCallback>,
    stop: CancellationToken,
}

impl EventConnection {
    pub fn new(transport: Box<dyn EventTransport>, requester: Arc<dyn Requester>) -> Self {
        Self {
            transport,
            requester,
            subscriptions: Vec::new(),
            ready: Vec::new(),
            close: Vec::new(),
            stop: CancellationToken::new(),
        }
    }

    /// Opens the session socket for `credential` and subscribes to all API
    /// events.
    pub async fn connect(credential: &SessionCredential) -> Result<Self, ConnectError> {
        let api = LcuApi::new(credential)?;

        // Loopback service with a self-signed certificate.
        let tls = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()?;

        let mut request = credential.websocket_url().into_client_request()?;
        let auth = BASE64_STANDARD.encode(format!("{LCU_USERNAME}:{}", credential.password));
        request
            .headers_mut()
            .insert(AUTHORIZATION, HeaderValue::from_str(&format!("Basic {auth}"))?);

        let handshake = tokio_tungstenite::connect_async_tls_with_config(
            request,
            None,
            false,
            Some(Connector::NativeTls(tls)),
        );
        let (mut stream, _response) = tokio::time::timeout(CONNECT_TIMEOUT, handshake)
            .await
            .map_err(|_| ConnectError::Timeout(CONNECT_TIMEOUT))??;

        stream.send(Message::Text(subscribe_frame().into())).await?;
        tracing::debug!(port = credential.port, "websocket session open");

        Ok(Self::new(Box::new(WsTransport { stream }), Arc::new(api)))
    }

    /// Replaces the stop token, typically with a child of a supervisor token.
    pub fn with_stop_token(mut self, token: CancellationToken) -> Self {
        self.stop = token;
        self
    }

    /// Token that ends [`run`](Self::run) when cancelled. Safe to cancel from
    /// any thread.
    #[cfg(test)]
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Requests a graceful shutdown.
    #[cfg(test)]
    pub fn stop(&self) {
        self.stop.cancel();
    }

    #[cfg(test)]
    pub fn requester(&self) -> Arc<dyn Requester> {
        Arc::clone(&self.requester)
    }

    #[cfg(test)]
    pub async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<super::api::ApiResponse, super::api::RequestError> {
        self.requester.request(method, path, body).await
    }

    /// Registers `callback` for events on `topic` whose kind is in `kinds`.
    /// Registering the same topic again adds another callback.
    pub fn subscribe<F, Fut>(&mut self, topic: Topic, kinds: EventKinds, callback: F)
    where
        F: Fn(Arc<dyn Requester>, LcuEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.subscriptions.push(Subscription {
            topic,
            kinds,
            callback: Arc::new(move |api, event| callback(api, event).boxed()),
        });
    }

    pub fn on_ready<F, Fut>(&mut self, callback: F)
    where
        F: FnOnce(Arc<dyn Requester>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.ready.push(Box::new(move |api| callback(api).boxed()));
    }

    pub fn on_close<F, Fut>(&mut self, callback: F)
    where
        F: FnOnce(Arc<dyn Requester>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.close.push(Box::new(move |api| callback(api).boxed()));
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Pumps events until the peer closes, the socket fails, or the stop
    /// token is cancelled. Close callbacks fire exactly once on every path.
    pub async fn run(self) -> CloseReason {
        // Split up so the dispatch borrows never cover the transport.
        let EventConnection {
            mut transport,
            requester,
            subscriptions,
            ready,
            close,
            stop,
        } = self;

        run_lifecycle(ready, &requester, "ready").await;

        let reason = loop {
            let frame = tokio::select! {
                biased;
                _ = stop.cancelled() => break CloseReason::Stopped,
                frame = transport.next_frame() => frame,
            };

            let text = match frame {
                None => break CloseReason::PeerClosed,
                Some(Err(e)) => break CloseReason::Failed(e.to_string()),
                Some(Ok(text)) => text,
            };

            let event = match decode_frame(&text) {
                Ok(Some(event)) => event,
                Ok(None) => continue,
                Err(e) => {
                    tracing::debug!(error = %e, "skipping undecodable frame");
                    continue;
                }
            };

            // In-flight handler requests are abandoned on stop.
            tokio::select! {
                biased;
                _ = stop.cancelled() => break CloseReason::Stopped,
                _ = dispatch(&subscriptions, &requester, event) => {}
            }
        };

        if reason == CloseReason::Stopped
            && tokio::time::timeout(STOP_GRACE, transport.close())
                .await
                .is_err()
        {
            tracing::debug!("peer did not acknowledge close in time");
        }

        run_lifecycle(close, &requester, "close").await;
        reason
    }
}

async fn dispatch(subscriptions: &[Subscription], requester: &Arc<dyn Requester>, event: LcuEvent) {
    let matching = subscriptions
        .iter()
        .filter(|s| s.kinds.contains(event.kind) && s.topic.matches(&event.uri));

    for sub in matching {
        let fut = (sub.callback)(Arc::clone(requester), event.clone());
        match tokio::time::timeout(DISPATCH_TIMEOUT, AssertUnwindSafe(fut).catch_unwind()).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => tracing::warn!(
                topic = %sub.topic,
                kind = %event.kind,
                error = %format!("{e:#}"),
                "event callback failed"
            ),
            Ok(Err(_)) => tracing::error!(
                topic = %sub.topic,
                kind = %event.kind,
                "event callback panicked"
            ),
            Err(_) => tracing::warn!(
                topic = %sub.topic,
                kind = %event.kind,
                timeout = ?DISPATCH_TIMEOUT,
                "event callback timed out"
            ),
        }
    }
}

async fn run_lifecycle(
    callbacks: Vec<LifecycleCallback>,
    requester: &Arc<dyn Requester>,
    phase: &'static str,
) {
    for callback in callbacks {
        let fut = callback(Arc::clone(requester));
        match tokio::time::timeout(DISPATCH_TIMEOUT, AssertUnwindSafe(fut).catch_unwind()).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => tracing::error!(phase, "lifecycle callback panicked"),
            Err(_) => tracing::warn!(phase, "lifecycle callback timed out"),
        }
    }
}
