//! Supervisor that keeps one client session alive for all feature handlers.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::connection::{ConnectError, EventConnection};
use super::handler::FeatureHandler;
use super::lockfile::{CredentialResolver, SessionCredential};
use super::presence::PresenceDetector;

/// How often presence is checked while waiting for the client.
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Pause after the lock file could not be read.
const CREDENTIAL_RETRY: Duration = Duration::from_secs(2);
/// Pause after a failed handshake or a panic in the session path.
const ERROR_PAUSE: Duration = Duration::from_secs(5);
/// Pause after a session ends, so a fast client restart is not raced.
const RECONNECT_PAUSE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorState {
    WaitingForApp,
    Connected,
    Stopped,
}

impl ConnectorState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectorState::WaitingForApp => "waiting",
            ConnectorState::Connected => "connected",
            ConnectorState::Stopped => "stopped",
        }
    }
}

/// Opens a session for a credential.
#[async_trait]
pub trait Connect: Send + Sync {
    async fn connect(&self, credential: &SessionCredential) -> Result<EventConnection, ConnectError>;
}

/// Connects over the client's TLS WebSocket.
pub struct WebSocketConnect;

#[async_trait]
impl Connect for WebSocketConnect {
    async fn connect(&self, credential: &SessionCredential) -> Result<EventConnection, ConnectError> {
        EventConnection::connect(credential).await
    }
}

enum SessionOutcome {
    Ended,
    ConnectFailed,
    Stopped,
}

pub struct Connector {
    presence: Arc<dyn PresenceDetector>,
    resolver: Arc<dyn CredentialResolver>,
    connect: Arc<dyn Connect>,
    handlers: Vec<Arc<dyn FeatureHandler>>,
}

impl Connector {
    pub fn new(
        presence: Arc<dyn PresenceDetector>,
        resolver: Arc<dyn CredentialResolver>,
        connect: Arc<dyn Connect>,
        handlers: Vec<Arc<dyn FeatureHandler>>,
    ) -> Self {
        Self {
            presence,
            resolver,
            connect,
            handlers,
        }
    }

    /// Starts the supervisor task. Must be called from within a tokio runtime.
    pub fn spawn(self) -> ConnectorHandle {
        let token = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(ConnectorState::WaitingForApp);
        let join = tokio::spawn(self.run(token.clone(), state_tx));
        ConnectorHandle {
            token,
            state_rx,
            join,
        }
    }

    async fn run(self, stop: CancellationToken, state: watch::Sender<ConnectorState>) {
        let names: Vec<&str> = self.handlers.iter().map(|h| h.name()).collect();
        tracing::info!(handlers = ?names, "connector started");

        while !stop.is_cancelled() {
            publish(&state, ConnectorState::WaitingForApp);

            if !self.presence.is_target_running() {
                pause(&stop, POLL_INTERVAL).await;
                continue;
            }

            let Some(credential) = self.resolver.resolve() else {
                tracing::debug!("client window present but no usable lock file yet");
                pause(&stop, CREDENTIAL_RETRY).await;
                continue;
            };

            let outcome = AssertUnwindSafe(self.session(&credential, &stop, &state))
                .catch_unwind()
                .await;
            let wait = match outcome {
                Ok(SessionOutcome::Stopped) => break,
                Ok(SessionOutcome::Ended) => RECONNECT_PAUSE,
                Ok(SessionOutcome::ConnectFailed) => ERROR_PAUSE,
                Err(panic) => {
                    tracing::error!(panic = panic_message(panic.as_ref()), "session path panicked");
                    self.disconnect_handlers();
                    ERROR_PAUSE
                }
            };
            pause(&stop, wait).await;
        }

        publish(&state, ConnectorState::Stopped);
        tracing::info!("connector stopped");
    }

    async fn session(
        &self,
        credential: &SessionCredential,
        stop: &CancellationToken,
        state: &watch::Sender<ConnectorState>,
    ) -> SessionOutcome {
        let connected = tokio::select! {
            biased;
            _ = stop.cancelled() => return SessionOutcome::Stopped,
            connected = self.connect.connect(credential) => connected,
        };
        let mut conn = match connected {
            Ok(conn) => conn.with_stop_token(stop.child_token()),
            Err(e) => {
                tracing::warn!(port = credential.port, error = %e, "failed to connect to client");
                return SessionOutcome::ConnectFailed;
            }
        };

        for handler in &self.handlers {
            handler.on_session_start();
            handler.register_subscriptions(&mut conn);
        }
        tracing::debug!(subscriptions = conn.subscription_count(), "handlers registered");

        let port = credential.port;
        conn.on_ready(move |_api| async move {
            tracing::info!(port, "connected to client");
        });
        let handlers = self.handlers.clone();
        conn.on_close(move |_api| async move {
            for handler in &handlers {
                handler.on_disconnect();
            }
        });

        publish(state, ConnectorState::Connected);
        let reason = conn.run().await;
        tracing::info!(%reason, "client session ended");

        if stop.is_cancelled() {
            return SessionOutcome::Stopped;
        }
        publish(state, ConnectorState::WaitingForApp);
        SessionOutcome::Ended
    }

    fn disconnect_handlers(&self) {
        for handler in &self.handlers {
            handler.on_disconnect();
        }
    }
}

/// Stores `next` and wakes receivers only when it differs from the current
/// state.
fn publish(state: &watch::Sender<ConnectorState>, next: ConnectorState) {
    state.send_if_modified(|current| std::mem::replace(current, next) != next);
}

/// Sleeps for `duration` or until `stop` fires.
async fn pause(stop: &CancellationToken, duration: Duration) {
    tokio::select! {
        _ = stop.cancelled() => {}
        _ = tokio::time::sleep(duration) => {}
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic>")
}

/// Controls a spawned [`Connector`].
pub struct ConnectorHandle {
    token: CancellationToken,
    state_rx: watch::Receiver<ConnectorState>,
    join: JoinHandle<()>,
}

impl ConnectorHandle {
    /// Requests a stop. Idempotent; the loop never reconnects afterwards.
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn state(&self) -> ConnectorState {
        *self.state_rx.borrow()
    }

    /// Receiver that observes every state change.
    pub fn subscribe(&self) -> watch::Receiver<ConnectorState> {
        self.state_rx.clone()
    }

    #[cfg(test)]
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Waits for the supervisor task to exit.
    pub async fn join(self) {
        if let Err(e) = self.join.await {
            tracing::error!(error = %e, "connector task failed");
        }
    }
}
