//! Automatic ready-check acceptance.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::api::{accept_ready_check, Requester};
use super::connection::EventConnection;
use super::event::{EventKind, EventKinds, LcuEvent, Topic};
use super::handler::FeatureHandler;
use crate::config::SharedSettings;

pub const READY_CHECK_URI: &str = "/lol-matchmaking/v1/ready-check";

/// What a ready-check event led to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyCheckOutcome {
    Reset,
    AlreadyAccepted,
    Disabled,
    Accepted,
    Failed,
}

/// Accepts each ready check at most once.
#[derive(Clone)]
pub struct ReadyCheckHandler {
    settings: SharedSettings,
    accepted: Arc<AtomicBool>,
}

impl ReadyCheckHandler {
    pub fn new(settings: SharedSettings) -> Self {
        Self {
            settings,
            accepted: Arc::new(AtomicBool::new(false)),
        }
    }

    #[cfg(test)]
    pub fn accepted_this_check(&self) -> bool {
        self.accepted.load(Ordering::Acquire)
    }

    pub async fn handle(&self, api: &dyn Requester, event: &LcuEvent) -> ReadyCheckOutcome {
        if event.kind == EventKind::Delete {
            self.accepted.store(false, Ordering::Release);
            tracing::debug!("ready check ended");
            return ReadyCheckOutcome::Reset;
        }

        if self.accepted.load(Ordering::Acquire) {
            return ReadyCheckOutcome::AlreadyAccepted;
        }

        if !self.settings.read().await.auto_accept_enabled {
            tracing::debug!("auto-accept disabled, leaving ready check alone");
            return ReadyCheckOutcome::Disabled;
        }

        if self.accepted.swap(true, Ordering::AcqRel) {
            return ReadyCheckOutcome::AlreadyAccepted;
        }

        match accept_ready_check(api).await {
            Ok(()) => {
                tracing::info!("ready check accepted");
                ReadyCheckOutcome::Accepted
            }
            Err(e) => {
                // Let the next ready-check event try again.
                self.accepted.store(false, Ordering::Release);
                tracing::warn!(error = %e, "failed to accept ready check");
                ReadyCheckOutcome::Failed
            }
        }
    }
}

impl FeatureHandler for ReadyCheckHandler {
    fn name(&self) -> &'static str {
        "ready-check"
    }

    fn on_session_start(&self) {
        self.accepted.store(false, Ordering::Release);
    }

    fn register_subscriptions(&self, conn: &mut EventConnection) {
        let this = self.clone();
        conn.subscribe(
            Topic::exact(READY_CHECK_URI),
            EventKinds::ALL,
            move |api: Arc<dyn Requester>, event: LcuEvent| {
                let this = this.clone();
                async move {
                    this.handle(api.as_ref(), &event).await;
                    Ok(())
                }
            },
        );
    }

    fn on_disconnect(&self) {
        self.accepted.store(false, Ordering::Release);
    }
}
