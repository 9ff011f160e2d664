//! One-shot delayed action with a race-free cancel.
//!
//! Firing and cancelling both go through a single compare-and-swap on the
//! action's state, so exactly one of them wins: once [`DelayedAction::cancel`]
//! returns `true` the action can no longer run, and when it returns `false`
//! the action had already started.

use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const ARMED: u8 = 0;
const FIRED: u8 = 1;
const CANCELLED: u8 = 2;

/// A spawned task that runs `action` after `delay` unless cancelled first.
/// Dropping the handle cancels it.
pub struct DelayedAction {
    state: Arc<AtomicU8>,
    token: CancellationToken,
    handle: JoinHandle<()>,
    delay: Duration,
}

impl DelayedAction {
    /// Must be called from within a tokio runtime.
    pub fn schedule<F, Fut>(delay: Duration, action: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let state = Arc::new(AtomicU8::new(ARMED));
        let token = CancellationToken::new();

        let task_state = Arc::clone(&state);
        let task_token = token.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = task_token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            if task_state
                .compare_exchange(ARMED, FIRED, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }
            action().await;
        });

        Self {
            state,
            token,
            handle,
            delay,
        }
    }

    /// Cancels the action. Returns `true` if it had not fired yet (and now
    /// never will), `false` if it already fired or was already cancelled.
    pub fn cancel(&self) -> bool {
        let won = self
            .state
            .compare_exchange(ARMED, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        self.token.cancel();
        won
    }

    #[cfg(test)]
    pub fn has_fired(&self) -> bool {
        self.state.load(Ordering::Acquire) == FIRED
    }

    #[cfg(test)]
    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED
    }

    /// `true` once the task has exited: fired and completed, or cancelled.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl Drop for DelayedAction {
    fn drop(&mut self) {
        self.cancel();
    }
}
