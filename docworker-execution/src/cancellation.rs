//! Document cancellation: one latch, two triggers.
//!
//! A [`CancellationController`] owns the latch. It can be armed with a
//! deadline and can be fired explicitly when the coordinator asks for it.
//! Execution code only ever sees a [`CancelObserver`], which can read the
//! latch but never set it.

use std::sync::{Arc, Mutex, OnceLock};

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What fired the latch first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelTrigger {
    /// The execution deadline passed
    Deadline,
    /// `cancel_now` was called, normally for a coordinator cancel or shutdown
    Explicit,
}

impl std::fmt::Display for CancelTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancelTrigger::Deadline => write!(f, "deadline"),
            CancelTrigger::Explicit => write!(f, "explicit"),
        }
    }
}

#[derive(Debug)]
struct Latch {
    token: CancellationToken,
    trigger: OnceLock<CancelTrigger>,
}

impl Latch {
    fn fire(&self, trigger: CancelTrigger) {
        if self.trigger.set(trigger).is_ok() {
            match trigger {
                CancelTrigger::Deadline => warn!("Execution deadline reached, cancelling document"),
                CancelTrigger::Explicit => info!("Cancellation requested, cancelling document"),
            }
        } else {
            debug!("Cancellation already requested, ignoring {} trigger", trigger);
        }
        self.token.cancel();
    }
}

/// Owner of the cancellation latch for one worker
#[derive(Debug)]
pub struct CancellationController {
    latch: Arc<Latch>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl CancellationController {
    pub fn new() -> Self {
        Self {
            latch: Arc::new(Latch {
                token: CancellationToken::new(),
                trigger: OnceLock::new(),
            }),
            timer: Mutex::new(None),
        }
    }

    /// Start the deadline timer and hand out an observer.
    ///
    /// Arming again replaces the previous timer. A deadline already in the
    /// past fires immediately. Must be called from within a tokio runtime.
    pub fn arm(&self, deadline: Instant) -> CancelObserver {
        let latch = Arc::clone(&self.latch);
        let timer = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => latch.fire(CancelTrigger::Deadline),
                _ = latch.token.cancelled() => {}
            }
        });

        if let Some(previous) = self.replace_timer(Some(timer)) {
            previous.abort();
        }

        self.observer()
    }

    /// Fire the latch now. Idempotent.
    pub fn cancel_now(&self) {
        self.latch.fire(CancelTrigger::Explicit);
    }

    /// Stop the deadline timer without touching the latch.
    pub fn disarm(&self) {
        if let Some(timer) = self.replace_timer(None) {
            timer.abort();
        }
    }

    pub fn observer(&self) -> CancelObserver {
        CancelObserver {
            token: self.latch.token.clone(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.latch.token.is_cancelled()
    }

    /// The trigger that fired the latch, if it has fired
    pub fn trigger(&self) -> Option<CancelTrigger> {
        self.latch.trigger.get().copied()
    }

    fn replace_timer(&self, timer: Option<JoinHandle<()>>) -> Option<JoinHandle<()>> {
        // A poisoned lock still holds a valid handle
        let mut slot = self.timer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::replace(&mut *slot, timer)
    }
}

impl Default for CancellationController {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CancellationController {
    fn drop(&mut self) {
        self.disarm();
    }
}

/// Read-only view of the cancellation latch
#[derive(Debug, Clone)]
pub struct CancelObserver {
    token: CancellationToken,
}

impl CancelObserver {
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the latch fires; immediately if it already has.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_explicit_cancel_is_observed() {
        let controller = CancellationController::new();
        let observer = controller.arm(Instant::now() + Duration::from_secs(3600));
        assert!(!observer.is_cancelled());

        controller.cancel_now();
        assert!(observer.is_cancelled());
        observer.cancelled().await;
        assert_eq!(controller.trigger(), Some(CancelTrigger::Explicit));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_fires_latch() {
        let controller = CancellationController::new();
        let observer = controller.arm(Instant::now() + Duration::from_secs(30));

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(!observer.is_cancelled());

        tokio::time::timeout(Duration::from_secs(5), observer.cancelled())
            .await
            .expect("deadline should fire");
        assert_eq!(controller.trigger(), Some(CancelTrigger::Deadline));
    }

    #[tokio::test(start_paused = true)]
    async fn test_past_deadline_fires_immediately() {
        let controller = CancellationController::new();
        let observer = controller.arm(Instant::now());
        tokio::time::timeout(Duration::from_millis(10), observer.cancelled())
            .await
            .expect("past deadline should fire at once");
    }

    #[tokio::test]
    async fn test_cancel_now_is_idempotent() {
        let controller = CancellationController::new();
        let observer = controller.observer();
        controller.cancel_now();
        controller.cancel_now();
        assert!(observer.is_cancelled());
        assert_eq!(controller.trigger(), Some(CancelTrigger::Explicit));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_trigger_wins() {
        let controller = CancellationController::new();
        let observer = controller.arm(Instant::now() + Duration::from_secs(1));
        controller.cancel_now();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(observer.is_cancelled());
        assert_eq!(controller.trigger(), Some(CancelTrigger::Explicit));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disarm_stops_deadline() {
        let controller = CancellationController::new();
        let observer = controller.arm(Instant::now() + Duration::from_secs(1));
        controller.disarm();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!observer.is_cancelled());
        assert_eq!(controller.trigger(), None);
    }
}
