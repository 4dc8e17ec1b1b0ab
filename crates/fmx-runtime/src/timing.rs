//! Cancellable waits

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::container::EventContainer;

/// Sleep unless cancelled first; `true` when the full delay elapsed
pub async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Roughly 30 years; stands in for deadlines past `Instant`'s range
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// `now + delay`, saturating to a far-future instant instead of overflowing
pub(crate) fn deadline_after(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay).unwrap_or_else(|| now + FAR_FUTURE)
}

/// How a wait for a terminal playback state ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Stopped,
    TimedOut,
    Cancelled,
}

/// Poll a container every `tick` until the engine reports it stopped
///
/// A disposed or invalid container counts as stopped.
pub async fn wait_until_stopped(
    container: &Arc<EventContainer>,
    tick: Duration,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
) -> WaitOutcome {
    let deadline = timeout.map(|t| deadline_after(Instant::now(), t));
    loop {
        if container.state_or_stopped().is_stopped() {
            return WaitOutcome::Stopped;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return WaitOutcome::TimedOut;
        }
        if !sleep_or_cancel(tick, cancel).await {
            return WaitOutcome::Cancelled;
        }
    }
}

/// Spawn a detached task on the current tokio runtime
///
/// Returns `false` (and drops the task) outside a runtime.
pub(crate) fn spawn_detached<F>(what: &str, task: F) -> bool
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(task);
            true
        }
        Err(_) => {
            log::error!("[Audio] No tokio runtime, cannot run {}", what);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fmx_core::{EventRef, StopMode};
    use fmx_engine::{SimEventSpec, SimulatedEngine};

    #[tokio::test(start_paused = true)]
    async fn test_sleep_or_cancel() {
        let token = CancellationToken::new();
        assert!(sleep_or_cancel(Duration::from_secs(1), &token).await);
        token.cancel();
        assert!(!sleep_or_cancel(Duration::from_secs(1), &token).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_after_saturates() {
        let now = Instant::now();
        assert_eq!(deadline_after(now, Duration::from_secs(2)), now + Duration::from_secs(2));
        assert!(deadline_after(now, Duration::MAX) > now + Duration::from_secs(86400 * 365));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_stopped() {
        let engine = Arc::new(SimulatedEngine::new());
        let ev = EventRef::from_path("event:/SFX/Hit");
        engine.add_event(&ev, SimEventSpec::one_shot(Duration::from_millis(300)));
        let c = EventContainer::create(engine.clone(), "Hit", ev.clone(), StopMode::Immediate).unwrap();
        c.play().unwrap();

        let start = Instant::now();
        let token = CancellationToken::new();
        let outcome = wait_until_stopped(&c, Duration::from_millis(16), None, &token).await;
        assert_eq!(outcome, WaitOutcome::Stopped);
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_timeout_and_cancel() {
        let engine = Arc::new(SimulatedEngine::new());
        let ev = EventRef::from_path("event:/Amb/Loop");
        let c = EventContainer::create(engine.clone(), "Loop", ev, StopMode::Immediate).unwrap();
        c.play().unwrap();

        let token = CancellationToken::new();
        let outcome =
            wait_until_stopped(&c, Duration::from_millis(16), Some(Duration::from_secs(2)), &token).await;
        assert_eq!(outcome, WaitOutcome::TimedOut);

        token.cancel();
        let outcome = wait_until_stopped(&c, Duration::from_millis(16), None, &token).await;
        assert_eq!(outcome, WaitOutcome::Cancelled);
    }
}
